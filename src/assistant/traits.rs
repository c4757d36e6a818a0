use crate::tools::ToolSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle for a backend-side conversation (its memory lives remotely).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadHandle {
    pub id: String,
}

impl ThreadHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Run lifecycle as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
}

impl RunStatus {
    /// The backend is still working; keep polling.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Queued | Self::InProgress | Self::Cancelling)
    }

    /// No further transitions will happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Completed | Self::Incomplete | Self::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend processing turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredAction {
    #[serde(default)]
    pub submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitToolOutputs {
    #[serde(default)]
    pub tool_calls: Vec<RunToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunToolCall {
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// A capability invocation requested by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    /// Raw JSON-encoded arguments, parsed by the executor.
    pub arguments: String,
}

impl Run {
    /// Tool calls the backend is waiting on, in request order. Empty unless
    /// the run is in `requires_action`.
    pub fn pending_tool_calls(&self) -> Vec<ToolInvocation> {
        if self.status != RunStatus::RequiresAction {
            return Vec::new();
        }
        self.required_action
            .as_ref()
            .and_then(|action| action.submit_tool_outputs.as_ref())
            .map(|outputs| {
                outputs
                    .tool_calls
                    .iter()
                    .map(|call| ToolInvocation {
                        call_id: call.id.clone(),
                        name: call.function.name.clone(),
                        arguments: call.function.arguments.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.last_error.as_ref().map(|e| e.message.as_str())
    }
}

/// Output for one tool call, fed back to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Backend-hosted tools kept alongside our function tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTool {
    CodeInterpreter,
    FileSearch,
}

impl BuiltinTool {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CodeInterpreter => "code_interpreter",
            Self::FileSearch => "file_search",
        }
    }
}

/// Conversational reasoning backend.
///
/// Implementations own all reasoning and tool-selection policy; callers only
/// drive runs and relay tool outputs.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Open a new conversation and return its handle.
    async fn create_thread(&self) -> anyhow::Result<ThreadHandle>;

    /// Append a user message to the conversation.
    async fn add_user_message(&self, thread: &ThreadHandle, content: &str) -> anyhow::Result<()>;

    /// Start processing the conversation with the given assistant.
    async fn create_run(&self, thread: &ThreadHandle, assistant_id: &str) -> anyhow::Result<Run>;

    async fn retrieve_run(&self, thread: &ThreadHandle, run_id: &str) -> anyhow::Result<Run>;

    /// Feed tool results back; the run resumes.
    async fn submit_tool_outputs(
        &self,
        thread: &ThreadHandle,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> anyhow::Result<Run>;

    async fn cancel_run(&self, thread: &ThreadHandle, run_id: &str) -> anyhow::Result<()>;

    /// Text of the newest assistant message produced by `run_id`, if any.
    async fn latest_assistant_message(
        &self,
        thread: &ThreadHandle,
        run_id: &str,
    ) -> anyhow::Result<Option<String>>;

    /// Replace the assistant's tool list.
    async fn update_assistant_tools(
        &self,
        assistant_id: &str,
        tools: &[ToolSpec],
        builtins: &[BuiltinTool],
    ) -> anyhow::Result<()>;
}
