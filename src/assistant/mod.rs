//! Reasoning backend integration.
//!
//! The backend keeps conversation memory server-side: we open a thread per
//! chat conversation, append user messages, start runs, and poll them until
//! they finish or ask for a tool call. [`AssistantBackend`] is the seam; the
//! production implementation is [`OpenAiAssistantsClient`].

pub mod openai;
pub mod traits;

pub use openai::OpenAiAssistantsClient;
pub use traits::{
    AssistantBackend, BuiltinTool, FunctionCall, RequiredAction, Run, RunError, RunStatus,
    RunToolCall, SubmitToolOutputs, ThreadHandle, ToolInvocation, ToolOutput,
};

use crate::config::Config;
use crate::tools::CapabilityRegistry;
use anyhow::Context;
use std::sync::Arc;

/// Build the backend client from configuration.
pub fn create_backend(config: &Config) -> anyhow::Result<Arc<dyn AssistantBackend>> {
    let api_key = config
        .assistant
        .api_key
        .clone()
        .context("assistant.api_key (OPENAI_API_KEY) is not set")?;
    Ok(Arc::new(OpenAiAssistantsClient::new(
        config.assistant.api_base.clone(),
        api_key,
    )))
}

/// Built-in backend tools enabled in configuration.
pub fn enabled_builtins(config: &Config) -> Vec<BuiltinTool> {
    let mut builtins = Vec::new();
    if config.assistant.enable_code_interpreter {
        builtins.push(BuiltinTool::CodeInterpreter);
    }
    if config.assistant.enable_file_search {
        builtins.push(BuiltinTool::FileSearch);
    }
    builtins
}

/// Replace the assistant's tool list with the capability catalog.
pub async fn sync_assistant_tools(
    backend: &dyn AssistantBackend,
    assistant_id: &str,
    registry: &CapabilityRegistry,
    builtins: &[BuiltinTool],
) -> anyhow::Result<()> {
    let specs = registry.specs();
    backend
        .update_assistant_tools(assistant_id, &specs, builtins)
        .await
        .with_context(|| format!("Failed to sync tools to assistant {assistant_id}"))?;
    tracing::info!(
        assistant_id,
        functions = specs.len(),
        builtins = builtins.len(),
        "Assistant tool catalog synced"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_follow_config_toggles() {
        let mut config = Config::default();
        assert_eq!(
            enabled_builtins(&config),
            vec![BuiltinTool::CodeInterpreter, BuiltinTool::FileSearch]
        );
        config.assistant.enable_code_interpreter = false;
        assert_eq!(enabled_builtins(&config), vec![BuiltinTool::FileSearch]);
    }

    #[test]
    fn create_backend_requires_api_key() {
        let err = create_backend(&Config::default()).err().unwrap();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
