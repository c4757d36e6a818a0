use crate::assistant::RunStatus;
use crate::tools::{LookupError, UnknownCapability};
use std::time::Duration;

/// Why a turn (or one step of it) did not produce an answer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    UnknownCapability(#[from] UnknownCapability),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("could not find a question after the bot mention in {0:?}")]
    MalformedMention(String),

    #[error("run {run_id} ended with status {status} without a usable answer: {detail}")]
    StaleRun {
        run_id: String,
        status: RunStatus,
        detail: String,
    },

    #[error("turn did not finish within {0:?}")]
    Timeout(Duration),

    #[error("turn was cancelled")]
    Cancelled,

    #[error("run {run_id} requested tools more than {limit} times")]
    ToolRoundsExceeded { run_id: String, limit: usize },

    #[error("assistant backend error: {0}")]
    Backend(String),
}

impl DispatchError {
    pub fn backend(err: anyhow::Error) -> Self {
        Self::Backend(format!("{err:#}"))
    }

    /// Errors the backend can reason about: reported as the tool output
    /// instead of ending the turn.
    pub fn is_tool_recoverable(&self) -> bool {
        matches!(self, Self::InvalidArguments { .. } | Self::Lookup(_))
    }

    /// Errors after which the run may still be active on the backend.
    pub fn leaves_run_active(&self) -> bool {
        !matches!(self, Self::StaleRun { .. } | Self::MalformedMention(_))
    }
}
