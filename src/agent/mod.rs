//! Turn orchestration: chat thread → backend conversation mapping, tool
//! execution, and the poll/act loop that drives a single run to an answer.

pub mod error;
pub mod executor;
pub mod loop_;
pub mod thread_store;

pub use error::DispatchError;
pub use executor::ToolExecutor;
pub use loop_::{TurnDispatcher, TurnLimits};
pub use thread_store::{ConversationThread, ThreadStore};

use crate::assistant::AssistantBackend;
use crate::config::Config;
use crate::tools::CapabilityRegistry;
use anyhow::Context;
use std::sync::Arc;

/// Wire a dispatcher from configuration around an existing backend and
/// capability catalog.
pub fn build_dispatcher(
    config: &Config,
    backend: Arc<dyn AssistantBackend>,
    registry: Arc<CapabilityRegistry>,
) -> anyhow::Result<TurnDispatcher> {
    let assistant_id = config
        .assistant
        .assistant_id
        .clone()
        .context("assistant.assistant_id (ONCALL_ASSISTANT_ID) is not set")?;
    let store = Arc::new(ThreadStore::new(Arc::clone(&backend)));
    Ok(TurnDispatcher::new(
        backend,
        store,
        ToolExecutor::new(registry),
        assistant_id,
        TurnLimits::from(&config.dispatch),
    ))
}
