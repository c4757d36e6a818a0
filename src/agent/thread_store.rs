use super::error::DispatchError;
use crate::assistant::{AssistantBackend, ThreadHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{MutexGuard, OnceCell};

/// One chat conversation bound to a backend-side thread.
#[derive(Debug)]
pub struct ConversationThread {
    key: String,
    handle: ThreadHandle,
    /// Serializes turns on this conversation. Tokio's mutex is FIFO fair,
    /// so queued turns run in arrival order.
    turn_lock: tokio::sync::Mutex<()>,
}

impl ConversationThread {
    fn new(key: String, handle: ThreadHandle) -> Self {
        Self {
            key,
            handle,
            turn_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn handle(&self) -> &ThreadHandle {
        &self.handle
    }

    /// Wait until no other turn is running on this conversation.
    pub async fn lock_turn(&self) -> MutexGuard<'_, ()> {
        self.turn_lock.lock().await
    }
}

type ThreadSlot = Arc<OnceCell<Arc<ConversationThread>>>;

/// Maps chat thread keys to backend conversations.
///
/// Entries are created lazily and kept for the life of the process. Each key
/// owns a once-cell, so concurrent first mentions on the same key share a
/// single `create_thread` call while other keys proceed independently.
pub struct ThreadStore {
    backend: Arc<dyn AssistantBackend>,
    slots: Mutex<HashMap<String, ThreadSlot>>,
}

impl ThreadStore {
    pub fn new(backend: Arc<dyn AssistantBackend>) -> Self {
        Self {
            backend,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the conversation for `key`, creating it on first use.
    ///
    /// A failed creation leaves the key empty so the next call retries.
    pub async fn get_or_create(&self, key: &str) -> Result<Arc<ConversationThread>, DispatchError> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.to_string()).or_default())
        };

        let thread = slot
            .get_or_try_init(|| async {
                let handle = self
                    .backend
                    .create_thread()
                    .await
                    .map_err(DispatchError::backend)?;
                tracing::info!(thread_key = key, backend_thread = %handle.id, "Created conversation thread");
                Ok::<_, DispatchError>(Arc::new(ConversationThread::new(key.to_string(), handle)))
            })
            .await?;

        Ok(Arc::clone(thread))
    }

    /// Existing conversation for `key`, without creating one.
    pub fn get(&self, key: &str) -> Option<Arc<ConversationThread>> {
        self.slots
            .lock()
            .get(key)
            .and_then(|slot| slot.get().cloned())
    }

    /// Number of conversations with a backend handle.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
