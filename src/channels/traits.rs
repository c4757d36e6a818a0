use async_trait::async_trait;

/// A mention received from a chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: String,
    pub sender: String,
    /// Platform channel the reply should go to.
    pub reply_target: String,
    /// Raw message text, mention markup included.
    pub content: String,
    /// Name of the adapter that produced the message ("slack").
    pub channel: String,
    /// Unix seconds when the message was received.
    pub timestamp: u64,
    /// Root of the thread the mention was posted in, if any.
    pub thread_ts: Option<String>,
    /// Timestamp of the mention itself.
    pub event_ts: String,
}

impl ChannelMessage {
    /// Conversation key: the enclosing thread, or the mention itself when it
    /// starts a new thread.
    pub fn thread_key(&self) -> &str {
        self.thread_ts
            .as_deref()
            .filter(|ts| !ts.is_empty())
            .unwrap_or(&self.event_ts)
    }
}

/// A message to post back to a chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessage {
    pub content: String,
    pub recipient: String,
    pub thread_ts: Option<String>,
}

impl SendMessage {
    pub fn new(content: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            recipient: recipient.into(),
            thread_ts: None,
        }
    }

    /// Post as a reply inside `thread_ts`.
    pub fn in_thread(mut self, thread_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }
}

/// Chat platform adapter.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &SendMessage) -> anyhow::Result<()>;

    /// Receive mentions until the session ends. Returning `Ok(())` means the
    /// platform closed the session cleanly; the supervisor reconnects either way.
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChannelMessage>) -> anyhow::Result<()>;

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mention(thread_ts: Option<&str>) -> ChannelMessage {
        ChannelMessage {
            id: "slack_C1_1700000001.000200".into(),
            sender: "U1".into(),
            reply_target: "C1".into(),
            content: "<@UBOT> hi".into(),
            channel: "slack".into(),
            timestamp: 0,
            thread_ts: thread_ts.map(String::from),
            event_ts: "1700000001.000200".into(),
        }
    }

    #[test]
    fn thread_key_prefers_enclosing_thread() {
        assert_eq!(
            mention(Some("1700000000.000100")).thread_key(),
            "1700000000.000100"
        );
    }

    #[test]
    fn thread_key_falls_back_to_event_ts() {
        assert_eq!(mention(None).thread_key(), "1700000001.000200");
        assert_eq!(mention(Some("")).thread_key(), "1700000001.000200");
    }

    #[test]
    fn send_message_builder_sets_thread() {
        let msg = SendMessage::new("On it!", "C1").in_thread("1700000000.000100");
        assert_eq!(msg.thread_ts.as_deref(), Some("1700000000.000100"));
        assert_eq!(msg.recipient, "C1");
    }
}
