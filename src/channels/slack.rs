use super::traits::{Channel, ChannelMessage, SendMessage};
use crate::config::SlackConfig;
use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_tungstenite::tungstenite::Message;

/// Slack channel: receives `app_mention` events over Socket Mode and posts
/// replies through the Web API.
pub struct SlackChannel {
    bot_token: String,
    app_token: String,
    api_base: String,
    client: reqwest::Client,
}

/// One Socket Mode frame.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub envelope_id: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Set on `disconnect` frames (e.g. "refresh_requested").
    #[serde(default)]
    pub reason: Option<String>,
}

/// Decode a Socket Mode text frame.
pub fn parse_envelope(text: &str) -> anyhow::Result<SocketEnvelope> {
    serde_json::from_str(text).context("failed to parse Slack socket envelope")
}

/// Extract an `app_mention` from an `events_api` envelope. Anything else,
/// including the bot's own messages, yields `None`.
pub fn mention_from_envelope(
    envelope: &SocketEnvelope,
    bot_user_id: &str,
) -> Option<ChannelMessage> {
    if envelope.kind != "events_api" {
        return None;
    }
    let payload = envelope.payload.as_ref()?;
    if payload.get("type").and_then(|t| t.as_str()) != Some("event_callback") {
        return None;
    }
    let event = payload.get("event")?;
    if event.get("type").and_then(|t| t.as_str()) != Some("app_mention") {
        return None;
    }
    if event.get("bot_id").is_some()
        || event.get("subtype").and_then(|s| s.as_str()) == Some("bot_message")
    {
        return None;
    }

    let str_field = |key: &str| {
        event
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let user = str_field("user")?;
    if !bot_user_id.is_empty() && user == bot_user_id {
        return None;
    }
    let channel = str_field("channel")?;
    let event_ts = str_field("event_ts").or_else(|| str_field("ts"))?;
    let text = event.get("text").and_then(|t| t.as_str()).unwrap_or("");

    Some(ChannelMessage {
        id: format!("slack_{channel}_{event_ts}"),
        sender: user.to_string(),
        reply_target: channel.to_string(),
        content: text.to_string(),
        channel: "slack".to_string(),
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        thread_ts: str_field("thread_ts").map(str::to_string),
        event_ts: event_ts.to_string(),
    })
}

fn ack_frame(envelope_id: &str) -> Message {
    Message::Text(
        serde_json::json!({ "envelope_id": envelope_id })
            .to_string()
            .into(),
    )
}

/// Slack answers most app-level errors with HTTP 200 and `"ok": false`.
fn check_slack_ok(method: &str, body: &serde_json::Value) -> anyhow::Result<()> {
    if body.get("ok").and_then(serde_json::Value::as_bool) == Some(true) {
        return Ok(());
    }
    let err = body
        .get("error")
        .and_then(|e| e.as_str())
        .unwrap_or("unknown");
    anyhow::bail!("Slack {method} failed: {err}")
}

impl SlackChannel {
    pub fn new(
        bot_token: impl Into<String>,
        app_token: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            bot_token: bot_token.into(),
            app_token: app_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: crate::config::build_http_client(Duration::from_secs(30)),
        }
    }

    /// Build from `[slack]`; both tokens are required.
    pub fn from_config(config: &SlackConfig) -> anyhow::Result<Self> {
        let bot_token = config
            .bot_token
            .clone()
            .context("slack.bot_token (SLACK_BOT_TOKEN) is not set")?;
        let app_token = config
            .app_token
            .clone()
            .context("slack.app_token (SLACK_APP_TOKEN) is not set")?;
        Ok(Self::new(bot_token, app_token, config.api_base.clone()))
    }

    async fn call(
        &self,
        method: &str,
        token: &str,
        body: Option<&serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        let mut request = self
            .client
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = request
            .send()
            .await
            .with_context(|| format!("Slack {method} request failed"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
        if !status.is_success() {
            anyhow::bail!("Slack {method} failed ({status}): {text}");
        }

        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
        check_slack_ok(method, &parsed)?;
        Ok(parsed)
    }

    /// The bot's own user id, so its messages can be ignored.
    async fn bot_user_id(&self) -> Option<String> {
        match self.call("auth.test", &self.bot_token, None).await {
            Ok(resp) => resp
                .get("user_id")
                .and_then(|u| u.as_str())
                .map(String::from),
            Err(e) => {
                tracing::warn!("Slack auth.test failed, cannot filter own messages: {e:#}");
                None
            }
        }
    }

    /// Request a fresh Socket Mode websocket URL.
    pub async fn open_socket_url(&self) -> anyhow::Result<String> {
        let resp = self
            .call("apps.connections.open", &self.app_token, None)
            .await?;
        resp.get("url")
            .and_then(|u| u.as_str())
            .filter(|u| !u.trim().is_empty())
            .map(String::from)
            .context("Slack apps.connections.open did not return a url")
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, message: &SendMessage) -> anyhow::Result<()> {
        let mut body = serde_json::json!({
            "channel": message.recipient,
            "text": message.content
        });
        if let Some(ref ts) = message.thread_ts {
            body["thread_ts"] = serde_json::json!(ts);
        }
        self.call("chat.postMessage", &self.bot_token, Some(&body))
            .await?;
        Ok(())
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChannelMessage>) -> anyhow::Result<()> {
        let bot_user_id = self.bot_user_id().await.unwrap_or_default();
        let url = self.open_socket_url().await?;

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .context("Slack Socket Mode connect failed")?;
        let (mut write, mut read) = ws_stream.split();
        tracing::info!("Slack: Socket Mode connected");

        while let Some(frame) = read.next().await {
            let text = match frame.context("Slack socket read failed")? {
                Message::Text(t) => t.to_string(),
                Message::Binary(b) => match std::str::from_utf8(&b) {
                    Ok(s) => s.to_string(),
                    Err(_) => continue,
                },
                Message::Close(_) => break,
                _ => continue,
            };

            let envelope = match parse_envelope(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!("Slack: {e:#}");
                    continue;
                }
            };

            if let Some(ref envelope_id) = envelope.envelope_id {
                write
                    .send(ack_frame(envelope_id))
                    .await
                    .context("failed to acknowledge Slack envelope")?;
            }

            match envelope.kind.as_str() {
                "hello" => tracing::debug!("Slack: socket hello received"),
                "disconnect" => {
                    tracing::info!(
                        reason = envelope.reason.as_deref().unwrap_or("unspecified"),
                        "Slack: server requested disconnect"
                    );
                    return Ok(());
                }
                "events_api" => {
                    if let Some(msg) = mention_from_envelope(&envelope, &bot_user_id) {
                        if tx.send(msg).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                other => tracing::debug!(kind = other, "Slack: ignoring envelope"),
            }
        }

        tracing::info!("Slack: socket closed");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.call("auth.test", &self.bot_token, None).await.is_ok()
    }
}
