use super::traits::{LookupError, Tool};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

const SERVICE: &str = "slack";
/// Upper bound on messages returned by one history read.
pub const HISTORY_MESSAGE_LIMIT: u32 = 1000;
pub const DEFAULT_HOURS_BACK: f64 = 24.0;

/// Reads the recent history of the configured alerts channel.
pub struct ChannelHistoryTool {
    client: reqwest::Client,
    api_base: String,
    bot_token: Option<String>,
    channel_id: Option<String>,
}

impl ChannelHistoryTool {
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        bot_token: Option<String>,
        channel_id: Option<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token,
            channel_id,
        }
    }

    /// Query parameters for `conversations.history` covering
    /// `[now - hours_back, now]`.
    pub fn history_query(
        channel_id: &str,
        hours_back: f64,
        now: DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        // Fractional hours are honoured to the second. Negative or non-finite
        // windows collapse to zero; huge ones saturate at the epoch.
        let hours_back = if hours_back.is_finite() { hours_back.max(0.0) } else { 0.0 };
        let window_secs = (hours_back * 3600.0).round() as i64;
        let latest = now.timestamp();
        let oldest = latest.saturating_sub(window_secs).max(0);
        vec![
            ("channel", channel_id.to_string()),
            ("oldest", oldest.to_string()),
            ("latest", latest.to_string()),
            ("limit", HISTORY_MESSAGE_LIMIT.to_string()),
            ("inclusive", "true".to_string()),
        ]
    }

    fn hours_back(args: &serde_json::Value) -> f64 {
        args.get("hours_back")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(DEFAULT_HOURS_BACK)
    }
}

#[async_trait]
impl Tool for ChannelHistoryTool {
    fn name(&self) -> &str {
        "fetch_recent_channel_messages"
    }

    fn description(&self) -> &str {
        "Fetch recent Slack messages from the production alerts channel (Grafana, Prometheus \
         and other monitoring notifications about the production environment)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "hours_back": {
                    "type": "number",
                    "description": "How many hours of history to fetch (default 24)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, LookupError> {
        let token = self
            .bot_token
            .as_deref()
            .ok_or(LookupError::NotConfigured("slack.bot_token"))?;
        let channel_id = self
            .channel_id
            .as_deref()
            .ok_or(LookupError::NotConfigured("slack.alert_channel_id"))?;

        let hours_back = Self::hours_back(&args);
        let query = Self::history_query(channel_id, hours_back, Utc::now());
        tracing::debug!(channel = channel_id, hours_back, "Reading channel history");

        let data: serde_json::Value = self
            .client
            .get(format!("{}/conversations.history", self.api_base))
            .bearer_auth(token)
            .query(&query)
            .send()
            .await
            .map_err(LookupError::http(SERVICE))?
            .json()
            .await
            .map_err(LookupError::http(SERVICE))?;

        // Slack returns 200 for most app-level errors; check JSON "ok" field
        if data.get("ok") != Some(&serde_json::Value::Bool(true)) {
            let err = data
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown");
            return Err(LookupError::upstream(
                SERVICE,
                format!("Error fetching messages: {err}"),
            ));
        }

        Ok(data
            .get("messages")
            .cloned()
            .unwrap_or_else(|| json!([])))
    }
}
