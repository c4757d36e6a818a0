use super::traits::{LookupError, Tool};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;

const SERVICE: &str = "elasticsearch";
const CONTAINER_FIELD: &str = "kubernetes.container.name";
const LOOKBACK: &str = "now-15m";
const DEFAULT_LOG_COUNT: u64 = 10;

/// Searches the log index for recent entries of one container.
pub struct ContainerLogsTool {
    client: reqwest::Client,
    base_url: Option<String>,
    index_pattern: String,
}

impl ContainerLogsTool {
    pub fn new(
        client: reqwest::Client,
        base_url: Option<String>,
        index_pattern: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            index_pattern: index_pattern.into(),
        }
    }

    /// Search body: container-name term filter over the last 15 minutes.
    pub fn search_body(container: &str, log_count: u64) -> serde_json::Value {
        json!({
            "size": log_count,
            "query": {
                "bool": {
                    "filter": [
                        { "term": { CONTAINER_FIELD: container } },
                        { "range": { "@timestamp": { "gte": LOOKBACK } } }
                    ]
                }
            }
        })
    }

    /// Pull log lines out of a search response, dropping exact duplicates.
    ///
    /// Entries without a `message` fall back to `parsefailmessage`. The first
    /// occurrence of a line keeps its position; at most `limit` lines are kept.
    pub fn dedup_messages(response: &serde_json::Value, limit: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut lines = Vec::new();

        let hits = response
            .pointer("/hits/hits")
            .and_then(serde_json::Value::as_array)
            .into_iter()
            .flatten();

        for hit in hits {
            if lines.len() >= limit {
                break;
            }
            let Some(source) = hit.get("_source") else {
                continue;
            };
            let line = source
                .get("message")
                .and_then(serde_json::Value::as_str)
                .or_else(|| {
                    source
                        .get("parsefailmessage")
                        .and_then(serde_json::Value::as_str)
                });
            let Some(line) = line.filter(|l| !l.is_empty()) else {
                continue;
            };
            if seen.insert(line.to_string()) {
                lines.push(line.to_string());
            }
        }

        lines
    }

    fn log_count(args: &serde_json::Value) -> u64 {
        args.get("log_count")
            .and_then(serde_json::Value::as_f64)
            .map(|n| n.max(0.0) as u64)
            .unwrap_or(DEFAULT_LOG_COUNT)
    }
}

#[async_trait]
impl Tool for ContainerLogsTool {
    fn name(&self) -> &str {
        "search_container_logs"
    }

    fn description(&self) -> &str {
        "Fetch the most recent log lines (last 15 minutes) of a container from the Elasticsearch log index."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "container": {
                    "type": "string",
                    "description": "The container name"
                },
                "log_count": {
                    "type": "number",
                    "description": "Maximum number of log lines to return"
                }
            },
            "required": ["container", "log_count"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, LookupError> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or(LookupError::NotConfigured("elasticsearch.url"))?;
        let container = args
            .get("container")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let log_count = Self::log_count(&args);
        tracing::debug!(container, log_count, "Searching container logs");

        let resp = self
            .client
            .post(format!("{base_url}/{}/_search", self.index_pattern))
            .json(&Self::search_body(container, log_count))
            .send()
            .await
            .map_err(LookupError::http(SERVICE))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
        if !status.is_success() {
            return Err(LookupError::upstream(
                SERVICE,
                format!("search failed ({status}): {body}"),
            ));
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| LookupError::InvalidResponse {
                service: SERVICE,
                message: e.to_string(),
            })?;
        let limit = usize::try_from(log_count).unwrap_or(usize::MAX);
        Ok(json!(Self::dedup_messages(&parsed, limit)))
    }
}
