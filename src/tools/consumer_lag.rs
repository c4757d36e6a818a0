use super::traits::{LookupError, Tool};
use async_trait::async_trait;
use serde_json::json;

const SERVICE: &str = "grafana";

/// Queries Kafka consumer-group lag through the Grafana datasource query API.
pub struct ConsumerLagTool {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
    datasource_id: Option<String>,
}

impl ConsumerLagTool {
    pub fn new(
        client: reqwest::Client,
        base_url: Option<String>,
        api_key: Option<String>,
        datasource_id: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            api_key,
            datasource_id,
        }
    }

    pub fn lag_expr(consumer_group: &str) -> String {
        format!(
            r#"max(kafka_consumergroup_lag_sum{{consumergroup="{consumer_group}"}}) by (consumergroup, topic) > 0"#
        )
    }

    /// `/api/ds/query` payload: last 6 hours at 1 minute resolution.
    pub fn query_payload(consumer_group: &str, datasource_id: &str) -> serde_json::Value {
        // Grafana accepts numeric or string ids; keep numbers numeric.
        let datasource = datasource_id
            .parse::<u64>()
            .map_or_else(|_| json!(datasource_id), |id| json!(id));
        json!({
            "from": "now-6h",
            "to": "now",
            "queries": [
                {
                    "refId": "A",
                    "datasourceId": datasource,
                    "expr": Self::lag_expr(consumer_group),
                    "format": "time_series",
                    "interval": "1m"
                }
            ]
        })
    }
}

#[async_trait]
impl Tool for ConsumerLagTool {
    fn name(&self) -> &str {
        "query_consumer_lag"
    }

    fn description(&self) -> &str {
        "Fetch the latest Grafana Kafka lag data (last 6 hours) for the given consumer group."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "consumer_group": {
                    "type": "string",
                    "description": "The Kafka consumer group"
                }
            },
            "required": ["consumer_group"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, LookupError> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or(LookupError::NotConfigured("grafana.url"))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(LookupError::NotConfigured("grafana.api_key"))?;
        let datasource_id = self
            .datasource_id
            .as_deref()
            .ok_or(LookupError::NotConfigured("grafana.prometheus_datasource_id"))?;
        let consumer_group = args
            .get("consumer_group")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        tracing::debug!(consumer_group, "Querying consumer lag");

        let resp = self
            .client
            .post(format!("{base_url}/api/ds/query"))
            .bearer_auth(api_key)
            .json(&Self::query_payload(consumer_group, datasource_id))
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
                format!("query failed ({status}): {body}"),
            ));
        }

        serde_json::from_str(&body).map_err(|e| LookupError::InvalidResponse {
            service: SERVICE,
            message: e.to_string(),
        })
    }
}
