pub mod schema;

pub use schema::{
    AssistantConfig, Config, DispatchConfig, ElasticsearchConfig, GrafanaConfig, SlackConfig,
};

/// Shared HTTP client builder for outbound calls (backend, Slack, lookups).
pub fn build_http_client(timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build HTTP client with timeouts, using defaults: {e}");
            reqwest::Client::new()
        })
}
