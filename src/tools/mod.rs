//! Tool subsystem for backend-callable capabilities.
//!
//! Each capability implements the [`Tool`] trait defined in [`traits`]: a name,
//! a description, a JSON parameter schema, and an async `execute` method that
//! performs one read-only lookup against an external system.
//!
//! The fixed catalog is assembled by [`default_registry`] and exposed to the
//! reasoning backend through [`CapabilityRegistry::specs`].

pub mod channel_history;
pub mod consumer_lag;
pub mod container_logs;
pub mod endpoint_check;
pub mod registry;
pub mod traits;

pub use channel_history::ChannelHistoryTool;
pub use consumer_lag::ConsumerLagTool;
pub use container_logs::ContainerLogsTool;
pub use endpoint_check::EndpointCheckTool;
pub use registry::{CapabilityRegistry, UnknownCapability};
pub use traits::{LookupError, Tool, ToolSpec};

use crate::config::Config;
use std::sync::Arc;
use std::time::Duration;

const LOOKUP_HTTP_TIMEOUT_SECS: u64 = 30;

/// Build the capability catalog from configuration.
///
/// Every capability is registered even when its backend is not configured;
/// calling it then yields [`LookupError::NotConfigured`] which the backend
/// can relay to the user.
pub fn default_registry(config: &Config) -> CapabilityRegistry {
    let client = crate::config::build_http_client(Duration::from_secs(LOOKUP_HTTP_TIMEOUT_SECS));

    CapabilityRegistry::new()
        .with(Arc::new(ChannelHistoryTool::new(
            client.clone(),
            config.slack.api_base.clone(),
            config.slack.bot_token.clone(),
            config.slack.alert_channel_id.clone(),
        )))
        .with(Arc::new(EndpointCheckTool))
        .with(Arc::new(ContainerLogsTool::new(
            client.clone(),
            config.elasticsearch.url.clone(),
            config.elasticsearch.index_pattern.clone(),
        )))
        .with(Arc::new(ConsumerLagTool::new(
            client,
            config.grafana.url.clone(),
            config.grafana.api_key.clone(),
            config.grafana.prometheus_datasource_id.clone(),
        )))
}
