use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_ENV: &str = "ONCALL_CONFIG_DIR";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level on-call assistant configuration, loaded from `config.toml`.
///
/// Resolution order: `ONCALL_CONFIG_DIR` env → `~/.oncall/config.toml`.
/// Credentials are normally injected through environment variables, see
/// [`Config::apply_env_overrides`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub grafana: GrafanaConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

// ── Slack ─────────────────────────────────────────────────────────

/// Slack bot configuration (`[slack]`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SlackConfig {
    /// Slack bot OAuth token (xoxb-...). Overridden by `SLACK_BOT_TOKEN`.
    pub bot_token: Option<String>,
    /// Slack app-level token for Socket Mode (xapp-...). Overridden by `SLACK_APP_TOKEN`.
    pub app_token: Option<String>,
    /// Channel whose history the `fetch_recent_channel_messages` tool reads
    /// (usually the production alerts channel). Overridden by `SLACK_ALERT_CHANNEL_ID`.
    pub alert_channel_id: Option<String>,
    /// Slack Web API base URL.
    pub api_base: String,
    /// Acknowledgement posted as soon as a mention is picked up.
    pub ack_text: String,
    /// Prefix prepended to the final answer.
    pub reply_prefix: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            app_token: None,
            alert_channel_id: None,
            api_base: "https://slack.com/api".into(),
            ack_text: ":robot_face: \nOn it!".into(),
            reply_prefix: ":heart: \n".into(),
        }
    }
}

// ── Reasoning backend ─────────────────────────────────────────────

/// Reasoning backend configuration (`[assistant]`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AssistantConfig {
    /// API key. Overridden by `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// Identifier of the pre-provisioned assistant. Overridden by `ONCALL_ASSISTANT_ID`.
    pub assistant_id: Option<String>,
    /// Base URL of the Assistants API.
    pub api_base: String,
    /// Push the capability catalog to the assistant when the listener starts.
    pub sync_tools_on_start: bool,
    /// Keep the built-in code interpreter tool enabled on the assistant.
    pub enable_code_interpreter: bool,
    /// Keep the built-in file search tool enabled on the assistant.
    pub enable_file_search: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            assistant_id: None,
            api_base: "https://api.openai.com/v1".into(),
            sync_tools_on_start: true,
            enable_code_interpreter: true,
            enable_file_search: true,
        }
    }
}

// ── Lookup backends ───────────────────────────────────────────────

/// Log index configuration (`[elasticsearch]`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ElasticsearchConfig {
    /// Base URL, e.g. `http://elasticsearch:9200`. Overridden by `ELASTICSEARCH_URL`.
    pub url: Option<String>,
    /// Index pattern searched for container logs.
    pub index_pattern: String,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: None,
            index_pattern: "logs-*".into(),
        }
    }
}

/// Metrics dashboard configuration (`[grafana]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GrafanaConfig {
    /// Base URL. Overridden by `GRAFANA_URL`.
    pub url: Option<String>,
    /// Service account token. Overridden by `GRAFANA_API_KEY`.
    pub api_key: Option<String>,
    /// Prometheus datasource id used for consumer lag queries.
    /// Overridden by `PROMETHEUS_DATASOURCE_ID`.
    pub prometheus_datasource_id: Option<String>,
}

// ── Dispatch loop ─────────────────────────────────────────────────

/// Turn execution limits (`[dispatch]`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DispatchConfig {
    /// Interval between run status polls, in milliseconds. Default: `500`.
    pub poll_interval_ms: u64,
    /// Wall-clock budget for one turn, in seconds. Overridden by
    /// `ONCALL_TURN_TIMEOUT_SECS`. Default: `300`.
    pub turn_timeout_secs: u64,
    /// Maximum `requires_action` cycles handled in one turn. Default: `8`.
    pub max_tool_rounds: usize,
    /// Maximum number of mentions processed concurrently. Default: `16`.
    pub max_in_flight_turns: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            turn_timeout_secs: 300,
            max_tool_rounds: 8,
            max_in_flight_turns: 16,
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs.max(1))
    }
}

// ── Loading ───────────────────────────────────────────────────────

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".oncall"))
}

fn resolve_config_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Ok(custom) = std::env::var(CONFIG_DIR_ENV) {
        let custom = custom.trim();
        if !custom.is_empty() {
            return Ok(PathBuf::from(custom));
        }
    }
    default_config_dir()
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Config {
    /// Load `config.toml` from `config_dir` (or the default location) and
    /// apply environment overrides. A missing file yields defaults.
    pub async fn load(config_dir: Option<&Path>) -> Result<Self> {
        let dir = resolve_config_dir(config_dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);

        let mut config = if fs::try_exists(&config_path).await.unwrap_or(false) {
            let contents = fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config file {}", config_path.display()))?
        } else {
            tracing::debug!(
                "No config file at {}; using defaults and environment",
                config_path.display()
            );
            Config::default()
        };

        config.config_path = config_path;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source. Blank values are ignored.
    pub fn apply_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).and_then(non_empty);

        if let Some(token) = get("SLACK_BOT_TOKEN") {
            self.slack.bot_token = Some(token);
        }
        if let Some(token) = get("SLACK_APP_TOKEN") {
            self.slack.app_token = Some(token);
        }
        if let Some(channel) = get("SLACK_ALERT_CHANNEL_ID") {
            self.slack.alert_channel_id = Some(channel);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.assistant.api_key = Some(key);
        }
        if let Some(id) = get("ONCALL_ASSISTANT_ID") {
            self.assistant.assistant_id = Some(id);
        }
        if let Some(url) = get("ELASTICSEARCH_URL") {
            self.elasticsearch.url = Some(url);
        }
        if let Some(url) = get("GRAFANA_URL") {
            self.grafana.url = Some(url);
        }
        if let Some(key) = get("GRAFANA_API_KEY") {
            self.grafana.api_key = Some(key);
        }
        if let Some(id) = get("PROMETHEUS_DATASOURCE_ID") {
            self.grafana.prometheus_datasource_id = Some(id);
        }
        if let Some(raw) = get("ONCALL_TURN_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => self.dispatch.turn_timeout_secs = secs,
                _ => tracing::warn!("Ignoring invalid ONCALL_TURN_TIMEOUT_SECS={raw}"),
            }
        }
    }

    /// Names of settings that must be present for a single turn to run
    /// against the reasoning backend.
    pub fn missing_backend_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.assistant.api_key.is_none() {
            missing.push("assistant.api_key (OPENAI_API_KEY)");
        }
        if self.assistant.assistant_id.is_none() {
            missing.push("assistant.assistant_id (ONCALL_ASSISTANT_ID)");
        }
        missing
    }

    /// Fail unless everything the Slack listener needs is configured.
    pub fn validate_for_listen(&self) -> Result<()> {
        let mut missing = self.missing_backend_settings();
        if self.slack.bot_token.is_none() {
            missing.push("slack.bot_token (SLACK_BOT_TOKEN)");
        }
        if self.slack.app_token.is_none() {
            missing.push("slack.app_token (SLACK_APP_TOKEN)");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Missing required settings: {}", missing.join(", "))
        }
    }

    /// Fail unless a turn can be driven against the reasoning backend.
    pub fn validate_for_backend(&self) -> Result<()> {
        let missing = self.missing_backend_settings();
        if missing.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Missing required settings: {}", missing.join(", "))
        }
    }
}
