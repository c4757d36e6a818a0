#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use oncall::agent::build_dispatcher;
use oncall::assistant::{create_backend, enabled_builtins, sync_assistant_tools};
use oncall::channels::{mention_prompt, start_channels};
use oncall::config::Config;
use oncall::tools::{default_registry, ToolSpec};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

/// On-call assistant: answers production questions in Slack threads by
/// looking at logs, metrics and alert history.
#[derive(Parser, Debug)]
#[command(name = "oncall")]
#[command(version)]
#[command(about = "Slack on-call assistant backed by a hosted reasoning model.", long_about = None)]
struct Cli {
    /// Directory holding config.toml (overrides ONCALL_CONFIG_DIR)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to Slack and answer mentions until Ctrl+C
    Listen,

    /// Run a single turn from the terminal and print the answer
    #[command(long_about = "\
Run a single turn from the terminal and print the answer.

The prompt goes through the same dispatch loop as Slack mentions, so tool
calls hit the real lookup backends. Reuse --thread to continue a conversation
within the same process; by default every invocation starts a new one.

Examples:
  oncall ask \"what's the kafka lag for group billing?\"
  oncall ask --thread incident-42 \"<@U0BOT> any errors in checkout-api?\"")]
    Ask {
        /// Conversation key
        #[arg(long)]
        thread: Option<String>,

        /// Question (a leading `<@BOT>` mention is stripped)
        prompt: String,
    },

    /// Print the capability specs exposed to the assistant as JSON
    Tools,

    /// Manage the hosted assistant
    Assistant {
        #[command(subcommand)]
        assistant_command: AssistantCommands,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum AssistantCommands {
    /// Replace the assistant's tool list with the built-ins plus our capabilities
    Sync,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Both ring and aws-lc-rs may be compiled in through the TLS stack; pick one.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    if let Some(dir) = &cli.config_dir {
        if dir.as_os_str().is_empty() {
            bail!("--config-dir cannot be empty");
        }
    }

    // Schema output must stay clean JSON; no config load, no logging.
    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = &cli.command
    {
        let schema = schemars::schema_for!(Config);
        println!(
            "{}",
            serde_json::to_string_pretty(&schema).context("failed to serialize JSON Schema")?
        );
        return Ok(());
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = Config::load(cli.config_dir.as_deref()).await?;
    tracing::debug!(path = %config.config_path.display(), "Configuration loaded");

    match cli.command {
        Commands::Listen => start_channels(config).await,
        Commands::Ask { thread, prompt } => ask(config, thread, prompt).await,
        Commands::Tools => {
            let specs: Vec<serde_json::Value> = default_registry(&config)
                .specs()
                .iter()
                .map(ToolSpec::to_function_tool)
                .collect();
            println!("{}", serde_json::to_string_pretty(&specs)?);
            Ok(())
        }
        Commands::Assistant {
            assistant_command: AssistantCommands::Sync,
        } => {
            config.validate_for_backend()?;
            let backend = create_backend(&config)?;
            let registry = default_registry(&config);
            let assistant_id = config
                .assistant
                .assistant_id
                .as_deref()
                .context("assistant.assistant_id (ONCALL_ASSISTANT_ID) is not set")?;
            sync_assistant_tools(
                backend.as_ref(),
                assistant_id,
                &registry,
                &enabled_builtins(&config),
            )
            .await?;
            println!("Synced {} tools to {assistant_id}", registry.len());
            Ok(())
        }
        Commands::Config { .. } => Ok(()),
    }
}

async fn ask(config: Config, thread: Option<String>, prompt: String) -> Result<()> {
    config.validate_for_backend()?;

    // Accept raw Slack text as well as a bare question.
    let prompt = if prompt.trim_start().starts_with("<@") {
        mention_prompt(&prompt)?
    } else {
        prompt.trim().to_string()
    };
    if prompt.is_empty() {
        bail!("prompt cannot be empty");
    }

    let backend = create_backend(&config)?;
    let registry = Arc::new(default_registry(&config));
    let dispatcher = build_dispatcher(&config, backend, registry)?;

    let thread_key =
        thread.unwrap_or_else(|| format!("cli-{}", chrono::Utc::now().timestamp_millis()));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let answer = dispatcher.run_turn(&thread_key, &prompt, &cancel).await?;
    println!("{answer}");
    Ok(())
}
