//! Chat-side plumbing: receive mentions, hand each one to the dispatcher on
//! its own worker, and post the acknowledgement and answer back in-thread.

pub mod slack;
pub mod traits;

pub use slack::SlackChannel;
pub use traits::{Channel, ChannelMessage, SendMessage};

use crate::agent::{build_dispatcher, DispatchError, TurnDispatcher};
use crate::assistant::{create_backend, enabled_builtins, sync_assistant_tools};
use crate::config::Config;
use crate::tools::default_registry;
use crate::util::{single_line, truncate_with_ellipsis};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_CHANNEL_INITIAL_BACKOFF_SECS: u64 = 2;
const DEFAULT_CHANNEL_MAX_BACKOFF_SECS: u64 = 60;
const INBOUND_QUEUE_CAPACITY: usize = 100;
const PROMPT_LOG_CHARS: usize = 120;

const MALFORMED_MENTION_REPLY: &str =
    ":warning: Mention me followed by a question, e.g. `@oncall what's the kafka lag for group X?`";
const TIMEOUT_REPLY: &str = ":warning: That took too long to look into. Please try again.";
const FAILURE_REPLY: &str = ":warning: Sorry, something went wrong while looking into that.";

/// Text after the bot mention markup (`<@U123> question` → `question`).
pub fn mention_prompt(text: &str) -> Result<String, DispatchError> {
    let prompt = text
        .split_once('>')
        .map(|(_, rest)| rest.trim())
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| DispatchError::MalformedMention(text.to_string()))?;
    Ok(prompt.to_string())
}

/// Reply posted in the thread when a turn fails. `None` means stay quiet.
fn failure_reply(err: &DispatchError) -> Option<&'static str> {
    match err {
        DispatchError::Cancelled => None,
        DispatchError::MalformedMention(_) => Some(MALFORMED_MENTION_REPLY),
        DispatchError::Timeout(_) => Some(TIMEOUT_REPLY),
        _ => Some(FAILURE_REPLY),
    }
}

/// Everything a worker needs to handle one mention.
pub struct MentionContext {
    pub channel: Arc<dyn Channel>,
    pub dispatcher: Arc<TurnDispatcher>,
    pub ack_text: String,
    pub reply_prefix: String,
    /// Cancelled on shutdown; each turn runs on a child token.
    pub shutdown: CancellationToken,
}

async fn post_reply(ctx: &MentionContext, msg: &ChannelMessage, text: String, what: &str) {
    let reply = SendMessage::new(text, &msg.reply_target).in_thread(msg.thread_key());
    if let Err(e) = ctx.channel.send(&reply).await {
        tracing::warn!(
            channel = ctx.channel.name(),
            thread_key = msg.thread_key(),
            "Failed to post {what}: {e:#}"
        );
    }
}

/// Handle one mention end to end. Never fails: errors are logged and, where
/// useful, reported back in the thread.
pub async fn process_mention(ctx: Arc<MentionContext>, msg: ChannelMessage) {
    let thread_key = msg.thread_key().to_string();

    let prompt = match mention_prompt(&msg.content) {
        Ok(prompt) => prompt,
        Err(err) => {
            tracing::info!(thread_key = %thread_key, sender = %msg.sender, "{err}");
            if let Some(reply) = failure_reply(&err) {
                post_reply(&ctx, &msg, reply.to_string(), "usage hint").await;
            }
            return;
        }
    };

    tracing::info!(
        thread_key = %thread_key,
        sender = %msg.sender,
        prompt = %truncate_with_ellipsis(&single_line(&prompt), PROMPT_LOG_CHARS),
        "Mention received"
    );
    post_reply(&ctx, &msg, ctx.ack_text.clone(), "acknowledgement").await;

    let cancel = ctx.shutdown.child_token();
    match ctx.dispatcher.run_turn(&thread_key, &prompt, &cancel).await {
        Ok(answer) => {
            post_reply(&ctx, &msg, format!("{}{answer}", ctx.reply_prefix), "answer").await;
        }
        Err(err) => {
            tracing::error!(thread_key = %thread_key, "Turn failed: {err}");
            if let Some(reply) = failure_reply(&err) {
                post_reply(&ctx, &msg, reply.to_string(), "failure notice").await;
            }
        }
    }
}

/// Keep `ch.listen` running, restarting it with exponential backoff until
/// the receiving side goes away.
fn spawn_supervised_listener(
    ch: Arc<dyn Channel>,
    tx: tokio::sync::mpsc::Sender<ChannelMessage>,
    initial_backoff_secs: u64,
    max_backoff_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = initial_backoff_secs.max(1);
        let max_backoff = max_backoff_secs.max(backoff);

        loop {
            let result = ch.listen(tx.clone()).await;

            if tx.is_closed() {
                break;
            }

            match result {
                Ok(()) => {
                    tracing::warn!("Channel {} session ended; reconnecting", ch.name());
                    // Clean exit, e.g. a server-requested refresh
                    backoff = initial_backoff_secs.max(1);
                }
                Err(e) => {
                    tracing::error!("Channel {} error: {e:#}; restarting", ch.name());
                }
            }

            tokio::time::sleep(Duration::from_secs(backoff)).await;
            // Double backoff AFTER sleeping so first error uses initial_backoff
            backoff = backoff.saturating_mul(2).min(max_backoff);
        }
    })
}

fn log_worker_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        tracing::error!("Mention worker crashed: {error}");
    }
}

/// Run each inbound mention on its own task, at most `max_in_flight` at once.
/// Returns after the inbound queue closes and every worker has finished.
pub async fn run_message_dispatch_loop(
    mut rx: tokio::sync::mpsc::Receiver<ChannelMessage>,
    ctx: Arc<MentionContext>,
    max_in_flight: usize,
) {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_in_flight.max(1)));
    let mut workers = tokio::task::JoinSet::new();

    while let Some(msg) = rx.recv().await {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let worker_ctx = Arc::clone(&ctx);
        workers.spawn(async move {
            let _permit = permit;
            process_mention(worker_ctx, msg).await;
        });

        while let Some(result) = workers.try_join_next() {
            log_worker_join_result(result);
        }
    }

    while let Some(result) = workers.join_next().await {
        log_worker_join_result(result);
    }
}

/// Start the Slack listener and serve mentions until Ctrl+C.
pub async fn start_channels(config: Config) -> Result<()> {
    config.validate_for_listen()?;

    let backend = create_backend(&config)?;
    let registry = Arc::new(default_registry(&config));
    let dispatcher = Arc::new(build_dispatcher(
        &config,
        Arc::clone(&backend),
        Arc::clone(&registry),
    )?);

    if config.assistant.sync_tools_on_start {
        if let Some(ref assistant_id) = config.assistant.assistant_id {
            if let Err(e) = sync_assistant_tools(
                backend.as_ref(),
                assistant_id,
                &registry,
                &enabled_builtins(&config),
            )
            .await
            {
                tracing::warn!("{e:#}; continuing with the assistant's current tools");
            }
        }
    }

    let channel: Arc<dyn Channel> = Arc::new(SlackChannel::from_config(&config.slack)?);
    if !channel.health_check().await {
        tracing::warn!("Slack auth.test failed; the bot token may be invalid");
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<ChannelMessage>(INBOUND_QUEUE_CAPACITY);
    let listener = spawn_supervised_listener(
        Arc::clone(&channel),
        tx,
        DEFAULT_CHANNEL_INITIAL_BACKOFF_SECS,
        DEFAULT_CHANNEL_MAX_BACKOFF_SECS,
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        let listener = listener.abort_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested; cancelling in-flight turns");
            }
            shutdown.cancel();
            // Aborting the listener drops the sender, which closes the queue.
            listener.abort();
        });
    }

    let max_in_flight = config.dispatch.max_in_flight_turns;
    tracing::info!(
        channel = channel.name(),
        tools = registry.len(),
        max_in_flight,
        "Listening for mentions (Ctrl+C to stop)"
    );

    let ctx = Arc::new(MentionContext {
        channel,
        dispatcher,
        ack_text: config.slack.ack_text.clone(),
        reply_prefix: config.slack.reply_prefix.clone(),
        shutdown,
    });
    run_message_dispatch_loop(rx, ctx, max_in_flight).await;

    tracing::info!("Listener stopped");
    Ok(())
}
