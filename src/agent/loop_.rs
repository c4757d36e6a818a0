use super::error::DispatchError;
use super::executor::ToolExecutor;
use super::thread_store::{ConversationThread, ThreadStore};
use crate::assistant::{AssistantBackend, Run, RunStatus, ToolInvocation, ToolOutput};
use crate::config::DispatchConfig;
use crate::util::truncate_with_ellipsis;
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Time allowed for the best-effort cancel of an abandoned run.
const ABANDON_RUN_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum characters of a tool result echoed into debug logs.
const TOOL_RESULT_LOG_CHARS: usize = 300;
const SKIPPED_TOOL_CALL_OUTPUT: &str =
    "not executed: only one tool call is handled per step, request it again on its own";

/// Limits applied to every turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnLimits {
    pub poll_interval: Duration,
    pub turn_timeout: Duration,
    pub max_tool_rounds: usize,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for TurnLimits {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            turn_timeout: config.turn_timeout(),
            max_tool_rounds: config.max_tool_rounds.max(1),
        }
    }
}

/// Where a turn currently is. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnPhase {
    Submitted,
    Polling,
    ToolRequested,
    ToolExecuted,
    Completed,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::ToolRequested => "tool_requested",
            Self::ToolExecuted => "tool_executed",
            Self::Completed => "completed",
        })
    }
}

/// Deadline and cancellation shared by every await inside one turn.
struct TurnBudget<'a> {
    cancel: &'a CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl TurnBudget<'_> {
    async fn guard<T, F>(&self, fut: F) -> Result<T, DispatchError>
    where
        F: Future<Output = Result<T, DispatchError>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(DispatchError::Cancelled),
            () = tokio::time::sleep_until(self.deadline) => Err(DispatchError::Timeout(self.timeout)),
            result = fut => result,
        }
    }
}

/// Drives one user turn end to end: submit, poll, run requested tools,
/// resume, and read back the final answer.
pub struct TurnDispatcher {
    backend: Arc<dyn AssistantBackend>,
    store: Arc<ThreadStore>,
    executor: ToolExecutor,
    assistant_id: String,
    limits: TurnLimits,
}

impl TurnDispatcher {
    pub fn new(
        backend: Arc<dyn AssistantBackend>,
        store: Arc<ThreadStore>,
        executor: ToolExecutor,
        assistant_id: impl Into<String>,
        limits: TurnLimits,
    ) -> Self {
        Self {
            backend,
            store,
            executor,
            assistant_id: assistant_id.into(),
            limits,
        }
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// Run one turn for `prompt` on the conversation keyed by `thread_key`.
    ///
    /// Turns on the same key are serialized. The whole turn, including the
    /// wait for an earlier turn on the same key, shares one deadline.
    pub async fn run_turn(
        &self,
        thread_key: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, DispatchError> {
        let budget = TurnBudget {
            cancel,
            deadline: Instant::now() + self.limits.turn_timeout,
            timeout: self.limits.turn_timeout,
        };

        let thread = budget.guard(self.store.get_or_create(thread_key)).await?;
        let _turn = budget
            .guard(async { Ok::<_, DispatchError>(thread.lock_turn().await) })
            .await?;

        budget
            .guard(async {
                self.backend
                    .add_user_message(thread.handle(), prompt)
                    .await
                    .map_err(DispatchError::backend)
            })
            .await?;
        let run = budget
            .guard(async {
                self.backend
                    .create_run(thread.handle(), &self.assistant_id)
                    .await
                    .map_err(DispatchError::backend)
            })
            .await?;
        let run_id = run.id.clone();
        tracing::debug!(thread_key, run_id = %run_id, phase = %TurnPhase::Submitted, "Run created");

        match self.drive(&thread, run, &budget).await {
            Ok(answer) => {
                tracing::info!(thread_key, run_id = %run_id, phase = %TurnPhase::Completed, "Turn completed");
                Ok(answer)
            }
            Err(err) => {
                if err.leaves_run_active() {
                    self.abandon_run(&thread, &run_id).await;
                }
                tracing::warn!(thread_key, run_id = %run_id, "Turn failed: {err}");
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        thread: &ConversationThread,
        mut run: Run,
        budget: &TurnBudget<'_>,
    ) -> Result<String, DispatchError> {
        let mut rounds = 0usize;

        loop {
            run = self.wait_on_run(thread, run, budget).await?;

            match run.status {
                RunStatus::RequiresAction => {
                    rounds += 1;
                    if rounds > self.limits.max_tool_rounds {
                        return Err(DispatchError::ToolRoundsExceeded {
                            run_id: run.id.clone(),
                            limit: self.limits.max_tool_rounds,
                        });
                    }
                    let outputs = self.handle_required_action(thread, &run, budget).await?;
                    let resumed = budget
                        .guard(async {
                            self.backend
                                .submit_tool_outputs(thread.handle(), &run.id, &outputs)
                                .await
                                .map_err(DispatchError::backend)
                        })
                        .await?;
                    run = resumed;
                }
                RunStatus::Completed => {
                    let answer = budget
                        .guard(async {
                            self.backend
                                .latest_assistant_message(thread.handle(), &run.id)
                                .await
                                .map_err(DispatchError::backend)
                        })
                        .await?;
                    return answer.ok_or_else(|| DispatchError::StaleRun {
                        run_id: run.id.clone(),
                        status: run.status,
                        detail: "run completed without an assistant message".into(),
                    });
                }
                status => {
                    return Err(DispatchError::StaleRun {
                        run_id: run.id.clone(),
                        status,
                        detail: run
                            .error_message()
                            .unwrap_or("no error reported by the backend")
                            .to_string(),
                    });
                }
            }
        }
    }

    /// Poll until the run leaves the queued/in-progress states.
    async fn wait_on_run(
        &self,
        thread: &ConversationThread,
        mut run: Run,
        budget: &TurnBudget<'_>,
    ) -> Result<Run, DispatchError> {
        while run.status.is_pending() {
            tracing::trace!(run_id = %run.id, status = %run.status, phase = %TurnPhase::Polling, "Waiting on run");
            budget
                .guard(async {
                    tokio::time::sleep(self.limits.poll_interval).await;
                    Ok::<_, DispatchError>(())
                })
                .await?;
            let polled = budget
                .guard(async {
                    self.backend
                        .retrieve_run(thread.handle(), &run.id)
                        .await
                        .map_err(DispatchError::backend)
                })
                .await?;
            run = polled;
        }
        Ok(run)
    }

    /// Execute the first requested tool call. Any further calls in the same
    /// step get an explicit "not executed" output so the run can resume.
    async fn handle_required_action(
        &self,
        thread: &ConversationThread,
        run: &Run,
        budget: &TurnBudget<'_>,
    ) -> Result<Vec<ToolOutput>, DispatchError> {
        let calls = run.pending_tool_calls();
        let Some((first, rest)) = calls.split_first() else {
            return Err(DispatchError::StaleRun {
                run_id: run.id.clone(),
                status: run.status,
                detail: "requires_action without any tool call".into(),
            });
        };
        tracing::info!(
            thread_key = thread.key(),
            run_id = %run.id,
            tool = %first.name,
            phase = %TurnPhase::ToolRequested,
            "Backend requested a tool"
        );
        if !rest.is_empty() {
            tracing::warn!(
                run_id = %run.id,
                skipped = rest.len(),
                "Backend requested several tool calls; only the first is executed"
            );
        }

        let mut outputs = Vec::with_capacity(calls.len());
        outputs.push(ToolOutput {
            tool_call_id: first.call_id.clone(),
            output: self.execute_tool(first, budget).await?,
        });
        outputs.extend(rest.iter().map(|call| ToolOutput {
            tool_call_id: call.call_id.clone(),
            output: json!({ "error": SKIPPED_TOOL_CALL_OUTPUT }).to_string(),
        }));
        Ok(outputs)
    }

    /// Serialized tool output. Lookup and argument failures become an
    /// `{"error": ...}` payload; anything else ends the turn.
    async fn execute_tool(
        &self,
        call: &ToolInvocation,
        budget: &TurnBudget<'_>,
    ) -> Result<String, DispatchError> {
        let started = std::time::Instant::now();
        match budget.guard(self.executor.execute(call)).await {
            Ok(value) => {
                let output = value.to_string();
                tracing::debug!(
                    tool = %call.name,
                    elapsed_ms = started.elapsed().as_millis(),
                    phase = %TurnPhase::ToolExecuted,
                    result = %truncate_with_ellipsis(&output, TOOL_RESULT_LOG_CHARS),
                    "Tool finished"
                );
                Ok(output)
            }
            Err(err) if err.is_tool_recoverable() => {
                tracing::warn!(tool = %call.name, "Tool failed, reporting to backend: {err}");
                Ok(json!({ "error": err.to_string() }).to_string())
            }
            Err(err) => Err(err),
        }
    }

    /// Cancel `run_id` and wait for it to settle. Runs on the turn's lock so
    /// the next turn on the thread never meets a run still in `cancelling`.
    async fn abandon_run(&self, thread: &ConversationThread, run_id: &str) {
        let settle = async {
            self.backend.cancel_run(thread.handle(), run_id).await?;
            loop {
                let polled = self.backend.retrieve_run(thread.handle(), run_id).await?;
                if !polled.status.is_pending() {
                    return anyhow::Ok(polled.status);
                }
                tokio::time::sleep(self.limits.poll_interval).await;
            }
        };
        match tokio::time::timeout(ABANDON_RUN_TIMEOUT, settle).await {
            Ok(Ok(status)) => tracing::debug!(run_id, %status, "Abandoned run settled"),
            Ok(Err(e)) => tracing::warn!(run_id, "Failed to cancel abandoned run: {e:#}"),
            Err(_) => tracing::warn!(run_id, "Timed out waiting for abandoned run to settle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{
        BuiltinTool, FunctionCall, RequiredAction, RunToolCall, SubmitToolOutputs, ThreadHandle,
    };
    use crate::tools::{CapabilityRegistry, LookupError, Tool, ToolSpec};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn run(id: &str, status: RunStatus) -> Run {
        Run {
            id: id.into(),
            status,
            required_action: None,
            last_error: None,
        }
    }

    fn tool_request(id: &str, calls: &[(&str, &str, &str)]) -> Run {
        Run {
            id: id.into(),
            status: RunStatus::RequiresAction,
            required_action: Some(RequiredAction {
                submit_tool_outputs: Some(SubmitToolOutputs {
                    tool_calls: calls
                        .iter()
                        .map(|(call_id, name, arguments)| RunToolCall {
                            id: (*call_id).into(),
                            function: FunctionCall {
                                name: (*name).into(),
                                arguments: (*arguments).into(),
                            },
                        })
                        .collect(),
                }),
            }),
            last_error: None,
        }
    }

    /// Backend that replays scripted run states and records what it was sent.
    #[derive(Default)]
    struct ScriptedBackend {
        polls: Mutex<VecDeque<Run>>,
        after_submit: Mutex<VecDeque<Run>>,
        answer: Mutex<Option<String>>,
        messages: Mutex<Vec<String>>,
        submitted: Mutex<Vec<Vec<ToolOutput>>>,
        cancelled: Mutex<Vec<String>>,
        after_cancel: Mutex<VecDeque<Run>>,
        threads_created: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(polls: Vec<Run>, after_submit: Vec<Run>, answer: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                polls: Mutex::new(polls.into()),
                after_submit: Mutex::new(after_submit.into()),
                answer: Mutex::new(answer.map(String::from)),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl AssistantBackend for ScriptedBackend {
        async fn create_thread(&self) -> anyhow::Result<ThreadHandle> {
            let n = self.threads_created.fetch_add(1, Ordering::SeqCst);
            Ok(ThreadHandle::new(format!("thread_{n}")))
        }
        async fn add_user_message(&self, _: &ThreadHandle, content: &str) -> anyhow::Result<()> {
            self.messages.lock().push(content.to_string());
            Ok(())
        }
        async fn create_run(&self, _: &ThreadHandle, _: &str) -> anyhow::Result<Run> {
            Ok(run("run_1", RunStatus::Queued))
        }
        async fn retrieve_run(&self, _: &ThreadHandle, run_id: &str) -> anyhow::Result<Run> {
            if !self.cancelled.lock().is_empty() {
                return Ok(self
                    .after_cancel
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| run(run_id, RunStatus::Cancelled)));
            }
            Ok(self
                .polls
                .lock()
                .pop_front()
                .unwrap_or_else(|| run(run_id, RunStatus::InProgress)))
        }
        async fn submit_tool_outputs(
            &self,
            _: &ThreadHandle,
            run_id: &str,
            outputs: &[ToolOutput],
        ) -> anyhow::Result<Run> {
            self.submitted.lock().push(outputs.to_vec());
            Ok(self
                .after_submit
                .lock()
                .pop_front()
                .unwrap_or_else(|| run(run_id, RunStatus::Queued)))
        }
        async fn cancel_run(&self, _: &ThreadHandle, run_id: &str) -> anyhow::Result<()> {
            self.cancelled.lock().push(run_id.to_string());
            Ok(())
        }
        async fn latest_assistant_message(
            &self,
            _: &ThreadHandle,
            _: &str,
        ) -> anyhow::Result<Option<String>> {
            Ok(self.answer.lock().clone())
        }
        async fn update_assistant_tools(
            &self,
            _: &str,
            _: &[ToolSpec],
            _: &[BuiltinTool],
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct LagTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for LagTool {
        fn name(&self) -> &str {
            "query_consumer_lag"
        }
        fn description(&self) -> &str {
            "lag"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {"consumer_group": {"type": "string"}},
                "required": ["consumer_group"]
            })
        }
        async fn execute(
            &self,
            args: serde_json::Value,
        ) -> Result<serde_json::Value, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match args["consumer_group"].as_str() {
                Some("missing") => Err(LookupError::upstream("grafana", "datasource not found")),
                Some(group) => Ok(json!({"results": {"A": {"group": group, "lag": 42}}})),
                None => unreachable!(),
            }
        }
    }

    fn limits() -> TurnLimits {
        TurnLimits {
            poll_interval: Duration::from_millis(1),
            turn_timeout: Duration::from_secs(5),
            max_tool_rounds: 3,
        }
    }

    fn dispatcher(backend: Arc<ScriptedBackend>, limits: TurnLimits) -> (TurnDispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CapabilityRegistry::new().with(Arc::new(LagTool {
            calls: calls.clone(),
        }));
        let store = Arc::new(ThreadStore::new(backend.clone()));
        (
            TurnDispatcher::new(
                backend,
                store,
                ToolExecutor::new(Arc::new(registry)),
                "asst_test",
                limits,
            ),
            calls,
        )
    }

    #[tokio::test]
    async fn tool_request_is_executed_and_result_resubmitted() {
        let backend = ScriptedBackend::new(
            vec![
                run("run_1", RunStatus::InProgress),
                tool_request("run_1", &[("call_1", "query_consumer_lag", r#"{"consumer_group":"X"}"#)]),
                run("run_1", RunStatus::Completed),
            ],
            vec![run("run_1", RunStatus::InProgress)],
            Some("Group X is 42 messages behind."),
        );
        let (dispatcher, calls) = dispatcher(backend.clone(), limits());

        let answer = dispatcher
            .run_turn("1700.1", "what's the kafka lag for group X?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answer, "Group X is 42 messages behind.");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            backend.messages.lock().as_slice(),
            ["what's the kafka lag for group X?"]
        );
        let submitted = backend.submitted.lock();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0][0].tool_call_id, "call_1");
        let output: serde_json::Value = serde_json::from_str(&submitted[0][0].output).unwrap();
        assert_eq!(output["results"]["A"]["group"], "X");
        assert!(backend.cancelled.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_run_without_tools_is_a_stale_run() {
        let mut failed = run("run_1", RunStatus::Failed);
        failed.last_error = Some(crate::assistant::RunError {
            code: Some("server_error".into()),
            message: "Sorry, something went wrong.".into(),
        });
        let backend = ScriptedBackend::new(vec![failed], vec![], Some("old answer"));
        let (dispatcher, calls) = dispatcher(backend.clone(), limits());

        let err = dispatcher
            .run_turn("k", "status?", &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DispatchError::StaleRun { status, detail, .. } => {
                assert_eq!(status, RunStatus::Failed);
                assert!(detail.contains("something went wrong"));
            }
            other => panic!("expected StaleRun, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(backend.cancelled.lock().is_empty());
    }

    #[tokio::test]
    async fn completed_run_without_answer_is_a_stale_run() {
        let backend = ScriptedBackend::new(vec![run("run_1", RunStatus::Completed)], vec![], None);
        let (dispatcher, _) = dispatcher(backend, limits());
        let err = dispatcher
            .run_turn("k", "hi", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::StaleRun {
                status: RunStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn lookup_failure_is_fed_back_as_error_payload() {
        let backend = ScriptedBackend::new(
            vec![
                tool_request("run_1", &[("call_1", "query_consumer_lag", r#"{"consumer_group":"missing"}"#)]),
                run("run_1", RunStatus::Completed),
            ],
            vec![],
            Some("I could not read the lag metrics."),
        );
        let (dispatcher, _) = dispatcher(backend.clone(), limits());

        let answer = dispatcher
            .run_turn("k", "lag?", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, "I could not read the lag metrics.");

        let submitted = backend.submitted.lock();
        let output: serde_json::Value = serde_json::from_str(&submitted[0][0].output).unwrap();
        assert!(output["error"]
            .as_str()
            .unwrap()
            .contains("datasource not found"));
    }

    #[tokio::test]
    async fn unknown_tool_ends_turn_and_cancels_run() {
        let backend = ScriptedBackend::new(
            vec![tool_request("run_1", &[("call_1", "delete_topic", "{}")])],
            vec![],
            None,
        );
        let (dispatcher, calls) = dispatcher(backend.clone(), limits());

        let err = dispatcher
            .run_turn("k", "clean up", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownCapability(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(backend.submitted.lock().is_empty());
        assert_eq!(backend.cancelled.lock().as_slice(), ["run_1"]);
    }

    #[tokio::test]
    async fn only_first_of_several_tool_calls_is_executed() {
        let backend = ScriptedBackend::new(
            vec![
                tool_request(
                    "run_1",
                    &[
                        ("call_a", "query_consumer_lag", r#"{"consumer_group":"A"}"#),
                        ("call_b", "query_consumer_lag", r#"{"consumer_group":"B"}"#),
                    ],
                ),
                run("run_1", RunStatus::Completed),
            ],
            vec![],
            Some("A is lagging."),
        );
        let (dispatcher, calls) = dispatcher(backend.clone(), limits());

        dispatcher
            .run_turn("k", "lag for A and B", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let submitted = backend.submitted.lock();
        assert_eq!(submitted[0].len(), 2);
        assert_eq!(submitted[0][0].tool_call_id, "call_a");
        assert_eq!(submitted[0][1].tool_call_id, "call_b");
        assert!(submitted[0][1].output.contains("not executed"));
    }

    #[tokio::test]
    async fn stuck_run_times_out_and_is_cancelled() {
        // No scripted polls: the run stays in_progress forever.
        let backend = ScriptedBackend::new(vec![], vec![], None);
        let (dispatcher, _) = dispatcher(
            backend.clone(),
            TurnLimits {
                turn_timeout: Duration::from_millis(50),
                ..limits()
            },
        );

        let err = dispatcher
            .run_turn("k", "anything", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
        assert_eq!(backend.cancelled.lock().as_slice(), ["run_1"]);
    }

    #[tokio::test]
    async fn cancellation_token_stops_polling() {
        let backend = ScriptedBackend::new(vec![], vec![], None);
        let (dispatcher, _) = dispatcher(backend.clone(), limits());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = dispatcher.run_turn("k", "anything", &cancel).await.unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
        assert_eq!(backend.cancelled.lock().as_slice(), ["run_1"]);
    }

    #[tokio::test]
    async fn abandoned_run_is_polled_until_it_leaves_cancelling() {
        let backend = ScriptedBackend::new(vec![], vec![], None);
        backend.after_cancel.lock().extend([
            run("run_1", RunStatus::Cancelling),
            run("run_1", RunStatus::Cancelling),
            run("run_1", RunStatus::Cancelled),
        ]);
        let (dispatcher, _) = dispatcher(
            backend.clone(),
            TurnLimits {
                turn_timeout: Duration::from_millis(50),
                ..limits()
            },
        );

        let err = dispatcher
            .run_turn("k", "anything", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
        assert!(
            backend.after_cancel.lock().is_empty(),
            "turn returned before the cancelled run settled"
        );
    }

    #[tokio::test]
    async fn endless_tool_requests_hit_round_limit() {
        let request = || tool_request("run_1", &[("call", "query_consumer_lag", r#"{"consumer_group":"X"}"#)]);
        let backend = ScriptedBackend::new(
            vec![],
            vec![request(), request(), request(), request()],
            None,
        );
        // First state comes from create_run (queued), then one poll returns the request.
        backend.polls.lock().push_back(request());
        let (dispatcher, calls) = dispatcher(backend.clone(), limits());

        let err = dispatcher
            .run_turn("k", "loop", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ToolRoundsExceeded { limit: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn consecutive_turns_reuse_the_conversation() {
        let backend = ScriptedBackend::new(
            vec![
                run("run_1", RunStatus::Completed),
                run("run_1", RunStatus::Completed),
            ],
            vec![],
            Some("ok"),
        );
        let (dispatcher, _) = dispatcher(backend.clone(), limits());

        dispatcher
            .run_turn("thread-1", "first", &CancellationToken::new())
            .await
            .unwrap();
        dispatcher
            .run_turn("thread-1", "second", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(backend.threads_created.load(Ordering::SeqCst), 1);
        assert_eq!(backend.messages.lock().as_slice(), ["first", "second"]);
        assert_eq!(dispatcher.store().len(), 1);
    }

    #[test]
    fn limits_follow_dispatch_config() {
        let config = DispatchConfig {
            poll_interval_ms: 250,
            turn_timeout_secs: 30,
            max_tool_rounds: 0,
            max_in_flight_turns: 4,
        };
        let limits = TurnLimits::from(&config);
        assert_eq!(limits.poll_interval, Duration::from_millis(250));
        assert_eq!(limits.turn_timeout, Duration::from_secs(30));
        assert_eq!(limits.max_tool_rounds, 1);
    }
}
