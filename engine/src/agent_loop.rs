//! The round loop: one user turn through however many tool rounds it
//! takes to finish, or `max_rounds` if the model never stops asking for
//! tools.
//!
//! Each round: trim the transcript for the outgoing request, stream the
//! model's reply forwarding deltas to the UI, parse any tool calls out of
//! it, run them (gated by the approval policy), append their results, and
//! persist. The transcript itself is only ever grown, never rewritten —
//! context trimming produces a throwaway view for the wire request, same
//! as the context manager's own contract.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use futures_util::future::{AbortHandle, Abortable};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};

use push_context::{BudgetTable, ContextMode, TokenCounter, trim_messages};
use push_core::SessionStore;
use push_providers::{ApiConfig, CancelToken, OutputLimits, StreamEvent};
use push_tools::{ToolCtx, ToolError, ToolEvent, ToolRegistry, ToolSettings};
use push_types::{
    EventKind, Message, MessageId, NonEmptyString, RunId, RunOutcomeKind, SessionState, StructuredToolError, ToolCall, ToolCallId,
    ToolResult,
};

use crate::approval::{self, ApprovalGate, ApprovalHook};
use crate::tool_call_parser::{ParseOutcome, parse_tool_calls};

/// Default round cap before the loop gives up and reports back to the user.
pub const DEFAULT_MAX_ROUNDS: u32 = 8;
/// How many identical calls (by canonical JSON) trip the loop-detector.
const TOOL_REPEAT_LIMIT: usize = 3;
/// How often the cancellation watcher re-checks the token while a tool runs.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Intercepted before dispatch; updates the loop's own task-state view
/// instead of running through the tool registry.
const TASK_STATE_TOOL: &str = "coder_update_state";

/// Everything the REPL needs to render one round as it happens.
#[derive(Debug, Clone)]
pub enum UiEvent {
    TextDelta(String),
    ThinkingDelta(String),
    AssistantDone { message_id: String, text: String },
    ToolCallRequested { tool_call_id: String, tool_name: String, summary: String },
    ToolOutputChunk { tool_call_id: String, chunk: String, is_stderr: bool },
    ToolCallFinished { tool_call_id: String, ok: bool },
    ToolCallDenied { tool_call_id: String, tool_name: String, reason: String },
    TaskStateUpdated(Value),
    ChangeSummary(String),
    MalformedToolCall { reason: &'static str },
    StreamError(String),
    RunComplete(RunOutcomeKind),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentLoopError {
    #[error(transparent)]
    Session(#[from] push_core::SessionStoreError),
}

/// Shared, mostly-immutable dependencies for running rounds. Cheap to
/// clone: everything behind it is already an `Arc` or `Copy`.
#[derive(Clone)]
pub struct AgentLoop {
    pub registry: Arc<ToolRegistry>,
    pub settings: Arc<ToolSettings>,
    pub store: Arc<SessionStore>,
    pub budgets: Arc<BudgetTable>,
    pub context_mode: ContextMode,
    pub approval: Arc<dyn ApprovalHook>,
    pub max_rounds: u32,
}

impl AgentLoop {
    /// Runs steps 1 through 8 for one submitted user message.
    pub async fn run_turn(
        &self,
        state: &mut SessionState,
        api_config: &ApiConfig,
        output_limits: OutputLimits,
        system_prompt: Option<&str>,
        user_input: NonEmptyString,
        cancel: CancelToken,
        ui: UnboundedSender<UiEvent>,
    ) -> Result<RunOutcomeKind, AgentLoopError> {
        let run_id = generate_run_id();
        let mut repeat_counts: HashMap<String, usize> = HashMap::new();
        let turn_context = push_tools::change_recording::TurnContext::new();

        // Step 1: append the user message, emit user_message.
        let now = SystemTime::now();
        state.messages.push(Message::user(user_input, now));
        let user_message_id = MessageId::new(format!("{run_id}_user"));
        self.store.append_session_event(state, EventKind::UserMessage { message_id: user_message_id }, Some(run_id.clone()))?;

        loop {
            if cancel.is_cancelled() {
                return self.finish(state, &run_id, RunOutcomeKind::Cancelled, &ui, turn_context);
            }

            // Step 2: context manager.
            let budget = self.budgets.lookup(api_config.model());
            let trimmed = match trim_messages(&state.messages, budget, TokenCounter::new(), self.context_mode) {
                Ok(result) => result,
                Err(exceeded) => {
                    let _ = ui.send(UiEvent::StreamError(format!("context budget exceeded: {} > {}", exceeded.used, exceeded.budget)));
                    return self.finish(state, &run_id, RunOutcomeKind::BudgetExceeded, &ui, turn_context);
                }
            };

            // Step 3: open the provider stream.
            let round = self.stream_round(api_config, &trimmed.messages, output_limits, system_prompt, cancel.clone(), &ui).await;

            let round = match round {
                StreamRoundOutcome::Cancelled { partial_text } => {
                    if !partial_text.is_empty() {
                        state.messages.push(Message::assistant(api_config.model().clone(), partial_text, SystemTime::now()));
                    }
                    return self.finish(state, &run_id, RunOutcomeKind::Cancelled, &ui, turn_context);
                }
                StreamRoundOutcome::Error(message) => {
                    let _ = ui.send(UiEvent::StreamError(message.clone()));
                    self.store.append_session_event(state, EventKind::Error { message }, Some(run_id.clone()))?;
                    return self.finish(state, &run_id, RunOutcomeKind::ProviderError, &ui, turn_context);
                }
                StreamRoundOutcome::Done { text, native_calls } => (text, native_calls),
            };
            let (assistant_text, native_calls) = round;

            // Step 4: assistant_done.
            let assistant_message_id = MessageId::new(format!("{run_id}_asst_{}", state.rounds));
            state.messages.push(assistant_message_with_calls(api_config.model().clone(), assistant_text.clone(), SystemTime::now(), native_calls.clone()));
            self.store.append_session_event(
                state,
                EventKind::AssistantDone { message_id: assistant_message_id.clone() },
                Some(run_id.clone()),
            )?;
            let _ = ui.send(UiEvent::AssistantDone { message_id: assistant_message_id.to_string(), text: assistant_text.clone() });

            // Step 5: parse.
            let outcome = parse_tool_calls(&assistant_text, native_calls, &run_id, self.registry.as_ref());

            let calls = match outcome {
                ParseOutcome::Calls(calls) if calls.is_empty() => {
                    return self.finish(state, &run_id, RunOutcomeKind::Success, &ui, turn_context);
                }
                ParseOutcome::Calls(calls) => calls,
                ParseOutcome::Malformed { reason, raw } => {
                    let _ = ui.send(UiEvent::MalformedToolCall { reason: reason.as_str() });
                    self.store.append_session_event(
                        state,
                        EventKind::MalformedToolCall { reason: reason.as_str().to_string(), raw },
                        Some(run_id.clone()),
                    )?;
                    return self.finish(state, &run_id, RunOutcomeKind::Success, &ui, turn_context);
                }
            };

            // Step 6: run each call in order.
            for call in calls {
                if cancel.is_cancelled() {
                    return self.finish(state, &run_id, RunOutcomeKind::Cancelled, &ui, turn_context);
                }

                let key = canonical_call_key(&call);
                let count = repeat_counts.entry(key).or_insert(0);
                *count += 1;
                if *count > TOOL_REPEAT_LIMIT {
                    return self.finish(state, &run_id, RunOutcomeKind::RepeatLoopDetected, &ui, turn_context);
                }

                if call.tool == TASK_STATE_TOOL {
                    let state_value = call.args.get("state").cloned().unwrap_or(Value::Null);
                    let _ = ui.send(UiEvent::TaskStateUpdated(state_value));
                    let result = ToolResult::success(call.id.clone(), call.tool.clone(), "state updated");
                    self.record_tool_result(state, &run_id, result, Duration::default())?;
                    continue;
                }

                let recorder = turn_context.recorder();
                self.run_one_call(state, &run_id, &call, &cancel, &ui, recorder).await?;
            }

            // Step 7: persist and loop back, incrementing rounds.
            state.rounds += 1;
            self.store.save_session_state(state)?;

            // Step 8: round cap.
            if state.rounds >= self.max_rounds {
                return self.finish(state, &run_id, RunOutcomeKind::RoundCapReached, &ui, turn_context);
            }
        }
    }

    fn finish(
        &self,
        state: &mut SessionState,
        run_id: &RunId,
        outcome: RunOutcomeKind,
        ui: &UnboundedSender<UiEvent>,
        turn_context: push_tools::change_recording::TurnContext,
    ) -> Result<RunOutcomeKind, AgentLoopError> {
        if let (push_tools::change_recording::TurnChangeReport::Changes(summary), _, _) =
            turn_context.finish(&self.settings.sandbox.working_dir())
        {
            let _ = ui.send(UiEvent::ChangeSummary(summary.into_message().into_inner()));
        }
        self.store.append_session_event(state, EventKind::RunComplete { outcome }, Some(run_id.clone()))?;
        let _ = ui.send(UiEvent::RunComplete(outcome));
        Ok(outcome)
    }

    async fn stream_round(
        &self,
        api_config: &ApiConfig,
        messages: &[Message],
        output_limits: OutputLimits,
        system_prompt: Option<&str>,
        cancel: CancelToken,
        ui: &UnboundedSender<UiEvent>,
    ) -> StreamRoundOutcome {
        let accumulated_text = Arc::new(Mutex::new(String::new()));
        let native_calls: Arc<Mutex<Option<Vec<ToolCall>>>> = Arc::new(Mutex::new(None));
        let stream_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let was_cancelled = Arc::new(Mutex::new(false));

        let on_event = {
            let accumulated_text = Arc::clone(&accumulated_text);
            let native_calls = Arc::clone(&native_calls);
            let stream_error = Arc::clone(&stream_error);
            let was_cancelled = Arc::clone(&was_cancelled);
            let ui = ui.clone();
            move |event: StreamEvent| match event {
                StreamEvent::TextDelta(delta) => {
                    if let Ok(mut text) = accumulated_text.lock() {
                        text.push_str(&delta);
                    }
                    let _ = ui.send(UiEvent::TextDelta(delta));
                }
                StreamEvent::ThinkingDelta(delta) => {
                    let _ = ui.send(UiEvent::ThinkingDelta(delta));
                }
                StreamEvent::ToolCallDelta { .. } => {}
                StreamEvent::Done(calls) => {
                    if let Ok(mut slot) = native_calls.lock() {
                        *slot = Some(calls);
                    }
                }
                StreamEvent::Error(message) => {
                    if let Ok(mut slot) = stream_error.lock() {
                        *slot = Some(message);
                    }
                }
                StreamEvent::Cancelled => {
                    if let Ok(mut flag) = was_cancelled.lock() {
                        *flag = true;
                    }
                }
            }
        };

        let result = push_providers::stream(api_config, messages, output_limits, system_prompt, cancel, on_event).await;

        let text = accumulated_text.lock().map(|t| t.clone()).unwrap_or_default();
        let cancelled = was_cancelled.lock().map(|f| *f).unwrap_or(false);

        if cancelled {
            return StreamRoundOutcome::Cancelled { partial_text: text };
        }
        if let Err(err) = result {
            return StreamRoundOutcome::Error(err.to_string());
        }
        if let Some(message) = stream_error.lock().ok().and_then(|s| s.clone()) {
            return StreamRoundOutcome::Error(message);
        }

        let native = native_calls.lock().ok().and_then(|mut slot| slot.take());
        StreamRoundOutcome::Done { text, native_calls: native }
    }

    async fn run_one_call(
        &self,
        state: &mut SessionState,
        run_id: &RunId,
        call: &ToolCall,
        cancel: &CancelToken,
        ui: &UnboundedSender<UiEvent>,
        recorder: push_tools::change_recording::ChangeRecorder,
    ) -> Result<(), AgentLoopError> {
        self.store.append_session_event(state, EventKind::ToolCall { tool_call: call.clone() }, Some(run_id.clone()))?;

        let Ok(executor) = self.registry.lookup(&call.tool) else {
            let result = ToolResult::failure(
                call.id.clone(),
                call.tool.clone(),
                format!("unknown tool: {}", call.tool),
                Some(StructuredToolError { kind: "unknown_tool".to_string(), detail: None }),
            );
            return self.record_tool_result(state, run_id, result, Duration::default());
        };

        let args_value = Value::Object(call.args.clone().into_iter().collect());

        let gate = approval::gate(&self.settings.policy, &call.tool, executor.risk_class(&args_value), executor.requires_approval());
        if gate == ApprovalGate::Denied {
            let _ = ui.send(UiEvent::ToolCallDenied { tool_call_id: call.id.to_string(), tool_name: call.tool.clone(), reason: "denylisted".to_string() });
            let result = ToolResult::failure(
                call.id.clone(),
                call.tool.clone(),
                "denied by policy".to_string(),
                Some(StructuredToolError { kind: "denied".to_string(), detail: None }),
            );
            return self.record_tool_result(state, run_id, result, Duration::default());
        }

        if gate == ApprovalGate::NeedsApproval {
            let summary = executor.approval_summary(&args_value).unwrap_or_else(|_| format!("run {}", call.tool));
            let warnings = push_tools::analyze_tool_arguments(&call.tool, &args_value);
            let request = push_tools::ConfirmationRequest {
                tool_call_id: call.id.to_string(),
                tool_name: call.tool.clone(),
                summary,
                reason: None,
                risk_class: executor.risk_class(&args_value),
                arguments: args_value.clone(),
                warnings,
            };
            let decision = self.approval.request(request).await;
            if !approval::decision_allows(&decision, call.id.as_str()) {
                let _ = ui.send(UiEvent::ToolCallDenied { tool_call_id: call.id.to_string(), tool_name: call.tool.clone(), reason: "denied by user".to_string() });
                let result = ToolResult::failure(
                    call.id.clone(),
                    call.tool.clone(),
                    "denied by user".to_string(),
                    Some(StructuredToolError { kind: "denied".to_string(), detail: None }),
                );
                return self.record_tool_result(state, run_id, result, Duration::default());
            }
        }

        let _ = ui.send(UiEvent::ToolCallRequested {
            tool_call_id: call.id.to_string(),
            tool_name: call.tool.clone(),
            summary: executor.approval_summary(&args_value).unwrap_or_default(),
        });

        let (event_tx, mut event_rx) = mpsc::channel::<ToolEvent>(64);
        let mut ctx = ToolCtx {
            sandbox: self.settings.sandbox.clone(),
            output_tx: event_tx,
            default_timeout: executor.timeout().unwrap_or(self.settings.timeouts.default_timeout),
            max_output_bytes: self.settings.max_output_bytes,
            tool_call_id: call.id.to_string(),
            working_dir: self.settings.sandbox.working_dir(),
            env_sanitizer: self.settings.env_sanitizer.clone(),
            turn_changes: recorder,
            command_denylist: self.settings.command_denylist.clone(),
        };

        let ui_for_drain = ui.clone();
        let drain_call_id = call.id.to_string();
        let drain_handle = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                forward_tool_event(&drain_call_id, event, &ui_for_drain);
            }
        });

        let started_at = Instant::now();
        let outcome = execute_cancellable(executor, args_value, &mut ctx, cancel).await;
        drop(ctx);
        let _ = drain_handle.await;
        let elapsed = started_at.elapsed();

        let result = match outcome {
            Ok(text) => ToolResult::success(call.id.clone(), call.tool.clone(), text),
            Err(err) => ToolResult::failure(call.id.clone(), call.tool.clone(), err.to_string(), Some(structured_error_for(&err))),
        };

        let _ = ui.send(UiEvent::ToolCallFinished { tool_call_id: call.id.to_string(), ok: result.ok });
        self.record_tool_result(state, run_id, result, elapsed)
    }

    fn record_tool_result(
        &self,
        state: &mut SessionState,
        run_id: &RunId,
        result: ToolResult,
        elapsed: Duration,
    ) -> Result<(), AgentLoopError> {
        let event_result = result.clone().with_meta(serde_json::json!({ "duration_ms": elapsed.as_millis() }));
        self.store.append_session_event(state, EventKind::ToolResult { result: event_result }, Some(run_id.clone()))?;

        let wire_text = render_tool_result_wire(&result);
        let wire_result = ToolResult { text: wire_text, ..result };
        state.messages.push(Message::tool_result(wire_result, SystemTime::now()));
        Ok(())
    }
}

enum StreamRoundOutcome {
    Done { text: String, native_calls: Option<Vec<ToolCall>> },
    Error(String),
    Cancelled { partial_text: String },
}

async fn execute_cancellable<'a>(
    executor: &'a dyn push_tools::ToolExecutor,
    args: Value,
    ctx: &'a mut ToolCtx,
    cancel: &CancelToken,
) -> Result<String, ToolError> {
    let (abort_handle, abort_registration) = AbortHandle::new_pair();
    let watcher_handle = abort_handle.clone();
    let watcher_cancel = cancel.clone();
    let watcher = tokio::spawn(async move {
        loop {
            if watcher_cancel.is_cancelled() {
                watcher_handle.abort();
                return;
            }
            tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
        }
    });

    let abortable = Abortable::new(executor.execute(args, ctx), abort_registration);
    let outcome = match abortable.await {
        Ok(inner) => inner,
        Err(_aborted) => Err(ToolError::ExecutionFailed { tool: executor.name().to_string(), message: "cancelled".to_string() }),
    };
    watcher.abort();
    outcome
}

fn forward_tool_event(tool_call_id: &str, event: ToolEvent, ui: &UnboundedSender<UiEvent>) {
    match event {
        ToolEvent::StdoutChunk { chunk, .. } => {
            let _ = ui.send(UiEvent::ToolOutputChunk { tool_call_id: tool_call_id.to_string(), chunk, is_stderr: false });
        }
        ToolEvent::StderrChunk { chunk, .. } => {
            let _ = ui.send(UiEvent::ToolOutputChunk { tool_call_id: tool_call_id.to_string(), chunk, is_stderr: true });
        }
        ToolEvent::Started { .. } | ToolEvent::ProcessSpawned { .. } | ToolEvent::Completed { .. } => {}
    }
}

fn structured_error_for(err: &ToolError) -> StructuredToolError {
    let kind = match err {
        ToolError::BadArgs { .. } => "bad_args",
        ToolError::Timeout { .. } => "timeout",
        ToolError::SandboxViolation(_) => "sandbox_violation",
        ToolError::ExecutionFailed { .. } => "execution_failed",
        ToolError::UnknownTool { .. } => "unknown_tool",
        ToolError::DuplicateTool { .. } | ToolError::DuplicateToolCallId { .. } => "duplicate",
        ToolError::EditFailed { .. } => "edit_failed",
        ToolError::StaleFile { .. } => "stale_file",
    };
    StructuredToolError { kind: kind.to_string(), detail: Some(err.to_string()) }
}

fn render_tool_result_wire(result: &ToolResult) -> String {
    let payload = serde_json::json!({
        "tool_call_id": result.tool_call_id.as_str(),
        "tool": result.tool,
        "ok": result.ok,
        "text": result.text,
        "error": result.structured_error,
    });
    format!("[TOOL_RESULT]\n{payload}\n[/TOOL_RESULT]")
}

fn canonical_call_key(call: &ToolCall) -> String {
    serde_json::to_string(&(&call.tool, &call.args)).unwrap_or_else(|_| call.tool.clone())
}

fn generate_run_id() -> RunId {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let epoch_secs = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs();
    let suffix = RandomState::new().build_hasher().finish();
    RunId::new(format!("run_{epoch_secs:x}_{suffix:x}"))
}

fn assistant_message_with_calls(model: push_types::ModelName, text: String, timestamp: SystemTime, native_calls: Option<Vec<ToolCall>>) -> Message {
    let assistant = push_types::AssistantMessage::new(model, text, timestamp);
    match native_calls {
        Some(calls) if !calls.is_empty() => Message::Assistant(assistant.with_tool_calls(calls)),
        _ => Message::Assistant(assistant),
    }
}
