//! End-to-end coverage of `AgentLoop::run_turn` against a mocked provider
//! endpoint. Each test drives one full user turn through the real session
//! store, tool registry, and approval gate, stubbing out only the network
//! boundary (the provider's SSE endpoint, via `wiremock`) and the tool
//! executor under test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use push_core::SessionStore;
use push_engine::agent_loop::{AgentLoop, DEFAULT_MAX_ROUNDS, UiEvent};
use push_engine::approval::{ApprovalFut, ApprovalHook};
use push_providers::{ApiConfig, CancelToken, OutputLimits};
use push_tools::sandbox::Sandbox;
use push_tools::shell::detect_shell;
use push_tools::{
    ApprovalDecision, ApprovalMode, CommandDenylist, ConfirmationRequest, EnvSanitizer, Policy, ReadFileLimits, ToolCtx, ToolError,
    ToolExecutor, ToolFut, ToolLimits, ToolRegistry, ToolSettings, ToolTimeouts,
};
use push_types::{ModelName, NonEmptyString, Provider, RunOutcomeKind, SecretString, SessionId, SessionState};
use serde_json::Value;

/// Always approves; the loop's own policy/denylist checks are exercised
/// separately, so most tests never need a prompt in the first place.
struct AlwaysApprove;
impl ApprovalHook for AlwaysApprove {
    fn request(&self, _request: ConfirmationRequest) -> ApprovalFut<'_> {
        Box::pin(async { ApprovalDecision::ApproveAll })
    }
}

/// A tool that always succeeds, echoing its `echo` argument back. Used to
/// drive the loop through a tool round without depending on any of the
/// real executors in `push-tools`.
struct EchoTool {
    calls: Arc<AtomicUsize>,
}

impl ToolExecutor for EchoTool {
    fn name(&self) -> &'static str {
        "echo"
    }
    fn description(&self) -> &'static str {
        "echoes its input"
    }
    fn schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }
    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }
    fn approval_summary(&self, _args: &Value) -> Result<String, ToolError> {
        Ok("echo".to_string())
    }
    fn execute<'a>(&'a self, args: Value, _ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = args.get("text").and_then(Value::as_str).unwrap_or("").to_string();
        Box::pin(async move { Ok(text) })
    }
}

fn test_session_state(model: ModelName) -> SessionState {
    let now = std::time::SystemTime::now();
    SessionState {
        session_id: SessionId::new("1", "aaaaaa").unwrap(),
        created_at: now,
        updated_at: now,
        provider: model.provider(),
        model,
        cwd: ".".to_string(),
        rounds: 0,
        event_seq: push_types::EventSeq::new(0),
        messages: Vec::new(),
        title: None,
    }
}

fn test_settings(working_dir: &std::path::Path) -> ToolSettings {
    let sandbox = Sandbox::new(vec![working_dir.to_path_buf()], Vec::new(), false).unwrap();
    ToolSettings {
        limits: ToolLimits {
            max_tool_calls_per_batch: 16,
            max_tool_iterations_per_user_turn: 32,
            max_tool_args_bytes: 1_000_000,
            max_batch_wall_time: Duration::from_secs(60),
        },
        read_limits: ReadFileLimits { max_file_read_bytes: 1_000_000, max_scan_bytes: 1_000_000 },
        search: push_tools::SearchToolConfig::default(),
        shell: detect_shell(None),
        timeouts: ToolTimeouts::default(),
        max_output_bytes: 1_000_000,
        policy: Policy { mode: ApprovalMode::Permissive, allowlist: Default::default(), denylist: Default::default() },
        sandbox,
        env_sanitizer: EnvSanitizer::new(&[]).unwrap(),
        command_denylist: CommandDenylist::default(),
    }
}

fn claude_model() -> ModelName {
    ModelName::new(Provider::Claude, "claude-haiku")
}

fn api_config(base_url: &str) -> ApiConfig {
    ApiConfig::new(Provider::Claude, SecretString::new("test-key"), claude_model())
        .unwrap()
        .with_base_url(format!("{base_url}/v1/messages"))
}

fn sse_body(events: &[&str]) -> String {
    events.iter().map(|e| format!("data: {e}\n\n")).collect::<Vec<_>>().join("")
}

fn text_response_body(text: &str) -> String {
    sse_body(&[
        &serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text"}}).to_string(),
        &serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}}).to_string(),
        "[DONE]",
    ])
}

fn tool_call_response_body(tool: &str, args_json: &str) -> String {
    sse_body(&[
        &serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "name": tool}}).to_string(),
        &serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": args_json}})
            .to_string(),
        "[DONE]",
    ])
}

/// Mounts one mock that serves `bodies` in order, one per request, holding
/// on the last body for any request beyond `bodies.len()`. Two separately
/// mounted mocks on the same method/path have no guaranteed precedence in
/// wiremock, so a multi-round test needs this instead of one `Mock` per
/// expected round.
async fn mock_sse_sequence(server: &wiremock::MockServer, bodies: Vec<String>) {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    let bodies = Arc::new(bodies);
    let next = Arc::new(AtomicUsize::new(0));
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(move |_req: &wiremock::Request| {
            let index = next.fetch_add(1, Ordering::SeqCst).min(bodies.len() - 1);
            ResponseTemplate::new(200).set_body_raw(bodies[index].clone(), "text/event-stream")
        })
        .mount(server)
        .await;
}

fn agent_loop(store: SessionStore, registry: ToolRegistry, settings: ToolSettings) -> AgentLoop {
    AgentLoop {
        registry: Arc::new(registry),
        settings: Arc::new(settings),
        store: Arc::new(store),
        budgets: Arc::new(push_context::BudgetTable::new()),
        context_mode: push_context::ContextMode::Graceful,
        approval: Arc::new(AlwaysApprove),
        max_rounds: DEFAULT_MAX_ROUNDS,
    }
}

#[tokio::test]
async fn no_tool_call_round_completes_successfully() {
    let server = wiremock::MockServer::start().await;
    mock_sse_sequence(&server, vec![text_response_body("all done, no tools needed")]).await;

    let workdir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(workdir.path().join("store"));
    let loop_ = agent_loop(store, ToolRegistry::default(), test_settings(workdir.path()));

    let mut state = test_session_state(claude_model());
    let (ui, mut ui_rx) = tokio::sync::mpsc::unbounded_channel();

    let outcome = loop_
        .run_turn(
            &mut state,
            &api_config(&server.uri()),
            OutputLimits::new(1024),
            None,
            NonEmptyString::new("hello").unwrap(),
            CancelToken::new(),
            ui,
        )
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcomeKind::Success);
    assert_eq!(state.rounds, 0);

    let mut saw_assistant_done = false;
    while let Ok(event) = ui_rx.try_recv() {
        if let UiEvent::AssistantDone { text, .. } = event {
            assert_eq!(text, "all done, no tools needed");
            saw_assistant_done = true;
        }
    }
    assert!(saw_assistant_done);
}

#[tokio::test]
async fn tool_call_round_executes_and_feeds_result_back() {
    let server = wiremock::MockServer::start().await;
    mock_sse_sequence(
        &server,
        vec![tool_call_response_body("echo", r#"{"text":"ping"}"#), text_response_body("got the echo, done")],
    )
    .await;

    let workdir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(workdir.path().join("store"));
    let mut registry = ToolRegistry::default();
    let calls = Arc::new(AtomicUsize::new(0));
    registry.register(Box::new(EchoTool { calls: Arc::clone(&calls) })).unwrap();
    let loop_ = agent_loop(store, registry, test_settings(workdir.path()));

    let mut state = test_session_state(claude_model());
    let (ui, _ui_rx) = tokio::sync::mpsc::unbounded_channel();

    let outcome = loop_
        .run_turn(
            &mut state,
            &api_config(&server.uri()),
            OutputLimits::new(1024),
            None,
            NonEmptyString::new("please echo ping").unwrap(),
            CancelToken::new(),
            ui,
        )
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcomeKind::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.rounds, 1);

    let wrapped = state
        .messages
        .iter()
        .find_map(|m| if let push_types::Message::ToolResult(t) = m { Some(t.content()) } else { None })
        .expect("tool result message present");
    assert!(wrapped.contains("[TOOL_RESULT]"));
    assert!(wrapped.contains("\"tool\":\"echo\""));
}

#[tokio::test]
async fn repeated_identical_tool_call_aborts_as_loop_detected() {
    let server = wiremock::MockServer::start().await;
    mock_sse_sequence(&server, vec![tool_call_response_body("echo", r#"{"text":"stuck"}"#); 3]).await;

    let workdir = tempfile::tempdir().unwrap();
    let store_path = workdir.path().join("store");
    let store = SessionStore::new(&store_path);
    let mut registry = ToolRegistry::default();
    let calls = Arc::new(AtomicUsize::new(0));
    registry.register(Box::new(EchoTool { calls: Arc::clone(&calls) })).unwrap();
    let loop_ = agent_loop(store, registry, test_settings(workdir.path()));

    let mut state = test_session_state(claude_model());
    let (ui, _ui_rx) = tokio::sync::mpsc::unbounded_channel();

    let outcome = loop_
        .run_turn(
            &mut state,
            &api_config(&server.uri()),
            OutputLimits::new(1024),
            None,
            NonEmptyString::new("loop please").unwrap(),
            CancelToken::new(),
            ui,
        )
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcomeKind::RepeatLoopDetected);

    // Scenario 6 pins down exactly 3 `tool_call`/`tool_result` events before
    // the 4th identical call is detected and aborted without executing.
    let events = SessionStore::new(&store_path).load_session_events(&state.session_id).unwrap();
    let tool_call_count = events.iter().filter(|e| matches!(e.kind, push_types::EventKind::ToolCall { .. })).count();
    let tool_result_count = events.iter().filter(|e| matches!(e.kind, push_types::EventKind::ToolResult { .. })).count();
    assert_eq!(tool_call_count, 3);
    assert_eq!(tool_result_count, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn coder_update_state_is_intercepted_without_touching_the_registry() {
    let server = wiremock::MockServer::start().await;
    mock_sse_sequence(
        &server,
        vec![
            tool_call_response_body("coder_update_state", r#"{"state":{"phase":"editing"}}"#),
            text_response_body("state recorded"),
        ],
    )
    .await;

    let workdir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(workdir.path().join("store"));
    let loop_ = agent_loop(store, ToolRegistry::default(), test_settings(workdir.path()));

    let mut state = test_session_state(claude_model());
    let (ui, mut ui_rx) = tokio::sync::mpsc::unbounded_channel();

    let outcome = loop_
        .run_turn(
            &mut state,
            &api_config(&server.uri()),
            OutputLimits::new(1024),
            None,
            NonEmptyString::new("update your task state").unwrap(),
            CancelToken::new(),
            ui,
        )
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcomeKind::Success);

    let mut saw_state_update = false;
    while let Ok(event) = ui_rx.try_recv() {
        if let UiEvent::TaskStateUpdated(value) = event {
            assert_eq!(value["phase"], "editing");
            saw_state_update = true;
        }
    }
    assert!(saw_state_update);
}

#[tokio::test]
async fn round_cap_is_reached_when_the_model_never_stops_asking_for_tools() {
    let server = wiremock::MockServer::start().await;
    let bodies: Vec<String> =
        (0..DEFAULT_MAX_ROUNDS).map(|i| tool_call_response_body("echo", &format!(r#"{{"text":"round-{i}"}}"#))).collect();
    mock_sse_sequence(&server, bodies).await;

    let workdir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(workdir.path().join("store"));
    let mut registry = ToolRegistry::default();
    let calls = Arc::new(AtomicUsize::new(0));
    registry.register(Box::new(EchoTool { calls: Arc::clone(&calls) })).unwrap();
    let loop_ = agent_loop(store, registry, test_settings(workdir.path()));

    let mut state = test_session_state(claude_model());
    let (ui, _ui_rx) = tokio::sync::mpsc::unbounded_channel();

    let outcome = loop_
        .run_turn(
            &mut state,
            &api_config(&server.uri()),
            OutputLimits::new(1024),
            None,
            NonEmptyString::new("keep going forever").unwrap(),
            CancelToken::new(),
            ui,
        )
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcomeKind::RoundCapReached);
    assert_eq!(state.rounds, DEFAULT_MAX_ROUNDS);
    // each round uses a distinct argument, so the repeat-loop detector never
    // fires before the round cap does.
    assert_eq!(calls.load(Ordering::SeqCst) as u32, DEFAULT_MAX_ROUNDS);
}

#[tokio::test]
async fn denied_tool_call_records_a_failure_result_without_executing() {
    let server = wiremock::MockServer::start().await;
    // The loop will keep asking for the same denied call, hit the repeat
    // limit, and abort — but the executor itself must never run.
    mock_sse_sequence(&server, vec![tool_call_response_body("echo", r#"{"text":"should not run"}"#); 3]).await;

    let workdir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(workdir.path().join("store"));
    let mut registry = ToolRegistry::default();
    let calls = Arc::new(AtomicUsize::new(0));
    registry.register(Box::new(EchoTool { calls: Arc::clone(&calls) })).unwrap();

    let mut settings = test_settings(workdir.path());
    settings.policy.denylist.insert("echo".to_string());
    let loop_ = agent_loop(store, registry, settings);

    let mut state = test_session_state(claude_model());
    let (ui, _ui_rx) = tokio::sync::mpsc::unbounded_channel();

    let outcome = loop_
        .run_turn(
            &mut state,
            &api_config(&server.uri()),
            OutputLimits::new(1024),
            None,
            NonEmptyString::new("run the denied tool").unwrap(),
            CancelToken::new(),
            ui,
        )
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcomeKind::RepeatLoopDetected);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let has_denied_result = state.messages.iter().any(|m| {
        matches!(m, push_types::Message::ToolResult(t) if t.content().contains("denied by policy"))
    });
    assert!(has_denied_result);
}

#[tokio::test]
async fn cancel_before_streaming_starts_ends_the_turn_as_cancelled() {
    let server = wiremock::MockServer::start().await;
    // No mock registered: if the loop made a request before observing the
    // cancellation, wiremock would return a 404 and this would surface as a
    // ProviderError instead of Cancelled.

    let workdir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(workdir.path().join("store"));
    let loop_ = agent_loop(store, ToolRegistry::default(), test_settings(workdir.path()));

    let mut state = test_session_state(claude_model());
    let (ui, _ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = loop_
        .run_turn(
            &mut state,
            &api_config(&server.uri()),
            OutputLimits::new(1024),
            None,
            NonEmptyString::new("hello").unwrap(),
            cancel,
            ui,
        )
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcomeKind::Cancelled);
}
