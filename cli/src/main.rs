//! `push` — a line-oriented REPL driving [`push_engine::AgentLoop`].
//!
//! Reads one line at a time from stdin. A line starting with `/` is a
//! command (see `/help`); anything else is submitted as a user turn. There
//! is no raw-mode terminal handling here — the completer and input buffer
//! in `push-engine` exist for an embedder that wants single-key editing,
//! but this binary is deliberately the dumbest possible host for the loop.

mod assets;
mod crash_hardening;

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use push_config::ResolvedConfig;
use push_context::{BudgetTable, ContextMode, TokenCounter, trim_messages};
use push_core::SessionStore;
use push_engine::approval::{ApprovalFut, ApprovalHook};
use push_engine::{AgentLoop, DEFAULT_MAX_ROUNDS};
use push_providers::{ApiConfig, CancelToken, OutputLimits};
use push_tools::sandbox::Sandbox;
use push_tools::shell::detect_shell;
use push_tools::{
    ApprovalDecision, ApprovalMode, CommandDenylist, ConfirmationRequest, EnvSanitizer, Policy, ReadFileLimits, ToolLimits,
    ToolRegistry, ToolSettings, ToolTimeouts, builtins, web_search,
};
use push_types::{EventKind, EventSeq, ModelName, NonEmptyString, Provider, RunOutcomeKind, SessionState, ENV_SECRET_DENYLIST};

const EXIT_OK: i32 = 0;
const EXIT_PROVIDER_UNREACHABLE: i32 = 3;
const EXIT_APPROVAL_DENIED_POLICY: i32 = 4;
const EXIT_INTERRUPTED: i32 = 130;

fn init_tracing(resolved: &ResolvedConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let (log_file, init_warnings) = open_push_log_file(resolved);

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // If we can't open a log file, prefer "no logs" over interleaving
    // tracing output with REPL output on stdout.
    tracing_subscriber::registry().with(env_filter).init();
    for warning in init_warnings {
        eprintln!("{warning}");
    }
}

fn open_push_log_file(resolved: &ResolvedConfig) -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in push_log_file_candidates(resolved) {
        if let Some(parent) = candidate.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warnings.push(format!("failed to create log dir {}: {e}", parent.display()));
                continue;
            }
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => warnings.push(format!("failed to open log file {}: {e}", candidate.display())),
        }
    }

    (None, warnings)
}

fn push_log_file_candidates(resolved: &ResolvedConfig) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(config_dir) = resolved.config_path.parent() {
        candidates.push(config_dir.join("logs").join("push.log"));
    }

    candidates.push(PathBuf::from(".push").join("logs").join("push.log"));
    candidates
}

/// Maps the resolved `exec_mode` string onto the engine's approval policy
/// mode. Unrecognized values fall back to `Default`, same as an unset one.
fn approval_mode_for(exec_mode: &str) -> ApprovalMode {
    match exec_mode {
        "auto" => ApprovalMode::Permissive,
        "strict" => ApprovalMode::Strict,
        _ => ApprovalMode::Default,
    }
}

fn tool_settings_from(resolved: &ResolvedConfig, cwd: &std::path::Path) -> Result<ToolSettings> {
    let sandbox = Sandbox::new(vec![cwd.to_path_buf()], Vec::new(), !resolved.local_sandbox)
        .context("failed to build the filesystem sandbox from the resolved config")?;
    let env_sanitizer = EnvSanitizer::new(&ENV_SECRET_DENYLIST.iter().map(|s| s.to_string()).collect::<Vec<_>>())
        .context("failed to compile the environment variable denylist")?;

    Ok(ToolSettings {
        limits: ToolLimits {
            max_tool_calls_per_batch: 16,
            max_tool_iterations_per_user_turn: 32,
            max_tool_args_bytes: 1_000_000,
            max_batch_wall_time: std::time::Duration::from_secs(180),
        },
        read_limits: ReadFileLimits { max_file_read_bytes: 2_000_000, max_scan_bytes: 2_000_000 },
        search: push_tools::SearchToolConfig::default(),
        shell: detect_shell(None),
        timeouts: ToolTimeouts::default(),
        max_output_bytes: 200_000,
        policy: Policy { mode: approval_mode_for(&resolved.exec_mode), allowlist: Default::default(), denylist: Default::default() },
        sandbox,
        env_sanitizer,
        command_denylist: CommandDenylist::default(),
    })
}

/// Prints a [`ConfirmationRequest`] and blocks on a `y`/`n` line from stdin.
struct StdinApprovalHook;

impl ApprovalHook for StdinApprovalHook {
    fn request(&self, request: ConfirmationRequest) -> ApprovalFut<'_> {
        Box::pin(async move {
            let decision = tokio::task::spawn_blocking(move || {
                println!("\n[approval] {} wants to run `{}`: {}", "push", request.tool_name, request.summary);
                if let Some(reason) = &request.reason {
                    println!("  reason: {reason}");
                }
                for warning in &request.warnings {
                    println!("  warning: {warning:?}");
                }
                print!("  allow? [y/N] ");
                let _ = io::stdout().flush();

                let mut line = String::new();
                if io::stdin().lock().read_line(&mut line).is_err() {
                    return ApprovalDecision::DenyAll;
                }
                match line.trim().to_ascii_lowercase().as_str() {
                    "y" | "yes" => ApprovalDecision::ApproveAll,
                    _ => ApprovalDecision::DenyAll,
                }
            })
            .await
            .unwrap_or(ApprovalDecision::DenyAll);
            decision
        })
    }
}

fn new_session_state(store: &SessionStore, provider: Provider, model: ModelName, cwd: &std::path::Path) -> Result<SessionState> {
    let session_id = store.make_session_id().context("failed to mint a session id")?;
    let now = std::time::SystemTime::now();
    let state = SessionState {
        session_id,
        created_at: now,
        updated_at: now,
        provider,
        model,
        cwd: cwd.display().to_string(),
        rounds: 0,
        event_seq: EventSeq::new(0),
        messages: Vec::new(),
        title: None,
    };
    store.create(&state).context("failed to create the session's on-disk layout")?;
    Ok(state)
}

fn print_help() {
    println!(
        "Commands:\n\
         \x20 /help                          print this list\n\
         \x20 /new                           start a new session\n\
         \x20 /session rename <title>        rename the current session\n\
         \x20 /session rename --clear        clear the current session's title\n\
         \x20 /model <id>                    set the active model\n\
         \x20 /provider <id>                 switch provider (claude|openai|gemini)\n\
         \x20 /skills [reload]                list or reload skills\n\
         \x20 /compact                       force a context digest\n\
         \x20 /config                        show resolved config, secrets masked\n\
         \x20 /exit, /quit                   exit\n"
    );
}

fn build_api_config(resolved: &ResolvedConfig, state: &SessionState) -> Result<ApiConfig> {
    let settings = resolved.provider_settings(state.provider);
    let Some(api_key) = settings.api_key.clone() else {
        anyhow::bail!("no API key configured for provider {} (set {})", state.provider, state.provider.env_var());
    };
    Ok(ApiConfig::new(state.provider, api_key, state.model.clone())?.with_base_url(settings.url.clone()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let resolved = push_config::resolve();
    init_tracing(&resolved);

    if let Err(err) = crash_hardening::apply() {
        tracing::warn!(%err, "crash dump hardening not applied");
    }

    let cwd = std::env::current_dir().context("failed to read the current working directory")?;

    let mut registry = ToolRegistry::default();
    let settings = tool_settings_from(&resolved, &cwd)?;
    builtins::register_all(&mut registry, &settings).context("failed to register built-in tools")?;
    web_search::register(&mut registry, web_search::WebSearchConfig { tavily_api_key: resolved.tavily_api_key.as_ref().map(|k| k.expose().to_string()) })
        .context("failed to register web_search")?;

    let store = SessionStore::new(resolved.session_dir.clone());
    let mut skills = push_engine::load_skills(&PathBuf::from(".push/skills"), &cwd.join(".push/skills")).unwrap_or_default();

    let mut state = new_session_state(&store, resolved.provider, resolved.active_provider_settings().model.clone(), &cwd)?;
    store.append_session_event(&mut state, EventKind::SessionStarted { provider: state.provider, model: state.model.clone() }, None)?;

    let loop_core = AgentLoop {
        registry: std::sync::Arc::new(registry),
        settings: std::sync::Arc::new(settings),
        store: std::sync::Arc::new(store),
        budgets: std::sync::Arc::new(BudgetTable::new()),
        context_mode: ContextMode::Graceful,
        approval: std::sync::Arc::new(StdinApprovalHook),
        max_rounds: DEFAULT_MAX_ROUNDS,
    };

    println!("push — session {}. Type /help for commands.", state.session_id.as_str());

    let stdin = io::stdin();
    let mut exit_code = EXIT_OK;

    'repl: loop {
        print!("> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        let bytes_read = stdin.lock().read_line(&mut line).context("failed to read from stdin")?;
        if bytes_read == 0 {
            break 'repl;
        }
        let line = line.trim_end_matches(['\n', '\r']);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(command) = trimmed.strip_prefix('/') {
            let (name, args) = command.split_once(' ').unwrap_or((command, ""));
            let args = args.trim();

            match name {
                "help" => print_help(),
                "exit" | "quit" => break 'repl,
                "new" => {
                    state = new_session_state(&loop_core.store, state.provider, state.model.clone(), &cwd)?;
                    println!("started session {}", state.session_id.as_str());
                }
                "session" => {
                    if let Some(title) = args.strip_prefix("rename ") {
                        if title.trim() == "--clear" {
                            state.title = None;
                        } else {
                            state.title = Some(title.trim().to_string());
                        }
                        loop_core.store.save_session_state(&state)?;
                        println!("ok");
                    } else {
                        println!("usage: /session rename <title> | /session rename --clear");
                    }
                }
                "model" => {
                    if args.is_empty() {
                        println!("usage: /model <id>");
                    } else {
                        state.model = ModelName::new(state.provider, args.to_string());
                        println!("model set to {}", state.model);
                    }
                }
                "provider" => {
                    match Provider::parse(args) {
                        Some(provider) => {
                            state.provider = provider;
                            state.model = resolved.provider_settings(provider).model.clone();
                            println!("provider set to {provider}, model {}", state.model);
                        }
                        None => println!("unknown provider '{args}'"),
                    }
                }
                "skills" => {
                    if args == "reload" {
                        skills = push_engine::load_skills(&PathBuf::from(".push/skills"), &cwd.join(".push/skills")).unwrap_or_default();
                        println!("reloaded {} skill(s)", skills.len());
                    } else {
                        for skill in skills.values() {
                            println!("/{:<16} {}", skill.name, skill.description);
                        }
                    }
                }
                "compact" => {
                    let budget = loop_core.budgets.lookup(&state.model);
                    match trim_messages(&state.messages, push_context::Budget::new(0, budget.max_tokens), TokenCounter::new(), ContextMode::Graceful) {
                        Ok(result) => {
                            state.messages = result.messages;
                            loop_core.store.save_session_state(&state)?;
                            println!("context compacted to {} message(s)", state.messages.len());
                        }
                        Err(exceeded) => println!("could not compact: {} tokens exceeds {}", exceeded.used, exceeded.budget),
                    }
                }
                "config" => println!("{resolved}"),
                _ => {
                    if let Some(skill) = skills.get(name) {
                        let rendered = skill.render(args);
                        if let Err(code) = run_turn(&loop_core, &resolved, &mut state, rendered).await {
                            exit_code = code;
                            break 'repl;
                        }
                    } else {
                        println!("unknown command '/{name}', try /help");
                    }
                }
            }
            continue;
        }

        if let Err(code) = run_turn(&loop_core, &resolved, &mut state, trimmed.to_string()).await {
            exit_code = code;
            break 'repl;
        }
    }

    std::process::exit(exit_code);
}

/// Runs one user turn to completion, printing assistant text as it streams
/// in. Returns `Err(exit_code)` when the turn's outcome should end the
/// process rather than return to the prompt.
async fn run_turn(loop_core: &AgentLoop, resolved: &ResolvedConfig, state: &mut SessionState, input: String) -> std::result::Result<(), i32> {
    let Ok(user_input) = NonEmptyString::new(input) else {
        return Ok(());
    };

    let api_config = match build_api_config(resolved, state) {
        Ok(config) => config,
        Err(err) => {
            println!("{err}");
            return Ok(());
        }
    };

    let system_prompt = assets::system_prompt(&loop_core.registry);
    let (ui_tx, mut ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = CancelToken::new();

    let drain_cancel = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        drain_cancel.cancel();
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            render_ui_event(event);
        }
    });

    let outcome = loop_core
        .run_turn(state, &api_config, OutputLimits::new(4096), Some(&system_prompt), user_input, cancel, ui_tx)
        .await;

    ctrl_c.abort();
    let _ = printer.await;

    match outcome {
        Ok(RunOutcomeKind::Cancelled) => {
            println!("\n[cancelled]");
            Err(EXIT_INTERRUPTED)
        }
        Ok(RunOutcomeKind::ApprovalDenied) => Err(EXIT_APPROVAL_DENIED_POLICY),
        Ok(RunOutcomeKind::ProviderError) => {
            println!("\n[provider unreachable]");
            Err(EXIT_PROVIDER_UNREACHABLE)
        }
        Ok(_) => Ok(()),
        Err(err) => {
            println!("[error] {err}");
            Ok(())
        }
    }
}

fn render_ui_event(event: push_engine::UiEvent) {
    use push_engine::UiEvent;
    match event {
        UiEvent::TextDelta(delta) => {
            print!("{delta}");
            let _ = io::stdout().flush();
        }
        UiEvent::ThinkingDelta(_) => {}
        UiEvent::AssistantDone { .. } => println!(),
        UiEvent::ToolCallRequested { tool_name, summary, .. } => println!("\n[tool] {tool_name}: {summary}"),
        UiEvent::ToolOutputChunk { .. } => {}
        UiEvent::ToolCallFinished { ok, .. } => println!("[tool] {}", if ok { "done" } else { "failed" }),
        UiEvent::ToolCallDenied { tool_name, reason, .. } => println!("[tool] {tool_name} denied: {reason}"),
        UiEvent::TaskStateUpdated(_) => {}
        UiEvent::ChangeSummary(summary) => println!("\n[changes] {summary}"),
        UiEvent::MalformedToolCall { reason } => println!("\n[malformed tool call] {reason}"),
        UiEvent::StreamError(message) => println!("\n[stream error] {message}"),
        UiEvent::RunComplete(outcome) => tracing::debug!(?outcome, "run complete"),
    }
}
