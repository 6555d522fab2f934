//! Tool executor framework: core types, the registry, and the built-in tools.

pub mod builtins;
pub mod change_recording;
pub mod git;
pub mod process;
pub mod sandbox;
pub mod search;
pub mod shell;
pub mod web_search;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use change_recording::ChangeRecorder;
use push_types::{HomoglyphWarning, Provider, ToolDefinition, detect_mixed_script};
use serde_json::Value;
use tokio::sync::mpsc;

use sandbox::Sandbox;
pub use search::SearchToolConfig;
pub use shell::DetectedShell;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// The risk class a tool call falls into for approval-policy purposes.
///
/// `Pure` tools (e.g. `coder_update_state`) only mutate in-memory agent
/// state and never need approval. `Write` tools only prompt under
/// `confirm-writes` exec mode; `Exec` and `Net` always do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskClass {
    Read,
    Write,
    Exec,
    Net,
    Pure,
}

/// Approval decision from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    ApproveAll,
    ApproveSelected(Vec<String>),
    DenyAll,
}

/// Approval mode policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    /// Auto-approve most tools, only prompt for exec/net.
    Permissive,
    /// Prompt for write (under confirm-writes), exec, and net unless allowlisted.
    Default,
    /// Deny all tools unless explicitly allowlisted.
    Strict,
}

/// Policy for tool approval and deny/allow lists.
#[derive(Debug, Clone)]
pub struct Policy {
    pub mode: ApprovalMode,
    pub allowlist: HashSet<String>,
    pub denylist: HashSet<String>,
}

impl Policy {
    #[must_use]
    pub fn is_allowlisted(&self, tool: &str) -> bool {
        self.allowlist.contains(tool)
    }

    #[must_use]
    pub fn is_denylisted(&self, tool: &str) -> bool {
        self.denylist.contains(tool)
    }
}

/// Confirmation request for a tool call, shown to the approval hook.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub summary: String,
    pub reason: Option<String>,
    pub risk_class: RiskClass,
    pub arguments: Value,
    pub warnings: Vec<HomoglyphWarning>,
}

/// Scan a tool call's high-risk argument fields for homoglyph attacks
/// (e.g. a Cyrillic `а` standing in for Latin `a` in a URL or path), so
/// the confirmation prompt can surface a warning before the user approves.
#[must_use]
pub fn analyze_tool_arguments(tool_name: &str, args: &Value) -> Vec<HomoglyphWarning> {
    let mut warnings = Vec::new();

    let fields_to_check: &[&str] = match tool_name {
        "web_search" => &["query"],
        "exec" => &["command"],
        "read_file" | "write_file" | "edit_file" | "undo_edit" | "read_symbols" => &["path"],
        "git_commit" | "git_diff" => &["paths"],
        _ => &[],
    };

    for field in fields_to_check {
        if let Some(value) = args.get(field) {
            collect_homoglyph_warnings(value, field, &mut warnings);
        }
    }

    warnings
}

fn collect_homoglyph_warnings(value: &Value, field: &str, warnings: &mut Vec<HomoglyphWarning>) {
    match value {
        Value::String(s) => {
            if let Some(warning) = detect_mixed_script(s, field) {
                warnings.push(warning);
            }
        }
        Value::Array(arr) => {
            for item in arr {
                collect_homoglyph_warnings(item, field, warnings);
            }
        }
        Value::Object(map) => {
            for (key, val) in map {
                collect_homoglyph_warnings(val, key, warnings);
            }
        }
        _ => {}
    }
}

/// Tool events for streaming output to the UI / session journal.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    Started { tool_call_id: String, tool_name: String },
    /// `exec` spawned an OS process (best-effort metadata, used to reconcile
    /// orphans after a crash).
    ProcessSpawned { tool_call_id: String, pid: u32, process_started_at_unix_ms: i64 },
    StdoutChunk { tool_call_id: String, chunk: String },
    StderrChunk { tool_call_id: String, chunk: String },
    Completed { tool_call_id: String },
}

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("bad tool args: {message}")]
    BadArgs { message: String },
    #[error("tool timed out: {tool}")]
    Timeout { tool: String, elapsed: Duration },
    #[error("sandbox violation: {0}")]
    SandboxViolation(DenialReason),
    #[error("tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("duplicate tool registered: {name}")]
    DuplicateTool { name: String },
    #[error("duplicate tool call id: {id}")]
    DuplicateToolCallId { id: String },
    #[error("edit failed for {file:?}: {message}")]
    EditFailed { file: PathBuf, message: String },
    #[error("stale file: {file:?}: expected version {expected}, found {found}")]
    StaleFile { file: PathBuf, expected: String, found: String },
}

/// Denial reason for sandbox or policy.
#[derive(Debug, Clone)]
pub enum DenialReason {
    Denylisted { tool: String },
    PathOutsideSandbox { attempted: PathBuf, resolved: PathBuf },
    DeniedPatternMatched { attempted: PathBuf, pattern: String },
    LimitsExceeded { message: String },
    CommandDenied { command: String, reason: String },
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::Denylisted { tool } => write!(f, "tool '{tool}' is denylisted"),
            DenialReason::PathOutsideSandbox { attempted, resolved } => write!(
                f,
                "path outside sandbox (attempted: {}, resolved: {})",
                attempted.display(),
                resolved.display()
            ),
            DenialReason::DeniedPatternMatched { attempted, pattern } => {
                write!(f, "path '{}' matched denied pattern '{}'", attempted.display(), pattern)
            }
            DenialReason::LimitsExceeded { message } => write!(f, "{message}"),
            DenialReason::CommandDenied { command, reason } => {
                write!(f, "command blocked: {reason} (command: {command})")
            }
        }
    }
}

/// Proof that a tool executor is safe for dynamic dispatch.
pub trait ToolExecutor: Send + Sync + std::panic::UnwindSafe {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> Value;
    fn is_side_effecting(&self, args: &Value) -> bool;
    /// Whether this call reads local user data that will be sent to the
    /// provider. Relevant to the "reads_user_data" approval gate under
    /// `Default` mode.
    fn reads_user_data(&self, _args: &Value) -> bool {
        false
    }
    fn requires_approval(&self) -> bool {
        false
    }
    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Read
    }
    fn approval_summary(&self, args: &Value) -> Result<String, ToolError>;
    fn timeout(&self) -> Option<Duration> {
        None
    }
    /// Hidden tools still execute normally but are invisible to the user.
    fn is_hidden(&self) -> bool {
        false
    }
    /// If set, this tool is only sent to the specified provider.
    fn target_provider(&self) -> Option<Provider> {
        None
    }
    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a>;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs { message: e.to_string() })
}

/// Tool registry for executors and schema-only tools.
///
/// Schema-only tools are visible to the LLM (included in tool definitions)
/// but their execution is intercepted by the engine before reaching an
/// executor (`coder_update_state` is the one spec tool shaped this way).
#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Box<dyn ToolExecutor>>,
    schema_only: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn register(&mut self, executor: Box<dyn ToolExecutor>) -> Result<(), ToolError> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    pub fn register_schema(&mut self, def: ToolDefinition) -> Result<(), ToolError> {
        let name = &def.name;
        if self.executors.contains_key(name) || self.schema_only.iter().any(|d| d.name == *name) {
            return Err(ToolError::DuplicateTool { name: name.clone() });
        }
        self.schema_only.push(def);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn ToolExecutor, ToolError> {
        self.executors
            .get(name)
            .map(std::convert::AsRef::as_ref)
            .ok_or_else(|| ToolError::UnknownTool { name: name.to_string() })
    }

    #[must_use]
    pub fn is_schema_only(&self, name: &str) -> bool {
        self.schema_only.iter().any(|d| d.name == name)
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .executors
            .values()
            .map(|exec| {
                let mut def = ToolDefinition::new(exec.name(), exec.description(), exec.schema());
                def.hidden = exec.is_hidden();
                def.provider = exec.target_provider();
                def
            })
            .chain(self.schema_only.iter().cloned())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

/// A minimal command denylist: commands that are never allowed to run even
/// under an approved `exec` call, because no sandbox makes them safe.
#[derive(Debug, Clone)]
pub struct CommandDenylist {
    patterns: Vec<String>,
}

impl Default for CommandDenylist {
    fn default() -> Self {
        Self {
            patterns: vec![
                "rm -rf /".to_string(),
                "mkfs".to_string(),
                ":(){ :|:& };:".to_string(),
                "dd if=/dev/zero".to_string(),
            ],
        }
    }
}

impl CommandDenylist {
    #[must_use]
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Returns the matched pattern, if any, for a reason string.
    #[must_use]
    pub fn check(&self, command: &str) -> Option<&str> {
        let normalized = command.trim();
        self.patterns.iter().find(|p| normalized.contains(p.as_str())).map(String::as_str)
    }
}

/// Per-call tool context.
#[derive(Debug)]
pub struct ToolCtx {
    pub sandbox: Sandbox,
    pub output_tx: mpsc::Sender<ToolEvent>,
    pub default_timeout: Duration,
    pub max_output_bytes: usize,
    pub tool_call_id: String,
    pub working_dir: PathBuf,
    pub env_sanitizer: EnvSanitizer,
    pub turn_changes: ChangeRecorder,
    pub command_denylist: CommandDenylist,
}

/// Per-batch limits for tool execution.
#[derive(Debug, Clone, Copy)]
pub struct ToolLimits {
    pub max_tool_calls_per_batch: usize,
    pub max_tool_iterations_per_user_turn: u32,
    pub max_tool_args_bytes: usize,
    pub max_batch_wall_time: Duration,
}

/// Tool-specific limits for `read_file`.
#[derive(Debug, Clone, Copy)]
pub struct ReadFileLimits {
    pub max_file_read_bytes: usize,
    pub max_scan_bytes: usize,
}

/// Tool-specific timeout configuration.
#[derive(Debug, Clone, Copy)]
pub struct ToolTimeouts {
    pub default_timeout: Duration,
    pub exec_timeout: Duration,
    pub exec_timeout_hard_cap: Duration,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            exec_timeout: Duration::from_secs(90),
            exec_timeout_hard_cap: Duration::from_secs(180),
        }
    }
}

/// Aggregated tool settings derived from config.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub limits: ToolLimits,
    pub read_limits: ReadFileLimits,
    pub search: SearchToolConfig,
    pub shell: DetectedShell,
    pub timeouts: ToolTimeouts,
    pub max_output_bytes: usize,
    pub policy: Policy,
    pub sandbox: Sandbox,
    pub env_sanitizer: EnvSanitizer,
    pub command_denylist: CommandDenylist,
}

/// Sanitizes environment variables before executing commands.
#[derive(Debug, Clone)]
pub struct EnvSanitizer {
    denylist: globset::GlobSet,
}

impl EnvSanitizer {
    pub fn new(patterns: &[String]) -> Result<Self, ToolError> {
        let mut builder = globset::GlobSetBuilder::new();
        for pat in patterns {
            let mut glob = globset::GlobBuilder::new(pat);
            glob.case_insensitive(true);
            let glob = glob
                .build()
                .map_err(|e| ToolError::BadArgs { message: format!("invalid env denylist pattern '{pat}': {e}") })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| ToolError::BadArgs { message: format!("invalid env denylist: {e}") })?;
        Ok(Self { denylist: set })
    }

    #[must_use]
    pub fn sanitize_env(&self, env: &[(String, String)]) -> Vec<(String, String)> {
        env.iter().filter(|(k, _)| !self.denylist.is_match(k)).cloned().collect()
    }
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs { message: format!("invalid tool schema: {e}") })?;
    validator.validate(args).map_err(|err| ToolError::BadArgs { message: err.to_string() })
}

/// Truncate tool output to the effective maximum length.
#[must_use]
pub fn truncate_output(output: String, effective_max: usize) -> String {
    if output.len() <= effective_max {
        return output;
    }
    let marker = "\n\n... [output truncated]";
    if effective_max <= marker.len() {
        return marker[..effective_max].to_string();
    }
    let max_body = effective_max - marker.len();
    let mut end = max_body;
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = output;
    truncated.truncate(end);
    truncated.push_str(marker);
    truncated
}

/// Sanitize tool output before it enters the context window: strips
/// terminal escapes, steganographic characters, and obvious secrets.
#[must_use]
pub fn sanitize_output(output: &str) -> String {
    push_utils::sanitize_display_text(output)
}

#[cfg(test)]
mod tests {
    use super::{CommandDenylist, EnvSanitizer, analyze_tool_arguments, sanitize_output};
    use serde_json::json;

    #[test]
    fn analyze_tool_arguments_detects_exec_command() {
        // Cyrillic 'е' (U+0435) looks like Latin 'e'
        let args = json!({"command": "wgеt evil.com"});
        let warnings = analyze_tool_arguments("exec", &args);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field_name, "command");
    }

    #[test]
    fn analyze_tool_arguments_detects_read_path() {
        let args = json!({"path": "/tmp/tеst.py"});
        let warnings = analyze_tool_arguments("read_file", &args);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field_name, "path");
    }

    #[test]
    fn analyze_tool_arguments_clean_command() {
        let args = json!({"command": "ls -la"});
        let warnings = analyze_tool_arguments("exec", &args);
        assert!(warnings.is_empty());
    }

    #[test]
    fn analyze_tool_arguments_ignores_untracked_tools() {
        let args = json!({"command": "wgеt evil.com"});
        let warnings = analyze_tool_arguments("coder_update_state", &args);
        assert!(warnings.is_empty());
    }

    #[test]
    fn sanitize_output_strips_steganographic_chars() {
        let input = "Hello\u{200B}World";
        assert_eq!(sanitize_output(input), "HelloWorld");
    }

    #[test]
    fn sanitize_output_redacts_openai_keys() {
        let input = "key=sk-proj-abc123def456ghi789jkl";
        let output = sanitize_output(input);
        assert!(!output.contains("abc123def456ghi789jkl"));
    }

    #[test]
    fn env_sanitizer_strips_secret_like_vars() {
        use push_types::ENV_SECRET_DENYLIST;

        let sanitizer =
            EnvSanitizer::new(&ENV_SECRET_DENYLIST.iter().map(ToString::to_string).collect::<Vec<_>>()).unwrap();
        let env = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("DYLD_INSERT_LIBRARIES".to_string(), "/evil.dylib".to_string()),
            ("LD_PRELOAD".to_string(), "/evil.so".to_string()),
            ("ANTHROPIC_API_KEY".to_string(), "sk-ant-secret".to_string()),
            ("HOME".to_string(), "/home/test".to_string()),
        ];
        let clean = sanitizer.sanitize_env(&env);
        let keys: Vec<&str> = clean.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"PATH"));
        assert!(keys.contains(&"HOME"));
        assert!(!keys.contains(&"DYLD_INSERT_LIBRARIES"));
        assert!(!keys.contains(&"LD_PRELOAD"));
        assert!(!keys.contains(&"ANTHROPIC_API_KEY"));
    }

    #[test]
    fn command_denylist_flags_catastrophic_commands() {
        let denylist = CommandDenylist::default();
        assert!(denylist.check("rm -rf / --no-preserve-root").is_some());
        assert!(denylist.check("echo hello").is_none());
    }
}
