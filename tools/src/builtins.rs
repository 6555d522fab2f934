//! Built-in tool executors: filesystem (hashline-anchored read/write/edit),
//! symbol extraction, `exec`, memory, and diagnostics.

use std::path::{Path, PathBuf};
use std::time::Duration;

use push_core::{EditOp, LineRef, apply_edits, calculate_content_version, check_expected_version, render_anchored};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::time;

use crate::process::{ChildGuard, apply_sanitized_env};
use crate::{ReadFileLimits, RiskClass, ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args, sanitize_output, truncate_output};

fn backup_path(working_dir: &Path, target: &Path) -> PathBuf {
    let rel = target.strip_prefix(working_dir).unwrap_or(target);
    let encoded = rel.to_string_lossy().replace(['/', '\\'], "__");
    working_dir.join(".push").join("backups").join(encoded)
}

fn save_backup(working_dir: &Path, target: &Path, content: &str) -> std::io::Result<()> {
    let backup = backup_path(working_dir, target);
    if let Some(parent) = backup.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(backup, content)
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    #[serde(default)]
    start_line: Option<u32>,
    #[serde(default)]
    end_line: Option<u32>,
}

pub struct ReadFileTool {
    pub limits: ReadFileLimits,
}

impl ToolExecutor for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a file with hashline annotations, optionally scoped to a line range."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": { "type": "string" },
                "start_line": { "type": "integer", "minimum": 1 },
                "end_line": { "type": "integer", "minimum": 1 }
            },
            "required": ["path"]
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn reads_user_data(&self, _args: &Value) -> bool {
        true
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Read
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let args: ReadFileArgs = parse_args(args)?;
        Ok(format!("read {}", args.path))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: ReadFileArgs = parse_args(&args)?;
            let working_dir = ctx.working_dir.clone();
            let resolved = ctx.sandbox.resolve_path(&args.path, &working_dir)?;
            let meta = std::fs::metadata(&resolved)
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;
            if meta.len() as usize > self.limits.max_file_read_bytes {
                return Err(ToolError::BadArgs { message: format!("file exceeds {} byte read limit", self.limits.max_file_read_bytes) });
            }
            let content = std::fs::read_to_string(&resolved)
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;
            let view = render_anchored(&content, args.start_line, args.end_line);
            let version = calculate_content_version(&content);
            Ok(format!(
                "version: {version}\nlines {}-{} of {}\n{}",
                view.start_line, view.end_line, view.total_lines, view.text
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// list_dir
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListDirArgs {
    #[serde(default)]
    path: Option<String>,
}

pub struct ListDirTool;

impl ToolExecutor for ListDirTool {
    fn name(&self) -> &'static str {
        "list_dir"
    }

    fn description(&self) -> &'static str {
        "List the immediate entries of a directory."
    }

    fn schema(&self) -> Value {
        serde_json::json!({ "type": "object", "additionalProperties": false, "properties": { "path": { "type": "string" } } })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Read
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let args: ListDirArgs = parse_args(args)?;
        Ok(format!("list {}", args.path.as_deref().unwrap_or(".")))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: ListDirArgs = parse_args(&args)?;
            let working_dir = ctx.working_dir.clone();
            let dir = match &args.path {
                Some(p) => ctx.sandbox.resolve_path(p, &working_dir)?,
                None => ctx.sandbox.working_dir(),
            };
            let mut entries: Vec<String> = std::fs::read_dir(&dir)
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?
                .filter_map(Result::ok)
                .map(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    if e.path().is_dir() { format!("{name}/") } else { name }
                })
                .collect();
            entries.sort();
            Ok(entries.join("\n"))
        })
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

pub struct WriteFileTool;

impl ToolExecutor for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Create or overwrite a file. The previous contents, if any, are saved to a rolling undo backup."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": { "path": { "type": "string" }, "content": { "type": "string" } },
            "required": ["path", "content"]
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        true
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Write
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let args: WriteFileArgs = parse_args(args)?;
        Ok(format!("write {} ({} bytes)", args.path, args.content.len()))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: WriteFileArgs = parse_args(&args)?;
            let working_dir = ctx.working_dir.clone();
            let resolved = ctx.sandbox.resolve_path_for_create(&args.path, &working_dir)?;

            let existed = resolved.exists();
            if existed {
                let previous = std::fs::read_to_string(&resolved).unwrap_or_default();
                save_backup(&working_dir, &resolved, &previous)
                    .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;
            }
            if let Some(parent) = resolved.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;
            }
            std::fs::write(&resolved, &args.content)
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;

            if existed {
                ctx.turn_changes.record_modified(resolved.clone());
            } else {
                ctx.turn_changes.record_created(resolved.clone());
            }
            let version = calculate_content_version(&args.content);
            Ok(format!("wrote {} bytes, version {version}", args.content.len()))
        })
    }
}

// ---------------------------------------------------------------------------
// edit_file / undo_edit
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum EditSpec {
    ReplaceLine { line_ref: String, content: String },
    DeleteLine { line_ref: String },
    InsertBefore { line_ref: String, content: String },
    InsertAfter { line_ref: String, content: String },
}

fn parse_line_ref(raw: &str) -> Result<LineRef, ToolError> {
    LineRef::parse(raw).map_err(|e| ToolError::BadArgs { message: e.to_string() })
}

impl EditSpec {
    fn into_op(self) -> Result<EditOp, ToolError> {
        Ok(match self {
            EditSpec::ReplaceLine { line_ref, content } => EditOp::ReplaceLine { line_ref: parse_line_ref(&line_ref)?, content },
            EditSpec::DeleteLine { line_ref } => EditOp::DeleteLine { line_ref: parse_line_ref(&line_ref)? },
            EditSpec::InsertBefore { line_ref, content } => EditOp::InsertBefore { line_ref: parse_line_ref(&line_ref)?, content },
            EditSpec::InsertAfter { line_ref, content } => EditOp::InsertAfter { line_ref: parse_line_ref(&line_ref)?, content },
        })
    }
}

#[derive(Debug, Deserialize)]
struct EditFileArgs {
    path: String,
    edits: Vec<EditSpec>,
    #[serde(default)]
    expected_version: Option<String>,
}

pub struct EditFileTool;

impl ToolExecutor for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn description(&self) -> &'static str {
        "Apply one or more hashline-anchored edits (replace/delete/insert) to an existing file."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": { "type": "string" },
                "edits": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "op": { "type": "string", "enum": ["replace_line", "delete_line", "insert_before", "insert_after"] },
                            "line_ref": { "type": "string", "description": "A hashline ref, e.g. '42|abc1234' or 'abc1234'." },
                            "content": { "type": "string" }
                        },
                        "required": ["op", "line_ref"]
                    }
                },
                "expected_version": { "type": "string", "description": "Whole-file content version captured at read time; guards against a stale edit." }
            },
            "required": ["path", "edits"]
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        true
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Write
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let args: EditFileArgs = parse_args(args)?;
        Ok(format!("apply {} edit(s) to {}", args.edits.len(), args.path))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: EditFileArgs = parse_args(&args)?;
            let working_dir = ctx.working_dir.clone();
            let resolved = ctx.sandbox.resolve_path(&args.path, &working_dir)?;

            let original = std::fs::read_to_string(&resolved)
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;

            if check_expected_version(&original, args.expected_version.as_deref()).is_err() {
                return Err(ToolError::StaleFile {
                    file: resolved.clone(),
                    expected: args.expected_version.clone().unwrap_or_default(),
                    found: calculate_content_version(&original),
                });
            }

            let ops: Vec<EditOp> = args.edits.into_iter().map(EditSpec::into_op).collect::<Result<_, _>>()?;
            let outcome = apply_edits(&original, &ops)
                .map_err(|e| ToolError::EditFailed { file: resolved.clone(), message: e.to_string() })?;

            save_backup(&working_dir, &resolved, &original)
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;
            std::fs::write(&resolved, &outcome.content)
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;

            ctx.turn_changes.record_modified(resolved.clone());
            let new_version = calculate_content_version(&outcome.content);
            let applied: Vec<String> = outcome.applied.iter().map(|a| format!("{} -> line {}", a.op, a.resulting_line)).collect();
            Ok(format!("applied {} edit(s), new version {new_version}\n{}", applied.len(), applied.join("\n")))
        })
    }
}

#[derive(Debug, Deserialize)]
struct UndoEditArgs {
    path: String,
}

pub struct UndoEditTool;

impl ToolExecutor for UndoEditTool {
    fn name(&self) -> &'static str {
        "undo_edit"
    }

    fn description(&self) -> &'static str {
        "Restore a file from its most recent undo backup, taken by the last write_file or edit_file call."
    }

    fn schema(&self) -> Value {
        serde_json::json!({ "type": "object", "additionalProperties": false, "properties": { "path": { "type": "string" } }, "required": ["path"] })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        true
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Write
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let args: UndoEditArgs = parse_args(args)?;
        Ok(format!("undo last edit to {}", args.path))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: UndoEditArgs = parse_args(&args)?;
            let working_dir = ctx.working_dir.clone();
            let resolved = ctx.sandbox.resolve_path(&args.path, &working_dir)?;
            let backup = backup_path(&working_dir, &resolved);
            if !backup.exists() {
                return Err(ToolError::BadArgs { message: format!("no undo backup for {}", args.path) });
            }
            let previous = std::fs::read_to_string(&backup)
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;
            std::fs::write(&resolved, &previous)
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;
            let _ = std::fs::remove_file(&backup);
            ctx.turn_changes.record_modified(resolved);
            Ok("restored from backup".to_string())
        })
    }
}

// ---------------------------------------------------------------------------
// read_symbols
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ReadSymbolsArgs {
    path: String,
}

#[derive(Debug, Serialize)]
struct Symbol {
    line: u32,
    kind: &'static str,
    name: String,
}

fn extract_symbols(path: &Path, content: &str) -> Vec<Symbol> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let patterns: &[(&str, &str)] = match ext {
        "rs" => &[("fn ", "function"), ("struct ", "struct"), ("enum ", "enum"), ("trait ", "trait"), ("impl ", "impl")],
        "py" => &[("def ", "function"), ("class ", "class")],
        "ts" | "tsx" | "js" | "jsx" => &[("function ", "function"), ("class ", "class"), ("const ", "const"), ("interface ", "interface")],
        "go" => &[("func ", "function"), ("type ", "type")],
        _ => &[],
    };

    let mut symbols = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        for (prefix, kind) in patterns {
            let candidate = trimmed.strip_prefix("pub ").unwrap_or(trimmed).strip_prefix("export ").unwrap_or(trimmed);
            if let Some(rest) = candidate.strip_prefix(prefix) {
                let name = rest.split(|c: char| !(c.is_alphanumeric() || c == '_')).next().unwrap_or("").to_string();
                if !name.is_empty() {
                    symbols.push(Symbol { line: (idx + 1) as u32, kind, name });
                }
                break;
            }
        }
    }
    symbols
}

pub struct ReadSymbolsTool;

impl ToolExecutor for ReadSymbolsTool {
    fn name(&self) -> &'static str {
        "read_symbols"
    }

    fn description(&self) -> &'static str {
        "Extract top-level declarations (functions, types, classes) from a source file by language-specific pattern matching."
    }

    fn schema(&self) -> Value {
        serde_json::json!({ "type": "object", "additionalProperties": false, "properties": { "path": { "type": "string" } }, "required": ["path"] })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn reads_user_data(&self, _args: &Value) -> bool {
        true
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Read
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let args: ReadSymbolsArgs = parse_args(args)?;
        Ok(format!("read symbols from {}", args.path))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: ReadSymbolsArgs = parse_args(&args)?;
            let working_dir = ctx.working_dir.clone();
            let resolved = ctx.sandbox.resolve_path(&args.path, &working_dir)?;
            let content = std::fs::read_to_string(&resolved)
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;
            let symbols = extract_symbols(&resolved, &content);
            serde_json::to_string(&symbols).map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })
        })
    }
}

// ---------------------------------------------------------------------------
// exec
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ExecArgs {
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

pub struct ExecTool {
    pub default_timeout: Duration,
    pub hard_cap: Duration,
}

impl Default for ExecTool {
    fn default() -> Self {
        Self { default_timeout: Duration::from_secs(90), hard_cap: Duration::from_secs(180) }
    }
}

impl ToolExecutor for ExecTool {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the workspace. Times out after 90s by default, 180s hard cap."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "command": { "type": "string", "minLength": 1 },
                "timeout_ms": { "type": "integer", "minimum": 1, "description": "Overrides the default 90s timeout, capped at 180s." }
            },
            "required": ["command"]
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        true
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Exec
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let args: ExecArgs = parse_args(args)?;
        Ok(args.command)
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.default_timeout)
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: ExecArgs = parse_args(&args)?;
            if let Some(pattern) = ctx.command_denylist.check(&args.command) {
                return Err(ToolError::SandboxViolation(crate::DenialReason::CommandDenied {
                    command: args.command.clone(),
                    reason: format!("matches denylisted pattern '{pattern}'"),
                }));
            }

            let requested = args.timeout_ms.map(Duration::from_millis).unwrap_or(self.default_timeout);
            let effective = requested.min(self.hard_cap);

            let shell = crate::shell::detect_shell(None);
            let mut cmd = tokio::process::Command::new(&shell.binary);
            cmd.args(&shell.args).arg(&args.command).current_dir(&ctx.working_dir);
            cmd.stdout(std::process::Stdio::piped()).stderr(std::process::Stdio::piped()).stdin(std::process::Stdio::null());
            apply_sanitized_env(&mut cmd, &ctx.env_sanitizer);
            #[cfg(unix)]
            crate::process::set_new_session(&mut cmd);

            let child = cmd
                .spawn()
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: format!("failed to spawn: {e}") })?;
            let mut guard = ChildGuard::new(child);
            if let Some(pid) = guard.child_mut().id() {
                let started = crate::process::process_started_at_unix_ms(pid).unwrap_or(0);
                let _ = ctx
                    .output_tx
                    .send(crate::ToolEvent::ProcessSpawned { tool_call_id: ctx.tool_call_id.clone(), pid, process_started_at_unix_ms: started })
                    .await;
            }

            let mut stdout = guard.child_mut().stdout.take().expect("stdout piped");
            let mut stderr = guard.child_mut().stderr.take().expect("stderr piped");
            let mut out_buf = String::new();
            let mut err_buf = String::new();

            let wait_result = time::timeout(effective, async {
                let _ = stdout.read_to_string(&mut out_buf).await;
                let _ = stderr.read_to_string(&mut err_buf).await;
                guard.child_mut().wait().await
            })
            .await;

            let status = match wait_result {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => return Err(ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() }),
                Err(_) => {
                    return Err(ToolError::Timeout { tool: self.name().to_string(), elapsed: effective });
                }
            };
            guard.disarm();

            let combined = if err_buf.is_empty() { out_buf } else { format!("{out_buf}\n--- stderr ---\n{err_buf}") };
            let sanitized = sanitize_output(&combined);
            let labeled = format!("exit code: {}\n{}", status.code().unwrap_or(-1), sanitized);
            Ok(truncate_output(labeled, ctx.max_output_bytes))
        })
    }
}

// ---------------------------------------------------------------------------
// save_memory
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SaveMemoryArgs {
    content: String,
}

pub struct SaveMemoryTool;

impl ToolExecutor for SaveMemoryTool {
    fn name(&self) -> &'static str {
        "save_memory"
    }

    fn description(&self) -> &'static str {
        "Append a note to .push/memory.md, the project's durable cross-session memory file."
    }

    fn schema(&self) -> Value {
        serde_json::json!({ "type": "object", "additionalProperties": false, "properties": { "content": { "type": "string" } }, "required": ["content"] })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        true
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Write
    }

    fn approval_summary(&self, _args: &Value) -> Result<String, ToolError> {
        Ok("save a note to project memory".to_string())
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: SaveMemoryArgs = parse_args(&args)?;
            let memory_path = ctx.working_dir.join(".push").join("memory.md");
            if let Some(parent) = memory_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;
            }
            let mut existing = std::fs::read_to_string(&memory_path).unwrap_or_default();
            if !existing.is_empty() && !existing.ends_with('\n') {
                existing.push('\n');
            }
            existing.push_str(args.content.trim_end());
            existing.push('\n');
            std::fs::write(&memory_path, &existing)
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })?;
            ctx.turn_changes.record_modified(memory_path);
            Ok("saved".to_string())
        })
    }
}

// ---------------------------------------------------------------------------
// run_diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub severity: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

struct ProjectToolset {
    marker: &'static str,
    binary: &'static str,
    args: &'static [&'static str],
}

const PROJECT_TOOLSETS: &[ProjectToolset] = &[
    ProjectToolset { marker: "Cargo.toml", binary: "cargo", args: &["check", "--message-format=short"] },
    ProjectToolset { marker: "tsconfig.json", binary: "npx", args: &["tsc", "--noEmit", "--pretty", "false"] },
    ProjectToolset { marker: "package.json", binary: "npx", args: &["eslint", ".", "--format", "unix"] },
    ProjectToolset { marker: "pyproject.toml", binary: "ruff", args: &["check", "--output-format", "concise", "."] },
    ProjectToolset { marker: "go.mod", binary: "go", args: &["vet", "./..."] },
];

/// Parse `file:line:col: message` style compiler/linter output (rustc
/// short format, eslint unix format, ruff concise format, `go vet`).
fn parse_line_oriented_diagnostics(output: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for line in output.lines() {
        let mut parts = line.splitn(4, ':');
        let (Some(file), Some(line_no), Some(col)) = (parts.next(), parts.next(), parts.next()) else { continue };
        let Ok(line_no) = line_no.trim().parse::<u32>() else { continue };
        let col = col.trim().parse::<u32>().unwrap_or(1);
        let message = parts.next().unwrap_or("").trim().to_string();
        if message.is_empty() {
            continue;
        }
        let severity = if message.to_ascii_lowercase().contains("warning") { "warning" } else { "error" }.to_string();
        diagnostics.push(Diagnostic { file: file.to_string(), line: line_no, col, severity, message, code: None });
    }
    diagnostics
}

pub struct RunDiagnosticsTool;

impl ToolExecutor for RunDiagnosticsTool {
    fn name(&self) -> &'static str {
        "run_diagnostics"
    }

    fn description(&self) -> &'static str {
        "Detect the project's toolchain from config-file presence (Cargo.toml, tsconfig.json, pyproject.toml, go.mod) and run its checker, parsed into structured diagnostics."
    }

    fn schema(&self) -> Value {
        serde_json::json!({ "type": "object", "additionalProperties": false, "properties": {} })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Exec
    }

    fn approval_summary(&self, _args: &Value) -> Result<String, ToolError> {
        Ok("run project diagnostics".to_string())
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(120))
    }

    fn execute<'a>(&'a self, _args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let toolset = PROJECT_TOOLSETS
                .iter()
                .find(|t| ctx.working_dir.join(t.marker).exists())
                .ok_or_else(|| ToolError::ExecutionFailed {
                    tool: self.name().to_string(),
                    message: "no recognized project marker (Cargo.toml, tsconfig.json, package.json, pyproject.toml, go.mod) found".to_string(),
                })?;

            let mut cmd = tokio::process::Command::new(toolset.binary);
            cmd.args(toolset.args).current_dir(&ctx.working_dir);
            cmd.stdout(std::process::Stdio::piped()).stderr(std::process::Stdio::piped()).stdin(std::process::Stdio::null());
            apply_sanitized_env(&mut cmd, &ctx.env_sanitizer);

            let mut child = cmd
                .spawn()
                .map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: format!("failed to spawn {}: {e}", toolset.binary) })?;

            let mut out_buf = String::new();
            let mut err_buf = String::new();
            if let Some(mut out) = child.stdout.take() {
                let _ = time::timeout(Duration::from_secs(110), out.read_to_string(&mut out_buf)).await;
            }
            if let Some(mut err) = child.stderr.take() {
                let _ = time::timeout(Duration::from_secs(5), err.read_to_string(&mut err_buf)).await;
            }
            let _ = child.wait().await;

            let combined = format!("{out_buf}\n{err_buf}");
            let diagnostics = parse_line_oriented_diagnostics(&combined);
            serde_json::to_string(&diagnostics).map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })
        })
    }
}

/// Register every built-in tool (minus `web_search`, registered separately
/// with its own backend config, and `coder_update_state`, which is
/// schema-only — the engine intercepts it before dispatch).
pub fn register_all(registry: &mut crate::ToolRegistry, settings: &crate::ToolSettings) -> Result<(), ToolError> {
    registry.register(Box::new(ReadFileTool { limits: settings.read_limits }))?;
    registry.register(Box::new(ListDirTool))?;
    registry.register(Box::new(WriteFileTool))?;
    registry.register(Box::new(EditFileTool))?;
    registry.register(Box::new(UndoEditTool))?;
    registry.register(Box::new(ReadSymbolsTool))?;
    registry.register(Box::new(ExecTool { default_timeout: settings.timeouts.exec_timeout, hard_cap: settings.timeouts.exec_timeout_hard_cap }))?;
    registry.register(Box::new(SaveMemoryTool))?;
    registry.register(Box::new(RunDiagnosticsTool))?;
    registry.register(Box::new(crate::search::SearchTool::new(settings.search.clone())))?;
    registry.register(Box::new(crate::git::GitStatusTool))?;
    registry.register(Box::new(crate::git::GitDiffTool))?;
    registry.register(Box::new(crate::git::GitCommitTool))?;

    registry.register_schema(push_types::ToolDefinition::new(
        "coder_update_state",
        "Update the agent's own in-memory task state (plan, current step). Intercepted by the engine before dispatch.",
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": { "state": { "type": "object" } },
            "required": ["state"]
        }),
    ))?;

    Ok(())
}
