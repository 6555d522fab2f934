//! `git_status`, `git_diff`, and `git_commit`: the three git tools named in
//! the tool registry, each a narrow wrapper around a `git` subprocess.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time;

use crate::process::{ChildGuard, apply_sanitized_env};
use crate::{RiskClass, ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args, sanitize_output};

const MAX_GIT_TIMEOUT_MS: u64 = 30_000;
const MAX_OUTPUT_BYTES: usize = 200_000;

struct GitExecResult {
    success: bool,
    stdout: String,
    stderr: String,
}

async fn run_git(ctx: &ToolCtx, working_dir: &Path, args: Vec<String>) -> Result<GitExecResult, ToolError> {
    let bare_name = if cfg!(windows) { "git.exe" } else { "git" };
    let git_bin = which::which(bare_name)
        .map_err(|_| ToolError::ExecutionFailed { tool: "git".to_string(), message: format!("{bare_name} not found in PATH") })?;

    let mut full_args: Vec<String> = vec!["--no-pager".into(), "-c".into(), "color.ui=false".into()];
    // Prevent execution of external diff/textconv drivers for diff-producing subcommands.
    if matches!(args.first().map(String::as_str), Some("diff")) {
        full_args.push("diff".into());
        full_args.extend(["--no-ext-diff".into(), "--no-textconv".into()]);
        full_args.extend(args[1..].iter().cloned());
    } else {
        full_args.extend(args);
    }

    let mut cmd = tokio::process::Command::new(&git_bin);
    cmd.args(&full_args).current_dir(working_dir).stdout(std::process::Stdio::piped()).stderr(std::process::Stdio::piped());
    apply_sanitized_env(&mut cmd, &ctx.env_sanitizer);

    let child = cmd.spawn().map_err(|e| ToolError::ExecutionFailed { tool: "git".to_string(), message: format!("failed to spawn git: {e}") })?;
    let mut guard = ChildGuard::new(child);

    let stdout =
        guard.child_mut().stdout.take().ok_or_else(|| ToolError::ExecutionFailed { tool: "git".to_string(), message: "failed to capture stdout".to_string() })?;
    let stderr =
        guard.child_mut().stderr.take().ok_or_else(|| ToolError::ExecutionFailed { tool: "git".to_string(), message: "failed to capture stderr".to_string() })?;

    let stdout_task = tokio::spawn(read_to_end_limited(stdout, MAX_OUTPUT_BYTES));
    let stderr_task = tokio::spawn(read_to_end_limited(stderr, MAX_OUTPUT_BYTES));

    let status = match time::timeout(Duration::from_millis(MAX_GIT_TIMEOUT_MS), guard.child_mut().wait()).await {
        Ok(res) => res.map_err(|e| ToolError::ExecutionFailed { tool: "git".to_string(), message: e.to_string() })?,
        Err(_) => {
            let _ = guard.child_mut().kill().await;
            return Err(ToolError::Timeout { tool: "git".to_string(), elapsed: Duration::from_millis(MAX_GIT_TIMEOUT_MS) });
        }
    };
    guard.disarm();

    let (stdout_bytes, _) = stdout_task.await.unwrap_or_default();
    let (stderr_bytes, _) = stderr_task.await.unwrap_or_default();

    Ok(GitExecResult {
        success: status.success(),
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
    })
}

async fn read_to_end_limited<R: tokio::io::AsyncRead + Unpin + Send + 'static>(mut reader: R, max_bytes: usize) -> (Vec<u8>, bool) {
    use tokio::io::AsyncReadExt;
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    loop {
        let n = match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            break;
        }
        let take = remaining.min(n);
        buf.extend_from_slice(&tmp[..take]);
        if take < n {
            break;
        }
    }
    (buf, false)
}

// ---------------------------------------------------------------------------
// git_status
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
pub struct GitStatusReport {
    pub branch: Option<String>,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub staged: u32,
    pub unstaged: u32,
    pub untracked: u32,
    pub clean: bool,
}

/// Parse `git status --porcelain=v2 --branch` into structured counts.
fn parse_porcelain_v2(output: &str) -> GitStatusReport {
    let mut report = GitStatusReport::default();
    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("# branch.head ") {
            if rest != "(detached)" {
                report.branch = Some(rest.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("# branch.upstream ") {
            report.upstream = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("# branch.ab ") {
            for token in rest.split_whitespace() {
                if let Some(n) = token.strip_prefix('+') {
                    report.ahead = n.parse().unwrap_or(0);
                } else if let Some(n) = token.strip_prefix('-') {
                    report.behind = n.parse().unwrap_or(0);
                }
            }
        } else if line.starts_with("1 ") || line.starts_with("2 ") {
            // "1 XY ..." / "2 XY ..." ordinary/rename change lines: XY are staged/unstaged status chars.
            if let Some(xy) = line.split_whitespace().nth(1) {
                let mut chars = xy.chars();
                let staged_char = chars.next().unwrap_or('.');
                let unstaged_char = chars.next().unwrap_or('.');
                if staged_char != '.' {
                    report.staged += 1;
                }
                if unstaged_char != '.' {
                    report.unstaged += 1;
                }
            }
        } else if line.starts_with("u ") {
            report.staged += 1;
            report.unstaged += 1;
        } else if line.starts_with("? ") {
            report.untracked += 1;
        }
    }
    report.clean = report.staged == 0 && report.unstaged == 0 && report.untracked == 0;
    report
}

#[derive(Debug, Deserialize)]
struct GitStatusArgs {}

pub struct GitStatusTool;

impl ToolExecutor for GitStatusTool {
    fn name(&self) -> &'static str {
        "git_status"
    }

    fn description(&self) -> &'static str {
        "Report the current branch, upstream tracking delta, and staged/unstaged/untracked file counts."
    }

    fn schema(&self) -> Value {
        serde_json::json!({ "type": "object", "additionalProperties": false, "properties": {} })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Read
    }

    fn approval_summary(&self, _args: &Value) -> Result<String, ToolError> {
        Ok("check git status".to_string())
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let _: GitStatusArgs = parse_args(&args)?;
            let working_dir = ctx.working_dir.clone();
            let result = run_git(ctx, &working_dir, vec!["status".into(), "--porcelain=v2".into(), "--branch".into()]).await?;
            if !result.success {
                return Err(ToolError::ExecutionFailed { tool: self.name().to_string(), message: sanitize_output(&result.stderr) });
            }
            let report = parse_porcelain_v2(&result.stdout);
            serde_json::to_string(&report).map_err(|e| ToolError::ExecutionFailed { tool: self.name().to_string(), message: e.to_string() })
        })
    }
}

// ---------------------------------------------------------------------------
// git_diff
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GitDiffArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    staged: bool,
}

pub struct GitDiffTool;

impl ToolExecutor for GitDiffTool {
    fn name(&self) -> &'static str {
        "git_diff"
    }

    fn description(&self) -> &'static str {
        "Show the unified diff for the working tree (or staged changes), optionally scoped to one path."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": { "type": "string", "description": "Limit the diff to this path." },
                "staged": { "type": "boolean", "default": false, "description": "Show staged (index) changes instead of the working tree." }
            }
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Read
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let args: GitDiffArgs = parse_args(args)?;
        Ok(format!("diff{}{}", if args.staged { " --staged" } else { "" }, args.path.map(|p| format!(" {p}")).unwrap_or_default()))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: GitDiffArgs = parse_args(&args)?;
            let working_dir = ctx.working_dir.clone();
            let mut git_args = vec!["diff".to_string()];
            if args.staged {
                git_args.push("--cached".into());
            }
            if let Some(path) = &args.path {
                let resolved = ctx.sandbox.resolve_path(path, &working_dir)?;
                git_args.push("--".into());
                git_args.push(resolved.to_string_lossy().into_owned());
            }
            let result = run_git(ctx, &working_dir, git_args).await?;
            if !result.success {
                return Err(ToolError::ExecutionFailed { tool: self.name().to_string(), message: sanitize_output(&result.stderr) });
            }
            let output = if result.stdout.is_empty() { "No changes.".to_string() } else { result.stdout };
            Ok(sanitize_output(&output))
        })
    }
}

// ---------------------------------------------------------------------------
// git_commit
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GitCommitArgs {
    message: String,
    #[serde(default)]
    paths: Option<Vec<String>>,
}

pub struct GitCommitTool;

impl ToolExecutor for GitCommitTool {
    fn name(&self) -> &'static str {
        "git_commit"
    }

    fn description(&self) -> &'static str {
        "Stage the given paths (or everything, if omitted) and create a commit."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "message": { "type": "string", "minLength": 1 },
                "paths": { "type": "array", "items": { "type": "string" }, "description": "Paths to stage. Omit to stage everything." }
            },
            "required": ["message"]
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        true
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Write
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let args: GitCommitArgs = parse_args(args)?;
        Ok(format!("git commit -m \"{}\"", args.message))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: GitCommitArgs = parse_args(&args)?;
            let working_dir = ctx.working_dir.clone();

            let mut add_args = vec!["add".to_string()];
            match &args.paths {
                Some(paths) if !paths.is_empty() => {
                    for path in paths {
                        let resolved = ctx.sandbox.resolve_path(path, &working_dir)?;
                        add_args.push(resolved.to_string_lossy().into_owned());
                    }
                }
                _ => add_args.push("-A".into()),
            }
            let add_result = run_git(ctx, &working_dir, add_args).await?;
            if !add_result.success {
                return Err(ToolError::ExecutionFailed { tool: self.name().to_string(), message: sanitize_output(&add_result.stderr) });
            }

            let commit_result = run_git(ctx, &working_dir, vec!["commit".into(), "-m".into(), args.message.clone()]).await?;
            if !commit_result.success {
                return Err(ToolError::ExecutionFailed { tool: self.name().to_string(), message: sanitize_output(&commit_result.stderr) });
            }
            for path in args.paths.iter().flatten() {
                ctx.turn_changes.record_modified(PathBuf::from(path));
            }
            Ok(sanitize_output(commit_result.stdout.trim()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_branch_with_upstream() {
        let output = "# branch.head main\n# branch.upstream origin/main\n# branch.ab +0 -0\n";
        let report = parse_porcelain_v2(output);
        assert_eq!(report.branch, Some("main".to_string()));
        assert_eq!(report.upstream, Some("origin/main".to_string()));
        assert!(report.clean);
    }

    #[test]
    fn counts_staged_unstaged_and_untracked() {
        let output = "# branch.head main\n1 M. N... 100644 100644 100644 abc abc src/a.rs\n1 .M N... 100644 100644 100644 abc abc src/b.rs\n? src/new.rs\n";
        let report = parse_porcelain_v2(output);
        assert_eq!(report.staged, 1);
        assert_eq!(report.unstaged, 1);
        assert_eq!(report.untracked, 1);
        assert!(!report.clean);
    }

    #[test]
    fn ahead_behind_parsed_from_branch_ab() {
        let output = "# branch.head feature\n# branch.ab +2 -3\n";
        let report = parse_porcelain_v2(output);
        assert_eq!(report.ahead, 2);
        assert_eq!(report.behind, 3);
    }

    #[test]
    fn git_status_is_not_side_effecting() {
        assert!(!GitStatusTool.is_side_effecting(&serde_json::json!({})));
    }

    #[test]
    fn git_commit_is_side_effecting_and_write_class() {
        assert!(GitCommitTool.is_side_effecting(&serde_json::json!({"message": "x"})));
        assert!(matches!(GitCommitTool.risk_class(&serde_json::json!({"message": "x"})), RiskClass::Write));
    }
}
