//! `search_files`: regex/literal content search backed by ripgrep, falling
//! back to plain `grep` when `rg` isn't on `$PATH`.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{EnvSanitizer, RiskClass, ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args, sanitize_output};

const SEARCH_TOOL_NAME: &str = "search_files";

#[derive(Debug, Clone)]
pub struct SearchToolConfig {
    pub binary: String,
    pub fallback_binary: String,
    pub default_timeout_ms: u64,
    pub default_max_results: usize,
}

impl Default for SearchToolConfig {
    fn default() -> Self {
        Self { binary: "rg".to_string(), fallback_binary: "grep".to_string(), default_timeout_ms: 20_000, default_max_results: 200 }
    }
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    case_insensitive: bool,
    #[serde(default)]
    fixed_strings: bool,
    #[serde(default)]
    include_glob: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchMatch {
    pub file: String,
    pub line: u32,
    pub text: String,
}

#[derive(Debug)]
pub struct SearchTool {
    config: SearchToolConfig,
}

impl SearchTool {
    #[must_use]
    pub fn new(config: SearchToolConfig) -> Self {
        Self { config }
    }

    async fn backend(&self, env_sanitizer: &EnvSanitizer) -> Result<(String, bool), ToolError> {
        if probe(&self.config.binary, env_sanitizer).await {
            return Ok((self.config.binary.clone(), true));
        }
        if probe(&self.config.fallback_binary, env_sanitizer).await {
            return Ok((self.config.fallback_binary.clone(), false));
        }
        Err(ToolError::ExecutionFailed {
            tool: SEARCH_TOOL_NAME.to_string(),
            message: "neither rg nor grep is available on PATH".to_string(),
        })
    }
}

async fn probe(binary: &str, env_sanitizer: &EnvSanitizer) -> bool {
    let env = env_sanitizer.sanitize_env(&std::env::vars().collect::<Vec<_>>());
    let mut cmd = Command::new(binary);
    cmd.arg("--version").env_clear().envs(env).stdout(Stdio::null()).stderr(Stdio::null()).stdin(Stdio::null());
    matches!(cmd.status().await, Ok(status) if status.success())
}

impl ToolExecutor for SearchTool {
    fn name(&self) -> &'static str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Search file contents for a regex or literal pattern under a directory, ripgrep-preferred with a grep fallback."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "pattern": { "type": "string", "minLength": 1, "description": "Regex (or literal, with fixed_strings) pattern to search for." },
                "path": { "type": "string", "description": "Directory to search. Defaults to the working directory." },
                "case_insensitive": { "type": "boolean", "default": false },
                "fixed_strings": { "type": "boolean", "default": false, "description": "Treat pattern as a literal string." },
                "include_glob": { "type": "string", "description": "Only search files matching this glob (e.g. '*.rs')." },
                "max_results": { "type": "integer", "minimum": 1, "description": "Cap on the number of matches returned." }
            },
            "required": ["pattern"]
        })
    }

    fn is_side_effecting(&self, _args: &serde_json::Value) -> bool {
        false
    }

    fn risk_class(&self, _args: &serde_json::Value) -> RiskClass {
        RiskClass::Read
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let args: SearchArgs = parse_args(args)?;
        Ok(format!("search for '{}' in {}", args.pattern, args.path.as_deref().unwrap_or(".")))
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.config.default_timeout_ms))
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: SearchArgs = parse_args(&args)?;
            let dir = match &args.path {
                Some(p) => ctx.sandbox.resolve_path(p, &ctx.working_dir)?,
                None => ctx.sandbox.working_dir(),
            };
            let max_results = args.max_results.unwrap_or(self.config.default_max_results);

            let (binary, is_rg) = self.backend(&ctx.env_sanitizer).await?;
            let mut cmd = Command::new(&binary);
            cmd.current_dir(&dir).stdout(Stdio::piped()).stderr(Stdio::piped()).stdin(Stdio::null());
            let env = ctx.env_sanitizer.sanitize_env(&std::env::vars().collect::<Vec<_>>());
            cmd.env_clear().envs(env);

            if is_rg {
                cmd.arg("--line-number").arg("--no-heading").arg("--color=never");
                if args.case_insensitive {
                    cmd.arg("--ignore-case");
                }
                if args.fixed_strings {
                    cmd.arg("--fixed-strings");
                }
                if let Some(glob) = &args.include_glob {
                    cmd.arg("--glob").arg(glob);
                }
                cmd.arg("--max-count").arg(max_results.to_string());
            } else {
                cmd.arg("-rn");
                if args.case_insensitive {
                    cmd.arg("-i");
                }
                if args.fixed_strings {
                    cmd.arg("-F");
                }
                if let Some(glob) = &args.include_glob {
                    cmd.arg("--include").arg(glob);
                }
            }
            cmd.arg(&args.pattern).arg(".");

            let mut child = cmd.spawn().map_err(|e| ToolError::ExecutionFailed {
                tool: SEARCH_TOOL_NAME.to_string(),
                message: format!("failed to spawn {binary}: {e}"),
            })?;

            let mut stdout = String::new();
            if let Some(mut out) = child.stdout.take() {
                let _ = timeout(self.timeout().unwrap_or(Duration::from_secs(20)), out.read_to_string(&mut stdout)).await;
            }
            let _ = child.wait().await;

            let mut lines: Vec<&str> = stdout.lines().collect();
            if lines.len() > max_results {
                lines.truncate(max_results);
            }
            let output = if lines.is_empty() { "No matches found.".to_string() } else { lines.join("\n") };
            Ok(sanitize_output(&output))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn approval_summary_includes_pattern_and_path() {
        let tool = SearchTool::new(SearchToolConfig::default());
        let summary = tool.approval_summary(&json!({"pattern": "TODO", "path": "src"})).unwrap();
        assert!(summary.contains("TODO"));
        assert!(summary.contains("src"));
    }

    #[test]
    fn is_not_side_effecting() {
        let tool = SearchTool::new(SearchToolConfig::default());
        assert!(!tool.is_side_effecting(&json!({"pattern": "x"})));
    }
}
