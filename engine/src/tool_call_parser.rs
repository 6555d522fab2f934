//! Extracts ordered tool calls from one assistant round.
//!
//! Input is the round's accumulated assistant text plus whatever native
//! function-calling payload the provider adapter produced. A native payload
//! always wins; only when there isn't one do we scan the text for the
//! `<<<TOOL_CALL>>>...<<<END>>>` textual protocol. Pure and idempotent: no
//! tool runs here, and calling this twice on the same input gives the same
//! answer.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use push_types::{RunId, ToolCall, ToolCallId, ToolCallSource};

static TOOL_CALL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<<<TOOL_CALL>>>\r?\n(.*?)\r?\n<<<END>>>").expect("static regex"));

/// Why a textual tool-call block failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    JsonParseError,
    MissingTool,
    ArgsNotObject,
    UnknownTool,
}

impl MalformedReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JsonParseError => "json_parse_error",
            Self::MissingTool => "missing_tool",
            Self::ArgsNotObject => "args_not_object",
            Self::UnknownTool => "unknown_tool",
        }
    }
}

/// Result of running the parser over one round.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    /// Zero or more calls, in the order they should be executed.
    Calls(Vec<ToolCall>),
    /// A candidate tool call was found but didn't parse; no calls are run
    /// this round.
    Malformed { reason: MalformedReason, raw: String },
}

/// Looks up whether a tool name is registered, so the parser can reject
/// calls to tools that don't exist without depending on `push-tools`
/// directly (keeps this module usable in isolation and in tests).
pub trait KnownTools {
    fn is_known(&self, tool_name: &str) -> bool;
}

impl KnownTools for push_tools::ToolRegistry {
    fn is_known(&self, tool_name: &str) -> bool {
        self.lookup(tool_name).is_ok() || self.is_schema_only(tool_name)
    }
}

/// Parses one round's tool calls.
///
/// `native`, when `Some`, is the provider's own function-calling payload for
/// this round (already assembled by `push-providers`); its presence takes
/// priority over scanning `text`, per the detection order. Each native call
/// is still checked against `known`, since a provider can echo back a tool
/// name that isn't actually registered.
pub fn parse_tool_calls(text: &str, native: Option<Vec<ToolCall>>, run_id: &RunId, known: &dyn KnownTools) -> ParseOutcome {
    if let Some(calls) = native {
        for call in &calls {
            if !known.is_known(&call.tool) {
                return ParseOutcome::Malformed { reason: MalformedReason::UnknownTool, raw: call.tool.clone() };
            }
        }
        return ParseOutcome::Calls(calls);
    }

    parse_textual(text, run_id, known)
}

fn parse_textual(text: &str, run_id: &RunId, known: &dyn KnownTools) -> ParseOutcome {
    let mut calls = Vec::new();

    for (index, capture) in TOOL_CALL_FENCE.captures_iter(text).enumerate() {
        let raw = capture.get(1).map(|m| m.as_str()).unwrap_or_default().trim().to_string();

        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(_) => return ParseOutcome::Malformed { reason: MalformedReason::JsonParseError, raw },
        };

        let Some(obj) = parsed.as_object() else {
            return ParseOutcome::Malformed { reason: MalformedReason::JsonParseError, raw };
        };

        let Some(tool) = obj.get("tool").and_then(Value::as_str) else {
            return ParseOutcome::Malformed { reason: MalformedReason::MissingTool, raw };
        };

        let Some(args_obj) = obj.get("args") else {
            return ParseOutcome::Malformed { reason: MalformedReason::ArgsNotObject, raw };
        };
        let Some(args_obj) = args_obj.as_object() else {
            return ParseOutcome::Malformed { reason: MalformedReason::ArgsNotObject, raw };
        };

        if !known.is_known(tool) {
            return ParseOutcome::Malformed { reason: MalformedReason::UnknownTool, raw };
        }

        let args: BTreeMap<String, Value> = args_obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        calls.push(ToolCall::new(ToolCallId::synthesize(run_id, index), tool, args, ToolCallSource::Textual));
    }

    ParseOutcome::Calls(calls)
}
