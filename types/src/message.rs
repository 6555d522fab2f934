//! Dialogue, tool exchange, and session data model.
//!
//! [`Message`] is a real sum type, not a role tag plus a bag of
//! sometimes-meaningful fields: each variant carries exactly the data that
//! role can have. [`Message::role_str`] and [`Message::content`] recover
//! the flat `{ role, content, meta }` view the session log and provider
//! adapters build their own wire payloads from.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{EventSeq, MessageId, RunId, SessionId, ToolCallId};
use crate::model::{ModelName, Provider};
use crate::proofs::{EmptyStringError, NonEmptyString, normalize_line_endings};

/// Where a tool call was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallSource {
    /// A provider's native function-calling payload.
    Native,
    /// The `<<<TOOL_CALL>>>...<<<END>>>` textual protocol, scanned out of
    /// accumulated assistant text.
    Textual,
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub tool: String,
    pub args: BTreeMap<String, Value>,
    pub source: ToolCallSource,
}

impl ToolCall {
    #[must_use]
    pub fn new(
        id: ToolCallId,
        tool: impl Into<String>,
        args: BTreeMap<String, Value>,
        source: ToolCallSource,
    ) -> Self {
        Self {
            id,
            tool: tool.into(),
            args,
            source,
        }
    }
}

/// A machine-readable error surfaced alongside a failed tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredToolError {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The outcome of executing a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: ToolCallId,
    pub tool: String,
    pub ok: bool,
    /// What the model sees. Already truncated to the tool's output cap.
    pub text: String,
    /// Preserved only in the event log, never replayed back to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_error: Option<StructuredToolError>,
}

impl ToolResult {
    #[must_use]
    pub fn success(tool_call_id: ToolCallId, tool: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id,
            tool: tool.into(),
            ok: true,
            text: text.into(),
            meta: None,
            structured_error: None,
        }
    }

    #[must_use]
    pub fn failure(
        tool_call_id: ToolCallId,
        tool: impl Into<String>,
        text: impl Into<String>,
        structured_error: Option<StructuredToolError>,
    ) -> Self {
        Self {
            tool_call_id,
            tool: tool.into(),
            ok: false,
            text: text.into(),
            meta: None,
            structured_error,
        }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMessage {
    content: NonEmptyString,
    timestamp: SystemTime,
}

impl SystemMessage {
    #[must_use]
    pub fn new(content: NonEmptyString, timestamp: SystemTime) -> Self {
        Self { content, timestamp }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        self.content.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    content: NonEmptyString,
    timestamp: SystemTime,
}

impl UserMessage {
    #[must_use]
    pub fn new(content: NonEmptyString, timestamp: SystemTime) -> Self {
        Self { content, timestamp }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        self.content.as_str()
    }
}

/// An assistant turn: streamed text, and — when the model asked to invoke
/// tools in-band via its native function-calling channel — the calls it
/// requested. `meta.toolName`/`meta.toolMeta` on the wire form summarize
/// the first call for callers that only look at the flat shape; the full
/// list travels in `tool_calls` for the loop itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMessage {
    content: String,
    timestamp: SystemTime,
    model: ModelName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    #[must_use]
    pub fn new(model: ModelName, content: String, timestamp: SystemTime) -> Self {
        Self {
            content,
            timestamp,
            model,
            tool_calls: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.model.provider()
    }

    #[must_use]
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }
}

/// `role = tool_result`: the `[TOOL_RESULT]` message fed back to the model
/// after a call executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    result: ToolResult,
    timestamp: SystemTime,
}

impl ToolResultMessage {
    #[must_use]
    pub fn new(result: ToolResult, timestamp: SystemTime) -> Self {
        Self { result, timestamp }
    }

    #[must_use]
    pub fn result(&self) -> &ToolResult {
        &self.result
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.result.text
    }
}

/// One turn of dialogue.
///
/// `role` is implicit in the variant: [`Message::role_str`] and
/// [`Message::content`] recover the `{ role, content, meta }` shape
/// providers and the session log serialize against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    System(SystemMessage),
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResultMessage),
}

impl Message {
    #[must_use]
    pub fn system(content: NonEmptyString, timestamp: SystemTime) -> Self {
        Self::System(SystemMessage::new(content, timestamp))
    }

    #[must_use]
    pub fn user(content: NonEmptyString, timestamp: SystemTime) -> Self {
        Self::User(UserMessage::new(content, timestamp))
    }

    pub fn try_user(content: impl Into<String>, timestamp: SystemTime) -> Result<Self, EmptyStringError> {
        Ok(Self::user(NonEmptyString::new(content)?, timestamp))
    }

    #[must_use]
    pub fn assistant(model: ModelName, content: String, timestamp: SystemTime) -> Self {
        Self::Assistant(AssistantMessage::new(model, content, timestamp))
    }

    #[must_use]
    pub fn tool_result(result: ToolResult, timestamp: SystemTime) -> Self {
        Self::ToolResult(ToolResultMessage::new(result, timestamp))
    }

    #[must_use]
    pub fn role_str(&self) -> &'static str {
        match self {
            Message::System(_) => "system",
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
            Message::ToolResult(_) => "tool_result",
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Message::System(m) => m.content(),
            Message::User(m) => m.content(),
            Message::Assistant(m) => m.content(),
            Message::ToolResult(m) => m.content(),
        }
    }

    /// Replace this message's content, keeping its variant, model, tool
    /// calls, and timestamp. Used by context trimming to swap a verbose
    /// message for a summary without changing its role in the transcript.
    ///
    /// # Panics
    /// Panics if `new_content` is empty and this is a `System` or `User`
    /// message, which require non-empty content. Callers that summarize
    /// always produce non-empty replacement text.
    #[must_use]
    pub fn with_content(&self, new_content: impl Into<String>) -> Self {
        let new_content = new_content.into();
        match self {
            Message::System(m) => Message::System(SystemMessage {
                content: NonEmptyString::new(new_content).expect("summary content is non-empty"),
                timestamp: m.timestamp,
            }),
            Message::User(m) => Message::User(UserMessage {
                content: NonEmptyString::new(new_content).expect("summary content is non-empty"),
                timestamp: m.timestamp,
            }),
            Message::Assistant(m) => Message::Assistant(AssistantMessage {
                content: new_content,
                timestamp: m.timestamp,
                model: m.model.clone(),
                tool_calls: m.tool_calls.clone(),
            }),
            Message::ToolResult(m) => Message::ToolResult(ToolResultMessage {
                result: ToolResult {
                    text: new_content,
                    ..m.result.clone()
                },
                timestamp: m.timestamp,
            }),
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        match self {
            Message::System(m) => m.timestamp,
            Message::User(m) => m.timestamp,
            Message::Assistant(m) => m.timestamp,
            Message::ToolResult(m) => m.timestamp,
        }
    }

    /// Normalize standalone `\r` in display content before this message is
    /// persisted to the session log or printed to a terminal.
    #[must_use]
    pub fn normalized_for_persistence(&self) -> Self {
        match self {
            Message::System(m) => Message::System(SystemMessage {
                content: NonEmptyString::new(normalize_line_endings(m.content()).into_owned())
                    .expect("non-empty content stays non-empty after CR normalization"),
                timestamp: m.timestamp,
            }),
            Message::User(m) => Message::User(UserMessage {
                content: NonEmptyString::new(normalize_line_endings(m.content()).into_owned())
                    .expect("non-empty content stays non-empty after CR normalization"),
                timestamp: m.timestamp,
            }),
            Message::Assistant(m) => Message::Assistant(AssistantMessage {
                content: normalize_line_endings(&m.content).into_owned(),
                timestamp: m.timestamp,
                model: m.model.clone(),
                tool_calls: m.tool_calls.clone(),
            }),
            Message::ToolResult(m) => Message::ToolResult(ToolResultMessage {
                result: ToolResult {
                    text: normalize_line_endings(&m.result.text).into_owned(),
                    ..m.result.clone()
                },
                timestamp: m.timestamp,
            }),
        }
    }
}

/// The persistent record of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub provider: Provider,
    pub model: ModelName,
    pub cwd: String,
    pub rounds: u32,
    pub event_seq: EventSeq,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub title: Option<String>,
}

/// One timestamped transition through the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: EventSeq,
    pub timestamp: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// `type` plus its payload, flattened together on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted { provider: Provider, model: ModelName },
    UserMessage { message_id: MessageId },
    AssistantDone { message_id: MessageId },
    ToolCall { tool_call: ToolCall },
    ToolResult { result: ToolResult },
    MalformedToolCall { reason: String, raw: String },
    Error { message: String },
    RunComplete { outcome: RunOutcomeKind },
}

/// Why a round loop returned, recorded in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcomeKind {
    Success,
    RepeatLoopDetected,
    RoundCapReached,
    ApprovalDenied,
    Cancelled,
    BudgetExceeded,
    ProviderError,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH
    }

    #[test]
    fn message_role_str_matches_variant() {
        let msg = Message::try_user("hi", now()).unwrap();
        assert_eq!(msg.role_str(), "user");
    }

    #[test]
    fn normalized_for_persistence_strips_bare_cr() {
        let msg = Message::try_user("line1\rline2", now()).unwrap();
        let normalized = msg.normalized_for_persistence();
        assert_eq!(normalized.content(), "line1\nline2");
    }

    #[test]
    fn with_content_preserves_variant_and_replaces_text() {
        let msg = Message::try_user("original", now()).unwrap();
        let replaced = msg.with_content("[...summarized 8 chars]");
        assert_eq!(replaced.role_str(), "user");
        assert_eq!(replaced.content(), "[...summarized 8 chars]");
    }

    #[test]
    fn with_content_on_tool_result_keeps_tool_call_id() {
        let result = ToolResult::success(ToolCallId::new("call_1"), "read_file", "long output");
        let msg = Message::tool_result(result, now());
        let replaced = msg.with_content("[...summarized 11 chars]");
        let Message::ToolResult(inner) = &replaced else {
            panic!("expected ToolResult variant");
        };
        assert_eq!(inner.result().tool_call_id.as_str(), "call_1");
        assert_eq!(replaced.content(), "[...summarized 11 chars]");
    }

    #[test]
    fn event_kind_round_trips_through_json() {
        let event = Event {
            seq: EventSeq::new(1),
            timestamp: now(),
            run_id: Some(RunId::new("run_1")),
            kind: EventKind::RunComplete {
                outcome: RunOutcomeKind::Success,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"run_complete\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back.kind,
            EventKind::RunComplete {
                outcome: RunOutcomeKind::Success
            }
        ));
    }
}
