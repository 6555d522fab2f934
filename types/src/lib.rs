//! Shared data model for the agent core: messages, tool calls, session
//! state, provider/model identity, and the small validated value types
//! (`NonEmptyString`, `SecretString`, ids) everything else builds on.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the program.

mod confusables;
mod ids;
mod message;
mod model;
mod proofs;
mod sanitize;
mod text;
mod tool_def;

pub use confusables::{HomoglyphWarning, detect_mixed_script};
pub use ids::{EventSeq, MessageId, RunId, SessionId, SessionIdError, ToolCallId};
pub use message::{
    AssistantMessage, Event, EventKind, Message, RunOutcomeKind, SessionState,
    StructuredToolError, SystemMessage, ToolCall, ToolCallSource, ToolResult, ToolResultMessage,
    UserMessage,
};
pub use model::{ModelName, Provider};
pub use proofs::{EmptyStringError, NonEmptyString, SecretString, normalize_line_endings};
pub use sanitize::sanitize_terminal_text;
pub use text::{truncate_preview, truncate_to_fit, truncate_with_ellipsis};
pub use tool_def::{ENV_SECRET_DENYLIST, ToolDefinition};
