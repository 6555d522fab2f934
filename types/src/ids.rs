//! Newtype identifiers used across the agent core.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier for a single message within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strictly monotonic position of an [`crate::Event`] within a session's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSeq(u64);

impl EventSeq {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EventSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier spanning all events of a single user turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier matching a `ToolCall` to its `ToolResult`.
///
/// Native providers mint these themselves; the textual tool-call protocol
/// has no wire identifier, so the parser synthesizes one deterministically
/// from the run and the call's position within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCallId(String);

impl ToolCallId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn synthesize(run: &RunId, index: usize) -> Self {
        Self(format!("{run}_call_{index}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolCallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `sess_<base36 epoch>_<6 random base36>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("session id {0:?} does not match sess_<base36>_<6 base36 chars>")]
pub struct SessionIdError(String);

impl SessionId {
    /// Build a session id from its two already-encoded parts, validating shape.
    pub fn new(epoch_base36: &str, random_suffix: &str) -> Result<Self, SessionIdError> {
        let candidate = format!("sess_{epoch_base36}_{random_suffix}");
        Self::parse(candidate)
    }

    pub fn parse(raw: impl Into<String>) -> Result<Self, SessionIdError> {
        let raw = raw.into();
        let Some(rest) = raw.strip_prefix("sess_") else {
            return Err(SessionIdError(raw));
        };
        let Some((epoch, suffix)) = rest.split_once('_') else {
            return Err(SessionIdError(raw));
        };
        let valid_base36 = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
        if suffix.chars().count() != 6 || !valid_base36(epoch) || !valid_base36(suffix) {
            return Err(SessionIdError(raw));
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
