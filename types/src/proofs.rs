//! Proof types for validated content.
//!
//! These types enforce invariants at construction time. Once you hold a
//! value, you know it satisfies all required constraints.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A string guaranteed to be non-empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyString(String);

#[derive(Debug, Error)]
#[error("content must not be empty")]
pub struct EmptyStringError;

impl NonEmptyString {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyStringError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(EmptyStringError)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for NonEmptyString {
    type Error = EmptyStringError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for NonEmptyString {
    type Error = EmptyStringError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl std::ops::Deref for NonEmptyString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for NonEmptyString {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for NonEmptyString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes standalone `\r` to `\n` while leaving `\r\n` pairs intact.
///
/// Applied once, at construction, to anything that will later be replayed
/// into a terminal or a journal: a bare `\r` can be used to overwrite a
/// previous line when the raw bytes are viewed outside this program.
#[must_use]
pub fn normalize_line_endings(input: &str) -> Cow<'_, str> {
    if !needs_normalization(input) {
        return Cow::Borrowed(input);
    }
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                result.push('\r');
                result.push(chars.next().unwrap());
            } else {
                result.push('\n');
            }
        } else {
            result.push(c);
        }
    }
    Cow::Owned(result)
}

fn needs_normalization(input: &str) -> bool {
    let bytes = input.as_bytes();
    bytes
        .iter()
        .enumerate()
        .any(|(i, &b)| b == b'\r' && bytes.get(i + 1) != Some(&b'\n'))
}

/// A secret value redacted in `Debug` and `Display`.
///
/// Printing a `SecretString` (via `{}`, `{:?}`, logging, or config display)
/// never leaks the contained value; call [`SecretString::expose`] at the
/// one call site that actually needs the raw bytes (an `Authorization`
/// header, an API request body).
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `first4…last4` with the middle replaced by asterisks, for display in
    /// `/config` or a log line. Short secrets (under 9 chars) are fully
    /// masked rather than partially revealed.
    #[must_use]
    pub fn masked(&self) -> String {
        let len = self.0.chars().count();
        if len <= 8 {
            return "*".repeat(len.max(4));
        }
        let chars: Vec<char> = self.0.chars().collect();
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[len - 4..].iter().collect();
        format!("{head}…{tail}")
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString({})", self.masked())
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}
