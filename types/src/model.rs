//! Provider and model identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the LLM backends the agent core can stream from.
///
/// Exactly three variants, mirroring the three wire protocols `push-providers`
/// implements: OpenAI-compatible chat completions (Claude, OpenAI) and
/// Gemini's distinct generative-content endpoint (`?key=` query auth, native
/// search grounding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Claude,
    OpenAI,
    Gemini,
}

impl Provider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
        }
    }

    /// The environment variable carrying this provider's API key, used both
    /// to resolve credentials and to build the secret denylist for
    /// subprocess environment sanitization.
    #[must_use]
    pub fn env_var(self) -> &'static str {
        match self {
            Provider::Claude => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }

    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Claude => "https://api.anthropic.com/v1/messages",
            Provider::OpenAI => "https://api.openai.com/v1/chat/completions",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/models",
        }
    }

    #[must_use]
    pub fn default_model(self) -> ModelName {
        match self {
            Provider::Claude => ModelName::new(self, "claude-sonnet-4-6"),
            Provider::OpenAI => ModelName::new(self, "gpt-5.2"),
            Provider::Gemini => ModelName::new(self, "gemini-3.1-pro-preview"),
        }
    }

    /// A small curated starting point for `/model` completion; `listModels`
    /// results are merged in ahead of any of these that it also returns
    /// (curated first, discovered second, deduped).
    #[must_use]
    pub fn curated_models(self) -> &'static [&'static str] {
        match self {
            Provider::Claude => &[
                "claude-opus-4-6",
                "claude-sonnet-4-6",
                "claude-haiku-4-5-20251001",
            ],
            Provider::OpenAI => &["gpt-5.2-pro", "gpt-5.2"],
            Provider::Gemini => &["gemini-3.1-pro-preview", "gemini-3-flash-preview"],
        }
    }

    /// True for the adapter with a native generative-content search
    /// capability; used by `web_search`'s backend fallback order.
    #[must_use]
    pub fn has_native_search(self) -> bool {
        matches!(self, Provider::Gemini)
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Some(Provider::Claude),
            "openai" | "gpt" | "chatgpt" => Some(Provider::OpenAI),
            "gemini" | "google" => Some(Provider::Gemini),
            _ => None,
        }
    }

    #[must_use]
    pub fn all() -> &'static [Provider] {
        &[Provider::Claude, Provider::OpenAI, Provider::Gemini]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider-scoped model identifier.
///
/// Deliberately not validated against a fixed catalog: model discovery
/// (`listModels`) returns names this program has never seen before, and a
/// user can always name a model explicitly via `/model <id>` or the
/// `PUSH_<PROVIDER>_MODEL` environment triple. Pairing the id with its
/// provider is what prevents an Anthropic model id reaching the OpenAI
/// adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelName {
    provider: Provider,
    #[serde(rename = "model")]
    id: String,
}

impl ModelName {
    #[must_use]
    pub fn new(provider: Provider, id: impl Into<String>) -> Self {
        Self {
            provider,
            id: id.into(),
        }
    }

    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
