//! Tool manifest entries sent to the provider, and the env-var denylist
//! applied before a subprocess tool ever sees the parent environment.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Provider;

/// One entry of the tool manifest handed to the LLM.
///
/// Follows the function-calling schema shared by Claude, OpenAI, and Gemini:
/// a name, a description, and a JSON Schema for the arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    /// Hidden tools still execute normally but are omitted from any
    /// user-facing tool listing.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    /// If set, this definition is only sent to the named provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
}

impl ToolDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self { name: name.into(), description: description.into(), parameters, hidden: false, provider: None }
    }
}

/// Environment variable name patterns (glob, case-insensitive) stripped
/// from the environment handed to any subprocess a tool spawns.
pub const ENV_SECRET_DENYLIST: &[&str] = &[
    "*_KEY",
    "*_SECRET",
    "*_TOKEN",
    "*_PASSWORD",
    "*_CREDENTIAL",
    "AWS_*",
    "DYLD_*",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
];
