//! Names of the environment variables the config overlay reads.
//!
//! Per-provider credentials reuse [`push_types::Provider::env_var`]'s
//! unprefixed names (`ANTHROPIC_API_KEY`, ...) since every fix-it hint in
//! `push-core` already points users at those; only the URL/model overrides
//! get the `PUSH_<PROVIDER>_` prefix.

use push_types::Provider;

pub const ENV_CONFIG_PATH: &str = "PUSH_CONFIG_PATH";
pub const ENV_SESSION_DIR: &str = "PUSH_SESSION_DIR";
pub const ENV_PROVIDER: &str = "PUSH_PROVIDER";
pub const ENV_LOCAL_SANDBOX: &str = "PUSH_LOCAL_SANDBOX";
pub const ENV_EXPLAIN_MODE: &str = "PUSH_EXPLAIN_MODE";
pub const ENV_EXEC_MODE: &str = "PUSH_EXEC_MODE";
pub const ENV_WEB_SEARCH_BACKEND: &str = "PUSH_WEB_SEARCH_BACKEND";
pub const ENV_TAVILY_API_KEY: &str = "PUSH_TAVILY_API_KEY";
pub const ENV_NO_COLOR: &str = "NO_COLOR";
pub const ENV_FORCE_COLOR: &str = "FORCE_COLOR";

/// `PUSH_<PROVIDER>_URL`, e.g. `PUSH_CLAUDE_URL`.
#[must_use]
pub fn provider_url_env(provider: Provider) -> String {
    format!("PUSH_{}_URL", provider.as_str().to_ascii_uppercase())
}

/// `PUSH_<PROVIDER>_MODEL`, e.g. `PUSH_OPENAI_MODEL`.
#[must_use]
pub fn provider_model_env(provider: Provider) -> String {
    format!("PUSH_{}_MODEL", provider.as_str().to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_env_names_are_prefixed_and_uppercase() {
        assert_eq!(provider_url_env(Provider::Claude), "PUSH_CLAUDE_URL");
        assert_eq!(provider_model_env(Provider::OpenAI), "PUSH_OPENAI_MODEL");
    }

    #[test]
    fn api_key_env_reuses_unprefixed_provider_name() {
        assert_eq!(Provider::Gemini.env_var(), "GEMINI_API_KEY");
    }
}
