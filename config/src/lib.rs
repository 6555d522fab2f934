//! Layered configuration resolution for the agent core.
//!
//! # Precedence
//!
//! ```text
//! process environment   (highest, wins)
//! ~/.push/config.json
//! built-in defaults      (lowest)
//! ```
//!
//! Call [`resolve`] to read the real environment and the real config file,
//! or [`resolve_from`] with a captured environment snapshot and a
//! [`ConfigFile`] for anything that shouldn't touch the process environment
//! (tests, a `/config --dry-run`-style preview). Secret fields are carried
//! as `push_types::SecretString` end to end so the only way to see a raw
//! value is an explicit `.expose()` at the one call site that needs it;
//! `Display`-ing a [`ResolvedConfig`] always masks them.

mod env_keys;
mod file;
mod resolved;
mod retry;

pub use env_keys::{
    ENV_CONFIG_PATH, ENV_EXEC_MODE, ENV_EXPLAIN_MODE, ENV_FORCE_COLOR, ENV_LOCAL_SANDBOX, ENV_NO_COLOR,
    ENV_PROVIDER, ENV_SESSION_DIR, ENV_TAVILY_API_KEY, ENV_WEB_SEARCH_BACKEND, provider_model_env, provider_url_env,
};
pub use file::{ConfigFile, ConfigFileError, ProviderFileEntry, default_config_path, load_config_file, save_config_file};
pub use resolved::{ProviderSettings, ResolvedConfig, resolve, resolve_from};
pub use retry::RetryPolicy;
