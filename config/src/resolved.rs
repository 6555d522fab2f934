//! Overlays `{ defaults, user file, environment }` — environment wins — into
//! the single [`ResolvedConfig`] the rest of the agent core reads from.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use push_types::{ModelName, Provider, SecretString};

use crate::env_keys::{
    ENV_CONFIG_PATH, ENV_EXEC_MODE, ENV_EXPLAIN_MODE, ENV_LOCAL_SANDBOX, ENV_PROVIDER,
    ENV_SESSION_DIR, ENV_TAVILY_API_KEY, ENV_WEB_SEARCH_BACKEND, provider_model_env, provider_url_env,
};
use crate::file::{ConfigFile, ProviderFileEntry, default_config_path};

const DEFAULT_EXEC_MODE: &str = "confirm-writes";

/// The resolved settings for one provider: URL, API key, and default model,
/// each independently overlaid across the three layers.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub provider: Provider,
    pub url: String,
    pub api_key: Option<SecretString>,
    pub model: ModelName,
}

/// The fully overlaid configuration a running agent core reads from.
///
/// Build with [`resolve`] (reads the real process environment and the real
/// `~/.push/config.json`) or [`resolve_from`] (pure, for tests and for any
/// caller that has already captured its own environment snapshot).
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config_path: PathBuf,
    pub session_dir: PathBuf,
    pub provider: Provider,
    pub local_sandbox: bool,
    pub explain_mode: bool,
    pub exec_mode: String,
    pub web_search_backend: Option<String>,
    pub tavily_api_key: Option<SecretString>,
    providers: Vec<ProviderSettings>,
}

impl ResolvedConfig {
    #[must_use]
    pub fn provider_settings(&self, provider: Provider) -> &ProviderSettings {
        self.providers
            .iter()
            .find(|p| p.provider == provider)
            .expect("resolve populates one ProviderSettings per Provider::all()")
    }

    #[must_use]
    pub fn active_provider_settings(&self) -> &ProviderSettings {
        self.provider_settings(self.provider)
    }
}

fn env_bool(env: &HashMap<String, String>, key: &str) -> Option<bool> {
    env.get(key).map(|raw| {
        let lower = raw.trim().to_ascii_lowercase();
        matches!(lower.as_str(), "1" | "true" | "yes" | "on")
    })
}

fn env_string(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key).map(|raw| raw.trim().to_string()).filter(|s| !s.is_empty())
}

fn provider_file_entry<'a>(file: &'a ConfigFile, provider: Provider) -> Option<&'a ProviderFileEntry> {
    file.providers.get(provider.as_str())
}

fn resolve_provider(env: &HashMap<String, String>, file: &ConfigFile, provider: Provider) -> ProviderSettings {
    let file_entry = provider_file_entry(file, provider);

    let url = env_string(env, &provider_url_env(provider))
        .or_else(|| file_entry.and_then(|e| e.url.clone()))
        .unwrap_or_else(|| provider.default_base_url().to_string());

    let api_key = env_string(env, provider.env_var())
        .or_else(|| file_entry.and_then(|e| e.api_key.clone()))
        .map(SecretString::new);

    let model_id = env_string(env, &provider_model_env(provider)).or_else(|| file_entry.and_then(|e| e.model.clone()));
    let model = model_id.map_or_else(|| provider.default_model(), |id| ModelName::new(provider, id));

    ProviderSettings { provider, url, api_key, model }
}

/// Overlay `{ defaults, user file, environment }` (environment wins) using
/// an already-captured environment snapshot, so callers and tests never
/// have to touch the real process environment.
#[must_use]
pub fn resolve_from(env: &HashMap<String, String>, file: &ConfigFile) -> ResolvedConfig {
    let config_path = env_string(env, ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .or_else(default_config_path)
        .unwrap_or_else(|| PathBuf::from(".push/config.json"));

    let session_dir = env_string(env, ENV_SESSION_DIR)
        .map(PathBuf::from)
        .or_else(|| file.session_dir.clone().map(PathBuf::from))
        .or_else(|| dirs::home_dir().map(|home| home.join(".push").join("sessions")))
        .unwrap_or_else(|| PathBuf::from(".push/sessions"));

    let provider = env_string(env, ENV_PROVIDER)
        .as_deref()
        .and_then(Provider::parse)
        .or_else(|| file.provider.as_deref().and_then(Provider::parse))
        .unwrap_or_default();

    let local_sandbox = env_bool(env, ENV_LOCAL_SANDBOX).or(file.local_sandbox).unwrap_or(true);
    let explain_mode = env_bool(env, ENV_EXPLAIN_MODE).or(file.explain_mode).unwrap_or(false);
    let exec_mode = env_string(env, ENV_EXEC_MODE)
        .or_else(|| file.exec_mode.clone())
        .unwrap_or_else(|| DEFAULT_EXEC_MODE.to_string());

    let web_search_backend = env_string(env, ENV_WEB_SEARCH_BACKEND).or_else(|| file.web_search_backend.clone());
    let tavily_api_key = env_string(env, ENV_TAVILY_API_KEY)
        .or_else(|| file.tavily_api_key.clone())
        .map(SecretString::new);

    let providers = Provider::all().iter().map(|&p| resolve_provider(env, file, p)).collect();

    ResolvedConfig {
        config_path,
        session_dir,
        provider,
        local_sandbox,
        explain_mode,
        exec_mode,
        web_search_backend,
        tavily_api_key,
        providers,
    }
}

/// Overlay `{ defaults, user file, environment }` against the real process
/// environment and the real `~/.push/config.json` (or `$PUSH_CONFIG_PATH`).
#[must_use]
pub fn resolve() -> ResolvedConfig {
    let env: HashMap<String, String> = std::env::vars().collect();
    let path = env_string(&env, ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .or_else(default_config_path)
        .unwrap_or_else(|| PathBuf::from(".push/config.json"));
    let file = crate::file::load_config_file(&path).unwrap_or_else(|err| {
        tracing::warn!("falling back to defaults: {err}");
        ConfigFile::default()
    });
    resolve_from(&env, &file)
}

impl fmt::Display for ResolvedConfig {
    /// The `/config` view: every field, secrets masked with
    /// [`SecretString::masked`].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "config_path: {}", self.config_path.display())?;
        writeln!(f, "session_dir: {}", self.session_dir.display())?;
        writeln!(f, "provider: {}", self.provider)?;
        writeln!(f, "local_sandbox: {}", self.local_sandbox)?;
        writeln!(f, "explain_mode: {}", self.explain_mode)?;
        writeln!(f, "exec_mode: {}", self.exec_mode)?;
        writeln!(f, "web_search_backend: {}", self.web_search_backend.as_deref().unwrap_or("(none)"))?;
        writeln!(
            f,
            "tavily_api_key: {}",
            self.tavily_api_key.as_ref().map_or_else(|| "(none)".to_string(), SecretString::masked)
        )?;
        for settings in &self.providers {
            writeln!(
                f,
                "[{}] url={} model={} api_key={}",
                settings.provider,
                settings.url,
                settings.model,
                settings.api_key.as_ref().map_or_else(|| "(none)".to_string(), SecretString::masked)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let resolved = resolve_from(&HashMap::new(), &ConfigFile::default());
        assert_eq!(resolved.provider, Provider::Claude);
        assert_eq!(resolved.exec_mode, DEFAULT_EXEC_MODE);
        assert!(resolved.local_sandbox);
        assert!(!resolved.explain_mode);
        assert_eq!(resolved.providers.len(), Provider::all().len());
    }

    #[test]
    fn user_file_overrides_defaults() {
        let file = ConfigFile { provider: Some("openai".to_string()), exec_mode: Some("auto".to_string()), ..ConfigFile::default() };
        let resolved = resolve_from(&HashMap::new(), &file);
        assert_eq!(resolved.provider, Provider::OpenAI);
        assert_eq!(resolved.exec_mode, "auto");
    }

    #[test]
    fn environment_overrides_user_file() {
        let file = ConfigFile { provider: Some("openai".to_string()), ..ConfigFile::default() };
        let resolved = resolve_from(&env(&[("PUSH_PROVIDER", "gemini")]), &file);
        assert_eq!(resolved.provider, Provider::Gemini);
    }

    #[test]
    fn provider_api_key_env_is_unprefixed() {
        let resolved = resolve_from(&env(&[("ANTHROPIC_API_KEY", "sk-ant-abcdefghijkl")]), &ConfigFile::default());
        let key = resolved.provider_settings(Provider::Claude).api_key.clone().unwrap();
        assert_eq!(key.masked(), "sk-a…ijkl");
    }

    #[test]
    fn provider_url_and_model_env_are_prefixed() {
        let resolved = resolve_from(
            &env(&[("PUSH_OPENAI_URL", "https://proxy.example/v1"), ("PUSH_OPENAI_MODEL", "gpt-custom")]),
            &ConfigFile::default(),
        );
        let settings = resolved.provider_settings(Provider::OpenAI);
        assert_eq!(settings.url, "https://proxy.example/v1");
        assert_eq!(settings.model.as_str(), "gpt-custom");
    }

    #[test]
    fn display_masks_secrets() {
        let resolved = resolve_from(&env(&[("ANTHROPIC_API_KEY", "sk-ant-abcdefghijkl")]), &ConfigFile::default());
        let rendered = resolved.to_string();
        assert!(!rendered.contains("sk-ant-abcdefghijkl"));
        assert!(rendered.contains("sk-a…ijkl"));
    }

    #[test]
    fn unparseable_provider_falls_back_to_default() {
        let resolved = resolve_from(&env(&[("PUSH_PROVIDER", "not-a-provider")]), &ConfigFile::default());
        assert_eq!(resolved.provider, Provider::Claude);
    }
}
