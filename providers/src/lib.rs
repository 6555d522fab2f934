//! Streaming adapters for the LLM backends the agent core talks to.
//!
//! Each adapter (`claude`, `openai`, `gemini`) exposes one streaming
//! operation over a shared HTTP client and a shared SSE framer: native
//! `tool_calls` deltas are coalesced by the provider's own index/id key and
//! surfaced as complete [`ToolCall`]s once the stream reaches its terminal
//! frame. Reasoning ("thinking") deltas are forwarded and never replayed
//! back into a later request.

pub mod retry;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use push_types::{ModelName, Provider, SecretString, ToolCall, ToolCallSource};
use serde_json::Value;

pub use push_types;

mod claude;
mod gemini;
mod openai;

/// Connection timeout for API requests.
const CONNECT_TIMEOUT_SECS: u64 = 30;
/// Maximum bytes for an SSE buffer before the stream is aborted (4 MiB);
/// bounds memory if a server never sends a frame terminator.
const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;
/// Maximum bytes read from an error body (32 KiB).
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Shared HTTP client for all provider requests: no per-request timeout
/// (streams can run for minutes), redirects disabled, HTTPS only.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::OnceLock<reqwest::Client> = std::sync::OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .https_only(true)
            .build()
            .expect("build shared HTTP client")
    })
}

/// HTTP client with a total request timeout, for the non-streaming
/// `list_models` call.
pub fn http_client_with_timeout(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .expect("build HTTP client with timeout")
}

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Extract the joined `data:` payload from one SSE frame, or `None` if the
/// frame carries no data line (a bare comment or keepalive).
fn extract_sse_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;
    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }
            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }
    found.then_some(data)
}

async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            return format!("{}...(truncated)", String::from_utf8_lossy(&body));
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Cooperative cancellation signal shared between the agent loop and an
/// in-flight stream. Checked between SSE frames; cancelling aborts the
/// request and resolves the adapter without a terminal error, per §4.3.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One event surfaced from a streaming call, matching §4.3's callback set
/// (`onToken`/`onThinkingToken`/`onToolCallDelta`/`onDone`/`onError`).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ThinkingDelta(String),
    /// A partial native tool-call argument fragment, keyed by the
    /// provider's own coalescing key (content-block index, responses-API
    /// item id). Not yet valid JSON on its own.
    ToolCallDelta { key: String, name: Option<String>, args_fragment: String },
    /// The stream reached its terminal frame; carries every native tool
    /// call coalesced and parsed over the stream's lifetime, in the order
    /// their first delta arrived.
    Done(Vec<ToolCall>),
    Error(String),
    /// The stream was aborted via [`CancelToken::cancel`]; not an error.
    Cancelled,
}

/// Resolved request credentials and target model for one streaming call.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    api_key: SecretString,
    model: ModelName,
    base_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiConfigError {
    #[error("API key provider {key:?} does not match model provider {model:?}")]
    ProviderMismatch { key: Provider, model: Provider },
}

impl ApiConfig {
    pub fn new(provider: Provider, api_key: SecretString, model: ModelName) -> Result<Self, ApiConfigError> {
        if provider != model.provider() {
            return Err(ApiConfigError::ProviderMismatch {
                key: provider,
                model: model.provider(),
            });
        }
        Ok(Self {
            api_key,
            model,
            base_url: None,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.model.provider()
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        self.api_key.expose()
    }

    #[must_use]
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider().default_base_url().to_string())
    }
}

/// Max tokens and optional reasoning budget for one turn.
#[derive(Debug, Clone, Copy)]
pub struct OutputLimits {
    max_output_tokens: u32,
    thinking_budget: Option<u32>,
}

impl OutputLimits {
    #[must_use]
    pub fn new(max_output_tokens: u32) -> Self {
        Self {
            max_output_tokens,
            thinking_budget: None,
        }
    }

    #[must_use]
    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    #[must_use]
    pub fn max_output_tokens(self) -> u32 {
        self.max_output_tokens
    }

    #[must_use]
    pub fn thinking_budget(self) -> Option<u32> {
        self.thinking_budget
    }
}

/// Accumulates native tool-call argument fragments keyed by the provider's
/// own coalescing key, preserving first-seen order, then parses each into
/// a [`ToolCall`] once the stream reaches its terminal frame.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    order: Vec<String>,
    names: BTreeMap<String, String>,
    args: BTreeMap<String, String>,
}

impl ToolCallAccumulator {
    fn push(&mut self, key: &str, name: Option<&str>, args_fragment: &str) {
        if !self.names.contains_key(key) && !self.args.contains_key(key) {
            self.order.push(key.to_string());
        }
        if let Some(name) = name {
            self.names.insert(key.to_string(), name.to_string());
        }
        self.args
            .entry(key.to_string())
            .or_default()
            .push_str(args_fragment);
    }

    fn finish(self) -> Vec<ToolCall> {
        self.order
            .into_iter()
            .filter_map(|key| {
                let name = self.names.get(&key)?.clone();
                let raw_args = self.args.get(&key).map(String::as_str).unwrap_or("{}");
                let args: Value = serde_json::from_str(raw_args).ok()?;
                let args = args.as_object()?.clone().into_iter().collect();
                Some(ToolCall::new(
                    push_types::ToolCallId::new(format!("native_{key}")),
                    name,
                    args,
                    ToolCallSource::Native,
                ))
            })
            .collect()
    }
}

/// A model name returned by `listModels`, merged with the provider's
/// curated list (curated first, discovered second, deduped).
#[must_use]
pub fn merge_with_curated(provider: Provider, discovered: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for id in provider.curated_models().iter().map(|s| s.to_string()).chain(discovered) {
        if seen.insert(id.clone()) {
            merged.push(id);
        }
    }
    merged
}

/// Dispatch a streaming chat request to the adapter matching `config`'s
/// provider.
pub async fn stream(
    config: &ApiConfig,
    messages: &[push_types::Message],
    limits: OutputLimits,
    system_prompt: Option<&str>,
    cancel: CancelToken,
    on_event: impl Fn(StreamEvent) + Send + Sync + 'static,
) -> anyhow::Result<()> {
    match config.provider() {
        Provider::Claude => claude::stream(config, messages, limits, system_prompt, cancel, on_event).await,
        Provider::OpenAI => openai::stream(config, messages, limits, system_prompt, cancel, on_event).await,
        Provider::Gemini => gemini::stream(config, messages, limits, system_prompt, cancel, on_event).await,
    }
}

/// Discover available models for `config`'s provider, merged with its
/// curated list.
pub async fn list_models(config: &ApiConfig) -> anyhow::Result<Vec<String>> {
    let discovered = match config.provider() {
        Provider::Claude => claude::list_models(config).await?,
        Provider::OpenAI => openai::list_models(config).await?,
        Provider::Gemini => gemini::list_models(config).await?,
    };
    Ok(merge_with_curated(config.provider(), discovered))
}
