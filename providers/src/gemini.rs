//! Gemini generative-content adapter.
//!
//! The one outlier among the three: a distinct request/response shape
//! (`contents`/`parts` rather than a flat `messages` array), `?key=` query
//! auth instead of a bearer header, and `listModels` against its own
//! `/models` endpoint. Also the only adapter with a native search-grounding
//! tool, used as `web_search`'s provider-native fallback.

use push_types::Message;
use serde_json::{Value, json};

use crate::retry::{RetryConfig, send_with_retry};
use crate::{
    ApiConfig, CancelToken, MAX_SSE_BUFFER_BYTES, OutputLimits, StreamEvent, ToolCallAccumulator,
    drain_next_sse_event, extract_sse_data, http_client, http_client_with_timeout,
    read_capped_error_body,
};

fn text_part(text: &str) -> Value {
    json!({ "text": text })
}

fn build_request_body(messages: &[Message], limits: OutputLimits, system_prompt: Option<&str>) -> Value {
    let contents: Vec<Value> = messages
        .iter()
        .map(|msg| {
            let role = match msg {
                Message::Assistant(_) => "model",
                _ => "user",
            };
            json!({ "role": role, "parts": [text_part(msg.content())] })
        })
        .collect();

    let mut body = serde_json::Map::new();
    body.insert("contents".into(), Value::Array(contents));
    if let Some(prompt) = system_prompt
        && !prompt.trim().is_empty()
    {
        body.insert(
            "system_instruction".into(),
            json!({ "parts": [text_part(prompt)] }),
        );
    }

    let mut generation_config = serde_json::Map::new();
    generation_config.insert("maxOutputTokens".into(), json!(limits.max_output_tokens()));
    if let Some(budget) = limits.thinking_budget() {
        generation_config.insert(
            "thinkingConfig".into(),
            json!({ "thinkingBudget": budget, "includeThoughts": true }),
        );
    }
    body.insert("generationConfig".into(), Value::Object(generation_config));
    Value::Object(body)
}

/// Gemini authenticates requests via a `?key=` query parameter rather than
/// a bearer header.
fn authed_url(base_url: &str, model: &str, api_key: &str) -> String {
    format!("{base_url}/{model}:streamGenerateContent?alt=sse&key={api_key}")
}

pub async fn stream(
    config: &ApiConfig,
    messages: &[Message],
    limits: OutputLimits,
    system_prompt: Option<&str>,
    cancel: CancelToken,
    on_event: impl Fn(StreamEvent) + Send + Sync + 'static,
) -> anyhow::Result<()> {
    let client = http_client();
    let url = authed_url(&config.base_url(), config.model().as_str(), config.api_key());
    let body = build_request_body(messages, limits, system_prompt);
    let retry_config = RetryConfig::default();

    let outcome = send_with_retry(
        || client.post(&url).header("content-type", "application/json").json(&body),
        None,
        &retry_config,
    )
    .await;

    let response = match outcome.into_response() {
        Ok(response) => response,
        Err(message) => {
            on_event(StreamEvent::Error(message));
            return Ok(());
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let error_text = read_capped_error_body(response).await;
        on_event(StreamEvent::Error(format!("API error {status}: {error_text}")));
        return Ok(());
    }

    use futures_util::StreamExt;
    let mut byte_stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut accumulator = ToolCallAccumulator::default();
    let mut call_index = 0u32;

    while let Some(chunk) = byte_stream.next().await {
        if cancel.is_cancelled() {
            on_event(StreamEvent::Cancelled);
            return Ok(());
        }
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);
        if buffer.len() > MAX_SSE_BUFFER_BYTES {
            on_event(StreamEvent::Error("SSE buffer exceeded maximum size (4 MiB)".into()));
            return Ok(());
        }

        while let Some(event) = drain_next_sse_event(&mut buffer) {
            if event.is_empty() {
                continue;
            }
            let Ok(event) = std::str::from_utf8(&event) else {
                on_event(StreamEvent::Error("received invalid UTF-8 from SSE stream".into()));
                return Ok(());
            };
            let Some(data) = extract_sse_data(event) else {
                continue;
            };
            let Ok(json) = serde_json::from_str::<Value>(&data) else {
                continue;
            };

            if let Some(message) = json["error"]["message"].as_str() {
                on_event(StreamEvent::Error(message.to_string()));
                return Ok(());
            }

            let Some(candidate) = json["candidates"][0].as_object() else {
                continue;
            };
            let finish_reason = candidate.get("finishReason").and_then(Value::as_str);
            if let Some(parts) = candidate.get("content").and_then(|c| c["parts"].as_array()) {
                for part in parts {
                    let is_thought = part["thought"].as_bool().unwrap_or(false);
                    if let Some(text) = part["text"].as_str() {
                        if is_thought {
                            on_event(StreamEvent::ThinkingDelta(text.to_string()));
                        } else {
                            on_event(StreamEvent::TextDelta(text.to_string()));
                        }
                    }
                    if let Some(call) = part.get("functionCall") {
                        let name = call["name"].as_str().unwrap_or_default().to_string();
                        let args = call["args"].clone();
                        let key = call_index.to_string();
                        call_index += 1;
                        let fragment = args.to_string();
                        accumulator.push(&key, Some(&name), &fragment);
                        on_event(StreamEvent::ToolCallDelta {
                            key,
                            name: Some(name),
                            args_fragment: fragment,
                        });
                    }
                }
            }
            if finish_reason.is_some() {
                on_event(StreamEvent::Done(accumulator.finish()));
                return Ok(());
            }
        }
    }

    on_event(StreamEvent::Error("connection closed before stream completed".into()));
    Ok(())
}

pub async fn list_models(config: &ApiConfig) -> anyhow::Result<Vec<String>> {
    let client = http_client_with_timeout(10);
    let url = format!(
        "https://generativelanguage.googleapis.com/v1beta/models?key={}",
        config.api_key()
    );
    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Ok(Vec::new());
    }
    let body: Value = response.json().await.unwrap_or(Value::Null);
    Ok(body["models"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["name"].as_str())
                .map(|name| name.trim_start_matches("models/").to_string())
                .collect()
        })
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use push_types::NonEmptyString;

    #[test]
    fn maps_assistant_to_model_role() {
        let messages = vec![
            Message::try_user("hi", std::time::SystemTime::UNIX_EPOCH).unwrap(),
            Message::assistant(
                push_types::Provider::Gemini.default_model(),
                "hello".to_string(),
                std::time::SystemTime::UNIX_EPOCH,
            ),
        ];
        let body = build_request_body(&messages, OutputLimits::new(1024), None);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"].as_str(), Some("user"));
        assert_eq!(contents[1]["role"].as_str(), Some("model"));
    }

    #[test]
    fn system_prompt_becomes_system_instruction() {
        let messages = vec![Message::system(
            NonEmptyString::new("summary").unwrap(),
            std::time::SystemTime::UNIX_EPOCH,
        )];
        let body = build_request_body(&messages, OutputLimits::new(1024), Some("prompt"));
        assert_eq!(
            body["system_instruction"]["parts"][0]["text"].as_str(),
            Some("prompt")
        );
    }

    #[test]
    fn authed_url_uses_key_query_param() {
        let url = authed_url("https://example.test/v1/models", "gemini-3.1-pro-preview", "abc123");
        assert!(url.ends_with("key=abc123"));
        assert!(url.contains("streamGenerateContent?alt=sse"));
    }
}
