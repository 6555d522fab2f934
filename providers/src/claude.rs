//! Anthropic Messages API adapter: OpenAI-compatible framing is not used
//! here — Claude's own `content_block_delta` stream, `tool_use` blocks for
//! native tool calls (`input_json_delta` fragments by content index), and
//! `thinking` blocks for reasoning deltas.

use push_types::Message;
use serde_json::{Value, json};

use crate::retry::{RetryConfig, send_with_retry};
use crate::{
    ApiConfig, CancelToken, MAX_SSE_BUFFER_BYTES, OutputLimits, StreamEvent, ToolCallAccumulator,
    drain_next_sse_event, extract_sse_data, http_client, http_client_with_timeout,
    read_capped_error_body,
};

fn build_request_body(
    model: &str,
    messages: &[Message],
    limits: OutputLimits,
    system_prompt: Option<&str>,
) -> Value {
    let mut system_blocks: Vec<Value> = Vec::new();
    let mut api_messages: Vec<Value> = Vec::new();

    if let Some(prompt) = system_prompt
        && !prompt.trim().is_empty()
    {
        system_blocks.push(json!({ "type": "text", "text": prompt }));
    }

    for msg in messages {
        match msg {
            Message::System(_) => {
                system_blocks.push(json!({ "type": "text", "text": msg.content() }));
            }
            Message::User(_) => {
                api_messages.push(json!({
                    "role": "user",
                    "content": [{ "type": "text", "text": msg.content() }],
                }));
            }
            Message::Assistant(_) | Message::ToolResult(_) => {
                let role = if matches!(msg, Message::ToolResult(_)) { "user" } else { "assistant" };
                api_messages.push(json!({ "role": role, "content": msg.content() }));
            }
        }
    }

    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(model));
    body.insert("max_tokens".into(), json!(limits.max_output_tokens()));
    body.insert("stream".into(), json!(true));
    body.insert("messages".into(), json!(api_messages));
    if !system_blocks.is_empty() {
        body.insert("system".into(), json!(system_blocks));
    }
    if let Some(budget) = limits.thinking_budget() {
        body.insert(
            "thinking".into(),
            json!({ "type": "enabled", "budget_tokens": budget }),
        );
    }
    Value::Object(body)
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
    let url = config.base_url();
    let body = build_request_body(config.model().as_str(), messages, limits, system_prompt);
    let api_key = config.api_key().to_string();
    let retry_config = RetryConfig::default();

    let outcome = send_with_retry(
        || {
            client
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(&body)
        },
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
    let mut tool_use_index_names: std::collections::BTreeMap<u32, String> = Default::default();

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
            if data == "[DONE]" {
                on_event(StreamEvent::Done(accumulator.finish()));
                return Ok(());
            }
            let Ok(json) = serde_json::from_str::<Value>(&data) else {
                continue;
            };
            match json["type"].as_str().unwrap_or("") {
                "content_block_start" => {
                    let index = json["index"].as_u64().unwrap_or(0) as u32;
                    if json["content_block"]["type"] == "tool_use"
                        && let Some(name) = json["content_block"]["name"].as_str()
                    {
                        tool_use_index_names.insert(index, name.to_string());
                    }
                }
                "content_block_delta" => {
                    let index = json["index"].as_u64().unwrap_or(0) as u32;
                    match json["delta"]["type"].as_str().unwrap_or("") {
                        "text_delta" => {
                            if let Some(text) = json["delta"]["text"].as_str() {
                                on_event(StreamEvent::TextDelta(text.to_string()));
                            }
                        }
                        "thinking_delta" => {
                            if let Some(thinking) = json["delta"]["thinking"].as_str() {
                                on_event(StreamEvent::ThinkingDelta(thinking.to_string()));
                            }
                        }
                        "input_json_delta" => {
                            if let Some(partial) = json["delta"]["partial_json"].as_str() {
                                let key = index.to_string();
                                let name = tool_use_index_names.get(&index).map(String::as_str);
                                accumulator.push(&key, name, partial);
                                on_event(StreamEvent::ToolCallDelta {
                                    key,
                                    name: name.map(str::to_string),
                                    args_fragment: partial.to_string(),
                                });
                            }
                        }
                        _ => {}
                    }
                }
                "message_stop" => {
                    on_event(StreamEvent::Done(accumulator.finish()));
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    on_event(StreamEvent::Error("connection closed before stream completed".into()));
    Ok(())
}

pub async fn list_models(config: &ApiConfig) -> anyhow::Result<Vec<String>> {
    let client = http_client_with_timeout(10);
    let url = "https://api.anthropic.com/v1/models";
    let response = client
        .get(url)
        .header("x-api-key", config.api_key())
        .header("anthropic-version", "2023-06-01")
        .send()
        .await?;
    if !response.status().is_success() {
        return Ok(Vec::new());
    }
    let body: Value = response.json().await.unwrap_or(Value::Null);
    Ok(body["data"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default())
}
