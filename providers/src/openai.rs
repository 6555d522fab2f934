//! OpenAI Responses API adapter: `response.output_text.delta`/
//! `response.reasoning_summary_text.delta` frames, and native tool calls
//! via `response.function_call_arguments.delta`, coalesced by `item_id`
//! rather than a numeric index.

use push_types::Message;
use serde_json::{Value, json};

use crate::retry::{RetryConfig, send_with_retry};
use crate::{
    ApiConfig, CancelToken, MAX_SSE_BUFFER_BYTES, OutputLimits, StreamEvent, ToolCallAccumulator,
    drain_next_sse_event, extract_sse_data, http_client, http_client_with_timeout,
    read_capped_error_body,
};

/// System-level authority is reserved for OpenAI's own runtime injections;
/// API callers operate at "developer" level per the Model Spec hierarchy.
fn openai_role(msg: &Message) -> &'static str {
    match msg {
        Message::System(_) => "developer",
        Message::User(_) => "user",
        Message::Assistant(_) => "assistant",
        Message::ToolResult(_) => "user",
    }
}

fn build_request_body(
    model: &str,
    messages: &[Message],
    limits: OutputLimits,
    system_prompt: Option<&str>,
) -> Value {
    let input_items: Vec<Value> = messages
        .iter()
        .map(|msg| json!({ "role": openai_role(msg), "content": msg.content() }))
        .collect();

    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(model));
    body.insert("input".into(), Value::Array(input_items));
    body.insert("max_output_tokens".into(), json!(limits.max_output_tokens()));
    body.insert("stream".into(), json!(true));
    if let Some(prompt) = system_prompt
        && !prompt.trim().is_empty()
    {
        body.insert("instructions".into(), json!(prompt));
    }
    if limits.thinking_budget().is_some() {
        body.insert("reasoning".into(), json!({ "effort": "high", "summary": "auto" }));
    }
    Value::Object(body)
}

fn extract_error_message(payload: &Value) -> Option<String> {
    payload
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
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
                .header("Authorization", format!("Bearer {api_key}"))
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
    let mut call_names: std::collections::BTreeMap<String, String> = Default::default();

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
                "response.output_item.added" => {
                    let item = &json["item"];
                    if item["type"] == "function_call"
                        && let (Some(id), Some(name)) = (item["call_id"].as_str(), item["name"].as_str())
                    {
                        call_names.insert(id.to_string(), name.to_string());
                    }
                }
                "response.output_text.delta" | "response.refusal.delta" => {
                    if let Some(delta) = json["delta"].as_str() {
                        on_event(StreamEvent::TextDelta(delta.to_string()));
                    }
                }
                "response.reasoning_summary_text.delta" => {
                    if let Some(delta) = json["delta"].as_str() {
                        on_event(StreamEvent::ThinkingDelta(delta.to_string()));
                    }
                }
                "response.function_call_arguments.delta" => {
                    if let (Some(call_id), Some(delta)) =
                        (json["call_id"].as_str(), json["delta"].as_str())
                    {
                        let name = call_names.get(call_id).map(String::as_str);
                        accumulator.push(call_id, name, delta);
                        on_event(StreamEvent::ToolCallDelta {
                            key: call_id.to_string(),
                            name: name.map(str::to_string),
                            args_fragment: delta.to_string(),
                        });
                    }
                }
                "response.completed" => {
                    on_event(StreamEvent::Done(accumulator.finish()));
                    return Ok(());
                }
                "response.incomplete" => {
                    let reason = json["response"]["incomplete_details"]["reason"]
                        .as_str()
                        .unwrap_or("response incomplete")
                        .to_string();
                    on_event(StreamEvent::Error(reason));
                    return Ok(());
                }
                "response.failed" | "error" => {
                    let message = extract_error_message(&json).unwrap_or_else(|| "response failed".into());
                    on_event(StreamEvent::Error(message));
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
    let response = client
        .get("https://api.openai.com/v1/models")
        .header("Authorization", format!("Bearer {}", config.api_key()))
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
