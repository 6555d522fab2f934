//! Turns a raw provider stream error into the message a user actually
//! reads, distinguishing an auth failure (which gets a fix-it hint) from
//! every other kind of provider failure.

use std::fmt::Write;

use push_types::{NonEmptyString, Provider, truncate_with_ellipsis};
use serde_json::Value;

const STREAM_ERROR_BADGE: &str = "[Stream error]";

/// Provider adapters format transport failures as `"API error {status}: {body}"`;
/// split that back into its parts when present.
#[must_use]
pub fn split_api_error(raw: &str) -> Option<(String, String)> {
    let rest = raw.strip_prefix("API error ")?;
    let (status, body) = rest.split_once(": ")?;
    Some((status.trim().to_string(), body.trim().to_string()))
}

/// Dig a human-readable message out of a JSON error body, trying the
/// shapes each provider actually uses before falling back to the raw text.
pub fn extract_error_message(raw: &str) -> Option<String> {
    let body = split_api_error(raw).map_or_else(|| raw.trim().to_string(), |(_, body)| body);
    let payload: Value = serde_json::from_str(&body).ok()?;
    payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| payload.pointer("/response/error/message").and_then(Value::as_str))
        .or_else(|| payload.pointer("/message").and_then(Value::as_str))
        .or_else(|| payload.as_str())
        .map(ToString::to_string)
}

#[must_use]
pub fn is_auth_error(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    let mentions_key =
        lower.contains("api key") || lower.contains("x-api-key") || lower.contains("authorization");
    let auth_words = lower.contains("invalid")
        || lower.contains("incorrect")
        || lower.contains("missing")
        || lower.contains("unauthorized")
        || lower.contains("not provided")
        || lower.contains("authentication");
    let has_code = lower.contains("401");

    lower.contains("invalid_api_key")
        || lower.contains("you must provide an api key")
        || (mentions_key && auth_words)
        || (mentions_key && has_code)
        || (has_code && lower.contains("unauthorized"))
}

fn default_config_path() -> String {
    dirs::home_dir().map_or_else(
        || "~/.push/config.json".to_string(),
        |home| home.join(".push").join("config.json").display().to_string(),
    )
}

/// Format a stream error into the message shown to the user (never fed
/// back to the model — see `ProviderError` in the error-handling design).
#[must_use]
pub fn format_stream_error(provider: Provider, model: &str, err: &str) -> NonEmptyString {
    let trimmed = err.trim();
    let (status, body) = split_api_error(trimmed).unwrap_or_else(|| (String::new(), trimmed.to_string()));
    let extracted = extract_error_message(&body).unwrap_or_else(|| body.clone());
    let is_auth = is_auth_error(&extracted) || is_auth_error(trimmed) || is_auth_error(&status);

    if is_auth {
        let mut content = String::new();
        content.push_str(STREAM_ERROR_BADGE);
        content.push_str("\n\n");
        let _ = write!(content, "{} authentication failed for model {model}.", provider.as_str());
        content.push_str("\n\nFix:\n- Set ");
        content.push_str(provider.env_var());
        let _ = write!(content, " (env) or add it to {} under its provider entry.\n- Then retry your message.", default_config_path());

        let detail = if status.trim().is_empty() { truncate_with_ellipsis(&extracted, 160) } else { status.trim().to_string() };
        if !detail.is_empty() {
            content.push_str("\n\nDetails: ");
            content.push_str(&detail);
        }

        return NonEmptyString::new(content)
            .unwrap_or_else(|_| NonEmptyString::new(STREAM_ERROR_BADGE).expect("badge is non-empty"));
    }

    let detail = if !extracted.trim().is_empty() {
        extracted.trim().to_string()
    } else if !trimmed.is_empty() {
        trimmed.to_string()
    } else {
        "unknown error".to_string()
    };
    let detail_short = truncate_with_ellipsis(&detail, 200);

    let mut content = String::new();
    content.push_str(STREAM_ERROR_BADGE);
    content.push_str("\n\n");
    if status.trim().is_empty() {
        content.push_str("Request failed.");
    } else {
        content.push_str("Request failed (");
        content.push_str(status.trim());
        content.push_str(").");
    }
    if !detail_short.is_empty() {
        content.push_str("\n\nDetails: ");
        content.push_str(&detail_short);
    }

    NonEmptyString::new(content).unwrap_or_else(|_| NonEmptyString::new(STREAM_ERROR_BADGE).expect("badge is non-empty"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_api_error_separates_status_and_body() {
        let (status, body) = split_api_error("API error 429: {\"error\":{\"message\":\"slow down\"}}").unwrap();
        assert_eq!(status, "429");
        assert!(body.contains("slow down"));
    }

    #[test]
    fn extract_error_message_reads_nested_error_shape() {
        let msg = extract_error_message("{\"error\":{\"message\":\"bad request\"}}").unwrap();
        assert_eq!(msg, "bad request");
    }

    #[test]
    fn is_auth_error_detects_invalid_api_key_phrasing() {
        assert!(is_auth_error("Incorrect API key provided"));
        assert!(is_auth_error("401 Unauthorized"));
        assert!(!is_auth_error("internal server error"));
    }

    #[test]
    fn format_stream_error_adds_fix_it_hint_for_auth_failures() {
        let msg = format_stream_error(
            Provider::Claude,
            "claude-sonnet-4-6",
            "API error 401: {\"error\":{\"message\":\"invalid x-api-key\"}}",
        );
        assert!(msg.as_str().contains("ANTHROPIC_API_KEY"));
        assert!(msg.as_str().contains("[Stream error]"));
    }

    #[test]
    fn format_stream_error_omits_hint_for_non_auth_failures() {
        let msg = format_stream_error(Provider::OpenAI, "gpt-5.2", "API error 500: internal error");
        assert!(!msg.as_str().contains("OPENAI_API_KEY"));
        assert!(msg.as_str().contains("Request failed (500)"));
    }
}
