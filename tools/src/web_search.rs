//! `web_search`: Tavily-backed search with an unauthenticated DuckDuckGo
//! HTML scrape as a fallback when no Tavily key is configured.

use std::time::Duration;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{RiskClass, ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args, sanitize_output, truncate_output};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const DUCKDUCKGO_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct WebSearchConfig {
    pub tavily_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebSearchArgs {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResult {
    title: String,
    url: String,
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

async fn search_tavily(client: &reqwest::Client, api_key: &str, query: &str, max_results: usize) -> Result<Vec<SearchResult>, ToolError> {
    let body = serde_json::json!({
        "api_key": api_key,
        "query": query,
        "max_results": max_results,
    });
    let response = client
        .post(TAVILY_ENDPOINT)
        .json(&body)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
        .map_err(|e| ToolError::ExecutionFailed { tool: "web_search".to_string(), message: format!("tavily request failed: {e}") })?;

    if !response.status().is_success() {
        return Err(ToolError::ExecutionFailed { tool: "web_search".to_string(), message: format!("tavily returned HTTP {}", response.status()) });
    }

    let parsed: TavilyResponse = response
        .json()
        .await
        .map_err(|e| ToolError::ExecutionFailed { tool: "web_search".to_string(), message: format!("tavily response parse failed: {e}") })?;

    Ok(parsed
        .results
        .into_iter()
        .take(max_results)
        .map(|r| SearchResult { title: r.title, url: r.url, snippet: r.content })
        .collect())
}

async fn search_duckduckgo(client: &reqwest::Client, query: &str, max_results: usize) -> Result<Vec<SearchResult>, ToolError> {
    let response = client
        .get(DUCKDUCKGO_ENDPOINT)
        .query(&[("q", query)])
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
        .map_err(|e| ToolError::ExecutionFailed { tool: "web_search".to_string(), message: format!("duckduckgo request failed: {e}") })?;

    let body = response
        .text()
        .await
        .map_err(|e| ToolError::ExecutionFailed { tool: "web_search".to_string(), message: format!("duckduckgo response read failed: {e}") })?;

    Ok(parse_duckduckgo_html(&body, max_results))
}

fn parse_duckduckgo_html(body: &str, max_results: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(body);
    let result_selector = Selector::parse("div.result").expect("static selector");
    let title_selector = Selector::parse("a.result__a").expect("static selector");
    let snippet_selector = Selector::parse("a.result__snippet").expect("static selector");

    let mut results = Vec::new();
    for node in document.select(&result_selector) {
        if results.len() >= max_results {
            break;
        }
        let Some(title_el) = node.select(&title_selector).next() else { continue };
        let url = title_el.value().attr("href").unwrap_or_default().to_string();
        let title = title_el.text().collect::<String>().trim().to_string();
        let snippet = node.select(&snippet_selector).next().map(|el| el.text().collect::<String>().trim().to_string()).unwrap_or_default();
        if url.is_empty() || title.is_empty() {
            continue;
        }
        results.push(SearchResult { title, url, snippet });
    }
    results
}

pub struct WebSearchTool {
    config: WebSearchConfig,
    client: reqwest::Client,
}

impl WebSearchTool {
    #[must_use]
    pub fn new(config: WebSearchConfig) -> Self {
        Self { config, client: reqwest::Client::new() }
    }
}

impl ToolExecutor for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web for a query, returning titles, URLs, and snippets. Uses Tavily when an API key is configured, otherwise falls back to an unauthenticated DuckDuckGo search."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "query": { "type": "string", "minLength": 1 },
                "max_results": { "type": "integer", "minimum": 1, "maximum": 20 }
            },
            "required": ["query"]
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn risk_class(&self, _args: &Value) -> RiskClass {
        RiskClass::Net
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let args: WebSearchArgs = parse_args(args)?;
        Ok(format!("search the web for '{}'", args.query))
    }

    fn timeout(&self) -> Option<Duration> {
        Some(REQUEST_TIMEOUT)
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: WebSearchArgs = parse_args(&args)?;
            let max_results = args.max_results.unwrap_or(8).min(20);

            let results = match &self.config.tavily_api_key {
                Some(key) => search_tavily(&self.client, key, &args.query, max_results).await?,
                None => search_duckduckgo(&self.client, &args.query, max_results).await?,
            };

            let rendered = if results.is_empty() {
                "No results found.".to_string()
            } else {
                results.iter().enumerate().map(|(i, r)| format!("{}. {}\n{}\n{}", i + 1, r.title, r.url, r.snippet)).collect::<Vec<_>>().join("\n\n")
            };

            Ok(truncate_output(sanitize_output(&rendered), ctx.max_output_bytes))
        })
    }
}

/// Register the `web_search` tool, separate from [`crate::builtins::register_all`]
/// because its backend config (the Tavily key) comes from resolved user
/// config rather than the ambient [`crate::ToolSettings`].
pub fn register(registry: &mut crate::ToolRegistry, config: WebSearchConfig) -> Result<(), ToolError> {
    registry.register(Box::new(WebSearchTool::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duckduckgo_result_blocks() {
        let html = r#"
            <div class="result">
                <a class="result__a" href="https://example.com">Example Title</a>
                <a class="result__snippet">An example snippet.</a>
            </div>
        "#;
        let results = parse_duckduckgo_html(html, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Example Title");
        assert_eq!(results[0].url, "https://example.com");
    }

    #[test]
    fn caps_results_at_max() {
        let html = r#"
            <div class="result"><a class="result__a" href="https://a.com">A</a></div>
            <div class="result"><a class="result__a" href="https://b.com">B</a></div>
            <div class="result"><a class="result__a" href="https://c.com">C</a></div>
        "#;
        let results = parse_duckduckgo_html(html, 2);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn is_net_risk_class_and_requires_approval() {
        let tool = WebSearchTool::new(WebSearchConfig::default());
        assert!(matches!(tool.risk_class(&serde_json::json!({"query": "x"})), RiskClass::Net));
        assert!(tool.requires_approval());
    }
}
