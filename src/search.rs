use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::call::{retry_after_header, Failure};
use crate::evidence::{SearchDepth, SearchHit, SearchProvider, SearchRequest};

/// Wrap width for HTML pages rendered to text.
const PAGE_WIDTH: usize = 120;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ResultRow>,
}

#[derive(Debug, Deserialize)]
struct ResultRow {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
}

impl From<ResultRow> for SearchHit {
    fn from(row: ResultRow) -> Self {
        SearchHit {
            title: row.title,
            url: row.url,
            snippet: row.content,
            body: row.raw_content.filter(|b| !b.trim().is_empty()),
        }
    }
}

/// Tavily-style web search API plus plain HTTP page fetching.
pub struct WebSearch {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WebSearch {
    pub fn from_env() -> Result<Self> {
        let api_key = dotenv::var("SEARCH_API_KEY").context("SEARCH_API_KEY required")?;
        let base_url = dotenv::var("SEARCH_BASE_URL")
            .unwrap_or_else(|_| "https://api.tavily.com".to_string());

        let client = reqwest::Client::builder()
            .user_agent(concat!("factloop/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/search") {
            base.to_string()
        } else {
            format!("{}/search", base)
        }
    }
}

fn request_body(request: &SearchRequest) -> serde_json::Value {
    let full = request.depth == SearchDepth::Full;
    serde_json::json!({
        "query": request.query,
        "max_results": request.limit,
        "search_depth": if full { "advanced" } else { "basic" },
        "include_raw_content": full,
    })
}

fn parse_results(raw: &str) -> Result<Vec<SearchHit>, Failure> {
    let parsed: SearchResponse = serde_json::from_str(raw)
        .map_err(|e| Failure::permanent(format!("malformed search response: {}", e)))?;
    Ok(parsed
        .results
        .into_iter()
        .filter(|r| !r.url.trim().is_empty())
        .map(SearchHit::from)
        .collect())
}

/// Render a fetched page to plain text; HTML goes through html2text.
fn page_text(content_type: &str, body: &[u8]) -> String {
    if content_type.contains("html") {
        html2text::from_read(body, PAGE_WIDTH)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).to_string())
    } else {
        String::from_utf8_lossy(body).to_string()
    }
}

#[async_trait]
impl SearchProvider for WebSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, Failure> {
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| Failure::from_reqwest(&e))?;

        let status = resp.status();
        let retry_after = retry_after_header(resp.headers());
        let text = resp.text().await.map_err(|e| Failure::from_reqwest(&e))?;
        if !status.is_success() {
            return Err(Failure::from_status(status, retry_after, &text));
        }

        let hits = parse_results(&text)?;
        debug!(query = %request.query, hits = hits.len(), depth = ?request.depth, "search returned");
        Ok(hits)
    }

    async fn fetch_page(&self, url: &str) -> Result<String, Failure> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Failure::from_reqwest(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after_header(resp.headers());
            return Err(Failure::from_status(status, retry_after, ""));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp.bytes().await.map_err(|e| Failure::from_reqwest(&e))?;

        let text = page_text(&content_type, &body);
        debug!(url, size = text.len(), "page fetched");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::FailureClass;

    #[test]
    fn test_parse_results() {
        let raw = r#"{
            "query": "sea level",
            "results": [
                {"title": "Sea report", "url": "https://a.example/sea", "content": "Sea rose", "raw_content": "Full text", "score": 0.9},
                {"title": "Snippet only", "url": "https://b.example", "content": "short", "raw_content": null},
                {"title": "Blank body", "url": "https://c.example", "content": "short", "raw_content": "   "},
                {"title": "No url", "url": "", "content": "dropped"}
            ]
        }"#;

        let hits = parse_results(raw).unwrap();

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].snippet, "Sea rose");
        assert_eq!(hits[0].body.as_deref(), Some("Full text"));
        assert!(hits[0].is_enriched());
        assert!(!hits[1].is_enriched());
        assert_eq!(hits[2].body, None);
    }

    #[test]
    fn test_malformed_response_is_permanent() {
        let err = parse_results("not json").unwrap_err();
        assert_eq!(err.class, FailureClass::Permanent);
        assert!(parse_results("{}").unwrap().is_empty());
    }

    #[test]
    fn test_request_body_follows_depth() {
        let mut request = SearchRequest {
            query: "coral latest".to_string(),
            limit: 5,
            depth: SearchDepth::Full,
        };
        let body = request_body(&request);
        assert_eq!(body["include_raw_content"], true);
        assert_eq!(body["max_results"], 5);

        request.depth = SearchDepth::SummaryOnly;
        let body = request_body(&request);
        assert_eq!(body["include_raw_content"], false);
        assert_eq!(body["search_depth"], "basic");
    }

    #[test]
    fn test_page_text_renders_html() {
        let html = b"<html><body><h1>Tides</h1><p>Sea levels rose.</p></body></html>";
        let text = page_text("text/html; charset=utf-8", html);
        assert!(text.contains("Sea levels rose."));
        assert!(!text.contains("<p>"));

        assert_eq!(page_text("text/plain", b"plain body"), "plain body");
    }
}
