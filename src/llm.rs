use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::call::{retry_after_header, Failure};
use crate::research::prompts::{system_prompt, user_prompt};
use crate::research::{Draft, DraftGenerator, DraftRequest};
use crate::verify::citation_ids;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// OpenAI-compatible chat completions client.
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:1234/v1".to_string());
        let model = dotenv::var("LLM_MODEL").unwrap_or_else(|_| "qwen/qwen3-8b".to_string());
        let api_key = dotenv::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());

        // per-attempt deadlines come from the call budget
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::new(client, base_url, model, api_key))
    }

    pub fn new(
        client: reqwest::Client,
        base_url: String,
        model: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url,
            model,
            api_key,
            temperature: 0.2,
            max_tokens: 2048,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    /// One non-streaming chat completion attempt.
    pub async fn chat(&self, messages: &[Message]) -> Result<String, Failure> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| Failure::from_reqwest(&e))?;
        let status = resp.status();
        let retry_after = retry_after_header(resp.headers());
        let text = resp.text().await.map_err(|e| Failure::from_reqwest(&e))?;
        if !status.is_success() {
            return Err(Failure::from_status(status, retry_after, &text));
        }

        parse_content(&text)
    }
}

/// Pull `choices[0].message.content` out of a completion response.
fn parse_content(raw: &str) -> Result<String, Failure> {
    let json: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Failure::permanent(format!("malformed completion JSON: {}", e)))?;

    if let Some(err) = json.get("error") {
        let message = err["message"].as_str().unwrap_or("unknown error");
        return Err(Failure::transient(format!("model error: {}", message)));
    }

    let content = json["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    if content.is_empty() {
        // usually a truncated or filtered generation; another attempt may succeed
        return Err(Failure::transient("model returned an empty completion"));
    }
    Ok(strip_reasoning(&content))
}

/// Drop a leading `<think>...</think>` block emitted by reasoning models.
fn strip_reasoning(content: &str) -> String {
    match (content.find("<think>"), content.find("</think>")) {
        (Some(start), Some(end)) if start < end => {
            let mut out = String::with_capacity(content.len());
            out.push_str(&content[..start]);
            out.push_str(&content[end + "</think>".len()..]);
            out.trim().to_string()
        }
        _ => content.to_string(),
    }
}

#[async_trait]
impl DraftGenerator for LlmClient {
    async fn draft(&self, request: &DraftRequest) -> Result<Draft, Failure> {
        let messages = [
            Message::new("system", system_prompt(request.language)),
            Message::new(
                "user",
                user_prompt(&request.prompt, &request.context, request.language),
            ),
        ];
        let text = self.chat(&messages).await?;
        let citations_used = citation_ids(&text);
        debug!(
            model = %self.model,
            chars = text.len(),
            citations = citations_used.len(),
            "draft generated"
        );
        Ok(Draft {
            text,
            citations_used,
        })
    }
}
