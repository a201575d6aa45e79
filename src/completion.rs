use std::future::Future;

use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Chat-style completion boundary: one system instruction in, trimmed text out.
///
/// Errors are opaque; the retry layer only looks at whether the rendered
/// message mentions a rate limit.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Chat completions over HTTP.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(endpoint: &str, model: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            http: build_client()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

pub fn build_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(90))
        .build()?;

    Ok(client)
}

impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "system", "content": prompt }],
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let msg = resp.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(anyhow!("rate limit: {} — {}", status, msg));
            }
            return Err(anyhow!("{} — {}", status, msg));
        }

        let resp_json: Value = resp.json().await.context("completion response was not JSON")?;
        extract_content(&resp_json)
    }
}

fn extract_content(resp_json: &Value) -> Result<String> {
    let text = resp_json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| {
            anyhow!(
                "unexpected response structure; full JSON:\n{}",
                serde_json::to_string_pretty(resp_json)
                    .unwrap_or_else(|_| "<unable to serialise>".to_string())
            )
        })?;
    Ok(text.trim().to_string())
}
