//! Gemini-backed generative judge.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{JudgeError, Result};
use crate::judge::{GenerativeJudge, QueryType, RerankCandidate};
use crate::parse::{clean_generated_text, parse_index_list};
use crate::prompts::{rerank_prompt, synthetic_offering_prompt};

/// Judge backed by the Gemini `generateContent` API.
pub struct GeminiJudge {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
    model: String,
    temperature: Option<f32>,
}

impl GeminiJudge {
    /// Create a new judge, reading the API key from `GEMINI_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("GEMINI_API_KEY").ok(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            client: reqwest::Client::new(),
            model: "gemini-2.5-pro".to_string(),
            temperature: None,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Apply a per-request timeout to every call.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Check if the judge has credentials.
    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    /// Send a single-turn prompt and return the concatenated text parts.
    async fn generate(&self, prompt: &str) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or(JudgeError::NotConfigured)?;

        let mut body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });
        if let Some(temperature) = self.temperature {
            body["generationConfig"] = serde_json::json!({ "temperature": temperature });
        }

        debug!("Calling {} ({} prompt chars)", self.model, prompt.len());

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(JudgeError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(JudgeError::ApiRequest(format!("{status}: {error_text}")));
        }

        let result: GenerateResponse = response.json().await?;
        let text: String = result
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(JudgeError::EmptyOutput);
        }
        Ok(text)
    }
}

impl Default for GeminiJudge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerativeJudge for GeminiJudge {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn transform(&self, request_text: &str) -> Result<String> {
        let raw = self.generate(&synthetic_offering_prompt(request_text)).await?;
        let text = clean_generated_text(&raw);
        if text.is_empty() {
            return Err(JudgeError::EmptyOutput);
        }
        Ok(text)
    }

    async fn rerank(
        &self,
        query_text: &str,
        query_type: QueryType,
        candidates: &[RerankCandidate],
        n: usize,
    ) -> Result<Vec<usize>> {
        let prompt = rerank_prompt(query_text, query_type, candidates, n);
        let raw = self.generate(&prompt).await?;
        let indices = parse_index_list(&raw)?;
        info!(
            "Judge kept {} of {} {} candidates",
            indices.len(),
            candidates.len(),
            query_type.counterpart()
        );
        Ok(indices)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Debug, Deserialize)]
struct GenerateCandidate {
    content: Option<GenerateContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateContent {
    #[serde(default)]
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Deserialize)]
struct GeneratePart {
    text: Option<String>,
}
