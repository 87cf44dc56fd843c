use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ProviderSettings, ReportSettings};
use crate::models::{CreditScoreError, Result};
use crate::report::provider::{send_json, LlmProvider, ProviderError};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenAI-compatible chat completions, as served by OpenRouter.
pub struct OpenRouterProvider {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenRouterProvider {
    pub fn new(provider: &ProviderSettings, report: &ReportSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| CreditScoreError::Config(format!("Failed to create HTTP client: {}", e)))?;
        let base_url = provider
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');

        Ok(Self {
            http_client,
            endpoint: format!("{}/chat/completions", base_url),
            api_key: provider.api_key.clone(),
            model: provider.model.clone(),
            temperature: report.temperature,
            max_tokens: report.max_tokens,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn complete(&self, prompt: &str, timeout: Duration) -> std::result::Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut request = self.http_client.post(&self.endpoint).timeout(timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!("Requesting completion from {} ({})", self.endpoint, self.model);
        let response: ChatResponse = send_json(request).await?;
        first_choice(response)
    }
}

fn first_choice(response: ChatResponse) -> std::result::Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ProviderError::InvalidResponse("no choices in completion".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_choice_content() {
        let response: ChatResponse = serde_json::from_str(
            r##"{"id": "gen-1", "choices": [{"message": {"role": "assistant", "content": "# Report"}}]}"##,
        )
        .unwrap();
        assert_eq!(first_choice(response).unwrap(), "# Report");
    }

    #[test]
    fn test_missing_choices_is_invalid() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(first_choice(response), Err(ProviderError::InvalidResponse(_))));
    }

    #[test]
    fn test_endpoint_uses_base_url() {
        let mut settings = crate::config::Settings::default();
        settings.report.providers[0].base_url = Some("http://localhost:8080/v1/".to_string());
        let provider = OpenRouterProvider::new(&settings.report.providers[0], &settings.report).unwrap();
        assert_eq!(provider.endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(provider.max_tokens, 2000);
    }
}
