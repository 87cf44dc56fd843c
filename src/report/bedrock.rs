use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::{ProviderSettings, ReportSettings};
use crate::models::{CreditScoreError, Result};
use crate::report::provider::{send_json, LlmProvider, ProviderError};

/// AWS Bedrock Converse API, authenticated with a Bedrock API key.
pub struct BedrockProvider {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ConverseResponse {
    output: ConverseOutput,
}

#[derive(Deserialize)]
struct ConverseOutput {
    message: ConverseMessage,
}

#[derive(Deserialize)]
struct ConverseMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl BedrockProvider {
    pub fn new(provider: &ProviderSettings, report: &ReportSettings) -> Result<Self> {
        let base_url = match (&provider.base_url, &provider.region) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Some(region)) => format!("https://bedrock-runtime.{}.amazonaws.com", region),
            (None, None) => {
                return Err(CreditScoreError::Config(format!(
                    "Bedrock provider {} needs a region",
                    provider.name
                )))
            }
        };
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| CreditScoreError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/model/{}/converse", base_url, provider.model),
            api_key: provider.api_key.clone(),
            temperature: report.temperature,
            max_tokens: report.max_tokens,
        })
    }
}

#[async_trait]
impl LlmProvider for BedrockProvider {
    async fn complete(&self, prompt: &str, timeout: Duration) -> std::result::Result<String, ProviderError> {
        let body = json!({
            "messages": [{"role": "user", "content": [{"text": prompt}]}],
            "inferenceConfig": {
                "maxTokens": self.max_tokens,
                "temperature": self.temperature,
            },
        });

        let mut request = self.http_client.post(&self.endpoint).timeout(timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!("Requesting completion from {}", self.endpoint);
        let response: ConverseResponse = send_json(request).await?;
        joined_text(response)
    }
}

fn joined_text(response: ConverseResponse) -> std::result::Result<String, ProviderError> {
    let text: Vec<String> = response
        .output
        .message
        .content
        .into_iter()
        .filter_map(|block| block.text)
        .collect();
    if text.is_empty() {
        return Err(ProviderError::InvalidResponse("no text in converse output".to_string()));
    }
    Ok(text.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_endpoint_from_region() {
        let settings = Settings::default();
        let provider = BedrockProvider::new(&settings.report.providers[1], &settings.report).unwrap();
        assert_eq!(
            provider.endpoint,
            "https://bedrock-runtime.ap-southeast-2.amazonaws.com/model/amazon.nova-pro-v1:0/converse"
        );
    }

    #[test]
    fn test_missing_region_rejected() {
        let mut settings = Settings::default();
        settings.report.providers[1].region = None;
        assert!(BedrockProvider::new(&settings.report.providers[1], &settings.report).is_err());
    }

    #[test]
    fn test_converse_text_extraction() {
        let response: ConverseResponse = serde_json::from_str(
            r#"{"output": {"message": {"role": "assistant", "content": [{"text": "Wallet looks healthy."}]}}, "stopReason": "end_turn"}"#,
        )
        .unwrap();
        assert_eq!(joined_text(response).unwrap(), "Wallet looks healthy.");

        let empty: ConverseResponse =
            serde_json::from_str(r#"{"output": {"message": {"content": []}}}"#).unwrap();
        assert!(joined_text(empty).is_err());
    }
}
