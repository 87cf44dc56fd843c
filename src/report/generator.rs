use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::{ProviderKind, ReportSettings};
use crate::models::{
    CreditAssessment, CreditScoreError, Grade, ReportResult, Result, ScoreResult, FALLBACK_PROVIDER,
};
use crate::report::bedrock::BedrockProvider;
use crate::report::fallback::{fallback_narrative, format_value, no_history_narrative};
use crate::report::openrouter::OpenRouterProvider;
use crate::report::provider::{LlmProvider, ProviderError, ProviderHandle};
use crate::report::template::PromptTemplate;
use crate::resilience::{retry_with_backoff, RetryConfig};

/// Progress of one report generation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportState {
    Pending,
    Trying { provider: String, attempt: u32 },
    Success { provider: String },
    Fallback,
}

/// Produces a narrative report, falling through an ordered provider list
/// and finally to a deterministic narrative.
pub struct ReportGenerator {
    providers: Vec<ProviderHandle>,
    retry: RetryConfig,
    call_timeout: Duration,
    template: PromptTemplate,
    top_features: usize,
    score_range: (f64, f64),
}

impl ReportGenerator {
    pub fn new(
        providers: Vec<ProviderHandle>,
        settings: &ReportSettings,
        template: PromptTemplate,
        score_range: (f64, f64),
    ) -> Self {
        Self {
            providers,
            retry: settings.retry.clone(),
            call_timeout: Duration::from_secs(settings.call_timeout_secs),
            template,
            top_features: settings.top_features,
            score_range,
        }
    }

    /// Builds the configured HTTP providers and loads the prompt template.
    pub fn from_settings(settings: &ReportSettings, score_range: (f64, f64)) -> Result<Self> {
        let mut providers = Vec::with_capacity(settings.providers.len());
        for provider in &settings.providers {
            let backend: Arc<dyn LlmProvider> = match provider.kind {
                ProviderKind::OpenRouter => Arc::new(OpenRouterProvider::new(provider, settings)?),
                ProviderKind::Bedrock => Arc::new(BedrockProvider::new(provider, settings)?),
            };
            providers.push(ProviderHandle::new(provider.name.clone(), backend));
        }

        let template = match &settings.template_path {
            Some(path) => PromptTemplate::load(path)?,
            None => PromptTemplate::default(),
        };
        let generator = Self::new(providers, settings, template, score_range);
        generator.check_template()?;
        Ok(generator)
    }

    /// Renders the template once against placeholder values, so a template
    /// naming an unknown variable fails at setup instead of per report.
    pub fn check_template(&self) -> Result<()> {
        let sample = ScoreResult {
            score: self.score_range.0,
            offset: 0.0,
            contributions: Vec::new(),
        };
        let variables = self.variables("0x0000000000000000000000000000000000000000", &sample, Grade::VeryHighRisk);
        self.template
            .render(&variables)
            .map(|_| ())
            .map_err(|e| CreditScoreError::Config(format!("prompt template: {}", e)))
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }

    /// Report for a scored wallet. A wallet with no transactions gets the
    /// deterministic narrative without consulting any provider.
    pub async fn report_for(&self, assessment: &CreditAssessment) -> Result<ReportResult> {
        if assessment.transaction_count == 0 {
            info!("No transaction history for {}, skipping providers", assessment.address);
            return Ok(ReportResult {
                narrative: no_history_narrative(&assessment.address, &assessment.score, assessment.grade),
                provider_used: FALLBACK_PROVIDER.to_string(),
                generated_at: Utc::now(),
            });
        }
        self.generate(&assessment.address, &assessment.score, assessment.grade)
            .await
    }

    /// Fails only when the prompt template cannot be rendered. Provider
    /// failures end in the fallback narrative.
    pub async fn generate(&self, address: &str, score: &ScoreResult, grade: Grade) -> Result<ReportResult> {
        let rendered = self.template.render(&self.variables(address, score, grade))?;
        let prompt = rendered.as_str();

        let mut state = ReportState::Pending;
        for handle in &self.providers {
            let outcome = retry_with_backoff(
                &self.retry,
                &handle.name,
                ProviderError::is_transient,
                |attempt| {
                    transition(
                        &mut state,
                        ReportState::Trying {
                            provider: handle.name.clone(),
                            attempt,
                        },
                    );
                    self.call(handle, prompt)
                },
            )
            .await;

            match outcome {
                Ok(narrative) => {
                    transition(
                        &mut state,
                        ReportState::Success {
                            provider: handle.name.clone(),
                        },
                    );
                    info!("Report for {} generated by {}", address, handle.name);
                    return Ok(ReportResult {
                        narrative,
                        provider_used: handle.name.clone(),
                        generated_at: Utc::now(),
                    });
                }
                Err(e) => warn!("Provider {} gave up for {}: {}", handle.name, address, e),
            }
        }

        transition(&mut state, ReportState::Fallback);
        warn!("All report providers failed for {}, using fallback narrative", address);
        Ok(ReportResult {
            narrative: fallback_narrative(address, score, grade, self.top_features),
            provider_used: FALLBACK_PROVIDER.to_string(),
            generated_at: Utc::now(),
        })
    }

    async fn call(&self, handle: &ProviderHandle, prompt: &str) -> std::result::Result<String, ProviderError> {
        let completion = tokio::time::timeout(
            self.call_timeout,
            handle.provider.complete(prompt, self.call_timeout),
        )
        .await
        .map_err(|_| ProviderError::Timeout)??;

        if completion.trim().is_empty() {
            return Err(ProviderError::InvalidResponse("empty completion".to_string()));
        }
        Ok(completion)
    }

    fn variables(&self, address: &str, score: &ScoreResult, grade: Grade) -> HashMap<&'static str, String> {
        let mut top_features = String::new();
        for c in score.top_contributions(self.top_features) {
            let _ = writeln!(
                top_features,
                "- {}: {} ({:+.1} points)",
                c.feature,
                format_value(c.value),
                c.contribution
            );
        }

        let mut feature_table = String::from("| feature | value | points |\n|---|---|---|\n");
        for c in &score.contributions {
            let _ = writeln!(
                feature_table,
                "| {} | {} | {:.1} |",
                c.feature,
                format_value(c.value),
                c.contribution
            );
        }

        HashMap::from([
            ("address", address.to_string()),
            ("score", format!("{:.0}", score.score)),
            ("grade", grade.index().to_string()),
            ("grade_label", grade.label().to_string()),
            ("rating", grade.rating().to_string()),
            ("expected_bad_rate", format!("{:.1}%", grade.expected_bad_rate())),
            ("score_min", format!("{:.0}", self.score_range.0)),
            ("score_max", format!("{:.0}", self.score_range.1)),
            ("top_features", top_features),
            ("feature_table", feature_table),
        ])
    }
}

fn transition(state: &mut ReportState, next: ReportState) {
    debug!("Report state {:?} -> {:?}", state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::models::FeatureContribution;
    use crate::report::provider::MockLlmProvider;
    use async_trait::async_trait;

    fn settings() -> ReportSettings {
        let mut settings = Settings::default().report;
        settings.retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        settings.call_timeout_secs = 5;
        settings
    }

    fn score() -> ScoreResult {
        ScoreResult {
            score: 655.0,
            offset: 0.0,
            contributions: vec![FeatureContribution {
                feature: "tx_count_6m".to_string(),
                value: 6.0,
                contribution: 131.0,
            }],
        }
    }

    fn generator(providers: Vec<(&str, MockLlmProvider)>) -> ReportGenerator {
        let handles = providers
            .into_iter()
            .map(|(name, mock)| ProviderHandle::new(name, Arc::new(mock) as Arc<dyn LlmProvider>))
            .collect();
        ReportGenerator::new(handles, &settings(), PromptTemplate::default(), (300.0, 850.0))
    }

    fn failing(error: ProviderError, times: usize) -> MockLlmProvider {
        let mut mock = MockLlmProvider::new();
        mock.expect_complete()
            .times(times)
            .returning(move |_, _| Err(error.clone()));
        mock
    }

    fn succeeding(text: &'static str) -> MockLlmProvider {
        let mut mock = MockLlmProvider::new();
        mock.expect_complete()
            .times(1)
            .returning(move |_, _| Ok(text.to_string()));
        mock
    }

    #[tokio::test]
    async fn test_first_provider_success() {
        let mut primary = MockLlmProvider::new();
        primary
            .expect_complete()
            .withf(|prompt, _| prompt.contains("0xabc") && prompt.contains("655"))
            .times(1)
            .returning(|_, _| Ok("# Report".to_string()));
        let generator = generator(vec![("primary", primary), ("secondary", MockLlmProvider::new())]);

        let report = generator.generate("0xabc", &score(), Grade::VeryLowRisk).await.unwrap();
        assert_eq!(report.provider_used, "primary");
        assert_eq!(report.narrative, "# Report");
    }

    #[tokio::test]
    async fn test_transient_errors_retry_then_fall_through() {
        let generator = generator(vec![
            ("primary", failing(ProviderError::Server { status: 503 }, 3)),
            ("secondary", succeeding("from secondary")),
        ]);

        let report = generator.generate("0xabc", &score(), Grade::VeryLowRisk).await.unwrap();
        assert_eq!(report.provider_used, "secondary");
    }

    #[tokio::test]
    async fn test_non_transient_error_skips_retries() {
        let generator = generator(vec![
            ("primary", failing(ProviderError::Auth { status: 401 }, 1)),
            ("secondary", succeeding("ok")),
        ]);

        let report = generator.generate("0xabc", &score(), Grade::VeryLowRisk).await.unwrap();
        assert_eq!(report.provider_used, "secondary");
    }

    #[tokio::test]
    async fn test_all_providers_fail_uses_fallback() {
        let generator = generator(vec![
            ("primary", failing(ProviderError::RateLimited, 3)),
            ("secondary", failing(ProviderError::BadRequest { status: 400 }, 1)),
        ]);

        let report = generator.generate("0xabc", &score(), Grade::VeryLowRisk).await.unwrap();
        assert!(report.is_fallback());
        assert_eq!(report.provider_used, FALLBACK_PROVIDER);
        assert!(report.narrative.contains("0xabc"));
        assert!(report.narrative.contains("tx_count_6m"));
    }

    #[tokio::test]
    async fn test_no_providers_uses_fallback() {
        let generator = generator(vec![]);
        let report = generator.generate("0xabc", &score(), Grade::LowRisk).await.unwrap();
        assert!(report.is_fallback());
    }

    #[tokio::test]
    async fn test_blank_completion_is_rejected() {
        let generator = generator(vec![
            ("primary", succeeding("   \n")),
            ("secondary", succeeding("real report")),
        ]);

        let report = generator.generate("0xabc", &score(), Grade::VeryLowRisk).await.unwrap();
        assert_eq!(report.provider_used, "secondary");
        assert_eq!(report.narrative, "real report");
    }

    struct StalledProvider;

    #[async_trait]
    impl LlmProvider for StalledProvider {
        async fn complete(&self, _prompt: &str, _timeout: Duration) -> std::result::Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_provider_times_out() {
        let handles = vec![
            ProviderHandle::new("stalled", Arc::new(StalledProvider) as Arc<dyn LlmProvider>),
            ProviderHandle::new("backup", Arc::new(succeeding("backup report")) as Arc<dyn LlmProvider>),
        ];
        let generator = ReportGenerator::new(handles, &settings(), PromptTemplate::default(), (300.0, 850.0));

        let report = generator.generate("0xabc", &score(), Grade::VeryLowRisk).await.unwrap();
        assert_eq!(report.provider_used, "backup");
    }

    #[tokio::test]
    async fn test_template_error_propagates() {
        let handles = vec![ProviderHandle::new(
            "unused",
            Arc::new(MockLlmProvider::new()) as Arc<dyn LlmProvider>,
        )];
        let template = PromptTemplate::new("{{address}} {{horoscope}}");
        let generator = ReportGenerator::new(handles, &settings(), template, (300.0, 850.0));

        let err = generator.generate("0xabc", &score(), Grade::LowRisk).await.unwrap_err();
        assert!(matches!(err, CreditScoreError::Template(_)));
    }

    #[test]
    fn test_variables_cover_default_template() {
        let generator = generator(vec![]);
        let vars = generator.variables("0xabc", &score(), Grade::VeryLowRisk);
        assert_eq!(vars["grade"], "2");
        assert_eq!(vars["expected_bad_rate"], "1.7%");
        assert_eq!(vars["score_min"], "300");
        assert!(vars["top_features"].contains("tx_count_6m: 6 (+131.0 points)"));
        assert!(vars["feature_table"].contains("| tx_count_6m | 6 | 131.0 |"));
    }

    fn assessment(transaction_count: usize) -> CreditAssessment {
        CreditAssessment {
            address: "0xabc".to_string(),
            score: score(),
            grade: Grade::VeryLowRisk,
            transaction_count,
            assessed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_empty_history_skips_providers() {
        let mut primary = MockLlmProvider::new();
        primary.expect_complete().times(0);
        let generator = generator(vec![("primary", primary)]);

        let report = generator.report_for(&assessment(0)).await.unwrap();
        assert!(report.is_fallback());
        assert!(report.narrative.contains("No transaction history found"));
        assert!(report.narrative.contains("0xabc"));
    }

    #[tokio::test]
    async fn test_report_for_active_wallet_uses_provider() {
        let generator = generator(vec![("primary", succeeding("# Report"))]);

        let report = generator.report_for(&assessment(4)).await.unwrap();
        assert_eq!(report.provider_used, "primary");
    }

    #[test]
    fn test_template_checked_at_setup() {
        assert!(generator(vec![]).check_template().is_ok());

        let template = PromptTemplate::new("{{address}} {{horoscope}}");
        let generator = ReportGenerator::new(vec![], &settings(), template, (300.0, 850.0));
        let err = generator.check_template().unwrap_err();
        assert!(matches!(err, CreditScoreError::Config(ref msg) if msg.contains("horoscope")));
    }

    #[test]
    fn test_from_settings_rejects_bad_template_file() {
        let path = std::env::temp_dir().join(format!("credit-template-{}.md", std::process::id()));
        std::fs::write(&path, "Score {{score}} for {{wallet_nickname}}").unwrap();
        let mut report_settings = settings();
        report_settings.providers.clear();
        report_settings.template_path = Some(path.to_string_lossy().into_owned());

        let result = ReportGenerator::from_settings(&report_settings, (300.0, 850.0));
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(CreditScoreError::Config(_))));
    }
}
