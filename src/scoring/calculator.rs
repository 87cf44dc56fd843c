use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::chains::{ChainDataGateway, EtherscanGateway};
use crate::config::Settings;
use crate::features::FeatureExtractor;
use crate::models::{
    CacheStats, CreditAssessment, CreditScoreError, ReportResult, Result, ResultCache, TransactionRecord,
};
use crate::report::ReportGenerator;
use crate::resilience::{retry_with_backoff, RetryConfig};
use crate::scoring::{GradingEngine, ScoringEngine};
use crate::utils::normalize_address;

/// The request-scoped stages of one enquiry: fetch, extract, score, grade.
struct Pipeline {
    gateway: Arc<dyn ChainDataGateway>,
    extractor: FeatureExtractor,
    engine: ScoringEngine,
    grading: GradingEngine,
    gateway_retry: RetryConfig,
    max_pages: usize,
}

impl Pipeline {
    async fn fetch_history(&self, address: &str) -> Result<Vec<TransactionRecord>> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..self.max_pages {
            let page = retry_with_backoff(
                &self.gateway_retry,
                "fetch_transactions",
                CreditScoreError::is_retryable,
                |_attempt| self.gateway.fetch_transactions(address, cursor.clone()),
            )
            .await?;

            records.extend(page.records);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(records),
            }
        }

        warn!(
            "Transaction history for {} truncated at {} pages",
            address, self.max_pages
        );
        Ok(records)
    }

    async fn assess(&self, address: String) -> Result<CreditAssessment> {
        let records = self.fetch_history(&address).await?;
        let assessed_at = Utc::now();

        let features = self.extractor.extract(&address, &records, assessed_at)?;
        let score = self.engine.score(&features)?;
        let grade = self.grading.grade(score.score);

        info!(
            "Assessed {}: score {:.1}, {} from {} transactions",
            address,
            score.score,
            grade,
            records.len()
        );
        Ok(CreditAssessment {
            address,
            score,
            grade,
            transaction_count: records.len(),
            assessed_at,
        })
    }
}

/// Entry point for credit enquiries and reports.
pub struct CreditScorer {
    pipeline: Arc<Pipeline>,
    reports: Arc<ReportGenerator>,
    cache: Option<ResultCache>,
}

impl CreditScorer {
    pub fn new(
        gateway: Arc<dyn ChainDataGateway>,
        reports: ReportGenerator,
        settings: &Settings,
    ) -> Result<Self> {
        settings.validate().map_err(CreditScoreError::Config)?;
        reports.check_template()?;

        let engine = ScoringEngine::new(settings.scoring.clone())?;
        let (min_score, max_score) = engine.score_range();
        let grading = GradingEngine::new(&settings.grading, min_score, max_score)?;

        let cache = settings.cache.enabled.then(|| {
            ResultCache::new(
                Duration::from_secs(settings.cache.ttl_seconds),
                settings.cache.max_entries,
            )
        });

        Ok(Self {
            pipeline: Arc::new(Pipeline {
                gateway,
                extractor: FeatureExtractor::new(settings.extractor.clone()),
                engine,
                grading,
                gateway_retry: settings.gateway.retry.clone(),
                max_pages: settings.gateway.max_pages,
            }),
            reports: Arc::new(reports),
            cache,
        })
    }

    /// Wires the Etherscan gateway and the configured report providers.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let gateway = Arc::new(EtherscanGateway::new(settings.gateway.clone())?);
        let reports = ReportGenerator::from_settings(
            &settings.report,
            (settings.scoring.min_score, settings.scoring.max_score),
        )?;
        Self::new(gateway, reports, settings)
    }

    /// Scores and grades a wallet. Concurrent enquiries for the same address
    /// share one computation when the cache is enabled.
    pub async fn enquire(&self, address: &str) -> Result<CreditAssessment> {
        let address = normalize_address(address)?;
        info!("Credit enquiry for {}", address);

        match &self.cache {
            Some(cache) => {
                let pipeline = Arc::clone(&self.pipeline);
                let key = address.clone();
                let entry = cache
                    .get_or_compute(&address, move || async move { pipeline.assess(key).await })
                    .await?;
                Ok(entry.assessment)
            }
            None => self.pipeline.assess(address).await,
        }
    }

    /// Narrative report for a wallet. Enquiry failures propagate unchanged;
    /// provider failures end in the fallback narrative. Concurrent reports
    /// for one address share a single generation when the cache is enabled.
    pub async fn report(&self, address: &str) -> Result<ReportResult> {
        let assessment = self.enquire(address).await?;

        match &self.cache {
            Some(cache) => {
                let reports = Arc::clone(&self.reports);
                let key = assessment.address.clone();
                cache
                    .get_or_generate_report(&key, move || async move { reports.report_for(&assessment).await })
                    .await
            }
            None => self.reports.report_for(&assessment).await,
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(ResultCache::stats)
    }

    pub fn grading(&self) -> &GradingEngine {
        &self.pipeline.grading
    }
}
