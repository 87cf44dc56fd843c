use std::path::Path;

use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};

use crate::features::ExtractorSettings;
use crate::resilience::RetryConfig;
use crate::scoring::{GradingSettings, ScoringWeights};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub app: AppSettings,
    pub scoring: ScoringWeights,
    pub grading: GradingSettings,
    pub extractor: ExtractorSettings,
    pub report: ReportSettings,
    pub cache: CacheSettings,
    pub gateway: GatewaySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppSettings {
    pub name: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenRouter,
    Bedrock,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSettings {
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Overrides the provider's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// AWS region, Bedrock only.
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSettings {
    /// Tried in order; the deterministic fallback follows the last one.
    pub providers: Vec<ProviderSettings>,
    pub retry: RetryConfig,
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub template_path: Option<String>,
    pub top_features: usize,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySettings {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub chain_id: u64,
    pub page_size: usize,
    pub max_pages: usize,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app: AppSettings {
                name: "Wallet Credit Scorer".to_string(),
                log_level: "info".to_string(),
            },
            scoring: ScoringWeights::default(),
            grading: GradingSettings::default(),
            extractor: ExtractorSettings::default(),
            report: ReportSettings {
                providers: vec![
                    ProviderSettings {
                        name: "openrouter".to_string(),
                        kind: ProviderKind::OpenRouter,
                        model: "anthropic/claude-3.5-sonnet".to_string(),
                        api_key: None,
                        base_url: None,
                        region: None,
                    },
                    ProviderSettings {
                        name: "bedrock".to_string(),
                        kind: ProviderKind::Bedrock,
                        model: "amazon.nova-pro-v1:0".to_string(),
                        api_key: None,
                        base_url: None,
                        region: Some("ap-southeast-2".to_string()),
                    },
                ],
                retry: RetryConfig::default(),
                call_timeout_secs: 60,
                template_path: None,
                top_features: 5,
                temperature: 0.7,
                max_tokens: 2000,
            },
            cache: CacheSettings {
                enabled: true,
                ttl_seconds: 900, // 15 minutes
                max_entries: 10_000,
            },
            gateway: GatewaySettings {
                base_url: "https://api.etherscan.io/v2/api".to_string(),
                api_key: None,
                chain_id: 1,
                page_size: 1000,
                max_pages: 10,
                timeout_secs: 30,
                retry: RetryConfig::default(),
            },
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(environment())
            .build()?;

        s.try_deserialize()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        s.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        self.scoring.validate().map_err(|e| format!("scoring: {}", e))?;
        self.extractor.validate().map_err(|e| format!("extractor: {}", e))?;
        self.report.retry.validate().map_err(|e| format!("report.retry: {}", e))?;
        self.gateway.retry.validate().map_err(|e| format!("gateway.retry: {}", e))?;

        if self.grading.thresholds.iter().any(|t| {
            *t <= self.scoring.min_score || *t > self.scoring.max_score
        }) {
            return Err("grading thresholds must lie inside the score range".to_string());
        }
        if self.report.call_timeout_secs == 0 {
            return Err("report.call_timeout_secs must be positive".to_string());
        }
        if let Some(dup) = self.report.providers.iter().enumerate().find_map(|(i, p)| {
            self.report.providers[..i]
                .iter()
                .any(|q| q.name == p.name)
                .then_some(&p.name)
        }) {
            return Err(format!("duplicate provider name {}", dup));
        }
        if self
            .report
            .providers
            .iter()
            .any(|p| p.kind == ProviderKind::Bedrock && p.region.is_none() && p.base_url.is_none())
        {
            return Err("bedrock providers need a region or base_url".to_string());
        }
        if self.cache.enabled && (self.cache.ttl_seconds == 0 || self.cache.max_entries == 0) {
            return Err("cache ttl_seconds and max_entries must be positive".to_string());
        }
        if self.gateway.page_size == 0 || self.gateway.max_pages == 0 {
            return Err("gateway page_size and max_pages must be positive".to_string());
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("CREDIT_SCORE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
