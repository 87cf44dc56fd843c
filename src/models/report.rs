use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// `provider_used` value for narratives synthesized without an LLM.
pub const FALLBACK_PROVIDER: &str = "fallback";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportResult {
    pub narrative: String,
    pub provider_used: String,
    pub generated_at: DateTime<Utc>,
}

impl ReportResult {
    pub fn is_fallback(&self) -> bool {
        self.provider_used == FALLBACK_PROVIDER
    }
}
