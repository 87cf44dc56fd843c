pub mod models;
pub mod config;
pub mod chains;
pub mod features;
pub mod scoring;
pub mod report;
pub mod resilience;
pub mod utils;

pub use models::{CreditAssessment, CreditScoreError, Grade, ReportResult, Result, ScoreResult};
pub use config::Settings;
pub use scoring::CreditScorer;

// Re-export commonly used types
pub use rust_decimal::Decimal;
