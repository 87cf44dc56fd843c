pub mod weights;
pub mod engine;
pub mod grading;
pub mod calculator;

pub use weights::{FeatureWeight, ScoringWeights, Transform};
pub use engine::ScoringEngine;
pub use grading::{GradingEngine, GradingSettings};
pub use calculator::CreditScorer;
