use std::collections::HashSet;

use tracing::debug;

use crate::models::{CreditScoreError, FeatureContribution, FeatureName, FeatureVector, Result, ScoreResult};
use crate::scoring::weights::ScoringWeights;

/// Weighted-sum scorecard over the enumerated feature set.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    weights: ScoringWeights,
}

impl ScoringEngine {
    pub fn new(weights: ScoringWeights) -> Result<Self> {
        weights.validate().map_err(CreditScoreError::Config)?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score_range(&self) -> (f64, f64) {
        (self.weights.min_score, self.weights.max_score)
    }

    /// Scores a feature vector. Contributions are listed in enumeration order
    /// and `offset + Σ contributions` is the score before clamping.
    pub fn score(&self, features: &FeatureVector) -> Result<ScoreResult> {
        self.check_names(features)?;

        let mut contributions = Vec::with_capacity(FeatureName::COUNT);
        for name in FeatureName::ALL {
            let value = features.get(*name).unwrap_or(0.0);
            let contribution = match self.weights.get(*name) {
                Some(fw) if fw.weight != 0.0 => {
                    self.weights.scale * fw.weight * fw.transform.apply(value)
                }
                _ => 0.0,
            };
            contributions.push(FeatureContribution {
                feature: name.as_str().to_string(),
                value,
                contribution,
            });
        }

        let raw = self.weights.offset + contributions.iter().map(|c| c.contribution).sum::<f64>();
        let score = raw.clamp(self.weights.min_score, self.weights.max_score);
        if score != raw {
            debug!("Score {} clamped to {}", raw, score);
        }

        Ok(ScoreResult {
            score,
            offset: self.weights.offset,
            contributions,
        })
    }

    fn check_names(&self, features: &FeatureVector) -> Result<()> {
        let mut seen = HashSet::new();
        let mut duplicated = Vec::new();
        let mut unexpected = Vec::new();

        for feature in features.iter() {
            if feature.name.parse::<FeatureName>().is_err() {
                unexpected.push(feature.name.clone());
            } else if !seen.insert(feature.name.as_str()) && !duplicated.contains(&feature.name) {
                duplicated.push(feature.name.clone());
            }
        }
        let missing: Vec<String> = FeatureName::ALL
            .iter()
            .filter(|name| !seen.contains(name.as_str()))
            .map(|name| name.as_str().to_string())
            .collect();

        if missing.is_empty() && unexpected.is_empty() && duplicated.is_empty() {
            return Ok(());
        }
        Err(CreditScoreError::FeatureMismatch {
            missing,
            unexpected,
            duplicated,
        })
    }
}
