use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureContribution {
    pub feature: String,
    /// Raw feature value before transformation.
    pub value: f64,
    /// Signed points this feature adds to the score.
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreResult {
    pub score: f64,
    /// Additive constant of the affine mapping; `offset + Σ contributions`
    /// reconstructs the score before clamping.
    pub offset: f64,
    pub contributions: Vec<FeatureContribution>,
}

impl ScoreResult {
    pub fn contribution(&self, feature: &str) -> Option<f64> {
        self.contributions
            .iter()
            .find(|c| c.feature == feature)
            .map(|c| c.contribution)
    }

    pub fn unclamped_score(&self) -> f64 {
        self.offset + self.contributions.iter().map(|c| c.contribution).sum::<f64>()
    }

    /// Contributions ordered by absolute size, largest first. Ties keep
    /// enumeration order.
    pub fn top_contributions(&self, n: usize) -> Vec<&FeatureContribution> {
        let mut ranked: Vec<&FeatureContribution> = self
            .contributions
            .iter()
            .filter(|c| c.contribution != 0.0)
            .collect();
        ranked.sort_by(|a, b| {
            b.contribution
                .abs()
                .partial_cmp(&a.contribution.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(n);
        ranked
    }
}

/// Six ordered risk grades; `UltraLowRisk` is the best.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Grade {
    UltraLowRisk = 1,
    VeryLowRisk = 2,
    LowRisk = 3,
    ModerateRisk = 4,
    HighRisk = 5,
    VeryHighRisk = 6,
}

impl Grade {
    pub const ALL: [Grade; 6] = [
        Grade::UltraLowRisk,
        Grade::VeryLowRisk,
        Grade::LowRisk,
        Grade::ModerateRisk,
        Grade::HighRisk,
        Grade::VeryHighRisk,
    ];

    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|g| g.index() == index)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Grade::UltraLowRisk => "Ultra Low Risk",
            Grade::VeryLowRisk => "Very Low Risk",
            Grade::LowRisk => "Low Risk",
            Grade::ModerateRisk => "Moderate Risk",
            Grade::HighRisk => "High Risk",
            Grade::VeryHighRisk => "Very High Risk",
        }
    }

    pub fn rating(&self) -> &'static str {
        match self {
            Grade::UltraLowRisk => "A++",
            Grade::VeryLowRisk => "A+",
            Grade::LowRisk => "A",
            Grade::ModerateRisk => "B",
            Grade::HighRisk => "C",
            Grade::VeryHighRisk => "C-",
        }
    }

    /// Historical bad rate for the band, in percent.
    pub fn expected_bad_rate(&self) -> f64 {
        match self {
            Grade::UltraLowRisk => 0.0,
            Grade::VeryLowRisk => 1.7,
            Grade::LowRisk => 2.7,
            Grade::ModerateRisk => 4.6,
            Grade::HighRisk => 17.3,
            Grade::VeryHighRisk => 40.4,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Grade {} ({}, {})", self.index(), self.label(), self.rating())
    }
}

/// Result of an enquiry: score, grade and the per-feature breakdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditAssessment {
    pub address: String,
    pub score: ScoreResult,
    pub grade: Grade,
    pub transaction_count: usize,
    pub assessed_at: DateTime<Utc>,
}
