use serde::{Deserialize, Serialize};

use crate::models::{CreditScoreError, Grade, Result};

/// Lower bounds of grades 1 through 5. Anything below the last is grade 6.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradingSettings {
    pub thresholds: Vec<f64>,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            thresholds: vec![700.0, 653.0, 600.0, 570.0, 528.0],
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradingEngine {
    thresholds: [f64; 5],
    min_score: f64,
    max_score: f64,
}

impl GradingEngine {
    pub fn new(settings: &GradingSettings, min_score: f64, max_score: f64) -> Result<Self> {
        let thresholds: [f64; 5] = settings.thresholds.as_slice().try_into().map_err(|_| {
            CreditScoreError::Config(format!(
                "expected 5 grade thresholds, got {}",
                settings.thresholds.len()
            ))
        })?;

        if thresholds.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(CreditScoreError::Config(
                "grade thresholds must be strictly descending".to_string(),
            ));
        }
        if thresholds
            .iter()
            .any(|t| !t.is_finite() || *t <= min_score || *t > max_score)
        {
            return Err(CreditScoreError::Config(format!(
                "grade thresholds must lie within ({}, {}]",
                min_score, max_score
            )));
        }

        Ok(Self {
            thresholds,
            min_score,
            max_score,
        })
    }

    /// Maps a score to its band. Out-of-range scores are clamped first and
    /// NaN lands in the riskiest grade.
    pub fn grade(&self, score: f64) -> Grade {
        if score.is_nan() {
            return Grade::VeryHighRisk;
        }
        let score = score.clamp(self.min_score, self.max_score);
        self.thresholds
            .iter()
            .zip(Grade::ALL)
            .find(|(threshold, _)| score >= **threshold)
            .map(|(_, grade)| grade)
            .unwrap_or(Grade::VeryHighRisk)
    }

    /// Inclusive lower and exclusive upper score of a grade's band.
    pub fn band(&self, grade: Grade) -> (f64, f64) {
        let i = grade.index() as usize - 1;
        let low = self.thresholds.get(i).copied().unwrap_or(self.min_score);
        let high = if i == 0 { self.max_score } else { self.thresholds[i - 1] };
        (low, high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> GradingEngine {
        GradingEngine::new(&GradingSettings::default(), 300.0, 850.0).unwrap()
    }

    #[test]
    fn test_grade_boundaries() {
        let engine = engine();
        assert_eq!(engine.grade(700.0), Grade::UltraLowRisk);
        assert_eq!(engine.grade(699.0), Grade::VeryLowRisk);
        assert_eq!(engine.grade(653.0), Grade::VeryLowRisk);
        assert_eq!(engine.grade(652.0), Grade::LowRisk);
        assert_eq!(engine.grade(600.0), Grade::LowRisk);
        assert_eq!(engine.grade(599.99), Grade::ModerateRisk);
        assert_eq!(engine.grade(570.0), Grade::ModerateRisk);
        assert_eq!(engine.grade(528.0), Grade::HighRisk);
        assert_eq!(engine.grade(527.0), Grade::VeryHighRisk);
    }

    #[test]
    fn test_out_of_range_scores_are_clamped() {
        let engine = engine();
        assert_eq!(engine.grade(10_000.0), Grade::UltraLowRisk);
        assert_eq!(engine.grade(-5.0), Grade::VeryHighRisk);
        assert_eq!(engine.grade(f64::NAN), Grade::VeryHighRisk);
        assert_eq!(engine.grade(f64::INFINITY), Grade::UltraLowRisk);
    }

    #[test]
    fn test_grades_are_monotonic() {
        let engine = engine();
        let mut previous = engine.grade(300.0);
        for score in 300..=850 {
            let grade = engine.grade(score as f64);
            assert!(grade <= previous, "grade worsened at {}", score);
            previous = grade;
        }
    }

    #[test]
    fn test_bands() {
        let engine = engine();
        assert_eq!(engine.band(Grade::UltraLowRisk), (700.0, 850.0));
        assert_eq!(engine.band(Grade::HighRisk), (528.0, 570.0));
        assert_eq!(engine.band(Grade::VeryHighRisk), (300.0, 528.0));
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let ascending = GradingSettings {
            thresholds: vec![528.0, 570.0, 600.0, 653.0, 700.0],
        };
        assert!(GradingEngine::new(&ascending, 300.0, 850.0).is_err());

        let too_few = GradingSettings {
            thresholds: vec![700.0, 600.0],
        };
        assert!(GradingEngine::new(&too_few, 300.0, 850.0).is_err());

        assert!(GradingEngine::new(&GradingSettings::default(), 300.0, 650.0).is_err());
    }
}
