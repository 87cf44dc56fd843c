use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::FeatureName;

/// Non-linear mapping applied to a raw feature value before weighting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    #[default]
    Identity,
    /// `sign(x) * ln(1 + |x|)`
    Log1p,
    Cap {
        max: f64,
    },
    /// Points of the first bin whose upper edge is greater than the value,
    /// the last bin otherwise. `values` has one more entry than `edges`.
    Bins {
        edges: Vec<f64>,
        values: Vec<f64>,
    },
}

impl Transform {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Transform::Identity => x,
            Transform::Log1p => x.signum() * x.abs().ln_1p(),
            Transform::Cap { max } => x.min(*max),
            Transform::Bins { edges, values } => {
                let bin = edges.iter().position(|edge| x < *edge).unwrap_or(edges.len());
                values.get(bin).copied().unwrap_or(0.0)
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Transform::Identity | Transform::Log1p => Ok(()),
            Transform::Cap { max } if !max.is_finite() => {
                Err(format!("cap must be finite, got {}", max))
            }
            Transform::Cap { .. } => Ok(()),
            Transform::Bins { edges, values } => {
                if values.len() != edges.len() + 1 {
                    return Err(format!(
                        "bins need {} values for {} edges, got {}",
                        edges.len() + 1,
                        edges.len(),
                        values.len()
                    ));
                }
                if edges.iter().chain(values.iter()).any(|v| !v.is_finite()) {
                    return Err("bin edges and values must be finite".to_string());
                }
                if edges.windows(2).any(|pair| pair[0] >= pair[1]) {
                    return Err("bin edges must be strictly ascending".to_string());
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureWeight {
    pub weight: f64,
    #[serde(default)]
    pub transform: Transform,
}

impl FeatureWeight {
    pub fn unused() -> Self {
        Self {
            weight: 0.0,
            transform: Transform::Identity,
        }
    }

    pub fn bins(edges: &[f64], values: &[f64]) -> Self {
        Self {
            weight: 1.0,
            transform: Transform::Bins {
                edges: edges.to_vec(),
                values: values.to_vec(),
            },
        }
    }
}

/// Scorecard configuration. `features` must name every enumerated feature
/// exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringWeights {
    pub offset: f64,
    pub scale: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub features: BTreeMap<String, FeatureWeight>,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        let mut features: BTreeMap<String, FeatureWeight> = FeatureName::ALL
            .iter()
            .map(|name| (name.as_str().to_string(), FeatureWeight::unused()))
            .collect();

        let scorecard: [(FeatureName, &[f64], &[f64]); 9] = [
            (FeatureName::AccountAgeDays, &[540.0, 1620.0], &[54.0, 57.0, 88.0]),
            (
                FeatureName::AvgTxValue,
                &[0.0006, 0.0181, 4.1449],
                &[25.0, 45.0, 64.0, 77.0],
            ),
            (FeatureName::TxCount6m, &[1.0, 3.0], &[57.0, 93.0, 131.0]),
            (FeatureName::UniqueCounterparties, &[8.0, 1881.0], &[49.0, 60.0, 78.0]),
            (
                FeatureName::ContractInteractions,
                &[2.0, 19.0, 83.0, 1974.0],
                &[36.0, 51.0, 66.0, 74.0, 84.0],
            ),
            (FeatureName::LargestOutgoingTx, &[12.8, 206.2], &[57.0, 62.0, 70.0]),
            (
                FeatureName::MonthsWithTx,
                &[18.0, 37.0, 67.0],
                &[59.0, 66.0, 68.0, 77.0],
            ),
            (
                FeatureName::TxValueSkewness,
                &[4.5473, 14.6823, 66.3151],
                &[51.0, 62.0, 67.0, 72.0],
            ),
            (
                FeatureName::ActivityCount,
                &[19.0, 2508.0, 4594.0],
                &[44.0, 59.0, 61.0, 71.0],
            ),
        ];
        for (name, edges, values) in scorecard {
            features.insert(name.as_str().to_string(), FeatureWeight::bins(edges, values));
        }

        Self {
            offset: 0.0,
            scale: 1.0,
            min_score: 300.0,
            max_score: 850.0,
            features,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), String> {
        if !self.offset.is_finite() || !self.scale.is_finite() {
            return Err("offset and scale must be finite".to_string());
        }
        if !self.min_score.is_finite()
            || !self.max_score.is_finite()
            || self.min_score >= self.max_score
        {
            return Err(format!(
                "invalid score range [{}, {}]",
                self.min_score, self.max_score
            ));
        }

        let missing: Vec<&str> = FeatureName::ALL
            .iter()
            .map(|name| name.as_str())
            .filter(|name| !self.features.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(format!("weights missing for features: {}", missing.join(", ")));
        }
        let unknown: Vec<&str> = self
            .features
            .keys()
            .map(String::as_str)
            .filter(|name| name.parse::<FeatureName>().is_err())
            .collect();
        if !unknown.is_empty() {
            return Err(format!("weights given for unknown features: {}", unknown.join(", ")));
        }

        for (name, feature) in &self.features {
            if !feature.weight.is_finite() {
                return Err(format!("weight for {} must be finite", name));
            }
            feature
                .transform
                .validate()
                .map_err(|e| format!("transform for {}: {}", name, e))?;
        }
        Ok(())
    }

    pub fn get(&self, name: FeatureName) -> Option<&FeatureWeight> {
        self.features.get(name.as_str())
    }

    /// Lowest and highest reachable unclamped score under bin transforms, or
    /// `None` if any weighted feature is unbounded.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        let mut low = self.offset;
        let mut high = self.offset;
        for feature in self.features.values() {
            if feature.weight == 0.0 {
                continue;
            }
            let Transform::Bins { values, .. } = &feature.transform else {
                return None;
            };
            let points = values.iter().map(|v| self.scale * feature.weight * v);
            low += points.clone().fold(f64::INFINITY, f64::min);
            high += points.fold(f64::NEG_INFINITY, f64::max);
        }
        Some((low, high))
    }
}
