use std::fmt::Write;

use crate::models::{Grade, ScoreResult};

/// Deterministic markdown report used when no provider produced one.
pub fn fallback_narrative(address: &str, score: &ScoreResult, grade: Grade, top_n: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Wallet Credit Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "**Wallet Address:** `{}`", address);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Credit score **{:.0}**, {} (rating {}). Wallets in this grade have a historical bad rate of {:.1}%.",
        score.score,
        grade,
        grade.rating(),
        grade.expected_bad_rate()
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "## Main Score Drivers");
    let _ = writeln!(out);

    let top = score.top_contributions(top_n);
    if top.is_empty() {
        let _ = writeln!(out, "No feature contributed to this score.");
    }
    for c in top {
        let _ = writeln!(
            out,
            "- `{}` = {} ({:+.1} points)",
            c.feature,
            format_value(c.value),
            c.contribution
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "_Generated without a language model; narrative analysis unavailable._"
    );
    out
}

/// Fixed report for a wallet with no transactions.
pub fn no_history_narrative(address: &str, score: &ScoreResult, grade: Grade) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Wallet Credit Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "**Wallet Address:** `{}`", address);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "No transaction history found for this wallet.");
    let _ = writeln!(
        out,
        "Credit score **{:.0}**, {}. With no on-chain activity to assess, the score reflects the lowest band of every feature.",
        score.score, grade
    );
    out
}

pub(crate) fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{:.4}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureContribution;

    fn score() -> ScoreResult {
        ScoreResult {
            score: 612.0,
            offset: 0.0,
            contributions: vec![
                FeatureContribution {
                    feature: "tx_count_6m".to_string(),
                    value: 4.0,
                    contribution: 131.0,
                },
                FeatureContribution {
                    feature: "avg_tx_value".to_string(),
                    value: 0.25,
                    contribution: 64.0,
                },
                FeatureContribution {
                    feature: "recency_score".to_string(),
                    value: 0.9,
                    contribution: 0.0,
                },
            ],
        }
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let a = fallback_narrative("0xabc", &score(), Grade::LowRisk, 5);
        let b = fallback_narrative("0xabc", &score(), Grade::LowRisk, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fallback_mentions_score_grade_and_drivers() {
        let text = fallback_narrative("0xabc", &score(), Grade::LowRisk, 1);
        assert!(text.contains("`0xabc`"));
        assert!(text.contains("**612**"));
        assert!(text.contains("Grade 3"));
        assert!(text.contains("2.7%"));
        assert!(text.contains("`tx_count_6m` = 4 (+131.0 points)"));
        assert!(!text.contains("avg_tx_value"));
        assert!(!text.contains("recency_score"));
    }

    #[test]
    fn test_no_history_narrative() {
        let empty = ScoreResult {
            score: 432.0,
            offset: 0.0,
            contributions: Vec::new(),
        };
        let text = no_history_narrative("0xabc", &empty, Grade::VeryHighRisk);
        assert!(text.contains("No transaction history found"));
        assert!(text.contains("**432**"));
        assert!(text.contains("Grade 6"));
    }
}
