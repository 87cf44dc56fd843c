use std::collections::HashMap;
use std::path::Path;

use crate::models::{CreditScoreError, Result};

pub const DEFAULT_TEMPLATE: &str = r#"You are a credit analyst reviewing the on-chain history of an Ethereum wallet.
Write a concise markdown credit report for the wallet below.

Wallet: {{address}}
Credit score: {{score}} (range {{score_min}} to {{score_max}})
Grade: {{grade}} - {{grade_label}} (rating {{rating}})
Expected bad rate for this grade: {{expected_bad_rate}}

Strongest score drivers:
{{top_features}}

All features:
{{feature_table}}

Structure the report with the sections: Summary, Key Strengths, Risk Factors,
Recommendation. Refer to concrete feature values. Do not invent data that is not
listed above.
"#;

/// A prompt with `{{name}}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    source: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CreditScoreError::Config(format!("Failed to read template {}: {}", path.display(), e))
        })?;
        Ok(Self::new(source))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, variables: &HashMap<&str, String>) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        let mut rest = self.source.as_str();

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];
            let end = after_open.find("}}").ok_or_else(|| {
                CreditScoreError::Template(format!(
                    "unterminated placeholder at byte {}",
                    self.source.len() - rest.len() + start
                ))
            })?;

            let name = after_open[..end].trim();
            let value = variables
                .get(name)
                .ok_or_else(|| CreditScoreError::Template(format!("no value for placeholder {{{{{}}}}}", name)))?;
            out.push_str(value);
            rest = &after_open[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let template = PromptTemplate::new("Score {{score}} for {{ address }}.");
        let rendered = template
            .render(&vars(&[("score", "612"), ("address", "0xabc")]))
            .unwrap();
        assert_eq!(rendered, "Score 612 for 0xabc.");
    }

    #[test]
    fn test_missing_variable_fails() {
        let template = PromptTemplate::new("{{score}} {{mood}}");
        let err = template.render(&vars(&[("score", "1")])).unwrap_err();
        assert_eq!(err, CreditScoreError::Template("no value for placeholder {{mood}}".to_string()));
    }

    #[test]
    fn test_unterminated_placeholder_fails() {
        let template = PromptTemplate::new("ok {{score");
        assert!(matches!(
            template.render(&vars(&[("score", "1")])),
            Err(CreditScoreError::Template(_))
        ));
    }

    #[test]
    fn test_values_are_not_reinterpreted() {
        let template = PromptTemplate::new("{{a}}");
        assert_eq!(template.render(&vars(&[("a", "{{b}}")])).unwrap(), "{{b}}");
    }

    #[test]
    fn test_default_template_uses_known_variables() {
        let names = [
            "address",
            "score",
            "grade",
            "grade_label",
            "rating",
            "expected_bad_rate",
            "score_min",
            "score_max",
            "top_features",
            "feature_table",
        ];
        let variables: HashMap<&str, String> = names.iter().map(|n| (*n, String::new())).collect();
        assert!(PromptTemplate::default().render(&variables).is_ok());
    }
}
