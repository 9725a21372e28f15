// Statistical text classifiers used by the classifier strategy.
//
// Contract: an ordered batch of strings in, one probability per string out,
// in the same order.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;

use super::tokenizer::tokenize;

const BUILTIN_WEIGHTS: &str = include_str!("../../resources/classifier_weights.txt");

/// Batch text classifier returning the probability that each text is abusive.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str {
        "classifier"
    }

    /// Score every text; the result must be parallel to `texts`.
    async fn predict(&self, texts: &[String]) -> Result<Vec<f32>>;
}

/// Linear model over lowercase word tokens with a logistic output.
#[derive(Debug, Clone)]
pub struct LexiconClassifier {
    weights: HashMap<String, f32>,
    bias: f32,
}

impl LexiconClassifier {
    pub fn new(weights: HashMap<String, f32>, bias: f32) -> Self {
        Self { weights, bias }
    }

    pub fn builtin() -> Result<Self> {
        Self::from_weights_str(BUILTIN_WEIGHTS).context("built-in classifier weights are corrupt")
    }

    /// Parse `word<TAB>weight` lines. A `bias` entry sets the intercept and
    /// `#` starts a comment line.
    pub fn from_weights_str(content: &str) -> Result<Self> {
        let mut weights = HashMap::new();
        let mut bias = 0.0;

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(word), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                bail!("line {}: expected `word weight`, got {:?}", line_no + 1, line);
            };
            let value: f32 = value
                .parse()
                .with_context(|| format!("line {}: bad weight {:?}", line_no + 1, value))?;

            if word == "bias" {
                bias = value;
            } else {
                weights.insert(word.to_lowercase(), value);
            }
        }

        Ok(Self { weights, bias })
    }

    pub fn probability(&self, text: &str) -> f32 {
        let score: f32 = tokenize(text)
            .iter()
            .filter(|t| t.is_word)
            .filter_map(|t| self.weights.get(&t.lowercase()))
            .sum::<f32>()
            + self.bias;
        1.0 / (1.0 + (-score).exp())
    }
}

#[async_trait]
impl Classifier for LexiconClassifier {
    fn name(&self) -> &str {
        "lexicon"
    }

    async fn predict(&self, texts: &[String]) -> Result<Vec<f32>> {
        Ok(texts.iter().map(|t| self.probability(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weights() {
        let model = LexiconClassifier::from_weights_str("# header\nbias\t-1.0\nZap\t3.0\n").unwrap();
        assert!(model.probability("zap") > 0.5);
        assert!(model.probability("ZAP!") > 0.5);
        assert!(model.probability("hello") < 0.5);
    }

    #[test]
    fn test_rejects_malformed_lines() {
        assert!(LexiconClassifier::from_weights_str("word").is_err());
        assert!(LexiconClassifier::from_weights_str("word notanumber").is_err());
        assert!(LexiconClassifier::from_weights_str("a 1 2").is_err());
    }

    #[tokio::test]
    async fn test_predict_is_parallel() {
        let model = LexiconClassifier::builtin().unwrap();
        let texts = vec!["have a nice day".to_string(), "you fucking idiot".to_string()];
        let probs = model.predict(&texts).await.unwrap();
        assert_eq!(probs.len(), 2);
        assert!(probs[0] < 0.5);
        assert!(probs[1] >= 0.5);
    }
}
