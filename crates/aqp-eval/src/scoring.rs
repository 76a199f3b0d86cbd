//! Filter similarity scoring
//!
//! Comparisons are matched one-to-one between prediction and ground truth and
//! the score is `matched / max(|predicted|, |ground truth|)`, so order never
//! matters and extra or missing comparisons both cost credit.

use aqp_ir::{parse_number, Comparison, FilterExpr, Value};
use serde::{Deserialize, Serialize};

pub const DEFAULT_NUMERIC_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// Same column, operator and value (numbers compared by magnitude)
    #[default]
    Strict,
    /// Numbers within a relative tolerance; strings compared case- and
    /// whitespace-insensitively; quoted numbers accepted
    Tolerant,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub mode: ScoringMode,
    /// Relative tolerance used in tolerant mode
    pub numeric_tolerance: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            mode: ScoringMode::Strict,
            numeric_tolerance: DEFAULT_NUMERIC_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn strict() -> Self {
        Self::new(ScoringConfig::default())
    }

    pub fn tolerant(numeric_tolerance: f64) -> Self {
        Self::new(ScoringConfig {
            mode: ScoringMode::Tolerant,
            numeric_tolerance,
        })
    }

    pub fn config(&self) -> ScoringConfig {
        self.config
    }

    pub fn score(&self, predicted: &FilterExpr, ground_truth: &FilterExpr) -> f64 {
        let denominator = predicted.len().max(ground_truth.len());
        if denominator == 0 {
            return 1.0;
        }
        let matched = self.max_matching(predicted.comparisons(), ground_truth.comparisons());
        matched as f64 / denominator as f64
    }

    /// Score two textual filters. Either side failing to parse scores 0.0.
    pub fn score_text(&self, predicted: &str, ground_truth: &str) -> f64 {
        let predicted = match aqp_ast::parse_filter(predicted) {
            Ok(filter) => filter,
            Err(err) => {
                tracing::debug!(error = %err, "Predicted filter does not parse");
                return 0.0;
            }
        };
        self.score_against_text(&predicted, ground_truth)
    }

    /// Score a structured prediction against textual ground truth
    pub fn score_against_text(&self, predicted: &FilterExpr, ground_truth: &str) -> f64 {
        match aqp_ast::parse_filter(ground_truth) {
            Ok(truth) => self.score(predicted, &truth),
            Err(err) => {
                tracing::warn!(ground_truth = %ground_truth, error = %err, "Ground truth filter does not parse");
                0.0
            }
        }
    }

    // Kuhn's augmenting paths; filters are small so the quadratic cost is fine
    fn max_matching(&self, predicted: &[Comparison], truth: &[Comparison]) -> usize {
        let mut owner: Vec<Option<usize>> = vec![None; truth.len()];
        let mut matched = 0;
        for p in 0..predicted.len() {
            let mut visited = vec![false; truth.len()];
            if self.augment(p, predicted, truth, &mut owner, &mut visited) {
                matched += 1;
            }
        }
        matched
    }

    fn augment(
        &self,
        p: usize,
        predicted: &[Comparison],
        truth: &[Comparison],
        owner: &mut [Option<usize>],
        visited: &mut [bool],
    ) -> bool {
        for t in 0..truth.len() {
            if visited[t] || !self.comparisons_match(&predicted[p], &truth[t]) {
                continue;
            }
            visited[t] = true;
            let free = match owner[t] {
                None => true,
                Some(other) => self.augment(other, predicted, truth, owner, visited),
            };
            if free {
                owner[t] = Some(p);
                return true;
            }
        }
        false
    }

    pub fn comparisons_match(&self, a: &Comparison, b: &Comparison) -> bool {
        a.column == b.column && a.op == b.op && self.values_match(&a.value, &b.value)
    }

    fn values_match(&self, a: &Value, b: &Value) -> bool {
        match self.config.mode {
            ScoringMode::Strict => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            },
            ScoringMode::Tolerant => {
                if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
                    let scale = x.abs().max(y.abs());
                    return (x - y).abs() <= self.config.numeric_tolerance * scale || x == y;
                }
                match (a, b) {
                    (Value::String(x), Value::String(y)) => normalize(x) == normalize(y),
                    _ => a == b,
                }
            }
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => parse_number(s.trim()).and_then(|v| v.as_f64()),
        other => other.as_f64(),
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(text: &str) -> FilterExpr {
        aqp_ast::parse_filter(text).unwrap()
    }

    #[test]
    fn test_identical_filters_score_one() {
        let f = filter("latency_ms < 100 AND accuracy > 0.90");
        assert_eq!(Scorer::strict().score(&f, &f), 1.0);
    }

    #[test]
    fn test_order_does_not_matter() {
        let a = filter("latency_ms < 100 AND accuracy > 0.9 AND model_name contains \"gpt\"");
        let b = filter("model_name contains \"gpt\" AND accuracy > 0.9 AND latency_ms < 100");
        for scorer in [Scorer::strict(), Scorer::tolerant(0.01)] {
            assert_eq!(scorer.score(&a, &b), 1.0);
            assert_eq!(scorer.score(&b, &a), 1.0);
        }
    }

    #[test]
    fn test_numeric_formatting_ignored() {
        let scorer = Scorer::strict();
        assert_eq!(scorer.score_text("accuracy > 0.90", "accuracy > 9e-1"), 1.0);
        assert_eq!(scorer.score_text("latency_ms < 100.0", "latency_ms < 100"), 1.0);
        assert_eq!(scorer.score_text("accuracy > 90%", "accuracy > 0.9"), 1.0);
    }

    #[test]
    fn test_partial_credit() {
        let scorer = Scorer::strict();
        // one of two ground-truth comparisons
        assert_eq!(scorer.score_text("latency_ms < 100", "latency_ms < 100 AND accuracy > 0.9"), 0.5);
        // extra predicted comparison
        assert_eq!(scorer.score_text("latency_ms < 100 AND accuracy > 0.9", "latency_ms < 100"), 0.5);
        // wrong operator
        assert_eq!(scorer.score_text("latency_ms <= 100", "latency_ms < 100"), 0.0);
    }

    #[test]
    fn test_duplicates_match_one_to_one() {
        let scorer = Scorer::strict();
        assert_eq!(
            scorer.score_text("latency_ms < 100 AND latency_ms < 100", "latency_ms < 100"),
            0.5
        );
    }

    #[test]
    fn test_empty_filters() {
        let scorer = Scorer::strict();
        assert_eq!(scorer.score(&FilterExpr::empty(), &FilterExpr::empty()), 1.0);
        assert_eq!(scorer.score(&FilterExpr::empty(), &filter("a = 1")), 0.0);
    }

    #[test]
    fn test_unparsable_filters_score_zero() {
        let scorer = Scorer::strict();
        assert_eq!(scorer.score_text("latency_ms <<< 100", "latency_ms < 100"), 0.0);
        assert_eq!(scorer.score_text("latency_ms < 100", "latency_ms <"), 0.0);
    }

    #[test]
    fn test_strict_versus_tolerant() {
        let strict = Scorer::strict();
        let tolerant = Scorer::tolerant(0.01);

        assert_eq!(strict.score_text("latency_ms < 100.5", "latency_ms < 100"), 0.0);
        assert_eq!(tolerant.score_text("latency_ms < 100.5", "latency_ms < 100"), 1.0);
        assert_eq!(tolerant.score_text("latency_ms < 102", "latency_ms < 100"), 0.0);

        assert_eq!(strict.score_text("model_name = \"GPT  4o\"", "model_name = \"gpt 4o\""), 0.0);
        assert_eq!(tolerant.score_text("model_name = \"GPT  4o\"", "model_name = \"gpt 4o\""), 1.0);

        assert_eq!(strict.score_text("latency_ms < \"100\"", "latency_ms < 100"), 0.0);
        assert_eq!(tolerant.score_text("latency_ms < \"100\"", "latency_ms < 100"), 1.0);
    }

    #[test]
    fn test_tolerant_matching_finds_best_assignment() {
        // a greedy pass would pair 100.5 with 101 and strand 101.5
        let scorer = Scorer::tolerant(0.01);
        let score = scorer.score_text(
            "latency_ms < 100.5 AND latency_ms < 101.5",
            "latency_ms < 101 AND latency_ms < 100",
        );
        assert_eq!(score, 1.0);
    }
}
