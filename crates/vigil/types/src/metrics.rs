//! Confusion matrix engine.
//!
//! `expected_match` is the only correctness signal: a case's TP/FN/FP/TN label
//! is carried into outcomes for reporting but never consulted when classifying.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::CaseId;
use crate::rule::{CaseLabel, TestCase};
use crate::validation::{Issue, QualityMetric};

/// Empirical classification of one case against the index result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    TruePositive,
    FalsePositive,
    TrueNegative,
    FalseNegative,
}

impl Classification {
    pub fn classify(expected: bool, actual: bool) -> Self {
        match (expected, actual) {
            (true, true) => Classification::TruePositive,
            (true, false) => Classification::FalseNegative,
            (false, true) => Classification::FalsePositive,
            (false, false) => Classification::TrueNegative,
        }
    }

    pub fn is_correct(&self) -> bool {
        matches!(
            self,
            Classification::TruePositive | Classification::TrueNegative
        )
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::TruePositive => "TP",
            Classification::FalsePositive => "FP",
            Classification::TrueNegative => "TN",
            Classification::FalseNegative => "FN",
        };
        f.write_str(s)
    }
}

/// Per-case result kept alongside the matrix so feedback can cite cases.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub case_id: CaseId,
    pub label: CaseLabel,
    pub expected: bool,
    pub actual: bool,
    pub classification: Classification,
}

/// TP/FP/TN/FN counts over one corpus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

impl ConfusionMatrix {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a CaseOutcome>) -> Self {
        let mut cm = Self::default();
        for outcome in outcomes {
            cm.record(outcome.classification);
        }
        cm
    }

    /// Classify every case of `corpus` given the set of ids the index matched.
    ///
    /// Matched ids that are not in the corpus are ignored, so the total always
    /// equals the corpus size.
    pub fn tabulate(corpus: &[TestCase], matched: &HashSet<CaseId>) -> (Self, Vec<CaseOutcome>) {
        let outcomes: Vec<CaseOutcome> = corpus
            .iter()
            .map(|case| {
                let actual = matched.contains(&case.id);
                CaseOutcome {
                    case_id: case.id.clone(),
                    label: case.label,
                    expected: case.expected_match,
                    actual,
                    classification: Classification::classify(case.expected_match, actual),
                }
            })
            .collect();
        (Self::from_outcomes(&outcomes), outcomes)
    }

    pub fn record(&mut self, classification: Classification) {
        match classification {
            Classification::TruePositive => self.tp += 1,
            Classification::FalsePositive => self.fp += 1,
            Classification::TrueNegative => self.tn += 1,
            Classification::FalseNegative => self.fn_ += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    pub fn detections(&self) -> usize {
        self.tp + self.fp
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            precision: self.precision(),
            recall: self.recall(),
            f1: self.f1(),
            accuracy: self.accuracy(),
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TP={} FP={} TN={} FN={}",
            self.tp, self.fp, self.tn, self.fn_
        )
    }
}

/// Derived ratios of a matrix, each in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

/// Minimum precision and recall an integration test must reach.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityGates {
    pub precision_min: f64,
    pub recall_min: f64,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            precision_min: 0.80,
            recall_min: 0.70,
        }
    }
}

impl QualityGates {
    pub fn new(precision_min: f64, recall_min: f64) -> Self {
        Self {
            precision_min,
            recall_min,
        }
    }

    /// One `QualityShortfall` issue per unmet threshold.
    pub fn check(&self, cm: &ConfusionMatrix) -> Vec<Issue> {
        let mut issues = Vec::new();
        let precision = cm.precision();
        if precision < self.precision_min {
            issues.push(Issue::shortfall(
                QualityMetric::Precision,
                precision,
                self.precision_min,
            ));
        }
        let recall = cm.recall();
        if recall < self.recall_min {
            issues.push(Issue::shortfall(
                QualityMetric::Recall,
                recall,
                self.recall_min,
            ));
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn case(id: &str, label: CaseLabel, expected: bool) -> TestCase {
        TestCase::new(id, label, json!({"message": id}), expected)
    }

    #[test]
    fn classification_follows_expected_match_not_label() {
        // A TN-labelled case that is expected to match still scores as TP.
        let corpus = vec![case("a", CaseLabel::TrueNegative, true)];
        let matched: HashSet<CaseId> = [CaseId::new("a")].into_iter().collect();
        let (cm, outcomes) = ConfusionMatrix::tabulate(&corpus, &matched);
        assert_eq!(cm.tp, 1);
        assert_eq!(outcomes[0].label, CaseLabel::TrueNegative);
        assert_eq!(outcomes[0].classification, Classification::TruePositive);
    }

    #[test]
    fn vssadmin_scenario_scores_perfectly() {
        let corpus = vec![
            case("tp", CaseLabel::TruePositive, true),
            case("fn", CaseLabel::FalseNegative, false),
        ];
        let matched: HashSet<CaseId> = [CaseId::new("tp")].into_iter().collect();
        let (cm, _) = ConfusionMatrix::tabulate(&corpus, &matched);
        assert_eq!(cm.precision(), 1.0);
        assert_eq!(cm.recall(), 1.0);
        assert!(QualityGates::default().check(&cm).is_empty());
    }

    #[test]
    fn unexpected_benign_match_breaks_precision_gate() {
        let corpus = vec![
            case("tp", CaseLabel::TruePositive, true),
            case("fn", CaseLabel::FalseNegative, false),
            case("tn", CaseLabel::TrueNegative, false),
        ];
        let matched: HashSet<CaseId> = ["tp", "tn"].into_iter().map(CaseId::new).collect();
        let (cm, _) = ConfusionMatrix::tabulate(&corpus, &matched);
        assert_eq!(cm.fp, 1);
        assert_eq!(cm.precision(), 0.5);
        let issues = QualityGates::default().check(&cm);
        assert_eq!(issues.len(), 1);
        assert!(matches!(
            issues[0].cause,
            crate::IssueCause::QualityShortfall {
                metric: QualityMetric::Precision,
                ..
            }
        ));
    }

    #[test]
    fn empty_denominators_yield_zero() {
        let cm = ConfusionMatrix::default();
        assert_eq!(cm.metrics(), MetricsSnapshot::default());
        let only_tn = ConfusionMatrix {
            tn: 3,
            ..Default::default()
        };
        assert_eq!(only_tn.f1(), 0.0);
        assert_eq!(only_tn.accuracy(), 1.0);
    }

    #[test]
    fn serializes_false_negatives_as_fn() {
        let cm = ConfusionMatrix {
            tp: 1,
            fp: 0,
            tn: 2,
            fn_: 3,
        };
        let json = serde_json::to_value(cm).unwrap();
        assert_eq!(json["fn"], 3);
    }

    fn arb_corpus() -> impl Strategy<Value = Vec<(bool, bool)>> {
        prop::collection::vec((any::<bool>(), any::<bool>()), 0..40)
    }

    proptest! {
        #[test]
        fn matrix_total_equals_corpus_size(rows in arb_corpus()) {
            let corpus: Vec<TestCase> = rows
                .iter()
                .enumerate()
                .map(|(i, (expected, _))| case(&format!("c{}", i), CaseLabel::TruePositive, *expected))
                .collect();
            let matched: HashSet<CaseId> = rows
                .iter()
                .enumerate()
                .filter(|(_, (_, actual))| *actual)
                .map(|(i, _)| CaseId::new(format!("c{}", i)))
                .chain(std::iter::once(CaseId::new("not-in-corpus")))
                .collect();
            let (cm, outcomes) = ConfusionMatrix::tabulate(&corpus, &matched);
            prop_assert_eq!(cm.total(), corpus.len());
            prop_assert_eq!(outcomes.len(), corpus.len());
        }

        #[test]
        fn ratios_stay_in_unit_interval(tp in 0usize..50, fp in 0usize..50, tn in 0usize..50, fn_ in 0usize..50) {
            let cm = ConfusionMatrix { tp, fp, tn, fn_ };
            let m = cm.metrics();
            for value in [m.precision, m.recall, m.f1, m.accuracy] {
                prop_assert!((0.0..=1.0).contains(&value));
            }
            if m.precision + m.recall == 0.0 {
                prop_assert_eq!(m.f1, 0.0);
            }
        }
    }
}
