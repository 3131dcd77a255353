//! Gate verdicts and machine-checkable issue causes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rule::CaseLabel;

/// Pipeline gates, in the order a rule passes through them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    SyntaxAndSchema,
    IntegrationTest,
    Judgment,
}

impl Stage {
    pub const ORDER: [Stage; 3] = [Stage::SyntaxAndSchema, Stage::IntegrationTest, Stage::Judgment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SyntaxAndSchema => "SyntaxAndSchema",
            Stage::IntegrationTest => "IntegrationTest",
            Stage::Judgment => "Judgment",
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            Stage::SyntaxAndSchema => 1,
            Stage::IntegrationTest => 2,
            Stage::Judgment => 3,
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::SyntaxAndSchema => Some(Stage::IntegrationTest),
            Stage::IntegrationTest => Some(Stage::Judgment),
            Stage::Judgment => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics a quality gate can fall short on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMetric {
    Precision,
    Recall,
    F1,
    QualityScore,
}

impl fmt::Display for QualityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityMetric::Precision => "precision",
            QualityMetric::Recall => "recall",
            QualityMetric::F1 => "f1",
            QualityMetric::QualityScore => "quality_score",
        };
        f.write_str(s)
    }
}

/// Machine-checkable cause attached to every issue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueCause {
    SyntaxError {
        token: String,
        position: usize,
    },
    UnknownField {
        field: String,
        alternatives: Vec<String>,
    },
    StructureViolation {
        field: String,
    },
    MissingCorpusLabel {
        label: CaseLabel,
    },
    QualityShortfall {
        metric: QualityMetric,
        observed: f64,
        required: f64,
    },
    JudgeFinding,
}

/// Error class of a cause, as used for budget accounting and reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Syntax,
    SchemaField,
    Structure,
    Corpus,
    QualityShortfall,
    Judgment,
}

impl IssueCause {
    pub fn class(&self) -> FailureClass {
        match self {
            IssueCause::SyntaxError { .. } => FailureClass::Syntax,
            IssueCause::UnknownField { .. } => FailureClass::SchemaField,
            IssueCause::StructureViolation { .. } => FailureClass::Structure,
            IssueCause::MissingCorpusLabel { .. } => FailureClass::Corpus,
            IssueCause::QualityShortfall { .. } => FailureClass::QualityShortfall,
            IssueCause::JudgeFinding => FailureClass::Judgment,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub cause: IssueCause,
    pub message: String,
}

impl Issue {
    pub fn new(cause: IssueCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }

    pub fn syntax(token: impl Into<String>, position: usize) -> Self {
        let token = token.into();
        let message = format!("unexpected '{}' at position {}", token, position);
        Self::new(IssueCause::SyntaxError { token, position }, message)
    }

    /// The search index refused a query the local parser accepted.
    pub fn rejected_query(query: impl Into<String>, reason: impl AsRef<str>) -> Self {
        Self::new(
            IssueCause::SyntaxError {
                token: query.into(),
                position: 0,
            },
            format!("search index rejected the query: {}", reason.as_ref()),
        )
    }

    pub fn unknown_field(field: impl Into<String>, alternatives: Vec<String>) -> Self {
        let field = field.into();
        let message = if alternatives.is_empty() {
            format!("field '{}' is not in the schema", field)
        } else {
            format!(
                "field '{}' is not in the schema; did you mean {}?",
                field,
                alternatives.join(", ")
            )
        };
        Self::new(IssueCause::UnknownField { field, alternatives }, message)
    }

    pub fn structure(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            IssueCause::StructureViolation {
                field: field.into(),
            },
            message,
        )
    }

    pub fn missing_label(label: CaseLabel) -> Self {
        Self::new(
            IssueCause::MissingCorpusLabel { label },
            format!("test corpus has no {} case", label),
        )
    }

    pub fn shortfall(metric: QualityMetric, observed: f64, required: f64) -> Self {
        Self::new(
            IssueCause::QualityShortfall {
                metric,
                observed,
                required,
            },
            format!("{} {:.2} below required {:.2}", metric, observed, required),
        )
    }

    pub fn judge(message: impl Into<String>) -> Self {
        Self::new(IssueCause::JudgeFinding, message)
    }

    pub fn class(&self) -> FailureClass {
        self.cause.class()
    }

    /// True when the issue concerns the test corpus rather than the query.
    pub fn concerns_tests(&self) -> bool {
        match &self.cause {
            IssueCause::StructureViolation { field } => field.starts_with("test_cases"),
            IssueCause::MissingCorpusLabel { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Verdict of one gate evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub stage: Stage,
    pub passed: bool,
    pub issues: Vec<Issue>,
}

impl ValidationResult {
    pub fn pass(stage: Stage) -> Self {
        Self {
            stage,
            passed: true,
            issues: Vec::new(),
        }
    }

    pub fn fail(stage: Stage, issues: Vec<Issue>) -> Self {
        Self {
            stage,
            passed: false,
            issues,
        }
    }

    /// Passes exactly when `issues` is empty.
    pub fn from_issues(stage: Stage, issues: Vec<Issue>) -> Self {
        Self {
            stage,
            passed: issues.is_empty(),
            issues,
        }
    }

    pub fn summary(&self) -> String {
        if self.passed {
            format!("{} passed", self.stage)
        } else {
            let messages: Vec<&str> = self.issues.iter().map(|i| i.message.as_str()).collect();
            format!("{} failed: {}", self.stage, messages.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_advance_in_order() {
        assert_eq!(Stage::SyntaxAndSchema.next(), Some(Stage::IntegrationTest));
        assert_eq!(Stage::Judgment.next(), None);
        assert_eq!(Stage::IntegrationTest.to_string(), "IntegrationTest");
    }

    #[test]
    fn causes_serialize_with_kind_tag() {
        let issue = Issue::unknown_field("process.cmdline", vec!["process.command_line".into()]);
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["cause"]["kind"], "unknown_field");
        assert_eq!(json["cause"]["alternatives"][0], "process.command_line");
        assert!(issue.message.contains("did you mean"));
    }

    #[test]
    fn from_issues_passes_only_when_empty() {
        assert!(ValidationResult::from_issues(Stage::Judgment, vec![]).passed);
        let failed = ValidationResult::from_issues(
            Stage::IntegrationTest,
            vec![Issue::shortfall(QualityMetric::Precision, 0.5, 0.8)],
        );
        assert!(!failed.passed);
        assert!(failed.summary().contains("precision 0.50 below required 0.80"));
    }

    #[test]
    fn test_case_issues_are_recognised() {
        assert!(Issue::structure("test_cases[0].log_entry", "bad").concerns_tests());
        assert!(!Issue::structure("name", "bad").concerns_tests());
        assert!(Issue::missing_label(CaseLabel::FalseNegative).concerns_tests());
    }
}
