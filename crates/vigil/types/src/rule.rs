//! Detection rules and their embedded test corpora.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{CaseId, RuleId};
use crate::validation::Issue;

/// Maximum rule name length accepted by downstream rule stores.
pub const MAX_NAME_LEN: usize = 100;

/// Maximum risk score on the 0-100 scale.
pub const MAX_RISK_SCORE: u8 = 100;

/// Reporting label of a test case.
///
/// The label says what the author *intended* the case to exercise. It is never
/// used to score a case; `expected_match` is the only correctness signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CaseLabel {
    #[serde(rename = "TP", alias = "TruePositive", alias = "true_positive")]
    TruePositive,
    #[serde(rename = "FN", alias = "FalseNegative", alias = "false_negative")]
    FalseNegative,
    #[serde(rename = "FP", alias = "FalsePositive", alias = "false_positive")]
    FalsePositive,
    #[serde(rename = "TN", alias = "TrueNegative", alias = "true_negative")]
    TrueNegative,
}

impl CaseLabel {
    pub const ALL: [CaseLabel; 4] = [
        CaseLabel::TruePositive,
        CaseLabel::FalseNegative,
        CaseLabel::FalsePositive,
        CaseLabel::TrueNegative,
    ];

    pub fn short(&self) -> &'static str {
        match self {
            CaseLabel::TruePositive => "TP",
            CaseLabel::FalseNegative => "FN",
            CaseLabel::FalsePositive => "FP",
            CaseLabel::TrueNegative => "TN",
        }
    }

    /// Labels describing benign activity the rule should stay silent on.
    pub fn is_benign(&self) -> bool {
        matches!(self, CaseLabel::FalsePositive | CaseLabel::TrueNegative)
    }
}

impl fmt::Display for CaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// Query language of a rule. Only Lucene query strings are validated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryLanguage {
    #[default]
    Lucene,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// One labeled log record in a rule's corpus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "CaseId::is_unassigned")]
    pub id: CaseId,
    #[serde(rename = "type")]
    pub label: CaseLabel,
    #[serde(default)]
    pub description: String,
    pub log_entry: serde_json::Value,
    pub expected_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evasion_technique: Option<String>,
}

impl TestCase {
    pub fn new(
        id: impl Into<CaseId>,
        label: CaseLabel,
        log_entry: serde_json::Value,
        expected_match: bool,
    ) -> Self {
        Self {
            id: id.into(),
            label,
            description: String::new(),
            log_entry,
            expected_match,
            evasion_technique: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_evasion(mut self, note: impl Into<String>) -> Self {
        self.evasion_technique = Some(note.into());
        self
    }

    /// Top-level keys of the log record, for feedback text.
    pub fn log_field_names(&self) -> Vec<String> {
        match &self.log_entry {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

/// Descriptive metadata carried alongside the query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_risk_score")]
    pub risk_score: u8,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub author: Vec<String>,
    #[serde(default)]
    pub false_positives: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

fn default_risk_score() -> u8 {
    47
}

impl RuleMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            severity: Severity::default(),
            risk_score: default_risk_score(),
            references: Vec::new(),
            tags: Vec::new(),
            author: Vec::new(),
            false_positives: Vec::new(),
            note: None,
        }
    }
}

/// A candidate detection rule: query, metadata and labeled corpus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRule {
    pub id: RuleId,
    pub query: String,
    #[serde(default)]
    pub language: QueryLanguage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared_fields: Vec<String>,
    #[serde(flatten)]
    pub metadata: RuleMetadata,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl DetectionRule {
    pub fn new(id: impl Into<RuleId>, name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            language: QueryLanguage::Lucene,
            declared_fields: Vec::new(),
            metadata: RuleMetadata::named(name),
            test_cases: Vec::new(),
        }
    }

    pub fn with_case(mut self, case: TestCase) -> Self {
        self.test_cases.push(case);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.metadata.severity = severity;
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Give every case without an id a positional one.
    pub fn assign_case_ids(&mut self) {
        for (index, case) in self.test_cases.iter_mut().enumerate() {
            if case.id.is_unassigned() {
                case.id = CaseId::derived(&self.id, index);
            }
        }
    }

    pub fn case(&self, id: &CaseId) -> Option<&TestCase> {
        self.test_cases.iter().find(|c| &c.id == id)
    }

    pub fn case_ids(&self) -> Vec<CaseId> {
        self.test_cases.iter().map(|c| c.id.clone()).collect()
    }

    pub fn label_counts(&self) -> BTreeMap<CaseLabel, usize> {
        let mut counts = BTreeMap::new();
        for case in &self.test_cases {
            *counts.entry(case.label).or_insert(0) += 1;
        }
        counts
    }

    /// Labels the corpus must contain before integration testing but lacks.
    pub fn missing_corpus_labels(&self) -> Vec<CaseLabel> {
        [CaseLabel::TruePositive, CaseLabel::FalseNegative]
            .into_iter()
            .filter(|label| !self.test_cases.iter().any(|c| c.label == *label))
            .collect()
    }

    /// Structural lint run ahead of syntax checking.
    pub fn lint(&self) -> Vec<Issue> {
        let mut issues = Vec::new();

        let id = self.id.as_str();
        if id.trim().is_empty() {
            issues.push(Issue::structure("id", "rule id is empty"));
        } else if id.contains(['/', '\\']) || id.contains("..") {
            issues.push(Issue::structure(
                "id",
                format!("rule id '{}' must not contain path separators or '..'", id),
            ));
        }
        if self.metadata.name.trim().is_empty() {
            issues.push(Issue::structure("name", "rule name is empty"));
        } else if self.metadata.name.chars().count() > MAX_NAME_LEN {
            issues.push(Issue::structure(
                "name",
                format!("rule name exceeds {} characters", MAX_NAME_LEN),
            ));
        }
        if self.query.trim().is_empty() {
            issues.push(Issue::structure("query", "query is empty"));
        }
        if self.metadata.risk_score > MAX_RISK_SCORE {
            issues.push(Issue::structure(
                "risk_score",
                format!(
                    "risk score {} outside 0-{}",
                    self.metadata.risk_score, MAX_RISK_SCORE
                ),
            ));
        }

        let mut seen = HashSet::new();
        for (index, case) in self.test_cases.iter().enumerate() {
            if !case.log_entry.is_object() {
                issues.push(Issue::structure(
                    format!("test_cases[{}].log_entry", index),
                    "log entry must be a JSON object",
                ));
            }
            if !case.id.is_unassigned() && !seen.insert(case.id.clone()) {
                issues.push(Issue::structure(
                    format!("test_cases[{}].id", index),
                    format!("duplicate case id '{}'", case.id),
                ));
            }
        }

        issues
    }
}
