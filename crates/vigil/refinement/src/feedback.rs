//! Feedback text handed to the rule generator.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use vigil_types::{CaseOutcome, ConfusionMatrix, DetectionRule, Issue, IssueCause};

/// Cases cited per category.
pub const MAX_CITED_CASES: usize = 3;

/// Log fields listed when diagnosing a rule that matched nothing.
pub const MAX_SAMPLE_FIELDS: usize = 15;

/// Coarse reading of a confusion matrix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum Diagnosis {
    /// Nothing matched at all; usually the query names fields the logs lack.
    ZeroDetections { sample_fields: Vec<String> },
    TooStrict { missed: usize, caught: usize },
    TooBroad { unexpected: usize, caught: usize },
    Inconclusive,
}

impl Diagnosis {
    pub fn of(rule: &DetectionRule, matrix: &ConfusionMatrix) -> Self {
        if matrix.tp == 0 && matrix.fp == 0 {
            let sample = rule
                .test_cases
                .iter()
                .find(|c| c.expected_match)
                .or_else(|| rule.test_cases.first());
            let mut sample_fields = sample.map(|c| c.log_field_names()).unwrap_or_default();
            sample_fields.truncate(MAX_SAMPLE_FIELDS);
            return Diagnosis::ZeroDetections { sample_fields };
        }
        if matrix.fn_ > matrix.tp && matrix.tp > 0 {
            return Diagnosis::TooStrict {
                missed: matrix.fn_,
                caught: matrix.tp,
            };
        }
        if matrix.fp > matrix.tp && matrix.tp > 0 {
            return Diagnosis::TooBroad {
                unexpected: matrix.fp,
                caught: matrix.tp,
            };
        }
        Diagnosis::Inconclusive
    }

    pub fn describe(&self) -> Option<String> {
        match self {
            Diagnosis::ZeroDetections { sample_fields } => Some(format!(
                "The query matched no test case at all, which usually means a field name \
                 mismatch. Fields present in a sample log record: {}",
                if sample_fields.is_empty() {
                    "(none)".to_string()
                } else {
                    sample_fields.join(", ")
                }
            )),
            Diagnosis::TooStrict { missed, caught } => Some(format!(
                "The query is too strict: {} expected matches missed vs {} caught.",
                missed, caught
            )),
            Diagnosis::TooBroad { unexpected, caught } => Some(format!(
                "The query is too broad: {} unexpected matches vs {} expected.",
                unexpected, caught
            )),
            Diagnosis::Inconclusive => None,
        }
    }
}

/// Feedback for static (syntax, field, structure) failures.
pub fn issue_feedback(issues: &[Issue]) -> String {
    let mut out = String::from("Fix the following problems:\n");
    for issue in issues {
        let _ = writeln!(out, "- {}", issue.message);
        if let IssueCause::UnknownField {
            field,
            alternatives,
        } = &issue.cause
        {
            if let Some(best) = alternatives.first() {
                let _ = writeln!(out, "  replace '{}' with '{}'", field, best);
            }
        }
    }
    out
}

/// Cite up to [`MAX_CITED_CASES`] outcomes under `heading`.
pub fn cite_cases(out: &mut String, heading: &str, rule: &DetectionRule, outcomes: &[&CaseOutcome]) {
    if outcomes.is_empty() {
        return;
    }
    let _ = writeln!(out, "{} ({}):", heading, outcomes.len());
    for outcome in outcomes.iter().take(MAX_CITED_CASES) {
        let case = rule.case(&outcome.case_id);
        let description = case
            .map(|c| c.description.as_str())
            .filter(|d| !d.is_empty())
            .unwrap_or("no description");
        let fields = case.map(|c| c.log_field_names()).unwrap_or_default();
        let _ = writeln!(
            out,
            "- {} [{}]: {} (log fields: {})",
            outcome.case_id,
            outcome.label.short(),
            description,
            fields.join(", ")
        );
    }
    if outcomes.len() > MAX_CITED_CASES {
        let _ = writeln!(out, "- ... and {} more", outcomes.len() - MAX_CITED_CASES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_types::{CaseId, CaseLabel, Classification, TestCase};

    fn rule_with_cases(n: usize) -> DetectionRule {
        let mut rule = DetectionRule::new("r1", "Rule", "process.name:cmd.exe");
        for i in 0..n {
            rule = rule.with_case(
                TestCase::new(
                    "",
                    CaseLabel::TruePositive,
                    json!({"process": {"name": "cmd.exe"}, "host": {"name": format!("h{}", i)}}),
                    true,
                )
                .with_description(format!("case {}", i)),
            );
        }
        rule.assign_case_ids();
        rule
    }

    fn missed(rule: &DetectionRule) -> Vec<CaseOutcome> {
        rule.test_cases
            .iter()
            .map(|c| CaseOutcome {
                case_id: c.id.clone(),
                label: c.label,
                expected: true,
                actual: false,
                classification: Classification::FalseNegative,
            })
            .collect()
    }

    #[test]
    fn zero_detections_lists_sample_fields() {
        let rule = rule_with_cases(1);
        let matrix = ConfusionMatrix {
            fn_: 1,
            ..Default::default()
        };
        let diagnosis = Diagnosis::of(&rule, &matrix);
        match &diagnosis {
            Diagnosis::ZeroDetections { sample_fields } => {
                let mut fields = sample_fields.clone();
                fields.sort();
                assert_eq!(fields, vec!["host", "process"]);
            }
            other => panic!("unexpected diagnosis {:?}", other),
        }
        assert!(diagnosis.describe().unwrap().contains("field name mismatch"));
    }

    #[test]
    fn strict_and_broad_readings() {
        let rule = rule_with_cases(1);
        let strict = ConfusionMatrix { tp: 1, fn_: 3, ..Default::default() };
        assert!(matches!(Diagnosis::of(&rule, &strict), Diagnosis::TooStrict { missed: 3, caught: 1 }));
        let broad = ConfusionMatrix { tp: 1, fp: 2, ..Default::default() };
        assert!(matches!(Diagnosis::of(&rule, &broad), Diagnosis::TooBroad { .. }));
        let fine = ConfusionMatrix { tp: 2, tn: 2, ..Default::default() };
        assert_eq!(Diagnosis::of(&rule, &fine).describe(), None);
    }

    #[test]
    fn citations_are_capped() {
        let rule = rule_with_cases(5);
        let outcomes = missed(&rule);
        let refs: Vec<&CaseOutcome> = outcomes.iter().collect();
        let mut out = String::new();
        cite_cases(&mut out, "Missed", &rule, &refs);

        assert!(out.starts_with("Missed (5):"));
        assert!(out.contains(CaseId::new("r1-case-3").as_str()));
        assert!(!out.contains("r1-case-4"));
        assert!(out.contains("... and 2 more"));
        assert!(out.contains("log fields: "));
        assert!(out.contains("process"));
    }

    #[test]
    fn unknown_fields_suggest_replacement() {
        let text = issue_feedback(&[Issue::unknown_field(
            "process.cmdline",
            vec!["process.command_line".into()],
        )]);
        assert!(text.contains("replace 'process.cmdline' with 'process.command_line'"));
    }
}
