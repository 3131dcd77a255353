//! Artifact persistence.
//!
//! Approved rules land at `<root>/<rule-id>.yml`, rejection reports at
//! `<root>/rejected/<rule-id>.yml`. Each document is written to a temporary
//! file next to its destination and renamed into place.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use vigil_types::{
    ConfusionMatrix, DetectionRule, Judgment, MetricsSnapshot, RefinementAttempt, RuleId, Stage,
};

use crate::error::{PipelineError, PipelineResult};
use crate::report::{RejectionReason, RunOutcome, RunReport};

const REJECTED_DIR: &str = "rejected";

/// Document written for an approved rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovedArtifact {
    /// Final rule including its test corpus.
    pub rule: DetectionRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<ConfusionMatrix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgment: Option<Judgment>,
    pub history: Vec<RefinementAttempt>,
}

/// Document written for a rejected rule, enough to resume by hand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectionArtifact {
    pub rule_id: RuleId,
    pub failed_stage: Stage,
    pub reason: RejectionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_attempt: Option<RefinementAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_metrics: Option<MetricsSnapshot>,
    pub history: Vec<RefinementAttempt>,
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn approved_path(&self, rule_id: &RuleId) -> PathBuf {
        self.root.join(file_name(rule_id))
    }

    pub fn rejected_path(&self, rule_id: &RuleId) -> PathBuf {
        self.root.join(REJECTED_DIR).join(file_name(rule_id))
    }

    /// Write the artifact matching the report's outcome; returns its path.
    pub fn persist(&self, report: &RunReport) -> PipelineResult<PathBuf> {
        let path = match &report.outcome {
            RunOutcome::Approved => {
                let artifact = ApprovedArtifact {
                    rule: report.final_rule.clone(),
                    matrix: report.matrix,
                    metrics: report.metrics(),
                    judgment: report.judgment.clone(),
                    history: report.attempts.clone(),
                };
                let path = self.approved_path(&report.rule_id);
                write_yaml(&path, &artifact)?;
                path
            }
            RunOutcome::Rejected {
                stage,
                reason,
                best,
            } => {
                let artifact = RejectionArtifact {
                    rule_id: report.rule_id.clone(),
                    failed_stage: *stage,
                    reason: *reason,
                    best_attempt: best.as_deref().cloned(),
                    best_metrics: report.metrics(),
                    history: report.attempts.clone(),
                };
                let path = self.rejected_path(&report.rule_id);
                write_yaml(&path, &artifact)?;
                path
            }
        };
        info!(rule_id = %report.rule_id, path = %path.display(), "Artifact written");
        Ok(path)
    }
}

/// `<rule-id>.yml`, with anything that could leave the directory replaced.
fn file_name(rule_id: &RuleId) -> String {
    let mut stem: String = rule_id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() || stem.starts_with('.') {
        stem.insert(0, '_');
    }
    format!("{}.yml", stem)
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    let persist_err = |path: &Path, source| PipelineError::Persist {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| persist_err(parent, e))?;
    }
    let contents = serde_yaml::to_string(value)?;
    let tmp_path = path.with_extension("yml.tmp");
    std::fs::write(&tmp_path, contents).map_err(|e| persist_err(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| persist_err(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use vigil_types::{CaseLabel, TestCase};

    fn report(outcome: RunOutcome) -> RunReport {
        let rule = DetectionRule::new("vss-delete", "Shadow copy deletion", "process.name:vssadmin.exe")
            .with_case(TestCase::new(
                "vss-delete-case-1",
                CaseLabel::TruePositive,
                json!({"process": {"name": "vssadmin.exe"}}),
                true,
            ));
        let matrix = ConfusionMatrix { tp: 1, ..Default::default() };
        let attempt = RefinementAttempt::new(1, Stage::IntegrationTest, true, 1.0, rule.clone())
            .with_matrix(matrix);
        RunReport {
            rule_id: rule.id.clone(),
            outcome,
            final_rule: rule,
            matrix: Some(matrix),
            judgment: None,
            attempts: vec![attempt],
            transitions: Vec::new(),
            teardown_errors: Vec::new(),
            started_at: Utc::now(),
            elapsed_ms: 3,
        }
    }

    #[test]
    fn approved_rule_round_trips_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.persist(&report(RunOutcome::Approved)).unwrap();

        assert_eq!(path, dir.path().join("vss-delete.yml"));
        let text = std::fs::read_to_string(&path).unwrap();
        let artifact: ApprovedArtifact = serde_yaml::from_str(&text).unwrap();
        assert_eq!(artifact.rule.test_cases.len(), 1);
        assert_eq!(artifact.matrix.unwrap().tp, 1);
        assert_eq!(artifact.history.len(), 1);
        assert!(!dir.path().join("vss-delete.yml.tmp").exists());
    }

    #[test]
    fn path_like_ids_stay_inside_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("out"));

        let approved = store.approved_path(&"../escaped".into());
        assert_eq!(approved, dir.path().join("out").join("_.._escaped.yml"));
        assert_eq!(approved.parent(), Some(store.root()));

        let rejected = store.rejected_path(&"a/../../b".into());
        assert_eq!(rejected.parent(), Some(store.root().join("rejected").as_path()));
        assert_eq!(store.approved_path(&"vss-delete".into()), dir.path().join("out").join("vss-delete.yml"));
    }

    #[test]
    fn rejections_go_under_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut rejected = report(RunOutcome::Approved);
        let best = rejected.attempts[0].clone();
        rejected.outcome = RunOutcome::Rejected {
            stage: Stage::IntegrationTest,
            reason: RejectionReason::BudgetExhausted,
            best: Some(Box::new(best)),
        };

        let path = store.persist(&rejected).unwrap();
        assert_eq!(path, dir.path().join("rejected").join("vss-delete.yml"));
        let artifact: RejectionArtifact =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(artifact.failed_stage, Stage::IntegrationTest);
        assert_eq!(artifact.best_metrics.unwrap().precision, 1.0);
    }
}
