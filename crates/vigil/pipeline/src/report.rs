//! Run reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_types::{
    ConfusionMatrix, DetectionRule, Judgment, MetricsSnapshot, RefinementAttempt, RuleId, Stage,
};

use crate::controller::Transition;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    BudgetExhausted,
    JudgeRejected,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::BudgetExhausted => f.write_str("refinement budget exhausted"),
            RejectionReason::JudgeRejected => f.write_str("rejected by judge"),
        }
    }
}

/// Terminal state of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Approved,
    Rejected {
        stage: Stage,
        reason: RejectionReason,
        /// Highest-scoring attempt at the failing gate.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        best: Option<Box<RefinementAttempt>>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub rule_id: RuleId,
    pub outcome: RunOutcome,
    /// The approved rule, or the best candidate of a rejected run.
    pub final_rule: DetectionRule,
    /// Matrix of the most recent integration test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<ConfusionMatrix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgment: Option<Judgment>,
    pub attempts: Vec<RefinementAttempt>,
    pub transitions: Vec<Transition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown_errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn is_approved(&self) -> bool {
        matches!(self.outcome, RunOutcome::Approved)
    }

    pub fn rejected_at(&self) -> Option<Stage> {
        match &self.outcome {
            RunOutcome::Rejected { stage, .. } => Some(*stage),
            RunOutcome::Approved => None,
        }
    }

    pub fn best_attempt(&self) -> Option<&RefinementAttempt> {
        match &self.outcome {
            RunOutcome::Rejected { best, .. } => best.as_deref(),
            RunOutcome::Approved => None,
        }
    }

    /// Matrix of the final rule: the approved matrix, or the best rejected
    /// attempt's matrix.
    pub fn final_matrix(&self) -> Option<ConfusionMatrix> {
        match &self.outcome {
            RunOutcome::Approved => self.matrix,
            RunOutcome::Rejected { best, .. } => {
                best.as_ref().and_then(|a| a.matrix).or(self.matrix)
            }
        }
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.final_matrix().map(|m| m.metrics())
    }

    /// Evaluations spent at `stage`.
    pub fn attempts_at(&self, stage: Stage) -> usize {
        self.attempts.iter().filter(|a| a.stage == stage).count()
    }
}
