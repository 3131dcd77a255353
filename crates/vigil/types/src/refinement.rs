//! Refinement attempts and per-gate iteration budgets.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::ConfusionMatrix;
use crate::rule::DetectionRule;
use crate::validation::{Issue, Stage};

/// What a revision is allowed to change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefinementTarget {
    Query,
    Tests,
    Both,
}

impl RefinementTarget {
    /// Union of two targets: anything other than two equal targets is `Both`.
    pub fn combine(self, other: RefinementTarget) -> RefinementTarget {
        if self == other {
            self
        } else {
            RefinementTarget::Both
        }
    }

    pub fn touches_query(&self) -> bool {
        matches!(self, RefinementTarget::Query | RefinementTarget::Both)
    }

    pub fn touches_tests(&self) -> bool {
        matches!(self, RefinementTarget::Tests | RefinementTarget::Both)
    }
}

impl fmt::Display for RefinementTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefinementTarget::Query => "query",
            RefinementTarget::Tests => "tests",
            RefinementTarget::Both => "both",
        };
        f.write_str(s)
    }
}

/// One gate evaluation and, when it failed, the refinement that followed.
///
/// `rule` is the snapshot that was evaluated. `target` and `feedback` are set
/// when the attempt failed and a revision was requested from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefinementAttempt {
    pub iteration: u32,
    pub stage: Stage,
    pub passed: bool,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RefinementTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub rule: DetectionRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<ConfusionMatrix>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    pub recorded_at: DateTime<Utc>,
}

impl RefinementAttempt {
    pub fn new(iteration: u32, stage: Stage, passed: bool, score: f64, rule: DetectionRule) -> Self {
        Self {
            iteration,
            stage,
            passed,
            score,
            target: None,
            feedback: None,
            rule,
            matrix: None,
            issues: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_matrix(mut self, matrix: ConfusionMatrix) -> Self {
        self.matrix = Some(matrix);
        self
    }

    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }

    pub fn with_refinement(mut self, target: RefinementTarget, feedback: impl Into<String>) -> Self {
        self.target = Some(target);
        self.feedback = Some(feedback.into());
        self
    }
}

/// Bounded number of evaluations a single gate may spend on one rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationBudget {
    pub max_attempts: u32,
    pub consumed: u32,
}

impl Default for IterationBudget {
    fn default() -> Self {
        Self::new(2)
    }
}

impl IterationBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            consumed: 0,
        }
    }

    /// Consume one unit; false when the budget was already exhausted.
    pub fn try_consume(&mut self) -> bool {
        if self.is_exhausted() {
            false
        } else {
            self.consumed += 1;
            true
        }
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.consumed)
    }

    pub fn is_exhausted(&self) -> bool {
        self.consumed >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combining_distinct_targets_yields_both() {
        assert_eq!(
            RefinementTarget::Query.combine(RefinementTarget::Tests),
            RefinementTarget::Both
        );
        assert_eq!(
            RefinementTarget::Query.combine(RefinementTarget::Query),
            RefinementTarget::Query
        );
        assert!(RefinementTarget::Both.touches_query());
        assert!(!RefinementTarget::Query.touches_tests());
    }

    #[test]
    fn budget_stops_at_max() {
        let mut budget = IterationBudget::new(2);
        assert!(budget.try_consume());
        assert_eq!(budget.remaining(), 1);
        assert!(budget.try_consume());
        assert!(budget.is_exhausted());
        assert!(!budget.try_consume());
        assert_eq!(budget.consumed, 2);
    }

    #[test]
    fn zero_budget_is_exhausted_immediately() {
        let mut budget = IterationBudget::new(0);
        assert!(!budget.try_consume());
    }
}
