//! Verdicts of the judgment collaborator.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JudgeDecision {
    Approve,
    Refine,
    Reject,
}

impl fmt::Display for JudgeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JudgeDecision::Approve => "APPROVE",
            JudgeDecision::Refine => "REFINE",
            JudgeDecision::Reject => "REJECT",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub quality_score: f64,
    pub decision: JudgeDecision,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// The judge believes the test corpus itself is unrealistic.
    #[serde(default)]
    pub test_data_flagged: bool,
}

impl Judgment {
    pub fn new(quality_score: f64, decision: JudgeDecision) -> Self {
        Self {
            quality_score: clamp_score(quality_score),
            decision,
            issues: Vec::new(),
            recommendations: Vec::new(),
            test_data_flagged: false,
        }
    }

    pub fn approve(quality_score: f64) -> Self {
        Self::new(quality_score, JudgeDecision::Approve)
    }

    pub fn refine(quality_score: f64, recommendations: Vec<String>) -> Self {
        Self {
            recommendations,
            ..Self::new(quality_score, JudgeDecision::Refine)
        }
    }

    pub fn reject(quality_score: f64, issues: Vec<String>) -> Self {
        Self {
            issues,
            ..Self::new(quality_score, JudgeDecision::Reject)
        }
    }

    pub fn with_issues(mut self, issues: Vec<String>) -> Self {
        self.issues = issues;
        self
    }

    pub fn flag_test_data(mut self) -> Self {
        self.test_data_flagged = true;
        self
    }

    /// Score clamped to `[0, 1]`; collaborators are not trusted to stay in range.
    pub fn score(&self) -> f64 {
        clamp_score(self.quality_score)
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
