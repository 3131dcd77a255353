//! Refinement decision engine.
//!
//! Maps a failed gate to a [`RefinementPlan`] (what to change and why),
//! asks the [`RuleGenerator`] for a revision, and checks that the revision
//! keeps the shape the plan allows.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use vigil_types::{
    CaseOutcome, Classification, ConfusionMatrix, DetectionRule, Issue, Judgment, RefinementTarget,
    RetryPolicy, Stage,
};

use crate::collaborators::{Judge, RuleGenerator};
use crate::error::{RefinementError, RefinementResult};
use crate::feedback::{cite_cases, issue_feedback, Diagnosis};

/// Evidence from a failed gate evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum GateFailure {
    /// Syntax, schema or structure issues found before any index work.
    Static { issues: Vec<Issue> },
    /// The corpus lacks a required label; the harness was not run.
    Corpus { issues: Vec<Issue> },
    /// Metrics fell below the quality gates.
    Empirical {
        issues: Vec<Issue>,
        matrix: ConfusionMatrix,
        outcomes: Vec<CaseOutcome>,
    },
    /// The judge did not approve.
    Verdict { judgment: Judgment },
}

impl GateFailure {
    pub fn stage(&self) -> Stage {
        match self {
            GateFailure::Static { .. } => Stage::SyntaxAndSchema,
            GateFailure::Corpus { .. } | GateFailure::Empirical { .. } => Stage::IntegrationTest,
            GateFailure::Verdict { .. } => Stage::Judgment,
        }
    }
}

/// What to revise, and the feedback to revise it with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefinementPlan {
    pub target: RefinementTarget,
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
}

pub struct RefinementEngine {
    generator: Arc<dyn RuleGenerator>,
    judge: Arc<dyn Judge>,
    retry: RetryPolicy,
}

impl RefinementEngine {
    pub fn new(generator: Arc<dyn RuleGenerator>, judge: Arc<dyn Judge>) -> Self {
        Self {
            generator,
            judge,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn judge(&self) -> &Arc<dyn Judge> {
        &self.judge
    }

    /// Decide what a revision should change.
    #[instrument(skip_all, fields(rule_id = %rule.id, stage = %failure.stage()))]
    pub async fn plan(&self, rule: &DetectionRule, failure: &GateFailure) -> RefinementResult<RefinementPlan> {
        let plan = match failure {
            GateFailure::Static { issues } => {
                let on_tests = issues.iter().filter(|i| i.concerns_tests()).count();
                let target = if on_tests == 0 {
                    RefinementTarget::Query
                } else if on_tests == issues.len() {
                    RefinementTarget::Tests
                } else {
                    RefinementTarget::Both
                };
                RefinementPlan {
                    target,
                    feedback: issue_feedback(issues),
                    diagnosis: None,
                }
            }
            GateFailure::Corpus { issues } => {
                let mut feedback = issue_feedback(issues);
                feedback.push_str(
                    "The corpus needs at least one TP case the query must match and one FN \
                     evasion case it is expected to miss.\n",
                );
                RefinementPlan {
                    target: RefinementTarget::Tests,
                    feedback,
                    diagnosis: None,
                }
            }
            GateFailure::Empirical {
                issues,
                matrix,
                outcomes,
            } => self.plan_empirical(rule, issues, matrix, outcomes).await?,
            GateFailure::Verdict { judgment } => plan_verdict(judgment),
        };
        debug!(refinement_target = %plan.target, "Refinement planned");
        Ok(plan)
    }

    async fn plan_empirical(
        &self,
        rule: &DetectionRule,
        issues: &[Issue],
        matrix: &ConfusionMatrix,
        outcomes: &[CaseOutcome],
    ) -> RefinementResult<RefinementPlan> {
        let missed: Vec<&CaseOutcome> = outcomes
            .iter()
            .filter(|o| o.classification == Classification::FalseNegative)
            .collect();
        let unexpected: Vec<&CaseOutcome> = outcomes
            .iter()
            .filter(|o| o.classification == Classification::FalsePositive)
            .collect();
        // Only benign-labeled matches are ambiguous; a matched evasion case
        // means the query is too broad.
        let (benign, evasions): (Vec<&CaseOutcome>, Vec<&CaseOutcome>) =
            unexpected.iter().copied().partition(|o| o.label.is_benign());

        let realism = if benign.is_empty() {
            None
        } else {
            let cited: Vec<CaseOutcome> = benign.iter().map(|o| (*o).clone()).collect();
            let judge = &self.judge;
            let verdict = self
                .retry
                .run("assess_realism", || {
                    judge.assess_realism(rule, matrix, &rule.test_cases, &cited)
                })
                .await?;
            Some(verdict)
        };

        let query_at_fault = !missed.is_empty() || !evasions.is_empty();
        let target = match (query_at_fault, realism) {
            (false, Some(verdict)) => RefinementTarget::Query.combine(verdict),
            (true, Some(verdict)) => verdict,
            _ => RefinementTarget::Query,
        };

        let diagnosis = Diagnosis::of(rule, matrix);
        let mut feedback = format!("Integration test results: {}\n", matrix);
        for issue in issues {
            feedback.push_str(&format!("- {}\n", issue.message));
        }
        if let Some(text) = diagnosis.describe() {
            feedback.push_str(&text);
            feedback.push('\n');
        }
        cite_cases(&mut feedback, "Expected matches the query missed", rule, &missed);
        cite_cases(&mut feedback, "Unexpected matches", rule, &unexpected);
        if realism.is_some_and(|v| v.touches_tests()) {
            feedback.push_str(
                "The unexpected matches were judged unrealistic as benign activity; \
                 rewrite those test cases.\n",
            );
        }

        Ok(RefinementPlan {
            target,
            feedback,
            diagnosis: Some(diagnosis),
        })
    }

    /// Request a revision under `plan` and check its shape.
    #[instrument(skip_all, fields(rule_id = %rule.id, stage = %stage, refinement_target = %plan.target))]
    pub async fn revise(
        &self,
        rule: &DetectionRule,
        stage: Stage,
        plan: &RefinementPlan,
    ) -> RefinementResult<DetectionRule> {
        let generator = &self.generator;
        let mut revised = self
            .retry
            .run("revise", || generator.revise(rule, stage, plan.target, &plan.feedback))
            .await?;
        revised.assign_case_ids();

        if let Err(err) = check_revision(rule, &revised, plan.target) {
            warn!(error = %err, "Rejected revision");
            return Err(err);
        }
        debug!(query = %revised.query, cases = revised.test_cases.len(), "Revision accepted");
        Ok(revised)
    }
}

fn plan_verdict(judgment: &Judgment) -> RefinementPlan {
    let target = match (judgment.test_data_flagged, judgment.issues.is_empty()) {
        (false, _) => RefinementTarget::Query,
        (true, true) => RefinementTarget::Tests,
        (true, false) => RefinementTarget::Both,
    };
    let lines = if judgment.recommendations.is_empty() {
        &judgment.issues
    } else {
        &judgment.recommendations
    };
    RefinementPlan {
        target,
        feedback: lines.join("\n"),
        diagnosis: None,
    }
}

/// A revision must keep the rule id and a query; a query-only revision must
/// also keep the corpus case ids.
pub fn check_revision(
    original: &DetectionRule,
    revised: &DetectionRule,
    target: RefinementTarget,
) -> RefinementResult<()> {
    if revised.id != original.id {
        return Err(RefinementError::invalid_revision(
            &original.id,
            format!("rule id changed to {}", revised.id),
        ));
    }
    if revised.query.trim().is_empty() {
        return Err(RefinementError::invalid_revision(&original.id, "query was dropped"));
    }
    if target == RefinementTarget::Query {
        let mut before = original.clone();
        before.assign_case_ids();
        let mut after = revised.clone();
        after.assign_case_ids();
        if before.case_ids() != after.case_ids() {
            return Err(RefinementError::invalid_revision(
                &original.id,
                "test case ids changed in a query-only revision",
            ));
        }
    }
    Ok(())
}
