//! Collaborator seams used during refinement and judgment.
//!
//! Both traits report transport problems as [`InfrastructureError`]; callers
//! retry them and never charge them to a rule's budget.

use async_trait::async_trait;

use vigil_types::{
    CaseOutcome, ConfusionMatrix, DetectionRule, InfrastructureError, Judgment, RefinementTarget,
    Stage, TestCase,
};

/// Produces revised rules from targeted feedback.
#[async_trait]
pub trait RuleGenerator: Send + Sync {
    /// Return a revision of `rule` that addresses `feedback`.
    ///
    /// With `target = Query` the corpus is expected back unchanged; with
    /// `target = Tests` the query is.
    async fn revise(
        &self,
        rule: &DetectionRule,
        stage: Stage,
        target: RefinementTarget,
        feedback: &str,
    ) -> Result<DetectionRule, InfrastructureError>;
}

/// Scores rules and arbitrates between query and corpus problems.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn evaluate(
        &self,
        rule: &DetectionRule,
        matrix: &ConfusionMatrix,
        corpus: &[TestCase],
    ) -> Result<Judgment, InfrastructureError>;

    /// Decide whether unexpected matches mean the query is too broad
    /// (`Query`) or the benign cases are unrealistic (`Tests`).
    async fn assess_realism(
        &self,
        rule: &DetectionRule,
        matrix: &ConfusionMatrix,
        corpus: &[TestCase],
        unexpected: &[CaseOutcome],
    ) -> Result<RefinementTarget, InfrastructureError>;
}
