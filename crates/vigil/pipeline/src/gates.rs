//! The three pipeline gates.
//!
//! Gates are evaluated strictly in order for one rule. Each returns a
//! [`GateOutcome`]; run-level faults (unreachable index or collaborator,
//! abort) are returned as errors instead.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use vigil_harness::{AbortSignal, HarnessError, IntegrationHarness};
use vigil_query::validate_syntax;
use vigil_refinement::{GateFailure, Judge};
use vigil_schema::{ResearchContext, SchemaFieldValidator};
use vigil_types::{
    CaseOutcome, ConfusionMatrix, DetectionRule, Issue, JudgeDecision, Judgment, QualityGates,
    QualityMetric, RetryPolicy, Stage, ValidationResult,
};

use crate::error::{PipelineError, PipelineResult};

/// Judgment scores below this never pass, whatever the decision.
pub const DEFAULT_APPROVE_THRESHOLD: f64 = 0.65;

/// State carried between gates of one run.
#[derive(Debug)]
pub struct GateContext {
    pub matrix: Option<ConfusionMatrix>,
    pub outcomes: Vec<CaseOutcome>,
    pub judgment: Option<Judgment>,
    pub teardown_errors: Vec<String>,
    pub abort: AbortSignal,
}

impl GateContext {
    pub fn new(abort: AbortSignal) -> Self {
        Self {
            matrix: None,
            outcomes: Vec::new(),
            judgment: None,
            teardown_errors: Vec::new(),
            abort,
        }
    }
}

/// How a gate evaluation ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Pass,
    /// Failed; refinement may be attempted.
    Fail(GateFailure),
    /// Failed with no refinement possible.
    Reject(GateFailure),
}

#[derive(Clone, Debug, PartialEq)]
pub struct GateOutcome {
    pub verdict: Verdict,
    pub result: ValidationResult,
    /// 1.0/0.0 for SyntaxAndSchema, f1 for IntegrationTest, quality score
    /// for Judgment.
    pub score: f64,
    pub matrix: Option<ConfusionMatrix>,
}

impl GateOutcome {
    pub fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Pass)
    }
}

#[async_trait]
pub trait Gate: Send + Sync {
    fn stage(&self) -> Stage;

    async fn evaluate(
        &self,
        rule: &DetectionRule,
        context: &mut GateContext,
    ) -> PipelineResult<GateOutcome>;
}

/// Gate 1: structural lint, query syntax and schema fields.
pub struct SyntaxAndSchemaGate {
    fields: Arc<SchemaFieldValidator>,
}

impl SyntaxAndSchemaGate {
    pub fn new(fields: Arc<SchemaFieldValidator>) -> Self {
        Self { fields }
    }

    /// Syntax and lint only, no field research. Used by offline checks.
    pub fn check_syntax(rule: &DetectionRule) -> (Vec<Issue>, Vec<String>) {
        let mut issues = rule.lint();
        let mut fields = Vec::new();
        if !rule.query.trim().is_empty() {
            match validate_syntax(&rule.query) {
                Ok(report) => fields = report.fields_referenced,
                Err(err) => issues.push(err.to_issue()),
            }
        }
        (issues, fields)
    }
}

#[async_trait]
impl Gate for SyntaxAndSchemaGate {
    fn stage(&self) -> Stage {
        Stage::SyntaxAndSchema
    }

    #[instrument(skip_all, fields(rule_id = %rule.id))]
    async fn evaluate(
        &self,
        rule: &DetectionRule,
        _context: &mut GateContext,
    ) -> PipelineResult<GateOutcome> {
        let (mut issues, fields) = Self::check_syntax(rule);
        if !fields.is_empty() {
            let report = self
                .fields
                .validate(&fields, &ResearchContext::for_rule(rule))
                .await?;
            issues.extend(report.issues());
        }
        debug!(fields = fields.len(), issues = issues.len(), "Static checks complete");

        let result = ValidationResult::from_issues(Stage::SyntaxAndSchema, issues.clone());
        let (verdict, score) = if result.passed {
            (Verdict::Pass, 1.0)
        } else {
            (Verdict::Fail(GateFailure::Static { issues }), 0.0)
        };
        Ok(GateOutcome {
            verdict,
            result,
            score,
            matrix: None,
        })
    }
}

/// Gate 2: corpus readiness, then the harness and the quality gates.
pub struct IntegrationTestGate {
    harness: Arc<IntegrationHarness>,
    quality: QualityGates,
}

impl IntegrationTestGate {
    pub fn new(harness: Arc<IntegrationHarness>, quality: QualityGates) -> Self {
        Self { harness, quality }
    }
}

#[async_trait]
impl Gate for IntegrationTestGate {
    fn stage(&self) -> Stage {
        Stage::IntegrationTest
    }

    #[instrument(skip_all, fields(rule_id = %rule.id))]
    async fn evaluate(
        &self,
        rule: &DetectionRule,
        context: &mut GateContext,
    ) -> PipelineResult<GateOutcome> {
        let missing = rule.missing_corpus_labels();
        if !missing.is_empty() {
            let issues: Vec<Issue> = missing.into_iter().map(Issue::missing_label).collect();
            warn!(issues = issues.len(), "Corpus not ready, skipping harness");
            return Ok(GateOutcome {
                verdict: Verdict::Fail(GateFailure::Corpus {
                    issues: issues.clone(),
                }),
                result: ValidationResult::fail(Stage::IntegrationTest, issues),
                score: 0.0,
                matrix: None,
            });
        }

        let report = match self.harness.run_with_abort(rule, context.abort.clone()).await {
            Ok(report) => report,
            Err(HarnessError::Infrastructure(err)) if err.is_query_rejected() => {
                warn!(error = %err, "Index rejected the query");
                let issues = vec![Issue::rejected_query(rule.query.clone(), &err.message)];
                return Ok(GateOutcome {
                    verdict: Verdict::Fail(GateFailure::Static {
                        issues: issues.clone(),
                    }),
                    result: ValidationResult::fail(Stage::IntegrationTest, issues),
                    score: 0.0,
                    matrix: None,
                });
            }
            Err(HarnessError::Infrastructure(err)) => return Err(err.into()),
            Err(HarnessError::Aborted { .. }) => {
                return Err(PipelineError::Aborted {
                    rule_id: rule.id.clone(),
                })
            }
        };
        if let Some(err) = &report.teardown_error {
            context.teardown_errors.push(err.clone());
        }

        let matrix = report.matrix;
        let issues = self.quality.check(&matrix);
        context.matrix = Some(matrix);
        context.outcomes = report.outcomes.clone();

        let result = ValidationResult::from_issues(Stage::IntegrationTest, issues.clone());
        let verdict = if result.passed {
            Verdict::Pass
        } else {
            Verdict::Fail(GateFailure::Empirical {
                issues,
                matrix,
                outcomes: report.outcomes,
            })
        };
        Ok(GateOutcome {
            verdict,
            result,
            score: matrix.f1(),
            matrix: Some(matrix),
        })
    }
}

/// Gate 3: the judgment collaborator.
pub struct JudgmentGate {
    judge: Arc<dyn Judge>,
    approve_threshold: f64,
    retry: RetryPolicy,
}

impl JudgmentGate {
    pub fn new(judge: Arc<dyn Judge>) -> Self {
        Self {
            judge,
            approve_threshold: DEFAULT_APPROVE_THRESHOLD,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_approve_threshold(mut self, threshold: f64) -> Self {
        self.approve_threshold = threshold;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Gate for JudgmentGate {
    fn stage(&self) -> Stage {
        Stage::Judgment
    }

    #[instrument(skip_all, fields(rule_id = %rule.id))]
    async fn evaluate(
        &self,
        rule: &DetectionRule,
        context: &mut GateContext,
    ) -> PipelineResult<GateOutcome> {
        let matrix = context.matrix.unwrap_or_default();
        let judge = &self.judge;
        let mut judgment = self
            .retry
            .run("evaluate", || judge.evaluate(rule, &matrix, &rule.test_cases))
            .await?;
        let score = judgment.score();

        if judgment.decision == JudgeDecision::Approve && score < self.approve_threshold {
            judgment.issues.push(
                Issue::shortfall(QualityMetric::QualityScore, score, self.approve_threshold).message,
            );
        }
        let passed = judgment.decision == JudgeDecision::Approve && score >= self.approve_threshold;

        let mut issues: Vec<Issue> = judgment.issues.iter().map(|i| Issue::judge(i.clone())).collect();
        if !passed && issues.is_empty() {
            issues.push(Issue::judge(format!("judge decision {}", judgment.decision)));
        }
        debug!(decision = %judgment.decision, score, passed, "Judgment received");
        context.judgment = Some(judgment.clone());

        let (verdict, result) = if passed {
            (Verdict::Pass, ValidationResult::pass(Stage::Judgment))
        } else {
            let failure = GateFailure::Verdict { judgment: judgment.clone() };
            let result = ValidationResult::fail(Stage::Judgment, issues);
            if judgment.decision == JudgeDecision::Reject {
                (Verdict::Reject(failure), result)
            } else {
                (Verdict::Fail(failure), result)
            }
        };
        Ok(GateOutcome {
            verdict,
            result,
            score,
            matrix: Some(matrix),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_harness::InMemoryIndex;
    use vigil_refinement::mocks::FixedJudge;
    use vigil_schema::{mocks::MockFieldResearcher, FieldKnowledgeCache, FieldSchema};
    use vigil_types::{CaseLabel, IssueCause, TestCase};

    fn field_gate() -> SyntaxAndSchemaGate {
        let schema = FieldSchema::from_fields(
            "test",
            [("process.name", "keyword"), ("process.command_line", "wildcard")],
        );
        let validator = SchemaFieldValidator::new(
            Arc::new(schema),
            Arc::new(FieldKnowledgeCache::new()),
            Arc::new(MockFieldResearcher::unknown_everything()),
        )
        .with_retry(RetryPolicy::no_retry());
        SyntaxAndSchemaGate::new(Arc::new(validator))
    }

    fn context() -> GateContext {
        GateContext::new(AbortSignal::never())
    }

    #[tokio::test]
    async fn syntax_error_fails_gate_one() {
        let rule = DetectionRule::new("r", "Rule", "process.name:cmd.exe AND");
        let outcome = field_gate().evaluate(&rule, &mut context()).await.unwrap();
        assert!(!outcome.passed());
        assert_eq!(outcome.score, 0.0);
        assert!(matches!(
            outcome.result.issues[0].cause,
            IssueCause::SyntaxError { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_field_carries_alternatives() {
        let rule = DetectionRule::new("r", "Rule", "process.cmdline:*vssadmin*");
        let outcome = field_gate().evaluate(&rule, &mut context()).await.unwrap();
        match &outcome.result.issues[0].cause {
            IssueCause::UnknownField { field, alternatives } => {
                assert_eq!(field, "process.cmdline");
                assert_eq!(alternatives[0], "process.command_line");
            }
            other => panic!("unexpected cause {:?}", other),
        }
    }

    #[tokio::test]
    async fn corpus_without_fn_case_never_reaches_the_index() {
        let index = Arc::new(InMemoryIndex::new());
        let gate = IntegrationTestGate::new(
            Arc::new(IntegrationHarness::new(index.clone())),
            QualityGates::default(),
        );
        let rule = DetectionRule::new("r", "Rule", "process.name:cmd.exe").with_case(TestCase::new(
            "",
            CaseLabel::TruePositive,
            json!({"process": {"name": "cmd.exe"}}),
            true,
        ));
        let outcome = gate.evaluate(&rule, &mut context()).await.unwrap();
        assert!(matches!(outcome.verdict, Verdict::Fail(GateFailure::Corpus { .. })));
        assert!(outcome.matrix.is_none());
        assert!(index.live_namespaces().is_empty());
    }

    #[tokio::test]
    async fn query_the_index_refuses_is_a_syntax_failure() {
        let index = Arc::new(InMemoryIndex::new());
        let gate = IntegrationTestGate::new(
            Arc::new(IntegrationHarness::new(index.clone()).with_retry(RetryPolicy::no_retry())),
            QualityGates::default(),
        );
        let rule = DetectionRule::new("r", "Rule", "process.name:(cmd.exe")
            .with_case(TestCase::new(
                "",
                CaseLabel::TruePositive,
                json!({"process": {"name": "cmd.exe"}}),
                true,
            ))
            .with_case(TestCase::new(
                "",
                CaseLabel::FalseNegative,
                json!({"process": {"name": "powershell.exe"}}),
                false,
            ));

        let outcome = gate.evaluate(&rule, &mut context()).await.unwrap();
        assert!(matches!(outcome.verdict, Verdict::Fail(GateFailure::Static { .. })));
        assert!(matches!(
            outcome.result.issues[0].cause,
            IssueCause::SyntaxError { .. }
        ));
        assert!(index.live_namespaces().is_empty());
    }

    #[tokio::test]
    async fn approval_below_threshold_fails() {
        let gate = JudgmentGate::new(Arc::new(FixedJudge::approving(0.5)));
        let rule = DetectionRule::new("r", "Rule", "process.name:cmd.exe");
        let outcome = gate.evaluate(&rule, &mut context()).await.unwrap();
        assert!(matches!(outcome.verdict, Verdict::Fail(_)));
        assert!(outcome.result.issues[0].message.contains("quality_score 0.50 below required 0.65"));
    }

    #[tokio::test]
    async fn reject_decision_is_final() {
        let judge = FixedJudge::new(Judgment::reject(0.2, vec!["matches every process".into()]));
        let gate = JudgmentGate::new(Arc::new(judge));
        let rule = DetectionRule::new("r", "Rule", "process.name:*");
        let outcome = gate.evaluate(&rule, &mut context()).await.unwrap();
        assert!(matches!(outcome.verdict, Verdict::Reject(_)));
    }
}
