//! Iteration controller.
//!
//! Drives one rule through `Init -> SyntaxAndSchema -> IntegrationTest ->
//! Judgment -> Approved | Rejected`. Each gate owns an [`IterationBudget`];
//! every evaluation spends one unit and a failed evaluation is followed by a
//! refinement only while budget remains. A gate is always evaluated at least
//! once, so a budget of zero rejects at the first failure. A revision made at
//! a later gate re-enters it only after passing every earlier gate again.
//! Infrastructure faults end the run with an error and never touch a budget.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use vigil_harness::{AbortSignal, IntegrationHarness};
use vigil_refinement::{RefinementEngine, RefinementError};
use vigil_schema::SchemaFieldValidator;
use vigil_types::{
    DetectionRule, InfrastructureError, IterationBudget, QualityGates, RefinementAttempt,
    RetryPolicy, RuleId, Stage,
};

use crate::error::{PipelineError, PipelineResult};
use crate::gates::{
    Gate, GateContext, GateOutcome, IntegrationTestGate, JudgmentGate, SyntaxAndSchemaGate,
    Verdict, DEFAULT_APPROVE_THRESHOLD,
};
use crate::report::{RejectionReason, RunOutcome, RunReport};

/// Evaluations allowed per gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageBudgets {
    pub syntax_and_schema: u32,
    pub integration_test: u32,
    pub judgment: u32,
}

impl Default for StageBudgets {
    fn default() -> Self {
        Self {
            syntax_and_schema: 2,
            integration_test: 2,
            judgment: 2,
        }
    }
}

impl StageBudgets {
    pub fn uniform(attempts: u32) -> Self {
        Self {
            syntax_and_schema: attempts,
            integration_test: attempts,
            judgment: attempts,
        }
    }

    pub fn budget_for(&self, stage: Stage) -> IterationBudget {
        let attempts = match stage {
            Stage::SyntaxAndSchema => self.syntax_and_schema,
            Stage::IntegrationTest => self.integration_test,
            Stage::Judgment => self.judgment,
        };
        IterationBudget::new(attempts)
    }
}

/// Configuration for the standard three-gate controller.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub budgets: StageBudgets,
    pub quality: QualityGates,
    /// Minimum judgment score (default: 0.65)
    pub approve_threshold: f64,
    /// Retry policy for collaborator calls
    pub retry: RetryPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            budgets: StageBudgets::default(),
            quality: QualityGates::default(),
            approve_threshold: DEFAULT_APPROVE_THRESHOLD,
            retry: RetryPolicy::default(),
        }
    }
}

/// Controller states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Init,
    SyntaxAndSchema,
    IntegrationTest,
    Judgment,
    Approved,
    Rejected,
}

impl From<Stage> for Phase {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::SyntaxAndSchema => Phase::SyntaxAndSchema,
            Stage::IntegrationTest => Phase::IntegrationTest,
            Stage::Judgment => Phase::Judgment,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Audit state of one run.
struct RunLog {
    phase: Phase,
    iteration: u32,
    attempts: Vec<RefinementAttempt>,
    transitions: Vec<Transition>,
}

impl RunLog {
    fn new() -> Self {
        Self {
            phase: Phase::Init,
            iteration: 0,
            attempts: Vec::new(),
            transitions: Vec::new(),
        }
    }

    fn transition(&mut self, rule_id: &RuleId, to: Phase, reason: impl Into<String>) {
        let reason = reason.into();
        info!(rule_id = %rule_id, from = %self.phase, to = %to, reason = %reason, "State transition");
        self.transitions.push(Transition {
            from: self.phase,
            to,
            reason,
            at: Utc::now(),
        });
        self.phase = to;
    }
}

pub struct IterationController {
    gates: Vec<Arc<dyn Gate>>,
    engine: Arc<RefinementEngine>,
    budgets: StageBudgets,
}

impl IterationController {
    pub fn new(engine: Arc<RefinementEngine>, budgets: StageBudgets) -> Self {
        Self {
            gates: Vec::new(),
            engine,
            budgets,
        }
    }

    /// The three standard gates, in order.
    pub fn standard(
        fields: Arc<SchemaFieldValidator>,
        harness: Arc<IntegrationHarness>,
        engine: Arc<RefinementEngine>,
        config: ControllerConfig,
    ) -> Self {
        let judgment = JudgmentGate::new(engine.judge().clone())
            .with_approve_threshold(config.approve_threshold)
            .with_retry(config.retry.clone());
        Self::new(engine, config.budgets)
            .with_gate(Arc::new(SyntaxAndSchemaGate::new(fields)))
            .with_gate(Arc::new(IntegrationTestGate::new(harness, config.quality)))
            .with_gate(Arc::new(judgment))
    }

    /// Append a gate. Gates run in the order they are added.
    pub fn with_gate(mut self, gate: Arc<dyn Gate>) -> Self {
        self.gates.push(gate);
        self
    }

    pub async fn run(&self, rule: DetectionRule) -> PipelineResult<RunReport> {
        self.run_with_abort(rule, AbortSignal::never()).await
    }

    #[instrument(skip_all, fields(rule_id = %rule.id))]
    pub async fn run_with_abort(
        &self,
        mut rule: DetectionRule,
        abort: AbortSignal,
    ) -> PipelineResult<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        rule.assign_case_ids();

        let mut log = RunLog::new();
        let mut context = GateContext::new(abort);
        let mut current = rule;

        for (index, gate) in self.gates.iter().enumerate() {
            let stage = gate.stage();
            log.transition(&current.id, stage.into(), format!("entering gate {}", stage.number()));

            match self.run_gate(index, current, &mut context, &mut log).await? {
                GateExit::Passed(rule) => current = rule,
                GateExit::Rejected { reason, best, last } => {
                    log.transition(&last.id, Phase::Rejected, reason.to_string());
                    let best_attempt = best.map(|i| log.attempts[i].clone());
                    let final_rule = best_attempt.as_ref().map(|a| a.rule.clone()).unwrap_or(last);
                    warn!(
                        rule_id = %final_rule.id,
                        stage = %stage,
                        reason = %reason,
                        best_score = best_attempt.as_ref().map(|a| a.score).unwrap_or(0.0),
                        "Rule rejected"
                    );
                    return Ok(RunReport {
                        rule_id: final_rule.id.clone(),
                        outcome: RunOutcome::Rejected {
                            stage,
                            reason,
                            best: best_attempt.map(Box::new),
                        },
                        final_rule,
                        matrix: context.matrix,
                        judgment: context.judgment,
                        attempts: log.attempts,
                        transitions: log.transitions,
                        teardown_errors: context.teardown_errors,
                        started_at,
                        elapsed_ms: clock.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        log.transition(&current.id, Phase::Approved, "all gates passed");
        info!(rule_id = %current.id, iterations = log.iteration, "Rule approved");
        Ok(RunReport {
            rule_id: current.id.clone(),
            outcome: RunOutcome::Approved,
            final_rule: current,
            matrix: context.matrix,
            judgment: context.judgment,
            attempts: log.attempts,
            transitions: log.transitions,
            teardown_errors: context.teardown_errors,
            started_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
        })
    }

    async fn run_gate(
        &self,
        index: usize,
        mut current: DetectionRule,
        context: &mut GateContext,
        log: &mut RunLog,
    ) -> PipelineResult<GateExit> {
        let gate = self.gates[index].as_ref();
        let stage = gate.stage();
        let mut budget = self.budgets.budget_for(stage);
        let mut best: Option<usize> = None;
        let mut evaluated = false;
        let mut revised_since_check = false;

        loop {
            if !budget.try_consume() && evaluated {
                return Ok(GateExit::Rejected {
                    reason: RejectionReason::BudgetExhausted,
                    best,
                    last: current,
                });
            }
            evaluated = true;
            log.iteration += 1;

            let earlier_failure = if revised_since_check {
                self.recheck_earlier(index, &current, context).await?
            } else {
                None
            };
            let outcome = match earlier_failure {
                Some(outcome) => outcome,
                None => {
                    revised_since_check = false;
                    gate.evaluate(&current, context).await?
                }
            };
            info!(
                rule_id = %current.id,
                stage = %stage,
                iteration = log.iteration,
                passed = outcome.passed(),
                score = outcome.score,
                remaining = budget.remaining(),
                "Gate evaluated"
            );

            let mut attempt = RefinementAttempt::new(
                log.iteration,
                stage,
                outcome.passed(),
                outcome.score,
                current.clone(),
            )
            .with_issues(outcome.result.issues.clone());
            if let Some(matrix) = outcome.matrix {
                attempt = attempt.with_matrix(matrix);
            }

            let failure = match outcome.verdict {
                Verdict::Pass => {
                    log.push_attempt(attempt, &mut best);
                    return Ok(GateExit::Passed(current));
                }
                Verdict::Reject(_) => {
                    log.push_attempt(attempt, &mut best);
                    return Ok(GateExit::Rejected {
                        reason: RejectionReason::JudgeRejected,
                        best,
                        last: current,
                    });
                }
                Verdict::Fail(failure) => failure,
            };

            if budget.is_exhausted() {
                log.push_attempt(attempt, &mut best);
                return Ok(GateExit::Rejected {
                    reason: RejectionReason::BudgetExhausted,
                    best,
                    last: current,
                });
            }

            let plan = self.engine.plan(&current, &failure).await.map_err(collaborator_fault)?;
            warn!(
                rule_id = %current.id,
                stage = %stage,
                refinement_target = %plan.target,
                "Gate failed, refining"
            );
            log.push_attempt(attempt.with_refinement(plan.target, plan.feedback.clone()), &mut best);

            match self.engine.revise(&current, stage, &plan).await {
                Ok(revised) => {
                    log.transition(&revised.id, stage.into(), format!("refined {}", plan.target));
                    current = revised;
                    revised_since_check = index > 0;
                }
                Err(RefinementError::InvalidRevision { reason, .. }) => {
                    log.transition(&current.id, stage.into(), format!("revision discarded: {}", reason));
                }
                Err(RefinementError::Collaborator(err)) => return Err(err.into()),
            }
        }
    }

    /// Run the gates before `index` against a revision. The first one that
    /// fails stands in for this gate's evaluation, scored zero.
    async fn recheck_earlier(
        &self,
        index: usize,
        rule: &DetectionRule,
        context: &mut GateContext,
    ) -> PipelineResult<Option<GateOutcome>> {
        for earlier in &self.gates[..index] {
            let outcome = earlier.evaluate(rule, context).await?;
            if !outcome.passed() {
                warn!(
                    rule_id = %rule.id,
                    failed_stage = %earlier.stage(),
                    "Revision failed an earlier gate"
                );
                let verdict = match outcome.verdict {
                    Verdict::Reject(failure) => Verdict::Fail(failure),
                    verdict => verdict,
                };
                return Ok(Some(GateOutcome {
                    verdict,
                    score: 0.0,
                    ..outcome
                }));
            }
            debug!(rule_id = %rule.id, stage = %earlier.stage(), "Revision passed earlier gate");
        }
        Ok(None)
    }
}

enum GateExit {
    Passed(DetectionRule),
    Rejected {
        reason: RejectionReason,
        best: Option<usize>,
        last: DetectionRule,
    },
}

impl RunLog {
    /// Record an attempt, keeping `best` on the highest score seen at this gate.
    fn push_attempt(&mut self, attempt: RefinementAttempt, best: &mut Option<usize>) {
        let index = self.attempts.len();
        let better = match best {
            Some(i) => attempt.score > self.attempts[*i].score,
            None => true,
        };
        self.attempts.push(attempt);
        if better {
            *best = Some(index);
        }
    }
}

fn collaborator_fault(err: RefinementError) -> PipelineError {
    match err {
        RefinementError::Collaborator(err) => PipelineError::Infrastructure(err),
        RefinementError::InvalidRevision { rule_id, reason } => PipelineError::Infrastructure(
            InfrastructureError::protocol("plan", format!("{}: {}", rule_id, reason)),
        ),
    }
}
