use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use vigil_types::{
    CaseOutcome, ConfusionMatrix, DetectionRule, InfrastructureError, Judgment, RefinementTarget,
    Stage, TestCase,
};

use crate::collaborators::{Judge, RuleGenerator};

/// A revision request as seen by [`ScriptedGenerator`].
#[derive(Clone, Debug, PartialEq)]
pub struct RevisionRequest {
    pub stage: Stage,
    pub target: RefinementTarget,
    pub feedback: String,
}

/// Rule generator that replays queued revisions.
///
/// Once the queue is empty it returns the rule it was given unchanged.
#[derive(Default)]
pub struct ScriptedGenerator {
    revisions: Mutex<VecDeque<DetectionRule>>,
    requests: Mutex<Vec<RevisionRequest>>,
    fail: bool,
}

impl ScriptedGenerator {
    pub fn pass_through() -> Self {
        Self::default()
    }

    /// Every call fails with an unavailable error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_revision(self, rule: DetectionRule) -> Self {
        if let Ok(mut revisions) = self.revisions.lock() {
            revisions.push_back(rule);
        }
        self
    }

    pub fn requests(&self) -> Vec<RevisionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RuleGenerator for ScriptedGenerator {
    async fn revise(
        &self,
        rule: &DetectionRule,
        stage: Stage,
        target: RefinementTarget,
        feedback: &str,
    ) -> Result<DetectionRule, InfrastructureError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RevisionRequest {
                stage,
                target,
                feedback: feedback.to_string(),
            });
        }
        if self.fail {
            return Err(InfrastructureError::unavailable("revise", "generator offline"));
        }
        let next = self.revisions.lock().ok().and_then(|mut r| r.pop_front());
        Ok(next.unwrap_or_else(|| rule.clone()))
    }
}

/// Judge with fixed responses.
///
/// Queued judgments are returned in order; after that the default judgment
/// repeats. The realism verdict is constant.
pub struct FixedJudge {
    judgments: Mutex<VecDeque<Judgment>>,
    default_judgment: Judgment,
    realism: RefinementTarget,
    evaluations: AtomicUsize,
    realism_calls: AtomicUsize,
}

impl FixedJudge {
    pub fn new(default_judgment: Judgment) -> Self {
        Self {
            judgments: Mutex::new(VecDeque::new()),
            default_judgment,
            realism: RefinementTarget::Query,
            evaluations: AtomicUsize::new(0),
            realism_calls: AtomicUsize::new(0),
        }
    }

    pub fn approving(score: f64) -> Self {
        Self::new(Judgment::approve(score))
    }

    pub fn with_judgments(self, judgments: impl IntoIterator<Item = Judgment>) -> Self {
        if let Ok(mut queue) = self.judgments.lock() {
            queue.extend(judgments);
        }
        self
    }

    pub fn with_realism(mut self, target: RefinementTarget) -> Self {
        self.realism = target;
        self
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn realism_calls(&self) -> usize {
        self.realism_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Judge for FixedJudge {
    async fn evaluate(
        &self,
        _rule: &DetectionRule,
        _matrix: &ConfusionMatrix,
        _corpus: &[TestCase],
    ) -> Result<Judgment, InfrastructureError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let queued = self.judgments.lock().ok().and_then(|mut q| q.pop_front());
        Ok(queued.unwrap_or_else(|| self.default_judgment.clone()))
    }

    async fn assess_realism(
        &self,
        _rule: &DetectionRule,
        _matrix: &ConfusionMatrix,
        _corpus: &[TestCase],
        _unexpected: &[CaseOutcome],
    ) -> Result<RefinementTarget, InfrastructureError> {
        self.realism_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.realism)
    }
}
