//! Concurrent runs over a set of rules.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use vigil_harness::AbortSignal;
use vigil_types::{ConfusionMatrix, DetectionRule, RuleId};

use crate::controller::IterationController;
use crate::persist::ArtifactStore;
use crate::report::RunReport;

pub const DEFAULT_MAX_CONCURRENT_RULES: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Approved,
    Rejected,
    /// The run ended on an infrastructure fault or abort.
    Faulted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub rule_id: RuleId,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub entries: Vec<BatchEntry>,
}

impl BatchSummary {
    pub fn count(&self, status: EntryStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Counts per status, the summed matrix and mean metrics. Means cover
    /// only the rules that reached the integration test.
    pub fn totals(&self) -> BatchTotals {
        let mut totals = BatchTotals {
            rules: self.entries.len(),
            approved: self.count(EntryStatus::Approved),
            rejected: self.count(EntryStatus::Rejected),
            faulted: self.count(EntryStatus::Faulted),
            ..BatchTotals::default()
        };

        let mut measured = 0usize;
        for report in self.entries.iter().filter_map(|e| e.report.as_ref()) {
            let Some(matrix) = report.final_matrix() else {
                continue;
            };
            let metrics = matrix.metrics();
            totals.matrix.tp += matrix.tp;
            totals.matrix.fp += matrix.fp;
            totals.matrix.tn += matrix.tn;
            totals.matrix.fn_ += matrix.fn_;
            totals.mean_precision += metrics.precision;
            totals.mean_recall += metrics.recall;
            totals.mean_f1 += metrics.f1;
            measured += 1;
        }
        if measured > 0 {
            let n = measured as f64;
            totals.mean_precision /= n;
            totals.mean_recall /= n;
            totals.mean_f1 /= n;
        }
        totals.measured = measured;
        totals
    }

    /// 0 when everything was approved, 2 on any fault, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.count(EntryStatus::Faulted) > 0 {
            2
        } else if self.count(EntryStatus::Rejected) > 0 {
            1
        } else {
            0
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchTotals {
    pub rules: usize,
    pub approved: usize,
    pub rejected: usize,
    pub faulted: usize,
    /// Rules with a confusion matrix.
    pub measured: usize,
    pub matrix: ConfusionMatrix,
    pub mean_precision: f64,
    pub mean_recall: f64,
    pub mean_f1: f64,
}

pub struct BatchRunner {
    controller: Arc<IterationController>,
    store: Option<Arc<ArtifactStore>>,
    permits: Arc<Semaphore>,
}

impl BatchRunner {
    pub fn new(controller: Arc<IterationController>) -> Self {
        Self {
            controller,
            store: None,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_RULES)),
        }
    }

    pub fn with_store(mut self, store: ArtifactStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_max_concurrent_rules(mut self, permits: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    /// Run every rule; results come back in input order.
    pub async fn run(&self, rules: Vec<DetectionRule>, abort: AbortSignal) -> BatchSummary {
        info!(rules = rules.len(), "Starting batch");
        let runs = rules
            .into_iter()
            .map(|rule| self.run_one(rule, abort.clone()));
        let entries = join_all(runs).await;

        let summary = BatchSummary { entries };
        info!(
            approved = summary.count(EntryStatus::Approved),
            rejected = summary.count(EntryStatus::Rejected),
            faulted = summary.count(EntryStatus::Faulted),
            "Batch complete"
        );
        summary
    }

    async fn run_one(&self, rule: DetectionRule, abort: AbortSignal) -> BatchEntry {
        let rule_id = rule.id.clone();
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return BatchEntry {
                    rule_id,
                    status: EntryStatus::Faulted,
                    report: None,
                    error: Some("rule pool closed".to_string()),
                }
            }
        };

        let report = match self.controller.run_with_abort(rule, abort).await {
            Ok(report) => report,
            Err(err) => {
                error!(rule_id = %rule_id, error = %err, "Run failed");
                return BatchEntry {
                    rule_id,
                    status: EntryStatus::Faulted,
                    report: None,
                    error: Some(err.to_string()),
                };
            }
        };

        let status = if report.is_approved() {
            EntryStatus::Approved
        } else {
            EntryStatus::Rejected
        };
        let mut error = None;
        if let Some(store) = &self.store {
            if let Err(err) = store.persist(&report) {
                warn!(rule_id = %rule_id, error = %err, "Failed to persist artifact");
                error = Some(err.to_string());
            }
        }
        BatchEntry {
            rule_id,
            status: if error.is_some() { EntryStatus::Faulted } else { status },
            report: Some(report),
            error,
        }
    }
}
