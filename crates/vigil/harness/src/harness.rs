//! Integration test harness.
//!
//! A run allocates a fresh namespace, ingests every test case under its case
//! id, refreshes, runs the rule's query and tabulates the matches. The
//! namespace is deleted afterwards whether the run succeeded, failed or was
//! aborted. If the run future itself is dropped, a guard schedules the delete
//! on the runtime.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use vigil_types::{
    CaseId, CaseOutcome, ConfusionMatrix, DetectionRule, InfrastructureError, RetryPolicy,
};

use crate::abort::AbortSignal;
use crate::error::HarnessError;
use crate::index::{IndexHealth, Namespace, SearchIndex};

/// Result of one harness run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarnessReport {
    pub namespace: Namespace,
    pub ingested: usize,
    pub matched: Vec<CaseId>,
    pub matrix: ConfusionMatrix,
    pub outcomes: Vec<CaseOutcome>,
    /// Set when the namespace could not be deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
    pub elapsed_ms: u64,
}

pub struct IntegrationHarness {
    index: Arc<dyn SearchIndex>,
    retry: RetryPolicy,
    namespace_prefix: String,
}

impl IntegrationHarness {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self {
            index,
            retry: RetryPolicy::default(),
            namespace_prefix: "vigil".to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }

    pub fn backend(&self) -> &'static str {
        self.index.backend()
    }

    /// Poll the index until it reports ready or `deadline` passes.
    pub async fn wait_until_ready(&self, deadline: Duration) -> Result<IndexHealth, InfrastructureError> {
        let started = Instant::now();
        let poll = Duration::from_millis(500);
        loop {
            let remaining = deadline.saturating_sub(started.elapsed());
            let attempt = tokio::time::timeout(remaining.max(Duration::from_millis(1)), self.index.health()).await;
            match attempt {
                Ok(Ok(health)) if health.is_ready() => {
                    info!(backend = self.index.backend(), status = ?health.status, "Search index ready");
                    return Ok(health);
                }
                Ok(Ok(health)) => debug!(status = ?health.status, "Search index not ready yet"),
                Ok(Err(err)) => debug!(error = %err, "Search index health check failed"),
                Err(_) => {}
            }
            if started.elapsed() >= deadline {
                return Err(InfrastructureError::timeout(
                    "health",
                    format!("index not ready within {}s", deadline.as_secs()),
                ));
            }
            tokio::time::sleep(poll.min(deadline.saturating_sub(started.elapsed()))).await;
        }
    }

    pub async fn run(&self, rule: &DetectionRule) -> Result<HarnessReport, HarnessError> {
        self.run_with_abort(rule, AbortSignal::never()).await
    }

    /// Run `rule`'s corpus through the index. On abort the namespace is torn
    /// down before this returns [`HarnessError::Aborted`].
    #[instrument(skip(self, rule, abort), fields(rule_id = %rule.id, backend = self.index.backend()))]
    pub async fn run_with_abort(
        &self,
        rule: &DetectionRule,
        mut abort: AbortSignal,
    ) -> Result<HarnessReport, HarnessError> {
        let started = Instant::now();
        let mut rule = rule.clone();
        rule.assign_case_ids();

        let namespace = Namespace::allocate(&self.namespace_prefix, &rule.id);
        let mut guard = NamespaceGuard::new(self.index.clone(), namespace.clone());
        debug!(namespace = %namespace, cases = rule.test_cases.len(), "Allocated namespace");

        let outcome = tokio::select! {
            result = self.exercise(&namespace, &rule) => Some(result),
            _ = abort.aborted() => None,
        };

        let teardown = self.teardown(&namespace).await;
        guard.disarm();
        let teardown_error = match teardown {
            Ok(()) => None,
            Err(err) => {
                error!(namespace = %namespace, error = %err, "Namespace teardown failed");
                Some(err.to_string())
            }
        };

        let (ingested, matched) = match outcome {
            None => {
                warn!(namespace = %namespace, "Harness run aborted");
                return Err(HarnessError::Aborted { namespace });
            }
            Some(result) => result?,
        };

        let matched_set: HashSet<CaseId> = matched.iter().cloned().collect();
        let (matrix, outcomes) = ConfusionMatrix::tabulate(&rule.test_cases, &matched_set);
        info!(
            namespace = %namespace,
            ingested,
            matched = matched.len(),
            %matrix,
            "Harness run complete"
        );

        Ok(HarnessReport {
            namespace,
            ingested,
            matched,
            matrix,
            outcomes,
            teardown_error,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn exercise(
        &self,
        namespace: &Namespace,
        rule: &DetectionRule,
    ) -> Result<(usize, Vec<CaseId>), InfrastructureError> {
        let index = &self.index;

        for case in &rule.test_cases {
            self.retry
                .run("ingest", || index.ingest(namespace, &case.id, &case.log_entry))
                .await?;
        }
        self.retry.run("refresh", || index.refresh(namespace)).await?;

        let ingested = self.retry.run("count", || index.count(namespace)).await?;
        if ingested != rule.test_cases.len() {
            return Err(InfrastructureError::protocol(
                "ingest",
                format!(
                    "index reports {} documents in {}, expected {}",
                    ingested,
                    namespace,
                    rule.test_cases.len()
                ),
            ));
        }

        let matched = self
            .retry
            .run("query", || index.query(namespace, &rule.query))
            .await?;
        Ok((ingested, matched))
    }

    async fn teardown(&self, namespace: &Namespace) -> Result<(), InfrastructureError> {
        let index = &self.index;
        self.retry.run("delete", || index.delete(namespace)).await?;
        debug!(namespace = %namespace, "Namespace deleted");
        Ok(())
    }
}

/// Deletes the namespace in the background if the run is dropped mid-flight.
struct NamespaceGuard {
    index: Arc<dyn SearchIndex>,
    namespace: Option<Namespace>,
}

impl NamespaceGuard {
    fn new(index: Arc<dyn SearchIndex>, namespace: Namespace) -> Self {
        Self {
            index,
            namespace: Some(namespace),
        }
    }

    fn disarm(&mut self) {
        self.namespace = None;
    }
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        let Some(namespace) = self.namespace.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(namespace = %namespace, "Harness run dropped, scheduling namespace teardown");
                let index = self.index.clone();
                handle.spawn(async move {
                    if let Err(err) = index.delete(&namespace).await {
                        error!(namespace = %namespace, error = %err, "Background teardown failed");
                    }
                });
            }
            Err(_) => {
                error!(namespace = %namespace, "Harness run dropped outside a runtime; namespace leaked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::abort_pair;
    use crate::memory::InMemoryIndex;
    use crate::mocks::ScriptedIndex;
    use serde_json::json;
    use vigil_types::{CaseLabel, InfrastructureKind, TestCase};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(5),
        }
    }

    fn vss_rule() -> DetectionRule {
        DetectionRule::new(
            "vss-delete",
            "Shadow copy deletion",
            "event.code:1 AND process.name:vssadmin.exe AND process.command_line:*delete*shadows*",
        )
        .with_case(TestCase::new(
            "",
            CaseLabel::TruePositive,
            json!({"event": {"code": 1}, "process": {"name": "vssadmin.exe", "command_line": "vssadmin delete shadows /all /quiet"}}),
            true,
        ))
        .with_case(TestCase::new(
            "",
            CaseLabel::FalseNegative,
            json!({"event": {"code": 1}, "process": {"name": "powershell.exe", "command_line": "Get-WmiObject Win32_ShadowCopy | %{$_.Delete()}"}}),
            false,
        ))
    }

    #[tokio::test]
    async fn successful_run_tabulates_and_tears_down() {
        let index = Arc::new(InMemoryIndex::new());
        let harness = IntegrationHarness::new(index.clone()).with_retry(fast_retry());

        let report = harness.run(&vss_rule()).await.unwrap();
        assert_eq!(report.ingested, 2);
        assert_eq!(report.matched, vec![CaseId::new("vss-delete-case-1")]);
        assert_eq!(report.matrix.precision(), 1.0);
        assert_eq!(report.matrix.recall(), 1.0);
        assert!(report.teardown_error.is_none());
        assert!(index.live_namespaces().is_empty());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let index = Arc::new(ScriptedIndex::new().fail("ingest", 1).fail("query", 2));
        let harness = IntegrationHarness::new(index.clone()).with_retry(fast_retry());

        let report = harness.run(&vss_rule()).await.unwrap();
        assert_eq!(report.matrix.tp, 1);
        assert_eq!(index.calls("query"), 3);
        assert!(index.live_namespaces().is_empty());
    }

    #[tokio::test]
    async fn persistent_failure_still_tears_down() {
        let index = Arc::new(ScriptedIndex::new().fail("query", 10));
        let harness = IntegrationHarness::new(index.clone()).with_retry(fast_retry());

        let err = harness.run(&vss_rule()).await.unwrap_err();
        match err {
            HarnessError::Infrastructure(e) => {
                assert_eq!(e.operation, "query");
                assert_eq!(e.attempts, 3);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(index.calls("delete"), 1);
        assert!(index.live_namespaces().is_empty());
    }

    #[tokio::test]
    async fn lost_documents_are_an_infrastructure_fault() {
        let index = Arc::new(ScriptedIndex::new().lose_documents());
        let harness = IntegrationHarness::new(index.clone()).with_retry(fast_retry());

        let err = harness.run(&vss_rule()).await.unwrap_err();
        match err {
            HarnessError::Infrastructure(e) => assert_eq!(e.kind, InfrastructureKind::Protocol),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn abort_mid_query_tears_down_before_returning() {
        let index = Arc::new(ScriptedIndex::new().hang_queries());
        let started = index.query_started();
        let harness = Arc::new(IntegrationHarness::new(index.clone()).with_retry(fast_retry()));
        let (controller, signal) = abort_pair();

        let task = {
            let harness = harness.clone();
            tokio::spawn(async move { harness.run_with_abort(&vss_rule(), signal).await })
        };
        started.notified().await;
        assert_eq!(index.live_namespaces().len(), 1);

        controller.abort();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, HarnessError::Aborted { .. }));
        assert!(index.live_namespaces().is_empty());
    }

    #[tokio::test]
    async fn dropped_run_schedules_teardown() {
        let index = Arc::new(ScriptedIndex::new().hang_queries());
        let started = index.query_started();
        let harness = Arc::new(IntegrationHarness::new(index.clone()).with_retry(fast_retry()));

        let task = {
            let harness = harness.clone();
            tokio::spawn(async move { harness.run(&vss_rule()).await })
        };
        started.notified().await;
        task.abort();
        let _ = task.await;

        for _ in 0..50 {
            if index.live_namespaces().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(index.live_namespaces().is_empty());
    }

    #[tokio::test]
    async fn concurrent_runs_use_distinct_namespaces() {
        let index = Arc::new(InMemoryIndex::new());
        let harness = Arc::new(IntegrationHarness::new(index.clone()));
        let (rule_a, rule_b) = (vss_rule(), vss_rule());
        let (a, b) = tokio::join!(harness.run(&rule_a), harness.run(&rule_b));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.namespace, b.namespace);
        assert_eq!(a.matrix, b.matrix);
    }

    #[tokio::test]
    async fn readiness_waits_for_healthy_index() {
        let index = Arc::new(ScriptedIndex::new().fail("health", 2));
        let harness = IntegrationHarness::new(index.clone());
        let health = harness
            .wait_until_ready(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(health.is_ready());
        assert_eq!(index.calls("health"), 3);
    }
}
