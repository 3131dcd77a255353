use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use vigil_types::{CaseId, InfrastructureError};

use crate::index::{IndexHealth, Namespace, SearchIndex};
use crate::memory::InMemoryIndex;

/// Scripted search index for testing.
///
/// Behaves like [`InMemoryIndex`] but can be told to fail an operation a
/// number of times, to hang inside `query`, or to drop ingested documents.
/// Every call is recorded by operation name.
#[derive(Default)]
pub struct ScriptedIndex {
    inner: InMemoryIndex,
    failures: Mutex<HashMap<&'static str, u32>>,
    calls: Mutex<Vec<String>>,
    hang_queries: AtomicBool,
    lose_documents: AtomicBool,
    query_started: Arc<Notify>,
}

impl ScriptedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `operation` with an unavailable error.
    pub fn fail(self, operation: &'static str, times: u32) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(operation, times);
        }
        self
    }

    /// Make every `query` call block until the future is dropped.
    pub fn hang_queries(self) -> Self {
        self.hang_queries.store(true, Ordering::SeqCst);
        self
    }

    /// Acknowledge ingests without storing the documents.
    pub fn lose_documents(self) -> Self {
        self.lose_documents.store(true, Ordering::SeqCst);
        self
    }

    /// Notified each time a query begins.
    pub fn query_started(&self) -> Arc<Notify> {
        self.query_started.clone()
    }

    pub fn live_namespaces(&self) -> Vec<Namespace> {
        self.inner.live_namespaces()
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|c| c.as_str() == operation).count())
            .unwrap_or(0)
    }

    fn record(&self, operation: &'static str) -> Result<(), InfrastructureError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(operation.to_string());
        }
        let mut failures = match self.failures.lock() {
            Ok(failures) => failures,
            Err(_) => return Ok(()),
        };
        match failures.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(InfrastructureError::unavailable(operation, "scripted failure"))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SearchIndex for ScriptedIndex {
    fn backend(&self) -> &'static str {
        "scripted"
    }

    async fn health(&self) -> Result<IndexHealth, InfrastructureError> {
        self.record("health")?;
        self.inner.health().await
    }

    async fn ingest(
        &self,
        namespace: &Namespace,
        id: &CaseId,
        document: &serde_json::Value,
    ) -> Result<(), InfrastructureError> {
        self.record("ingest")?;
        if self.lose_documents.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.ingest(namespace, id, document).await
    }

    async fn refresh(&self, namespace: &Namespace) -> Result<(), InfrastructureError> {
        self.record("refresh")?;
        self.inner.refresh(namespace).await
    }

    async fn count(&self, namespace: &Namespace) -> Result<usize, InfrastructureError> {
        self.record("count")?;
        self.inner.count(namespace).await
    }

    async fn query(
        &self,
        namespace: &Namespace,
        query: &str,
    ) -> Result<Vec<CaseId>, InfrastructureError> {
        self.record("query")?;
        self.query_started.notify_one();
        if self.hang_queries.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.query(namespace, query).await
    }

    async fn delete(&self, namespace: &Namespace) -> Result<(), InfrastructureError> {
        self.record("delete")?;
        self.inner.delete(namespace).await
    }
}
