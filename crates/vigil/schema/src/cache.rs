//! Session-scoped field knowledge cache.
//!
//! One entry per field name. Concurrent lookups for the same unfamiliar name
//! share a single in-flight research call; resolved entries are read without
//! locking the whole map. Failed research leaves the entry empty so a later
//! lookup can try again.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;

use vigil_types::{FieldKnowledge, InfrastructureError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub research_calls: u64,
}

#[derive(Default)]
pub struct FieldKnowledgeCache {
    entries: DashMap<String, Arc<OnceCell<FieldKnowledge>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    research_calls: AtomicU64,
}

impl FieldKnowledgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved knowledge for `field`, if any.
    pub fn get(&self, field: &str) -> Option<FieldKnowledge> {
        self.entries
            .get(field)
            .and_then(|cell| cell.get().cloned())
    }

    /// Return cached knowledge for `field`, or run `research` to obtain it.
    ///
    /// At most one `research` future runs per field at a time; concurrent
    /// callers wait for it and receive the same result.
    pub async fn get_or_research<F, Fut>(
        &self,
        field: &str,
        research: F,
    ) -> Result<FieldKnowledge, InfrastructureError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FieldKnowledge, InfrastructureError>>,
    {
        let cell = self
            .entries
            .entry(field.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(known) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(known.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let knowledge = cell
            .get_or_try_init(|| async {
                self.research_calls.fetch_add(1, Ordering::Relaxed);
                debug!(field, "Researching unfamiliar field");
                research().await
            })
            .await?;
        Ok(knowledge.clone())
    }

    pub fn snapshot(&self) -> Vec<FieldKnowledge> {
        let mut known: Vec<FieldKnowledge> = self
            .entries
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();
        known.sort_by(|a, b| a.field.cmp(&b.field));
        known
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self
                .entries
                .iter()
                .filter(|entry| entry.value().initialized())
                .count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            research_calls: self.research_calls.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use vigil_types::{Confidence, FieldResearch};

    fn researched(field: &str) -> FieldKnowledge {
        FieldKnowledge::from_research(
            field,
            FieldResearch {
                valid: true,
                field_type: Some("keyword".into()),
                confidence: Confidence::High,
                alternatives: vec![],
            },
        )
    }

    #[tokio::test]
    async fn second_lookup_is_a_hit() {
        let cache = FieldKnowledgeCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let knowledge = cache
                .get_or_research("winlog.event_data.TargetImage", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(researched("winlog.event_data.TargetImage"))
                })
                .await
                .unwrap();
            assert!(knowledge.valid);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.research_calls, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_research_call() {
        let cache = Arc::new(FieldKnowledgeCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_research("custom.field", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(researched("custom.field"))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_research_is_not_cached() {
        let cache = FieldKnowledgeCache::new();
        let first = cache
            .get_or_research("flaky.field", || async {
                Err(InfrastructureError::unavailable("research", "503"))
            })
            .await;
        assert!(first.is_err());
        assert!(cache.get("flaky.field").is_none());

        let second = cache
            .get_or_research("flaky.field", || async { Ok(researched("flaky.field")) })
            .await;
        assert!(second.is_ok());
        assert_eq!(cache.stats().research_calls, 2);
    }
}
