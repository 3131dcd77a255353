use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use vigil_types::{FieldResearch, InfrastructureError};

use crate::research::{FieldResearcher, ResearchContext};

/// Mock field researcher for testing.
///
/// Answers from a fixed table; fields not in the table are reported invalid
/// with no alternatives. Counts every call.
pub struct MockFieldResearcher {
    answers: HashMap<String, FieldResearch>,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockFieldResearcher {
    pub fn unknown_everything() -> Self {
        Self {
            answers: HashMap::new(),
            fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails as if the research service were down.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::unknown_everything()
        }
    }

    pub fn with_answer(mut self, field: impl Into<String>, research: FieldResearch) -> Self {
        self.answers.insert(field.into(), research);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FieldResearcher for MockFieldResearcher {
    async fn research(
        &self,
        field: &str,
        _context: &ResearchContext,
    ) -> Result<FieldResearch, InfrastructureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(InfrastructureError::unavailable(
                "research",
                "mock research service unavailable",
            ));
        }
        Ok(self
            .answers
            .get(field)
            .cloned()
            .unwrap_or_else(|| FieldResearch::invalid(Vec::new())))
    }
}
