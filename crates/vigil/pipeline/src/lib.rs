//! Vigil Pipeline - bounded validation and refinement of detection rules.
//!
//! The [`IterationController`] moves each rule through three gates:
//!
//! 1. **SyntaxAndSchema**: structural lint, query syntax, schema fields
//! 2. **IntegrationTest**: corpus readiness, harness run, precision/recall
//! 3. **Judgment**: the judge's quality score and decision
//!
//! A failed gate is refined and re-entered while its budget lasts. The
//! [`BatchRunner`] runs many rules concurrently and the [`ArtifactStore`]
//! writes approved rules and rejection reports.

#![deny(unsafe_code)]

pub mod batch;
pub mod controller;
pub mod error;
pub mod gates;
pub mod loader;
pub mod persist;
pub mod report;

pub use batch::{
    BatchEntry, BatchRunner, BatchSummary, BatchTotals, EntryStatus, DEFAULT_MAX_CONCURRENT_RULES,
};
pub use controller::{ControllerConfig, IterationController, Phase, StageBudgets, Transition};
pub use error::{PipelineError, PipelineResult};
pub use gates::{
    Gate, GateContext, GateOutcome, IntegrationTestGate, JudgmentGate, SyntaxAndSchemaGate,
    Verdict, DEFAULT_APPROVE_THRESHOLD,
};
pub use loader::{load_rule, load_rules};
pub use persist::{ApprovedArtifact, ArtifactStore, RejectionArtifact};
pub use report::{RejectionReason, RunOutcome, RunReport};
