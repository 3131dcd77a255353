//! Vigil Refinement - deciding what a failed rule should change.
//!
//! A failed gate is described by a [`GateFailure`]. The [`RefinementEngine`]
//! turns it into a [`RefinementPlan`]: fix the query, fix the test corpus, or
//! both, with feedback that cites the offending cases. Ambiguous unexpected
//! matches are settled by the [`Judge`]'s realism check. Revisions come from
//! a [`RuleGenerator`] and must keep the rule's shape.

#![deny(unsafe_code)]

pub mod collaborators;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod mocks;

pub use collaborators::{Judge, RuleGenerator};
pub use engine::{check_revision, GateFailure, RefinementEngine, RefinementPlan};
pub use error::{RefinementError, RefinementResult};
pub use feedback::{Diagnosis, MAX_CITED_CASES};
