//! Strongly-typed identifiers for rules and test cases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a detection rule. Stable across revisions of the same rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RuleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a test case, used to correlate index hits back to cases.
///
/// An empty id means "not yet assigned"; see
/// [`DetectionRule::assign_case_ids`](crate::DetectionRule::assign_case_ids).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Positional id for a case that arrived without one.
    pub fn derived(rule: &RuleId, index: usize) -> Self {
        Self(format!("{}-case-{}", rule, index + 1))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unassigned(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CaseId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CaseId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_case_ids_are_one_based_and_prefixed() {
        let rule = RuleId::new("vss-delete");
        assert_eq!(CaseId::derived(&rule, 0).as_str(), "vss-delete-case-1");
        assert_eq!(CaseId::derived(&rule, 4).as_str(), "vss-delete-case-5");
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = CaseId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert!(CaseId::default().is_unassigned());
    }
}
