//! Field knowledge: what the pipeline has learned about a field name.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeSource {
    Schema,
    Research,
}

/// Answer of the field research collaborator for one field name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldResearch {
    pub valid: bool,
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
    pub confidence: Confidence,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl FieldResearch {
    pub fn invalid(alternatives: Vec<String>) -> Self {
        Self {
            valid: false,
            field_type: None,
            confidence: Confidence::High,
            alternatives,
        }
    }
}

/// Resolved knowledge about a field, cached for the rest of the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldKnowledge {
    pub field: String,
    pub valid: bool,
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
    pub confidence: Confidence,
    pub source: KnowledgeSource,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl FieldKnowledge {
    pub fn from_schema(field: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            valid: true,
            field_type: Some(field_type.into()),
            confidence: Confidence::High,
            source: KnowledgeSource::Schema,
            alternatives: Vec::new(),
        }
    }

    pub fn from_research(field: impl Into<String>, research: FieldResearch) -> Self {
        Self {
            field: field.into(),
            valid: research.valid,
            field_type: research.field_type,
            confidence: research.confidence,
            source: KnowledgeSource::Research,
            alternatives: research.alternatives,
        }
    }

    /// Valid, and not merely a low-confidence guess.
    pub fn is_usable(&self) -> bool {
        self.valid && self.confidence != Confidence::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_research_is_not_usable() {
        let research = FieldResearch {
            valid: true,
            field_type: Some("keyword".into()),
            confidence: Confidence::Low,
            alternatives: vec![],
        };
        let knowledge = FieldKnowledge::from_research("winlog.event_data.Foo", research);
        assert!(knowledge.valid);
        assert!(!knowledge.is_usable());
        assert!(FieldKnowledge::from_schema("process.name", "keyword").is_usable());
    }

    #[test]
    fn research_parses_collaborator_json() {
        let research: FieldResearch = serde_json::from_str(
            r#"{"valid": false, "type": null, "confidence": "high", "alternatives": ["process.command_line"]}"#,
        )
        .unwrap();
        assert!(!research.valid);
        assert_eq!(research.alternatives, vec!["process.command_line"]);
    }
}
