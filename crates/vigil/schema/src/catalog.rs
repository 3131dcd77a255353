//! Authoritative field catalog.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};

const ECS_CORE: &str = include_str!("../catalog/ecs_core.yml");

/// Minimum Jaro-Winkler similarity for a schema field to be suggested.
pub const SIMILARITY_THRESHOLD: f64 = 0.8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldLevel {
    Core,
    #[default]
    Extended,
    Custom,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub level: FieldLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Closed set of known fields with type and level metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub fields: BTreeMap<String, FieldDefinition>,
}

impl FieldSchema {
    /// The built-in ECS catalog.
    pub fn ecs_core() -> SchemaResult<Self> {
        serde_yaml::from_str(ECS_CORE).map_err(|e| SchemaError::Parse {
            path: "<builtin ecs_core.yml>".into(),
            message: e.to_string(),
        })
    }

    /// Load a catalog from a `.yml`, `.yaml` or `.json` file.
    pub fn load(path: &Path) -> SchemaResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| SchemaError::Parse {
            path: path.to_path_buf(),
            message,
        };
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => {
                serde_yaml::from_str(&text).map_err(|e| parse_error(e.to_string()))
            }
            Some("json") => serde_json::from_str(&text).map_err(|e| parse_error(e.to_string())),
            _ => Err(SchemaError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn from_fields<I, K, T>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(k, t)| {
                    (
                        k.into(),
                        FieldDefinition {
                            field_type: t.into(),
                            level: FieldLevel::default(),
                            description: None,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldDefinition> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Schema fields similar to `field`, most similar first.
    pub fn suggest(&self, field: &str, limit: usize) -> Vec<String> {
        let mut scored: Vec<(f64, &String)> = self
            .fields
            .keys()
            .filter(|known| known.as_str() != field)
            .map(|known| (strsim::jaro_winkler(field, known), known))
            .filter(|(score, _)| *score > SIMILARITY_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_catalog_loads() {
        let schema = FieldSchema::ecs_core().unwrap();
        assert!(schema.contains("process.command_line"));
        assert!(schema.contains("@timestamp"));
        assert_eq!(
            schema.get("destination.port").map(|d| d.field_type.as_str()),
            Some("long")
        );
    }

    #[test]
    fn suggests_close_field_names_first() {
        let schema = FieldSchema::ecs_core().unwrap();
        let suggestions = schema.suggest("process.cmdline", 5);
        assert_eq!(suggestions.first().map(String::as_str), Some("process.command_line"));
        assert!(suggestions.len() <= 5);
        assert!(schema.suggest("zzzz", 5).is_empty());
    }

    #[test]
    fn loads_json_catalog_from_disk() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"name": "custom", "fields": {{"app.user": {{"type": "keyword", "level": "custom"}}}}}}"#
        )
        .unwrap();
        let schema = FieldSchema::load(file.path()).unwrap();
        assert_eq!(schema.name, "custom");
        assert_eq!(schema.get("app.user").unwrap().level, FieldLevel::Custom);
    }

    #[test]
    fn rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(matches!(
            FieldSchema::load(file.path()),
            Err(SchemaError::UnsupportedFormat(_))
        ));
    }
}
