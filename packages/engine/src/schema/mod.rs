//! Entity schema definitions and the registry that maps schema keys to them.

mod definition;
mod registry;

use serde_json::Value as JsonValue;

use crate::errors::schema_error;
use crate::StrataError;

pub use definition::{schema_definition_json, validate_schema_definition};
pub(crate) use definition::{compile_schema, format_validation_errors};
pub use registry::{EntityViewVariant, SchemaRegistry};

const RESERVED_KEYS: &[&str] = &["state", "state_by_version", "state_history"];

/// JSON type of a declared property, used to convert SQL values to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl PropertyType {
    fn from_schema(node: &JsonValue) -> Self {
        let type_name = match node.get("type") {
            Some(JsonValue::String(name)) => Some(name.as_str()),
            Some(JsonValue::Array(names)) => names
                .iter()
                .filter_map(JsonValue::as_str)
                .find(|name| *name != "null"),
            _ => None,
        };
        match type_name {
            Some("string") => Self::String,
            Some("integer") => Self::Integer,
            Some("number") => Self::Number,
            Some("boolean") => Self::Boolean,
            Some("object") => Self::Object,
            Some("array") => Self::Array,
            _ => Self::Any,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDefinition {
    pub name: String,
    pub kind: PropertyType,
    /// CEL expression evaluated when an insert omits the property.
    pub default: Option<String>,
}

/// CEL expressions that pin operational columns for every row of a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaOverrides {
    pub file_id: Option<String>,
    pub plugin_key: Option<String>,
    pub version_id: Option<String>,
    pub untracked: Option<String>,
}

impl SchemaOverrides {
    fn from_schema(schema: &JsonValue) -> Self {
        let Some(map) = schema
            .get("x-strata-override-cols")
            .and_then(JsonValue::as_object)
        else {
            return Self::default();
        };
        let get = |column: &str| map.get(column).and_then(JsonValue::as_str).map(str::to_string);
        Self {
            file_id: get("strata_file_id"),
            plugin_key: get("strata_plugin_key"),
            version_id: get("strata_version_id"),
            untracked: get("strata_untracked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDefinition {
    pub key: String,
    pub version: String,
    /// Top-level property names, in declaration order of the pointers.
    pub primary_key: Vec<String>,
    pub unique: Vec<Vec<String>>,
    /// Sorted by name.
    pub properties: Vec<PropertyDefinition>,
    pub overrides: SchemaOverrides,
    pub immutable: bool,
    pub raw: JsonValue,
}

impl SchemaDefinition {
    /// Validates `raw` and extracts everything the engine needs to generate
    /// views and intercept writes for it.
    pub fn parse(raw: JsonValue) -> Result<Self, StrataError> {
        validate_schema_definition(&raw)?;

        let key = raw
            .get("x-strata-key")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| schema_error("schema is missing x-strata-key"))?
            .to_string();
        validate_schema_key(&key)?;
        let version = raw
            .get("x-strata-version")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| schema_error("schema is missing x-strata-version"))?
            .to_string();

        let primary_key = match raw.get("x-strata-primary-key").and_then(JsonValue::as_array) {
            Some(pointers) => pointers
                .iter()
                .filter_map(JsonValue::as_str)
                .map(|pointer| top_level_property(&key, pointer))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        if primary_key.is_empty() {
            return Err(schema_error(&format!(
                "schema `{key}` must declare at least one x-strata-primary-key pointer"
            )));
        }

        let unique = match raw.get("x-strata-unique").and_then(JsonValue::as_array) {
            Some(groups) => groups
                .iter()
                .filter_map(JsonValue::as_array)
                .map(|group| {
                    group
                        .iter()
                        .filter_map(JsonValue::as_str)
                        .map(|pointer| top_level_property(&key, pointer))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let mut properties = Vec::new();
        if let Some(map) = raw.get("properties").and_then(JsonValue::as_object) {
            for (name, node) in map {
                if name.starts_with("strata_") {
                    return Err(schema_error(&format!(
                        "schema `{key}` declares property `{name}`; the strata_ prefix is reserved for operational columns"
                    )));
                }
                properties.push(PropertyDefinition {
                    name: name.clone(),
                    kind: PropertyType::from_schema(node),
                    default: node
                        .get("x-strata-default")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                });
            }
        }
        properties.sort_by(|left, right| left.name.cmp(&right.name));

        Ok(Self {
            overrides: SchemaOverrides::from_schema(&raw),
            immutable: raw
                .get("x-strata-immutable")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
            key,
            version,
            primary_key,
            unique,
            properties,
            raw,
        })
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties
            .iter()
            .find(|property| property.name.eq_ignore_ascii_case(name))
    }

    pub fn cache_table_name(&self) -> String {
        crate::state::cache_table_name(&self.key)
    }
}

fn top_level_property(key: &str, pointer: &str) -> Result<String, StrataError> {
    let segments = definition::parse_json_pointer(pointer)?;
    match segments.as_slice() {
        [name] => Ok(name.clone()),
        _ => Err(schema_error(&format!(
            "schema `{key}`: key pointer \"{pointer}\" must name a top-level property"
        ))),
    }
}

/// Schema keys name entity views and cache tables, so they must not collide
/// with the logical relations, view suffixes or internal tables.
pub fn validate_schema_key(key: &str) -> Result<(), StrataError> {
    let well_formed = key
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_lowercase())
        && key
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');
    if !well_formed {
        return Err(schema_error(&format!(
            "schema key `{key}` must match ^[a-z][a-z0-9_]*$"
        )));
    }
    if RESERVED_KEYS.contains(&key) || key.starts_with("strata_internal") || key.starts_with("sqlite_") {
        return Err(schema_error(&format!("schema key `{key}` is reserved")));
    }
    if key.ends_with("_all") || key.ends_with("_history") {
        return Err(schema_error(&format!(
            "schema key `{key}` must not end in _all or _history"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{PropertyType, SchemaDefinition};
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "x-strata-key": "catalog_item",
            "x-strata-version": "1",
            "x-strata-primary-key": ["/category", "/id"],
            "x-strata-unique": [["/slug"]],
            "x-strata-override-cols": { "strata_file_id": "\"catalog\"" },
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "category": { "type": "string" },
                "slug": { "type": ["null", "string"] },
                "rank": { "type": "integer", "x-strata-default": "0" },
                "tags": { "type": "array" }
            },
            "required": ["id", "category"]
        })
    }

    #[test]
    fn extracts_keys_properties_and_overrides() {
        let schema = SchemaDefinition::parse(sample()).expect("parse");
        assert_eq!(schema.key, "catalog_item");
        assert_eq!(schema.primary_key, vec!["category", "id"]);
        assert_eq!(schema.unique, vec![vec!["slug".to_string()]]);
        let names: Vec<_> = schema.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["category", "id", "rank", "slug", "tags"]);
        assert_eq!(schema.property("slug").map(|p| p.kind), Some(PropertyType::String));
        assert_eq!(
            schema.property("rank").and_then(|p| p.default.clone()),
            Some("0".to_string())
        );
        assert_eq!(schema.overrides.file_id.as_deref(), Some("\"catalog\""));
        assert_eq!(
            schema.cache_table_name(),
            "strata_internal_state_cache_v1_catalog_item"
        );
    }

    #[test]
    fn requires_a_primary_key() {
        let mut raw = sample();
        raw.as_object_mut()
            .expect("object")
            .remove("x-strata-primary-key");
        let err = SchemaDefinition::parse(raw).expect_err("missing primary key");
        assert_eq!(err.code, "STRATA_ERROR_SCHEMA");
        assert!(err.description.contains("primary-key"));
    }

    #[test]
    fn rejects_reserved_keys_and_property_names() {
        let mut raw = sample();
        raw["x-strata-key"] = json!("state");
        assert!(SchemaDefinition::parse(raw).is_err());

        let mut raw = sample();
        raw["x-strata-key"] = json!("items_history");
        assert!(SchemaDefinition::parse(raw).is_err());

        let mut raw = sample();
        raw["properties"]["strata_version_id"] = json!({ "type": "string" });
        assert!(SchemaDefinition::parse(raw).is_err());
    }
}
