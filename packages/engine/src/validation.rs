use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use jsonschema::JSONSchema;
use serde_json::Value as JsonValue;

use crate::errors::validation_error;
use crate::schema::{compile_schema, format_validation_errors, SchemaDefinition};
use crate::StrataError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SchemaCacheKey {
    schema_key: String,
    schema_version: String,
}

/// Compiled snapshot validators, keyed by schema key and version.
#[derive(Debug, Default)]
pub struct SchemaCache {
    inner: RwLock<HashMap<SchemaCacheKey, Arc<JSONSchema>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn compiled(&self, schema: &SchemaDefinition) -> Result<Arc<JSONSchema>, StrataError> {
        let key = SchemaCacheKey {
            schema_key: schema.key.clone(),
            schema_version: schema.version.clone(),
        };
        if let Some(existing) = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
        {
            return Ok(existing);
        }

        let compiled = Arc::new(compile_schema(&schema.raw)?);
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, compiled.clone());
        Ok(compiled)
    }
}

/// Validates one snapshot against its schema.
pub fn validate_snapshot_content(
    cache: &SchemaCache,
    schema: &SchemaDefinition,
    snapshot: &JsonValue,
) -> Result<(), StrataError> {
    let validator = cache.compiled(schema)?;
    if let Err(errors) = validator.validate(snapshot) {
        let details = format_validation_errors(errors);
        return Err(validation_error(&format!(
            "snapshot for schema `{}` (version {}) is invalid: {details}",
            schema.key, schema.version
        )));
    }
    Ok(())
}

/// The values a unique group takes in `snapshot`, or `None` when any member
/// is missing or null (such rows never collide).
pub(crate) fn unique_group_values(snapshot: &JsonValue, group: &[String]) -> Option<Vec<JsonValue>> {
    group
        .iter()
        .map(|property| match snapshot.get(property) {
            None | Some(JsonValue::Null) => None,
            Some(value) => Some(value.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{unique_group_values, validate_snapshot_content, SchemaCache};
    use crate::schema::SchemaDefinition;
    use serde_json::json;

    fn schema() -> SchemaDefinition {
        SchemaDefinition::parse(json!({
            "x-strata-key": "task",
            "x-strata-version": "1",
            "x-strata-primary-key": ["/id"],
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "done": { "type": "boolean" }
            },
            "required": ["id", "done"],
            "additionalProperties": false
        }))
        .expect("schema")
    }

    #[test]
    fn validates_snapshots_against_the_schema() {
        let cache = SchemaCache::new();
        let schema = schema();
        validate_snapshot_content(&cache, &schema, &json!({ "id": "t1", "done": false }))
            .expect("valid snapshot");

        let err = validate_snapshot_content(&cache, &schema, &json!({ "id": "t1" }))
            .expect_err("missing required property");
        assert_eq!(err.code, "STRATA_ERROR_VALIDATION");
        assert!(err.description.contains("task"));

        assert!(validate_snapshot_content(
            &cache,
            &schema,
            &json!({ "id": "t1", "done": true, "extra": 1 })
        )
        .is_err());
        assert_eq!(cache.inner.read().expect("lock").len(), 1);
    }

    #[test]
    fn unique_groups_skip_null_members() {
        let group = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            unique_group_values(&json!({ "a": 1, "b": "x" }), &group),
            Some(vec![json!(1), json!("x")])
        );
        assert_eq!(unique_group_values(&json!({ "a": 1, "b": null }), &group), None);
        assert_eq!(unique_group_values(&json!({ "a": 1 }), &group), None);
    }
}
