//! Conversions between SQL values and schema-typed JSON, plus evaluation of
//! CEL defaults and column overrides.

use base64::Engine as _;
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};

use crate::cel::CelEvaluator;
use crate::errors::{schema_error, validation_error};
use crate::functions::EngineFunctions;
use crate::schema::{PropertyDefinition, PropertyType, SchemaDefinition};
use crate::{StrataError, Value};

/// Converts a SQL value written to `property` into its JSON form.
pub(crate) fn sql_to_json(
    value: &Value,
    property: &PropertyDefinition,
) -> Result<JsonValue, StrataError> {
    Ok(match (value, property.kind) {
        (Value::Null, _) => JsonValue::Null,
        (Value::Integer(number), PropertyType::Boolean) if matches!(number, 0 | 1) => {
            JsonValue::Bool(*number == 1)
        }
        (Value::Text(text), PropertyType::Boolean) if text == "true" || text == "false" => {
            JsonValue::Bool(text == "true")
        }
        (Value::Real(number), PropertyType::Integer) if number.fract() == 0.0 => {
            JsonValue::from(*number as i64)
        }
        (Value::Text(text), PropertyType::Object | PropertyType::Array | PropertyType::Any) => {
            serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.clone()))
        }
        (Value::Text(text), _) => JsonValue::String(text.clone()),
        (Value::Integer(number), _) => JsonValue::from(*number),
        (Value::Real(number), _) => JsonNumber::from_f64(*number)
            .map(JsonValue::Number)
            .ok_or_else(|| {
                validation_error(&format!(
                    "property `{}` received a non-finite number",
                    property.name
                ))
            })?,
        (Value::Blob(_), _) => {
            return Err(validation_error(&format!(
                "property `{}` does not accept blob values",
                property.name
            )))
        }
    })
}

/// The SQL value a JSON property reads back as.
pub(crate) fn json_to_sql(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(flag) => Value::Integer(i64::from(*flag)),
        JsonValue::Number(number) => match number.as_i64() {
            Some(integer) => Value::Integer(integer),
            None => Value::Real(number.as_f64().unwrap_or_default()),
        },
        JsonValue::String(text) => Value::Text(text.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// Parses a `snapshot_content`-style column: JSON text or NULL.
pub(crate) fn json_column(value: &Value, column: &str) -> Result<Option<JsonValue>, StrataError> {
    match value {
        Value::Null => Ok(None),
        Value::Text(text) => serde_json::from_str(text).map(Some).map_err(|err| {
            validation_error(&format!("column `{column}` must contain valid JSON: {err}"))
        }),
        other => Err(validation_error(&format!(
            "column `{column}` must contain JSON text, got {other:?}"
        ))),
    }
}

pub(crate) fn text_column(value: &Value, column: &str) -> Result<String, StrataError> {
    match value {
        Value::Text(text) => Ok(text.clone()),
        Value::Integer(number) => Ok(number.to_string()),
        other => Err(validation_error(&format!(
            "column `{column}` must be text, got {other:?}"
        ))),
    }
}

pub(crate) fn optional_text_column(
    value: &Value,
    column: &str,
) -> Result<Option<String>, StrataError> {
    match value {
        Value::Null => Ok(None),
        other => text_column(other, column).map(Some),
    }
}

/// SQL truthiness: 1, `true` and `"1"` are true; anything else is false.
pub(crate) fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Integer(number) => *number != 0,
        Value::Real(number) => *number != 0.0,
        Value::Text(text) => text == "1" || text.eq_ignore_ascii_case("true"),
        Value::Null | Value::Blob(_) => false,
    }
}

pub(crate) fn json_is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(flag) => *flag,
        JsonValue::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
        JsonValue::String(text) => text == "1" || text.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// One primary-key part of an entity id.
pub(crate) fn entity_id_part(value: &JsonValue, pointer: &str) -> Result<String, StrataError> {
    match value {
        JsonValue::String(text) => Ok(text.clone()),
        JsonValue::Number(number) => Ok(number.to_string()),
        JsonValue::Bool(flag) => Ok(flag.to_string()),
        JsonValue::Null => Err(validation_error(&format!(
            "primary key property `{pointer}` must not be null"
        ))),
        _ => Err(validation_error(&format!(
            "primary key property `{pointer}` must be a scalar"
        ))),
    }
}

/// Derives the entity id from the schema's primary key.
pub(crate) fn derive_entity_id(
    schema: &SchemaDefinition,
    snapshot: &JsonValue,
) -> Result<String, StrataError> {
    let parts = schema
        .primary_key
        .iter()
        .map(|property| {
            let value = snapshot.get(property).ok_or_else(|| {
                validation_error(&format!(
                    "schema `{}` requires primary key property `{property}`",
                    schema.key
                ))
            })?;
            entity_id_part(value, property)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(crate::state::composite_entity_id(&parts))
}

/// Fills omitted properties from their `x-strata-default` expressions. The
/// provided values are visible to the expressions by name.
pub(crate) fn apply_defaults(
    schema: &SchemaDefinition,
    snapshot: &mut JsonMap<String, JsonValue>,
    cel: &CelEvaluator,
    functions: &EngineFunctions,
) -> Result<(), StrataError> {
    let context = snapshot.clone();
    for property in &schema.properties {
        let Some(expression) = &property.default else {
            continue;
        };
        if snapshot.contains_key(&property.name) {
            continue;
        }
        let value = cel
            .evaluate_with_functions(expression, &context, functions.clone())
            .map_err(|err| {
                validation_error(&format!(
                    "default for `{}.{}` failed: {}",
                    schema.key, property.name, err.description
                ))
            })?;
        snapshot.insert(property.name.clone(), value);
    }
    Ok(())
}

/// Evaluates an override-column expression against the row's snapshot.
pub(crate) fn evaluate_override(
    expression: &str,
    snapshot: &JsonMap<String, JsonValue>,
    cel: &CelEvaluator,
    functions: &EngineFunctions,
) -> Result<JsonValue, StrataError> {
    cel.evaluate_with_functions(expression, snapshot, functions.clone())
}

pub(crate) fn override_text(
    schema: &SchemaDefinition,
    column: &str,
    expression: &str,
    snapshot: &JsonMap<String, JsonValue>,
    cel: &CelEvaluator,
    functions: &EngineFunctions,
) -> Result<String, StrataError> {
    match evaluate_override(expression, snapshot, cel, functions)? {
        JsonValue::String(text) => Ok(text),
        other => Err(schema_error(&format!(
            "override for `{column}` in schema `{}` must evaluate to a string, got {other}",
            schema.key
        ))),
    }
}

/// The version an entity view is pinned to, if its schema overrides it.
pub(crate) fn pinned_version_id(
    schema: &SchemaDefinition,
    cel: &CelEvaluator,
) -> Result<Option<String>, StrataError> {
    let Some(expression) = &schema.overrides.version_id else {
        return Ok(None);
    };
    match cel.evaluate(expression, &JsonMap::new())? {
        JsonValue::String(version_id) => Ok(Some(version_id)),
        other => Err(schema_error(&format!(
            "version override of schema `{}` must be a constant string, got {other}",
            schema.key
        ))),
    }
}

pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>, StrataError> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|err| validation_error(&format!("invalid base64 content: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{RuntimeFunctionProvider, SharedFunctionProvider};
    use serde_json::json;

    fn property(name: &str, kind: PropertyType) -> PropertyDefinition {
        PropertyDefinition {
            name: name.to_string(),
            kind,
            default: None,
        }
    }

    #[test]
    fn converts_sql_values_by_property_type() {
        let flag = property("done", PropertyType::Boolean);
        assert_eq!(sql_to_json(&Value::Integer(1), &flag).unwrap(), json!(true));
        assert_eq!(sql_to_json(&Value::Integer(7), &flag).unwrap(), json!(7));

        let object = property("meta", PropertyType::Object);
        assert_eq!(
            sql_to_json(&Value::Text(r#"{"a":1}"#.to_string()), &object).unwrap(),
            json!({ "a": 1 })
        );
        let text = property("title", PropertyType::String);
        assert_eq!(
            sql_to_json(&Value::Text("{}".to_string()), &text).unwrap(),
            json!("{}")
        );
        assert!(sql_to_json(&Value::Blob(vec![1]), &text).is_err());
    }

    #[test]
    fn composite_ids_join_primary_key_parts() {
        let schema = SchemaDefinition::parse(json!({
            "x-strata-key": "task",
            "x-strata-version": "1",
            "x-strata-primary-key": ["/category", "/id"],
            "type": "object",
            "properties": {
                "category": { "type": "string" },
                "id": { "type": "string" }
            },
            "additionalProperties": false
        }))
        .expect("schema");
        assert_eq!(
            derive_entity_id(&schema, &json!({ "category": "cat1", "id": "id1" })).unwrap(),
            "cat1::id1"
        );
        assert_eq!(
            derive_entity_id(&schema, &json!({ "category": "a:b", "id": "1" })).unwrap(),
            "a%3Ab::1"
        );
        assert!(derive_entity_id(&schema, &json!({ "category": "x" })).is_err());
    }

    #[test]
    fn defaults_only_fill_omitted_properties() {
        let schema = SchemaDefinition::parse(json!({
            "x-strata-key": "note",
            "x-strata-version": "1",
            "x-strata-primary-key": ["/id"],
            "type": "object",
            "properties": {
                "id": { "type": "string", "x-strata-default": "strata_uuid_v7()" },
                "title": { "type": "string", "x-strata-default": "'untitled'" }
            }
        }))
        .expect("schema");
        let cel = CelEvaluator::new();
        let functions = SharedFunctionProvider::new(RuntimeFunctionProvider::new(true));
        let mut snapshot = JsonMap::new();
        snapshot.insert("title".to_string(), json!("mine"));
        apply_defaults(&schema, &mut snapshot, &cel, &functions).expect("defaults");
        assert_eq!(snapshot["title"], json!("mine"));
        assert_eq!(snapshot["id"], json!("01920000-0000-7000-8000-000000000000"));
    }

    #[test]
    fn truthiness_follows_sql_conventions() {
        assert!(value_is_truthy(&Value::Integer(1)));
        assert!(!value_is_truthy(&Value::Integer(0)));
        assert!(value_is_truthy(&Value::Text("true".to_string())));
        assert!(!value_is_truthy(&Value::Null));
        assert!(json_is_truthy(&json!(true)));
        assert!(!json_is_truthy(&json!("no")));
    }
}
