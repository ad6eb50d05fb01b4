use jsonschema::JSONSchema;
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

use crate::errors::schema_error;
use crate::StrataError;

static SCHEMA_DEFINITION: OnceLock<Result<JsonValue, String>> = OnceLock::new();
static SCHEMA_DEFINITION_VALIDATOR: OnceLock<Result<JSONSchema, String>> = OnceLock::new();

pub fn schema_definition_json() -> &'static str {
    include_str!("schema_definition.json")
}

fn schema_definition() -> Result<&'static JsonValue, StrataError> {
    SCHEMA_DEFINITION
        .get_or_init(|| {
            serde_json::from_str(schema_definition_json())
                .map_err(|err| format!("schema_definition.json is not valid JSON: {err}"))
        })
        .as_ref()
        .map_err(|message| schema_error(message))
}

fn schema_definition_validator() -> Result<&'static JSONSchema, StrataError> {
    let definition = schema_definition()?;
    SCHEMA_DEFINITION_VALIDATOR
        .get_or_init(|| compile_schema(definition).map_err(|err| err.description))
        .as_ref()
        .map_err(|message| schema_error(message))
}

/// Checks `schema` against the meta-schema and verifies that every
/// primary-key and unique pointer names a declared property.
pub fn validate_schema_definition(schema: &JsonValue) -> Result<(), StrataError> {
    let validator = schema_definition_validator()?;
    if let Err(errors) = validator.validate(schema) {
        let details = format_validation_errors(errors);
        return Err(schema_error(&format!("Invalid schema definition: {details}")));
    }

    assert_primary_key_pointers(schema)?;
    assert_unique_pointers(schema)?;

    Ok(())
}

pub(crate) fn compile_schema(schema: &JsonValue) -> Result<JSONSchema, StrataError> {
    let mut options = JSONSchema::options();
    options.with_meta_schemas();
    options.with_format("json-pointer", is_json_pointer);
    options.with_format("cel", is_cel_expression);

    options
        .compile(schema)
        .map_err(|err| schema_error(&format!("Failed to compile schema: {err}")))
}

fn is_json_pointer(value: &str) -> bool {
    parse_json_pointer(value).is_ok()
}

fn is_cel_expression(value: &str) -> bool {
    cel::Program::compile(value).is_ok()
}

pub(crate) fn parse_json_pointer(pointer: &str) -> Result<Vec<String>, StrataError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(schema_error(&format!("Invalid JSON pointer \"{pointer}\"")));
    };

    rest.split('/')
        .map(|raw| unescape_pointer_segment(raw, pointer))
        .collect()
}

fn unescape_pointer_segment(segment: &str, pointer: &str) -> Result<String, StrataError> {
    let mut out = String::new();
    let mut chars = segment.chars();
    while let Some(ch) = chars.next() {
        if ch == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return Err(schema_error(&format!("Invalid JSON pointer \"{pointer}\""))),
            }
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

fn assert_primary_key_pointers(schema: &JsonValue) -> Result<(), StrataError> {
    let Some(primary_key) = schema
        .get("x-strata-primary-key")
        .and_then(|value| value.as_array())
    else {
        return Ok(());
    };

    for pointer in primary_key.iter().filter_map(JsonValue::as_str) {
        assert_pointer_targets_property(schema, pointer, "x-strata-primary-key")?;
    }

    Ok(())
}

fn assert_unique_pointers(schema: &JsonValue) -> Result<(), StrataError> {
    let Some(unique_groups) = schema
        .get("x-strata-unique")
        .and_then(|value| value.as_array())
    else {
        return Ok(());
    };

    for group in unique_groups.iter().filter_map(JsonValue::as_array) {
        for pointer in group.iter().filter_map(JsonValue::as_str) {
            assert_pointer_targets_property(schema, pointer, "x-strata-unique")?;
        }
    }

    Ok(())
}

fn assert_pointer_targets_property(
    schema: &JsonValue,
    pointer: &str,
    keyword: &str,
) -> Result<(), StrataError> {
    let segments = parse_json_pointer(pointer)?;
    if segments.is_empty() || !schema_has_property(schema, &segments) {
        return Err(schema_error(&format!(
            "Invalid schema definition: {keyword} references missing property \"{pointer}\"."
        )));
    }
    Ok(())
}

fn schema_has_property(schema: &JsonValue, segments: &[String]) -> bool {
    let mut node = schema;
    for segment in segments {
        let Some(next) = node
            .get("properties")
            .and_then(JsonValue::as_object)
            .and_then(|properties| properties.get(segment))
        else {
            return false;
        };
        node = next;
    }
    true
}

pub(crate) fn format_validation_errors<'a>(
    errors: impl Iterator<Item = jsonschema::ValidationError<'a>>,
) -> String {
    let mut parts = Vec::new();
    for error in errors {
        let path = error.instance_path.to_string();
        let message = error.to_string();
        if path.is_empty() {
            parts.push(message);
        } else {
            parts.push(format!("{path} {message}"));
        }
    }
    if parts.is_empty() {
        "Unknown validation error".to_string()
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_json_pointer, validate_schema_definition};
    use serde_json::json;

    #[test]
    fn accepts_a_minimal_definition() {
        let schema = json!({
            "x-strata-key": "note",
            "x-strata-version": "1",
            "x-strata-primary-key": ["/id"],
            "type": "object",
            "properties": {
                "id": { "type": "string", "x-strata-default": "strata_uuid_v7()" },
                "body": { "type": "string" }
            },
            "required": ["id"],
            "additionalProperties": false
        });
        validate_schema_definition(&schema).expect("valid definition");
    }

    #[test]
    fn rejects_pointers_to_missing_properties() {
        let schema = json!({
            "x-strata-key": "note",
            "x-strata-version": "1",
            "x-strata-primary-key": ["/missing"],
            "type": "object",
            "properties": { "id": { "type": "string" } }
        });
        let err = validate_schema_definition(&schema).expect_err("missing property");
        assert!(err.description.contains("x-strata-primary-key"));

        let schema = json!({
            "x-strata-key": "note",
            "x-strata-version": "1",
            "x-strata-unique": [["/id", "/slug"]],
            "type": "object",
            "properties": { "id": { "type": "string" } }
        });
        let err = validate_schema_definition(&schema).expect_err("missing unique property");
        assert!(err.description.contains("\"/slug\""));
    }

    #[test]
    fn rejects_malformed_keys_and_defaults() {
        let schema = json!({
            "x-strata-key": "Note",
            "x-strata-version": "1",
            "type": "object",
            "properties": {}
        });
        assert!(validate_schema_definition(&schema).is_err());

        let schema = json!({
            "x-strata-key": "note",
            "x-strata-version": "1",
            "type": "object",
            "properties": { "id": { "type": "string", "x-strata-default": "strata_uuid_v7(" } }
        });
        assert!(validate_schema_definition(&schema).is_err());
    }

    #[test]
    fn parses_escaped_pointer_segments() {
        assert_eq!(
            parse_json_pointer("/a~1b/c~0d").expect("pointer"),
            vec!["a/b".to_string(), "c~d".to_string()]
        );
        assert!(parse_json_pointer("a").is_err());
        assert!(parse_json_pointer("/a~2").is_err());
    }
}
