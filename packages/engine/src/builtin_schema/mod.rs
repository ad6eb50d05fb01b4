use serde_json::Value as JsonValue;
use std::sync::OnceLock;

use crate::errors::schema_error;
use crate::schema::SchemaDefinition;
use crate::StrataError;

pub(crate) const KEY_VALUE_SCHEMA_KEY: &str = "key_value";
pub(crate) const VERSION_SCHEMA_KEY: &str = "version";
pub(crate) const ACTIVE_VERSION_SCHEMA_KEY: &str = "active_version";
pub(crate) const STORED_SCHEMA_KEY: &str = "stored_schema";
pub(crate) const DIRECTORY_SCHEMA_KEY: &str = "directory";
pub(crate) const FILE_SCHEMA_KEY: &str = "file";
pub(crate) const FILE_BLOB_SCHEMA_KEY: &str = "file_blob";

const KEY_VALUE_SCHEMA_JSON: &str = include_str!("key_value.json");
const VERSION_SCHEMA_JSON: &str = include_str!("version.json");
const ACTIVE_VERSION_SCHEMA_JSON: &str = include_str!("active_version.json");
const STORED_SCHEMA_JSON: &str = include_str!("stored_schema.json");
const DIRECTORY_SCHEMA_JSON: &str = include_str!("directory.json");
const FILE_SCHEMA_JSON: &str = include_str!("file.json");
const FILE_BLOB_SCHEMA_JSON: &str = include_str!("file_blob.json");

const BUILTIN_SCHEMA_KEYS: &[&str] = &[
    KEY_VALUE_SCHEMA_KEY,
    VERSION_SCHEMA_KEY,
    ACTIVE_VERSION_SCHEMA_KEY,
    STORED_SCHEMA_KEY,
    DIRECTORY_SCHEMA_KEY,
    FILE_SCHEMA_KEY,
    FILE_BLOB_SCHEMA_KEY,
];

static BUILTIN_SCHEMAS: OnceLock<Result<Vec<SchemaDefinition>, StrataError>> = OnceLock::new();

pub(crate) fn builtin_schema_keys() -> &'static [&'static str] {
    BUILTIN_SCHEMA_KEYS
}

pub(crate) fn is_builtin_schema_key(schema_key: &str) -> bool {
    BUILTIN_SCHEMA_KEYS.contains(&schema_key)
}

fn builtin_schema_json(schema_key: &str) -> Option<(&'static str, &'static str)> {
    match schema_key {
        KEY_VALUE_SCHEMA_KEY => Some(("key_value.json", KEY_VALUE_SCHEMA_JSON)),
        VERSION_SCHEMA_KEY => Some(("version.json", VERSION_SCHEMA_JSON)),
        ACTIVE_VERSION_SCHEMA_KEY => Some(("active_version.json", ACTIVE_VERSION_SCHEMA_JSON)),
        STORED_SCHEMA_KEY => Some(("stored_schema.json", STORED_SCHEMA_JSON)),
        DIRECTORY_SCHEMA_KEY => Some(("directory.json", DIRECTORY_SCHEMA_JSON)),
        FILE_SCHEMA_KEY => Some(("file.json", FILE_SCHEMA_JSON)),
        FILE_BLOB_SCHEMA_KEY => Some(("file_blob.json", FILE_BLOB_SCHEMA_JSON)),
        _ => None,
    }
}

/// Parsed definitions of every built-in schema, in registration order.
pub(crate) fn builtin_schemas() -> Result<&'static [SchemaDefinition], StrataError> {
    BUILTIN_SCHEMAS
        .get_or_init(|| {
            BUILTIN_SCHEMA_KEYS
                .iter()
                .map(|schema_key| {
                    let (file_name, raw) = builtin_schema_json(schema_key).ok_or_else(|| {
                        schema_error(&format!("missing builtin schema `{schema_key}`"))
                    })?;
                    parse_builtin_schema(file_name, raw)
                })
                .collect()
        })
        .as_ref()
        .map(Vec::as_slice)
        .map_err(Clone::clone)
}

fn parse_builtin_schema(file_name: &str, raw: &str) -> Result<SchemaDefinition, StrataError> {
    let json: JsonValue = serde_json::from_str(raw).map_err(|err| {
        schema_error(&format!("builtin schema {file_name} is not valid JSON: {err}"))
    })?;
    SchemaDefinition::parse(json)
}
