//! Built-in blob storage for files no plugin can take apart.

use serde_json::{json, Value as JsonValue};

use crate::entity_views::values::{decode_base64, encode_base64};
use crate::errors::validation_error;
use crate::StrataError;

pub(crate) const BLOB_PLUGIN_KEY: &str = "strata_blob";
pub(crate) const BLOB_ENTITY_ID: &str = "blob";

/// The `file_blob` snapshot holding `data`.
pub(crate) fn blob_snapshot(data: &[u8]) -> JsonValue {
    json!({
        "id": BLOB_ENTITY_ID,
        "data": encode_base64(data),
        "byte_length": data.len(),
        "blake3": blake3::hash(data).to_hex().to_string(),
    })
}

/// Decodes a `file_blob` snapshot and checks its length and hash.
pub(crate) fn blob_bytes(snapshot: &JsonValue) -> Result<Vec<u8>, StrataError> {
    let data = snapshot
        .get("data")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| validation_error("file blob is missing its data"))?;
    let bytes = decode_base64(data)?;
    let expected_hash = snapshot.get("blake3").and_then(JsonValue::as_str);
    if expected_hash != Some(blake3::hash(&bytes).to_hex().as_str()) {
        return Err(validation_error("file blob content does not match its blake3 hash"));
    }
    if snapshot.get("byte_length").and_then(JsonValue::as_u64) != Some(bytes.len() as u64) {
        return Err(validation_error("file blob content does not match its byte length"));
    }
    Ok(bytes)
}
