use cel::Value as CelValue;
use serde_json::Value as JsonValue;

use crate::errors::validation_error;
use crate::StrataError;

pub(crate) fn json_to_cel(value: &JsonValue) -> Result<CelValue, StrataError> {
    cel::to_value(value).map_err(|err| {
        validation_error(&format!("failed to convert JSON value to CEL value: {err}"))
    })
}

pub(crate) fn cel_to_json(value: &CelValue) -> Result<JsonValue, StrataError> {
    value.json().map_err(|err| {
        validation_error(&format!("failed to convert CEL value to JSON value: {err}"))
    })
}
