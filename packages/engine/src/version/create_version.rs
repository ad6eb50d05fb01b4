use serde::{Deserialize, Serialize};

use crate::errors::validation_error;
use crate::{Engine, EngineTransaction, ExecuteOptions, StrataError, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CreateVersionOptions {
    /// Generated when absent.
    pub id: Option<String>,
    /// Defaults to the id.
    pub name: Option<String>,
    /// Defaults to the active version.
    pub inherits_from_version_id: Option<String>,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVersionResult {
    pub id: String,
    pub name: String,
    pub inherits_from_version_id: String,
}

pub async fn create_version(
    engine: &Engine,
    options: CreateVersionOptions,
) -> Result<CreateVersionResult, StrataError> {
    let active_version_id = engine.active_version_id()?;
    let id = normalize_optional_non_empty_text(options.id.clone(), "id")?
        .unwrap_or_else(|| engine.functions().call_uuid_v7());
    engine
        .transaction(ExecuteOptions::default(), |tx| {
            Box::pin(async move {
                create_version_in_transaction(tx, id, options, active_version_id).await
            })
        })
        .await
}

async fn create_version_in_transaction(
    tx: &mut EngineTransaction<'_>,
    id: String,
    options: CreateVersionOptions,
    active_version_id: String,
) -> Result<CreateVersionResult, StrataError> {
    let name = normalize_optional_non_empty_text(options.name, "name")?.unwrap_or(id.clone());
    let inherits_from_version_id = normalize_optional_non_empty_text(
        options.inherits_from_version_id,
        "inherits_from_version_id",
    )?
    .unwrap_or(active_version_id);

    tx.execute(
        "INSERT INTO version (id, name, inherits_from_version_id, hidden) \
         VALUES (?1, ?2, ?3, ?4)",
        &[
            Value::Text(id.clone()),
            Value::Text(name.clone()),
            Value::Text(inherits_from_version_id.clone()),
            Value::Integer(i64::from(options.hidden)),
        ],
    )
    .await?;

    Ok(CreateVersionResult {
        id,
        name,
        inherits_from_version_id,
    })
}

fn normalize_optional_non_empty_text(
    value: Option<String>,
    field: &str,
) -> Result<Option<String>, StrataError> {
    match value {
        Some(text) if text.trim().is_empty() => Err(validation_error(&format!(
            "{field} must be a non-empty string"
        ))),
        Some(text) => Ok(Some(text)),
        None => Ok(None),
    }
}
