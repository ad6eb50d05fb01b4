use crate::errors::{integrity_error, validation_error};
use crate::{Engine, EngineTransaction, ExecuteOptions, StrataError, Value};

pub async fn switch_version(engine: &Engine, version_id: String) -> Result<(), StrataError> {
    if version_id.trim().is_empty() {
        return Err(validation_error("version_id must be a non-empty string"));
    }

    engine
        .transaction(ExecuteOptions::default(), move |tx| {
            Box::pin(async move { switch_version_in_transaction(tx, version_id).await })
        })
        .await
}

async fn switch_version_in_transaction(
    tx: &mut EngineTransaction<'_>,
    version_id: String,
) -> Result<(), StrataError> {
    ensure_version_exists(tx, &version_id).await?;
    tx.execute(
        "UPDATE active_version SET version_id = ?1",
        &[Value::Text(version_id)],
    )
    .await?;
    Ok(())
}

async fn ensure_version_exists(
    tx: &mut EngineTransaction<'_>,
    version_id: &str,
) -> Result<(), StrataError> {
    let result = tx
        .execute(
            "SELECT 1 FROM version WHERE id = ?1 LIMIT 1",
            &[Value::Text(version_id.to_string())],
        )
        .await?;
    if result.rows.is_empty() {
        return Err(integrity_error(&format!(
            "version `{version_id}` does not exist"
        )));
    }
    Ok(())
}
