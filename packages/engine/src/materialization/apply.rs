use std::collections::BTreeSet;

use crate::state::tables::{cache_table_name, create_cache_table};
use crate::sql::quote_string;
use crate::write::ExecutionSession;
use crate::{StrataError, Value};

use super::types::{
    MaterializationApplyReport, MaterializationPlan, MaterializationScope, MaterializationWriteOp,
};

pub(crate) async fn apply_materialization_plan_internal(
    session: &mut ExecutionSession<'_>,
    plan: &MaterializationPlan,
) -> Result<MaterializationApplyReport, StrataError> {
    let backend = session.backend();
    let mut report = MaterializationApplyReport::default();

    for schema_key in plan.writes.iter().map(|write| write.schema_key.as_str()) {
        if !session.state.registry.has_cache_table(schema_key) {
            create_cache_table(backend, schema_key).await?;
            session.state.registry.mark_cache_table(schema_key);
        }
    }

    let schema_keys: BTreeSet<String> = session.state.registry.cache_table_keys().clone();
    for schema_key in &schema_keys {
        report.rows_deleted += clear_scope_rows(session, schema_key, &plan.scope).await?;
        report.tables_touched.insert(cache_table_name(schema_key));
    }

    for write in &plan.writes {
        let table = cache_table_name(&write.schema_key);
        backend
            .execute(
                &format!(
                    "INSERT INTO {table} (entity_id, schema_key, file_id, version_id, plugin_key, \
                     snapshot_content, schema_version, is_tombstone, change_id, commit_id, \
                     created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                &[
                    Value::Text(write.entity_id.clone()),
                    Value::Text(write.schema_key.clone()),
                    Value::Text(write.file_id.clone()),
                    Value::Text(write.version_id.clone()),
                    Value::Text(write.plugin_key.clone()),
                    Value::from(write.snapshot_content.clone()),
                    Value::Text(write.schema_version.clone()),
                    Value::Integer(i64::from(write.op == MaterializationWriteOp::Tombstone)),
                    Value::Text(write.change_id.clone()),
                    Value::Text(write.commit_id.clone()),
                    Value::Text(write.created_at.clone()),
                    Value::Text(write.updated_at.clone()),
                ],
            )
            .await?;
        report.rows_written += 1;
    }
    Ok(report)
}

async fn clear_scope_rows(
    session: &ExecutionSession<'_>,
    schema_key: &str,
    scope: &MaterializationScope,
) -> Result<usize, StrataError> {
    let table = cache_table_name(schema_key);
    let filter = match scope {
        MaterializationScope::Full => String::new(),
        MaterializationScope::Versions(versions) if versions.is_empty() => return Ok(0),
        MaterializationScope::Versions(versions) => format!(
            " WHERE version_id IN ({})",
            versions
                .iter()
                .map(|version| quote_string(version))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let backend = session.backend();
    let count = backend
        .execute(&format!("SELECT COUNT(*) FROM {table}{filter}"), &[])
        .await?
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(Value::as_integer)
        .unwrap_or_default();
    backend
        .execute(&format!("DELETE FROM {table}{filter}"), &[])
        .await?;
    Ok(usize::try_from(count).unwrap_or_default())
}
