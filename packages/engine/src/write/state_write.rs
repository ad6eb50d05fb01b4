//! Applies entity writes and deletes to the transaction and untracked tiers.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::errors::integrity_error;
use crate::schema::SchemaDefinition;
use crate::state::tables::{TRANSACTION_TABLE, UNTRACKED_TABLE};
use crate::validation::{unique_group_values, validate_snapshot_content};
use crate::{StrataError, Value};

use super::context::{ExecutionSession, StateRow};
use super::hooks;

/// A full entity snapshot to store at one state key.
#[derive(Debug, Clone)]
pub(crate) struct EntityWrite {
    pub schema: Arc<SchemaDefinition>,
    pub entity_id: String,
    pub file_id: String,
    pub version_id: String,
    pub plugin_key: String,
    pub snapshot: JsonValue,
    pub metadata: Option<JsonValue>,
    pub untracked: bool,
}

/// The key of an entity to delete.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct EntityDelete {
    pub schema_key: String,
    pub entity_id: String,
    pub file_id: String,
    pub version_id: String,
}

impl EntityDelete {
    pub(crate) fn of(row: &StateRow) -> Self {
        Self {
            schema_key: row.schema_key.clone(),
            entity_id: row.entity_id.clone(),
            file_id: row.file_id.clone(),
            version_id: row.version_id.clone(),
        }
    }
}

/// Validates `write`, runs its schema hooks and stores it. `previous` is the
/// row currently visible at the same key, if any.
pub(crate) async fn write_entity(
    session: &mut ExecutionSession<'_>,
    mut write: EntityWrite,
    previous: Option<StateRow>,
) -> Result<(), StrataError> {
    hooks::before_write(session, &mut write, previous.as_ref()).await?;

    validate_snapshot_content(session.schema_cache(), &write.schema, &write.snapshot)?;
    if write.schema.immutable {
        if let Some(previous) = &previous {
            if previous.snapshot != write.snapshot {
                return Err(integrity_error(&format!(
                    "entity `{}` of immutable schema `{}` cannot be updated",
                    write.entity_id, write.schema.key
                )));
            }
        }
    }
    check_unique_groups(session, &write).await?;

    let now = session.now();
    let created_at = previous
        .as_ref()
        .filter(|row| row.is_local())
        .map(|row| row.created_at.clone())
        .unwrap_or_else(|| now.clone());
    let key = key_params(&write.entity_id, &write.schema.key, &write.file_id, &write.version_id);
    let metadata = write
        .metadata
        .as_ref()
        .map(|metadata| Value::Text(metadata.to_string()))
        .unwrap_or(Value::Null);
    let writer_key = Value::from(session.writer_key.clone());

    let mut params = key.to_vec();
    params.extend([
        Value::Text(write.plugin_key.clone()),
        Value::Text(write.snapshot.to_string()),
        Value::Text(write.schema.version.clone()),
        metadata,
        writer_key,
        Value::Text(created_at),
        Value::Text(now),
    ]);

    if write.untracked {
        session
            .backend()
            .execute(
                &format!(
                    "INSERT INTO {UNTRACKED_TABLE} (entity_id, schema_key, file_id, version_id, \
                     plugin_key, snapshot_content, schema_version, metadata, writer_key, \
                     created_at, updated_at, is_tombstone) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0) \
                     ON CONFLICT (entity_id, schema_key, file_id, version_id) DO UPDATE SET \
                     plugin_key = excluded.plugin_key, snapshot_content = excluded.snapshot_content, \
                     schema_version = excluded.schema_version, metadata = excluded.metadata, \
                     writer_key = excluded.writer_key, updated_at = excluded.updated_at, \
                     is_tombstone = 0"
                ),
                &params,
            )
            .await?;
        delete_key(session, TRANSACTION_TABLE, &key).await?;
    } else {
        params.push(Value::Text(session.new_id()));
        session
            .backend()
            .execute(
                &format!(
                    "INSERT INTO {TRANSACTION_TABLE} (entity_id, schema_key, file_id, version_id, \
                     plugin_key, snapshot_content, schema_version, metadata, writer_key, \
                     created_at, updated_at, change_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
                     ON CONFLICT (entity_id, schema_key, file_id, version_id) DO UPDATE SET \
                     plugin_key = excluded.plugin_key, snapshot_content = excluded.snapshot_content, \
                     schema_version = excluded.schema_version, metadata = excluded.metadata, \
                     writer_key = excluded.writer_key, updated_at = excluded.updated_at, \
                     change_id = excluded.change_id"
                ),
                &params,
            )
            .await?;
        delete_key(session, UNTRACKED_TABLE, &key).await?;
        session.state.pending = true;
    }
    tracing::debug!(
        target: "strata::write",
        schema_key = %write.schema.key,
        entity_id = %write.entity_id,
        version_id = %write.version_id,
        untracked = write.untracked,
        "wrote entity"
    );

    hooks::after_write(session, &write).await
}

/// Deletes `target` and everything its schema hooks cascade to. Returns the
/// number of entities deleted.
pub(crate) async fn delete_entity(
    session: &mut ExecutionSession<'_>,
    target: EntityDelete,
) -> Result<usize, StrataError> {
    let mut pending = vec![target];
    let mut seen = BTreeSet::new();
    let mut rows = Vec::new();
    while let Some(next) = pending.pop() {
        if !seen.insert(next.clone()) {
            continue;
        }
        let Some(row) = session
            .load_entity(
                &next.schema_key,
                &next.entity_id,
                Some(&next.file_id),
                &next.version_id,
            )
            .await?
        else {
            continue;
        };
        pending.extend(hooks::before_delete(session, &row).await?);
        rows.push(row);
    }

    for row in &rows {
        write_tombstone(session, row).await?;
    }
    for row in &rows {
        hooks::after_delete(session, row).await?;
    }
    Ok(rows.len())
}

/// Tombstones land in the tier the visible row came from, so a deleted
/// untracked entity stays untracked.
async fn write_tombstone(
    session: &mut ExecutionSession<'_>,
    row: &StateRow,
) -> Result<(), StrataError> {
    let now = session.now();
    let key = key_params(&row.entity_id, &row.schema_key, &row.file_id, &row.version_id);
    let mut params = key.to_vec();
    params.extend([
        Value::Text(row.plugin_key.clone()),
        Value::Text(row.schema_version.clone()),
        Value::from(session.writer_key.clone()),
        Value::Text(now.clone()),
        Value::Text(now),
    ]);

    if row.untracked {
        session
            .backend()
            .execute(
                &format!(
                    "INSERT INTO {UNTRACKED_TABLE} (entity_id, schema_key, file_id, version_id, \
                     plugin_key, schema_version, writer_key, created_at, updated_at, \
                     snapshot_content, is_tombstone) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, 1) \
                     ON CONFLICT (entity_id, schema_key, file_id, version_id) DO UPDATE SET \
                     snapshot_content = NULL, is_tombstone = 1, writer_key = excluded.writer_key, \
                     updated_at = excluded.updated_at"
                ),
                &params,
            )
            .await?;
        delete_key(session, TRANSACTION_TABLE, &key).await?;
    } else {
        params.push(Value::Text(session.new_id()));
        session
            .backend()
            .execute(
                &format!(
                    "INSERT INTO {TRANSACTION_TABLE} (entity_id, schema_key, file_id, version_id, \
                     plugin_key, schema_version, writer_key, created_at, updated_at, change_id, \
                     snapshot_content, metadata) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, NULL) \
                     ON CONFLICT (entity_id, schema_key, file_id, version_id) DO UPDATE SET \
                     snapshot_content = NULL, metadata = NULL, writer_key = excluded.writer_key, \
                     updated_at = excluded.updated_at, change_id = excluded.change_id"
                ),
                &params,
            )
            .await?;
        delete_key(session, UNTRACKED_TABLE, &key).await?;
        session.state.pending = true;
    }
    tracing::debug!(
        target: "strata::write",
        schema_key = %row.schema_key,
        entity_id = %row.entity_id,
        version_id = %row.version_id,
        "deleted entity"
    );
    Ok(())
}

fn key_params(entity_id: &str, schema_key: &str, file_id: &str, version_id: &str) -> [Value; 4] {
    [
        Value::Text(entity_id.to_string()),
        Value::Text(schema_key.to_string()),
        Value::Text(file_id.to_string()),
        Value::Text(version_id.to_string()),
    ]
}

async fn delete_key(
    session: &ExecutionSession<'_>,
    table: &str,
    key: &[Value; 4],
) -> Result<(), StrataError> {
    session
        .backend()
        .execute(
            &format!(
                "DELETE FROM {table} WHERE entity_id = ?1 AND schema_key = ?2 \
                 AND file_id = ?3 AND version_id = ?4"
            ),
            key,
        )
        .await?;
    Ok(())
}

async fn check_unique_groups(
    session: &ExecutionSession<'_>,
    write: &EntityWrite,
) -> Result<(), StrataError> {
    let groups: Vec<(&Vec<String>, Vec<JsonValue>)> = write
        .schema
        .unique
        .iter()
        .filter_map(|group| unique_group_values(&write.snapshot, group).map(|values| (group, values)))
        .collect();
    if groups.is_empty() {
        return Ok(());
    }
    let existing = session
        .load_entities(&write.schema.key, &write.version_id)
        .await?;
    for (group, values) in groups {
        let collision = existing.iter().find(|row| {
            row.entity_id != write.entity_id
                && unique_group_values(&row.snapshot, group).as_ref() == Some(&values)
        });
        if let Some(row) = collision {
            return Err(integrity_error(&format!(
                "schema `{}`: ({}) must be unique, already used by entity `{}`",
                write.schema.key,
                group.join(", "),
                row.entity_id
            )));
        }
    }
    Ok(())
}
