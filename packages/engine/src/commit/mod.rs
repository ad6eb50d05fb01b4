//! Promotes the transaction tier into commits, the change log and the
//! per-schema cache tables.

use std::collections::BTreeMap;

use crate::entity_views::values::{optional_text_column, text_column};
use crate::state::tables::{
    cache_table_name, create_cache_table, CHANGE_TABLE, COMMIT_TABLE, TRANSACTION_TABLE,
    VERSION_HEAD_TABLE, WRITER_TABLE,
};
use crate::write::ExecutionSession;
use crate::{StrataError, Value};

/// One commit created for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub commit_id: String,
    pub version_id: String,
    pub parent_commit_id: Option<String>,
    pub change_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub commits: Vec<CommitSummary>,
}

impl CommitReport {
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.commits.iter().map(|commit| commit.change_count).sum()
    }
}

/// A transaction-tier row on its way into the change log.
#[derive(Debug, Clone)]
struct PendingChange {
    entity_id: String,
    schema_key: String,
    file_id: String,
    version_id: String,
    plugin_key: String,
    snapshot_content: Option<String>,
    schema_version: String,
    metadata: Option<String>,
    writer_key: Option<String>,
    change_id: String,
    created_at: String,
    updated_at: String,
}

const PENDING_COLUMNS: &str = "entity_id, schema_key, file_id, version_id, plugin_key, \
     snapshot_content, schema_version, metadata, writer_key, change_id, created_at, updated_at";

impl PendingChange {
    fn from_values(row: &[Value]) -> Result<Self, StrataError> {
        let column = |index: usize| row.get(index).unwrap_or(&Value::Null);
        Ok(Self {
            entity_id: text_column(column(0), "entity_id")?,
            schema_key: text_column(column(1), "schema_key")?,
            file_id: text_column(column(2), "file_id")?,
            version_id: text_column(column(3), "version_id")?,
            plugin_key: text_column(column(4), "plugin_key")?,
            snapshot_content: optional_text_column(column(5), "snapshot_content")?,
            schema_version: text_column(column(6), "schema_version")?,
            metadata: optional_text_column(column(7), "metadata")?,
            writer_key: optional_text_column(column(8), "writer_key")?,
            change_id: text_column(column(9), "change_id")?,
            created_at: text_column(column(10), "created_at")?,
            updated_at: text_column(column(11), "updated_at")?,
        })
    }
}

/// Commits every row of the transaction tier: one commit per version,
/// chained onto that version's head.
pub(crate) async fn commit_pending(
    session: &mut ExecutionSession<'_>,
) -> Result<CommitReport, StrataError> {
    let backend = session.backend();
    let rows = backend
        .execute(
            &format!(
                "SELECT {PENDING_COLUMNS} FROM {TRANSACTION_TABLE} \
                 ORDER BY version_id, schema_key, entity_id, file_id"
            ),
            &[],
        )
        .await?
        .rows;
    let mut by_version: BTreeMap<String, Vec<PendingChange>> = BTreeMap::new();
    for row in &rows {
        let change = PendingChange::from_values(row)?;
        by_version
            .entry(change.version_id.clone())
            .or_default()
            .push(change);
    }

    let mut report = CommitReport::default();
    for (version_id, changes) in by_version {
        let parent_commit_id = backend
            .execute(
                &format!("SELECT commit_id FROM {VERSION_HEAD_TABLE} WHERE version_id = ?1"),
                &[Value::Text(version_id.clone())],
            )
            .await?
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_text)
            .map(str::to_string);
        let commit_id = session.new_id();
        let now = session.now();
        backend
            .execute(
                &format!(
                    "INSERT INTO {COMMIT_TABLE} (id, version_id, parent_commit_id, change_count, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)"
                ),
                &[
                    Value::Text(commit_id.clone()),
                    Value::Text(version_id.clone()),
                    Value::from(parent_commit_id.clone()),
                    Value::Integer(changes.len() as i64),
                    Value::Text(now),
                ],
            )
            .await?;

        for change in &changes {
            record_change(session, change, &commit_id).await?;
        }

        backend
            .execute(
                &format!(
                    "INSERT INTO {VERSION_HEAD_TABLE} (version_id, commit_id) VALUES (?1, ?2) \
                     ON CONFLICT (version_id) DO UPDATE SET commit_id = excluded.commit_id"
                ),
                &[Value::Text(version_id.clone()), Value::Text(commit_id.clone())],
            )
            .await?;
        tracing::info!(
            target: "strata::commit",
            commit_id = %commit_id,
            version_id = %version_id,
            changes = changes.len(),
            "created commit"
        );
        report.commits.push(CommitSummary {
            commit_id,
            version_id,
            parent_commit_id,
            change_count: changes.len(),
        });
    }

    backend
        .execute(&format!("DELETE FROM {TRANSACTION_TABLE}"), &[])
        .await?;
    session.state.pending = false;
    Ok(report)
}

async fn record_change(
    session: &mut ExecutionSession<'_>,
    change: &PendingChange,
    commit_id: &str,
) -> Result<(), StrataError> {
    let backend = session.backend();
    backend
        .execute(
            &format!(
                "INSERT INTO {CHANGE_TABLE} (id, entity_id, schema_key, schema_version, file_id, \
                 plugin_key, version_id, snapshot_content, metadata, commit_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            &[
                Value::Text(change.change_id.clone()),
                Value::Text(change.entity_id.clone()),
                Value::Text(change.schema_key.clone()),
                Value::Text(change.schema_version.clone()),
                Value::Text(change.file_id.clone()),
                Value::Text(change.plugin_key.clone()),
                Value::Text(change.version_id.clone()),
                Value::from(change.snapshot_content.clone()),
                Value::from(change.metadata.clone()),
                Value::Text(commit_id.to_string()),
                Value::Text(change.updated_at.clone()),
            ],
        )
        .await?;

    if !session.state.registry.has_cache_table(&change.schema_key) {
        create_cache_table(backend, &change.schema_key).await?;
        session.state.registry.mark_cache_table(&change.schema_key);
        tracing::debug!(
            target: "strata::commit",
            schema_key = %change.schema_key,
            "created cache table"
        );
    }
    let table = cache_table_name(&change.schema_key);
    backend
        .execute(
            &format!(
                "INSERT INTO {table} (entity_id, schema_key, file_id, version_id, plugin_key, \
                 snapshot_content, schema_version, is_tombstone, change_id, commit_id, \
                 created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
                 ON CONFLICT (entity_id, file_id, version_id) DO UPDATE SET \
                 plugin_key = excluded.plugin_key, snapshot_content = excluded.snapshot_content, \
                 schema_version = excluded.schema_version, is_tombstone = excluded.is_tombstone, \
                 change_id = excluded.change_id, commit_id = excluded.commit_id, \
                 created_at = excluded.created_at, updated_at = excluded.updated_at"
            ),
            &[
                Value::Text(change.entity_id.clone()),
                Value::Text(change.schema_key.clone()),
                Value::Text(change.file_id.clone()),
                Value::Text(change.version_id.clone()),
                Value::Text(change.plugin_key.clone()),
                Value::from(change.snapshot_content.clone()),
                Value::Text(change.schema_version.clone()),
                Value::Integer(i64::from(change.snapshot_content.is_none())),
                Value::Text(change.change_id.clone()),
                Value::Text(commit_id.to_string()),
                Value::Text(change.created_at.clone()),
                Value::Text(change.updated_at.clone()),
            ],
        )
        .await?;

    let key = [
        Value::Text(change.entity_id.clone()),
        Value::Text(change.schema_key.clone()),
        Value::Text(change.file_id.clone()),
        Value::Text(change.version_id.clone()),
    ];
    match &change.writer_key {
        Some(writer_key) => {
            let mut params = key.to_vec();
            params.push(Value::Text(writer_key.clone()));
            backend
                .execute(
                    &format!(
                        "INSERT INTO {WRITER_TABLE} (entity_id, schema_key, file_id, version_id, writer_key) \
                         VALUES (?1, ?2, ?3, ?4, ?5) \
                         ON CONFLICT (entity_id, schema_key, file_id, version_id) \
                         DO UPDATE SET writer_key = excluded.writer_key"
                    ),
                    &params,
                )
                .await?;
        }
        None => {
            backend
                .execute(
                    &format!(
                        "DELETE FROM {WRITER_TABLE} WHERE entity_id = ?1 AND schema_key = ?2 \
                         AND file_id = ?3 AND version_id = ?4"
                    ),
                    &key,
                )
                .await?;
        }
    }
    Ok(())
}
