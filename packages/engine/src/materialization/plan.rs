use std::collections::BTreeMap;

use crate::entity_views::values::{optional_text_column, text_column};
use crate::state::tables::{CHANGE_TABLE, COMMIT_TABLE, VERSION_HEAD_TABLE};
use crate::write::ExecutionSession;
use crate::{StrataError, Value};

use super::types::{
    MaterializationPlan, MaterializationScope, MaterializationWrite, MaterializationWriteOp,
};

/// A change reached from a version head, `depth` commits back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct LineageChange {
    pub change_id: String,
    pub entity_id: String,
    pub schema_key: String,
    pub schema_version: String,
    pub file_id: String,
    pub plugin_key: String,
    pub snapshot_content: Option<String>,
    pub commit_id: String,
    pub created_at: String,
    pub depth: i64,
}

impl LineageChange {
    fn from_values(row: &[Value]) -> Result<Self, StrataError> {
        let column = |index: usize| row.get(index).unwrap_or(&Value::Null);
        Ok(Self {
            change_id: text_column(column(0), "id")?,
            entity_id: text_column(column(1), "entity_id")?,
            schema_key: text_column(column(2), "schema_key")?,
            schema_version: text_column(column(3), "schema_version")?,
            file_id: text_column(column(4), "file_id")?,
            plugin_key: text_column(column(5), "plugin_key")?,
            snapshot_content: optional_text_column(column(6), "snapshot_content")?,
            commit_id: text_column(column(7), "commit_id")?,
            created_at: text_column(column(8), "created_at")?,
            depth: column(9).as_integer().unwrap_or_default(),
        })
    }
}

pub(crate) async fn materialization_plan_internal(
    session: &ExecutionSession<'_>,
    scope: MaterializationScope,
) -> Result<MaterializationPlan, StrataError> {
    let backend = session.backend();
    let heads = backend
        .execute(
            &format!("SELECT version_id, commit_id FROM {VERSION_HEAD_TABLE} ORDER BY version_id"),
            &[],
        )
        .await?;

    let mut versions = Vec::new();
    let mut changes_scanned = 0;
    let mut writes = Vec::new();
    for row in &heads.rows {
        let version_id = text_column(row.first().unwrap_or(&Value::Null), "version_id")?;
        if !scope.includes(&version_id) {
            continue;
        }
        let head = text_column(row.get(1).unwrap_or(&Value::Null), "commit_id")?;
        let lineage = load_lineage(session, &head).await?;
        changes_scanned += lineage.len();
        writes.extend(build_version_writes(&version_id, &lineage));
        versions.push(version_id);
    }

    writes.sort_by(|a, b| {
        a.schema_key
            .cmp(&b.schema_key)
            .then_with(|| a.version_id.cmp(&b.version_id))
            .then_with(|| a.file_id.cmp(&b.file_id))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });

    Ok(MaterializationPlan {
        scope,
        versions,
        changes_scanned,
        writes,
    })
}

/// Every change on the commit chain ending at `head`, nearest first.
async fn load_lineage(
    session: &ExecutionSession<'_>,
    head: &str,
) -> Result<Vec<LineageChange>, StrataError> {
    let max_depth = i64::from(session.config().max_history_depth);
    let result = session
        .backend()
        .execute(
            &format!(
                "WITH RECURSIVE lineage (commit_id, depth) AS (\
                 SELECT ?1, 0 \
                 UNION ALL \
                 SELECT c.parent_commit_id, l.depth + 1 FROM lineage l \
                 JOIN {COMMIT_TABLE} c ON c.id = l.commit_id \
                 WHERE c.parent_commit_id IS NOT NULL AND l.depth < ?2\
                 ) \
                 SELECT ch.id, ch.entity_id, ch.schema_key, ch.schema_version, ch.file_id, \
                 ch.plugin_key, ch.snapshot_content, ch.commit_id, ch.created_at, l.depth \
                 FROM lineage l JOIN {CHANGE_TABLE} ch ON ch.commit_id = l.commit_id \
                 ORDER BY l.depth ASC, ch.created_at DESC, ch.id DESC"
            ),
            &[Value::Text(head.to_string()), Value::Integer(max_depth)],
        )
        .await?;
    result
        .rows
        .iter()
        .map(|row| LineageChange::from_values(row))
        .collect()
}

/// The newest change per entity wins. `created_at` is the oldest change of
/// the unbroken run of live changes ending at the winner.
pub(super) fn build_version_writes(
    version_id: &str,
    lineage: &[LineageChange],
) -> Vec<MaterializationWrite> {
    let mut by_entity: BTreeMap<(&str, &str, &str), Vec<&LineageChange>> = BTreeMap::new();
    for change in lineage {
        by_entity
            .entry((
                change.schema_key.as_str(),
                change.entity_id.as_str(),
                change.file_id.as_str(),
            ))
            .or_default()
            .push(change);
    }

    by_entity
        .into_values()
        .filter_map(|history| {
            let winner = *history.first()?;
            let created_at = if winner.snapshot_content.is_none() {
                winner.created_at.clone()
            } else {
                history
                    .iter()
                    .take_while(|change| change.snapshot_content.is_some())
                    .last()
                    .map(|change| change.created_at.clone())
                    .unwrap_or_else(|| winner.created_at.clone())
            };
            Some(MaterializationWrite {
                schema_key: winner.schema_key.clone(),
                entity_id: winner.entity_id.clone(),
                file_id: winner.file_id.clone(),
                version_id: version_id.to_string(),
                op: if winner.snapshot_content.is_some() {
                    MaterializationWriteOp::Upsert
                } else {
                    MaterializationWriteOp::Tombstone
                },
                snapshot_content: winner.snapshot_content.clone(),
                schema_version: winner.schema_version.clone(),
                plugin_key: winner.plugin_key.clone(),
                change_id: winner.change_id.clone(),
                commit_id: winner.commit_id.clone(),
                created_at,
                updated_at: winner.created_at.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{build_version_writes, LineageChange};
    use crate::materialization::MaterializationWriteOp;

    fn change(id: &str, entity: &str, snapshot: Option<&str>, at: &str, depth: i64) -> LineageChange {
        LineageChange {
            change_id: id.to_string(),
            entity_id: entity.to_string(),
            schema_key: "task".to_string(),
            schema_version: "1".to_string(),
            file_id: "f".to_string(),
            plugin_key: "strata".to_string(),
            snapshot_content: snapshot.map(str::to_string),
            commit_id: format!("commit-{depth}"),
            created_at: at.to_string(),
            depth,
        }
    }

    #[test]
    fn nearest_change_wins_and_keeps_first_creation_time() {
        let lineage = vec![
            change("c3", "a", Some(r#"{"v":3}"#), "t3", 0),
            change("c2", "a", Some(r#"{"v":2}"#), "t2", 1),
            change("c1", "a", Some(r#"{"v":1}"#), "t1", 2),
        ];
        let writes = build_version_writes("main", &lineage);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].change_id, "c3");
        assert_eq!(writes[0].created_at, "t1");
        assert_eq!(writes[0].updated_at, "t3");
        assert_eq!(writes[0].commit_id, "commit-0");
    }

    #[test]
    fn recreation_after_delete_restarts_creation_time() {
        let lineage = vec![
            change("c3", "a", Some(r#"{"v":3}"#), "t3", 0),
            change("c2", "a", None, "t2", 1),
            change("c1", "a", Some(r#"{"v":1}"#), "t1", 2),
        ];
        let writes = build_version_writes("main", &lineage);
        assert_eq!(writes[0].created_at, "t3");
        assert_eq!(writes[0].op, MaterializationWriteOp::Upsert);
    }

    #[test]
    fn deleted_entities_materialize_as_tombstones() {
        let lineage = vec![
            change("c2", "a", None, "t2", 0),
            change("c1", "a", Some("{}"), "t1", 1),
            change("c0", "b", Some("{}"), "t0", 1),
        ];
        let writes = build_version_writes("main", &lineage);
        assert_eq!(writes.len(), 2);
        let a = writes.iter().find(|write| write.entity_id == "a").expect("a");
        assert_eq!(a.op, MaterializationWriteOp::Tombstone);
        assert_eq!(a.snapshot_content, None);
        let b = writes.iter().find(|write| write.entity_id == "b").expect("b");
        assert_eq!(b.op, MaterializationWriteOp::Upsert);
    }
}
