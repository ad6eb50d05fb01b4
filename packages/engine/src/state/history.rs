//! `state_history`: every change reachable from a root commit, with its
//! distance from that root.

use crate::sql::ast::*;
use crate::sql::build::*;

use super::tables::{CHANGE_TABLE, COMMIT_LINEAGE_CTE, COMMIT_TABLE, VERSION_HEAD_TABLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HistoryColumn {
    EntityId,
    SchemaKey,
    FileId,
    PluginKey,
    SnapshotContent,
    SchemaVersion,
    Metadata,
    ChangeId,
    CommitId,
    CreatedAt,
    RootCommitId,
    Depth,
    VersionId,
}

impl HistoryColumn {
    pub const ALL: [HistoryColumn; 13] = [
        HistoryColumn::EntityId,
        HistoryColumn::SchemaKey,
        HistoryColumn::FileId,
        HistoryColumn::PluginKey,
        HistoryColumn::SnapshotContent,
        HistoryColumn::SchemaVersion,
        HistoryColumn::Metadata,
        HistoryColumn::ChangeId,
        HistoryColumn::CommitId,
        HistoryColumn::CreatedAt,
        HistoryColumn::RootCommitId,
        HistoryColumn::Depth,
        HistoryColumn::VersionId,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HistoryColumn::EntityId => "entity_id",
            HistoryColumn::SchemaKey => "schema_key",
            HistoryColumn::FileId => "file_id",
            HistoryColumn::PluginKey => "plugin_key",
            HistoryColumn::SnapshotContent => "snapshot_content",
            HistoryColumn::SchemaVersion => "schema_version",
            HistoryColumn::Metadata => "metadata",
            HistoryColumn::ChangeId => "change_id",
            HistoryColumn::CommitId => "commit_id",
            HistoryColumn::CreatedAt => "created_at",
            HistoryColumn::RootCommitId => "root_commit_id",
            HistoryColumn::Depth => "depth",
            HistoryColumn::VersionId => "version_id",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|column| column.name().eq_ignore_ascii_case(name))
    }

    fn source(self) -> Expr {
        match self {
            HistoryColumn::ChangeId => qcol(CHANGE_ALIAS, "id"),
            HistoryColumn::CommitId => qcol(LINEAGE_ALIAS, "commit_id"),
            HistoryColumn::RootCommitId => qcol(LINEAGE_ALIAS, "root_commit_id"),
            HistoryColumn::Depth => qcol(LINEAGE_ALIAS, "depth"),
            HistoryColumn::VersionId => qcol(COMMIT_ALIAS, "version_id"),
            other => qcol(CHANGE_ALIAS, other.name()),
        }
    }
}

/// `column IN (values)` over literals or placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPredicate {
    pub column: HistoryColumn,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryRequest<'a> {
    pub columns: &'a [HistoryColumn],
    pub pushdown: &'a [HistoryPredicate],
    pub max_depth: usize,
}

const LINEAGE_ALIAS: &str = "l";
const CHANGE_ALIAS: &str = "ch";
const COMMIT_ALIAS: &str = "cm";
const HEAD_ALIAS: &str = "h";

fn membership(target: Expr, values: &[Expr]) -> Expr {
    match values {
        [single] => eq(target, single.clone()),
        values => in_list(target, values.to_vec()),
    }
}

/// History rows rooted at every version head, or at the commits named by a
/// `root_commit_id` filter.
pub fn build_history_query(request: &HistoryRequest<'_>) -> Query {
    let root_filter: Vec<&HistoryPredicate> = request
        .pushdown
        .iter()
        .filter(|predicate| predicate.column == HistoryColumn::RootCommitId)
        .collect();

    let seed = if root_filter.is_empty() {
        Select {
            projection: vec![
                item(qcol(HEAD_ALIAS, "commit_id"), "root_commit_id"),
                item(qcol(HEAD_ALIAS, "commit_id"), "commit_id"),
                item(lit_int(0), "depth"),
            ],
            from: vec![from(table(VERSION_HEAD_TABLE, Some(HEAD_ALIAS)))],
            ..Select::default()
        }
    } else {
        Select {
            projection: vec![
                item(qcol(COMMIT_ALIAS, "id"), "root_commit_id"),
                item(qcol(COMMIT_ALIAS, "id"), "commit_id"),
                item(lit_int(0), "depth"),
            ],
            from: vec![from(table(COMMIT_TABLE, Some(COMMIT_ALIAS)))],
            selection: and_all(
                root_filter
                    .iter()
                    .map(|predicate| membership(qcol(COMMIT_ALIAS, "id"), &predicate.values)),
            ),
            ..Select::default()
        }
    };

    let mut step_from = from(table(COMMIT_LINEAGE_CTE, Some(LINEAGE_ALIAS)));
    step_from.joins.push(inner_join(
        table(COMMIT_TABLE, Some(COMMIT_ALIAS)),
        eq(qcol(COMMIT_ALIAS, "id"), qcol(LINEAGE_ALIAS, "commit_id")),
    ));
    let step = Select {
        projection: vec![
            bare_item(qcol(LINEAGE_ALIAS, "root_commit_id")),
            bare_item(qcol(COMMIT_ALIAS, "parent_commit_id")),
            bare_item(binary(qcol(LINEAGE_ALIAS, "depth"), BinaryOp::Plus, lit_int(1))),
        ],
        from: vec![step_from],
        selection: and_all([
            is_not_null(qcol(COMMIT_ALIAS, "parent_commit_id")),
            binary(
                qcol(LINEAGE_ALIAS, "depth"),
                BinaryOp::Lt,
                lit_int(i64::try_from(request.max_depth).unwrap_or(i64::MAX)),
            ),
        ]),
        ..Select::default()
    };

    let lineage = Cte {
        name: ident(COMMIT_LINEAGE_CTE),
        columns: vec![ident("root_commit_id"), ident("commit_id"), ident("depth")],
        query: Box::new(Query::from_body(SetExpr::SetOperation {
            op: SetOperator::Union,
            all: true,
            left: Box::new(SetExpr::Select(Box::new(seed))),
            right: Box::new(SetExpr::Select(Box::new(step))),
        })),
    };

    let mut rows_from = from(table(COMMIT_LINEAGE_CTE, Some(LINEAGE_ALIAS)));
    rows_from.joins.push(inner_join(
        table(CHANGE_TABLE, Some(CHANGE_ALIAS)),
        eq(qcol(CHANGE_ALIAS, "commit_id"), qcol(LINEAGE_ALIAS, "commit_id")),
    ));
    rows_from.joins.push(inner_join(
        table(COMMIT_TABLE, Some(COMMIT_ALIAS)),
        eq(qcol(COMMIT_ALIAS, "id"), qcol(LINEAGE_ALIAS, "commit_id")),
    ));

    let filters = request
        .pushdown
        .iter()
        .filter(|predicate| predicate.column != HistoryColumn::RootCommitId)
        .map(|predicate| membership(predicate.column.source(), &predicate.values));

    let mut query = select_query(Select {
        projection: request
            .columns
            .iter()
            .map(|column| item(column.source(), column.name()))
            .collect(),
        from: vec![rows_from],
        selection: and_all(filters),
        ..Select::default()
    });
    query.with = Some(With {
        recursive: true,
        ctes: vec![lineage],
    });
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_from_version_heads_by_default() {
        let sql = build_history_query(&HistoryRequest {
            columns: &HistoryColumn::ALL,
            pushdown: &[],
            max_depth: 100,
        })
        .to_string();
        assert!(sql.starts_with("WITH RECURSIVE strata_commit_lineage(root_commit_id, commit_id, depth) AS ("));
        assert!(sql.contains("FROM strata_internal_version_head AS h"));
        assert!(sql.contains("l.depth < 100"));
        assert!(sql.contains("ch.id AS change_id"));
        assert!(sql.contains("cm.version_id AS version_id"));
    }

    #[test]
    fn root_commit_filter_replaces_the_seed() {
        let sql = build_history_query(&HistoryRequest {
            columns: &[HistoryColumn::EntityId, HistoryColumn::Depth],
            pushdown: &[
                HistoryPredicate {
                    column: HistoryColumn::RootCommitId,
                    values: vec![lit_str("c9")],
                },
                HistoryPredicate {
                    column: HistoryColumn::SchemaKey,
                    values: vec![lit_str("task"), lit_str("note")],
                },
            ],
            max_depth: 10,
        })
        .to_string();
        assert!(!sql.contains("strata_internal_version_head"));
        assert!(sql.contains("WHERE cm.id = 'c9'"));
        assert!(sql.ends_with("WHERE ch.schema_key IN ('task', 'note')"));
    }
}
