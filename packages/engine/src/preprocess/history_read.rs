//! Rewrites `state_history` into the commit-lineage query.

use crate::sql::ast::{ObjectName, Statement, TableAlias, TableFactor};
use crate::sql::visit::{rewrite_statement_relations, ColumnUsage, RelationRewriter, RelationScope};
use crate::state::{
    build_history_query, HistoryColumn, HistoryPredicate, HistoryRequest, STATE_HISTORY_RELATION,
};
use crate::StrataError;

use super::vtable_read::{extract_pushdown, relation_qualifier, replacement};
use super::{PreprocessContext, RewritePass};

pub(crate) fn history_columns(usage: &ColumnUsage) -> Vec<HistoryColumn> {
    let columns: Vec<HistoryColumn> = HistoryColumn::ALL
        .into_iter()
        .filter(|column| usage.includes(column.name()))
        .collect();
    if columns.is_empty() {
        vec![HistoryColumn::EntityId]
    } else {
        columns
    }
}

pub(crate) fn pushable_history_column(name: &str) -> Option<HistoryColumn> {
    HistoryColumn::from_name(name).filter(|column| {
        matches!(
            column,
            HistoryColumn::EntityId
                | HistoryColumn::SchemaKey
                | HistoryColumn::FileId
                | HistoryColumn::RootCommitId
                | HistoryColumn::VersionId
        )
    })
}

pub(crate) struct HistoryReadPass;

impl RewritePass for HistoryReadPass {
    fn name(&self) -> &'static str {
        "history_read"
    }

    fn apply(
        &self,
        statement: &mut Statement,
        context: &PreprocessContext<'_>,
    ) -> Result<bool, StrataError> {
        let mut rewriter = HistoryRewriter {
            max_depth: context.max_history_depth,
            changed: false,
        };
        rewrite_statement_relations(statement, &mut rewriter)?;
        Ok(rewriter.changed)
    }
}

struct HistoryRewriter {
    max_depth: usize,
    changed: bool,
}

impl RelationRewriter for HistoryRewriter {
    fn rewrite_relation(
        &mut self,
        name: &ObjectName,
        alias: Option<&TableAlias>,
        scope: &RelationScope<'_>,
    ) -> Result<Option<TableFactor>, StrataError> {
        if name.base_name() != STATE_HISTORY_RELATION {
            return Ok(None);
        }
        let qualifier = relation_qualifier(name, alias);
        let pushdown: Vec<HistoryPredicate> = extract_pushdown(
            scope.selection,
            &qualifier,
            scope.single_relation,
            pushable_history_column,
        )
        .into_iter()
        .map(|(column, values)| HistoryPredicate { column, values })
        .collect();

        let query = build_history_query(&HistoryRequest {
            columns: &history_columns(scope.usage),
            pushdown: &pushdown,
            max_depth: self.max_depth,
        });
        self.changed = true;
        Ok(Some(replacement(query, name, alias)))
    }
}
