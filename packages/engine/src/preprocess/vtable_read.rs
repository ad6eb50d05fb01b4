//! Rewrites `state` and `state_by_version` into resolved-state subqueries.

use crate::config::CacheRouting;
use crate::sql::ast::*;
use crate::sql::build::lit_str;
use crate::sql::visit::{
    column_reference, rewrite_statement_relations, split_conjuncts, ColumnUsage, RelationRewriter,
    RelationScope,
};
use crate::state::{
    build_resolved_state_query, route_cache_tables, schema_key_filter, PushdownPredicate,
    ResolvedStateRequest, SchemaKeyFilter, StateColumn, STATE_BY_VERSION_RELATION, STATE_RELATION,
};
use crate::StrataError;

use super::{PreprocessContext, RewritePass};

/// Which versions a resolved-state read covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VersionScope {
    /// The engine's active version.
    Active,
    /// Every version; `version_id` is a regular column.
    All,
    /// One fixed version.
    Pinned(String),
}

pub(crate) struct StateScope<'a> {
    /// Relation name used in routing errors.
    pub relation: &'a str,
    pub version: VersionScope,
    pub columns: Vec<StateColumn>,
    pub pushdown: Vec<PushdownPredicate>,
    pub schema_filter: SchemaKeyFilter,
    pub routing: CacheRouting,
}

/// Builds the resolved-state query for one relation reference.
pub(crate) fn resolved_state_query(
    scope: StateScope<'_>,
    context: &PreprocessContext<'_>,
) -> Result<Query, StrataError> {
    let cache_schema_keys = route_cache_tables(
        &scope.schema_filter,
        context.registry.cache_table_keys(),
        scope.routing,
        scope.relation,
    )?;
    tracing::debug!(
        target: "strata::preprocess",
        relation = scope.relation,
        cache_tables = ?cache_schema_keys,
        "routed cache tables"
    );

    let mut pushdown = scope.pushdown;
    match &scope.version {
        VersionScope::Active => pushdown.push(PushdownPredicate {
            column: StateColumn::VersionId,
            values: vec![lit_str(context.active_version_id)],
        }),
        VersionScope::Pinned(version_id) => pushdown.push(PushdownPredicate {
            column: StateColumn::VersionId,
            values: vec![lit_str(version_id)],
        }),
        VersionScope::All => {}
    }

    let mut columns = scope.columns;
    if columns.is_empty() {
        columns.push(StateColumn::EntityId);
    }

    Ok(build_resolved_state_query(&ResolvedStateRequest {
        cache_schema_keys: &cache_schema_keys,
        closure: context.closure,
        include_transaction: context.include_transaction,
        columns: &columns,
        pushdown: &pushdown,
    }))
}

/// Equality and `IN` conjuncts of `selection` on columns of the relation
/// visible as `qualifier`, whose comparands are string literals or bound
/// parameters. `resolve` maps column names to the caller's column type.
pub(crate) fn extract_pushdown<C: Copy + PartialEq>(
    selection: Option<&Expr>,
    qualifier: &str,
    allow_bare: bool,
    resolve: impl Fn(&str) -> Option<C>,
) -> Vec<(C, Vec<Expr>)> {
    let Some(selection) = selection else {
        return Vec::new();
    };
    let column = |expr: &Expr| {
        column_reference(expr, qualifier, allow_bare).and_then(|ident| resolve(&ident.normalized()))
    };

    let mut out = Vec::new();
    for conjunct in split_conjuncts(selection) {
        match conjunct {
            Expr::Binary {
                left,
                op: BinaryOp::Eq,
                right,
            } => {
                if let (Some(target), true) = (column(left), is_pushable_value(right)) {
                    out.push((target, vec![(**right).clone()]));
                } else if let (Some(target), true) = (column(right), is_pushable_value(left)) {
                    out.push((target, vec![(**left).clone()]));
                }
            }
            Expr::InList {
                expr,
                list,
                negated: false,
            } if !list.is_empty() && list.iter().all(is_pushable_value) => {
                if let Some(target) = column(expr) {
                    out.push((target, list.clone()));
                }
            }
            _ => {}
        }
    }
    out
}

fn is_pushable_value(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Literal(Literal::String(_)) | Expr::Placeholder(_)
    )
}

fn pushable_state_column(name: &str) -> Option<StateColumn> {
    StateColumn::from_name(name).filter(|column| {
        matches!(
            column,
            StateColumn::EntityId
                | StateColumn::SchemaKey
                | StateColumn::FileId
                | StateColumn::VersionId
                | StateColumn::PluginKey
        )
    })
}

pub(crate) fn state_columns(usage: &ColumnUsage) -> Vec<StateColumn> {
    let mut columns: Vec<StateColumn> = StateColumn::VISIBLE
        .into_iter()
        .filter(|column| usage.includes(column.name()))
        .collect();
    if usage.references(StateColumn::Pk.name()) {
        columns.push(StateColumn::Pk);
    }
    columns
}

pub(crate) fn relation_qualifier(name: &ObjectName, alias: Option<&TableAlias>) -> String {
    alias
        .map(|alias| alias.name.value.clone())
        .unwrap_or_else(|| name.base_name())
}

pub(crate) fn replacement(
    query: Query,
    name: &ObjectName,
    alias: Option<&TableAlias>,
) -> TableFactor {
    TableFactor::Derived {
        subquery: Box::new(query),
        alias: Some(
            alias
                .cloned()
                .unwrap_or_else(|| TableAlias::new(name.base_name())),
        ),
    }
}

pub(crate) struct VtableReadPass;

impl RewritePass for VtableReadPass {
    fn name(&self) -> &'static str {
        "vtable_read"
    }

    fn apply(
        &self,
        statement: &mut Statement,
        context: &PreprocessContext<'_>,
    ) -> Result<bool, StrataError> {
        let mut rewriter = StateRelationRewriter {
            context,
            changed: false,
        };
        rewrite_statement_relations(statement, &mut rewriter)?;
        Ok(rewriter.changed)
    }
}

struct StateRelationRewriter<'a, 'c> {
    context: &'a PreprocessContext<'c>,
    changed: bool,
}

impl RelationRewriter for StateRelationRewriter<'_, '_> {
    fn rewrite_relation(
        &mut self,
        name: &ObjectName,
        alias: Option<&TableAlias>,
        scope: &RelationScope<'_>,
    ) -> Result<Option<TableFactor>, StrataError> {
        let relation = name.base_name();
        let version = match relation.as_str() {
            STATE_RELATION => VersionScope::Active,
            STATE_BY_VERSION_RELATION => VersionScope::All,
            _ => return Ok(None),
        };

        let qualifier = relation_qualifier(name, alias);
        let allow_bare = scope.single_relation;
        let pushdown = extract_pushdown(
            scope.selection,
            &qualifier,
            allow_bare,
            pushable_state_column,
        )
        .into_iter()
        .map(|(column, values)| PushdownPredicate { column, values })
        .collect();

        let query = resolved_state_query(
            StateScope {
                relation: &relation,
                version,
                columns: state_columns(scope.usage),
                pushdown,
                schema_filter: schema_key_filter(scope.selection, &qualifier, allow_bare),
                routing: self.context.cache_routing,
            },
            self.context,
        )?;
        self.changed = true;
        Ok(Some(replacement(query, name, alias)))
    }
}
