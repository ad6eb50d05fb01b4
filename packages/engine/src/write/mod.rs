//! Interception of INSERT, UPDATE and DELETE against logical relations.
//!
//! Writes that target `state`, `state_by_version` or an entity view never
//! reach the backend as written. They are dispatched to the relation's
//! [`WriteInterceptor`], which turns each affected row into an entity write
//! or delete on the tiered state tables.

pub(crate) mod context;
mod hooks;
mod state_relation;
pub(crate) mod state_write;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::entity_views::EntityViewInterceptor;
use crate::errors::{planning_error, read_only_view_write_error};
use crate::schema::SchemaRegistry;
use crate::sql::ast::{
    Assignment, ConflictAction, ConflictResolution, Delete, Expr, Ident, Insert, InsertSource,
    Literal, ObjectName, Query, Select, SelectItem, SetExpr, Statement, TableAlias, TableFactor,
    TableWithJoins, Update,
};
use crate::sql::build::{case_when, lit_int};
use crate::sql::visit::visit_expr_mut;
use crate::state::{STATE_BY_VERSION_RELATION, STATE_HISTORY_RELATION, STATE_RELATION};
use crate::{StrataError, Value};

pub(crate) use context::{ExecutionSession, SessionState, StateRow, GLOBAL_VERSION_ID};
pub(crate) use state_write::{delete_entity, write_entity, EntityDelete, EntityWrite};

use state_relation::StateRelationInterceptor;

/// Row-level write handling for one logical relation. The defaults reject
/// the operation, which is what read-only relations rely on.
#[async_trait(?Send)]
pub(crate) trait WriteInterceptor {
    fn relation(&self) -> &str;

    async fn insert(
        &self,
        _session: &mut ExecutionSession<'_>,
        _insert: &Insert,
        _params: &[Value],
    ) -> Result<usize, StrataError> {
        Err(read_only_view_write_error(self.relation(), "INSERT"))
    }

    async fn update(
        &self,
        _session: &mut ExecutionSession<'_>,
        _update: &Update,
        _params: &[Value],
    ) -> Result<usize, StrataError> {
        Err(read_only_view_write_error(self.relation(), "UPDATE"))
    }

    async fn delete(
        &self,
        _session: &mut ExecutionSession<'_>,
        _delete: &Delete,
        _params: &[Value],
    ) -> Result<usize, StrataError> {
        Err(read_only_view_write_error(self.relation(), "DELETE"))
    }
}

struct ReadOnlyRelation(String);

impl WriteInterceptor for ReadOnlyRelation {
    fn relation(&self) -> &str {
        &self.0
    }
}

pub(crate) fn interceptor_for(
    registry: &SchemaRegistry,
    table: &ObjectName,
) -> Option<Box<dyn WriteInterceptor>> {
    if table.is_qualified() {
        return None;
    }
    let name = table.base_name();
    match name.as_str() {
        STATE_RELATION => Some(Box::new(StateRelationInterceptor::new(false))),
        STATE_BY_VERSION_RELATION => Some(Box::new(StateRelationInterceptor::new(true))),
        STATE_HISTORY_RELATION => Some(Box::new(ReadOnlyRelation(name))),
        _ => registry.resolve_view(&name).map(|(schema, variant)| {
            Box::new(EntityViewInterceptor::new(schema, variant, name)) as Box<dyn WriteInterceptor>
        }),
    }
}

/// Runs `statement` through its relation's interceptor. Returns `None` when
/// the statement does not write to a logical relation.
pub(crate) async fn execute_write(
    session: &mut ExecutionSession<'_>,
    statement: &Statement,
    params: &[Value],
) -> Result<Option<usize>, StrataError> {
    let (table, returning) = match statement {
        Statement::Insert(insert) => (&insert.table, &insert.returning),
        Statement::Update(update) => (&update.table, &update.returning),
        Statement::Delete(delete) => (&delete.table, &delete.returning),
        Statement::Query(_) | Statement::Passthrough(_) => return Ok(None),
    };
    let Some(interceptor) = interceptor_for(&session.state.registry, table) else {
        return Ok(None);
    };
    if !returning.is_empty() {
        return Err(planning_error(&format!(
            "RETURNING is not supported on writes to `{}`",
            interceptor.relation()
        )));
    }

    let affected = match statement {
        Statement::Insert(insert) => interceptor.insert(session, insert, params).await?,
        Statement::Update(update) => interceptor.update(session, update, params).await?,
        Statement::Delete(delete) => interceptor.delete(session, delete, params).await?,
        Statement::Query(_) | Statement::Passthrough(_) => 0,
    };
    tracing::debug!(
        target: "strata::write",
        relation = interceptor.relation(),
        affected,
        "intercepted write"
    );
    Ok(Some(affected))
}

/// What an INSERT does when the entity already exists locally.
pub(crate) enum ConflictPolicy<'a> {
    Abort,
    Ignore,
    Replace,
    Update {
        assignments: &'a [Assignment],
        selection: Option<&'a Expr>,
    },
}

impl<'a> ConflictPolicy<'a> {
    pub(crate) fn of(insert: &'a Insert) -> Self {
        if let Some(on_conflict) = &insert.on_conflict {
            return match &on_conflict.action {
                ConflictAction::DoNothing => Self::Ignore,
                ConflictAction::DoUpdate {
                    assignments,
                    selection,
                } => Self::Update {
                    assignments,
                    selection: selection.as_ref(),
                },
            };
        }
        match insert.or {
            Some(ConflictResolution::Ignore) => Self::Ignore,
            Some(ConflictResolution::Replace) => Self::Replace,
            _ => Self::Abort,
        }
    }
}

/// The rows an INSERT provides, one value per listed column.
pub(crate) async fn insert_source_rows(
    session: &ExecutionSession<'_>,
    insert: &Insert,
    params: &[Value],
) -> Result<Vec<Vec<Value>>, StrataError> {
    let query = match &insert.source {
        InsertSource::DefaultValues => return Ok(vec![Vec::new()]),
        InsertSource::Query(query) => query,
    };
    if insert.columns.is_empty() {
        return Err(planning_error(&format!(
            "INSERT into `{}` must list its columns",
            insert.table.base_name()
        )));
    }
    let result = session
        .run_query(
            Statement::Query(query.clone()),
            params,
            session.config().cache_routing,
        )
        .await?;
    if let Some(row) = result
        .rows
        .iter()
        .find(|row| row.len() != insert.columns.len())
    {
        return Err(planning_error(&format!(
            "INSERT into `{}` lists {} columns but a row has {} values",
            insert.table.base_name(),
            insert.columns.len(),
            row.len()
        )));
    }
    Ok(result.rows)
}

/// Selects `projection` from the write target, so UPDATE and DELETE see the
/// same rows a SELECT with the same WHERE clause would.
pub(crate) async fn select_target_rows(
    session: &ExecutionSession<'_>,
    table: &ObjectName,
    alias: Option<&Ident>,
    projection: Vec<Expr>,
    selection: Option<&Expr>,
    params: &[Value],
) -> Result<Vec<Vec<Value>>, StrataError> {
    let select = Select {
        projection: projection
            .into_iter()
            .map(|expr| SelectItem::Expr { expr, alias: None })
            .collect(),
        from: vec![TableWithJoins {
            relation: TableFactor::Table {
                name: table.clone(),
                alias: alias.map(|alias| TableAlias {
                    name: alias.clone(),
                    columns: Vec::new(),
                }),
            },
            joins: Vec::new(),
        }],
        selection: selection.cloned(),
        ..Select::default()
    };
    let query = Query::from_body(SetExpr::Select(Box::new(select)));
    Ok(session
        .run_query(
            Statement::Query(Box::new(query)),
            params,
            session.config().cache_routing,
        )
        .await?
        .rows)
}

/// Evaluates `ON CONFLICT DO UPDATE` assignments. `excluded.<column>` reads
/// the proposed row and bare or table-qualified columns read the existing
/// one. Returns `None` when the `WHERE` clause rejects the update.
pub(crate) async fn evaluate_conflict_update(
    session: &ExecutionSession<'_>,
    assignments: &[Assignment],
    selection: Option<&Expr>,
    excluded: &BTreeMap<String, Value>,
    existing: &BTreeMap<String, Value>,
    params: &[Value],
) -> Result<Option<Vec<(String, Value)>>, StrataError> {
    let mut projection: Vec<Expr> = assignments
        .iter()
        .map(|assignment| assignment.value.clone())
        .collect();
    projection.push(match selection {
        Some(selection) => case_when(selection.clone(), lit_int(1), lit_int(0)),
        None => lit_int(1),
    });
    for expr in &mut projection {
        visit_expr_mut(expr, &mut |node| {
            let replacement = match node {
                Expr::Identifier(ident) => existing.get(&ident.normalized()),
                Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
                    let column = parts[1].normalized();
                    if parts[0].matches("excluded") {
                        Some(excluded.get(&column).unwrap_or(&Value::Null))
                    } else {
                        existing.get(&column)
                    }
                }
                _ => None,
            };
            if let Some(value) = replacement {
                *node = value_literal(value);
            }
            Ok(())
        })?;
    }

    let select = Select {
        projection: projection
            .into_iter()
            .map(|expr| SelectItem::Expr { expr, alias: None })
            .collect(),
        ..Select::default()
    };
    let query = Query::from_body(SetExpr::Select(Box::new(select)));
    let result = session
        .run_query(
            Statement::Query(Box::new(query)),
            params,
            session.config().cache_routing,
        )
        .await?;
    let Some(mut row) = result.rows.into_iter().next() else {
        return Ok(None);
    };
    let accepted = row.pop().is_some_and(|flag| flag.as_bool().unwrap_or(false));
    if !accepted {
        return Ok(None);
    }
    Ok(Some(
        assignments
            .iter()
            .map(|assignment| assignment.column.normalized())
            .zip(row)
            .collect(),
    ))
}

/// Renders a bound value as a SQL literal.
pub(crate) fn value_literal(value: &Value) -> Expr {
    Expr::Literal(match value {
        Value::Null => Literal::Null,
        Value::Integer(number) => Literal::Number(number.to_string()),
        Value::Real(number) => Literal::Number(format!("{number:?}")),
        Value::Text(text) => Literal::String(text.clone()),
        Value::Blob(bytes) => Literal::Blob(bytes.iter().map(|byte| format!("{byte:02x}")).collect()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::test_support::registry;
    use crate::sql::parse_statement;

    fn insert(sql: &str) -> Insert {
        match parse_statement(sql).expect("parse") {
            Statement::Insert(insert) => insert,
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn dispatches_logical_relations_only() {
        let registry = registry();
        let relation = |name: &str| {
            interceptor_for(&registry, &ObjectName::simple(name))
                .map(|interceptor| interceptor.relation().to_string())
        };
        assert_eq!(relation("state").as_deref(), Some("state"));
        assert_eq!(relation("State_By_Version").as_deref(), Some("state_by_version"));
        assert_eq!(relation("task_all").as_deref(), Some("task_all"));
        assert_eq!(relation("task_history").as_deref(), Some("task_history"));
        assert!(relation("other").is_none());
        let qualified = ObjectName(vec![Ident::new("main"), Ident::new("state")]);
        assert!(interceptor_for(&registry, &qualified).is_none());
    }

    #[test]
    fn conflict_policy_follows_the_statement() {
        assert!(matches!(
            ConflictPolicy::of(&insert("INSERT INTO t (a) VALUES (1)")),
            ConflictPolicy::Abort
        ));
        assert!(matches!(
            ConflictPolicy::of(&insert("INSERT OR IGNORE INTO t (a) VALUES (1)")),
            ConflictPolicy::Ignore
        ));
        assert!(matches!(
            ConflictPolicy::of(&insert("INSERT OR REPLACE INTO t (a) VALUES (1)")),
            ConflictPolicy::Replace
        ));
        assert!(matches!(
            ConflictPolicy::of(&insert(
                "INSERT INTO t (a) VALUES (1) ON CONFLICT (a) DO NOTHING"
            )),
            ConflictPolicy::Ignore
        ));
        match ConflictPolicy::of(&insert(
            "INSERT INTO t (a) VALUES (1) ON CONFLICT (a) DO UPDATE SET a = excluded.a WHERE a > 0",
        )) {
            ConflictPolicy::Update {
                assignments,
                selection,
            } => {
                assert_eq!(assignments.len(), 1);
                assert!(selection.is_some());
            }
            _ => panic!("expected update policy"),
        }
    }

    #[test]
    fn renders_values_as_literals() {
        assert_eq!(value_literal(&Value::Null).to_string(), "NULL");
        assert_eq!(value_literal(&Value::Integer(-3)).to_string(), "-3");
        assert_eq!(value_literal(&Value::Text("it's".into())).to_string(), "'it''s'");
        assert_eq!(value_literal(&Value::Blob(vec![0xab, 0x01])).to_string(), "X'ab01'");
    }
}
