//! Walkers over the statement tree: expression visitors, column usage
//! collection and the relation rewriter used by the preprocess passes.

use std::collections::BTreeSet;

use super::ast::*;
use crate::StrataError;

pub(crate) type ExprVisitorMut<'a> = dyn FnMut(&mut Expr) -> Result<(), StrataError> + 'a;
pub(crate) type QueryVisitorMut<'a> = dyn FnMut(&mut Query) -> Result<(), StrataError> + 'a;

// ── Mutable expression walk (pre-order, descends into subqueries) ──────────

pub(crate) fn visit_statement_exprs_mut(
    statement: &mut Statement,
    visit: &mut ExprVisitorMut<'_>,
) -> Result<(), StrataError> {
    match statement {
        Statement::Query(query) => visit_query_exprs_mut(query, visit),
        Statement::Insert(insert) => {
            if let InsertSource::Query(query) = &mut insert.source {
                visit_query_exprs_mut(query, visit)?;
            }
            if let Some(on_conflict) = &mut insert.on_conflict {
                if let ConflictAction::DoUpdate {
                    assignments,
                    selection,
                } = &mut on_conflict.action
                {
                    for assignment in assignments {
                        visit_expr_mut(&mut assignment.value, visit)?;
                    }
                    if let Some(selection) = selection {
                        visit_expr_mut(selection, visit)?;
                    }
                }
            }
            visit_select_items_mut(&mut insert.returning, visit)
        }
        Statement::Update(update) => {
            for assignment in &mut update.assignments {
                visit_expr_mut(&mut assignment.value, visit)?;
            }
            if let Some(selection) = &mut update.selection {
                visit_expr_mut(selection, visit)?;
            }
            visit_select_items_mut(&mut update.returning, visit)
        }
        Statement::Delete(delete) => {
            if let Some(selection) = &mut delete.selection {
                visit_expr_mut(selection, visit)?;
            }
            visit_select_items_mut(&mut delete.returning, visit)
        }
        Statement::Passthrough(_) => Ok(()),
    }
}

pub(crate) fn visit_query_exprs_mut(
    query: &mut Query,
    visit: &mut ExprVisitorMut<'_>,
) -> Result<(), StrataError> {
    if let Some(with) = &mut query.with {
        for cte in &mut with.ctes {
            visit_query_exprs_mut(&mut cte.query, visit)?;
        }
    }
    visit_set_expr_exprs_mut(&mut query.body, visit)?;
    for order in &mut query.order_by {
        visit_expr_mut(&mut order.expr, visit)?;
    }
    if let Some(limit) = &mut query.limit {
        visit_expr_mut(limit, visit)?;
    }
    if let Some(offset) = &mut query.offset {
        visit_expr_mut(offset, visit)?;
    }
    Ok(())
}

fn visit_set_expr_exprs_mut(
    body: &mut SetExpr,
    visit: &mut ExprVisitorMut<'_>,
) -> Result<(), StrataError> {
    match body {
        SetExpr::Select(select) => visit_select_exprs_mut(select, visit),
        SetExpr::Query(query) => visit_query_exprs_mut(query, visit),
        SetExpr::SetOperation { left, right, .. } => {
            visit_set_expr_exprs_mut(left, visit)?;
            visit_set_expr_exprs_mut(right, visit)
        }
        SetExpr::Values(values) => {
            for row in &mut values.rows {
                for expr in row {
                    visit_expr_mut(expr, visit)?;
                }
            }
            Ok(())
        }
    }
}

fn visit_select_items_mut(
    items: &mut [SelectItem],
    visit: &mut ExprVisitorMut<'_>,
) -> Result<(), StrataError> {
    for item in items {
        if let SelectItem::Expr { expr, .. } = item {
            visit_expr_mut(expr, visit)?;
        }
    }
    Ok(())
}

fn visit_select_exprs_mut(
    select: &mut Select,
    visit: &mut ExprVisitorMut<'_>,
) -> Result<(), StrataError> {
    visit_select_items_mut(&mut select.projection, visit)?;
    for table in &mut select.from {
        visit_table_with_joins_exprs_mut(table, visit)?;
    }
    if let Some(selection) = &mut select.selection {
        visit_expr_mut(selection, visit)?;
    }
    for expr in &mut select.group_by {
        visit_expr_mut(expr, visit)?;
    }
    if let Some(having) = &mut select.having {
        visit_expr_mut(having, visit)?;
    }
    Ok(())
}

fn visit_table_with_joins_exprs_mut(
    table: &mut TableWithJoins,
    visit: &mut ExprVisitorMut<'_>,
) -> Result<(), StrataError> {
    visit_table_factor_exprs_mut(&mut table.relation, visit)?;
    for join in &mut table.joins {
        visit_table_factor_exprs_mut(&mut join.relation, visit)?;
        if let JoinConstraint::On(expr) = &mut join.constraint {
            visit_expr_mut(expr, visit)?;
        }
    }
    Ok(())
}

fn visit_table_factor_exprs_mut(
    factor: &mut TableFactor,
    visit: &mut ExprVisitorMut<'_>,
) -> Result<(), StrataError> {
    match factor {
        TableFactor::Table { .. } => Ok(()),
        TableFactor::Derived { subquery, .. } => visit_query_exprs_mut(subquery, visit),
        TableFactor::Function { args, .. } => {
            for arg in args {
                visit_expr_mut(arg, visit)?;
            }
            Ok(())
        }
        TableFactor::NestedJoin(inner) => visit_table_with_joins_exprs_mut(inner, visit),
    }
}

pub(crate) fn visit_expr_mut(
    expr: &mut Expr,
    visit: &mut ExprVisitorMut<'_>,
) -> Result<(), StrataError> {
    visit(expr)?;
    match expr {
        Expr::Identifier(_)
        | Expr::CompoundIdentifier(_)
        | Expr::Literal(_)
        | Expr::Placeholder(_) => Ok(()),
        Expr::Unary { expr, .. }
        | Expr::IsNull { expr, .. }
        | Expr::Cast { expr, .. }
        | Expr::Nested(expr)
        | Expr::Collate { expr, .. } => visit_expr_mut(expr, visit),
        Expr::Binary { left, right, .. } | Expr::Is { left, right, .. } => {
            visit_expr_mut(left, visit)?;
            visit_expr_mut(right, visit)
        }
        Expr::InList { expr, list, .. } => {
            visit_expr_mut(expr, visit)?;
            for item in list {
                visit_expr_mut(item, visit)?;
            }
            Ok(())
        }
        Expr::InSubquery { expr, subquery, .. } => {
            visit_expr_mut(expr, visit)?;
            visit_query_exprs_mut(subquery, visit)
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            visit_expr_mut(expr, visit)?;
            visit_expr_mut(low, visit)?;
            visit_expr_mut(high, visit)
        }
        Expr::Like {
            expr,
            pattern,
            escape,
            ..
        } => {
            visit_expr_mut(expr, visit)?;
            visit_expr_mut(pattern, visit)?;
            if let Some(escape) = escape {
                visit_expr_mut(escape, visit)?;
            }
            Ok(())
        }
        Expr::Case {
            operand,
            branches,
            else_result,
        } => {
            if let Some(operand) = operand {
                visit_expr_mut(operand, visit)?;
            }
            for (condition, result) in branches {
                visit_expr_mut(condition, visit)?;
                visit_expr_mut(result, visit)?;
            }
            if let Some(else_result) = else_result {
                visit_expr_mut(else_result, visit)?;
            }
            Ok(())
        }
        Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => {
            visit_query_exprs_mut(subquery, visit)
        }
        Expr::Function(function) => {
            if let FunctionArgs::List { args, .. } = &mut function.args {
                for arg in args {
                    visit_expr_mut(arg, visit)?;
                }
            }
            if let Some(over) = &mut function.over {
                for expr in &mut over.partition_by {
                    visit_expr_mut(expr, visit)?;
                }
                for order in &mut over.order_by {
                    visit_expr_mut(&mut order.expr, visit)?;
                }
            }
            Ok(())
        }
        Expr::Tuple(items) => {
            for item in items {
                visit_expr_mut(item, visit)?;
            }
            Ok(())
        }
    }
}

/// Calls `visit` on every subquery directly nested in `expr`, without
/// descending further; the callee decides how to walk the subquery.
pub(crate) fn visit_expr_subqueries_mut(
    expr: &mut Expr,
    visit: &mut QueryVisitorMut<'_>,
) -> Result<(), StrataError> {
    match expr {
        Expr::InSubquery { expr, subquery, .. } => {
            visit_expr_subqueries_mut(expr, visit)?;
            visit(subquery)
        }
        Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => visit(subquery),
        Expr::Identifier(_)
        | Expr::CompoundIdentifier(_)
        | Expr::Literal(_)
        | Expr::Placeholder(_) => Ok(()),
        Expr::Unary { expr, .. }
        | Expr::IsNull { expr, .. }
        | Expr::Cast { expr, .. }
        | Expr::Nested(expr)
        | Expr::Collate { expr, .. } => visit_expr_subqueries_mut(expr, visit),
        Expr::Binary { left, right, .. } | Expr::Is { left, right, .. } => {
            visit_expr_subqueries_mut(left, visit)?;
            visit_expr_subqueries_mut(right, visit)
        }
        Expr::InList { expr, list, .. } => {
            visit_expr_subqueries_mut(expr, visit)?;
            for item in list {
                visit_expr_subqueries_mut(item, visit)?;
            }
            Ok(())
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            visit_expr_subqueries_mut(expr, visit)?;
            visit_expr_subqueries_mut(low, visit)?;
            visit_expr_subqueries_mut(high, visit)
        }
        Expr::Like {
            expr,
            pattern,
            escape,
            ..
        } => {
            visit_expr_subqueries_mut(expr, visit)?;
            visit_expr_subqueries_mut(pattern, visit)?;
            if let Some(escape) = escape {
                visit_expr_subqueries_mut(escape, visit)?;
            }
            Ok(())
        }
        Expr::Case {
            operand,
            branches,
            else_result,
        } => {
            if let Some(operand) = operand {
                visit_expr_subqueries_mut(operand, visit)?;
            }
            for (condition, result) in branches {
                visit_expr_subqueries_mut(condition, visit)?;
                visit_expr_subqueries_mut(result, visit)?;
            }
            if let Some(else_result) = else_result {
                visit_expr_subqueries_mut(else_result, visit)?;
            }
            Ok(())
        }
        Expr::Function(function) => {
            if let FunctionArgs::List { args, .. } = &mut function.args {
                for arg in args {
                    visit_expr_subqueries_mut(arg, visit)?;
                }
            }
            if let Some(over) = &mut function.over {
                for expr in &mut over.partition_by {
                    visit_expr_subqueries_mut(expr, visit)?;
                }
                for order in &mut over.order_by {
                    visit_expr_subqueries_mut(&mut order.expr, visit)?;
                }
            }
            Ok(())
        }
        Expr::Tuple(items) => {
            for item in items {
                visit_expr_subqueries_mut(item, visit)?;
            }
            Ok(())
        }
    }
}

// ── Read-only expression walk ─────────────────────────────────────────────

pub(crate) fn visit_expr(expr: &Expr, visit: &mut dyn FnMut(&Expr)) {
    visit(expr);
    match expr {
        Expr::Identifier(_)
        | Expr::CompoundIdentifier(_)
        | Expr::Literal(_)
        | Expr::Placeholder(_) => {}
        Expr::Unary { expr, .. }
        | Expr::IsNull { expr, .. }
        | Expr::Cast { expr, .. }
        | Expr::Nested(expr)
        | Expr::Collate { expr, .. } => visit_expr(expr, visit),
        Expr::Binary { left, right, .. } | Expr::Is { left, right, .. } => {
            visit_expr(left, visit);
            visit_expr(right, visit);
        }
        Expr::InList { expr, list, .. } => {
            visit_expr(expr, visit);
            list.iter().for_each(|item| visit_expr(item, visit));
        }
        Expr::InSubquery { expr, subquery, .. } => {
            visit_expr(expr, visit);
            visit_query_exprs(subquery, visit);
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            visit_expr(expr, visit);
            visit_expr(low, visit);
            visit_expr(high, visit);
        }
        Expr::Like {
            expr,
            pattern,
            escape,
            ..
        } => {
            visit_expr(expr, visit);
            visit_expr(pattern, visit);
            if let Some(escape) = escape {
                visit_expr(escape, visit);
            }
        }
        Expr::Case {
            operand,
            branches,
            else_result,
        } => {
            if let Some(operand) = operand {
                visit_expr(operand, visit);
            }
            for (condition, result) in branches {
                visit_expr(condition, visit);
                visit_expr(result, visit);
            }
            if let Some(else_result) = else_result {
                visit_expr(else_result, visit);
            }
        }
        Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => {
            visit_query_exprs(subquery, visit)
        }
        Expr::Function(function) => {
            if let FunctionArgs::List { args, .. } = &function.args {
                args.iter().for_each(|arg| visit_expr(arg, visit));
            }
            if let Some(over) = &function.over {
                over.partition_by
                    .iter()
                    .for_each(|expr| visit_expr(expr, visit));
                over.order_by
                    .iter()
                    .for_each(|order| visit_expr(&order.expr, visit));
            }
        }
        Expr::Tuple(items) => items.iter().for_each(|item| visit_expr(item, visit)),
    }
}

/// Like [`visit_expr`] but stays within the current query level.
pub(crate) fn visit_expr_shallow(expr: &Expr, visit: &mut dyn FnMut(&Expr)) {
    visit(expr);
    match expr {
        Expr::Identifier(_)
        | Expr::CompoundIdentifier(_)
        | Expr::Literal(_)
        | Expr::Placeholder(_) => {}
        Expr::Unary { expr, .. }
        | Expr::IsNull { expr, .. }
        | Expr::Cast { expr, .. }
        | Expr::Nested(expr)
        | Expr::Collate { expr, .. } => visit_expr_shallow(expr, visit),
        Expr::Binary { left, right, .. } | Expr::Is { left, right, .. } => {
            visit_expr_shallow(left, visit);
            visit_expr_shallow(right, visit);
        }
        Expr::InList { expr, list, .. } => {
            visit_expr_shallow(expr, visit);
            list.iter().for_each(|item| visit_expr_shallow(item, visit));
        }
        Expr::InSubquery { expr, .. } => visit_expr_shallow(expr, visit),
        Expr::Between {
            expr, low, high, ..
        } => {
            visit_expr_shallow(expr, visit);
            visit_expr_shallow(low, visit);
            visit_expr_shallow(high, visit);
        }
        Expr::Like {
            expr,
            pattern,
            escape,
            ..
        } => {
            visit_expr_shallow(expr, visit);
            visit_expr_shallow(pattern, visit);
            if let Some(escape) = escape {
                visit_expr_shallow(escape, visit);
            }
        }
        Expr::Case {
            operand,
            branches,
            else_result,
        } => {
            if let Some(operand) = operand {
                visit_expr_shallow(operand, visit);
            }
            for (condition, result) in branches {
                visit_expr_shallow(condition, visit);
                visit_expr_shallow(result, visit);
            }
            if let Some(else_result) = else_result {
                visit_expr_shallow(else_result, visit);
            }
        }
        Expr::Exists { .. } | Expr::Subquery(_) => {}
        Expr::Function(function) => {
            if let FunctionArgs::List { args, .. } = &function.args {
                args.iter().for_each(|arg| visit_expr_shallow(arg, visit));
            }
            if let Some(over) = &function.over {
                over.partition_by
                    .iter()
                    .for_each(|expr| visit_expr_shallow(expr, visit));
                over.order_by
                    .iter()
                    .for_each(|order| visit_expr_shallow(&order.expr, visit));
            }
        }
        Expr::Tuple(items) => items.iter().for_each(|item| visit_expr_shallow(item, visit)),
    }
}

pub(crate) fn visit_query_exprs(query: &Query, visit: &mut dyn FnMut(&Expr)) {
    if let Some(with) = &query.with {
        for cte in &with.ctes {
            visit_query_exprs(&cte.query, visit);
        }
    }
    visit_set_expr_exprs(&query.body, visit);
    for order in &query.order_by {
        visit_expr(&order.expr, visit);
    }
    if let Some(limit) = &query.limit {
        visit_expr(limit, visit);
    }
    if let Some(offset) = &query.offset {
        visit_expr(offset, visit);
    }
}

fn visit_set_expr_exprs(body: &SetExpr, visit: &mut dyn FnMut(&Expr)) {
    match body {
        SetExpr::Select(select) => visit_select_exprs(select, visit),
        SetExpr::Query(query) => visit_query_exprs(query, visit),
        SetExpr::SetOperation { left, right, .. } => {
            visit_set_expr_exprs(left, visit);
            visit_set_expr_exprs(right, visit);
        }
        SetExpr::Values(values) => values
            .rows
            .iter()
            .flatten()
            .for_each(|expr| visit_expr(expr, visit)),
    }
}

fn visit_select_exprs(select: &Select, visit: &mut dyn FnMut(&Expr)) {
    for item in &select.projection {
        if let SelectItem::Expr { expr, .. } = item {
            visit_expr(expr, visit);
        }
    }
    for table in &select.from {
        visit_table_with_joins_exprs(table, visit);
    }
    if let Some(selection) = &select.selection {
        visit_expr(selection, visit);
    }
    select.group_by.iter().for_each(|expr| visit_expr(expr, visit));
    if let Some(having) = &select.having {
        visit_expr(having, visit);
    }
}

fn visit_table_with_joins_exprs(table: &TableWithJoins, visit: &mut dyn FnMut(&Expr)) {
    visit_table_factor_exprs(&table.relation, visit);
    for join in &table.joins {
        visit_table_factor_exprs(&join.relation, visit);
        if let JoinConstraint::On(expr) = &join.constraint {
            visit_expr(expr, visit);
        }
    }
}

fn visit_table_factor_exprs(factor: &TableFactor, visit: &mut dyn FnMut(&Expr)) {
    match factor {
        TableFactor::Table { .. } => {}
        TableFactor::Derived { subquery, .. } => visit_query_exprs(subquery, visit),
        TableFactor::Function { args, .. } => args.iter().for_each(|arg| visit_expr(arg, visit)),
        TableFactor::NestedJoin(inner) => visit_table_with_joins_exprs(inner, visit),
    }
}

// ── Column usage ──────────────────────────────────────────────────────────

/// Column names a select can observe from the relations in its FROM clause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ColumnUsage {
    names: BTreeSet<String>,
    pub wildcard: bool,
}

impl ColumnUsage {
    pub(crate) fn all() -> Self {
        Self {
            names: BTreeSet::new(),
            wildcard: true,
        }
    }

    pub(crate) fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            names: names.into_iter().map(str::to_ascii_lowercase).collect(),
            wildcard: false,
        }
    }

    /// Whether `column` is selected implicitly (wildcard) or by name.
    pub(crate) fn includes(&self, column: &str) -> bool {
        self.wildcard || self.names.contains(column)
    }

    /// Whether `column` is referenced by name. Hidden columns require this.
    pub(crate) fn references(&self, column: &str) -> bool {
        self.names.contains(column)
    }

    pub(crate) fn insert(&mut self, column: &str) {
        self.names.insert(column.to_ascii_lowercase());
    }

    fn collect_expr(&mut self, expr: &Expr) {
        visit_expr(expr, &mut |node| match node {
            Expr::Identifier(ident) => {
                self.names.insert(ident.normalized());
            }
            Expr::CompoundIdentifier(parts) => {
                if let Some(last) = parts.last() {
                    self.names.insert(last.normalized());
                }
            }
            _ => {}
        });
    }
}

pub(crate) fn select_column_usage(select: &Select, order_by: &[OrderByExpr]) -> ColumnUsage {
    let mut usage = ColumnUsage::default();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard | SelectItem::QualifiedWildcard(_) => usage.wildcard = true,
            SelectItem::Expr { expr, .. } => usage.collect_expr(expr),
        }
    }
    for table in &select.from {
        collect_table_usage(table, &mut usage);
    }
    if let Some(selection) = &select.selection {
        usage.collect_expr(selection);
    }
    for expr in &select.group_by {
        usage.collect_expr(expr);
    }
    if let Some(having) = &select.having {
        usage.collect_expr(having);
    }
    for order in order_by {
        usage.collect_expr(&order.expr);
    }
    usage
}

fn collect_table_usage(table: &TableWithJoins, usage: &mut ColumnUsage) {
    collect_factor_usage(&table.relation, usage);
    for join in &table.joins {
        collect_factor_usage(&join.relation, usage);
        match &join.constraint {
            JoinConstraint::On(expr) => usage.collect_expr(expr),
            JoinConstraint::Using(columns) => {
                for column in columns {
                    usage.insert(&column.value);
                }
            }
            JoinConstraint::Natural => usage.wildcard = true,
            JoinConstraint::None => {}
        }
    }
}

fn collect_factor_usage(factor: &TableFactor, usage: &mut ColumnUsage) {
    match factor {
        TableFactor::Table { .. } | TableFactor::Derived { .. } => {}
        TableFactor::Function { args, .. } => args.iter().for_each(|arg| usage.collect_expr(arg)),
        TableFactor::NestedJoin(inner) => collect_table_usage(inner, usage),
    }
}

// ── Predicates ────────────────────────────────────────────────────────────

/// Top-level AND conjuncts, looking through parentheses.
pub(crate) fn split_conjuncts(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    push_conjuncts(expr, &mut out);
    out
}

fn push_conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            push_conjuncts(left, out);
            push_conjuncts(right, out);
        }
        Expr::Nested(inner) => push_conjuncts(inner, out),
        other => out.push(other),
    }
}

/// Resolves `expr` to a column name when it is a column reference visible
/// under `qualifier`. Unqualified references count only when `allow_bare`.
pub(crate) fn column_reference<'a>(
    expr: &'a Expr,
    qualifier: &str,
    allow_bare: bool,
) -> Option<&'a Ident> {
    match expr {
        Expr::Identifier(ident) if allow_bare => Some(ident),
        Expr::CompoundIdentifier(parts) if parts.len() == 2 && parts[0].matches(qualifier) => {
            parts.get(1)
        }
        Expr::Nested(inner) => column_reference(inner, qualifier, allow_bare),
        _ => None,
    }
}

// ── Relation rewriting ────────────────────────────────────────────────────

/// What a rewriter sees of the select that contains a relation reference.
pub(crate) struct RelationScope<'a> {
    pub usage: &'a ColumnUsage,
    pub selection: Option<&'a Expr>,
    /// The relation is the only one in the FROM clause.
    pub single_relation: bool,
}

pub(crate) trait RelationRewriter {
    /// Returns the replacement for a table reference, or `None` to keep it.
    fn rewrite_relation(
        &mut self,
        name: &ObjectName,
        alias: Option<&TableAlias>,
        scope: &RelationScope<'_>,
    ) -> Result<Option<TableFactor>, StrataError>;
}

pub(crate) fn rewrite_statement_relations(
    statement: &mut Statement,
    rewriter: &mut dyn RelationRewriter,
) -> Result<(), StrataError> {
    let mut shadowed = Vec::new();
    match statement {
        Statement::Query(query) => walk_query(query, &mut shadowed, rewriter),
        Statement::Insert(insert) => {
            if let InsertSource::Query(query) = &mut insert.source {
                walk_query(query, &mut shadowed, rewriter)?;
            }
            Ok(())
        }
        Statement::Update(update) => {
            for assignment in &mut update.assignments {
                walk_expr_queries(&mut assignment.value, &mut shadowed, rewriter)?;
            }
            if let Some(selection) = &mut update.selection {
                walk_expr_queries(selection, &mut shadowed, rewriter)?;
            }
            Ok(())
        }
        Statement::Delete(delete) => {
            if let Some(selection) = &mut delete.selection {
                walk_expr_queries(selection, &mut shadowed, rewriter)?;
            }
            Ok(())
        }
        Statement::Passthrough(_) => Ok(()),
    }
}

pub(crate) fn rewrite_query_relations(
    query: &mut Query,
    rewriter: &mut dyn RelationRewriter,
) -> Result<(), StrataError> {
    let mut shadowed = Vec::new();
    walk_query(query, &mut shadowed, rewriter)
}

fn walk_query(
    query: &mut Query,
    shadowed: &mut Vec<String>,
    rewriter: &mut dyn RelationRewriter,
) -> Result<(), StrataError> {
    let depth = shadowed.len();
    if let Some(with) = &mut query.with {
        let recursive = with.recursive;
        for cte in &mut with.ctes {
            let name = cte.name.normalized();
            if recursive {
                shadowed.push(name);
                walk_query(&mut cte.query, shadowed, rewriter)?;
            } else {
                walk_query(&mut cte.query, shadowed, rewriter)?;
                shadowed.push(name);
            }
        }
    }
    let order_by = std::mem::take(&mut query.order_by);
    let result = walk_set_expr(&mut query.body, &order_by, shadowed, rewriter);
    query.order_by = order_by;
    result?;
    for order in &mut query.order_by {
        walk_expr_queries(&mut order.expr, shadowed, rewriter)?;
    }
    shadowed.truncate(depth);
    Ok(())
}

fn walk_set_expr(
    body: &mut SetExpr,
    order_by: &[OrderByExpr],
    shadowed: &mut Vec<String>,
    rewriter: &mut dyn RelationRewriter,
) -> Result<(), StrataError> {
    match body {
        SetExpr::Select(select) => walk_select(select, order_by, shadowed, rewriter),
        SetExpr::Query(query) => walk_query(query, shadowed, rewriter),
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, order_by, shadowed, rewriter)?;
            walk_set_expr(right, order_by, shadowed, rewriter)
        }
        SetExpr::Values(values) => {
            for expr in values.rows.iter_mut().flatten() {
                walk_expr_queries(expr, shadowed, rewriter)?;
            }
            Ok(())
        }
    }
}

fn walk_select(
    select: &mut Select,
    order_by: &[OrderByExpr],
    shadowed: &mut Vec<String>,
    rewriter: &mut dyn RelationRewriter,
) -> Result<(), StrataError> {
    let usage = select_column_usage(select, order_by);

    for item in &mut select.projection {
        if let SelectItem::Expr { expr, .. } = item {
            walk_expr_queries(expr, shadowed, rewriter)?;
        }
    }
    if let Some(selection) = &mut select.selection {
        walk_expr_queries(selection, shadowed, rewriter)?;
    }
    for expr in &mut select.group_by {
        walk_expr_queries(expr, shadowed, rewriter)?;
    }
    if let Some(having) = &mut select.having {
        walk_expr_queries(having, shadowed, rewriter)?;
    }

    let mut from = std::mem::take(&mut select.from);
    let single_relation = from.len() == 1 && from[0].joins.is_empty();
    let scope = RelationScope {
        usage: &usage,
        selection: select.selection.as_ref(),
        single_relation,
    };
    let result = from
        .iter_mut()
        .try_for_each(|table| walk_table_with_joins(table, &scope, shadowed, rewriter));
    select.from = from;
    result
}

fn walk_table_with_joins(
    table: &mut TableWithJoins,
    scope: &RelationScope<'_>,
    shadowed: &mut Vec<String>,
    rewriter: &mut dyn RelationRewriter,
) -> Result<(), StrataError> {
    walk_table_factor(&mut table.relation, scope, shadowed, rewriter)?;
    for join in &mut table.joins {
        walk_table_factor(&mut join.relation, scope, shadowed, rewriter)?;
        if let JoinConstraint::On(expr) = &mut join.constraint {
            walk_expr_queries(expr, shadowed, rewriter)?;
        }
    }
    Ok(())
}

fn walk_table_factor(
    factor: &mut TableFactor,
    scope: &RelationScope<'_>,
    shadowed: &mut Vec<String>,
    rewriter: &mut dyn RelationRewriter,
) -> Result<(), StrataError> {
    match factor {
        TableFactor::Table { name, alias } => {
            if is_main_schema(name) && !shadowed.contains(&name.base_name()) {
                if let Some(replacement) = rewriter.rewrite_relation(name, alias.as_ref(), scope)? {
                    *factor = replacement;
                }
            }
            Ok(())
        }
        TableFactor::Derived { subquery, .. } => walk_query(subquery, shadowed, rewriter),
        TableFactor::Function { args, .. } => {
            for arg in args {
                walk_expr_queries(arg, shadowed, rewriter)?;
            }
            Ok(())
        }
        TableFactor::NestedJoin(inner) => walk_table_with_joins(inner, scope, shadowed, rewriter),
    }
}

fn walk_expr_queries(
    expr: &mut Expr,
    shadowed: &mut Vec<String>,
    rewriter: &mut dyn RelationRewriter,
) -> Result<(), StrataError> {
    visit_expr_subqueries_mut(expr, &mut |query| walk_query(query, shadowed, rewriter))
}

fn is_main_schema(name: &ObjectName) -> bool {
    match name.0.as_slice() {
        [_] => true,
        [schema, _] => schema.matches("main"),
        _ => false,
    }
}

/// Every table name referenced anywhere in the statement, including write
/// targets.
pub(crate) fn referenced_table_names(statement: &Statement) -> Vec<String> {
    struct Collector(Vec<String>);

    impl RelationRewriter for Collector {
        fn rewrite_relation(
            &mut self,
            name: &ObjectName,
            _alias: Option<&TableAlias>,
            _scope: &RelationScope<'_>,
        ) -> Result<Option<TableFactor>, StrataError> {
            self.0.push(name.base_name());
            Ok(None)
        }
    }

    let mut collector = Collector(Vec::new());
    let mut statement = statement.clone();
    match &statement {
        Statement::Insert(insert) => collector.0.push(insert.table.base_name()),
        Statement::Update(update) => collector.0.push(update.table.base_name()),
        Statement::Delete(delete) => collector.0.push(delete.table.base_name()),
        Statement::Query(_) | Statement::Passthrough(_) => {}
    }
    // The collector never fails and never replaces anything.
    let _ = rewrite_statement_relations(&mut statement, &mut collector);
    collector.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::build::table;
    use crate::sql::parser::{parse_query, parse_statement};

    struct Renamer;

    impl RelationRewriter for Renamer {
        fn rewrite_relation(
            &mut self,
            name: &ObjectName,
            alias: Option<&TableAlias>,
            _scope: &RelationScope<'_>,
        ) -> Result<Option<TableFactor>, StrataError> {
            if name.base_name() != "state" {
                return Ok(None);
            }
            let alias = alias.map(|alias| alias.name.value.clone());
            Ok(Some(table("resolved", Some(alias.as_deref().unwrap_or("state")))))
        }
    }

    fn rewrite(sql: &str) -> String {
        let mut query = parse_query(sql).expect("parse");
        rewrite_query_relations(&mut query, &mut Renamer).expect("rewrite");
        query.to_string()
    }

    #[test]
    fn rewrites_references_in_nested_positions() {
        assert_eq!(
            rewrite("SELECT a FROM state WHERE b IN (SELECT c FROM state AS s) UNION SELECT 1 FROM (SELECT * FROM state) AS d"),
            "SELECT a FROM resolved AS state WHERE b IN (SELECT c FROM resolved AS s) UNION SELECT 1 FROM (SELECT * FROM resolved AS state) AS d"
        );
    }

    #[test]
    fn user_ctes_shadow_relation_names() {
        assert_eq!(
            rewrite("WITH state AS (SELECT 1 AS a) SELECT a FROM state"),
            "WITH state AS (SELECT 1 AS a) SELECT a FROM state"
        );
        assert_eq!(
            rewrite("WITH x AS (SELECT a FROM state) SELECT a FROM x"),
            "WITH x AS (SELECT a FROM resolved AS state) SELECT a FROM x"
        );
    }

    #[test]
    fn column_usage_collects_identifiers_and_wildcards() {
        let query = parse_query(
            "SELECT s.entity_id FROM state AS s WHERE schema_key = 'k' ORDER BY file_id",
        )
        .expect("parse");
        let SetExpr::Select(select) = &query.body else {
            panic!("expected select");
        };
        let usage = select_column_usage(select, &query.order_by);
        assert!(usage.includes("entity_id"));
        assert!(usage.includes("schema_key"));
        assert!(usage.includes("file_id"));
        assert!(!usage.includes("snapshot_content"));

        let query = parse_query("SELECT * FROM state").expect("parse");
        let SetExpr::Select(select) = &query.body else {
            panic!("expected select");
        };
        let usage = select_column_usage(select, &[]);
        assert!(usage.includes("metadata"));
        assert!(!usage.references("_pk"));
    }

    #[test]
    fn conjunct_splitting_looks_through_parentheses() {
        let query = parse_query("SELECT 1 FROM t WHERE (a = 1 AND b = 2) AND c = 3 OR d = 4")
            .expect("parse");
        let SetExpr::Select(select) = &query.body else {
            panic!("expected select");
        };
        let selection = select.selection.as_ref().expect("where");
        assert_eq!(split_conjuncts(selection).len(), 1);

        let query = parse_query("SELECT 1 FROM t WHERE (a = 1 AND b = 2) AND c = 3").expect("parse");
        let SetExpr::Select(select) = &query.body else {
            panic!("expected select");
        };
        assert_eq!(
            split_conjuncts(select.selection.as_ref().expect("where")).len(),
            3
        );
    }

    #[test]
    fn referenced_table_names_include_write_targets() {
        let statement =
            parse_statement("INSERT INTO t (a) SELECT a FROM strata_internal_change").expect("parse");
        assert_eq!(
            referenced_table_names(&statement),
            vec!["t".to_string(), "strata_internal_change".to_string()]
        );
    }
}
