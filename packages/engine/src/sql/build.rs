//! Constructors for generated SQL trees.

use super::ast::*;

pub fn ident(name: &str) -> Ident {
    Ident::new(name)
}

pub fn col(name: &str) -> Expr {
    Expr::Identifier(Ident::new(name))
}

pub fn qcol(table: &str, name: &str) -> Expr {
    Expr::CompoundIdentifier(vec![Ident::new(table), Ident::new(name)])
}

pub fn lit_str(value: &str) -> Expr {
    Expr::Literal(Literal::String(value.to_string()))
}

pub fn lit_int(value: i64) -> Expr {
    Expr::Literal(Literal::Number(value.to_string()))
}

pub fn null() -> Expr {
    Expr::Literal(Literal::Null)
}

pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::Eq, right)
}

pub fn and(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::And, right)
}

pub fn or(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::Or, right)
}

pub fn not(expr: Expr) -> Expr {
    Expr::Unary {
        op: UnaryOp::Not,
        expr: Box::new(expr),
    }
}

pub fn and_all(predicates: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    predicates.into_iter().reduce(and)
}

pub fn in_list(expr: Expr, list: Vec<Expr>) -> Expr {
    Expr::InList {
        expr: Box::new(expr),
        list,
        negated: false,
    }
}

pub fn in_strings<'a>(expr: Expr, values: impl IntoIterator<Item = &'a str>) -> Expr {
    in_list(expr, values.into_iter().map(lit_str).collect())
}

pub fn is_null(expr: Expr) -> Expr {
    Expr::IsNull {
        expr: Box::new(expr),
        negated: false,
    }
}

pub fn is_not_null(expr: Expr) -> Expr {
    Expr::IsNull {
        expr: Box::new(expr),
        negated: true,
    }
}

pub fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function(Function {
        name: Ident::new(name),
        args: FunctionArgs::List {
            distinct: false,
            args,
        },
        over: None,
    })
}

pub fn case_when(condition: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::Case {
        operand: None,
        branches: vec![(condition, then)],
        else_result: Some(Box::new(otherwise)),
    }
}

pub fn exists(subquery: Query, negated: bool) -> Expr {
    Expr::Exists {
        subquery: Box::new(subquery),
        negated,
    }
}

pub fn item(expr: Expr, alias: &str) -> SelectItem {
    SelectItem::Expr {
        expr,
        alias: Some(Ident::new(alias)),
    }
}

pub fn bare_item(expr: Expr) -> SelectItem {
    SelectItem::Expr { expr, alias: None }
}

pub fn table(name: &str, alias: Option<&str>) -> TableFactor {
    TableFactor::Table {
        name: ObjectName::simple(name),
        alias: alias.map(TableAlias::new),
    }
}

pub fn derived(subquery: Query, alias: &str) -> TableFactor {
    TableFactor::Derived {
        subquery: Box::new(subquery),
        alias: Some(TableAlias::new(alias)),
    }
}

pub fn from(relation: TableFactor) -> TableWithJoins {
    TableWithJoins {
        relation,
        joins: Vec::new(),
    }
}

pub fn left_join(relation: TableFactor, on: Expr) -> Join {
    Join {
        operator: JoinOperator::Left,
        relation,
        constraint: JoinConstraint::On(on),
    }
}

pub fn inner_join(relation: TableFactor, on: Expr) -> Join {
    Join {
        operator: JoinOperator::Inner,
        relation,
        constraint: JoinConstraint::On(on),
    }
}

pub fn select_query(select: Select) -> Query {
    Query::from_body(SetExpr::Select(Box::new(select)))
}

pub fn union_all(parts: Vec<SetExpr>) -> Option<SetExpr> {
    parts.into_iter().reduce(|left, right| SetExpr::SetOperation {
        op: SetOperator::Union,
        all: true,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn order_asc(expr: Expr) -> OrderByExpr {
    OrderByExpr {
        expr,
        asc: Some(true),
        nulls_first: None,
    }
}

pub fn order_desc(expr: Expr) -> OrderByExpr {
    OrderByExpr {
        expr,
        asc: Some(false),
        nulls_first: None,
    }
}
