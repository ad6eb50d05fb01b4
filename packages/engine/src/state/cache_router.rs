//! Decides which per-schema cache tables a resolved-state read must union.

use std::collections::BTreeSet;

use crate::config::CacheRouting;
use crate::errors::ambiguous_schema_key_filter_error;
use crate::sql::ast::{BinaryOp, Expr, Literal};
use crate::sql::visit::{column_reference, visit_expr_shallow};
use crate::StrataError;

const SCHEMA_KEY_COLUMN: &str = "schema_key";

/// What a WHERE clause statically says about `schema_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaKeyFilter {
    /// The predicate never mentions `schema_key`.
    Unconstrained,
    /// Rows can only match one of these keys.
    Literal(BTreeSet<String>),
    /// `schema_key` is compared against something that is not a literal.
    NonLiteral,
}

impl SchemaKeyFilter {
    fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::NonLiteral, _) | (_, Self::NonLiteral) => Self::NonLiteral,
            (Self::Literal(left), Self::Literal(right)) => {
                Self::Literal(left.intersection(&right).cloned().collect())
            }
            (Self::Literal(keys), Self::Unconstrained) | (Self::Unconstrained, Self::Literal(keys)) => {
                Self::Literal(keys)
            }
            (Self::Unconstrained, Self::Unconstrained) => Self::Unconstrained,
        }
    }

    fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::NonLiteral, _) | (_, Self::NonLiteral) => Self::NonLiteral,
            (Self::Literal(mut left), Self::Literal(right)) => {
                left.extend(right);
                Self::Literal(left)
            }
            _ => Self::Unconstrained,
        }
    }
}

/// Extracts the schema-key filter of `selection` for the relation visible
/// as `qualifier`. Unqualified columns count only when `allow_bare`.
pub fn schema_key_filter(selection: Option<&Expr>, qualifier: &str, allow_bare: bool) -> SchemaKeyFilter {
    match selection {
        Some(expr) => extract(expr, qualifier, allow_bare),
        None => SchemaKeyFilter::Unconstrained,
    }
}

fn extract(expr: &Expr, qualifier: &str, allow_bare: bool) -> SchemaKeyFilter {
    let is_schema_key = |expr: &Expr| {
        column_reference(expr, qualifier, allow_bare)
            .is_some_and(|ident| ident.matches(SCHEMA_KEY_COLUMN))
    };

    match expr {
        Expr::Nested(inner) => extract(inner, qualifier, allow_bare),
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => extract(left, qualifier, allow_bare).and(extract(right, qualifier, allow_bare)),
        Expr::Binary {
            left,
            op: BinaryOp::Or,
            right,
        } => extract(left, qualifier, allow_bare).or(extract(right, qualifier, allow_bare)),
        Expr::Binary {
            left,
            op: BinaryOp::Eq,
            right,
        } if is_schema_key(left) || is_schema_key(right) => {
            let other = if is_schema_key(left) { right } else { left };
            match string_literal(other) {
                Some(value) => SchemaKeyFilter::Literal(BTreeSet::from([value])),
                None => SchemaKeyFilter::NonLiteral,
            }
        }
        Expr::InList {
            expr,
            list,
            negated: false,
        } if is_schema_key(expr) => list
            .iter()
            .map(string_literal)
            .collect::<Option<BTreeSet<_>>>()
            .map(SchemaKeyFilter::Literal)
            .unwrap_or(SchemaKeyFilter::NonLiteral),
        other => {
            let mut mentioned = false;
            visit_expr_shallow(other, &mut |node| {
                if is_schema_key(node) {
                    mentioned = true;
                }
            });
            if mentioned {
                SchemaKeyFilter::NonLiteral
            } else {
                SchemaKeyFilter::Unconstrained
            }
        }
    }
}

fn string_literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Literal(Literal::String(value)) => Some(value.clone()),
        Expr::Nested(inner) => string_literal(inner),
        _ => None,
    }
}

/// Schema keys whose cache tables the read must union, in key order.
///
/// Keys without a cache table are skipped. Strict routing refuses to guess
/// when the filter is not a set of literals.
pub fn route_cache_tables(
    filter: &SchemaKeyFilter,
    cache_tables: &BTreeSet<String>,
    routing: CacheRouting,
    relation: &str,
) -> Result<Vec<String>, StrataError> {
    match filter {
        SchemaKeyFilter::Literal(keys) => Ok(keys
            .iter()
            .filter(|key| cache_tables.contains(*key))
            .cloned()
            .collect()),
        SchemaKeyFilter::Unconstrained | SchemaKeyFilter::NonLiteral => match routing {
            CacheRouting::Strict => Err(ambiguous_schema_key_filter_error(relation)),
            CacheRouting::Fallback => Ok(cache_tables.iter().cloned().collect()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{route_cache_tables, schema_key_filter, SchemaKeyFilter};
    use crate::config::CacheRouting;
    use crate::sql::parse_expr;
    use std::collections::BTreeSet;

    fn filter(sql: &str) -> SchemaKeyFilter {
        let expr = parse_expr(sql).expect("parse");
        schema_key_filter(Some(&expr), "s", true)
    }

    fn keys(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn extracts_literal_equalities_and_lists() {
        assert_eq!(filter("schema_key = 'x'"), SchemaKeyFilter::Literal(keys(&["x"])));
        assert_eq!(filter("'x' = s.schema_key"), SchemaKeyFilter::Literal(keys(&["x"])));
        assert_eq!(
            filter("schema_key IN ('x', 'z') AND entity_id = 'e'"),
            SchemaKeyFilter::Literal(keys(&["x", "z"]))
        );
        assert_eq!(
            filter("(schema_key = 'x' OR schema_key = 'y')"),
            SchemaKeyFilter::Literal(keys(&["x", "y"]))
        );
        assert_eq!(
            filter("schema_key IN ('x', 'y') AND schema_key = 'y'"),
            SchemaKeyFilter::Literal(keys(&["y"]))
        );
    }

    #[test]
    fn any_non_literal_comparator_invalidates_narrowing() {
        assert_eq!(filter("schema_key = ?1"), SchemaKeyFilter::NonLiteral);
        assert_eq!(
            filter("schema_key = 'x' OR schema_key = ?1"),
            SchemaKeyFilter::NonLiteral
        );
        assert_eq!(filter("schema_key LIKE 'x%'"), SchemaKeyFilter::NonLiteral);
        assert_eq!(filter("schema_key NOT IN ('x')"), SchemaKeyFilter::NonLiteral);
        assert_eq!(
            filter("schema_key = 'x' OR entity_id = 'e'"),
            SchemaKeyFilter::Unconstrained
        );
        assert_eq!(filter("entity_id = 'e'"), SchemaKeyFilter::Unconstrained);
    }

    #[test]
    fn ignores_columns_of_other_relations_and_subqueries() {
        let expr = parse_expr("o.schema_key = ?1 AND s.schema_key = 'x'").expect("parse");
        assert_eq!(
            schema_key_filter(Some(&expr), "s", false),
            SchemaKeyFilter::Literal(keys(&["x"]))
        );
        assert_eq!(
            filter("entity_id IN (SELECT entity_id FROM t WHERE schema_key = ?1)"),
            SchemaKeyFilter::Unconstrained
        );
    }

    #[test]
    fn routes_only_existing_tables() {
        let tables = keys(&["x", "y"]);
        let routed = route_cache_tables(
            &SchemaKeyFilter::Literal(keys(&["x", "z"])),
            &tables,
            CacheRouting::Strict,
            "state",
        )
        .expect("route");
        assert_eq!(routed, vec!["x".to_string()]);

        let err = route_cache_tables(&SchemaKeyFilter::NonLiteral, &tables, CacheRouting::Strict, "state")
            .expect_err("strict routing");
        assert!(err.description.contains("ambiguous"));

        let all = route_cache_tables(&SchemaKeyFilter::NonLiteral, &tables, CacheRouting::Fallback, "state")
            .expect("fallback");
        assert_eq!(all.len(), 2);
    }
}
