//! Rewrite passes that replace logical relations with physical subqueries.

mod entity_view_read;
mod history_read;
mod vtable_read;

use crate::cel::CelEvaluator;
use crate::config::CacheRouting;
use crate::schema::SchemaRegistry;
use crate::sql::ast::Statement;
use crate::state::ClosureEdge;
use crate::StrataError;

pub(crate) use vtable_read::{extract_pushdown, resolved_state_query, StateScope, VersionScope};

/// Everything a pass needs to know about the engine at rewrite time.
pub(crate) struct PreprocessContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub closure: &'a [ClosureEdge],
    pub active_version_id: &'a str,
    /// Whether the transaction tiers may hold rows.
    pub include_transaction: bool,
    pub cache_routing: CacheRouting,
    pub max_history_depth: usize,
    pub cel: &'a CelEvaluator,
}

pub(crate) trait RewritePass {
    fn name(&self) -> &'static str;

    /// Rewrites `statement` in place; returns whether anything changed.
    fn apply(
        &self,
        statement: &mut Statement,
        context: &PreprocessContext<'_>,
    ) -> Result<bool, StrataError>;
}

/// Entity views expand into state relations, so they run first.
const PASSES: &[&dyn RewritePass] = &[
    &entity_view_read::EntityViewReadPass,
    &vtable_read::VtableReadPass,
    &history_read::HistoryReadPass,
];

pub(crate) fn preprocess_statement(
    statement: &mut Statement,
    context: &PreprocessContext<'_>,
) -> Result<(), StrataError> {
    for pass in PASSES {
        if pass.apply(statement, context)? {
            tracing::debug!(
                target: "strata::preprocess",
                pass = pass.name(),
                sql = %statement,
                "rewrote statement"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::PreprocessContext;
    use crate::builtin_schema::builtin_schemas;
    use crate::cel::CelEvaluator;
    use crate::config::CacheRouting;
    use crate::schema::{SchemaDefinition, SchemaRegistry};
    use crate::state::ClosureEdge;
    use serde_json::json;

    pub(crate) fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        for schema in builtin_schemas().expect("builtin schemas") {
            registry.register(schema.clone()).expect("register builtin");
            registry.mark_cache_table(&schema.key);
        }
        registry
            .register(
                SchemaDefinition::parse(json!({
                    "x-strata-key": "task",
                    "x-strata-version": "1",
                    "x-strata-primary-key": ["/category", "/id"],
                    "type": "object",
                    "properties": {
                        "category": { "type": "string" },
                        "id": { "type": "string" },
                        "title": { "type": "string" },
                        "done": { "type": "boolean" }
                    },
                    "required": ["category", "id"],
                    "additionalProperties": false
                }))
                .expect("task schema"),
            )
            .expect("register task");
        registry.mark_cache_table("task");
        registry
    }

    pub(crate) fn context<'a>(
        registry: &'a SchemaRegistry,
        closure: &'a [ClosureEdge],
        cel: &'a CelEvaluator,
    ) -> PreprocessContext<'a> {
        PreprocessContext {
            registry,
            closure,
            active_version_id: "main",
            include_transaction: false,
            cache_routing: CacheRouting::Fallback,
            max_history_depth: 1000,
            cel,
        }
    }

    pub(crate) fn main_closure() -> Vec<ClosureEdge> {
        vec![ClosureEdge {
            version_id: "main".to_string(),
            ancestor_version_id: "global".to_string(),
            depth: 1,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{context, main_closure, registry};
    use super::preprocess_statement;
    use crate::cel::CelEvaluator;
    use crate::sql::parse_statement;

    fn preprocess(sql: &str) -> String {
        let registry = registry();
        let closure = main_closure();
        let cel = CelEvaluator::new();
        let context = context(&registry, &closure, &cel);
        let mut statement = parse_statement(sql).expect("parse");
        preprocess_statement(&mut statement, &context).expect("preprocess");
        statement.to_string()
    }

    #[test]
    fn no_logical_relation_survives() {
        let sql = preprocess(
            "SELECT t.title, s.entity_id FROM task AS t JOIN state AS s ON s.entity_id = t.strata_entity_id \
             UNION ALL SELECT entity_id, schema_key FROM state_history WHERE schema_key = 'task'",
        );
        for relation in [" task AS", "FROM state AS", "FROM state_by_version", "FROM state_history"] {
            assert!(!sql.contains(relation), "{relation} survived: {sql}");
        }
        assert!(sql.contains("strata_internal_state_cache_v1_task"));
        assert!(sql.contains("strata_commit_lineage"));
    }

    #[test]
    fn preprocessing_is_idempotent() {
        let once = preprocess("SELECT entity_id FROM state WHERE schema_key = 'key_value'");
        let twice = preprocess(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn leaves_unrelated_statements_untouched() {
        let sql = "SELECT a FROM other WHERE b IN (SELECT c FROM more)";
        assert_eq!(preprocess(sql), sql);
    }
}
