//! Rewrites references to schema-backed entity views.

use crate::entity_views::{build_entity_view_query, ViewReference};
use crate::sql::ast::{ObjectName, Statement, TableAlias, TableFactor};
use crate::sql::visit::{rewrite_statement_relations, RelationRewriter, RelationScope};
use crate::StrataError;

use super::vtable_read::{relation_qualifier, replacement};
use super::{PreprocessContext, RewritePass};

pub(crate) struct EntityViewReadPass;

impl RewritePass for EntityViewReadPass {
    fn name(&self) -> &'static str {
        "entity_view_read"
    }

    fn apply(
        &self,
        statement: &mut Statement,
        context: &PreprocessContext<'_>,
    ) -> Result<bool, StrataError> {
        let mut rewriter = EntityViewRewriter {
            context,
            changed: false,
        };
        rewrite_statement_relations(statement, &mut rewriter)?;
        Ok(rewriter.changed)
    }
}

struct EntityViewRewriter<'a, 'c> {
    context: &'a PreprocessContext<'c>,
    changed: bool,
}

impl RelationRewriter for EntityViewRewriter<'_, '_> {
    fn rewrite_relation(
        &mut self,
        name: &ObjectName,
        alias: Option<&TableAlias>,
        scope: &RelationScope<'_>,
    ) -> Result<Option<TableFactor>, StrataError> {
        let Some((schema, variant)) = self.context.registry.resolve_view(&name.base_name()) else {
            return Ok(None);
        };
        let qualifier = relation_qualifier(name, alias);
        let query = build_entity_view_query(
            &schema,
            variant,
            &ViewReference {
                usage: scope.usage,
                selection: scope.selection,
                qualifier: &qualifier,
                allow_bare: scope.single_relation,
            },
            self.context,
        )?;
        self.changed = true;
        Ok(Some(replacement(query, name, alias)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, main_closure, registry};
    use super::EntityViewReadPass;
    use crate::cel::CelEvaluator;
    use crate::preprocess::RewritePass;
    use crate::sql::parse_statement;

    fn rewrite(sql: &str) -> (bool, String) {
        let registry = registry();
        let closure = main_closure();
        let cel = CelEvaluator::new();
        let context = context(&registry, &closure, &cel);
        let mut statement = parse_statement(sql).expect("parse");
        let changed = EntityViewReadPass.apply(&mut statement, &context).expect("rewrite");
        (changed, statement.to_string())
    }

    #[test]
    fn replaces_views_and_keeps_the_outer_query() {
        let (changed, sql) = rewrite(
            "SELECT t.title FROM task AS t WHERE t.strata_file_id = 'f1' ORDER BY t.title",
        );
        assert!(changed);
        assert!(sql.contains(") AS t WHERE t.strata_file_id = 'f1' ORDER BY t.title"));
        assert!(sql.contains("c.file_id = 'f1'"));
        assert!(sql.contains("c.schema_key = 'task'"));
    }

    #[test]
    fn unknown_relations_and_ctes_are_left_alone() {
        let (changed, sql) = rewrite("WITH task AS (SELECT 1 AS title) SELECT title FROM task");
        assert!(!changed);
        assert_eq!(sql, "WITH task AS (SELECT 1 AS title) SELECT title FROM task");

        let (changed, _) = rewrite("SELECT * FROM tasks");
        assert!(!changed);
    }
}
