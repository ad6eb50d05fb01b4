//! Projection of a schema's entity view over the resolved-state or history
//! query: one `json_extract` column per property plus operational columns.

use std::collections::BTreeSet;

use crate::schema::{EntityViewVariant, SchemaDefinition};
use crate::sql::ast::*;
use crate::sql::build::*;
use crate::sql::visit::ColumnUsage;
use crate::state::{
    build_history_query, HistoryColumn, HistoryPredicate, HistoryRequest, PushdownPredicate,
    SchemaKeyFilter, StateColumn,
};
use crate::StrataError;

use crate::preprocess::{
    extract_pushdown, resolved_state_query, PreprocessContext, StateScope, VersionScope,
};

use super::values::pinned_version_id;

const SOURCE_ALIAS: &str = "s";

/// Operational column of the active and `_all` views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OperationalColumn<C> {
    pub name: &'static str,
    pub source: C,
    /// Only produced when referenced by name.
    pub hidden: bool,
}

const fn op<C>(name: &'static str, source: C) -> OperationalColumn<C> {
    OperationalColumn {
        name,
        source,
        hidden: false,
    }
}

pub(crate) const STATE_OPERATIONAL_COLUMNS: [OperationalColumn<StateColumn>; 15] = [
    op("strata_entity_id", StateColumn::EntityId),
    op("strata_schema_key", StateColumn::SchemaKey),
    op("strata_file_id", StateColumn::FileId),
    op("strata_plugin_key", StateColumn::PluginKey),
    op("strata_schema_version", StateColumn::SchemaVersion),
    op("strata_version_id", StateColumn::VersionId),
    op("strata_inherited_from_version_id", StateColumn::InheritedFromVersionId),
    op("strata_change_id", StateColumn::ChangeId),
    op("strata_commit_id", StateColumn::CommitId),
    op("strata_created_at", StateColumn::CreatedAt),
    op("strata_updated_at", StateColumn::UpdatedAt),
    op("strata_untracked", StateColumn::Untracked),
    op("strata_metadata", StateColumn::Metadata),
    op("strata_writer_key", StateColumn::WriterKey),
    OperationalColumn {
        name: "strata_snapshot_content",
        source: StateColumn::SnapshotContent,
        hidden: true,
    },
];

pub(crate) const HISTORY_OPERATIONAL_COLUMNS: [OperationalColumn<HistoryColumn>; 13] = [
    op("strata_entity_id", HistoryColumn::EntityId),
    op("strata_schema_key", HistoryColumn::SchemaKey),
    op("strata_file_id", HistoryColumn::FileId),
    op("strata_plugin_key", HistoryColumn::PluginKey),
    op("strata_schema_version", HistoryColumn::SchemaVersion),
    op("strata_version_id", HistoryColumn::VersionId),
    op("strata_change_id", HistoryColumn::ChangeId),
    op("strata_commit_id", HistoryColumn::CommitId),
    op("strata_created_at", HistoryColumn::CreatedAt),
    op("strata_metadata", HistoryColumn::Metadata),
    op("strata_root_commit_id", HistoryColumn::RootCommitId),
    op("strata_depth", HistoryColumn::Depth),
    OperationalColumn {
        name: "strata_snapshot_content",
        source: HistoryColumn::SnapshotContent,
        hidden: true,
    },
];

/// Where the view reference sits in the enclosing select.
pub(crate) struct ViewReference<'a> {
    pub usage: &'a ColumnUsage,
    pub selection: Option<&'a Expr>,
    /// The name the enclosing select uses for the view.
    pub qualifier: &'a str,
    pub allow_bare: bool,
}

/// Whether an operational column of `variant` shows up in a `*` projection.
fn in_wildcard<C>(column: &OperationalColumn<C>, variant: EntityViewVariant) -> bool {
    !column.hidden && !(variant == EntityViewVariant::Active && column.name == "strata_version_id")
}

fn selected<C>(
    column: &OperationalColumn<C>,
    variant: EntityViewVariant,
    usage: &ColumnUsage,
) -> bool {
    usage.references(column.name) || (usage.wildcard && in_wildcard(column, variant))
}

/// Builds the subquery that replaces a reference to an entity view.
pub(crate) fn build_entity_view_query(
    schema: &SchemaDefinition,
    variant: EntityViewVariant,
    reference: &ViewReference<'_>,
    context: &PreprocessContext<'_>,
) -> Result<Query, StrataError> {
    let properties: Vec<&str> = schema
        .properties
        .iter()
        .map(|property| property.name.as_str())
        .filter(|name| reference.usage.includes(&name.to_ascii_lowercase()))
        .collect();

    let mut projection: Vec<SelectItem> = properties
        .iter()
        .map(|name| item(property_extract(name), name))
        .collect();

    let source = match variant {
        EntityViewVariant::Active | EntityViewVariant::All => {
            let operational: Vec<_> = STATE_OPERATIONAL_COLUMNS
                .iter()
                .filter(|column| selected(column, variant, reference.usage))
                .collect();
            let mut columns = BTreeSet::new();
            if !properties.is_empty() {
                columns.insert(StateColumn::SnapshotContent);
            }
            for column in &operational {
                columns.insert(column.source);
                projection.push(item(qcol(SOURCE_ALIAS, column.source.name()), column.name));
            }
            // Keeps `SELECT count(*)` and friends row-preserving.
            columns.insert(StateColumn::EntityId);

            let query = resolved_state_query(
                StateScope {
                    relation: &schema.key,
                    version: version_scope(schema, variant, context)?,
                    columns: columns.into_iter().collect(),
                    pushdown: state_pushdown(schema, variant, reference),
                    schema_filter: SchemaKeyFilter::Literal(BTreeSet::from([schema.key.clone()])),
                    routing: context.cache_routing,
                },
                context,
            )?;
            derived(query, SOURCE_ALIAS)
        }
        EntityViewVariant::History => {
            let operational: Vec<_> = HISTORY_OPERATIONAL_COLUMNS
                .iter()
                .filter(|column| selected(column, variant, reference.usage))
                .collect();
            let mut columns = vec![HistoryColumn::EntityId];
            if !properties.is_empty() {
                columns.push(HistoryColumn::SnapshotContent);
            }
            for column in &operational {
                if !columns.contains(&column.source) {
                    columns.push(column.source);
                }
                projection.push(item(qcol(SOURCE_ALIAS, column.source.name()), column.name));
            }
            let query = build_history_query(&HistoryRequest {
                columns: &columns,
                pushdown: &history_pushdown(schema, reference),
                max_depth: context.max_history_depth,
            });
            derived(query, SOURCE_ALIAS)
        }
    };

    if projection.is_empty() {
        projection.push(item(qcol(SOURCE_ALIAS, "entity_id"), "strata_entity_id"));
    }

    Ok(select_query(Select {
        projection,
        from: vec![from(source)],
        ..Select::default()
    }))
}

/// `json_extract(s.snapshot_content, '$.name')`.
fn property_extract(name: &str) -> Expr {
    let path = if name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        format!("$.{name}")
    } else {
        format!("$.\"{}\"", name.replace('"', "\\\""))
    };
    func(
        "json_extract",
        vec![qcol(SOURCE_ALIAS, "snapshot_content"), lit_str(&path)],
    )
}

fn version_scope(
    schema: &SchemaDefinition,
    variant: EntityViewVariant,
    context: &PreprocessContext<'_>,
) -> Result<VersionScope, StrataError> {
    if let Some(version_id) = pinned_version_id(schema, context.cel)? {
        return Ok(VersionScope::Pinned(version_id));
    }
    Ok(match variant {
        EntityViewVariant::All => VersionScope::All,
        _ => VersionScope::Active,
    })
}

fn state_pushdown(
    schema: &SchemaDefinition,
    variant: EntityViewVariant,
    reference: &ViewReference<'_>,
) -> Vec<PushdownPredicate> {
    let mut pushdown = vec![PushdownPredicate {
        column: StateColumn::SchemaKey,
        values: vec![lit_str(&schema.key)],
    }];
    let resolve = |name: &str| {
        STATE_OPERATIONAL_COLUMNS
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.source)
            .filter(|column| match column {
                StateColumn::EntityId | StateColumn::FileId | StateColumn::PluginKey => true,
                StateColumn::VersionId => variant == EntityViewVariant::All,
                _ => false,
            })
    };
    pushdown.extend(
        extract_pushdown(
            reference.selection,
            reference.qualifier,
            reference.allow_bare,
            resolve,
        )
        .into_iter()
        .map(|(column, values)| PushdownPredicate { column, values }),
    );
    if let Some(values) = single_key_values(schema, reference) {
        pushdown.push(PushdownPredicate {
            column: StateColumn::EntityId,
            values,
        });
    }
    pushdown
}

fn history_pushdown(schema: &SchemaDefinition, reference: &ViewReference<'_>) -> Vec<HistoryPredicate> {
    let mut pushdown = vec![HistoryPredicate {
        column: HistoryColumn::SchemaKey,
        values: vec![lit_str(&schema.key)],
    }];
    let resolve = |name: &str| {
        HISTORY_OPERATIONAL_COLUMNS
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.source)
            .filter(|column| {
                matches!(
                    column,
                    HistoryColumn::EntityId
                        | HistoryColumn::FileId
                        | HistoryColumn::RootCommitId
                        | HistoryColumn::VersionId
                )
            })
    };
    pushdown.extend(
        extract_pushdown(
            reference.selection,
            reference.qualifier,
            reference.allow_bare,
            resolve,
        )
        .into_iter()
        .map(|(column, values)| HistoryPredicate { column, values }),
    );
    if let Some(values) = single_key_values(schema, reference) {
        pushdown.push(HistoryPredicate {
            column: HistoryColumn::EntityId,
            values,
        });
    }
    pushdown
}

/// With a one-property primary key the entity id equals the property's
/// text, so string comparisons on it narrow the entity id too.
fn single_key_values(schema: &SchemaDefinition, reference: &ViewReference<'_>) -> Option<Vec<Expr>> {
    let [key] = schema.primary_key.as_slice() else {
        return None;
    };
    extract_pushdown(
        reference.selection,
        reference.qualifier,
        reference.allow_bare,
        |name| (name == key.to_ascii_lowercase()).then_some(()),
    )
    .into_iter()
    .map(|(_, values)| values)
    .find(|values| {
        values
            .iter()
            .all(|value| matches!(value, Expr::Literal(Literal::String(_))))
    })
}
