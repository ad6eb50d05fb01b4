//! Row-level writes through entity views: columns become snapshot
//! properties, defaults and overrides are applied, and the result is handed
//! to the generic entity write path.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::builtin_schema::FILE_SCHEMA_KEY;
use crate::errors::{
    integrity_error, planning_error, read_only_view_write_error, validation_error,
};
use crate::filesystem::write_file_data;
use crate::schema::{EntityViewVariant, PropertyDefinition, SchemaDefinition};
use crate::sql::ast::{Delete, Ident, Insert, Update};
use crate::sql::build::col;
use crate::write::{
    delete_entity, evaluate_conflict_update, insert_source_rows, select_target_rows,
    write_entity, ConflictPolicy, EntityDelete, EntityWrite, ExecutionSession, StateRow,
    WriteInterceptor,
};
use crate::{StrataError, Value};

use super::values::{
    apply_defaults, derive_entity_id, evaluate_override, json_column, json_is_truthy,
    json_to_sql, optional_text_column, override_text, pinned_version_id, sql_to_json,
    text_column, value_is_truthy,
};

const DEFAULT_FILE_ID: &str = "strata";
const DEFAULT_PLUGIN_KEY: &str = "strata";
const TARGET_COLUMNS: [&str; 3] = ["strata_entity_id", "strata_file_id", "strata_version_id"];

/// A writable column of an entity view.
#[derive(Debug, Clone, Copy)]
enum ViewColumn<'a> {
    Property(&'a PropertyDefinition),
    EntityId,
    FileId,
    PluginKey,
    VersionId,
    Untracked,
    Metadata,
    SnapshotContent,
    /// File content on the `file` views.
    Data,
}

/// Values a row provides, before defaults and overrides.
#[derive(Debug, Default)]
struct RowInput {
    snapshot: JsonMap<String, JsonValue>,
    entity_id: Option<String>,
    file_id: Option<String>,
    plugin_key: Option<String>,
    version_id: Option<String>,
    untracked: Option<bool>,
    metadata: Option<JsonValue>,
    data: Option<Vec<u8>>,
}

pub(crate) struct EntityViewInterceptor {
    schema: Arc<SchemaDefinition>,
    variant: EntityViewVariant,
    relation: String,
}

impl EntityViewInterceptor {
    pub(crate) fn new(
        schema: Arc<SchemaDefinition>,
        variant: EntityViewVariant,
        relation: String,
    ) -> Self {
        Self {
            schema,
            variant,
            relation,
        }
    }

    fn classify(&self, column: &str) -> Result<ViewColumn<'_>, StrataError> {
        let view_column = match column {
            "strata_entity_id" => ViewColumn::EntityId,
            "strata_file_id" => ViewColumn::FileId,
            "strata_plugin_key" => ViewColumn::PluginKey,
            "strata_version_id" => ViewColumn::VersionId,
            "strata_untracked" => ViewColumn::Untracked,
            "strata_metadata" => ViewColumn::Metadata,
            "strata_snapshot_content" => ViewColumn::SnapshotContent,
            "data" if self.schema.key == FILE_SCHEMA_KEY => ViewColumn::Data,
            other => match self.schema.property(other) {
                Some(property) => ViewColumn::Property(property),
                None => {
                    return Err(validation_error(&format!(
                        "`{}` has no writable column `{other}`",
                        self.relation
                    )))
                }
            },
        };
        Ok(view_column)
    }

    fn ensure_writable(&self, operation: &str) -> Result<(), StrataError> {
        if self.variant == EntityViewVariant::History {
            Err(read_only_view_write_error(&self.relation, operation))
        } else {
            Ok(())
        }
    }

    fn read_row(&self, columns: &[String], row: Vec<Value>) -> Result<RowInput, StrataError> {
        let mut input = RowInput::default();
        let mut properties = Vec::new();
        for (column, value) in columns.iter().zip(row) {
            match self.classify(column)? {
                ViewColumn::Property(property) => {
                    properties.push((property.name.clone(), sql_to_json(&value, property)?))
                }
                ViewColumn::SnapshotContent => {
                    if let Some(JsonValue::Object(snapshot)) =
                        json_column(&value, "strata_snapshot_content")?
                    {
                        input.snapshot.extend(snapshot);
                    }
                }
                ViewColumn::EntityId => input.entity_id = optional_text_column(&value, column)?,
                ViewColumn::FileId => input.file_id = optional_text_column(&value, column)?,
                ViewColumn::PluginKey => input.plugin_key = optional_text_column(&value, column)?,
                ViewColumn::VersionId => input.version_id = optional_text_column(&value, column)?,
                ViewColumn::Untracked => {
                    input.untracked = (!value.is_null()).then(|| value_is_truthy(&value))
                }
                ViewColumn::Metadata => input.metadata = json_column(&value, column)?,
                ViewColumn::Data => input.data = data_bytes(value),
            }
        }
        input.snapshot.extend(properties);
        Ok(input)
    }

    /// Applies defaults and column overrides and derives the entity id.
    fn resolve_write(
        &self,
        session: &ExecutionSession<'_>,
        mut input: RowInput,
    ) -> Result<(EntityWrite, Option<Vec<u8>>), StrataError> {
        let schema = &self.schema;
        apply_defaults(schema, &mut input.snapshot, session.cel(), session.functions())?;
        let snapshot = JsonValue::Object(input.snapshot);
        let entity_id = derive_entity_id(schema, &snapshot)?;
        if let Some(provided) = &input.entity_id {
            if provided != &entity_id {
                return Err(validation_error(&format!(
                    "strata_entity_id `{provided}` does not match the primary key of `{}` (`{entity_id}`)",
                    self.relation
                )));
            }
        }
        let context = match &snapshot {
            JsonValue::Object(map) => map.clone(),
            _ => JsonMap::new(),
        };
        let text_override = |column: &str, expression: &Option<String>, provided: Option<String>, default: &str| {
            match expression {
                Some(expression) => override_text(
                    schema,
                    column,
                    expression,
                    &context,
                    session.cel(),
                    session.functions(),
                ),
                None => Ok(provided.unwrap_or_else(|| default.to_string())),
            }
        };
        let file_id = text_override(
            "strata_file_id",
            &schema.overrides.file_id,
            input.file_id,
            DEFAULT_FILE_ID,
        )?;
        let plugin_key = text_override(
            "strata_plugin_key",
            &schema.overrides.plugin_key,
            input.plugin_key,
            DEFAULT_PLUGIN_KEY,
        )?;
        let version_id = match pinned_version_id(schema, session.cel())? {
            Some(pinned) => pinned,
            None => input
                .version_id
                .unwrap_or_else(|| session.state.active_version_id.clone()),
        };
        let untracked = match &schema.overrides.untracked {
            Some(expression) => json_is_truthy(&evaluate_override(
                expression,
                &context,
                session.cel(),
                session.functions(),
            )?),
            None => input.untracked.unwrap_or(false),
        };

        Ok((
            EntityWrite {
                schema: schema.clone(),
                entity_id,
                file_id,
                version_id,
                plugin_key,
                snapshot,
                metadata: input.metadata,
                untracked,
            },
            input.data,
        ))
    }

    /// Overlays assigned columns onto a stored entity.
    fn overlay(
        &self,
        session: &ExecutionSession<'_>,
        existing: &StateRow,
        assigned: &[(String, Value)],
    ) -> Result<(EntityWrite, Option<Vec<u8>>), StrataError> {
        let mut input = RowInput {
            snapshot: match &existing.snapshot {
                JsonValue::Object(map) => map.clone(),
                _ => JsonMap::new(),
            },
            file_id: Some(existing.file_id.clone()),
            plugin_key: Some(existing.plugin_key.clone()),
            version_id: Some(existing.version_id.clone()),
            untracked: Some(existing.untracked),
            metadata: existing.metadata.clone(),
            ..RowInput::default()
        };
        for (column, value) in assigned {
            match self.classify(column)? {
                ViewColumn::Property(property) => {
                    input
                        .snapshot
                        .insert(property.name.clone(), sql_to_json(value, property)?);
                }
                ViewColumn::SnapshotContent => {
                    if let Some(JsonValue::Object(snapshot)) =
                        json_column(value, "strata_snapshot_content")?
                    {
                        input.snapshot = snapshot;
                    }
                }
                ViewColumn::PluginKey => input.plugin_key = optional_text_column(value, column)?,
                ViewColumn::Untracked => input.untracked = Some(value_is_truthy(value)),
                ViewColumn::Metadata => input.metadata = json_column(value, column)?,
                ViewColumn::Data => input.data = data_bytes(value.clone()),
                ViewColumn::EntityId | ViewColumn::FileId | ViewColumn::VersionId => {
                    return Err(planning_error(&format!(
                        "`{column}` of `{}` cannot be updated; change the primary key properties instead",
                        self.relation
                    )))
                }
            }
        }
        self.resolve_write(session, input)
    }

    /// Column values as `ON CONFLICT DO UPDATE` sees them.
    fn row_values(&self, write: &EntityWrite) -> BTreeMap<String, Value> {
        let mut values: BTreeMap<String, Value> = self
            .schema
            .properties
            .iter()
            .map(|property| {
                let value = write
                    .snapshot
                    .get(&property.name)
                    .map(json_to_sql)
                    .unwrap_or(Value::Null);
                (property.name.to_ascii_lowercase(), value)
            })
            .collect();
        values.extend([
            ("strata_entity_id".to_string(), Value::from(write.entity_id.as_str())),
            ("strata_file_id".to_string(), Value::from(write.file_id.as_str())),
            ("strata_version_id".to_string(), Value::from(write.version_id.as_str())),
            ("strata_plugin_key".to_string(), Value::from(write.plugin_key.as_str())),
            ("strata_untracked".to_string(), Value::Integer(i64::from(write.untracked))),
            (
                "strata_metadata".to_string(),
                write
                    .metadata
                    .as_ref()
                    .map(|metadata| Value::Text(metadata.to_string()))
                    .unwrap_or(Value::Null),
            ),
            ("strata_snapshot_content".to_string(), Value::Text(write.snapshot.to_string())),
        ]);
        values
    }

    fn existing_values(&self, row: &StateRow) -> BTreeMap<String, Value> {
        self.row_values(&EntityWrite {
            schema: self.schema.clone(),
            entity_id: row.entity_id.clone(),
            file_id: row.file_id.clone(),
            version_id: row.version_id.clone(),
            plugin_key: row.plugin_key.clone(),
            snapshot: row.snapshot.clone(),
            metadata: row.metadata.clone(),
            untracked: row.untracked,
        })
    }

    async fn store(
        &self,
        session: &mut ExecutionSession<'_>,
        write: EntityWrite,
        previous: Option<StateRow>,
        data: Option<Vec<u8>>,
    ) -> Result<(), StrataError> {
        let content = match data {
            Some(data) => Some((self.data_file_id(&write)?, write.version_id.clone(), data)),
            None => None,
        };
        write_entity(session, write, previous).await?;
        if let Some((file_id, version_id, data)) = content {
            write_file_data(session, &file_id, &version_id, &data).await?;
        }
        Ok(())
    }

    /// The file a `data` value belongs to. A `file` entity's id is its file id.
    fn data_file_id(&self, write: &EntityWrite) -> Result<String, StrataError> {
        if self.schema.key != FILE_SCHEMA_KEY {
            return Err(planning_error(&format!(
                "`{}` has no data column; only file rows carry content",
                self.relation
            )));
        }
        Ok(write.entity_id.clone())
    }
}

#[async_trait(?Send)]
impl WriteInterceptor for EntityViewInterceptor {
    fn relation(&self) -> &str {
        &self.relation
    }

    async fn insert(
        &self,
        session: &mut ExecutionSession<'_>,
        insert: &Insert,
        params: &[Value],
    ) -> Result<usize, StrataError> {
        self.ensure_writable("INSERT")?;
        let rows = insert_source_rows(session, insert, params).await?;
        let columns: Vec<String> = insert.columns.iter().map(Ident::normalized).collect();
        let policy = ConflictPolicy::of(insert);
        let mut affected = 0;
        for row in rows {
            let (write, data) = self.resolve_write(session, self.read_row(&columns, row)?)?;
            let previous = session
                .load_entity(
                    &self.schema.key,
                    &write.entity_id,
                    Some(&write.file_id),
                    &write.version_id,
                )
                .await?;
            let resolved = match (previous.as_ref().filter(|row| row.is_local()), &policy) {
                (None, _) | (Some(_), ConflictPolicy::Replace) => Some((write, data)),
                (Some(_), ConflictPolicy::Ignore) => None,
                (Some(existing), ConflictPolicy::Abort) => {
                    return Err(integrity_error(&format!(
                        "`{}` already has an entity with primary key `{}` in version `{}`",
                        self.relation, existing.entity_id, existing.version_id
                    )))
                }
                (
                    Some(existing),
                    ConflictPolicy::Update {
                        assignments,
                        selection,
                    },
                ) => {
                    let assigned = evaluate_conflict_update(
                        session,
                        assignments,
                        *selection,
                        &self.row_values(&write),
                        &self.existing_values(existing),
                        params,
                    )
                    .await?;
                    match assigned {
                        Some(assigned) => {
                            let (write, _) = self.overlay(session, existing, &assigned)?;
                            Some((write, data))
                        }
                        None => None,
                    }
                }
            };
            if let Some((write, data)) = resolved {
                self.store(session, write, previous, data).await?;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn update(
        &self,
        session: &mut ExecutionSession<'_>,
        update: &Update,
        params: &[Value],
    ) -> Result<usize, StrataError> {
        self.ensure_writable("UPDATE")?;
        for assignment in &update.assignments {
            self.classify(&assignment.column.normalized())?;
        }
        let mut projection: Vec<_> = TARGET_COLUMNS.iter().map(|column| col(column)).collect();
        projection.extend(update.assignments.iter().map(|assignment| assignment.value.clone()));
        let rows = select_target_rows(
            session,
            &update.table,
            update.alias.as_ref(),
            projection,
            update.selection.as_ref(),
            params,
        )
        .await?;

        let mut affected = 0;
        for row in rows {
            let target = self.target_key(&row)?;
            let assigned: Vec<(String, Value)> = update
                .assignments
                .iter()
                .map(|assignment| assignment.column.normalized())
                .zip(row.into_iter().skip(TARGET_COLUMNS.len()))
                .collect();
            let Some(existing) = session
                .load_entity(
                    &target.schema_key,
                    &target.entity_id,
                    Some(&target.file_id),
                    &target.version_id,
                )
                .await?
            else {
                continue;
            };
            let (write, data) = self.overlay(session, &existing, &assigned)?;
            if write.entity_id == existing.entity_id {
                self.store(session, write, Some(existing), data).await?;
            } else {
                let occupant = session
                    .load_entity(
                        &self.schema.key,
                        &write.entity_id,
                        Some(&write.file_id),
                        &write.version_id,
                    )
                    .await?;
                if occupant.as_ref().is_some_and(StateRow::is_local) {
                    return Err(integrity_error(&format!(
                        "cannot move `{}` to primary key `{}`: the key is already taken",
                        existing.entity_id, write.entity_id
                    )));
                }
                delete_entity(session, target).await?;
                self.store(session, write, occupant, data).await?;
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete(
        &self,
        session: &mut ExecutionSession<'_>,
        delete: &Delete,
        params: &[Value],
    ) -> Result<usize, StrataError> {
        self.ensure_writable("DELETE")?;
        let rows = select_target_rows(
            session,
            &delete.table,
            delete.alias.as_ref(),
            TARGET_COLUMNS.iter().map(|column| col(column)).collect(),
            delete.selection.as_ref(),
            params,
        )
        .await?;
        let mut affected = 0;
        for row in rows {
            affected += delete_entity(session, self.target_key(&row)?).await?;
        }
        Ok(affected)
    }
}

impl EntityViewInterceptor {
    fn target_key(&self, row: &[Value]) -> Result<EntityDelete, StrataError> {
        let column = |index: usize| {
            text_column(row.get(index).unwrap_or(&Value::Null), TARGET_COLUMNS[index])
        };
        Ok(EntityDelete {
            schema_key: self.schema.key.clone(),
            entity_id: column(0)?,
            file_id: column(1)?,
            version_id: column(2)?,
        })
    }
}

fn data_bytes(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::Null => None,
        Value::Blob(bytes) => Some(bytes),
        Value::Text(text) => Some(text.into_bytes()),
        Value::Integer(number) => Some(number.to_string().into_bytes()),
        Value::Real(number) => Some(number.to_string().into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::test_support::registry;

    fn interceptor(relation: &str) -> EntityViewInterceptor {
        let registry = registry();
        let (schema, variant) = registry.resolve_view(relation).expect("view");
        EntityViewInterceptor::new(schema, variant, relation.to_string())
    }

    #[test]
    fn classifies_view_columns() {
        let task = interceptor("task");
        assert!(matches!(task.classify("title"), Ok(ViewColumn::Property(_))));
        assert!(matches!(task.classify("strata_untracked"), Ok(ViewColumn::Untracked)));
        assert!(task.classify("strata_created_at").is_err());
        assert!(task.classify("data").is_err());
        assert!(matches!(interceptor("file").classify("data"), Ok(ViewColumn::Data)));
    }

    #[test]
    fn reads_rows_into_snapshots() {
        let task = interceptor("task_all");
        let input = task
            .read_row(
                &["category".into(), "id".into(), "done".into(), "strata_version_id".into()],
                vec![
                    Value::Text("cat1".into()),
                    Value::Text("id1".into()),
                    Value::Integer(1),
                    Value::Text("main".into()),
                ],
            )
            .expect("row");
        assert_eq!(input.snapshot["done"], JsonValue::Bool(true));
        assert_eq!(input.version_id.as_deref(), Some("main"));
        assert!(input.untracked.is_none());
    }

    #[test]
    fn data_is_keyed_by_the_file_entity_id() {
        let write = |view: &EntityViewInterceptor| EntityWrite {
            schema: view.schema.clone(),
            entity_id: "f1".into(),
            file_id: DEFAULT_FILE_ID.into(),
            version_id: "main".into(),
            plugin_key: DEFAULT_PLUGIN_KEY.into(),
            snapshot: JsonValue::Null,
            metadata: None,
            untracked: false,
        };
        let file = interceptor("file");
        assert_eq!(file.data_file_id(&write(&file)).expect("file id"), "f1");
        let task = interceptor("task");
        let err = task.data_file_id(&write(&task)).expect_err("not a file view");
        assert!(err.is(crate::errors::ErrorCode::Planning));
    }

    #[test]
    fn history_views_reject_writes() {
        let history = interceptor("task_history");
        let err = history.ensure_writable("INSERT").expect_err("read only");
        assert!(err.is(crate::errors::ErrorCode::ReadOnlyViewWriteDenied));
    }
}
