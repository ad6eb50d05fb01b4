//! Writes against the generic `state` and `state_by_version` relations.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::entity_views::values::{json_column, text_column, value_is_truthy};
use crate::errors::{integrity_error, planning_error, schema_error, validation_error};
use crate::schema::SchemaDefinition;
use crate::sql::ast::{Delete, Ident, Insert, Update};
use crate::sql::build::col;
use crate::state::{STATE_BY_VERSION_RELATION, STATE_RELATION};
use crate::{StrataError, Value};

use super::{
    delete_entity, evaluate_conflict_update, insert_source_rows, select_target_rows,
    write_entity, ConflictPolicy, EntityDelete, EntityWrite, ExecutionSession, StateRow,
    WriteInterceptor,
};

const KEY_COLUMNS: [&str; 4] = ["entity_id", "schema_key", "file_id", "version_id"];
const WRITABLE_COLUMNS: &[&str] = &[
    "entity_id",
    "schema_key",
    "file_id",
    "version_id",
    "plugin_key",
    "snapshot_content",
    "schema_version",
    "metadata",
    "untracked",
];

pub(super) struct StateRelationInterceptor {
    by_version: bool,
}

impl StateRelationInterceptor {
    pub(super) fn new(by_version: bool) -> Self {
        Self { by_version }
    }

    fn write_from_values(
        &self,
        session: &ExecutionSession<'_>,
        values: &BTreeMap<String, Value>,
    ) -> Result<EntityWrite, StrataError> {
        if let Some(column) = values
            .keys()
            .find(|column| !WRITABLE_COLUMNS.contains(&column.as_str()))
        {
            return Err(validation_error(&format!(
                "column `{column}` of `{}` cannot be written",
                self.relation()
            )));
        }
        let required = |column: &str| -> Result<String, StrataError> {
            match values.get(column) {
                Some(value) if !value.is_null() => text_column(value, column),
                _ => Err(validation_error(&format!(
                    "INSERT into `{}` requires `{column}`",
                    self.relation()
                ))),
            }
        };

        let schema_key = required("schema_key")?;
        let version_id = match values.get("version_id") {
            Some(value) if !value.is_null() => text_column(value, "version_id")?,
            _ if self.by_version => required("version_id")?,
            _ => session.state.active_version_id.clone(),
        };
        let schema = resolve_schema(session, &schema_key, values.get("schema_version"))?;
        let snapshot = snapshot_value(values.get("snapshot_content").unwrap_or(&Value::Null))?
            .ok_or_else(|| {
                validation_error("snapshot_content must not be NULL; use DELETE to remove an entity")
            })?;

        Ok(EntityWrite {
            entity_id: required("entity_id")?,
            file_id: required("file_id")?,
            plugin_key: required("plugin_key")?,
            version_id,
            snapshot,
            metadata: json_column(values.get("metadata").unwrap_or(&Value::Null), "metadata")?,
            untracked: values.get("untracked").is_some_and(value_is_truthy),
            schema,
        })
    }

    /// Overlays assigned columns onto an existing row.
    fn apply_assignments(
        &self,
        session: &ExecutionSession<'_>,
        existing: &StateRow,
        assigned: &[(String, Value)],
    ) -> Result<Option<EntityWrite>, StrataError> {
        let mut write = EntityWrite {
            schema: resolve_schema(
                session,
                &existing.schema_key,
                Some(&Value::Text(existing.schema_version.clone())),
            )?,
            entity_id: existing.entity_id.clone(),
            file_id: existing.file_id.clone(),
            version_id: existing.version_id.clone(),
            plugin_key: existing.plugin_key.clone(),
            snapshot: existing.snapshot.clone(),
            metadata: existing.metadata.clone(),
            untracked: existing.untracked,
        };
        for (column, value) in assigned {
            match column.as_str() {
                "snapshot_content" => match snapshot_value(value)? {
                    Some(snapshot) => write.snapshot = snapshot,
                    None => return Ok(None),
                },
                "metadata" => write.metadata = json_column(value, "metadata")?,
                "untracked" => write.untracked = value_is_truthy(value),
                "plugin_key" => write.plugin_key = text_column(value, "plugin_key")?,
                "schema_version" => {
                    write.schema = resolve_schema(session, &existing.schema_key, Some(value))?
                }
                key if KEY_COLUMNS.contains(&key) => {
                    return Err(planning_error(&format!(
                        "`{key}` identifies the entity and cannot be updated; delete and insert instead"
                    )))
                }
                other => {
                    return Err(validation_error(&format!(
                        "column `{other}` of `{}` cannot be written",
                        self.relation()
                    )))
                }
            }
        }
        Ok(Some(write))
    }
}

#[async_trait(?Send)]
impl WriteInterceptor for StateRelationInterceptor {
    fn relation(&self) -> &str {
        if self.by_version {
            STATE_BY_VERSION_RELATION
        } else {
            STATE_RELATION
        }
    }

    async fn insert(
        &self,
        session: &mut ExecutionSession<'_>,
        insert: &Insert,
        params: &[Value],
    ) -> Result<usize, StrataError> {
        let rows = insert_source_rows(session, insert, params).await?;
        let columns: Vec<String> = insert.columns.iter().map(Ident::normalized).collect();
        let policy = ConflictPolicy::of(insert);
        let mut affected = 0;
        for row in rows {
            let values: BTreeMap<String, Value> = columns.iter().cloned().zip(row).collect();
            let write = self.write_from_values(session, &values)?;
            let previous = session
                .load_entity(
                    &write.schema.key,
                    &write.entity_id,
                    Some(&write.file_id),
                    &write.version_id,
                )
                .await?;
            let write = match (previous.as_ref().filter(|row| row.is_local()), &policy) {
                (None, _) | (Some(_), ConflictPolicy::Replace) => Some(write),
                (Some(_), ConflictPolicy::Ignore) => None,
                (Some(existing), ConflictPolicy::Abort) => {
                    return Err(integrity_error(&format!(
                        "entity `{}` of schema `{}` already exists in version `{}`",
                        existing.entity_id, existing.schema_key, existing.version_id
                    )))
                }
                (
                    Some(existing),
                    ConflictPolicy::Update {
                        assignments,
                        selection,
                    },
                ) => {
                    match evaluate_conflict_update(
                        session,
                        assignments,
                        *selection,
                        &values,
                        &state_row_values(existing),
                        params,
                    )
                    .await?
                    {
                        Some(assigned) => self.apply_assignments(session, existing, &assigned)?,
                        None => None,
                    }
                }
            };
            if let Some(write) = write {
                write_entity(session, write, previous).await?;
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
        let mut projection: Vec<_> = KEY_COLUMNS.iter().map(|column| col(column)).collect();
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
            let target = target_key(&row)?;
            let assigned: Vec<(String, Value)> = update
                .assignments
                .iter()
                .map(|assignment| assignment.column.normalized())
                .zip(row.into_iter().skip(KEY_COLUMNS.len()))
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
            match self.apply_assignments(session, &existing, &assigned)? {
                Some(write) => write_entity(session, write, Some(existing)).await?,
                None => {
                    delete_entity(session, target).await?;
                }
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
        let rows = select_target_rows(
            session,
            &delete.table,
            delete.alias.as_ref(),
            KEY_COLUMNS.iter().map(|column| col(column)).collect(),
            delete.selection.as_ref(),
            params,
        )
        .await?;
        let mut affected = 0;
        for row in rows {
            affected += delete_entity(session, target_key(&row)?).await?;
        }
        Ok(affected)
    }
}

fn resolve_schema(
    session: &ExecutionSession<'_>,
    schema_key: &str,
    schema_version: Option<&Value>,
) -> Result<Arc<SchemaDefinition>, StrataError> {
    let registry = &session.state.registry;
    let schema = match schema_version.filter(|value| !value.is_null()) {
        Some(version) => {
            let version = text_column(version, "schema_version")?;
            registry.get_version(schema_key, &version).ok_or_else(|| {
                schema_error(&format!(
                    "schema `{schema_key}` has no registered version {version}"
                ))
            })?
        }
        None => registry
            .get(schema_key)
            .ok_or_else(|| schema_error(&format!("schema `{schema_key}` is not registered")))?,
    };
    Ok(schema.clone())
}

fn snapshot_value(value: &Value) -> Result<Option<JsonValue>, StrataError> {
    match json_column(value, "snapshot_content")? {
        Some(snapshot) if !snapshot.is_object() => Err(validation_error(
            "snapshot_content must be a JSON object",
        )),
        snapshot => Ok(snapshot),
    }
}

fn target_key(row: &[Value]) -> Result<EntityDelete, StrataError> {
    let column = |index: usize| text_column(row.get(index).unwrap_or(&Value::Null), KEY_COLUMNS[index]);
    Ok(EntityDelete {
        entity_id: column(0)?,
        schema_key: column(1)?,
        file_id: column(2)?,
        version_id: column(3)?,
    })
}

/// Column values of an existing row, as `ON CONFLICT DO UPDATE` sees them.
fn state_row_values(row: &StateRow) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("entity_id".to_string(), Value::from(row.entity_id.as_str())),
        ("schema_key".to_string(), Value::from(row.schema_key.as_str())),
        ("file_id".to_string(), Value::from(row.file_id.as_str())),
        ("version_id".to_string(), Value::from(row.version_id.as_str())),
        ("plugin_key".to_string(), Value::from(row.plugin_key.as_str())),
        ("snapshot_content".to_string(), Value::Text(row.snapshot.to_string())),
        ("schema_version".to_string(), Value::from(row.schema_version.as_str())),
        (
            "metadata".to_string(),
            row.metadata
                .as_ref()
                .map(|metadata| Value::Text(metadata.to_string()))
                .unwrap_or(Value::Null),
        ),
        ("untracked".to_string(), Value::Integer(i64::from(row.untracked))),
        ("created_at".to_string(), Value::from(row.created_at.as_str())),
    ])
}
