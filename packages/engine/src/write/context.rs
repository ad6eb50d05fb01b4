//! Per-call execution state: the engine services plus the mutable view of
//! versions, schemas and pending writes a statement sequence works against.

use serde_json::Value as JsonValue;

use crate::backend::StrataBackend;
use crate::builtin_schema::VERSION_SCHEMA_KEY;
use crate::cel::CelEvaluator;
use crate::config::{CacheRouting, EngineConfig};
use crate::engine::Engine;
use crate::entity_views::values::{json_column, optional_text_column, text_column, value_is_truthy};
use crate::functions::EngineFunctions;
use crate::plugin::PluginRegistry;
use crate::preprocess::{preprocess_statement, PreprocessContext};
use crate::schema::SchemaRegistry;
use crate::sql::ast::Statement;
use crate::sql::{bind_statement, parse_statement, quote_string, PlaceholderState};
use crate::state::{ClosureEdge, VersionGraph, STATE_BY_VERSION_RELATION};
use crate::validation::SchemaCache;
use crate::{QueryResult, StrataError, Value};

pub(crate) const GLOBAL_VERSION_ID: &str = "global";

/// What a statement sequence may change and must see consistently.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionState {
    pub registry: SchemaRegistry,
    pub versions: VersionGraph,
    pub active_version_id: String,
    /// The transaction tier may hold rows.
    pub pending: bool,
}

/// One resolved row of `state_by_version`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StateRow {
    pub entity_id: String,
    pub schema_key: String,
    pub file_id: String,
    pub version_id: String,
    pub plugin_key: String,
    pub snapshot: JsonValue,
    pub schema_version: String,
    pub created_at: String,
    pub untracked: bool,
    pub inherited_from_version_id: Option<String>,
    pub metadata: Option<JsonValue>,
}

const STATE_ROW_COLUMNS: &str = "entity_id, schema_key, file_id, version_id, plugin_key, \
     snapshot_content, schema_version, created_at, untracked, inherited_from_version_id, metadata";

impl StateRow {
    fn from_values(values: &[Value]) -> Result<Self, StrataError> {
        let column = |index: usize| values.get(index).unwrap_or(&Value::Null);
        Ok(Self {
            entity_id: text_column(column(0), "entity_id")?,
            schema_key: text_column(column(1), "schema_key")?,
            file_id: text_column(column(2), "file_id")?,
            version_id: text_column(column(3), "version_id")?,
            plugin_key: text_column(column(4), "plugin_key")?,
            snapshot: json_column(column(5), "snapshot_content")?.unwrap_or(JsonValue::Null),
            schema_version: text_column(column(6), "schema_version")?,
            created_at: text_column(column(7), "created_at")?,
            untracked: value_is_truthy(column(8)),
            inherited_from_version_id: optional_text_column(column(9), "inherited_from_version_id")?,
            metadata: json_column(column(10), "metadata")?,
        })
    }

    /// The row lives in its own version rather than an ancestor.
    pub fn is_local(&self) -> bool {
        self.inherited_from_version_id.is_none()
    }
}

pub(crate) struct ExecutionSession<'a> {
    engine: &'a Engine,
    pub state: SessionState,
    pub writer_key: Option<String>,
}

impl<'a> ExecutionSession<'a> {
    pub(crate) fn new(engine: &'a Engine, state: SessionState, writer_key: Option<String>) -> Self {
        Self {
            engine,
            state,
            writer_key,
        }
    }

    pub(crate) fn engine(&self) -> &'a Engine {
        self.engine
    }

    pub(crate) fn backend(&self) -> &'a dyn StrataBackend {
        self.engine.backend()
    }

    pub(crate) fn config(&self) -> &'a EngineConfig {
        self.engine.config()
    }

    pub(crate) fn cel(&self) -> &'a CelEvaluator {
        self.engine.cel()
    }

    pub(crate) fn functions(&self) -> &'a EngineFunctions {
        self.engine.functions()
    }

    pub(crate) fn schema_cache(&self) -> &'a SchemaCache {
        self.engine.schema_cache()
    }

    pub(crate) fn plugins(&self) -> &'a PluginRegistry {
        self.engine.plugins()
    }

    pub(crate) fn new_id(&self) -> String {
        self.functions().call_uuid_v7()
    }

    pub(crate) fn now(&self) -> String {
        self.functions().call_timestamp()
    }

    pub(crate) fn closure(&self) -> Result<Vec<ClosureEdge>, StrataError> {
        self.state
            .versions
            .closure(self.config().max_inheritance_depth)
    }

    /// Rewrites logical relations in `statement` for the current state.
    pub(crate) fn rewrite(
        &self,
        statement: &mut Statement,
        routing: CacheRouting,
        closure: &[ClosureEdge],
    ) -> Result<(), StrataError> {
        let context = PreprocessContext {
            registry: &self.state.registry,
            closure,
            active_version_id: &self.state.active_version_id,
            include_transaction: self.state.pending,
            cache_routing: routing,
            max_history_depth: self.config().max_history_depth as usize,
            cel: self.cel(),
        };
        preprocess_statement(statement, &context)
    }

    /// Binds, rewrites and executes a read.
    pub(crate) async fn run_query(
        &self,
        statement: Statement,
        params: &[Value],
        routing: CacheRouting,
    ) -> Result<QueryResult, StrataError> {
        let closure = self.closure()?;
        self.run_query_with_closure(statement, params, routing, &closure)
            .await
    }

    async fn run_query_with_closure(
        &self,
        statement: Statement,
        params: &[Value],
        routing: CacheRouting,
        closure: &[ClosureEdge],
    ) -> Result<QueryResult, StrataError> {
        let mut bound = bind_statement(statement, params, &mut PlaceholderState::new())?;
        self.rewrite(&mut bound.statement, routing, closure)?;
        let sql = bound.statement.to_string();
        tracing::debug!(target: "strata::write", sql = %sql, "internal query");
        self.backend().execute(&sql, &bound.params).await
    }

    /// Runs engine-authored SQL with strict cache routing.
    pub(crate) async fn query_sql(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult, StrataError> {
        let statement = parse_statement(sql)?;
        self.run_query(statement, params, CacheRouting::Strict).await
    }

    pub(crate) async fn load_entity(
        &self,
        schema_key: &str,
        entity_id: &str,
        file_id: Option<&str>,
        version_id: &str,
    ) -> Result<Option<StateRow>, StrataError> {
        let mut sql = format!(
            "SELECT {STATE_ROW_COLUMNS} FROM {STATE_BY_VERSION_RELATION} \
             WHERE schema_key = {} AND version_id = {} AND entity_id = ?1",
            quote_string(schema_key),
            quote_string(version_id),
        );
        let mut params = vec![Value::Text(entity_id.to_string())];
        if let Some(file_id) = file_id {
            sql.push_str(" AND file_id = ?2");
            params.push(Value::Text(file_id.to_string()));
        }
        let result = self.query_sql(&sql, &params).await?;
        result
            .rows
            .first()
            .map(|row| StateRow::from_values(row))
            .transpose()
    }

    /// Every live entity of `schema_key` visible in `version_id`.
    pub(crate) async fn load_entities(
        &self,
        schema_key: &str,
        version_id: &str,
    ) -> Result<Vec<StateRow>, StrataError> {
        let sql = format!(
            "SELECT {STATE_ROW_COLUMNS} FROM {STATE_BY_VERSION_RELATION} \
             WHERE schema_key = {} AND version_id = {} ORDER BY entity_id",
            quote_string(schema_key),
            quote_string(version_id),
        );
        self.query_sql(&sql, &[])
            .await?
            .rows
            .iter()
            .map(|row| StateRow::from_values(row))
            .collect()
    }

    /// Every live entity stored under `file_id`, across all schemas.
    pub(crate) async fn load_file_entities(
        &self,
        file_id: &str,
        version_id: &str,
    ) -> Result<Vec<StateRow>, StrataError> {
        let keys: Vec<String> = self
            .state
            .registry
            .keys()
            .map(quote_string)
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {STATE_ROW_COLUMNS} FROM {STATE_BY_VERSION_RELATION} \
             WHERE schema_key IN ({}) AND version_id = {} AND file_id = ?1 \
             ORDER BY schema_key, entity_id",
            keys.join(", "),
            quote_string(version_id),
        );
        self.query_sql(&sql, &[Value::Text(file_id.to_string())])
            .await?
            .rows
            .iter()
            .map(|row| StateRow::from_values(row))
            .collect()
    }

    /// Reloads the version graph from the `version` entities in `global`.
    pub(crate) async fn refresh_versions(&mut self) -> Result<(), StrataError> {
        let sql = format!(
            "SELECT entity_id, snapshot_content FROM {STATE_BY_VERSION_RELATION} \
             WHERE schema_key = {} AND version_id = {}",
            quote_string(VERSION_SCHEMA_KEY),
            quote_string(GLOBAL_VERSION_ID),
        );
        // `global` has no ancestors, so the read needs no closure.
        let result = self
            .run_query_with_closure(parse_statement(&sql)?, &[], CacheRouting::Strict, &[])
            .await?;
        let mut descriptors = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let id = text_column(row.first().unwrap_or(&Value::Null), "entity_id")?;
            let snapshot =
                json_column(row.get(1).unwrap_or(&Value::Null), "snapshot_content")?;
            let parent = snapshot
                .as_ref()
                .and_then(|snapshot| snapshot.get("inherits_from_version_id"))
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            descriptors.push((id, parent));
        }
        self.state.versions = VersionGraph::from_descriptors(descriptors);
        Ok(())
    }
}
