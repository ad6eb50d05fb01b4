use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use futures_util::FutureExt;
use serde_json::Value as JsonValue;

use crate::backend::StrataBackend;
use crate::cel::CelEvaluator;
use crate::commit::{commit_pending, CommitReport};
use crate::config::EngineConfig;
use crate::error_classification::classify_backend_error;
use crate::errors::{internal_table_access_denied_error, transaction_error, unknown_error};
use crate::filesystem::read_file_data;
use crate::functions::{EngineFunctions, RuntimeFunctionProvider, SharedFunctionProvider};
use crate::materialization::{materialize, MaterializationReport, MaterializationScope};
use crate::plugin::{PluginRegistration, PluginRegistry};
use crate::sql::ast::Statement;
use crate::sql::visit::referenced_table_names;
use crate::sql::{bind_statement, parse_statements, tokenize, PlaceholderState, TokenKind};
use crate::state::tables::is_internal_table;
use crate::validation::SchemaCache;
use crate::write::{execute_write, ExecutionSession, SessionState};
use crate::{QueryResult, StrataError, Value};

const EXECUTE_SAVEPOINT: &str = "strata_execute";
const TRANSACTION_SAVEPOINT: &str = "strata_transaction";
const STATEMENT_SAVEPOINT: &str = "strata_statement";

const TRANSACTION_CONTROL_KEYWORDS: &[&str] =
    &["begin", "commit", "end", "rollback", "savepoint", "release"];

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Recorded on every entity the call writes.
    pub writer_key: Option<String>,
}

pub type EngineTransactionFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, StrataError>> + 'a>>;

/// A key-value entity written during `init`. `version_id: None` writes to
/// `global`.
#[derive(Debug, Clone)]
pub struct BootKeyValue {
    pub key: String,
    pub value: JsonValue,
    pub version_id: Option<String>,
}

pub struct BootArgs {
    pub backend: Box<dyn StrataBackend>,
    pub config: EngineConfig,
    pub plugins: Vec<PluginRegistration>,
    pub key_values: Vec<BootKeyValue>,
}

impl BootArgs {
    pub fn new(backend: Box<dyn StrataBackend>) -> Self {
        Self {
            backend,
            config: EngineConfig::default(),
            plugins: Vec::new(),
            key_values: Vec::new(),
        }
    }
}

pub struct Engine {
    backend: Box<dyn StrataBackend>,
    config: EngineConfig,
    cel_evaluator: CelEvaluator,
    schema_cache: SchemaCache,
    functions: EngineFunctions,
    plugins: PluginRegistry,
    boot_key_values: Vec<BootKeyValue>,
    state: RwLock<SessionState>,
    transaction_open: AtomicBool,
}

#[must_use = "EngineTransaction must be committed or rolled back"]
pub struct EngineTransaction<'a> {
    engine: &'a Engine,
    state: Option<SessionState>,
    options: ExecuteOptions,
}

impl<'a> EngineTransaction<'a> {
    /// Runs `sql` inside the transaction. Tracked writes stay in the
    /// transaction tier until `commit`; a failing call leaves no trace.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, StrataError> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| transaction_error("transaction is no longer active"))?
            .clone();
        let mut session = ExecutionSession::new(self.engine, state, self.options.writer_key.clone());
        self.engine.savepoint(STATEMENT_SAVEPOINT).await?;
        match run_script(&mut session, sql, params).await {
            Ok(result) => {
                self.engine.release(STATEMENT_SAVEPOINT).await?;
                self.state = Some(session.state);
                Ok(result)
            }
            Err(error) => {
                self.engine.rollback_to(STATEMENT_SAVEPOINT).await;
                Err(error)
            }
        }
    }

    pub async fn commit(mut self) -> Result<CommitReport, StrataError> {
        let state = self
            .state
            .take()
            .ok_or_else(|| transaction_error("transaction is no longer active"))?;
        let engine = self.engine;
        let mut session = ExecutionSession::new(engine, state, self.options.writer_key.clone());
        let outcome = async {
            let report = commit_pending(&mut session).await?;
            engine.release(TRANSACTION_SAVEPOINT).await?;
            Ok::<_, StrataError>(report)
        }
        .await;
        engine.transaction_open.store(false, Ordering::SeqCst);
        match outcome {
            Ok(report) => {
                engine.store_state(session.state)?;
                Ok(report)
            }
            Err(error) => {
                engine.rollback_to(TRANSACTION_SAVEPOINT).await;
                Err(error)
            }
        }
    }

    pub async fn rollback(mut self) -> Result<(), StrataError> {
        self.state
            .take()
            .ok_or_else(|| transaction_error("transaction is no longer active"))?;
        self.engine.rollback_to(TRANSACTION_SAVEPOINT).await;
        self.engine.transaction_open.store(false, Ordering::SeqCst);
        tracing::debug!(target: "strata::engine", "rolled back transaction");
        Ok(())
    }
}

impl Drop for EngineTransaction<'_> {
    fn drop(&mut self) {
        if self.state.is_some() && !std::thread::panicking() {
            panic!("EngineTransaction dropped without commit() or rollback()");
        }
    }
}

/// Rolls back while another error or panic is already on its way out.
async fn rollback_logged(transaction: EngineTransaction<'_>) {
    if let Err(error) = transaction.rollback().await {
        tracing::warn!(
            target: "strata::engine",
            error = %error,
            "transaction rollback failed"
        );
    }
}

pub fn boot(args: BootArgs) -> Engine {
    let functions =
        SharedFunctionProvider::new(RuntimeFunctionProvider::new(args.config.deterministic));
    Engine {
        backend: args.backend,
        config: args.config,
        cel_evaluator: CelEvaluator::new(),
        schema_cache: SchemaCache::new(),
        functions,
        plugins: PluginRegistry::new(args.plugins),
        boot_key_values: args.key_values,
        state: RwLock::new(SessionState::default()),
        transaction_open: AtomicBool::new(false),
    }
}

impl Engine {
    pub(crate) fn backend(&self) -> &dyn StrataBackend {
        self.backend.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn cel(&self) -> &CelEvaluator {
        &self.cel_evaluator
    }

    pub(crate) fn functions(&self) -> &EngineFunctions {
        &self.functions
    }

    pub(crate) fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    pub(crate) fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Creates the physical tables, registers schemas and seeds the default
    /// versions. Safe to call on an already initialized database.
    pub async fn init(&self) -> Result<(), StrataError> {
        self.ensure_no_open_transaction()?;
        let mut session = ExecutionSession::new(self, SessionState::default(), None);
        self.savepoint(EXECUTE_SAVEPOINT).await?;
        let outcome = async {
            crate::init::initialize(&mut session, &self.boot_key_values).await?;
            commit_pending(&mut session).await
        }
        .await;
        match outcome {
            Ok(report) => {
                self.release(EXECUTE_SAVEPOINT).await?;
                tracing::info!(
                    target: "strata::engine",
                    active_version_id = %session.state.active_version_id,
                    schemas = session.state.registry.keys().count(),
                    seeded_changes = report.change_count(),
                    "initialized engine"
                );
                self.store_state(session.state)
            }
            Err(error) => {
                self.rollback_to(EXECUTE_SAVEPOINT).await;
                Err(error)
            }
        }
    }

    /// Runs a script of one or more statements in an implicit transaction
    /// and returns the result of the last one.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        options: ExecuteOptions,
    ) -> Result<QueryResult, StrataError> {
        self.ensure_no_open_transaction()?;
        let mut session = ExecutionSession::new(self, self.snapshot_state()?, options.writer_key);
        self.savepoint(EXECUTE_SAVEPOINT).await?;
        let outcome = async {
            let result = run_script(&mut session, sql, params).await?;
            let report = commit_pending(&mut session).await?;
            Ok::<_, StrataError>((result, report))
        }
        .await;
        match outcome {
            Ok((result, report)) => {
                self.release(EXECUTE_SAVEPOINT).await?;
                if !report.is_empty() {
                    tracing::debug!(
                        target: "strata::engine",
                        commits = report.commits.len(),
                        changes = report.change_count(),
                        "committed implicit transaction"
                    );
                }
                self.store_state(session.state)?;
                Ok(result)
            }
            Err(error) => {
                self.rollback_to(EXECUTE_SAVEPOINT).await;
                Err(error)
            }
        }
    }

    pub async fn begin_transaction(
        &self,
        options: ExecuteOptions,
    ) -> Result<EngineTransaction<'_>, StrataError> {
        let state = self.snapshot_state()?;
        if self
            .transaction_open
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(transaction_error("a transaction is already open"));
        }
        if let Err(error) = self.savepoint(TRANSACTION_SAVEPOINT).await {
            self.transaction_open.store(false, Ordering::SeqCst);
            return Err(error);
        }
        tracing::debug!(target: "strata::engine", "began transaction");
        Ok(EngineTransaction {
            engine: self,
            state: Some(state),
            options,
        })
    }

    /// Runs `f` in a transaction: committed when it returns `Ok`, rolled back
    /// when it returns `Err` or panics.
    pub async fn transaction<T, F>(&self, options: ExecuteOptions, f: F) -> Result<T, StrataError>
    where
        F: for<'tx> FnOnce(&'tx mut EngineTransaction<'_>) -> EngineTransactionFuture<'tx, T>,
    {
        let mut transaction = self.begin_transaction(options).await?;
        match std::panic::AssertUnwindSafe(f(&mut transaction))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => {
                transaction.commit().await?;
                Ok(value)
            }
            Ok(Err(error)) => {
                rollback_logged(transaction).await;
                Err(error)
            }
            Err(payload) => {
                rollback_logged(transaction).await;
                std::panic::resume_unwind(payload);
            }
        }
    }

    /// Rebuilds every cache table from the change log.
    pub async fn materialize(&self) -> Result<MaterializationReport, StrataError> {
        self.materialize_scope(MaterializationScope::Full).await
    }

    pub async fn materialize_scope(
        &self,
        scope: MaterializationScope,
    ) -> Result<MaterializationReport, StrataError> {
        self.ensure_no_open_transaction()?;
        let mut session = ExecutionSession::new(self, self.snapshot_state()?, None);
        self.savepoint(EXECUTE_SAVEPOINT).await?;
        match materialize(&mut session, scope).await {
            Ok(report) => {
                self.release(EXECUTE_SAVEPOINT).await?;
                self.store_state(session.state)?;
                Ok(report)
            }
            Err(error) => {
                self.rollback_to(EXECUTE_SAVEPOINT).await;
                Err(error)
            }
        }
    }

    /// The bytes of `file_id` in the active version, rebuilt from its
    /// entities. `None` when no content was written.
    pub async fn read_file_data(&self, file_id: &str) -> Result<Option<Vec<u8>>, StrataError> {
        let session = ExecutionSession::new(self, self.snapshot_state()?, None);
        let version_id = session.state.active_version_id.clone();
        read_file_data(&session, file_id, &version_id).await
    }

    pub fn active_version_id(&self) -> Result<String, StrataError> {
        Ok(self.snapshot_state()?.active_version_id)
    }

    fn ensure_no_open_transaction(&self) -> Result<(), StrataError> {
        if self.transaction_open.load(Ordering::SeqCst) {
            return Err(transaction_error(
                "a transaction is open; run statements through it or finish it first",
            ));
        }
        Ok(())
    }

    fn snapshot_state(&self) -> Result<SessionState, StrataError> {
        let state = self
            .state
            .read()
            .map_err(|_| unknown_error("engine state lock poisoned"))?;
        if state.active_version_id.is_empty() {
            return Err(unknown_error("engine is not initialized; call init() first"));
        }
        Ok(state.clone())
    }

    fn store_state(&self, state: SessionState) -> Result<(), StrataError> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| unknown_error("engine state lock poisoned"))?;
        *guard = state;
        Ok(())
    }

    async fn savepoint(&self, name: &str) -> Result<(), StrataError> {
        self.backend.execute(&format!("SAVEPOINT {name}"), &[]).await?;
        Ok(())
    }

    async fn release(&self, name: &str) -> Result<(), StrataError> {
        self.backend.execute(&format!("RELEASE {name}"), &[]).await?;
        Ok(())
    }

    /// Undoes everything since `name` and closes it.
    async fn rollback_to(&self, name: &str) {
        for sql in [format!("ROLLBACK TO {name}"), format!("RELEASE {name}")] {
            if let Err(error) = self.backend.execute(&sql, &[]).await {
                tracing::warn!(
                    target: "strata::engine",
                    savepoint = name,
                    error = %error,
                    "savepoint rollback failed"
                );
            }
        }
    }
}

/// Parses, binds, rewrites and runs every statement of `sql`.
async fn run_script(
    session: &mut ExecutionSession<'_>,
    sql: &str,
    params: &[Value],
) -> Result<QueryResult, StrataError> {
    let statements = parse_statements(sql)?;
    let mut placeholders = PlaceholderState::new();
    let mut last = QueryResult::default();
    for statement in statements {
        reject_transaction_control(&statement)?;
        if !session.config().allow_internal_tables {
            reject_internal_tables(&statement)?;
        }
        let bound = bind_statement(statement, params, &mut placeholders)?;
        if execute_write(session, &bound.statement, &bound.params)
            .await?
            .is_some()
        {
            last = QueryResult::default();
            continue;
        }

        let mut statement = bound.statement;
        let closure = session.closure()?;
        session.rewrite(&mut statement, session.config().cache_routing, &closure)?;
        let sql = statement.to_string();
        tracing::debug!(target: "strata::engine", sql = %sql, "executing statement");
        last = session
            .backend()
            .execute(&sql, &bound.params)
            .await
            .map_err(classify_backend_error)?;
    }
    Ok(last)
}

fn reject_transaction_control(statement: &Statement) -> Result<(), StrataError> {
    let Statement::Passthrough(sql) = statement else {
        return Ok(());
    };
    let first_word = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_end_matches(';')
        .to_ascii_lowercase();
    if TRANSACTION_CONTROL_KEYWORDS.contains(&first_word.as_str()) {
        return Err(transaction_error(&format!(
            "`{}` is not allowed in a statement; use Engine::begin_transaction instead",
            first_word.to_ascii_uppercase()
        )));
    }
    Ok(())
}

fn reject_internal_tables(statement: &Statement) -> Result<(), StrataError> {
    let touches_internal = match statement {
        Statement::Passthrough(sql) => tokenize(sql).iter().any(|token| match &token.kind {
            TokenKind::Identifier(name) | TokenKind::QuotedIdentifier(name) => {
                is_internal_table(name)
            }
            _ => false,
        }),
        other => referenced_table_names(other)
            .iter()
            .any(|name| is_internal_table(name)),
    };
    if touches_internal {
        return Err(internal_table_access_denied_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{reject_internal_tables, reject_transaction_control};
    use crate::errors::ErrorCode;
    use crate::sql::parse_statement;

    #[test]
    fn internal_tables_are_rejected_in_every_statement_kind() {
        for sql in [
            "SELECT * FROM strata_internal_change",
            "SELECT * FROM state WHERE entity_id IN (SELECT id FROM strata_internal_commit)",
            "DELETE FROM strata_internal_state_untracked",
            "DROP TABLE strata_internal_change",
        ] {
            let statement = parse_statement(sql).expect("parse");
            let err = reject_internal_tables(&statement).expect_err(sql);
            assert!(err.is(ErrorCode::InternalTableAccessDenied), "{sql}");
        }
        let statement = parse_statement("SELECT * FROM state").expect("parse");
        assert!(reject_internal_tables(&statement).is_ok());
    }

    #[test]
    fn transaction_control_statements_are_rejected() {
        for sql in ["BEGIN", "COMMIT", "SAVEPOINT x", "release x"] {
            let statement = parse_statement(sql).expect("parse");
            let err = reject_transaction_control(&statement).expect_err(sql);
            assert!(err.is(ErrorCode::Transaction));
        }
        let statement = parse_statement("CREATE TABLE t (a TEXT)").expect("parse");
        assert!(reject_transaction_control(&statement).is_ok());
    }
}
