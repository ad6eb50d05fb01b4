#![allow(dead_code)]

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

use strata_engine::{
    boot, BootArgs, BootKeyValue, CreateVersionOptions, CreateVersionResult, Engine, EngineConfig,
    ExecuteOptions, MaterializationReport, PluginRegistration, QueryResult, SqliteBackend,
    StrataBackend, StrataError, Value,
};
use tokio::sync::Mutex as TokioMutex;

const BASELINE_SIMULATION: &str = "sqlite";
const BASELINE_WAIT: Duration = Duration::from_secs(60);

pub struct Simulation {
    pub name: &'static str,
    pub backend_factory: Box<dyn Fn() -> Box<dyn StrataBackend> + Send + Sync>,
    pub behavior: SimulationBehavior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationBehavior {
    Base,
    Rematerialization,
}

pub struct SimulationArgs {
    backend_factory: Box<dyn Fn() -> Box<dyn StrataBackend> + Send + Sync>,
    behavior: SimulationBehavior,
    expect: SharedExpectDeterministic,
}

#[derive(Default)]
pub struct SimulationBootArgs {
    pub key_values: Vec<BootKeyValue>,
    pub plugins: Vec<PluginRegistration>,
    pub config: Option<EngineConfig>,
}

/// An engine that, in the rematerialization simulation, rebuilds every cache
/// table from the change log before each read that follows a write.
pub struct SimulationEngine {
    engine: Engine,
    behavior: SimulationBehavior,
    rematerialization_pending: AtomicBool,
    initialized: AtomicBool,
    rematerialization_lock: TokioMutex<()>,
}

impl SimulationEngine {
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn behavior(&self) -> SimulationBehavior {
        self.behavior
    }

    pub async fn init(&self) -> Result<(), StrataError> {
        let result = self.engine.init().await;
        if result.is_ok() {
            self.initialized.store(true, Ordering::SeqCst);
            self.mark_written();
        }
        result
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, StrataError> {
        self.execute_with_options(sql, params, ExecuteOptions::default())
            .await
    }

    pub async fn execute_with_options(
        &self,
        sql: &str,
        params: &[Value],
        options: ExecuteOptions,
    ) -> Result<QueryResult, StrataError> {
        match classify_statement(sql) {
            StatementKind::Read => {
                self.rematerialize_before_read_if_needed().await?;
                self.engine.execute(sql, params, options).await
            }
            StatementKind::Write | StatementKind::Other => {
                let result = self.engine.execute(sql, params, options).await;
                if result.is_ok() {
                    self.mark_written();
                }
                result
            }
        }
    }

    pub async fn create_version(
        &self,
        options: CreateVersionOptions,
    ) -> Result<CreateVersionResult, StrataError> {
        let result = self.engine.create_version(options).await;
        if result.is_ok() {
            self.mark_written();
        }
        result
    }

    pub async fn switch_version(&self, version_id: &str) -> Result<(), StrataError> {
        let result = self.engine.switch_version(version_id).await;
        if result.is_ok() {
            self.mark_written();
        }
        result
    }

    pub async fn read_file_data(&self, file_id: &str) -> Result<Option<Vec<u8>>, StrataError> {
        self.rematerialize_before_read_if_needed().await?;
        self.engine.read_file_data(file_id).await
    }

    pub async fn materialize(&self) -> Result<MaterializationReport, StrataError> {
        self.engine.materialize().await
    }

    /// Call after writing through `engine()` directly.
    pub fn mark_written(&self) {
        if self.behavior == SimulationBehavior::Rematerialization {
            self.rematerialization_pending.store(true, Ordering::SeqCst);
        }
    }

    async fn rematerialize_before_read_if_needed(&self) -> Result<(), StrataError> {
        if self.behavior != SimulationBehavior::Rematerialization
            || !self.initialized.load(Ordering::SeqCst)
            || !self.rematerialization_pending.load(Ordering::SeqCst)
        {
            return Ok(());
        }

        let _guard = self.rematerialization_lock.lock().await;
        if !self.rematerialization_pending.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.engine.materialize().await?;
        self.rematerialization_pending.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl SimulationArgs {
    pub async fn boot_simulated_engine(
        &self,
        args: Option<SimulationBootArgs>,
    ) -> Result<SimulationEngine, StrataError> {
        let args = args.unwrap_or_default();
        let config = args.config.unwrap_or_else(|| EngineConfig {
            deterministic: true,
            ..EngineConfig::default()
        });
        Ok(SimulationEngine {
            engine: boot(BootArgs {
                backend: (self.backend_factory)(),
                config,
                plugins: args.plugins,
                key_values: args.key_values,
            }),
            behavior: self.behavior,
            rematerialization_pending: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            rematerialization_lock: TokioMutex::new(()),
        })
    }

    pub fn behavior(&self) -> SimulationBehavior {
        self.behavior
    }

    /// Asserts that `actual` equals the value the baseline simulation saw at
    /// the same call position of the same case.
    pub fn assert_deterministic<T>(&self, actual: T)
    where
        T: PartialEq + std::fmt::Debug + Clone + Send + Sync + 'static,
    {
        self.expect.assert_deterministic(actual);
    }
}

struct SharedDeterministicCaseState {
    baseline_started: bool,
    baseline_finished: bool,
    baseline_failed: bool,
    expected_values: Vec<Box<dyn Any + Send + Sync>>,
}

struct SharedDeterministicCase {
    state: Mutex<SharedDeterministicCaseState>,
    condvar: Condvar,
}

#[derive(Clone)]
struct SharedExpectDeterministic {
    case: Arc<SharedDeterministicCase>,
    case_id: String,
    simulation_name: String,
    is_baseline: bool,
    call_index: Arc<Mutex<usize>>,
}

/// Marks the baseline run finished so the other simulations can compare.
struct SharedDeterministicRunGuard {
    expect: SharedExpectDeterministic,
}

impl Drop for SharedDeterministicRunGuard {
    fn drop(&mut self) {
        if !self.expect.is_baseline {
            return;
        }
        let failed = std::thread::panicking();
        if let Ok(mut state) = self.expect.case.state.lock() {
            state.baseline_finished = true;
            state.baseline_failed = failed;
        }
        self.expect.case.condvar.notify_all();
    }
}

impl SharedExpectDeterministic {
    fn new(case_id: &str, simulation_name: &str) -> (Self, SharedDeterministicRunGuard) {
        static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<SharedDeterministicCase>>>> =
            OnceLock::new();
        let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        let case = registry
            .lock()
            .expect("deterministic registry mutex poisoned")
            .entry(case_id.to_string())
            .or_insert_with(|| {
                Arc::new(SharedDeterministicCase {
                    state: Mutex::new(SharedDeterministicCaseState {
                        baseline_started: false,
                        baseline_finished: false,
                        baseline_failed: false,
                        expected_values: Vec::new(),
                    }),
                    condvar: Condvar::new(),
                })
            })
            .clone();

        let is_baseline = simulation_name == BASELINE_SIMULATION;
        if is_baseline {
            case.state
                .lock()
                .expect("deterministic case mutex poisoned")
                .baseline_started = true;
        }
        let expect = Self {
            case,
            case_id: case_id.to_string(),
            simulation_name: simulation_name.to_string(),
            is_baseline,
            call_index: Arc::new(Mutex::new(0)),
        };
        let guard = SharedDeterministicRunGuard {
            expect: expect.clone(),
        };
        (expect, guard)
    }

    fn assert_deterministic<T>(&self, actual: T)
    where
        T: PartialEq + std::fmt::Debug + Clone + Send + Sync + 'static,
    {
        let index = {
            let mut call_index = self.call_index.lock().expect("call index mutex poisoned");
            let index = *call_index;
            *call_index += 1;
            index
        };

        if self.is_baseline {
            let mut state = self
                .case
                .state
                .lock()
                .expect("deterministic case mutex poisoned");
            state.expected_values.push(Box::new(actual));
            return;
        }

        let state = self
            .case
            .state
            .lock()
            .expect("deterministic case mutex poisoned");
        // Without a running baseline there is nothing to compare against.
        if !state.baseline_started {
            return;
        }
        let (state, _) = self
            .case
            .condvar
            .wait_timeout_while(state, BASELINE_WAIT, |state| !state.baseline_finished)
            .expect("deterministic case mutex poisoned");
        if !state.baseline_finished || state.baseline_failed {
            return;
        }
        let Some(expected) = state.expected_values.get(index) else {
            panic!(
                "SIMULATION DETERMINISM VIOLATION\n\nCase `{}` simulation `{}` made assert_deterministic call #{} but the baseline made only {}",
                self.case_id,
                self.simulation_name,
                index + 1,
                state.expected_values.len()
            );
        };
        let expected = expected
            .downcast_ref::<T>()
            .unwrap_or_else(|| panic!("assert_deterministic call #{} changed type", index + 1));
        assert_eq!(
            &actual, expected,
            "SIMULATION DETERMINISM VIOLATION\n\nCase `{}` simulation `{}` diverged from `{}` at call #{}",
            self.case_id,
            self.simulation_name,
            BASELINE_SIMULATION,
            index + 1
        );
    }
}

pub async fn run_single_simulation_test<F, Fut>(simulation_name: &str, case_id: &str, test_fn: F)
where
    F: Fn(SimulationArgs) -> Fut,
    Fut: Future<Output = ()>,
{
    let simulation = default_simulations()
        .into_iter()
        .find(|sim| sim.name == simulation_name)
        .unwrap_or_else(|| panic!("{} simulation missing", simulation_name));
    let (expect, _guard) = SharedExpectDeterministic::new(case_id, simulation.name);
    let args = SimulationArgs {
        backend_factory: simulation.backend_factory,
        behavior: simulation.behavior,
        expect,
    };
    Box::pin(test_fn(args)).await;
}

pub fn sqlite_simulation() -> Simulation {
    Simulation {
        name: "sqlite",
        backend_factory: Box::new(|| {
            Box::new(SqliteBackend::in_memory().expect("failed to open in-memory sqlite"))
                as Box<dyn StrataBackend>
        }),
        behavior: SimulationBehavior::Base,
    }
}

pub fn materialization_simulation() -> Simulation {
    let mut simulation = sqlite_simulation();
    simulation.name = "materialization";
    simulation.behavior = SimulationBehavior::Rematerialization;
    simulation
}

pub fn default_simulations() -> Vec<Simulation> {
    vec![sqlite_simulation(), materialization_simulation()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    Read,
    Write,
    Other,
}

fn classify_statement(sql: &str) -> StatementKind {
    let Some(keyword) = first_keyword(sql) else {
        return StatementKind::Other;
    };
    match keyword.to_ascii_lowercase().as_str() {
        "select" | "pragma" | "explain" | "values" => StatementKind::Read,
        "insert" | "update" | "delete" | "replace" => StatementKind::Write,
        "with" => classify_with_statement(sql),
        _ => StatementKind::Other,
    }
}

fn classify_with_statement(sql: &str) -> StatementKind {
    let normalized = sql.to_ascii_lowercase();
    if normalized.contains(" insert ")
        || normalized.contains(" update ")
        || normalized.contains(" delete ")
    {
        StatementKind::Write
    } else {
        StatementKind::Read
    }
}

fn first_keyword(sql: &str) -> Option<&str> {
    let trimmed = sql.trim_start();
    let end = trimmed
        .char_indices()
        .find_map(|(idx, ch)| (ch.is_whitespace() || ch == '(').then_some(idx))
        .unwrap_or(trimmed.len());
    let keyword = &trimmed[..end];
    (!keyword.is_empty()).then_some(keyword)
}

/// Text of column `column` in the first row.
pub fn first_text(result: &QueryResult, column: &str) -> Option<String> {
    let index = result.column_index(column)?;
    result
        .rows
        .first()?
        .get(index)?
        .as_text()
        .map(str::to_string)
}

/// All rows projected to text, NULL as `None`.
pub fn text_rows(result: &QueryResult) -> Vec<Vec<Option<String>>> {
    result
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|value| match value {
                    Value::Null => None,
                    Value::Integer(value) => Some(value.to_string()),
                    Value::Real(value) => Some(value.to_string()),
                    Value::Text(value) => Some(value.clone()),
                    Value::Blob(bytes) => Some(format!("<{} bytes>", bytes.len())),
                })
                .collect()
        })
        .collect()
}
