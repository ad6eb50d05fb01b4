mod backend;
pub mod backends;
mod builtin_schema;
pub mod cel;
mod commit;
mod config;
mod engine;
mod entity_views;
mod error;
mod error_classification;
pub mod errors;
mod filesystem;
pub mod functions;
mod init;
pub mod materialization;
mod plugin;
mod preprocess;
pub mod schema;
pub mod sql;
pub mod state;
mod types;
mod validation;
pub mod version;
mod write;

pub use backend::StrataBackend;
#[cfg(feature = "sqlite")]
pub use backends::SqliteBackend;
pub use commit::{CommitReport, CommitSummary};
pub use config::{CacheRouting, EngineConfig};
pub use engine::{
    boot, BootArgs, BootKeyValue, Engine, EngineTransaction, EngineTransactionFuture,
    ExecuteOptions,
};
pub use error::StrataError;
pub use errors::ErrorCode;
pub use materialization::{MaterializationReport, MaterializationScope};
pub use plugin::{DetectedChange, FilePlugin, PluginEntity, PluginFile, PluginRegistration};
pub use schema::SchemaDefinition;
pub use types::{QueryResult, Value};
pub use version::{CreateVersionOptions, CreateVersionResult};
