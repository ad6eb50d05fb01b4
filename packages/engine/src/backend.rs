use async_trait::async_trait;

use crate::{QueryResult, StrataError, Value};

/// The embedded relational engine the state engine compiles to.
///
/// Every call carries exactly one SQL statement; `params` bind to `?1..?N`.
#[async_trait(?Send)]
pub trait StrataBackend: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, StrataError>;
}
