//! Version management on top of the `version` and `active_version` views.

mod create_version;
mod switch_version;

pub use create_version::{create_version, CreateVersionOptions, CreateVersionResult};
pub use switch_version::switch_version;

use crate::{Engine, StrataError};

impl Engine {
    pub async fn create_version(
        &self,
        options: CreateVersionOptions,
    ) -> Result<CreateVersionResult, StrataError> {
        create_version(self, options).await
    }

    pub async fn switch_version(&self, version_id: impl Into<String>) -> Result<(), StrataError> {
        switch_version(self, version_id.into()).await
    }
}
