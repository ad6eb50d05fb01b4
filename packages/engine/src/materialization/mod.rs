//! Rebuilds the per-schema cache tables from the change log alone.

mod apply;
mod plan;
mod types;

pub use types::{
    MaterializationApplyReport, MaterializationPlan, MaterializationReport, MaterializationScope,
    MaterializationWrite, MaterializationWriteOp,
};

use crate::write::ExecutionSession;
use crate::StrataError;

pub(crate) async fn materialization_plan(
    session: &ExecutionSession<'_>,
    scope: MaterializationScope,
) -> Result<MaterializationPlan, StrataError> {
    plan::materialization_plan_internal(session, scope).await
}

pub(crate) async fn apply_materialization_plan(
    session: &mut ExecutionSession<'_>,
    plan: &MaterializationPlan,
) -> Result<MaterializationApplyReport, StrataError> {
    apply::apply_materialization_plan_internal(session, plan).await
}

pub(crate) async fn materialize(
    session: &mut ExecutionSession<'_>,
    scope: MaterializationScope,
) -> Result<MaterializationReport, StrataError> {
    let plan = materialization_plan(session, scope).await?;
    let apply = apply_materialization_plan(session, &plan).await?;
    tracing::info!(
        target: "strata::materialize",
        versions = plan.versions.len(),
        changes = plan.changes_scanned,
        rows_written = apply.rows_written,
        rows_deleted = apply.rows_deleted,
        "materialized cache tables"
    );
    Ok(MaterializationReport { plan, apply })
}
