use axum::{
    extract::{Extension, Query},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::context::{EngineContext, RunClock};
use crate::error::{AppError, AppResult};
use crate::run_log::{self, RunLogEntry};
use crate::scheduler;

// key: runs-surface -> manual passes + run history
#[derive(Debug, Default, Deserialize)]
pub struct TriggerRunRequest {
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRunsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn trigger_run(
    Extension(ctx): Extension<EngineContext>,
    payload: Option<Json<TriggerRunRequest>>,
) -> AppResult<Json<RunLogEntry>> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let clock = match request.as_of {
        Some(as_of) => RunClock::at(as_of),
        None => RunClock::now(),
    };
    let entry = scheduler::run_pass(&ctx, clock, "api")
        .await
        .map_err(AppError::from)?;
    Ok(Json(entry))
}

pub async fn list_runs(
    Extension(ctx): Extension<EngineContext>,
    Query(query): Query<ListRunsQuery>,
) -> AppResult<Json<Vec<RunLogEntry>>> {
    let entries = run_log::recent(&ctx.pool, query.limit.unwrap_or(50)).await?;
    Ok(Json(entries))
}
