use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{EngineContext, RunClock};
use crate::error::AppResult;

use super::models::{CancelRequest, Followup, FollowupCall, LogCallRequest};
use super::service::FollowupService;

// key: collections-surface -> http-handlers
#[derive(Debug, Serialize)]
pub struct FollowupDetail {
    pub followup: Followup,
    pub calls: Vec<FollowupCall>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DueQueueQuery {
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

pub async fn get_followup(
    Extension(ctx): Extension<EngineContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<FollowupDetail>> {
    let service = FollowupService::from_context(&ctx);
    let followup = service.get(id).await?;
    let calls = service.history(id).await?;
    Ok(Json(FollowupDetail { followup, calls }))
}

pub async fn log_call(
    Extension(ctx): Extension<EngineContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<LogCallRequest>,
) -> AppResult<Json<Followup>> {
    let service = FollowupService::from_context(&ctx);
    let followup = service.log_call(id, &payload, RunClock::now()).await?;
    Ok(Json(followup))
}

pub async fn cancel_followup(
    Extension(ctx): Extension<EngineContext>,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelRequest>>,
) -> AppResult<Json<Followup>> {
    let service = FollowupService::from_context(&ctx);
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let followup = service.cancel(id, &request, RunClock::now().now).await?;
    Ok(Json(followup))
}

pub async fn due_queue(
    Extension(ctx): Extension<EngineContext>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<DueQueueQuery>,
) -> AppResult<Json<Vec<Followup>>> {
    let service = FollowupService::from_context(&ctx);
    let as_of = query.as_of.unwrap_or_else(|| RunClock::now().as_of);
    let queue = service.due_queue(tenant_id, as_of).await?;
    Ok(Json(queue))
}
