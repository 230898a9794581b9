use axum::{
    routing::{get, post},
    Router,
};

use crate::{collections::api as followups, runs_api};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/followups/:id", get(followups::get_followup))
        .route("/api/followups/:id/calls", post(followups::log_call))
        .route("/api/followups/:id/cancel", post(followups::cancel_followup))
        .route(
            "/api/tenants/:tenant_id/followups/due",
            get(followups::due_queue),
        )
        .route(
            "/api/runs",
            get(runs_api::list_runs).post(runs_api::trigger_run),
        )
}
