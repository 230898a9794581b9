mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Extension;
use common::{context, date, document, record_payment, RecordingNotifier};
use dues_engine::collaborators::{BillingCollaborator, PgBillingDocuments};
use dues_engine::collections::{
    CallOutcome, CancelRequest, Followup, FollowupError, FollowupService, FollowupStatus,
    LogCallRequest,
};
use dues_engine::routes::api_routes;
use dues_engine::{EngineContext, RunClock};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

fn call(outcome: CallOutcome) -> LogCallRequest {
    LogCallRequest {
        outcome,
        notes: "left voicemail".to_string(),
        promise_date: None,
        promise_amount_cents: None,
        next_followup: None,
        expected_version: None,
    }
}

async fn open_followup(
    ctx: &EngineContext,
    tenant_id: Uuid,
    amount_cents: i64,
) -> (FollowupService, Followup) {
    let pool = &ctx.pool;
    let document_id = document(pool, tenant_id, date(2024, 1, 1), amount_cents).await;
    let service = FollowupService::from_context(ctx);
    let documents = PgBillingDocuments::new(pool.clone())
        .open_documents(tenant_id)
        .await
        .unwrap();
    let opened = service
        .open_for_overdue(tenant_id, &documents, date(2024, 1, 9), 7)
        .await
        .unwrap();
    assert_eq!(opened, 1);

    let followup_id: Uuid =
        sqlx::query_scalar("SELECT id FROM followups WHERE document_id = $1")
            .bind(document_id)
            .fetch_one(pool)
            .await
            .unwrap();
    let followup = service.get(followup_id).await.unwrap();
    (service, followup)
}

// key: collections-tests -> followup workflow against Postgres
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn overdue_document_gets_exactly_one_followup(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let ctx = context(&pool, Arc::new(RecordingNotifier::default()));
    let tenant_id = Uuid::new_v4();
    document(&pool, tenant_id, date(2024, 1, 1), 500).await;
    let service = FollowupService::from_context(&ctx);
    let documents = ctx.billing.open_documents(tenant_id).await.unwrap();

    let within_grace = service
        .open_for_overdue(tenant_id, &documents, date(2024, 1, 8), 7)
        .await
        .unwrap();
    assert_eq!(within_grace, 0);

    let opened = service
        .open_for_overdue(tenant_id, &documents, date(2024, 1, 9), 7)
        .await
        .unwrap();
    assert_eq!(opened, 1);

    let repeat = service
        .open_for_overdue(tenant_id, &documents, date(2024, 1, 10), 7)
        .await
        .unwrap();
    assert_eq!(repeat, 0);

    let queue = service.due_queue(tenant_id, date(2024, 1, 9)).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].status, FollowupStatus::Pending);
    assert_eq!(queue[0].next_followup, Some(date(2024, 1, 9)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn three_unanswered_calls_escalate_and_keep_history(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let ctx = context(&pool, Arc::new(RecordingNotifier::default()));
    let (service, followup) = open_followup(&ctx, Uuid::new_v4(), 500).await;
    let clock = RunClock::at(date(2024, 1, 9));

    let mut latest = followup.clone();
    for _ in 0..3 {
        latest = service
            .log_call(followup.id, &call(CallOutcome::NoAnswer), clock)
            .await
            .unwrap();
    }

    assert_eq!(latest.status, FollowupStatus::Escalated);
    assert_eq!(latest.call_count, 3);
    assert_eq!(latest.version, 3);

    let history = service.history(followup.id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].status_after, "escalated");
    assert_eq!(history[2].call_count_after, 3);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn lapsed_promise_is_marked_broken(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let ctx = context(&pool, Arc::new(RecordingNotifier::default()));
    let tenant_id = Uuid::new_v4();
    let (service, followup) = open_followup(&ctx, tenant_id, 500).await;

    let mut promise = call(CallOutcome::Promised);
    promise.promise_date = Some(date(2024, 1, 10));
    promise.promise_amount_cents = Some(500);
    let promised = service
        .log_call(followup.id, &promise, RunClock::at(date(2024, 1, 9)))
        .await
        .unwrap();
    assert_eq!(promised.status, FollowupStatus::Open);
    assert_eq!(promised.next_followup, Some(date(2024, 1, 10)));

    let on_promise_day = service
        .sweep_derived(tenant_id, RunClock::at(date(2024, 1, 10)))
        .await
        .unwrap();
    assert_eq!(on_promise_day.followups_broken, 0);

    let counters = service
        .sweep_derived(tenant_id, RunClock::at(date(2024, 1, 11)))
        .await
        .unwrap();
    assert_eq!(counters.followups_broken, 1);

    let broken = service.get(followup.id).await.unwrap();
    assert_eq!(broken.status, FollowupStatus::Broken);
    assert_eq!(broken.next_followup, Some(date(2024, 1, 11)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unanswered_call_on_broken_followup_reopens_it(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let ctx = context(&pool, Arc::new(RecordingNotifier::default()));
    let tenant_id = Uuid::new_v4();
    let (service, followup) = open_followup(&ctx, tenant_id, 500).await;

    let mut promise = call(CallOutcome::Promised);
    promise.promise_date = Some(date(2024, 1, 10));
    promise.promise_amount_cents = Some(500);
    service
        .log_call(followup.id, &promise, RunClock::at(date(2024, 1, 9)))
        .await
        .unwrap();
    service
        .sweep_derived(tenant_id, RunClock::at(date(2024, 1, 11)))
        .await
        .unwrap();

    let reopened = service
        .log_call(followup.id, &call(CallOutcome::NoAnswer), RunClock::at(date(2024, 1, 12)))
        .await
        .unwrap();
    assert_eq!(reopened.status, FollowupStatus::Open);
    assert_eq!(reopened.promise_date, None);
    assert_eq!(reopened.promise_amount_cents, None);
    assert_eq!(reopened.next_followup, Some(date(2024, 1, 13)));

    let counters = service
        .sweep_derived(tenant_id, RunClock::at(date(2024, 1, 12)))
        .await
        .unwrap();
    assert_eq!(counters.followups_broken, 0);

    let current = service.get(followup.id).await.unwrap();
    assert_eq!(current.status, FollowupStatus::Open);
    assert_eq!(current.next_followup, Some(date(2024, 1, 13)));
    assert_eq!(current.version, reopened.version);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn settled_balance_fulfils_and_closes_followup(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let ctx = context(&pool, Arc::new(RecordingNotifier::default()));
    let tenant_id = Uuid::new_v4();
    let (service, followup) = open_followup(&ctx, tenant_id, 500).await;
    record_payment(&pool, followup.document_id, 500).await;

    let counters = service
        .sweep_derived(tenant_id, RunClock::at(date(2024, 1, 12)))
        .await
        .unwrap();
    assert_eq!(counters.followups_fulfilled, 1);
    let fulfilled = service.get(followup.id).await.unwrap();

    let err = service
        .log_call(followup.id, &call(CallOutcome::NoAnswer), RunClock::at(date(2024, 1, 12)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FollowupError::Terminal {
            status: FollowupStatus::Fulfilled,
            ..
        }
    ));

    let err = service
        .cancel(followup.id, &CancelRequest::default(), chrono::Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, FollowupError::Terminal { .. }));

    let unchanged = service.get(followup.id).await.unwrap();
    assert_eq!(unchanged.status, FollowupStatus::Fulfilled);
    assert_eq!(unchanged.version, fulfilled.version);
    assert_eq!(unchanged.call_count, fulfilled.call_count);
    assert!(service.history(followup.id).await.unwrap().is_empty());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn stale_version_is_rejected(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let ctx = context(&pool, Arc::new(RecordingNotifier::default()));
    let (service, followup) = open_followup(&ctx, Uuid::new_v4(), 500).await;
    let clock = RunClock::at(date(2024, 1, 9));

    let mut first = call(CallOutcome::NoAnswer);
    first.expected_version = Some(followup.version);
    service.log_call(followup.id, &first, clock).await.unwrap();

    let err = service.log_call(followup.id, &first, clock).await.unwrap_err();
    assert!(matches!(
        err,
        FollowupError::VersionConflict {
            expected: 0,
            actual: 1
        }
    ));
    assert_eq!(service.history(followup.id).await.unwrap().len(), 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn followup_routes_log_calls_and_report_conflicts(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let ctx = context(&pool, Arc::new(RecordingNotifier::default()));
    let (service, followup) = open_followup(&ctx, Uuid::new_v4(), 500).await;
    let app = api_routes().layer(Extension(ctx.clone()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/followups/{}/calls", followup.id))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "outcome": "declined", "notes": "asked for a discount" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let payload: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["status"], "open");
    assert_eq!(payload["call_count"], 1);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/followups/{}/calls", followup.id))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "outcome": "promised", "notes": "will pay" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/followups/{}/cancel", followup.id))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "reason": "written off" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        service.get(followup.id).await.unwrap().status,
        FollowupStatus::Cancelled
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/followups/{}/calls", followup.id))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "outcome": "no_answer", "notes": "rang out" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/followups/{}", followup.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let detail: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(detail["followup"]["status"], "cancelled");
    assert_eq!(detail["calls"].as_array().map(Vec::len), Some(1));

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/followups/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
