#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use dues_engine::collaborators::{
    BillingCollaborator, BillingDocument, CollaboratorError, DeliveryStatus, DocumentRequest,
    NotificationSender, OverdueStage, PgBillingDocuments,
};
use dues_engine::config::SweepPolicy;
use dues_engine::cycle::Cycle;
use dues_engine::obligations::{store, NewObligation, ObligationKind, RecurringObligation};
use dues_engine::EngineContext;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Captures every notification instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn templates(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, template)| template.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(
        &self,
        _channel: &str,
        recipient: &str,
        template: &str,
        _context: &Value,
    ) -> DeliveryStatus {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), template.to_string()));
        if self.fail {
            DeliveryStatus::Failed("smtp unavailable".to_string())
        } else {
            DeliveryStatus::Sent
        }
    }
}

/// Postgres-backed billing whose document creation always fails.
pub struct RejectingBilling {
    inner: PgBillingDocuments,
}

impl RejectingBilling {
    pub fn new(pool: PgPool) -> Self {
        Self {
            inner: PgBillingDocuments::new(pool),
        }
    }
}

#[async_trait]
impl BillingCollaborator for RejectingBilling {
    async fn create_document(&self, _request: &DocumentRequest) -> Result<Uuid, CollaboratorError> {
        Err(CollaboratorError::Rejected("billing service unavailable".to_string()))
    }

    async fn get_balance(&self, document_id: Uuid) -> Result<i64, CollaboratorError> {
        self.inner.get_balance(document_id).await
    }

    async fn open_documents(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<BillingDocument>, CollaboratorError> {
        self.inner.open_documents(tenant_id).await
    }

    async fn advance_overdue_stage(
        &self,
        document_id: Uuid,
        stage: OverdueStage,
    ) -> Result<bool, CollaboratorError> {
        self.inner.advance_overdue_stage(document_id, stage).await
    }

    async fn tenants_with_open_documents(&self) -> Result<Vec<Uuid>, CollaboratorError> {
        self.inner.tenants_with_open_documents().await
    }
}

/// Postgres-backed billing whose document reads fail as if the service were down.
pub struct UnreachableBilling {
    inner: PgBillingDocuments,
}

impl UnreachableBilling {
    pub fn new(pool: PgPool) -> Self {
        Self {
            inner: PgBillingDocuments::new(pool),
        }
    }
}

#[async_trait]
impl BillingCollaborator for UnreachableBilling {
    async fn create_document(&self, request: &DocumentRequest) -> Result<Uuid, CollaboratorError> {
        self.inner.create_document(request).await
    }

    async fn get_balance(&self, _document_id: Uuid) -> Result<i64, CollaboratorError> {
        Err(CollaboratorError::Transport("connection refused".to_string()))
    }

    async fn open_documents(
        &self,
        _tenant_id: Uuid,
    ) -> Result<Vec<BillingDocument>, CollaboratorError> {
        Err(CollaboratorError::Transport("connection refused".to_string()))
    }

    async fn advance_overdue_stage(
        &self,
        _document_id: Uuid,
        _stage: OverdueStage,
    ) -> Result<bool, CollaboratorError> {
        Err(CollaboratorError::Transport("connection refused".to_string()))
    }

    async fn tenants_with_open_documents(&self) -> Result<Vec<Uuid>, CollaboratorError> {
        Ok(Vec::new())
    }
}

pub fn context(pool: &PgPool, notifier: Arc<RecordingNotifier>) -> EngineContext {
    context_with_policy(pool, notifier, SweepPolicy::default())
}

pub fn context_with_policy(
    pool: &PgPool,
    notifier: Arc<RecordingNotifier>,
    policy: SweepPolicy,
) -> EngineContext {
    EngineContext::new(
        pool.clone(),
        Arc::new(PgBillingDocuments::new(pool.clone())),
        notifier,
        policy,
    )
}

pub async fn obligation(
    pool: &PgPool,
    tenant_id: Uuid,
    cycle: Cycle,
    next_due_date: NaiveDate,
) -> RecurringObligation {
    store::insert(
        pool,
        &NewObligation {
            tenant_id,
            kind: ObligationKind::Subscription,
            subscriber_id: Uuid::new_v4(),
            billable_item_id: Uuid::new_v4(),
            cycle,
            next_due_date,
            remind_days_before: None,
            notify_channel: None,
            amount_cents: Some(1_500),
        },
    )
    .await
    .unwrap()
}

pub async fn document(
    pool: &PgPool,
    tenant_id: Uuid,
    due_date: NaiveDate,
    amount_cents: i64,
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO billing_documents (id, tenant_id, client_id, due_date, amount_cents) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(tenant_id)
    .bind(Uuid::new_v4())
    .bind(due_date)
    .bind(amount_cents)
    .execute(pool)
    .await
    .unwrap();
    id
}

pub async fn record_payment(pool: &PgPool, document_id: Uuid, paid_cents: i64) {
    sqlx::query("UPDATE billing_documents SET paid_cents = $2 WHERE id = $1")
        .bind(document_id)
        .bind(paid_cents)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn document_count(pool: &PgPool, obligation_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM billing_documents WHERE obligation_id = $1")
        .bind(obligation_id)
        .fetch_one(pool)
        .await
        .unwrap()
}
