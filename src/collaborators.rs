use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const SIGNATURE_HEADER: &str = "x-dues-signature";

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("billing document {0} not found")]
    DocumentNotFound(Uuid),
    #[error("collaborator rejected request: {0}")]
    Rejected(String),
    #[error("collaborator transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// key: overdue-stage -> monotonic escalation marker on billing documents
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverdueStage {
    ReminderSent,
    Overdue,
    Escalated,
}

impl OverdueStage {
    pub const ALL: [OverdueStage; 3] = [
        OverdueStage::ReminderSent,
        OverdueStage::Overdue,
        OverdueStage::Escalated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OverdueStage::ReminderSent => "reminder_sent",
            OverdueStage::Overdue => "overdue",
            OverdueStage::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reminder_sent" => Some(OverdueStage::ReminderSent),
            "overdue" => Some(OverdueStage::Overdue),
            "escalated" => Some(OverdueStage::Escalated),
            _ => None,
        }
    }

    /// Stages a document may currently hold for a move to `self` to be an advance.
    pub fn predecessors(&self) -> Vec<String> {
        Self::ALL
            .iter()
            .filter(|stage| *stage < self)
            .map(|stage| stage.as_str().to_string())
            .collect()
    }

    pub fn template(&self) -> &'static str {
        match self {
            OverdueStage::ReminderSent => "invoice_due_reminder",
            OverdueStage::Overdue => "invoice_overdue",
            OverdueStage::Escalated => "invoice_escalated",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRequest {
    pub tenant_id: Uuid,
    pub subscriber_id: Uuid,
    pub billable_item_id: Uuid,
    pub due_date: NaiveDate,
    pub obligation_id: Uuid,
    pub amount_cents: Option<i64>,
}

/// Unpaid billing document as seen by the sweep.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct BillingDocument {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub due_date: NaiveDate,
    pub status: String,
    pub overdue_stage: Option<OverdueStage>,
    pub balance_cents: i64,
}

/// key: billing-collaborator -> document creation + payment state
#[async_trait]
pub trait BillingCollaborator: Send + Sync {
    async fn create_document(&self, request: &DocumentRequest) -> Result<Uuid, CollaboratorError>;
    async fn get_balance(&self, document_id: Uuid) -> Result<i64, CollaboratorError>;
    async fn open_documents(&self, tenant_id: Uuid)
        -> Result<Vec<BillingDocument>, CollaboratorError>;
    /// Moves the document to `stage` only when that is forward progress; returns whether it moved.
    async fn advance_overdue_stage(
        &self,
        document_id: Uuid,
        stage: OverdueStage,
    ) -> Result<bool, CollaboratorError>;
    async fn tenants_with_open_documents(&self) -> Result<Vec<Uuid>, CollaboratorError>;
}

/// key: billing-collaborator-postgres -> document registry in the engine database
#[derive(Clone)]
pub struct PgBillingDocuments {
    pool: PgPool,
}

impl PgBillingDocuments {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct OpenDocumentRow {
    id: Uuid,
    tenant_id: Uuid,
    client_id: Uuid,
    due_date: NaiveDate,
    status: String,
    overdue_stage: Option<String>,
    balance_cents: i64,
}

#[async_trait]
impl BillingCollaborator for PgBillingDocuments {
    async fn create_document(&self, request: &DocumentRequest) -> Result<Uuid, CollaboratorError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO billing_documents (
                id,
                tenant_id,
                client_id,
                billable_item_id,
                obligation_id,
                due_date,
                status,
                amount_cents
            ) VALUES ($1, $2, $3, $4, $5, $6, 'sent', COALESCE($7, 0))
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.tenant_id)
        .bind(request.subscriber_id)
        .bind(request.billable_item_id)
        .bind(request.obligation_id)
        .bind(request.due_date)
        .bind(request.amount_cents)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_balance(&self, document_id: Uuid) -> Result<i64, CollaboratorError> {
        let balance: Option<i64> = sqlx::query_scalar(
            "SELECT amount_cents - paid_cents FROM billing_documents WHERE id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        balance.ok_or(CollaboratorError::DocumentNotFound(document_id))
    }

    async fn open_documents(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<BillingDocument>, CollaboratorError> {
        let rows = sqlx::query_as::<_, OpenDocumentRow>(
            r#"
            SELECT
                id,
                tenant_id,
                client_id,
                due_date,
                status,
                overdue_stage,
                amount_cents - paid_cents AS balance_cents
            FROM billing_documents
            WHERE tenant_id = $1
              AND status NOT IN ('paid', 'void', 'draft')
              AND amount_cents > paid_cents
            ORDER BY due_date ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let overdue_stage = match row.overdue_stage.as_deref() {
                None => None,
                Some(raw) => match OverdueStage::parse(raw) {
                    Some(stage) => Some(stage),
                    None => {
                        warn!(
                            document_id = %row.id,
                            stage = raw,
                            "skipping billing document with unknown overdue stage"
                        );
                        continue;
                    }
                },
            };
            documents.push(BillingDocument {
                id: row.id,
                tenant_id: row.tenant_id,
                client_id: row.client_id,
                due_date: row.due_date,
                status: row.status,
                overdue_stage,
                balance_cents: row.balance_cents,
            });
        }
        Ok(documents)
    }

    async fn advance_overdue_stage(
        &self,
        document_id: Uuid,
        stage: OverdueStage,
    ) -> Result<bool, CollaboratorError> {
        let row = sqlx::query(
            r#"
            UPDATE billing_documents
            SET
                overdue_stage = $2,
                status = CASE
                    WHEN $2 <> 'reminder_sent' AND status = 'sent' THEN 'overdue'
                    ELSE status
                END,
                updated_at = NOW()
            WHERE id = $1
              AND status NOT IN ('paid', 'void')
              AND (overdue_stage IS NULL OR overdue_stage = ANY($3))
            RETURNING id
            "#,
        )
        .bind(document_id)
        .bind(stage.as_str())
        .bind(stage.predecessors())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn tenants_with_open_documents(&self) -> Result<Vec<Uuid>, CollaboratorError> {
        let tenants: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT tenant_id
            FROM billing_documents
            WHERE status NOT IN ('paid', 'void', 'draft')
              AND amount_cents > paid_cents
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct NotificationRequest {
    pub tenant_id: Uuid,
    pub subject_kind: &'static str,
    pub subject_id: Uuid,
    pub channel: String,
    pub recipient: String,
    pub template: String,
    pub context: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Failed(String),
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed(_) => "failed",
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryStatus::Sent)
    }
}

/// key: notification-collaborator -> transport boundary
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        channel: &str,
        recipient: &str,
        template: &str,
        context: &Value,
    ) -> DeliveryStatus;
}

/// Forwards notification requests to an HTTP endpoint, optionally signing the body.
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>, secret: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            secret,
        })
    }
}

pub fn sign_payload(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[async_trait]
impl NotificationSender for WebhookNotifier {
    async fn send(
        &self,
        channel: &str,
        recipient: &str,
        template: &str,
        context: &Value,
    ) -> DeliveryStatus {
        let body = match serde_json::to_vec(&serde_json::json!({
            "channel": channel,
            "recipient": recipient,
            "template": template,
            "context": context,
        })) {
            Ok(body) => body,
            Err(err) => return DeliveryStatus::Failed(format!("payload encoding failed: {err}")),
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = self.secret.as_deref() {
            match sign_payload(secret, &body) {
                Some(signature) => request = request.header(SIGNATURE_HEADER, signature),
                None => return DeliveryStatus::Failed("payload signing failed".to_string()),
            }
        }

        match request.body(body).send().await {
            Ok(response) if response.status().is_success() => DeliveryStatus::Sent,
            Ok(response) => {
                DeliveryStatus::Failed(format!("webhook responded with {}", response.status()))
            }
            Err(err) => DeliveryStatus::Failed(format!("webhook transport error: {err}")),
        }
    }
}

/// Log-only sender used when no transport is configured.
pub struct TracingNotifier;

#[async_trait]
impl NotificationSender for TracingNotifier {
    async fn send(
        &self,
        channel: &str,
        recipient: &str,
        template: &str,
        context: &Value,
    ) -> DeliveryStatus {
        info!(channel, recipient, template, %context, "notification dispatched");
        DeliveryStatus::Sent
    }
}
