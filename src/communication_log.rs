use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborators::{DeliveryStatus, NotificationRequest, NotificationSender};

/// key: communication-log -> every notification attempt, sent or failed
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CommunicationRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subject_kind: String,
    pub subject_id: Uuid,
    pub channel: String,
    pub recipient: String,
    pub template: String,
    pub status: String,
    pub error: Option<String>,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

/// Sends one notification and records the outcome. Send failures are returned as
/// `DeliveryStatus::Failed`, never retried here.
pub async fn deliver(
    pool: &PgPool,
    notifier: &dyn NotificationSender,
    request: &NotificationRequest,
) -> Result<DeliveryStatus, sqlx::Error> {
    let status = notifier
        .send(
            &request.channel,
            &request.recipient,
            &request.template,
            &request.context,
        )
        .await;

    let error = match &status {
        DeliveryStatus::Sent => None,
        DeliveryStatus::Failed(reason) => Some(reason.as_str()),
    };

    sqlx::query(
        r#"
        INSERT INTO communication_log (
            id,
            tenant_id,
            subject_kind,
            subject_id,
            channel,
            recipient,
            template,
            status,
            error,
            context
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request.tenant_id)
    .bind(request.subject_kind)
    .bind(request.subject_id)
    .bind(&request.channel)
    .bind(&request.recipient)
    .bind(&request.template)
    .bind(status.as_str())
    .bind(error)
    .bind(&request.context)
    .execute(pool)
    .await?;

    match &status {
        DeliveryStatus::Sent => info!(
            tenant_id = %request.tenant_id,
            subject_id = %request.subject_id,
            template = %request.template,
            "notification sent"
        ),
        DeliveryStatus::Failed(reason) => warn!(
            tenant_id = %request.tenant_id,
            subject_id = %request.subject_id,
            template = %request.template,
            reason = %reason,
            "notification failed"
        ),
    }

    Ok(status)
}

pub async fn list_for_subject(
    pool: &PgPool,
    subject_id: Uuid,
) -> Result<Vec<CommunicationRecord>, sqlx::Error> {
    sqlx::query_as::<_, CommunicationRecord>(
        "SELECT * FROM communication_log WHERE subject_id = $1 ORDER BY created_at ASC",
    )
    .bind(subject_id)
    .fetch_all(pool)
    .await
}
