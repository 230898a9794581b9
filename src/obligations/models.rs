use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::cycle::{Cycle, CycleError};

/// key: obligation-model -> subscriptions, bills, statutory items
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RecurringObligation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: String,
    pub subscriber_id: Uuid,
    pub billable_item_id: Uuid,
    pub cycle: String,
    pub next_due_date: NaiveDate,
    pub is_active: bool,
    pub remind_days_before: Option<i32>,
    pub last_reminder_sent_at: Option<DateTime<Utc>>,
    pub notify_channel: Option<String>,
    pub amount_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringObligation {
    pub fn cycle(&self) -> Result<Cycle, CycleError> {
        Cycle::parse(&self.cycle)
    }

    pub fn kind(&self) -> ObligationKind {
        ObligationKind::from_str(&self.kind)
    }

    pub fn idempotency_key(&self, due_date: NaiveDate) -> IdempotencyKey {
        IdempotencyKey {
            tenant_id: self.tenant_id,
            subscriber_id: self.subscriber_id,
            billable_item_id: self.billable_item_id,
            due_date,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObligationKind {
    Subscription,
    Bill,
    Statutory,
}

impl ObligationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObligationKind::Subscription => "subscription",
            ObligationKind::Bill => "bill",
            ObligationKind::Statutory => "statutory",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "bill" => ObligationKind::Bill,
            "statutory" => ObligationKind::Statutory,
            _ => ObligationKind::Subscription,
        }
    }
}

/// Registration payload for a new obligation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewObligation {
    pub tenant_id: Uuid,
    pub kind: ObligationKind,
    pub subscriber_id: Uuid,
    pub billable_item_id: Uuid,
    pub cycle: Cycle,
    pub next_due_date: NaiveDate,
    #[serde(default)]
    pub remind_days_before: Option<i32>,
    #[serde(default)]
    pub notify_channel: Option<String>,
    #[serde(default)]
    pub amount_cents: Option<i64>,
}

/// key: idempotency-key -> (tenant, subscriber, item, due date)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub tenant_id: Uuid,
    pub subscriber_id: Uuid,
    pub billable_item_id: Uuid,
    pub due_date: NaiveDate,
}

/// key: idempotency-record -> at most one per natural key
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subscriber_id: Uuid,
    pub billable_item_id: Uuid,
    pub due_date: NaiveDate,
    pub obligation_id: Uuid,
    pub document_id: Option<Uuid>,
    pub status: String,
    pub last_error: Option<String>,
    pub reminders_sent: Vec<String>,
    pub claimed_at: DateTime<Utc>,
    pub emitted_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    pub fn status(&self) -> LedgerStatus {
        LedgerStatus::from_str(&self.status)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Claimed,
    Emitted,
    DocumentFailed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Claimed => "claimed",
            LedgerStatus::Emitted => "emitted",
            LedgerStatus::DocumentFailed => "document_failed",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "emitted" => LedgerStatus::Emitted,
            "document_failed" => LedgerStatus::DocumentFailed,
            _ => LedgerStatus::Claimed,
        }
    }
}
