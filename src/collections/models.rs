use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

/// key: followup-status -> collections workflow states
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FollowupStatus {
    Pending,
    Open,
    Fulfilled,
    Broken,
    Escalated,
    Cancelled,
}

impl FollowupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowupStatus::Pending => "pending",
            FollowupStatus::Open => "open",
            FollowupStatus::Fulfilled => "fulfilled",
            FollowupStatus::Broken => "broken",
            FollowupStatus::Escalated => "escalated",
            FollowupStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(FollowupStatus::Pending),
            "open" => Some(FollowupStatus::Open),
            "fulfilled" => Some(FollowupStatus::Fulfilled),
            "broken" => Some(FollowupStatus::Broken),
            "escalated" => Some(FollowupStatus::Escalated),
            "cancelled" => Some(FollowupStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FollowupStatus::Fulfilled | FollowupStatus::Cancelled)
    }

    /// Why a terminal status accepts no further actions.
    pub fn closure_reason(&self) -> &'static str {
        match self {
            FollowupStatus::Fulfilled => "the invoice balance has been settled",
            FollowupStatus::Cancelled => "the follow-up was cancelled",
            _ => "the follow-up is still active",
        }
    }
}

impl fmt::Display for FollowupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// key: call-outcome -> result of one collections call
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Promised,
    PartialPayment,
    NoAnswer,
    Declined,
    Disputed,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Promised => "promised",
            CallOutcome::PartialPayment => "partial_payment",
            CallOutcome::NoAnswer => "no_answer",
            CallOutcome::Declined => "declined",
            CallOutcome::Disputed => "disputed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "promised" => Some(CallOutcome::Promised),
            "partial_payment" => Some(CallOutcome::PartialPayment),
            "no_answer" => Some(CallOutcome::NoAnswer),
            "declined" => Some(CallOutcome::Declined),
            "disputed" => Some(CallOutcome::Disputed),
            _ => None,
        }
    }

    /// Outcomes that carry a payment commitment and do not count toward escalation.
    pub fn is_commitment(&self) -> bool {
        matches!(self, CallOutcome::Promised | CallOutcome::PartialPayment)
    }
}

/// key: followup-model -> one collections record per overdue invoice
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Followup {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub document_id: Uuid,
    pub client_id: Uuid,
    pub status: FollowupStatus,
    pub call_count: i32,
    pub outcome: Option<CallOutcome>,
    pub promise_date: Option<NaiveDate>,
    pub promise_amount_cents: Option<i64>,
    pub next_followup: Option<NaiveDate>,
    pub notes: Option<String>,
    pub last_called_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Followup {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let raw_status: String = row.try_get("status")?;
        let status = FollowupStatus::parse(&raw_status).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: format!("unknown followup status `{raw_status}`").into(),
        })?;
        let raw_outcome: Option<String> = row.try_get("outcome")?;
        let outcome = match raw_outcome {
            Some(raw) => Some(CallOutcome::parse(&raw).ok_or_else(|| {
                sqlx::Error::ColumnDecode {
                    index: "outcome".to_string(),
                    source: format!("unknown call outcome `{raw}`").into(),
                }
            })?),
            None => None,
        };

        Ok(Followup {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            document_id: row.try_get("document_id")?,
            client_id: row.try_get("client_id")?,
            status,
            call_count: row.try_get("call_count")?,
            outcome,
            promise_date: row.try_get("promise_date")?,
            promise_amount_cents: row.try_get("promise_amount_cents")?,
            next_followup: row.try_get("next_followup")?,
            notes: row.try_get("notes")?,
            last_called_at: row.try_get("last_called_at")?,
            closed_at: row.try_get("closed_at")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Append-only history entry written for every logged call.
#[derive(Clone, Debug, FromRow, Serialize)]
pub struct FollowupCall {
    pub id: Uuid,
    pub followup_id: Uuid,
    pub tenant_id: Uuid,
    pub outcome: String,
    pub notes: String,
    pub promise_date: Option<NaiveDate>,
    pub promise_amount_cents: Option<i64>,
    pub status_after: String,
    pub call_count_after: i32,
    pub logged_at: DateTime<Utc>,
}

/// Human "log a call" action.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LogCallRequest {
    pub outcome: CallOutcome,
    pub notes: String,
    #[serde(default)]
    pub promise_date: Option<NaiveDate>,
    #[serde(default)]
    pub promise_amount_cents: Option<i64>,
    #[serde(default)]
    pub next_followup: Option<NaiveDate>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Human "cancel followup" action.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}
