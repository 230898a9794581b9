use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, Executor, FromRow, Postgres};
use uuid::Uuid;

use crate::collections::FollowupSweepCounters;
use crate::obligations::{ReminderCounters, SweepCounters};

/// key: run-log -> aggregated counters for one pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCounters {
    pub tenants: u64,
    pub tenants_failed: u64,
    #[serde(default)]
    pub sweep: SweepCounters,
    #[serde(default)]
    pub reminders: ReminderCounters,
    #[serde(default)]
    pub followups: FollowupSweepCounters,
}

impl RunCounters {
    pub fn merge(&mut self, other: &RunCounters) {
        self.tenants += other.tenants;
        self.tenants_failed += other.tenants_failed;
        self.sweep.merge(&other.sweep);
        self.reminders.merge(&other.reminders);
        self.followups.merge(&other.followups);
    }
}

/// Immutable record of one scheduler or CLI pass. The table rejects updates and deletes.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RunLogEntry {
    pub id: Uuid,
    pub command: String,
    pub as_of: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    pub counters: Json<RunCounters>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRunLogEntry {
    pub command: String,
    pub as_of: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    pub counters: RunCounters,
    pub error: Option<String>,
}

pub async fn append<'c, E>(executor: E, entry: &NewRunLogEntry) -> Result<RunLogEntry, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, RunLogEntry>(
        r#"
        INSERT INTO run_log (
            id,
            command,
            as_of,
            started_at,
            finished_at,
            succeeded,
            counters,
            error
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&entry.command)
    .bind(entry.as_of)
    .bind(entry.started_at)
    .bind(entry.finished_at)
    .bind(entry.succeeded)
    .bind(Json(&entry.counters))
    .bind(&entry.error)
    .fetch_one(executor)
    .await
}

pub async fn recent<'c, E>(executor: E, limit: i64) -> Result<Vec<RunLogEntry>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, RunLogEntry>(
        "SELECT * FROM run_log ORDER BY started_at DESC, id DESC LIMIT $1",
    )
    .bind(limit.clamp(1, 500))
    .fetch_all(executor)
    .await
}
