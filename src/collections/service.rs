use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, PgPool, Postgres};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborators::{BillingCollaborator, BillingDocument, CollaboratorError};
use crate::context::{EngineContext, RunClock};

use super::machine::{
    apply_call, apply_cancel, apply_derived, evaluate_derived, CollectionsPolicy,
    DerivedTransition, FollowupError,
};
use super::models::{CancelRequest, Followup, FollowupCall, LogCallRequest};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowupSweepCounters {
    pub followups_opened: u64,
    pub followups_fulfilled: u64,
    pub followups_broken: u64,
    pub version_conflicts: u64,
    pub errors: u64,
}

impl FollowupSweepCounters {
    pub fn merge(&mut self, other: &FollowupSweepCounters) {
        self.followups_opened += other.followups_opened;
        self.followups_fulfilled += other.followups_fulfilled;
        self.followups_broken += other.followups_broken;
        self.version_conflicts += other.version_conflicts;
        self.errors += other.errors;
    }
}

/// key: followup-service -> persisted collections workflow
#[derive(Clone)]
pub struct FollowupService {
    pool: PgPool,
    billing: Arc<dyn BillingCollaborator>,
    policy: CollectionsPolicy,
}

impl FollowupService {
    pub fn new(
        pool: PgPool,
        billing: Arc<dyn BillingCollaborator>,
        policy: CollectionsPolicy,
    ) -> Self {
        Self {
            pool,
            billing,
            policy,
        }
    }

    pub fn from_context(ctx: &EngineContext) -> Self {
        Self::new(
            ctx.pool.clone(),
            ctx.billing.clone(),
            ctx.policy.collections.clone(),
        )
    }

    pub async fn get(&self, id: Uuid) -> Result<Followup, FollowupError> {
        fetch(&self.pool, id)
            .await?
            .ok_or(FollowupError::NotFound(id))
    }

    pub async fn history(&self, id: Uuid) -> Result<Vec<FollowupCall>, FollowupError> {
        let calls = sqlx::query_as::<_, FollowupCall>(
            "SELECT * FROM followup_calls WHERE followup_id = $1 ORDER BY logged_at ASC, id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(calls)
    }

    /// Applies a logged call under a row lock and the caller's expected version, then
    /// appends it to the call history in the same transaction.
    pub async fn log_call(
        &self,
        id: Uuid,
        call: &LogCallRequest,
        clock: RunClock,
    ) -> Result<Followup, FollowupError> {
        let mut tx = self.pool.begin().await?;

        let current = fetch_for_update(&mut *tx, id)
            .await?
            .ok_or(FollowupError::NotFound(id))?;
        check_version(&current, call.expected_version)?;

        let next = apply_call(&current, call, clock.as_of, clock.now, &self.policy)?;
        let saved = persist(&mut *tx, &next, current.version)
            .await?
            .ok_or(FollowupError::VersionConflict {
                expected: current.version,
                actual: current.version + 1,
            })?;

        sqlx::query(
            r#"
            INSERT INTO followup_calls (
                id,
                followup_id,
                tenant_id,
                outcome,
                notes,
                promise_date,
                promise_amount_cents,
                status_after,
                call_count_after,
                logged_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(saved.id)
        .bind(saved.tenant_id)
        .bind(call.outcome.as_str())
        .bind(call.notes.trim())
        .bind(call.promise_date)
        .bind(call.promise_amount_cents)
        .bind(saved.status.as_str())
        .bind(saved.call_count)
        .bind(clock.now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            followup_id = %saved.id,
            outcome = call.outcome.as_str(),
            status = saved.status.as_str(),
            call_count = saved.call_count,
            "followup call logged"
        );
        Ok(saved)
    }

    pub async fn cancel(
        &self,
        id: Uuid,
        request: &CancelRequest,
        now: DateTime<Utc>,
    ) -> Result<Followup, FollowupError> {
        let mut tx = self.pool.begin().await?;

        let current = fetch_for_update(&mut *tx, id)
            .await?
            .ok_or(FollowupError::NotFound(id))?;
        check_version(&current, request.expected_version)?;

        let next = apply_cancel(&current, request, now)?;
        let saved = persist(&mut *tx, &next, current.version)
            .await?
            .ok_or(FollowupError::VersionConflict {
                expected: current.version,
                actual: current.version + 1,
            })?;
        tx.commit().await?;

        info!(followup_id = %saved.id, "followup cancelled");
        Ok(saved)
    }

    /// Active follow-ups whose next call is due on or before `as_of`, plus escalated
    /// records awaiting manual handling.
    pub async fn due_queue(
        &self,
        tenant_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Vec<Followup>, FollowupError> {
        let rows = sqlx::query_as::<_, Followup>(
            r#"
            SELECT * FROM followups
            WHERE tenant_id = $1
              AND status NOT IN ('fulfilled', 'cancelled')
              AND (
                    next_followup <= $2
                 OR (status = 'escalated' AND next_followup IS NULL)
              )
            ORDER BY next_followup ASC NULLS LAST, created_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Opens a pending follow-up for each document more than `grace_days` overdue
    /// with an outstanding balance. A document gets at most one follow-up ever.
    pub async fn open_for_overdue(
        &self,
        tenant_id: Uuid,
        documents: &[BillingDocument],
        as_of: NaiveDate,
        grace_days: i64,
    ) -> Result<u64, FollowupError> {
        let mut opened = 0;
        for document in documents {
            if document.tenant_id != tenant_id || document.balance_cents <= 0 {
                continue;
            }
            if (as_of - document.due_date).num_days() <= grace_days {
                continue;
            }

            let result = sqlx::query(
                r#"
                INSERT INTO followups (
                    id,
                    tenant_id,
                    document_id,
                    client_id,
                    status,
                    next_followup
                ) VALUES ($1, $2, $3, $4, 'pending', $5)
                ON CONFLICT ON CONSTRAINT followups_document_key DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(document.id)
            .bind(document.client_id)
            .bind(as_of)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                opened += 1;
                info!(%tenant_id, document_id = %document.id, "followup opened");
            }
        }
        Ok(opened)
    }

    /// Applies balance-driven transitions: settled invoices close their follow-ups and
    /// lapsed promises mark open follow-ups broken.
    pub async fn sweep_derived(
        &self,
        tenant_id: Uuid,
        clock: RunClock,
    ) -> Result<FollowupSweepCounters, FollowupError> {
        let active = sqlx::query_as::<_, Followup>(
            r#"
            SELECT * FROM followups
            WHERE tenant_id = $1 AND status NOT IN ('fulfilled', 'cancelled')
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counters = FollowupSweepCounters::default();
        for followup in active {
            let balance = match self.billing.get_balance(followup.document_id).await {
                Ok(balance) => balance,
                Err(CollaboratorError::DocumentNotFound(document_id)) => {
                    counters.errors += 1;
                    warn!(followup_id = %followup.id, %document_id, "followup document missing");
                    continue;
                }
                Err(err) => {
                    counters.errors += 1;
                    warn!(?err, followup_id = %followup.id, "failed to read document balance");
                    continue;
                }
            };

            let Some(transition) = evaluate_derived(&followup, balance, clock.as_of) else {
                continue;
            };
            let next = apply_derived(&followup, transition, clock.as_of, clock.now)?;

            match persist(&self.pool, &next, followup.version).await {
                Ok(Some(saved)) => {
                    match transition {
                        DerivedTransition::Fulfilled => counters.followups_fulfilled += 1,
                        DerivedTransition::Broken => counters.followups_broken += 1,
                    }
                    info!(
                        followup_id = %saved.id,
                        status = saved.status.as_str(),
                        "followup transitioned"
                    );
                }
                Ok(None) => {
                    counters.version_conflicts += 1;
                    warn!(followup_id = %followup.id, "followup changed during sweep");
                }
                Err(err) => {
                    counters.errors += 1;
                    warn!(?err, followup_id = %followup.id, "failed to persist followup transition");
                }
            }
        }
        Ok(counters)
    }
}

fn check_version(current: &Followup, expected: Option<i64>) -> Result<(), FollowupError> {
    match expected {
        Some(expected) if expected != current.version => Err(FollowupError::VersionConflict {
            expected,
            actual: current.version,
        }),
        _ => Ok(()),
    }
}

async fn fetch<'c, E>(executor: E, id: Uuid) -> Result<Option<Followup>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, Followup>("SELECT * FROM followups WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

async fn fetch_for_update<'c, E>(executor: E, id: Uuid) -> Result<Option<Followup>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, Followup>("SELECT * FROM followups WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// Writes `next` only if the stored row is still at `expected_version`.
async fn persist<'c, E>(
    executor: E,
    next: &Followup,
    expected_version: i64,
) -> Result<Option<Followup>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, Followup>(
        r#"
        UPDATE followups
        SET status = $3,
            call_count = $4,
            outcome = $5,
            promise_date = $6,
            promise_amount_cents = $7,
            next_followup = $8,
            notes = $9,
            last_called_at = $10,
            closed_at = $11,
            version = version + 1,
            updated_at = NOW()
        WHERE id = $1 AND version = $2
        RETURNING *
        "#,
    )
    .bind(next.id)
    .bind(expected_version)
    .bind(next.status.as_str())
    .bind(next.call_count)
    .bind(next.outcome.map(|outcome| outcome.as_str()))
    .bind(next.promise_date)
    .bind(next.promise_amount_cents)
    .bind(next.next_followup)
    .bind(&next.notes)
    .bind(next.last_called_at)
    .bind(next.closed_at)
    .fetch_optional(executor)
    .await
}
