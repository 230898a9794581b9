use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::models::{NewObligation, RecurringObligation};

// key: obligation-store -> persistence for recurring obligations

pub async fn insert<'c, E>(
    executor: E,
    input: &NewObligation,
) -> Result<RecurringObligation, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, RecurringObligation>(
        r#"
        INSERT INTO recurring_obligations (
            id,
            tenant_id,
            kind,
            subscriber_id,
            billable_item_id,
            cycle,
            next_due_date,
            remind_days_before,
            notify_channel,
            amount_cents
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(input.tenant_id)
    .bind(input.kind.as_str())
    .bind(input.subscriber_id)
    .bind(input.billable_item_id)
    .bind(input.cycle.as_str())
    .bind(input.next_due_date)
    .bind(input.remind_days_before)
    .bind(input.notify_channel.as_deref())
    .bind(input.amount_cents)
    .fetch_one(executor)
    .await
}

pub async fn get<'c, E>(executor: E, id: Uuid) -> Result<Option<RecurringObligation>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, RecurringObligation>("SELECT * FROM recurring_obligations WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn active_tenants<'c, E>(executor: E) -> Result<Vec<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        SELECT tenant_id FROM recurring_obligations WHERE is_active
        UNION
        SELECT tenant_id FROM followups WHERE status NOT IN ('fulfilled', 'cancelled')
        "#,
    )
    .fetch_all(executor)
    .await
}

pub async fn list_due<'c, E>(
    executor: E,
    tenant_id: Uuid,
    as_of: NaiveDate,
) -> Result<Vec<RecurringObligation>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, RecurringObligation>(
        r#"
        SELECT * FROM recurring_obligations
        WHERE tenant_id = $1
          AND is_active
          AND next_due_date <= $2
        ORDER BY next_due_date ASC, id ASC
        "#,
    )
    .bind(tenant_id)
    .bind(as_of)
    .fetch_all(executor)
    .await
}

pub async fn list_reminder_candidates<'c, E>(
    executor: E,
    tenant_id: Uuid,
) -> Result<Vec<RecurringObligation>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, RecurringObligation>(
        r#"
        SELECT * FROM recurring_obligations
        WHERE tenant_id = $1
          AND is_active
          AND remind_days_before IS NOT NULL
        ORDER BY next_due_date ASC, id ASC
        "#,
    )
    .bind(tenant_id)
    .fetch_all(executor)
    .await
}

/// Moves `next_due_date` from `from` to `to`; a no-op when another writer already moved it.
pub async fn advance_due_date<'c, E>(
    executor: E,
    id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        UPDATE recurring_obligations
        SET next_due_date = $3, updated_at = NOW()
        WHERE id = $1
          AND is_active
          AND next_due_date = $2
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(from)
    .bind(to)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}

pub async fn deactivate<'c, E>(executor: E, id: Uuid, due_date: NaiveDate) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        UPDATE recurring_obligations
        SET is_active = FALSE, updated_at = NOW()
        WHERE id = $1
          AND is_active
          AND next_due_date = $2
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(due_date)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}

/// Stamps the daily reminder throttle. Returns `false` when a reminder was already
/// stamped for `as_of` (or a later day), in which case nothing must be sent.
pub async fn claim_reminder_slot<'c, E>(
    executor: E,
    id: Uuid,
    as_of: NaiveDate,
    sent_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        UPDATE recurring_obligations
        SET last_reminder_sent_at = $3, updated_at = NOW()
        WHERE id = $1
          AND is_active
          AND (
            last_reminder_sent_at IS NULL
            OR (last_reminder_sent_at AT TIME ZONE 'UTC')::date < $2
          )
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(as_of)
    .bind(sent_at)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}
