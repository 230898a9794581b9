use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::models::{IdempotencyKey, IdempotencyRecord};

// key: idempotency-ledger -> claim, then act, then finalize
//
// The unique constraint on the natural key is the only guard against duplicate
// emission. A claim is a plain insert that yields nothing when the key exists.

pub async fn claim<'c, E>(
    executor: E,
    key: &IdempotencyKey,
    obligation_id: Uuid,
) -> Result<Option<IdempotencyRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, IdempotencyRecord>(
        r#"
        INSERT INTO idempotency_ledger (
            id,
            tenant_id,
            subscriber_id,
            billable_item_id,
            due_date,
            obligation_id,
            status
        ) VALUES ($1, $2, $3, $4, $5, $6, 'claimed')
        ON CONFLICT ON CONSTRAINT idempotency_ledger_natural_key DO NOTHING
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(key.tenant_id)
    .bind(key.subscriber_id)
    .bind(key.billable_item_id)
    .bind(key.due_date)
    .bind(obligation_id)
    .fetch_optional(executor)
    .await
}

pub async fn find<'c, E>(
    executor: E,
    key: &IdempotencyKey,
) -> Result<Option<IdempotencyRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, IdempotencyRecord>(
        r#"
        SELECT * FROM idempotency_ledger
        WHERE tenant_id = $1
          AND subscriber_id = $2
          AND billable_item_id = $3
          AND due_date = $4
        "#,
    )
    .bind(key.tenant_id)
    .bind(key.subscriber_id)
    .bind(key.billable_item_id)
    .bind(key.due_date)
    .fetch_optional(executor)
    .await
}

/// Stores the created document; a record that already points at a document is never rewritten.
pub async fn attach_document<'c, E>(
    executor: E,
    record_id: Uuid,
    document_id: Uuid,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        UPDATE idempotency_ledger
        SET
            document_id = $2,
            status = 'emitted',
            last_error = NULL,
            emitted_at = NOW()
        WHERE id = $1
          AND document_id IS NULL
        RETURNING id
        "#,
    )
    .bind(record_id)
    .bind(document_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}

pub async fn mark_document_failed<'c, E>(
    executor: E,
    record_id: Uuid,
    error: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        UPDATE idempotency_ledger
        SET
            status = 'document_failed',
            last_error = $2
        WHERE id = $1
          AND document_id IS NULL
        RETURNING id
        "#,
    )
    .bind(record_id)
    .bind(error)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}

/// Adds `stage` to the reminders-sent set of the record that emitted `document_id`.
pub async fn record_reminder<'c, E>(
    executor: E,
    document_id: Uuid,
    stage: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        UPDATE idempotency_ledger
        SET reminders_sent = array_append(reminders_sent, $2)
        WHERE document_id = $1
          AND NOT ($2 = ANY(reminders_sent))
        RETURNING id
        "#,
    )
    .bind(document_id)
    .bind(stage)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}

/// Claimed keys whose document was never created; these need reconciliation.
pub async fn list_unreconciled<'c, E>(
    executor: E,
    tenant_id: Uuid,
) -> Result<Vec<IdempotencyRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, IdempotencyRecord>(
        r#"
        SELECT * FROM idempotency_ledger
        WHERE tenant_id = $1
          AND document_id IS NULL
        ORDER BY claimed_at ASC
        "#,
    )
    .bind(tenant_id)
    .fetch_all(executor)
    .await
}
