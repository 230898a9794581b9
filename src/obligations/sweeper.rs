use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::DocumentRequest;
use crate::context::{EngineContext, RunClock};
use crate::cycle::{self, Cycle, CycleError};

use super::ledger;
use super::models::{LedgerStatus, RecurringObligation};
use super::store;

/// key: obligation-sweeper -> per-tenant counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepCounters {
    pub obligations_scanned: u64,
    pub documents_created: u64,
    pub already_processed: u64,
    pub awaiting_reconciliation: u64,
    pub obligations_advanced: u64,
    pub obligations_deactivated: u64,
    pub document_failures: u64,
    pub invalid_obligations: u64,
    pub persistence_errors: u64,
    pub superseded: u64,
}

impl SweepCounters {
    pub fn merge(&mut self, other: &SweepCounters) {
        self.obligations_scanned += other.obligations_scanned;
        self.documents_created += other.documents_created;
        self.already_processed += other.already_processed;
        self.awaiting_reconciliation += other.awaiting_reconciliation;
        self.obligations_advanced += other.obligations_advanced;
        self.obligations_deactivated += other.obligations_deactivated;
        self.document_failures += other.document_failures;
        self.invalid_obligations += other.invalid_obligations;
        self.persistence_errors += other.persistence_errors;
        self.superseded += other.superseded;
    }
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("obligation has invalid cycle: {0}")]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// What happened to one due date of an obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Advanced(NaiveDate),
    Deactivated,
    /// The key is consumed without a document, or another writer moved the obligation.
    Halted,
}

/// key: obligation-sweeper -> emit due documents for one tenant
pub async fn sweep_tenant(
    ctx: &EngineContext,
    tenant_id: Uuid,
    clock: RunClock,
) -> Result<SweepCounters> {
    let due = store::list_due(&ctx.pool, tenant_id, clock.as_of)
        .await
        .with_context(|| format!("failed to load due obligations for tenant {tenant_id}"))?;

    let mut counters = SweepCounters::default();
    for obligation in due {
        counters.obligations_scanned += 1;
        if let Err(err) = process_obligation(ctx, &obligation, clock.as_of, &mut counters).await {
            match err {
                SweepError::Cycle(_) => counters.invalid_obligations += 1,
                SweepError::Database(_) => counters.persistence_errors += 1,
            }
            warn!(
                ?err,
                tenant_id = %tenant_id,
                obligation_id = %obligation.id,
                "obligation skipped during sweep"
            );
        }
    }

    Ok(counters)
}

async fn process_obligation(
    ctx: &EngineContext,
    obligation: &RecurringObligation,
    as_of: NaiveDate,
    counters: &mut SweepCounters,
) -> Result<(), SweepError> {
    let cycle = obligation.cycle()?;
    let mut due_date = obligation.next_due_date;

    for _ in 0..ctx.policy.max_catch_up_cycles {
        if due_date > as_of {
            return Ok(());
        }
        match emit_due_date(ctx, obligation, cycle, due_date, counters).await? {
            Step::Advanced(next) => due_date = next,
            Step::Deactivated | Step::Halted => return Ok(()),
        }
    }

    if due_date <= as_of {
        debug!(
            obligation_id = %obligation.id,
            next_due_date = %due_date,
            "catch-up limit reached; remaining due dates carry to the next pass"
        );
    }
    Ok(())
}

async fn emit_due_date(
    ctx: &EngineContext,
    obligation: &RecurringObligation,
    cycle: Cycle,
    due_date: NaiveDate,
    counters: &mut SweepCounters,
) -> Result<Step, SweepError> {
    let key = obligation.idempotency_key(due_date);

    let Some(record) = ledger::claim(&ctx.pool, &key, obligation.id).await? else {
        let existing = ledger::find(&ctx.pool, &key).await?;
        return match existing {
            Some(record) if record.document_id.is_some() => {
                counters.already_processed += 1;
                finalize(ctx, obligation, cycle, due_date, counters).await
            }
            Some(record) if record.status() == LedgerStatus::DocumentFailed => {
                counters.awaiting_reconciliation += 1;
                warn!(
                    obligation_id = %obligation.id,
                    due_date = %due_date,
                    last_error = record.last_error.as_deref().unwrap_or(""),
                    "document creation failed for due date; awaiting reconciliation"
                );
                Ok(Step::Halted)
            }
            Some(_) => {
                counters.already_processed += 1;
                debug!(
                    obligation_id = %obligation.id,
                    due_date = %due_date,
                    "due date claimed by another sweep"
                );
                Ok(Step::Halted)
            }
            None => Ok(Step::Halted),
        };
    };

    let request = DocumentRequest {
        tenant_id: obligation.tenant_id,
        subscriber_id: obligation.subscriber_id,
        billable_item_id: obligation.billable_item_id,
        due_date,
        obligation_id: obligation.id,
        amount_cents: obligation.amount_cents,
    };

    match ctx.billing.create_document(&request).await {
        Ok(document_id) => {
            ledger::attach_document(&ctx.pool, record.id, document_id).await?;
            counters.documents_created += 1;
            info!(
                tenant_id = %obligation.tenant_id,
                obligation_id = %obligation.id,
                document_id = %document_id,
                due_date = %due_date,
                "billing document emitted"
            );
        }
        Err(err) => {
            let detail = err.to_string();
            ledger::mark_document_failed(&ctx.pool, record.id, &detail).await?;
            counters.document_failures += 1;
            warn!(
                ?err,
                obligation_id = %obligation.id,
                due_date = %due_date,
                ledger_status = LedgerStatus::DocumentFailed.as_str(),
                "document creation failed after claim"
            );
            return Ok(Step::Halted);
        }
    }

    finalize(ctx, obligation, cycle, due_date, counters).await
}

/// Advances (or deactivates) the obligation past a due date whose document exists.
async fn finalize(
    ctx: &EngineContext,
    obligation: &RecurringObligation,
    cycle: Cycle,
    due_date: NaiveDate,
    counters: &mut SweepCounters,
) -> Result<Step, SweepError> {
    match cycle::next_due(due_date, cycle)? {
        Some(next) => {
            if store::advance_due_date(&ctx.pool, obligation.id, due_date, next).await? {
                counters.obligations_advanced += 1;
                Ok(Step::Advanced(next))
            } else {
                counters.superseded += 1;
                Ok(Step::Halted)
            }
        }
        None => {
            if store::deactivate(&ctx.pool, obligation.id, due_date).await? {
                counters.obligations_deactivated += 1;
                info!(obligation_id = %obligation.id, "one-off obligation deactivated");
            } else {
                counters.superseded += 1;
            }
            Ok(Step::Deactivated)
        }
    }
}
