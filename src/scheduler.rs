use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::{stream, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collections::FollowupService;
use crate::config;
use crate::context::{EngineContext, RunClock};
use crate::obligations::{self, store};
use crate::run_log::{self, NewRunLogEntry, RunCounters, RunLogEntry};

/// key: sweep-scheduler -> periodic passes, disabled when the interval is zero
pub fn spawn(ctx: EngineContext) -> Option<JoinHandle<()>> {
    let interval_secs = *config::SWEEP_INTERVAL_SECS;
    if interval_secs == 0 {
        info!("in-process sweep scheduler disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            if let Err(err) = run_pass(&ctx, RunClock::now(), "scheduler").await {
                warn!(?err, "sweep pass failed");
            }
        }
    }))
}

struct TenantOutcome {
    counters: RunCounters,
    errors: Vec<String>,
}

/// key: sweep-scheduler -> one pass over every tenant with work, recorded in the run log
///
/// Tenants run concurrently up to the configured pool size; each tenant is a single
/// unit of work, so no two workers touch the same tenant in one pass. A failing tenant
/// is recorded and the rest still complete. Only a failure to enumerate tenants aborts
/// the pass.
pub async fn run_pass(ctx: &EngineContext, clock: RunClock, command: &str) -> Result<RunLogEntry> {
    let started_at = Utc::now();

    let tenants = match collect_tenants(ctx).await {
        Ok(tenants) => tenants,
        Err(err) => {
            let entry = NewRunLogEntry {
                command: command.to_string(),
                as_of: clock.as_of,
                started_at,
                finished_at: Utc::now(),
                succeeded: false,
                counters: RunCounters::default(),
                error: Some(format!("{err:#}")),
            };
            if let Err(log_err) = run_log::append(&ctx.pool, &entry).await {
                warn!(?log_err, "failed to record aborted pass");
            }
            return Err(err);
        }
    };

    let pool_size = ctx.policy.worker_pool_size.max(1);
    let outcomes: Vec<(Uuid, TenantOutcome)> = stream::iter(tenants)
        .map(|tenant_id| {
            let ctx = ctx.clone();
            async move { (tenant_id, run_tenant(&ctx, tenant_id, clock).await) }
        })
        .buffer_unordered(pool_size)
        .collect()
        .await;

    let mut counters = RunCounters::default();
    let mut failures = Vec::new();
    for (tenant_id, outcome) in outcomes {
        counters.merge(&outcome.counters);
        if !outcome.errors.is_empty() {
            failures.push(format!("tenant {tenant_id}: {}", outcome.errors.join("; ")));
        }
    }

    let entry = NewRunLogEntry {
        command: command.to_string(),
        as_of: clock.as_of,
        started_at,
        finished_at: Utc::now(),
        succeeded: failures.is_empty(),
        counters,
        error: if failures.is_empty() {
            None
        } else {
            Some(failures.join("\n"))
        },
    };
    let recorded = run_log::append(&ctx.pool, &entry)
        .await
        .context("failed to append run log entry")?;

    info!(
        run_id = %recorded.id,
        as_of = %recorded.as_of,
        tenants = recorded.counters.tenants,
        tenants_failed = recorded.counters.tenants_failed,
        documents_created = recorded.counters.sweep.documents_created,
        succeeded = recorded.succeeded,
        "sweep pass finished"
    );
    Ok(recorded)
}

/// Tenants with active obligations, open collections work, or unpaid documents.
async fn collect_tenants(ctx: &EngineContext) -> Result<Vec<Uuid>> {
    let mut tenants: BTreeSet<Uuid> = store::active_tenants(&ctx.pool)
        .await
        .context("failed to list tenants with obligations")?
        .into_iter()
        .collect();
    tenants.extend(
        ctx.billing
            .tenants_with_open_documents()
            .await
            .context("failed to list tenants with open documents")?,
    );
    Ok(tenants.into_iter().collect())
}

async fn run_tenant(ctx: &EngineContext, tenant_id: Uuid, clock: RunClock) -> TenantOutcome {
    let mut counters = RunCounters {
        tenants: 1,
        ..Default::default()
    };
    let mut errors = Vec::new();

    match obligations::sweep_tenant(ctx, tenant_id, clock).await {
        Ok(sweep) => counters.sweep = sweep,
        Err(err) => errors.push(format!("{err:#}")),
    }

    let documents = match ctx.billing.open_documents(tenant_id).await {
        Ok(documents) => documents,
        Err(err) => {
            errors.push(format!("failed to load open documents: {err}"));
            Vec::new()
        }
    };

    match obligations::remind_obligations(ctx, tenant_id, clock).await {
        Ok(reminders) => counters.reminders = reminders,
        Err(err) => errors.push(format!("{err:#}")),
    }
    counters
        .reminders
        .merge(&obligations::stage_documents(ctx, &documents, clock).await);

    let followups = FollowupService::from_context(ctx);
    match followups
        .open_for_overdue(tenant_id, &documents, clock.as_of, ctx.policy.followup_grace_days)
        .await
    {
        Ok(opened) => counters.followups.followups_opened += opened,
        Err(err) => errors.push(format!("failed to open followups: {err}")),
    }
    match followups.sweep_derived(tenant_id, clock).await {
        Ok(derived) => counters.followups.merge(&derived),
        Err(err) => errors.push(format!("failed to sweep followups: {err}")),
    }

    if !errors.is_empty() {
        counters.tenants_failed = 1;
        warn!(%tenant_id, errors = ?errors, "tenant pass finished with errors");
    }

    TenantOutcome { counters, errors }
}
