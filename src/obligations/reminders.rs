use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collaborators::{BillingDocument, NotificationRequest, OverdueStage};
use crate::communication_log;
use crate::config::SweepPolicy;
use crate::context::{EngineContext, RunClock};

use super::ledger;
use super::models::{ObligationKind, RecurringObligation};
use super::store;

/// key: reminder-engine -> notification kinds for upcoming obligations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    Upcoming,
    DueToday,
    PastDue,
}

impl ReminderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::Upcoming => "reminder",
            ReminderKind::DueToday => "due_today",
            ReminderKind::PastDue => "overdue",
        }
    }

    pub fn template(&self, kind: ObligationKind) -> String {
        format!("{}_{}", kind.as_str(), self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReminderCounters {
    pub reminders_sent: u64,
    pub reminders_failed: u64,
    pub reminders_throttled: u64,
    pub stages_advanced: u64,
    pub stage_notifications_sent: u64,
    pub stage_notifications_failed: u64,
    pub errors: u64,
}

impl ReminderCounters {
    pub fn merge(&mut self, other: &ReminderCounters) {
        self.reminders_sent += other.reminders_sent;
        self.reminders_failed += other.reminders_failed;
        self.reminders_throttled += other.reminders_throttled;
        self.stages_advanced += other.stages_advanced;
        self.stage_notifications_sent += other.stage_notifications_sent;
        self.stage_notifications_failed += other.stage_notifications_failed;
        self.errors += other.errors;
    }
}

pub fn days_remaining(due_date: NaiveDate, as_of: NaiveDate) -> i64 {
    (due_date - as_of).num_days()
}

/// Reminder to send for `obligation` on `as_of`, if any.
///
/// Fires once the due date is within `remind_days_before` days, at most once per
/// calendar day: a reminder stamped on `as_of` (or later) suppresses another.
pub fn reminder_due(obligation: &RecurringObligation, as_of: NaiveDate) -> Option<ReminderKind> {
    if !obligation.is_active {
        return None;
    }
    let window = i64::from(obligation.remind_days_before?);
    let remaining = days_remaining(obligation.next_due_date, as_of);
    if remaining > window {
        return None;
    }
    if let Some(last) = obligation.last_reminder_sent_at {
        if last.date_naive() >= as_of {
            return None;
        }
    }
    Some(match remaining {
        r if r > 0 => ReminderKind::Upcoming,
        0 => ReminderKind::DueToday,
        _ => ReminderKind::PastDue,
    })
}

/// Highest overdue stage a document due on `due_date` qualifies for on `as_of`.
pub fn target_stage(due_date: NaiveDate, as_of: NaiveDate, policy: &SweepPolicy) -> Option<OverdueStage> {
    let remaining = days_remaining(due_date, as_of);
    if remaining < 0 {
        if -remaining >= policy.overdue_escalation_days {
            Some(OverdueStage::Escalated)
        } else {
            Some(OverdueStage::Overdue)
        }
    } else if remaining <= policy.document_reminder_days_before {
        Some(OverdueStage::ReminderSent)
    } else {
        None
    }
}

/// Stage to move to, only when it is ahead of `current`. Stages never regress, even
/// when the due date has since moved later.
pub fn next_stage(
    current: Option<OverdueStage>,
    due_date: NaiveDate,
    as_of: NaiveDate,
    policy: &SweepPolicy,
) -> Option<OverdueStage> {
    let target = target_stage(due_date, as_of, policy)?;
    match current {
        Some(current) if current >= target => None,
        _ => Some(target),
    }
}

/// key: reminder-engine -> obligation reminders with a daily throttle
pub async fn remind_obligations(
    ctx: &EngineContext,
    tenant_id: Uuid,
    clock: RunClock,
) -> Result<ReminderCounters> {
    let candidates = store::list_reminder_candidates(&ctx.pool, tenant_id)
        .await
        .with_context(|| format!("failed to load reminder candidates for tenant {tenant_id}"))?;

    let mut counters = ReminderCounters::default();
    for obligation in candidates {
        let Some(kind) = reminder_due(&obligation, clock.as_of) else {
            continue;
        };

        match store::claim_reminder_slot(&ctx.pool, obligation.id, clock.as_of, clock.stamp()).await
        {
            Ok(true) => {}
            Ok(false) => {
                counters.reminders_throttled += 1;
                debug!(obligation_id = %obligation.id, "reminder already sent today");
                continue;
            }
            Err(err) => {
                counters.errors += 1;
                warn!(?err, obligation_id = %obligation.id, "failed to stamp reminder throttle");
                continue;
            }
        }

        let request = NotificationRequest {
            tenant_id,
            subject_kind: "obligation",
            subject_id: obligation.id,
            channel: obligation
                .notify_channel
                .clone()
                .unwrap_or_else(|| ctx.policy.default_channel.clone()),
            recipient: obligation.subscriber_id.to_string(),
            template: kind.template(obligation.kind()),
            context: json!({
                "obligation_id": obligation.id,
                "kind": obligation.kind().as_str(),
                "billable_item_id": obligation.billable_item_id,
                "due_date": obligation.next_due_date,
                "days_remaining": days_remaining(obligation.next_due_date, clock.as_of),
                "cycle": obligation.cycle,
            }),
        };

        match communication_log::deliver(&ctx.pool, ctx.notifier.as_ref(), &request).await {
            Ok(status) if status.is_sent() => counters.reminders_sent += 1,
            Ok(_) => counters.reminders_failed += 1,
            Err(err) => {
                counters.errors += 1;
                warn!(?err, obligation_id = %obligation.id, "failed to record reminder delivery");
            }
        }
    }

    Ok(counters)
}

/// key: reminder-engine -> overdue staging for unpaid billing documents
pub async fn stage_documents(
    ctx: &EngineContext,
    documents: &[BillingDocument],
    clock: RunClock,
) -> ReminderCounters {
    let mut counters = ReminderCounters::default();
    for document in documents {
        let Some(stage) = next_stage(
            document.overdue_stage,
            document.due_date,
            clock.as_of,
            &ctx.policy,
        ) else {
            continue;
        };

        match ctx.billing.advance_overdue_stage(document.id, stage).await {
            Ok(true) => counters.stages_advanced += 1,
            Ok(false) => continue,
            Err(err) => {
                counters.errors += 1;
                warn!(?err, document_id = %document.id, stage = stage.as_str(), "failed to advance overdue stage");
                continue;
            }
        }

        let request = NotificationRequest {
            tenant_id: document.tenant_id,
            subject_kind: "document",
            subject_id: document.id,
            channel: ctx.policy.default_channel.clone(),
            recipient: document.client_id.to_string(),
            template: stage.template().to_string(),
            context: json!({
                "document_id": document.id,
                "due_date": document.due_date,
                "days_overdue": -days_remaining(document.due_date, clock.as_of),
                "balance_cents": document.balance_cents,
                "stage": stage.as_str(),
            }),
        };

        match communication_log::deliver(&ctx.pool, ctx.notifier.as_ref(), &request).await {
            Ok(status) if status.is_sent() => {
                counters.stage_notifications_sent += 1;
                if let Err(err) = ledger::record_reminder(&ctx.pool, document.id, stage.as_str()).await {
                    counters.errors += 1;
                    warn!(?err, document_id = %document.id, "failed to record reminder in ledger");
                }
            }
            Ok(_) => counters.stage_notifications_failed += 1,
            Err(err) => {
                counters.errors += 1;
                warn!(?err, document_id = %document.id, "failed to record stage notification");
            }
        }
    }
    counters
}
