//! Transition table for collections follow-ups.
//!
//! Explicit transitions (a logged call, a cancellation) and derived transitions
//! (balance settled, promise lapsed) both produce the next record through
//! [`ensure_transition`], so neither path can reach a state the table forbids.

use chrono::{DateTime, Days, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::collaborators::CollaboratorError;

use super::models::{CallOutcome, CancelRequest, Followup, FollowupStatus, LogCallRequest};

#[derive(Debug, Error)]
pub enum FollowupError {
    #[error("followup {0} not found")]
    NotFound(Uuid),
    #[error("followup is {status} and closed to further actions: {reason}")]
    Terminal {
        status: FollowupStatus,
        reason: &'static str,
    },
    #[error("followup cannot move from {from} to {to}")]
    InvalidTransition {
        from: FollowupStatus,
        to: FollowupStatus,
    },
    #[error("followup was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict { expected: i64, actual: i64 },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// key: collections-policy -> escalation threshold + reschedule backoff
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionsPolicy {
    pub escalation_call_threshold: i32,
    pub backoff_days: Vec<i64>,
}

impl Default for CollectionsPolicy {
    fn default() -> Self {
        Self {
            escalation_call_threshold: 3,
            backoff_days: vec![1, 3, 7],
        }
    }
}

impl CollectionsPolicy {
    /// Days until the next call after the `call_count`-th unproductive call.
    pub fn backoff_for(&self, call_count: i32) -> i64 {
        let index = usize::try_from(call_count.max(1) - 1).unwrap_or(0);
        self.backoff_days
            .get(index)
            .or_else(|| self.backoff_days.last())
            .copied()
            .unwrap_or(1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DerivedTransition {
    Fulfilled,
    Broken,
}

impl DerivedTransition {
    pub fn target(&self) -> FollowupStatus {
        match self {
            DerivedTransition::Fulfilled => FollowupStatus::Fulfilled,
            DerivedTransition::Broken => FollowupStatus::Broken,
        }
    }
}

pub fn can_transition(from: FollowupStatus, to: FollowupStatus) -> bool {
    use FollowupStatus::*;
    match (from, to) {
        (Fulfilled | Cancelled, _) => false,
        (_, Cancelled | Fulfilled) => true,
        (Pending | Open | Broken, Open) => true,
        (Pending | Open | Broken | Escalated, Escalated) => true,
        (Open, Broken) => true,
        _ => false,
    }
}

pub fn ensure_transition(current: &Followup, to: FollowupStatus) -> Result<(), FollowupError> {
    if current.status.is_terminal() {
        return Err(FollowupError::Terminal {
            status: current.status,
            reason: current.status.closure_reason(),
        });
    }
    if !can_transition(current.status, to) {
        return Err(FollowupError::InvalidTransition {
            from: current.status,
            to,
        });
    }
    Ok(())
}

fn ensure_open_for_actions(current: &Followup) -> Result<(), FollowupError> {
    if current.status.is_terminal() {
        return Err(FollowupError::Terminal {
            status: current.status,
            reason: current.status.closure_reason(),
        });
    }
    Ok(())
}

/// Next record after a logged call. `current` is never modified.
pub fn apply_call(
    current: &Followup,
    call: &LogCallRequest,
    as_of: NaiveDate,
    now: DateTime<Utc>,
    policy: &CollectionsPolicy,
) -> Result<Followup, FollowupError> {
    ensure_open_for_actions(current)?;

    let notes = call.notes.trim();
    if notes.is_empty() {
        return Err(FollowupError::Validation(
            "notes are required when logging a call".to_string(),
        ));
    }
    if let Some(override_date) = call.next_followup {
        if override_date < as_of {
            return Err(FollowupError::Validation(format!(
                "next_followup {override_date} is before {as_of}"
            )));
        }
    }

    let mut next = current.clone();
    next.outcome = Some(call.outcome);
    next.notes = Some(notes.to_string());
    next.last_called_at = Some(now);

    if call.outcome.is_commitment() {
        let promise_date = call.promise_date.ok_or_else(|| {
            FollowupError::Validation(format!(
                "promise_date is required for a {} outcome",
                call.outcome.as_str()
            ))
        })?;
        if promise_date < as_of {
            return Err(FollowupError::Validation(format!(
                "promise_date {promise_date} is before {as_of}"
            )));
        }
        match call.promise_amount_cents {
            Some(amount) if amount <= 0 => {
                return Err(FollowupError::Validation(
                    "promise_amount_cents must be positive".to_string(),
                ))
            }
            None if call.outcome == CallOutcome::Promised => {
                return Err(FollowupError::Validation(
                    "promise_amount_cents is required for a promised outcome".to_string(),
                ))
            }
            _ => {}
        }

        next.promise_date = Some(promise_date);
        next.promise_amount_cents = call.promise_amount_cents;
        next.next_followup = Some(call.next_followup.unwrap_or(promise_date));
        next.status = if current.status == FollowupStatus::Escalated {
            FollowupStatus::Escalated
        } else {
            FollowupStatus::Open
        };
    } else {
        if current
            .promise_date
            .map(|promise_date| promise_date < as_of)
            .unwrap_or(false)
        {
            next.promise_date = None;
            next.promise_amount_cents = None;
        }
        next.call_count = current.call_count + 1;
        let escalate = next.call_count >= policy.escalation_call_threshold
            || current.status == FollowupStatus::Escalated;
        next.status = if escalate {
            FollowupStatus::Escalated
        } else {
            FollowupStatus::Open
        };
        next.next_followup = match call.next_followup {
            Some(date) => Some(date),
            None if escalate => None,
            None => Some(reschedule(as_of, policy.backoff_for(next.call_count))?),
        };
    }

    ensure_transition(current, next.status)?;
    Ok(next)
}

fn reschedule(as_of: NaiveDate, backoff_days: i64) -> Result<NaiveDate, FollowupError> {
    u64::try_from(backoff_days)
        .ok()
        .and_then(|days| as_of.checked_add_days(Days::new(days)))
        .ok_or_else(|| {
            FollowupError::Validation(format!(
                "backoff of {backoff_days} days from {as_of} is out of range"
            ))
        })
}

pub fn apply_cancel(
    current: &Followup,
    request: &CancelRequest,
    now: DateTime<Utc>,
) -> Result<Followup, FollowupError> {
    ensure_transition(current, FollowupStatus::Cancelled)?;

    let mut next = current.clone();
    next.status = FollowupStatus::Cancelled;
    next.next_followup = None;
    next.closed_at = Some(now);
    if let Some(reason) = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
    {
        next.notes = Some(reason.to_string());
    }
    Ok(next)
}

/// Derived transition implied by the invoice balance and the as-of date, if any.
pub fn evaluate_derived(
    current: &Followup,
    balance_cents: i64,
    as_of: NaiveDate,
) -> Option<DerivedTransition> {
    if current.status.is_terminal() {
        return None;
    }
    if balance_cents <= 0 {
        return Some(DerivedTransition::Fulfilled);
    }
    let promise_lapsed = current
        .promise_date
        .map(|promise_date| promise_date < as_of)
        .unwrap_or(false);
    if current.status == FollowupStatus::Open && promise_lapsed {
        return Some(DerivedTransition::Broken);
    }
    None
}

pub fn apply_derived(
    current: &Followup,
    transition: DerivedTransition,
    as_of: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Followup, FollowupError> {
    let target = transition.target();
    ensure_transition(current, target)?;

    let mut next = current.clone();
    next.status = target;
    match transition {
        DerivedTransition::Fulfilled => {
            next.next_followup = None;
            next.closed_at = Some(now);
        }
        DerivedTransition::Broken => {
            next.next_followup = Some(as_of);
        }
    }
    Ok(next)
}
