pub mod ledger;
pub mod models;
pub mod reminders;
pub mod store;
pub mod sweeper;

pub use models::{
    IdempotencyKey, IdempotencyRecord, LedgerStatus, NewObligation, ObligationKind,
    RecurringObligation,
};
pub use reminders::{
    next_stage, reminder_due, remind_obligations, stage_documents, target_stage,
    ReminderCounters, ReminderKind,
};
pub use sweeper::{sweep_tenant, SweepCounters, SweepError};
