pub mod api;
pub mod machine;
pub mod models;
pub mod service;

pub use machine::{
    apply_call, apply_cancel, apply_derived, can_transition, ensure_transition,
    evaluate_derived, CollectionsPolicy, DerivedTransition, FollowupError,
};
pub use models::{
    CallOutcome, CancelRequest, Followup, FollowupCall, FollowupStatus, LogCallRequest,
};
pub use service::{FollowupService, FollowupSweepCounters};
