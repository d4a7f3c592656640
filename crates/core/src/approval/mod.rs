//! Approval workflow engine.
//!
//! Rules intercept a named operation on a named record type whenever their
//! condition holds, route the call through ordered approval steps and replay
//! it once every step has approved.
//!
//! # Modules
//!
//! - `types` - Lifecycle states, approver kinds, record snapshots
//! - `condition` - Rule condition language
//! - `rule` - Rules, steps and their drafts
//! - `request` - Requests, decision log, transition commits
//! - `registry` - Approvable operations and installed guards
//! - `store` - Persistence contract
//! - `memory` - In-memory store
//! - `notify` - Notification sink contract and implementations
//! - `matcher` - Rule ordering, matching and step order
//! - `transition` - Request state machine
//! - `engine` - Engine handle, rule administration, queries
//! - `gate` - Interception of guarded calls
//! - `service` - Approve, reject, cancel
//! - `resume` - Replay after final approval

pub mod condition;
pub mod engine;
pub mod error;
pub mod gate;
pub mod matcher;
pub mod memory;
pub mod notify;
pub mod registry;
pub mod request;
pub mod resume;
pub mod rule;
pub mod service;
pub mod store;
pub mod transition;
pub mod types;

#[cfg(test)]
mod condition_props;
#[cfg(test)]
mod transition_props;

pub use condition::{Condition, ConditionError};
pub use engine::ApprovalEngine;
pub use error::{ApprovalError, CreatedRequest};
pub use matcher::RuleMatcher;
pub use memory::InMemoryStore;
pub use notify::{
    MemoryNotifier, NotificationEvent, NotificationSink, NotifyError, NotifyTarget, Reminder,
    TracingNotifier,
};
pub use registry::{
    ApprovableOperation, GuardedOperation, InstallReport, OperationError, OperationKey,
    OperationRegistry, RecordSource,
};
pub use request::{Request, RequestLog, TransitionCommit};
pub use resume::{Resumption, ResumptionFailure};
pub use rule::{Rule, RuleDraft, Step, StepDraft};
pub use service::ApproveOutcome;
pub use store::{ApprovalStore, RequestFilter, RuleFilter, StoreError};
pub use transition::{RequestTransitions, Transition};
pub use types::{ApproverKind, CallContext, Decision, Record, RecordRef, RequestState};
