//! Approval requests and their decision log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use checkpoint_shared::types::{RecordId, RequestId, RequestLogId, RuleId, StepId, UserId};

use crate::approval::rule::{Rule, Step};
use crate::approval::types::{Decision, RecordRef, RequestState};

/// One approval cycle for one record under one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier for the request.
    pub id: RequestId,
    /// Rule that triggered the request.
    pub rule_id: RuleId,
    /// Rule name at the time the request was loaded.
    pub rule_name: String,
    /// Target record type.
    pub record_type: String,
    /// Target record key.
    pub record_id: RecordId,
    /// User whose call was intercepted.
    pub requested_by: UserId,
    /// When the request was created.
    pub requested_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: RequestState,
    /// Step waiting for a decision; `None` once resolved.
    pub current_step: Option<Step>,
    /// Arguments of the intercepted call, replayed on resumption.
    pub call_args: Value,
}

impl Request {
    /// Opens a pending request for `record_id` at the rule's first step.
    #[must_use]
    pub fn open(
        rule: &Rule,
        first_step: Step,
        record_id: RecordId,
        requested_by: UserId,
        call_args: Value,
    ) -> Self {
        Self {
            id: RequestId::new(),
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            record_type: rule.record_type.clone(),
            record_id,
            requested_by,
            requested_at: Utc::now(),
            state: RequestState::Pending,
            current_step: Some(first_step),
            call_args,
        }
    }

    /// Display name, e.g. `BigExpense for expense/7`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{} for {}", self.rule_name, self.target())
    }

    /// The record this request is about.
    #[must_use]
    pub fn target(&self) -> RecordRef {
        RecordRef::new(self.record_type.clone(), self.record_id)
    }

    /// Returns true while the request waits on an approver.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == RequestState::Pending
    }

    /// Display name of the current step, or `-` once resolved.
    #[must_use]
    pub fn current_step_name(&self) -> String {
        self.current_step
            .as_ref()
            .map_or_else(|| "-".to_string(), Step::display_name)
    }

    /// Checks the pending ⇔ current-step invariant.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.is_pending() == self.current_step.is_some()
    }
}

/// Immutable record of one decision on a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLog {
    /// Unique identifier for the entry.
    pub id: RequestLogId,
    /// Request decided on.
    pub request_id: RequestId,
    /// Step the decision was made at.
    pub step_id: Option<StepId>,
    /// Approved or rejected.
    pub decision: Decision,
    /// Acting user.
    pub decided_by: UserId,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
    /// Optional free-text reason.
    pub reason: Option<String>,
}

impl RequestLog {
    /// Records a decision at the request's current step.
    #[must_use]
    pub fn record(
        request: &Request,
        decision: Decision,
        decided_by: UserId,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: RequestLogId::new(),
            request_id: request.id,
            step_id: request.current_step.as_ref().map(|s| s.id),
            decision,
            decided_by,
            decided_at: Utc::now(),
            reason,
        }
    }
}

/// A state change to apply atomically to a pending request.
///
/// Stores apply it only while the request is still pending at
/// `expected_step`; otherwise they report the request as stale.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionCommit {
    /// Request to update.
    pub request_id: RequestId,
    /// Step the decision was made against.
    pub expected_step: StepId,
    /// New lifecycle state.
    pub state: RequestState,
    /// New current step (`Some` only when staying pending).
    pub current_step: Option<Step>,
    /// Log entry appended in the same unit of work.
    pub log: Option<RequestLog>,
}
