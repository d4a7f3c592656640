//! Persistence contract for rules, requests and their logs.

use thiserror::Error;

use checkpoint_shared::types::{GroupId, RecordId, RequestId, RuleId, UserId};

use crate::approval::registry::OperationKey;
use crate::approval::request::{Request, RequestLog, TransitionCommit};
use crate::approval::rule::{Rule, Step};
use crate::approval::types::RequestState;

/// Errors reported by an [`ApprovalStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Rule not found.
    #[error("Rule {0} not found")]
    RuleNotFound(RuleId),

    /// Request not found.
    #[error("Request {0} not found")]
    RequestNotFound(RequestId),

    /// A pending request already exists for the same rule and record.
    #[error("Request {0} is already pending for this rule and record")]
    DuplicatePending(RequestId),

    /// The request changed since it was read.
    #[error("Request {request_id} is no longer pending at the expected step (now {state})")]
    Stale {
        /// The request.
        request_id: RequestId,
        /// State found when the commit was attempted.
        state: RequestState,
    },

    /// The rule is referenced by requests.
    #[error("Rule {0} is referenced by requests")]
    RuleInUse(RuleId),

    /// The backend failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Search criteria for rules. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFilter {
    /// Target record type.
    pub record_type: Option<String>,
    /// Target operation.
    pub operation: Option<String>,
    /// Active flag.
    pub active: Option<bool>,
}

impl RuleFilter {
    /// Active rules guarding one operation.
    #[must_use]
    pub fn active_for(key: &OperationKey) -> Self {
        Self {
            record_type: Some(key.record_type.clone()),
            operation: Some(key.operation.clone()),
            active: Some(true),
        }
    }

    /// All active rules.
    #[must_use]
    pub fn active() -> Self {
        Self {
            active: Some(true),
            ..Self::default()
        }
    }

    /// Returns true if `rule` satisfies the filter.
    #[must_use]
    pub fn matches(&self, rule: &Rule) -> bool {
        self.record_type.as_ref().is_none_or(|t| *t == rule.record_type)
            && self.operation.as_ref().is_none_or(|o| *o == rule.operation)
            && self.active.is_none_or(|a| a == rule.active)
    }
}

/// Search criteria for requests. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    /// Triggering rule.
    pub rule_id: Option<RuleId>,
    /// Target record type.
    pub record_type: Option<String>,
    /// Target record key.
    pub record_id: Option<RecordId>,
    /// Lifecycle state.
    pub state: Option<RequestState>,
    /// Requesting user.
    pub requested_by: Option<UserId>,
    /// Keep only this many of the newest matches. Paginated listings ignore it.
    pub limit: Option<u64>,
}

impl RequestFilter {
    /// Requests of one rule for one record.
    #[must_use]
    pub fn for_record(rule_id: RuleId, record_type: &str, record_id: RecordId) -> Self {
        Self {
            rule_id: Some(rule_id),
            record_type: Some(record_type.to_string()),
            record_id: Some(record_id),
            ..Self::default()
        }
    }

    /// Restricts the result to the newest match.
    #[must_use]
    pub fn latest(self) -> Self {
        Self { limit: Some(1), ..self }
    }

    /// Requests in one state.
    #[must_use]
    pub fn in_state(state: RequestState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Returns true if `request` satisfies the filter.
    #[must_use]
    pub fn matches(&self, request: &Request) -> bool {
        self.rule_id.is_none_or(|id| id == request.rule_id)
            && self.record_type.as_ref().is_none_or(|t| *t == request.record_type)
            && self.record_id.is_none_or(|id| id == request.record_id)
            && self.state.is_none_or(|s| s == request.state)
            && self.requested_by.is_none_or(|u| u == request.requested_by)
    }
}

/// Repository trait for approval persistence.
///
/// Implemented in memory by this crate and on PostgreSQL by the db crate.
/// Rules are returned with their steps sorted by `(sequence, id)`; request
/// lists are returned newest first.
pub trait ApprovalStore: Send + Sync {
    /// Persist a new rule with its steps.
    fn insert_rule(
        &self,
        rule: Rule,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Append a step to an existing rule and return the updated rule.
    fn insert_step(
        &self,
        step: Step,
    ) -> impl std::future::Future<Output = Result<Rule, StoreError>> + Send;

    /// Toggle a rule's active flag and return the updated rule.
    fn set_rule_active(
        &self,
        rule_id: RuleId,
        active: bool,
    ) -> impl std::future::Future<Output = Result<Rule, StoreError>> + Send;

    /// Delete a rule and its steps. Fails with `RuleInUse` while requests reference it.
    fn delete_rule(
        &self,
        rule_id: RuleId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Find a rule by ID.
    fn find_rule(
        &self,
        rule_id: RuleId,
    ) -> impl std::future::Future<Output = Result<Option<Rule>, StoreError>> + Send;

    /// Search rules.
    fn find_rules(
        &self,
        filter: &RuleFilter,
    ) -> impl std::future::Future<Output = Result<Vec<Rule>, StoreError>> + Send;

    /// Persist new pending requests as one unit.
    ///
    /// If any of them collides with an existing pending request for the same
    /// rule and record, nothing is written and `DuplicatePending` names the
    /// existing request.
    fn insert_requests(
        &self,
        requests: Vec<Request>,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Find a request by ID.
    fn find_request(
        &self,
        request_id: RequestId,
    ) -> impl std::future::Future<Output = Result<Option<Request>, StoreError>> + Send;

    /// Search requests, newest first.
    fn find_requests(
        &self,
        filter: &RequestFilter,
    ) -> impl std::future::Future<Output = Result<Vec<Request>, StoreError>> + Send;

    /// Apply a transition if the request is still pending at the expected
    /// step, appending its log entry in the same unit of work.
    ///
    /// Returns the updated request, or `Stale` when the request moved on.
    fn commit_transition(
        &self,
        commit: TransitionCommit,
    ) -> impl std::future::Future<Output = Result<Request, StoreError>> + Send;

    /// Decision history of a request, newest first.
    fn request_logs(
        &self,
        request_id: RequestId,
    ) -> impl std::future::Future<Output = Result<Vec<RequestLog>, StoreError>> + Send;

    /// Members of an approver group.
    fn group_members(
        &self,
        group_id: GroupId,
    ) -> impl std::future::Future<Output = Result<Vec<UserId>, StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::rule::{RuleDraft, StepDraft};
    use serde_json::Value;

    #[test]
    fn test_rule_filter() {
        let mut rule = RuleDraft::new("Rule", "expense", "submit")
            .with_step(StepDraft::user(10, UserId::new(), "Alice"))
            .build()
            .unwrap();

        let key = OperationKey::new("expense", "submit");
        assert!(RuleFilter::active_for(&key).matches(&rule));
        assert!(!RuleFilter::active_for(&OperationKey::new("expense", "pay")).matches(&rule));

        rule.active = false;
        assert!(!RuleFilter::active().matches(&rule));
        assert!(RuleFilter::default().matches(&rule));
    }

    #[test]
    fn test_request_filter() {
        let rule = RuleDraft::new("Rule", "expense", "submit")
            .with_step(StepDraft::user(10, UserId::new(), "Alice"))
            .build()
            .unwrap();
        let request = Request::open(&rule, rule.steps[0].clone(), RecordId(3), UserId::new(), Value::Null);

        assert!(RequestFilter::for_record(rule.id, "expense", RecordId(3)).matches(&request));
        assert!(!RequestFilter::for_record(rule.id, "expense", RecordId(4)).matches(&request));
        assert!(RequestFilter::in_state(RequestState::Pending).matches(&request));
        assert!(!RequestFilter::in_state(RequestState::Approved).matches(&request));

        let latest = RequestFilter::for_record(rule.id, "expense", RecordId(3)).latest();
        assert_eq!(latest.limit, Some(1));
        assert!(latest.matches(&request));
    }
}
