//! Approval domain types.
//!
//! Request lifecycle states, decisions, approver kinds and the host record
//! snapshot the engine evaluates conditions against.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use checkpoint_shared::types::{GroupId, RecordId, RequestId, UserId};

/// Lifecycle state of an approval request.
///
/// The valid transitions are:
/// - Pending → Approved (last step approved)
/// - Pending → Rejected (any step rejected)
/// - Pending → Cancel (administrative cancel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Waiting on the current step's approvers.
    Pending,
    /// Every step approved; the guarded operation may run for this record.
    Approved,
    /// Rejected at some step; further invocations stay blocked.
    Rejected,
    /// Cancelled by an administrator.
    Cancel,
}

impl RequestState {
    /// Returns the string representation of the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancel => "cancel",
        }
    }

    /// Parses a state from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancel" | "cancelled" => Some(Self::Cancel),
            _ => None,
        }
    }

    /// Returns true if no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decision recorded in a request log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// The step was approved.
    Approved,
    /// The request was rejected.
    Rejected,
}

impl Decision {
    /// Returns the string representation of the decision.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parses a decision from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who may sign off a step: one designated user, or any member of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ApproverKind {
    /// A single designated user.
    User(UserId),
    /// Any member of a designated group.
    Group(GroupId),
}

impl ApproverKind {
    /// Returns the stored discriminator (`user` or `group`).
    #[must_use]
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Group(_) => "group",
        }
    }

    /// Rebuilds an approver from its stored columns.
    ///
    /// Returns `None` unless exactly the column matching `kind` is set.
    #[must_use]
    pub fn from_parts(kind: &str, user: Option<UserId>, group: Option<GroupId>) -> Option<Self> {
        match (kind, user, group) {
            ("user", Some(user), None) => Some(Self::User(user)),
            ("group", None, Some(group)) => Some(Self::Group(group)),
            _ => None,
        }
    }

    /// The designated user, if this is a user approver.
    #[must_use]
    pub fn user(&self) -> Option<UserId> {
        match self {
            Self::User(user) => Some(*user),
            Self::Group(_) => None,
        }
    }

    /// The designated group, if this is a group approver.
    #[must_use]
    pub fn group(&self) -> Option<GroupId> {
        match self {
            Self::Group(group) => Some(*group),
            Self::User(_) => None,
        }
    }
}

/// Reference to one host record: its type name and integer key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    /// Record type name (e.g. `expense`).
    pub record_type: String,
    /// Record key.
    pub record_id: RecordId,
}

impl RecordRef {
    /// Creates a new record reference.
    pub fn new(record_type: impl Into<String>, record_id: RecordId) -> Self {
        Self {
            record_type: record_type.into(),
            record_id,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.record_id)
    }
}

/// Read-only snapshot of a host record handed to the engine.
///
/// `fields` is a JSON object; conditions read it by dotted field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record key.
    pub id: RecordId,
    /// Field values.
    pub fields: Value,
}

impl Record {
    /// Creates a record snapshot.
    pub fn new(id: impl Into<RecordId>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Execution context of a guarded-operation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// The acting user.
    pub user: UserId,
    resuming: Option<RequestId>,
}

impl CallContext {
    /// Context for an ordinary call.
    #[must_use]
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            resuming: None,
        }
    }

    /// Context used when replaying an approved request.
    ///
    /// Calls made with this context skip the approval gate.
    #[must_use]
    pub fn resuming(user: UserId, request_id: RequestId) -> Self {
        Self {
            user,
            resuming: Some(request_id),
        }
    }

    /// The request being resumed, when this call bypasses the gate.
    #[must_use]
    pub fn bypass(&self) -> Option<RequestId> {
        self.resuming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_as_str() {
        assert_eq!(RequestState::Pending.as_str(), "pending");
        assert_eq!(RequestState::Approved.as_str(), "approved");
        assert_eq!(RequestState::Rejected.as_str(), "rejected");
        assert_eq!(RequestState::Cancel.as_str(), "cancel");
    }

    #[test]
    fn test_state_parse() {
        assert_eq!(RequestState::parse("PENDING"), Some(RequestState::Pending));
        assert_eq!(RequestState::parse("Approved"), Some(RequestState::Approved));
        assert_eq!(RequestState::parse("rejected"), Some(RequestState::Rejected));
        assert_eq!(RequestState::parse("cancelled"), Some(RequestState::Cancel));
        assert_eq!(RequestState::parse("draft"), None);
    }

    #[test]
    fn test_state_terminal() {
        assert!(!RequestState::Pending.is_terminal());
        assert!(RequestState::Approved.is_terminal());
        assert!(RequestState::Rejected.is_terminal());
        assert!(RequestState::Cancel.is_terminal());
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!(Decision::parse("approved"), Some(Decision::Approved));
        assert_eq!(Decision::parse("REJECTED"), Some(Decision::Rejected));
        assert_eq!(Decision::parse("pending"), None);
        assert_eq!(Decision::Rejected.to_string(), "rejected");
    }

    #[test]
    fn test_approver_from_parts_requires_exactly_one() {
        let user = UserId::new();
        let group = GroupId::new();

        assert_eq!(
            ApproverKind::from_parts("user", Some(user), None),
            Some(ApproverKind::User(user))
        );
        assert_eq!(
            ApproverKind::from_parts("group", None, Some(group)),
            Some(ApproverKind::Group(group))
        );
        assert_eq!(ApproverKind::from_parts("user", None, None), None);
        assert_eq!(ApproverKind::from_parts("user", Some(user), Some(group)), None);
        assert_eq!(ApproverKind::from_parts("group", Some(user), None), None);
        assert_eq!(ApproverKind::from_parts("role", Some(user), None), None);
    }

    #[test]
    fn test_approver_serde_shape() {
        let group = GroupId::new();
        let value = serde_json::to_value(ApproverKind::Group(group)).unwrap();
        assert_eq!(value, json!({ "type": "group", "id": group.to_string() }));
    }

    #[test]
    fn test_record_ref_display() {
        let reference = RecordRef::new("expense", RecordId(7));
        assert_eq!(reference.to_string(), "expense/7");
    }

    #[test]
    fn test_call_context_bypass() {
        let user = UserId::new();
        assert_eq!(CallContext::new(user).bypass(), None);

        let request = RequestId::new();
        assert_eq!(CallContext::resuming(user, request).bypass(), Some(request));
    }
}
