//! Row conversion tests for the approval store.

use chrono::Utc;
use proptest::prelude::*;
use rstest::rstest;
use serde_json::json;
use uuid::Uuid;

use checkpoint_core::approval::{ApproverKind, Decision, RequestLog, RequestState, StoreError};
use checkpoint_shared::types::{GroupId, RecordId, RequestId, StepId, UserId};

use super::*;

fn step_row(rule_id: Uuid, sequence: i32, kind: &str, user: Option<Uuid>, group: Option<Uuid>) -> approval_rule_steps::Model {
    approval_rule_steps::Model {
        id: Uuid::now_v7(),
        rule_id,
        sequence,
        approver_kind: kind.to_string(),
        approver_user_id: user,
        approver_group_id: group,
        approver_label: None,
        created_at: Utc::now().into(),
    }
}

fn rule_row(condition: &str) -> approval_rules::Model {
    approval_rules::Model {
        id: Uuid::now_v7(),
        name: "BigExpense".to_string(),
        res_model: "expense".to_string(),
        operation: "submit".to_string(),
        condition: condition.to_string(),
        priority: 10,
        active: true,
        created_at: Utc::now().into(),
        updated_at: Utc::now().into(),
    }
}

fn request_row(state: &str, current_step_id: Option<Uuid>) -> approval_requests::Model {
    approval_requests::Model {
        id: Uuid::now_v7(),
        rule_id: Uuid::now_v7(),
        res_model: "expense".to_string(),
        res_id: 42,
        requested_by: Uuid::now_v7(),
        requested_at: Utc::now().into(),
        state: state.to_string(),
        current_step_id,
        call_args: json!({"note": "travel"}),
        updated_at: Utc::now().into(),
    }
}

// ============================================================================
// Steps
// ============================================================================

#[test]
fn test_user_step_from_row() {
    let user = Uuid::now_v7();
    let row = step_row(Uuid::now_v7(), 10, "user", Some(user), None);

    let step = step_from_model(row).expect("valid user step");
    assert_eq!(step.approver, ApproverKind::User(UserId::from_uuid(user)));
    assert_eq!(step.sequence, 10);
}

#[test]
fn test_group_step_from_row() {
    let group = Uuid::now_v7();
    let row = step_row(Uuid::now_v7(), 20, "group", None, Some(group));

    let step = step_from_model(row).expect("valid group step");
    assert_eq!(step.approver, ApproverKind::Group(GroupId::from_uuid(group)));
}

#[rstest]
#[case("user", None, None)]
#[case("user", Some(Uuid::nil()), Some(Uuid::nil()))]
#[case("group", Some(Uuid::nil()), None)]
#[case("role", Some(Uuid::nil()), None)]
fn test_inconsistent_step_row_is_backend_error(
    #[case] kind: &str,
    #[case] user: Option<Uuid>,
    #[case] group: Option<Uuid>,
) {
    let row = step_row(Uuid::now_v7(), 10, kind, user, group);
    assert!(matches!(step_from_model(row), Err(StoreError::Backend(_))));
}

#[test]
fn test_step_active_model_splits_approver_columns() {
    let row = step_row(Uuid::now_v7(), 10, "group", None, Some(Uuid::now_v7()));
    let step = step_from_model(row.clone()).expect("valid group step");

    let active = step_active_model(&step);
    assert_eq!(active.approver_kind, Set("group".to_string()));
    assert_eq!(active.approver_user_id, Set(None));
    assert_eq!(active.approver_group_id, Set(row.approver_group_id));
}

// ============================================================================
// Rules
// ============================================================================

#[test]
fn test_rule_from_rows_orders_steps() {
    let rule = rule_row("amount > 1000");
    let steps = vec![
        step_row(rule.id, 20, "group", None, Some(Uuid::now_v7())),
        step_row(rule.id, 10, "user", Some(Uuid::now_v7()), None),
    ];

    let rule = rule_from_models(rule, steps).expect("valid rule");
    let sequences: Vec<i32> = rule.steps.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![10, 20]);
    assert_eq!(rule.condition.source(), "amount > 1000");
}

#[test]
fn test_rule_with_unparseable_condition_is_backend_error() {
    let rule = rule_row("amount >");
    assert!(matches!(rule_from_models(rule, Vec::new()), Err(StoreError::Backend(_))));
}

// ============================================================================
// Requests and logs
// ============================================================================

#[test]
fn test_request_from_row() {
    let row = request_row("approved", None);
    let id = row.id;

    let request = request_from_model(row, "BigExpense".to_string(), None).expect("valid request");
    assert_eq!(request.id, RequestId::from_uuid(id));
    assert_eq!(request.record_id, RecordId(42));
    assert_eq!(request.state, RequestState::Approved);
    assert_eq!(request.call_args, json!({"note": "travel"}));
    assert!(request.current_step.is_none());
}

#[test]
fn test_request_with_unknown_state_is_backend_error() {
    let row = request_row("archived", None);
    assert!(matches!(
        request_from_model(row, String::new(), None),
        Err(StoreError::Backend(_))
    ));
}

#[test]
fn test_request_active_model_keeps_current_step() {
    let step = step_from_model(step_row(Uuid::now_v7(), 10, "user", Some(Uuid::now_v7()), None))
        .expect("valid step");
    let row = request_row("pending", Some(step.id.into_inner()));
    let request = request_from_model(row, "BigExpense".to_string(), Some(step.clone())).expect("valid request");

    let active = request_active_model(&request);
    assert_eq!(active.state, Set("pending".to_string()));
    assert_eq!(active.current_step_id, Set(Some(step.id.into_inner())));
}

#[test]
fn test_log_round_trips_through_row() {
    let log = RequestLog {
        id: checkpoint_shared::types::RequestLogId::new(),
        request_id: RequestId::new(),
        step_id: Some(StepId::new()),
        decision: Decision::Rejected,
        decided_by: UserId::new(),
        decided_at: Utc::now(),
        reason: Some("Over budget".to_string()),
    };

    let active = log_active_model(&log);
    let row = approval_request_logs::Model {
        id: log.id.into_inner(),
        request_id: log.request_id.into_inner(),
        step_id: log.step_id.map(StepId::into_inner),
        decision: "rejected".to_string(),
        decided_by: log.decided_by.into_inner(),
        decided_at: log.decided_at.into(),
        reason: log.reason.clone(),
    };

    assert_eq!(active.decision, Set("rejected".to_string()));
    assert_eq!(log_from_model(row).expect("valid log"), log);
}

#[test]
fn test_unknown_decision_is_backend_error() {
    let row = approval_request_logs::Model {
        id: Uuid::now_v7(),
        request_id: Uuid::now_v7(),
        step_id: None,
        decision: "maybe".to_string(),
        decided_by: Uuid::now_v7(),
        decided_at: Utc::now().into(),
        reason: None,
    };
    assert!(matches!(log_from_model(row), Err(StoreError::Backend(_))));
}

fn state_strategy() -> impl Strategy<Value = RequestState> {
    prop_oneof![
        Just(RequestState::Pending),
        Just(RequestState::Approved),
        Just(RequestState::Rejected),
        Just(RequestState::Cancel),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Every state written by the store reads back as the same state.
    #[test]
    fn prop_stored_state_reads_back(state in state_strategy()) {
        prop_assert_eq!(parse_state(state.as_str()), Ok(state));
    }

    /// Any text that is not a known state is rejected rather than defaulted.
    #[test]
    fn prop_unknown_state_is_rejected(raw in "[a-z]{3,12}") {
        prop_assume!(!matches!(raw.as_str(), "pending" | "approved" | "rejected" | "cancel" | "cancelled"));
        prop_assert!(parse_state(&raw).is_err());
    }
}
