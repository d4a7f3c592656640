//! Property-based tests for the request state machine.

use proptest::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use checkpoint_shared::EngineConfig;
use checkpoint_shared::types::{RecordId, UserId};

use crate::approval::error::ApprovalError;
use crate::approval::request::Request;
use crate::approval::rule::{Rule, RuleDraft, StepDraft};
use crate::approval::transition::{RequestTransitions, Transition};
use crate::approval::types::RequestState;

/// Strategy for generating random user IDs.
fn arb_user() -> impl Strategy<Value = UserId> {
    any::<u128>().prop_map(|n| UserId::from_uuid(Uuid::from_u128(n)))
}

/// Strategy for generating step sequences (gaps and duplicates allowed).
fn arb_sequences() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(0i32..100, 1..8)
}

/// Strategy for generating resolved states.
fn arb_terminal_state() -> impl Strategy<Value = RequestState> {
    prop_oneof![
        Just(RequestState::Approved),
        Just(RequestState::Rejected),
        Just(RequestState::Cancel),
    ]
}

fn chain(sequences: &[i32], approver: UserId) -> Rule {
    sequences
        .iter()
        .fold(RuleDraft::new("Chain", "expense", "submit"), |draft, &seq| {
            draft.with_step(StepDraft::user(seq, approver, "Approver"))
        })
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Approving repeatedly visits each distinct sequence once, in ascending
    /// order, and then resolves to approved.
    #[test]
    fn prop_approval_walks_distinct_sequences(sequences in arb_sequences(), actor in arb_user()) {
        let rule = chain(&sequences, actor);
        let first = rule.steps[0].clone();
        let mut request = Request::open(&rule, first, RecordId(1), actor, Value::Null);

        let mut visited = Vec::new();
        loop {
            let step = request.current_step.clone().unwrap();
            visited.push(step.sequence);

            let transition = RequestTransitions::approve(&request, &rule, actor, &[actor]).unwrap();
            let commit = RequestTransitions::commit(&request, &transition, actor).unwrap();
            prop_assert_eq!(commit.expected_step, step.id);

            request.state = commit.state;
            request.current_step = commit.current_step;
            prop_assert!(request.is_consistent());

            if transition == Transition::Approve {
                break;
            }
        }

        let mut expected = sequences.clone();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(visited, expected);
        prop_assert_eq!(request.state, RequestState::Approved);
    }

    /// Anyone outside the approver list is refused, whatever the state.
    #[test]
    fn prop_non_approver_always_unauthorized(
        approver in arb_user(),
        outsider in arb_user(),
        state in prop_oneof![Just(RequestState::Pending), arb_terminal_state()],
    ) {
        prop_assume!(approver != outsider);
        let rule = chain(&[10], approver);
        let mut request = Request::open(&rule, rule.steps[0].clone(), RecordId(1), approver, Value::Null);
        request.state = state;
        if state.is_terminal() {
            request.current_step = None;
        }

        let approve = RequestTransitions::approve(&request, &rule, outsider, &[approver]);
        let is_unauthorized = matches!(approve, Err(ApprovalError::Unauthorized { .. }));
        prop_assert!(is_unauthorized);

        let reject = RequestTransitions::reject(&request, outsider, &[approver], None, &EngineConfig::default());
        let is_unauthorized = matches!(reject, Err(ApprovalError::Unauthorized { .. }));
        prop_assert!(is_unauthorized);
    }

    /// Resolved requests accept no further transition.
    #[test]
    fn prop_terminal_states_are_final(actor in arb_user(), state in arb_terminal_state()) {
        let rule = chain(&[10, 20], actor);
        let mut request = Request::open(&rule, rule.steps[0].clone(), RecordId(1), actor, Value::Null);
        request.state = state;
        request.current_step = None;

        let approve = RequestTransitions::approve(&request, &rule, actor, &[actor]);
        let is_invalid = matches!(approve, Err(ApprovalError::InvalidState { .. }));
        prop_assert!(is_invalid);

        let cancel = RequestTransitions::cancel(&request);
        let is_invalid = matches!(cancel, Err(ApprovalError::InvalidState { .. }));
        prop_assert!(is_invalid);
    }

    /// A rejection at any step resolves the request with a non-empty reason.
    #[test]
    fn prop_reject_at_any_step(
        sequences in arb_sequences(),
        advance in 0usize..8,
        actor in arb_user(),
        reason in prop_oneof![Just(None), "[a-z ]{0,20}".prop_map(Some)],
    ) {
        let rule = chain(&sequences, actor);
        let mut request = Request::open(&rule, rule.steps[0].clone(), RecordId(1), actor, Value::Null);

        for _ in 0..advance {
            match RequestTransitions::approve(&request, &rule, actor, &[actor]).unwrap() {
                Transition::Advance { next_step } => request.current_step = Some(next_step),
                _ => break,
            }
        }

        let transition =
            RequestTransitions::reject(&request, actor, &[actor], reason.as_deref(), &EngineConfig::default()).unwrap();
        let commit = RequestTransitions::commit(&request, &transition, actor).unwrap();

        prop_assert_eq!(commit.state, RequestState::Rejected);
        prop_assert!(commit.current_step.is_none());
        let stored = commit.log.and_then(|log| log.reason).unwrap_or_default();
        prop_assert!(!stored.trim().is_empty());
    }
}
