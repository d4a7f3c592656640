//! Request state machine.
//!
//! Pure decision logic: given a request, its rule and the current approvers,
//! decide what an approve, reject or cancel does. Applying the result is the
//! store's job (see [`TransitionCommit`]).

use checkpoint_shared::EngineConfig;
use checkpoint_shared::types::UserId;

use crate::approval::error::ApprovalError;
use crate::approval::matcher::RuleMatcher;
use crate::approval::request::{Request, RequestLog, TransitionCommit};
use crate::approval::rule::{Rule, Step};
use crate::approval::types::{Decision, RequestState};

/// The effect of a decision on a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Approved at this step; wait on the next one.
    Advance {
        /// Step the request moves to.
        next_step: Step,
    },
    /// Approved at the last step.
    Approve,
    /// Rejected with a reason.
    Reject {
        /// Stored reason.
        reason: String,
    },
    /// Cancelled administratively.
    Cancel,
}

impl Transition {
    /// State the request ends up in.
    #[must_use]
    pub fn target_state(&self) -> RequestState {
        match self {
            Self::Advance { .. } => RequestState::Pending,
            Self::Approve => RequestState::Approved,
            Self::Reject { .. } => RequestState::Rejected,
            Self::Cancel => RequestState::Cancel,
        }
    }
}

/// Stateless transition rules.
pub struct RequestTransitions;

impl RequestTransitions {
    /// Checks that `actor` may decide the request, then that it is pending.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when `actor` is not a current approver; `InvalidState`
    /// when the request is not pending.
    pub fn authorize(request: &Request, actor: UserId, approvers: &[UserId]) -> Result<(), ApprovalError> {
        if !approvers.contains(&actor) {
            return Err(ApprovalError::Unauthorized {
                user_id: actor,
                request_id: request.id,
            });
        }
        Self::ensure_pending(request)?;
        Ok(())
    }

    /// Decides the effect of `actor` approving the current step.
    ///
    /// # Errors
    ///
    /// See [`Self::authorize`].
    pub fn approve(
        request: &Request,
        rule: &Rule,
        actor: UserId,
        approvers: &[UserId],
    ) -> Result<Transition, ApprovalError> {
        Self::authorize(request, actor, approvers)?;
        let current = Self::ensure_pending(request)?;

        Ok(match RuleMatcher::next_step(rule, current) {
            Some(next) => Transition::Advance {
                next_step: next.clone(),
            },
            None => Transition::Approve,
        })
    }

    /// Decides the effect of `actor` rejecting the request.
    ///
    /// A blank reason is replaced by the configured default, unless the
    /// configuration demands one.
    ///
    /// # Errors
    ///
    /// See [`Self::authorize`]; also `RejectionReasonRequired`.
    pub fn reject(
        request: &Request,
        actor: UserId,
        approvers: &[UserId],
        reason: Option<&str>,
        config: &EngineConfig,
    ) -> Result<Transition, ApprovalError> {
        Self::authorize(request, actor, approvers)?;

        let reason = match reason.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reason) => reason.to_string(),
            None if config.require_rejection_reason => {
                return Err(ApprovalError::RejectionReasonRequired);
            }
            None => config.default_rejection_reason.clone(),
        };
        Ok(Transition::Reject { reason })
    }

    /// Decides the effect of an administrative cancel.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the request is not pending.
    pub fn cancel(request: &Request) -> Result<Transition, ApprovalError> {
        Self::ensure_pending(request)?;
        Ok(Transition::Cancel)
    }

    /// Builds the store commit for a decided transition.
    ///
    /// Only approver decisions are logged; a cancel writes no log entry.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the request is not pending.
    pub fn commit(
        request: &Request,
        transition: &Transition,
        actor: UserId,
    ) -> Result<TransitionCommit, ApprovalError> {
        let current = Self::ensure_pending(request)?;

        let (current_step, log) = match transition {
            Transition::Advance { next_step } => (
                Some(next_step.clone()),
                Some(RequestLog::record(request, Decision::Approved, actor, None)),
            ),
            Transition::Approve => (
                None,
                Some(RequestLog::record(request, Decision::Approved, actor, None)),
            ),
            Transition::Reject { reason } => (
                None,
                Some(RequestLog::record(
                    request,
                    Decision::Rejected,
                    actor,
                    Some(reason.clone()),
                )),
            ),
            Transition::Cancel => (None, None),
        };

        Ok(TransitionCommit {
            request_id: request.id,
            expected_step: current.id,
            state: transition.target_state(),
            current_step,
            log,
        })
    }

    fn ensure_pending(request: &Request) -> Result<&Step, ApprovalError> {
        match (&request.current_step, request.state) {
            (Some(step), RequestState::Pending) => Ok(step),
            _ => Err(ApprovalError::InvalidState {
                request_id: request.id,
                state: request.state,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::rule::{RuleDraft, StepDraft};
    use checkpoint_shared::types::RecordId;
    use serde_json::Value;

    struct Fixture {
        rule: Rule,
        alice: UserId,
        bob: UserId,
    }

    fn fixture() -> Fixture {
        let alice = UserId::new();
        let bob = UserId::new();
        let rule = RuleDraft::new("BigExpense", "expense", "submit")
            .with_step(StepDraft::user(10, alice, "Alice"))
            .with_step(StepDraft::user(20, bob, "Bob"))
            .build()
            .unwrap();
        Fixture { rule, alice, bob }
    }

    fn open(rule: &Rule) -> Request {
        Request::open(rule, rule.steps[0].clone(), RecordId(1), UserId::new(), Value::Null)
    }

    #[test]
    fn test_approve_advances_then_completes() {
        let f = fixture();
        let mut request = open(&f.rule);

        let first = RequestTransitions::approve(&request, &f.rule, f.alice, &[f.alice]).unwrap();
        assert_eq!(
            first,
            Transition::Advance {
                next_step: f.rule.steps[1].clone()
            }
        );

        let commit = RequestTransitions::commit(&request, &first, f.alice).unwrap();
        assert_eq!(commit.expected_step, f.rule.steps[0].id);
        assert_eq!(commit.state, RequestState::Pending);
        request.current_step = commit.current_step;

        let second = RequestTransitions::approve(&request, &f.rule, f.bob, &[f.bob]).unwrap();
        assert_eq!(second, Transition::Approve);

        let commit = RequestTransitions::commit(&request, &second, f.bob).unwrap();
        assert_eq!(commit.state, RequestState::Approved);
        assert!(commit.current_step.is_none());
        let log = commit.log.unwrap();
        assert_eq!(log.decision, Decision::Approved);
        assert_eq!(log.step_id, Some(f.rule.steps[1].id));
    }

    #[test]
    fn test_non_approver_is_unauthorized() {
        let f = fixture();
        let request = open(&f.rule);

        let err = RequestTransitions::approve(&request, &f.rule, f.bob, &[f.alice]).unwrap_err();
        assert!(matches!(err, ApprovalError::Unauthorized { user_id, .. } if user_id == f.bob));
    }

    #[test]
    fn test_authorization_checked_before_state() {
        let f = fixture();
        let mut request = open(&f.rule);
        request.state = RequestState::Approved;
        request.current_step = None;

        let err = RequestTransitions::approve(&request, &f.rule, f.alice, &[]).unwrap_err();
        assert!(matches!(err, ApprovalError::Unauthorized { .. }));

        // An approver list read before the request resolved still hits the state check.
        let err = RequestTransitions::approve(&request, &f.rule, f.alice, &[f.alice]).unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidState { state: RequestState::Approved, .. }));
    }

    #[test]
    fn test_reject_uses_default_reason() {
        let f = fixture();
        let request = open(&f.rule);
        let config = EngineConfig::default();

        let transition =
            RequestTransitions::reject(&request, f.alice, &[f.alice], Some("   "), &config).unwrap();
        assert_eq!(
            transition,
            Transition::Reject {
                reason: "Rejected by user.".to_string()
            }
        );

        let commit = RequestTransitions::commit(&request, &transition, f.alice).unwrap();
        assert_eq!(commit.state, RequestState::Rejected);
        assert_eq!(commit.log.unwrap().reason.as_deref(), Some("Rejected by user."));
    }

    #[test]
    fn test_reject_reason_required() {
        let f = fixture();
        let request = open(&f.rule);
        let config = EngineConfig {
            require_rejection_reason: true,
            ..EngineConfig::default()
        };

        let err = RequestTransitions::reject(&request, f.alice, &[f.alice], None, &config).unwrap_err();
        assert!(matches!(err, ApprovalError::RejectionReasonRequired));

        let ok = RequestTransitions::reject(&request, f.alice, &[f.alice], Some("over budget"), &config);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_cancel_writes_no_log() {
        let f = fixture();
        let request = open(&f.rule);

        let transition = RequestTransitions::cancel(&request).unwrap();
        let commit = RequestTransitions::commit(&request, &transition, f.alice).unwrap();

        assert_eq!(commit.state, RequestState::Cancel);
        assert!(commit.current_step.is_none());
        assert!(commit.log.is_none());
    }

    #[test]
    fn test_cancel_requires_pending() {
        let f = fixture();
        let mut request = open(&f.rule);
        request.state = RequestState::Rejected;
        request.current_step = None;

        assert!(matches!(
            RequestTransitions::cancel(&request),
            Err(ApprovalError::InvalidState { .. })
        ));
    }
}
