//! Approval error types.
//!
//! This module defines every error the engine surfaces to callers of a
//! guarded operation, to approvers, and to administrators.

use std::fmt::Write as _;

use thiserror::Error;

use checkpoint_shared::types::{RequestId, RuleId, UserId};

use crate::approval::registry::OperationError;
use crate::approval::store::StoreError;
use crate::approval::types::RequestState;

/// A request opened by an intercepted call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRequest {
    /// The new request.
    pub request_id: RequestId,
    /// Its display name.
    pub name: String,
    /// Display name of the step it waits on.
    pub step_name: String,
    /// Users who can approve that step.
    pub approvers: Vec<UserId>,
}

fn list_created(requests: &[CreatedRequest]) -> String {
    requests.iter().fold(String::new(), |mut out, r| {
        let _ = write!(out, "\n- {} (Waiting for {})", r.name, r.step_name);
        out
    })
}

/// Errors that can occur during approval operations.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// A rule or operation is misconfigured; nothing was attempted.
    #[error("Approval configuration error: {0}")]
    Configuration(String),

    /// The record already has an unresolved request.
    #[error("This action requires approval. There's already a pending request: {request_name} (waiting for {step_name})")]
    BlockedPendingApproval {
        /// The pending request.
        request_id: RequestId,
        /// Its display name.
        request_name: String,
        /// Display name of the step it waits on.
        step_name: String,
    },

    /// The record's request for the matching rule was rejected.
    #[error("This action was previously rejected. Request: {request_name}. Reason: {reason}")]
    BlockedRejected {
        /// The rejected request.
        request_id: RequestId,
        /// Its display name.
        request_name: String,
        /// Stored rejection reason.
        reason: String,
    },

    /// The call opened new approval requests and was not executed.
    #[error("Action requires approval. The following requests have been created:{}", list_created(.requests))]
    ApprovalCreated {
        /// Every request opened by the call.
        requests: Vec<CreatedRequest>,
    },

    /// The actor is not among the current approvers.
    #[error("User {user_id} is not authorized to decide request {request_id} at the current step")]
    Unauthorized {
        /// The acting user.
        user_id: UserId,
        /// The request.
        request_id: RequestId,
    },

    /// The request is no longer pending.
    #[error("Request {request_id} is {state}, not pending")]
    InvalidState {
        /// The request.
        request_id: RequestId,
        /// Its current state.
        state: RequestState,
    },

    /// A rejection without a reason was refused.
    #[error("Rejection reason is required")]
    RejectionReasonRequired,

    /// Request not found.
    #[error("Approval request {0} not found")]
    RequestNotFound(RequestId),

    /// Rule not found.
    #[error("Approval rule {0} not found")]
    RuleNotFound(RuleId),

    /// Rule still referenced by requests.
    #[error("Approval rule {0} has requests and cannot be deleted")]
    RuleInUse(RuleId),

    /// The guarded operation itself failed.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Persistence failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ApprovalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RuleInUse(id) => Self::RuleInUse(id),
            StoreError::RuleNotFound(id) => Self::RuleNotFound(id),
            StoreError::RequestNotFound(id) => Self::RequestNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl ApprovalError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Configuration(_) | Self::RejectionReasonRequired => 400,

            Self::Unauthorized { .. } => 403,

            Self::RequestNotFound(_) | Self::RuleNotFound(_) => 404,

            Self::BlockedPendingApproval { .. }
            | Self::BlockedRejected { .. }
            | Self::InvalidState { .. }
            | Self::RuleInUse(_) => 409,

            Self::ApprovalCreated { .. } => 202,

            Self::Operation(_) => 422,

            Self::Store(_) => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "APPROVAL_CONFIGURATION_ERROR",
            Self::BlockedPendingApproval { .. } => "BLOCKED_PENDING_APPROVAL",
            Self::BlockedRejected { .. } => "BLOCKED_REJECTED",
            Self::ApprovalCreated { .. } => "APPROVAL_CREATED",
            Self::Unauthorized { .. } => "NOT_AUTHORIZED_TO_APPROVE",
            Self::InvalidState { .. } => "INVALID_REQUEST_STATE",
            Self::RejectionReasonRequired => "REJECTION_REASON_REQUIRED",
            Self::RequestNotFound(_) => "REQUEST_NOT_FOUND",
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::RuleInUse(_) => "RULE_IN_USE",
            Self::Operation(_) => "OPERATION_FAILED",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}
