//! Approver decisions and administrative cancel.

use tracing::info;

use checkpoint_shared::types::{RequestId, UserId};

use crate::approval::engine::ApprovalEngine;
use crate::approval::error::ApprovalError;
use crate::approval::notify::{NotificationSink, NotifyTarget};
use crate::approval::request::Request;
use crate::approval::resume::Resumption;
use crate::approval::store::{ApprovalStore, StoreError};
use crate::approval::transition::{RequestTransitions, Transition};

/// Result of an approval.
#[derive(Debug, Clone, PartialEq)]
pub enum ApproveOutcome {
    /// The request moved to its next step and is still pending.
    Advanced {
        /// The updated request.
        request: Request,
    },
    /// The last step was approved and the operation was replayed.
    Approved {
        /// The updated request.
        request: Request,
        /// What happened when the operation was replayed.
        resumption: Resumption,
    },
}

impl ApproveOutcome {
    /// The request after the decision.
    #[must_use]
    pub fn request(&self) -> &Request {
        match self {
            Self::Advanced { request } | Self::Approved { request, .. } => request,
        }
    }
}

impl<S: ApprovalStore, N: NotificationSink> ApprovalEngine<S, N> {
    /// Approves the request's current step on behalf of `actor`.
    ///
    /// On the last step the request becomes approved and the guarded
    /// operation is replayed for its record; a replay failure is reported in
    /// the outcome and does not undo the approval.
    ///
    /// # Errors
    ///
    /// - `RequestNotFound` if the request does not exist
    /// - `Unauthorized` if `actor` is not a current approver
    /// - `InvalidState` if the request is not pending, including when another
    ///   decision landed first
    pub async fn approve(&self, request_id: RequestId, actor: UserId) -> Result<ApproveOutcome, ApprovalError> {
        let request = self.request(request_id).await?;
        let approvers = self.current_approvers(&request).await?;
        let rule = self.rule(request.rule_id).await?;
        let transition = RequestTransitions::approve(&request, &rule, actor, &approvers)?;
        let step_name = request.current_step_name();
        let updated = self.commit(&request, &transition, actor).await?;

        match transition {
            Transition::Advance { .. } => {
                info!(
                    request_id = %request_id,
                    approved_by = %actor,
                    step = %step_name,
                    next_step = %updated.current_step_name(),
                    "Approval step passed"
                );
                self.clear_reminders(&updated).await;
                let next_approvers = self.current_approvers(&updated).await?;
                self.remind(&updated, &next_approvers).await;
                self.post(
                    NotifyTarget::Request(request_id),
                    format!("{step_name} approved. Waiting for {}.", updated.current_step_name()),
                )
                .await;
                Ok(ApproveOutcome::Advanced { request: updated })
            }
            _ => {
                info!(request_id = %request_id, approved_by = %actor, "Approval request approved");
                let resumption = self.resume(&updated, &rule, actor).await;
                self.notify_requester(&updated, format!("Your request {} has been approved.", updated.name()))
                    .await;
                self.clear_reminders(&updated).await;
                Ok(ApproveOutcome::Approved {
                    request: updated,
                    resumption,
                })
            }
        }
    }

    /// Rejects the request on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::approve`], plus `RejectionReasonRequired` when the
    /// configuration demands a reason and none was given.
    pub async fn reject(
        &self,
        request_id: RequestId,
        actor: UserId,
        reason: Option<&str>,
    ) -> Result<Request, ApprovalError> {
        let request = self.request(request_id).await?;
        let approvers = self.current_approvers(&request).await?;
        let transition = RequestTransitions::reject(&request, actor, &approvers, reason, &self.config)?;
        let updated = self.commit(&request, &transition, actor).await?;

        let reason = match &transition {
            Transition::Reject { reason } => reason.as_str(),
            _ => "",
        };
        info!(request_id = %request_id, rejected_by = %actor, reason = %reason, "Approval request rejected");
        self.notify_requester(
            &updated,
            format!("Your request {} has been rejected. Reason: {reason}", updated.name()),
        )
        .await;
        self.clear_reminders(&updated).await;
        Ok(updated)
    }

    /// Cancels a pending request. Administrative: not limited to approvers
    /// and not written to the decision log.
    ///
    /// # Errors
    ///
    /// `RequestNotFound`, or `InvalidState` if the request is not pending.
    pub async fn cancel(&self, request_id: RequestId, actor: UserId) -> Result<Request, ApprovalError> {
        let request = self.request(request_id).await?;
        let transition = RequestTransitions::cancel(&request)?;
        let updated = self.commit(&request, &transition, actor).await?;

        info!(request_id = %request_id, cancelled_by = %actor, "Approval request cancelled");
        self.notify_requester(&updated, format!("Request {} has been cancelled.", updated.name()))
            .await;
        self.clear_reminders(&updated).await;
        Ok(updated)
    }

    async fn commit(
        &self,
        request: &Request,
        transition: &Transition,
        actor: UserId,
    ) -> Result<Request, ApprovalError> {
        let commit = RequestTransitions::commit(request, transition, actor)?;
        self.store
            .commit_transition(commit)
            .await
            .map_err(|e| match e {
                StoreError::Stale { request_id, state } => ApprovalError::InvalidState { request_id, state },
                other => other.into(),
            })
    }
}
