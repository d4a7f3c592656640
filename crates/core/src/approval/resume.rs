//! Replay of an operation once its request is fully approved.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use checkpoint_shared::types::{RequestId, UserId};

use crate::approval::engine::ApprovalEngine;
use crate::approval::error::ApprovalError;
use crate::approval::notify::{NotificationSink, NotifyTarget};
use crate::approval::registry::{OperationError, OperationKey};
use crate::approval::request::Request;
use crate::approval::rule::Rule;
use crate::approval::store::ApprovalStore;
use crate::approval::types::{CallContext, RecordRef};

/// Why an approved operation could not be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumptionFailure {
    /// The approved request.
    pub request_id: RequestId,
    /// The record the operation was meant for.
    pub record: RecordRef,
    /// Operation name.
    pub operation: String,
    /// Error text.
    pub message: String,
}

impl fmt::Display for ResumptionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Action '{}' on {} failed after approval: {}",
            self.operation, self.record, self.message
        )
    }
}

/// Result of replaying the approved operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Resumption {
    /// The operation ran; carries its return value.
    Executed(Value),
    /// The operation could not run. The request stays approved.
    Failed(ResumptionFailure),
}

impl Resumption {
    /// Returns true if the operation ran.
    #[must_use]
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed(_))
    }
}

impl<S: ApprovalStore, N: NotificationSink> ApprovalEngine<S, N> {
    /// Re-runs the rule's operation on the request's record, bypassing the gate.
    ///
    /// Never fails: problems are logged, posted on the record and returned
    /// as [`Resumption::Failed`].
    pub(crate) async fn resume(&self, request: &Request, rule: &Rule, actor: UserId) -> Resumption {
        let key = rule.key();
        let target = NotifyTarget::Record(request.target());

        match self.replay(request, &key, actor).await {
            Ok(result) => {
                info!(request_id = %request.id, operation = %key, record_id = %request.record_id, "Executed approved operation");
                self.post(target, format!("Action '{}' executed after approval.", key.operation))
                    .await;
                Resumption::Executed(result)
            }
            Err(e) => {
                error!(
                    request_id = %request.id,
                    operation = %key,
                    record_id = %request.record_id,
                    error = %e,
                    "Approved operation failed to execute"
                );
                let failure = ResumptionFailure {
                    request_id: request.id,
                    record: request.target(),
                    operation: key.operation.clone(),
                    message: e.to_string(),
                };
                self.post(target, failure.to_string()).await;
                Resumption::Failed(failure)
            }
        }
    }

    async fn replay(&self, request: &Request, key: &OperationKey, actor: UserId) -> Result<Value, ApprovalError> {
        let source = self
            .registry
            .source(&request.record_type)
            .ok_or_else(|| OperationError::NoRecordSource(request.record_type.clone()))?;

        let record = source
            .load(&[request.record_id])
            .await?
            .into_iter()
            .find(|record| record.id == request.record_id)
            .ok_or_else(|| OperationError::RecordMissing(request.target()))?;

        let ctx = CallContext::resuming(actor, request.id);
        let result = self
            .invoke(key, ctx, vec![record], request.call_args.clone())
            .await?;
        Ok(result.unwrap_or(Value::Null))
    }
}
