//! Interception of guarded operations.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, info};

use crate::approval::engine::ApprovalEngine;
use crate::approval::error::{ApprovalError, CreatedRequest};
use crate::approval::matcher::RuleMatcher;
use crate::approval::notify::NotificationSink;
use crate::approval::registry::{OperationError, OperationKey};
use crate::approval::request::Request;
use crate::approval::rule::{Rule, Step};
use crate::approval::store::{ApprovalStore, RequestFilter, RuleFilter, StoreError};
use crate::approval::types::{CallContext, Decision, Record, RequestState};

/// Reason reported for a rejection stored without one.
pub const UNSPECIFIED_REASON: &str = "Not specified";

/// What one record needs before the operation may run on it.
enum Clearance<'a> {
    /// No approval needed, or already granted.
    Cleared,
    /// A new request must be opened.
    NeedsRequest(&'a Rule, &'a Step),
}

impl<S: ApprovalStore, N: NotificationSink> ApprovalEngine<S, N> {
    /// Invokes a registered operation through the approval gate.
    ///
    /// Every record is classified before anything is written. If any record
    /// is blocked, or needs a request whose rule is misconfigured, the call
    /// fails and no request is created. If new requests are needed they are
    /// all opened and the call fails with `ApprovalCreated`; nothing runs.
    /// Otherwise the operation runs on the cleared records only, and is not
    /// called at all when none remain.
    ///
    /// Calls carrying a bypass marker, and calls to unguarded operations, run
    /// directly.
    ///
    /// # Errors
    ///
    /// - `BlockedPendingApproval` / `BlockedRejected` for blocked records
    /// - `ApprovalCreated` when requests were opened
    /// - `Configuration` for a matched rule with no steps
    /// - `Operation` when the operation is unknown or fails
    pub async fn invoke(
        &self,
        key: &OperationKey,
        ctx: CallContext,
        records: Vec<Record>,
        args: Value,
    ) -> Result<Option<Value>, ApprovalError> {
        let operation = self
            .registry
            .operation(key)
            .ok_or_else(|| OperationError::NotRegistered(key.clone()))?;

        if let Some(request_id) = ctx.bypass() {
            debug!(operation = %key, request_id = %request_id, "Bypassing approval gate");
            return Ok(Some(operation.operation.call(ctx, &records, &args).await?));
        }
        if !self.registry.is_guarded(key) {
            return Ok(Some(operation.operation.call(ctx, &records, &args).await?));
        }

        let mut rules = self.store.find_rules(&RuleFilter::active_for(key)).await?;
        RuleMatcher::sort_rules(&mut rules);

        let mut seen = HashSet::new();
        let mut cleared = Vec::new();
        let mut planned = Vec::new();
        for record in records {
            if !seen.insert(record.id) {
                continue;
            }
            match self.classify(key, &rules, &record).await? {
                Clearance::Cleared => cleared.push(record),
                Clearance::NeedsRequest(rule, step) => {
                    planned.push(Request::open(rule, step.clone(), record.id, ctx.user, args.clone()));
                }
            }
        }

        if !planned.is_empty() {
            let requests = self.open_requests(planned).await?;
            return Err(ApprovalError::ApprovalCreated { requests });
        }
        if cleared.is_empty() {
            debug!(operation = %key, "No records cleared; operation not called");
            return Ok(None);
        }

        debug!(operation = %key, records = cleared.len(), "Running guarded operation");
        Ok(Some(operation.operation.call(ctx, &cleared, &args).await?))
    }

    async fn classify<'a>(
        &self,
        key: &OperationKey,
        rules: &'a [Rule],
        record: &Record,
    ) -> Result<Clearance<'a>, ApprovalError> {
        let Some(rule) = RuleMatcher::first_matching_rule(rules, record) else {
            debug!(operation = %key, record_id = %record.id, "No approval rule matched");
            return Ok(Clearance::Cleared);
        };

        let filter = RequestFilter::for_record(rule.id, &key.record_type, record.id).latest();
        let latest = self.store.find_requests(&filter).await?.into_iter().next();

        match latest {
            Some(request) if request.state == RequestState::Approved => {
                debug!(rule = %rule.name, record_id = %record.id, request_id = %request.id, "Record already approved");
                Ok(Clearance::Cleared)
            }
            Some(request) if request.state == RequestState::Pending => Err(Self::blocked_pending(&request)),
            Some(request) if request.state == RequestState::Rejected => {
                let reason = self.rejection_reason(&request).await?;
                Err(ApprovalError::BlockedRejected {
                    request_id: request.id,
                    request_name: request.name(),
                    reason,
                })
            }
            _ => {
                let step = RuleMatcher::first_step(rule)?;
                Ok(Clearance::NeedsRequest(rule, step))
            }
        }
    }

    async fn rejection_reason(&self, request: &Request) -> Result<String, ApprovalError> {
        let logs = self.store.request_logs(request.id).await?;
        Ok(logs
            .into_iter()
            .find(|log| log.decision == Decision::Rejected)
            .and_then(|log| log.reason)
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or_else(|| UNSPECIFIED_REASON.to_string()))
    }

    fn blocked_pending(request: &Request) -> ApprovalError {
        ApprovalError::BlockedPendingApproval {
            request_id: request.id,
            request_name: request.name(),
            step_name: request.current_step_name(),
        }
    }

    async fn open_requests(&self, planned: Vec<Request>) -> Result<Vec<CreatedRequest>, ApprovalError> {
        match self.store.insert_requests(planned.clone()).await {
            Ok(()) => {}
            Err(StoreError::DuplicatePending(existing)) => {
                let request = self.request(existing).await?;
                return Err(Self::blocked_pending(&request));
            }
            Err(e) => return Err(e.into()),
        }

        let mut created = Vec::with_capacity(planned.len());
        for request in planned {
            let approvers = self.current_approvers(&request).await?;
            info!(
                request_id = %request.id,
                request = %request.name(),
                step = %request.current_step_name(),
                requested_by = %request.requested_by,
                approvers = approvers.len(),
                "Created approval request"
            );
            self.remind(&request, &approvers).await;
            created.push(CreatedRequest {
                request_id: request.id,
                name: request.name(),
                step_name: request.current_step_name(),
                approvers,
            });
        }
        Ok(created)
    }
}
