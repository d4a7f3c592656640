//! The approval engine: rule administration and request queries.
//!
//! Interception lives in `gate`, decisions in `service` and post-approval
//! replay in `resume`; all of them are methods on [`ApprovalEngine`].

use std::sync::Arc;

use tracing::{info, warn};

use checkpoint_shared::EngineConfig;
use checkpoint_shared::types::{RequestId, RuleId, UserId};

use crate::approval::error::ApprovalError;
use crate::approval::notify::{NotificationSink, NotifyTarget, Reminder};
use crate::approval::registry::{InstallReport, OperationRegistry};
use crate::approval::request::{Request, RequestLog};
use crate::approval::rule::{Rule, RuleDraft, Step, StepDraft};
use crate::approval::store::{ApprovalStore, RequestFilter, RuleFilter};
use crate::approval::types::ApproverKind;

/// Approval workflow engine.
///
/// Cheap to clone; clones share the store, notifier, registry and config.
pub struct ApprovalEngine<S: ApprovalStore, N: NotificationSink> {
    pub(crate) store: Arc<S>,
    pub(crate) notifier: Arc<N>,
    pub(crate) registry: Arc<OperationRegistry>,
    pub(crate) config: Arc<EngineConfig>,
}

impl<S: ApprovalStore, N: NotificationSink> Clone for ApprovalEngine<S, N> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            notifier: Arc::clone(&self.notifier),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: ApprovalStore, N: NotificationSink> ApprovalEngine<S, N> {
    /// Create a new engine.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        registry: Arc<OperationRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            registry,
            config: Arc::new(config),
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The notification sink.
    #[must_use]
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// The operation registry.
    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Rule administration
    // ========================================================================

    /// Re-installs guards from the active rules in the store.
    ///
    /// Unknown operations are logged and reported; they do not fail the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the rules cannot be read.
    pub async fn refresh_guards(&self) -> Result<InstallReport, ApprovalError> {
        let rules = self.store.find_rules(&RuleFilter::active()).await?;
        let report = self.registry.install_guards(&rules);
        for err in report.errors() {
            warn!(error = %err, "Approval guard not installed");
        }
        Ok(report)
    }

    /// Validates and stores a new rule, then refreshes guards.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the draft is invalid or its operation is not
    /// a registered approvable operation.
    pub async fn create_rule(&self, draft: RuleDraft) -> Result<Rule, ApprovalError> {
        let rule = draft.build()?;
        let key = rule.key();
        if !self.registry.is_registered(&key) {
            return Err(ApprovalError::Configuration(format!(
                "approval rule '{}' targets '{key}', which is not a registered approvable operation",
                rule.name
            )));
        }

        self.store.insert_rule(rule.clone()).await?;
        info!(rule = %rule.name, rule_id = %rule.id, operation = %key, steps = rule.steps.len(), "Created approval rule");
        self.refresh_guards().await?;
        Ok(rule)
    }

    /// Appends a step to a rule.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` if the rule does not exist.
    pub async fn add_step(&self, rule_id: RuleId, draft: StepDraft) -> Result<Rule, ApprovalError> {
        let step = Step::from_draft(rule_id, draft);
        let rule = self.store.insert_step(step).await?;
        info!(rule_id = %rule_id, steps = rule.steps.len(), "Added approval step");
        self.refresh_guards().await?;
        Ok(rule)
    }

    /// Enables or disables a rule.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` if the rule does not exist.
    pub async fn set_rule_active(&self, rule_id: RuleId, active: bool) -> Result<Rule, ApprovalError> {
        let rule = self.store.set_rule_active(rule_id, active).await?;
        info!(rule_id = %rule_id, active, "Changed approval rule state");
        self.refresh_guards().await?;
        Ok(rule)
    }

    /// Deletes a rule that no request references.
    ///
    /// # Errors
    ///
    /// Returns `RuleInUse` if requests reference the rule, `RuleNotFound` if
    /// it does not exist.
    pub async fn delete_rule(&self, rule_id: RuleId) -> Result<(), ApprovalError> {
        self.store.delete_rule(rule_id).await?;
        info!(rule_id = %rule_id, "Deleted approval rule");
        self.refresh_guards().await?;
        Ok(())
    }

    /// Loads a rule.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` if the rule does not exist.
    pub async fn rule(&self, rule_id: RuleId) -> Result<Rule, ApprovalError> {
        self.store
            .find_rule(rule_id)
            .await?
            .ok_or(ApprovalError::RuleNotFound(rule_id))
    }

    /// Searches rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn rules(&self, filter: &RuleFilter) -> Result<Vec<Rule>, ApprovalError> {
        Ok(self.store.find_rules(filter).await?)
    }

    // ========================================================================
    // Request queries
    // ========================================================================

    /// Loads a request.
    ///
    /// # Errors
    ///
    /// Returns `RequestNotFound` if the request does not exist.
    pub async fn request(&self, request_id: RequestId) -> Result<Request, ApprovalError> {
        self.store
            .find_request(request_id)
            .await?
            .ok_or(ApprovalError::RequestNotFound(request_id))
    }

    /// Searches requests, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn requests(&self, filter: &RequestFilter) -> Result<Vec<Request>, ApprovalError> {
        Ok(self.store.find_requests(filter).await?)
    }

    /// Decision history of a request, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RequestNotFound` if the request does not exist.
    pub async fn request_logs(&self, request_id: RequestId) -> Result<Vec<RequestLog>, ApprovalError> {
        self.request(request_id).await?;
        Ok(self.store.request_logs(request_id).await?)
    }

    /// Users who may decide the request right now.
    ///
    /// Empty once the request is resolved.
    ///
    /// # Errors
    ///
    /// Returns an error if group members cannot be read.
    pub async fn current_approvers(&self, request: &Request) -> Result<Vec<UserId>, ApprovalError> {
        match (&request.current_step, request.is_pending()) {
            (Some(step), true) => self.step_approvers(step).await,
            _ => Ok(Vec::new()),
        }
    }

    /// Returns true if `user` may decide the request right now.
    ///
    /// # Errors
    ///
    /// Returns an error if group members cannot be read.
    pub async fn can_user_approve(&self, request: &Request, user: UserId) -> Result<bool, ApprovalError> {
        Ok(self.current_approvers(request).await?.contains(&user))
    }

    pub(crate) async fn step_approvers(&self, step: &Step) -> Result<Vec<UserId>, ApprovalError> {
        match step.approver {
            ApproverKind::User(user) => Ok(vec![user]),
            ApproverKind::Group(group) => Ok(self.store.group_members(group).await?),
        }
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    pub(crate) async fn remind(&self, request: &Request, approvers: &[UserId]) {
        let target = NotifyTarget::Request(request.id);
        let summary = format!(
            "Approval required: {} ({})",
            request.name(),
            request.current_step_name()
        );
        for approver in approvers {
            let reminder = Reminder {
                kind: self.config.reminder_kind.clone(),
                approver: *approver,
                target: target.clone(),
                summary: summary.clone(),
            };
            if let Err(e) = self.notifier.schedule_reminder(reminder).await {
                warn!(request_id = %request.id, approver = %approver, error = %e, "Failed to schedule approval reminder");
            }
        }
    }

    pub(crate) async fn post(&self, target: NotifyTarget, text: String) {
        if let Err(e) = self.notifier.post_message(target.clone(), text).await {
            warn!(target = %target, error = %e, "Failed to post message");
        }
    }

    /// Posts a resolution message on the request and to its requester.
    pub(crate) async fn notify_requester(&self, request: &Request, text: String) {
        self.post(NotifyTarget::Request(request.id), text.clone()).await;
        self.post(NotifyTarget::User(request.requested_by), text).await;
    }

    pub(crate) async fn clear_reminders(&self, request: &Request) {
        let target = NotifyTarget::Request(request.id);
        if let Err(e) = self
            .notifier
            .clear_reminders(target, self.config.reminder_kind.clone())
            .await
        {
            warn!(request_id = %request.id, error = %e, "Failed to clear approval reminders");
        }
    }
}
