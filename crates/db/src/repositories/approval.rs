//! PostgreSQL-backed approval store.
//!
//! Implements [`ApprovalStore`] on the approval tables. The pending-request
//! uniqueness rule is enforced by a partial unique index, and decisions are
//! applied with a compare-and-set update inside the transaction that also
//! appends the log entry.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, Set, SqlErr, TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

use checkpoint_core::approval::{
    ApprovalStore, ApproverKind, Condition, Decision, Request, RequestFilter, RequestLog,
    RequestState, Rule, RuleFilter, Step, StoreError, TransitionCommit,
};
use checkpoint_shared::types::{
    GroupId, RecordId, RequestId, RequestLogId, RuleId, StepId, UserId,
};

use crate::entities::{
    approval_group_members, approval_groups, approval_request_logs, approval_requests,
    approval_rule_steps, approval_rules,
};

// ============================================================================
// Conversions
// ============================================================================

pub(crate) fn db_err(err: DbErr) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn is_foreign_key_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::ForeignKeyConstraintViolation(_)))
}

pub(crate) fn step_from_model(model: approval_rule_steps::Model) -> Result<Step, StoreError> {
    let approver = ApproverKind::from_parts(
        &model.approver_kind,
        model.approver_user_id.map(UserId::from_uuid),
        model.approver_group_id.map(GroupId::from_uuid),
    )
    .ok_or_else(|| {
        StoreError::Backend(format!(
            "step {} has an inconsistent approver ({})",
            model.id, model.approver_kind
        ))
    })?;

    Ok(Step {
        id: StepId::from_uuid(model.id),
        rule_id: RuleId::from_uuid(model.rule_id),
        sequence: model.sequence,
        approver,
        approver_label: model.approver_label,
    })
}

pub(crate) fn rule_from_models(
    model: approval_rules::Model,
    steps: Vec<approval_rule_steps::Model>,
) -> Result<Rule, StoreError> {
    let condition = Condition::parse(&model.condition).map_err(|e| {
        StoreError::Backend(format!("rule {} has an invalid stored condition: {e}", model.id))
    })?;

    let mut rule = Rule {
        id: RuleId::from_uuid(model.id),
        name: model.name,
        record_type: model.res_model,
        operation: model.operation,
        condition,
        priority: model.priority,
        active: model.active,
        steps: steps
            .into_iter()
            .map(step_from_model)
            .collect::<Result<Vec<_>, _>>()?,
        created_at: model.created_at.with_timezone(&Utc),
    };
    rule.sort_steps();
    Ok(rule)
}

pub(crate) fn parse_state(raw: &str) -> Result<RequestState, StoreError> {
    RequestState::parse(raw).ok_or_else(|| StoreError::Backend(format!("unknown request state '{raw}'")))
}

pub(crate) fn request_from_model(
    model: approval_requests::Model,
    rule_name: String,
    current_step: Option<Step>,
) -> Result<Request, StoreError> {
    Ok(Request {
        id: RequestId::from_uuid(model.id),
        rule_id: RuleId::from_uuid(model.rule_id),
        rule_name,
        record_type: model.res_model,
        record_id: RecordId(model.res_id),
        requested_by: UserId::from_uuid(model.requested_by),
        requested_at: model.requested_at.with_timezone(&Utc),
        state: parse_state(&model.state)?,
        current_step,
        call_args: model.call_args,
    })
}

pub(crate) fn log_from_model(model: approval_request_logs::Model) -> Result<RequestLog, StoreError> {
    let decision = Decision::parse(&model.decision)
        .ok_or_else(|| StoreError::Backend(format!("unknown decision '{}'", model.decision)))?;

    Ok(RequestLog {
        id: RequestLogId::from_uuid(model.id),
        request_id: RequestId::from_uuid(model.request_id),
        step_id: model.step_id.map(StepId::from_uuid),
        decision,
        decided_by: UserId::from_uuid(model.decided_by),
        decided_at: model.decided_at.with_timezone(&Utc),
        reason: model.reason,
    })
}

pub(crate) fn step_active_model(step: &Step) -> approval_rule_steps::ActiveModel {
    approval_rule_steps::ActiveModel {
        id: Set(step.id.into_inner()),
        rule_id: Set(step.rule_id.into_inner()),
        sequence: Set(step.sequence),
        approver_kind: Set(step.approver.kind_str().to_string()),
        approver_user_id: Set(step.approver.user().map(UserId::into_inner)),
        approver_group_id: Set(step.approver.group().map(GroupId::into_inner)),
        approver_label: Set(step.approver_label.clone()),
        created_at: Set(Utc::now().into()),
    }
}

pub(crate) fn request_active_model(request: &Request) -> approval_requests::ActiveModel {
    approval_requests::ActiveModel {
        id: Set(request.id.into_inner()),
        rule_id: Set(request.rule_id.into_inner()),
        res_model: Set(request.record_type.clone()),
        res_id: Set(request.record_id.into_inner()),
        requested_by: Set(request.requested_by.into_inner()),
        requested_at: Set(request.requested_at.into()),
        state: Set(request.state.as_str().to_string()),
        current_step_id: Set(request.current_step.as_ref().map(|s| s.id.into_inner())),
        call_args: Set(request.call_args.clone()),
        updated_at: Set(Utc::now().into()),
    }
}

pub(crate) fn log_active_model(log: &RequestLog) -> approval_request_logs::ActiveModel {
    approval_request_logs::ActiveModel {
        id: Set(log.id.into_inner()),
        request_id: Set(log.request_id.into_inner()),
        step_id: Set(log.step_id.map(StepId::into_inner)),
        decision: Set(log.decision.as_str().to_string()),
        decided_by: Set(log.decided_by.into_inner()),
        decided_at: Set(log.decided_at.into()),
        reason: Set(log.reason.clone()),
    }
}

/// Builds the request query for a filter, without ordering.
pub(crate) fn request_query(filter: &RequestFilter) -> Select<approval_requests::Entity> {
    let mut query = approval_requests::Entity::find();
    if let Some(rule_id) = filter.rule_id {
        query = query.filter(approval_requests::Column::RuleId.eq(rule_id.into_inner()));
    }
    if let Some(record_type) = &filter.record_type {
        query = query.filter(approval_requests::Column::ResModel.eq(record_type.as_str()));
    }
    if let Some(record_id) = filter.record_id {
        query = query.filter(approval_requests::Column::ResId.eq(record_id.into_inner()));
    }
    if let Some(state) = filter.state {
        query = query.filter(approval_requests::Column::State.eq(state.as_str()));
    }
    if let Some(user) = filter.requested_by {
        query = query.filter(approval_requests::Column::RequestedBy.eq(user.into_inner()));
    }
    query
}

/// Attaches rule names and current steps to request rows.
pub(crate) async fn hydrate_requests(
    db: &DatabaseConnection,
    models: Vec<approval_requests::Model>,
) -> Result<Vec<Request>, StoreError> {
    if models.is_empty() {
        return Ok(Vec::new());
    }

    let rule_ids: BTreeSet<Uuid> = models.iter().map(|m| m.rule_id).collect();
    let names: HashMap<Uuid, String> = approval_rules::Entity::find()
        .filter(approval_rules::Column::Id.is_in(rule_ids))
        .all(db)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(|rule| (rule.id, rule.name))
        .collect();

    let step_ids: BTreeSet<Uuid> = models.iter().filter_map(|m| m.current_step_id).collect();
    let mut steps: HashMap<Uuid, Step> = HashMap::new();
    if !step_ids.is_empty() {
        for model in approval_rule_steps::Entity::find()
            .filter(approval_rule_steps::Column::Id.is_in(step_ids))
            .all(db)
            .await
            .map_err(db_err)?
        {
            steps.insert(model.id, step_from_model(model)?);
        }
    }

    models
        .into_iter()
        .map(|model| {
            let name = names.get(&model.rule_id).cloned().unwrap_or_default();
            let step = match model.current_step_id {
                Some(id) => Some(steps.get(&id).cloned().ok_or_else(|| {
                    StoreError::Backend(format!("request {} points at missing step {id}", model.id))
                })?),
                None => None,
            };
            request_from_model(model, name, step)
        })
        .collect()
}

// ============================================================================
// Store
// ============================================================================

/// Approval store on PostgreSQL.
#[derive(Debug, Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    /// Creates a new store.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Creates an approver group.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or the insert fails.
    pub async fn create_group(&self, name: &str) -> Result<GroupId, StoreError> {
        let id = GroupId::new();
        approval_groups::ActiveModel {
            id: Set(id.into_inner()),
            name: Set(name.trim().to_string()),
            created_at: Set(Utc::now().into()),
        }
        .insert(&self.db)
        .await
        .map_err(db_err)?;
        Ok(id)
    }

    /// Replaces the members of an approver group.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn set_group_members(&self, group_id: GroupId, members: &[UserId]) -> Result<(), StoreError> {
        let txn = self.db.begin().await.map_err(db_err)?;

        approval_group_members::Entity::delete_many()
            .filter(approval_group_members::Column::GroupId.eq(group_id.into_inner()))
            .exec(&txn)
            .await
            .map_err(db_err)?;

        let now = Utc::now();
        for user in members.iter().collect::<BTreeSet<_>>() {
            approval_group_members::ActiveModel {
                group_id: Set(group_id.into_inner()),
                user_id: Set(user.into_inner()),
                created_at: Set(now.into()),
            }
            .insert(&txn)
            .await
            .map_err(db_err)?;
        }

        txn.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn load_steps(&self, rule_ids: Vec<Uuid>) -> Result<Vec<approval_rule_steps::Model>, StoreError> {
        approval_rule_steps::Entity::find()
            .filter(approval_rule_steps::Column::RuleId.is_in(rule_ids))
            .order_by_asc(approval_rule_steps::Column::Sequence)
            .order_by_asc(approval_rule_steps::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)
    }

    async fn pending_request_id(&self, request: &Request) -> Result<Option<RequestId>, StoreError> {
        let existing = approval_requests::Entity::find()
            .filter(approval_requests::Column::RuleId.eq(request.rule_id.into_inner()))
            .filter(approval_requests::Column::ResModel.eq(request.record_type.as_str()))
            .filter(approval_requests::Column::ResId.eq(request.record_id.into_inner()))
            .filter(approval_requests::Column::State.eq(RequestState::Pending.as_str()))
            .one(&self.db)
            .await
            .map_err(db_err)?;
        Ok(existing.map(|m| RequestId::from_uuid(m.id)))
    }
}

impl ApprovalStore for SeaOrmStore {
    async fn insert_rule(&self, rule: Rule) -> Result<(), StoreError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let now = Utc::now();

        approval_rules::ActiveModel {
            id: Set(rule.id.into_inner()),
            name: Set(rule.name.clone()),
            res_model: Set(rule.record_type.clone()),
            operation: Set(rule.operation.clone()),
            condition: Set(rule.condition.source().to_string()),
            priority: Set(rule.priority),
            active: Set(rule.active),
            created_at: Set(rule.created_at.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await
        .map_err(db_err)?;

        for step in &rule.steps {
            step_active_model(step).insert(&txn).await.map_err(db_err)?;
        }

        txn.commit().await.map_err(db_err)?;
        debug!(rule_id = %rule.id, steps = rule.steps.len(), "Inserted approval rule");
        Ok(())
    }

    async fn insert_step(&self, step: Step) -> Result<Rule, StoreError> {
        let rule_id = step.rule_id;
        if approval_rules::Entity::find_by_id(rule_id.into_inner())
            .one(&self.db)
            .await
            .map_err(db_err)?
            .is_none()
        {
            return Err(StoreError::RuleNotFound(rule_id));
        }

        step_active_model(&step).insert(&self.db).await.map_err(db_err)?;
        self.find_rule(rule_id).await?.ok_or(StoreError::RuleNotFound(rule_id))
    }

    async fn set_rule_active(&self, rule_id: RuleId, active: bool) -> Result<Rule, StoreError> {
        let result = approval_rules::Entity::update_many()
            .col_expr(approval_rules::Column::Active, Expr::value(active))
            .col_expr(approval_rules::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(approval_rules::Column::Id.eq(rule_id.into_inner()))
            .exec(&self.db)
            .await
            .map_err(db_err)?;

        if result.rows_affected == 0 {
            return Err(StoreError::RuleNotFound(rule_id));
        }
        self.find_rule(rule_id).await?.ok_or(StoreError::RuleNotFound(rule_id))
    }

    async fn delete_rule(&self, rule_id: RuleId) -> Result<(), StoreError> {
        let id = rule_id.into_inner();
        if approval_rules::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_err)?
            .is_none()
        {
            return Err(StoreError::RuleNotFound(rule_id));
        }

        let referenced = approval_requests::Entity::find()
            .filter(approval_requests::Column::RuleId.eq(id))
            .count(&self.db)
            .await
            .map_err(db_err)?;
        if referenced > 0 {
            return Err(StoreError::RuleInUse(rule_id));
        }

        match approval_rules::Entity::delete_by_id(id).exec(&self.db).await {
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => Err(StoreError::RuleInUse(rule_id)),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn find_rule(&self, rule_id: RuleId) -> Result<Option<Rule>, StoreError> {
        let Some(model) = approval_rules::Entity::find_by_id(rule_id.into_inner())
            .one(&self.db)
            .await
            .map_err(db_err)?
        else {
            return Ok(None);
        };

        let steps = self.load_steps(vec![model.id]).await?;
        rule_from_models(model, steps).map(Some)
    }

    async fn find_rules(&self, filter: &RuleFilter) -> Result<Vec<Rule>, StoreError> {
        let mut query = approval_rules::Entity::find();
        if let Some(record_type) = &filter.record_type {
            query = query.filter(approval_rules::Column::ResModel.eq(record_type.as_str()));
        }
        if let Some(operation) = &filter.operation {
            query = query.filter(approval_rules::Column::Operation.eq(operation.as_str()));
        }
        if let Some(active) = filter.active {
            query = query.filter(approval_rules::Column::Active.eq(active));
        }

        let models = query
            .order_by_asc(approval_rules::Column::Priority)
            .order_by_asc(approval_rules::Column::Name)
            .order_by_asc(approval_rules::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        if models.is_empty() {
            return Ok(Vec::new());
        }

        let mut steps_by_rule: HashMap<Uuid, Vec<approval_rule_steps::Model>> = HashMap::new();
        for step in self.load_steps(models.iter().map(|m| m.id).collect()).await? {
            steps_by_rule.entry(step.rule_id).or_default().push(step);
        }

        models
            .into_iter()
            .map(|model| {
                let steps = steps_by_rule.remove(&model.id).unwrap_or_default();
                rule_from_models(model, steps)
            })
            .collect()
    }

    async fn insert_requests(&self, requests: Vec<Request>) -> Result<(), StoreError> {
        for (i, request) in requests.iter().enumerate() {
            let clash = requests[..i].iter().find(|earlier| {
                earlier.rule_id == request.rule_id
                    && earlier.record_type == request.record_type
                    && earlier.record_id == request.record_id
            });
            if let Some(earlier) = clash {
                return Err(StoreError::DuplicatePending(earlier.id));
            }
        }

        let txn = self.db.begin().await.map_err(db_err)?;
        for request in &requests {
            if let Err(e) = request_active_model(request).insert(&txn).await {
                txn.rollback().await.map_err(db_err)?;
                if is_unique_violation(&e)
                    && let Some(existing) = self.pending_request_id(request).await?
                {
                    debug!(request_id = %existing, "Pending request already exists");
                    return Err(StoreError::DuplicatePending(existing));
                }
                return Err(db_err(e));
            }
        }
        txn.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_request(&self, request_id: RequestId) -> Result<Option<Request>, StoreError> {
        let Some(model) = approval_requests::Entity::find_by_id(request_id.into_inner())
            .one(&self.db)
            .await
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        Ok(hydrate_requests(&self.db, vec![model]).await?.pop())
    }

    async fn find_requests(&self, filter: &RequestFilter) -> Result<Vec<Request>, StoreError> {
        let models = request_query(filter)
            .order_by_desc(approval_requests::Column::RequestedAt)
            .order_by_desc(approval_requests::Column::Id)
            .limit(filter.limit)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        hydrate_requests(&self.db, models).await
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> Result<Request, StoreError> {
        let request_id = commit.request_id;
        let txn = self.db.begin().await.map_err(db_err)?;

        let result = approval_requests::Entity::update_many()
            .col_expr(approval_requests::Column::State, Expr::value(commit.state.as_str()))
            .col_expr(
                approval_requests::Column::CurrentStepId,
                Expr::value(commit.current_step.as_ref().map(|s| s.id.into_inner())),
            )
            .col_expr(approval_requests::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(approval_requests::Column::Id.eq(request_id.into_inner()))
            .filter(approval_requests::Column::State.eq(RequestState::Pending.as_str()))
            .filter(approval_requests::Column::CurrentStepId.eq(commit.expected_step.into_inner()))
            .exec(&txn)
            .await
            .map_err(db_err)?;

        if result.rows_affected == 0 {
            let current = approval_requests::Entity::find_by_id(request_id.into_inner())
                .one(&txn)
                .await
                .map_err(db_err)?;
            txn.rollback().await.map_err(db_err)?;
            return Err(match current {
                None => StoreError::RequestNotFound(request_id),
                Some(model) => StoreError::Stale {
                    request_id,
                    state: parse_state(&model.state)?,
                },
            });
        }

        if let Some(log) = &commit.log {
            log_active_model(log).insert(&txn).await.map_err(db_err)?;
        }
        txn.commit().await.map_err(db_err)?;

        self.find_request(request_id)
            .await?
            .ok_or(StoreError::RequestNotFound(request_id))
    }

    async fn request_logs(&self, request_id: RequestId) -> Result<Vec<RequestLog>, StoreError> {
        approval_request_logs::Entity::find()
            .filter(approval_request_logs::Column::RequestId.eq(request_id.into_inner()))
            .order_by_desc(approval_request_logs::Column::DecidedAt)
            .order_by_desc(approval_request_logs::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(log_from_model)
            .collect()
    }

    async fn group_members(&self, group_id: GroupId) -> Result<Vec<UserId>, StoreError> {
        Ok(approval_group_members::Entity::find()
            .filter(approval_group_members::Column::GroupId.eq(group_id.into_inner()))
            .order_by_asc(approval_group_members::Column::UserId)
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(|m| UserId::from_uuid(m.user_id))
            .collect())
    }
}

#[cfg(test)]
#[path = "approval_tests.rs"]
mod tests;
