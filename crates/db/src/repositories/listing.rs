//! Paginated admin listings of rules and requests.

use std::collections::HashMap;

use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use uuid::Uuid;

use checkpoint_core::approval::{Request, RequestFilter, Rule, RuleFilter, StoreError};
use checkpoint_shared::types::{PageRequest, PageResponse};

use super::approval::{db_err, hydrate_requests, request_query, rule_from_models};
use crate::entities::{approval_requests, approval_rule_steps, approval_rules};

/// Read-only listings for administration screens.
#[derive(Debug, Clone)]
pub struct ApprovalListingRepository {
    db: DatabaseConnection,
}

impl ApprovalListingRepository {
    /// Creates a new listing repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Lists requests matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn requests(
        &self,
        filter: &RequestFilter,
        page: &PageRequest,
    ) -> Result<PageResponse<Request>, StoreError> {
        let total = request_query(filter).count(&self.db).await.map_err(db_err)?;

        let models = request_query(filter)
            .order_by_desc(approval_requests::Column::RequestedAt)
            .order_by_desc(approval_requests::Column::Id)
            .offset(page.offset())
            .limit(page.limit())
            .all(&self.db)
            .await
            .map_err(db_err)?;

        let data = hydrate_requests(&self.db, models).await?;
        Ok(PageResponse::new(data, page, total))
    }

    /// Lists rules matching `filter` in evaluation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn rules(&self, filter: &RuleFilter, page: &PageRequest) -> Result<PageResponse<Rule>, StoreError> {
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

        let total = query.clone().count(&self.db).await.map_err(db_err)?;

        let rules = query
            .order_by_asc(approval_rules::Column::Priority)
            .order_by_asc(approval_rules::Column::Name)
            .order_by_asc(approval_rules::Column::CreatedAt)
            .offset(page.offset())
            .limit(page.limit())
            .all(&self.db)
            .await
            .map_err(db_err)?;

        let mut steps_by_rule: HashMap<Uuid, Vec<approval_rule_steps::Model>> = HashMap::new();
        if !rules.is_empty() {
            for step in approval_rule_steps::Entity::find()
                .filter(approval_rule_steps::Column::RuleId.is_in(rules.iter().map(|r| r.id)))
                .order_by_asc(approval_rule_steps::Column::Sequence)
                .order_by_asc(approval_rule_steps::Column::Id)
                .all(&self.db)
                .await
                .map_err(db_err)?
            {
                steps_by_rule.entry(step.rule_id).or_default().push(step);
            }
        }

        let data = rules
            .into_iter()
            .map(|rule| {
                let steps = steps_by_rule.remove(&rule.id).unwrap_or_default();
                rule_from_models(rule, steps)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PageResponse::new(data, page, total))
    }
}
