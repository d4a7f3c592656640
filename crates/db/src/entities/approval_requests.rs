//! `SeaORM` Entity for approval_requests table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "approval_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub rule_id: Uuid,
    pub res_model: String,
    pub res_id: i64,
    pub requested_by: Uuid,
    pub requested_at: DateTimeWithTimeZone,
    pub state: String,
    pub current_step_id: Option<Uuid>,
    #[sea_orm(column_type = "JsonBinary")]
    pub call_args: Json,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::approval_rules::Entity",
        from = "Column::RuleId",
        to = "super::approval_rules::Column::Id",
        on_delete = "Restrict"
    )]
    Rule,
    #[sea_orm(
        belongs_to = "super::approval_rule_steps::Entity",
        from = "Column::CurrentStepId",
        to = "super::approval_rule_steps::Column::Id"
    )]
    CurrentStep,
    #[sea_orm(has_many = "super::approval_request_logs::Entity")]
    Logs,
}

impl Related<super::approval_rules::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rule.def()
    }
}

impl Related<super::approval_rule_steps::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CurrentStep.def()
    }
}

impl Related<super::approval_request_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Logs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
