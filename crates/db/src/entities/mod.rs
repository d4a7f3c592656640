//! `SeaORM` entity definitions for the approval tables.

pub mod approval_group_members;
pub mod approval_groups;
pub mod approval_request_logs;
pub mod approval_requests;
pub mod approval_rule_steps;
pub mod approval_rules;
