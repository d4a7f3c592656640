//! Database seeder for Checkpoint development and testing.
//!
//! Seeds a Finance approver group and a two-step `BigExpense` rule on
//! `expense.submit` so a local engine has something to enforce.
//!
//! Usage: cargo run --bin seeder

use anyhow::Context;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use checkpoint_core::approval::{ApprovalStore, RuleDraft, RuleFilter, StepDraft};
use checkpoint_db::SeaOrmStore;
use checkpoint_db::entities::approval_groups;
use checkpoint_shared::types::{GroupId, UserId};
use checkpoint_shared::{AppConfig, telemetry};

/// Manager who signs the first step.
const MANAGER_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0002);
/// Finance group members.
const FINANCE_MEMBER_IDS: [Uuid; 2] = [
    Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0003),
    Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0004),
];

const FINANCE_GROUP: &str = "Finance";
const BIG_EXPENSE_RULE: &str = "BigExpense";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    telemetry::init(&config.logging);

    println!("Connecting to database...");
    let db = checkpoint_db::connect_with(&config.database)
        .await
        .context("failed to connect to database")?;
    let store = SeaOrmStore::new(db);

    println!("Seeding approver groups...");
    let finance = seed_finance_group(&store).await?;

    println!("Seeding approval rules...");
    seed_big_expense_rule(&store, finance).await?;

    println!("Seeding complete!");
    Ok(())
}

/// Creates the Finance group if missing and resets its members.
async fn seed_finance_group(store: &SeaOrmStore) -> anyhow::Result<GroupId> {
    let existing = approval_groups::Entity::find()
        .filter(approval_groups::Column::Name.eq(FINANCE_GROUP))
        .one(store.connection())
        .await?;

    let group_id = if let Some(group) = existing {
        println!("  {FINANCE_GROUP} group already exists, refreshing members...");
        GroupId::from_uuid(group.id)
    } else {
        let id = store.create_group(FINANCE_GROUP).await?;
        println!("  Created group: {FINANCE_GROUP}");
        id
    };

    let members: Vec<UserId> = FINANCE_MEMBER_IDS.into_iter().map(UserId::from_uuid).collect();
    store.set_group_members(group_id, &members).await?;
    println!("  {FINANCE_GROUP} has {} members", members.len());
    Ok(group_id)
}

/// Every `expense.submit` rule, deactivated ones included, so reseeding
/// never duplicates a rule an admin switched off.
fn big_expense_filter() -> RuleFilter {
    RuleFilter {
        record_type: Some("expense".to_string()),
        operation: Some("submit".to_string()),
        active: None,
    }
}

/// Seeds `amount > 1000` on `expense.submit`: manager first, then Finance.
async fn seed_big_expense_rule(store: &SeaOrmStore, finance: GroupId) -> anyhow::Result<()> {
    let rules = store.find_rules(&big_expense_filter()).await?;
    if rules.iter().any(|rule| rule.name == BIG_EXPENSE_RULE) {
        println!("  {BIG_EXPENSE_RULE} rule already exists, skipping...");
        return Ok(());
    }

    let rule = RuleDraft::new(BIG_EXPENSE_RULE, "expense", "submit")
        .with_condition("amount > 1000")
        .with_step(StepDraft::user(10, UserId::from_uuid(MANAGER_ID), "Manager"))
        .with_step(StepDraft::group(20, finance, FINANCE_GROUP))
        .build()?;

    store.insert_rule(rule).await?;
    println!("  Created rule: {BIG_EXPENSE_RULE} (expense.submit, 2 steps)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_expense_filter_includes_inactive_rules() {
        let filter = big_expense_filter();
        assert_eq!(filter.record_type.as_deref(), Some("expense"));
        assert_eq!(filter.operation.as_deref(), Some("submit"));
        assert_eq!(filter.active, None);
    }
}
