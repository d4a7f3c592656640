//! Approval rules and their ordered steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use checkpoint_shared::types::{GroupId, RuleId, StepId, UserId};

use crate::approval::condition::Condition;
use crate::approval::error::ApprovalError;
use crate::approval::registry::OperationKey;
use crate::approval::types::ApproverKind;

/// Default sequence for a new step.
pub const DEFAULT_STEP_SEQUENCE: i32 = 10;

/// Default evaluation priority for a new rule.
pub const DEFAULT_RULE_PRIORITY: i32 = 10;

/// One link in a rule's approval chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier for the step.
    pub id: StepId,
    /// Owning rule.
    pub rule_id: RuleId,
    /// Ordering key within the rule (lower runs first, gaps allowed).
    pub sequence: i32,
    /// Who signs off this step.
    pub approver: ApproverKind,
    /// Human-readable approver name used in the display name.
    pub approver_label: Option<String>,
}

impl Step {
    /// Builds a step for a rule from a draft.
    #[must_use]
    pub fn from_draft(rule_id: RuleId, draft: StepDraft) -> Self {
        Self {
            id: StepId::new(),
            rule_id,
            sequence: draft.sequence,
            approver: draft.approver,
            approver_label: draft.approver_label,
        }
    }

    /// Display name, e.g. `Step 10: Alice`.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.approver_label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => format!("Step {}: {label}", self.sequence),
            _ => format!("Step {}", self.sequence),
        }
    }
}

/// Configuration mapping a guarded operation and a condition to an
/// ordered approval chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier for the rule.
    pub id: RuleId,
    /// Human-readable name.
    pub name: String,
    /// Target record type name.
    pub record_type: String,
    /// Target operation name.
    pub operation: String,
    /// Records this rule applies to.
    pub condition: Condition,
    /// Evaluation order among rules on the same operation (lower first).
    pub priority: i32,
    /// Inactive rules are ignored by the gate.
    pub active: bool,
    /// Approval chain, kept sorted by `(sequence, id)`.
    pub steps: Vec<Step>,
    /// When the rule was created.
    pub created_at: DateTime<Utc>,
}

impl Rule {
    /// The (record type, operation) pair this rule guards.
    #[must_use]
    pub fn key(&self) -> OperationKey {
        OperationKey::new(&self.record_type, &self.operation)
    }

    /// Looks up one of this rule's steps.
    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Restores the `(sequence, id)` ordering of the steps.
    ///
    /// Step ids are time-ordered, so among equal sequences the step created
    /// first sorts first.
    pub fn sort_steps(&mut self) {
        self.steps.sort_by_key(|s| (s.sequence, s.id));
    }
}

/// Input for a new step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDraft {
    /// Ordering key within the rule.
    #[serde(default = "default_sequence")]
    pub sequence: i32,
    /// Who signs off this step.
    pub approver: ApproverKind,
    /// Human-readable approver name.
    #[serde(default)]
    pub approver_label: Option<String>,
}

fn default_sequence() -> i32 {
    DEFAULT_STEP_SEQUENCE
}

impl StepDraft {
    /// A step approved by one user.
    #[must_use]
    pub fn user(sequence: i32, user: UserId, label: &str) -> Self {
        Self {
            sequence,
            approver: ApproverKind::User(user),
            approver_label: Some(label.to_string()),
        }
    }

    /// A step approved by any member of a group.
    #[must_use]
    pub fn group(sequence: i32, group: GroupId, label: &str) -> Self {
        Self {
            sequence,
            approver: ApproverKind::Group(group),
            approver_label: Some(label.to_string()),
        }
    }
}

/// Input for a new rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDraft {
    /// Human-readable name.
    pub name: String,
    /// Target record type name.
    pub record_type: String,
    /// Target operation name.
    pub operation: String,
    /// Condition source text; empty applies to every record.
    #[serde(default)]
    pub condition: String,
    /// Evaluation order (lower first).
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Whether the rule is enforced.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Initial approval chain.
    #[serde(default)]
    pub steps: Vec<StepDraft>,
}

fn default_priority() -> i32 {
    DEFAULT_RULE_PRIORITY
}

fn default_active() -> bool {
    true
}

impl RuleDraft {
    /// Starts a draft for `record_type.operation` with default settings.
    pub fn new(
        name: impl Into<String>,
        record_type: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            record_type: record_type.into(),
            operation: operation.into(),
            condition: String::new(),
            priority: DEFAULT_RULE_PRIORITY,
            active: true,
            steps: Vec::new(),
        }
    }

    /// Sets the condition source.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Appends a step.
    #[must_use]
    pub fn with_step(mut self, step: StepDraft) -> Self {
        self.steps.push(step);
        self
    }

    /// Validates the draft and compiles it into a rule.
    ///
    /// Checks that names are present and the condition compiles. Whether the
    /// target operation exists is checked by the engine against its registry.
    pub fn build(self) -> Result<Rule, ApprovalError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ApprovalError::Configuration(
                "approval rule name is required".to_string(),
            ));
        }
        if self.record_type.trim().is_empty() || self.operation.trim().is_empty() {
            return Err(ApprovalError::Configuration(format!(
                "approval rule '{name}' must name a record type and an operation"
            )));
        }

        let condition = Condition::parse(&self.condition).map_err(|e| {
            ApprovalError::Configuration(format!("approval rule '{name}' has an invalid condition: {e}"))
        })?;

        let id = RuleId::new();
        let mut rule = Rule {
            id,
            name,
            record_type: self.record_type.trim().to_string(),
            operation: self.operation.trim().to_string(),
            condition,
            priority: self.priority,
            active: self.active,
            steps: self
                .steps
                .into_iter()
                .map(|draft| Step::from_draft(id, draft))
                .collect(),
            created_at: Utc::now(),
        };
        rule.sort_steps();
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_display_name() {
        let rule_id = RuleId::new();
        let step = Step::from_draft(rule_id, StepDraft::user(10, UserId::new(), "Alice"));
        assert_eq!(step.display_name(), "Step 10: Alice");

        let unlabeled = Step::from_draft(
            rule_id,
            StepDraft {
                sequence: 20,
                approver: ApproverKind::Group(GroupId::new()),
                approver_label: Some("  ".to_string()),
            },
        );
        assert_eq!(unlabeled.display_name(), "Step 20");
    }

    #[test]
    fn test_build_sorts_steps() {
        let rule = RuleDraft::new("BigExpense", "expense", "submit")
            .with_step(StepDraft::group(20, GroupId::new(), "Finance"))
            .with_step(StepDraft::user(5, UserId::new(), "Alice"))
            .build()
            .unwrap();

        let sequences: Vec<i32> = rule.steps.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![5, 20]);
        assert!(rule.steps.iter().all(|s| s.rule_id == rule.id));
        assert!(rule.condition.is_always());
        assert_eq!(rule.key(), OperationKey::new("expense", "submit"));
    }

    #[test]
    fn test_build_rejects_blank_name() {
        let err = RuleDraft::new("  ", "expense", "submit").build().unwrap_err();
        assert!(matches!(err, ApprovalError::Configuration(_)));
    }

    #[test]
    fn test_build_rejects_missing_operation() {
        let err = RuleDraft::new("Rule", "expense", "").build().unwrap_err();
        assert!(err.to_string().contains("Rule"));
    }

    #[test]
    fn test_build_rejects_bad_condition() {
        let err = RuleDraft::new("BigExpense", "expense", "submit")
            .with_condition("amount >")
            .build()
            .unwrap_err();
        match err {
            ApprovalError::Configuration(message) => {
                assert!(message.contains("BigExpense"));
                assert!(message.contains("invalid condition"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_draft_defaults_from_json() {
        let user = UserId::new();
        let draft: RuleDraft = serde_json::from_value(serde_json::json!({
            "name": "Any",
            "record_type": "expense",
            "operation": "submit",
            "steps": [{ "approver": { "type": "user", "id": user.to_string() } }]
        }))
        .unwrap();

        assert_eq!(draft.priority, DEFAULT_RULE_PRIORITY);
        assert!(draft.active);
        assert_eq!(draft.steps[0].sequence, DEFAULT_STEP_SEQUENCE);
        assert_eq!(draft.steps[0].approver, ApproverKind::User(user));
    }
}
