//! Rule matching and step ordering.

use tracing::warn;

use crate::approval::error::ApprovalError;
use crate::approval::rule::{Rule, Step};
use crate::approval::types::Record;

/// Stateless rule matcher.
pub struct RuleMatcher;

impl RuleMatcher {
    /// Sorts rules into evaluation order: priority, then name, then creation.
    pub fn sort_rules(rules: &mut [Rule]) {
        rules.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.name.cmp(&b.name))
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
    }

    /// Returns the first active rule whose condition holds for `record`.
    ///
    /// `rules` must already be in evaluation order. A condition that fails
    /// to evaluate counts as a non-match for that rule only.
    #[must_use]
    pub fn first_matching_rule<'a>(rules: &'a [Rule], record: &Record) -> Option<&'a Rule> {
        rules.iter().filter(|rule| rule.active).find(|rule| {
            match rule.condition.evaluate(&record.fields) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(
                        rule = %rule.name,
                        rule_id = %rule.id,
                        record_id = %record.id,
                        error = %e,
                        "Approval rule condition could not be evaluated; skipping rule"
                    );
                    false
                }
            }
        })
    }

    /// The step a new request starts at.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` naming the rule if it has no steps.
    pub fn first_step(rule: &Rule) -> Result<&Step, ApprovalError> {
        rule.steps
            .iter()
            .min_by_key(|step| (step.sequence, step.id))
            .ok_or_else(|| {
                ApprovalError::Configuration(format!(
                    "approval rule '{}' has no steps defined",
                    rule.name
                ))
            })
    }

    /// The step after `current`: lowest sequence strictly greater than the
    /// current one, earliest created among equals.
    #[must_use]
    pub fn next_step<'a>(rule: &'a Rule, current: &Step) -> Option<&'a Step> {
        rule.steps
            .iter()
            .filter(|step| step.sequence > current.sequence)
            .min_by_key(|step| (step.sequence, step.id))
    }
}
