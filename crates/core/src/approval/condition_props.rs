//! Property-based tests for rule conditions.

use proptest::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;

use crate::approval::condition::{Condition, ConditionError};

/// Strategy for generating comparison operators.
fn arb_op() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("=="), Just("!="), Just("<"), Just("<="), Just(">"), Just(">=")]
}

fn reference(op: &str, a: i64, b: i64) -> bool {
    match op {
        "==" => a == b,
        "!=" => a != b,
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        _ => a >= b,
    }
}

/// Strategy for generating field names that are not keywords.
fn arb_field() -> impl Strategy<Value = String> {
    "[a-z]{1,8}_f"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Integer comparisons agree with Rust's own operators.
    #[test]
    fn prop_integer_comparison_matches(a in -10_000i64..10_000, b in -10_000i64..10_000, op in arb_op()) {
        let condition = Condition::parse(&format!("amount {op} {b}")).unwrap();
        let fields = json!({ "amount": a });
        prop_assert_eq!(condition.evaluate(&fields).unwrap(), reference(op, a, b));
    }

    /// Decimal strings on the record compare exactly against numeric literals.
    #[test]
    fn prop_decimal_strings_compare_exactly(cents in 0i64..1_000_000, threshold in 0i64..1_000_000) {
        let amount = Decimal::new(cents, 2);
        let limit = Decimal::new(threshold, 2);
        let condition = Condition::parse(&format!("amount > {limit}")).unwrap();
        let fields = json!({ "amount": amount.to_string() });
        prop_assert_eq!(condition.evaluate(&fields).unwrap(), amount > limit);
    }

    /// `not` inverts, `and`/`or` follow boolean logic.
    #[test]
    fn prop_boolean_connectives(x in any::<bool>(), y in any::<bool>()) {
        let fields = json!({ "x": x, "y": y });
        let eval = |source: &str| Condition::parse(source).unwrap().evaluate(&fields).unwrap();

        prop_assert_eq!(eval("not x"), !x);
        prop_assert_eq!(eval("x and y"), x && y);
        prop_assert_eq!(eval("x or y"), x || y);
        prop_assert_eq!(eval("not (x and y)"), !x || !y);
    }

    /// Membership agrees with a linear search; `not in` is its negation.
    #[test]
    fn prop_membership(value in 0i64..20, list in prop::collection::vec(0i64..20, 0..6)) {
        let items = list.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        let fields = json!({ "code": value });

        let within = Condition::parse(&format!("code in [{items}]")).unwrap();
        let outside = Condition::parse(&format!("code not in [{items}]")).unwrap();

        prop_assert_eq!(within.evaluate(&fields).unwrap(), list.contains(&value));
        prop_assert_eq!(outside.evaluate(&fields).unwrap(), !list.contains(&value));
    }

    /// Referencing an absent field is an evaluation error, never a silent match.
    #[test]
    fn prop_missing_field_is_error(field in arb_field(), b in -100i64..100) {
        let condition = Condition::parse(&format!("{field} > {b}")).unwrap();
        let err = condition.evaluate(&json!({ "other": 1 })).unwrap_err();
        prop_assert_eq!(err, ConditionError::MissingField(field));
    }

    /// Whitespace-only sources compile to a condition that always matches.
    #[test]
    fn prop_blank_source_always_matches(blank in "[ \t\n]{0,5}", amount in any::<i64>()) {
        let condition = Condition::parse(&blank).unwrap();
        prop_assert!(condition.is_always());
        let matched = condition.evaluate(&json!({ "amount": amount })).unwrap();
        prop_assert!(matched);
    }
}
