use super::*;
use std::str::FromStr;
use uuid::Uuid;

#[test]
fn test_typed_id_creation() {
    let id = RuleId::new();
    assert!(!id.to_string().is_empty());
}

#[test]
fn test_typed_id_from_uuid() {
    let uuid = Uuid::new_v4();
    let id = UserId::from_uuid(uuid);
    assert_eq!(id.into_inner(), uuid);
}

#[test]
fn test_typed_id_display() {
    let uuid = Uuid::new_v4();
    let id = RequestId::from_uuid(uuid);
    assert_eq!(format!("{id}"), uuid.to_string());
}

#[test]
fn test_typed_id_from_str() {
    let uuid = Uuid::new_v4();
    let id = GroupId::from_str(&uuid.to_string()).unwrap();
    assert_eq!(id.into_inner(), uuid);
}

#[test]
fn test_typed_id_from_str_error() {
    assert!(StepId::from_str("invalid").is_err());
}

#[test]
fn test_typed_ids_are_time_ordered() {
    // Step tie-breaks rely on creation order following id order.
    let first = StepId::new();
    let second = StepId::new();
    assert!(first < second);
}

#[test]
fn test_record_id_roundtrip() {
    let id = RecordId::from_str("42").unwrap();
    assert_eq!(id, RecordId(42));
    assert_eq!(id.to_string(), "42");
    assert_eq!(RecordId::from(7).into_inner(), 7);
    assert!(RecordId::from_str("forty-two").is_err());
}

#[test]
fn test_record_id_serializes_as_integer() {
    let json = serde_json::to_string(&RecordId(15)).unwrap();
    assert_eq!(json, "15");
}
