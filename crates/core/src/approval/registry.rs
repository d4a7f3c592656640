//! Registry of approvable operations and installed guards.
//!
//! Host modules register each operation that may be placed under approval
//! together with a human-readable label, and one [`RecordSource`] per record
//! type so approved requests can reload their record. The engine installs a
//! guard on every pair referenced by an active rule; only guarded pairs are
//! routed through the approval gate.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use checkpoint_shared::types::RecordId;

use crate::approval::error::ApprovalError;
use crate::approval::rule::Rule;
use crate::approval::types::{CallContext, Record, RecordRef};

/// Operation names that can never be placed under approval.
pub const RESERVED_OPERATIONS: &[&str] = &["create", "write", "unlink", "read", "search", "browse"];

/// A (record type, operation) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationKey {
    /// Record type name.
    pub record_type: String,
    /// Operation name.
    pub operation: String,
}

impl OperationKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(record_type: &str, operation: &str) -> Self {
        Self {
            record_type: record_type.to_string(),
            operation: operation.to_string(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.record_type, self.operation)
    }
}

/// Failure raised by a host operation or record source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperationError {
    /// The host operation reported a failure.
    #[error("Operation failed: {0}")]
    Failed(String),

    /// The record could not be loaded.
    #[error("Record {0} no longer exists")]
    RecordMissing(RecordRef),

    /// No record source is registered for the record type.
    #[error("No record source registered for '{0}'")]
    NoRecordSource(String),

    /// The operation is not registered.
    #[error("Operation '{0}' is not registered")]
    NotRegistered(OperationKey),
}

impl OperationError {
    /// Convenience constructor for host failures.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A host operation that may be placed under approval.
#[async_trait]
pub trait GuardedOperation: Send + Sync {
    /// Runs the operation on `records` with the call's arguments.
    async fn call(
        &self,
        ctx: CallContext,
        records: &[Record],
        args: &Value,
    ) -> Result<Value, OperationError>;
}

/// Loads host records by key.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Returns the records that still exist among `ids`.
    async fn load(&self, ids: &[RecordId]) -> Result<Vec<Record>, OperationError>;
}

/// A registered approvable operation.
#[derive(Clone)]
pub struct ApprovableOperation {
    /// The pair this operation is registered under.
    pub key: OperationKey,
    /// Human-readable label.
    pub label: String,
    /// The host callable.
    pub operation: Arc<dyn GuardedOperation>,
}

impl fmt::Debug for ApprovableOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovableOperation")
            .field("key", &self.key)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Outcome of one guard installation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Pairs that received a guard in this pass.
    pub installed: Vec<OperationKey>,
    /// Pairs that were already guarded.
    pub already_installed: Vec<OperationKey>,
    /// Guards removed because no active rule references them.
    pub retired: Vec<OperationKey>,
    /// Referenced pairs with no registered operation.
    pub unknown: Vec<OperationKey>,
}

impl InstallReport {
    /// Returns true when every referenced pair could be guarded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unknown.is_empty()
    }

    /// One configuration error per unknown pair.
    #[must_use]
    pub fn errors(&self) -> Vec<ApprovalError> {
        self.unknown
            .iter()
            .map(|key| {
                ApprovalError::Configuration(format!(
                    "approval rules reference '{key}', which is not a registered approvable operation"
                ))
            })
            .collect()
    }
}

/// Derives a label from an operation name: `action_post_entry` → `Post entry`.
#[must_use]
pub fn default_label(operation: &str) -> String {
    let words = operation.strip_prefix("action_").unwrap_or(operation).replace('_', " ");
    let words = words.trim();
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_reserved(operation: &str) -> bool {
    operation.starts_with('_') || RESERVED_OPERATIONS.contains(&operation)
}

/// Process-wide registry of approvable operations and installed guards.
#[derive(Default)]
pub struct OperationRegistry {
    operations: DashMap<OperationKey, ApprovableOperation>,
    sources: DashMap<String, Arc<dyn RecordSource>>,
    guards: DashSet<OperationKey>,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.operations.len())
            .field("sources", &self.sources.len())
            .field("guards", &self.guards.len())
            .finish()
    }
}

impl OperationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an approvable operation.
    ///
    /// `label` defaults to one derived from the operation name.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for blank names and for reserved or private
    /// operation names.
    pub fn register(
        &self,
        record_type: &str,
        operation: &str,
        label: Option<&str>,
        callable: Arc<dyn GuardedOperation>,
    ) -> Result<OperationKey, ApprovalError> {
        let record_type = record_type.trim();
        let operation = operation.trim();
        if record_type.is_empty() || operation.is_empty() {
            return Err(ApprovalError::Configuration(
                "approvable operations need a record type and an operation name".to_string(),
            ));
        }
        if is_reserved(operation) {
            return Err(ApprovalError::Configuration(format!(
                "'{operation}' cannot be placed under approval"
            )));
        }

        let key = OperationKey::new(record_type, operation);
        let label = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map_or_else(|| default_label(operation), str::to_string);

        debug!(operation = %key, label = %label, "Registered approvable operation");
        self.operations.insert(
            key.clone(),
            ApprovableOperation {
                key: key.clone(),
                label,
                operation: callable,
            },
        );
        Ok(key)
    }

    /// Registers the record source for a record type, replacing any previous one.
    pub fn register_source(&self, record_type: &str, source: Arc<dyn RecordSource>) {
        self.sources.insert(record_type.trim().to_string(), source);
    }

    /// Returns true if the pair is a registered approvable operation.
    #[must_use]
    pub fn is_registered(&self, key: &OperationKey) -> bool {
        self.operations.contains_key(key)
    }

    /// Looks up a registered operation.
    #[must_use]
    pub fn operation(&self, key: &OperationKey) -> Option<ApprovableOperation> {
        self.operations.get(key).map(|entry| entry.value().clone())
    }

    /// Looks up the record source for a record type.
    #[must_use]
    pub fn source(&self, record_type: &str) -> Option<Arc<dyn RecordSource>> {
        self.sources.get(record_type).map(|entry| Arc::clone(entry.value()))
    }

    /// Approvable operations of one record type as `(operation, label)`, sorted by name.
    #[must_use]
    pub fn approvable_operations(&self, record_type: &str) -> Vec<(String, String)> {
        let mut ops: Vec<(String, String)> = self
            .operations
            .iter()
            .filter(|entry| entry.key().record_type == record_type)
            .map(|entry| (entry.key().operation.clone(), entry.value().label.clone()))
            .collect();
        ops.sort();
        ops
    }

    /// Returns true if invocations of the pair pass through the approval gate.
    #[must_use]
    pub fn is_guarded(&self, key: &OperationKey) -> bool {
        self.guards.contains(key)
    }

    /// Currently guarded pairs, sorted.
    #[must_use]
    pub fn guarded(&self) -> Vec<OperationKey> {
        let mut keys: Vec<OperationKey> = self.guards.iter().map(|k| k.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Brings installed guards in line with the given rules.
    ///
    /// Every distinct pair referenced by an active rule gets exactly one
    /// guard; pairs that are not registered are reported and skipped; guards
    /// no longer referenced are retired. Running it twice with the same rules
    /// changes nothing.
    pub fn install_guards<'a>(&self, rules: impl IntoIterator<Item = &'a Rule>) -> InstallReport {
        let referenced: BTreeSet<OperationKey> = rules
            .into_iter()
            .filter(|rule| rule.active)
            .map(Rule::key)
            .collect();

        let mut report = InstallReport::default();
        for key in &referenced {
            if !self.is_registered(key) {
                warn!(operation = %key, "Approval rule references an unknown operation");
                report.unknown.push(key.clone());
            } else if self.guards.insert(key.clone()) {
                info!(operation = %key, "Installed approval guard");
                report.installed.push(key.clone());
            } else {
                report.already_installed.push(key.clone());
            }
        }

        let stale: Vec<OperationKey> = self
            .guards
            .iter()
            .filter(|k| !referenced.contains(k.key()))
            .map(|k| k.key().clone())
            .collect();
        for key in stale {
            if self.guards.remove(&key).is_some() {
                info!(operation = %key, "Retired approval guard");
                report.retired.push(key);
            }
        }
        report.retired.sort();
        report
    }
}
