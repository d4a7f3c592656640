//! Notification and audit sink.
//!
//! The engine reports reminders for approvers, messages on requests,
//! records and requester inboxes, and reminder clean-up through a [`NotificationSink`]. Delivery
//! is the host's concern; sink failures are logged and never abort the
//! engine.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use checkpoint_shared::types::{RequestId, UserId};

use crate::approval::types::RecordRef;

/// Where a notification is attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "ref", rename_all = "lowercase")]
pub enum NotifyTarget {
    /// An approval request.
    Request(RequestId),
    /// A host record.
    Record(RecordRef),
    /// A user's inbox.
    User(UserId),
}

impl fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(id) => write!(f, "request/{id}"),
            Self::Record(record) => write!(f, "{record}"),
            Self::User(id) => write!(f, "user/{id}"),
        }
    }
}

/// A to-do reminder for one approver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reminder {
    /// Reminder kind, used again when clearing.
    pub kind: String,
    /// User who should act.
    pub approver: UserId,
    /// Attached to.
    pub target: NotifyTarget,
    /// One-line summary.
    pub summary: String,
}

/// Sink delivery failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Receives the engine's notification events.
pub trait NotificationSink: Send + Sync {
    /// Schedule a reminder for an approver.
    fn schedule_reminder(
        &self,
        reminder: Reminder,
    ) -> impl std::future::Future<Output = Result<(), NotifyError>> + Send;

    /// Post a visible message on a request or record.
    fn post_message(
        &self,
        target: NotifyTarget,
        text: String,
    ) -> impl std::future::Future<Output = Result<(), NotifyError>> + Send;

    /// Remove every reminder of `kind` attached to `target`.
    fn clear_reminders(
        &self,
        target: NotifyTarget,
        kind: String,
    ) -> impl std::future::Future<Output = Result<(), NotifyError>> + Send;
}

/// Sink that emits structured log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    async fn schedule_reminder(&self, reminder: Reminder) -> Result<(), NotifyError> {
        info!(
            kind = %reminder.kind,
            approver = %reminder.approver,
            target = %reminder.target,
            summary = %reminder.summary,
            "Scheduled approval reminder"
        );
        Ok(())
    }

    async fn post_message(&self, target: NotifyTarget, text: String) -> Result<(), NotifyError> {
        info!(target = %target, text = %text, "Posted message");
        Ok(())
    }

    async fn clear_reminders(&self, target: NotifyTarget, kind: String) -> Result<(), NotifyError> {
        info!(target = %target, kind = %kind, "Cleared reminders");
        Ok(())
    }
}

/// One captured notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A reminder was scheduled.
    Reminder(Reminder),
    /// A message was posted.
    Message {
        /// Attached to.
        target: NotifyTarget,
        /// Message text.
        text: String,
    },
    /// Reminders were cleared.
    Cleared {
        /// Attached to.
        target: NotifyTarget,
        /// Reminder kind.
        kind: String,
    },
}

/// Sink that keeps every event in memory, plus the reminders still open.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<NotificationEvent>>,
    open: Mutex<Vec<Reminder>>,
}

impl MemoryNotifier {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event received so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Reminders scheduled and not yet cleared.
    #[must_use]
    pub fn open_reminders(&self) -> Vec<Reminder> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Message texts posted on `target`, in order.
    #[must_use]
    pub fn messages_for(&self, target: &NotifyTarget) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                NotificationEvent::Message { target: t, text } if t == *target => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: NotificationEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl NotificationSink for MemoryNotifier {
    async fn schedule_reminder(&self, reminder: Reminder) -> Result<(), NotifyError> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reminder.clone());
        self.push(NotificationEvent::Reminder(reminder));
        Ok(())
    }

    async fn post_message(&self, target: NotifyTarget, text: String) -> Result<(), NotifyError> {
        self.push(NotificationEvent::Message { target, text });
        Ok(())
    }

    async fn clear_reminders(&self, target: NotifyTarget, kind: String) -> Result<(), NotifyError> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|r| !(r.target == target && r.kind == kind));
        self.push(NotificationEvent::Cleared { target, kind });
        Ok(())
    }
}
