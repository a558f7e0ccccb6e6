//! Collaborator seams consumed by the pipeline.
//!
//! Implementations are out of scope for the core: the chat layer
//! provides the content generator, the platform provides persistence
//! and notification. [`crate::memory`] has in-memory implementations
//! for tests and harnesses.

use async_trait::async_trait;
use haven_types::{ChatMessage, ChildProfile, EventId, MessageId};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::event::{AuditRecord, EventStatus, SafetyEvent};

/// The opaque content generator (LLM or otherwise). Prompt construction
/// is the caller's concern; the pipeline only needs candidate text and
/// a bounded call it can time out.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        history: &[ChatMessage],
        child: &ChildProfile,
    ) -> Result<String, CollaboratorError>;
}

/// Durable append/query for safety events and the audit trail.
#[async_trait]
pub trait SafetyEventStore: Send + Sync {
    async fn insert_event(&self, event: SafetyEvent) -> Result<(), CollaboratorError>;

    /// Dedupe lookup: the event already created for a message, if any.
    async fn event_for_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<SafetyEvent>, CollaboratorError>;

    async fn find_event(&self, event_id: &EventId)
        -> Result<Option<SafetyEvent>, CollaboratorError>;

    async fn update_event_status(
        &self,
        event_id: &EventId,
        status: EventStatus,
        decision: Option<String>,
    ) -> Result<(), CollaboratorError>;

    async fn append_audit(&self, record: AuditRecord) -> Result<(), CollaboratorError>;
}

/// Parent notification, used when severity reaches the concern level.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Returns whether the notification was delivered.
    async fn notify(&self, parent_id: &str, summary: &str) -> Result<bool, CollaboratorError>;
}

/// Human review decision written back from the moderation queue. This
/// becomes ground truth for the metrics engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationDecision {
    Approved,
    Escalate,
    FalsePositive,
    MissedEscalation,
}

/// Queue of escalated events awaiting human review.
#[async_trait]
pub trait ModerationQueue: Send + Sync {
    async fn enqueue(&self, event: &SafetyEvent) -> Result<(), CollaboratorError>;
}
