//! Durable safety records: events and the per-message audit trail.

use chrono::{DateTime, Utc};
use haven_types::{ChildId, EventId, MessageId, MessageRole, SessionId};
use serde::{Deserialize, Serialize};

/// What kind of concern a safety event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyEventType {
    /// Critical inbound content was blocked.
    ContentBlocked,
    /// High-concern inbound content was escalated for review.
    ConcernEscalated,
    /// The generator produced an unsafe candidate reply.
    UnsafeGeneration,
}

/// Lifecycle status of a safety event. Events are never deleted, only
/// transitioned by a moderation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Active,
    Resolved,
}

/// A durable record of a safety concern, created by the pipeline and
/// resolved by human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyEvent {
    pub id: EventId,
    pub child_id: ChildId,
    pub session_id: SessionId,
    pub message_id: MessageId,
    pub event_type: SafetyEventType,
    /// Integer severity 0..=3.
    pub severity_level: u8,
    /// Snapshot of the content that triggered the event.
    pub trigger_content: String,
    pub detected_at: DateTime<Utc>,
    pub status: EventStatus,
    pub moderator_decision: Option<String>,
    pub moderator_notes: Option<String>,
}

impl SafetyEvent {
    pub fn new(
        child_id: ChildId,
        session_id: SessionId,
        message_id: MessageId,
        event_type: SafetyEventType,
        severity_level: u8,
        trigger_content: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::generate(),
            child_id,
            session_id,
            message_id,
            event_type,
            severity_level,
            trigger_content: trigger_content.into(),
            detected_at: Utc::now(),
            status: EventStatus::Active,
            moderator_decision: None,
            moderator_notes: None,
        }
    }
}

/// One audit-trail entry. Every message, child or assistant, gets one
/// regardless of the action taken, so parents and moderators see a
/// complete history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub message_id: MessageId,
    pub session_id: SessionId,
    pub child_id: ChildId,
    pub role: MessageRole,
    pub severity: f64,
    pub matched_categories: Vec<String>,
    pub ruleset_version: String,
    pub action: String,
    pub recorded_at: DateTime<Utc>,
}
