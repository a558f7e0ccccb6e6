//! In-memory collaborator implementations.
//!
//! The persistence technology behind the real store is out of scope for
//! the core; these implementations back tests, harnesses, and local
//! development.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use haven_types::{ChatMessage, ChildProfile, EventId, MessageId};

use crate::collaborators::{
    ContentGenerator, ModerationQueue, NotificationDispatcher, SafetyEventStore,
};
use crate::error::CollaboratorError;
use crate::event::{AuditRecord, EventStatus, SafetyEvent};

/// Event store backed by vectors behind a mutex.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: Mutex<Vec<SafetyEvent>>,
    audits: Mutex<Vec<AuditRecord>>,
    /// When set, every write fails — used to exercise retry paths.
    fail_writes: Mutex<bool>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SafetyEvent> {
        self.events.lock().expect("store lock").clone()
    }

    pub fn audits(&self) -> Vec<AuditRecord> {
        self.audits.lock().expect("store lock").clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().expect("store lock") = fail;
    }

    fn check_writable(&self) -> Result<(), CollaboratorError> {
        if *self.fail_writes.lock().expect("store lock") {
            Err(CollaboratorError::Store("simulated outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SafetyEventStore for InMemoryEventStore {
    async fn insert_event(&self, event: SafetyEvent) -> Result<(), CollaboratorError> {
        self.check_writable()?;
        self.events.lock().expect("store lock").push(event);
        Ok(())
    }

    async fn event_for_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<SafetyEvent>, CollaboratorError> {
        Ok(self
            .events
            .lock()
            .expect("store lock")
            .iter()
            .find(|e| &e.message_id == message_id)
            .cloned())
    }

    async fn find_event(
        &self,
        event_id: &EventId,
    ) -> Result<Option<SafetyEvent>, CollaboratorError> {
        Ok(self
            .events
            .lock()
            .expect("store lock")
            .iter()
            .find(|e| &e.id == event_id)
            .cloned())
    }

    async fn update_event_status(
        &self,
        event_id: &EventId,
        status: EventStatus,
        decision: Option<String>,
    ) -> Result<(), CollaboratorError> {
        self.check_writable()?;
        let mut events = self.events.lock().expect("store lock");
        if let Some(event) = events.iter_mut().find(|e| &e.id == event_id) {
            event.status = status;
            event.moderator_decision = decision;
        }
        Ok(())
    }

    async fn append_audit(&self, record: AuditRecord) -> Result<(), CollaboratorError> {
        self.check_writable()?;
        self.audits.lock().expect("store lock").push(record);
        Ok(())
    }
}

/// Generator returning a fixed reply, with optional delay and failure.
pub struct CannedGenerator {
    reply: String,
    delay: Option<Duration>,
    fail: bool,
    calls: Mutex<u32>,
}

impl CannedGenerator {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            delay: None,
            fail: false,
            calls: Mutex::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// How many times `generate` was invoked.
    pub fn call_count(&self) -> u32 {
        *self.calls.lock().expect("generator lock")
    }
}

#[async_trait]
impl ContentGenerator for CannedGenerator {
    async fn generate(
        &self,
        _history: &[ChatMessage],
        _child: &ChildProfile,
    ) -> Result<String, CollaboratorError> {
        *self.calls.lock().expect("generator lock") += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(CollaboratorError::Generation("simulated failure".into()));
        }
        Ok(self.reply.clone())
    }
}

/// Notifier that records every dispatched summary.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().expect("notifier lock").clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify(&self, parent_id: &str, summary: &str) -> Result<bool, CollaboratorError> {
        self.notifications
            .lock()
            .expect("notifier lock")
            .push((parent_id.to_string(), summary.to_string()));
        Ok(true)
    }
}

/// Moderation queue that records enqueued events.
#[derive(Debug, Default)]
pub struct RecordingModerationQueue {
    queued: Mutex<Vec<SafetyEvent>>,
}

impl RecordingModerationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queued(&self) -> Vec<SafetyEvent> {
        self.queued.lock().expect("queue lock").clone()
    }
}

#[async_trait]
impl ModerationQueue for RecordingModerationQueue {
    async fn enqueue(&self, event: &SafetyEvent) -> Result<(), CollaboratorError> {
        self.queued.lock().expect("queue lock").push(event.clone());
        Ok(())
    }
}
