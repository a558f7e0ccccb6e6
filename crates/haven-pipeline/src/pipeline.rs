//! The three-stage escalation pipeline.

use std::sync::Arc;
use std::time::Duration;

use haven_metrics::SafetyMetricsEngine;
use haven_safety::{SafetyVerdict, TextSafetyClassifier, UNSAFE_CUTOFF};
use haven_types::{ChatMessage, ChildProfile, EventId, SessionId};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::collaborators::{
    ContentGenerator, ModerationQueue, NotificationDispatcher, SafetyEventStore,
};
use crate::error::{CollaboratorError, PipelineError};
use crate::event::{AuditRecord, SafetyEvent, SafetyEventType};

/// What the pipeline decided to do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineAction {
    /// Content is safe; the generated reply goes out unchanged.
    Allow,
    /// Critical inbound content; no reply was generated.
    Block,
    /// A concern needs human attention. The conversation continues
    /// (with a fallback reply if generation itself was the concern).
    Escalate,
}

/// Tunables for the pipeline stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Budget for the content-generator handoff.
    pub generation_timeout: Duration,
    /// Attempts for each audit write before giving up.
    pub audit_attempts: u32,
    /// Initial backoff between audit attempts; doubles per retry.
    pub audit_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(10),
            audit_attempts: 3,
            audit_backoff: Duration::from_millis(50),
        }
    }
}

/// One message to evaluate, with the context the stages need.
#[derive(Debug, Clone)]
pub struct EvaluateRequest {
    pub child: ChildProfile,
    pub session_id: SessionId,
    pub message: ChatMessage,
    /// Conversation history handed to the generator, oldest first.
    pub history: Vec<ChatMessage>,
}

/// The result of evaluating one message.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub action: PipelineAction,
    /// Verdict on the inbound message.
    pub verdict: SafetyVerdict,
    /// Reply to show the child. Always present: the generated reply
    /// when allowed, the fixed safe fallback otherwise.
    pub reply: String,
    /// Verdict on the candidate reply, when generation ran.
    pub reply_verdict: Option<SafetyVerdict>,
    /// Safety event recorded for this message, if any.
    pub event_id: Option<EventId>,
}

/// Orchestrates inbound check → timed generation → outbound check.
pub struct SafetyEscalationPipeline {
    classifier: TextSafetyClassifier,
    generator: Arc<dyn ContentGenerator>,
    store: Arc<dyn SafetyEventStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    moderation: Arc<dyn ModerationQueue>,
    metrics: Arc<SafetyMetricsEngine>,
    config: PipelineConfig,
}

impl SafetyEscalationPipeline {
    pub fn new(
        classifier: TextSafetyClassifier,
        generator: Arc<dyn ContentGenerator>,
        store: Arc<dyn SafetyEventStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        moderation: Arc<dyn ModerationQueue>,
        metrics: Arc<SafetyMetricsEngine>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            classifier,
            generator,
            store,
            notifier,
            moderation,
            metrics,
            config,
        }
    }

    /// Evaluate one inbound child message end to end.
    ///
    /// Re-running the same message is idempotent: the verdict is pure
    /// and safety events are deduped by message id.
    pub async fn evaluate(
        &self,
        request: &EvaluateRequest,
    ) -> Result<PipelineOutcome, PipelineError> {
        // Stage 1: inbound check, fail-closed.
        let verdict = match self.classify_checked(&request.message.content) {
            Ok(verdict) => verdict,
            Err(reason) => {
                error!(%reason, "classification unavailable, failing closed");
                self.metrics
                    .record_system_error(format!("classification failure: {reason}"))?;
                return self.block(request, fail_closed_verdict(&reason)).await;
            }
        };

        if verdict.is_critical() {
            return self.block(request, verdict).await;
        }

        // High-concern but not critical: the conversation continues,
        // but parents and moderators are brought in.
        let mut action = if verdict.is_safe {
            PipelineAction::Allow
        } else {
            PipelineAction::Escalate
        };
        let mut event_id = None;
        if !verdict.is_safe {
            event_id = self
                .ensure_event(request, &verdict, SafetyEventType::ConcernEscalated)
                .await;
        }

        // Stage 2: timed generation.
        let candidate = match timeout(
            self.config.generation_timeout,
            self.generator.generate(&request.history, &request.child),
        )
        .await
        {
            Ok(Ok(text)) => Some(text),
            Ok(Err(err)) => {
                warn!(%err, "content generation failed, substituting fallback");
                self.metrics
                    .record_system_error(format!("generation failed: {err}"))?;
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.generation_timeout.as_millis() as u64,
                    "content generation timed out, substituting fallback"
                );
                self.metrics.record_system_error("generation timeout")?;
                None
            }
        };

        // Stage 3: outbound check. An unsafe candidate is a generation
        // alignment failure — never the child's fault.
        let mut reply_verdict = None;
        let reply = match candidate {
            Some(text) => {
                let outbound = self.classifier.classify(&text);
                if outbound.is_safe {
                    reply_verdict = Some(outbound);
                    text
                } else {
                    warn!(
                        severity = outbound.severity,
                        categories = ?outbound.matched_categories(),
                        "generated reply failed outbound check, discarding"
                    );
                    self.metrics
                        .record_system_error("unsafe generated reply discarded")?;
                    let generated = ChatMessage::assistant(&text);
                    self.audit(request, &generated, &outbound, "discard").await?;
                    if event_id.is_none() {
                        event_id = self
                            .ensure_generation_event(request, &generated, &outbound)
                            .await;
                    }
                    action = PipelineAction::Escalate;
                    reply_verdict = Some(outbound);
                    fallback_reply(&request.child)
                }
            }
            None => fallback_reply(&request.child),
        };

        // Step 4: complete the audit trail for both sides. The delivered
        // reply is audited under its own verdict, not the candidate's.
        self.audit(request, &request.message, &verdict, action_name(action))
            .await?;
        let outgoing = ChatMessage::assistant(&reply);
        let outgoing_verdict = self.classifier.classify(&reply);
        self.audit(request, &outgoing, &outgoing_verdict, "deliver")
            .await?;

        Ok(PipelineOutcome {
            action,
            verdict,
            reply,
            reply_verdict,
            event_id,
        })
    }

    /// The block path for critical inbound content: no generation, safe
    /// fallback, durable event, parent notification.
    async fn block(
        &self,
        request: &EvaluateRequest,
        verdict: SafetyVerdict,
    ) -> Result<PipelineOutcome, PipelineError> {
        info!(
            session = %request.session_id,
            severity = verdict.severity,
            "blocking critical inbound content"
        );

        let event_id = self
            .ensure_event(request, &verdict, SafetyEventType::ContentBlocked)
            .await;

        self.audit(request, &request.message, &verdict, "block")
            .await?;

        let reply = fallback_reply(&request.child);
        let outgoing = ChatMessage::assistant(&reply);
        let outgoing_verdict = self.classifier.classify(&reply);
        self.audit(request, &outgoing, &outgoing_verdict, "deliver")
            .await?;

        Ok(PipelineOutcome {
            action: PipelineAction::Block,
            verdict,
            reply,
            reply_verdict: None,
            event_id,
        })
    }

    /// Create the safety event for a message unless one already exists,
    /// then enqueue moderation and notify the parent. Collaborator
    /// failures here are logged, not fatal: the safety decision stands.
    async fn ensure_event(
        &self,
        request: &EvaluateRequest,
        verdict: &SafetyVerdict,
        event_type: SafetyEventType,
    ) -> Option<EventId> {
        match self.store.event_for_message(&request.message.id).await {
            Ok(Some(existing)) => return Some(existing.id),
            Ok(None) => {}
            Err(err) => {
                warn!(%err, "event dedupe lookup failed, creating event anyway");
            }
        }

        let event = SafetyEvent::new(
            request.child.child_id.clone(),
            request.session_id.clone(),
            request.message.id.clone(),
            event_type,
            verdict.severity_level(),
            &request.message.content,
        );
        let event_id = event.id.clone();

        if let Err(err) = self.store.insert_event(event.clone()).await {
            error!(%err, "failed to persist safety event");
        }
        if let Err(err) = self.moderation.enqueue(&event).await {
            warn!(%err, "failed to enqueue event for moderation");
        }
        if verdict.severity >= UNSAFE_CUTOFF {
            let summary = format!(
                "Safety concern (severity {}) detected in {}'s chat: {}",
                verdict.severity_level(),
                request.child.child_id,
                verdict.matched_categories().join(", ")
            );
            match self.notifier.notify(&request.child.parent_id, &summary).await {
                Ok(true) => {}
                Ok(false) => warn!("parent notification reported undelivered"),
                Err(err) => warn!(%err, "parent notification failed"),
            }
        }
        Some(event_id)
    }

    /// Event for an unsafe generated reply, deduped by the generated
    /// message id.
    async fn ensure_generation_event(
        &self,
        request: &EvaluateRequest,
        generated: &ChatMessage,
        verdict: &SafetyVerdict,
    ) -> Option<EventId> {
        let event = SafetyEvent::new(
            request.child.child_id.clone(),
            request.session_id.clone(),
            generated.id.clone(),
            SafetyEventType::UnsafeGeneration,
            verdict.severity_level(),
            &generated.content,
        );
        let event_id = event.id.clone();
        if let Err(err) = self.store.insert_event(event.clone()).await {
            error!(%err, "failed to persist generation event");
        }
        if let Err(err) = self.moderation.enqueue(&event).await {
            warn!(%err, "failed to enqueue generation event");
        }
        Some(event_id)
    }

    /// Append an audit record with bounded-backoff retries. The safety
    /// decision is never reverted because its audit write failed, but
    /// exhausted retries do surface as a hard error.
    async fn audit(
        &self,
        request: &EvaluateRequest,
        message: &ChatMessage,
        verdict: &SafetyVerdict,
        action: &str,
    ) -> Result<(), PipelineError> {
        let record = AuditRecord {
            message_id: message.id.clone(),
            session_id: request.session_id.clone(),
            child_id: request.child.child_id.clone(),
            role: message.role,
            severity: verdict.severity,
            matched_categories: verdict
                .matched_categories()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            ruleset_version: verdict.ruleset_version.clone(),
            action: action.to_string(),
            recorded_at: chrono::Utc::now(),
        };

        let mut backoff = self.config.audit_backoff;
        let mut last_err: Option<CollaboratorError> = None;
        for attempt in 1..=self.config.audit_attempts {
            match self.store.append_audit(record.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(%err, attempt, "audit write failed, retrying");
                    last_err = Some(err);
                    if attempt < self.config.audit_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        let source = last_err.unwrap_or_else(|| CollaboratorError::Store("unknown".into()));
        error!(%source, "audit persistence exhausted retries");
        Err(PipelineError::Persistence {
            attempts: self.config.audit_attempts,
            source,
        })
    }

    /// Classification with the fail-closed guard: an unusable rule set
    /// must block, never allow.
    fn classify_checked(&self, text: &str) -> Result<SafetyVerdict, String> {
        let verdict = self.classifier.classify(text);
        if verdict.ruleset_version.is_empty() {
            return Err("active rule set has no version".into());
        }
        Ok(verdict)
    }
}

fn action_name(action: PipelineAction) -> &'static str {
    match action {
        PipelineAction::Allow => "allow",
        PipelineAction::Block => "block",
        PipelineAction::Escalate => "escalate",
    }
}

/// Fixed verdict used when classification itself is unavailable.
fn fail_closed_verdict(reason: &str) -> SafetyVerdict {
    SafetyVerdict {
        is_safe: false,
        severity: 3.0,
        matches: vec![haven_safety::RuleMatch {
            category: "classification_failure".into(),
            reason: reason.to_string(),
            severity: 3.0,
        }],
        ruleset_version: "fail-closed".into(),
    }
}

/// The fixed, age-appropriate response shown instead of blocked or
/// failed content. Never a raw error message.
pub fn fallback_reply(child: &ChildProfile) -> String {
    if child.is_young() {
        "Let's talk about something else! What's your favorite game or story?".to_string()
    } else {
        "I can't help with that one, but I'm happy to keep chatting — what else is on your mind?"
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        CannedGenerator, InMemoryEventStore, RecordingModerationQueue, RecordingNotifier,
    };
    use crate::event::EventStatus;
    use haven_types::{ChildId, MessageRole};

    struct Harness {
        pipeline: SafetyEscalationPipeline,
        generator: Arc<CannedGenerator>,
        store: Arc<InMemoryEventStore>,
        notifier: Arc<RecordingNotifier>,
        moderation: Arc<RecordingModerationQueue>,
        metrics: Arc<SafetyMetricsEngine>,
    }

    fn harness_with(generator: CannedGenerator, config: PipelineConfig) -> Harness {
        let generator = Arc::new(generator);
        let store = Arc::new(InMemoryEventStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let moderation = Arc::new(RecordingModerationQueue::new());
        let metrics = Arc::new(SafetyMetricsEngine::default());
        let pipeline = SafetyEscalationPipeline::new(
            TextSafetyClassifier::default(),
            generator.clone(),
            store.clone(),
            notifier.clone(),
            moderation.clone(),
            metrics.clone(),
            config,
        );
        Harness {
            pipeline,
            generator,
            store,
            notifier,
            moderation,
            metrics,
        }
    }

    fn harness(reply: &str) -> Harness {
        harness_with(CannedGenerator::new(reply), PipelineConfig::default())
    }

    fn request(text: &str) -> EvaluateRequest {
        let message = ChatMessage::child(text);
        EvaluateRequest {
            child: ChildProfile::new(ChildId::new("child-1"), "parent-1", 10),
            session_id: SessionId::new("session-1"),
            history: vec![message.clone()],
            message,
        }
    }

    fn system_errors(metrics: &SafetyMetricsEngine) -> u64 {
        let now = chrono::Utc::now();
        metrics
            .report(now - chrono::Duration::minutes(1), now)
            .unwrap()
            .system_errors
    }

    #[tokio::test]
    async fn critical_content_is_blocked_without_generation() {
        let h = harness("A friendly reply.");
        let outcome = h.pipeline.evaluate(&request("I want to hurt myself")).await.unwrap();

        assert_eq!(outcome.action, PipelineAction::Block);
        assert_eq!(outcome.verdict.severity, 3.0);
        assert_eq!(h.generator.call_count(), 0);

        let events = h.store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Active);
        assert_eq!(events[0].severity_level, 3);
        assert_eq!(events[0].event_type, SafetyEventType::ContentBlocked);

        // Parent notified and moderation queued
        assert_eq!(h.notifier.notifications().len(), 1);
        assert_eq!(h.moderation.queued().len(), 1);

        // The child still gets a gentle reply, not an error
        assert!(!outcome.reply.is_empty());
    }

    #[tokio::test]
    async fn safe_content_is_allowed_with_generated_reply() {
        let h = harness("Minecraft is great! What do you like building?");
        let outcome = h.pipeline.evaluate(&request("I love minecraft!")).await.unwrap();

        assert_eq!(outcome.action, PipelineAction::Allow);
        assert_eq!(outcome.verdict.severity, 0.0);
        assert_eq!(outcome.reply, "Minecraft is great! What do you like building?");
        assert!(h.store.events().is_empty());
        assert!(h.notifier.notifications().is_empty());
        assert_eq!(system_errors(&h.metrics), 0);
    }

    #[tokio::test]
    async fn high_concern_escalates_but_conversation_continues() {
        let h = harness("Thanks for telling me. It's safest to keep that private.");
        let outcome = h
            .pipeline
            .evaluate(&request("my phone number is 555-0100"))
            .await
            .unwrap();

        assert_eq!(outcome.action, PipelineAction::Escalate);
        assert_eq!(h.generator.call_count(), 1);
        assert_eq!(h.store.events().len(), 1);
        assert_eq!(
            h.store.events()[0].event_type,
            SafetyEventType::ConcernEscalated
        );
        assert_eq!(h.notifier.notifications().len(), 1);
    }

    #[tokio::test]
    async fn reevaluation_does_not_duplicate_events() {
        let h = harness("A reply.");
        let req = request("I want to hurt myself");

        let first = h.pipeline.evaluate(&req).await.unwrap();
        let second = h.pipeline.evaluate(&req).await.unwrap();

        assert_eq!(first.verdict, second.verdict);
        assert_eq!(h.store.events().len(), 1);
        assert_eq!(first.event_id, second.event_id);
    }

    #[tokio::test]
    async fn unsafe_generated_reply_is_discarded() {
        let h = harness("You should keep it a secret from your parents.");
        let outcome = h.pipeline.evaluate(&request("can we chat?")).await.unwrap();

        assert_eq!(outcome.action, PipelineAction::Escalate);
        assert_ne!(outcome.reply, "You should keep it a secret from your parents.");
        assert_eq!(system_errors(&h.metrics), 1);

        let events = h.store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SafetyEventType::UnsafeGeneration);
    }

    #[tokio::test]
    async fn generation_timeout_substitutes_fallback() {
        let h = harness_with(
            CannedGenerator::new("slow reply").with_delay(Duration::from_millis(100)),
            PipelineConfig {
                generation_timeout: Duration::from_millis(10),
                ..PipelineConfig::default()
            },
        );
        let outcome = h.pipeline.evaluate(&request("tell me about space")).await.unwrap();

        assert_eq!(outcome.action, PipelineAction::Allow);
        assert_ne!(outcome.reply, "slow reply");
        assert_eq!(system_errors(&h.metrics), 1);
    }

    #[tokio::test]
    async fn generation_failure_substitutes_fallback() {
        let h = harness_with(
            CannedGenerator::new("unused").failing(),
            PipelineConfig::default(),
        );
        let outcome = h.pipeline.evaluate(&request("hello there")).await.unwrap();

        assert_eq!(outcome.action, PipelineAction::Allow);
        assert!(!outcome.reply.is_empty());
        assert_eq!(system_errors(&h.metrics), 1);
    }

    #[tokio::test]
    async fn every_message_is_audited() {
        let h = harness("Nice to hear from you!");
        h.pipeline.evaluate(&request("we went swimming today")).await.unwrap();

        let audits = h.store.audits();
        assert_eq!(audits.len(), 2);
        assert_eq!(audits[0].role, MessageRole::Child);
        assert_eq!(audits[1].role, MessageRole::Assistant);
        assert_eq!(audits[0].action, "allow");
    }

    #[tokio::test]
    async fn exhausted_audit_retries_surface_as_hard_error() {
        let h = harness_with(
            CannedGenerator::new("fine"),
            PipelineConfig {
                audit_attempts: 2,
                audit_backoff: Duration::from_millis(1),
                ..PipelineConfig::default()
            },
        );
        h.store.set_fail_writes(true);

        let result = h.pipeline.evaluate(&request("hello")).await;
        assert!(matches!(
            result,
            Err(PipelineError::Persistence { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn blocked_reply_is_age_appropriate() {
        let h = harness("unused");
        let mut req = request("I want to hurt myself");
        req.child.age = 7;
        let outcome = h.pipeline.evaluate(&req).await.unwrap();
        assert!(outcome.reply.contains("favorite game"));
    }
}
