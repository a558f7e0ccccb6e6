//! The engine facade.
//!
//! One `HavenEngine` owns the classifier, the escalation pipeline, the
//! session governor, the context analyzer, and the metrics engine, and
//! exposes the handful of operations the chat layer calls: evaluate a
//! message, poll a session clock, write back moderation ground truth,
//! read an accuracy report, and hot-reload configuration or rules.
//!
//! Messages within one session are handled in arrival order: each
//! session's history sits behind an async mutex that is held across the
//! whole pipeline run. Different sessions evaluate concurrently.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use haven_context::ContextAnalyzer;
use haven_governor::{
    GovernorError, NaturalExitGenerator, PollDecision, SessionPhase, SessionTimeGovernor,
    SessionTimingState,
};
use haven_metrics::{AccuracyReport, Alert, AlertSink, SafetyMetricsEngine};
use haven_pipeline::pipeline::fallback_reply;
use haven_pipeline::{
    AuditRecord, ContentGenerator, EvaluateRequest, EventStatus, ModerationDecision,
    ModerationQueue, NotificationDispatcher, PipelineAction, PipelineConfig,
    SafetyEscalationPipeline, SafetyEvent, SafetyEventStore, SafetyEventType,
};
use haven_safety::{
    PatternRuleSet, RuleSetConfig, RuleSetHandle, SafetyVerdict, TextSafetyClassifier,
};
use haven_types::{
    ChatMessage, ChildProfile, EngineConfig, EventId, MessageId, MessageRole, SessionId,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;

/// Messages retained per session for generation context.
const HISTORY_WINDOW: usize = 50;
/// Most recent messages handed to the context analyzer.
const CONTEXT_WINDOW: usize = 10;

/// Per-session state owned by the engine. The history mutex is the
/// ordering point for that session's messages.
struct SessionEntry {
    child: ChildProfile,
    history: tokio::sync::Mutex<Vec<ChatMessage>>,
}

/// What `evaluate_message` hands back to the chat layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReply {
    pub action: PipelineAction,
    pub verdict: SafetyVerdict,
    /// Text to show the child. Always present.
    pub reply: String,
    pub event_id: Option<EventId>,
    /// Set when critical content forced the session closed.
    pub session_ended: bool,
}

/// A governor decision plus the rendered text to show, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPollOutcome {
    pub decision: PollDecision,
    /// Warning or farewell phrasing when the decision calls for one.
    pub message: Option<String>,
}

/// The assembled safety engine.
pub struct HavenEngine {
    rules: RuleSetHandle,
    classifier: TextSafetyClassifier,
    analyzer: ContextAnalyzer,
    governor: SessionTimeGovernor,
    exit: NaturalExitGenerator,
    metrics: Arc<SafetyMetricsEngine>,
    generator: Arc<dyn ContentGenerator>,
    store: Arc<dyn SafetyEventStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    moderation: Arc<dyn ModerationQueue>,
    alert_sink: Arc<dyn AlertSink>,
    pipeline: RwLock<Arc<SafetyEscalationPipeline>>,
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    /// Wall-clock evaluation time per message, grouped by session.
    /// Entries are removed when ground truth consumes them and the
    /// whole group is dropped when the session ends.
    response_times: RwLock<HashMap<SessionId, HashMap<MessageId, f64>>>,
    config: RwLock<EngineConfig>,
}

impl HavenEngine {
    pub fn new(
        config: EngineConfig,
        generator: Arc<dyn ContentGenerator>,
        store: Arc<dyn SafetyEventStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        moderation: Arc<dyn ModerationQueue>,
        alert_sink: Arc<dyn AlertSink>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let rules = RuleSetHandle::default();
        let classifier = TextSafetyClassifier::new(rules.clone());
        let metrics = Arc::new(SafetyMetricsEngine::new(config.alerts.clone()));
        let governor = SessionTimeGovernor::new(config.governor.clone());
        let pipeline = Arc::new(build_pipeline(
            classifier.clone(),
            generator.clone(),
            store.clone(),
            notifier.clone(),
            moderation.clone(),
            metrics.clone(),
            &config,
        ));

        info!(version = %config.version, "engine initialized");
        Ok(Self {
            rules,
            classifier,
            analyzer: ContextAnalyzer::new(),
            governor,
            exit: NaturalExitGenerator::new(),
            metrics,
            generator,
            store,
            notifier,
            moderation,
            alert_sink,
            pipeline: RwLock::new(pipeline),
            sessions: RwLock::new(HashMap::new()),
            response_times: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
        })
    }

    /// Register a new chat session for a child, carrying in usage from
    /// earlier sessions today and this week.
    pub fn start_session(
        &self,
        session_id: SessionId,
        child: ChildProfile,
        minutes_today_before: u32,
        minutes_week_before: u32,
    ) -> Result<(), EngineError> {
        self.start_session_at(
            session_id,
            child,
            minutes_today_before,
            minutes_week_before,
            Utc::now(),
        )
    }

    pub fn start_session_at(
        &self,
        session_id: SessionId,
        child: ChildProfile,
        minutes_today_before: u32,
        minutes_week_before: u32,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.governor.start_session_at(
            session_id.clone(),
            child.child_id.clone(),
            minutes_today_before,
            minutes_week_before,
            now,
        )?;
        let entry = Arc::new(SessionEntry {
            child,
            history: tokio::sync::Mutex::new(Vec::new()),
        });
        self.sessions
            .write()
            .map_err(|_| EngineError::Lock)?
            .insert(session_id, entry);
        Ok(())
    }

    /// Evaluate one message in a session.
    ///
    /// Child messages run the full pipeline: inbound check, generation,
    /// outbound check. Assistant messages are screening-only, for
    /// replies produced outside the pipeline. Messages in one session
    /// are processed strictly in the order this method is called.
    pub async fn evaluate_message(
        &self,
        session_id: &SessionId,
        role: MessageRole,
        text: &str,
    ) -> Result<EngineReply, EngineError> {
        let entry = self.session_entry(session_id)?;
        // The governor lifecycle binds the message path too: an ended
        // session accepts no further messages.
        if self.governor.state(session_id)?.phase == SessionPhase::Ended {
            return Err(GovernorError::SessionEnded(session_id.clone()).into());
        }
        let mut history = entry.history.lock().await;

        match role {
            MessageRole::Child => {
                self.evaluate_child_message(session_id, &entry, &mut history, text)
                    .await
            }
            MessageRole::Assistant => {
                self.screen_assistant_message(session_id, &entry, &mut history, text)
                    .await
            }
        }
    }

    async fn evaluate_child_message(
        &self,
        session_id: &SessionId,
        entry: &SessionEntry,
        history: &mut Vec<ChatMessage>,
        text: &str,
    ) -> Result<EngineReply, EngineError> {
        let message = ChatMessage::child(text);
        let message_id = message.id.clone();

        let mut request_history = history.clone();
        request_history.push(message.clone());
        let request = EvaluateRequest {
            child: entry.child.clone(),
            session_id: session_id.clone(),
            message,
            history: request_history,
        };

        let pipeline = self.current_pipeline()?;
        let started = Instant::now();
        let outcome = pipeline.evaluate(&request).await?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        self.response_times
            .write()
            .map_err(|_| EngineError::Lock)?
            .entry(session_id.clone())
            .or_default()
            .insert(message_id.clone(), elapsed_ms);

        push_bounded(history, request.message.clone());
        push_bounded(history, ChatMessage::assistant(&outcome.reply));

        // A severity-3 block closes the session on the spot; everything
        // below that continues under governor control.
        let mut session_ended = false;
        if outcome.action == PipelineAction::Block {
            match self.governor.end_session(session_id) {
                Ok(_) => {
                    session_ended = true;
                    // The blocked message's own event still awaits ground
                    // truth; every other pending latency entry goes now.
                    let mut times =
                        self.response_times.write().map_err(|_| EngineError::Lock)?;
                    if let Some(session_times) = times.get_mut(session_id) {
                        session_times.retain(|id, _| *id == message_id);
                    }
                }
                Err(err) => warn!(%err, session = %session_id, "could not close blocked session"),
            }
        }

        Ok(EngineReply {
            action: outcome.action,
            verdict: outcome.verdict,
            reply: outcome.reply,
            event_id: outcome.event_id,
            session_ended,
        })
    }

    /// Outbound screening for a reply sourced outside the pipeline. An
    /// unsafe reply is discarded and replaced, never delivered.
    async fn screen_assistant_message(
        &self,
        session_id: &SessionId,
        entry: &SessionEntry,
        history: &mut Vec<ChatMessage>,
        text: &str,
    ) -> Result<EngineReply, EngineError> {
        let message = ChatMessage::assistant(text);
        let verdict = self.classifier.classify(text);

        let (action, reply, event_id) = if verdict.is_safe {
            (PipelineAction::Allow, text.to_string(), None)
        } else {
            warn!(
                session = %session_id,
                severity = verdict.severity,
                "externally sourced reply failed screening, discarding"
            );
            self.metrics
                .record_system_error("unsafe external reply discarded")?;
            let event = SafetyEvent::new(
                entry.child.child_id.clone(),
                session_id.clone(),
                message.id.clone(),
                SafetyEventType::UnsafeGeneration,
                verdict.severity_level(),
                text,
            );
            let event_id = event.id.clone();
            self.store.insert_event(event.clone()).await?;
            if let Err(err) = self.moderation.enqueue(&event).await {
                warn!(%err, "failed to enqueue screening event");
            }
            (
                PipelineAction::Escalate,
                fallback_reply(&entry.child),
                Some(event_id),
            )
        };

        self.store
            .append_audit(AuditRecord {
                message_id: message.id.clone(),
                session_id: session_id.clone(),
                child_id: entry.child.child_id.clone(),
                role: MessageRole::Assistant,
                severity: verdict.severity,
                matched_categories: verdict
                    .matched_categories()
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
                ruleset_version: verdict.ruleset_version.clone(),
                action: if verdict.is_safe { "deliver" } else { "discard" }.to_string(),
                recorded_at: Utc::now(),
            })
            .await?;

        push_bounded(history, ChatMessage::assistant(&reply));

        Ok(EngineReply {
            action,
            verdict,
            reply,
            event_id,
            session_ended: false,
        })
    }

    /// Poll a session's clock now.
    pub async fn poll_session(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionPollOutcome, EngineError> {
        self.poll_session_at(session_id, Utc::now()).await
    }

    /// Poll at an explicit instant. Context is recomputed from the
    /// recent message window on every poll.
    pub async fn poll_session_at(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<SessionPollOutcome, EngineError> {
        let entry = self.session_entry(session_id)?;
        let context = {
            let history = entry.history.lock().await;
            let window_start = history.len().saturating_sub(CONTEXT_WINDOW);
            self.analyzer.analyze(&history[window_start..])
        };

        let decision = self.governor.poll_at(session_id, &context, now)?;
        let state = self.governor.state(session_id)?;
        let seed = state.warnings_issued.len() as u64;

        let message = if decision.should_end {
            Some(self.exit.ending_text(entry.child.age, &context, seed))
        } else {
            decision
                .warning_level
                .map(|_| {
                    self.exit
                        .warning_text(entry.child.age, decision.minutes_remaining, seed)
                })
        };

        Ok(SessionPollOutcome { decision, message })
    }

    /// Parent override: enforcement stops for the rest of the session.
    pub fn extend_time(&self, session_id: &SessionId) -> Result<(), EngineError> {
        Ok(self.governor.extend_time(session_id)?)
    }

    /// Close a session explicitly. The timing state is returned so the
    /// caller can persist today's usage.
    pub fn end_session(&self, session_id: &SessionId) -> Result<SessionTimingState, EngineError> {
        let state = self.governor.end_session(session_id)?;
        // Ground truth never arrives for messages nobody flagged;
        // whatever latency entries are still pending go with the session.
        self.response_times
            .write()
            .map_err(|_| EngineError::Lock)?
            .remove(session_id);
        Ok(state)
    }

    /// Timing state snapshot for a session.
    pub fn session_state(&self, session_id: &SessionId) -> Result<SessionTimingState, EngineError> {
        Ok(self.governor.state(session_id)?)
    }

    /// Write back a moderation verdict for a safety event.
    ///
    /// The event's recorded severity is the prediction; the moderator's
    /// judgement is the truth. Both the classification and escalation
    /// ledgers get a record, and the event is resolved.
    pub async fn record_ground_truth(
        &self,
        event_id: &EventId,
        actual_is_safe: bool,
        actual_severity: u8,
    ) -> Result<(), EngineError> {
        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or_else(|| EngineError::UnknownEvent(event_id.clone()))?;

        let predicted_severity = event.severity_level;
        let predicted_is_safe = predicted_severity < 2;
        let response_ms = {
            // Ground truth arrives once per event; the latency entry is
            // consumed with it so the map stays bounded.
            let mut times = self.response_times.write().map_err(|_| EngineError::Lock)?;
            let taken = times
                .get_mut(&event.session_id)
                .and_then(|session_times| session_times.remove(&event.message_id));
            if times
                .get(&event.session_id)
                .is_some_and(|session_times| session_times.is_empty())
            {
                times.remove(&event.session_id);
            }
            taken.unwrap_or(0.0)
        };
        let child_age = self.child_age(&event.session_id)?;

        self.metrics.record_evaluation(
            actual_is_safe,
            predicted_is_safe,
            actual_severity,
            response_ms,
            child_age,
        )?;
        self.metrics.record_escalation(
            actual_severity,
            predicted_severity,
            response_ms,
            child_age,
        )?;

        let decision = if actual_is_safe {
            ModerationDecision::FalsePositive
        } else {
            ModerationDecision::Escalate
        };
        self.store
            .update_event_status(
                event_id,
                EventStatus::Resolved,
                Some(decision_label(decision).to_string()),
            )
            .await?;
        info!(event = %event_id, ?decision, "ground truth recorded");
        Ok(())
    }

    /// Report unsafe content the classifier passed as safe. No event
    /// exists for these, so the miss is reported directly.
    pub fn record_missed_escalation(
        &self,
        session_id: &SessionId,
        actual_severity: u8,
    ) -> Result<(), EngineError> {
        let child_age = self.child_age(session_id)?;
        self.metrics
            .record_evaluation(false, true, actual_severity, 0.0, child_age)?;
        self.metrics
            .record_escalation(actual_severity, 0, 0.0, child_age)?;
        warn!(session = %session_id, actual_severity, "missed escalation reported");
        Ok(())
    }

    /// Accuracy report over a time window.
    pub fn accuracy_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AccuracyReport, EngineError> {
        Ok(self.metrics.report(start, end)?)
    }

    /// Evaluate alert thresholds over a window, dispatching new alerts
    /// to the configured sink.
    pub fn check_alerts(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Alert>, EngineError> {
        Ok(self
            .metrics
            .check_alerts(start, end, self.alert_sink.as_ref())?)
    }

    /// Swap in a new configuration document. Active sessions pick up
    /// the new limits on their next poll; in-flight evaluations finish
    /// under the old pipeline settings.
    pub fn reload_config(&self, config: EngineConfig) -> Result<(), EngineError> {
        config.validate()?;
        self.governor.set_limits(config.governor.clone())?;
        self.metrics.set_thresholds(config.alerts.clone())?;

        let pipeline = Arc::new(build_pipeline(
            self.classifier.clone(),
            self.generator.clone(),
            self.store.clone(),
            self.notifier.clone(),
            self.moderation.clone(),
            self.metrics.clone(),
            &config,
        ));
        *self.pipeline.write().map_err(|_| EngineError::Lock)? = pipeline;

        info!(version = %config.version, "configuration reloaded");
        *self.config.write().map_err(|_| EngineError::Lock)? = config;
        Ok(())
    }

    /// Atomically install a new pattern rule set. In-flight
    /// classifications keep their snapshot; the next one sees the new
    /// set.
    pub fn reload_rules(&self, config: &RuleSetConfig) -> Result<(), EngineError> {
        let set = PatternRuleSet::load(config)?;
        self.rules.install(set);
        Ok(())
    }

    /// The active configuration document.
    pub fn config(&self) -> Result<EngineConfig, EngineError> {
        Ok(self.config.read().map_err(|_| EngineError::Lock)?.clone())
    }

    fn session_entry(&self, session_id: &SessionId) -> Result<Arc<SessionEntry>, EngineError> {
        self.sessions
            .read()
            .map_err(|_| EngineError::Lock)?
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSession(session_id.clone()))
    }

    fn child_age(&self, session_id: &SessionId) -> Result<Option<u8>, EngineError> {
        Ok(self
            .sessions
            .read()
            .map_err(|_| EngineError::Lock)?
            .get(session_id)
            .map(|entry| entry.child.age))
    }

    fn current_pipeline(&self) -> Result<Arc<SafetyEscalationPipeline>, EngineError> {
        Ok(self.pipeline.read().map_err(|_| EngineError::Lock)?.clone())
    }
}

fn build_pipeline(
    classifier: TextSafetyClassifier,
    generator: Arc<dyn ContentGenerator>,
    store: Arc<dyn SafetyEventStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    moderation: Arc<dyn ModerationQueue>,
    metrics: Arc<SafetyMetricsEngine>,
    config: &EngineConfig,
) -> SafetyEscalationPipeline {
    SafetyEscalationPipeline::new(
        classifier,
        generator,
        store,
        notifier,
        moderation,
        metrics,
        PipelineConfig {
            generation_timeout: Duration::from_millis(config.generation_timeout_ms),
            ..PipelineConfig::default()
        },
    )
}

fn decision_label(decision: ModerationDecision) -> &'static str {
    match decision {
        ModerationDecision::Approved => "approved",
        ModerationDecision::Escalate => "escalate",
        ModerationDecision::FalsePositive => "false_positive",
        ModerationDecision::MissedEscalation => "missed_escalation",
    }
}

fn push_bounded(history: &mut Vec<ChatMessage>, message: ChatMessage) {
    history.push(message);
    if history.len() > HISTORY_WINDOW {
        let excess = history.len() - HISTORY_WINDOW;
        history.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_metrics::NullAlertSink;
    use haven_pipeline::memory::{
        CannedGenerator, InMemoryEventStore, RecordingModerationQueue, RecordingNotifier,
    };
    use haven_types::ChildId;

    fn harness() -> HavenEngine {
        HavenEngine::new(
            EngineConfig::default(),
            Arc::new(CannedGenerator::new("Noted!")),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(RecordingNotifier::new()),
            Arc::new(RecordingModerationQueue::new()),
            Arc::new(NullAlertSink),
        )
        .unwrap()
    }

    fn started(engine: &HavenEngine) -> SessionId {
        let session_id = SessionId::generate();
        engine
            .start_session(
                session_id.clone(),
                ChildProfile::new(ChildId::new("child-1"), "parent-1", 10),
                0,
                0,
            )
            .unwrap();
        session_id
    }

    fn pending_latencies(engine: &HavenEngine, session: &SessionId) -> usize {
        engine
            .response_times
            .read()
            .unwrap()
            .get(session)
            .map_or(0, |session_times| session_times.len())
    }

    #[tokio::test]
    async fn ground_truth_consumes_the_latency_entry() {
        let engine = harness();
        let session = started(&engine);

        let reply = engine
            .evaluate_message(&session, MessageRole::Child, "my phone number is 555-0100")
            .await
            .unwrap();
        assert_eq!(pending_latencies(&engine, &session), 1);

        engine
            .record_ground_truth(&reply.event_id.unwrap(), false, 2)
            .await
            .unwrap();
        assert_eq!(pending_latencies(&engine, &session), 0);
        // The emptied session group is dropped too
        assert!(engine.response_times.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ending_a_session_drops_its_pending_latencies() {
        let engine = harness();
        let session = started(&engine);

        for text in ["we went swimming", "then we had pizza"] {
            engine
                .evaluate_message(&session, MessageRole::Child, text)
                .await
                .unwrap();
        }
        assert_eq!(pending_latencies(&engine, &session), 2);

        engine.end_session(&session).unwrap();
        assert!(engine.response_times.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn critical_block_keeps_only_its_own_latency_entry() {
        let engine = harness();
        let session = started(&engine);

        engine
            .evaluate_message(&session, MessageRole::Child, "hello there")
            .await
            .unwrap();
        let reply = engine
            .evaluate_message(&session, MessageRole::Child, "I want to hurt myself")
            .await
            .unwrap();
        assert!(reply.session_ended);
        assert_eq!(pending_latencies(&engine, &session), 1);

        engine
            .record_ground_truth(&reply.event_id.unwrap(), false, 3)
            .await
            .unwrap();
        assert!(engine.response_times.read().unwrap().is_empty());
    }
}
