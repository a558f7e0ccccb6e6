//! The session timing state machine.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use haven_context::ConversationContext;
use haven_types::{ChildId, GovernorLimits, SessionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lifecycle phase of a governed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Active,
    WarningIssued,
    GracefullyEnding,
    Ended,
}

/// One warning shown to the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningRecord {
    /// The minutes-remaining threshold that triggered the warning.
    pub threshold_minutes: u32,
    pub issued_at: DateTime<Utc>,
}

/// Timing state for one active session. Closed (phase Ended), never
/// deleted, when the session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTimingState {
    pub session_id: SessionId,
    pub child_id: ChildId,
    pub session_start: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Minutes already used today before this session started.
    pub minutes_today_before: u32,
    /// Minutes already used this week before this session started.
    pub minutes_week_before: u32,
    pub warnings_issued: Vec<WarningRecord>,
    pub override_active: bool,
    pub phase: SessionPhase,
    /// Consecutive deferred polls since the limit was reached.
    pub grace_polls_used: u32,
}

impl SessionTimingState {
    fn new(
        session_id: SessionId,
        child_id: ChildId,
        minutes_today_before: u32,
        minutes_week_before: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            child_id,
            session_start: now,
            last_activity: now,
            minutes_today_before,
            minutes_week_before,
            warnings_issued: Vec::new(),
            override_active: false,
            phase: SessionPhase::Active,
            grace_polls_used: 0,
        }
    }

    /// Minutes elapsed in this session at `now`.
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> u32 {
        (now - self.session_start).num_minutes().max(0) as u32
    }

    /// Minutes remaining against both budgets at `now`.
    pub fn minutes_remaining(&self, limits: &GovernorLimits, now: DateTime<Utc>) -> u32 {
        let elapsed = self.elapsed_minutes(now);
        let daily_left = limits
            .daily_limit_minutes
            .saturating_sub(self.minutes_today_before + elapsed);
        let weekly_left = limits
            .weekly_limit_minutes
            .saturating_sub(self.minutes_week_before + elapsed);
        daily_left.min(weekly_left)
    }
}

/// What a poll decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollDecision {
    pub should_warn: bool,
    /// Minutes-remaining threshold of the warning to show, when warning.
    pub warning_level: Option<u32>,
    pub should_end: bool,
    pub override_active: bool,
    pub minutes_remaining: u32,
    /// Whether ending was deferred because the context made it a bad
    /// time to interrupt.
    pub deferred: bool,
}

impl PollDecision {
    fn quiet(minutes_remaining: u32, override_active: bool) -> Self {
        Self {
            should_warn: false,
            warning_level: None,
            should_end: false,
            override_active,
            minutes_remaining,
            deferred: false,
        }
    }
}

/// Errors from governor operations.
#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("session {0} has already ended")]
    SessionEnded(SessionId),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("governor lock poisoned")]
    Lock,
}

/// Governs all active sessions against configured limits.
pub struct SessionTimeGovernor {
    sessions: RwLock<HashMap<SessionId, SessionTimingState>>,
    limits: RwLock<GovernorLimits>,
}

impl SessionTimeGovernor {
    pub fn new(limits: GovernorLimits) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            limits: RwLock::new(limits),
        }
    }

    /// Register a session starting now, with usage carried in from
    /// earlier sessions today and this week.
    pub fn start_session(
        &self,
        session_id: SessionId,
        child_id: ChildId,
        minutes_today_before: u32,
        minutes_week_before: u32,
    ) -> Result<(), GovernorError> {
        self.start_session_at(
            session_id,
            child_id,
            minutes_today_before,
            minutes_week_before,
            Utc::now(),
        )
    }

    pub fn start_session_at(
        &self,
        session_id: SessionId,
        child_id: ChildId,
        minutes_today_before: u32,
        minutes_week_before: u32,
        now: DateTime<Utc>,
    ) -> Result<(), GovernorError> {
        let state = SessionTimingState::new(
            session_id.clone(),
            child_id,
            minutes_today_before,
            minutes_week_before,
            now,
        );
        let mut sessions = self.sessions.write().map_err(|_| GovernorError::Lock)?;
        sessions.insert(session_id, state);
        Ok(())
    }

    /// Poll a session now.
    pub fn poll(
        &self,
        session_id: &SessionId,
        context: &ConversationContext,
    ) -> Result<PollDecision, GovernorError> {
        self.poll_at(session_id, context, Utc::now())
    }

    /// Poll a session at an explicit instant.
    ///
    /// Deterministic: the same state, context, and instant always yield
    /// the same decision.
    pub fn poll_at(
        &self,
        session_id: &SessionId,
        context: &ConversationContext,
        now: DateTime<Utc>,
    ) -> Result<PollDecision, GovernorError> {
        let limits = self.limits.read().map_err(|_| GovernorError::Lock)?.clone();
        let mut sessions = self.sessions.write().map_err(|_| GovernorError::Lock)?;
        let state = sessions
            .get_mut(session_id)
            .ok_or_else(|| GovernorError::UnknownSession(session_id.clone()))?;

        if state.phase == SessionPhase::Ended {
            return Err(GovernorError::SessionEnded(session_id.clone()));
        }

        state.last_activity = now;
        let remaining = state.minutes_remaining(&limits, now);

        // Override suspends enforcement entirely; only an explicit
        // end_session closes the session.
        if state.override_active {
            return Ok(PollDecision::quiet(remaining, true));
        }

        if remaining == 0 {
            // Hard limit reached. End if the moment allows it, or after
            // the grace budget is spent — the limit is a guarantee, the
            // grace is bounded courtesy.
            if context.good_time_to_end || state.grace_polls_used >= limits.max_grace_polls {
                if !context.good_time_to_end {
                    warn!(
                        session = %session_id,
                        grace_polls = state.grace_polls_used,
                        "grace budget exhausted, ending despite context"
                    );
                }
                state.phase = SessionPhase::GracefullyEnding;
                info!(session = %session_id, "session entering graceful ending");
                return Ok(PollDecision {
                    should_warn: false,
                    warning_level: None,
                    should_end: true,
                    override_active: false,
                    minutes_remaining: 0,
                    deferred: false,
                });
            }
            state.grace_polls_used += 1;
            debug!(
                session = %session_id,
                grace_polls = state.grace_polls_used,
                "bad time to end, deferring"
            );
            return Ok(PollDecision {
                should_warn: false,
                warning_level: None,
                should_end: false,
                override_active: false,
                minutes_remaining: 0,
                deferred: true,
            });
        }

        // Time remains: check whether a warning threshold has been
        // crossed that we have not warned about, context permitting.
        if let Some(threshold) = due_warning(&limits, &state.warnings_issued, remaining) {
            if context.good_time_to_end {
                state.warnings_issued.push(WarningRecord {
                    threshold_minutes: threshold,
                    issued_at: now,
                });
                state.phase = SessionPhase::WarningIssued;
                info!(session = %session_id, threshold, remaining, "time warning issued");
                return Ok(PollDecision {
                    should_warn: true,
                    warning_level: Some(threshold),
                    should_end: false,
                    override_active: false,
                    minutes_remaining: remaining,
                    deferred: false,
                });
            }
            // Bad time: the warning stays due and is rechecked next poll.
            debug!(session = %session_id, threshold, "warning deferred by context");
            return Ok(PollDecision {
                should_warn: false,
                warning_level: None,
                should_end: false,
                override_active: false,
                minutes_remaining: remaining,
                deferred: true,
            });
        }

        Ok(PollDecision::quiet(remaining, false))
    }

    /// Parent-initiated override: suspends enforcement for the rest of
    /// the session without erasing accumulated usage.
    pub fn extend_time(&self, session_id: &SessionId) -> Result<(), GovernorError> {
        let mut sessions = self.sessions.write().map_err(|_| GovernorError::Lock)?;
        let state = sessions
            .get_mut(session_id)
            .ok_or_else(|| GovernorError::UnknownSession(session_id.clone()))?;
        match state.phase {
            SessionPhase::Ended => Err(GovernorError::SessionEnded(session_id.clone())),
            _ => {
                state.override_active = true;
                info!(session = %session_id, child = %state.child_id, "parent override activated");
                Ok(())
            }
        }
    }

    /// Explicitly end a session, from any state. Stops further warnings
    /// and polling immediately.
    pub fn end_session(&self, session_id: &SessionId) -> Result<SessionTimingState, GovernorError> {
        let mut sessions = self.sessions.write().map_err(|_| GovernorError::Lock)?;
        let state = sessions
            .get_mut(session_id)
            .ok_or_else(|| GovernorError::UnknownSession(session_id.clone()))?;
        if state.phase == SessionPhase::Ended {
            return Err(GovernorError::SessionEnded(session_id.clone()));
        }
        state.phase = SessionPhase::Ended;
        info!(session = %session_id, "session ended");
        Ok(state.clone())
    }

    /// Snapshot of a session's timing state.
    pub fn state(&self, session_id: &SessionId) -> Result<SessionTimingState, GovernorError> {
        let sessions = self.sessions.read().map_err(|_| GovernorError::Lock)?;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| GovernorError::UnknownSession(session_id.clone()))
    }

    /// Replace limits (hot reload). In-flight sessions pick the new
    /// limits up on their next poll.
    pub fn set_limits(&self, limits: GovernorLimits) -> Result<(), GovernorError> {
        *self.limits.write().map_err(|_| GovernorError::Lock)? = limits;
        Ok(())
    }
}

impl Default for SessionTimeGovernor {
    fn default() -> Self {
        Self::new(GovernorLimits::default())
    }
}

/// The tightest crossed warning threshold that has not been issued.
fn due_warning(limits: &GovernorLimits, issued: &[WarningRecord], remaining: u32) -> Option<u32> {
    limits
        .warning_offsets_minutes
        .iter()
        .copied()
        .filter(|t| remaining <= *t)
        .filter(|t| !issued.iter().any(|w| w.threshold_minutes <= *t))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use haven_context::ConversationContext;

    fn limits(daily: u32) -> GovernorLimits {
        GovernorLimits {
            daily_limit_minutes: daily,
            weekly_limit_minutes: daily * 7,
            warning_offsets_minutes: vec![10, 5, 2, 1],
            max_grace_polls: 3,
        }
    }

    fn good_context() -> ConversationContext {
        ConversationContext::empty()
    }

    fn bad_context() -> ConversationContext {
        ConversationContext {
            good_time_to_end: false,
            emotional_importance: 0.6,
            ..ConversationContext::empty()
        }
    }

    fn started(governor: &SessionTimeGovernor, used_today: u32) -> (SessionId, DateTime<Utc>) {
        let session_id = SessionId::generate();
        let start = Utc::now();
        governor
            .start_session_at(
                session_id.clone(),
                ChildId::new("child-1"),
                used_today,
                used_today,
                start,
            )
            .unwrap();
        (session_id, start)
    }

    #[test]
    fn plenty_of_time_is_quiet() {
        let governor = SessionTimeGovernor::new(limits(60));
        let (id, start) = started(&governor, 0);
        let decision = governor.poll_at(&id, &good_context(), start).unwrap();
        assert!(!decision.should_warn);
        assert!(!decision.should_end);
        assert_eq!(decision.minutes_remaining, 60);
    }

    #[test]
    fn crossing_a_threshold_warns_once() {
        let governor = SessionTimeGovernor::new(limits(60));
        let (id, start) = started(&governor, 0);

        // 53 minutes in: 7 remaining, inside the 10-minute offset
        let later = start + Duration::minutes(53);
        let decision = governor.poll_at(&id, &good_context(), later).unwrap();
        assert!(decision.should_warn);
        assert_eq!(decision.warning_level, Some(10));
        assert_eq!(governor.state(&id).unwrap().phase, SessionPhase::WarningIssued);

        // Next poll at the same threshold: already warned
        let decision = governor.poll_at(&id, &good_context(), later).unwrap();
        assert!(!decision.should_warn);

        // But crossing the 5-minute mark warns again
        let decision = governor
            .poll_at(&id, &good_context(), start + Duration::minutes(56))
            .unwrap();
        assert_eq!(decision.warning_level, Some(5));
    }

    #[test]
    fn warning_deferred_in_bad_context_then_issued() {
        let governor = SessionTimeGovernor::new(limits(60));
        let (id, start) = started(&governor, 0);
        let later = start + Duration::minutes(52);

        let decision = governor.poll_at(&id, &bad_context(), later).unwrap();
        assert!(!decision.should_warn);
        assert!(decision.deferred);

        // Context clears: the warning is still due and fires
        let decision = governor.poll_at(&id, &good_context(), later).unwrap();
        assert!(decision.should_warn);
        assert_eq!(decision.warning_level, Some(10));
    }

    #[test]
    fn storytelling_at_the_limit_defers_the_end() {
        // Daily limit 30, 28 already used: two minutes in crosses zero
        let governor = SessionTimeGovernor::new(limits(30));
        let (id, start) = started(&governor, 28);

        let at_limit = start + Duration::minutes(2);
        let decision = governor.poll_at(&id, &bad_context(), at_limit).unwrap();
        assert!(!decision.should_end);
        assert!(decision.deferred);
        assert_eq!(decision.minutes_remaining, 0);
        assert_eq!(governor.state(&id).unwrap().phase, SessionPhase::Active);
    }

    #[test]
    fn good_time_at_the_limit_ends_gracefully() {
        let governor = SessionTimeGovernor::new(limits(30));
        let (id, start) = started(&governor, 30);

        let decision = governor.poll_at(&id, &good_context(), start).unwrap();
        assert!(decision.should_end);
        assert_eq!(
            governor.state(&id).unwrap().phase,
            SessionPhase::GracefullyEnding
        );
    }

    #[test]
    fn grace_budget_is_bounded() {
        let governor = SessionTimeGovernor::new(limits(30));
        let (id, start) = started(&governor, 30);

        // Three deferrals allowed...
        for _ in 0..3 {
            let decision = governor.poll_at(&id, &bad_context(), start).unwrap();
            assert!(!decision.should_end);
        }
        // ...then the hard limit wins regardless of context
        let decision = governor.poll_at(&id, &bad_context(), start).unwrap();
        assert!(decision.should_end);
    }

    #[test]
    fn never_ends_with_time_remaining() {
        let governor = SessionTimeGovernor::new(limits(60));
        let (id, start) = started(&governor, 0);

        for minute in 0..60 {
            let now = start + Duration::minutes(minute);
            let decision = governor.poll_at(&id, &good_context(), now).unwrap();
            if decision.minutes_remaining > 0 {
                assert!(!decision.should_end);
            }
        }
    }

    #[test]
    fn override_suspends_enforcement() {
        let governor = SessionTimeGovernor::new(limits(30));
        let (id, start) = started(&governor, 30);
        governor.extend_time(&id).unwrap();

        // Way past the limit, still no end, no warnings
        let way_past = start + Duration::minutes(45);
        let decision = governor.poll_at(&id, &good_context(), way_past).unwrap();
        assert!(decision.override_active);
        assert!(!decision.should_end);
        assert!(!decision.should_warn);

        // Usage is not erased
        assert_eq!(
            governor.state(&id).unwrap().minutes_remaining(&limits(30), way_past),
            0
        );

        // Explicit end still works
        governor.end_session(&id).unwrap();
        assert_eq!(governor.state(&id).unwrap().phase, SessionPhase::Ended);
    }

    #[test]
    fn ended_sessions_reject_polls_and_actions() {
        let governor = SessionTimeGovernor::new(limits(30));
        let (id, start) = started(&governor, 0);
        governor.end_session(&id).unwrap();

        assert!(matches!(
            governor.poll_at(&id, &good_context(), start),
            Err(GovernorError::SessionEnded(_))
        ));
        assert!(matches!(
            governor.extend_time(&id),
            Err(GovernorError::SessionEnded(_))
        ));
        assert!(matches!(
            governor.end_session(&id),
            Err(GovernorError::SessionEnded(_))
        ));
    }

    #[test]
    fn unknown_session_is_reported() {
        let governor = SessionTimeGovernor::default();
        assert!(matches!(
            governor.poll_at(&SessionId::new("nope"), &good_context(), Utc::now()),
            Err(GovernorError::UnknownSession(_))
        ));
    }

    #[test]
    fn decisions_are_deterministic() {
        let make = || {
            let governor = SessionTimeGovernor::new(limits(60));
            let session_id = SessionId::new("same");
            let start = DateTime::parse_from_rfc3339("2026-08-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc);
            governor
                .start_session_at(session_id.clone(), ChildId::new("c"), 0, 0, start)
                .unwrap();
            (governor, session_id, start)
        };

        let (g1, id1, start) = make();
        let (g2, id2, _) = make();
        let now = start + Duration::minutes(53);
        assert_eq!(
            g1.poll_at(&id1, &good_context(), now).unwrap(),
            g2.poll_at(&id2, &good_context(), now).unwrap()
        );
    }

    #[test]
    fn weekly_budget_also_binds() {
        let tight_week = GovernorLimits {
            daily_limit_minutes: 60,
            weekly_limit_minutes: 100,
            warning_offsets_minutes: vec![10, 5, 2, 1],
            max_grace_polls: 3,
        };
        let governor = SessionTimeGovernor::new(tight_week.clone());
        let session_id = SessionId::generate();
        let start = Utc::now();
        governor
            .start_session_at(session_id.clone(), ChildId::new("c"), 0, 95, start)
            .unwrap();

        // Daily budget would allow 60, but the week only has 5 left
        let state = governor.state(&session_id).unwrap();
        assert_eq!(state.minutes_remaining(&tight_week, start), 5);
    }
}
