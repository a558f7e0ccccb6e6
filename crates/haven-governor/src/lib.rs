//! # haven-governor
//!
//! The conversation-aware session time governor.
//!
//! Tracks elapsed and remaining chat time per child against daily and
//! weekly budgets, and decides when to warn or end a session. The
//! decision is gated on conversation context: a hard time limit is
//! still enforced, but the governor will not cut a child off in the
//! middle of a story or an unresolved distressed moment when a short
//! deferral is available instead.
//!
//! Sessions move `Active → WarningIssued → GracefullyEnding → Ended`,
//! with a parent override as an orthogonal flag that suspends
//! enforcement without erasing accumulated usage. Transitions are
//! deterministic: identical context and elapsed time always produce
//! the same decision. Phrasing variety lives in [`NaturalExitGenerator`],
//! never in the state machine.

#![deny(unsafe_code)]

pub mod exit;
pub mod governor;

pub use exit::NaturalExitGenerator;
pub use governor::{
    GovernorError, PollDecision, SessionPhase, SessionTimeGovernor, SessionTimingState,
    WarningRecord,
};
