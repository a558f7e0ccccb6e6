//! # haven-engine
//!
//! The assembled Haven safety engine.
//!
//! Wires the classifier, escalation pipeline, context analyzer, session
//! governor, and metrics engine into one facade the chat layer talks
//! to. The chat layer supplies the collaborators it owns — content
//! generation, persistence, parent notification, moderation, alerting —
//! as trait objects; everything safety-critical lives here.

#![deny(unsafe_code)]

pub mod engine;
pub mod error;

pub use engine::{EngineReply, HavenEngine, SessionPollOutcome};
pub use error::EngineError;
