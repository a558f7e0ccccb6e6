//! # haven-pipeline
//!
//! The safety escalation pipeline: the single path every message takes
//! through the engine.
//!
//! Evaluation has three named stages — inbound check, timed generation,
//! outbound check — so cancellation and partial-failure semantics are
//! explicit rather than implicit in call ordering. The classifier runs
//! on both the child's message and the candidate reply; a generator
//! that produces unsafe content is a system failure, not a user one.
//!
//! Every failure on the classification path degrades toward the safer
//! outcome: the pipeline blocks rather than allows, and a blocked
//! message always yields a fixed age-appropriate response, never a raw
//! error.

#![deny(unsafe_code)]

pub mod collaborators;
pub mod error;
pub mod event;
pub mod memory;
pub mod pipeline;

pub use collaborators::{
    ContentGenerator, ModerationDecision, ModerationQueue, NotificationDispatcher,
    SafetyEventStore,
};
pub use error::{CollaboratorError, PipelineError};
pub use event::{AuditRecord, EventStatus, SafetyEvent, SafetyEventType};
pub use pipeline::{
    EvaluateRequest, PipelineAction, PipelineConfig, PipelineOutcome, SafetyEscalationPipeline,
};
