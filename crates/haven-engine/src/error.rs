//! Errors surfaced by the engine facade.

use haven_governor::GovernorError;
use haven_metrics::MetricsError;
use haven_pipeline::{CollaboratorError, PipelineError};
use haven_safety::SafetyError;
use haven_types::{ConfigError, EventId, SessionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no session registered with id {0}")]
    UnknownSession(SessionId),

    #[error("no safety event with id {0}")]
    UnknownEvent(EventId),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Governor(#[from] GovernorError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rules(#[from] SafetyError),

    #[error("event store unavailable: {0}")]
    Store(#[from] CollaboratorError),

    #[error("engine lock poisoned")]
    Lock,
}
