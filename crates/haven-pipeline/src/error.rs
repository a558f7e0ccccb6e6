use thiserror::Error;

/// Failures from external collaborators (generator, stores, notifier).
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("content generation failed: {0}")]
    Generation(String),

    #[error("persistence store unavailable: {0}")]
    Store(String),

    #[error("notification dispatch failed: {0}")]
    Notification(String),
}

/// Errors from the escalation pipeline.
///
/// Classification and generation failures are handled fail-closed or
/// fail-soft inside the pipeline and never surface here; only
/// persistence failures that exhausted their retries become hard
/// errors for the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("audit persistence failed after {attempts} attempts: {source}")]
    Persistence {
        attempts: u32,
        #[source]
        source: CollaboratorError,
    },

    #[error("metrics recording failed: {0}")]
    Metrics(#[from] haven_metrics::MetricsError),
}
