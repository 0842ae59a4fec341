use thiserror::Error;

/// Errors surfaced by [`Pipeline::process`](crate::Pipeline::process).
///
/// Source and task failures are only returned once the pipeline has fully
/// shut down: lanes joined, queue drained and producer joined.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("item source failed: {0}")]
    Source(#[source] anyhow::Error),
    #[error("task `{task}` failed: {source}")]
    Task {
        task: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("pipeline is already running")]
    AlreadyRunning,
    #[error("application has already been run")]
    NotReady,
    #[error("worker lane panicked: {0}")]
    LanePanicked(String),
    #[error("producer panicked: {0}")]
    ProducerPanicked(String),
}

impl PipelineError {
    /// The error raised by the failing source or task, if any.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            PipelineError::Source(err) => Some(err),
            PipelineError::Task { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
}
