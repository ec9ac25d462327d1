use thiserror::Error;

/// Outcomes the prediction pipeline reports across component boundaries.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Insufficient data: {available} available, {required} required")]
    InsufficientData { available: usize, required: usize },

    #[error("Training failure: {0}")]
    TrainingFailure(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
