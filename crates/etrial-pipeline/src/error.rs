//! Errors that can abort a pipeline or batch run.
//!
//! Module failures never appear here: the scheduler turns them into
//! synthesized KILL results.

use etrial_core::{ConfigurationError, EtrialError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("candidate id '{0}' appears more than once in the batch")]
    DuplicateCandidate(String),

    #[error("failed to hash run inputs: {0}")]
    Hashing(#[from] EtrialError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
