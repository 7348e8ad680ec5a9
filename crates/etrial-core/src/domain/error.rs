//! Domain-level error taxonomy for eTrial.

use std::time::Duration;

/// Problems found while loading or validating pipeline configuration.
///
/// These are the only errors allowed to abort a run: a pipeline with a
/// malformed configuration has undefined decision semantics and must refuse
/// to start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("threshold rule for '{metric}' has no bands")]
    EmptyRule { metric: String },

    #[error("threshold band {band} for '{metric}' is empty or inverted: [{lower}, {upper})")]
    InvalidBand {
        metric: String,
        band: String,
        lower: String,
        upper: String,
    },

    #[error("threshold bands {first} and {second} for '{metric}' overlap")]
    OverlappingBands {
        metric: String,
        first: String,
        second: String,
    },

    #[error("threshold bands for '{metric}' leave values {region} unclassified")]
    GapInBands { metric: String, region: String },

    #[error("duplicate module name: {0}")]
    DuplicateModule(String),

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("module '{module}' references metric '{metric}' with no threshold rule")]
    UnknownMetric { module: String, metric: String },

    #[error("invalid option {option}: {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A module failed or exceeded its time budget during `validate`.
///
/// Never propagated out of a run: the scheduler turns it into a synthesized
/// KILL result carrying this error's message as a risk.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModuleExecutionError {
    #[error("module '{module}' failed: {message}")]
    Failed { module: String, message: String },

    #[error("module '{module}' panicked: {message}")]
    Panicked { module: String, message: String },

    #[error("module '{module}' timed out after {timeout:?}")]
    TimedOut { module: String, timeout: Duration },
}

impl ModuleExecutionError {
    /// Name of the module that failed.
    pub fn module(&self) -> &str {
        match self {
            Self::Failed { module, .. }
            | Self::Panicked { module, .. }
            | Self::TimedOut { module, .. } => module,
        }
    }
}

/// Out-of-domain metric values, recovered locally as KILL.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataQualityError {
    #[error("metric '{metric}' is not a finite number ({value})")]
    NonFinite { metric: String, value: f64 },

    #[error("metric '{metric}' is missing or not numeric")]
    Missing { metric: String },
}

/// Two audit records that were expected to be reproducible differ.
#[derive(Debug, Clone, thiserror::Error)]
#[error("audit records are not reproducible: {} difference(s) in [{}]", .fields.len(), .fields.join(", "))]
pub struct AuditIntegrityError {
    pub fields: Vec<String>,
}

/// eTrial domain errors.
#[derive(Debug, thiserror::Error)]
pub enum EtrialError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("audit integrity error: {0}")]
    AuditIntegrity(#[from] AuditIntegrityError),

    #[error("non-canonical value: {0}")]
    NonCanonical(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for eTrial domain operations.
pub type Result<T> = std::result::Result<T, EtrialError>;
