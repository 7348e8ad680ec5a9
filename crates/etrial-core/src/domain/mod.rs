//! Domain models for eTrial.
//!
//! Canonical definitions for the core entities:
//! - `Candidate`: the immutable entity under evaluation
//! - `Decision`: PASS / REVISE / KILL / INFORMATIVE
//! - `Metric` and `ModuleResult`: what a scoring module reports
//! - the error taxonomy shared by every crate

pub mod candidate;
pub mod decision;
pub mod digest;
pub mod error;
pub mod metric;

pub use candidate::{Candidate, Modality};
pub use decision::{Decision, INTERNAL_ERROR_EXIT_CODE};
pub use error::{
    AuditIntegrityError, ConfigurationError, DataQualityError, EtrialError, ModuleExecutionError,
    Result,
};
pub use metric::{Metric, ModuleResult, ModuleResultBuilder, Outcome};
