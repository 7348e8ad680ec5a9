//! eTrial core: candidates, decisions, threshold rules, the scoring module
//! contract, built-in modules, configuration and the audit trail.

pub mod audit;
pub mod builtin;
pub mod config;
pub mod domain;
pub mod module;
pub mod obs;
pub mod telemetry;
pub mod threshold;

/// Engine version recorded in every environment snapshot.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use audit::{
    verify, AuditDifference, AuditRecord, AuditRecorder, EnvironmentSnapshot,
    ReproducibilityReport, TimelineEntry, TimelineOutcome,
};
pub use builtin::{BuiltinKind, Fallback};
pub use config::{resolve_jobs, GlobalOptions, ModuleEntry, PipelineConfig, StagesConfig};
pub use domain::{
    AuditIntegrityError, Candidate, ConfigurationError, DataQualityError, Decision, EtrialError,
    Metric, Modality, ModuleExecutionError, ModuleResult, ModuleResultBuilder, Outcome, Result,
    INTERNAL_ERROR_EXIT_CODE,
};
pub use module::{ModuleContext, ScoringModule, DEFAULT_SEED};
pub use obs::{
    emit_config_loaded, emit_gate_triggered, emit_module_failed, emit_module_finished,
    emit_run_finished, emit_run_started, emit_stage_finished, run_span,
};
pub use telemetry::init_tracing;
pub use threshold::{Assessment, Interval, ThresholdRule, ThresholdTable};
