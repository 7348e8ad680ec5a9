//! What a candidate run produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use etrial_core::{AuditRecord, Decision, Modality, ModuleResult};

/// Why a selected module did not execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A critical module returned KILL earlier in the run.
    Gated { by: String },
    /// The module is not registered for the candidate's modality.
    NotApplicable { modality: Modality },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedModule {
    pub module_name: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Immutable outcome of one candidate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub candidate_id: String,
    pub overall_decision: Decision,
    /// Executed modules in execution order.
    pub module_results: Vec<ModuleResult>,
    /// Selected modules that never ran, in registration order.
    pub skipped: Vec<SkippedModule>,
    pub runtime_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

impl PipelineResult {
    pub fn result(&self, module: &str) -> Option<&ModuleResult> {
        self.module_results.iter().find(|r| r.module_name == module)
    }

    pub fn skip_reason(&self, module: &str) -> Option<&SkipReason> {
        self.skipped
            .iter()
            .find(|s| s.module_name == module)
            .map(|s| &s.reason)
    }

    pub fn executed(&self) -> Vec<&str> {
        self.module_results.iter().map(|r| r.module_name.as_str()).collect()
    }

    /// Results the scheduler synthesized after a module failure.
    pub fn failures(&self) -> impl Iterator<Item = &ModuleResult> {
        self.module_results.iter().filter(|r| r.is_synthesized())
    }

    pub fn exit_code(&self) -> i32 {
        self.overall_decision.exit_code()
    }
}

/// A result together with its sealed audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub result: PipelineResult,
    pub audit: AuditRecord,
}

impl PipelineRun {
    pub fn candidate_id(&self) -> &str {
        &self.result.candidate_id
    }

    pub fn decision(&self) -> Decision {
        self.result.overall_decision
    }
}
