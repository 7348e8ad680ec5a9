//! Structured observability hooks for eTrial run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via `run_span`
//! - Emission functions for key lifecycle events: config load, run start and
//!   finish, per-module outcomes, gating and stage completion
//!
//! Events are emitted at `info!` level (`warn!` for failures and gating).
//! Filtering follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::domain::Decision;

/// Run-scoped span tagged with the run and candidate ids.
///
/// Attach it to the run future with `tracing::Instrument` rather than
/// entering it, since the run suspends across module executions.
///
/// # Example
///
/// ```ignore
/// run_candidate(..).instrument(run_span(&run_id, "mAb-1")).await
/// ```
pub fn run_span(run_id: &str, candidate_id: &str) -> tracing::Span {
    tracing::info_span!("etrial.run", run_id = %run_id, candidate_id = %candidate_id)
}

/// Emit event: configuration loaded and validated.
pub fn emit_config_loaded(config_hash: &str, modules: usize, thresholds: usize) {
    info!(
        event = "config.loaded",
        config_hash = %config_hash,
        modules = modules,
        thresholds = thresholds,
    );
}

/// Emit event: run started for a candidate with the number of scheduled modules.
pub fn emit_run_started(run_id: &str, candidate_id: &str, scheduled: usize) {
    info!(event = "run.started", run_id = %run_id, candidate_id = %candidate_id, scheduled = scheduled);
}

/// Emit event: one module produced a result.
pub fn emit_module_finished(module: &str, decision: Decision, duration_ms: u64) {
    info!(
        event = "module.finished",
        module = %module,
        decision = %decision,
        duration_ms = duration_ms,
    );
}

/// Emit event: a module failed and a synthesized KILL took its place.
pub fn emit_module_failed(module: &str, error: &dyn std::fmt::Display) {
    warn!(event = "module.failed", module = %module, error = %error);
}

/// Emit event: a critical KILL stopped scheduling.
pub fn emit_gate_triggered(module: &str, skipped: usize) {
    warn!(event = "gate.triggered", module = %module, skipped = skipped);
}

/// Emit event: run finished with the overall decision.
pub fn emit_run_finished(run_id: &str, decision: Decision, duration_ms: u64, executed: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        decision = %decision,
        duration_ms = duration_ms,
        executed = executed,
    );
}

/// Emit event: a batch stage completed.
pub fn emit_stage_finished(stage: &str, input_count: usize, output_count: usize, elapsed_ms: u64) {
    info!(
        event = "stage.finished",
        stage = %stage,
        input_count = input_count,
        output_count = output_count,
        elapsed_ms = elapsed_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _entered = run_span("test-run-id", "mAb-1").entered();
        emit_module_finished("binding", Decision::Pass, 3);
        emit_gate_triggered("binding", 2);
    }
}
