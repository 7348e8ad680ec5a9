//! The contract every scoring module implements.
//!
//! The engine never looks inside a module beyond this trait. `validate` must
//! be a pure function of the candidate and the module's own configuration
//! (including the shared [`ModuleContext`]); identical inputs must reproduce
//! identical metrics, which is what audit verification relies on.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{Candidate, ModuleResult, ModuleResultBuilder};
use crate::threshold::ThresholdTable;

/// Seed handed to modules when the configuration does not set one.
pub const DEFAULT_SEED: u64 = 42;

/// Read-only configuration shared by all modules of a pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleContext {
    pub thresholds: ThresholdTable,
    /// Passed through from configuration; the engine itself ignores it.
    pub gpu_enabled: bool,
    /// Seed for modules with stochastic steps. Same seed, same metrics.
    pub random_seed: u64,
}

impl Default for ModuleContext {
    fn default() -> Self {
        Self::new(ThresholdTable::default())
    }
}

impl ModuleContext {
    pub fn new(thresholds: ThresholdTable) -> Self {
        Self {
            thresholds,
            gpu_enabled: false,
            random_seed: DEFAULT_SEED,
        }
    }

    pub fn with_gpu(mut self, enabled: bool) -> Self {
        self.gpu_enabled = enabled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Result builder bound to this context's threshold table.
    pub fn result_builder(&self, module: &dyn ScoringModule) -> ModuleResultBuilder<'_> {
        ModuleResult::builder(module.name(), &self.thresholds).version(module.version())
    }
}

/// A single independent scoring unit.
///
/// Errors returned from `validate` (and panics or timeouts) are caught by the
/// scheduler and recorded as a synthesized KILL result; they never abort the
/// candidate's run. Modules that do blocking work should move it off the
/// async executor (e.g. `tokio::task::spawn_blocking`).
#[async_trait]
pub trait ScoringModule: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.1.0"
    }

    /// Default criticality; registration may override it.
    fn is_critical(&self) -> bool {
        false
    }

    /// Module-specific settings that influence results, folded into the
    /// audit `config_hash`.
    fn fingerprint(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    async fn validate(
        &self,
        candidate: &Candidate,
        ctx: &ModuleContext,
    ) -> anyhow::Result<ModuleResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decision, Modality};
    use crate::threshold::ThresholdRule;

    struct Fixed;

    #[async_trait]
    impl ScoringModule for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn version(&self) -> &str {
            "2.1.0"
        }

        async fn validate(
            &self,
            candidate: &Candidate,
            ctx: &ModuleContext,
        ) -> anyhow::Result<ModuleResult> {
            let kd = candidate.numeric_attribute("kd_nm").unwrap_or(f64::NAN);
            Ok(ctx.result_builder(self).metric("kd_nm", kd, Some("nM")).build())
        }
    }

    #[tokio::test]
    async fn test_context_builder_carries_name_and_version() {
        let thresholds = ThresholdTable::new()
            .with_rule("kd_nm", ThresholdRule::ascending(50.0, 500.0))
            .expect("rule");
        let ctx = ModuleContext::new(thresholds);
        let candidate = Candidate::new("c", Modality::Antibody, "HER2")
            .with_attribute("kd_nm", serde_json::json!(15));

        let result = Fixed.validate(&candidate, &ctx).await.expect("validate");
        assert_eq!(result.module_name, "fixed");
        assert_eq!(result.version, "2.1.0");
        assert_eq!(result.decision, Decision::Pass);
        assert!(!Fixed.is_critical());
        assert!(Fixed.fingerprint().is_null());
    }

    #[test]
    fn test_context_defaults_and_seed() {
        let ctx = ModuleContext::default();
        assert_eq!(ctx.random_seed, DEFAULT_SEED);
        assert!(!ctx.gpu_enabled);
        assert_eq!(ctx.with_seed(7).random_seed, 7);
    }
}
