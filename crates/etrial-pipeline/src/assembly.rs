//! Building a runnable engine from a [`PipelineConfig`].

use std::collections::BTreeMap;

use etrial_core::builtin;
use etrial_core::obs::emit_config_loaded;
use etrial_core::{Candidate, ConfigurationError, ModuleContext, PipelineConfig, StagesConfig};

use crate::batch::run_batch;
use crate::error::Result;
use crate::registry::{ModuleRegistry, Registration};
use crate::result::PipelineRun;
use crate::scheduler::Scheduler;
use crate::two_stage::{BatchOutcome, StageMode, TwoStageController};

/// Registry of every enabled module, in configuration order.
pub fn registry_from_config(config: &PipelineConfig) -> std::result::Result<ModuleRegistry, ConfigurationError> {
    let mut registry = ModuleRegistry::new();
    for entry in config.enabled_modules() {
        let module = builtin::build(entry)?;
        registry.add(
            Registration::new(module)
                .modalities(entry.modalities.iter().copied())
                .critical(entry.critical)
                .timeout(config.module_timeout(entry)),
        )?;
    }
    Ok(registry)
}

/// Validated configuration turned into a scheduler plus batch settings.
#[derive(Debug, Clone)]
pub struct Engine {
    controller: TwoStageController,
    n_jobs: usize,
    stages: Option<StagesConfig>,
}

impl Engine {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let ctx = ModuleContext::new(config.threshold_table()?)
            .with_gpu(config.global.gpu_enabled)
            .with_seed(config.global.random_seed);
        let registry = registry_from_config(config)?;
        emit_config_loaded(&config.digest()?, registry.len(), ctx.thresholds.len());

        let n_jobs = config.effective_jobs();
        Ok(Self {
            controller: TwoStageController::new(Scheduler::new(registry, ctx), n_jobs),
            n_jobs,
            stages: config.stages.clone(),
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.controller.scheduler()
    }

    pub fn n_jobs(&self) -> usize {
        self.n_jobs
    }

    pub fn has_stages(&self) -> bool {
        self.stages.is_some()
    }

    /// One candidate through every enabled module.
    pub async fn run_candidate(&self, candidate: &Candidate) -> Result<PipelineRun> {
        self.scheduler().run(candidate, None).await
    }

    /// Single-stage batch over every enabled module.
    pub async fn run_batch(&self, candidates: &[Candidate]) -> Result<BTreeMap<String, PipelineRun>> {
        run_batch(self.scheduler(), candidates, None, self.n_jobs).await
    }

    /// Two-stage batch using the configured `[stages]` lists.
    pub async fn run_staged(&self, candidates: &[Candidate], mode: StageMode) -> Result<BatchOutcome> {
        let stages = self.stages.as_ref().ok_or_else(|| ConfigurationError::InvalidOption {
            option: "stages".to_string(),
            reason: "a staged run needs a [stages] section".to_string(),
        })?;
        self.controller
            .run(candidates, &stages.prefilter, &stages.clinical, mode)
            .await
    }
}
