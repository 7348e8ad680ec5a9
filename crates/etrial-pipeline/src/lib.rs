//! eTrial pipeline: module registry, per-candidate scheduling with gating,
//! decision aggregation, bounded batch execution and the two-stage
//! pre-filter / clinical controller.

pub mod aggregate;
pub mod assembly;
pub mod batch;
pub mod error;
pub mod registry;
pub mod result;
pub mod scheduler;
pub mod two_stage;

pub use aggregate::{aggregate, aggregate_results};
pub use assembly::{registry_from_config, Engine};
pub use batch::{run_batch, DecisionBreakdown};
pub use error::{PipelineError, Result};
pub use registry::{ModuleRegistry, Registration};
pub use result::{PipelineResult, PipelineRun, SkipReason, SkippedModule};
pub use scheduler::Scheduler;
pub use two_stage::{
    BatchOutcome, StageMode, StageStatistics, TwoStageController, CLINICAL_STAGE, PREFILTER_STAGE,
};
