//! Two-stage screening: a cheap pre-filter over the whole batch, then the
//! expensive clinical module set on the survivors only.
//!
//! Survivors of stage 1 are the candidates whose overall decision is PASS or
//! REVISE. Stage 2 is authoritative for them; rejected candidates keep their
//! stage-1 result. Final results are keyed by candidate id.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::info;

use etrial_core::obs::emit_stage_finished;
use etrial_core::{Candidate, Decision};

use crate::batch::{ensure_unique_ids, run_batch, DecisionBreakdown};
use crate::error::Result;
use crate::result::PipelineRun;
use crate::scheduler::Scheduler;

pub const PREFILTER_STAGE: &str = "prefilter";
pub const CLINICAL_STAGE: &str = "clinical";

/// Which stages a batch runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    /// Stage-1 results are final.
    Prefilter,
    /// Every candidate goes straight to stage 2.
    Clinical,
    #[default]
    Both,
}

impl StageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageMode::Prefilter => "prefilter",
            StageMode::Clinical => "clinical",
            StageMode::Both => "both",
        }
    }
}

impl fmt::Display for StageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prefilter" => Ok(StageMode::Prefilter),
            "clinical" => Ok(StageMode::Clinical),
            "both" => Ok(StageMode::Both),
            other => Err(format!(
                "unknown stage mode '{}' (expected prefilter, clinical or both)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatistics {
    pub stage_name: String,
    pub input_count: usize,
    pub output_count: usize,
    pub elapsed_seconds: f64,
    /// Ids of candidates this stage killed, sorted.
    pub rejected: Vec<String>,
}

impl StageStatistics {
    fn from_runs(stage_name: &str, runs: &BTreeMap<String, PipelineRun>, elapsed_seconds: f64) -> Self {
        let rejected: Vec<String> = runs
            .iter()
            .filter(|(_, run)| run.decision() == Decision::Kill)
            .map(|(id, _)| id.clone())
            .collect();
        Self {
            stage_name: stage_name.to_string(),
            input_count: runs.len(),
            output_count: runs.len() - rejected.len(),
            elapsed_seconds,
            rejected,
        }
    }

    /// Fraction of inputs that survived; zero for an empty stage.
    pub fn pass_rate(&self) -> f64 {
        if self.input_count == 0 {
            return 0.0;
        }
        self.output_count as f64 / self.input_count as f64
    }

    /// Candidates processed per second; zero when nothing was timed.
    pub fn throughput_per_sec(&self) -> f64 {
        if self.elapsed_seconds <= 0.0 {
            return 0.0;
        }
        self.input_count as f64 / self.elapsed_seconds
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub mode: StageMode,
    /// Authoritative run per candidate.
    pub results: BTreeMap<String, PipelineRun>,
    /// Stage-1 run per candidate, including those stage 2 later evaluated.
    pub prefilter_results: BTreeMap<String, PipelineRun>,
    pub stage1_stats: Option<StageStatistics>,
    pub stage2_stats: Option<StageStatistics>,
}

impl BatchOutcome {
    pub fn final_decision(&self, candidate_id: &str) -> Option<Decision> {
        self.results.get(candidate_id).map(PipelineRun::decision)
    }

    /// Ids whose final decision is not KILL.
    pub fn final_candidates(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, run)| run.decision() != Decision::Kill)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn decision_breakdown(&self) -> DecisionBreakdown {
        DecisionBreakdown::from_decisions(self.results.values().map(PipelineRun::decision))
    }

    /// Worst final decision; PASS for an empty batch.
    pub fn worst_decision(&self) -> Decision {
        match Decision::worst_of(self.results.values().map(PipelineRun::decision)) {
            Decision::Informative => Decision::Pass,
            decision => decision,
        }
    }
}

/// Drives a batch through the pre-filter and clinical module sets of one
/// scheduler.
#[derive(Debug, Clone)]
pub struct TwoStageController {
    scheduler: Scheduler,
    n_jobs: usize,
}

impl TwoStageController {
    pub fn new(scheduler: Scheduler, n_jobs: usize) -> Self {
        Self {
            scheduler,
            n_jobs: n_jobs.max(1),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run the batch. Both module lists are checked before anything runs.
    pub async fn run(
        &self,
        candidates: &[Candidate],
        prefilter_modules: &[String],
        clinical_modules: &[String],
        mode: StageMode,
    ) -> Result<BatchOutcome> {
        ensure_unique_ids(candidates)?;
        self.scheduler.registry().select(Some(prefilter_modules))?;
        self.scheduler.registry().select(Some(clinical_modules))?;
        info!(candidates = candidates.len(), mode = %mode, "starting staged batch");

        let mut prefilter_results = BTreeMap::new();
        let mut stage1_stats = None;
        let mut survivors: Vec<Candidate> = candidates.to_vec();

        if mode != StageMode::Clinical {
            let clock = Instant::now();
            prefilter_results =
                run_batch(&self.scheduler, candidates, Some(prefilter_modules), self.n_jobs).await?;
            let stats = StageStatistics::from_runs(
                PREFILTER_STAGE,
                &prefilter_results,
                clock.elapsed().as_secs_f64(),
            );
            emit_stage_finished(
                PREFILTER_STAGE,
                stats.input_count,
                stats.output_count,
                clock.elapsed().as_millis() as u64,
            );
            let rejected: BTreeSet<&str> = stats.rejected.iter().map(String::as_str).collect();
            survivors.retain(|c| !rejected.contains(c.id.as_str()));
            stage1_stats = Some(stats);
        }

        let mut results = prefilter_results.clone();
        let mut stage2_stats = None;

        if mode != StageMode::Prefilter {
            let clock = Instant::now();
            let clinical =
                run_batch(&self.scheduler, &survivors, Some(clinical_modules), self.n_jobs).await?;
            let stats = StageStatistics::from_runs(
                CLINICAL_STAGE,
                &clinical,
                clock.elapsed().as_secs_f64(),
            );
            emit_stage_finished(
                CLINICAL_STAGE,
                stats.input_count,
                stats.output_count,
                clock.elapsed().as_millis() as u64,
            );
            results.extend(clinical);
            stage2_stats = Some(stats);
        }

        Ok(BatchOutcome {
            mode,
            results,
            prefilter_results,
            stage1_stats,
            stage2_stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mode_parsing() {
        assert_eq!("Prefilter".parse::<StageMode>(), Ok(StageMode::Prefilter));
        assert_eq!("both".parse::<StageMode>(), Ok(StageMode::Both));
        assert!("fast".parse::<StageMode>().is_err());
        assert_eq!(StageMode::default(), StageMode::Both);
        assert_eq!(StageMode::Clinical.to_string(), "clinical");
    }

    #[test]
    fn test_statistics_rates() {
        let stats = StageStatistics {
            stage_name: PREFILTER_STAGE.to_string(),
            input_count: 5,
            output_count: 3,
            elapsed_seconds: 2.0,
            rejected: vec!["c".to_string(), "e".to_string()],
        };
        assert!((stats.pass_rate() - 0.6).abs() < 1e-12);
        assert!((stats.throughput_per_sec() - 2.5).abs() < 1e-12);

        let empty = StageStatistics {
            stage_name: CLINICAL_STAGE.to_string(),
            input_count: 0,
            output_count: 0,
            elapsed_seconds: 0.0,
            rejected: Vec::new(),
        };
        assert_eq!(empty.pass_rate(), 0.0);
        assert_eq!(empty.throughput_per_sec(), 0.0);
    }
}
