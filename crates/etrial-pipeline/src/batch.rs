//! Running many candidates on a bounded number of concurrent workers.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use etrial_core::{Candidate, Decision};

use crate::error::{PipelineError, Result};
use crate::result::PipelineRun;
use crate::scheduler::Scheduler;

/// Counts of final decisions across a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionBreakdown {
    pub pass: usize,
    pub revise: usize,
    pub kill: usize,
}

impl DecisionBreakdown {
    pub fn from_decisions<I: IntoIterator<Item = Decision>>(decisions: I) -> Self {
        let mut breakdown = Self::default();
        for decision in decisions {
            match decision {
                // overall decisions are never INFORMATIVE; count it with PASS
                Decision::Pass | Decision::Informative => breakdown.pass += 1,
                Decision::Revise => breakdown.revise += 1,
                Decision::Kill => breakdown.kill += 1,
            }
        }
        breakdown
    }

    pub fn total(&self) -> usize {
        self.pass + self.revise + self.kill
    }
}

/// Reject batches in which two candidates share an id.
pub(crate) fn ensure_unique_ids(candidates: &[Candidate]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for candidate in candidates {
        if !seen.insert(candidate.id.as_str()) {
            return Err(PipelineError::DuplicateCandidate(candidate.id.clone()));
        }
    }
    Ok(())
}

/// Run every candidate through `scheduler`, at most `n_jobs` at a time.
///
/// Results are keyed by candidate id; completion order is irrelevant.
/// The selection is checked before any candidate starts.
pub async fn run_batch(
    scheduler: &Scheduler,
    candidates: &[Candidate],
    selection: Option<&[String]>,
    n_jobs: usize,
) -> Result<BTreeMap<String, PipelineRun>> {
    ensure_unique_ids(candidates)?;
    scheduler.registry().select(selection)?;

    let runs: Vec<Result<PipelineRun>> = stream::iter(candidates)
        .map(|candidate| scheduler.run(candidate, selection))
        .buffer_unordered(n_jobs.max(1))
        .collect()
        .await;

    let mut keyed = BTreeMap::new();
    for run in runs {
        let run = run?;
        keyed.insert(run.result.candidate_id.clone(), run);
    }
    Ok(keyed)
}
