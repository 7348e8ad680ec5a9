//! Categorical decisions and their severity order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome category for a metric, a module, or a whole pipeline run.
///
/// `Pass < Revise < Kill` by severity. `Informative` sits outside the order:
/// it is observational only and never gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Ready for wet-lab validation.
    Pass,
    /// Addressable issues, optimization recommended.
    Revise,
    /// Fundamental flaws, termination recommended.
    Kill,
    /// Reported for context, not gating.
    Informative,
}

impl Decision {
    /// Severity rank, `None` for `Informative`.
    pub fn severity(self) -> Option<u8> {
        match self {
            Decision::Pass => Some(0),
            Decision::Revise => Some(1),
            Decision::Kill => Some(2),
            Decision::Informative => None,
        }
    }

    /// The more severe of two decisions. `Informative` loses to anything.
    pub fn worst(self, other: Decision) -> Decision {
        match (self.severity(), other.severity()) {
            (None, _) => other,
            (_, None) => self,
            (Some(a), Some(b)) if b > a => other,
            _ => self,
        }
    }

    /// Worst-of over an iterator; `Informative` when nothing gates.
    pub fn worst_of<I: IntoIterator<Item = Decision>>(decisions: I) -> Decision {
        decisions
            .into_iter()
            .fold(Decision::Informative, Decision::worst)
    }

    /// Process exit code by convention: PASS 0, REVISE 1, KILL 2.
    pub fn exit_code(self) -> i32 {
        match self {
            Decision::Pass | Decision::Informative => 0,
            Decision::Revise => 1,
            Decision::Kill => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Pass => "PASS",
            Decision::Revise => "REVISE",
            Decision::Kill => "KILL",
            Decision::Informative => "INFORMATIVE",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit code for failures that never produced a decision.
pub const INTERNAL_ERROR_EXIT_CODE: i32 = 3;
