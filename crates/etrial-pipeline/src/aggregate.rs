//! Folding per-module decisions into the overall decision.
//!
//! 1. any critical KILL gives KILL
//! 2. else any critical REVISE or non-critical KILL gives REVISE
//! 3. else any non-critical REVISE gives REVISE
//! 4. else PASS
//!
//! Capping non-critical decisions at REVISE and taking the worst over
//! PASS < REVISE < KILL yields exactly these rules, so the result does not
//! depend on the order of the inputs. INFORMATIVE never contributes.

use etrial_core::{Decision, ModuleResult};

/// One module's contribution: its decision and whether it is critical.
fn contribution(decision: Decision, critical: bool) -> Decision {
    match (decision, critical) {
        (Decision::Kill, false) => Decision::Revise,
        (d, _) => d,
    }
}

/// Overall decision from `(decision, is_critical)` pairs.
pub fn aggregate<I>(verdicts: I) -> Decision
where
    I: IntoIterator<Item = (Decision, bool)>,
{
    match Decision::worst_of(verdicts.into_iter().map(|(d, c)| contribution(d, c))) {
        Decision::Informative => Decision::Pass,
        decision => decision,
    }
}

/// Overall decision for a run's module results.
pub fn aggregate_results<'a, I>(results: I) -> Decision
where
    I: IntoIterator<Item = &'a ModuleResult>,
{
    aggregate(results.into_iter().map(|r| (r.decision, r.is_critical)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use Decision::*;

    #[test]
    fn test_canonical_rules() {
        assert_eq!(aggregate([(Pass, true), (Kill, true)]), Kill);
        assert_eq!(aggregate([(Pass, true), (Kill, false)]), Revise);
        assert_eq!(aggregate([(Revise, true), (Pass, false)]), Revise);
        assert_eq!(aggregate([(Pass, true), (Revise, false)]), Revise);
        assert_eq!(aggregate([(Pass, true), (Pass, false)]), Pass);
    }

    #[test]
    fn test_informative_never_gates() {
        assert_eq!(aggregate([(Informative, true), (Pass, false)]), Pass);
        assert_eq!(aggregate([(Informative, true), (Informative, false)]), Pass);
        assert_eq!(aggregate([(Informative, false), (Kill, true)]), Kill);
    }

    #[test]
    fn test_empty_is_pass() {
        assert_eq!(aggregate(Vec::new()), Pass);
    }
}
