//! Sequence composition heuristics.
//!
//! Cheap, sequence-only signals suited to a pre-filter stage: length,
//! normalised Shannon entropy, longest homopolymer run, N-glycosylation
//! sequons and hydrophobic fraction. Each metric gates only if the threshold
//! table has a rule for it.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::collections::BTreeMap;

use crate::domain::{Candidate, ConfigurationError, Decision, Modality, ModuleResult, Outcome};
use crate::module::{ModuleContext, ScoringModule};

use super::attributes::recommend_for_failures;

pub const DEFAULT_MOTIF: &str = "N[^P][ST]";

const HYDROPHOBIC: &[char] = &['A', 'I', 'L', 'M', 'F', 'V', 'W'];

/// log2(20), the entropy of a uniform amino-acid distribution.
const MAX_ENTROPY: f64 = 4.321_928_094_887_363;

pub const METRIC_LENGTH: &str = "sequence_length";
pub const METRIC_ENTROPY: &str = "sequence_entropy";
pub const METRIC_HOMOPOLYMER: &str = "max_homopolymer_run";
pub const METRIC_MOTIFS: &str = "n_glycosylation_motifs";
pub const METRIC_HYDROPHOBIC: &str = "hydrophobic_fraction";

#[derive(Debug, Clone)]
pub struct SequenceComposition {
    name: String,
    version: String,
    motif: Regex,
}

impl SequenceComposition {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigurationError> {
        Self::with_motif(name, DEFAULT_MOTIF)
    }

    /// Use a custom liability motif pattern.
    pub fn with_motif(name: impl Into<String>, pattern: &str) -> Result<Self, ConfigurationError> {
        let motif = Regex::new(pattern).map_err(|e| ConfigurationError::InvalidOption {
            option: "motif".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            motif,
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn count_motifs(&self, sequence: &str) -> usize {
        self.motif.find_iter(sequence).count()
    }
}

/// Shannon entropy of residue frequencies, normalised to [0, 1] by log2(20).
pub fn normalized_entropy(sequence: &str) -> f64 {
    let mut counts: BTreeMap<char, usize> = BTreeMap::new();
    for c in sequence.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }
    let total = sequence.chars().count() as f64;
    if total == 0.0 {
        return 0.0;
    }
    let entropy: f64 = counts
        .values()
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum();
    entropy / MAX_ENTROPY
}

/// Length of the longest run of one repeated residue.
pub fn max_homopolymer_run(sequence: &str) -> usize {
    let mut best = 0;
    let mut run = 0;
    let mut prev = None;
    for c in sequence.chars() {
        run = if Some(c) == prev { run + 1 } else { 1 };
        best = best.max(run);
        prev = Some(c);
    }
    best
}

pub fn hydrophobic_fraction(sequence: &str) -> f64 {
    let total = sequence.chars().count();
    if total == 0 {
        return 0.0;
    }
    let hydrophobic = sequence.chars().filter(|c| HYDROPHOBIC.contains(c)).count();
    hydrophobic as f64 / total as f64
}

#[async_trait]
impl ScoringModule for SequenceComposition {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn fingerprint(&self) -> serde_json::Value {
        json!({ "kind": "composition", "motif": self.motif.as_str() })
    }

    async fn validate(
        &self,
        candidate: &Candidate,
        ctx: &ModuleContext,
    ) -> anyhow::Result<ModuleResult> {
        let builder = ctx
            .result_builder(self)
            .outcome(Outcome::tool("sequence-composition"));

        if candidate.modality == Modality::SmallMolecule {
            return Ok(builder
                .decision(Decision::Informative)
                .summary("Small molecule: sequence composition not applicable")
                .build());
        }
        let sequence = match candidate.primary_sequence().map(str::trim) {
            Some(seq) if !seq.is_empty() => seq.to_ascii_uppercase(),
            _ => {
                return Ok(builder
                    .decision(Decision::Informative)
                    .summary("No amino-acid sequence available for composition analysis")
                    .build());
            }
        };

        let builder = builder
            .metric(METRIC_LENGTH, sequence.chars().count() as f64, Some("residues"))
            .metric(METRIC_ENTROPY, normalized_entropy(&sequence), Some("score"))
            .metric(
                METRIC_HOMOPOLYMER,
                max_homopolymer_run(&sequence) as f64,
                Some("residues"),
            )
            .metric(METRIC_MOTIFS, self.count_motifs(&sequence) as f64, Some("count"))
            .metric(METRIC_HYDROPHOBIC, hydrophobic_fraction(&sequence), Some("fraction"));

        let builder = recommend_for_failures(builder);
        let decision = builder.current_decision();
        Ok(builder
            .summary(format!(
                "Composition of {} residues: {}",
                sequence.chars().count(),
                decision
            ))
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::{ThresholdRule, ThresholdTable};

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(normalized_entropy(""), 0.0);
        assert_eq!(normalized_entropy("AAAAAA"), 0.0);
        let all = "ACDEFGHIKLMNPQRSTVWY";
        assert!((normalized_entropy(all) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_homopolymer_run() {
        assert_eq!(max_homopolymer_run(""), 0);
        assert_eq!(max_homopolymer_run("MKT"), 1);
        assert_eq!(max_homopolymer_run("MKKKKKTAA"), 5);
    }

    #[test]
    fn test_hydrophobic_fraction() {
        assert_eq!(hydrophobic_fraction("AILV"), 1.0);
        assert_eq!(hydrophobic_fraction("KKAA"), 0.5);
    }

    #[test]
    fn test_motif_counting_and_bad_pattern() {
        let module = SequenceComposition::new("composition").expect("default motif");
        assert_eq!(module.count_motifs("MKNGSQNPTRNAT"), 2);
        assert!(SequenceComposition::with_motif("x", "N[").is_err());
    }

    #[tokio::test]
    async fn test_low_complexity_peptide_is_killed() {
        let thresholds = ThresholdTable::new()
            .with_rule(METRIC_ENTROPY, ThresholdRule::descending(0.5, 0.7))
            .expect("entropy rule")
            .with_rule(METRIC_HOMOPOLYMER, ThresholdRule::ascending(4.0, 6.0))
            .expect("homopolymer rule");
        let ctx = ModuleContext::new(thresholds);
        let module = SequenceComposition::new("composition").expect("module");

        let repetitive = Candidate::new("rep", Modality::Peptide, "t")
            .with_sequence("VVVVVVIIIIILLLLLLFFFF");
        let result = module.validate(&repetitive, &ctx).await.expect("validate");
        assert_eq!(result.decision, Decision::Kill);
        assert_eq!(result.metrics.len(), 5);
        assert!(!result.recommendations.is_empty());

        let diverse = Candidate::new("div", Modality::Antibody, "HER2")
            .with_sequence("EVQLVESGGGLVQPGGSLRLSCAASGFNIKDTYIHWVRQAPGKGLEWVARIYPTNGYTRY");
        let result = module.validate(&diverse, &ctx).await.expect("validate");
        assert_eq!(result.decision, Decision::Pass);
    }

    #[tokio::test]
    async fn test_missing_sequence_is_informative() {
        let ctx = ModuleContext::default();
        let module = SequenceComposition::new("composition").expect("module");
        let candidate = Candidate::new("sm", Modality::SmallMolecule, "t");
        let result = module.validate(&candidate, &ctx).await.expect("validate");
        assert_eq!(result.decision, Decision::Informative);
        assert!(result.metrics.is_empty());
    }
}
