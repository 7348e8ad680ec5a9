//! Candidate definitions: the entity under evaluation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::digest::compute_digest;
use crate::domain::error::Result;

/// Therapeutic modality of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Antibody,
    Nanobody,
    Peptide,
    SmallMolecule,
    Protein,
    Bispecific,
    #[serde(rename = "antibody_drug_conjugate")]
    Adc,
    Other,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Antibody => "antibody",
            Modality::Nanobody => "nanobody",
            Modality::Peptide => "peptide",
            Modality::SmallMolecule => "small_molecule",
            Modality::Protein => "protein",
            Modality::Bispecific => "bispecific",
            Modality::Adc => "antibody_drug_conjugate",
            Modality::Other => "other",
        }
    }

    /// Biologics carry an amino-acid sequence.
    pub fn is_biologic(self) -> bool {
        matches!(
            self,
            Modality::Antibody
                | Modality::Nanobody
                | Modality::Protein
                | Modality::Bispecific
                | Modality::Adc
        )
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate to be validated.
///
/// Immutable once built: modules only ever receive a shared reference.
/// The attribute bag carries anything the ingestion side produced (chain
/// sequences, precomputed measurements, provenance notes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Stable identity used to key batch results.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    pub modality: Modality,

    /// Target protein or pathway label.
    pub target: String,

    /// Primary sequence (amino acids or SMILES).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,

    /// Reference to a structure (path or accession), never opened by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_ref: Option<String>,

    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Candidate {
    /// Create a candidate whose id equals its name.
    pub fn new(name: impl Into<String>, modality: Modality, target: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            modality,
            target: target.into(),
            sequence: None,
            structure_ref: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.sequence = Some(sequence.into());
        self
    }

    pub fn with_structure_ref(mut self, structure_ref: impl Into<String>) -> Self {
        self.structure_ref = Some(structure_ref.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Sequence used by sequence-level modules.
    ///
    /// Antibodies fall back to the `heavy_chain` then `light_chain`
    /// attributes when no explicit sequence was given.
    pub fn primary_sequence(&self) -> Option<&str> {
        if let Some(seq) = self.sequence.as_deref() {
            return Some(seq);
        }
        if self.modality == Modality::Antibody {
            for key in ["heavy_chain", "light_chain"] {
                if let Some(chain) = self.attributes.get(key).and_then(|v| v.as_str()) {
                    return Some(chain);
                }
            }
        }
        None
    }

    /// Numeric attribute lookup.
    pub fn numeric_attribute(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(|v| v.as_f64())
    }

    /// SHA-256 of the canonical JSON form; the audit `input_hash`.
    pub fn digest(&self) -> Result<String> {
        compute_digest(&serde_json::to_value(self)?)
    }
}
