//! Pipeline configuration loaded from TOML or JSON.
//!
//! ```toml
//! [global]
//! n_jobs = 4
//! module_timeout_secs = 30
//!
//! [[modules]]
//! name = "binding"
//! kind = "attributes"
//! critical = true
//! metrics = ["kd_nm"]
//!
//! [thresholds.kd_nm]
//! pass = { upper = 50.0 }
//! revise = { lower = 50.0, upper = 500.0 }
//! kill = { lower = 500.0 }
//!
//! [stages]
//! prefilter = ["binding"]
//! clinical = ["binding", "tox"]
//! ```
//!
//! Everything is validated at load time; a configuration that loads is one
//! whose threshold table is total and whose modules can all be built.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::builtin::{self, BuiltinKind, Fallback};
use crate::domain::digest::digest_of;
use crate::domain::{ConfigurationError, Modality, Result};
use crate::module::DEFAULT_SEED;
use crate::threshold::{ThresholdRule, ThresholdTable};

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

/// `[global]` options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalOptions {
    /// Candidates evaluated concurrently in a batch. `0` means all cores.
    #[serde(default)]
    pub n_jobs: usize,
    /// Passed through to modules; the engine ignores it.
    #[serde(default)]
    pub gpu_enabled: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Default per-module time budget; unset means unbounded.
    #[serde(default)]
    pub module_timeout_secs: Option<u64>,
    /// Handed to modules through [`ModuleContext::random_seed`].
    #[serde(default = "default_seed")]
    pub random_seed: u64,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            n_jobs: 0,
            gpu_enabled: false,
            output_dir: default_output_dir(),
            module_timeout_secs: None,
            random_seed: default_seed(),
        }
    }
}

/// One `[[modules]]` entry. Order of entries is execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    pub kind: BuiltinKind,
    #[serde(default)]
    pub critical: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Modalities the module applies to; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modalities: Vec<Modality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Gating metrics; each needs a threshold rule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,
    /// Reported but never gating (attributes only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub informative: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub units: BTreeMap<String, String>,
    /// Executable and arguments (external_tool only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Fallback>,
    /// Liability motif regex (composition only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motif: Option<String>,
}

impl ModuleEntry {
    pub fn new(name: impl Into<String>, kind: BuiltinKind) -> Self {
        Self {
            name: name.into(),
            kind,
            critical: false,
            enabled: true,
            modalities: Vec::new(),
            timeout_secs: None,
            version: None,
            metrics: Vec::new(),
            informative: Vec::new(),
            units: BTreeMap::new(),
            command: Vec::new(),
            fallback: None,
            motif: None,
        }
    }

    pub fn applies_to(&self, modality: Modality) -> bool {
        self.modalities.is_empty() || self.modalities.contains(&modality)
    }
}

/// `[stages]`: module names run in each stage of a two-stage batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default)]
    pub prefilter: Vec<String>,
    #[serde(default)]
    pub clinical: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub global: GlobalOptions,
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<StagesConfig>,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> std::result::Result<Self, ConfigurationError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> std::result::Result<Self, ConfigurationError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` is parsed as JSON, anything else as TOML.
    pub fn from_path(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_toml_str(&text)
        }
    }

    /// Check the whole configuration, reporting the first problem found.
    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        let table = self.threshold_table()?;

        let mut seen = BTreeSet::new();
        for entry in &self.modules {
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigurationError::DuplicateModule(entry.name.clone()));
            }
            if entry.timeout_secs == Some(0) {
                return Err(ConfigurationError::InvalidOption {
                    option: format!("modules.{}.timeout_secs", entry.name),
                    reason: "must be greater than zero".to_string(),
                });
            }
            if !entry.enabled {
                continue;
            }
            for metric in &entry.metrics {
                if !table.contains(metric) {
                    return Err(ConfigurationError::UnknownMetric {
                        module: entry.name.clone(),
                        metric: metric.clone(),
                    });
                }
            }
            builtin::build(entry)?;
        }
        if self.global.module_timeout_secs == Some(0) {
            return Err(ConfigurationError::InvalidOption {
                option: "global.module_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if let Some(stages) = &self.stages {
            for (stage, names) in [("prefilter", &stages.prefilter), ("clinical", &stages.clinical)] {
                let mut listed = BTreeSet::new();
                for name in names {
                    let entry = self
                        .module(name)
                        .ok_or_else(|| ConfigurationError::UnknownModule(name.clone()))?;
                    if !entry.enabled {
                        return Err(ConfigurationError::InvalidOption {
                            option: format!("stages.{}", stage),
                            reason: format!("module '{}' is disabled", name),
                        });
                    }
                    if !listed.insert(name.as_str()) {
                        return Err(ConfigurationError::InvalidOption {
                            option: format!("stages.{}", stage),
                            reason: format!("module '{}' listed twice", name),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// The validated threshold table.
    pub fn threshold_table(&self) -> std::result::Result<ThresholdTable, ConfigurationError> {
        ThresholdTable::from_rules(
            self.thresholds
                .iter()
                .map(|(metric, rule)| (metric.clone(), rule.clone())),
        )
    }

    pub fn module(&self, name: &str) -> Option<&ModuleEntry> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Enabled entries in declaration order.
    pub fn enabled_modules(&self) -> impl Iterator<Item = &ModuleEntry> {
        self.modules.iter().filter(|m| m.enabled)
    }

    /// Time budget for one module: its own, else the global default.
    pub fn module_timeout(&self, entry: &ModuleEntry) -> Option<Duration> {
        entry
            .timeout_secs
            .or(self.global.module_timeout_secs)
            .map(Duration::from_secs)
    }

    /// Batch parallelism with `0` resolved to the available cores.
    pub fn effective_jobs(&self) -> usize {
        resolve_jobs(self.global.n_jobs)
    }

    /// Canonical SHA-256 of the whole configuration.
    pub fn digest(&self) -> Result<String> {
        digest_of(self)
    }
}

/// `0` means all available cores; never returns less than one.
pub fn resolve_jobs(n_jobs: usize) -> usize {
    if n_jobs > 0 {
        return n_jobs;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
