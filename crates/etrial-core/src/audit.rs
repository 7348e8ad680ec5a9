//! Audit trail and reproducibility verification.
//!
//! Every candidate run owns one [`AuditRecorder`]. It is opened before the
//! first module runs, receives a timeline entry per executed module and is
//! sealed into an immutable [`AuditRecord`] when the run completes.
//!
//! Two records reproduce each other when their `config_hash`, `input_hash`
//! and `module_versions` agree. The environment snapshot and timestamps are
//! kept for humans and never compared.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use uuid::Uuid;

use crate::domain::{AuditIntegrityError, Decision};

/// Where a run happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub os: String,
    pub arch: String,
    pub family: String,
    pub engine_version: String,
    pub available_parallelism: usize,
    pub gpu_enabled: bool,
}

impl EnvironmentSnapshot {
    pub fn capture(gpu_enabled: bool) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
            engine_version: crate::VERSION.to_string(),
            available_parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            gpu_enabled,
        }
    }
}

/// What came out of one module execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TimelineOutcome {
    Completed { decision: Decision },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub module_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: TimelineOutcome,
}

impl TimelineEntry {
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}

/// Sealed reproducibility record for one candidate run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: Uuid,
    pub candidate_id: String,
    pub config_hash: String,
    pub input_hash: String,
    pub environment: EnvironmentSnapshot,
    /// Every module selected for the run, executed or skipped.
    pub module_versions: BTreeMap<String, String>,
    pub timeline: Vec<TimelineEntry>,
    pub started_at: DateTime<Utc>,
    pub sealed_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Compare against another record. See [`verify`].
    pub fn verify(&self, other: &AuditRecord) -> ReproducibilityReport {
        verify(self, other)
    }

    /// Write the record as pretty JSON.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self).context("serialize audit record")?;
        std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("parse audit record {:?}", path))
    }
}

/// Open audit record, appended to while a run executes.
#[derive(Debug)]
pub struct AuditRecorder {
    run_id: Uuid,
    candidate_id: String,
    config_hash: String,
    input_hash: String,
    environment: EnvironmentSnapshot,
    module_versions: BTreeMap<String, String>,
    timeline: Vec<TimelineEntry>,
    started_at: DateTime<Utc>,
}

impl AuditRecorder {
    pub fn start(
        candidate_id: impl Into<String>,
        config_hash: impl Into<String>,
        input_hash: impl Into<String>,
        environment: EnvironmentSnapshot,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            candidate_id: candidate_id.into(),
            config_hash: config_hash.into(),
            input_hash: input_hash.into(),
            environment,
            module_versions: BTreeMap::new(),
            timeline: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record_module_version(&mut self, module: impl Into<String>, version: impl Into<String>) {
        self.module_versions.insert(module.into(), version.into());
    }

    pub fn record(&mut self, entry: TimelineEntry) {
        self.timeline.push(entry);
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    /// Freeze the record.
    pub fn seal(self) -> AuditRecord {
        AuditRecord {
            run_id: self.run_id,
            candidate_id: self.candidate_id,
            config_hash: self.config_hash,
            input_hash: self.input_hash,
            environment: self.environment,
            module_versions: self.module_versions,
            timeline: self.timeline,
            started_at: self.started_at,
            sealed_at: Utc::now(),
        }
    }
}

/// One field that differs between two records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDifference {
    pub field: String,
    pub left: Option<String>,
    pub right: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReproducibilityReport {
    pub matches: bool,
    pub differences: Vec<AuditDifference>,
}

impl ReproducibilityReport {
    pub fn fields(&self) -> Vec<String> {
        self.differences.iter().map(|d| d.field.clone()).collect()
    }

    /// Turn a mismatch into an error for callers that must fail hard.
    pub fn ensure_match(&self) -> Result<(), AuditIntegrityError> {
        if self.matches {
            Ok(())
        } else {
            Err(AuditIntegrityError {
                fields: self.fields(),
            })
        }
    }
}

/// Field-by-field comparison of `config_hash`, `input_hash` and each entry
/// of `module_versions` (reported as `module_versions.<name>`).
pub fn verify(left: &AuditRecord, right: &AuditRecord) -> ReproducibilityReport {
    let mut differences = Vec::new();
    let mut compare = |field: String, l: Option<&String>, r: Option<&String>| {
        if l != r {
            differences.push(AuditDifference {
                field,
                left: l.cloned(),
                right: r.cloned(),
            });
        }
    };

    compare(
        "config_hash".to_string(),
        Some(&left.config_hash),
        Some(&right.config_hash),
    );
    compare(
        "input_hash".to_string(),
        Some(&left.input_hash),
        Some(&right.input_hash),
    );

    let names: BTreeSet<&String> = left
        .module_versions
        .keys()
        .chain(right.module_versions.keys())
        .collect();
    for name in names {
        compare(
            format!("module_versions.{}", name),
            left.module_versions.get(name),
            right.module_versions.get(name),
        );
    }

    ReproducibilityReport {
        matches: differences.is_empty(),
        differences,
    }
}
