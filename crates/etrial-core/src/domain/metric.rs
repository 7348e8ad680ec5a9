//! Metrics and per-module results.

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::decision::Decision;
use crate::domain::error::{DataQualityError, ModuleExecutionError};
use crate::threshold::ThresholdTable;

/// One measured quantity with its decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    /// Non-finite values are written as JSON `null` and read back as NaN.
    #[serde(deserialize_with = "value_or_nan")]
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub decision: Decision,
}

fn value_or_nan<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// How a module arrived at its metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Computed by the module's primary method or tool.
    ComputedByTool { tool: String },
    /// Primary tool unavailable; a lower-confidence method was used.
    ComputedByFallback { reason: String },
    /// No computation happened: the scheduler synthesized this result after
    /// a failure or timeout.
    Synthesized { cause: String },
}

impl Outcome {
    pub fn tool(tool: impl Into<String>) -> Self {
        Outcome::ComputedByTool { tool: tool.into() }
    }

    pub fn fallback(reason: impl Into<String>) -> Self {
        Outcome::ComputedByFallback {
            reason: reason.into(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Outcome::ComputedByFallback { .. })
    }
}

/// Result reported by one module for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub module_name: String,
    pub version: String,
    pub decision: Decision,
    /// Insertion order is kept for reporting only.
    pub metrics: Vec<Metric>,
    pub summary: String,
    pub recommendations: Vec<String>,
    pub risks: Vec<String>,
    pub is_critical: bool,
    pub outcome: Outcome,
}

impl ModuleResult {
    /// Start a result whose metric decisions come from `thresholds`.
    pub fn builder<'a>(
        module_name: impl Into<String>,
        thresholds: &'a ThresholdTable,
    ) -> ModuleResultBuilder<'a> {
        ModuleResultBuilder::new(module_name, thresholds)
    }

    /// KILL result standing in for a module that failed, panicked or timed out.
    pub fn synthesized(
        module_name: impl Into<String>,
        version: impl Into<String>,
        is_critical: bool,
        error: &ModuleExecutionError,
    ) -> Self {
        let module_name = module_name.into();
        Self {
            summary: format!("{} did not complete; recorded as KILL", module_name),
            module_name,
            version: version.into(),
            decision: Decision::Kill,
            metrics: Vec::new(),
            recommendations: vec!["Resolve the module failure and re-run the candidate".to_string()],
            risks: vec![error.to_string()],
            is_critical,
            outcome: Outcome::Synthesized {
                cause: error.to_string(),
            },
        }
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Whether this result was synthesized by the scheduler after a failure.
    pub fn is_synthesized(&self) -> bool {
        matches!(self.outcome, Outcome::Synthesized { .. })
    }
}

/// Incremental construction of a [`ModuleResult`].
///
/// Each metric is classified through the threshold table; non-finite values
/// become KILL and add a data-quality risk. Unless overridden, the module
/// decision is the worst of its metric decisions (INFORMATIVE when no metric
/// gates).
#[derive(Debug)]
pub struct ModuleResultBuilder<'a> {
    thresholds: &'a ThresholdTable,
    module_name: String,
    version: String,
    metrics: Vec<Metric>,
    summary: Option<String>,
    recommendations: Vec<String>,
    risks: Vec<String>,
    outcome: Outcome,
    decision: Option<Decision>,
}

impl<'a> ModuleResultBuilder<'a> {
    pub fn new(module_name: impl Into<String>, thresholds: &'a ThresholdTable) -> Self {
        let module_name = module_name.into();
        Self {
            thresholds,
            outcome: Outcome::tool(module_name.clone()),
            module_name,
            version: "0.1.0".to_string(),
            metrics: Vec::new(),
            summary: None,
            recommendations: Vec::new(),
            risks: Vec::new(),
            decision: None,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Record a metric classified by the threshold table.
    pub fn metric(mut self, name: impl Into<String>, value: f64, unit: Option<&str>) -> Self {
        let name = name.into();
        let assessment = self.thresholds.assess(&name, value);
        if let Some(issue) = assessment.issue {
            self.risks.push(format!("data quality: {}", issue));
        }
        self.metrics.push(Metric {
            name,
            value,
            unit: unit.map(str::to_string),
            decision: assessment.decision,
        });
        self
    }

    /// Record a metric whose decision the module decided itself.
    pub fn metric_with_decision(
        mut self,
        name: impl Into<String>,
        value: f64,
        unit: Option<&str>,
        decision: Decision,
    ) -> Self {
        let name = name.into();
        let decision = if value.is_finite() {
            decision
        } else {
            let issue = DataQualityError::NonFinite {
                metric: name.clone(),
                value,
            };
            self.risks.push(format!("data quality: {}", issue));
            Decision::Kill
        };
        self.metrics.push(Metric {
            name,
            value,
            unit: unit.map(str::to_string),
            decision,
        });
        self
    }

    /// Record a metric the module could not obtain: KILL plus a risk.
    pub fn missing_metric(mut self, name: impl Into<String>, unit: Option<&str>) -> Self {
        let name = name.into();
        let issue = DataQualityError::Missing {
            metric: name.clone(),
        };
        self.risks.push(format!("data quality: {}", issue));
        self.metrics.push(Metric {
            name,
            value: f64::NAN,
            unit: unit.map(str::to_string),
            decision: Decision::Kill,
        });
        self
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn recommendation(mut self, text: impl Into<String>) -> Self {
        self.recommendations.push(text.into());
        self
    }

    pub fn risk(mut self, text: impl Into<String>) -> Self {
        self.risks.push(text.into());
        self
    }

    pub fn summary(mut self, text: impl Into<String>) -> Self {
        self.summary = Some(text.into());
        self
    }

    /// Override the worst-of fold.
    pub fn decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    /// Decision the result would carry if built now.
    pub fn current_decision(&self) -> Decision {
        self.decision
            .unwrap_or_else(|| Decision::worst_of(self.metrics.iter().map(|m| m.decision)))
    }

    pub fn build(self) -> ModuleResult {
        let decision = self.current_decision();
        let summary = self.summary.unwrap_or_else(|| {
            format!("{} metric(s) evaluated: {}", self.metrics.len(), decision)
        });
        ModuleResult {
            module_name: self.module_name,
            version: self.version,
            decision,
            metrics: self.metrics,
            summary,
            recommendations: self.recommendations,
            risks: self.risks,
            is_critical: false,
            outcome: self.outcome,
        }
    }
}
