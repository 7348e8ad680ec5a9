//! Metrics precomputed upstream and carried in the candidate attribute bag.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

use crate::domain::{Candidate, Decision, ModuleResult, ModuleResultBuilder, Outcome};
use crate::module::{ModuleContext, ScoringModule};

pub const ATTRIBUTES_TOOL: &str = "candidate-attributes";

/// Reads numeric attributes (e.g. a measured `kd_nm`) and classifies them.
#[derive(Debug, Clone)]
pub struct AttributeMetrics {
    name: String,
    version: String,
    metrics: Vec<String>,
    informative: Vec<String>,
    units: BTreeMap<String, String>,
}

impl AttributeMetrics {
    pub fn new(name: impl Into<String>, metrics: Vec<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".to_string(),
            metrics,
            informative: Vec::new(),
            units: BTreeMap::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Attributes reported for context only, never gating.
    pub fn with_informative(mut self, informative: Vec<String>) -> Self {
        self.informative = informative;
        self
    }

    pub fn with_units(mut self, units: BTreeMap<String, String>) -> Self {
        self.units = units;
        self
    }
}

/// Classify `metrics` from the attribute bag; missing ones are KILL with a
/// data-quality risk.
pub(crate) fn record_attribute_metrics<'a>(
    mut builder: ModuleResultBuilder<'a>,
    candidate: &Candidate,
    metrics: &[String],
    units: &BTreeMap<String, String>,
) -> ModuleResultBuilder<'a> {
    for metric in metrics {
        let unit = units.get(metric).map(String::as_str);
        builder = match candidate.numeric_attribute(metric) {
            Some(value) => builder.metric(metric.as_str(), value, unit),
            None => builder.missing_metric(metric.as_str(), unit),
        };
    }
    builder
}

/// One recommendation per metric that did not pass.
pub(crate) fn recommend_for_failures(builder: ModuleResultBuilder<'_>) -> ModuleResultBuilder<'_> {
    let notes: Vec<String> = builder
        .metrics()
        .iter()
        .filter(|m| matches!(m.decision, Decision::Revise | Decision::Kill))
        .map(|m| {
            format!(
                "{} = {}{} is {}; review before progressing",
                m.name,
                m.value,
                m.unit.as_deref().map(|u| format!(" {}", u)).unwrap_or_default(),
                m.decision
            )
        })
        .collect();
    notes
        .into_iter()
        .fold(builder, |b, note| b.recommendation(note))
}

#[async_trait]
impl ScoringModule for AttributeMetrics {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn fingerprint(&self) -> serde_json::Value {
        json!({
            "kind": "attributes",
            "metrics": self.metrics,
            "informative": self.informative,
            "units": self.units,
        })
    }

    async fn validate(
        &self,
        candidate: &Candidate,
        ctx: &ModuleContext,
    ) -> anyhow::Result<ModuleResult> {
        let mut builder = record_attribute_metrics(
            ctx.result_builder(self),
            candidate,
            &self.metrics,
            &self.units,
        );
        for key in &self.informative {
            if let Some(value) = candidate.numeric_attribute(key) {
                let unit = self.units.get(key).map(String::as_str);
                builder = builder.metric_with_decision(key.as_str(), value, unit, Decision::Informative);
            }
        }
        let builder = recommend_for_failures(builder).outcome(Outcome::tool(ATTRIBUTES_TOOL));
        let decision = builder.current_decision();
        Ok(builder
            .summary(format!(
                "{} attribute metric(s) for {}: {}",
                self.metrics.len(),
                candidate.name,
                decision
            ))
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Modality;
    use crate::threshold::{ThresholdRule, ThresholdTable};

    fn ctx() -> ModuleContext {
        ModuleContext::new(
            ThresholdTable::new()
                .with_rule("kd_nm", ThresholdRule::ascending(50.0, 500.0))
                .expect("rule"),
        )
    }

    fn module() -> AttributeMetrics {
        AttributeMetrics::new("binding", vec!["kd_nm".to_string()])
            .with_informative(vec!["tm_celsius".to_string()])
            .with_units(BTreeMap::from([("kd_nm".to_string(), "nM".to_string())]))
    }

    #[tokio::test]
    async fn test_kd_pass_and_kill() {
        let ctx = ctx();
        let good = Candidate::new("good", Modality::Antibody, "HER2")
            .with_attribute("kd_nm", json!(15))
            .with_attribute("tm_celsius", json!(68.5));
        let result = module().validate(&good, &ctx).await.expect("validate");
        assert_eq!(result.decision, Decision::Pass);
        assert_eq!(result.metrics.len(), 2);
        assert_eq!(result.outcome, Outcome::tool(ATTRIBUTES_TOOL));
        assert!(result.recommendations.is_empty());

        let weak = good.clone().with_attribute("kd_nm", json!(600));
        let result = module().validate(&weak, &ctx).await.expect("validate");
        assert_eq!(result.decision, Decision::Kill);
        assert_eq!(result.recommendations.len(), 1);
        assert!(result.recommendations[0].contains("600 nM"));
    }

    #[tokio::test]
    async fn test_missing_attribute_is_kill_with_risk() {
        let ctx = ctx();
        let candidate = Candidate::new("bare", Modality::Antibody, "HER2");
        let result = module().validate(&candidate, &ctx).await.expect("validate");
        assert_eq!(result.decision, Decision::Kill);
        assert!(result.risks.iter().any(|r| r.contains("missing")));
    }

    #[test]
    fn test_fingerprint_lists_metrics() {
        let fp = module().fingerprint();
        assert_eq!(fp["metrics"], json!(["kd_nm"]));
        assert_eq!(fp["kind"], "attributes");
    }
}
