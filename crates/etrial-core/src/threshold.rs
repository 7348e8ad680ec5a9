//! Threshold rules: mapping a numeric metric onto PASS / REVISE / KILL.
//!
//! A [`ThresholdRule`] holds up to three half-open bands, one per decision.
//! Together the bands must partition the real line: no overlap, no gap. That
//! is checked once when a rule enters a [`ThresholdTable`], which makes
//! [`ThresholdTable::evaluate`] total for every finite value.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::domain::decision::Decision;
use crate::domain::error::{ConfigurationError, DataQualityError};

/// Half-open interval `[lower, upper)`. A missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

impl Interval {
    pub fn new(lower: Option<f64>, upper: Option<f64>) -> Self {
        Self { lower, upper }
    }

    /// `(-inf, upper)`
    pub fn below(upper: f64) -> Self {
        Self::new(None, Some(upper))
    }

    /// `[lower, +inf)`
    pub fn at_least(lower: f64) -> Self {
        Self::new(Some(lower), None)
    }

    /// `[lower, upper)`
    pub fn between(lower: f64, upper: f64) -> Self {
        Self::new(Some(lower), Some(upper))
    }

    /// `(-inf, +inf)`
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower.map_or(true, |l| value >= l) && self.upper.map_or(true, |u| value < u)
    }

    fn lower_key(&self) -> f64 {
        self.lower.unwrap_or(f64::NEG_INFINITY)
    }

    fn is_well_formed(&self) -> bool {
        let finite = |b: Option<f64>| b.map_or(true, f64::is_finite);
        if !finite(self.lower) || !finite(self.upper) {
            return false;
        }
        match (self.lower, self.upper) {
            (Some(l), Some(u)) => l < u,
            _ => true,
        }
    }
}

fn fmt_bound(bound: Option<f64>, unbounded: &str) -> String {
    bound.map_or_else(|| unbounded.to_string(), |b| b.to_string())
}

/// PASS / REVISE / KILL bands for one metric.
///
/// A band may be omitted (e.g. a metric with no REVISE zone), but the bands
/// that are present must still cover the whole real line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<Interval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revise: Option<Interval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill: Option<Interval>,
}

impl ThresholdRule {
    pub fn new(pass: Option<Interval>, revise: Option<Interval>, kill: Option<Interval>) -> Self {
        Self { pass, revise, kill }
    }

    /// Lower values are better: PASS below `revise_at`, KILL from `kill_at`.
    pub fn ascending(revise_at: f64, kill_at: f64) -> Self {
        Self::new(
            Some(Interval::below(revise_at)),
            Some(Interval::between(revise_at, kill_at)),
            Some(Interval::at_least(kill_at)),
        )
    }

    /// Higher values are better: KILL below `revise_at`, PASS from `pass_at`.
    pub fn descending(revise_at: f64, pass_at: f64) -> Self {
        Self::new(
            Some(Interval::at_least(pass_at)),
            Some(Interval::between(revise_at, pass_at)),
            Some(Interval::below(revise_at)),
        )
    }

    /// Present bands in PASS, REVISE, KILL test order.
    fn bands(&self) -> Vec<(Decision, Interval)> {
        [
            (Decision::Pass, self.pass),
            (Decision::Revise, self.revise),
            (Decision::Kill, self.kill),
        ]
        .into_iter()
        .filter_map(|(d, band)| band.map(|b| (d, b)))
        .collect()
    }

    /// Check that the bands partition the real line.
    pub fn validate(&self, metric: &str) -> Result<(), ConfigurationError> {
        let mut bands = self.bands();
        if bands.is_empty() {
            return Err(ConfigurationError::EmptyRule {
                metric: metric.to_string(),
            });
        }

        for (decision, band) in &bands {
            if !band.is_well_formed() {
                return Err(ConfigurationError::InvalidBand {
                    metric: metric.to_string(),
                    band: decision.to_string(),
                    lower: fmt_bound(band.lower, "-inf"),
                    upper: fmt_bound(band.upper, "+inf"),
                });
            }
        }

        bands.sort_by(|(_, a), (_, b)| {
            a.lower_key()
                .partial_cmp(&b.lower_key())
                .unwrap_or(Ordering::Equal)
        });

        for pair in bands.windows(2) {
            let (first, a) = pair[0];
            let (second, b) = pair[1];
            let overlap = || ConfigurationError::OverlappingBands {
                metric: metric.to_string(),
                first: first.to_string(),
                second: second.to_string(),
            };
            let Some(a_upper) = a.upper else {
                return Err(overlap());
            };
            let b_lower = b.lower_key();
            if b_lower < a_upper {
                return Err(overlap());
            }
            if b_lower > a_upper {
                return Err(ConfigurationError::GapInBands {
                    metric: metric.to_string(),
                    region: format!("[{}, {})", a_upper, b_lower),
                });
            }
        }

        if let Some((_, first)) = bands.first() {
            if let Some(lower) = first.lower {
                return Err(ConfigurationError::GapInBands {
                    metric: metric.to_string(),
                    region: format!("below {}", lower),
                });
            }
        }
        if let Some((_, last)) = bands.last() {
            if let Some(upper) = last.upper {
                return Err(ConfigurationError::GapInBands {
                    metric: metric.to_string(),
                    region: format!("at or above {}", upper),
                });
            }
        }
        Ok(())
    }

    /// Classify a finite value. PASS is tested first, then REVISE, then KILL.
    fn classify(&self, value: f64) -> Decision {
        self.bands()
            .into_iter()
            .find(|(_, band)| band.contains(value))
            .map(|(decision, _)| decision)
            // unreachable for validated rules; never fall through to PASS
            .unwrap_or(Decision::Kill)
    }
}

/// Decision for one metric value plus any data-quality finding.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub decision: Decision,
    pub issue: Option<DataQualityError>,
}

/// Validated per-metric threshold rules, read-only once a pipeline is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ThresholdTable {
    rules: BTreeMap<String, ThresholdRule>,
}

impl ThresholdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table, rejecting the first malformed rule.
    pub fn from_rules<I, K>(rules: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (K, ThresholdRule)>,
        K: Into<String>,
    {
        let mut table = Self::new();
        for (metric, rule) in rules {
            table.insert(metric, rule)?;
        }
        Ok(table)
    }

    /// Add or replace the rule for a metric after validating it.
    pub fn insert(
        &mut self,
        metric: impl Into<String>,
        rule: ThresholdRule,
    ) -> Result<(), ConfigurationError> {
        let metric = metric.into();
        rule.validate(&metric)?;
        self.rules.insert(metric, rule);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_rule(
        mut self,
        metric: impl Into<String>,
        rule: ThresholdRule,
    ) -> Result<Self, ConfigurationError> {
        self.insert(metric, rule)?;
        Ok(self)
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.rules.contains_key(metric)
    }

    pub fn rule(&self, metric: &str) -> Option<&ThresholdRule> {
        self.rules.get(metric)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Decision for `value` of `metric`.
    ///
    /// Non-finite values are always KILL. Metrics without a rule are
    /// INFORMATIVE.
    pub fn evaluate(&self, metric: &str, value: f64) -> Decision {
        self.assess(metric, value).decision
    }

    /// Like [`evaluate`](Self::evaluate) but also reports data-quality issues
    /// so the caller can record them as risks.
    pub fn assess(&self, metric: &str, value: f64) -> Assessment {
        if !value.is_finite() {
            return Assessment {
                decision: Decision::Kill,
                issue: Some(DataQualityError::NonFinite {
                    metric: metric.to_string(),
                    value,
                }),
            };
        }
        let decision = self
            .rules
            .get(metric)
            .map_or(Decision::Informative, |rule| rule.classify(value));
        Assessment {
            decision,
            issue: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kd_rule() -> ThresholdRule {
        ThresholdRule::new(
            Some(Interval::below(50.0)),
            Some(Interval::between(50.0, 500.0)),
            Some(Interval::at_least(500.0)),
        )
    }

    fn kd_table() -> ThresholdTable {
        ThresholdTable::new()
            .with_rule("kd_nm", kd_rule())
            .expect("valid rule")
    }

    #[test]
    fn test_kd_example() {
        let table = kd_table();
        assert_eq!(table.evaluate("kd_nm", 15.0), Decision::Pass);
        assert_eq!(table.evaluate("kd_nm", 600.0), Decision::Kill);
        assert_eq!(table.evaluate("kd_nm", 120.0), Decision::Revise);
    }

    #[test]
    fn test_bounds_are_inclusive_lower_exclusive_upper() {
        let table = kd_table();
        assert_eq!(table.evaluate("kd_nm", 49.999), Decision::Pass);
        assert_eq!(table.evaluate("kd_nm", 50.0), Decision::Revise);
        assert_eq!(table.evaluate("kd_nm", 500.0), Decision::Kill);
    }

    #[test]
    fn test_unknown_metric_is_informative() {
        assert_eq!(kd_table().evaluate("tm_celsius", 70.0), Decision::Informative);
    }

    #[test]
    fn test_nan_is_kill_with_issue() {
        let assessment = kd_table().assess("kd_nm", f64::NAN);
        assert_eq!(assessment.decision, Decision::Kill);
        assert!(matches!(
            assessment.issue,
            Some(DataQualityError::NonFinite { .. })
        ));
        // even without a rule
        assert_eq!(kd_table().evaluate("other", f64::INFINITY), Decision::Kill);
    }

    #[test]
    fn test_overlap_rejected() {
        let rule = ThresholdRule::new(
            Some(Interval::between(0.0, 50.0)),
            Some(Interval::between(40.0, 500.0)),
            None,
        );
        let err = rule.validate("kd_nm").expect_err("overlap must be rejected");
        assert!(matches!(err, ConfigurationError::OverlappingBands { .. }));
    }

    #[test]
    fn test_two_unbounded_bands_overlap() {
        let rule = ThresholdRule::new(Some(Interval::below(10.0)), None, Some(Interval::below(20.0)));
        assert!(matches!(
            rule.validate("x"),
            Err(ConfigurationError::OverlappingBands { .. })
        ));
    }

    #[test]
    fn test_gap_rejected() {
        let rule = ThresholdRule::new(
            Some(Interval::below(50.0)),
            Some(Interval::between(60.0, 500.0)),
            Some(Interval::at_least(500.0)),
        );
        assert!(matches!(
            rule.validate("kd_nm"),
            Err(ConfigurationError::GapInBands { .. })
        ));
    }

    #[test]
    fn test_uncovered_tails_rejected() {
        let low = ThresholdRule::new(Some(Interval::between(0.0, 1.0)), None, Some(Interval::at_least(1.0)));
        assert!(matches!(low.validate("x"), Err(ConfigurationError::GapInBands { .. })));

        let high = ThresholdRule::new(Some(Interval::below(1.0)), None, Some(Interval::between(1.0, 2.0)));
        assert!(matches!(high.validate("x"), Err(ConfigurationError::GapInBands { .. })));
    }

    #[test]
    fn test_inverted_and_empty_rules_rejected() {
        let inverted = ThresholdRule::new(Some(Interval::between(5.0, 5.0)), None, None);
        assert!(matches!(
            inverted.validate("x"),
            Err(ConfigurationError::InvalidBand { .. })
        ));
        assert!(matches!(
            ThresholdRule::default().validate("x"),
            Err(ConfigurationError::EmptyRule { .. })
        ));
    }

    #[test]
    fn test_two_band_rule_is_valid() {
        let rule = ThresholdRule::new(Some(Interval::at_least(0.7)), None, Some(Interval::below(0.7)));
        rule.validate("entropy").expect("two bands can partition");
        let table = ThresholdTable::from_rules([("entropy", rule)]).expect("table");
        assert_eq!(table.evaluate("entropy", 0.9), Decision::Pass);
        assert_eq!(table.evaluate("entropy", 0.2), Decision::Kill);
    }

    #[test]
    fn test_helpers_build_valid_partitions() {
        ThresholdRule::ascending(50.0, 500.0)
            .validate("kd_nm")
            .expect("ascending");
        let desc = ThresholdRule::descending(0.5, 0.7);
        desc.validate("entropy").expect("descending");
        let table = ThresholdTable::from_rules([("entropy", desc)]).expect("table");
        assert_eq!(table.evaluate("entropy", 0.6), Decision::Revise);
    }

    #[test]
    fn test_evaluation_total_over_sampled_values() {
        let table = kd_table();
        let mut value = -1.0e6;
        while value < 1.0e6 {
            let d = table.evaluate("kd_nm", value);
            assert!(matches!(d, Decision::Pass | Decision::Revise | Decision::Kill));
            value += 997.3;
        }
    }
}
