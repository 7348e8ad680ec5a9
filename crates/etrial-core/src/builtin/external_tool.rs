//! Scoring through an external executable.
//!
//! The candidate is written as JSON to the tool's stdin; the tool prints
//! `{"metrics": {"kd_nm": 12.5, ...}, "version": "2.0"}` on stdout. A non-zero
//! exit is a module failure. When the executable cannot be found and an
//! attribute fallback is configured, the metrics are read from the candidate
//! attribute bag instead and the result is marked as a fallback.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{Candidate, ModuleResult, Outcome};
use crate::module::{ModuleContext, ScoringModule};

use super::attributes::{record_attribute_metrics, recommend_for_failures};

/// What the tool prints on stdout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// `null` means the tool could not compute that metric.
    #[serde(default)]
    pub metrics: BTreeMap<String, Option<f64>>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExternalTool {
    name: String,
    version: String,
    command: Vec<String>,
    metrics: Vec<String>,
    units: BTreeMap<String, String>,
    attribute_fallback: bool,
}

impl ExternalTool {
    pub fn new(name: impl Into<String>, command: Vec<String>, metrics: Vec<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".to_string(),
            command,
            metrics,
            units: BTreeMap::new(),
            attribute_fallback: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_units(mut self, units: BTreeMap<String, String>) -> Self {
        self.units = units;
        self
    }

    /// Read metrics from candidate attributes when the executable is missing.
    pub fn with_attribute_fallback(mut self, enabled: bool) -> Self {
        self.attribute_fallback = enabled;
        self
    }

    async fn run_tool(&self, exe: &str, args: &[String], input: &[u8]) -> std::io::Result<std::process::Output> {
        let mut child = Command::new(exe)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Feed stdin while draining stdout and stderr, so a tool that writes
        // before reading cannot fill a pipe and block both sides.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // Tools that ignore their input may exit before reading it.
                match stdin.write_all(input).await {
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed?;
        output
    }
}

#[async_trait]
impl ScoringModule for ExternalTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn fingerprint(&self) -> serde_json::Value {
        json!({
            "kind": "external_tool",
            "command": self.command,
            "metrics": self.metrics,
            "units": self.units,
            "fallback": self.attribute_fallback,
        })
    }

    async fn validate(
        &self,
        candidate: &Candidate,
        ctx: &ModuleContext,
    ) -> anyhow::Result<ModuleResult> {
        let Some((exe, args)) = self.command.split_first() else {
            anyhow::bail!("module {} has an empty command", self.name);
        };
        let input = serde_json::to_vec(candidate)?;

        let output = match self.run_tool(exe, args, &input).await {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound && self.attribute_fallback => {
                warn!(module = %self.name, tool = %exe, "tool not found, using candidate attributes");
                let builder = record_attribute_metrics(
                    ctx.result_builder(self),
                    candidate,
                    &self.metrics,
                    &self.units,
                );
                let builder = recommend_for_failures(builder)
                    .outcome(Outcome::fallback(format!("{} not found; used candidate attributes", exe)))
                    .risk(format!("{} unavailable: metrics taken from upstream attributes", exe));
                return Ok(builder.build());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to run {}", exe));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} exited with {}: {}",
                exe,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let parsed: ToolOutput = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("{} produced invalid JSON output", exe))?;
        debug!(module = %self.name, reported = parsed.metrics.len(), "tool output parsed");

        let mut builder = ctx.result_builder(self);
        for metric in &self.metrics {
            let unit = self.units.get(metric).map(String::as_str);
            builder = match parsed.metrics.get(metric).copied().flatten() {
                Some(value) => builder.metric(metric.as_str(), value, unit),
                None => builder.missing_metric(metric.as_str(), unit),
            };
        }
        // Extra metrics the tool chose to report still go through the table.
        for (metric, value) in &parsed.metrics {
            if self.metrics.contains(metric) {
                continue;
            }
            if let Some(value) = value {
                builder = builder.metric(metric.as_str(), *value, self.units.get(metric).map(String::as_str));
            }
        }

        let tool = match &parsed.version {
            Some(v) => format!("{} {}", exe, v),
            None => exe.clone(),
        };
        Ok(recommend_for_failures(builder).outcome(Outcome::tool(tool)).build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decision, Modality};
    use crate::threshold::{ThresholdRule, ThresholdTable};

    fn ctx() -> ModuleContext {
        ModuleContext::new(
            ThresholdTable::new()
                .with_rule("kd_nm", ThresholdRule::ascending(50.0, 500.0))
                .expect("rule"),
        )
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn candidate() -> Candidate {
        Candidate::new("mAb-1", Modality::Antibody, "HER2").with_sequence("EVQLVESGG")
    }

    #[tokio::test]
    async fn test_tool_output_is_classified() {
        let module = ExternalTool::new(
            "binding",
            sh(r#"cat > /dev/null; echo '{"metrics":{"kd_nm":120.0,"tm_celsius":70.1},"version":"2.0"}'"#),
            vec!["kd_nm".to_string()],
        );
        let result = module.validate(&candidate(), &ctx()).await.expect("validate");
        assert_eq!(result.decision, Decision::Revise);
        assert_eq!(result.metrics.len(), 2);
        assert_eq!(result.outcome, Outcome::tool("sh 2.0"));
    }

    #[tokio::test]
    async fn test_tool_receives_candidate_on_stdin() {
        let module = ExternalTool::new(
            "echo",
            sh(r#"grep -q '"name":"mAb-1"' && echo '{"metrics":{"kd_nm":10}}'"#),
            vec!["kd_nm".to_string()],
        );
        let result = module.validate(&candidate(), &ctx()).await.expect("validate");
        assert_eq!(result.decision, Decision::Pass);
    }

    #[tokio::test]
    async fn test_verbose_tool_does_not_block_on_large_input() {
        let module = ExternalTool::new(
            "binding",
            sh(r#"head -c 131072 /dev/zero >&2; cat > /dev/null; echo '{"metrics":{"kd_nm":10}}'"#),
            vec!["kd_nm".to_string()],
        );
        let candidate = Candidate::new("mAb-1", Modality::Antibody, "HER2")
            .with_sequence("A".repeat(256 * 1024));

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            module.validate(&candidate, &ctx()),
        )
        .await
        .expect("tool finished in time")
        .expect("validate");
        assert_eq!(result.decision, Decision::Pass);
    }

    #[tokio::test]
    async fn test_null_metric_is_missing() {
        let module = ExternalTool::new(
            "binding",
            sh(r#"cat > /dev/null; echo '{"metrics":{"kd_nm":null}}'"#),
            vec!["kd_nm".to_string()],
        );
        let result = module.validate(&candidate(), &ctx()).await.expect("validate");
        assert_eq!(result.decision, Decision::Kill);
        assert!(result.risks.iter().any(|r| r.contains("data quality")));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let module = ExternalTool::new(
            "binding",
            sh("cat > /dev/null; echo boom >&2; exit 4"),
            vec!["kd_nm".to_string()],
        );
        let err = module.validate(&candidate(), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_invalid_output_is_an_error() {
        let module = ExternalTool::new(
            "binding",
            sh("cat > /dev/null; echo not-json"),
            vec!["kd_nm".to_string()],
        );
        assert!(module.validate(&candidate(), &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_executable_uses_fallback() {
        let command = vec!["/nonexistent/etrial-binding-tool".to_string()];
        let candidate = candidate().with_attribute("kd_nm", json!(30));

        let strict = ExternalTool::new("binding", command.clone(), vec!["kd_nm".to_string()]);
        assert!(strict.validate(&candidate, &ctx()).await.is_err());

        let lenient = ExternalTool::new("binding", command, vec!["kd_nm".to_string()])
            .with_attribute_fallback(true);
        let result = lenient.validate(&candidate, &ctx()).await.expect("fallback");
        assert_eq!(result.decision, Decision::Pass);
        assert!(result.outcome.is_fallback());
        assert_eq!(result.risks.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_command_is_an_error() {
        let module = ExternalTool::new("binding", Vec::new(), vec!["kd_nm".to_string()]);
        assert!(module.validate(&candidate(), &ctx()).await.is_err());
    }
}
