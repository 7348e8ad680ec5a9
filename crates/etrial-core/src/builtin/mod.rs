//! Generic modules that can be constructed from configuration alone.

pub mod attributes;
pub mod composition;
pub mod external_tool;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ModuleEntry;
use crate::domain::ConfigurationError;
use crate::module::ScoringModule;

pub use attributes::{AttributeMetrics, ATTRIBUTES_TOOL};
pub use composition::SequenceComposition;
pub use external_tool::{ExternalTool, ToolOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinKind {
    Attributes,
    Composition,
    ExternalTool,
}

impl BuiltinKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinKind::Attributes => "attributes",
            BuiltinKind::Composition => "composition",
            BuiltinKind::ExternalTool => "external_tool",
        }
    }
}

/// Where an external tool's metrics come from when the executable is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    Attributes,
}

/// Instantiate the module a configuration entry describes.
pub fn build(entry: &ModuleEntry) -> Result<Arc<dyn ScoringModule>, ConfigurationError> {
    let option_error = |option: &str, reason: &str| ConfigurationError::InvalidOption {
        option: format!("modules.{}.{}", entry.name, option),
        reason: reason.to_string(),
    };

    let module: Arc<dyn ScoringModule> = match entry.kind {
        BuiltinKind::Attributes => {
            if entry.metrics.is_empty() && entry.informative.is_empty() {
                return Err(option_error("metrics", "attributes module lists no metrics"));
            }
            let mut module = AttributeMetrics::new(entry.name.clone(), entry.metrics.clone())
                .with_informative(entry.informative.clone())
                .with_units(entry.units.clone());
            if let Some(version) = &entry.version {
                module = module.with_version(version.clone());
            }
            Arc::new(module)
        }
        BuiltinKind::Composition => {
            let mut module = match &entry.motif {
                Some(pattern) => SequenceComposition::with_motif(entry.name.clone(), pattern)?,
                None => SequenceComposition::new(entry.name.clone())?,
            };
            if let Some(version) = &entry.version {
                module = module.with_version(version.clone());
            }
            Arc::new(module)
        }
        BuiltinKind::ExternalTool => {
            if entry.command.is_empty() {
                return Err(option_error("command", "external_tool requires a command"));
            }
            if entry.metrics.is_empty() {
                return Err(option_error("metrics", "external_tool lists no metrics"));
            }
            let mut module =
                ExternalTool::new(entry.name.clone(), entry.command.clone(), entry.metrics.clone())
                    .with_units(entry.units.clone())
                    .with_attribute_fallback(entry.fallback == Some(Fallback::Attributes));
            if let Some(version) = &entry.version {
                module = module.with_version(version.clone());
            }
            Arc::new(module)
        }
    };
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: BuiltinKind) -> ModuleEntry {
        ModuleEntry::new("m", kind)
    }

    #[test]
    fn test_build_each_kind() {
        let mut attrs = entry(BuiltinKind::Attributes);
        attrs.metrics = vec!["kd_nm".to_string()];
        attrs.version = Some("3.0.0".to_string());
        let module = build(&attrs).expect("attributes");
        assert_eq!(module.name(), "m");
        assert_eq!(module.version(), "3.0.0");

        let module = build(&entry(BuiltinKind::Composition)).expect("composition");
        assert_eq!(module.fingerprint()["kind"], "composition");

        let mut tool = entry(BuiltinKind::ExternalTool);
        tool.command = vec!["true".to_string()];
        tool.metrics = vec!["kd_nm".to_string()];
        tool.fallback = Some(Fallback::Attributes);
        let module = build(&tool).expect("external tool");
        assert_eq!(module.fingerprint()["fallback"], true);
    }

    #[test]
    fn test_build_rejects_incomplete_entries() {
        assert!(matches!(
            build(&entry(BuiltinKind::Attributes)),
            Err(ConfigurationError::InvalidOption { .. })
        ));
        assert!(build(&entry(BuiltinKind::ExternalTool)).is_err());

        let mut bad_motif = entry(BuiltinKind::Composition);
        bad_motif.motif = Some("N[".to_string());
        assert!(build(&bad_motif).is_err());
    }

    #[test]
    fn test_kind_names() {
        let kind: BuiltinKind = serde_json::from_str("\"external_tool\"").expect("kind");
        assert_eq!(kind, BuiltinKind::ExternalTool);
        assert_eq!(kind.as_str(), "external_tool");
    }
}
