//! Ordered module registry.
//!
//! Registration order is execution order. Each registration carries the
//! modalities the module applies to, its criticality and its time budget.
//! The registry is read-only once handed to a [`crate::Scheduler`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use etrial_core::{ConfigurationError, Modality, ScoringModule};

/// A module plus the scheduling facts the registry keeps about it.
#[derive(Clone)]
pub struct Registration {
    module: Arc<dyn ScoringModule>,
    modalities: Vec<Modality>,
    critical: bool,
    timeout: Option<Duration>,
}

impl Registration {
    /// Applies to every modality; criticality defaults to the module's own.
    pub fn new(module: Arc<dyn ScoringModule>) -> Self {
        let critical = module.is_critical();
        Self {
            module,
            modalities: Vec::new(),
            critical,
            timeout: None,
        }
    }

    /// Restrict to these modalities; empty means all.
    pub fn modalities(mut self, modalities: impl IntoIterator<Item = Modality>) -> Self {
        self.modalities = modalities.into_iter().collect();
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn version(&self) -> &str {
        self.module.version()
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn applicable_modalities(&self) -> &[Modality] {
        &self.modalities
    }

    pub fn applies_to(&self, modality: Modality) -> bool {
        self.modalities.is_empty() || self.modalities.contains(&modality)
    }

    pub fn module(&self) -> &Arc<dyn ScoringModule> {
        &self.module
    }

    /// Everything about this registration that can change a result.
    pub(crate) fn fingerprint(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "version": self.version(),
            "critical": self.critical,
            "modalities": self.modalities,
            "timeout_ms": self.timeout.map(|t| t.as_millis() as u64),
            "settings": self.module.fingerprint(),
        })
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("modalities", &self.modalities)
            .field("critical", &self.critical)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    entries: Vec<Registration>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module for the given modalities (empty means all).
    pub fn register(
        &mut self,
        module: Arc<dyn ScoringModule>,
        modalities: impl IntoIterator<Item = Modality>,
    ) -> Result<(), ConfigurationError> {
        self.add(Registration::new(module).modalities(modalities))
    }

    /// Append a fully specified registration. Names must be unique.
    pub fn add(&mut self, registration: Registration) -> Result<(), ConfigurationError> {
        if self.get(registration.name()).is_some() {
            return Err(ConfigurationError::DuplicateModule(
                registration.name().to_string(),
            ));
        }
        self.entries.push(registration);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.entries.iter().find(|r| r.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(Registration::name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registrations to run, in registration order.
    ///
    /// `None` selects everything. Unknown names are a configuration error;
    /// the order and repetition of names in `selection` do not matter.
    pub fn select(&self, selection: Option<&[String]>) -> Result<Vec<&Registration>, ConfigurationError> {
        let Some(names) = selection else {
            return Ok(self.entries.iter().collect());
        };
        let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        if let Some(unknown) = wanted.iter().find(|name| self.get(name).is_none()) {
            return Err(ConfigurationError::UnknownModule(unknown.to_string()));
        }
        Ok(self
            .entries
            .iter()
            .filter(|r| wanted.contains(r.name()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use etrial_core::{Candidate, ModuleContext, ModuleResult};

    struct Named(&'static str, bool);

    #[async_trait]
    impl ScoringModule for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn is_critical(&self) -> bool {
            self.1
        }

        async fn validate(
            &self,
            _candidate: &Candidate,
            ctx: &ModuleContext,
        ) -> anyhow::Result<ModuleResult> {
            Ok(ctx.result_builder(self).build())
        }
    }

    fn registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry
            .register(Arc::new(Named("structure", true)), [])
            .expect("structure");
        registry
            .register(Arc::new(Named("binding", false)), [Modality::Antibody])
            .expect("binding");
        registry
            .add(Registration::new(Arc::new(Named("tox", false))).critical(true))
            .expect("tox");
        registry
    }

    #[test]
    fn test_registration_order_and_flags() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["structure", "binding", "tox"]);
        assert!(registry.get("structure").expect("structure").is_critical());
        assert!(registry.get("tox").expect("tox").is_critical());

        let binding = registry.get("binding").expect("binding");
        assert!(binding.applies_to(Modality::Antibody));
        assert!(!binding.applies_to(Modality::SmallMolecule));
        assert!(registry.get("structure").expect("s").applies_to(Modality::SmallMolecule));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut registry = registry();
        let err = registry
            .register(Arc::new(Named("binding", false)), [])
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateModule(name) if name == "binding"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_selection_keeps_registration_order() {
        let registry = registry();
        let selection = vec!["tox".to_string(), "structure".to_string()];
        let selected = registry.select(Some(&selection)).expect("select");
        let names: Vec<&str> = selected.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["structure", "tox"]);

        assert_eq!(registry.select(None).expect("all").len(), 3);

        let unknown = vec!["ghost".to_string()];
        assert!(matches!(
            registry.select(Some(&unknown)),
            Err(ConfigurationError::UnknownModule(name)) if name == "ghost"
        ));
    }
}
