//! Provider registry
//!
//! Maps provider names to concrete implementations.

pub mod flux;
pub mod google;
pub mod meshy;
pub mod mock;
pub mod removebg;

use crate::config::LoomConfig;
use crate::provider::GenerationProvider;
use loom_core::{LoomError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The providers available to an orchestrator, by name
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: BTreeMap<String, Arc<dyn GenerationProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled provider from config
    pub fn from_config(config: &LoomConfig) -> Result<Self> {
        let mut set = Self::new();
        for name in available_providers() {
            if config.is_enabled(name) {
                set.insert(create_provider(name, config)?);
            }
        }
        Ok(set)
    }

    pub fn register<P: GenerationProvider + 'static>(&mut self, provider: P) {
        self.insert(Arc::new(provider));
    }

    pub fn insert(&mut self, provider: Arc<dyn GenerationProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn GenerationProvider>> {
        self.providers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn GenerationProvider>> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Create a provider by name with configuration
pub fn create_provider(name: &str, config: &LoomConfig) -> Result<Arc<dyn GenerationProvider>> {
    match name {
        "mock" => Ok(Arc::new(mock::MockProvider::new())),
        "google" => Ok(Arc::new(google::GoogleProvider::from_config(config))),
        "flux" => Ok(Arc::new(flux::FluxProvider::from_config(config))),
        "meshy" => Ok(Arc::new(meshy::MeshyProvider::from_config(config))),
        "removebg" => Ok(Arc::new(removebg::RemoveBgProvider::from_config(config))),
        _ => Err(LoomError::UnknownProvider(format!(
            "{}. Available: {}",
            name,
            available_providers().join(", ")
        ))),
    }
}

/// List all available provider names
pub fn available_providers() -> Vec<&'static str> {
    vec!["google", "flux", "meshy", "removebg", "mock"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Capability;

    #[test]
    fn test_from_default_config_has_all_providers() {
        let set = ProviderSet::from_config(&LoomConfig::default()).unwrap();
        assert_eq!(set.len(), available_providers().len());
        assert!(set.get("google").unwrap().supports(Capability::TextGenerate));
        assert!(set.get("meshy").unwrap().supports(Capability::Generate3D));
        assert!(!set.get("meshy").unwrap().supports(Capability::ImageGenerate));
    }

    #[test]
    fn test_disabled_provider_skipped() {
        let mut config = LoomConfig::default();
        config.providers.entry("flux".to_string()).or_default().enabled = false;
        let set = ProviderSet::from_config(&config).unwrap();
        assert!(set.get("flux").is_none());
        assert!(set.get("google").is_some());
    }

    #[test]
    fn test_unknown_provider() {
        let err = create_provider("dalle", &LoomConfig::default()).err().unwrap();
        assert!(matches!(err, LoomError::UnknownProvider(_)));
    }

    #[test]
    fn test_every_capability_has_a_provider() {
        let set = ProviderSet::from_config(&LoomConfig::default()).unwrap();
        for capability in Capability::ALL {
            let hosted = set
                .iter()
                .filter(|p| p.name() != "mock")
                .any(|p| p.supports(capability));
            assert!(hosted, "no hosted provider for {}", capability);
        }
    }
}
