//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables: `LOOM_{PROVIDER}_API_KEY`
//! 2. Project-local: `.loom/config.toml`
//! 3. Global: `~/.loom/config.toml`

use crate::provider::Credentials;
use crate::providers::available_providers;
use loom_core::{LoomError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            enabled: true,
            default_model: None,
            timeout_secs: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Generation defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_supersede_wait_ms")]
    pub supersede_wait_ms: u64,
    #[serde(default = "default_temp_capacity")]
    pub temp_capacity: usize,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            temp_dir: None,
            history_limit: default_history_limit(),
            supersede_wait_ms: default_supersede_wait_ms(),
            temp_capacity: default_temp_capacity(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    /// Scratch directory, defaulting to `<os temp>/loom`
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("loom"))
    }

    pub fn supersede_wait(&self) -> Duration {
        Duration::from_millis(self.supersede_wait_ms)
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".loom/results")
}
fn default_history_limit() -> usize {
    50
}
fn default_supersede_wait_ms() -> u64 {
    3000
}
fn default_temp_capacity() -> usize {
    256
}
fn default_timeout_secs() -> u64 {
    120
}

/// Logging settings; `LOOM_LOG` and `LOOM_LOG_FORMAT` take precedence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Per-module level overrides, e.g. `loom_gen::http = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

/// Top-level config file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoomConfigFile {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resolved configuration with environment variable overrides applied
#[derive(Debug, Clone, Default)]
pub struct LoomConfig {
    pub providers: HashMap<String, ProviderConfig>,
    pub generation: GenerationConfig,
    pub logging: LoggingConfig,
}

impl LoomConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let mut config = LoomConfigFile::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                let global = Self::load_file(&global_path)?;
                Self::merge_into(&mut config, global);
            }
        }

        let local_path = PathBuf::from(".loom/config.toml");
        if local_path.exists() {
            let local = Self::load_file(&local_path)?;
            Self::merge_into(&mut config, local);
        }

        Self::apply_env_overrides(&mut config);
        Ok(config.into())
    }

    /// Load config from a specific file path only (plus env overrides)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config.into())
    }

    /// Get API key for a provider
    pub fn api_key(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_key.as_deref())
    }

    /// Get the API URL override for a provider
    pub fn api_url(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_url.as_deref())
    }

    /// Check if a provider is enabled
    pub fn is_enabled(&self, provider_name: &str) -> bool {
        self.providers
            .get(provider_name)
            .map(|p| p.enabled)
            .unwrap_or(true)
    }

    /// Configured model override for a provider
    pub fn default_model(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.default_model.as_deref())
    }

    /// Per-call timeout for a provider
    pub fn timeout(&self, provider_name: &str) -> Duration {
        let secs = self
            .providers
            .get(provider_name)
            .and_then(|p| p.timeout_secs)
            .unwrap_or(self.generation.default_timeout_secs);
        Duration::from_secs(secs)
    }

    /// All configured API keys
    pub fn credentials(&self) -> Credentials {
        let mut creds = Credentials::new();
        for (name, provider) in &self.providers {
            if let Some(key) = &provider.api_key {
                creds.insert(name, key);
            }
        }
        creds
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".loom").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<LoomConfigFile> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            LoomError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    fn merge_into(base: &mut LoomConfigFile, overlay: LoomConfigFile) {
        for (name, provider) in overlay.providers {
            let entry = base.providers.entry(name).or_default();
            if provider.api_key.is_some() {
                entry.api_key = provider.api_key;
            }
            if provider.api_url.is_some() {
                entry.api_url = provider.api_url;
            }
            if provider.default_model.is_some() {
                entry.default_model = provider.default_model;
            }
            if provider.timeout_secs.is_some() {
                entry.timeout_secs = provider.timeout_secs;
            }
            entry.enabled = provider.enabled;
        }

        let defaults = GenerationConfig::default();
        let gen = overlay.generation;
        if gen.output_dir != defaults.output_dir {
            base.generation.output_dir = gen.output_dir;
        }
        if gen.temp_dir.is_some() {
            base.generation.temp_dir = gen.temp_dir;
        }
        if gen.history_limit != defaults.history_limit {
            base.generation.history_limit = gen.history_limit;
        }
        if gen.supersede_wait_ms != defaults.supersede_wait_ms {
            base.generation.supersede_wait_ms = gen.supersede_wait_ms;
        }
        if gen.temp_capacity != defaults.temp_capacity {
            base.generation.temp_capacity = gen.temp_capacity;
        }
        if gen.default_timeout_secs != defaults.default_timeout_secs {
            base.generation.default_timeout_secs = gen.default_timeout_secs;
        }

        let log = overlay.logging;
        if log.level.is_some() {
            base.logging.level = log.level;
        }
        if log.format.is_some() {
            base.logging.format = log.format;
        }
        if log.file.is_some() {
            base.logging.file = log.file;
        }
        base.logging.modules.extend(log.modules);
    }

    fn apply_env_overrides(config: &mut LoomConfigFile) {
        for name in available_providers() {
            let env_key = format!("LOOM_{}_API_KEY", name.to_uppercase());
            if let Ok(key) = std::env::var(&env_key) {
                let entry = config.providers.entry(name.to_string()).or_default();
                entry.api_key = Some(key);
            }
        }
    }
}

impl From<LoomConfigFile> for LoomConfig {
    fn from(file: LoomConfigFile) -> Self {
        Self {
            providers: file.providers,
            generation: file.generation,
            logging: file.logging,
        }
    }
}
