//! Generation provider trait and the uniform client in front of it

use crate::cancel::CancelProbe;
use crate::providers::ProviderSet;
use crate::schema::{GenParams, ParamSchema};
use crate::temp::TempArtifacts;
use loom_core::{JobId, ProviderError, ProviderErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Category of remote operation a node can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ImageGenerate,
    ImageEdit,
    TextGenerate,
    #[serde(rename = "generate_3d")]
    Generate3D,
    RemoveBackground,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::ImageGenerate,
        Capability::ImageEdit,
        Capability::TextGenerate,
        Capability::Generate3D,
        Capability::RemoveBackground,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::ImageGenerate => "image-generate",
            Capability::ImageEdit => "image-edit",
            Capability::TextGenerate => "text-generate",
            Capability::Generate3D => "generate-3d",
            Capability::RemoveBackground => "remove-background",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|c| c.as_str() == normalized)
    }

    /// File extension of the artifact this capability produces
    pub fn extension(self) -> &'static str {
        match self {
            Capability::ImageGenerate | Capability::ImageEdit | Capability::RemoveBackground => {
                "png"
            }
            Capability::TextGenerate => "txt",
            Capability::Generate3D => "glb",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider API keys, keyed by provider name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    keys: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: &str, key: &str) -> Self {
        self.insert(provider, key);
        self
    }

    pub fn insert(&mut self, provider: &str, key: &str) {
        self.keys.insert(provider.to_string(), key.to_string());
    }

    /// The configured key for `provider`; blank keys count as missing
    pub fn get(&self, provider: &str) -> Option<&str> {
        self.keys
            .get(provider)
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
    }
}

/// Status returned by a provider health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Available,
    Disabled,
    NoApiKey,
}

/// Everything a provider needs for one call
pub struct ProviderCall<'a> {
    pub job_id: &'a JobId,
    pub capability: Capability,
    pub model: &'a str,
    pub params: &'a GenParams,
    pub credential: Option<&'a str>,
    pub timeout: Duration,
    pub cancel: &'a CancelProbe,
    pub temp: &'a TempArtifacts,
}

impl ProviderCall<'_> {
    /// The credential, or `AuthMissing`
    pub fn require_credential(&self) -> Result<&str, ProviderError> {
        self.credential.ok_or_else(|| {
            ProviderError::new(ProviderErrorKind::AuthMissing, "no API key configured")
        })
    }

    /// Register this call's scratch output before any network traffic
    pub fn allocate_output(&self) -> PathBuf {
        self.temp.allocate(self.job_id, self.capability.extension())
    }
}

/// Raw outcome of a successful provider call: a scratch artifact not yet promoted
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub artifact: PathBuf,
    pub model_id: String,
    /// Prompt actually sent, for the artifact sidecar
    pub prompt: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Trait implemented by each generation provider
pub trait GenerationProvider: Send + Sync {
    /// Provider name (e.g. "google", "flux", "meshy", "removebg", "mock")
    fn name(&self) -> &str;

    /// Capabilities this provider can serve
    fn capabilities(&self) -> Vec<Capability>;

    /// Whether calls need an API key
    fn requires_credential(&self) -> bool {
        true
    }

    /// Model used when neither the node nor the config names one
    fn default_model(&self, capability: Capability) -> &str;

    /// Parameters accepted for `capability` on `model`
    fn schema(&self, capability: Capability, model: &str) -> ParamSchema;

    /// Run one blocking call. Must poll `call.cancel` at every round-trip boundary.
    fn call(&self, call: &ProviderCall<'_>) -> Result<RawResult, ProviderError>;

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Local readiness check; never touches the network
    fn health_check(&self, credential: Option<&str>) -> ProviderStatus {
        if self.requires_credential() && credential.is_none() {
            ProviderStatus::NoApiKey
        } else {
            ProviderStatus::Available
        }
    }
}

/// A fully resolved request, owned so it can move onto a worker thread
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub capability: Capability,
    pub provider: String,
    pub model: String,
    pub params: GenParams,
    pub credentials: Credentials,
    pub timeout: Duration,
}

/// Uniform front for all providers: dispatch, credential and cancellation
/// checks, error normalization and logging.
pub struct ProviderClient {
    providers: ProviderSet,
}

impl ProviderClient {
    pub fn new(providers: ProviderSet) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Run `spec` for `job_id`, blocking the calling (worker) thread
    pub fn call(
        &self,
        job_id: &JobId,
        spec: &CallSpec,
        cancel: &CancelProbe,
        temp: &TempArtifacts,
    ) -> Result<RawResult, ProviderError> {
        cancel.check()?;

        let provider = self.providers.get(&spec.provider).ok_or_else(|| {
            ProviderError::bad_response(format!("unknown provider '{}'", spec.provider))
        })?;
        if !provider.supports(spec.capability) {
            return Err(ProviderError::bad_response(format!(
                "provider '{}' does not support {}",
                spec.provider, spec.capability
            )));
        }

        let credential = spec.credentials.get(&spec.provider);
        if provider.requires_credential() && credential.is_none() {
            return Err(ProviderError::new(
                ProviderErrorKind::AuthMissing,
                format!("no API key configured for '{}'", spec.provider),
            ));
        }

        let call = ProviderCall {
            job_id,
            capability: spec.capability,
            model: &spec.model,
            params: &spec.params,
            credential,
            timeout: spec.timeout,
            cancel,
            temp,
        };

        let started = Instant::now();
        debug!(
            job_id = %job_id,
            provider = %spec.provider,
            capability = %spec.capability,
            model = %spec.model,
            "provider call started"
        );

        let outcome = provider.call(&call).and_then(|raw| {
            // A result that lands after cancellation is dropped, not applied
            if cancel.is_cancelled() {
                temp.discard(&raw.artifact);
                Err(ProviderError::cancelled())
            } else {
                Ok(raw)
            }
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(raw) => info!(
                job_id = %job_id,
                provider = %spec.provider,
                elapsed_ms,
                artifact = %raw.artifact.display(),
                "provider call succeeded"
            ),
            Err(e) if e.is_cancelled() => {
                info!(job_id = %job_id, provider = %spec.provider, elapsed_ms, "provider call cancelled")
            }
            Err(e) => warn!(
                job_id = %job_id,
                provider = %spec.provider,
                elapsed_ms,
                kind = %e.kind,
                detail = %e.detail,
                "provider call failed"
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::providers::mock::MockProvider;
    use crate::schema::ParamValue;

    fn spec(provider: &str, capability: Capability) -> CallSpec {
        let mut params = GenParams::new();
        params.insert("prompt".to_string(), ParamValue::Text("cat".to_string()));
        CallSpec {
            capability,
            provider: provider.to_string(),
            model: "mock-image".to_string(),
            params,
            credentials: Credentials::new(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_capability_parse() {
        assert_eq!(Capability::parse("image-generate"), Some(Capability::ImageGenerate));
        assert_eq!(Capability::parse("GENERATE_3D"), Some(Capability::Generate3D));
        assert_eq!(Capability::parse("audio"), None);
    }

    #[test]
    fn test_capability_serde_names() {
        let json = serde_json::to_string(&Capability::Generate3D).unwrap();
        assert_eq!(json, "\"generate_3d\"");
        let back: Capability = serde_json::from_str("\"remove_background\"").unwrap();
        assert_eq!(back, Capability::RemoveBackground);
    }

    #[test]
    fn test_blank_credential_is_missing() {
        let creds = Credentials::new().with("google", "  ").with("flux", "k");
        assert_eq!(creds.get("google"), None);
        assert_eq!(creds.get("flux"), Some("k"));
        assert_eq!(creds.get("meshy"), None);
    }

    #[test]
    fn test_client_rejects_unknown_provider() {
        let dir = tempfile::tempdir().unwrap();
        let temp = TempArtifacts::new(dir.path(), 8).unwrap();
        let client = ProviderClient::new(ProviderSet::new());
        let token = CancellationToken::new();
        let err = client
            .call(
                &JobId::new("g", "n"),
                &spec("nope", Capability::ImageGenerate),
                &CancelProbe::detached(&token),
                &temp,
            )
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::BadResponse);
    }

    #[test]
    fn test_client_fails_fast_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let temp = TempArtifacts::new(dir.path(), 8).unwrap();
        let mut set = ProviderSet::new();
        set.register(MockProvider::new());
        let client = ProviderClient::new(set);
        let token = CancellationToken::new();
        let probe = CancelProbe::detached(&token);
        token.cancel_all();

        let err = client
            .call(
                &JobId::new("g", "n"),
                &spec("mock", Capability::ImageGenerate),
                &probe,
                &temp,
            )
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(temp.is_empty());
    }

    #[test]
    fn test_client_runs_mock() {
        let dir = tempfile::tempdir().unwrap();
        let temp = TempArtifacts::new(dir.path(), 8).unwrap();
        let mut set = ProviderSet::new();
        set.register(MockProvider::new());
        let client = ProviderClient::new(set);
        let token = CancellationToken::new();

        let raw = client
            .call(
                &JobId::new("g", "n"),
                &spec("mock", Capability::ImageGenerate),
                &CancelProbe::detached(&token),
                &temp,
            )
            .unwrap();
        assert!(raw.artifact.exists());
        assert!(temp.contains(&raw.artifact));
    }
}
