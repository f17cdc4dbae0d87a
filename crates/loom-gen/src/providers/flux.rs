//! Flux image generation provider
//!
//! Generates images through fal.ai's synchronous Flux endpoint. The
//! response carries a URL which is then downloaded into the scratch artifact.

use crate::config::LoomConfig;
use crate::http::{self, RetryPolicy};
use crate::provider::*;
use crate::schema::{ParamSchema, ParamSpec, ParamValue, ParamsExt};
use loom_core::ProviderError;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const DEFAULT_FLUX_URL: &str = "https://fal.run";
const DEFAULT_MODEL: &str = "fal-ai/flux/dev";

/// Flux provider for AI image generation via fal.ai
pub struct FluxProvider {
    api_url: String,
    retry: RetryPolicy,
}

impl FluxProvider {
    pub fn from_config(config: &LoomConfig) -> Self {
        let api_url = config
            .api_url("flux")
            .unwrap_or(DEFAULT_FLUX_URL)
            .trim_end_matches('/')
            .to_string();
        Self {
            api_url,
            retry: RetryPolicy::default(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/{}", self.api_url, model.trim_start_matches('/'))
    }
}

/// Build the fal.ai request payload from resolved parameters
pub fn build_payload(prompt: &str, params: &crate::schema::GenParams) -> Value {
    let mut payload = json!({
        "prompt": prompt,
        "num_images": 1,
        "enable_safety_checker": true,
    });
    if let (Some(w), Some(h)) = (params.int("width"), params.int("height")) {
        payload["image_size"] = json!({ "width": w, "height": h });
    }
    if let Some(steps) = params.int("steps") {
        payload["num_inference_steps"] = json!(steps);
    }
    if let Some(guidance) = params.float("guidance") {
        payload["guidance_scale"] = json!(guidance);
    }
    if let Some(seed) = params.int("seed") {
        payload["seed"] = json!(seed);
    }
    payload
}

/// Extract the first image URL from a Flux response
pub fn parse_flux_response(response: &Value) -> Result<String, ProviderError> {
    if let Some(detail) = response.get("detail") {
        return Err(ProviderError::bad_response(format!("Flux error: {}", detail)));
    }
    response
        .get("images")
        .and_then(|imgs| imgs.as_array())
        .and_then(|arr| arr.first())
        .and_then(|img| img.get("url"))
        .and_then(|u| u.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ProviderError::bad_response("No image URL in response"))
}

impl GenerationProvider for FluxProvider {
    fn name(&self) -> &str {
        "flux"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::ImageGenerate]
    }

    fn default_model(&self, _capability: Capability) -> &str {
        DEFAULT_MODEL
    }

    fn schema(&self, capability: Capability, model: &str) -> ParamSchema {
        let size = |name: &str| {
            ParamSpec::integer(name, Some(256), Some(2048), "Output size in pixels")
                .with_default(ParamValue::Int(1024))
        };
        ParamSchema::new("flux", capability, model)
            .param(ParamSpec::text("prompt", "What to draw").required())
            .param(size("width"))
            .param(size("height"))
            .param(
                ParamSpec::integer("steps", Some(1), Some(50), "Inference steps")
                    .with_default(ParamValue::Int(28)),
            )
            .param(
                ParamSpec::float("guidance", Some(1.0), Some(20.0), "Guidance scale")
                    .with_default(ParamValue::Float(3.5)),
            )
            .param(ParamSpec::integer("seed", Some(0), None, "Random seed"))
    }

    fn call(&self, call: &ProviderCall<'_>) -> Result<RawResult, ProviderError> {
        let key = call.require_credential()?;
        let output = call.allocate_output();
        let prompt = call.params.text("prompt").unwrap_or_default().to_string();

        let response = http::post_json(
            &self.endpoint(call.model),
            &[("Authorization", format!("Key {}", key))],
            &build_payload(&prompt, call.params),
            call.timeout,
            call.cancel,
        )?;
        let image_url = parse_flux_response(&response)?;

        http::download_to(&image_url, &output, call.timeout, call.cancel, &self.retry)?;

        let mut metadata = BTreeMap::new();
        if let Some(seed) = response.get("seed").and_then(|s| s.as_u64()) {
            metadata.insert("seed".to_string(), seed.to_string());
        }

        Ok(RawResult {
            artifact: output,
            model_id: call.model.to_string(),
            prompt: Some(prompt),
            metadata,
        })
    }
}
