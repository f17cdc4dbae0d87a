//! remove.bg background removal provider

use crate::config::LoomConfig;
use crate::http;
use crate::provider::*;
use crate::schema::{ParamSchema, ParamSpec, ParamValue, ParamsExt};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use loom_core::ProviderError;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

const DEFAULT_REMOVEBG_URL: &str = "https://api.remove.bg/v1.0/removebg";
const DEFAULT_MODEL: &str = "removebg";

pub struct RemoveBgProvider {
    api_url: String,
}

impl RemoveBgProvider {
    pub fn from_config(config: &LoomConfig) -> Self {
        let api_url = config
            .api_url("removebg")
            .unwrap_or(DEFAULT_REMOVEBG_URL)
            .to_string();
        Self { api_url }
    }
}

/// Cutout bytes and the foreground type remove.bg detected
#[derive(Debug, Clone, PartialEq)]
pub struct Cutout {
    pub png: Vec<u8>,
    pub foreground: Option<String>,
}

/// Decode a JSON-mode remove.bg response
pub fn parse_removebg_response(response: &Value) -> Result<Cutout, ProviderError> {
    if let Some(errors) = response.get("errors").and_then(Value::as_array) {
        let titles: Vec<&str> = errors
            .iter()
            .filter_map(|e| e.get("title").and_then(Value::as_str))
            .collect();
        return Err(ProviderError::bad_response(format!(
            "remove.bg error: {}",
            titles.join("; ")
        )));
    }
    let data = response
        .pointer("/data/result_b64")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::bad_response("No result image in response"))?;
    let png = BASE64
        .decode(data)
        .map_err(|e| ProviderError::bad_response(format!("invalid image data: {}", e)))?;
    let foreground = response
        .pointer("/data/foreground_type")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(Cutout { png, foreground })
}

impl GenerationProvider for RemoveBgProvider {
    fn name(&self) -> &str {
        "removebg"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::RemoveBackground]
    }

    fn default_model(&self, _capability: Capability) -> &str {
        DEFAULT_MODEL
    }

    fn schema(&self, capability: Capability, model: &str) -> ParamSchema {
        ParamSchema::new("removebg", capability, model)
            .param(ParamSpec::path("image", "Image to cut out").required())
            .param(
                ParamSpec::choice("size", &["auto", "preview", "full"], "Output resolution")
                    .with_default(ParamValue::Text("auto".to_string())),
            )
    }

    fn call(&self, call: &ProviderCall<'_>) -> Result<RawResult, ProviderError> {
        let key = call.require_credential()?;
        let output = call.allocate_output();

        let image_path = call
            .params
            .text("image")
            .ok_or_else(|| ProviderError::bad_response("no input image"))?;
        let bytes = std::fs::read(Path::new(image_path)).map_err(|e| {
            ProviderError::bad_response(format!("cannot read input image {}: {}", image_path, e))
        })?;

        let payload = json!({
            "image_file_b64": BASE64.encode(bytes),
            "size": call.params.text("size").unwrap_or("auto"),
            "format": "png",
        });
        let response = http::post_json(
            &self.api_url,
            &[
                ("X-Api-Key", key.to_string()),
                ("Accept", "application/json".to_string()),
            ],
            &payload,
            call.timeout,
            call.cancel,
        )?;
        let cutout = parse_removebg_response(&response)?;
        http::write_artifact(&output, &cutout.png)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), image_path.to_string());
        if let Some(fg) = cutout.foreground {
            metadata.insert("foreground".to_string(), fg);
        }

        Ok(RawResult {
            artifact: output,
            model_id: call.model.to_string(),
            prompt: None,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let response = json!({
            "data": {
                "result_b64": BASE64.encode(b"png-bytes"),
                "foreground_type": "product"
            }
        });
        let cutout = parse_removebg_response(&response).unwrap();
        assert_eq!(cutout.png, b"png-bytes");
        assert_eq!(cutout.foreground.as_deref(), Some("product"));
    }

    #[test]
    fn test_parse_errors() {
        let response = json!({
            "errors": [{ "title": "Could not identify foreground in image" }]
        });
        let err = parse_removebg_response(&response).unwrap_err();
        assert!(err.detail.contains("foreground"));

        assert!(parse_removebg_response(&json!({ "data": {} })).is_err());
    }

    #[test]
    fn test_schema_requires_image() {
        let provider = RemoveBgProvider::from_config(&LoomConfig::default());
        let schema = provider.schema(Capability::RemoveBackground, DEFAULT_MODEL);
        assert!(schema.get("image").unwrap().required);
        assert!(schema.resolve(&Default::default()).is_err());
    }
}
