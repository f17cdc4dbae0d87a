//! Google Gemini provider
//!
//! Image generation, image editing and text generation through the Gemini
//! `generateContent` endpoint. Every capability is a single blocking request;
//! images come back inline as base64.

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

const DEFAULT_GOOGLE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
const ASPECT_RATIOS: &[&str] = &["1:1", "3:4", "4:3", "9:16", "16:9"];

/// Google provider for Gemini image and text generation
pub struct GoogleProvider {
    api_url: String,
}

impl GoogleProvider {
    pub fn from_config(config: &LoomConfig) -> Self {
        let api_url = config
            .api_url("google")
            .unwrap_or(DEFAULT_GOOGLE_URL)
            .trim_end_matches('/')
            .to_string();
        Self { api_url }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_url, model)
    }
}

/// What came back from one `generateContent` call
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiOutput {
    pub text: String,
    pub image: Option<Vec<u8>>,
    pub image_mime: Option<String>,
}

/// Build the request body for `call`
pub fn build_request(call: &ProviderCall<'_>) -> Result<Value, ProviderError> {
    let prompt = call.params.text("prompt").unwrap_or_default();
    let mut parts = vec![json!({ "text": prompt })];

    if call.capability == Capability::ImageEdit {
        let image_path = call
            .params
            .text("image")
            .ok_or_else(|| ProviderError::bad_response("no input image"))?;
        parts.push(inline_image(Path::new(image_path))?);
    }

    let mut body = json!({ "contents": [{ "parts": parts }] });

    match call.capability {
        Capability::TextGenerate => {
            let mut config = json!({});
            if let Some(t) = call.params.float("temperature") {
                config["temperature"] = json!(t);
            }
            if let Some(max) = call.params.int("max_output_tokens") {
                config["maxOutputTokens"] = json!(max);
            }
            body["generationConfig"] = config;
            if let Some(system) = call.params.text("system") {
                body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
            }
        }
        _ => {
            let mut config = json!({ "responseModalities": ["TEXT", "IMAGE"] });
            if let Some(ratio) = call.params.text("aspect_ratio") {
                config["imageConfig"] = json!({ "aspectRatio": ratio });
            }
            body["generationConfig"] = config;
        }
    }

    Ok(body)
}

fn inline_image(path: &Path) -> Result<Value, ProviderError> {
    let bytes = std::fs::read(path).map_err(|e| {
        ProviderError::bad_response(format!("cannot read input image {}: {}", path.display(), e))
    })?;
    let mime = match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "webp" => "image/webp",
        _ => "image/png",
    };
    Ok(json!({ "inline_data": { "mime_type": mime, "data": BASE64.encode(bytes) } }))
}

/// Pull text and the first inline image out of a Gemini response
pub fn parse_response(response: &Value) -> Result<GeminiOutput, ProviderError> {
    if let Some(reason) = response
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(ProviderError::bad_response(format!("prompt blocked: {}", reason)));
    }

    let candidate = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| ProviderError::bad_response("no candidates in response"))?;

    let parts = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut output = GeminiOutput {
        text: String::new(),
        image: None,
        image_mime: None,
    };

    for part in &parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            output.text.push_str(text);
        }
        let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
        if let (Some(inline), None) = (inline, &output.image) {
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::bad_response("inline image without data"))?;
            let bytes = BASE64
                .decode(data)
                .map_err(|e| ProviderError::bad_response(format!("invalid image data: {}", e)))?;
            output.image = Some(bytes);
            output.image_mime = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    }

    if output.text.is_empty() && output.image.is_none() {
        let reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("empty response");
        return Err(ProviderError::bad_response(format!("no content: {}", reason)));
    }

    Ok(output)
}

/// Write image bytes as PNG, converting other formats
fn write_png(dest: &Path, bytes: &[u8], mime: Option<&str>) -> Result<(), ProviderError> {
    if mime.map(|m| m == "image/png").unwrap_or(false) {
        return http::write_artifact(dest, bytes);
    }
    let img = image::load_from_memory(bytes)
        .map_err(|e| ProviderError::bad_response(format!("undecodable image: {}", e)))?;
    img.save_with_format(dest, image::ImageFormat::Png)
        .map_err(|e| ProviderError::bad_response(format!("failed to save PNG: {}", e)))
}

impl GenerationProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::ImageGenerate,
            Capability::ImageEdit,
            Capability::TextGenerate,
        ]
    }

    fn default_model(&self, capability: Capability) -> &str {
        match capability {
            Capability::TextGenerate => DEFAULT_TEXT_MODEL,
            _ => DEFAULT_IMAGE_MODEL,
        }
    }

    fn schema(&self, capability: Capability, model: &str) -> ParamSchema {
        let schema = ParamSchema::new("google", capability, model);
        let aspect = ParamSpec::choice("aspect_ratio", ASPECT_RATIOS, "Output aspect ratio")
            .with_default(ParamValue::Text("1:1".to_string()));
        match capability {
            Capability::ImageGenerate => schema
                .param(ParamSpec::text("prompt", "What to draw").required())
                .param(aspect),
            Capability::ImageEdit => schema
                .param(ParamSpec::text("prompt", "How to change the image").required())
                .param(ParamSpec::path("image", "Image to edit").required())
                .param(aspect),
            _ => schema
                .param(ParamSpec::text("prompt", "Instruction").required())
                .param(ParamSpec::text("system", "System instruction"))
                .param(
                    ParamSpec::float("temperature", Some(0.0), Some(2.0), "Sampling temperature")
                        .with_default(ParamValue::Float(1.0)),
                )
                .param(ParamSpec::integer(
                    "max_output_tokens",
                    Some(1),
                    Some(65_536),
                    "Response length limit",
                )),
        }
    }

    fn call(&self, call: &ProviderCall<'_>) -> Result<RawResult, ProviderError> {
        let key = call.require_credential()?.to_string();
        let output = call.allocate_output();
        let body = build_request(call)?;

        let response = http::post_json(
            &self.endpoint(call.model),
            &[("x-goog-api-key", key)],
            &body,
            call.timeout,
            call.cancel,
        )?;
        let parsed = parse_response(&response)?;

        match call.capability {
            Capability::TextGenerate => {
                if parsed.text.is_empty() {
                    return Err(ProviderError::bad_response("no text in response"));
                }
                http::write_artifact(&output, parsed.text.as_bytes())?;
            }
            _ => {
                let bytes = parsed.image.as_deref().ok_or_else(|| {
                    ProviderError::bad_response(format!(
                        "no image in response{}",
                        if parsed.text.is_empty() {
                            String::new()
                        } else {
                            format!(": {}", parsed.text)
                        }
                    ))
                })?;
                write_png(&output, bytes, parsed.image_mime.as_deref())?;
            }
        }

        let mut metadata = BTreeMap::new();
        if call.capability != Capability::TextGenerate && !parsed.text.is_empty() {
            metadata.insert("caption".to_string(), parsed.text.clone());
        }

        Ok(RawResult {
            artifact: output,
            model_id: call.model.to_string(),
            prompt: call.params.text("prompt").map(str::to_string),
            metadata,
        })
    }
}
