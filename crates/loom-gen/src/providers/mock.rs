//! Mock provider for testing
//!
//! Produces solid-color PNGs (images), a minimal GLB (3D) and plain text
//! without any network calls. Latency and failures can be injected, and the
//! simulated latency observes cancellation like a real network wait.

use crate::provider::*;
use crate::schema::{GenParams, ParamSchema, ParamSpec, ParamValue, ParamsExt};
use loom_core::{ProviderError, ProviderErrorKind};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A mock provider that generates placeholder artifacts locally
#[derive(Debug, Default)]
pub struct MockProvider {
    latency: Duration,
    failure: Option<ProviderErrorKind>,
    requires_key: bool,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated time spent "on the network" per call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every call fail with `kind` after the latency elapses
    pub fn failing_with(mut self, kind: ProviderErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    /// Behave like a hosted provider that needs an API key
    pub fn requiring_credential(mut self) -> Self {
        self.requires_key = true;
        self
    }

    /// Number of calls that reached the provider
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GenerationProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL.to_vec()
    }

    fn requires_credential(&self) -> bool {
        self.requires_key
    }

    fn default_model(&self, capability: Capability) -> &str {
        match capability {
            Capability::TextGenerate => "mock-text",
            Capability::Generate3D => "mock-mesh",
            _ => "mock-image",
        }
    }

    fn schema(&self, capability: Capability, model: &str) -> ParamSchema {
        let schema = ParamSchema::new("mock", capability, model);
        let seed = ParamSpec::integer("seed", Some(0), None, "Random seed");
        match capability {
            Capability::ImageGenerate => schema
                .param(ParamSpec::text("prompt", "What to draw").required())
                .param(size_spec("width"))
                .param(size_spec("height"))
                .param(seed),
            Capability::ImageEdit => schema
                .param(ParamSpec::text("prompt", "How to change the image").required())
                .param(ParamSpec::path("image", "Image to edit").required())
                .param(seed),
            Capability::TextGenerate => schema
                .param(ParamSpec::text("prompt", "Instruction").required())
                .param(ParamSpec::text("system", "System instruction")),
            Capability::Generate3D => schema
                .param(ParamSpec::text("prompt", "Object description").required())
                .param(seed),
            Capability::RemoveBackground => {
                schema.param(ParamSpec::path("image", "Image to cut out").required())
            }
        }
    }

    fn call(&self, call: &ProviderCall<'_>) -> Result<RawResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.requires_key {
            call.require_credential()?;
        }

        let output = call.allocate_output();
        call.cancel.sleep(self.latency)?;

        if let Some(kind) = self.failure {
            return Err(ProviderError::new(
                kind,
                format!("mock failure for {}", call.job_id),
            ));
        }

        let prompt = call.params.text("prompt").unwrap_or_default().to_string();
        match call.capability {
            Capability::ImageGenerate => {
                let width = call.params.int("width").unwrap_or(64) as u32;
                let height = call.params.int("height").unwrap_or(64) as u32;
                write_solid_png(&output, &prompt, width, height, 255)?;
            }
            Capability::ImageEdit => {
                let (width, height) = input_dimensions(call.params)?;
                write_solid_png(&output, &prompt, width, height, 255)?;
            }
            Capability::RemoveBackground => {
                let (width, height) = input_dimensions(call.params)?;
                write_solid_png(&output, "cutout", width, height, 0)?;
            }
            Capability::TextGenerate => {
                let text = format!("[{}] {}", call.model, prompt);
                std::fs::write(&output, text).map_err(write_error)?;
            }
            Capability::Generate3D => write_minimal_glb(&output)?,
        }

        let mut metadata = BTreeMap::new();
        if let Some(seed) = call.params.get("seed").map(ParamValue::to_string) {
            metadata.insert("seed".to_string(), seed);
        }

        Ok(RawResult {
            artifact: output,
            model_id: call.model.to_string(),
            prompt: (!prompt.is_empty()).then_some(prompt),
            metadata,
        })
    }
}

fn size_spec(name: &str) -> ParamSpec {
    ParamSpec::integer(name, Some(1), Some(4096), "Size in pixels").with_default(ParamValue::Int(64))
}

fn input_dimensions(params: &GenParams) -> Result<(u32, u32), ProviderError> {
    let path = params
        .text("image")
        .ok_or_else(|| ProviderError::bad_response("no input image"))?;
    image::image_dimensions(path)
        .map_err(|e| ProviderError::bad_response(format!("unreadable input image: {}", e)))
}

fn write_error(e: std::io::Error) -> ProviderError {
    ProviderError::bad_response(format!("failed to write mock artifact: {}", e))
}

/// Write a solid-color PNG whose color is derived from `seed_text`
fn write_solid_png(
    path: &Path,
    seed_text: &str,
    width: u32,
    height: u32,
    alpha: u8,
) -> Result<(), ProviderError> {
    let hash_val = seed_text
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    let r = ((hash_val >> 16) & 0xFF) as u8;
    let g = ((hash_val >> 8) & 0xFF) as u8;
    let b = (hash_val & 0xFF) as u8;

    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([r, g, b, alpha]));
    img.save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| ProviderError::bad_response(format!("failed to save PNG: {}", e)))
}

/// Write a minimal valid GLB file (single triangle)
fn write_minimal_glb(path: &Path) -> Result<(), ProviderError> {
    let json = serde_json::json!({
        "asset": { "version": "2.0", "generator": "loom-mock" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{
            "primitives": [{
                "attributes": { "POSITION": 0 },
                "indices": 1
            }]
        }],
        "accessors": [
            {
                "bufferView": 0,
                "componentType": 5126,
                "count": 3,
                "type": "VEC3",
                "max": [1.0, 1.0, 0.0],
                "min": [-1.0, 0.0, 0.0]
            },
            {
                "bufferView": 1,
                "componentType": 5123,
                "count": 3,
                "type": "SCALAR",
                "max": [2],
                "min": [0]
            }
        ],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }
        ],
        "buffers": [{ "byteLength": 44 }]
    });

    let mut json_padded = json.to_string().into_bytes();
    let json_padded_len = (json_padded.len() + 3) & !3;
    json_padded.resize(json_padded_len, b' ');

    let vertices: [f32; 9] = [-1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let indices: [u16; 3] = [0, 1, 2];

    let mut bin_data = Vec::new();
    for v in &vertices {
        bin_data.extend_from_slice(&v.to_le_bytes());
    }
    for i in &indices {
        bin_data.extend_from_slice(&i.to_le_bytes());
    }
    let bin_padded_len = (bin_data.len() + 3) & !3;
    bin_data.resize(bin_padded_len, 0);

    let total_len = 12 + 8 + json_padded.len() as u32 + 8 + bin_data.len() as u32;

    let mut bytes = Vec::with_capacity(total_len as usize);
    bytes.write_all(b"glTF").map_err(write_error)?;
    bytes.write_all(&2u32.to_le_bytes()).map_err(write_error)?;
    bytes.write_all(&total_len.to_le_bytes()).map_err(write_error)?;

    bytes
        .write_all(&(json_padded.len() as u32).to_le_bytes())
        .map_err(write_error)?;
    bytes.write_all(&0x4E4F534Au32.to_le_bytes()).map_err(write_error)?; // "JSON"
    bytes.write_all(&json_padded).map_err(write_error)?;

    bytes
        .write_all(&(bin_data.len() as u32).to_le_bytes())
        .map_err(write_error)?;
    bytes.write_all(&0x004E4942u32.to_le_bytes()).map_err(write_error)?; // "BIN\0"
    bytes.write_all(&bin_data).map_err(write_error)?;

    std::fs::write(path, bytes).map_err(write_error)
}
