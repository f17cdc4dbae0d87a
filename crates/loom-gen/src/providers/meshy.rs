//! Meshy 3D model generation provider
//!
//! Generates 3D models via the Meshy v2 text-to-3d API. Generation is
//! long-running (minutes), so the call submits a task and then polls it,
//! observing cancellation between polls.

use crate::config::LoomConfig;
use crate::http::{self, RetryPolicy};
use crate::provider::*;
use crate::schema::{ParamSchema, ParamSpec, ParamValue, ParamsExt};
use loom_core::ProviderError;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_MESHY_URL: &str = "https://api.meshy.ai/openapi/v2/text-to-3d";
const DEFAULT_MODEL: &str = "meshy-5";
const POLL_INTERVAL: Duration = Duration::from_secs(10);
const MAX_POLL_ATTEMPTS: u32 = 180;

/// State of a remote Meshy task
#[derive(Debug, Clone, PartialEq)]
pub enum MeshyTaskStatus {
    Processing(u8),
    Complete { model_url: Option<String> },
    Failed(String),
}

/// Meshy provider for AI 3D model generation
pub struct MeshyProvider {
    api_url: String,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl MeshyProvider {
    pub fn from_config(config: &LoomConfig) -> Self {
        let api_url = config
            .api_url("meshy")
            .unwrap_or(DEFAULT_MESHY_URL)
            .trim_end_matches('/')
            .to_string();
        Self {
            api_url,
            poll_interval: POLL_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }

    fn auth(key: &str) -> [(&'static str, String); 1] {
        [("Authorization", format!("Bearer {}", key))]
    }

    /// Submit a text-to-3d task and return the task ID. Never retried.
    fn submit_task(&self, call: &ProviderCall<'_>, key: &str) -> Result<String, ProviderError> {
        let response = http::post_json(
            &self.api_url,
            &Self::auth(key),
            &build_payload(call.model, call.params),
            call.timeout,
            call.cancel,
        )?;
        parse_meshy_submit(&response)
    }

    /// Poll until the task finishes, fails, or polling runs out
    fn wait_for_task(
        &self,
        call: &ProviderCall<'_>,
        key: &str,
        task_id: &str,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/{}", self.api_url, task_id);
        for attempt in 0..MAX_POLL_ATTEMPTS {
            let response = http::get_json_with_retry(
                &url,
                &Self::auth(key),
                call.timeout,
                call.cancel,
                &self.retry,
            )?;
            match parse_task_status(&response) {
                MeshyTaskStatus::Complete { model_url } => {
                    return model_url.ok_or_else(|| {
                        ProviderError::bad_response("No GLB URL in completion response")
                    });
                }
                MeshyTaskStatus::Failed(msg) => {
                    return Err(ProviderError::bad_response(format!("Meshy task failed: {}", msg)));
                }
                MeshyTaskStatus::Processing(progress) => {
                    debug!(job_id = %call.job_id, task_id, attempt, progress, "meshy task pending");
                    call.cancel.sleep(self.poll_interval)?;
                }
            }
        }
        Err(ProviderError::new(
            loom_core::ProviderErrorKind::Timeout,
            format!("Meshy task {} did not finish after {} polls", task_id, MAX_POLL_ATTEMPTS),
        ))
    }
}

/// Build the text-to-3d submit payload
pub fn build_payload(model: &str, params: &crate::schema::GenParams) -> Value {
    let mut payload = json!({
        "mode": params.text("mode").unwrap_or("preview"),
        "prompt": params.text("prompt").unwrap_or_default(),
        "ai_model": model,
        "should_remesh": true,
    });
    if let Some(neg) = params.text("negative_prompt") {
        payload["negative_prompt"] = json!(neg);
    }
    if let Some(polycount) = params.int("target_polycount") {
        payload["target_polycount"] = json!(polycount);
    }
    if let Some(seed) = params.int("seed") {
        payload["seed"] = json!(seed);
    }
    payload
}

/// Extract the task ID from a submit response
pub fn parse_meshy_submit(response: &Value) -> Result<String, ProviderError> {
    response
        .get("result")
        .and_then(|r| r.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ProviderError::bad_response("No task ID in response"))
}

/// Interpret a task poll response
pub fn parse_task_status(response: &Value) -> MeshyTaskStatus {
    let status = response
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("UNKNOWN");

    let progress = response
        .get("progress")
        .and_then(|p| p.as_u64())
        .unwrap_or(0)
        .min(100) as u8;

    match status {
        "SUCCEEDED" => {
            let model_url = response
                .get("model_urls")
                .and_then(|u| u.get("glb"))
                .and_then(|u| u.as_str())
                .map(|s| s.to_string());
            MeshyTaskStatus::Complete { model_url }
        }
        "FAILED" | "EXPIRED" | "CANCELED" => {
            let msg = response
                .get("task_error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
                .unwrap_or(status)
                .to_string();
            MeshyTaskStatus::Failed(msg)
        }
        _ => MeshyTaskStatus::Processing(progress),
    }
}

impl GenerationProvider for MeshyProvider {
    fn name(&self) -> &str {
        "meshy"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Generate3D]
    }

    fn default_model(&self, _capability: Capability) -> &str {
        DEFAULT_MODEL
    }

    fn schema(&self, capability: Capability, model: &str) -> ParamSchema {
        ParamSchema::new("meshy", capability, model)
            .param(ParamSpec::text("prompt", "Object description").required())
            .param(ParamSpec::text("negative_prompt", "What to avoid"))
            .param(
                ParamSpec::choice("mode", &["preview", "refine"], "Generation stage")
                    .with_default(ParamValue::Text("preview".to_string())),
            )
            .param(ParamSpec::integer(
                "target_polycount",
                Some(100),
                Some(300_000),
                "Approximate triangle budget",
            ))
            .param(ParamSpec::integer("seed", Some(0), None, "Random seed"))
    }

    fn call(&self, call: &ProviderCall<'_>) -> Result<RawResult, ProviderError> {
        let key = call.require_credential()?;
        let output = call.allocate_output();

        let task_id = self.submit_task(call, key)?;
        debug!(job_id = %call.job_id, task_id = %task_id, "meshy task submitted");

        let model_url = self.wait_for_task(call, key, &task_id)?;
        http::download_to(&model_url, &output, call.timeout, call.cancel, &self.retry)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("task_id".to_string(), task_id);

        Ok(RawResult {
            artifact: output,
            model_id: call.model.to_string(),
            prompt: call.params.text("prompt").map(str::to_string),
            metadata,
        })
    }
}
