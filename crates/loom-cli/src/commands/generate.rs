//! One-shot generation for a node

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use loom_core::JobId;
use loom_gen::{
    Capability, GenerationRequest, JobStatus, LoomConfig, NodeDocument, Orchestrator, ParamValue,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args)]
pub struct GenerateArgs {
    /// Capability: image-generate, image-edit, text-generate, generate-3d, remove-background
    capability: String,

    /// Prompt (shorthand for --param prompt=...)
    #[arg(long, short)]
    prompt: Option<String>,

    /// Provider to use (google, flux, meshy, removebg, mock)
    #[arg(long)]
    provider: Option<String>,

    /// Model override
    #[arg(long)]
    model: Option<String>,

    /// Provider parameter as key=value (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, ParamValue)>,

    /// Node identity as graph/node
    #[arg(long, default_value = "cli/default")]
    node: String,

    /// Node document to load and update (defaults to .loom/nodes/<node>.json)
    #[arg(long)]
    node_file: Option<PathBuf>,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "600")]
    wait: u64,
}

fn parse_param(s: &str) -> Result<(String, ParamValue), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", s));
    }
    Ok((key.to_string(), ParamValue::parse_loose(value.trim())))
}

/// Provider used when none is given on the command line
fn default_provider(capability: Capability) -> &'static str {
    match capability {
        Capability::ImageGenerate | Capability::ImageEdit | Capability::TextGenerate => "google",
        Capability::Generate3D => "meshy",
        Capability::RemoveBackground => "removebg",
    }
}

pub fn node_file_for(job_id: &JobId) -> PathBuf {
    PathBuf::from(".loom/nodes").join(format!("{}.json", job_id.slug()))
}

pub fn run(config: &LoomConfig, args: GenerateArgs) -> Result<()> {
    let capability = Capability::parse(&args.capability)
        .ok_or_else(|| anyhow!("unknown capability '{}'", args.capability))?;
    let job_id = JobId::parse(&args.node)
        .ok_or_else(|| anyhow!("node must look like graph/node, got '{}'", args.node))?;
    let node_file = args.node_file.unwrap_or_else(|| node_file_for(&job_id));
    let provider = args
        .provider
        .unwrap_or_else(|| default_provider(capability).to_string());

    let mut request = GenerationRequest::new(&provider, capability);
    if let Some(model) = &args.model {
        request = request.model(model);
    }
    if let Some(prompt) = args.prompt {
        request = request.param("prompt", prompt);
    }
    for (key, value) in args.params {
        request = request.param(&key, value);
    }

    let mut orchestrator = Orchestrator::from_config(config)?;
    if node_file.exists() {
        let doc = NodeDocument::load(&node_file)
            .with_context(|| format!("loading {}", node_file.display()))?;
        orchestrator.load_node(&job_id, &doc);
    }

    println!("Generating {} with {} for {}...", capability, provider, job_id);
    orchestrator.start(&job_id, request)?;

    let finished = orchestrator.wait_idle(Duration::from_secs(args.wait));
    if !finished {
        orchestrator.cancel(&job_id);
        orchestrator.shutdown(Duration::from_secs(5));
        bail!("gave up after {}s", args.wait);
    }

    let state = orchestrator.job_state(&job_id);
    orchestrator
        .save_node(&job_id)
        .save(&node_file)
        .with_context(|| format!("saving {}", node_file.display()))?;
    orchestrator.shutdown(Duration::from_secs(5));

    match state.status {
        JobStatus::Completed => {
            if let Some(result) = &state.result {
                println!("  Output: {}", result.artifact_path.display());
                println!("  Model: {}", result.model_id);
            }
            if let (Some(started), Some(finished)) = (state.started_at, state.finished_at) {
                let secs = (finished - started).num_milliseconds() as f64 / 1000.0;
                println!("  Done in {:.1}s", secs);
            }
            println!("  Node file: {}", node_file.display());
            Ok(())
        }
        JobStatus::Failed => {
            if let Some(error) = &state.error {
                tracing::debug!(detail = %error.detail, "generation failed");
            }
            bail!("{}", state.status_message)
        }
        other => bail!("job ended {}", other),
    }
}
