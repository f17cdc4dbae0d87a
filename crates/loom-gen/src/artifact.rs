//! Promotion of scratch artifacts into the permanent result tree.
//!
//! Results land at `<output_dir>/<job slug>/<hash prefix>.<ext>`, named by
//! content so regenerating identical output reuses the same file. Each result
//! gets a `<file>.meta.toml` sidecar recording how it was made.

use crate::provider::{Capability, RawResult};
use crate::temp::TempArtifacts;
use chrono::{DateTime, Utc};
use loom_core::{ContentHash, JobId, LoomError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Provenance written next to every promoted artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub job: String,
    pub provider: String,
    pub model: String,
    pub capability: Capability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PromotedArtifact {
    pub path: PathBuf,
    pub hash: ContentHash,
    pub sidecar_path: Option<PathBuf>,
}

/// Move `raw.artifact` out of the temp registry into `output_dir`
pub fn promote_artifact(
    temp: &TempArtifacts,
    output_dir: &Path,
    job_id: &JobId,
    provider: &str,
    capability: Capability,
    raw: &RawResult,
) -> Result<PromotedArtifact> {
    let hash = ContentHash::from_file(&raw.artifact).map_err(|e| LoomError::ArtifactWriteFailure {
        path: raw.artifact.display().to_string(),
        reason: format!("cannot read generated file: {}", e),
    })?;

    let extension = raw
        .artifact
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_else(|| capability.extension());
    let dest = output_dir
        .join(job_id.slug())
        .join(format!("{}.{}", hash.short_hex(), extension));

    let path = temp.promote(&raw.artifact, &dest)?;

    let meta = ArtifactMeta {
        job: job_id.to_string(),
        provider: provider.to_string(),
        model: raw.model_id.clone(),
        capability,
        prompt: raw.prompt.clone(),
        hash: hash.to_prefixed_hex(),
        created_at: Utc::now(),
        properties: raw.metadata.clone(),
    };

    // The artifact is already in place; a missing sidecar only loses provenance
    let sidecar_path = match write_sidecar(&path, &meta) {
        Ok(p) => Some(p),
        Err(e) => {
            warn!(job_id = %job_id, path = %path.display(), error = %e, "failed to write artifact sidecar");
            None
        }
    };

    debug!(job_id = %job_id, path = %path.display(), hash = %hash.short_hex(), "artifact promoted");
    Ok(PromotedArtifact {
        path,
        hash,
        sidecar_path,
    })
}

/// Sidecar path for an artifact: `<file>.meta.toml`
pub fn sidecar_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".meta.toml");
    artifact.with_file_name(name)
}

pub fn write_sidecar(artifact: &Path, meta: &ArtifactMeta) -> Result<PathBuf> {
    #[derive(Serialize)]
    struct Sidecar<'a> {
        artifact: &'a ArtifactMeta,
    }

    let path = sidecar_path(artifact);
    let toml_str = toml::to_string_pretty(&Sidecar { artifact: meta })?;
    std::fs::write(&path, toml_str).map_err(|e| LoomError::ArtifactWriteFailure {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(path)
}

pub fn read_sidecar(artifact: &Path) -> Result<ArtifactMeta> {
    #[derive(Deserialize)]
    struct Sidecar {
        artifact: ArtifactMeta,
    }

    let content = std::fs::read_to_string(sidecar_path(artifact))?;
    let sidecar: Sidecar = toml::from_str(&content)?;
    Ok(sidecar.artifact)
}
