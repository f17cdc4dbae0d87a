//! Loom Gen - asynchronous AI generation jobs for node graphs
//!
//! Dispatches long-running provider calls (Google Gemini, Flux, Meshy,
//! remove.bg) on worker threads, tracks one job per node, applies results on
//! the owning thread and keeps a bounded, navigable result history per node.

pub mod artifact;
pub mod cancel;
pub mod config;
pub mod history;
pub mod http;
pub mod logging;
pub mod main_thread;
pub mod orchestrator;
pub mod persist;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod schema;
pub mod state;
pub mod status;
pub mod temp;

pub use cancel::{CancelProbe, CancellationToken};
pub use config::LoomConfig;
pub use history::History;
pub use orchestrator::{GenerationRequest, Orchestrator, OrchestratorSettings};
pub use persist::NodeDocument;
pub use provider::{
    Capability, Credentials, GenerationProvider, ProviderClient, ProviderStatus, RawResult,
};
pub use providers::ProviderSet;
pub use registry::{JobRegistry, Lease};
pub use schema::{GenParams, ParamSchema, ParamValue};
pub use state::{ErrorInfo, ErrorKind, JobState, JobStatus, ResultEntry};
pub use status::StatusAggregator;
pub use temp::TempArtifacts;
