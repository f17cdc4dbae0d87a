//! Generation orchestrator
//!
//! Drives each node's job through `Idle -> Generating -> Completed | Failed |
//! Cancelled`. `start` validates and returns immediately; the provider call
//! runs on a worker thread. Workers never touch node state: they post the
//! outcome to the main-thread queue and the owner applies it from `pump`.
//!
//! A worker posts its outcome first and drops its lease second. A `start`
//! that supersedes a running job therefore waits only for the old worker,
//! never for a `pump` on its own thread. Outcomes whose lease is no longer
//! the node's current lease are discarded.

use crate::artifact::promote_artifact;
use crate::cancel::{CancelProbe, CancellationToken};
use crate::config::LoomConfig;
use crate::history::History;
use crate::main_thread::{MainThreadHandle, MainThreadQueue};
use crate::persist::NodeDocument;
use crate::provider::{CallSpec, Capability, Credentials, ProviderClient, RawResult};
use crate::providers::ProviderSet;
use crate::registry::{JobRegistry, Lease};
use crate::schema::{GenParams, ParamValue};
use crate::state::{ErrorInfo, ErrorKind, JobState, JobStatus, ResultEntry};
use crate::status::StatusAggregator;
use crate::temp::TempArtifacts;
use loom_core::{JobId, LeaseId, LoomError, Result};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest single block inside `wait_idle` before re-checking state
const IDLE_POLL: Duration = Duration::from_millis(50);

/// What a node asks to generate
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub provider: String,
    pub capability: Capability,
    /// Explicit model; otherwise the configured or provider default
    pub model: Option<String>,
    pub params: GenParams,
    /// Per-request credentials; `None` uses the orchestrator's
    pub credentials: Option<Credentials>,
}

impl GenerationRequest {
    pub fn new(provider: &str, capability: Capability) -> Self {
        Self {
            provider: provider.to_string(),
            capability,
            model: None,
            params: GenParams::new(),
            credentials: None,
        }
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Paths, limits and timeouts for an orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub temp_capacity: usize,
    pub history_limit: usize,
    pub supersede_wait: Duration,
    pub default_timeout: Duration,
    pub provider_timeouts: HashMap<String, Duration>,
    pub default_models: HashMap<String, String>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &LoomConfig) -> Self {
        let gen = &config.generation;
        let mut provider_timeouts = HashMap::new();
        let mut default_models = HashMap::new();
        for (name, provider) in &config.providers {
            if provider.timeout_secs.is_some() {
                provider_timeouts.insert(name.clone(), config.timeout(name));
            }
            if let Some(model) = &provider.default_model {
                default_models.insert(name.clone(), model.clone());
            }
        }
        Self {
            output_dir: gen.output_dir.clone(),
            temp_dir: gen.temp_dir(),
            temp_capacity: gen.temp_capacity,
            history_limit: gen.history_limit,
            supersede_wait: gen.supersede_wait(),
            default_timeout: Duration::from_secs(gen.default_timeout_secs),
            provider_timeouts,
            default_models,
        }
    }

    /// Default settings with results and scratch files under `root`
    pub fn in_dir(root: &Path) -> Self {
        let mut settings = Self::from_config(&LoomConfig::default());
        settings.output_dir = root.join("results");
        settings.temp_dir = root.join("tmp");
        settings
    }

    fn timeout_for(&self, provider: &str) -> Duration {
        self.provider_timeouts
            .get(provider)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

/// How a worker's job ended
#[derive(Debug)]
enum JobOutcome {
    Completed { path: PathBuf, model_id: String },
    Failed(ErrorInfo),
    Cancelled,
}

#[derive(Debug)]
struct NodeSlot {
    state: JobState,
    history: History,
    lease: Option<LeaseId>,
    last_model_used: Option<String>,
}

impl NodeSlot {
    fn new(history_limit: usize) -> Self {
        Self {
            state: JobState::default(),
            history: History::new(history_limit),
            lease: None,
            last_model_used: None,
        }
    }
}

/// Node state owned by the main thread. Only main-thread tasks mutate it.
#[derive(Debug)]
pub struct NodeTable {
    slots: BTreeMap<JobId, NodeSlot>,
    history_limit: usize,
    status: StatusAggregator,
}

impl NodeTable {
    fn new(history_limit: usize, status: StatusAggregator) -> Self {
        Self {
            slots: BTreeMap::new(),
            history_limit,
            status,
        }
    }

    fn slot_mut(&mut self, job_id: &JobId) -> &mut NodeSlot {
        let limit = self.history_limit;
        self.slots
            .entry(job_id.clone())
            .or_insert_with(|| NodeSlot::new(limit))
    }

    fn any_generating(&self) -> bool {
        self.slots
            .values()
            .any(|s| s.state.status == JobStatus::Generating)
    }

    /// Apply a worker's outcome, unless a newer lease owns the node
    fn finish(&mut self, job_id: &JobId, lease: LeaseId, outcome: JobOutcome) {
        let Some(slot) = self.slots.get_mut(job_id) else {
            debug!(job_id = %job_id, lease = %lease, "dropping outcome for forgotten node");
            return;
        };
        if slot.lease != Some(lease) {
            debug!(job_id = %job_id, lease = %lease, "discarding stale callback");
            return;
        }
        slot.lease = None;

        match outcome {
            JobOutcome::Completed { path, model_id } => {
                let entry = ResultEntry::new(path, model_id);
                slot.history.append(entry.clone());
                info!(job_id = %job_id, lease = %lease, path = %entry.artifact_path.display(), "job completed");
                slot.state.complete(entry);
            }
            JobOutcome::Failed(error) => {
                warn!(job_id = %job_id, lease = %lease, detail = %error.detail, "job failed");
                slot.state.fail(error);
            }
            JobOutcome::Cancelled => {
                info!(job_id = %job_id, lease = %lease, "job cancelled");
                slot.state.cancel();
            }
        }
        self.status.publish(job_id, slot.state.status);
    }
}

/// Everything a worker thread needs, shared across all workers
struct Runtime {
    client: ProviderClient,
    temp: TempArtifacts,
    output_dir: PathBuf,
}

impl Runtime {
    fn run_job(&self, job_id: &JobId, spec: &CallSpec, probe: &CancelProbe) -> JobOutcome {
        match self.client.call(job_id, spec, probe, &self.temp) {
            Ok(raw) => self.promote(job_id, spec, probe, raw),
            Err(_) if probe.is_cancelled() => JobOutcome::Cancelled,
            Err(e) => JobOutcome::Failed(ErrorInfo::from(&e)),
        }
    }

    /// Move a call's scratch artifact into the output directory.
    ///
    /// Nothing is promoted once the job is cancelled or superseded. A cancel
    /// that lands during promotion still ends the job `Cancelled`; the
    /// promoted file stays, since identical content may already be in history.
    fn promote(
        &self,
        job_id: &JobId,
        spec: &CallSpec,
        probe: &CancelProbe,
        raw: RawResult,
    ) -> JobOutcome {
        if probe.is_cancelled() {
            self.temp.discard(&raw.artifact);
            return JobOutcome::Cancelled;
        }
        match promote_artifact(
            &self.temp,
            &self.output_dir,
            job_id,
            &spec.provider,
            spec.capability,
            &raw,
        ) {
            Ok(_) if probe.is_cancelled() => {
                debug!(job_id = %job_id, "cancelled during promotion");
                JobOutcome::Cancelled
            }
            Ok(promoted) => JobOutcome::Completed {
                path: promoted.path,
                model_id: raw.model_id,
            },
            Err(_) if probe.is_cancelled() => {
                self.temp.discard(&raw.artifact);
                JobOutcome::Cancelled
            }
            Err(e) => {
                self.temp.discard(&raw.artifact);
                JobOutcome::Failed(ErrorInfo::from(&e))
            }
        }
    }
}

/// Owns every node's job state and dispatches generation work
pub struct Orchestrator {
    nodes: NodeTable,
    queue: MainThreadQueue<NodeTable>,
    runtime: Arc<Runtime>,
    registry: JobRegistry,
    cancel: Arc<CancellationToken>,
    credentials: Credentials,
    settings: OrchestratorSettings,
    status: StatusAggregator,
    workers: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(
        providers: ProviderSet,
        credentials: Credentials,
        settings: OrchestratorSettings,
    ) -> Result<Self> {
        let temp = TempArtifacts::new(&settings.temp_dir, settings.temp_capacity)?;
        let status = StatusAggregator::new();
        Ok(Self {
            nodes: NodeTable::new(settings.history_limit, status.clone()),
            queue: MainThreadQueue::new(),
            runtime: Arc::new(Runtime {
                client: ProviderClient::new(providers),
                temp,
                output_dir: settings.output_dir.clone(),
            }),
            registry: JobRegistry::new(settings.supersede_wait),
            cancel: CancellationToken::new(),
            credentials,
            settings,
            status,
            workers: Vec::new(),
        })
    }

    /// Build providers, credentials and settings from config
    pub fn from_config(config: &LoomConfig) -> Result<Self> {
        Self::new(
            ProviderSet::from_config(config)?,
            config.credentials(),
            OrchestratorSettings::from_config(config),
        )
    }

    pub fn providers(&self) -> &ProviderSet {
        self.runtime.client.providers()
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }

    /// Start generating for `job_id`, superseding any job already running there.
    ///
    /// Validation failures (`UnknownProvider`, `UnsupportedCapability`,
    /// `MissingCredential`, `InvalidParams`) and `AlreadyRunning` are returned
    /// here and leave the node's state untouched. Never waits on the network.
    pub fn start(&mut self, job_id: &JobId, request: GenerationRequest) -> Result<LeaseId> {
        let provider = self
            .providers()
            .get(&request.provider)
            .cloned()
            .ok_or_else(|| LoomError::UnknownProvider(request.provider.clone()))?;

        if !provider.supports(request.capability) {
            return Err(LoomError::UnsupportedCapability {
                provider: request.provider.clone(),
                capability: request.capability.to_string(),
            });
        }

        let credentials = request
            .credentials
            .unwrap_or_else(|| self.credentials.clone());
        if provider.requires_credential() && credentials.get(&request.provider).is_none() {
            return Err(LoomError::MissingCredential {
                provider: request.provider.clone(),
            });
        }

        let model = request
            .model
            .or_else(|| self.settings.default_models.get(&request.provider).cloned())
            .unwrap_or_else(|| provider.default_model(request.capability).to_string());
        let params = provider
            .schema(request.capability, &model)
            .resolve(&request.params)?;

        let spec = CallSpec {
            capability: request.capability,
            provider: request.provider.clone(),
            model: model.clone(),
            params,
            credentials,
            timeout: self.settings.timeout_for(&request.provider),
        };

        let lease = self.registry.acquire(job_id)?;
        let lease_id = lease.id();
        let probe = self.cancel.probe(lease.superseded_flag());
        self.spawn_worker(job_id, lease, spec, probe)?;

        let slot = self.nodes.slot_mut(job_id);
        slot.lease = Some(lease_id);
        slot.last_model_used = Some(model.clone());
        slot.state.begin(&request.provider, request.capability, &model);
        self.status.publish(job_id, JobStatus::Generating);

        info!(
            job_id = %job_id,
            lease = %lease_id,
            provider = %request.provider,
            capability = %request.capability,
            model = %model,
            "generation started"
        );
        Ok(lease_id)
    }

    fn spawn_worker(
        &mut self,
        job_id: &JobId,
        lease: Lease,
        spec: CallSpec,
        probe: CancelProbe,
    ) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        let handle: MainThreadHandle<NodeTable> = self.queue.handle();
        let job = job_id.clone();

        let worker = std::thread::Builder::new()
            .name(format!("loom-{}", job_id.slug()))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    runtime.run_job(&job, &spec, &probe)
                }))
                .unwrap_or_else(|_| {
                    JobOutcome::Failed(ErrorInfo {
                        kind: ErrorKind::Worker,
                        detail: "worker thread panicked".to_string(),
                    })
                });

                let lease_id = lease.id();
                let posted = handle.run_on_main(move |nodes: &mut NodeTable| {
                    nodes.finish(&job, lease_id, outcome)
                });
                if !posted {
                    debug!(lease = %lease_id, "orchestrator gone, outcome dropped");
                }
                drop(lease);
            })?;

        self.workers.push(worker);
        Ok(())
    }

    /// Cancel the running job for `job_id`. No-op unless it is generating.
    ///
    /// Cancellation is process-wide: every job in flight right now is
    /// cancelled, not only this one.
    pub fn cancel(&mut self, job_id: &JobId) -> bool {
        if self.job_status(job_id) != JobStatus::Generating {
            return false;
        }
        let epoch = self.cancel.cancel_all();
        info!(job_id = %job_id, epoch, "cancellation raised");
        true
    }

    /// Cancel every job in flight. Returns how many were generating.
    pub fn cancel_all(&mut self) -> usize {
        let active = self.status.active_count();
        let epoch = self.cancel.cancel_all();
        info!(active, epoch, "cancelling all jobs");
        active
    }

    /// Apply queued worker outcomes. Call from the owning thread's UI tick.
    pub fn pump(&mut self) -> usize {
        let applied = self.queue.run_pending(&mut self.nodes);
        self.reap_workers();
        applied
    }

    /// Pump until nothing is generating or `timeout` passes.
    /// `Duration::MAX` waits without a deadline.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            self.pump();
            if !self.nodes.any_generating() {
                return true;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    (deadline - now).min(IDLE_POLL)
                }
                None => IDLE_POLL,
            };
            self.queue.run_next_timeout(&mut self.nodes, slice);
        }
    }

    fn reap_workers(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) =
            self.workers.drain(..).partition(|w| w.is_finished());
        self.workers = running;
        for worker in finished {
            if worker.join().is_err() {
                warn!("worker thread panicked after reporting");
            }
        }
    }

    pub fn job_state(&self, job_id: &JobId) -> JobState {
        self.nodes
            .slots
            .get(job_id)
            .map(|s| s.state.clone())
            .unwrap_or_default()
    }

    pub fn job_status(&self, job_id: &JobId) -> JobStatus {
        self.nodes
            .slots
            .get(job_id)
            .map(|s| s.state.status)
            .unwrap_or_default()
    }

    /// Snapshot of every tracked node for redraw decisions
    pub fn poll_status(&self) -> BTreeMap<JobId, JobState> {
        self.nodes
            .slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.state.clone()))
            .collect()
    }

    pub fn any_active(&self) -> bool {
        self.status.any_active()
    }

    /// A handle other threads can poll cheaply
    pub fn status_handle(&self) -> StatusAggregator {
        self.status.clone()
    }

    pub fn history(&self, job_id: &JobId) -> Option<&History> {
        self.nodes.slots.get(job_id).map(|s| &s.history)
    }

    pub fn current_result(&self, job_id: &JobId) -> Option<ResultEntry> {
        self.history(job_id).and_then(|h| h.current().cloned())
    }

    pub fn navigate_history(&mut self, job_id: &JobId, delta: isize) -> Option<ResultEntry> {
        self.nodes
            .slots
            .get_mut(job_id)
            .and_then(|s| s.history.navigate(delta).cloned())
    }

    pub fn select_history(&mut self, job_id: &JobId, index: usize) -> Option<ResultEntry> {
        self.nodes
            .slots
            .get_mut(job_id)
            .and_then(|s| s.history.select(index).cloned())
    }

    pub fn clear_history(&mut self, job_id: &JobId) {
        if let Some(slot) = self.nodes.slots.get_mut(job_id) {
            slot.history.clear();
            slot.state.result = None;
        }
    }

    pub fn last_model_used(&self, job_id: &JobId) -> Option<&str> {
        self.nodes
            .slots
            .get(job_id)
            .and_then(|s| s.last_model_used.as_deref())
    }

    /// Drop all state for a node deleted in the host. A running job for it
    /// is told to stop and its outcome is discarded.
    pub fn forget_node(&mut self, job_id: &JobId) -> bool {
        let Some(slot) = self.nodes.slots.remove(job_id) else {
            return false;
        };
        if slot.lease.is_some() {
            self.registry.supersede(job_id);
        }
        self.status.forget(job_id);
        debug!(job_id = %job_id, "node forgotten");
        true
    }

    /// The node's persistable document
    pub fn save_node(&self, job_id: &JobId) -> NodeDocument {
        match self.nodes.slots.get(job_id) {
            Some(slot) => NodeDocument::from_history(&slot.history, slot.last_model_used.as_deref()),
            None => NodeDocument::default(),
        }
    }

    /// Restore a node's history from its document
    pub fn load_node(&mut self, job_id: &JobId, doc: &NodeDocument) {
        let history = doc.to_history(self.settings.history_limit);
        let slot = self.nodes.slot_mut(job_id);
        slot.state.result = history.current().cloned();
        slot.history = history;
        slot.last_model_used = doc.last_model_used.clone();
        if slot.lease.is_none() {
            self.status.publish(job_id, slot.state.status);
        }
    }

    /// Cancel everything, wait (bounded) for workers, apply their outcomes
    /// and delete leftover scratch files. Returns false if a worker was still
    /// running when `timeout` passed.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.cancel.cancel_all();
        let released = self.registry.wait_all_released(timeout);
        self.pump();
        let swept = self.runtime.temp.sweep();
        if released {
            info!(swept, "orchestrator shut down");
        } else {
            warn!(
                swept,
                running = self.registry.active_count(),
                "orchestrator shut down with workers still running"
            );
        }
        released
    }

    pub fn temp_artifacts(&self) -> &TempArtifacts {
        &self.runtime.temp
    }
}
