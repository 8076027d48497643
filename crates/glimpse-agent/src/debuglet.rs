//! Top-level control loop.
//!
//! The debuglet registers this process with the controller, long-polls the
//! active breakpoint list, reconciles it against local state, and reports
//! finalized breakpoints back. Everything runs on one cooperative context;
//! concurrency is the in-flight poll, the update POSTs, and timers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use glimpse_inspect::InspectorClient;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::api::DebugApi;
use crate::capture::CaptureOutcome;
use crate::config::AgentConfig;
use crate::controller::{ControllerClient, RegisterResponse};
use crate::error::{AgentError, AgentResult};
use crate::model::{Breakpoint, Debuggee, Reference, StatusMessage};
use crate::scanner::ScanResults;

pub const AGENT_VERSION: &str = concat!("glimpse-agent/v", env!("CARGO_PKG_VERSION"));

const UNSUPPORTED_ACTION: &str = "The only supported actions are CAPTURE/LOG";
const SNAPSHOT_EXPIRED: &str = "The snapshot has expired";
const CAPTURE_FAILED: &str = "Unable to capture state";

/// How often pending debugger events, finished captures, and expirations are
/// serviced while the long poll hangs.
const SERVICE_TICK: Duration = Duration::from_millis(250);
const REGISTER_BACKOFF_START: Duration = Duration::from_secs(1);
const REGISTER_BACKOFF_CAP: Duration = Duration::from_secs(600);
const DEFAULT_ACTIVE_PERIOD_SEC: u64 = 600;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebugletEvent {
    InitError(String),
    Registered(String),
    Disabled,
    Stopped,
}

/// Where the control loop currently is, for observers and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Init,
    Registered,
    Fetching,
    Updating,
    Stopped,
}

#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn stop(&self) {
        let _ = self.0.send(true);
    }
}

struct ActiveBreakpoint {
    breakpoint: Breakpoint,
    installed_at: Instant,
}

pub struct Debuglet<C: InspectorClient> {
    config: Arc<AgentConfig>,
    controller: ControllerClient,
    api: DebugApi<C>,
    debuggee: Debuggee,
    debuggee_id: Option<String>,
    active: HashMap<String, ActiveBreakpoint>,
    /// Ids that have received their one final update. Guards against
    /// re-reporting a breakpoint the controller still lists.
    finalized: HashSet<String>,
    last_update: HashMap<String, Instant>,
    state: State,
    completed_tx: mpsc::UnboundedSender<(String, CaptureOutcome)>,
    completed_rx: mpsc::UnboundedReceiver<(String, CaptureOutcome)>,
    events_tx: mpsc::UnboundedSender<DebugletEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<DebugletEvent>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<C: InspectorClient> Debuglet<C> {
    pub fn new(config: Arc<AgentConfig>, api: DebugApi<C>, scan: &ScanResults) -> Self {
        let controller =
            ControllerClient::new(config.controller_base_url.clone(), config.token.clone());
        let debuggee = build_debuggee(&config, scan);
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            controller,
            api,
            debuggee,
            debuggee_id: None,
            active: HashMap::new(),
            finalized: HashSet::new(),
            last_update: HashMap::new(),
            state: State::Init,
            completed_tx,
            completed_rx,
            events_tx,
            events_rx: Some(events_rx),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Observer channel; first call wins.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DebugletEvent>> {
        self.events_rx.take()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn debuggee(&self) -> &Debuggee {
        &self.debuggee
    }

    pub fn debuggee_id(&self) -> Option<&str> {
        self.debuggee_id.as_deref()
    }

    pub fn active_breakpoint(&self, id: &str) -> Option<&Breakpoint> {
        self.active.get(id).map(|entry| &entry.breakpoint)
    }

    pub fn is_finalized(&self, id: &str) -> bool {
        self.finalized.contains(id)
    }

    pub fn api(&self) -> &DebugApi<C> {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut DebugApi<C> {
        &mut self.api
    }

    fn emit(&self, event: DebugletEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Run until shut down. Registration failures back off and retry;
    /// fetch failures re-register; a missing project id stops immediately.
    pub async fn run(&mut self) -> AgentResult<()> {
        if !self.config.enabled {
            tracing::info!("agent disabled by configuration");
            self.state = State::Stopped;
            self.emit(DebugletEvent::Stopped);
            return Ok(());
        }
        if self.debuggee.project.is_empty() {
            self.emit(DebugletEvent::InitError(
                "project id could not be resolved".to_string(),
            ));
            self.state = State::Stopped;
            return Err(AgentError::ProjectUnresolved);
        }

        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let Some(registration) = self.register_with_backoff(&mut shutdown).await else {
                break;
            };

            if registration.debuggee.is_disabled {
                // Inactive: keep re-registering so re-enabling is noticed,
                // but fetch nothing.
                self.emit(DebugletEvent::Disabled);
                let period = registration
                    .active_period_sec
                    .unwrap_or(DEFAULT_ACTIVE_PERIOD_SEC);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(period)) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            self.fetch_loop(&mut shutdown).await;
        }

        self.state = State::Stopped;
        self.emit(DebugletEvent::Stopped);
        Ok(())
    }

    async fn register_with_backoff(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<RegisterResponse> {
        let mut delay = REGISTER_BACKOFF_START;
        loop {
            if *shutdown.borrow() {
                return None;
            }
            match self.register_once().await {
                Ok(response) => return Some(response),
                Err(err) => {
                    tracing::warn!(%err, "registration failed; backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return None,
                    }
                    delay = (delay * 2).min(REGISTER_BACKOFF_CAP);
                }
            }
        }
    }

    /// One registration round trip. Public so hosts and tests can drive the
    /// loop step by step.
    pub async fn register_once(&mut self) -> AgentResult<RegisterResponse> {
        let response = self.controller.register(&self.debuggee).await?;
        self.debuggee_id = Some(response.debuggee.id.clone());
        self.state = State::Registered;
        tracing::info!(id = %response.debuggee.id, "registered debuggee");
        self.emit(DebugletEvent::Registered(response.debuggee.id.clone()));
        Ok(response)
    }

    /// Long-poll and service timers until the list call fails (which sends
    /// us back to registration) or shutdown is requested.
    async fn fetch_loop(&mut self, shutdown: &mut watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(SERVICE_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                return;
            }
            let Some(debuggee_id) = self.debuggee_id.clone() else {
                return;
            };
            self.state = State::Fetching;
            let controller = self.controller.clone();
            let mut poll =
                std::pin::pin!(async move { controller.list_breakpoints(&debuggee_id).await });

            loop {
                tokio::select! {
                    result = &mut poll => {
                        match result {
                            Ok(response) => {
                                if !response.wait_expired {
                                    self.reconcile(response.breakpoints).await;
                                }
                            }
                            Err(err) => {
                                // Covers server-side session expiry: fall
                                // back to registration.
                                tracing::warn!(%err, "breakpoint fetch failed; re-registering");
                                return;
                            }
                        }
                        break;
                    }
                    _ = tick.tick() => {
                        self.pump().await;
                        self.sweep_expired().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One list round trip plus reconciliation, without the hang-and-retry
    /// wrapper. Step-by-step counterpart of `fetch_loop`.
    pub async fn poll_once(&mut self) -> AgentResult<()> {
        let Some(debuggee_id) = self.debuggee_id.clone() else {
            return Ok(());
        };
        self.state = State::Fetching;
        let response = self.controller.list_breakpoints(&debuggee_id).await?;
        if !response.wait_expired {
            self.reconcile(response.breakpoints).await;
        }
        Ok(())
    }

    /// Diff the server's list against local state: install what is new,
    /// quietly clear what went away.
    async fn reconcile(&mut self, server_list: Vec<Breakpoint>) {
        // Captures already in flight are reported before removals apply; a
        // server-side delete only affects subsequent hits.
        self.pump().await;

        let server_ids: HashSet<&str> = server_list.iter().map(|bp| bp.id.as_str()).collect();

        let removed: Vec<String> = self
            .active
            .keys()
            .filter(|id| !server_ids.contains(id.as_str()))
            .cloned()
            .collect();
        for id in removed {
            tracing::info!(%id, "breakpoint removed by server");
            if let Err(status) = self.api.clear(&id) {
                tracing::warn!(%id, status = %status.description.format, "clear failed");
            }
            self.active.remove(&id);
        }

        for breakpoint in server_list {
            if self.active.contains_key(&breakpoint.id) || self.finalized.contains(&breakpoint.id)
            {
                continue;
            }
            self.add_breakpoint(breakpoint).await;
        }
    }

    async fn add_breakpoint(&mut self, mut breakpoint: Breakpoint) {
        if !breakpoint.has_supported_action() {
            breakpoint.set_error(StatusMessage::error(
                Reference::Unspecified,
                UNSUPPORTED_ACTION,
            ));
            self.update_final(breakpoint).await;
            return;
        }

        if let Err(status) = self.api.set(&breakpoint, None) {
            breakpoint.set_error(status);
            self.update_final(breakpoint).await;
            return;
        }

        let id = breakpoint.id.clone();
        let listener = if breakpoint.is_logpoint() {
            let installed = Instant::now();
            let ttl = Duration::from_secs(self.config.breakpoint_expiration_sec);
            self.api.log(
                &id,
                Box::new(move |message: String| {
                    tracing::info!("LOGPOINT: {message}");
                }),
                Box::new(move || installed.elapsed() >= ttl),
            )
        } else {
            let tx = self.completed_tx.clone();
            let completed_id = id.clone();
            self.api.wait(
                &id,
                Box::new(move |outcome| {
                    let _ = tx.send((completed_id, outcome));
                }),
            )
        };
        if let Err(status) = listener {
            breakpoint.set_error(status);
            let _ = self.api.clear(&id);
            self.update_final(breakpoint).await;
            return;
        }

        self.active.insert(
            id,
            ActiveBreakpoint {
                breakpoint,
                installed_at: Instant::now(),
            },
        );
    }

    /// Service debugger pauses and any captures they completed.
    pub async fn pump(&mut self) {
        self.api.pump_events();
        while let Ok((id, outcome)) = self.completed_rx.try_recv() {
            self.finish_capture(id, outcome).await;
        }
    }

    async fn finish_capture(&mut self, id: String, outcome: CaptureOutcome) {
        let Some(entry) = self.active.remove(&id) else {
            return;
        };
        let mut breakpoint = entry.breakpoint;
        if outcome.stack_frames.is_empty() {
            breakpoint.set_error(StatusMessage::error(Reference::Unspecified, CAPTURE_FAILED));
        } else {
            breakpoint.stack_frames = outcome.stack_frames;
            breakpoint.variable_table = outcome.variable_table;
            breakpoint.evaluated_expressions = outcome.evaluated_expressions;
            breakpoint.is_final_state = true;
        }
        if let Err(status) = self.api.clear(&id) {
            tracing::debug!(%id, status = %status.description.format, "clear after capture");
        }
        self.update_final(breakpoint).await;
    }

    /// Expire breakpoints past their TTL: one final update, then the hook
    /// and local entry go away.
    pub async fn sweep_expired(&mut self) {
        let ttl = Duration::from_secs(self.config.breakpoint_expiration_sec);
        let expired: Vec<String> = self
            .active
            .iter()
            .filter(|(_, entry)| entry.installed_at.elapsed() >= ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            let Some(entry) = self.active.remove(&id) else {
                continue;
            };
            tracing::info!(%id, "breakpoint expired");
            let mut breakpoint = entry.breakpoint;
            breakpoint.set_error(StatusMessage::error(Reference::Unspecified, SNAPSHOT_EXPIRED));
            if let Err(status) = self.api.clear(&id) {
                tracing::debug!(%id, status = %status.description.format, "clear after expiry");
            }
            self.update_final(breakpoint).await;
        }
    }

    /// Send the one and only final update for a breakpoint. Respects the
    /// configured floor between updates for the same id; update failures are
    /// logged and dropped, never looped.
    async fn update_final(&mut self, mut breakpoint: Breakpoint) {
        if !self.finalized.insert(breakpoint.id.clone()) {
            return;
        }
        breakpoint.is_final_state = true;

        if let Some(last) = self.last_update.get(&breakpoint.id) {
            let min_gap = Duration::from_secs(self.config.breakpoint_update_interval_sec);
            let since = last.elapsed();
            if since < min_gap {
                tokio::time::sleep(min_gap - since).await;
            }
        }

        let Some(debuggee_id) = self.debuggee_id.clone() else {
            return;
        };
        self.state = State::Updating;
        self.last_update
            .insert(breakpoint.id.clone(), Instant::now());
        if let Err(err) = self
            .controller
            .update_breakpoint(&debuggee_id, &breakpoint)
            .await
        {
            // Better to forget than to loop; the breakpoint is already gone
            // locally.
            tracing::warn!(id = %breakpoint.id, %err, "dropping breakpoint update");
        }
        self.state = State::Fetching;
    }
}

fn build_debuggee(config: &AgentConfig, scan: &ScanResults) -> Debuggee {
    let project = config.project_id.clone().unwrap_or_default();
    let service = config
        .service_context
        .service
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let version = config.service_context.version.clone();

    let mut hasher = Sha256::new();
    hasher.update(project.as_bytes());
    hasher.update(service.as_bytes());
    hasher.update(version.as_deref().unwrap_or("").as_bytes());
    hasher.update(AGENT_VERSION.as_bytes());
    hasher.update(scan.tree_digest().as_bytes());
    if config.force_new_agent {
        // A fresh identity per process, instead of one per deployed tree.
        hasher.update(std::process::id().to_le_bytes());
    }
    let uniquifier = hex::encode(hasher.finalize());

    let description = match &version {
        Some(version) => format!("{service} version {version}"),
        None => service.clone(),
    };

    let mut labels = BTreeMap::new();
    labels.insert("module".to_string(), service);
    if let Some(version) = version {
        labels.insert("version".to_string(), version);
    }

    Debuggee {
        id: None,
        project,
        uniquifier,
        description,
        agent_version: AGENT_VERSION.to_string(),
        labels,
        source_contexts: None,
        status: None,
        is_disabled: false,
    }
}
