//! Lifecycle controller for one dev server instance.
//!
//! The controller owns the server's run state and is the only place that
//! changes it. Three contributors act on it concurrently:
//!
//! * the caller, through [`ServerController::start`], [`ServerController::stop`]
//!   and [`ServerController::publish`]
//! * the host's termination notification, through the observer registered
//!   on the launched process
//! * the [`StartupProber`] task, through its ready/exhausted callbacks
//!
//! All of them go through one mutex-guarded transition function. The stop
//! sequence flips the state to `Stopping` and takes the process, prober and
//! observer out of the run state in a single critical section, so teardown
//! happens once no matter how many stop requests race.

use crate::config::{Config, RuntimeConfig, ServerConfig, validate_config};
use crate::error::{Error, Result};
use crate::host::{LaunchFacility, LaunchMode, LaunchedProcess, Subscription};
use crate::launch::{DEV_SERVER_MAIN, build_launch_spec};
use crate::ports::{PortCheckConfig, is_port_in_use, probe_url};
use crate::prober::{Probe, ProbeExhaustion, ProberConfig, ProberHandle, StartupProber};
use crate::publish::{PUBLISH_LOCATIONS_FILE, PublishLocations};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use uuid::Uuid;

/// Unique identifier for a controller instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerId(Uuid);

impl ServerId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run state of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Server is stopped
    Stopped,
    /// Process launched, waiting for the server to answer
    Starting,
    /// Server answered its startup probe
    Started,
    /// Stop sequence in progress
    Stopping,
}

/// Whether modules need publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishState {
    /// Nothing to publish
    #[default]
    None,
    /// Changed resources need publishing
    Incremental,
    /// Everything needs publishing
    Full,
}

/// Kind of publish requested by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishKind {
    Incremental,
    Full,
    Auto,
    Clean,
}

/// What started a stop sequence, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopTrigger {
    Requested,
    ProcessTerminated,
    ProbeExhausted,
}

/// Mutable state of the current run.
struct RunState {
    state: ServerState,
    /// Bumped on every start so callbacks of an older run are ignored.
    generation: u64,
    mode: Option<LaunchMode>,
    process: Option<Box<dyn LaunchedProcess>>,
    observer: Option<Box<dyn Subscription>>,
    prober: Option<ProberHandle>,
    restart_required: bool,
    publish_state: PublishState,
}

struct Inner {
    id: ServerId,
    server: ServerConfig,
    runtime: Option<RuntimeConfig>,
    prober_config: ProberConfig,
    port_check: PortCheckConfig,
    launcher: Arc<dyn LaunchFacility>,
    probe: Arc<dyn Probe>,
    run: Mutex<RunState>,
    state_tx: watch::Sender<ServerState>,
}

/// Launches, supervises and stops one dev server.
///
/// Cloning gives another handle to the same controller.
///
/// # Examples
///
/// ```no_run
/// use devserver_runner::{Config, ServerController};
/// use devserver_runner::host::{LaunchMode, ProcessLauncher};
/// use devserver_runner::prober::HttpProbe;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> devserver_runner::Result<()> {
///     let config = Config::from_file("devserver.json")?;
///     let probe = Arc::new(HttpProbe::new(config.prober.request_timeout)?);
///     let controller = ServerController::new(config, Arc::new(ProcessLauncher::new()), probe)?;
///
///     controller.start(LaunchMode::Run).await?;
///     // ...
///     controller.stop(false);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ServerController {
    inner: Arc<Inner>,
}

impl fmt::Debug for ServerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerController")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl ServerController {
    /// Create a controller from a validated configuration.
    ///
    /// The launch facility and probe are the controller's only ways of
    /// reaching the host and the network.
    #[tracing::instrument(skip_all, fields(host = %config.server.host))]
    pub fn new(
        config: Config,
        launcher: Arc<dyn LaunchFacility>,
        probe: Arc<dyn Probe>,
    ) -> Result<Self> {
        validate_config(&config)?;
        let (state_tx, _) = watch::channel(ServerState::Stopped);
        let id = ServerId::new();
        tracing::info!(server_id = %id, "Creating dev server controller");

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                server: config.server,
                runtime: config.runtime,
                prober_config: config.prober,
                port_check: config.port_check,
                launcher,
                probe,
                run: Mutex::new(RunState {
                    state: ServerState::Stopped,
                    generation: 0,
                    mode: None,
                    process: None,
                    observer: None,
                    prober: None,
                    restart_required: false,
                    publish_state: PublishState::None,
                }),
                state_tx,
            }),
        })
    }

    /// Controller id used in log spans.
    pub fn id(&self) -> ServerId {
        self.inner.id
    }

    /// The server definition.
    pub fn server(&self) -> &ServerConfig {
        &self.inner.server
    }

    /// Current run state.
    pub fn state(&self) -> ServerState {
        self.inner.lock_run().state
    }

    /// Watch run state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.inner.state_tx.subscribe()
    }

    /// Mode of the current or last launch.
    pub fn mode(&self) -> Option<LaunchMode> {
        self.inner.lock_run().mode
    }

    /// OS process id of the running server, if any.
    pub fn pid(&self) -> Option<u32> {
        self.inner
            .lock_run()
            .process
            .as_ref()
            .and_then(|process| process.pid())
    }

    pub fn restart_required(&self) -> bool {
        self.inner.lock_run().restart_required
    }

    /// Flag that the running server must be restarted to pick up changes.
    pub fn set_restart_required(&self, required: bool) {
        self.inner.lock_run().restart_required = required;
    }

    pub fn publish_state(&self) -> PublishState {
        self.inner.lock_run().publish_state
    }

    pub fn set_publish_state(&self, state: PublishState) {
        self.inner.lock_run().publish_state = state;
    }

    /// Entry point class of the dev server.
    pub fn start_class_name(&self) -> &'static str {
        DEV_SERVER_MAIN
    }

    /// Base directory for runtime data of this server.
    pub fn runtime_base_directory(&self) -> &Path {
        &self.inner.server.state_directory
    }

    /// Directory a module is published to.
    pub fn module_deploy_directory(&self, module: &str) -> PathBuf {
        self.runtime_base_directory().join(module)
    }

    fn publish_locations_path(&self) -> PathBuf {
        self.runtime_base_directory().join(PUBLISH_LOCATIONS_FILE)
    }

    /// Module → publish URL mapping from the state directory.
    pub fn load_publish_locations(&self) -> PublishLocations {
        PublishLocations::load(self.publish_locations_path())
    }

    /// Persist the module → publish URL mapping. Failures are only logged.
    pub fn save_publish_locations(&self, locations: &PublishLocations) {
        locations.save(self.publish_locations_path());
    }

    /// Start the server.
    ///
    /// Returns as soon as the process is launched; the transition to
    /// `Started` happens later, when the startup probe succeeds.
    ///
    /// # Errors
    ///
    /// * [`Error::Configuration`] if no runtime or no valid SDK is bound
    /// * [`Error::AlreadyRunning`] if the server is not stopped
    /// * [`Error::PortUnavailable`] if a declared port is taken
    /// * [`Error::Launch`] if the host cannot launch the process
    ///
    /// The state is `Stopped` after any of these.
    #[tracing::instrument(skip(self), fields(server_id = %self.inner.id))]
    pub async fn start(&self, mode: LaunchMode) -> Result<()> {
        let inner = &self.inner;
        tracing::info!("Attempting to start server");

        let runtime = inner.runtime.as_ref().ok_or_else(|| {
            tracing::error!("No runtime is bound to the server");
            Error::Configuration("App Engine Server is misconfigured or invalid.".to_string())
        })?;
        runtime.sdk().map_err(|e| {
            tracing::error!(error = %e, "Bound runtime has no usable SDK");
            e
        })?;

        if inner.lock_run().state != ServerState::Stopped {
            tracing::warn!("Server is not stopped");
            return Err(Error::AlreadyRunning);
        }

        for port in &inner.server.ports {
            if is_port_in_use(port.port, &inner.port_check).await {
                tracing::error!(port = %port, "Cannot start server, port is not available");
                return Err(Error::PortUnavailable(port.port));
            }
        }

        let unresolved = inner.launcher.unresolved_classpath()?;
        let spec = build_launch_spec(&inner.server, Some(runtime), unresolved)?;
        let url = probe_url(
            &inner.server.host,
            inner.server.primary_port().unwrap_or_default(),
        );

        let generation = {
            let mut run = inner.lock_run();
            if run.state != ServerState::Stopped {
                tracing::warn!("Server was started concurrently");
                return Err(Error::AlreadyRunning);
            }
            run.generation += 1;
            run.restart_required = false;
            run.mode = Some(mode);
            inner.set_state(&mut run, ServerState::Starting);
            run.generation
        };

        let process = match inner.launcher.launch(spec.to_launch_configuration(mode)).await {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(error = %e, "Failed to launch server process");
                inner.abort_start(generation);
                return Err(e);
            }
        };

        let mut run = inner.lock_run();
        if run.generation != generation || run.state != ServerState::Starting {
            drop(run);
            tracing::warn!("Server was stopped while launching, terminating the new process");
            if let Err(e) = process.terminate() {
                tracing::error!(error = %e, "Error killing the process");
            }
            return Err(Error::Launch(
                "server was stopped while the launch was in flight".to_string(),
            ));
        }

        let weak = Arc::downgrade(&self.inner);
        run.observer = Some(process.subscribe(Box::new({
            let weak = Weak::clone(&weak);
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.run_stop_sequence(StopTrigger::ProcessTerminated, Some(generation));
                }
            }
        })));
        run.process = Some(process);

        let prober = StartupProber::new(url, inner.prober_config.clone(), Arc::clone(&inner.probe));
        tracing::debug!(url = %prober.url(), "Starting startup prober");
        run.prober = Some(prober.spawn(
            {
                let weak = Weak::clone(&weak);
                move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.mark_started(generation);
                    }
                }
            },
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_probe_exhausted(generation);
                }
            },
        ));

        tracing::info!(pid = ?run.process.as_ref().and_then(|p| p.pid()), "Server process launched");
        Ok(())
    }

    /// Stop the server.
    ///
    /// `force` is accepted for the host's benefit; both flavours terminate
    /// the process. Stopping a stopped server does nothing.
    #[tracing::instrument(skip(self), fields(server_id = %self.inner.id))]
    pub fn stop(&self, force: bool) {
        self.inner.run_stop_sequence(StopTrigger::Requested, None);
    }

    /// Publish the server's modules.
    ///
    /// Module deployment is handled elsewhere; this only clears the
    /// publish-pending flag, and does nothing without a bound runtime.
    #[tracing::instrument(skip(self), fields(server_id = %self.inner.id))]
    pub fn publish(&self, kind: PublishKind) {
        if self.inner.runtime.is_none() {
            tracing::debug!("No runtime bound, nothing to publish");
            return;
        }
        self.inner.lock_run().publish_state = PublishState::None;
    }
}

impl Inner {
    /// Lock the run state. A poisoned lock is recovered, the state machine
    /// stays consistent because every transition is a single assignment.
    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, run: &mut RunState, state: ServerState) {
        tracing::debug!(server_id = %self.id, from = ?run.state, to = ?state, "Server state change");
        run.state = state;
        self.state_tx.send_replace(state);
    }

    /// Revert a start whose launch failed.
    fn abort_start(&self, generation: u64) {
        let mut run = self.lock_run();
        if run.generation == generation && run.state == ServerState::Starting {
            self.set_state(&mut run, ServerState::Stopped);
        }
    }

    /// Prober callback: the server answered.
    fn mark_started(&self, generation: u64) {
        let mut run = self.lock_run();
        if run.generation != generation || run.state != ServerState::Starting {
            tracing::debug!(server_id = %self.id, state = ?run.state, "Ignoring stale startup notification");
            return;
        }
        self.set_state(&mut run, ServerState::Started);
        tracing::info!(server_id = %self.id, "Server started");
    }

    /// Prober callback: the server never answered.
    fn handle_probe_exhausted(&self, generation: u64) {
        match self.prober_config.on_exhausted {
            ProbeExhaustion::LogOnly => {
                tracing::warn!(server_id = %self.id, "Server did not answer, leaving it running");
            }
            ProbeExhaustion::Stop => {
                tracing::error!(server_id = %self.id, "Server did not answer, stopping it");
                self.run_stop_sequence(StopTrigger::ProbeExhausted, Some(generation));
            }
        }
    }

    /// Drive the server to `Stopped`.
    ///
    /// Only the caller that moves the state to `Stopping` tears anything
    /// down; every other caller returns immediately. `generation` restricts
    /// callbacks to the run that registered them.
    fn run_stop_sequence(&self, trigger: StopTrigger, generation: Option<u64>) {
        let (process, prober, observer) = {
            let mut run = self.lock_run();
            if generation.is_some_and(|g| g != run.generation) {
                tracing::debug!(server_id = %self.id, ?trigger, "Ignoring stop for an earlier run");
                return;
            }
            if matches!(run.state, ServerState::Stopped | ServerState::Stopping) {
                tracing::debug!(server_id = %self.id, ?trigger, state = ?run.state, "Server already stopped or stopping");
                return;
            }
            self.set_state(&mut run, ServerState::Stopping);
            (run.process.take(), run.prober.take(), run.observer.take())
        };

        tracing::info!(server_id = %self.id, ?trigger, "Stopping server");

        if let Some(process) = &process
            && !process.is_terminated()
            && let Err(e) = process.terminate()
        {
            tracing::error!(server_id = %self.id, error = %e, "Error killing the process");
        }
        if let Some(prober) = prober {
            tracing::debug!(server_id = %self.id, "Cancelling startup prober");
            prober.cancel();
        }
        if let Some(observer) = observer {
            observer.unsubscribe();
        }

        let mut run = self.lock_run();
        self.set_state(&mut run, ServerState::Stopped);
        tracing::info!(server_id = %self.id, "Server stopped");
    }
}
