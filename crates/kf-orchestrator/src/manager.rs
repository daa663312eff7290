//! Connection manager
//!
//! Owns the connection configs and their runtime state. Starting a
//! connection launches the forward leg, waits for it to settle, then brings
//! up the relay leg when one is configured. Each leg runs as its own
//! cancellable task so a slow connection never holds up the others.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use kf_core::cluster::{Namespace, Service};
use kf_core::config::Timings;
use kf_core::ipc::{ConnectionSnapshot, LogEntry};
use kf_core::{ConnectionConfig, ConnectionId, ConnectionStatus, ConnectionStore, ProcessRole};

use crate::discovery::{MetadataClient, ToolPaths};
use crate::error::{DiscoveryError, ManagerError, ProcessError};
use crate::notify::{Notifier, NotifyKind};
use crate::process::{sweep_patterns, Invocation, ProcessSupervisor, WrapperSpec};
use crate::state::{ConnectionState, TaskHandle};

/// Runtime settings of a [`ConnectionManager`]
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub timings: Timings,
    pub tools: ToolPaths,
    pub notifications_enabled: bool,
    /// Directory for direct-exec wrapper scripts (system temp dir if unset)
    pub script_dir: Option<PathBuf>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            timings: Timings::default(),
            tools: ToolPaths::default(),
            notifications_enabled: true,
            script_dir: None,
        }
    }
}

/// Orchestrates every configured tunnel
pub struct ConnectionManager {
    configs: RwLock<Vec<ConnectionConfig>>,
    pub(crate) states: Arc<DashMap<ConnectionId, ConnectionState>>,
    pub(crate) supervisor: ProcessSupervisor,
    store: ConnectionStore,
    discovery: Arc<dyn MetadataClient>,
    notifier: Arc<dyn Notifier>,
    notifications_enabled: bool,
    pub(crate) timings: Timings,
    tools: ToolPaths,
    killing: AtomicBool,
    monitor: StdMutex<Option<CancellationToken>>,
    op_locks: DashMap<ConnectionId, Arc<Mutex<()>>>,
    /// Keeps the in-memory list in the same order as the persisted one
    config_lock: Mutex<()>,
}

impl ConnectionManager {
    /// Load the persisted connections and build their runtime state
    pub async fn open(
        store: ConnectionStore,
        options: ManagerOptions,
        notifier: Arc<dyn Notifier>,
        discovery: Arc<dyn MetadataClient>,
    ) -> Result<Arc<Self>, ManagerError> {
        let configs = store.list().await?;

        let supervisor = match options.script_dir {
            Some(dir) => ProcessSupervisor::with_script_dir(dir),
            None => ProcessSupervisor::new(),
        };

        let manager = Arc::new(Self {
            configs: RwLock::new(Vec::new()),
            states: Arc::new(DashMap::new()),
            supervisor,
            store,
            discovery,
            notifier,
            notifications_enabled: options.notifications_enabled,
            timings: options.timings,
            tools: options.tools,
            killing: AtomicBool::new(false),
            monitor: StdMutex::new(None),
            op_locks: DashMap::new(),
            config_lock: Mutex::new(()),
        });

        for config in &configs {
            manager.states.insert(config.id, ConnectionState::new());
            manager.register_handlers(config);
        }
        tracing::info!(count = configs.len(), "Loaded connections");
        *manager.write_configs() = configs;

        Ok(manager)
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    pub fn configs(&self) -> Vec<ConnectionConfig> {
        self.read_configs().clone()
    }

    pub fn config(&self, id: ConnectionId) -> Option<ConnectionConfig> {
        self.read_configs().iter().find(|c| c.id == id).cloned()
    }

    fn require(&self, id: ConnectionId) -> Result<ConnectionConfig, ManagerError> {
        self.config(id).ok_or(ManagerError::NotFound(id))
    }

    /// Persist and register a new connection; it is not started
    pub async fn add(&self, config: ConnectionConfig) -> Result<(), ManagerError> {
        let _config_guard = self.config_lock.lock().await;
        self.store.add(config.clone()).await?;

        self.states.insert(config.id, ConnectionState::new());
        self.register_handlers(&config);
        tracing::info!(connection_id = %config.id, name = %config.name, "Added connection");
        self.write_configs().push(config);

        Ok(())
    }

    /// Stop, then forget a connection
    pub async fn remove(&self, id: ConnectionId) -> Result<(), ManagerError> {
        self.require(id)?;

        {
            let lock = self.op_lock(id);
            let _guard = lock.lock().await;
            self.stop_locked(id).await;

            let _config_guard = self.config_lock.lock().await;
            self.store.remove(id).await?;
            self.write_configs().retain(|c| c.id != id);
        }

        self.states.remove(&id);
        self.supervisor.handlers().unregister(id);
        self.op_locks.remove(&id);

        tracing::info!(connection_id = %id, "Removed connection");
        Ok(())
    }

    /// Replace a connection's config
    ///
    /// A connected connection is stopped first and restarted only if it is
    /// still enabled. A stopped one stays stopped.
    pub async fn update(self: &Arc<Self>, config: ConnectionConfig) -> Result<(), ManagerError> {
        let id = config.id;
        self.require(id)?;
        {
            let _config_guard = self.config_lock.lock().await;
            self.store.update(config.clone()).await?;
        }

        let lock = self.op_lock(id);
        let _guard = lock.lock().await;

        let was_connected = self
            .with_state(id, |s| {
                s.forward_status == ConnectionStatus::Connected
                    || s.relay_status == ConnectionStatus::Connected
            })
            .unwrap_or(false);

        if was_connected {
            self.stop_locked(id).await;
        }

        self.replace_config(config.clone());
        self.register_handlers(&config);
        tracing::info!(connection_id = %id, name = %config.name, "Updated connection");

        if was_connected && config.is_enabled {
            self.start_locked(id).await?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Launch a connection's processes
    ///
    /// Returns once the first process is spawned; the legs settle in the
    /// background. Ignored while a kill sweep is running. A missing tool
    /// fails the start and leaves the connection stopped, so reconciliation
    /// does not retry it.
    pub async fn start(self: &Arc<Self>, id: ConnectionId) -> Result<(), ManagerError> {
        let lock = self.op_lock(id);
        let _guard = lock.lock().await;
        self.start_locked(id).await
    }

    pub(crate) async fn start_locked(self: &Arc<Self>, id: ConnectionId) -> Result<(), ManagerError> {
        if self.is_killing() {
            tracing::debug!(connection_id = %id, "Kill sweep in progress, start ignored");
            return Ok(());
        }

        let config = self.require(id)?;

        self.with_state(id, |s| {
            s.cancel_tasks();
            s.stopped = false;
            s.repair_pending = false;
        });

        let Some(kubectl) = self.tools.kubectl.clone() else {
            let err = ProcessError::ToolNotFound("kubectl".to_string());
            tracing::error!(connection_id = %id, "{}", err);
            self.with_state(id, |s| {
                s.fail(ProcessRole::Forward, err.to_string());
                s.stopped = true;
            });
            return Err(err.into());
        };

        if config.use_direct_exec {
            return self.start_direct_exec(config, kubectl).await;
        }

        self.with_state(id, |s| {
            s.forward_status = ConnectionStatus::Connecting;
            s.relay_status = ConnectionStatus::Disconnected;
            s.log(
                ProcessRole::Forward,
                false,
                format!(
                    "Starting port-forward {} {}:{}",
                    config.target(),
                    config.local_port,
                    config.remote_port
                ),
            );
        });

        let invocation = Invocation::port_forward(&kubectl, &config);
        if let Err(e) = self.supervisor.start(ProcessRole::Forward, id, &invocation) {
            tracing::error!(connection_id = %id, "{}", e);
            self.with_state(id, |s| s.fail(ProcessRole::Forward, e.to_string()));
            return Err(e.into());
        }

        let manager = Arc::clone(self);
        let handle =
            TaskHandle::spawn(move |cancel| async move { manager.run_forward_leg(config, cancel).await });
        self.with_state(id, |s| s.set_task(ProcessRole::Forward, handle));

        Ok(())
    }

    async fn run_forward_leg(self: Arc<Self>, config: ConnectionConfig, cancel: CancellationToken) {
        let id = config.id;
        if !settle(&cancel, self.timings.forward_settle).await {
            return;
        }

        let alive = self.supervisor.is_running(id, ProcessRole::Forward);
        let connected = self
            .with_state(id, |s| {
                if cancel.is_cancelled() {
                    return false;
                }
                if alive {
                    s.forward_status = ConnectionStatus::Connected;
                    s.last_error = None;
                    s.log(
                        ProcessRole::Forward,
                        false,
                        format!("Forwarding localhost:{} -> {}", config.local_port, config.target()),
                    );
                } else {
                    s.fail(ProcessRole::Forward, "Process terminated");
                }
                alive
            })
            .unwrap_or(false);

        if !connected {
            if !alive {
                tracing::warn!(connection_id = %id, "Port-forward exited during startup");
            }
            return;
        }

        tracing::info!(connection_id = %id, port = config.local_port, "Port-forward connected");
        self.notify_connected(&config);

        if let Some(relay_port) = config.relay_port {
            self.launch_relay(&config, relay_port, Some(&cancel));
        }
    }

    /// Start only the relay leg, leaving the forward leg alone
    ///
    /// Does nothing once the connection is stopped or `owner` (the task
    /// asking for the relay) is cancelled. A stop that lands while the relay
    /// is spawning is caught afterwards and the new process is killed.
    pub(crate) fn launch_relay(
        self: &Arc<Self>,
        config: &ConnectionConfig,
        relay_port: u16,
        owner: Option<&CancellationToken>,
    ) {
        let id = config.id;

        let Some(socat) = self.tools.socat.clone() else {
            let err = ProcessError::ToolNotFound("socat".to_string());
            tracing::error!(connection_id = %id, "{}", err);
            self.with_state(id, |s| {
                if !relay_abandoned(s, owner) {
                    s.fail(ProcessRole::Relay, err.to_string());
                }
            });
            return;
        };

        let proceed = self
            .with_state(id, |s| {
                if relay_abandoned(s, owner) {
                    return false;
                }
                s.relay_status = ConnectionStatus::Connecting;
                s.log(
                    ProcessRole::Relay,
                    false,
                    format!("Starting relay :{} -> :{}", relay_port, config.local_port),
                );
                true
            })
            .unwrap_or(false);
        if !proceed {
            tracing::debug!(connection_id = %id, "Connection stopped, relay not launched");
            return;
        }

        let invocation = Invocation::relay(&socat, relay_port, config.local_port);
        if let Err(e) = self.supervisor.start(ProcessRole::Relay, id, &invocation) {
            tracing::error!(connection_id = %id, "{}", e);
            self.with_state(id, |s| s.fail(ProcessRole::Relay, e.to_string()));
            return;
        }

        let manager = Arc::clone(self);
        let handle = TaskHandle::spawn(move |cancel| async move {
            manager.run_relay_leg(id, relay_port, cancel).await
        });

        let kept = self
            .with_state(id, |s| {
                if relay_abandoned(s, owner) {
                    handle.cancel();
                    return false;
                }
                s.set_task(ProcessRole::Relay, handle);
                true
            })
            .unwrap_or(false);
        if !kept {
            tracing::debug!(connection_id = %id, "Connection stopped while relay was starting");
            self.supervisor.kill_role(id, ProcessRole::Relay);
        }
    }

    async fn run_relay_leg(self: Arc<Self>, id: ConnectionId, relay_port: u16, cancel: CancellationToken) {
        if !settle(&cancel, self.timings.relay_settle).await {
            return;
        }

        let alive = self.supervisor.is_running(id, ProcessRole::Relay);
        self.with_state(id, |s| {
            if cancel.is_cancelled() {
                return;
            }
            if alive {
                s.relay_status = ConnectionStatus::Connected;
                s.log(ProcessRole::Relay, false, format!("Relay listening on port {}", relay_port));
            } else {
                s.fail(ProcessRole::Relay, "Relay process terminated");
            }
        });

        if alive {
            tracing::info!(connection_id = %id, port = relay_port, "Relay connected");
        } else {
            tracing::warn!(connection_id = %id, port = relay_port, "Relay exited during startup");
        }
    }

    /// Direct-exec mode has no persistent forward process; the forward
    /// status mirrors the relay.
    async fn start_direct_exec(
        self: &Arc<Self>,
        config: ConnectionConfig,
        kubectl: PathBuf,
    ) -> Result<(), ManagerError> {
        let id = config.id;

        let Some(socat) = self.tools.socat.clone() else {
            let err = ProcessError::ToolNotFound("socat".to_string());
            tracing::error!(connection_id = %id, "{}", err);
            self.with_state(id, |s| {
                s.fail(ProcessRole::Relay, err.to_string());
                s.forward_status = ConnectionStatus::Error;
                s.stopped = true;
            });
            return Err(err.into());
        };

        let port = config.effective_port();
        self.with_state(id, |s| {
            s.set_both(ConnectionStatus::Connecting);
            s.log(
                ProcessRole::Relay,
                false,
                format!("Starting direct-exec relay on port {} for {}", port, config.target()),
            );
        });

        let spec = WrapperSpec {
            kubectl: &kubectl,
            socat: &socat,
            namespace: &config.namespace,
            service: &config.service,
            remote_port: config.remote_port,
        };
        if let Err(e) = self.supervisor.start_direct_exec(id, &spec, port).await {
            tracing::error!(connection_id = %id, "{}", e);
            self.with_state(id, |s| {
                s.fail(ProcessRole::Relay, e.to_string());
                s.forward_status = ConnectionStatus::Error;
            });
            return Err(e.into());
        }

        let manager = Arc::clone(self);
        let handle = TaskHandle::spawn(move |cancel| async move {
            manager.run_direct_exec_leg(config, cancel).await
        });
        self.with_state(id, |s| s.set_task(ProcessRole::Relay, handle));

        Ok(())
    }

    async fn run_direct_exec_leg(self: Arc<Self>, config: ConnectionConfig, cancel: CancellationToken) {
        let id = config.id;
        if !settle(&cancel, self.timings.relay_settle).await {
            return;
        }

        let alive = self.supervisor.is_running(id, ProcessRole::Relay);
        let connected = self
            .with_state(id, |s| {
                if cancel.is_cancelled() {
                    return false;
                }
                if alive {
                    s.set_both(ConnectionStatus::Connected);
                    s.last_error = None;
                    s.log(
                        ProcessRole::Relay,
                        false,
                        format!("Direct-exec relay listening on port {}", config.effective_port()),
                    );
                } else {
                    s.fail(ProcessRole::Relay, "Relay process terminated");
                    s.forward_status = ConnectionStatus::Error;
                }
                alive
            })
            .unwrap_or(false);

        if connected {
            tracing::info!(connection_id = %id, port = config.effective_port(), "Direct-exec relay connected");
            self.notify_connected(&config);
        }
    }

    /// Cancel both legs and kill the processes; safe to repeat
    pub async fn stop(&self, id: ConnectionId) -> Result<(), ManagerError> {
        self.require(id)?;
        let lock = self.op_lock(id);
        let _guard = lock.lock().await;
        self.stop_locked(id).await;
        Ok(())
    }

    pub(crate) async fn stop_locked(&self, id: ConnectionId) {
        let was_active = self
            .with_state(id, |s| {
                let active = s.forward_status != ConnectionStatus::Disconnected
                    || s.relay_status != ConnectionStatus::Disconnected;
                s.cancel_tasks();
                s.set_both(ConnectionStatus::Disconnected);
                s.stopped = true;
                s.repair_pending = false;
                if active {
                    s.log(ProcessRole::Forward, false, "Stopped");
                }
                active
            })
            .unwrap_or(false);

        self.supervisor.kill(id).await;

        if was_active {
            tracing::info!(connection_id = %id, "Connection stopped");
        }
    }

    /// Stop, pause for the restart delay, start
    pub async fn restart(self: &Arc<Self>, id: ConnectionId) -> Result<(), ManagerError> {
        self.require(id)?;
        let lock = self.op_lock(id);
        let _guard = lock.lock().await;

        self.stop_locked(id).await;
        tokio::time::sleep(self.timings.restart_delay).await;
        self.start_locked(id).await
    }

    /// Start every enabled connection that is not already up, then begin
    /// monitoring. Returns how many were started.
    pub async fn start_all(self: &Arc<Self>) -> usize {
        let mut started = 0;

        for config in self.configs().into_iter().filter(|c| c.is_enabled) {
            let active = self
                .with_state(config.id, |s| {
                    matches!(
                        s.forward_status,
                        ConnectionStatus::Connected | ConnectionStatus::Connecting
                    ) || matches!(
                        s.relay_status,
                        ConnectionStatus::Connected | ConnectionStatus::Connecting
                    )
                })
                .unwrap_or(false);
            if active {
                continue;
            }

            match self.start(config.id).await {
                Ok(()) => started += 1,
                Err(e) => tracing::warn!(connection_id = %config.id, "Failed to start: {}", e),
            }
        }

        self.start_monitoring();
        started
    }

    pub async fn stop_all(&self) {
        for config in self.configs() {
            let lock = self.op_lock(config.id);
            let _guard = lock.lock().await;
            self.stop_locked(config.id).await;
        }
    }

    /// Last-resort cleanup: kill every forward and relay process on the system
    ///
    /// Starts and reconciliation are suppressed until it finishes. Every
    /// connection ends up disconnected.
    pub async fn kill_stuck_processes(&self) {
        if self.killing.swap(true, Ordering::SeqCst) {
            tracing::debug!("Kill sweep already running");
            return;
        }
        tracing::warn!("Killing all port-forward and relay processes");

        for mut state in self.states.iter_mut() {
            state.cancel_tasks();
        }

        tokio::time::sleep(self.timings.kill_settle).await;

        let kubectl = self.tools.kubectl.as_deref().unwrap_or(Path::new("kubectl"));
        let socat = self.tools.socat.as_deref().unwrap_or(Path::new("socat"));
        self.supervisor
            .kill_all_managed_kind(&sweep_patterns(kubectl, socat))
            .await;

        for mut state in self.states.iter_mut() {
            state.cancel_tasks();
            state.set_both(ConnectionStatus::Disconnected);
            state.stopped = true;
            state.repair_pending = false;
            state.log(ProcessRole::Forward, false, "Killed by process sweep");
        }

        self.killing.store(false, Ordering::SeqCst);
        tracing::info!("Process sweep complete");
    }

    /// Kill whatever holds local `port`, typically to clear a reported
    /// port conflict. Only ever done on request.
    pub async fn free_port(&self, port: u16) -> Result<usize, ManagerError> {
        let killed = self.supervisor.kill_process_on_port(port).await?;

        for config in self.configs() {
            if config.local_port == port || config.relay_port == Some(port) {
                self.with_state(config.id, |s| {
                    s.log(
                        ProcessRole::Forward,
                        false,
                        format!("Freed port {} ({} process(es) killed)", port, killed),
                    )
                });
            }
        }

        tracing::info!(port, killed, "Freed port");
        Ok(killed)
    }

    pub fn is_killing(&self) -> bool {
        self.killing.load(Ordering::SeqCst)
    }

    /// Stop monitoring and every connection
    pub async fn shutdown(&self) {
        self.stop_monitoring();
        self.stop_all().await;
    }

    // ------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------

    /// Begin the periodic reconciliation loop (no-op if already running)
    pub fn start_monitoring(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        *monitor = Some(cancel.clone());

        tracing::info!(period_ms = self.timings.tick_interval.as_millis() as u64, "Monitoring started");
        tokio::spawn(crate::reconcile::run_monitor(
            Arc::downgrade(self),
            self.timings.tick_interval,
            cancel,
        ));
    }

    pub fn stop_monitoring(&self) {
        let token = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
            tracing::info!("Monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn snapshot(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        let config = self.config(id)?;
        self.snapshot_of(config)
    }

    /// Snapshots in configuration order
    pub fn snapshots(&self) -> Vec<ConnectionSnapshot> {
        self.configs()
            .into_iter()
            .filter_map(|config| self.snapshot_of(config))
            .collect()
    }

    fn snapshot_of(&self, config: ConnectionConfig) -> Option<ConnectionSnapshot> {
        let state = self.states.get(&config.id)?;
        Some(ConnectionSnapshot {
            forward_status: state.forward_status,
            relay_status: state.relay_status,
            last_error: state.last_error.clone(),
            log_count: state.logs.len(),
            config,
        })
    }

    /// `(forward, relay)` statuses
    pub fn status(&self, id: ConnectionId) -> Option<(ConnectionStatus, ConnectionStatus)> {
        self.states
            .get(&id)
            .map(|s| (s.forward_status, s.relay_status))
    }

    pub fn last_error(&self, id: ConnectionId) -> Option<String> {
        self.states.get(&id).and_then(|s| s.last_error.clone())
    }

    pub fn logs(&self, id: ConnectionId, limit: Option<usize>) -> Result<Vec<LogEntry>, ManagerError> {
        self.states
            .get(&id)
            .map(|s| s.logs.recent(limit))
            .ok_or(ManagerError::NotFound(id))
    }

    pub fn clear_logs(&self, id: ConnectionId) -> Result<(), ManagerError> {
        self.with_state(id, |s| s.logs.clear())
            .ok_or(ManagerError::NotFound(id))
    }

    pub fn is_running(&self, id: ConnectionId, role: ProcessRole) -> bool {
        self.supervisor.is_running(id, role)
    }

    /// Supervising tasks held across all connections
    pub fn task_count(&self) -> usize {
        self.states.iter().map(|s| s.task_count()).sum()
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    pub async fn fetch_namespaces(&self) -> Result<Vec<Namespace>, DiscoveryError> {
        self.discovery.fetch_namespaces().await
    }

    pub async fn fetch_services(&self, namespace: &str) -> Result<Vec<Service>, DiscoveryError> {
        self.discovery.fetch_services(namespace).await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    pub(crate) fn with_state<R>(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut ConnectionState) -> R,
    ) -> Option<R> {
        self.states.get_mut(&id).map(|mut state| f(&mut state))
    }

    pub(crate) fn op_lock(&self, id: ConnectionId) -> Arc<Mutex<()>> {
        Arc::clone(self.op_locks.entry(id).or_default().value())
    }

    fn replace_config(&self, config: ConnectionConfig) {
        let mut configs = self.write_configs();
        if let Some(existing) = configs.iter_mut().find(|c| c.id == config.id) {
            *existing = config;
        }
    }

    fn read_configs(&self) -> RwLockReadGuard<'_, Vec<ConnectionConfig>> {
        self.configs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_configs(&self) -> RwLockWriteGuard<'_, Vec<ConnectionConfig>> {
        self.configs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route process output into the connection's log and conflict reporting
    fn register_handlers(&self, config: &ConnectionConfig) {
        let id = config.id;
        let handlers = self.supervisor.handlers();

        let states = Arc::clone(&self.states);
        handlers.register_log(
            id,
            Arc::new(move |line, role, is_error| {
                tracing::debug!(connection_id = %id, %role, is_error, "{}", line);
                if let Some(mut state) = states.get_mut(&id) {
                    state.logs.push(LogEntry::new(line, role, is_error));
                }
            }),
        );

        let states = Arc::clone(&self.states);
        let notifier = Arc::clone(&self.notifier);
        let notify = self.notifications_enabled;
        let name = config.name.clone();
        handlers.register_conflict(
            id,
            Arc::new(move |port| {
                let message = format!("Port {} is already in use", port);
                tracing::warn!(connection_id = %id, port, "{}", message);
                if let Some(mut state) = states.get_mut(&id) {
                    state.last_error = Some(message.clone());
                }
                if notify {
                    notifier.notify(NotifyKind::Error, &format!("{}: port conflict", name), &message);
                }
            }),
        );
    }

    fn notify_connected(&self, config: &ConnectionConfig) {
        if self.notifications_enabled && config.notify_on_connect {
            self.notifier.notify(
                NotifyKind::Info,
                "Port forward connected",
                &format!(
                    "{} ({}) on localhost:{}",
                    config.name,
                    config.target(),
                    config.effective_port()
                ),
            );
        }
    }

    pub(crate) fn notify_disconnected(&self, config: &ConnectionConfig, reason: &str) {
        if self.notifications_enabled && config.notify_on_disconnect {
            self.notifier.notify(
                NotifyKind::Error,
                "Port forward disconnected",
                &format!("{} ({}): {}", config.name, config.target(), reason),
            );
        }
    }
}

fn relay_abandoned(state: &ConnectionState, owner: Option<&CancellationToken>) -> bool {
    state.stopped || owner.is_some_and(CancellationToken::is_cancelled)
}

/// Wait out a settle delay; false if cancelled first
async fn settle(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
