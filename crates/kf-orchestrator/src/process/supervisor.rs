//! Subprocess supervisor
//!
//! Owns every forward and relay process, keyed by connection and role.
//! Output from each process is read line by line on background tasks,
//! classified, and handed to the handlers registered for the connection.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kf_core::{ConnectionId, ProcessRole};

use super::classifier::classify_line;
use super::command::Invocation;
use super::wrapper::{self, WrapperSpec};
use crate::error::ProcessError;

/// Buffered lines per process before readers wait on the consumer
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Time between SIGTERM and SIGKILL when freeing a port
#[cfg(unix)]
const PORT_KILL_GRACE: Duration = Duration::from_millis(300);

/// Receives every non-empty output line: `(line, role, is_error)`
pub type LogHandler = Arc<dyn Fn(&str, ProcessRole, bool) + Send + Sync>;

/// Receives the port named in an "address already in use" line
pub type ConflictHandler = Arc<dyn Fn(u16) + Send + Sync>;

/// Per-connection output handlers
#[derive(Default)]
pub struct HandlerRegistry {
    log: DashMap<ConnectionId, LogHandler>,
    conflict: DashMap<ConnectionId, ConflictHandler>,
}

impl HandlerRegistry {
    pub fn register_log(&self, id: ConnectionId, handler: LogHandler) {
        self.log.insert(id, handler);
    }

    pub fn register_conflict(&self, id: ConnectionId, handler: ConflictHandler) {
        self.conflict.insert(id, handler);
    }

    pub fn unregister(&self, id: ConnectionId) {
        self.log.remove(&id);
        self.conflict.remove(&id);
    }

    // Handlers are cloned out so no map guard is held while they run.
    fn log_handler(&self, id: ConnectionId) -> Option<LogHandler> {
        self.log.get(&id).map(|h| Arc::clone(h.value()))
    }

    fn conflict_handler(&self, id: ConnectionId) -> Option<ConflictHandler> {
        self.conflict.get(&id).map(|h| Arc::clone(h.value()))
    }
}

/// State shared with the output-reading tasks
#[derive(Default)]
struct Shared {
    errors: DashMap<ConnectionId, Instant>,
    handlers: HandlerRegistry,
}

impl Shared {
    fn handle_line(&self, id: ConnectionId, role: ProcessRole, line: &str) {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return;
        }

        let class = classify_line(line);
        if class.is_error {
            self.errors.insert(id, Instant::now());
        }

        if let Some(port) = class.conflict_port {
            tracing::debug!(connection_id = %id, %role, port, "Port conflict in output");
            if let Some(handler) = self.handlers.conflict_handler(id) {
                handler(port);
            }
        }

        if let Some(handler) = self.handlers.log_handler(id) {
            handler(line, role, class.is_error);
        }
    }
}

struct ManagedProcess {
    child: Child,
    pid: Option<u32>,
    readers: CancellationToken,
}

impl ManagedProcess {
    /// Stop reading output and kill the process (and its group on unix)
    fn terminate(mut self) {
        self.readers.cancel();

        // The child leads its own process group; take forked helpers with it.
        // A reaped child's pid may already belong to someone else.
        #[cfg(unix)]
        if let (Some(pid), Ok(None)) = (self.pid, self.child.try_wait()) {
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }

        let _ = self.child.start_kill();

        // Reap in the background so the caller never waits on exit.
        tokio::spawn(async move {
            let _ = self.child.wait().await;
        });
    }
}

/// Identifies a launched process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub id: ConnectionId,
    pub role: ProcessRole,
    pub pid: Option<u32>,
}

/// Owner of all forward and relay processes
pub struct ProcessSupervisor {
    processes: DashMap<(ConnectionId, ProcessRole), ManagedProcess>,
    scripts: DashMap<ConnectionId, PathBuf>,
    shared: Arc<Shared>,
    script_dir: PathBuf,
}

impl ProcessSupervisor {
    /// Supervisor writing wrapper scripts to the system temp dir
    pub fn new() -> Self {
        Self::with_script_dir(std::env::temp_dir())
    }

    pub fn with_script_dir(script_dir: PathBuf) -> Self {
        Self {
            processes: DashMap::new(),
            scripts: DashMap::new(),
            shared: Arc::new(Shared::default()),
            script_dir,
        }
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.shared.handlers
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    /// Launch a process for `(id, role)`, replacing any existing one
    ///
    /// Returns once the process is spawned; readiness is up to the caller.
    pub fn start(
        &self,
        role: ProcessRole,
        id: ConnectionId,
        invocation: &Invocation,
    ) -> Result<ProcessHandle, ProcessError> {
        if let Some((_, old)) = self.processes.remove(&(id, role)) {
            tracing::debug!(connection_id = %id, %role, "Replacing running process");
            old.terminate();
        }

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| ProcessError::LaunchFailed {
            program: invocation.program_name(),
            source,
        })?;

        let pid = child.id();
        let readers = CancellationToken::new();
        let (line_tx, mut line_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);

        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, line_tx.clone(), readers.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, line_tx, readers.clone());
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                shared.handle_line(id, role, &line);
            }
        });

        tracing::info!(connection_id = %id, %role, pid, "Launched {}", invocation);

        self.processes.insert(
            (id, role),
            ManagedProcess {
                child,
                pid,
                readers,
            },
        );

        Ok(ProcessHandle { id, role, pid })
    }

    /// Write the connection's wrapper script and launch the relay that execs it
    pub async fn start_direct_exec(
        &self,
        id: ConnectionId,
        spec: &WrapperSpec<'_>,
        listen_port: u16,
    ) -> Result<ProcessHandle, ProcessError> {
        let path = wrapper::script_path(&self.script_dir, id);
        wrapper::write_script(&path, &wrapper::render(spec)).await?;
        self.scripts.insert(id, path.clone());

        let invocation = Invocation::relay_exec(spec.socat, listen_port, &path);
        self.start(ProcessRole::Relay, id, &invocation)
    }

    /// Whether the OS process for `(id, role)` is still alive
    pub fn is_running(&self, id: ConnectionId, role: ProcessRole) -> bool {
        let Some(mut entry) = self.processes.get_mut(&(id, role)) else {
            return false;
        };
        matches!(entry.child.try_wait(), Ok(None))
    }

    pub fn pid(&self, id: ConnectionId, role: ProcessRole) -> Option<u32> {
        self.processes.get(&(id, role)).and_then(|entry| entry.pid)
    }

    /// Number of tracked processes
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Terminate everything owned by `id` and drop its bookkeeping
    ///
    /// Safe to call for a connection with nothing running.
    pub async fn kill(&self, id: ConnectionId) {
        for role in [ProcessRole::Forward, ProcessRole::Relay] {
            self.kill_role(id, role);
        }

        let script = self
            .scripts
            .remove(&id)
            .map(|(_, path)| path)
            .unwrap_or_else(|| wrapper::script_path(&self.script_dir, id));

        if tokio::fs::try_exists(&script).await.unwrap_or(false) {
            // Forked per-client wrappers are not our children; match them by path.
            pkill(&["-f", &script.to_string_lossy()]).await;
            if let Err(e) = tokio::fs::remove_file(&script).await {
                tracing::debug!(connection_id = %id, "Failed to remove wrapper script: {}", e);
            }
        }

        self.shared.errors.remove(&id);
    }

    /// Terminate one process of `id`, leaving the other role running
    pub fn kill_role(&self, id: ConnectionId, role: ProcessRole) {
        if let Some((_, process)) = self.processes.remove(&(id, role)) {
            tracing::debug!(connection_id = %id, %role, pid = process.pid, "Killing process");
            process.terminate();
        }
    }

    /// Kill every forward and relay process on the machine
    ///
    /// Matches processes this instance did not launch. Clears all
    /// bookkeeping and removes every wrapper script.
    pub async fn kill_all_managed_kind(&self, patterns: &[String]) {
        let keys: Vec<_> = self.processes.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            if let Some((_, process)) = self.processes.remove(&key) {
                process.terminate();
            }
        }

        for pattern in patterns {
            tracing::warn!(pattern = %pattern, "Sweeping processes");
            pkill(&["-9", "-f", pattern]).await;
        }

        self.processes.clear();
        self.scripts.clear();
        self.shared.errors.clear();

        let removed = wrapper::remove_stale_scripts(&self.script_dir).await;
        if removed > 0 {
            tracing::info!(count = removed, "Removed wrapper scripts");
        }
    }

    /// Kill the processes listening on local TCP `port`
    ///
    /// Listeners get SIGTERM, then SIGKILL if still alive after a short
    /// grace period. The daemon itself is never signalled. Returns how many
    /// processes were signalled.
    #[cfg(unix)]
    pub async fn kill_process_on_port(&self, port: u16) -> Result<usize, ProcessError> {
        let output = Command::new("lsof")
            .args(["-t", "-n", "-P", "-sTCP:LISTEN", &format!("-iTCP:{}", port)])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ProcessError::ToolNotFound("lsof".to_string()),
                _ => ProcessError::Io(e),
            })?;

        // lsof exits non-zero when nothing matches
        let pids = listener_pids(&String::from_utf8_lossy(&output.stdout), std::process::id());
        if pids.is_empty() {
            tracing::info!(port, "No process listening on port");
            return Ok(0);
        }

        for pid in &pids {
            tracing::warn!(port, pid, "Terminating process holding port");
            unsafe {
                libc::kill(*pid as libc::pid_t, libc::SIGTERM);
            }
        }

        tokio::time::sleep(PORT_KILL_GRACE).await;

        for pid in &pids {
            let alive = unsafe { libc::kill(*pid as libc::pid_t, 0) } == 0;
            if alive {
                tracing::warn!(port, pid, "Process ignored SIGTERM, killing");
                unsafe {
                    libc::kill(*pid as libc::pid_t, libc::SIGKILL);
                }
            }
        }

        Ok(pids.len())
    }

    #[cfg(not(unix))]
    pub async fn kill_process_on_port(&self, port: u16) -> Result<usize, ProcessError> {
        tracing::warn!(port, "Freeing a port is only supported on unix");
        Ok(0)
    }

    /// Kill wrapper processes and scripts left behind by a previous run
    pub async fn sweep_orphans(&self) {
        let prefix = self.script_dir.join(wrapper::SCRIPT_PREFIX);
        pkill(&["-f", &prefix.to_string_lossy()]).await;

        let removed = wrapper::remove_stale_scripts(&self.script_dir).await;
        if removed > 0 {
            tracing::info!(count = removed, "Removed orphaned wrapper scripts");
        }
    }

    pub fn mark_error(&self, id: ConnectionId) {
        self.shared.errors.insert(id, Instant::now());
    }

    /// Whether an error line was seen for `id` within `window`
    pub fn has_recent_error(&self, id: ConnectionId, window: Duration) -> bool {
        self.shared
            .errors
            .get(&id)
            .map(|at| at.elapsed() < window)
            .unwrap_or(false)
    }

    pub fn clear_error(&self, id: ConnectionId) {
        self.shared.errors.remove(&id);
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Distinct pids from `lsof -t` output, excluding `own`
#[cfg(unix)]
fn listener_pids(output: &str, own: u32) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .filter(|pid| *pid != 0 && *pid != own)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<String>, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("Output read error: {}", e);
                        break;
                    }
                },
            }
        }
    });
}

#[cfg(unix)]
async fn pkill(args: &[&str]) {
    let status = Command::new("pkill")
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    if let Err(e) = status {
        tracing::debug!("pkill unavailable: {}", e);
    }
}

#[cfg(not(unix))]
async fn pkill(_args: &[&str]) {}
