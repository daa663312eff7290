//! Per-connection runtime state

use std::collections::VecDeque;
use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kf_core::ipc::LogEntry;
use kf_core::{ConnectionStatus, ProcessRole};

/// Entries kept per connection
pub const LOG_CAPACITY: usize = 500;

/// Bounded log; the oldest entry is evicted first
#[derive(Debug, Clone)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogRing {
    pub fn new() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(LOG_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Up to `limit` most recent entries, oldest first
    pub fn recent(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let skip = limit
            .map(|limit| self.entries.len().saturating_sub(limit))
            .unwrap_or(0);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

/// A cancellable supervising task
pub struct TaskHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `task` with a fresh cancellation token
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(task(cancel.clone()));
        Self { cancel, join }
    }

    /// Signal cancellation and abort; never blocks
    pub fn cancel(self) {
        self.cancel.cancel();
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Runtime record of one connection
pub struct ConnectionState {
    pub forward_status: ConnectionStatus,
    pub relay_status: ConnectionStatus,
    pub last_error: Option<String>,
    pub logs: LogRing,
    /// Not started, or stopped by the user; reconciliation leaves it alone
    /// until the next start
    pub stopped: bool,
    /// A repair was scheduled and has not started yet
    pub repair_pending: bool,
    forward_task: Option<TaskHandle>,
    relay_task: Option<TaskHandle>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            forward_status: ConnectionStatus::Disconnected,
            relay_status: ConnectionStatus::Disconnected,
            last_error: None,
            logs: LogRing::new(),
            stopped: true,
            repair_pending: false,
            forward_task: None,
            relay_task: None,
        }
    }

    pub fn set_both(&mut self, status: ConnectionStatus) {
        self.forward_status = status;
        self.relay_status = status;
    }

    /// Store the supervising task for `role`, cancelling the one it replaces
    pub fn set_task(&mut self, role: ProcessRole, handle: TaskHandle) {
        let slot = match role {
            ProcessRole::Forward => &mut self.forward_task,
            ProcessRole::Relay => &mut self.relay_task,
        };
        if let Some(old) = slot.replace(handle) {
            old.cancel();
        }
    }

    pub fn cancel_task(&mut self, role: ProcessRole) {
        let slot = match role {
            ProcessRole::Forward => &mut self.forward_task,
            ProcessRole::Relay => &mut self.relay_task,
        };
        if let Some(handle) = slot.take() {
            handle.cancel();
        }
    }

    pub fn cancel_tasks(&mut self) {
        self.cancel_task(ProcessRole::Forward);
        self.cancel_task(ProcessRole::Relay);
    }

    /// Supervising tasks still held by this connection
    pub fn task_count(&self) -> usize {
        [&self.forward_task, &self.relay_task]
            .iter()
            .filter(|task| task.is_some())
            .count()
    }

    /// Append a manager event to the log
    pub fn log(&mut self, role: ProcessRole, is_error: bool, message: impl Into<String>) {
        self.logs.push(LogEntry::new(message, role, is_error));
    }

    /// Record a failure; it replaces any previous message
    pub fn fail(&mut self, role: ProcessRole, message: impl Into<String>) {
        let message = message.into();
        match role {
            ProcessRole::Forward => self.forward_status = ConnectionStatus::Error,
            ProcessRole::Relay => self.relay_status = ConnectionStatus::Error,
        }
        self.log(role, true, message.clone());
        self.last_error = Some(message);
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
