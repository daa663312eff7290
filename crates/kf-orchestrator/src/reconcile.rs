//! Reconciliation loop
//!
//! Once per tick every enabled, auto-reconnecting connection is checked and
//! at most one repair is chosen for it. Checks run in a fixed order and the
//! first match wins:
//!
//! 1. direct-exec connections: relay down, erroring or dead -> restart
//! 2. forward leg disconnected or errored -> start
//! 3. forward connected with a recent error line -> kill and restart
//! 4. forward connected but its process is gone -> restart
//! 5. forward connected but the local port is closed -> kill and restart
//! 6. relay configured and disconnected under a connected forward -> relaunch relay
//! 7. relay connected but its port is closed -> relay error, then relaunch relay
//!
//! Repairs that launch processes are spawned, never awaited by the tick.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use kf_core::{ConnectionConfig, ConnectionId, ConnectionStatus, ProcessRole};

use crate::manager::ConnectionManager;
use crate::probe::is_port_open;

/// Repair chosen for one connection in one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    /// Clear the error marker and start
    Start,
    /// Mark both legs disconnected, optionally kill, then start
    Restart { kill: bool, reason: &'static str },
    /// Relaunch only the relay leg
    Relay { port: u16, probe_failed: bool },
}

impl ConnectionManager {
    /// Run one reconciliation pass over all connections
    pub async fn reconcile_once(self: &Arc<Self>) {
        if self.is_killing() {
            return;
        }

        let configs: Vec<_> = self
            .configs()
            .into_iter()
            .filter(|c| c.is_enabled && c.auto_reconnect)
            .collect();

        join_all(configs.iter().map(|config| self.reconcile_connection(config))).await;
    }

    async fn reconcile_connection(self: &Arc<Self>, config: &ConnectionConfig) {
        let Some(repair) = self.diagnose(config).await else {
            return;
        };
        if self.is_killing() {
            return;
        }

        tracing::debug!(connection_id = %config.id, ?repair, "Repairing connection");
        match repair {
            Repair::Start => self.schedule_start(config),
            Repair::Restart { kill, reason } => self.schedule_restart(config, kill, reason),
            Repair::Relay { port, probe_failed } => self.repair_relay(config, port, probe_failed),
        }
    }

    /// Decide what, if anything, this connection needs
    pub async fn diagnose(&self, config: &ConnectionConfig) -> Option<Repair> {
        let id = config.id;
        let (forward, relay) = self
            .with_state(id, |s| {
                if s.stopped || s.repair_pending {
                    None
                } else {
                    Some((s.forward_status, s.relay_status))
                }
            })
            .flatten()?;

        let window = self.timings.recent_error_window;
        let probe_timeout = self.timings.probe_timeout;

        if config.use_direct_exec {
            return match relay {
                ConnectionStatus::Connecting => None,
                ConnectionStatus::Disconnected | ConnectionStatus::Error => Some(Repair::Start),
                ConnectionStatus::Connected => {
                    if self.supervisor.has_recent_error(id, window) {
                        Some(Repair::Restart {
                            kill: true,
                            reason: "kubectl error",
                        })
                    } else if !self.supervisor.is_running(id, ProcessRole::Relay) {
                        Some(Repair::Restart {
                            kill: true,
                            reason: "Process terminated",
                        })
                    } else {
                        None
                    }
                }
            };
        }

        match forward {
            ConnectionStatus::Disconnected | ConnectionStatus::Error => return Some(Repair::Start),
            ConnectionStatus::Connecting => return None,
            ConnectionStatus::Connected => {}
        }

        if self.supervisor.has_recent_error(id, window) {
            return Some(Repair::Restart {
                kill: true,
                reason: "kubectl error",
            });
        }

        if !self.supervisor.is_running(id, ProcessRole::Forward) {
            return Some(Repair::Restart {
                kill: false,
                reason: "Process terminated",
            });
        }

        if !is_port_open(config.local_port, probe_timeout).await {
            return Some(Repair::Restart {
                kill: true,
                reason: "Connection lost",
            });
        }

        let port = config.relay_port?;
        if relay == ConnectionStatus::Disconnected {
            return Some(Repair::Relay {
                port,
                probe_failed: false,
            });
        }

        if relay == ConnectionStatus::Connected && !is_port_open(port, probe_timeout).await {
            return Some(Repair::Relay {
                port,
                probe_failed: true,
            });
        }

        None
    }

    fn schedule_start(self: &Arc<Self>, config: &ConnectionConfig) {
        let id = config.id;
        if !self.claim_repair(id) {
            return;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let lock = manager.op_lock(id);
            let _guard = lock.lock().await;

            manager.supervisor.clear_error(id);
            manager.resume_repair(id).await;
        });
    }

    fn schedule_restart(self: &Arc<Self>, config: &ConnectionConfig, kill: bool, reason: &'static str) {
        let id = config.id;
        if !self.claim_repair(id) {
            return;
        }
        tracing::warn!(connection_id = %id, reason, "Connection unhealthy, restarting");

        self.with_state(id, |s| {
            s.set_both(ConnectionStatus::Disconnected);
            s.last_error = Some(reason.to_string());
            s.log(ProcessRole::Forward, true, format!("{}; reconnecting", reason));
        });
        self.notify_disconnected(config, reason);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let lock = manager.op_lock(id);
            let _guard = lock.lock().await;

            manager.with_state(id, |s| s.cancel_tasks());
            if kill {
                manager.supervisor.kill(id).await;
            }
            manager.supervisor.clear_error(id);
            manager.resume_repair(id).await;
        });
    }

    /// Mark a repair as pending unless the connection was stopped or
    /// already has one queued
    fn claim_repair(&self, id: ConnectionId) -> bool {
        self.with_state(id, |s| {
            if s.stopped || s.repair_pending {
                return false;
            }
            s.repair_pending = true;
            true
        })
        .unwrap_or(false)
    }

    /// Start a connection whose repair is still wanted; a stop issued since
    /// the repair was scheduled cancels it. Caller holds the operation lock.
    async fn resume_repair(self: &Arc<Self>, id: ConnectionId) {
        let still_pending = self.with_state(id, |s| s.repair_pending).unwrap_or(false);
        if still_pending {
            if let Err(e) = self.start_locked(id).await {
                tracing::warn!(connection_id = %id, "Reconnect failed: {}", e);
            }
        }
        self.with_state(id, |s| s.repair_pending = false);
    }

    /// Targeted relay repair; the forward leg is not touched
    fn repair_relay(self: &Arc<Self>, config: &ConnectionConfig, port: u16, probe_failed: bool) {
        let id = config.id;

        let forward_connected = self
            .with_state(id, |s| {
                if probe_failed {
                    s.fail(ProcessRole::Relay, format!("Relay port {} not responding", port));
                }
                s.forward_status == ConnectionStatus::Connected
            })
            .unwrap_or(false);

        if forward_connected {
            tracing::warn!(connection_id = %id, port, "Relaunching relay");
            self.launch_relay(config, port, None);
        }
    }
}

/// Tick the manager until cancelled or dropped
pub(crate) async fn run_monitor(
    manager: Weak<ConnectionManager>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.reconcile_once().await;
            }
        }
    }

    tracing::debug!("Monitor loop exited");
}
