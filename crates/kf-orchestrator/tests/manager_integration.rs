//! Connection manager integration tests
//!
//! Drive the manager against fake `kubectl`/`socat` scripts and check the
//! observable lifecycle: statuses, processes, notifications and repairs.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use kf_core::time::current_time_millis;
use kf_core::{ConnectionConfig, ConnectionStatus, ProcessRole};
use kf_orchestrator::error::{ManagerError, ProcessError};
use kf_orchestrator::notify::NotifyKind;
use kf_orchestrator::Repair;

use common::{closed_port, open_port, test_timings, wait_until, Harness, Tools, LONG_RUNNING};

const SETTLED: Duration = Duration::from_secs(3);

fn kill_pid(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

fn is_connected(h: &Harness, config: &ConnectionConfig) -> bool {
    h.manager.status(config.id).map(|(fwd, _)| fwd) == Some(ConnectionStatus::Connected)
}

#[tokio::test]
async fn test_start_connects_forward_leg() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start(config.id).await.unwrap();
    assert_eq!(
        h.manager.status(config.id),
        Some((ConnectionStatus::Connecting, ConnectionStatus::Disconnected))
    );

    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);
    assert!(h.manager.is_running(config.id, ProcessRole::Forward));
    assert!(h.manager.last_error(config.id).is_none());

    let sent = h.notifier.sent();
    assert!(sent
        .iter()
        .any(|(kind, title, _)| *kind == NotifyKind::Info && title == "Port forward connected"));

    let logs = h.manager.logs(config.id, None).unwrap();
    assert!(logs.iter().any(|e| e.message.starts_with("Forwarding localhost:")));

    h.shutdown().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_kills_processes() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start(config.id).await.unwrap();
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);

    h.manager.stop(config.id).await.unwrap();
    assert_eq!(
        h.manager.status(config.id),
        Some((ConnectionStatus::Disconnected, ConnectionStatus::Disconnected))
    );
    assert!(!h.manager.is_running(config.id, ProcessRole::Forward));
    assert_eq!(h.manager.task_count(), 0);
    assert_eq!(h.manager.supervisor().process_count(), 0);

    h.manager.stop(config.id).await.unwrap();

    let unknown = ConnectionConfig::new("ghost", "default", "ghost", 1, 1);
    assert!(matches!(
        h.manager.stop(unknown.id).await,
        Err(ManagerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_stop_during_settle_never_connects() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start(config.id).await.unwrap();
    h.manager.stop(config.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        h.manager.status(config.id),
        Some((ConnectionStatus::Disconnected, ConnectionStatus::Disconnected))
    );
}

#[tokio::test]
async fn test_relay_leg_follows_forward() {
    let h = Harness::new().await;
    let (_local, port) = open_port().await;
    let (_relay, relay_port) = open_port().await;
    let config = h.add("db", port, Some(relay_port)).await;

    h.manager.start(config.id).await.unwrap();
    assert!(
        wait_until(SETTLED, || {
            h.manager.status(config.id)
                == Some((ConnectionStatus::Connected, ConnectionStatus::Connected))
        })
        .await
    );
    assert!(h.manager.is_running(config.id, ProcessRole::Relay));

    let snapshot = h.manager.snapshot(config.id).unwrap();
    assert_eq!(snapshot.overall_status(), ConnectionStatus::Connected);

    h.manager.stop(config.id).await.unwrap();
    assert!(!h.manager.is_running(config.id, ProcessRole::Relay));
}

#[tokio::test]
async fn test_missing_kubectl_fails_start() {
    let h = Harness::with_tools(Tools {
        kubectl: None,
        socat: Some(LONG_RUNNING),
    })
    .await;
    let config = h.add("api", 18080, None).await;

    let result = h.manager.start(config.id).await;
    assert!(matches!(
        result,
        Err(ManagerError::Process(ProcessError::ToolNotFound(ref tool))) if tool == "kubectl"
    ));
    assert_eq!(
        h.manager.status(config.id).map(|(fwd, _)| fwd),
        Some(ConnectionStatus::Error)
    );
    assert!(h
        .manager
        .last_error(config.id)
        .unwrap()
        .contains("kubectl not found"));
}

fn error_count(h: &Harness, config: &ConnectionConfig, needle: &str) -> usize {
    h.manager
        .logs(config.id, None)
        .unwrap()
        .iter()
        .filter(|e| e.is_error && e.message.contains(needle))
        .count()
}

#[tokio::test]
async fn test_missing_kubectl_is_not_retried_by_monitor() {
    let h = Harness::with_tools(Tools {
        kubectl: None,
        socat: Some(LONG_RUNNING),
    })
    .await;
    let config = h.add("api", 18085, None).await;

    assert_eq!(h.manager.start_all().await, 0);
    assert!(h.manager.is_monitoring());

    // Roughly ten ticks
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(error_count(&h, &config, "kubectl not found"), 1);
    assert_eq!(
        h.manager.status(config.id).map(|(fwd, _)| fwd),
        Some(ConnectionStatus::Error)
    );

    // An explicit start reports the failure again
    assert!(h.manager.start(config.id).await.is_err());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(error_count(&h, &config, "kubectl not found"), 2);

    h.shutdown().await;
}

#[tokio::test]
async fn test_direct_exec_without_socat_is_not_retried_by_monitor() {
    let h = Harness::with_tools(Tools {
        kubectl: Some(LONG_RUNNING),
        socat: None,
    })
    .await;
    let mut config = ConnectionConfig::new("direct", "default", "direct", 18086, 80);
    config.use_direct_exec = true;
    h.manager.add(config.clone()).await.unwrap();

    h.manager.start_all().await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(error_count(&h, &config, "socat not found"), 1);
    assert_eq!(
        h.manager.status(config.id),
        Some((ConnectionStatus::Error, ConnectionStatus::Error))
    );

    h.shutdown().await;
}

#[tokio::test]
async fn test_missing_socat_fails_relay_only() {
    let h = Harness::with_tools(Tools {
        kubectl: Some(LONG_RUNNING),
        socat: None,
    })
    .await;
    let (_listener, port) = open_port().await;
    let config = h.add("db", port, Some(closed_port().await)).await;

    h.manager.start(config.id).await.unwrap();
    assert!(
        wait_until(SETTLED, || {
            h.manager.status(config.id)
                == Some((ConnectionStatus::Connected, ConnectionStatus::Error))
        })
        .await
    );
    assert!(h.manager.last_error(config.id).unwrap().contains("socat not found"));
    assert!(h.manager.is_running(config.id, ProcessRole::Forward));

    h.shutdown().await;
}

#[tokio::test]
async fn test_forward_exit_during_settle_is_error() {
    let h = Harness::with_tools(Tools {
        kubectl: Some("exit 1"),
        socat: Some(LONG_RUNNING),
    })
    .await;
    let config = h.add("api", 18081, None).await;

    h.manager.start(config.id).await.unwrap();
    assert!(
        wait_until(SETTLED, || {
            h.manager.status(config.id).map(|(fwd, _)| fwd) == Some(ConnectionStatus::Error)
        })
        .await
    );
    assert_eq!(
        h.manager.last_error(config.id).as_deref(),
        Some("Process terminated")
    );
}

#[tokio::test]
async fn test_start_all_skips_disabled_and_starts_monitoring() {
    let h = Harness::new().await;
    let (_a, port_a) = open_port().await;
    let enabled = h.add("enabled", port_a, None).await;

    let mut disabled = ConnectionConfig::new("disabled", "default", "disabled", 18082, 80);
    disabled.is_enabled = false;
    h.manager.add(disabled.clone()).await.unwrap();

    let started = h.manager.start_all().await;
    assert_eq!(started, 1);
    assert!(h.manager.is_monitoring());

    assert!(wait_until(SETTLED, || is_connected(&h, &enabled)).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        h.manager.status(disabled.id),
        Some((ConnectionStatus::Disconnected, ConnectionStatus::Disconnected))
    );

    h.shutdown().await;
    assert!(!h.manager.is_monitoring());
}

#[tokio::test]
async fn test_monitor_restarts_killed_forward() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start_all().await;
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);

    let first_pid = h.manager.supervisor().pid(config.id, ProcessRole::Forward).unwrap();
    kill_pid(first_pid);

    assert!(
        wait_until(SETTLED, || {
            let pid = h.manager.supervisor().pid(config.id, ProcessRole::Forward);
            is_connected(&h, &config) && pid.is_some() && pid != Some(first_pid)
        })
        .await
    );
    assert!(h
        .notifier
        .sent()
        .iter()
        .any(|(kind, _, body)| *kind == NotifyKind::Error && body.contains("Process terminated")));

    h.shutdown().await;
}

#[tokio::test]
async fn test_monitor_marks_disconnect_before_reconnecting() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start_all().await;
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);
    h.manager.clear_logs(config.id).unwrap();

    let pid = h.manager.supervisor().pid(config.id, ProcessRole::Forward).unwrap();
    let killed_at = current_time_millis();
    kill_pid(pid);

    assert!(
        wait_until(SETTLED, || {
            h.manager
                .logs(config.id, None)
                .unwrap()
                .iter()
                .any(|e| e.message.starts_with("Forwarding localhost:"))
        })
        .await
    );

    let logs = h.manager.logs(config.id, None).unwrap();
    let position = |prefix: &str| logs.iter().position(|e| e.message.starts_with(prefix));
    let lost = position("Process terminated; reconnecting").unwrap();
    let starting = position("Starting port-forward").unwrap();
    let connected = position("Forwarding localhost:").unwrap();
    assert!(lost < starting && starting < connected);
    assert!(logs[lost].is_error);

    let tick = test_timings().tick_interval.as_millis() as u64;
    assert!(logs[starting].timestamp.saturating_sub(killed_at) <= 2 * tick + 200);

    h.shutdown().await;
}

#[tokio::test]
async fn test_monitor_restarts_when_local_port_closes() {
    let h = Harness::new().await;
    let (listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start_all().await;
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);
    let first_pid = h.manager.supervisor().pid(config.id, ProcessRole::Forward).unwrap();

    // The forward process stays alive; only the port goes away
    drop(listener);

    assert!(
        wait_until(SETTLED, || {
            h.notifier
                .sent()
                .iter()
                .any(|(_, title, body)| title == "Port forward disconnected" && body.contains("Connection lost"))
        })
        .await
    );
    assert!(
        wait_until(SETTLED, || {
            let pid = h.manager.supervisor().pid(config.id, ProcessRole::Forward);
            pid.is_some() && pid != Some(first_pid)
        })
        .await
    );
    assert!(h
        .manager
        .logs(config.id, None)
        .unwrap()
        .iter()
        .any(|e| e.is_error && e.message == "Connection lost; reconnecting"));

    h.shutdown().await;
}

#[tokio::test]
async fn test_direct_exec_health_checks() {
    let h = Harness::new().await;
    let (_listener, relay_port) = open_port().await;
    let mut config = ConnectionConfig::new("direct", "default", "direct", 18087, 80);
    config.relay_port = Some(relay_port);
    config.use_direct_exec = true;
    h.manager.add(config.clone()).await.unwrap();

    // Still connecting: a dead relay is left to the settling task
    h.manager.start(config.id).await.unwrap();
    let pid = h.manager.supervisor().pid(config.id, ProcessRole::Relay).unwrap();
    kill_pid(pid);
    assert_eq!(h.manager.diagnose(&config).await, None);

    assert!(
        wait_until(SETTLED, || {
            h.manager.status(config.id).map(|(_, relay)| relay) == Some(ConnectionStatus::Error)
        })
        .await
    );
    assert_eq!(h.manager.diagnose(&config).await, Some(Repair::Start));

    h.manager.start(config.id).await.unwrap();
    assert!(
        wait_until(SETTLED, || {
            h.manager.status(config.id)
                == Some((ConnectionStatus::Connected, ConnectionStatus::Connected))
        })
        .await
    );
    assert_eq!(h.manager.diagnose(&config).await, None);

    h.manager.supervisor().mark_error(config.id);
    assert_eq!(
        h.manager.diagnose(&config).await,
        Some(Repair::Restart {
            kill: true,
            reason: "kubectl error"
        })
    );
    h.manager.supervisor().clear_error(config.id);

    let pid = h.manager.supervisor().pid(config.id, ProcessRole::Relay).unwrap();
    kill_pid(pid);
    assert!(
        wait_until(SETTLED, || {
            !h.manager.is_running(config.id, ProcessRole::Relay)
        })
        .await
    );
    assert_eq!(
        h.manager.diagnose(&config).await,
        Some(Repair::Restart {
            kill: true,
            reason: "Process terminated"
        })
    );

    // The monitor carries out the restart
    h.manager.start_monitoring();
    assert!(
        wait_until(SETTLED, || {
            let current = h.manager.supervisor().pid(config.id, ProcessRole::Relay);
            h.manager.status(config.id)
                == Some((ConnectionStatus::Connected, ConnectionStatus::Connected))
                && current.is_some()
                && current != Some(pid)
        })
        .await
    );

    h.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_are_all_persisted() {
    let h = Harness::new().await;

    let tasks: Vec<_> = (0..20u16)
        .map(|i| {
            let manager = Arc::clone(&h.manager);
            tokio::spawn(async move {
                let name = format!("svc-{}", i);
                manager
                    .add(ConnectionConfig::new(&name, "default", &name, 19000 + i, 80))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let in_memory: Vec<_> = h.manager.configs().into_iter().map(|c| c.id).collect();
    let on_disk: Vec<_> = h.store.list().await.unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(in_memory.len(), 20);
    assert_eq!(in_memory, on_disk);
}

#[tokio::test]
async fn test_monitor_ignores_connections_without_auto_reconnect() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let mut config = ConnectionConfig::new("manual", "default", "manual", port, 80);
    config.auto_reconnect = false;
    h.manager.add(config.clone()).await.unwrap();

    h.manager.start_all().await;
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);

    let pid = h.manager.supervisor().pid(config.id, ProcessRole::Forward).unwrap();
    kill_pid(pid);
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(
        h.manager.supervisor().pid(config.id, ProcessRole::Forward),
        Some(pid)
    );
    assert!(!h.manager.is_running(config.id, ProcessRole::Forward));
    assert!(!h
        .notifier
        .sent()
        .iter()
        .any(|(_, title, _)| title == "Port forward disconnected"));

    h.shutdown().await;
}

#[tokio::test]
async fn test_monitor_leaves_stopped_connection_alone() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start_all().await;
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);

    h.manager.stop(config.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(
        h.manager.status(config.id),
        Some((ConnectionStatus::Disconnected, ConnectionStatus::Disconnected))
    );
    assert!(!h.manager.is_running(config.id, ProcessRole::Forward));

    h.shutdown().await;
}

#[tokio::test]
async fn test_closed_relay_port_restarts_relay_only() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let relay_port = closed_port().await;
    let config = h.add("db", port, Some(relay_port)).await;

    h.manager.start_all().await;
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);
    let forward_pid = h.manager.supervisor().pid(config.id, ProcessRole::Forward);

    let expected = format!("Relay port {} not responding", relay_port);
    assert!(
        wait_until(SETTLED, || {
            h.manager.last_error(config.id).as_deref() == Some(expected.as_str())
        })
        .await
    );

    assert!(is_connected(&h, &config));
    assert_eq!(
        h.manager.supervisor().pid(config.id, ProcessRole::Forward),
        forward_pid
    );

    h.shutdown().await;
}

#[tokio::test]
async fn test_error_output_triggers_restart() {
    let h = Harness::with_tools(Tools {
        kubectl: Some("echo 'error: lost connection to pod' >&2\nexec sleep 30"),
        socat: Some(LONG_RUNNING),
    })
    .await;
    let (_listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start_all().await;

    assert!(
        wait_until(SETTLED, || {
            h.notifier
                .sent()
                .iter()
                .any(|(_, title, body)| title == "Port forward disconnected" && body.contains("kubectl error"))
        })
        .await
    );

    let logs = h.manager.logs(config.id, None).unwrap();
    assert!(logs
        .iter()
        .any(|e| e.is_error && e.message.contains("lost connection to pod")));

    h.shutdown().await;
}

#[tokio::test]
async fn test_port_conflict_is_reported() {
    let h = Harness::with_tools(Tools {
        kubectl: Some(
            "echo 'Unable to listen on port 7700: listen tcp4 127.0.0.1:7700: bind: address already in use' >&2\n\
             exec sleep 30",
        ),
        socat: Some(LONG_RUNNING),
    })
    .await;
    let config = h.add("web", 7700, None).await;

    h.manager.start(config.id).await.unwrap();

    assert!(
        wait_until(SETTLED, || {
            h.notifier.sent().iter().any(|(kind, title, body)| {
                *kind == NotifyKind::Error
                    && title == "web: port conflict"
                    && body == "Port 7700 is already in use"
            })
        })
        .await
    );

    h.shutdown().await;
}

#[tokio::test]
async fn test_kill_stuck_leaves_everything_disconnected() {
    let h = Harness::new().await;
    let (_a, port_a) = open_port().await;
    let (_b, port_b) = open_port().await;
    let (_r, relay_port) = open_port().await;
    let a = h.add("a", port_a, None).await;
    let b = h.add("b", port_b, Some(relay_port)).await;

    h.manager.start_all().await;
    assert!(wait_until(SETTLED, || is_connected(&h, &a) && is_connected(&h, &b)).await);

    h.manager.kill_stuck_processes().await;

    assert!(!h.manager.is_killing());
    assert_eq!(h.manager.supervisor().process_count(), 0);
    assert_eq!(h.manager.task_count(), 0);

    // Monitoring keeps running but must not bring anything back
    tokio::time::sleep(Duration::from_millis(500)).await;
    for config in [&a, &b] {
        assert_eq!(
            h.manager.status(config.id),
            Some((ConnectionStatus::Disconnected, ConnectionStatus::Disconnected))
        );
    }
    assert_eq!(h.manager.supervisor().process_count(), 0);

    h.shutdown().await;
}

#[tokio::test]
async fn test_update_restarts_connected_connection() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start(config.id).await.unwrap();
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);
    let old_pid = h.manager.supervisor().pid(config.id, ProcessRole::Forward);

    let mut updated = config.clone();
    updated.remote_port = 8080;
    h.manager.update(updated).await.unwrap();

    assert_eq!(h.manager.config(config.id).unwrap().remote_port, 8080);
    assert_eq!(h.store.get(config.id).await.unwrap().unwrap().remote_port, 8080);

    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);
    assert_ne!(h.manager.supervisor().pid(config.id, ProcessRole::Forward), old_pid);

    h.shutdown().await;
}

#[tokio::test]
async fn test_update_disabling_stops_connection() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start(config.id).await.unwrap();
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);

    let mut updated = config.clone();
    updated.is_enabled = false;
    h.manager.update(updated).await.unwrap();

    assert_eq!(
        h.manager.status(config.id),
        Some((ConnectionStatus::Disconnected, ConnectionStatus::Disconnected))
    );
    assert!(!h.manager.is_running(config.id, ProcessRole::Forward));
}

#[tokio::test]
async fn test_update_keeps_stopped_connection_stopped() {
    let h = Harness::new().await;
    let config = h.add("api", 18083, None).await;

    let mut updated = config.clone();
    updated.name = "api-renamed".to_string();
    h.manager.update(updated).await.unwrap();

    assert_eq!(h.manager.config(config.id).unwrap().name, "api-renamed");
    assert_eq!(
        h.manager.status(config.id),
        Some((ConnectionStatus::Disconnected, ConnectionStatus::Disconnected))
    );
    assert_eq!(h.manager.supervisor().process_count(), 0);
}

#[tokio::test]
async fn test_remove_stops_and_forgets() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start(config.id).await.unwrap();
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);

    h.manager.remove(config.id).await.unwrap();
    assert!(h.manager.snapshots().is_empty());
    assert!(h.manager.status(config.id).is_none());
    assert_eq!(h.manager.supervisor().process_count(), 0);
    assert!(h.store.list().await.unwrap().is_empty());

    assert!(matches!(
        h.manager.remove(config.id).await,
        Err(ManagerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_direct_exec_mirrors_relay_status() {
    let h = Harness::new().await;
    let (_listener, relay_port) = open_port().await;
    let mut config = ConnectionConfig::new("direct", "default", "direct", 18084, 80);
    config.relay_port = Some(relay_port);
    config.use_direct_exec = true;
    h.manager.add(config.clone()).await.unwrap();

    h.manager.start(config.id).await.unwrap();
    assert_eq!(
        h.manager.status(config.id),
        Some((ConnectionStatus::Connecting, ConnectionStatus::Connecting))
    );

    assert!(
        wait_until(SETTLED, || {
            h.manager.status(config.id)
                == Some((ConnectionStatus::Connected, ConnectionStatus::Connected))
        })
        .await
    );
    assert!(h.manager.is_running(config.id, ProcessRole::Relay));
    assert!(!h.manager.is_running(config.id, ProcessRole::Forward));

    let script = h.script_dir().join(format!("kf-wrapper-{}.sh", config.id));
    assert!(script.exists());

    h.manager.stop(config.id).await.unwrap();
    assert!(!script.exists());
    assert_eq!(
        h.manager.status(config.id),
        Some((ConnectionStatus::Disconnected, ConnectionStatus::Disconnected))
    );
}

#[tokio::test]
async fn test_restart_replaces_process() {
    let h = Harness::new().await;
    let (_listener, port) = open_port().await;
    let config = h.add("api", port, None).await;

    h.manager.start(config.id).await.unwrap();
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);
    let old_pid = h.manager.supervisor().pid(config.id, ProcessRole::Forward);

    h.manager.restart(config.id).await.unwrap();
    assert!(wait_until(SETTLED, || is_connected(&h, &config)).await);
    assert_ne!(h.manager.supervisor().pid(config.id, ProcessRole::Forward), old_pid);

    h.shutdown().await;
}
