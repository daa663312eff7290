//! User notifications
//!
//! Delivery is fire-and-forget: callers never wait on it and failures are
//! only logged.

use std::sync::{Arc, Mutex};

use tokio::process::Command;

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Info,
    Error,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotifyKind, title: &str, body: &str);
}

/// Writes notifications to the daemon log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: NotifyKind, title: &str, body: &str) {
        match kind {
            NotifyKind::Info => tracing::info!(title, "{}", body),
            NotifyKind::Error => tracing::warn!(title, "{}", body),
        }
    }
}

/// Runs `<program> <title> <body>` for every notification
///
/// Works with `notify-send` on Linux or a small `osascript` shim on macOS.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, kind: NotifyKind, title: &str, body: &str) {
        LogNotifier.notify(kind, title, body);

        let mut command = Command::new(&self.program);
        command.arg(title).arg(body).kill_on_drop(false);

        match command.spawn() {
            Ok(mut child) => {
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
            }
            Err(e) => tracing::warn!(program = %self.program, "Notification command failed: {}", e),
        }
    }
}

/// Records notifications in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(NotifyKind, String, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(NotifyKind, String, String)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NotifyKind, title: &str, body: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((kind, title.to_string(), body.to_string()));
        }
    }
}
