//! Direct-exec wrapper scripts
//!
//! In direct-exec mode socat runs a generated script for every accepted
//! client. The script starts its own `kubectl port-forward` on a free
//! ephemeral port, waits for it to listen, and bridges the client's stdio
//! to it. The forwarder dies with the script.
//!
//! The starting port is `30000 + pid % 30000` and is probed upward with
//! `nc -z`. Concurrent clients can still race for the same port; the probe
//! narrows the window but does not close it.

use std::path::{Path, PathBuf};

use kf_core::ConnectionId;

use crate::error::ProcessError;

/// File name prefix of every generated script
pub const SCRIPT_PREFIX: &str = "kf-wrapper-";

/// Readiness polls before bridging anyway
const READY_ATTEMPTS: u32 = 10;

/// Inputs of a wrapper script
#[derive(Debug, Clone)]
pub struct WrapperSpec<'a> {
    pub kubectl: &'a Path,
    pub socat: &'a Path,
    pub namespace: &'a str,
    pub service: &'a str,
    pub remote_port: u16,
}

/// Script location for a connection inside `dir`
pub fn script_path(dir: &Path, id: ConnectionId) -> PathBuf {
    dir.join(format!("{}{}.sh", SCRIPT_PREFIX, id))
}

pub fn is_wrapper_script(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(SCRIPT_PREFIX))
        .unwrap_or(false)
}

/// Render the bash script body
pub fn render(spec: &WrapperSpec<'_>) -> String {
    let attempts = (1..=READY_ATTEMPTS)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        r#"#!/bin/bash
PORT=$((30000 + ($$ % 30000)))
while nc -z 127.0.0.1 $PORT 2>/dev/null; do
    PORT=$((PORT + 1))
done
'{kubectl}' port-forward -n '{namespace}' 'svc/{service}' $PORT:{remote_port} --address=127.0.0.1 >/dev/null 2>&1 &
KPID=$!
trap "kill $KPID 2>/dev/null" EXIT
for i in {attempts}; do
    if nc -z 127.0.0.1 $PORT 2>/dev/null; then break; fi
    sleep 0.5
done
'{socat}' - TCP:127.0.0.1:$PORT
"#,
        kubectl = spec.kubectl.display(),
        socat = spec.socat.display(),
        namespace = spec.namespace,
        service = spec.service,
        remote_port = spec.remote_port,
        attempts = attempts,
    )
}

/// Write an executable script to `path`
pub async fn write_script(path: &Path, content: &str) -> Result<(), ProcessError> {
    tokio::fs::write(path, content)
        .await
        .map_err(ProcessError::Script)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(ProcessError::Script)?;
    }

    Ok(())
}

/// Delete every wrapper script in `dir`, returning how many were removed
pub async fn remove_stale_scripts(dir: &Path) -> usize {
    let mut removed = 0;
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if is_wrapper_script(&path) && tokio::fs::remove_file(&path).await.is_ok() {
            removed += 1;
        }
    }

    removed
}
