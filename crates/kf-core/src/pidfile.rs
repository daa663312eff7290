//! Daemon PID file
//!
//! Only one `kf-orchestrator` may own the IPC port and the managed
//! processes at a time. The daemon records its PID on start and refuses to
//! run while a recorded PID is still alive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config;

const PID_FILE_NAME: &str = "daemon.pid";

/// `<config_dir>/kube-forward/daemon.pid`
pub fn default_pid_path() -> PathBuf {
    config::default_config_dir().join(PID_FILE_NAME)
}

/// Read a recorded PID; a missing file is `Ok(None)`
pub fn read_pid_file(path: &Path) -> io::Result<Option<u32>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    contents
        .trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", pid))
}

/// Remove the PID file, ignoring a missing one
pub fn remove_pid_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// PID of a live daemon recorded at `path`, if any
///
/// A stale or unreadable file is removed and reported as `None`.
pub fn running_daemon(path: &Path) -> Option<u32> {
    match read_pid_file(path) {
        Ok(Some(pid)) if pid != std::process::id() && is_process_alive(pid) => Some(pid),
        Ok(None) => None,
        _ => {
            let _ = remove_pid_file(path);
            None
        }
    }
}

#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) probes without signalling; EPERM still means "exists"
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
pub fn is_process_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

/// Holds the PID file for the daemon's lifetime and removes it on drop
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    /// Record `pid` at `path`, failing if another live daemon owns it
    pub fn acquire(path: PathBuf, pid: u32) -> io::Result<Self> {
        if let Some(existing) = running_daemon(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("daemon already running with PID {}", existing),
            ));
        }
        write_pid_file(&path, pid)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if let Err(e) = remove_pid_file(&self.path) {
            tracing::warn!("Failed to remove PID file {:?}: {}", self.path, e);
        }
    }
}
