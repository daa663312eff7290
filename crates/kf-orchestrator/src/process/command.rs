//! Command lines for the forward and relay legs

use std::fmt;
use std::path::{Path, PathBuf};

use kf_core::ConnectionConfig;

/// A program plus its arguments, ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    /// `kubectl port-forward -n <ns> svc/<service> <local>:<remote> --address=127.0.0.1`
    pub fn port_forward(kubectl: &Path, config: &ConnectionConfig) -> Self {
        Self {
            program: kubectl.to_path_buf(),
            args: vec![
                "port-forward".to_string(),
                "-n".to_string(),
                config.namespace.clone(),
                format!("svc/{}", config.service),
                format!("{}:{}", config.local_port, config.remote_port),
                "--address=127.0.0.1".to_string(),
            ],
        }
    }

    /// `socat TCP-LISTEN:<listen>,fork,reuseaddr TCP:127.0.0.1:<target>`
    pub fn relay(socat: &Path, listen_port: u16, target_port: u16) -> Self {
        Self {
            program: socat.to_path_buf(),
            args: vec![
                listen_address(listen_port),
                format!("TCP:127.0.0.1:{}", target_port),
            ],
        }
    }

    /// `socat TCP-LISTEN:<listen>,fork,reuseaddr EXEC:<script>`
    ///
    /// socat forks and runs `script` once per accepted client.
    pub fn relay_exec(socat: &Path, listen_port: u16, script: &Path) -> Self {
        Self {
            program: socat.to_path_buf(),
            args: vec![
                listen_address(listen_port),
                format!("EXEC:{}", script.display()),
            ],
        }
    }

    /// File name of the program, used in log fields
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn listen_address(port: u16) -> String {
    format!("TCP-LISTEN:{},fork,reuseaddr", port)
}

/// `pkill -f` patterns matching any forward or relay process on the system
pub fn sweep_patterns(kubectl: &Path, socat: &Path) -> Vec<String> {
    let name = |path: &Path| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    };
    vec![
        format!("{}.*port-forward", name(kubectl)),
        format!("{}.*TCP-LISTEN", name(socat)),
    ]
}
