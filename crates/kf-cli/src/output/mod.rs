//! Output formatting utilities for the CLI
//!
//! Tables for connections, logs and cluster metadata, the daemon status
//! block, and coloured one-line messages.

use std::io::Write;
use std::time::Duration;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use kf_core::cluster::{Namespace, Service};
use kf_core::time::{format_clock, format_uptime};
use kf_core::ConnectionStatus;

use crate::ipc::{ConnectionSnapshot, DaemonStatus, LogEntry};

/// Format connections as a table, in configuration order
///
/// The long form adds the relay port, flags and last error.
pub fn format_connections(connections: &[ConnectionSnapshot], long: bool) -> String {
    if connections.is_empty() {
        return "No connections configured".to_string();
    }

    #[derive(Tabled)]
    struct ConnectionRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "TARGET")]
        target: String,
        #[tabled(rename = "PORTS")]
        ports: String,
        #[tabled(rename = "STATUS")]
        status: String,
    }

    #[derive(Tabled)]
    struct ConnectionRowDetailed {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "TARGET")]
        target: String,
        #[tabled(rename = "PORTS")]
        ports: String,
        #[tabled(rename = "RELAY")]
        relay: String,
        #[tabled(rename = "FORWARD")]
        forward_status: String,
        #[tabled(rename = "RELAY STATUS")]
        relay_status: String,
        #[tabled(rename = "FLAGS")]
        flags: String,
        #[tabled(rename = "LAST ERROR")]
        last_error: String,
    }

    if long {
        let rows: Vec<ConnectionRowDetailed> = connections
            .iter()
            .map(|c| ConnectionRowDetailed {
                id: c.config.id.to_string(),
                name: c.config.name.clone(),
                target: c.config.target(),
                ports: format!("{}:{}", c.config.local_port, c.config.remote_port),
                relay: c
                    .config
                    .relay_port
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                forward_status: c.forward_status.to_string(),
                relay_status: c.relay_status.to_string(),
                flags: flags(c),
                last_error: c
                    .last_error
                    .as_deref()
                    .map(|e| truncate(e, 40))
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    } else {
        let rows: Vec<ConnectionRow> = connections
            .iter()
            .map(|c| ConnectionRow {
                id: truncate(&c.config.id.to_string(), 8),
                name: c.config.name.clone(),
                target: c.config.target(),
                ports: format!("{} -> {}", c.config.effective_port(), c.config.remote_port),
                status: c.overall_status().to_string(),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }
}

fn flags(c: &ConnectionSnapshot) -> String {
    let mut flags = Vec::new();
    if !c.config.is_enabled {
        flags.push("disabled");
    }
    if c.config.auto_reconnect {
        flags.push("auto");
    }
    if c.config.use_direct_exec {
        flags.push("direct");
    }
    if flags.is_empty() {
        "-".to_string()
    } else {
        flags.join(",")
    }
}

/// Format daemon status as a human-readable block
pub fn format_status(status: &DaemonStatus) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Orchestrator Status: {}\n",
        if status.running { "Running" } else { "Stopped" }
    ));
    output.push_str(&format!("Version: {}\n", status.version));
    output.push_str(&format!("PID: {}\n", status.pid));
    output.push_str(&format!(
        "Uptime: {}\n",
        format_uptime(Duration::from_secs(status.uptime_secs))
    ));
    output.push_str(&format!(
        "Connections: {} ({} connected)\n",
        status.connection_count, status.connected_count
    ));
    output.push_str(&format!(
        "Monitoring: {}\n",
        if status.monitoring { "on" } else { "off" }
    ));
    output.push_str(&format!(
        "kubectl: {}\n",
        status.kubectl_path.as_deref().unwrap_or("not found")
    ));
    output.push_str(&format!(
        "socat: {}\n",
        status.socat_path.as_deref().unwrap_or("not found")
    ));

    output
}

/// One line per entry: `HH:MM:SS.mmm [role] message`
pub fn format_logs(entries: &[LogEntry]) -> String {
    if entries.is_empty() {
        return "No log entries".to_string();
    }

    entries
        .iter()
        .map(|e| {
            format!(
                "{} [{}]{} {}",
                format_clock(e.timestamp),
                e.role,
                if e.is_error { " ERROR" } else { "" },
                e.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_namespaces(namespaces: &[Namespace]) -> String {
    if namespaces.is_empty() {
        return "No namespaces found".to_string();
    }

    namespaces
        .iter()
        .map(|n| n.name.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_services(services: &[Service]) -> String {
    if services.is_empty() {
        return "No services found".to_string();
    }

    #[derive(Tabled)]
    struct ServiceRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "TYPE")]
        service_type: String,
        #[tabled(rename = "CLUSTER IP")]
        cluster_ip: String,
        #[tabled(rename = "PORTS")]
        ports: String,
    }

    let rows: Vec<ServiceRow> = services
        .iter()
        .map(|s| ServiceRow {
            name: s.name.clone(),
            service_type: s.service_type.clone(),
            cluster_ip: s.cluster_ip.clone().unwrap_or_else(|| "-".to_string()),
            ports: s
                .ports
                .iter()
                .map(|p| p.display_name())
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Colour used for a status in one-line messages
pub fn status_color(status: ConnectionStatus) -> Color {
    match status {
        ConnectionStatus::Connected => Color::Green,
        ConnectionStatus::Connecting => Color::Yellow,
        ConnectionStatus::Error => Color::Red,
        ConnectionStatus::Disconnected => Color::DarkGrey,
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_styled(out: &mut impl Write, color: Color, prefix: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(prefix),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_styled(&mut std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message to stderr in red
pub fn print_error(msg: &str) {
    print_styled(&mut std::io::stderr(), Color::Red, "✗ ", msg);
}

pub fn print_warning(msg: &str) {
    print_styled(&mut std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

pub fn print_info(msg: &str) {
    print_styled(&mut std::io::stdout(), Color::Cyan, "ℹ ", msg);
}

/// Print `name: status` with the status coloured
pub fn print_status_line(name: &str, status: ConnectionStatus) {
    let _ = crossterm::execute!(
        std::io::stdout(),
        Print(format!("{}: ", name)),
        SetForegroundColor(status_color(status)),
        Print(status.to_string()),
        ResetColor,
        Print("\n")
    );
}
