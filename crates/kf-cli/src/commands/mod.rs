//! CLI command implementations

mod cluster;
mod config;
mod connections;
mod logs;
mod status;

pub use cluster::{namespaces_command, services_command};
pub use config::{config_path, config_show, load_daemon_config};
pub use connections::{
    add_command, bulk_command, free_port_command, lifecycle_command, list_command,
    remove_command, AddOptions, BulkAction, Lifecycle,
};
pub use logs::logs_command;
pub use status::status_command;
