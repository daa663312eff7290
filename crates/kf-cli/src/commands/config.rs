//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use kf_core::config::{self, DaemonConfig};

use crate::output::{print_info, print_warning};

/// Load the daemon config from `path` or the default location
///
/// An explicit path must exist; the default one falls back to defaults.
pub fn load_daemon_config(path: Option<&Path>) -> Result<DaemonConfig> {
    match path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => {
            let default_path = config::default_config_path();
            config::load_or_default(&default_path)
                .with_context(|| format!("Failed to load config from {:?}", default_path))
        }
    }
}

/// Show the effective configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = config_path
        .cloned()
        .unwrap_or_else(config::default_config_path);

    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file at {:?}; showing defaults", path));
    }
    println!();

    let config = load_daemon_config(config_path.map(PathBuf::as_path))?;
    println!("{}", toml::to_string_pretty(&config)?);
    println!("# connections file: {}", config.connections_path().display());

    Ok(())
}

/// Print the config directory
pub fn config_path() {
    println!("{}", config::default_config_dir().display());
}
