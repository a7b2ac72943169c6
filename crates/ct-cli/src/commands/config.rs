//! Config command implementations

use anyhow::{Context, Result};
use std::path::Path;

use ct_core::config::{self, ConfigFile};

use crate::output::print_info;

/// Print the effective configuration as TOML, credentials masked
pub fn config_show(effective: &ConfigFile, config_path: Option<&Path>) -> Result<()> {
    let source = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path);
    if source.exists() {
        print_info(&format!("Configuration file: {:?}", source));
    } else {
        print_info(&format!("No configuration file at {:?}; showing defaults", source));
    }
    println!();

    let rendered = toml::to_string_pretty(&effective.redacted())
        .context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

/// Print the configuration directory
pub fn config_path(config_path: Option<&Path>) {
    let dir = config_path
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_dir);
    println!("{}", dir.display());
}
