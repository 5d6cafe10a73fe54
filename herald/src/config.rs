use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::controller::Herald;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

/// Find the configuration file using the following precedence:
/// 1. `HERALD_CONFIG` environment variable
/// 2. ./herald.config.ron (current working directory)
/// 3. /etc/herald/herald.config.ron (system-wide config)
///
/// # Errors
///
/// Fails if `HERALD_CONFIG` points to a missing file, or if none of the
/// default locations exist.
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    let defaults = [
        PathBuf::from("./herald.config.ron"),
        PathBuf::from("/etc/herald/herald.config.ron"),
    ];

    locate(std::env::var(CONFIG_ENV).ok(), &defaults)
}

fn locate(env_path: Option<String>, defaults: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|path| format!("  - {}", path.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Read and parse the configuration at `path`.
///
/// # Errors
///
/// Fails if the file cannot be read or is not a valid configuration.
pub fn load(path: &Path) -> anyhow::Result<Herald> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    ron::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
}
