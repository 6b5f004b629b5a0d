//! Configuration Loader
//!
//! Reads the run configuration from disk. JSON is the native format;
//! files ending in `.yaml` / `.yml` are parsed as YAML with the same
//! field names.

use std::fs;
use std::path::Path;

use log::{debug, error, info};

use super::model::Config;
use super::validator::validate_config;
use crate::error::{FlowError, FlowResult};

/// Loads and validates a configuration file.
///
/// Relative output paths are made absolute against the current directory
/// so that every run directory derived from them is stable regardless of
/// where subprocesses are started.
///
/// # Example
///
/// ```rust,no_run
/// use seisflow::config::load_config;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_config("setup.json")?;
///     println!("{} sites", config.input.sites.len());
///     Ok(())
/// }
/// ```
pub fn load_config(path: impl AsRef<Path>) -> FlowResult<Config> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    if !path.is_file() {
        return Err(FlowError::Config(format!(
            "The configuration file '{}' doesn't exist",
            path.display()
        )));
    }

    let content = fs::read_to_string(path).map_err(|e| {
        FlowError::Config(format!("Failed to read '{}': {}", path.display(), e))
    })?;
    debug!("Configuration loaded ({} bytes)", content.len());

    let mut config = parse_config(&content, is_yaml(path))?;

    if config.output.path.is_relative() {
        config.output.path = std::env::current_dir()?.join(&config.output.path);
    }

    validate_config(&config).map_err(|errors| {
        for e in &errors {
            error!("  {}", e);
        }
        let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        FlowError::Config(format!(
            "Please, check input file '{}': {}",
            path.display(),
            joined.join("; ")
        ))
    })?;

    Ok(config)
}

/// Parses configuration text without touching the filesystem.
pub fn parse_config(content: &str, yaml: bool) -> FlowResult<Config> {
    if yaml {
        serde_yaml::from_str(content)
            .map_err(|e| FlowError::Config(format!("Failed to parse YAML configuration: {}", e)))
    } else {
        serde_json::from_str(content)
            .map_err(|e| FlowError::Config(format!("Failed to parse JSON configuration: {}", e)))
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
