//! Configuration Validation
//!
//! Checks a loaded [`Config`] for values the engine cannot work with
//! before any site pipeline is dispatched. All problems are collected so
//! the user sees them in one pass.

use std::collections::HashSet;

use log::{debug, info, warn};

use super::model::Config;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    NoSites,
    EmptySiteName,
    DuplicateSite(String),
    ZeroWorkers,
    EmptyField(&'static str),
    NonPositive { field: &'static str, value: f64 },
    ZeroDecomposition,
    MissingImportSource,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSites => write!(f, "No sites listed under input.sites"),
            Self::EmptySiteName => write!(f, "Site list contains an empty name"),
            Self::DuplicateSite(site) => write!(f, "Site '{}' is listed more than once", site),
            Self::ZeroWorkers => write!(f, "compute.workers must be at least 1"),
            Self::EmptyField(field) => write!(f, "Required field '{}' is empty", field),
            Self::NonPositive { field, value } => {
                write!(f, "Field '{}' must be positive (got {})", field, value)
            }
            Self::ZeroDecomposition => {
                write!(f, "compute.decomposition factors must all be at least 1")
            }
            Self::MissingImportSource => write!(
                f,
                "input.database.populate is set but input.database.importFrom is missing"
            ),
        }
    }
}

/// Validates the configuration, returning every problem found.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    info!("Validating configuration for {} sites", config.input.sites.len());

    let mut errors = Vec::new();

    if config.input.sites.is_empty() {
        errors.push(ValidationError::NoSites);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for site in &config.input.sites {
        if site.trim().is_empty() {
            errors.push(ValidationError::EmptySiteName);
        } else if !seen.insert(site.as_str()) {
            errors.push(ValidationError::DuplicateSite(site.clone()));
        }
    }

    if config.compute.workers == 0 {
        errors.push(ValidationError::ZeroWorkers);
    }

    let required = [
        ("output.path", config.output.path.as_os_str().is_empty()),
        ("input.region", config.input.region.trim().is_empty()),
        ("input.database.path", config.input.database.path.as_os_str().is_empty()),
        ("input.ERF.name", config.input.erf.name.trim().is_empty()),
        ("input.model.name", config.input.model.name.trim().is_empty()),
        ("input.cyberShake.path", config.input.cybershake.path.as_os_str().is_empty()),
        ("compute.resources.qos", config.compute.resources.qos.trim().is_empty()),
        ("compute.restartFile", config.compute.restart_file.trim().is_empty()),
    ];
    for (field, empty) in required {
        if empty {
            errors.push(ValidationError::EmptyField(field));
        }
    }

    let resources = &config.compute.resources;
    let positives = [
        ("compute.resources.time", resources.time),
        ("compute.resources.nodes", resources.nodes as f64),
        ("compute.resources.task-per-node", resources.tasks_per_node as f64),
        ("compute.resources.cpus-per-task", resources.cpus_per_task as f64),
        ("compute.setup.frequency", config.compute.setup.frequency),
        ("compute.setup.spacing", config.compute.setup.spacing),
    ];
    for (field, value) in positives {
        if !(value > 0.0) {
            errors.push(ValidationError::NonPositive { field, value });
        }
    }

    let d = config.compute.decomposition;
    if d.x == 0 || d.y == 0 || d.z == 0 {
        errors.push(ValidationError::ZeroDecomposition);
    }

    if config.input.database.populate && config.input.database.import_from.is_none() {
        errors.push(ValidationError::MissingImportSource);
    }

    // Soft checks only produce warnings
    if resources.tasks_per_node < 2 {
        warn!("compute.resources.task-per-node < 2: runDS will request 0 tasks per node");
    }
    if config.compute.setup.periods.is_empty() {
        debug!("No spectral periods configured");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::fixtures::sample_config;
    use tempfile::tempdir;

    #[test]
    fn test_valid_config() {
        let dir = tempdir().unwrap();
        assert!(validate_config(&sample_config(dir.path())).is_ok());
    }

    #[test]
    fn test_no_sites() {
        let dir = tempdir().unwrap();
        let mut config = sample_config(dir.path());
        config.input.sites.clear();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoSites]);
    }

    #[test]
    fn test_duplicate_site() {
        let dir = tempdir().unwrap();
        let mut config = sample_config(dir.path());
        config.input.sites.push("A".to_string());

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateSite("A".to_string())));
    }

    #[test]
    fn test_collects_multiple_errors() {
        let dir = tempdir().unwrap();
        let mut config = sample_config(dir.path());
        config.compute.workers = 0;
        config.compute.decomposition.z = 0;
        config.compute.resources.qos = " ".to_string();
        config.compute.resources.time = 0.0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ZeroWorkers));
        assert!(errors.contains(&ValidationError::ZeroDecomposition));
        assert!(errors.contains(&ValidationError::EmptyField("compute.resources.qos")));
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::NonPositive {
                field: "compute.resources.time",
                ..
            }
        )));
    }

    #[test]
    fn test_populate_requires_source() {
        let dir = tempdir().unwrap();
        let mut config = sample_config(dir.path());
        config.input.database.populate = true;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MissingImportSource]);
    }

    #[test]
    fn test_error_display() {
        let msg = ValidationError::DuplicateSite("USC".into()).to_string();
        assert!(msg.contains("USC"));
    }
}
