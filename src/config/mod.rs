//! Run Configuration Module
//!
//! Loading, typing, and validation of the run configuration document.
//!
//! # Structure
//!
//! - [`model`]: Serde data structures mirroring the JSON layout
//! - [`loader`]: File loading (JSON or YAML)
//! - [`validator`]: Validation rules applied before dispatch

pub mod loader;
pub mod model;
pub mod validator;

pub use loader::{load_config, parse_config};
pub use model::{Config, Decomposition, FocalMechanism, Resources, SchedulerConfig};
pub use validator::{validate_config, ValidationError};
