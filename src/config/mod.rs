// src/config/mod.rs

//! Configuration loading and validation for meshconf.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk and build jobs from it (`loader.rs`).
//! - Validate settings, task links and op parameters (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{build_job, build_jobs, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ConfigSection, JobConfig, JobSpec, RawConfigFile, SimNodeConfig,
    SimulationSection, TaskConfig, TaskSpec,
};
