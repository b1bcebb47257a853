// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{ConfigFile, JobSpec, RawConfigFile};
use crate::engine::Job;
use crate::errors::Result;
use crate::task::{task_for, TaskId, TaskTree};

/// Load a configuration file and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] for
/// the checked form.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file and validate it.
///
/// - Reads TOML and applies defaults.
/// - Parses durations, resolves task links and op parameters.
/// - Rejects unknown link targets and task links that loop.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    ConfigFile::try_from(raw_config)
}

/// Turn one validated job description into a runnable [`Job`].
pub fn build_job(spec: &JobSpec) -> Result<Job> {
    let mut tree = TaskTree::new();
    let ids: Vec<TaskId> = spec
        .tasks
        .iter()
        .map(|task| tree.add_boxed(task_for(task.request.clone())))
        .collect();

    for (task, &from) in spec.tasks.iter().zip(&ids) {
        if let Some(next) = task.on_success {
            tree.set_next_on_success(from, ids[next])?;
        }
        if let Some(fallback) = task.on_failure {
            tree.set_next_on_failure(from, ids[fallback])?;
        }
    }

    Ok(Job::new(spec.destination, tree).with_label(spec.name.clone()))
}

/// Build every job of the configuration, in file order.
pub fn build_jobs(cfg: &ConfigFile) -> Result<Vec<Job>> {
    cfg.jobs.iter().map(build_job).collect()
}
