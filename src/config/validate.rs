// src/config/validate.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, JobConfig, JobSpec, RawConfigFile, TaskSpec, END_OF_JOB, KNOWN_OPS,
};
use crate::engine::{DistributorSettings, ExecutorSettings};
use crate::errors::{MeshconfError, Result};
use crate::transport::{SimNodeSpec, SimSettings};
use crate::types::Destination;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = MeshconfError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_jobs(&raw)?;
        let settings = validate_global_config(&raw)?;
        let (simulation, sim_nodes) = validate_simulation(&raw)?;
        let jobs = raw
            .job
            .iter()
            .map(validate_job)
            .collect::<Result<Vec<_>>>()?;
        Ok(ConfigFile::new_unchecked(settings, simulation, sim_nodes, jobs))
    }
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(MeshconfError::ConfigError(
            "config must contain at least one [[job]] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<DistributorSettings> {
    let section = &cfg.config;
    if section.executor_count == 0 {
        return Err(MeshconfError::ConfigError(
            "[config].executor_count must be >= 1 (got 0)".to_string(),
        ));
    }

    let busy_retry_interval = parse_duration(&section.busy_retry_interval).map_err(|e| {
        MeshconfError::ConfigError(format!("[config].busy_retry_interval: {e}"))
    })?;
    let event_timeout = parse_duration(&section.event_timeout)
        .map_err(|e| MeshconfError::ConfigError(format!("[config].event_timeout: {e}")))?;

    Ok(DistributorSettings {
        executor_count: section.executor_count,
        executor: ExecutorSettings {
            local_retry_max: section.local_retry_max,
            communication_retry_max: section.communication_retry_max,
            busy_retry_interval,
            event_timeout,
        },
    })
}

fn validate_simulation(cfg: &RawConfigFile) -> Result<(SimSettings, Vec<SimNodeSpec>)> {
    let section = &cfg.simulation;
    let latency = parse_duration(&section.latency)
        .map_err(|e| MeshconfError::ConfigError(format!("[simulation].latency: {e}")))?;

    let mut nodes: Vec<SimNodeSpec> = Vec::with_capacity(section.node.len());
    for node in &section.node {
        let destination = Destination::new(node.netkey_index, node.address);
        if nodes.iter().any(|n| n.destination == destination) {
            return Err(MeshconfError::ConfigError(format!(
                "simulated node {destination} is declared twice"
            )));
        }
        if let Some(kind) = node.reject.iter().find(|k| !KNOWN_OPS.contains(&k.as_str())) {
            return Err(MeshconfError::ConfigError(format!(
                "simulated node {destination} rejects unknown op '{kind}'"
            )));
        }
        let mut spec = SimNodeSpec::new(destination);
        if let Some(company_id) = node.company_id {
            spec.company_id = company_id;
        }
        spec.reject = node.reject.clone();
        nodes.push(spec);
    }

    let settings = SimSettings {
        latency,
        busy_every: section.busy_every,
        drop_every: section.drop_every,
        ..SimSettings::default()
    };
    Ok((settings, nodes))
}

fn validate_job(job: &JobConfig) -> Result<JobSpec> {
    let job_name = job.display_name();
    if job.task.is_empty() {
        return Err(MeshconfError::ConfigError(format!(
            "job '{job_name}' must contain at least one [[job.task]]"
        )));
    }

    let mut index_of: HashMap<&str, usize> = HashMap::new();
    for (idx, task) in job.task.iter().enumerate() {
        if task.name == END_OF_JOB {
            return Err(MeshconfError::ConfigError(format!(
                "job '{job_name}': task name '{END_OF_JOB}' is reserved"
            )));
        }
        if index_of.insert(task.name.as_str(), idx).is_some() {
            return Err(MeshconfError::ConfigError(format!(
                "job '{job_name}': duplicate task name '{}'",
                task.name
            )));
        }
    }

    let resolve = |from: &str, field: &str, target: &str| -> Result<Option<usize>> {
        if target == END_OF_JOB {
            return Ok(None);
        }
        if target == from {
            return Err(MeshconfError::ConfigError(format!(
                "job '{job_name}': task '{from}' cannot name itself in `{field}`"
            )));
        }
        match index_of.get(target) {
            Some(idx) => Ok(Some(*idx)),
            None => Err(MeshconfError::TaskNotFound(format!(
                "job '{job_name}': task '{from}' has unknown `{field}` target '{target}'"
            ))),
        }
    };

    let mut tasks = Vec::with_capacity(job.task.len());
    for (idx, task) in job.task.iter().enumerate() {
        let request = task.to_request(job.netkey_index).map_err(|e| {
            MeshconfError::ConfigError(format!("job '{job_name}': task '{}': {e}", task.name))
        })?;

        let next_in_list = (idx + 1 < job.task.len()).then_some(idx + 1);
        let on_success = match &task.on_success {
            Some(target) => resolve(&task.name, "on_success", target)?,
            None => next_in_list,
        };
        let on_failure = match &task.on_failure {
            Some(target) => resolve(&task.name, "on_failure", target)?,
            None if job.continue_on_failure => next_in_list,
            None => None,
        };

        tasks.push(TaskSpec {
            name: task.name.clone(),
            request,
            on_success,
            on_failure,
        });
    }

    validate_task_graph(&job_name, &tasks)?;

    Ok(JobSpec {
        name: job_name,
        destination: job.destination(),
        tasks,
    })
}

fn validate_task_graph(job_name: &str, tasks: &[TaskSpec]) -> Result<()> {
    // Edge direction: task -> successor, for both outcomes.
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();

    for (idx, task) in tasks.iter().enumerate() {
        graph.add_node(idx);
        for next in [task.on_success, task.on_failure].into_iter().flatten() {
            graph.add_edge(idx, next, ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let name = tasks
                .get(cycle.node_id())
                .map_or("?", |task| task.name.as_str());
            Err(MeshconfError::TaskCycle(format!(
                "job '{job_name}': task links loop through task '{name}'"
            )))
        }
    }
}
