#![allow(dead_code)]

use meshconf::config::{
    ConfigFile, ConfigSection, JobConfig, RawConfigFile, SimulationSection, TaskConfig,
};
use meshconf::engine::Job;
use meshconf::task::{StatusTask, TaskTree};
use meshconf::transport::{ConfigRequest, ModelId};
use meshconf::types::Destination;

/// A plain status request, distinct per `n`.
pub fn appkey_add(n: u16) -> ConfigRequest {
    ConfigRequest::AppKeyAdd {
        appkey_index: n,
        netkey_index: 0,
    }
}

pub fn model_bind(model: u16, appkey_index: u16) -> ConfigRequest {
    ConfigRequest::ModelBind {
        element: 0,
        model: ModelId::sig(model),
        appkey_index,
    }
}

/// Job whose tasks run one after the other, stopping at the first failure.
pub fn sequence_job(dest: Destination, requests: impl IntoIterator<Item = ConfigRequest>) -> Job {
    let tree = TaskTree::sequence(
        requests
            .into_iter()
            .map(|r| Box::new(StatusTask::new(r)) as Box<dyn meshconf::task::ConfigTask>),
    );
    Job::new(dest, tree)
}

/// Job with a single appkey add task.
pub fn single_task_job(dest: Destination) -> Job {
    sequence_job(dest, [appkey_add(0)])
}

/// `primary` with `fallback` taken when it fails; both end the job.
pub fn job_with_fallback(dest: Destination, primary: ConfigRequest, fallback: ConfigRequest) -> Job {
    let mut tree = TaskTree::new();
    let first = tree.add(StatusTask::new(primary));
    let second = tree.add(StatusTask::new(fallback));
    tree.set_next_on_failure(first, second)
        .expect("fresh ids are valid");
    Job::new(dest, tree)
}

/// Builder for `RawConfigFile` / `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                simulation: SimulationSection::default(),
                job: Vec::new(),
            },
        }
    }

    pub fn executor_count(mut self, n: usize) -> Self {
        self.config.config.executor_count = n;
        self
    }

    pub fn event_timeout(mut self, value: &str) -> Self {
        self.config.config.event_timeout = value.to_string();
        self
    }

    pub fn with_job(mut self, job: JobConfig) -> Self {
        self.config.job.push(job);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(address: u16) -> Self {
        Self {
            job: JobConfig {
                name: None,
                netkey_index: 0,
                address,
                continue_on_failure: false,
                task: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.job.name = Some(name.to_string());
        self
    }

    pub fn continue_on_failure(mut self, val: bool) -> Self {
        self.job.continue_on_failure = val;
        self
    }

    pub fn task(mut self, task: TaskConfig) -> Self {
        self.job.task.push(task);
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(name: &str, op: &str) -> Self {
        Self {
            task: TaskConfig {
                name: name.to_string(),
                op: op.to_string(),
                ..TaskConfig::default()
            },
        }
    }

    pub fn appkey_index(mut self, idx: u16) -> Self {
        self.task.appkey_index = Some(idx);
        self
    }

    pub fn model(mut self, model: u16) -> Self {
        self.task.model = Some(model);
        self
    }

    pub fn on_success(mut self, target: &str) -> Self {
        self.task.on_success = Some(target.to_string());
        self
    }

    pub fn on_failure(mut self, target: &str) -> Self {
        self.task.on_failure = Some(target.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
