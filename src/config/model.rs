// src/config/model.rs

use serde::Deserialize;

use crate::engine::DistributorSettings;
use crate::transport::{ConfigRequest, ModelId, Publication, SimNodeSpec, SimSettings};
use crate::types::{Destination, NetKeyIndex, NodeAddress};

/// Link target meaning "the job ends here".
pub const END_OF_JOB: &str = "end";

/// Request kinds accepted in `op` and in a simulated node's `reject` list.
pub const KNOWN_OPS: &[&str] = &[
    "appkey_add",
    "appkey_remove",
    "appkey_list",
    "model_bind",
    "model_unbind",
    "model_bindings_list",
    "model_sub_add",
    "model_sub_remove",
    "model_sub_set",
    "model_sub_clear",
    "model_sub_list",
    "model_pub_set",
    "model_pub_get",
    "default_ttl_set",
    "default_ttl_get",
    "gatt_proxy_set",
    "gatt_proxy_get",
    "relay_set",
    "relay_get",
    "friend_set",
    "friend_get",
    "network_transmit_set",
    "network_transmit_get",
    "dcd_get",
    "reset_node",
];

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// executor_count = 4
/// busy_retry_interval = "1s"
///
/// [[job]]
/// address = 0x2001
///
/// [[job.task]]
/// name = "add-key"
/// op = "appkey_add"
/// appkey_index = 0
/// ```
///
/// Only `[[job]]` is required.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Drives the built-in simulated network.
    #[serde(default)]
    pub simulation: SimulationSection,

    #[serde(default)]
    pub job: Vec<JobConfig>,
}

/// `[config]` section: pool size, retry limits and timer durations.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    #[serde(default = "default_executor_count")]
    pub executor_count: usize,

    /// Busy retries per task.
    #[serde(default = "default_local_retry_max")]
    pub local_retry_max: u32,

    /// Timeout retries per task.
    #[serde(default = "default_communication_retry_max")]
    pub communication_retry_max: u32,

    /// Duration string such as `"500ms"` or `"1s"`.
    #[serde(default = "default_busy_retry_interval")]
    pub busy_retry_interval: String,

    #[serde(default = "default_event_timeout")]
    pub event_timeout: String,
}

fn default_executor_count() -> usize {
    4
}

fn default_local_retry_max() -> u32 {
    5
}

fn default_communication_retry_max() -> u32 {
    3
}

fn default_busy_retry_interval() -> String {
    "1s".to_string()
}

fn default_event_timeout() -> String {
    "10s".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            executor_count: default_executor_count(),
            local_retry_max: default_local_retry_max(),
            communication_retry_max: default_communication_retry_max(),
            busy_retry_interval: default_busy_retry_interval(),
            event_timeout: default_event_timeout(),
        }
    }
}

/// `[simulation]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationSection {
    #[serde(default = "default_latency")]
    pub latency: String,

    /// Every Nth request is refused as busy; 0 disables.
    #[serde(default)]
    pub busy_every: u32,

    /// Every Nth answer is lost; 0 disables.
    #[serde(default)]
    pub drop_every: u32,

    #[serde(default)]
    pub node: Vec<SimNodeConfig>,
}

fn default_latency() -> String {
    "50ms".to_string()
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            latency: default_latency(),
            busy_every: 0,
            drop_every: 0,
            node: Vec::new(),
        }
    }
}

/// `[[simulation.node]]`.
#[derive(Debug, Clone, Deserialize)]
pub struct SimNodeConfig {
    #[serde(default)]
    pub netkey_index: NetKeyIndex,
    pub address: NodeAddress,
    #[serde(default)]
    pub company_id: Option<u16>,
    /// Request kinds answered with an error status.
    #[serde(default)]
    pub reject: Vec<String>,
}

/// `[[job]]`: the tasks to apply to one node.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Shown in logs and the final report.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub netkey_index: NetKeyIndex,

    pub address: NodeAddress,

    /// If true, a failed task falls through to the next task in the list
    /// unless it names its own `on_failure`.
    #[serde(default)]
    pub continue_on_failure: bool,

    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

impl JobConfig {
    pub fn destination(&self) -> Destination {
        Destination::new(self.netkey_index, self.address)
    }

    /// Display name: the configured one or the node address.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("node-0x{:04x}", self.address))
    }
}

/// `[[job.task]]`: one configuration request plus its links.
///
/// Which parameters are required depends on `op`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub op: String,

    /// Task to continue with on success. Defaults to the next task in the
    /// list; `"end"` stops the job.
    #[serde(default)]
    pub on_success: Option<String>,

    /// Task to continue with on failure. Defaults to the next task if the job
    /// has `continue_on_failure`, otherwise the job stops.
    #[serde(default)]
    pub on_failure: Option<String>,

    #[serde(default)]
    pub appkey_index: Option<u16>,
    /// Overrides the job's netkey index for appkey operations.
    #[serde(default)]
    pub netkey_index: Option<NetKeyIndex>,
    #[serde(default)]
    pub element: Option<u8>,
    #[serde(default)]
    pub model: Option<u16>,
    /// Vendor (company) id for vendor models; SIG model if absent.
    #[serde(default)]
    pub vendor: Option<u16>,
    #[serde(default)]
    pub address: Option<NodeAddress>,
    #[serde(default)]
    pub ttl: Option<u8>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub count: Option<u8>,
    #[serde(default)]
    pub interval_ms: Option<u16>,
    #[serde(default)]
    pub period_ms: Option<u32>,
    #[serde(default)]
    pub credentials: Option<bool>,
    #[serde(default)]
    pub page: Option<u8>,
}

impl TaskConfig {
    /// Build the request described by `op` and its parameters.
    pub fn to_request(&self, job_netkey: NetKeyIndex) -> Result<ConfigRequest, String> {
        let netkey_index = self.netkey_index.unwrap_or(job_netkey);
        let request = match self.op.as_str() {
            "appkey_add" => ConfigRequest::AppKeyAdd {
                appkey_index: self.require("appkey_index", self.appkey_index)?,
                netkey_index,
            },
            "appkey_remove" => ConfigRequest::AppKeyRemove {
                appkey_index: self.require("appkey_index", self.appkey_index)?,
                netkey_index,
            },
            "appkey_list" => ConfigRequest::AppKeyList { netkey_index },
            "model_bind" => ConfigRequest::ModelBind {
                element: self.element.unwrap_or(0),
                model: self.model_id()?,
                appkey_index: self.require("appkey_index", self.appkey_index)?,
            },
            "model_unbind" => ConfigRequest::ModelUnbind {
                element: self.element.unwrap_or(0),
                model: self.model_id()?,
                appkey_index: self.require("appkey_index", self.appkey_index)?,
            },
            "model_bindings_list" => ConfigRequest::ModelBindingsList {
                element: self.element.unwrap_or(0),
                model: self.model_id()?,
            },
            "model_sub_add" => ConfigRequest::ModelSubAdd {
                element: self.element.unwrap_or(0),
                model: self.model_id()?,
                address: self.require("address", self.address)?,
            },
            "model_sub_remove" => ConfigRequest::ModelSubRemove {
                element: self.element.unwrap_or(0),
                model: self.model_id()?,
                address: self.require("address", self.address)?,
            },
            "model_sub_set" => ConfigRequest::ModelSubSet {
                element: self.element.unwrap_or(0),
                model: self.model_id()?,
                address: self.require("address", self.address)?,
            },
            "model_sub_clear" => ConfigRequest::ModelSubClear {
                element: self.element.unwrap_or(0),
                model: self.model_id()?,
            },
            "model_sub_list" => ConfigRequest::ModelSubList {
                element: self.element.unwrap_or(0),
                model: self.model_id()?,
            },
            "model_pub_set" => ConfigRequest::ModelPubSet {
                element: self.element.unwrap_or(0),
                model: self.model_id()?,
                publication: Publication {
                    address: self.require("address", self.address)?,
                    appkey_index: self.require("appkey_index", self.appkey_index)?,
                    friendship_credentials: self.credentials.unwrap_or(false),
                    ttl: self.ttl.unwrap_or(0xff),
                    period_ms: self.period_ms.unwrap_or(0),
                    retransmit_count: self.count.unwrap_or(0),
                    retransmit_interval_ms: self.interval_ms.unwrap_or(50),
                },
            },
            "model_pub_get" => ConfigRequest::ModelPubGet {
                element: self.element.unwrap_or(0),
                model: self.model_id()?,
            },
            "default_ttl_set" => ConfigRequest::DefaultTtlSet {
                ttl: self.require("ttl", self.ttl)?,
            },
            "default_ttl_get" => ConfigRequest::DefaultTtlGet,
            "gatt_proxy_set" => ConfigRequest::GattProxySet {
                enabled: self.require("enabled", self.enabled)?,
            },
            "gatt_proxy_get" => ConfigRequest::GattProxyGet,
            "relay_set" => ConfigRequest::RelaySet {
                enabled: self.require("enabled", self.enabled)?,
                retransmit_count: self.count.unwrap_or(0),
                retransmit_interval_ms: self.interval_ms.unwrap_or(10),
            },
            "relay_get" => ConfigRequest::RelayGet,
            "friend_set" => ConfigRequest::FriendSet {
                enabled: self.require("enabled", self.enabled)?,
            },
            "friend_get" => ConfigRequest::FriendGet,
            "network_transmit_set" => ConfigRequest::NetworkTransmitSet {
                transmit_count: self.require("count", self.count)?,
                transmit_interval_ms: self.interval_ms.unwrap_or(10),
            },
            "network_transmit_get" => ConfigRequest::NetworkTransmitGet,
            "dcd_get" => ConfigRequest::DcdGet {
                page: self.page.unwrap_or(0),
            },
            "reset_node" => ConfigRequest::ResetNode,
            other => return Err(format!("unknown op '{other}'")),
        };
        Ok(request)
    }

    fn require<V>(&self, field: &str, value: Option<V>) -> Result<V, String> {
        value.ok_or_else(|| format!("op '{}' requires `{}`", self.op, field))
    }

    fn model_id(&self) -> Result<ModelId, String> {
        let model = self.require("model", self.model)?;
        Ok(match self.vendor {
            Some(vendor) => ModelId::vendor(vendor, model),
            None => ModelId::sig(model),
        })
    }
}

/// One validated task: its request and resolved links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub request: ConfigRequest,
    /// Index of the next task in the job on success.
    pub on_success: Option<usize>,
    /// Index of the fallback task in the job.
    pub on_failure: Option<usize>,
}

/// One validated job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub destination: Destination,
    pub tasks: Vec<TaskSpec>,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>`, so durations are parsed
/// and every job's task links are known to be acyclic.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub settings: DistributorSettings,
    pub simulation: SimSettings,
    pub sim_nodes: Vec<SimNodeSpec>,
    pub jobs: Vec<JobSpec>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        settings: DistributorSettings,
        simulation: SimSettings,
        sim_nodes: Vec<SimNodeSpec>,
        jobs: Vec<JobSpec>,
    ) -> Self {
        Self {
            settings,
            simulation,
            sim_nodes,
            jobs,
        }
    }
}
