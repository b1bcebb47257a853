// src/transport/sim.rs

//! In-memory network of configuration servers.
//!
//! Every request is applied to the addressed node right away; the answer is
//! posted into the runtime channel after the configured latency. List and
//! composition answers are split into several chunk events.
//!
//! Fault injection is deterministic:
//! - every `busy_every`-th request is refused with
//!   [`RequestError::NoMoreResources`];
//! - every `drop_every`-th answer is lost;
//! - nodes answer request kinds listed in their `reject` list with an error
//!   status;
//! - requests to addresses without a node are accepted and never answered.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::engine::RuntimeEvent;
use crate::errors::RequestError;
use crate::task::{Composition, Element, Features};
use crate::transport::{
    ConfigClient, ConfigEvent, ConfigRequest, EventBody, EventResult, ModelId, Publication,
};
use crate::types::{Destination, NetKeyIndex, NodeAddress, RequestHandle};

const STATUS_INVALID_MODEL: u16 = 0x02;
const STATUS_INVALID_APPKEY_INDEX: u16 = 0x03;
const STATUS_INVALID_NETKEY_INDEX: u16 = 0x04;
const STATUS_CANNOT_SET: u16 = 0x0f;

const MODEL_CONFIG_SERVER: u16 = 0x0000;
const MODEL_HEALTH_SERVER: u16 = 0x0002;
const MODEL_GENERIC_ONOFF_SERVER: u16 = 0x1000;
const MODEL_GENERIC_ONOFF_CLIENT: u16 = 0x1001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSettings {
    pub latency: Duration,
    /// Refuse every Nth request as busy. 0 disables.
    pub busy_every: u32,
    /// Lose every Nth answer. 0 disables.
    pub drop_every: u32,
    pub list_chunk_size: usize,
    pub dcd_chunk_size: usize,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(50),
            busy_every: 0,
            drop_every: 0,
            list_chunk_size: 4,
            dcd_chunk_size: 16,
        }
    }
}

/// Description of one simulated node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimNodeSpec {
    pub destination: Destination,
    pub company_id: u16,
    /// Request kinds (as in [`ConfigRequest::kind`]) answered with an error.
    pub reject: Vec<String>,
}

impl SimNodeSpec {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            company_id: 0x02ff,
            reject: Vec::new(),
        }
    }
}

type ModelKey = (u8, ModelId);

/// State of a simulated configuration server.
#[derive(Debug, Clone)]
pub struct SimNode {
    spec: SimNodeSpec,
    composition: Composition,
    appkeys: BTreeSet<(NetKeyIndex, u16)>,
    bindings: BTreeMap<ModelKey, BTreeSet<u16>>,
    subscriptions: BTreeMap<ModelKey, BTreeSet<NodeAddress>>,
    publications: BTreeMap<ModelKey, Publication>,
    default_ttl: u8,
    gatt_proxy: bool,
    relay: bool,
    friend: bool,
    network_transmit_count: u8,
    reset: bool,
}

impl SimNode {
    fn new(spec: SimNodeSpec) -> Self {
        let composition = Composition {
            company_id: spec.company_id,
            product_id: 0x0001,
            version_id: 0x0001,
            replay_protection_list_len: 32,
            features: Features {
                relay: true,
                proxy: true,
                friend: true,
                low_power: false,
            },
            elements: vec![Element {
                location: 0,
                sig_models: vec![
                    MODEL_CONFIG_SERVER,
                    MODEL_HEALTH_SERVER,
                    MODEL_GENERIC_ONOFF_SERVER,
                    MODEL_GENERIC_ONOFF_CLIENT,
                ],
                vendor_models: Vec::new(),
            }],
        };
        Self {
            spec,
            composition,
            appkeys: BTreeSet::new(),
            bindings: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            publications: BTreeMap::new(),
            default_ttl: 5,
            gatt_proxy: true,
            relay: true,
            friend: false,
            network_transmit_count: 2,
            reset: false,
        }
    }

    pub fn composition(&self) -> &Composition {
        &self.composition
    }

    pub fn appkeys(&self) -> impl Iterator<Item = u16> + '_ {
        self.appkeys.iter().map(|(_, appkey)| *appkey)
    }

    pub fn bindings(&self, element: u8, model: ModelId) -> Vec<u16> {
        self.bindings
            .get(&(element, model))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriptions(&self, element: u8, model: ModelId) -> Vec<NodeAddress> {
        self.subscriptions
            .get(&(element, model))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn publication(&self, element: u8, model: ModelId) -> Option<&Publication> {
        self.publications.get(&(element, model))
    }

    pub fn default_ttl(&self) -> u8 {
        self.default_ttl
    }

    pub fn was_reset(&self) -> bool {
        self.reset
    }

    fn has_model(&self, element: u8, model: ModelId) -> bool {
        self.composition
            .elements
            .get(usize::from(element))
            .is_some_and(|e| e.models().any(|m| m == model))
    }

    fn has_appkey(&self, appkey_index: u16) -> bool {
        self.appkeys.iter().any(|(_, idx)| *idx == appkey_index)
    }

    /// Apply a request and build the answer.
    fn apply(&mut self, request: &ConfigRequest, settings: &SimSettings) -> Vec<EventBody> {
        if self.reset {
            return Vec::new();
        }

        if self.spec.reject.iter().any(|kind| kind == request.kind()) {
            let result = EventResult::Failed(STATUS_CANNOT_SET);
            return vec![match request {
                ConfigRequest::AppKeyList { .. }
                | ConfigRequest::ModelBindingsList { .. }
                | ConfigRequest::ModelSubList { .. } => EventBody::ListEnd { result },
                ConfigRequest::DcdGet { .. } => EventBody::DcdEnd { result },
                ConfigRequest::ModelPubGet { .. } => EventBody::PublicationStatus {
                    result,
                    publication: None,
                },
                _ => EventBody::Status {
                    result,
                    value: None,
                },
            }];
        }

        match request {
            ConfigRequest::AppKeyAdd {
                appkey_index,
                netkey_index,
            } => {
                if *netkey_index != self.spec.destination.netkey_index {
                    return status(EventResult::Failed(STATUS_INVALID_NETKEY_INDEX));
                }
                self.appkeys.insert((*netkey_index, *appkey_index));
                status(EventResult::Success)
            }
            ConfigRequest::AppKeyRemove {
                appkey_index,
                netkey_index,
            } => {
                self.appkeys.remove(&(*netkey_index, *appkey_index));
                for bound in self.bindings.values_mut() {
                    bound.remove(appkey_index);
                }
                status(EventResult::Success)
            }
            ConfigRequest::AppKeyList { netkey_index } => {
                let items = self
                    .appkeys
                    .iter()
                    .filter(|(net, _)| net == netkey_index)
                    .map(|(_, app)| *app)
                    .collect();
                list(items, settings.list_chunk_size)
            }
            ConfigRequest::ModelBind {
                element,
                model,
                appkey_index,
            } => {
                if !self.has_model(*element, *model) {
                    return status(EventResult::Failed(STATUS_INVALID_MODEL));
                }
                if !self.has_appkey(*appkey_index) {
                    return status(EventResult::Failed(STATUS_INVALID_APPKEY_INDEX));
                }
                self.bindings
                    .entry((*element, *model))
                    .or_default()
                    .insert(*appkey_index);
                status(EventResult::Success)
            }
            ConfigRequest::ModelUnbind {
                element,
                model,
                appkey_index,
            } => {
                if !self.has_model(*element, *model) {
                    return status(EventResult::Failed(STATUS_INVALID_MODEL));
                }
                if let Some(bound) = self.bindings.get_mut(&(*element, *model)) {
                    bound.remove(appkey_index);
                }
                status(EventResult::Success)
            }
            ConfigRequest::ModelBindingsList { element, model } => {
                if !self.has_model(*element, *model) {
                    return vec![EventBody::ListEnd {
                        result: EventResult::Failed(STATUS_INVALID_MODEL),
                    }];
                }
                list(self.bindings(*element, *model), settings.list_chunk_size)
            }
            ConfigRequest::ModelSubAdd {
                element,
                model,
                address,
            } => {
                if !self.has_model(*element, *model) {
                    return status(EventResult::Failed(STATUS_INVALID_MODEL));
                }
                self.subscriptions
                    .entry((*element, *model))
                    .or_default()
                    .insert(*address);
                status(EventResult::Success)
            }
            ConfigRequest::ModelSubRemove {
                element,
                model,
                address,
            } => {
                if !self.has_model(*element, *model) {
                    return status(EventResult::Failed(STATUS_INVALID_MODEL));
                }
                if let Some(subs) = self.subscriptions.get_mut(&(*element, *model)) {
                    subs.remove(address);
                }
                status(EventResult::Success)
            }
            ConfigRequest::ModelSubSet {
                element,
                model,
                address,
            } => {
                if !self.has_model(*element, *model) {
                    return status(EventResult::Failed(STATUS_INVALID_MODEL));
                }
                self.subscriptions
                    .insert((*element, *model), BTreeSet::from([*address]));
                status(EventResult::Success)
            }
            ConfigRequest::ModelSubClear { element, model } => {
                if !self.has_model(*element, *model) {
                    return status(EventResult::Failed(STATUS_INVALID_MODEL));
                }
                self.subscriptions.remove(&(*element, *model));
                status(EventResult::Success)
            }
            ConfigRequest::ModelSubList { element, model } => {
                if !self.has_model(*element, *model) {
                    return vec![EventBody::ListEnd {
                        result: EventResult::Failed(STATUS_INVALID_MODEL),
                    }];
                }
                list(self.subscriptions(*element, *model), settings.list_chunk_size)
            }
            ConfigRequest::ModelPubSet {
                element,
                model,
                publication,
            } => {
                if !self.has_model(*element, *model) {
                    return status(EventResult::Failed(STATUS_INVALID_MODEL));
                }
                if !self.has_appkey(publication.appkey_index) {
                    return status(EventResult::Failed(STATUS_INVALID_APPKEY_INDEX));
                }
                self.publications.insert((*element, *model), *publication);
                status(EventResult::Success)
            }
            ConfigRequest::ModelPubGet { element, model } => {
                if !self.has_model(*element, *model) {
                    return vec![EventBody::PublicationStatus {
                        result: EventResult::Failed(STATUS_INVALID_MODEL),
                        publication: None,
                    }];
                }
                vec![EventBody::PublicationStatus {
                    result: EventResult::Success,
                    publication: self.publication(*element, *model).copied(),
                }]
            }
            ConfigRequest::DefaultTtlSet { ttl } => {
                if *ttl == 1 || *ttl > 0x7f {
                    return status(EventResult::Failed(STATUS_CANNOT_SET));
                }
                self.default_ttl = *ttl;
                status_value(self.default_ttl)
            }
            ConfigRequest::DefaultTtlGet => status_value(self.default_ttl),
            ConfigRequest::GattProxySet { enabled } => {
                self.gatt_proxy = *enabled;
                status_value(u8::from(self.gatt_proxy))
            }
            ConfigRequest::GattProxyGet => status_value(u8::from(self.gatt_proxy)),
            ConfigRequest::RelaySet { enabled, .. } => {
                self.relay = *enabled;
                status_value(u8::from(self.relay))
            }
            ConfigRequest::RelayGet => status_value(u8::from(self.relay)),
            ConfigRequest::FriendSet { enabled } => {
                self.friend = *enabled;
                status_value(u8::from(self.friend))
            }
            ConfigRequest::FriendGet => status_value(u8::from(self.friend)),
            ConfigRequest::NetworkTransmitSet { transmit_count, .. } => {
                self.network_transmit_count = *transmit_count;
                status_value(self.network_transmit_count)
            }
            ConfigRequest::NetworkTransmitGet => status_value(self.network_transmit_count),
            ConfigRequest::DcdGet { .. } => {
                let data = match self.composition.encode() {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(node = %self.spec.destination, error = %e, "composition cannot be encoded");
                        return vec![EventBody::DcdEnd {
                            result: EventResult::Failed(STATUS_CANNOT_SET),
                        }];
                    }
                };
                let chunk_size = settings.dcd_chunk_size.max(1);
                let mut events: Vec<EventBody> = data
                    .chunks(chunk_size)
                    .map(|chunk| EventBody::DcdChunk {
                        data: chunk.to_vec(),
                    })
                    .collect();
                events.push(EventBody::DcdEnd {
                    result: EventResult::Success,
                });
                events
            }
            ConfigRequest::ResetNode => {
                self.reset = true;
                self.appkeys.clear();
                self.bindings.clear();
                self.subscriptions.clear();
                self.publications.clear();
                status(EventResult::Success)
            }
        }
    }
}

fn status(result: EventResult) -> Vec<EventBody> {
    vec![EventBody::Status {
        result,
        value: None,
    }]
}

fn status_value(value: u8) -> Vec<EventBody> {
    vec![EventBody::Status {
        result: EventResult::Success,
        value: Some(value),
    }]
}

fn list(items: Vec<u16>, chunk_size: usize) -> Vec<EventBody> {
    let mut events: Vec<EventBody> = items
        .chunks(chunk_size.max(1))
        .map(|chunk| EventBody::ListChunk {
            items: chunk.to_vec(),
        })
        .collect();
    events.push(EventBody::ListEnd {
        result: EventResult::Success,
    });
    events
}

/// Simulated configuration client backed by [`SimNode`]s.
#[derive(Debug)]
pub struct SimNetwork {
    settings: SimSettings,
    nodes: BTreeMap<Destination, SimNode>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    next_handle: u32,
    requests: u64,
    answers: u64,
    in_flight: HashMap<RequestHandle, JoinHandle<()>>,
}

impl SimNetwork {
    pub fn new(
        settings: SimSettings,
        nodes: impl IntoIterator<Item = SimNodeSpec>,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|spec| (spec.destination, SimNode::new(spec)))
            .collect();
        Self {
            settings,
            nodes,
            runtime_tx,
            next_handle: 1,
            requests: 0,
            answers: 0,
            in_flight: HashMap::new(),
        }
    }

    pub fn node(&self, dest: Destination) -> Option<&SimNode> {
        self.nodes.get(&dest)
    }

    /// Number of requests seen, including the ones refused as busy.
    pub fn request_count(&self) -> u64 {
        self.requests
    }

    fn allocate_handle(&mut self) -> RequestHandle {
        let handle = RequestHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        handle
    }
}

impl ConfigClient for SimNetwork {
    fn send_request(
        &mut self,
        dest: Destination,
        request: &ConfigRequest,
    ) -> Result<RequestHandle, RequestError> {
        self.requests += 1;
        let busy_every = u64::from(self.settings.busy_every);
        if busy_every > 0 && self.requests % busy_every == 0 {
            debug!(%dest, %request, "simulated transport busy");
            return Err(RequestError::NoMoreResources);
        }

        let rt = tokio::runtime::Handle::try_current()
            .map_err(|e| RequestError::Rejected(e.to_string()))?;
        let handle = self.allocate_handle();

        let bodies = match self.nodes.get_mut(&dest) {
            Some(node) => node.apply(request, &self.settings),
            None => {
                debug!(%dest, %request, %handle, "no node at destination; request goes unanswered");
                Vec::new()
            }
        };
        if bodies.is_empty() {
            return Ok(handle);
        }

        self.answers += 1;
        let drop_every = u64::from(self.settings.drop_every);
        if drop_every > 0 && self.answers % drop_every == 0 {
            debug!(%dest, %request, %handle, "simulated answer lost");
            return Ok(handle);
        }

        self.in_flight.retain(|_, task| !task.is_finished());
        let tx = self.runtime_tx.clone();
        let latency = self.settings.latency;
        let task = rt.spawn(async move {
            sleep(latency).await;
            for body in bodies {
                trace!(%handle, ?body, "simulated answer delivered");
                if tx
                    .send(RuntimeEvent::Mesh(ConfigEvent::new(handle, body)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        self.in_flight.insert(handle, task);
        Ok(handle)
    }

    fn cancel_request(&mut self, handle: RequestHandle) -> Result<(), RequestError> {
        match self.in_flight.remove(&handle) {
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => Err(RequestError::UnknownHandle),
        }
    }
}

impl Drop for SimNetwork {
    fn drop(&mut self) {
        for (_, task) in self.in_flight.drain() {
            task.abort();
        }
    }
}
