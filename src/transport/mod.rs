// src/transport/mod.rs

//! Boundary to the mesh stack.
//!
//! The engine never talks to the radio directly. It issues
//! [`ConfigRequest`]s through a [`ConfigClient`], waits for
//! [`ConfigEvent`]s to be delivered back, and arms one-shot timers through a
//! [`TimerService`].
//!
//! - [`timer`] contains the timer trait and the tokio-backed implementation
//!   used by the async runtime.
//! - [`sim`] contains an in-memory network of configuration servers used by
//!   the `meshconf` binary and by end-to-end tests.

pub mod sim;
pub mod timer;

use std::fmt;

use crate::errors::RequestError;
use crate::types::{Destination, NetKeyIndex, NodeAddress, RequestHandle};

pub use sim::{SimNetwork, SimNodeSpec, SimSettings};
pub use timer::{TimerId, TimerService, TokioTimers};

/// Vendor id used for models defined by the mesh specification itself.
pub const SIG_VENDOR_ID: u16 = 0xffff;

/// Identifies a model on an element: SIG models use [`SIG_VENDOR_ID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId {
    pub vendor_id: u16,
    pub model_id: u16,
}

impl ModelId {
    pub fn sig(model_id: u16) -> Self {
        Self {
            vendor_id: SIG_VENDOR_ID,
            model_id,
        }
    }

    pub fn vendor(vendor_id: u16, model_id: u16) -> Self {
        Self {
            vendor_id,
            model_id,
        }
    }

    pub fn is_sig(&self) -> bool {
        self.vendor_id == SIG_VENDOR_ID
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sig() {
            write!(f, "0x{:04x}", self.model_id)
        } else {
            write!(f, "0x{:04x}:0x{:04x}", self.vendor_id, self.model_id)
        }
    }
}

/// Model publication parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publication {
    pub address: NodeAddress,
    pub appkey_index: u16,
    pub friendship_credentials: bool,
    pub ttl: u8,
    pub period_ms: u32,
    pub retransmit_count: u8,
    pub retransmit_interval_ms: u16,
}

/// One configuration operation understood by a configuration server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigRequest {
    AppKeyAdd {
        appkey_index: u16,
        netkey_index: NetKeyIndex,
    },
    AppKeyRemove {
        appkey_index: u16,
        netkey_index: NetKeyIndex,
    },
    AppKeyList {
        netkey_index: NetKeyIndex,
    },
    ModelBind {
        element: u8,
        model: ModelId,
        appkey_index: u16,
    },
    ModelUnbind {
        element: u8,
        model: ModelId,
        appkey_index: u16,
    },
    ModelBindingsList {
        element: u8,
        model: ModelId,
    },
    ModelSubAdd {
        element: u8,
        model: ModelId,
        address: NodeAddress,
    },
    ModelSubRemove {
        element: u8,
        model: ModelId,
        address: NodeAddress,
    },
    /// Replace every subscription of the model with `address`.
    ModelSubSet {
        element: u8,
        model: ModelId,
        address: NodeAddress,
    },
    ModelSubClear {
        element: u8,
        model: ModelId,
    },
    ModelSubList {
        element: u8,
        model: ModelId,
    },
    ModelPubSet {
        element: u8,
        model: ModelId,
        publication: Publication,
    },
    ModelPubGet {
        element: u8,
        model: ModelId,
    },
    DefaultTtlSet {
        ttl: u8,
    },
    DefaultTtlGet,
    GattProxySet {
        enabled: bool,
    },
    GattProxyGet,
    RelaySet {
        enabled: bool,
        retransmit_count: u8,
        retransmit_interval_ms: u16,
    },
    RelayGet,
    FriendSet {
        enabled: bool,
    },
    FriendGet,
    NetworkTransmitSet {
        transmit_count: u8,
        transmit_interval_ms: u16,
    },
    NetworkTransmitGet,
    DcdGet {
        page: u8,
    },
    ResetNode,
}

impl ConfigRequest {
    /// Stable snake_case name of the request kind, as used in config files.
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigRequest::AppKeyAdd { .. } => "appkey_add",
            ConfigRequest::AppKeyRemove { .. } => "appkey_remove",
            ConfigRequest::AppKeyList { .. } => "appkey_list",
            ConfigRequest::ModelBind { .. } => "model_bind",
            ConfigRequest::ModelUnbind { .. } => "model_unbind",
            ConfigRequest::ModelBindingsList { .. } => "model_bindings_list",
            ConfigRequest::ModelSubAdd { .. } => "model_sub_add",
            ConfigRequest::ModelSubRemove { .. } => "model_sub_remove",
            ConfigRequest::ModelSubSet { .. } => "model_sub_set",
            ConfigRequest::ModelSubClear { .. } => "model_sub_clear",
            ConfigRequest::ModelSubList { .. } => "model_sub_list",
            ConfigRequest::ModelPubSet { .. } => "model_pub_set",
            ConfigRequest::ModelPubGet { .. } => "model_pub_get",
            ConfigRequest::DefaultTtlSet { .. } => "default_ttl_set",
            ConfigRequest::DefaultTtlGet => "default_ttl_get",
            ConfigRequest::GattProxySet { .. } => "gatt_proxy_set",
            ConfigRequest::GattProxyGet => "gatt_proxy_get",
            ConfigRequest::RelaySet { .. } => "relay_set",
            ConfigRequest::RelayGet => "relay_get",
            ConfigRequest::FriendSet { .. } => "friend_set",
            ConfigRequest::FriendGet => "friend_get",
            ConfigRequest::NetworkTransmitSet { .. } => "network_transmit_set",
            ConfigRequest::NetworkTransmitGet => "network_transmit_get",
            ConfigRequest::DcdGet { .. } => "dcd_get",
            ConfigRequest::ResetNode => "reset_node",
        }
    }
}

impl fmt::Display for ConfigRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigRequest::AppKeyAdd {
                appkey_index,
                netkey_index,
            } => write!(
                f,
                "appkey add (appkey_idx={appkey_index},netkey_idx={netkey_index})"
            ),
            ConfigRequest::AppKeyRemove {
                appkey_index,
                netkey_index,
            } => write!(
                f,
                "appkey remove (appkey_idx={appkey_index},netkey_idx={netkey_index})"
            ),
            ConfigRequest::AppKeyList { netkey_index } => {
                write!(f, "appkey list (netkey_idx={netkey_index})")
            }
            ConfigRequest::ModelBind {
                element,
                model,
                appkey_index,
            } => write!(
                f,
                "model bind (elem={element},model={model},appkey_idx={appkey_index})"
            ),
            ConfigRequest::ModelUnbind {
                element,
                model,
                appkey_index,
            } => write!(
                f,
                "model unbind (elem={element},model={model},appkey_idx={appkey_index})"
            ),
            ConfigRequest::ModelBindingsList { element, model } => {
                write!(f, "model bindings list (elem={element},model={model})")
            }
            ConfigRequest::ModelSubAdd {
                element,
                model,
                address,
            } => write!(
                f,
                "model sub add (elem={element},model={model},addr=0x{address:04x})"
            ),
            ConfigRequest::ModelSubRemove {
                element,
                model,
                address,
            } => write!(
                f,
                "model sub remove (elem={element},model={model},addr=0x{address:04x})"
            ),
            ConfigRequest::ModelSubSet {
                element,
                model,
                address,
            } => write!(
                f,
                "model sub set (elem={element},model={model},addr=0x{address:04x})"
            ),
            ConfigRequest::ModelSubClear { element, model } => {
                write!(f, "model sub clear (elem={element},model={model})")
            }
            ConfigRequest::ModelSubList { element, model } => {
                write!(f, "model sub list (elem={element},model={model})")
            }
            ConfigRequest::ModelPubSet {
                element,
                model,
                publication,
            } => write!(
                f,
                "model pub set (elem={element},model={model},addr=0x{:04x},appkey_idx={},ttl={},period={}ms)",
                publication.address, publication.appkey_index, publication.ttl, publication.period_ms
            ),
            ConfigRequest::ModelPubGet { element, model } => {
                write!(f, "model pub get (elem={element},model={model})")
            }
            ConfigRequest::DefaultTtlSet { ttl } => write!(f, "default ttl set (ttl={ttl})"),
            ConfigRequest::DefaultTtlGet => f.write_str("default ttl get"),
            ConfigRequest::GattProxySet { enabled } => {
                write!(f, "gatt proxy set (value={})", u8::from(*enabled))
            }
            ConfigRequest::GattProxyGet => f.write_str("gatt proxy get"),
            ConfigRequest::RelaySet {
                enabled,
                retransmit_count,
                retransmit_interval_ms,
            } => write!(
                f,
                "relay set (value={},cnt={retransmit_count},interval={retransmit_interval_ms}ms)",
                u8::from(*enabled)
            ),
            ConfigRequest::RelayGet => f.write_str("relay get"),
            ConfigRequest::FriendSet { enabled } => {
                write!(f, "friend set (value={})", u8::from(*enabled))
            }
            ConfigRequest::FriendGet => f.write_str("friend get"),
            ConfigRequest::NetworkTransmitSet {
                transmit_count,
                transmit_interval_ms,
            } => write!(
                f,
                "network transmit set (cnt={transmit_count},interval={transmit_interval_ms}ms)"
            ),
            ConfigRequest::NetworkTransmitGet => f.write_str("network transmit get"),
            ConfigRequest::DcdGet { page } => write!(f, "dcd get (page={page})"),
            ConfigRequest::ResetNode => f.write_str("reset node"),
        }
    }
}

/// Result carried by a terminal configuration event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResult {
    Success,
    /// The stack itself gave up waiting for the server.
    Timeout,
    /// The server answered with a non-zero status code.
    Failed(u16),
}

/// Payload of a protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    /// Final status of a request, optionally with the reported state value.
    Status {
        result: EventResult,
        value: Option<u8>,
    },
    /// Part of a list response (appkeys, bindings, subscriptions).
    ListChunk { items: Vec<u16> },
    /// Terminates a list response.
    ListEnd { result: EventResult },
    /// Part of the composition data.
    DcdChunk { data: Vec<u8> },
    /// Terminates a composition data response.
    DcdEnd { result: EventResult },
    /// Publication parameters of a model. `None` when nothing is published.
    PublicationStatus {
        result: EventResult,
        publication: Option<Publication>,
    },
    /// Stack traffic that is not tied to a particular request.
    Unsolicited { source: NodeAddress, opcode: u16 },
}

/// A protocol event delivered by the mesh stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEvent {
    handle: Option<RequestHandle>,
    pub body: EventBody,
}

impl ConfigEvent {
    pub fn new(handle: RequestHandle, body: EventBody) -> Self {
        Self {
            handle: Some(handle),
            body,
        }
    }

    /// An event type that cannot be tied to a request; every executor sees it.
    pub fn uncorrelated(body: EventBody) -> Self {
        Self { handle: None, body }
    }

    pub fn status(handle: RequestHandle, result: EventResult) -> Self {
        Self::new(
            handle,
            EventBody::Status {
                result,
                value: None,
            },
        )
    }

    pub fn status_value(handle: RequestHandle, result: EventResult, value: u8) -> Self {
        Self::new(
            handle,
            EventBody::Status {
                result,
                value: Some(value),
            },
        )
    }

    pub fn list_chunk(handle: RequestHandle, items: Vec<u16>) -> Self {
        Self::new(handle, EventBody::ListChunk { items })
    }

    pub fn list_end(handle: RequestHandle, result: EventResult) -> Self {
        Self::new(handle, EventBody::ListEnd { result })
    }

    pub fn dcd_chunk(handle: RequestHandle, data: Vec<u8>) -> Self {
        Self::new(handle, EventBody::DcdChunk { data })
    }

    pub fn dcd_end(handle: RequestHandle, result: EventResult) -> Self {
        Self::new(handle, EventBody::DcdEnd { result })
    }

    pub fn publication_status(
        handle: RequestHandle,
        result: EventResult,
        publication: Option<Publication>,
    ) -> Self {
        Self::new(
            handle,
            EventBody::PublicationStatus {
                result,
                publication,
            },
        )
    }

    /// Handle of the request this event answers.
    ///
    /// `None` means the event type is not correlated with any request.
    pub fn correlation(&self) -> Option<RequestHandle> {
        self.handle
    }
}

/// Configuration client side of the mesh stack.
///
/// Production code would wrap the vendor stack; the binary uses
/// [`SimNetwork`] and tests use a recording fake.
pub trait ConfigClient: Send {
    /// Issue a request to a configuration server.
    ///
    /// The answer arrives later as one or more [`ConfigEvent`]s carrying the
    /// returned handle.
    fn send_request(
        &mut self,
        dest: Destination,
        request: &ConfigRequest,
    ) -> Result<RequestHandle, RequestError>;

    /// Best-effort cancellation of an outstanding request.
    fn cancel_request(&mut self, handle: RequestHandle) -> Result<(), RequestError>;
}
