// src/task/ops.rs

//! Concrete configuration tasks.

use tracing::{debug, warn};

use crate::task::dcd::Composition;
use crate::task::{
    event_status_from_result, request_status_from_client, ConfigTask, EventStatus, RequestStatus,
};
use crate::transport::{
    ConfigClient, ConfigEvent, ConfigRequest, EventBody, EventResult, ModelId, Publication,
};
use crate::types::Destination;

/// Upper bound on the items a list task collects.
pub const MAX_LIST_ITEMS: usize = 64;

/// Upper bound on the raw composition data a DCD task collects.
pub const MAX_DCD_SIZE: usize = 1024;

/// Build the task matching a request kind.
pub fn task_for(request: ConfigRequest) -> Box<dyn ConfigTask> {
    match request {
        ConfigRequest::DcdGet { page } => Box::new(DcdGetTask::new(page)),
        ConfigRequest::ModelPubGet { element, model } => {
            Box::new(PubGetTask::new(element, model))
        }
        ConfigRequest::AppKeyList { .. }
        | ConfigRequest::ModelBindingsList { .. }
        | ConfigRequest::ModelSubList { .. } => Box::new(ListTask::new(request)),
        other => Box::new(StatusTask::new(other)),
    }
}

/// A request answered by a single status event.
///
/// Used for every add/remove/bind/set/get operation and for node reset.
#[derive(Debug, Clone)]
pub struct StatusTask {
    request: ConfigRequest,
    result: Option<EventResult>,
    value: Option<u8>,
}

impl StatusTask {
    pub fn new(request: ConfigRequest) -> Self {
        Self {
            request,
            result: None,
            value: None,
        }
    }

    pub fn request(&self) -> &ConfigRequest {
        &self.request
    }

    pub fn result(&self) -> Option<EventResult> {
        self.result
    }

    /// State value reported by the server, for get/set requests.
    pub fn value(&self) -> Option<u8> {
        self.value
    }
}

impl ConfigTask for StatusTask {
    fn send_request(
        &mut self,
        client: &mut dyn ConfigClient,
        dest: Destination,
    ) -> RequestStatus {
        self.result = None;
        self.value = None;
        request_status_from_client(client.send_request(dest, &self.request))
    }

    fn handle_event(&mut self, _dest: Destination, event: &ConfigEvent) -> EventStatus {
        match &event.body {
            EventBody::Status { result, value } => {
                self.result = Some(*result);
                if let Some(v) = value {
                    self.value = Some(*v);
                }
                event_status_from_result(*result)
            }
            _ => EventStatus::InProgress,
        }
    }

    fn describe(&self) -> String {
        match self.value {
            Some(value) if self.result == Some(EventResult::Success) => {
                format!("{} -> value={value}", self.request)
            }
            _ => self.request.to_string(),
        }
    }
}

/// A request answered by zero or more list chunks and a closing list-end.
#[derive(Debug, Clone)]
pub struct ListTask {
    request: ConfigRequest,
    items: Vec<u16>,
    max_items: usize,
    result: Option<EventResult>,
}

impl ListTask {
    pub fn new(request: ConfigRequest) -> Self {
        Self::with_limit(request, MAX_LIST_ITEMS)
    }

    pub fn with_limit(request: ConfigRequest, max_items: usize) -> Self {
        Self {
            request,
            items: Vec::new(),
            max_items,
            result: None,
        }
    }

    pub fn items(&self) -> &[u16] {
        &self.items
    }

    pub fn result(&self) -> Option<EventResult> {
        self.result
    }
}

impl ConfigTask for ListTask {
    fn send_request(
        &mut self,
        client: &mut dyn ConfigClient,
        dest: Destination,
    ) -> RequestStatus {
        // A retry starts collecting from scratch.
        self.items.clear();
        self.result = None;
        request_status_from_client(client.send_request(dest, &self.request))
    }

    fn handle_event(&mut self, dest: Destination, event: &ConfigEvent) -> EventStatus {
        match &event.body {
            EventBody::ListChunk { items } => {
                if self.items.len() + items.len() > self.max_items {
                    warn!(
                        %dest,
                        request = %self.request,
                        collected = self.items.len(),
                        incoming = items.len(),
                        max = self.max_items,
                        "list response exceeds the item limit"
                    );
                    return EventStatus::Aborted;
                }
                self.items.extend_from_slice(items);
                debug!(%dest, collected = self.items.len(), "list chunk collected");
                EventStatus::InProgress
            }
            EventBody::ListEnd { result } => {
                self.result = Some(*result);
                event_status_from_result(*result)
            }
            _ => EventStatus::InProgress,
        }
    }

    fn describe(&self) -> String {
        if self.result != Some(EventResult::Success) {
            return self.request.to_string();
        }
        let items: Vec<String> = self.items.iter().map(|i| i.to_string()).collect();
        format!(
            "{} -> cnt={},items=[{}]",
            self.request,
            self.items.len(),
            items.join(",")
        )
    }
}

/// Fetch and parse composition data.
#[derive(Debug, Clone)]
pub struct DcdGetTask {
    page: u8,
    raw: Vec<u8>,
    composition: Option<Composition>,
    result: Option<EventResult>,
}

impl DcdGetTask {
    pub fn new(page: u8) -> Self {
        Self {
            page,
            raw: Vec::new(),
            composition: None,
            result: None,
        }
    }

    pub fn composition(&self) -> Option<&Composition> {
        self.composition.as_ref()
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

impl ConfigTask for DcdGetTask {
    fn send_request(
        &mut self,
        client: &mut dyn ConfigClient,
        dest: Destination,
    ) -> RequestStatus {
        debug!(%dest, page = self.page, "composition data request");
        self.raw.clear();
        self.composition = None;
        self.result = None;
        let request = ConfigRequest::DcdGet { page: self.page };
        request_status_from_client(client.send_request(dest, &request))
    }

    fn handle_event(&mut self, dest: Destination, event: &ConfigEvent) -> EventStatus {
        match &event.body {
            EventBody::DcdChunk { data } => {
                if self.raw.len() + data.len() > MAX_DCD_SIZE {
                    warn!(
                        %dest,
                        collected = self.raw.len(),
                        incoming = data.len(),
                        "composition data exceeds the size limit"
                    );
                    return EventStatus::Aborted;
                }
                self.raw.extend_from_slice(data);
                EventStatus::InProgress
            }
            EventBody::DcdEnd { result } => {
                self.result = Some(*result);
                if *result != EventResult::Success {
                    return event_status_from_result(*result);
                }
                match Composition::parse(&self.raw) {
                    Ok(composition) => {
                        debug!(%dest, %composition, "composition data parsed");
                        self.composition = Some(composition);
                        EventStatus::Done
                    }
                    Err(e) => {
                        warn!(%dest, error = %e, "malformed composition data");
                        EventStatus::Failed
                    }
                }
            }
            _ => EventStatus::InProgress,
        }
    }

    fn describe(&self) -> String {
        match &self.composition {
            Some(composition) => format!("dcd get (page={}) -> {composition}", self.page),
            None => format!("dcd get (page={})", self.page),
        }
    }
}

/// Read back the publication parameters of a model.
#[derive(Debug, Clone)]
pub struct PubGetTask {
    element: u8,
    model: ModelId,
    publication: Option<Publication>,
    result: Option<EventResult>,
}

impl PubGetTask {
    pub fn new(element: u8, model: ModelId) -> Self {
        Self {
            element,
            model,
            publication: None,
            result: None,
        }
    }

    /// Parameters reported by the server; `None` if it publishes nothing.
    pub fn publication(&self) -> Option<&Publication> {
        self.publication.as_ref()
    }

    pub fn result(&self) -> Option<EventResult> {
        self.result
    }

    fn request(&self) -> ConfigRequest {
        ConfigRequest::ModelPubGet {
            element: self.element,
            model: self.model,
        }
    }
}

impl ConfigTask for PubGetTask {
    fn send_request(
        &mut self,
        client: &mut dyn ConfigClient,
        dest: Destination,
    ) -> RequestStatus {
        self.publication = None;
        self.result = None;
        request_status_from_client(client.send_request(dest, &self.request()))
    }

    fn handle_event(&mut self, _dest: Destination, event: &ConfigEvent) -> EventStatus {
        match &event.body {
            EventBody::PublicationStatus {
                result,
                publication,
            } => {
                self.result = Some(*result);
                if *result == EventResult::Success {
                    self.publication = *publication;
                }
                event_status_from_result(*result)
            }
            _ => EventStatus::InProgress,
        }
    }

    fn describe(&self) -> String {
        let request = self.request();
        if self.result != Some(EventResult::Success) {
            return request.to_string();
        }
        match &self.publication {
            Some(p) => format!(
                "{request} -> addr=0x{:04x},appkey_idx={},cred={},ttl={},period={}ms,tx_cnt={},tx_interval={}ms",
                p.address,
                p.appkey_index,
                u8::from(p.friendship_credentials),
                p.ttl,
                p.period_ms,
                p.retransmit_count,
                p.retransmit_interval_ms
            ),
            None => format!("{request} -> unset"),
        }
    }
}
