// src/task/mod.rs

//! Configuration tasks and the trees they are arranged in.
//!
//! - [`tree`] holds the arena of tasks a job walks through, with
//!   on-success and on-failure successors.
//! - [`ops`] provides the concrete task kinds (status, list, composition,
//!   publication read-back).
//! - [`dcd`] parses composition data pages.

pub mod dcd;
pub mod ops;
pub mod tree;

use std::fmt;

use crate::errors::RequestError;
use crate::transport::{ConfigClient, ConfigEvent, EventResult};
use crate::types::{Destination, RequestHandle};

pub use dcd::{Composition, CompositionError, Element, Features};
pub use ops::{
    task_for, DcdGetTask, ListTask, PubGetTask, StatusTask, MAX_DCD_SIZE, MAX_LIST_ITEMS,
};
pub use tree::{TaskId, TaskState, TaskTree};

/// Outcome of issuing a task's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Accepted by the transport; answers will carry this handle.
    Sent(RequestHandle),
    /// Transport temporarily out of resources.
    Busy,
    /// Rejected for good.
    Failed,
    /// The task could not even build its request.
    Aborted,
}

/// Outcome of feeding a protocol event to the active task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Done,
    /// More events are expected.
    InProgress,
    /// The answer (or the request) was lost in transit.
    Timeout,
    /// The server rejected the request.
    Failed,
    /// Local problem while handling the answer; the request gets cancelled.
    Aborted,
}

/// One configuration operation applied to one destination.
///
/// Tasks are driven by an executor: `send_request` is called whenever the
/// request has to be (re)issued, `handle_event` for every protocol event that
/// belongs to the outstanding request (or is not tied to any request).
pub trait ConfigTask: fmt::Debug + Send {
    fn send_request(&mut self, client: &mut dyn ConfigClient, dest: Destination)
    -> RequestStatus;

    fn handle_event(&mut self, dest: Destination, event: &ConfigEvent) -> EventStatus;

    /// Human readable description, including results collected so far.
    fn describe(&self) -> String;
}

/// Map the transport's answer to a request into a [`RequestStatus`].
pub fn request_status_from_client(result: Result<RequestHandle, RequestError>) -> RequestStatus {
    match result {
        Ok(handle) => RequestStatus::Sent(handle),
        Err(RequestError::NoMoreResources) => RequestStatus::Busy,
        Err(_) => RequestStatus::Failed,
    }
}

/// Map the result carried by a terminal event into an [`EventStatus`].
pub fn event_status_from_result(result: EventResult) -> EventStatus {
    match result {
        EventResult::Success => EventStatus::Done,
        EventResult::Timeout => EventStatus::Timeout,
        EventResult::Failed(_) => EventStatus::Failed,
    }
}
