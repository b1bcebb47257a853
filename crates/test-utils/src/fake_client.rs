use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc;
use meshconf::engine::RuntimeEvent;
use meshconf::errors::RequestError;
use meshconf::transport::{ConfigClient, ConfigEvent, ConfigRequest, EventResult};
use meshconf::types::{Destination, RequestHandle};

/// How the fake transport answers one `send_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendOutcome {
    #[default]
    Accept,
    /// Refuse with `NoMoreResources`.
    Busy,
    /// Refuse for good.
    Reject,
}

/// One call to `send_request` as seen by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    pub dest: Destination,
    pub request: ConfigRequest,
    /// Handle returned to the caller, `None` if the request was refused.
    pub handle: Option<RequestHandle>,
}

/// A fake configuration client that:
/// - answers `send_request` from a per-destination script (accept by default)
/// - records every request and every cancel
/// - optionally posts a success status for each accepted request into a
///   runtime channel.
#[derive(Debug, Default)]
pub struct FakeClient {
    scripts: HashMap<Destination, VecDeque<SendOutcome>>,
    default_outcome: SendOutcome,
    next_handle: u32,
    sent: Vec<SentRequest>,
    cancelled: Vec<RequestHandle>,
    fail_cancels: bool,
    auto_answer: Option<mpsc::Sender<RuntimeEvent>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every accepted request with a success status event.
    pub fn answering(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            auto_answer: Some(runtime_tx),
            ..Self::default()
        }
    }

    /// Queue outcomes for the next requests to `dest`. Once the script runs
    /// out the default outcome applies.
    pub fn script(&mut self, dest: Destination, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.scripts.entry(dest).or_default().extend(outcomes);
    }

    pub fn set_default(&mut self, outcome: SendOutcome) {
        self.default_outcome = outcome;
    }

    pub fn fail_cancels(&mut self, fail: bool) {
        self.fail_cancels = fail;
    }

    pub fn sent(&self) -> &[SentRequest] {
        &self.sent
    }

    /// Requests to `dest` that were accepted, in order.
    pub fn accepted_for(&self, dest: Destination) -> Vec<&SentRequest> {
        self.sent
            .iter()
            .filter(|s| s.dest == dest && s.handle.is_some())
            .collect()
    }

    /// Handle of the latest accepted request to `dest`.
    pub fn last_handle_for(&self, dest: Destination) -> Option<RequestHandle> {
        self.sent
            .iter()
            .rev()
            .filter(|s| s.dest == dest)
            .find_map(|s| s.handle)
    }

    pub fn cancelled(&self) -> &[RequestHandle] {
        &self.cancelled
    }
}

impl ConfigClient for FakeClient {
    fn send_request(
        &mut self,
        dest: Destination,
        request: &ConfigRequest,
    ) -> Result<RequestHandle, RequestError> {
        let outcome = self
            .scripts
            .get_mut(&dest)
            .and_then(VecDeque::pop_front)
            .unwrap_or(self.default_outcome);

        let result = match outcome {
            SendOutcome::Accept => {
                self.next_handle += 1;
                Ok(RequestHandle(self.next_handle))
            }
            SendOutcome::Busy => Err(RequestError::NoMoreResources),
            SendOutcome::Reject => Err(RequestError::Rejected("scripted".to_string())),
        };

        self.sent.push(SentRequest {
            dest,
            request: request.clone(),
            handle: result.as_ref().ok().copied(),
        });

        if let (Ok(handle), Some(tx)) = (&result, &self.auto_answer) {
            let _ = tx.try_send(RuntimeEvent::Mesh(ConfigEvent::status(
                *handle,
                EventResult::Success,
            )));
        }

        result
    }

    fn cancel_request(&mut self, handle: RequestHandle) -> Result<(), RequestError> {
        self.cancelled.push(handle);
        if self.fail_cancels {
            Err(RequestError::UnknownHandle)
        } else {
            Ok(())
        }
    }
}
