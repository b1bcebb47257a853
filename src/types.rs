// src/types.rs

//! Small value types shared by the engine, the tasks and the transport.

use std::fmt;

/// Index of a network key as known by the local provisioner.
pub type NetKeyIndex = u16;

/// Unicast address of a remote node.
pub type NodeAddress = u16;

/// Position of an executor in the distributor's pool.
pub type SlotId = usize;

/// The remote target of a job and the unit of mutual exclusion.
///
/// Two jobs with the same destination are never executed at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination {
    pub netkey_index: NetKeyIndex,
    pub node_address: NodeAddress,
}

impl Destination {
    pub fn new(netkey_index: NetKeyIndex, node_address: NodeAddress) -> Self {
        Self {
            netkey_index,
            node_address,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "netkey_idx={},addr=0x{:04x}",
            self.netkey_index, self.node_address
        )
    }
}

/// Opaque token returned by the transport for an accepted request.
///
/// Protocol events that answer the request carry the same token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(pub u32);

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Aggregate verdict of a job.
///
/// `Unknown` until the job terminates; never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobResult {
    #[default]
    Unknown,
    /// Every executed task succeeded.
    Success,
    /// At least one task was rejected or ran out of retries.
    Fail,
    /// The task tree could not be walked. Treat as a defect.
    CriticalError,
}

impl JobResult {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobResult::Unknown)
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobResult::Unknown => "unknown",
            JobResult::Success => "success",
            JobResult::Fail => "fail",
            JobResult::CriticalError => "critical error",
        };
        f.write_str(s)
    }
}
