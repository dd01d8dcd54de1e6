//! A discrete-event simulator for evaluating coflow scheduling policies.
//!
//! The [`Simulator`] owns the global clock and a timeline of coarse messages. It routes them to
//! an installed [`Scheduler`] (which advances flow byte counters and decides rates) and an
//! installed [`TrafficGen`] (which submits coflows and accounts completion times).
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Diagnostics, Error};

pub mod config;
pub use config::SimConfig;

pub mod coflow;
pub use coflow::{Coflow, Flow};

pub mod event;

pub mod simulator;
pub use simulator::{Request, Requests, Simulator};

pub mod scheduler;
pub use scheduler::{Scheduler, SchedulerKind};

pub mod trace;

pub mod traffic;
pub use traffic::{TrafficGen, TrafficReport};

/// Simulated time in seconds.
pub type Timestamp = f64;
/// Amount of data in bits.
pub type Bits = i64;
/// Rate in bits per second.
pub type Bps = i64;
/// An endpoint (rack/host) identifier.
pub type NodeId = usize;

/// Flows with a positive rate and at most this many bits left are cleared by salvage.
pub const SALVAGE_THRESHOLD_BITS: Bits = 10;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct FlowId(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct CoflowId(pub usize);

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for CoflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for FlowId {
    fn from(val: usize) -> FlowId {
        FlowId(val)
    }
}

impl From<usize> for CoflowId {
    fn from(val: usize) -> CoflowId {
        CoflowId(val)
    }
}

/// Hands out flow and coflow ids. Owned by whoever constructs the entities, so two simulations
/// never share a counter.
#[derive(Debug, Clone, Default)]
pub struct IdGen {
    next_flow: usize,
    next_coflow: usize,
}

impl IdGen {
    pub fn new() -> Self {
        Default::default()
    }

    #[inline]
    pub fn next_flow_id(&mut self) -> FlowId {
        let id = FlowId(self.next_flow);
        self.next_flow += 1;
        id
    }

    #[inline]
    pub fn next_coflow_id(&mut self) -> CoflowId {
        let id = CoflowId(self.next_coflow);
        self.next_coflow += 1;
        id
    }
}
