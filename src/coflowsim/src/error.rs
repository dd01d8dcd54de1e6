use thiserror::Error;

use crate::event::EventType;
use crate::{CoflowId, FlowId, NodeId, Timestamp};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("timeline is empty")]
    EmptyTimeline,
    #[error("invalid event time: {0}")]
    InvalidEventTime(Timestamp),
    #[error("try to remove {0:?} but it is not singular")]
    NotSingular(EventType),
    #[error("try to remove {0:?} but it can not be multiple")]
    NotMultiple(EventType),
    #[error("event time {event} is earlier than current time {clock}")]
    EventBeforeClock { event: Timestamp, clock: Timestamp },
    #[error("{handler} expects {expected:?} but the current event is {found:?}")]
    UnexpectedEvent {
        handler: &'static str,
        expected: EventType,
        found: Option<EventType>,
    },
    #[error("flow {flow} has a negative size of {size} bits")]
    InvalidFlowSize { flow: FlowId, size: i64 },
    #[error("coflow {0} is not a raw coflow")]
    NotRawCoflow(CoflowId),
    #[error("{direction} {node} transmitted {bits} bits over bound {bound}")]
    TxBoundExceeded {
        direction: &'static str,
        node: NodeId,
        bits: i64,
        bound: i64,
    },
    #[error("unknown scheduler: {0}")]
    UnknownScheduler(String),
    #[error("unknown traffic generator: {0}")]
    UnknownTrafficGen(String),
    #[error("{0} has already been installed")]
    AlreadyInstalled(&'static str),
    #[error("please install {0} first")]
    NotInstalled(&'static str),
    #[error("no trace file configured for traffic generator {0}")]
    MissingTrace(&'static str),
    #[error("failed to load trace {path}: {reason}")]
    LoadTrace { path: String, reason: String },
    #[error("parse trace error: {0}")]
    ParseTrace(String),
}

/// Violations the simulation chose to survive. Each one is logged when recorded and kept here so
/// a run can be checked afterwards.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(Vec<Error>);

impl Diagnostics {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record(&mut self, e: Error) {
        log::error!("{}", e);
        self.0.push(e);
    }

    pub fn append(&mut self, other: &mut Diagnostics) {
        self.0.append(&mut other.0);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.0.iter()
    }
}
