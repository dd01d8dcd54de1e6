use std::collections::VecDeque;

use crate::coflow::Coflow;
use crate::error::Error;
use crate::traffic::FinishedTraffic;
use crate::Timestamp;

type Result<T> = std::result::Result<T, Error>;

/// The type tag of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    // scheduler
    CoflowArrive,
    FlowArrive,
    Reschedule,
    ApplyNewSchedule,
    OrderCircuit,
    ApplyCircuit,
    ScheduleEnd,
    FlowFinish,
    // traffic generator
    SubmitJob,
    // simulator
    MsgAddFlows,
    MsgAddCoflows,
    AlarmTraffic,
    MsgTrafficFinish,
    AlarmScheduler,
}

impl EventType {
    /// At most one pending instance of these types may exist on a scheduler timeline.
    pub fn is_singular(self) -> bool {
        matches!(
            self,
            EventType::FlowFinish
                | EventType::ApplyCircuit
                | EventType::OrderCircuit
                | EventType::ApplyNewSchedule
                | EventType::Reschedule
                | EventType::ScheduleEnd
        )
    }

    /// Pending instances of these types can be coalesced all at once.
    pub fn is_multiple(self) -> bool {
        matches!(self, EventType::ApplyCircuit)
    }
}

#[derive(Debug)]
pub enum EventKind {
    CoflowArrive(Vec<Coflow>),
    FlowArrive,
    Reschedule,
    ApplyNewSchedule,
    OrderCircuit,
    ApplyCircuit,
    ScheduleEnd,
    FlowFinish,
    SubmitJob(Vec<Coflow>),
    MsgAddFlows,
    MsgAddCoflows(Vec<Coflow>),
    AlarmTraffic,
    MsgTrafficFinish(FinishedTraffic),
    AlarmScheduler,
}

impl EventKind {
    pub fn ty(&self) -> EventType {
        match self {
            EventKind::CoflowArrive(_) => EventType::CoflowArrive,
            EventKind::FlowArrive => EventType::FlowArrive,
            EventKind::Reschedule => EventType::Reschedule,
            EventKind::ApplyNewSchedule => EventType::ApplyNewSchedule,
            EventKind::OrderCircuit => EventType::OrderCircuit,
            EventKind::ApplyCircuit => EventType::ApplyCircuit,
            EventKind::ScheduleEnd => EventType::ScheduleEnd,
            EventKind::FlowFinish => EventType::FlowFinish,
            EventKind::SubmitJob(_) => EventType::SubmitJob,
            EventKind::MsgAddFlows => EventType::MsgAddFlows,
            EventKind::MsgAddCoflows(_) => EventType::MsgAddCoflows,
            EventKind::AlarmTraffic => EventType::AlarmTraffic,
            EventKind::MsgTrafficFinish(_) => EventType::MsgTrafficFinish,
            EventKind::AlarmScheduler => EventType::AlarmScheduler,
        }
    }
}

#[derive(Debug)]
pub struct Event {
    ts: Timestamp,
    kind: EventKind,
}

impl Event {
    #[inline]
    pub fn new(ts: Timestamp, kind: EventKind) -> Self {
        Event { ts, kind }
    }

    #[inline]
    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    #[inline]
    pub fn ty(&self) -> EventType {
        self.kind.ty()
    }

    #[inline]
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    #[inline]
    pub fn kind_mut(&mut self) -> &mut EventKind {
        &mut self.kind
    }

    #[inline]
    pub fn into_kind(self) -> EventKind {
        self.kind
    }
}

/// Events in ascending time order. Events with equal timestamps keep their insertion order.
///
/// The head stays on the timeline while it is being processed, so removal helpers never touch
/// index 0.
#[derive(Debug, Default)]
pub struct Timeline {
    events: VecDeque<Event>,
}

impl Timeline {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_event(&mut self, event: Event) -> Result<()> {
        if !(event.ts >= 0.0) {
            return Err(Error::InvalidEventTime(event.ts));
        }
        let pos = self
            .events
            .iter()
            .rposition(|e| e.ts <= event.ts)
            .map_or(0, |i| i + 1);
        self.events.insert(pos, event);
        Ok(())
    }

    #[inline]
    pub fn push(&mut self, ts: Timestamp, kind: EventKind) -> Result<()> {
        self.add_event(Event::new(ts, kind))
    }

    pub fn peek(&self) -> Result<&Event> {
        self.events.front().ok_or(Error::EmptyTimeline)
    }

    pub fn peek_mut(&mut self) -> Result<&mut Event> {
        self.events.front_mut().ok_or(Error::EmptyTimeline)
    }

    pub fn pop_next(&mut self) -> Result<Event> {
        self.events.pop_front().ok_or(Error::EmptyTimeline)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Remove the first event of type `ty` behind the head. Returns whether one was removed.
    pub fn remove_first_pending(&mut self, ty: EventType) -> bool {
        let found = self.events.iter().skip(1).position(|e| e.ty() == ty);
        match found {
            Some(i) => {
                self.events.remove(i + 1);
                true
            }
            None => false,
        }
    }

    /// Remove every event of type `ty` behind the head. Returns the number removed.
    pub fn remove_all_pending(&mut self, ty: EventType) -> usize {
        if self.events.is_empty() {
            return 0;
        }
        let before = self.events.len();
        let mut idx = 0;
        self.events.retain(|e| {
            let keep = idx == 0 || e.ty() != ty;
            idx += 1;
            keep
        });
        before - self.events.len()
    }
}

/// The timeline a scheduler keeps for its own decision points.
#[derive(Debug, Default)]
pub struct SchedulerTimeline {
    inner: Timeline,
}

impl std::ops::Deref for SchedulerTimeline {
    type Target = Timeline;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::ops::DerefMut for SchedulerTimeline {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl SchedulerTimeline {
    pub fn new() -> Self {
        Default::default()
    }

    /// Remove the other pending instance of a singular event type. An instance at the head is
    /// the one being processed and is left alone.
    pub fn remove_singular(&mut self, ty: EventType) -> Result<()> {
        if !ty.is_singular() {
            return Err(Error::NotSingular(ty));
        }
        match self.inner.peek() {
            Err(_) => return Ok(()),
            Ok(head) if head.ty() == ty => return Ok(()),
            Ok(_) => {}
        }
        self.inner.remove_first_pending(ty);
        Ok(())
    }

    /// Remove all pending instances of a multiple event type except the one at the head.
    pub fn remove_multiple(&mut self, ty: EventType) -> Result<()> {
        if !ty.is_multiple() {
            return Err(Error::NotMultiple(ty));
        }
        self.inner.remove_all_pending(ty);
        Ok(())
    }
}
