use std::time::Instant;

use fnv::{FnvBuildHasher, FnvHashMap as HashMap};
use indexmap::IndexMap;
use log::{debug, info, trace};
use strum_macros::EnumString;

use utils::collector::OverheadCollector;

use crate::coflow::Coflow;
use crate::config::SimConfig;
use crate::error::{Diagnostics, Error};
use crate::event::{EventKind, EventType, SchedulerTimeline};
use crate::simulator::{Request, Requests};
use crate::traffic::FinishedTraffic;
use crate::{Bits, Bps, CoflowId, FlowId, NodeId, Timestamp};

pub mod aalo;
pub use aalo::Aalo;

pub mod varys;
pub use varys::Varys;

/// Active coflows in the order the rate control visits them.
pub type CoflowSet = IndexMap<CoflowId, Coflow, FnvBuildHasher>;

/// Rates decided by a scheduling pass, flows not in the map get zero.
pub type RateMap = HashMap<FlowId, Bps>;

/// What the simulator needs from a scheduler.
pub trait Scheduler {
    fn name(&self) -> &'static str;

    /// Process every pending decision point up to `now`.
    fn alarm_portal(&mut self, now: Timestamp) -> Requests;

    /// New coflows arrive. Coflows that have already been touched are refused.
    fn notify_add_coflows(&mut self, now: Timestamp, coflows: Vec<Coflow>) -> Requests;

    fn notify_add_flows(&mut self, now: Timestamp) -> Requests;

    fn notify_sim_end(&mut self, now: Timestamp);

    /// Hand over the violations recorded so far.
    fn take_diagnostics(&mut self) -> Diagnostics;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
pub enum SchedulerKind {
    #[strum(serialize = "varysImpl")]
    Varys,
    #[strum(serialize = "aaloImpl")]
    Aalo,
}

impl SchedulerKind {
    pub fn build(self, config: &SimConfig) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::Varys => Box::new(PolicyScheduler::new(Varys::new(config), config)),
            SchedulerKind::Aalo => Box::new(PolicyScheduler::new(Aalo::new(&config.aalo), config)),
        }
    }
}

/// A rate allocation policy.
pub trait RateControl {
    fn name(&self) -> &'static str;

    /// Called for every coflow accepted by the scheduler.
    fn admit(&mut self, _coflow: &Coflow) {}

    /// Fill `rates` for the active coflows. The policy may reorder `coflows`.
    fn rate_control(&mut self, coflows: &mut CoflowSet, rates: &mut RateMap, link_rate: Bps);
}

/// Which transmission modes a `transmit` call applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxMode {
    pub basic: bool,
    pub local: bool,
    pub salvage: bool,
}

/// Completions detected by one `transmit` call.
#[derive(Debug, Default)]
pub struct TxOutcome {
    pub finished: FinishedTraffic,
    pub flow_finished: bool,
    pub coflow_finished: bool,
    /// a coflow finished every flow added so far but still expects more
    pub coflow_tmp_finished: bool,
}

impl TxOutcome {
    #[inline]
    pub fn any(&self) -> bool {
        self.flow_finished || self.coflow_finished || self.coflow_tmp_finished
    }
}

/// When the next flow will finish under the current rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FirstFlowEnd {
    /// every flow has finished
    AllDone,
    /// some flows are left but none of them has a positive rate
    Stalled,
    /// seconds from now
    After(f64),
}

/// The smallest time for `rate` to push out all `bits`, found in integral bit steps so that the
/// result is never short of the last bit.
pub fn secure_finish_time(bits: Bits, rate: Bps) -> f64 {
    if rate <= 0 {
        return f64::INFINITY;
    }
    let mut delta = 0;
    loop {
        let time = (delta + bits) as f64 / rate as f64;
        let bits_left = (bits as f64 - rate as f64 * time) as Bits;
        if bits_left <= 0 {
            return time;
        }
        delta += 1;
    }
}

/// Recompute every coflow's alpha and stably sort them in ascending order.
pub fn calc_alpha_and_sort(coflows: &mut CoflowSet) {
    for cf in coflows.values_mut() {
        cf.calc_alpha();
    }
    coflows.sort_by(|_, a, _, b| a.alpha().cmp(&b.alpha()));
}

/// The transmission engine shared by every policy: the active coflows, the scheduler's own
/// timeline and the buffered rates of the next schedule.
#[derive(Debug)]
pub struct SchedulerCore {
    clock: Timestamp,
    timeline: SchedulerTimeline,
    coflows: CoflowSet,
    next_elec_rate: RateMap,
    next_optc_rate: RateMap,
    link_rate: Bps,
    zero_comp_time: bool,
    last_tx_src_bits: HashMap<NodeId, Bits>,
    last_tx_dst_bits: HashMap<NodeId, Bits>,
    overhead: OverheadCollector,
    diagnostics: Diagnostics,
}

impl SchedulerCore {
    pub fn new(config: &SimConfig) -> Self {
        SchedulerCore {
            clock: 0.0,
            timeline: SchedulerTimeline::new(),
            coflows: CoflowSet::default(),
            next_elec_rate: RateMap::default(),
            next_optc_rate: RateMap::default(),
            link_rate: config.link_rate_bps,
            zero_comp_time: config.zero_comp_time,
            last_tx_src_bits: HashMap::default(),
            last_tx_dst_bits: HashMap::default(),
            overhead: OverheadCollector::default(),
            diagnostics: Diagnostics::new(),
        }
    }

    #[inline]
    pub fn clock(&self) -> Timestamp {
        self.clock
    }

    #[inline]
    pub fn coflows(&self) -> &CoflowSet {
        &self.coflows
    }

    #[inline]
    pub fn timeline(&self) -> &SchedulerTimeline {
        &self.timeline
    }

    #[inline]
    pub fn overhead(&self) -> &OverheadCollector {
        &self.overhead
    }

    #[inline]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn push_event(&mut self, ts: Timestamp, kind: EventKind) {
        if let Err(e) = self.timeline.push(ts, kind) {
            self.diagnostics.record(e);
        }
    }

    fn remove_singular(&mut self, ty: EventType) {
        if let Err(e) = self.timeline.remove_singular(ty) {
            self.diagnostics.record(e);
        }
    }

    /// Accept raw coflows, refusing the others.
    pub fn add_coflows<P: RateControl>(&mut self, coflows: Vec<Coflow>, policy: &mut P) {
        for cf in coflows {
            if !cf.is_raw() {
                self.diagnostics.record(Error::NotRawCoflow(cf.id()));
                continue;
            }
            policy.admit(&cf);
            self.coflows.insert(cf.id(), cf);
        }
    }

    /// Advance every unfinished flow over `[start, end]` and collect what completed. A flow is
    /// unfinished until it has an end time.
    pub fn tx_flows(&mut self, start: Timestamp, end: Timestamp, mode: TxMode) -> TxOutcome {
        let mut outcome = TxOutcome::default();
        let mut done = Vec::new();

        self.last_tx_src_bits.clear();
        self.last_tx_dst_bits.clear();

        for (&id, cf) in self.coflows.iter_mut() {
            if cf.is_flows_added_complete() {
                // a coflow without any flow is done at once
                if cf.is_complete() {
                    done.push(id);
                }
                continue;
            }

            let mut finished_here = 0;
            let mut sent = 0;
            for flow in cf.flows_mut().iter_mut() {
                // a flow without bits finishes at its first transmit
                if flow.end_ts().is_some() {
                    continue;
                }

                let before = flow.bits_left();
                if mode.basic {
                    flow.transmit(start, end);
                }
                if mode.local {
                    flow.tx_local();
                }
                if mode.salvage {
                    flow.tx_salvage();
                }
                let tx_bits = before - flow.bits_left();

                *self.last_tx_src_bits.entry(flow.src()).or_insert(0) += tx_bits;
                *self.last_tx_dst_bits.entry(flow.dst()).or_insert(0) += tx_bits;

                if flow.bits_left() == 0 {
                    flow.set_end_ts(end);
                    outcome.finished.flows.push(flow.clone());
                    finished_here += 1;
                }
                sent += tx_bits;
            }

            // account bytes sent
            trace!("coflow {} sent {} bits in ({}, {})", id, sent, start, end);
            cf.add_tx_bits(sent);

            for _ in 0..finished_here {
                cf.num_flow_finish_inc();
            }
            if finished_here > 0 {
                outcome.flow_finished = true;
                debug!("{:.6}s {}", end, cf);
            }

            if cf.is_complete() {
                done.push(id);
            } else if cf.is_flows_added_complete() {
                outcome.coflow_tmp_finished = true;
            }
        }

        for id in done {
            if let Some(mut cf) = self.coflows.shift_remove(&id) {
                info!("{:.6}s coflow finish! # {}", end, cf.job_id());
                cf.set_end_ts(end);
                outcome.finished.coflows.push(cf);
                outcome.coflow_finished = true;
            }
        }

        outcome
    }

    /// Transmit, then react to completions the way every policy does: report them, reschedule
    /// when a coflow is done, and recompute the next flow finish.
    pub fn transmit(
        &mut self,
        start: Timestamp,
        end: Timestamp,
        mode: TxMode,
        requests: &mut Requests,
    ) -> bool {
        let outcome = self.tx_flows(start, end, mode);

        let has_finish = outcome.any();
        let need_reschedule = outcome.coflow_finished || outcome.coflow_tmp_finished;

        if !outcome.finished.is_empty() {
            requests.add(Request::TrafficFinish(end, outcome.finished));
        }
        if need_reschedule {
            self.update_reschedule_event(end);
        }
        if has_finish {
            self.update_flow_finish_event(end);
        }
        has_finish
    }

    pub fn time_to_first_flow_end(&self) -> FirstFlowEnd {
        let mut has_unfinished = false;
        let mut first: Option<f64> = None;

        for cf in self.coflows.values() {
            if cf.is_flows_added_complete() {
                continue;
            }
            for flow in cf.flows().iter().filter(|f| f.bits_left() > 0) {
                has_unfinished = true;
                if flow.rate() > 0 {
                    let t = secure_finish_time(flow.bits_left(), flow.rate());
                    first = Some(first.map_or(t, |x| x.min(t)));
                }
            }
        }

        match (has_unfinished, first) {
            (false, _) => FirstFlowEnd::AllDone,
            (true, None) => FirstFlowEnd::Stalled,
            (true, Some(t)) => FirstFlowEnd::After(t),
        }
    }

    /// Keep exactly one pending flow finish event matching the current rates.
    pub fn update_flow_finish_event(&mut self, base: Timestamp) {
        match self.time_to_first_flow_end() {
            FirstFlowEnd::AllDone => {}
            FirstFlowEnd::Stalled => self.remove_singular(EventType::FlowFinish),
            FirstFlowEnd::After(t) => {
                self.remove_singular(EventType::FlowFinish);
                self.push_event(base + t, EventKind::FlowFinish);
            }
        }
    }

    pub fn update_reschedule_event(&mut self, ts: Timestamp) {
        self.remove_singular(EventType::Reschedule);
        self.push_event(ts, EventKind::Reschedule);
    }

    /// Commit the buffered rates to the flows.
    pub fn set_flow_rate(&mut self) {
        for cf in self.coflows.values_mut() {
            for flow in cf.flows_mut().iter_mut() {
                let elec = self.next_elec_rate.get(&flow.id()).copied().unwrap_or(0);
                let optc = self.next_optc_rate.get(&flow.id()).copied().unwrap_or(0);
                flow.set_rate(elec, optc);
            }
        }
    }

    /// Check that no endpoint moved more than `bound` bits during the last transmit.
    pub fn validate_last_tx_meet_constraints(&mut self, bound: Bits) -> bool {
        let mut ok = true;
        let over = self
            .last_tx_src_bits
            .iter()
            .map(|(&n, &b)| ("src", n, b))
            .chain(self.last_tx_dst_bits.iter().map(|(&n, &b)| ("dst", n, b)))
            .filter(|&(_, _, b)| b > bound)
            .collect::<Vec<_>>();
        for (direction, node, bits) in over {
            ok = false;
            self.diagnostics.record(Error::TxBoundExceeded {
                direction,
                node,
                bits,
                bound,
            });
        }
        ok
    }

    /// The alarm the simulator should set for the scheduler's next decision point.
    pub fn alarm_request(&self) -> Option<Request> {
        self.timeline
            .peek()
            .ok()
            .map(|e| Request::SchedulerAlarm(e.ts()))
    }
}

/// A scheduler made of the shared engine and a rate allocation policy.
#[derive(Debug)]
pub struct PolicyScheduler<P> {
    core: SchedulerCore,
    policy: P,
}

impl<P: RateControl> PolicyScheduler<P> {
    pub fn new(policy: P, config: &SimConfig) -> Self {
        PolicyScheduler {
            core: SchedulerCore::new(config),
            policy,
        }
    }

    #[inline]
    pub fn core(&self) -> &SchedulerCore {
        &self.core
    }

    #[inline]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    fn schedule(&mut self) {
        let core = &mut self.core;
        debug!(
            "{:.6}s [{}] scheduling START, {} active coflows",
            core.clock,
            self.policy.name(),
            core.coflows.len()
        );
        for cf in core.coflows.values() {
            trace!("{}", cf);
        }

        let start = Instant::now();

        core.next_elec_rate.clear();
        core.next_optc_rate.clear();
        self.policy
            .rate_control(&mut core.coflows, &mut core.next_elec_rate, core.link_rate);

        let elapsed = start.elapsed();
        core.overhead.collect(elapsed, core.coflows.len());
        let delay = if core.zero_comp_time {
            0.0
        } else {
            elapsed.as_secs_f64()
        };

        core.remove_singular(EventType::ApplyNewSchedule);
        let activate = core.clock + delay;
        core.push_event(activate, EventKind::ApplyNewSchedule);
    }

    fn coflow_arrive(&mut self, requests: &mut Requests) {
        let coflows = match self.core.timeline.peek_mut() {
            Ok(head) => match head.kind_mut() {
                EventKind::CoflowArrive(cfs) => Some(std::mem::take(cfs)),
                _ => None,
            },
            Err(_) => None,
        };
        let coflows = match coflows {
            Some(cfs) => cfs,
            None => {
                let found = self.core.timeline.peek().ok().map(|e| e.ty());
                self.core.diagnostics.record(Error::UnexpectedEvent {
                    handler: "coflow_arrive",
                    expected: EventType::CoflowArrive,
                    found,
                });
                return;
            }
        };

        self.core.add_coflows(coflows, &mut self.policy);
        let now = self.core.clock;
        self.core.update_reschedule_event(now);

        // clear local traffic right away
        let mode = TxMode {
            basic: false,
            local: true,
            salvage: false,
        };
        self.core.transmit(now, now, mode, requests);
    }

    fn apply_new_schedule(&mut self) {
        self.core.set_flow_rate();
        let now = self.core.clock;
        self.core.update_flow_finish_event(now);
    }
}

impl<P: RateControl> Scheduler for PolicyScheduler<P> {
    fn name(&self) -> &'static str {
        self.policy.name()
    }

    fn alarm_portal(&mut self, now: Timestamp) -> Requests {
        let mut requests = Requests::new();

        while let Ok(head) = self.core.timeline.peek() {
            if head.ts() > now {
                break;
            }
            let ty = head.ty();

            if self.core.clock < now {
                let mode = TxMode {
                    basic: true,
                    local: true,
                    salvage: ty == EventType::FlowFinish,
                };
                let start = self.core.clock;
                self.core.transmit(start, now, mode, &mut requests);
                self.core.clock = now;
            }

            match ty {
                EventType::Reschedule => self.schedule(),
                EventType::CoflowArrive => self.coflow_arrive(&mut requests),
                EventType::FlowArrive => {}
                EventType::ApplyNewSchedule => self.apply_new_schedule(),
                EventType::FlowFinish => {}
                other => debug!("{} ignores {:?}", self.policy.name(), other),
            }

            if let Err(e) = self.core.timeline.pop_next() {
                self.core.diagnostics.record(e);
            }
        }

        requests.extend(self.core.alarm_request());
        requests
    }

    fn notify_add_coflows(&mut self, now: Timestamp, coflows: Vec<Coflow>) -> Requests {
        self.core.push_event(now, EventKind::CoflowArrive(coflows));
        self.core.alarm_request().into_iter().collect()
    }

    fn notify_add_flows(&mut self, now: Timestamp) -> Requests {
        self.core.push_event(now, EventKind::FlowArrive);
        self.core.alarm_request().into_iter().collect()
    }

    fn notify_sim_end(&mut self, now: Timestamp) {
        debug!(
            "{:.6}s [{}] simulation ends, {} coflows unfinished",
            now,
            self.policy.name(),
            self.core.coflows.len()
        );
        for cf in self.core.coflows.values() {
            for flow in cf.flows().iter().filter(|f| f.bits_left() > 0) {
                debug!(
                    "flow [{}] ({}=>{}) {} bits {} bits left {} bps",
                    flow.id(),
                    flow.src(),
                    flow.dst(),
                    flow.size(),
                    flow.bits_left(),
                    flow.elec_rate()
                );
            }
        }
        let overhead = &self.core.overhead;
        if !overhead.is_empty() {
            debug!(
                "{} scheduling passes, total {:?}, max {:?}, mean {:?}",
                overhead.len(),
                overhead.total(),
                overhead.max(),
                overhead.mean()
            );
        }
    }

    fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.core.diagnostics)
    }
}
