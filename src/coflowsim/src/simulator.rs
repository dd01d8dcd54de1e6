use log::{debug, info, warn};

use crate::coflow::Coflow;
use crate::config::SimConfig;
use crate::error::{Diagnostics, Error};
use crate::event::{EventKind, EventType, Timeline};
use crate::scheduler::{Scheduler, SchedulerKind};
use crate::traffic::{FinishedTraffic, TraceReplayer, TrafficGen, TrafficReport};
use crate::Timestamp;

/// What a collaborator asks the simulator to do on its behalf.
#[derive(Debug)]
pub enum Request {
    /// Wake the scheduler up at the given time, replacing any pending scheduler alarm.
    SchedulerAlarm(Timestamp),
    /// Wake the traffic generator up at the given time, replacing any pending traffic alarm.
    TrafficAlarm(Timestamp),
    /// Hand newly arrived coflows to the scheduler.
    AddCoflows(Timestamp, Vec<Coflow>),
    /// Tell the scheduler that flows were added to its coflows.
    AddFlows(Timestamp),
    /// Deliver finished coflows and flows to the traffic generator.
    TrafficFinish(Timestamp, FinishedTraffic),
}

/// Requests in the order they were issued.
#[derive(Debug, Default)]
pub struct Requests(Vec<Request>);

impl Requests {
    pub fn new() -> Self {
        Default::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn add(&mut self, r: Request) {
        self.0.push(r);
    }

    pub fn append(&mut self, mut r: Requests) {
        self.0.append(&mut r.0);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Request> {
        self.0.iter()
    }
}

impl IntoIterator for Requests {
    type Item = Request;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl std::iter::FromIterator<Request> for Requests {
    fn from_iter<T: IntoIterator<Item = Request>>(iter: T) -> Self {
        Requests(iter.into_iter().collect())
    }
}

impl Extend<Request> for Requests {
    fn extend<T: IntoIterator<Item = Request>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl From<Request> for Requests {
    fn from(r: Request) -> Self {
        Requests(vec![r])
    }
}

/// Owns the global clock and routes messages between the scheduler and the traffic generator.
pub struct Simulator {
    config: SimConfig,
    clock: Timestamp,
    timeline: Timeline,
    scheduler: Option<Box<dyn Scheduler>>,
    traffic: Option<Box<dyn TrafficGen>>,
    diagnostics: Diagnostics,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Self {
        Simulator {
            config,
            clock: 0.0,
            timeline: Timeline::new(),
            scheduler: None,
            traffic: None,
            diagnostics: Diagnostics::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[inline]
    pub fn clock(&self) -> Timestamp {
        self.clock
    }

    /// Violations observed so far, including those reported by the collaborators.
    #[inline]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// The traffic generator's accounting, once one is installed.
    pub fn report(&self) -> Option<&TrafficReport> {
        self.traffic.as_ref().map(|t| t.report())
    }

    /// Install a scheduler by name. Fails on an unknown name or when one is already installed.
    pub fn install_scheduler(&mut self, name: &str) -> bool {
        if self.scheduler.is_some() {
            self.diagnostics
                .record(Error::AlreadyInstalled("scheduler"));
            return false;
        }
        match name.parse::<SchedulerKind>() {
            Ok(kind) => self.install_scheduler_with(kind.build(&self.config)),
            Err(_) => {
                self.diagnostics
                    .record(Error::UnknownScheduler(name.to_owned()));
                false
            }
        }
    }

    pub fn install_scheduler_with(&mut self, scheduler: Box<dyn Scheduler>) -> bool {
        if self.scheduler.is_some() {
            self.diagnostics
                .record(Error::AlreadyInstalled("scheduler"));
            return false;
        }
        info!("scheduler {} installed", scheduler.name());
        self.scheduler = Some(scheduler);
        true
    }

    /// Install a traffic generator by name. `fb` replays the trace named in the configuration.
    pub fn install_traffic_gen(&mut self, name: &str) -> bool {
        if self.traffic.is_some() {
            self.diagnostics
                .record(Error::AlreadyInstalled("traffic generator"));
            return false;
        }
        match name {
            "fb" => {
                let path = match self.config.trace.as_ref() {
                    Some(path) => path.clone(),
                    None => {
                        self.diagnostics.record(Error::MissingTrace("fb"));
                        return false;
                    }
                };
                match TraceReplayer::from_path(&path, &self.config) {
                    Ok(replayer) => self.install_traffic_gen_with(Box::new(replayer)),
                    Err(e) => {
                        self.diagnostics.record(Error::LoadTrace {
                            path: path.display().to_string(),
                            reason: format!("{:#}", e),
                        });
                        false
                    }
                }
            }
            _ => {
                self.diagnostics
                    .record(Error::UnknownTrafficGen(name.to_owned()));
                false
            }
        }
    }

    pub fn install_traffic_gen_with(&mut self, traffic: Box<dyn TrafficGen>) -> bool {
        if self.traffic.is_some() {
            self.diagnostics
                .record(Error::AlreadyInstalled("traffic generator"));
            return false;
        }
        info!("traffic generator {} installed", traffic.name());
        self.traffic = Some(traffic);
        true
    }

    pub fn run(&mut self) -> Result<(), Error> {
        // take both out so that dispatching does not borrow self
        let mut scheduler = self
            .scheduler
            .take()
            .ok_or(Error::NotInstalled("scheduler"))?;
        let mut traffic = match self.traffic.take() {
            Some(t) => t,
            None => {
                self.scheduler = Some(scheduler);
                return Err(Error::NotInstalled("traffic generator"));
            }
        };

        let start = std::time::Instant::now();

        let requests = traffic.notify_sim_start();
        self.apply(requests);

        while let Ok(head) = self.timeline.peek_mut() {
            let ts = head.ts();
            if ts < self.clock {
                self.diagnostics.record(Error::EventBeforeClock {
                    event: ts,
                    clock: self.clock,
                });
            }
            self.clock = ts;
            let now = ts;

            let requests = match head.kind_mut() {
                EventKind::AlarmTraffic => traffic.alarm_portal(now),
                EventKind::MsgTrafficFinish(finished) => {
                    let finished = std::mem::take(finished);
                    traffic.notify_traffic_finish(now, finished)
                }
                EventKind::AlarmScheduler => scheduler.alarm_portal(now),
                EventKind::MsgAddFlows => scheduler.notify_add_flows(now),
                EventKind::MsgAddCoflows(coflows) => {
                    let coflows = std::mem::take(coflows);
                    scheduler.notify_add_coflows(now, coflows)
                }
                other => {
                    warn!("simulator: ignore event {:?} at {}", other.ty(), now);
                    Requests::new()
                }
            };

            // the head stays in place while its requests are applied
            self.apply(requests);
            if let Err(e) = self.timeline.pop_next() {
                self.diagnostics.record(e);
            }
        }

        traffic.notify_sim_end(self.clock);
        scheduler.notify_sim_end(self.clock);

        self.diagnostics.append(&mut scheduler.take_diagnostics());

        debug!("sim_time: {:?}", start.elapsed());
        info!("simulation ends at {}s", self.clock);

        self.scheduler = Some(scheduler);
        self.traffic = Some(traffic);
        Ok(())
    }

    /// Keep at most one pending scheduler alarm.
    pub fn update_scheduler_alarm(&mut self, ts: Timestamp) {
        self.update_alarm(EventType::AlarmScheduler, ts);
    }

    /// Keep at most one pending traffic alarm.
    pub fn update_traffic_alarm(&mut self, ts: Timestamp) {
        self.update_alarm(EventType::AlarmTraffic, ts);
    }

    fn update_alarm(&mut self, ty: EventType, ts: Timestamp) {
        self.timeline.remove_first_pending(ty);
        let kind = match ty {
            EventType::AlarmScheduler => EventKind::AlarmScheduler,
            _ => EventKind::AlarmTraffic,
        };
        self.push(ts, kind);
    }

    fn push(&mut self, ts: Timestamp, kind: EventKind) {
        if let Err(e) = self.timeline.push(ts, kind) {
            self.diagnostics.record(e);
        }
    }

    fn apply(&mut self, requests: Requests) {
        for r in requests {
            match r {
                Request::SchedulerAlarm(ts) => self.update_scheduler_alarm(ts),
                Request::TrafficAlarm(ts) => self.update_traffic_alarm(ts),
                Request::AddCoflows(ts, coflows) => {
                    self.push(ts, EventKind::MsgAddCoflows(coflows))
                }
                Request::AddFlows(ts) => self.push(ts, EventKind::MsgAddFlows),
                Request::TrafficFinish(ts, finished) => {
                    self.push(ts, EventKind::MsgTrafficFinish(finished))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::ScriptedTraffic;

    #[test]
    fn install_at_most_once() {
        let mut sim = Simulator::new(SimConfig::default());
        assert!(!sim.install_scheduler("fifo"));
        assert!(sim.install_scheduler("varysImpl"));
        assert!(!sim.install_scheduler("aaloImpl"));

        assert!(!sim.install_traffic_gen("poisson"));
        assert!(sim.install_traffic_gen_with(Box::new(ScriptedTraffic::new(Vec::new()))));
        assert!(!sim.install_traffic_gen_with(Box::new(ScriptedTraffic::new(Vec::new()))));
        assert_eq!(sim.diagnostics().len(), 4);
    }

    #[test]
    fn fb_without_trace() {
        let mut sim = Simulator::new(SimConfig::default());
        assert!(!sim.install_traffic_gen("fb"));
        assert_eq!(
            sim.diagnostics().iter().last(),
            Some(&Error::MissingTrace("fb"))
        );

        let mut config = SimConfig::default();
        config.trace = Some(std::env::temp_dir().join("coflowsim-no-such-trace.txt"));
        let mut sim = Simulator::new(config);
        assert!(!sim.install_traffic_gen("fb"));
        assert_eq!(sim.diagnostics().len(), 1);
        assert!(matches!(
            sim.diagnostics().iter().next(),
            Some(Error::LoadTrace { .. })
        ));
        assert!(sim.install_traffic_gen_with(Box::new(ScriptedTraffic::new(Vec::new()))));
    }

    #[test]
    fn run_requires_collaborators() {
        let mut sim = Simulator::new(SimConfig::default());
        assert_eq!(sim.run(), Err(Error::NotInstalled("scheduler")));
        assert!(sim.install_scheduler("aaloImpl"));
        assert_eq!(sim.run(), Err(Error::NotInstalled("traffic generator")));
        // the scheduler survives the failed run
        assert!(!sim.install_scheduler("aaloImpl"));
    }

    #[test]
    fn empty_run_ends_immediately() {
        let mut sim = Simulator::new(SimConfig::default());
        assert!(sim.install_scheduler("varysImpl"));
        assert!(sim.install_traffic_gen_with(Box::new(ScriptedTraffic::new(Vec::new()))));
        assert_eq!(sim.run(), Ok(()));
        assert_eq!(sim.clock(), 0.0);
        assert_eq!(sim.report().map(|r| r.num_coflows), Some(0));
    }

    #[test]
    fn single_pending_alarm() {
        let mut sim = Simulator::new(SimConfig::default());
        sim.update_scheduler_alarm(3.0);
        sim.update_traffic_alarm(1.0);
        sim.update_scheduler_alarm(2.0);
        sim.update_scheduler_alarm(5.0);
        let alarms: Vec<_> = sim.timeline.iter().map(|e| (e.ts(), e.ty())).collect();
        // the head is never removed
        assert_eq!(
            alarms,
            vec![(1.0, EventType::AlarmTraffic), (5.0, EventType::AlarmScheduler)]
        );
        sim.update_traffic_alarm(4.0);
        let alarms: Vec<_> = sim.timeline.iter().map(|e| (e.ts(), e.ty())).collect();
        assert_eq!(
            alarms,
            vec![
                (1.0, EventType::AlarmTraffic),
                (4.0, EventType::AlarmTraffic),
                (5.0, EventType::AlarmScheduler),
            ]
        );
    }
}
