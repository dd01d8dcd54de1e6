use log::{info, warn};
use serde::Serialize;

use crate::coflow::{Coflow, Flow};
use crate::simulator::{Request, Requests};
use crate::{CoflowId, Timestamp};

pub mod replayer;
pub use replayer::TraceReplayer;

/// Coflows and flows finished by one transmit step. Coflows are handed over, flows are copies.
#[derive(Debug, Default)]
pub struct FinishedTraffic {
    pub coflows: Vec<Coflow>,
    pub flows: Vec<Flow>,
}

impl FinishedTraffic {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coflows.is_empty() && self.flows.is_empty()
    }
}

/// Submits coflows and accounts for their completion.
pub trait TrafficGen {
    fn name(&self) -> &'static str;

    fn notify_sim_start(&mut self) -> Requests;

    /// Process every pending submission up to `now`.
    fn alarm_portal(&mut self, now: Timestamp) -> Requests;

    fn notify_traffic_finish(&mut self, now: Timestamp, finished: FinishedTraffic) -> Requests;

    fn notify_sim_end(&mut self, now: Timestamp);

    fn report(&self) -> &TrafficReport;
}

#[derive(Debug, Clone, Serialize)]
pub struct CoflowRecord {
    pub coflow_id: CoflowId,
    pub job_id: usize,
    pub start: Timestamp,
    pub end: Timestamp,
    pub cct: f64,
    pub deadline: Option<f64>,
    pub num_flows: usize,
    pub size_bytes: f64,
    pub rejected: bool,
}

impl std::fmt::Display for CoflowRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\t{:.6}\t{:.6}\t{:.6}\t{}\t{}\t{}",
            self.job_id,
            self.start,
            self.end,
            self.cct,
            self.deadline.unwrap_or(-1.0),
            self.num_flows,
            self.size_bytes
        )
    }
}

/// Completion accounting of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrafficReport {
    /// sum of the completion times of accepted coflows that met their deadline, if any
    pub total_cct: f64,
    pub total_fct: f64,
    pub num_coflows: usize,
    pub num_accepted: usize,
    pub num_met_deadline: usize,
    pub coflows: Vec<CoflowRecord>,
}

impl TrafficReport {
    pub fn record_flow(&mut self, flow: &Flow) {
        match flow.fct() {
            Some(fct) if fct >= 0.0 => self.total_fct += fct,
            _ => warn!("flow {} finished with an invalid end time", flow.id()),
        }
    }

    /// Account a finished coflow. Returns `None` if the coflow has no valid end time.
    pub fn record_coflow(&mut self, coflow: &Coflow, deadline_tolerance: f64) -> Option<&CoflowRecord> {
        let cct = match coflow.cct() {
            Some(cct) if cct >= 0.0 => cct,
            _ => {
                warn!("coflow {} finished with an invalid end time", coflow.id());
                return None;
            }
        };

        self.num_coflows += 1;
        if !coflow.is_rejected() {
            self.num_accepted += 1;
            match coflow.deadline() {
                Some(deadline) if deadline > 0.0 => {
                    if cct <= deadline + deadline_tolerance {
                        self.num_met_deadline += 1;
                        self.total_cct += cct;
                    }
                }
                _ => self.total_cct += cct,
            }
        }

        self.coflows.push(CoflowRecord {
            coflow_id: coflow.id(),
            job_id: coflow.job_id(),
            start: coflow.start_ts(),
            end: coflow.start_ts() + cct,
            cct,
            deadline: coflow.deadline(),
            num_flows: coflow.total_flows(),
            size_bytes: coflow.size_bytes(),
            rejected: coflow.is_rejected(),
        });
        self.coflows.last()
    }

    pub fn average_cct(&self) -> Option<f64> {
        let counted = self.coflows.iter().filter(|r| !r.rejected).count();
        if counted == 0 {
            None
        } else {
            Some(self.total_cct / counted as f64)
        }
    }

    pub fn find(&self, job_id: usize) -> Option<&CoflowRecord> {
        self.coflows.iter().find(|r| r.job_id == job_id)
    }

    /// `Done met/accepted/total totalCCT totalFCT`
    pub fn summary_line(&self) -> String {
        format!(
            "Done {}/{}/{} {} {}",
            self.num_met_deadline,
            self.num_accepted,
            self.num_coflows,
            self.total_cct,
            self.total_fct
        )
    }
}

/// Submits a fixed list of coflows, each at its own arrival time.
#[derive(Debug, Default)]
pub struct ScriptedTraffic {
    // sorted by arrival time, stable
    pending: std::collections::VecDeque<(Timestamp, Coflow)>,
    deadline_tolerance: f64,
    report: TrafficReport,
}

impl ScriptedTraffic {
    pub fn new(mut coflows: Vec<(Timestamp, Coflow)>) -> Self {
        coflows.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        ScriptedTraffic {
            pending: coflows.into(),
            deadline_tolerance: 1e-4,
            report: TrafficReport::default(),
        }
    }

    /// Submit each coflow at its own start time.
    pub fn from_coflows(coflows: Vec<Coflow>) -> Self {
        Self::new(coflows.into_iter().map(|cf| (cf.start_ts(), cf)).collect())
    }

    pub fn with_deadline_tolerance(mut self, tolerance: f64) -> Self {
        self.deadline_tolerance = tolerance;
        self
    }

    fn alarm(&self) -> Option<Request> {
        self.pending.front().map(|(ts, _)| Request::TrafficAlarm(*ts))
    }
}

impl TrafficGen for ScriptedTraffic {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn notify_sim_start(&mut self) -> Requests {
        self.alarm().into_iter().collect()
    }

    fn alarm_portal(&mut self, now: Timestamp) -> Requests {
        let mut batch = Vec::new();
        while let Some((ts, _)) = self.pending.front() {
            if *ts > now {
                break;
            }
            batch.extend(self.pending.pop_front().map(|(_, cf)| cf));
        }

        let mut requests = Requests::new();
        if !batch.is_empty() {
            requests.add(Request::AddCoflows(now, batch));
        }
        requests.extend(self.alarm());
        requests
    }

    fn notify_traffic_finish(&mut self, _now: Timestamp, finished: FinishedTraffic) -> Requests {
        for flow in &finished.flows {
            self.report.record_flow(flow);
        }
        for coflow in &finished.coflows {
            self.report.record_coflow(coflow, self.deadline_tolerance);
        }
        Requests::new()
    }

    fn notify_sim_end(&mut self, now: Timestamp) {
        if !self.pending.is_empty() {
            warn!("{} coflows were never submitted", self.pending.len());
        }
        info!("{:.6}s {}", now, self.report.summary_line());
    }

    fn report(&self) -> &TrafficReport {
        &self.report
    }
}
