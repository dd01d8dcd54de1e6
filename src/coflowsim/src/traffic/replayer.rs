//! Replays a coflow trace, one coflow per job.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fnv::FnvHashMap as HashMap;
use log::{debug, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::{FinishedTraffic, TrafficGen, TrafficReport};
use crate::coflow::{Coflow, Flow, Placement};
use crate::config::SimConfig;
use crate::event::{EventKind, Timeline};
use crate::simulator::{Request, Requests};
use crate::trace::{JobRecord, JobTrace};
use crate::{Bps, CoflowId, IdGen, Timestamp};

/// Perturbed or inflated flows are never smaller than this.
const MIN_FLOW_BYTES: i64 = 1_000_000;

/// Offset added to the job id when picking its perturbation seed.
const SEED_INDEX_OFFSET: usize = 5122;

/// (mapper index, reducer index) -> bytes
pub type FlowBytes = BTreeMap<(usize, usize), i64>;

/// Split each reducer's input over the mappers, `ceil(input / num_map)` each until the input is
/// used up.
pub fn flow_size_exact(num_map: usize, red_input: &[i64]) -> FlowBytes {
    let mut result = FlowBytes::new();
    for (r, &input) in red_input.iter().enumerate() {
        let mut left = input;
        let avg = (input as f64 / num_map as f64).ceil() as i64;
        for m in 0..num_map {
            let size = avg.min(left);
            left -= size;
            result.insert((m, r), size);
        }
    }
    result
}

/// Every mapper sends `ceil(input / num_map)` to a reducer.
pub fn flow_size_equal(num_map: usize, red_input: &[i64]) -> FlowBytes {
    let mut result = FlowBytes::new();
    for (r, &input) in red_input.iter().enumerate() {
        let avg = (input as f64 / num_map as f64).ceil() as i64;
        for m in 0..num_map {
            result.insert((m, r), avg);
        }
    }
    result
}

/// Like `flow_size_equal`, with every flow randomly perturbed by up to `perturb_percent`
/// percent in either direction.
pub fn flow_size_perturbed(
    num_map: usize,
    red_input: &[i64],
    perturb_percent: u32,
    seed: u64,
) -> FlowBytes {
    if perturb_percent > 100 {
        warn!("perturb flow sizes by {}%", perturb_percent);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut result = FlowBytes::new();
    for (r, &input) in red_input.iter().enumerate() {
        let avg = (input as f64 / num_map as f64).ceil() as i64;
        for m in 0..num_map {
            let direction = if rng.gen::<bool>() { 1.0 } else { -1.0 };
            let x: f64 = rng.gen();
            let perturb = direction * x * perturb_percent as f64 / 100.0;
            let size = ((avg as f64 * (1.0 + perturb)) as i64).max(MIN_FLOW_BYTES);
            result.insert((m, r), size);
        }
    }
    result
}

/// Builds coflows out of trace records.
#[derive(Debug, Clone)]
pub struct CoflowFactory {
    link_rate: Bps,
    enable_perturb: bool,
    perturb_percent: u32,
    equal_flow_to_same_reducer: bool,
    traffic_size_inflate: f64,
    deadline_mode: bool,
    seeds: Vec<u64>,
    perturb_seed: u64,
    id_gen: IdGen,
}

impl CoflowFactory {
    pub fn new(config: &SimConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.perturb_seed);
        let seeds = (0..config.perturb_seed_num)
            .map(|_| rng.gen::<u32>() as u64)
            .collect();
        CoflowFactory {
            link_rate: config.link_rate_bps,
            enable_perturb: config.enable_perturb,
            perturb_percent: config.perturb_percent,
            equal_flow_to_same_reducer: config.equal_flow_to_same_reducer,
            traffic_size_inflate: config.traffic_size_inflate,
            deadline_mode: config.deadline_mode,
            seeds,
            perturb_seed: config.perturb_seed,
            id_gen: IdGen::new(),
        }
    }

    /// The seed of a job, the same for every scheduler replaying the trace.
    pub fn seed_for_job(&self, job_id: usize) -> u64 {
        if self.seeds.is_empty() {
            return self.perturb_seed;
        }
        self.seeds[(job_id + SEED_INDEX_OFFSET) % self.seeds.len()]
    }

    pub fn flow_bytes(&self, job: &JobRecord) -> FlowBytes {
        let red_input = job.reducer_input_bytes();
        let mut bytes = if self.enable_perturb {
            let seed = self.seed_for_job(job.id);
            flow_size_perturbed(job.num_map, &red_input, self.perturb_percent, seed)
        } else if self.equal_flow_to_same_reducer {
            flow_size_equal(job.num_map, &red_input)
        } else {
            flow_size_exact(job.num_map, &red_input)
        };

        if (self.traffic_size_inflate - 1.0).abs() > f64::EPSILON {
            for size in bytes.values_mut() {
                *size = ((*size as f64 * self.traffic_size_inflate) as i64).max(MIN_FLOW_BYTES);
            }
        }
        bytes
    }

    pub fn build(&mut self, job: &JobRecord) -> Coflow {
        let arrival = job.arrival_secs();
        let mr_flow_bytes = self.flow_bytes(job);

        // mappers and reducers run where the trace put them
        let mappers = job.mappers.clone();
        let reducers: Vec<_> = job.reducers.iter().map(|&(loc, _)| loc).collect();

        let mut flows: Vec<Flow> = Vec::new();
        for (&(m, r), &bytes) in mr_flow_bytes.iter().filter(|(_, bytes)| **bytes > 0) {
            let id = self.id_gen.next_flow_id();
            match Flow::new(id, arrival, mappers[m], reducers[r], bytes * 8) {
                Ok(flow) => flows.push(flow),
                Err(e) => warn!("job {}: {}", job.id, e),
            }
        }

        let mut coflow = Coflow::new(self.id_gen.next_coflow_id(), arrival, flows.len());
        coflow.set_job_id(job.id);
        for flow in flows {
            coflow.add_flow(flow);
        }
        coflow.set_placement(Placement {
            mappers,
            reducers,
            mr_flow_bytes,
        });
        let alpha = coflow.calc_alpha();
        coflow.set_static_alpha(alpha);

        if self.deadline_mode {
            let lb = coflow.max_optimal_work_span(self.link_rate);
            let mut rng = StdRng::seed_from_u64(self.seed_for_job(job.id));
            let deadline = lb + lb * rng.gen_range(0..100) as f64 / 100.0;
            debug!("job {} lb {} deadline {}", job.id, lb, deadline);
            coflow.set_deadline(deadline);
        }

        coflow
    }
}

/// The `fb` traffic generator.
#[derive(Debug)]
pub struct TraceReplayer {
    trace: JobTrace,
    factory: CoflowFactory,
    timeline: Timeline,
    // submitted but not finished, coflow -> job
    running: HashMap<CoflowId, usize>,
    deadline_tolerance: f64,
    audit: Option<PathBuf>,
    report: TrafficReport,
}

impl TraceReplayer {
    pub fn new(trace: JobTrace, config: &SimConfig) -> Self {
        TraceReplayer {
            trace,
            factory: CoflowFactory::new(config),
            timeline: Timeline::new(),
            running: HashMap::default(),
            deadline_tolerance: config.deadline_error_tolerance,
            audit: config.audit.clone(),
            report: TrafficReport::default(),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P, config: &SimConfig) -> anyhow::Result<Self> {
        let trace = JobTrace::from_path(path)?;
        info!("{} jobs loaded", trace.len());
        Ok(Self::new(trace, config))
    }

    /// Read the next batch of jobs and schedule their submission.
    fn schedule_next_jobs(&mut self) {
        for job in self.trace.next_batch() {
            let coflow = self.factory.build(&job);
            debug!(
                "job {} arrives at {}s, {} flows, {} bytes",
                job.id,
                coflow.start_ts(),
                coflow.total_flows(),
                coflow.size_bytes()
            );
            if let Err(e) = self
                .timeline
                .push(coflow.start_ts(), EventKind::SubmitJob(vec![coflow]))
            {
                warn!("job {} dropped: {}", job.id, e);
            }
        }
    }

    fn alarm(&self) -> Option<Request> {
        self.timeline
            .peek()
            .ok()
            .map(|e| Request::TrafficAlarm(e.ts()))
    }

    fn audit(&self, line: &str) {
        if let Some(path) = self.audit.as_ref() {
            if let Err(e) = utils::fs::append_to_file(path, line) {
                warn!("failed to write audit file {}: {}", path.display(), e);
            }
        }
    }
}

impl TrafficGen for TraceReplayer {
    fn name(&self) -> &'static str {
        "fb"
    }

    fn notify_sim_start(&mut self) -> Requests {
        self.schedule_next_jobs();
        self.alarm().into_iter().collect()
    }

    fn alarm_portal(&mut self, now: Timestamp) -> Requests {
        let mut requests = Requests::new();

        while let Ok(head) = self.timeline.peek() {
            if head.ts() > now {
                break;
            }
            let event = match self.timeline.pop_next() {
                Ok(event) => event,
                Err(_) => break,
            };

            if let EventKind::SubmitJob(coflows) = event.into_kind() {
                for cf in &coflows {
                    self.running.insert(cf.id(), cf.job_id());
                }
                requests.add(Request::AddCoflows(now, coflows));
                self.schedule_next_jobs();
            }
        }

        requests.extend(self.alarm());
        requests
    }

    fn notify_traffic_finish(&mut self, _now: Timestamp, finished: FinishedTraffic) -> Requests {
        for flow in &finished.flows {
            self.report.record_flow(flow);
        }
        for coflow in &finished.coflows {
            if self.running.remove(&coflow.id()).is_none() {
                warn!("coflow {} is not one of the running jobs", coflow.id());
            }
            let line = self
                .report
                .record_coflow(coflow, self.deadline_tolerance)
                .map(|r| r.to_string());
            if let Some(line) = line {
                self.audit(&line);
            }
        }
        // finished coflows are dropped here
        Requests::new()
    }

    fn notify_sim_end(&mut self, now: Timestamp) {
        if !self.running.is_empty() {
            warn!(
                "{} coflows are unfinished at the end of simulation",
                self.running.len()
            );
        }
        let summary = self.report.summary_line();
        info!("{:.6}s {}", now, summary);
        self.audit(&summary);
    }

    fn report(&self) -> &TrafficReport {
        &self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(line: &str) -> JobRecord {
        line.parse().unwrap()
    }

    #[test]
    fn exact_split() {
        let bytes = flow_size_exact(3, &[1_000_000, 2]);
        assert_eq!(bytes[&(0, 0)], 333_334);
        assert_eq!(bytes[&(1, 0)], 333_334);
        assert_eq!(bytes[&(2, 0)], 333_332);
        assert_eq!(bytes[&(0, 1)], 1);
        assert_eq!(bytes[&(1, 1)], 1);
        assert_eq!(bytes[&(2, 1)], 0);
    }

    #[test]
    fn equal_split() {
        let bytes = flow_size_equal(3, &[1_000_000]);
        assert!(bytes.values().all(|&b| b == 333_334));
    }

    #[test]
    fn perturbed_split_is_bounded_and_reproducible() {
        let input = [40_000_000, 8_000_000];
        let a = flow_size_perturbed(4, &input, 5, 42);
        let b = flow_size_perturbed(4, &input, 5, 42);
        assert_eq!(a, b);
        for (&(_, r), &size) in &a {
            let avg = input[r] as f64 / 4.0;
            assert!(size as f64 >= avg * 0.95 - 1.0 && size as f64 <= avg * 1.05 + 1.0);
        }
        // the floor applies to tiny flows
        let tiny = flow_size_perturbed(2, &[10], 5, 42);
        assert!(tiny.values().all(|&b| b == MIN_FLOW_BYTES));
    }

    #[test]
    fn seeds_follow_job_id() {
        let config = SimConfig::default();
        let f = CoflowFactory::new(&config);
        assert_eq!(f.seed_for_job(1), f.seed_for_job(1 + config.perturb_seed_num));
        let g = CoflowFactory::new(&config);
        assert_eq!(f.seed_for_job(7), g.seed_for_job(7));
    }

    #[test]
    fn build_coflow_from_job() {
        let mut config = SimConfig::with_link_rate(1_000_000);
        config.enable_perturb = false;
        let mut factory = CoflowFactory::new(&config);
        let cf = factory.build(&job("9\t1500\t2\t1\t3,4#5:2"));
        assert_eq!(cf.job_id(), 9);
        assert_eq!(cf.start_ts(), 1.5);
        assert_eq!(cf.total_flows(), 2);
        assert!(cf.is_raw());
        let ends: Vec<_> = cf.flows().iter().map(|f| (f.src(), f.dst(), f.size())).collect();
        assert_eq!(ends, vec![(3, 5, 8_000_000), (4, 5, 8_000_000)]);
        assert_eq!(cf.static_alpha(), 16_000_000);
        assert_eq!(cf.deadline(), None);
        assert_eq!(cf.placement().reducers, vec![5]);

        // ids keep growing
        let next = factory.build(&job("10\t1500\t1\t1\t3#5:1"));
        assert_eq!(next.id(), CoflowId(1));
        assert_eq!(next.flows()[0].id(), crate::FlowId(2));
    }

    #[test]
    fn zero_byte_flows_are_dropped() {
        let mut config = SimConfig::default();
        config.enable_perturb = false;
        let mut factory = CoflowFactory::new(&config);
        let cf = factory.build(&job("1\t0\t2\t2\t3,4#5:1,6:0"));
        assert_eq!(cf.total_flows(), 2);
    }

    #[test]
    fn inflate_and_deadline() {
        let mut config = SimConfig::with_link_rate(8_000_000);
        config.enable_perturb = false;
        config.traffic_size_inflate = 0.5;
        config.deadline_mode = true;
        let mut factory = CoflowFactory::new(&config);
        let cf = factory.build(&job("1\t0\t1\t1\t3#5:4"));
        // 4 MB halved
        assert_eq!(cf.flows()[0].size(), 16_000_000);
        let lb = cf.max_optimal_work_span(8_000_000);
        assert!((lb - 2.0).abs() < 1e-9);
        let deadline = cf.deadline().unwrap();
        assert!(deadline >= lb && deadline < 2.0 * lb);

        // the floor applies after inflation
        let small = factory.build(&job("2\t0\t1\t1\t3#5:1"));
        assert_eq!(small.flows()[0].size(), 8_000_000);
    }

    #[test]
    fn submit_in_batches() {
        let trace = JobTrace::from_reader(
            "1\t0\t1\t1\t0#1:1\n2\t0\t1\t1\t2#3:1\n3\t500\t1\t1\t0#1:1\n".as_bytes(),
        )
        .unwrap();
        let mut config = SimConfig::default();
        config.enable_perturb = false;
        let mut replayer = TraceReplayer::new(trace, &config);

        let r: Vec<_> = replayer.notify_sim_start().into_iter().collect();
        assert!(matches!(r.as_slice(), [Request::TrafficAlarm(ts)] if *ts == 0.0));

        // two jobs at time 0, one submit event each
        let r: Vec<_> = replayer.alarm_portal(0.0).into_iter().collect();
        assert_eq!(r.len(), 3);
        assert!(matches!(&r[0], Request::AddCoflows(ts, cfs) if *ts == 0.0 && cfs.len() == 1));
        assert!(matches!(&r[1], Request::AddCoflows(_, cfs) if cfs[0].job_id() == 2));
        assert!(matches!(r[2], Request::TrafficAlarm(ts) if ts == 0.5));
        assert_eq!(replayer.running.len(), 2);

        let r: Vec<_> = replayer.alarm_portal(0.5).into_iter().collect();
        assert_eq!(r.len(), 1);
        assert_eq!(replayer.running.len(), 3);
    }
}
