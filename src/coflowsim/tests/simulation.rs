use coflowsim::config::{AaloConfig, SimConfig};
use coflowsim::trace::JobTrace;
use coflowsim::traffic::{ScriptedTraffic, TraceReplayer};
use coflowsim::{Bits, Coflow, CoflowId, Flow, FlowId, NodeId, Simulator, Timestamp};

const LINK: i64 = 1_000_000;

fn coflow(id: usize, start: Timestamp, flows: &[(usize, NodeId, NodeId, Bits)]) -> Coflow {
    let mut cf = Coflow::new(CoflowId(id), start, flows.len());
    for &(fid, src, dst, size) in flows {
        cf.add_flow(Flow::new(FlowId(fid), start, src, dst, size).unwrap());
    }
    cf
}

fn run(config: SimConfig, scheduler: &str, coflows: Vec<Coflow>) -> Simulator {
    logging::init_log();
    let mut sim = Simulator::new(config);
    assert!(sim.install_scheduler(scheduler));
    assert!(sim.install_traffic_gen_with(Box::new(ScriptedTraffic::from_coflows(coflows))));
    sim.run().unwrap();
    assert!(sim.diagnostics().is_empty(), "{:?}", sim.diagnostics());
    sim
}

fn cct(sim: &Simulator, job_id: usize) -> f64 {
    sim.report()
        .and_then(|r| r.find(job_id))
        .map(|r| r.cct)
        .unwrap()
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-6, "{} != {}", a, b);
}

#[test]
fn varys_single_coflow() {
    let sim = run(
        SimConfig::with_link_rate(LINK),
        "varysImpl",
        vec![coflow(0, 0.0, &[(0, 0, 1, 1_000_000), (1, 2, 3, 2_000_000)])],
    );
    assert_close(cct(&sim, 0), 2.0);
    assert_close(sim.clock(), 2.0);
    let report = sim.report().unwrap();
    assert_eq!(report.num_coflows, 1);
    // the short flow is backfilled to the full link and finishes at 1s
    assert_close(report.total_fct, 3.0);
}

#[test]
fn varys_smaller_coflow_first() {
    let sim = run(
        SimConfig::with_link_rate(LINK),
        "varysImpl",
        vec![
            coflow(0, 0.0, &[(0, 0, 1, 1_000_000)]),
            coflow(1, 0.0, &[(1, 0, 2, 3_000_000)]),
        ],
    );
    assert_close(cct(&sim, 0), 1.0);
    assert_close(cct(&sim, 1), 4.0);
    assert_eq!(sim.report().unwrap().summary_line(), "Done 0/2/2 5 5");
}

#[test]
fn aalo_fifo_within_queue() {
    let mut config = SimConfig::with_link_rate(LINK);
    config.aalo = AaloConfig::default();
    let sim = run(
        config,
        "aaloImpl",
        vec![
            coflow(0, 0.0, &[(0, 0, 1, 1_000_000)]),
            coflow(1, 0.0, &[(1, 0, 2, 3_000_000)]),
        ],
    );
    assert_close(cct(&sim, 0), 1.0);
    assert_close(cct(&sim, 1), 4.0);
}

#[test]
fn aalo_demotes_large_coflow() {
    let mut config = SimConfig::with_link_rate(LINK);
    config.aalo = AaloConfig {
        num_queues: 10,
        init_queue_height: 100_000.0,
        queue_height_multiplier: 10.0,
    };
    let sim = run(
        config,
        "aaloImpl",
        vec![
            coflow(0, 0.0, &[(0, 0, 1, 8_000_000)]),
            coflow(1, 1.0, &[(1, 0, 2, 1_000_000)]),
        ],
    );
    // the first coflow sent 125000 bytes before the second arrived and sank to queue 1
    assert_close(cct(&sim, 1), 1.0);
    assert_close(cct(&sim, 0), 9.0);
}

#[test]
fn local_and_empty_coflows_finish_on_arrival() {
    let sim = run(
        SimConfig::with_link_rate(LINK),
        "varysImpl",
        vec![coflow(0, 0.5, &[(0, 3, 3, 1_000_000)]), coflow(1, 0.5, &[])],
    );
    assert_close(cct(&sim, 0), 0.0);
    assert_close(cct(&sim, 1), 0.0);
    assert_eq!(sim.report().unwrap().num_coflows, 2);
}

#[test]
fn empty_flow_does_not_hold_its_coflow() {
    let sim = run(
        SimConfig::with_link_rate(LINK),
        "varysImpl",
        vec![coflow(0, 0.0, &[(0, 0, 1, 0), (1, 2, 3, 1_000_000)])],
    );
    let report = sim.report().unwrap();
    assert_eq!(report.num_coflows, 1);
    assert_close(cct(&sim, 0), 1.0);
    // the empty flow finished on arrival
    assert_close(report.total_fct, 1.0);
}

const TRACE: &str = "1\t0\t1\t1\t0#1:1\n2\t500\t1\t1\t2#3:2\n";

fn replay_config() -> SimConfig {
    let mut config = SimConfig::with_link_rate(8_000_000);
    config.enable_perturb = false;
    config
}

#[test]
fn replay_trace_in_memory() {
    logging::init_log();
    let config = replay_config();
    let trace = JobTrace::from_reader(TRACE.as_bytes()).unwrap();
    let mut sim = Simulator::new(config.clone());
    assert!(sim.install_scheduler("varysImpl"));
    assert!(sim.install_traffic_gen_with(Box::new(TraceReplayer::new(trace, &config))));
    sim.run().unwrap();

    assert!(sim.diagnostics().is_empty());
    assert_close(cct(&sim, 1), 1.0);
    assert_close(cct(&sim, 2), 2.0);
    assert_close(sim.clock(), 2.5);
    assert_eq!(sim.report().unwrap().summary_line(), "Done 0/2/2 3 3");
}

#[test]
fn replay_trace_file_with_audit() {
    logging::init_log();
    let dir = std::env::temp_dir().join(format!("coflowsim-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let trace = dir.join("trace.txt");
    let audit = dir.join("audit.txt");
    std::fs::write(&trace, TRACE).unwrap();
    let _ = std::fs::remove_file(&audit);

    let mut config = replay_config();
    config.trace = Some(trace);
    config.audit = Some(audit.clone());
    let mut sim = Simulator::new(config);
    assert!(sim.install_scheduler("aaloImpl"));
    assert!(sim.install_traffic_gen("fb"));
    sim.run().unwrap();

    let content = std::fs::read_to_string(&audit).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("1\t"));
    assert!(lines[1].starts_with("2\t"));
    assert_eq!(lines[2], "Done 0/2/2 3 3");

    std::fs::remove_dir_all(&dir).unwrap();
}
