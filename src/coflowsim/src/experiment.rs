use structopt::StructOpt;

use coflowsim::config::{read_config, SimConfig};
use coflowsim::Simulator;

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "Coflow Experiment", about = "Replay a coflow trace under a scheduling policy")]
pub struct Opt {
    /// The configure file
    #[structopt(short = "c", long = "config")]
    pub config: Option<std::path::PathBuf>,

    /// The scheduler to install, varysImpl or aaloImpl
    #[structopt(short = "s", long = "scheduler", default_value = "varysImpl")]
    pub scheduler: String,

    /// The traffic generator to install
    #[structopt(short = "t", long = "traffic", default_value = "fb")]
    pub traffic: String,

    /// Link rate in bits per second, overrides the configure file
    #[structopt(long = "elec")]
    pub elec: Option<i64>,

    /// Multiply every flow size by this number
    #[structopt(long = "inflate")]
    pub inflate: Option<f64>,

    /// The coflow trace to replay
    #[structopt(long = "ftrace")]
    pub trace: Option<std::path::PathBuf>,

    /// Append per-coflow results to this file
    #[structopt(long = "faudit")]
    pub audit: Option<std::path::PathBuf>,

    /// Charge no computation time for a new schedule
    #[structopt(long = "zc")]
    pub zero_comp_time: Option<bool>,
}

fn main() -> anyhow::Result<()> {
    logging::init_log();

    let opt = Opt::from_args();
    log::info!("Opts: {:#?}", opt);

    let mut config = if let Some(path) = opt.config.as_ref() {
        log::info!("parsing configuration from file: {:?}", path);
        read_config(path)?
    } else {
        SimConfig::default()
    };

    if let Some(elec) = opt.elec {
        config.link_rate_bps = elec;
    }
    if let Some(inflate) = opt.inflate {
        config.traffic_size_inflate = inflate;
    }
    if opt.trace.is_some() {
        config.trace = opt.trace.clone();
    }
    if opt.audit.is_some() {
        config.audit = opt.audit.clone();
    }
    if let Some(zc) = opt.zero_comp_time {
        config.zero_comp_time = zc;
    }

    log::info!("config: {:#?}", config);

    let mut simulator = Simulator::new(config);
    if !simulator.install_scheduler(&opt.scheduler) {
        anyhow::bail!("failed to install scheduler {}", opt.scheduler);
    }
    if !simulator.install_traffic_gen(&opt.traffic) {
        anyhow::bail!("failed to install traffic generator {}", opt.traffic);
    }

    simulator.run()?;

    for e in simulator.diagnostics().iter() {
        log::warn!("{}", e);
    }
    if let Some(report) = simulator.report() {
        log::info!("{}", report.summary_line());
        if let Some(avg) = report.average_cct() {
            log::info!("average cct: {:.6}s", avg);
        }
    }

    Ok(())
}
