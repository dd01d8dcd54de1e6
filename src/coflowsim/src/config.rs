use serde::{Deserialize, Serialize};

use crate::Bps;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AaloConfig {
    /// Number of priority queues, queue 0 has the highest priority
    pub num_queues: usize,
    /// Bytes a coflow may send before it leaves queue 0
    pub init_queue_height: f64,
    /// Each following queue is this many times higher than the previous one
    pub queue_height_multiplier: f64,
}

impl Default for AaloConfig {
    fn default() -> Self {
        AaloConfig {
            num_queues: 10,
            init_queue_height: 10.0 * 1_000_000.0,
            queue_height_multiplier: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Per-endpoint link rate in bits per second, in both directions
    pub link_rate_bps: Bps,

    /// Apply a new schedule at the same instant it is computed
    pub zero_comp_time: bool,

    /// Perturb flow sizes when replaying a trace
    pub enable_perturb: bool,

    /// Maximal perturbation in percent of the average flow size
    pub perturb_percent: u32,

    /// Without perturbation, give every flow to the same reducer the same size
    pub equal_flow_to_same_reducer: bool,

    /// Seed used to generate the per-coflow perturbation seeds
    pub perturb_seed: u64,

    /// Number of per-coflow perturbation seeds
    pub perturb_seed_num: usize,

    /// Multiply every flow size by this number
    pub traffic_size_inflate: f64,

    /// Attach a deadline to every replayed coflow
    pub deadline_mode: bool,

    /// Slack allowed when checking whether a coflow met its deadline, in seconds
    pub deadline_error_tolerance: f64,

    /// Online alpha longer than this many seconds is considered infinite
    pub online_alpha_cutoff: f64,

    /// The value that marks an infinite online alpha
    pub dead_alpha_sign: f64,

    pub aalo: AaloConfig,

    /// Coflow trace to replay
    pub trace: Option<std::path::PathBuf>,

    /// Where to append per-coflow results
    pub audit: Option<std::path::PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            link_rate_bps: 1_000_000_000,
            zero_comp_time: true,
            enable_perturb: true,
            perturb_percent: 5,
            equal_flow_to_same_reducer: false,
            perturb_seed: 13,
            perturb_seed_num: 600,
            traffic_size_inflate: 1.0,
            deadline_mode: false,
            deadline_error_tolerance: 0.0001,
            online_alpha_cutoff: 10_000_000.0,
            dead_alpha_sign: -1.0,
            aalo: AaloConfig::default(),
            trace: None,
            audit: None,
        }
    }
}

impl SimConfig {
    pub fn with_link_rate(link_rate_bps: Bps) -> Self {
        SimConfig {
            link_rate_bps,
            ..Default::default()
        }
    }
}

pub fn read_config<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<SimConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config() {
        let config: SimConfig = toml::from_str(
            r#"
            link_rate_bps = 1000000
            zero_comp_time = false

            [aalo]
            num_queues = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.link_rate_bps, 1_000_000);
        assert!(!config.zero_comp_time);
        assert_eq!(config.aalo.num_queues, 4);
        assert_eq!(config.aalo.queue_height_multiplier, 10.0);
        assert_eq!(config.perturb_seed, 13);
        assert!(config.trace.is_none());
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(toml::from_str::<SimConfig>("link_rate = 1").is_err());
    }
}
