//! Smallest-bottleneck-first allocation with work conservation.
//!
//! Coflows are ordered by alpha, their remaining bottleneck demand. Each coflow in turn gives
//! every flow a share of the bandwidth left at its endpoints proportional to the flow's part
//! in the bottleneck, then a second pass hands whatever is still free to any flow that can use it.
use fnv::FnvHashMap as HashMap;
use log::trace;

use super::{calc_alpha_and_sort, CoflowSet, RateControl, RateMap};
use crate::config::SimConfig;
use crate::{Bps, NodeId};

#[derive(Debug, Clone)]
pub struct Varys {
    online_alpha_cutoff: f64,
    dead_alpha_sign: f64,
    // free bandwidth right before the work conservation pass of the last round
    s_free_before_wc: HashMap<NodeId, Bps>,
    r_free_before_wc: HashMap<NodeId, Bps>,
}

impl Varys {
    pub fn new(config: &SimConfig) -> Self {
        Varys {
            online_alpha_cutoff: config.online_alpha_cutoff,
            dead_alpha_sign: config.dead_alpha_sign,
            s_free_before_wc: Default::default(),
            r_free_before_wc: Default::default(),
        }
    }

    pub fn free_before_work_conservation(&self) -> (&HashMap<NodeId, Bps>, &HashMap<NodeId, Bps>) {
        (&self.s_free_before_wc, &self.r_free_before_wc)
    }

    /// Each flow gets `min(free at src, free at dst) * bits_left / alpha`. The bandwidth a
    /// coflow takes is removed from the pools before the next coflow is visited.
    fn selfish(
        coflows: &CoflowSet,
        rates: &mut RateMap,
        s_free: &mut HashMap<NodeId, Bps>,
        r_free: &mut HashMap<NodeId, Bps>,
        link_rate: Bps,
    ) {
        for cf in coflows.values() {
            if cf.is_complete() || cf.alpha() == 0 {
                continue;
            }

            let mut s_used: HashMap<NodeId, Bps> = Default::default();
            let mut r_used: HashMap<NodeId, Bps> = Default::default();

            for flow in cf.flows().iter().filter(|f| f.bits_left() > 0) {
                let s_bps = s_free.get(&flow.src()).copied().unwrap_or(link_rate);
                let r_bps = r_free.get(&flow.dst()).copied().unwrap_or(link_rate);
                let min_free = s_bps.min(r_bps);
                let bps =
                    (min_free as f64 * (flow.bits_left() as f64 / cf.alpha() as f64)) as Bps;

                if bps > 0 {
                    rates.entry(flow.id()).or_insert(bps);
                    *s_used.entry(flow.src()).or_insert(0) += bps;
                    *r_used.entry(flow.dst()).or_insert(0) += bps;
                }
            }

            for (n, used) in s_used {
                *s_free.entry(n).or_insert(link_rate) -= used;
            }
            for (n, used) in r_used {
                *r_free.entry(n).or_insert(link_rate) -= used;
            }
        }
    }

    /// Walk the coflows in priority order again and give each flow all of what is still free
    /// on both of its endpoints.
    fn work_conservation(
        coflows: &CoflowSet,
        rates: &mut RateMap,
        s_free: &mut HashMap<NodeId, Bps>,
        r_free: &mut HashMap<NodeId, Bps>,
        link_rate: Bps,
    ) {
        for cf in coflows.values() {
            if cf.is_complete() {
                continue;
            }
            for flow in cf.flows().iter().filter(|f| f.bits_left() > 0) {
                let s_bps = s_free.entry(flow.src()).or_insert(link_rate);
                let s_avail = *s_bps;
                let r_avail = r_free.get(&flow.dst()).copied().unwrap_or(link_rate);
                let min_free = s_avail.min(r_avail);
                if min_free > 0 {
                    *s_bps -= min_free;
                    *r_free.entry(flow.dst()).or_insert(link_rate) -= min_free;
                    *rates.entry(flow.id()).or_insert(0) += min_free;
                }
            }
        }
    }
}

impl RateControl for Varys {
    fn name(&self) -> &'static str {
        "varysImpl"
    }

    fn rate_control(&mut self, coflows: &mut CoflowSet, rates: &mut RateMap, link_rate: Bps) {
        if coflows.is_empty() {
            return;
        }

        rates.clear();

        calc_alpha_and_sort(coflows);

        let mut s_free = HashMap::default();
        let mut r_free = HashMap::default();
        Self::selfish(coflows, rates, &mut s_free, &mut r_free, link_rate);

        self.s_free_before_wc = s_free.clone();
        self.r_free_before_wc = r_free.clone();
        for cf in coflows.values_mut() {
            cf.calc_alpha_online(
                &self.s_free_before_wc,
                &self.r_free_before_wc,
                link_rate,
                self.online_alpha_cutoff,
                self.dead_alpha_sign,
            );
        }

        Self::work_conservation(coflows, rates, &mut s_free, &mut r_free, link_rate);

        if log::log_enabled!(log::Level::Trace) {
            for cf in coflows.values() {
                trace!(
                    "coflow {} alpha {} online_alpha {}",
                    cf.id(),
                    cf.alpha(),
                    cf.online_alpha()
                );
                for f in cf.flows() {
                    trace!(
                        "flow [{}] {}->{} demand {} rate {}",
                        f.id(),
                        f.src(),
                        f.dst(),
                        f.bits_left(),
                        rates.get(&f.id()).copied().unwrap_or(0)
                    );
                }
            }
        }
    }
}
