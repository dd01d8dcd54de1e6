//! Multi-level feedback queues without prior knowledge of coflow sizes.
//!
//! Coflows start in the highest priority queue and sink as they send more bytes. Queues are
//! served in strict priority order, coflows within a queue in FIFO order.
use fnv::FnvHashMap as HashMap;
use log::{debug, trace};

use super::{CoflowSet, RateControl, RateMap};
use crate::coflow::Coflow;
use crate::config::AaloConfig;
use crate::{Bps, CoflowId, NodeId};

#[derive(Debug, Clone)]
pub struct Aalo {
    init_queue_height: f64,
    queue_height_multiplier: f64,
    queues: Vec<Vec<CoflowId>>,
}

impl Aalo {
    pub fn new(config: &AaloConfig) -> Self {
        Aalo {
            init_queue_height: config.init_queue_height,
            queue_height_multiplier: config.queue_height_multiplier,
            queues: vec![Vec::new(); config.num_queues.max(1)],
        }
    }

    #[inline]
    pub fn queues(&self) -> &[Vec<CoflowId>] {
        &self.queues
    }

    /// The queue a coflow belongs to after sending `sent_bytes`: the number of thresholds
    /// `init * multiplier^k` it has exceeded, at most the last queue.
    pub fn queue_index(&self, sent_bytes: f64) -> usize {
        let last = self.queues.len() - 1;
        let mut q = 0;
        let mut cutoff = self.init_queue_height;
        while cutoff < sent_bytes && q < last {
            q += 1;
            cutoff *= self.queue_height_multiplier;
        }
        q
    }

    /// Drop coflows that are no longer active and move the others to the queue their bytes sent
    /// call for. A moved coflow goes to the back of its new queue.
    pub fn update_coflow_queue(&mut self, coflows: &CoflowSet) {
        for qi in 0..self.queues.len() {
            let queue = std::mem::take(&mut self.queues[qi]);
            for id in queue {
                let cf = match coflows.get(&id) {
                    Some(cf) => cf,
                    None => continue,
                };
                let target = self.queue_index(cf.sent_bytes());
                if target != qi {
                    debug!(
                        "Qmv Q-{} -> Q-{} bytes {}/{} {}",
                        qi,
                        target,
                        cf.sent_bytes(),
                        cf.size_bytes(),
                        cf
                    );
                }
                self.queues[target].push(id);
            }
        }

        if log::log_enabled!(log::Level::Trace) {
            for (qi, q) in self.queues.iter().enumerate() {
                trace!("Q-{} : {:?}", qi, q);
            }
        }
    }
}

impl RateControl for Aalo {
    fn name(&self) -> &'static str {
        "aaloImpl"
    }

    fn admit(&mut self, coflow: &Coflow) {
        self.queues[0].push(coflow.id());
    }

    fn rate_control(&mut self, coflows: &mut CoflowSet, rates: &mut RateMap, link_rate: Bps) {
        if coflows.is_empty() {
            return;
        }

        rates.clear();

        self.update_coflow_queue(coflows);

        let mut s_free: HashMap<NodeId, Bps> = HashMap::default();
        let mut r_free: HashMap<NodeId, Bps> = HashMap::default();

        for cf in self.queues.iter().flatten().filter_map(|id| coflows.get(id)) {
            if cf.is_flows_added_complete() {
                continue;
            }

            // flows of this coflow sharing each endpoint
            let mut src_flow_num: HashMap<NodeId, usize> = HashMap::default();
            let mut dst_flow_num: HashMap<NodeId, usize> = HashMap::default();
            for flow in cf.flows().iter().filter(|f| f.bits_left() > 0) {
                *src_flow_num.entry(flow.src()).or_insert(0) += 1;
                *dst_flow_num.entry(flow.dst()).or_insert(0) += 1;
            }

            let mut s_used: HashMap<NodeId, Bps> = HashMap::default();
            let mut r_used: HashMap<NodeId, Bps> = HashMap::default();

            for flow in cf.flows().iter().filter(|f| f.bits_left() > 0) {
                let s_bps = s_free.get(&flow.src()).copied().unwrap_or(link_rate);
                let r_bps = r_free.get(&flow.dst()).copied().unwrap_or(link_rate);
                if s_bps <= 0 || r_bps <= 0 {
                    continue;
                }

                let src_avg = s_bps / src_flow_num[&flow.src()] as Bps;
                let dst_avg = r_bps / dst_flow_num[&flow.dst()] as Bps;
                let bps = src_avg.min(dst_avg);

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

        if log::log_enabled!(log::Level::Trace) {
            for cf in coflows.values() {
                for f in cf.flows() {
                    trace!(
                        "coflow {} flow [{}] {}->{} demand {} rate {}",
                        cf.job_id(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coflow::Flow;
    use crate::{Bits, FlowId};

    const LINK: Bps = 1_000_000;

    fn aalo() -> Aalo {
        Aalo::new(&AaloConfig {
            num_queues: 3,
            init_queue_height: 1000.0,
            queue_height_multiplier: 10.0,
        })
    }

    fn admit_all(aalo: &mut Aalo, coflows: &[&[(usize, NodeId, NodeId, Bits)]]) -> CoflowSet {
        let mut set = CoflowSet::default();
        for (i, flows) in coflows.iter().enumerate() {
            let mut cf = Coflow::new(CoflowId(i), 0.0, flows.len());
            for &(fid, src, dst, size) in flows.iter() {
                cf.add_flow(Flow::new(FlowId(fid), 0.0, src, dst, size).unwrap());
            }
            aalo.admit(&cf);
            set.insert(cf.id(), cf);
        }
        set
    }

    fn rate(rates: &RateMap, fid: usize) -> Bps {
        rates.get(&FlowId(fid)).copied().unwrap_or(0)
    }

    #[test]
    fn queue_thresholds() {
        let aalo = aalo();
        assert_eq!(aalo.queue_index(0.0), 0);
        assert_eq!(aalo.queue_index(999.0), 0);
        // the threshold must be exceeded
        assert_eq!(aalo.queue_index(1000.0), 0);
        assert_eq!(aalo.queue_index(1000.5), 1);
        assert_eq!(aalo.queue_index(10_000.0), 1);
        assert_eq!(aalo.queue_index(10_001.0), 2);
        // clamped to the last queue
        assert_eq!(aalo.queue_index(1e12), 2);
    }

    #[test]
    fn demotion_on_reconciliation() {
        let mut aalo = aalo();
        let mut set = admit_all(&mut aalo, &[&[(0, 0, 1, 100_000)], &[(1, 2, 3, 100_000)]]);
        assert_eq!(aalo.queues()[0], vec![CoflowId(0), CoflowId(1)]);

        // just under the threshold
        set[&CoflowId(0)].add_tx_bits(7_992);
        // just over
        set[&CoflowId(1)].add_tx_bits(8_008);
        aalo.update_coflow_queue(&set);
        assert_eq!(aalo.queues()[0], vec![CoflowId(0)]);
        assert_eq!(aalo.queues()[1], vec![CoflowId(1)]);

        // inactive coflows are dropped
        set.shift_remove(&CoflowId(0));
        aalo.update_coflow_queue(&set);
        assert!(aalo.queues()[0].is_empty());
        assert_eq!(aalo.queues()[1], vec![CoflowId(1)]);
    }

    #[test]
    fn strict_priority_across_queues() {
        let mut aalo = aalo();
        let mut set = admit_all(&mut aalo, &[&[(0, 0, 1, 100_000)], &[(1, 0, 2, 100_000)]]);
        // coflow 0 sank to queue 1, coflow 1 now comes first
        set[&CoflowId(0)].add_tx_bits(16_000);

        let mut rates = RateMap::default();
        aalo.rate_control(&mut set, &mut rates, LINK);
        assert_eq!(aalo.queues()[0], vec![CoflowId(1)]);
        assert_eq!(rate(&rates, 1), LINK);
        assert_eq!(rate(&rates, 0), 0);
    }

    #[test]
    fn fair_share_within_coflow() {
        let mut aalo = aalo();
        let mut set = admit_all(
            &mut aalo,
            &[
                &[(0, 0, 1, 1000), (1, 0, 2, 1000), (2, 3, 2, 1000)],
                &[(3, 4, 1, 1000)],
            ],
        );
        let mut rates = RateMap::default();
        aalo.rate_control(&mut set, &mut rates, LINK);
        // src 0 and dst 2 each carry two flows of the first coflow
        assert_eq!(rate(&rates, 0), LINK / 2);
        assert_eq!(rate(&rates, 1), LINK / 2);
        assert_eq!(rate(&rates, 2), LINK / 2);
        // dst 1 has half of its bandwidth left, no work conservation beyond that
        assert_eq!(rate(&rates, 3), LINK / 2);
    }

    #[test]
    fn saturated_endpoint_is_skipped() {
        let mut aalo = aalo();
        let mut set = admit_all(&mut aalo, &[&[(0, 0, 1, 1000)], &[(1, 0, 1, 1000), (2, 5, 6, 1000)]]);
        let mut rates = RateMap::default();
        aalo.rate_control(&mut set, &mut rates, LINK);
        assert_eq!(rate(&rates, 0), LINK);
        assert!(!rates.contains_key(&FlowId(1)));
        assert_eq!(rate(&rates, 2), LINK);
    }
}
