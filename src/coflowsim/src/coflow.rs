use std::collections::BTreeMap;

use fnv::FnvHashMap as HashMap;
use log::trace;

use crate::error::Error;
use crate::{Bits, Bps, CoflowId, FlowId, NodeId, Timestamp, SALVAGE_THRESHOLD_BITS};

/// A directed transfer of a fixed number of bits from `src` to `dst`.
#[derive(Debug, Clone)]
pub struct Flow {
    id: FlowId,
    src: NodeId,
    dst: NodeId,
    /// route the flow through the optical path, uses `optc_bps` instead of `elec_bps`
    thru_optic: bool,
    size: Bits,
    bits_left: Bits,
    start_ts: Timestamp,
    end_ts: Option<Timestamp>,
    elec_bps: Bps,
    optc_bps: Bps,
    /// the coflow this flow belongs to, set by `Coflow::add_flow`
    coflow: Option<CoflowId>,
}

impl Flow {
    /// A flow of `size` bits. A negative size is refused.
    pub fn new(
        id: FlowId,
        start_ts: Timestamp,
        src: NodeId,
        dst: NodeId,
        size: Bits,
    ) -> Result<Self, Error> {
        if size < 0 {
            return Err(Error::InvalidFlowSize { flow: id, size });
        }
        Ok(Flow {
            id,
            src,
            dst,
            thru_optic: false,
            size,
            bits_left: size,
            start_ts,
            end_ts: None,
            elec_bps: 0,
            optc_bps: 0,
            coflow: None,
        })
    }

    #[inline]
    pub fn id(&self) -> FlowId {
        self.id
    }

    #[inline]
    pub fn src(&self) -> NodeId {
        self.src
    }

    #[inline]
    pub fn dst(&self) -> NodeId {
        self.dst
    }

    #[inline]
    pub fn size(&self) -> Bits {
        self.size
    }

    #[inline]
    pub fn bits_left(&self) -> Bits {
        self.bits_left
    }

    #[inline]
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    #[inline]
    pub fn end_ts(&self) -> Option<Timestamp> {
        self.end_ts
    }

    #[inline]
    pub fn set_end_ts(&mut self, ts: Timestamp) {
        self.end_ts = Some(ts);
    }

    #[inline]
    pub fn coflow(&self) -> Option<CoflowId> {
        self.coflow
    }

    #[inline]
    pub fn elec_rate(&self) -> Bps {
        self.elec_bps
    }

    #[inline]
    pub fn optc_rate(&self) -> Bps {
        self.optc_bps
    }

    #[inline]
    pub fn set_rate(&mut self, elec_bps: Bps, optc_bps: Bps) {
        self.elec_bps = elec_bps;
        self.optc_bps = optc_bps;
    }

    #[inline]
    pub fn is_thru_optic(&self) -> bool {
        self.thru_optic
    }

    #[inline]
    pub fn set_thru_optic(&mut self, thru_optic: bool) {
        self.thru_optic = thru_optic;
    }

    /// The rate of the path this flow is currently routed through.
    #[inline]
    pub fn rate(&self) -> Bps {
        if self.thru_optic {
            self.optc_bps
        } else {
            self.elec_bps
        }
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        self.src == self.dst
    }

    /// A flow nobody has touched yet.
    pub fn is_raw(&self) -> bool {
        self.bits_left == self.size && self.elec_bps == 0 && self.optc_bps == 0
    }

    /// Flow completion time, available once the flow has finished.
    pub fn fct(&self) -> Option<Timestamp> {
        self.end_ts.map(|end| end - self.start_ts)
    }

    /// Send at the current rate during `[start, end]`. Returns the bits left.
    pub fn transmit(&mut self, start: Timestamp, end: Timestamp) -> Bits {
        let bps = self.rate();
        let tx_bits = ((end - start) * bps as f64).ceil() as Bits;
        let tx_valid = tx_bits.min(self.bits_left).max(0);
        self.bits_left -= tx_valid;

        trace!(
            "flow {} {}->{} tx {} bits in ({}, {})s rate {} bps, {} bits left",
            self.id,
            self.src,
            self.dst,
            tx_valid,
            start,
            end,
            bps,
            self.bits_left
        );

        self.bits_left
    }

    /// Clear the flow if both ends are on the same node.
    pub fn tx_local(&mut self) -> Bits {
        if self.is_local() {
            self.bits_left = 0;
        }
        self.bits_left
    }

    /// Clear a tiny remainder of a flow that is still making progress.
    pub fn tx_salvage(&mut self) -> Bits {
        if self.rate() > 0 && self.bits_left <= SALVAGE_THRESHOLD_BITS {
            self.bits_left = 0;
        }
        self.bits_left
    }
}

impl std::fmt::Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Flow-[{}, {}->{} {} bits]",
            self.id, self.src, self.dst, self.bits_left
        )
    }
}

/// One side of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Src(NodeId),
    Dst(NodeId),
}

/// Where the mappers and reducers of the job that produced a coflow run.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    pub mappers: Vec<NodeId>,
    pub reducers: Vec<NodeId>,
    /// (mapper index, reducer index) -> bytes
    pub mr_flow_bytes: BTreeMap<(usize, usize), i64>,
}

/// A group of flows whose completion defines one job's shuffle completion.
#[derive(Debug, Clone)]
pub struct Coflow {
    id: CoflowId,
    job_id: usize,
    flows: Vec<Flow>,
    total_flows: usize,
    num_flows_completed: usize,

    start_ts: Timestamp,
    end_ts: Option<Timestamp>,
    /// relative to the arrival time, in seconds
    deadline: Option<f64>,
    rejected: bool,

    static_alpha: Bits,
    alpha: Bits,
    online_alpha: f64,

    // demand profile, only flows between distinct endpoints
    src_bits: BTreeMap<NodeId, Bits>,
    dst_bits: BTreeMap<NodeId, Bits>,
    size_bytes: f64,

    sent_bytes: f64,

    placement: Placement,
}

impl Coflow {
    pub fn new(id: CoflowId, start_ts: Timestamp, total_flows: usize) -> Self {
        Coflow {
            id,
            job_id: id.0,
            flows: Vec::with_capacity(total_flows),
            total_flows,
            num_flows_completed: 0,
            start_ts,
            end_ts: None,
            deadline: None,
            rejected: false,
            static_alpha: 0,
            alpha: -1,
            online_alpha: 0.0,
            src_bits: Default::default(),
            dst_bits: Default::default(),
            size_bytes: 0.0,
            sent_bytes: 0.0,
            placement: Default::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> CoflowId {
        self.id
    }

    #[inline]
    pub fn job_id(&self) -> usize {
        self.job_id
    }

    #[inline]
    pub fn set_job_id(&mut self, job_id: usize) {
        self.job_id = job_id;
    }

    #[inline]
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    #[inline]
    pub fn end_ts(&self) -> Option<Timestamp> {
        self.end_ts
    }

    #[inline]
    pub fn set_end_ts(&mut self, ts: Timestamp) {
        self.end_ts = Some(ts);
    }

    /// Coflow completion time, available once the coflow has finished.
    pub fn cct(&self) -> Option<Timestamp> {
        self.end_ts.map(|end| end - self.start_ts)
    }

    #[inline]
    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    #[inline]
    pub fn flows_mut(&mut self) -> &mut [Flow] {
        &mut self.flows
    }

    pub fn add_flow(&mut self, mut flow: Flow) {
        flow.coflow = Some(self.id);
        if !flow.is_local() {
            *self.src_bits.entry(flow.src).or_insert(0) += flow.size;
            *self.dst_bits.entry(flow.dst).or_insert(0) += flow.size;
            self.size_bytes += flow.size as f64 / 8.0;
        }
        self.flows.push(flow);
    }

    /// Number of flows added so far.
    #[inline]
    pub fn num_flows(&self) -> usize {
        self.flows.len()
    }

    #[inline]
    pub fn total_flows(&self) -> usize {
        self.total_flows
    }

    #[inline]
    pub fn num_flows_completed(&self) -> usize {
        self.num_flows_completed
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.num_flows_completed >= self.total_flows
    }

    /// All flows added so far have finished, though more may still arrive.
    #[inline]
    pub fn is_flows_added_complete(&self) -> bool {
        self.num_flows_completed >= self.flows.len()
    }

    /// Count one more finished flow. Refuses to count past the flows added so far.
    pub fn num_flow_finish_inc(&mut self) -> bool {
        if self.num_flows_completed < self.flows.len() {
            self.num_flows_completed += 1;
            true
        } else {
            false
        }
    }

    /// A coflow whose flows are all untouched.
    pub fn is_raw(&self) -> bool {
        self.flows.iter().all(Flow::is_raw)
    }

    #[inline]
    pub fn deadline(&self) -> Option<f64> {
        self.deadline
    }

    #[inline]
    pub fn set_deadline(&mut self, deadline: f64) {
        self.deadline = Some(deadline);
    }

    #[inline]
    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    #[inline]
    pub fn set_rejected(&mut self) {
        self.rejected = true;
    }

    #[inline]
    pub fn add_tx_bits(&mut self, bits: Bits) {
        self.sent_bytes += bits as f64 / 8.0;
    }

    #[inline]
    pub fn sent_bytes(&self) -> f64 {
        self.sent_bytes
    }

    #[inline]
    pub fn size_bytes(&self) -> f64 {
        self.size_bytes
    }

    #[inline]
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    #[inline]
    pub fn set_placement(&mut self, placement: Placement) {
        self.placement = placement;
    }

    #[inline]
    pub fn static_alpha(&self) -> Bits {
        self.static_alpha
    }

    #[inline]
    pub fn set_static_alpha(&mut self, alpha: Bits) {
        self.static_alpha = alpha;
    }

    /// The alpha computed by the last `calc_alpha`, -1 if never computed.
    #[inline]
    pub fn alpha(&self) -> Bits {
        self.alpha
    }

    /// Remaining bits aggregated per source and per destination.
    fn remaining_per_port(&self) -> (HashMap<NodeId, Bits>, HashMap<NodeId, Bits>) {
        let mut s_bits: HashMap<NodeId, Bits> = Default::default();
        let mut r_bits: HashMap<NodeId, Bits> = Default::default();
        for f in &self.flows {
            *s_bits.entry(f.src).or_insert(0) += f.bits_left;
            *r_bits.entry(f.dst).or_insert(0) += f.bits_left;
        }
        (s_bits, r_bits)
    }

    /// The largest amount of remaining bits on any single source or destination. The higher,
    /// the less prioritized.
    pub fn calc_alpha(&mut self) -> Bits {
        let (s_bits, r_bits) = self.remaining_per_port();
        let s_max = s_bits.values().copied().max().unwrap_or(0);
        let r_max = r_bits.values().copied().max().unwrap_or(0);
        self.alpha = s_max.max(r_max);
        self.alpha
    }

    #[inline]
    pub fn online_alpha(&self) -> f64 {
        self.online_alpha
    }

    /// Minimal completion time in seconds given the bandwidth still free on every endpoint.
    /// Endpoints missing from the free maps are assumed idle at `link_rate`.
    ///
    /// Returns `dead_sign` if an endpoint the coflow needs has no bandwidth left, or if the
    /// estimate exceeds `cutoff`.
    pub fn calc_alpha_online(
        &mut self,
        s_free: &HashMap<NodeId, Bps>,
        r_free: &HashMap<NodeId, Bps>,
        link_rate: Bps,
        cutoff: f64,
        dead_sign: f64,
    ) -> f64 {
        let (s_bits, r_bits) = self.remaining_per_port();

        let mut max_sec: f64 = 0.0;
        for (bits, free) in s_bits
            .iter()
            .map(|(n, b)| (b, s_free.get(n).copied().unwrap_or(link_rate)))
            .chain(
                r_bits
                    .iter()
                    .map(|(n, b)| (b, r_free.get(n).copied().unwrap_or(link_rate))),
            )
        {
            if free <= 0 {
                self.online_alpha = dead_sign;
                return dead_sign;
            }
            max_sec = max_sec.max(*bits as f64 / free as f64);
        }

        self.online_alpha = if max_sec > cutoff { dead_sign } else { max_sec };
        self.online_alpha
    }

    /// The initial demand of the most loaded source or destination, in bits.
    pub fn max_port_load_bits(&self) -> Bits {
        let s_max = self.src_bits.values().copied().max().unwrap_or(0);
        let r_max = self.dst_bits.values().copied().max().unwrap_or(0);
        s_max.max(r_max)
    }

    /// Time to drain the most loaded port at `link_rate`, the lower bound of the completion time.
    pub fn max_optimal_work_span(&self, link_rate: Bps) -> f64 {
        if link_rate <= 0 {
            return f64::INFINITY;
        }
        self.max_port_load_bits() as f64 / link_rate as f64
    }

    /// The port with the largest initial demand. Sources win ties only when strictly larger.
    pub fn port_on_max_optimal_work_span(&self) -> Option<Port> {
        fn key_of_max(m: &BTreeMap<NodeId, Bits>) -> Option<(NodeId, Bits)> {
            // first key holding the largest positive value
            m.iter()
                .filter(|(_, &v)| v > 0)
                .fold(None, |acc, (&k, &v)| match acc {
                    Some((_, best)) if best >= v => acc,
                    _ => Some((k, v)),
                })
        }
        match (key_of_max(&self.src_bits), key_of_max(&self.dst_bits)) {
            (Some((s, sv)), Some((_, dv))) if sv > dv => Some(Port::Src(s)),
            (_, Some((d, _))) => Some(Port::Dst(d)),
            (Some((s, _)), None) => Some(Port::Src(s)),
            (None, None) => None,
        }
    }

    /// Initial demand on `port`, in bits.
    pub fn load_on_port_bits(&self, port: Port) -> Bits {
        match port {
            Port::Src(n) => self.src_bits.get(&n).copied().unwrap_or(0),
            Port::Dst(n) => self.dst_bits.get(&n).copied().unwrap_or(0),
        }
    }

    pub fn optimal_work_span_on_port(&self, port: Port, link_rate: Bps) -> f64 {
        if link_rate <= 0 {
            return f64::INFINITY;
        }
        self.load_on_port_bits(port) as f64 / link_rate as f64
    }
}

impl std::fmt::Display for Coflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Coflow-[{}, {}, a = {}, {:>5} / {:>5} flows]",
            self.job_id, self.start_ts, self.alpha, self.num_flows_completed, self.total_flows
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coflow_of(flows: &[(NodeId, NodeId, Bits)]) -> Coflow {
        let mut cf = Coflow::new(CoflowId(0), 0.0, flows.len());
        for (i, &(src, dst, size)) in flows.iter().enumerate() {
            cf.add_flow(Flow::new(FlowId(i), 0.0, src, dst, size).unwrap());
        }
        cf
    }

    #[test]
    fn basic_transmit_rounds_up_and_caps() {
        let mut f = Flow::new(FlowId(0), 0.0, 1, 2, 1000).unwrap();
        assert!(f.is_raw());
        f.set_rate(300, 0);
        assert!(!f.is_raw());
        assert_eq!(f.transmit(0.0, 0.5), 850);
        assert_eq!(f.transmit(0.5, 0.501), 849);
        assert_eq!(f.transmit(1.0, 100.0), 0);
        assert_eq!(f.bits_left(), 0);
    }

    #[test]
    fn negative_size_is_refused() {
        assert_eq!(
            Flow::new(FlowId(3), 0.0, 1, 2, -8).unwrap_err(),
            Error::InvalidFlowSize {
                flow: FlowId(3),
                size: -8
            }
        );
        let empty = Flow::new(FlowId(4), 0.0, 1, 2, 0).unwrap();
        assert!(empty.is_raw());
        assert_eq!(empty.bits_left(), 0);
    }

    #[test]
    fn transmit_uses_routed_rate() {
        let mut f = Flow::new(FlowId(0), 0.0, 1, 2, 1000).unwrap();
        f.set_rate(100, 400);
        f.set_thru_optic(true);
        assert_eq!(f.transmit(0.0, 1.0), 600);
        f.set_thru_optic(false);
        assert_eq!(f.transmit(1.0, 2.0), 500);
    }

    #[test]
    fn local_and_salvage() {
        let mut local = Flow::new(FlowId(0), 0.0, 3, 3, 1000).unwrap();
        assert_eq!(local.tx_local(), 0);

        let mut remote = Flow::new(FlowId(1), 0.0, 3, 4, 10).unwrap();
        assert_eq!(remote.tx_local(), 10);
        // no rate, no salvage
        assert_eq!(remote.tx_salvage(), 10);
        remote.set_rate(1, 0);
        assert_eq!(remote.tx_salvage(), 0);

        let mut big = Flow::new(FlowId(2), 0.0, 3, 4, 11).unwrap();
        big.set_rate(1, 0);
        assert_eq!(big.tx_salvage(), 11);
    }

    #[test]
    fn alpha_single_flow() {
        let mut cf = coflow_of(&[(0, 1, 8_000)]);
        assert_eq!(cf.calc_alpha(), 8_000);
        assert_eq!(cf.max_port_load_bits(), 8_000);
        assert_eq!(cf.flows()[0].coflow(), Some(CoflowId(0)));
    }

    #[test]
    fn alpha_local_flow_after_clearing() {
        let mut cf = coflow_of(&[(5, 5, 8_000)]);
        // local flows are not part of the demand profile
        assert_eq!(cf.max_port_load_bits(), 0);
        cf.flows_mut()[0].tx_local();
        assert_eq!(cf.calc_alpha(), 0);
    }

    #[test]
    fn alpha_takes_max_over_ports() {
        // src 0 sends 300, dst 9 receives 500
        let mut cf = coflow_of(&[(0, 9, 100), (0, 8, 200), (1, 9, 400)]);
        assert_eq!(cf.calc_alpha(), 500);
        assert_eq!(cf.port_on_max_optimal_work_span(), Some(Port::Dst(9)));
        assert_eq!(cf.load_on_port_bits(Port::Src(0)), 300);
        assert!((cf.max_optimal_work_span(100) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn online_alpha() {
        let mut cf = coflow_of(&[(0, 1, 1000), (2, 1, 1000)]);
        let mut s_free = HashMap::default();
        let mut r_free = HashMap::default();
        // dst 1 receives 2000 bits at 1000 bps
        let a = cf.calc_alpha_online(&s_free, &r_free, 1000, 1e7, -1.0);
        assert!((a - 2.0).abs() < 1e-9);

        s_free.insert(2, 100);
        let a = cf.calc_alpha_online(&s_free, &r_free, 1000, 1e7, -1.0);
        assert!((a - 10.0).abs() < 1e-9);

        // beyond cutoff
        let a = cf.calc_alpha_online(&s_free, &r_free, 1000, 5.0, -1.0);
        assert_eq!(a, -1.0);

        // saturated endpoint
        r_free.insert(1, 0);
        let a = cf.calc_alpha_online(&s_free, &r_free, 1000, 1e7, -1.0);
        assert_eq!(a, -1.0);
        assert_eq!(cf.online_alpha(), -1.0);
    }

    #[test]
    fn completion_counting() {
        let mut cf = Coflow::new(CoflowId(3), 1.0, 2);
        cf.add_flow(Flow::new(FlowId(0), 1.0, 0, 1, 10).unwrap());
        assert!(cf.num_flow_finish_inc());
        // only one flow added so far
        assert!(!cf.num_flow_finish_inc());
        assert!(cf.is_flows_added_complete());
        assert!(!cf.is_complete());
        cf.add_flow(Flow::new(FlowId(1), 1.0, 0, 2, 10).unwrap());
        assert!(cf.num_flow_finish_inc());
        assert!(cf.is_complete());
        assert_eq!(cf.num_flows_completed(), cf.total_flows());
        cf.set_end_ts(3.5);
        assert_eq!(cf.cct(), Some(2.5));
    }
}
