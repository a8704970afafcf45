//! Statistics aggregation, shadow memory and bit-connection inference
//!
//! Owns every long-lived collection of the analysis: transaction counters,
//! the per-completer shadow memory of last-written values, the reverse
//! value→address index used for mirroring detection, per-completer bit-pair
//! co-occurrence matrices, and the recorded error details. The protocol
//! analyzer feeds it during ticks; `finalize_bit_activity` runs once after
//! the stream ends and turns co-occurrence evidence into shorted-pair
//! verdicts.

use crate::completers::Completer;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const DEFAULT_BUS_WIDTH: u32 = 32;

/// Connection verdict for one bus bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitStatus {
    Correct,
    /// Stuck shorted with the bit at the given index
    Shorted(usize),
}

/// Last value written at one `(completer, addr)` cell
#[derive(Debug, Clone, Copy)]
pub struct ShadowEntry {
    pub data: u32,
    pub ts: u64,
}

/// Most recent write carrying a given data value
#[derive(Debug, Clone, Copy)]
pub struct ReverseWriteInfo {
    pub addr: u32,
    pub ts: u64,
}

// ── Error details ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct TimeoutDetail {
    pub start_ts: u64,
    pub addr: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct OutOfRangeDetail {
    pub ts: u64,
    pub addr: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct OverlapDetail {
    pub ts: u64,
    pub addr: u32,
}

/// One mirroring event; renders as an AddressMirroring line at the
/// original-write timestamp plus a DataMirroring line at the read.
#[derive(Debug, Clone, Copy)]
pub struct MirroringDetail {
    pub read_ts: u64,
    pub mirror_addr: u32,
    pub value: u32,
    pub orig_addr: u32,
    pub orig_write_ts: u64,
}

/// A shorted pair observed through a specific transaction, `bit_lo < bit_hi`
#[derive(Debug, Clone, Copy)]
pub struct CorruptionDetail {
    pub ts: u64,
    pub bit_lo: usize,
    pub bit_hi: usize,
}

// ── Bit-pair co-occurrence ───────────────────────────────────────────────

/// Square co-occurrence table over bit indices of one bus
///
/// For each unordered pair `(i, j)` with `i < j`, counts how often the two
/// bits equalled each of `(0,0), (0,1), (1,0), (1,1)` across the sampled
/// values. The combination index is `bit_i << 1 | bit_j`.
#[derive(Debug, Clone)]
pub struct BitPairMatrix {
    width: usize,
    cells: Vec<[u32; 4]>,
}

impl BitPairMatrix {
    pub fn new(width: u32) -> Self {
        let width = width as usize;
        Self {
            width,
            cells: vec![[0; 4]; width * width],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Count one sampled bus value into every `i < j` pair cell.
    pub fn record(&mut self, value: u32) {
        for i in 0..self.width {
            let bit_i = (value >> i) & 1;
            for j in (i + 1)..self.width {
                let bit_j = (value >> j) & 1;
                let combo = (bit_i << 1 | bit_j) as usize;
                self.cells[i * self.width + j][combo] += 1;
            }
        }
    }

    /// Pairs whose evidence is consistent with a hard short: both agreeing
    /// combinations observed, neither disagreeing combination ever seen.
    pub fn shorted_candidates(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for i in 0..self.width {
            for j in (i + 1)..self.width {
                let c = &self.cells[i * self.width + j];
                if c[0b00] >= 1 && c[0b11] >= 1 && c[0b01] == 0 && c[0b10] == 0 {
                    out.push((i, j));
                }
            }
        }
        out
    }
}

/// Per-completer connection-integrity state
#[derive(Debug, Clone)]
pub struct CompleterActivity {
    pub addr_pairs: BitPairMatrix,
    pub wdata_pairs: BitPairMatrix,
    pub addr_bits: Vec<BitStatus>,
    pub wdata_bits: Vec<BitStatus>,
}

impl CompleterActivity {
    fn new(addr_width: u32, wdata_width: u32) -> Self {
        Self {
            addr_pairs: BitPairMatrix::new(addr_width),
            wdata_pairs: BitPairMatrix::new(wdata_width),
            addr_bits: vec![BitStatus::Correct; addr_width as usize],
            wdata_bits: vec![BitStatus::Correct; wdata_width as usize],
        }
    }
}

// ── Aggregator ───────────────────────────────────────────────────────────

/// Aggregated traffic statistics and data-integrity state
#[derive(Debug, Default)]
pub struct Statistics {
    read_no_wait: u64,
    read_with_wait: u64,
    write_no_wait: u64,
    write_with_wait: u64,
    total_read_edges: u64,
    total_write_edges: u64,

    bus_active_edges: u64,
    total_sim_edges: u64,
    first_valid_edge: u64,

    addr_width: u32,
    wdata_width: u32,

    accessed: Vec<Completer>,
    activity: HashMap<Completer, CompleterActivity>,

    shadow: HashMap<(Completer, u32), ShadowEntry>,
    reverse_index: HashMap<u32, ReverseWriteInfo>,
    exempt_registers: HashSet<u32>,

    timeouts: Vec<TimeoutDetail>,
    out_of_range: Vec<OutOfRangeDetail>,
    overlaps: Vec<OverlapDetail>,
    mirrorings: Vec<MirroringDetail>,
    addr_corruptions: Vec<CorruptionDetail>,
    data_corruptions: Vec<CorruptionDetail>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the read-side addresses exempt from shadow verification
    /// (input-mapped registers whose contents the bus never wrote).
    pub fn set_exempt_registers<I: IntoIterator<Item = u32>>(&mut self, addrs: I) {
        self.exempt_registers = addrs.into_iter().collect();
    }

    /// Latch the bus widths observed in the trace header. A missing bus
    /// declaration falls back to 32 bits.
    pub fn set_bus_widths(&mut self, addr_width: u32, wdata_width: u32) {
        self.addr_width = if addr_width > 0 { addr_width } else { DEFAULT_BUS_WIDTH };
        self.wdata_width = if wdata_width > 0 { wdata_width } else { DEFAULT_BUS_WIDTH };
    }

    // ── Feed from the protocol analyzer ──────────────────────────────────

    pub fn record_read_transaction(&mut self, had_wait: bool, duration_edges: u64) {
        self.total_read_edges += duration_edges;
        if had_wait {
            self.read_with_wait += 1;
        } else {
            self.read_no_wait += 1;
        }
    }

    pub fn record_write_transaction(&mut self, had_wait: bool, duration_edges: u64) {
        self.total_write_edges += duration_edges;
        if had_wait {
            self.write_with_wait += 1;
        } else {
            self.write_no_wait += 1;
        }
    }

    pub fn record_bus_active_edge(&mut self) {
        self.bus_active_edges += 1;
    }

    pub fn set_total_sim_edges(&mut self, edges: u64) {
        self.total_sim_edges = edges;
    }

    pub fn set_first_valid_edge(&mut self, edge: u64) {
        self.first_valid_edge = edge;
    }

    /// Note a completed access to `completer`, keeping the first-access
    /// order and allocating its co-occurrence state on first sight.
    pub fn record_accessed_completer(&mut self, completer: Completer) {
        if !completer.is_mapped() {
            return;
        }
        if !self.accessed.contains(&completer) {
            self.accessed.push(completer);
        }
        let (aw, ww) = self.effective_widths();
        self.activity
            .entry(completer)
            .or_insert_with(|| CompleterActivity::new(aw, ww));
    }

    pub fn record_addr_sample(&mut self, completer: Completer, addr: u32) {
        if let Some(activity) = self.activity.get_mut(&completer) {
            activity.addr_pairs.record(addr);
        }
    }

    pub fn record_wdata_sample(&mut self, completer: Completer, wdata: u32) {
        if let Some(activity) = self.activity.get_mut(&completer) {
            activity.wdata_pairs.record(wdata);
        }
    }

    pub fn record_timeout(&mut self, detail: TimeoutDetail) {
        self.timeouts.push(detail);
    }

    pub fn record_out_of_range(&mut self, detail: OutOfRangeDetail) {
        self.out_of_range.push(detail);
    }

    pub fn record_overlap(&mut self, detail: OverlapDetail) {
        self.overlaps.push(detail);
    }

    pub fn record_addr_corruption(&mut self, detail: CorruptionDetail) {
        self.addr_corruptions.push(detail);
    }

    pub fn record_data_corruption(&mut self, detail: CorruptionDetail) {
        self.data_corruptions.push(detail);
    }

    /// Record a completed, in-range write with fully defined address and
    /// data into the shadow memory and the reverse value index.
    pub fn update_shadow_memory(&mut self, completer: Completer, addr: u32, data: u32, ts: u64) {
        if !completer.is_mapped() {
            return;
        }
        self.shadow.insert((completer, addr), ShadowEntry { data, ts });
        self.reverse_index.insert(data, ReverseWriteInfo { addr, ts });
    }

    /// Verify a completed, in-range read against the shadow model.
    ///
    /// A mismatch against a known cell that differs in exactly two bits
    /// inside the data bus marks those bits shorted and records a data
    /// corruption at the read timestamp. A read of a never-written cell
    /// whose value was produced at a different address records one
    /// mirroring event. Externally driven registers are exempt.
    pub fn check_read_against_shadow(
        &mut self,
        completer: Completer,
        addr: u32,
        rdata: u32,
        ts: u64,
    ) {
        if !completer.is_mapped() || self.exempt_registers.contains(&addr) {
            return;
        }

        if let Some(entry) = self.shadow.get(&(completer, addr)).copied() {
            let expected = entry.data;
            if rdata == expected {
                return;
            }
            let diff = expected ^ rdata;
            if diff.count_ones() == 2 {
                let bit_lo = diff.trailing_zeros() as usize;
                let bit_hi = (31 - diff.leading_zeros()) as usize;
                if bit_hi < self.wdata_width as usize {
                    self.mark_wdata_shorted(completer, bit_lo, bit_hi);
                    self.data_corruptions.push(CorruptionDetail { ts, bit_lo, bit_hi });
                    return;
                }
            }
            debug!(
                "read at {:#010x} disagrees with shadow (expected {:#010x}, got {:#010x})",
                addr, expected, rdata
            );
        } else if let Some(orig) = self.reverse_index.get(&rdata).copied()
            && orig.addr != addr
        {
            self.mirrorings.push(MirroringDetail {
                read_ts: ts,
                mirror_addr: addr,
                value: rdata,
                orig_addr: orig.addr,
                orig_write_ts: orig.ts,
            });
        }
    }

    fn mark_wdata_shorted(&mut self, completer: Completer, bit_lo: usize, bit_hi: usize) {
        if let Some(activity) = self.activity.get_mut(&completer) {
            if activity.wdata_bits[bit_lo] == BitStatus::Correct {
                activity.wdata_bits[bit_lo] = BitStatus::Shorted(bit_hi);
            }
            if activity.wdata_bits[bit_hi] == BitStatus::Correct {
                activity.wdata_bits[bit_hi] = BitStatus::Shorted(bit_lo);
            }
        }
    }

    /// Turn co-occurrence evidence into shorted-pair verdicts, once per
    /// run. Exactly one candidate pair per bus per completer is marked;
    /// zero or several candidates leave the bus untouched, since the fault
    /// model is a single pair and low-entropy traffic must not produce
    /// spurious reports.
    pub fn finalize_bit_activity(&mut self) {
        for (completer, activity) in self.activity.iter_mut() {
            for (pairs, bits) in [
                (&activity.addr_pairs, &mut activity.addr_bits),
                (&activity.wdata_pairs, &mut activity.wdata_bits),
            ] {
                let candidates = pairs.shorted_candidates();
                match candidates.as_slice() {
                    [(i, j)] => {
                        debug!("{}: inferred shorted pair ({}, {})", completer, i, j);
                        if bits[*i] == BitStatus::Correct {
                            bits[*i] = BitStatus::Shorted(*j);
                        }
                        if bits[*j] == BitStatus::Correct {
                            bits[*j] = BitStatus::Shorted(*i);
                        }
                    }
                    [] => {}
                    many => {
                        debug!(
                            "{}: {} candidate pairs under low-entropy traffic, reporting none",
                            completer,
                            many.len()
                        );
                    }
                }
            }
        }
    }

    // ── Derived metrics ──────────────────────────────────────────────────

    pub fn read_no_wait(&self) -> u64 {
        self.read_no_wait
    }

    pub fn read_with_wait(&self) -> u64 {
        self.read_with_wait
    }

    pub fn write_no_wait(&self) -> u64 {
        self.write_no_wait
    }

    pub fn write_with_wait(&self) -> u64 {
        self.write_with_wait
    }

    pub fn average_read_duration(&self) -> f64 {
        let total = self.read_no_wait + self.read_with_wait;
        if total == 0 {
            return 0.0;
        }
        self.total_read_edges as f64 / total as f64
    }

    pub fn average_write_duration(&self) -> f64 {
        let total = self.write_no_wait + self.write_with_wait;
        if total == 0 {
            return 0.0;
        }
        self.total_write_edges as f64 / total as f64
    }

    /// Clock edges from the first post-reset edge through the end of the
    /// trace; 0 when the design never left reset.
    pub fn effective_window(&self) -> u64 {
        if self.first_valid_edge == 0 || self.first_valid_edge > self.total_sim_edges {
            return 0;
        }
        self.total_sim_edges - self.first_valid_edge + 1
    }

    pub fn bus_utilization_percent(&self) -> f64 {
        let window = self.effective_window();
        if window == 0 {
            return 0.0;
        }
        self.bus_active_edges as f64 / window as f64 * 100.0
    }

    pub fn idle_edges(&self) -> u64 {
        let window = self.effective_window();
        window.saturating_sub(self.bus_active_edges)
    }

    pub fn total_sim_edges(&self) -> u64 {
        self.total_sim_edges
    }

    pub fn bus_active_edges(&self) -> u64 {
        self.bus_active_edges
    }

    /// Accessed completers in first-access order, deduplicated, sentinels
    /// excluded.
    pub fn accessed_completers(&self) -> &[Completer] {
        &self.accessed
    }

    pub fn activity(&self, completer: Completer) -> Option<&CompleterActivity> {
        self.activity.get(&completer)
    }

    pub fn timeouts(&self) -> &[TimeoutDetail] {
        &self.timeouts
    }

    pub fn out_of_range(&self) -> &[OutOfRangeDetail] {
        &self.out_of_range
    }

    pub fn overlaps(&self) -> &[OverlapDetail] {
        &self.overlaps
    }

    pub fn mirrorings(&self) -> &[MirroringDetail] {
        &self.mirrorings
    }

    pub fn addr_corruptions(&self) -> &[CorruptionDetail] {
        &self.addr_corruptions
    }

    pub fn data_corruptions(&self) -> &[CorruptionDetail] {
        &self.data_corruptions
    }

    fn effective_widths(&self) -> (u32, u32) {
        (
            if self.addr_width > 0 { self.addr_width } else { DEFAULT_BUS_WIDTH },
            if self.wdata_width > 0 { self.wdata_width } else { DEFAULT_BUS_WIDTH },
        )
    }
}
