//! APB protocol state machine
//!
//! Ticked exactly once per rising `pclk` edge with the current signal
//! snapshot. Recognizes transactions through the IDLE → SETUP → ACCESS
//! sequence, tracks the single in-flight transaction and the per-address
//! pending-write table, and feeds the statistics aggregator on every
//! completion, timeout, abort and protocol error.
//!
//! State handling mirrors the bus: the handler for the state at tick entry
//! runs first, and when it advances SETUP → ACCESS the ACCESS handler runs
//! on the same snapshot. A transfer whose completer is ready immediately
//! therefore completes with the minimum duration of two edges.

use crate::completers::Completer;
use crate::signals::SignalState;
use crate::stats::{
    BitStatus, CorruptionDetail, OutOfRangeDetail, OverlapDetail, Statistics, TimeoutDetail,
};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Edges an active transaction may spend before it is declared stalled.
pub const TIMEOUT_EDGES: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ApbFsmState {
    #[default]
    Idle,
    Setup,
    Access,
}

/// The in-flight (and, once completed, recorded) transaction
#[derive(Debug, Clone, Copy)]
pub struct Transaction {
    pub active: bool,
    pub start_edge: u64,
    pub start_ts: u64,
    pub is_write: bool,
    pub addr: u32,
    pub addr_has_x: bool,
    pub wdata: u32,
    pub wdata_has_x: bool,
    pub had_wait: bool,
    pub target: Completer,
    pub is_out_of_range: bool,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            active: false,
            start_edge: 0,
            start_ts: 0,
            is_write: false,
            addr: 0,
            addr_has_x: false,
            wdata: 0,
            wdata_has_x: false,
            had_wait: false,
            target: Completer::None,
            is_out_of_range: false,
        }
    }
}

impl Transaction {
    fn reset(&mut self) {
        *self = Transaction::default();
    }
}

/// A write that entered SETUP but has not yet completed
#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    start_ts: u64,
    start_edge: u64,
}

/// Clock-driven recognizer for APB transactions
#[derive(Debug, Default)]
pub struct ApbAnalyzer {
    state: ApbFsmState,
    transaction: Transaction,
    pending_writes: HashMap<u32, PendingWrite>,
    completed: Vec<Transaction>,
    current_edge: u64,
    cycle_counter: u64,
    out_of_reset: bool,
    first_valid_edge: u64,
}

impl ApbAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one rising clock edge. `edge` is the 1-based count of
    /// rising edges seen so far; `stats` receives every record produced.
    pub fn tick(&mut self, snapshot: &SignalState, edge: u64, stats: &mut Statistics) {
        self.current_edge = edge;

        // Nothing counts until reset has been seen deasserted once; the
        // releasing edge itself is the first statistics-eligible edge.
        if !self.out_of_reset {
            if snapshot.resetn {
                self.out_of_reset = true;
                self.first_valid_edge = edge;
                debug!("reset released at edge {}", edge);
            } else {
                return;
            }
        }

        if self.transaction.active {
            self.cycle_counter += 1;
        }
        if self.check_timeout(stats) {
            return;
        }

        if snapshot.select && !snapshot.select_has_x {
            stats.record_bus_active_edge();
        }

        match self.state {
            ApbFsmState::Idle => self.handle_idle(snapshot, stats),
            ApbFsmState::Setup => self.handle_setup(snapshot),
            ApbFsmState::Access => {}
        }
        if self.state == ApbFsmState::Access {
            self.handle_access(snapshot, stats);
        }
    }

    /// End-of-stream: drop any unfinished transaction, hand the analysis
    /// window start to the aggregator, run the bit-pair inference, and
    /// emit corruption records for transactions that crossed a shorted bus.
    pub fn finalize(&mut self, stats: &mut Statistics) {
        if self.transaction.active {
            trace!(
                "stream ended mid-transaction at {:#010x}, discarding",
                self.transaction.addr
            );
            if self.transaction.is_write {
                self.pending_writes.remove(&self.transaction.addr);
            }
            self.transaction.reset();
            self.state = ApbFsmState::Idle;
        }
        stats.set_first_valid_edge(self.first_valid_edge);
        stats.finalize_bit_activity();
        self.emit_corruption_records(stats);
    }

    fn handle_idle(&mut self, snapshot: &SignalState, stats: &mut Statistics) {
        if !snapshot.select || snapshot.select_has_x || snapshot.enable {
            return;
        }
        self.state = ApbFsmState::Setup;
        let t = &mut self.transaction;
        t.active = true;
        t.start_edge = self.current_edge;
        t.start_ts = snapshot.timestamp;
        t.is_write = snapshot.write && !snapshot.write_has_x;
        t.addr = snapshot.addr;
        t.addr_has_x = snapshot.addr_has_x;
        t.wdata = snapshot.wdata;
        t.wdata_has_x = snapshot.wdata_has_x;
        t.had_wait = false;
        t.target = if snapshot.addr_has_x {
            Completer::Unknown
        } else {
            Completer::from_addr(snapshot.addr)
        };
        self.cycle_counter = 1;
        trace!(
            "edge {}: {} setup at {:#010x} -> {}",
            self.current_edge,
            if t.is_write { "write" } else { "read" },
            t.addr,
            t.target
        );

        if t.is_write {
            // A newer write to the same address supersedes the old entry.
            self.pending_writes.insert(
                t.addr,
                PendingWrite {
                    start_ts: snapshot.timestamp,
                    start_edge: self.current_edge,
                },
            );
        } else if let Some(pending) = self.pending_writes.get(&t.addr) {
            debug!(
                "read at {:#010x} races the write issued at #{} (edge {})",
                t.addr, pending.start_ts, pending.start_edge
            );
            stats.record_overlap(OverlapDetail {
                ts: snapshot.timestamp,
                addr: t.addr,
            });
        }
    }

    fn handle_setup(&mut self, snapshot: &SignalState) {
        if !self.transaction.active {
            self.state = ApbFsmState::Idle;
            return;
        }
        if !snapshot.select || snapshot.select_has_x {
            self.abort();
            return;
        }
        if snapshot.enable && !snapshot.enable_has_x {
            self.state = ApbFsmState::Access;
            // PWDATA is only required valid from the ACCESS edge on.
            self.transaction.wdata = snapshot.wdata;
            self.transaction.wdata_has_x = snapshot.wdata_has_x;
        }
    }

    fn handle_access(&mut self, snapshot: &SignalState, stats: &mut Statistics) {
        if !self.transaction.active {
            self.state = ApbFsmState::Idle;
            return;
        }
        if snapshot.ready && !snapshot.ready_has_x {
            self.complete(snapshot, stats);
            return;
        }
        if !snapshot.select
            || snapshot.select_has_x
            || !snapshot.enable
            || snapshot.enable_has_x
        {
            self.abort_and_restart(snapshot, stats);
            return;
        }
        self.transaction.had_wait = true;
    }

    /// Abort the in-flight transaction; when the aborting snapshot itself
    /// carries a fresh setup pattern, the requester cut the transfer short
    /// to issue a new one — start it from the same edge. A read racing the
    /// aborted write this way is checked against the pending-write table
    /// before the write's claim on its address is released, which is what
    /// surfaces the read-write overlap.
    fn abort_and_restart(&mut self, snapshot: &SignalState, stats: &mut Statistics) {
        let old = self.transaction;
        trace!(
            "edge {}: transaction at {:#010x} aborted",
            self.current_edge, old.addr
        );
        self.transaction.reset();
        self.state = ApbFsmState::Idle;
        if snapshot.select && !snapshot.select_has_x && !snapshot.enable {
            self.handle_idle(snapshot, stats);
        }
        // Release the aborted write's address unless the restarted
        // transaction is a write that just re-claimed the same entry.
        if old.is_write
            && !(self.transaction.active
                && self.transaction.is_write
                && self.transaction.addr == old.addr)
        {
            self.pending_writes.remove(&old.addr);
        }
    }

    fn check_timeout(&mut self, stats: &mut Statistics) -> bool {
        if !self.transaction.active || self.cycle_counter <= TIMEOUT_EDGES {
            return false;
        }
        debug!(
            "transaction at {:#010x} stalled past {} edges",
            self.transaction.addr, TIMEOUT_EDGES
        );
        stats.record_timeout(TimeoutDetail {
            start_ts: self.transaction.start_ts,
            addr: self.transaction.addr,
        });
        if self.transaction.is_write {
            self.pending_writes.remove(&self.transaction.addr);
        }
        self.transaction.reset();
        self.state = ApbFsmState::Idle;
        true
    }

    fn abort(&mut self) {
        trace!(
            "edge {}: transaction at {:#010x} aborted",
            self.current_edge, self.transaction.addr
        );
        if self.transaction.is_write {
            self.pending_writes.remove(&self.transaction.addr);
        }
        self.transaction.reset();
        self.state = ApbFsmState::Idle;
    }

    fn complete(&mut self, snapshot: &SignalState, stats: &mut Statistics) {
        let t = &mut self.transaction;
        if !t.active {
            return;
        }
        if t.is_write {
            self.pending_writes.remove(&t.addr);
        }

        stats.record_accessed_completer(t.target);
        if !t.addr_has_x {
            stats.record_addr_sample(t.target, t.addr);
        }
        if t.is_write && !snapshot.wdata_has_x {
            stats.record_wdata_sample(t.target, snapshot.wdata);
        }

        if t.addr_has_x {
            t.is_out_of_range = true;
        } else if t.target == Completer::Unknown {
            t.is_out_of_range = true;
            stats.record_out_of_range(OutOfRangeDetail {
                ts: snapshot.timestamp,
                addr: t.addr,
            });
        } else {
            t.is_out_of_range = false;
        }

        let duration = self.current_edge - t.start_edge + 1;
        if t.is_write {
            stats.record_write_transaction(t.had_wait, duration);
        } else {
            stats.record_read_transaction(t.had_wait, duration);
        }

        if !t.is_out_of_range {
            if t.is_write && !t.addr_has_x && !snapshot.wdata_has_x {
                stats.update_shadow_memory(t.target, t.addr, snapshot.wdata, snapshot.timestamp);
            } else if !t.is_write && !t.addr_has_x && !snapshot.rdata_has_x {
                stats.check_read_against_shadow(
                    t.target,
                    t.addr,
                    snapshot.rdata,
                    snapshot.timestamp,
                );
            }
        }

        // Keep the data the completer actually sampled.
        t.wdata = snapshot.wdata;
        t.wdata_has_x = snapshot.wdata_has_x;
        trace!(
            "edge {}: completed {} at {:#010x}, {} edges",
            self.current_edge,
            if t.is_write { "write" } else { "read" },
            t.addr,
            duration
        );
        self.completed.push(*t);
        t.reset();
        self.state = ApbFsmState::Idle;
    }

    /// Walk the retained transactions against the final bit verdicts. The
    /// first shorted address pair taints the whole transaction; a write
    /// over an intact address bus can still report a shorted data pair.
    fn emit_corruption_records(&self, stats: &mut Statistics) {
        for t in &self.completed {
            if t.addr_has_x || !t.target.is_mapped() {
                continue;
            }
            let (addr_pair, wdata_pair) = match stats.activity(t.target) {
                Some(activity) => (
                    first_shorted_pair(&activity.addr_bits),
                    first_shorted_pair(&activity.wdata_bits),
                ),
                None => continue,
            };
            if let Some((bit_lo, bit_hi)) = addr_pair {
                stats.record_addr_corruption(CorruptionDetail {
                    ts: t.start_ts,
                    bit_lo,
                    bit_hi,
                });
            } else if t.is_write
                && !t.wdata_has_x
                && let Some((bit_lo, bit_hi)) = wdata_pair
            {
                stats.record_data_corruption(CorruptionDetail {
                    ts: t.start_ts,
                    bit_lo,
                    bit_hi,
                });
            }
        }
    }
}

/// First bit marked shorted with a higher-indexed partner.
fn first_shorted_pair(bits: &[BitStatus]) -> Option<(usize, usize)> {
    bits.iter().enumerate().find_map(|(i, status)| match status {
        BitStatus::Shorted(partner) if *partner > i => Some((i, *partner)),
        _ => None,
    })
}
