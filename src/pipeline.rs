//! Single-threaded analysis pipeline
//!
//! Wires the decoder events into the signal table, the snapshot state and
//! the protocol analyzer. Everything runs inline on the caller's thread:
//! each value change mutates the snapshot, and the change that raises the
//! clock ticks the analyzer atomically before the next event is decoded.

use crate::analyzer::ApbAnalyzer;
use crate::completers::EXTERNALLY_DRIVEN_REGS;
use crate::signals::{SignalState, SignalTable};
use crate::stats::Statistics;
use crate::vcd::VcdSink;
use tracing::{debug, info};

/// Streaming sink that performs the whole analysis
///
/// Feed it to [`crate::VcdParser::parse`], then call [`finish`](Self::finish)
/// to run the finalize phase and take the aggregated statistics.
#[derive(Debug)]
pub struct AnalysisPipeline {
    table: SignalTable,
    state: SignalState,
    prev_clk: bool,
    edge_count: u64,
    analyzer: ApbAnalyzer,
    stats: Statistics,
}

impl AnalysisPipeline {
    pub fn new() -> Self {
        let mut pipeline = Self {
            table: SignalTable::new(),
            state: SignalState::new(),
            prev_clk: false,
            edge_count: 0,
            analyzer: ApbAnalyzer::new(),
            stats: Statistics::new(),
        };
        pipeline.stats.set_exempt_registers(EXTERNALLY_DRIVEN_REGS);
        pipeline
    }

    /// Replace the set of read-side addresses exempt from shadow-memory
    /// verification (input-mapped registers).
    pub fn with_exempt_registers<I: IntoIterator<Item = u32>>(mut self, addrs: I) -> Self {
        self.stats.set_exempt_registers(addrs);
        self
    }

    /// Rising clock edges seen so far.
    pub fn edge_count(&self) -> u64 {
        self.edge_count
    }

    /// Run the finalize phase and hand out the aggregated statistics.
    pub fn finish(mut self) -> Statistics {
        self.stats.set_total_sim_edges(self.edge_count);
        self.analyzer.finalize(&mut self.stats);
        info!(
            "analysis complete: {} rising edges, {} completers accessed",
            self.edge_count,
            self.stats.accessed_completers().len()
        );
        self.stats
    }
}

impl Default for AnalysisPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl VcdSink for AnalysisPipeline {
    fn define_signal(&mut self, id_code: &str, type_str: &str, width: u32, qualified_name: &str) {
        self.table.register(id_code, type_str, width, qualified_name);
    }

    fn set_time(&mut self, timestamp: u64) {
        self.state.timestamp = timestamp;
    }

    fn change_value(&mut self, id_code: &str, value_token: &str) {
        let rose = self
            .table
            .apply(id_code, value_token, &mut self.state, &mut self.prev_clk);
        if rose {
            self.edge_count += 1;
            self.analyzer
                .tick(&self.state, self.edge_count, &mut self.stats);
        }
    }

    fn end_definitions(&mut self) {
        debug!(
            "definitions complete: paddr {} bits, pwdata {} bits",
            self.table.addr_width(),
            self.table.wdata_width()
        );
        self.stats
            .set_bus_widths(self.table.addr_width(), self.table.wdata_width());
    }
}
