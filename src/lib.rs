//! APB bus-trace analyzer for VCD waveform dumps
//!
//! This library provides a streaming, single-pass analyzer for value-change
//! dumps of an APB peripheral subsystem. The VCD decoder pushes events into
//! a pipeline that rebuilds per-clock-edge signal snapshots, runs the APB
//! protocol state machine on every rising `pclk` edge, and aggregates
//! traffic statistics, a shadow-memory model of completer contents, and
//! bit-pair co-occurrence evidence for connection-integrity inference.
//!
//! # Architecture
//!
//! - **VcdParser**: streams the dump line by line and feeds a [`VcdSink`]
//! - **SignalTable / SignalState**: maps VCD id codes to bus roles and
//!   maintains the current snapshot, detecting rising clock edges
//! - **ApbAnalyzer**: IDLE/SETUP/ACCESS state machine recognizing
//!   transactions, timeouts, aborts and read-write overlaps
//! - **Statistics**: counters, shadow memory, mirroring detection and
//!   shorted-bit-pair inference
//! - **report**: renders the final plain-text report
//!
//! # Example
//!
//! ```no_run
//! use apbtrace::{AnalysisPipeline, VcdParser, report};
//! use std::io::BufReader;
//!
//! let file = std::fs::File::open("trace.vcd")?;
//! let mut pipeline = AnalysisPipeline::new();
//! VcdParser::new().parse(BufReader::new(file), &mut pipeline)?;
//! let stats = pipeline.finish();
//! print!("{}", report::render(&stats, 0.0));
//! # Ok::<(), apbtrace::TraceError>(())
//! ```

use thiserror::Error;

pub mod analyzer;
pub mod completers;
pub mod pipeline;
pub mod report;
pub mod signals;
pub mod stats;
pub mod vcd;

pub use analyzer::ApbAnalyzer;
pub use completers::Completer;
pub use pipeline::AnalysisPipeline;
pub use signals::{SignalRole, SignalState, SignalTable};
pub use stats::Statistics;
pub use vcd::{VcdParser, VcdSink};

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot open trace file '{path}': {source}")]
    OpenTrace {
        path: String,
        source: std::io::Error,
    },

    #[error("Cannot write report file '{path}': {source}")]
    WriteReport {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TraceError>;
