//! Plain-text report rendering
//!
//! Pure function of the final aggregator state. Layout: eleven metric
//! lines, four error-summary lines, per-completer connection blocks in
//! first-access order, then a chronological error log.

use crate::stats::{BitStatus, Statistics};
use std::fmt::Write;

/// Render the full report. `elapsed_ms` is measured by the caller; the
/// analysis itself never consults a clock.
pub fn render(stats: &Statistics, elapsed_ms: f64) -> String {
    let mut out = String::new();

    // Transaction statistics
    let _ = writeln!(
        out,
        "Number of Read Transactions with no wait states: {}",
        stats.read_no_wait()
    );
    let _ = writeln!(
        out,
        "Number of Read Transactions with wait states: {}",
        stats.read_with_wait()
    );
    let _ = writeln!(
        out,
        "Number of Write Transactions with no wait states: {}",
        stats.write_no_wait()
    );
    let _ = writeln!(
        out,
        "Number of Write Transactions with wait states: {}",
        stats.write_with_wait()
    );
    let _ = writeln!(
        out,
        "Average Read Cycle: {:.2} cycles",
        stats.average_read_duration()
    );
    let _ = writeln!(
        out,
        "Average Write Cycle: {:.2} cycles",
        stats.average_write_duration()
    );
    let _ = writeln!(
        out,
        "Bus Utilization: {:.2}%",
        stats.bus_utilization_percent()
    );
    let _ = writeln!(out, "Number of Idle Cycles: {}", stats.idle_edges());
    let _ = writeln!(
        out,
        "Number of Total PCLK Rising Edges: {}",
        stats.total_sim_edges()
    );
    let _ = writeln!(
        out,
        "Number of Completer: {}",
        stats.accessed_completers().len()
    );
    let _ = writeln!(out, "CPU Elapsed Time: {:.2} ms", elapsed_ms);

    // Error summary
    let _ = writeln!(
        out,
        "\nNumber of Transactions with Timeout: {}",
        stats.timeouts().len()
    );
    let _ = writeln!(
        out,
        "Number of Out-of-Range Accesses: {}",
        stats.out_of_range().len()
    );
    let _ = writeln!(
        out,
        "Number of Mirrored Transactions: {}",
        stats.mirrorings().len()
    );
    let _ = writeln!(
        out,
        "Number of Read-Write Overlap Errors: {}",
        stats.overlaps().len()
    );

    // Connection verdicts, first-access order, MSB down to bit 0
    for completer in stats.accessed_completers() {
        let Some(activity) = stats.activity(*completer) else {
            continue;
        };
        let _ = writeln!(out, "\n{} Address Connections", completer);
        write_bit_block(&mut out, &activity.addr_bits, 'a');
        let _ = writeln!(out, "\n{} Data Connections", completer);
        write_bit_block(&mut out, &activity.wdata_bits, 'd');
    }

    // Chronological error log; stable sort keeps recording order on ties
    let mut errors = collect_errors(stats);
    errors.sort_by_key(|(ts, _)| *ts);
    let _ = writeln!(out);
    for (ts, message) in errors {
        let _ = writeln!(out, "[#{}] {}", ts, message);
    }

    out
}

fn write_bit_block(out: &mut String, bits: &[BitStatus], prefix: char) {
    for (index, status) in bits.iter().enumerate().rev() {
        let _ = match status {
            BitStatus::Correct => writeln!(out, "{}{:02}: Correct", prefix, index),
            BitStatus::Shorted(partner) => writeln!(
                out,
                "{}{:02}: Connected with {}{}",
                prefix, index, prefix, partner
            ),
        };
    }
}

fn collect_errors(stats: &Statistics) -> Vec<(u64, String)> {
    let mut errors = Vec::new();
    for d in stats.timeouts() {
        errors.push((
            d.start_ts,
            format!("Timeout Occurred -> Transaction Stalled at PADDR 0x{:x}", d.addr),
        ));
    }
    for d in stats.out_of_range() {
        errors.push((d.ts, format!("Out-of-Range Access -> PADDR 0x{:x}", d.addr)));
    }
    for d in stats.overlaps() {
        errors.push((
            d.ts,
            format!(
                "Read-Write Overlap Error -> Read & Write at PADDR 0x{:x} overlapped",
                d.addr
            ),
        ));
    }
    for d in stats.mirrorings() {
        errors.push((
            d.orig_write_ts,
            format!(
                "Address Mirroring -> Write at PADDR 0x{:x} also reflected at PADDR 0x{:x}",
                d.orig_addr, d.mirror_addr
            ),
        ));
        errors.push((
            d.read_ts,
            format!(
                "Data Mirroring -> Value 0x{:x} written at PADDR 0x{:x} also found at PADDR 0x{:x}",
                d.value, d.orig_addr, d.mirror_addr
            ),
        ));
    }
    for d in stats.addr_corruptions() {
        errors.push((
            d.ts,
            format!("Address Corruption -> a{}-a{} Floating", d.bit_lo, d.bit_hi),
        ));
    }
    for d in stats.data_corruptions() {
        errors.push((
            d.ts,
            format!("Data Corruption -> d{}-d{} Floating", d.bit_lo, d.bit_hi),
        ));
    }
    errors
}
