//! End-to-end scenarios driven through the full decoder → analyzer path
//!
//! Each test assembles a VCD trace as text, runs the whole pipeline on it
//! and checks the aggregated statistics or the rendered report.

use apbtrace::completers::{Completer, UART_BASE_ADDR};
use apbtrace::{AnalysisPipeline, Statistics, VcdParser, report};

const HEADER: &str = "\
$date today $end
$version test bench $end
$timescale 1ps $end
$scope module tb $end
$scope module dut $end
$var wire 1 c pclk $end
$var wire 1 r presetn $end
$var wire 1 s psel $end
$var wire 1 e penable $end
$var wire 1 w pwrite $end
$var wire 1 y pready $end
$var wire 32 a paddr [31:0] $end
$var wire 32 d pwdata [31:0] $end
$var wire 32 q prdata [31:0] $end
$upscope $end
$upscope $end
$enddefinitions $end
";

/// Builds a clocked trace, one `#ts` block per half period.
struct TraceBuilder {
    text: String,
    ts: u64,
}

impl TraceBuilder {
    fn new() -> Self {
        let mut text = String::from(HEADER);
        text.push_str("#0\n$dumpvars\n0c\n0r\n0s\n0e\n0w\n0y\nbx a\nbx d\nbx q\n$end\n");
        Self { text, ts: 0 }
    }

    /// Drive the given value lines, then raise and drop the clock.
    fn posedge(&mut self, drives: &[String]) -> &mut Self {
        self.ts += 100;
        self.text.push_str(&format!("#{}\n", self.ts));
        for drive in drives {
            self.text.push_str(drive);
            self.text.push('\n');
        }
        self.text.push_str("1c\n");
        self.text.push_str(&format!("#{}\n0c\n", self.ts + 50));
        self
    }

    fn posedge_ts(&self) -> u64 {
        self.ts
    }

    fn build(&self) -> &str {
        &self.text
    }
}

fn scalar(name: char, level: bool) -> String {
    format!("{}{}", u8::from(level), name)
}

fn vector(name: char, value: u32) -> String {
    format!("b{:b} {}", value, name)
}

fn run(trace: &str) -> Statistics {
    let mut pipeline = AnalysisPipeline::new().with_exempt_registers([]);
    VcdParser::new()
        .parse(trace.as_bytes(), &mut pipeline)
        .expect("trace parses");
    pipeline.finish()
}

fn release_reset(tb: &mut TraceBuilder) {
    tb.posedge(&[scalar('r', true)]);
}

fn write_setup(addr: u32, wdata: u32) -> Vec<String> {
    vec![
        scalar('s', true),
        scalar('e', false),
        scalar('w', true),
        scalar('y', false),
        vector('a', addr),
        vector('d', wdata),
    ]
}

fn read_setup(addr: u32) -> Vec<String> {
    vec![
        scalar('s', true),
        scalar('e', false),
        scalar('w', false),
        scalar('y', false),
        vector('a', addr),
    ]
}

fn access_ready() -> Vec<String> {
    vec![scalar('e', true), scalar('y', true)]
}

fn bus_idle() -> Vec<String> {
    vec![scalar('s', false), scalar('e', false), scalar('y', false)]
}

#[test]
fn no_wait_write_then_matching_read() {
    let mut tb = TraceBuilder::new();
    release_reset(&mut tb);
    tb.posedge(&write_setup(UART_BASE_ADDR, 0xAA));
    tb.posedge(&access_ready());
    tb.posedge(&bus_idle());
    tb.posedge(&read_setup(UART_BASE_ADDR));
    let mut access = access_ready();
    access.push(vector('q', 0xAA));
    tb.posedge(&access);

    let stats = run(tb.build());
    assert_eq!(stats.write_no_wait(), 1);
    assert_eq!(stats.read_no_wait(), 1);
    assert_eq!(stats.write_with_wait() + stats.read_with_wait(), 0);
    assert!((stats.average_write_duration() - 2.0).abs() < 1e-9);
    assert!((stats.average_read_duration() - 2.0).abs() < 1e-9);
    assert_eq!(stats.accessed_completers(), &[Completer::Uart]);
    assert!(stats.timeouts().is_empty());
    assert!(stats.out_of_range().is_empty());
    assert!(stats.overlaps().is_empty());
    assert!(stats.mirrorings().is_empty());
    assert!(stats.data_corruptions().is_empty());
}

#[test]
fn stalled_write_times_out_after_hundred_edges() {
    let mut tb = TraceBuilder::new();
    release_reset(&mut tb);
    tb.posedge(&write_setup(UART_BASE_ADDR, 0x1234_5678));
    let start_ts = tb.posedge_ts();
    // completer never answers
    let stall = vec![scalar('e', true), scalar('y', false)];
    for _ in 0..101 {
        tb.posedge(&stall);
    }

    let stats = run(tb.build());
    assert_eq!(stats.timeouts().len(), 1);
    assert_eq!(stats.timeouts()[0].start_ts, start_ts);
    assert_eq!(stats.timeouts()[0].addr, UART_BASE_ADDR);
    assert_eq!(stats.write_no_wait() + stats.write_with_wait(), 0);

    let text = report::render(&stats, 0.0);
    assert!(text.contains("Number of Transactions with Timeout: 1"));
    assert!(text.contains(&format!(
        "[#{}] Timeout Occurred -> Transaction Stalled at PADDR 0x1a100000",
        start_ts
    )));
}

#[test]
fn unmapped_address_reports_out_of_range_but_counts() {
    let mut tb = TraceBuilder::new();
    release_reset(&mut tb);
    tb.posedge(&write_setup(0x0000_0000, 0x55));
    tb.posedge(&access_ready());
    let completion_ts = tb.posedge_ts();

    let stats = run(tb.build());
    assert_eq!(stats.out_of_range().len(), 1);
    assert_eq!(stats.out_of_range()[0].ts, completion_ts);
    assert_eq!(stats.write_no_wait(), 1);
    assert!((stats.average_write_duration() - 2.0).abs() < 1e-9);
    assert!(stats.accessed_completers().is_empty());

    let text = report::render(&stats, 0.0);
    assert!(text.contains("Number of Out-of-Range Accesses: 1"));
    assert!(text.contains(&format!("[#{}] Out-of-Range Access -> PADDR 0x0", completion_ts)));
}

#[test]
fn read_interrupting_pending_write_overlaps() {
    let mut tb = TraceBuilder::new();
    release_reset(&mut tb);
    tb.posedge(&write_setup(UART_BASE_ADDR, 0x77));
    // write stalls in ACCESS
    tb.posedge(&[scalar('e', true), scalar('y', false)]);
    // requester abandons it and issues a read to the same address
    tb.posedge(&read_setup(UART_BASE_ADDR));
    let read_ts = tb.posedge_ts();
    let mut access = access_ready();
    access.push(vector('q', 0x77));
    tb.posedge(&access);

    let stats = run(tb.build());
    assert_eq!(stats.overlaps().len(), 1);
    assert_eq!(stats.overlaps()[0].ts, read_ts);
    assert_eq!(stats.overlaps()[0].addr, UART_BASE_ADDR);
    // the read completed; the interrupted write never did
    assert_eq!(stats.read_no_wait(), 1);
    assert_eq!(stats.write_no_wait() + stats.write_with_wait(), 0);

    let text = report::render(&stats, 0.0);
    assert!(text.contains("Number of Read-Write Overlap Errors: 1"));
    assert!(text.contains(&format!(
        "[#{}] Read-Write Overlap Error -> Read & Write at PADDR 0x1a100000 overlapped",
        read_ts
    )));
}

#[test]
fn read_of_never_written_address_mirrors() {
    let mut tb = TraceBuilder::new();
    release_reset(&mut tb);
    tb.posedge(&write_setup(UART_BASE_ADDR, 0xDEAD_BEEF));
    tb.posedge(&access_ready());
    let write_ts = tb.posedge_ts();
    tb.posedge(&bus_idle());
    tb.posedge(&read_setup(UART_BASE_ADDR + 0x10));
    let mut access = access_ready();
    access.push(vector('q', 0xDEAD_BEEF));
    tb.posedge(&access);
    let read_ts = tb.posedge_ts();

    let stats = run(tb.build());
    assert_eq!(stats.mirrorings().len(), 1);
    let m = stats.mirrorings()[0];
    assert_eq!(m.orig_addr, UART_BASE_ADDR);
    assert_eq!(m.mirror_addr, UART_BASE_ADDR + 0x10);
    assert_eq!(m.orig_write_ts, write_ts);
    assert_eq!(m.read_ts, read_ts);

    let text = report::render(&stats, 0.0);
    assert!(text.contains("Number of Mirrored Transactions: 1"));
    assert!(text.contains(&format!(
        "[#{}] Address Mirroring -> Write at PADDR 0x1a100000 also reflected at PADDR 0x1a100010",
        write_ts
    )));
    assert!(text.contains(&format!(
        "[#{}] Data Mirroring -> Value 0xdeadbeef written at PADDR 0x1a100000 also found at PADDR 0x1a100010",
        read_ts
    )));
}

#[test]
fn consistently_equal_address_bits_report_shorted() {
    // Eight writes whose address bits 3 and 4 always agree, with both
    // polarities present and everything else varying.
    let lows = [
        0b0001_1000u32,
        0b0000_0000,
        0b0001_1010,
        0b0000_0101,
        0b0101_1001,
        0b0010_0110,
        0b1001_1100,
        0b1110_0011,
    ];
    let mut tb = TraceBuilder::new();
    release_reset(&mut tb);
    for (n, low) in lows.iter().enumerate() {
        tb.posedge(&write_setup(UART_BASE_ADDR | low, n as u32));
        tb.posedge(&access_ready());
        tb.posedge(&bus_idle());
    }

    let stats = run(tb.build());
    assert_eq!(stats.write_no_wait(), lows.len() as u64);
    let text = report::render(&stats, 0.0);
    assert!(text.contains("UART Address Connections"));
    assert!(text.contains("a03: Connected with a4"));
    assert!(text.contains("a04: Connected with a3"));
    // every other address bit stays correct
    for bit in (0..32).filter(|b| *b != 3 && *b != 4) {
        assert!(text.contains(&format!("a{:02}: Correct", bit)));
    }
    // the walk over completed transactions tags each one
    assert_eq!(stats.addr_corruptions().len(), lows.len());
    assert!(text.contains("Address Corruption -> a3-a4 Floating"));
}

#[test]
fn corrupted_read_back_marks_data_bits() {
    let mut tb = TraceBuilder::new();
    release_reset(&mut tb);
    tb.posedge(&write_setup(UART_BASE_ADDR + 4, 0b0000_0100));
    let write_ts = tb.posedge_ts();
    tb.posedge(&access_ready());
    tb.posedge(&bus_idle());
    tb.posedge(&read_setup(UART_BASE_ADDR + 4));
    // the completer returns the value with bits 2 and 3 swapped
    let mut access = access_ready();
    access.push(vector('q', 0b0000_1000));
    tb.posedge(&access);
    let read_ts = tb.posedge_ts();

    let stats = run(tb.build());
    // one record from the read-back mismatch, one from the finalize walk
    // tagging the write that crossed the shorted data bus
    assert_eq!(stats.data_corruptions().len(), 2);
    assert!(stats.data_corruptions().iter().any(|d| d.ts == read_ts));
    assert!(stats.data_corruptions().iter().any(|d| d.ts == write_ts));
    let text = report::render(&stats, 0.0);
    assert!(text.contains("d02: Connected with d3"));
    assert!(text.contains("d03: Connected with d2"));
    assert!(text.contains(&format!("[#{}] Data Corruption -> d2-d3 Floating", read_ts)));
}

#[test]
fn accessed_completers_keep_first_access_order() {
    let mut tb = TraceBuilder::new();
    release_reset(&mut tb);
    for addr in [0x1A10_1000u32, 0x1A10_0000, 0x1A10_2000, 0x1A10_1004] {
        tb.posedge(&write_setup(addr, 1));
        tb.posedge(&access_ready());
        tb.posedge(&bus_idle());
    }

    let stats = run(tb.build());
    assert_eq!(
        stats.accessed_completers(),
        &[Completer::Gpio, Completer::Uart, Completer::SpiMaster]
    );
    let text = report::render(&stats, 0.0);
    let gpio = text.find("GPIO Address Connections").unwrap();
    let uart = text.find("UART Address Connections").unwrap();
    let spi = text.find("SPI_MASTER Address Connections").unwrap();
    assert!(gpio < uart && uart < spi);
    assert!(text.contains("Number of Completer: 3"));
}

#[test]
fn report_is_stable_across_runs() {
    let mut tb = TraceBuilder::new();
    release_reset(&mut tb);
    tb.posedge(&write_setup(UART_BASE_ADDR, 0xAA));
    tb.posedge(&access_ready());
    let first = report::render(&run(tb.build()), 0.0);
    let second = report::render(&run(tb.build()), 0.0);
    assert_eq!(first, second);
}

#[test]
fn trace_that_never_leaves_reset_reports_zeroes() {
    let mut tb = TraceBuilder::new();
    // clock runs, psel toggles, reset stays low
    tb.posedge(&[scalar('s', true)]);
    tb.posedge(&[scalar('s', false)]);
    tb.posedge(&[scalar('s', true)]);

    let stats = run(tb.build());
    let text = report::render(&stats, 0.0);
    assert!(text.contains("Number of Read Transactions with no wait states: 0"));
    assert!(text.contains("Number of Write Transactions with no wait states: 0"));
    assert!(text.contains("Bus Utilization: 0.00%"));
    assert!(text.contains("Number of Idle Cycles: 0"));
    assert!(text.contains("Number of Completer: 0"));
}
