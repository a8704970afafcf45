//! Command-line entry point
//!
//! Usage:
//!   apbtrace trace.vcd
//!   apbtrace trace.vcd -o report.txt
//!   apbtrace trace.vcd --exempt 0x1A100020
//!
//! The report lands next to the input (extension replaced with `.txt`)
//! unless `-o` says otherwise. Log verbosity follows `RUST_LOG`.

use apbtrace::completers::EXTERNALLY_DRIVEN_REGS;
use apbtrace::{AnalysisPipeline, TraceError, VcdParser, report};
use clap::Parser;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the VCD trace
    input: PathBuf,

    /// Report output path (default: input with extension replaced by .txt)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Additional externally-driven register address to exempt from
    /// read-back verification (repeatable, hex with 0x prefix or decimal)
    #[arg(long, value_parser = parse_addr)]
    exempt: Vec<u32>,
}

fn parse_addr(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn run(args: &Args) -> Result<(), TraceError> {
    let started = Instant::now();

    let file = File::open(&args.input).map_err(|source| TraceError::OpenTrace {
        path: args.input.display().to_string(),
        source,
    })?;

    let exempt = EXTERNALLY_DRIVEN_REGS
        .into_iter()
        .chain(args.exempt.iter().copied());
    let mut pipeline = AnalysisPipeline::new().with_exempt_registers(exempt);
    VcdParser::new().parse(BufReader::new(file), &mut pipeline)?;
    let stats = pipeline.finish();

    let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;
    let text = report::render(&stats, elapsed_ms);

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension("txt"));
    let write = |path: &PathBuf| -> std::io::Result<()> {
        let mut out = File::create(path)?;
        out.write_all(text.as_bytes())
    };
    write(&output).map_err(|source| TraceError::WriteReport {
        path: output.display().to_string(),
        source,
    })?;

    info!("report written to {}", output.display());
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
