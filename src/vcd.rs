//! Streaming VCD decoder
//!
//! Walks the dump once, line by line over any [`BufRead`], and pushes
//! events into a [`VcdSink`]. Header directives resolve hierarchical scope
//! names for `$var` declarations; the body yields timestamps and value
//! changes in file order. The decoder never reorders events and holds no
//! more than one line in memory.
//!
//! Malformed lines are skipped with a `debug!` note rather than aborting;
//! only I/O failures are fatal.

use crate::Result;
use std::io::BufRead;
use tracing::{debug, info};

/// Consumer of decoded VCD events
///
/// `define_signal` fires during the header, `set_time`/`change_value`
/// during the body. `end_definitions` marks `$enddefinitions`;
/// `end_dumpvars` marks the `$end` closing the initial-value block.
pub trait VcdSink {
    fn define_signal(&mut self, id_code: &str, type_str: &str, width: u32, qualified_name: &str);
    fn set_time(&mut self, timestamp: u64);
    fn change_value(&mut self, id_code: &str, value_token: &str);
    fn end_definitions(&mut self) {}
    fn end_dumpvars(&mut self) {}
}

/// Streaming parser for the value-change-dump format
#[derive(Debug, Default)]
pub struct VcdParser {
    scope: Vec<String>,
    in_dumpvars: bool,
    skipped_lines: u64,
}

impl VcdParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the whole stream, pushing events into `sink`.
    pub fn parse<R: BufRead, S: VcdSink>(&mut self, mut reader: R, sink: &mut S) -> Result<()> {
        let mut line = String::new();
        let mut lines: u64 = 0;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            lines += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match trimmed.as_bytes()[0] {
                b'$' => self.handle_directive(trimmed, &mut reader, sink)?,
                b'#' => self.handle_timestamp(trimmed, sink),
                _ => self.handle_value_change(trimmed, sink),
            }
        }
        info!(
            "trace decoded: {} lines, {} skipped as malformed",
            lines, self.skipped_lines
        );
        Ok(())
    }

    fn handle_directive<R: BufRead, S: VcdSink>(
        &mut self,
        line: &str,
        reader: &mut R,
        sink: &mut S,
    ) -> Result<()> {
        let mut tokens = line.split_whitespace();
        let keyword = tokens.next().unwrap_or("");
        match keyword {
            "$var" => {
                // $var <type> <width> <id> <name> [range] $end
                let type_str = tokens.next();
                let width = tokens.next().and_then(|w| w.parse::<u32>().ok());
                let id = tokens.next();
                let name = tokens.next();
                match (type_str, width, id, name) {
                    (Some(type_str), Some(width), Some(id), Some(name)) => {
                        let qualified = if self.scope.is_empty() {
                            name.to_string()
                        } else {
                            format!("{}.{}", self.scope.join("."), name)
                        };
                        sink.define_signal(id, type_str, width, &qualified);
                    }
                    _ => self.skip_line(line),
                }
            }
            "$scope" => {
                // $scope <kind> <name> $end
                let _kind = tokens.next();
                if let Some(name) = tokens.next().filter(|n| *n != "$end") {
                    self.scope.push(name.to_string());
                } else {
                    self.skip_line(line);
                }
            }
            "$upscope" => {
                self.scope.pop();
            }
            "$enddefinitions" => sink.end_definitions(),
            "$dumpvars" => {
                if line.contains("$end") {
                    sink.end_dumpvars();
                } else {
                    self.in_dumpvars = true;
                }
            }
            "$end" => {
                if self.in_dumpvars {
                    self.in_dumpvars = false;
                    sink.end_dumpvars();
                }
            }
            // Checkpoint markers; the value lines they bracket are applied
            // like any other change.
            "$dumpall" | "$dumpon" | "$dumpoff" => {}
            "$timescale" | "$date" | "$version" | "$comment" => {
                // Payload may continue on following lines; consume through
                // the matching $end.
                if !line.contains("$end") {
                    self.consume_until_end(reader)?;
                }
            }
            _ => self.skip_line(line),
        }
        Ok(())
    }

    fn consume_until_end<R: BufRead>(&mut self, reader: &mut R) -> Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            if line.contains("$end") {
                return Ok(());
            }
        }
    }

    fn handle_timestamp<S: VcdSink>(&mut self, line: &str, sink: &mut S) {
        match line[1..].trim().parse::<u64>() {
            Ok(t) => sink.set_time(t),
            Err(_) => self.skip_line(line),
        }
    }

    fn handle_value_change<S: VcdSink>(&mut self, line: &str, sink: &mut S) {
        let first = line.as_bytes()[0];
        match first {
            b'b' | b'B' => {
                // Vector: b<bits> <id>
                match line.split_once(char::is_whitespace) {
                    Some((value, id)) if !id.trim().is_empty() => {
                        sink.change_value(id.trim(), value);
                    }
                    _ => self.skip_line(line),
                }
            }
            b'0' | b'1' | b'x' | b'X' | b'z' | b'Z' => {
                // Scalar: value character immediately followed by the id.
                let id = line[1..].trim();
                if id.is_empty() {
                    self.skip_line(line);
                } else {
                    sink.change_value(id, &line[..1]);
                }
            }
            _ => self.skip_line(line),
        }
    }

    fn skip_line(&mut self, line: &str) {
        self.skipped_lines += 1;
        debug!("skipping malformed trace line: {:?}", line);
    }
}
