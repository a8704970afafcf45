//! Signal table and per-edge snapshot state
//!
//! The VCD header maps short id codes to hierarchical names; the table
//! deduces each wire's bus role from the leaf of that name and remembers
//! the observed address/write-data bus widths. During the dump body,
//! [`SignalTable::apply`] folds one value change into the mutable
//! [`SignalState`] snapshot and reports whether the clock just rose.
//!
//! Clock-edge detection lives here, separate from protocol analysis, so
//! the analyzer tick runs exactly once per rising edge and observes a
//! snapshot reflecting every change applied up to and including the edge.

use std::collections::HashMap;
use tracing::trace;

/// Bus role of a dumped wire, deduced from its declared name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRole {
    Clk,
    ResetN,
    Addr,
    Write,
    Select,
    Enable,
    WData,
    RData,
    Ready,
    Parameter,
    Other,
}

/// Definition of one dumped wire
#[derive(Debug, Clone)]
pub struct SignalDef {
    pub role: SignalRole,
    pub bit_width: u32,
}

/// Mapping from VCD id code to signal definition
#[derive(Debug, Default)]
pub struct SignalTable {
    defs: HashMap<String, SignalDef>,
    addr_width: u32,
    wdata_width: u32,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one `$var` declaration. A repeated id code replaces the
    /// earlier definition.
    pub fn register(&mut self, id_code: &str, type_str: &str, width: u32, qualified_name: &str) {
        if id_code.is_empty() {
            return;
        }
        let role = deduce_role(qualified_name, type_str);
        match role {
            SignalRole::Addr => self.addr_width = width,
            SignalRole::WData => self.wdata_width = width,
            _ => {}
        }
        trace!("registered {} as {:?} ({} bits)", qualified_name, role, width);
        self.defs.insert(
            id_code.to_string(),
            SignalDef {
                role,
                bit_width: width,
            },
        );
    }

    pub fn lookup(&self, id_code: &str) -> Option<&SignalDef> {
        self.defs.get(id_code)
    }

    /// Declared PADDR width, 0 if no address bus was declared.
    pub fn addr_width(&self) -> u32 {
        self.addr_width
    }

    /// Declared PWDATA width, 0 if no write-data bus was declared.
    pub fn wdata_width(&self) -> u32 {
        self.wdata_width
    }

    /// Fold one value change into `state`. Returns true when the change
    /// was a 0→1 transition of the clock wire; `prev_clk` carries the
    /// clock level across calls.
    pub fn apply(
        &self,
        id_code: &str,
        value_token: &str,
        state: &mut SignalState,
        prev_clk: &mut bool,
    ) -> bool {
        let Some(def) = self.defs.get(id_code) else {
            // Wires we never registered (internal nets, memories) are
            // legal in the dump and irrelevant to the bus.
            return false;
        };

        let (value, has_x) = parse_value(value_token);
        match def.role {
            SignalRole::Clk => {
                let level = value != 0;
                let rose = level && !*prev_clk;
                state.clk = level;
                *prev_clk = level;
                return rose;
            }
            SignalRole::ResetN => state.resetn = value != 0,
            SignalRole::Addr => {
                state.addr = value;
                state.addr_has_x = has_x;
            }
            SignalRole::Write => {
                state.write = value != 0;
                state.write_has_x = has_x;
            }
            SignalRole::Select => {
                state.select = value != 0;
                state.select_has_x = has_x;
            }
            SignalRole::Enable => {
                state.enable = value != 0;
                state.enable_has_x = has_x;
            }
            SignalRole::WData => {
                state.wdata = value;
                state.wdata_has_x = has_x;
            }
            SignalRole::RData => {
                state.rdata = value;
                state.rdata_has_x = has_x;
            }
            SignalRole::Ready => {
                state.ready = value != 0;
                state.ready_has_x = has_x;
            }
            SignalRole::Parameter | SignalRole::Other => {}
        }
        false
    }
}

/// Current levels of every bus wire plus the simulation timestamp
///
/// Each multi-bit role (and each scalar whose level is indeterminate)
/// carries a `has_x` flag: true iff any bit of the last decoded value was
/// neither 0 nor 1. Indeterminate bits contribute 0 to the integer value,
/// so 0 stays a legitimate bus value and X-ness travels out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalState {
    pub timestamp: u64,
    pub clk: bool,
    pub resetn: bool,
    pub addr: u32,
    pub addr_has_x: bool,
    pub write: bool,
    pub write_has_x: bool,
    pub select: bool,
    pub select_has_x: bool,
    pub enable: bool,
    pub enable_has_x: bool,
    pub wdata: u32,
    pub wdata_has_x: bool,
    pub rdata: u32,
    pub rdata_has_x: bool,
    pub ready: bool,
    pub ready_has_x: bool,
}

impl Default for SignalState {
    fn default() -> Self {
        Self {
            timestamp: 0,
            clk: false,
            // Reset is active-low; a dump that never drives it is treated
            // as never having been in reset.
            resetn: true,
            addr: 0,
            addr_has_x: false,
            write: false,
            write_has_x: false,
            select: false,
            select_has_x: false,
            enable: false,
            enable_has_x: false,
            wdata: 0,
            wdata_has_x: false,
            rdata: 0,
            rdata_has_x: false,
            ready: false,
            ready_has_x: false,
        }
    }
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Deduce a wire's bus role from the leaf of its hierarchical name.
///
/// The match is case-insensitive and ignores a trailing `[msb:lsb]` range.
/// Wires declared as `parameter` are never bus signals.
fn deduce_role(qualified_name: &str, type_str: &str) -> SignalRole {
    if type_str == "parameter" {
        return SignalRole::Parameter;
    }

    let leaf = qualified_name
        .rsplit('.')
        .next()
        .unwrap_or(qualified_name);
    let leaf = leaf.split('[').next().unwrap_or(leaf).trim();

    let lower = leaf.to_ascii_lowercase();
    match lower.as_str() {
        "clk" | "pclk" => SignalRole::Clk,
        "rst_n" | "presetn" => SignalRole::ResetN,
        "paddr" => SignalRole::Addr,
        "pwrite" => SignalRole::Write,
        "psel" => SignalRole::Select,
        "penable" => SignalRole::Enable,
        "pwdata" => SignalRole::WData,
        "prdata" => SignalRole::RData,
        "pready" => SignalRole::Ready,
        _ => SignalRole::Other,
    }
}

/// Parse a VCD value token into `(value, has_x)`.
///
/// Accepts scalar tokens (`0`, `1`, `x`, `z`, either case) and binary
/// vectors with an optional `b`/`B` prefix. Any `x`/`z` bit sets `has_x`
/// and contributes 0; bits beyond 32 fall off the top, matching the bus
/// widths this analyzer supports.
pub fn parse_value(token: &str) -> (u32, bool) {
    let bits = match token.as_bytes().first() {
        None => return (0, true),
        Some(b'b' | b'B') => &token[1..],
        _ => token,
    };
    if bits.is_empty() {
        return (0, true);
    }

    let mut value: u32 = 0;
    let mut has_x = false;
    for ch in bits.chars() {
        value <<= 1;
        match ch {
            '1' => value |= 1,
            '0' => {}
            'x' | 'X' | 'z' | 'Z' => has_x = true,
            _ => return (0, true),
        }
    }
    (value, has_x)
}
