//! Live VCD trace recorder.
//!
//! The byte buffer *is* the event log: the header is appended once, then a
//! `#<time>` delta block after every capture that observed changes. There is
//! no intermediate event queue. `take_live_vcd` hands out the bytes appended
//! since the previous take, so a caller can stream a growing waveform
//! without ever seeing the same byte twice, while `to_vcd` still returns the
//! whole accumulated dump.

use std::collections::HashSet;

/// Incremental VCD recorder over a dense signal vector.
pub struct TraceRecorder {
    enabled: bool,
    timescale: String,
    module_name: String,
    /// All signal names/widths, indexed by signal index.
    signal_names: Vec<String>,
    signal_widths: Vec<u32>,
    /// Tracked signal indices in subscription order.
    tracked: Vec<usize>,
    tracked_set: HashSet<usize>,
    /// Short identifiers and last-sampled values, parallel to `tracked`.
    /// Frozen when the header is emitted.
    ids: Vec<String>,
    prev: Vec<u64>,
    buf: String,
    live_pos: usize,
    header_done: bool,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self {
            enabled: false,
            timescale: "1ns".to_string(),
            module_name: "top".to_string(),
            signal_names: Vec::new(),
            signal_widths: Vec::new(),
            tracked: Vec::new(),
            tracked_set: HashSet::new(),
            ids: Vec::new(),
            prev: Vec::new(),
            buf: String::new(),
            live_pos: 0,
            header_done: false,
        }
    }

    /// Install the signal metadata. Called once when the owning kernel is
    /// created.
    pub fn init(&mut self, names: Vec<String>, widths: Vec<u32>) {
        self.signal_names = names;
        self.signal_widths = widths;
    }

    pub fn set_timescale(&mut self, timescale: &str) {
        self.timescale = timescale.to_string();
    }

    pub fn set_module_name(&mut self, name: &str) {
        self.module_name = name.to_string();
    }

    /// Track one signal by index. Returns false for an out-of-range index.
    pub fn add_signal(&mut self, idx: usize) -> bool {
        if idx >= self.signal_names.len() {
            return false;
        }
        if self.tracked_set.insert(idx) {
            self.tracked.push(idx);
        }
        true
    }

    pub fn add_signal_by_name(&mut self, name: &str) -> bool {
        match self.signal_names.iter().position(|n| n == name) {
            Some(idx) => self.add_signal(idx),
            None => false,
        }
    }

    /// Track every signal whose name contains `pattern`. Returns the number
    /// of signals matched.
    pub fn add_signals_matching(&mut self, pattern: &str) -> usize {
        let matches: Vec<usize> = self
            .signal_names
            .iter()
            .enumerate()
            .filter(|(_, name)| name.contains(pattern))
            .map(|(idx, _)| idx)
            .collect();
        for idx in &matches {
            self.add_signal(*idx);
        }
        matches.len()
    }

    pub fn trace_all_signals(&mut self) {
        for idx in 0..self.signal_names.len() {
            self.add_signal(idx);
        }
    }

    pub fn clear_signals(&mut self) {
        self.tracked.clear();
        self.tracked_set.clear();
    }

    /// Enable tracing. An empty subscription defaults to all signals.
    pub fn start(&mut self) {
        if self.tracked.is_empty() {
            self.trace_all_signals();
        }
        self.enabled = true;
    }

    pub fn stop(&mut self) {
        self.enabled = false;
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sample the signal vector at `time`. Emits the header on the first
    /// capture after `start`/`clear`, then one delta block per capture that
    /// observed changes.
    pub fn capture(&mut self, time: u64, values: &[u64]) {
        if !self.enabled {
            return;
        }
        if !self.header_done {
            self.write_header(values);
            self.header_done = true;
            return;
        }
        let mut wrote_time = false;
        for pos in 0..self.tracked.len() {
            let value = values[self.tracked[pos]];
            if value == self.prev[pos] {
                continue;
            }
            self.prev[pos] = value;
            if !wrote_time {
                self.buf.push('#');
                self.buf.push_str(&time.to_string());
                self.buf.push('\n');
                wrote_time = true;
            }
            let width = self.signal_widths[self.tracked[pos]];
            let line = format_value(value, width, &self.ids[pos]);
            self.buf.push_str(&line);
            self.buf.push('\n');
        }
    }

    /// Bytes appended since the previous take. Never re-delivers.
    pub fn take_live_vcd(&mut self) -> String {
        let chunk = self.buf[self.live_pos..].to_string();
        self.live_pos = self.buf.len();
        chunk
    }

    /// The whole accumulated dump, header included.
    pub fn to_vcd(&self) -> String {
        self.buf.clone()
    }

    /// Drop the accumulated dump. The subscription survives; the header is
    /// re-emitted on the next capture.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.live_pos = 0;
        self.header_done = false;
    }

    pub fn save_vcd(&self, path: &str) -> Result<(), String> {
        std::fs::write(path, &self.buf).map_err(|e| format!("failed to write VCD file: {e}"))
    }

    fn write_header(&mut self, values: &[u64]) {
        // Identifier table and baseline values freeze with the header.
        self.ids = (0..self.tracked.len()).map(idx_to_vcd_id).collect();
        self.prev = self.tracked.iter().map(|&idx| values[idx]).collect();

        self.buf
            .push_str(&format!("$timescale {} $end\n", self.timescale));
        self.buf
            .push_str(&format!("$scope module {} $end\n", self.module_name));
        for (pos, &idx) in self.tracked.iter().enumerate() {
            let width = self.signal_widths[idx];
            let name = sanitize_name(&self.signal_names[idx]);
            self.buf.push_str(&format!(
                "$var wire {} {} {} $end\n",
                width, self.ids[pos], name
            ));
        }
        self.buf.push_str("$upscope $end\n");
        self.buf.push_str("$enddefinitions $end\n");
        self.buf.push_str("$dumpvars\n");
        for pos in 0..self.tracked.len() {
            let width = self.signal_widths[self.tracked[pos]];
            let line = format_value(self.prev[pos], width, &self.ids[pos]);
            self.buf.push_str(&line);
            self.buf.push('\n');
        }
        self.buf.push_str("$end\n");
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Dense position -> printable-ASCII identifier (base-94, starting at `!`).
fn idx_to_vcd_id(idx: usize) -> String {
    const BASE: usize = 94;
    const OFFSET: u8 = b'!';
    if idx < BASE {
        return ((OFFSET + idx as u8) as char).to_string();
    }
    let mut result = String::new();
    let mut n = idx;
    loop {
        result.insert(0, (OFFSET + (n % BASE) as u8) as char);
        n /= BASE;
        if n == 0 {
            break;
        }
        n -= 1; // first digit is 0-based
    }
    result
}

/// Single-bit values as `0!`/`1!`; wider values as `b1010 !` with the
/// lowest bit rightmost.
fn format_value(value: u64, width: u32, id: &str) -> String {
    if width == 1 {
        format!("{}{}", value & 1, id)
    } else {
        format!("b{value:0>width$b} {id}", width = width as usize)
    }
}

fn sanitize_name(name: &str) -> String {
    name.replace('.', "_").replace('[', "_").replace(']', "")
}
