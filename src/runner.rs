//! High-level Apple II runner API.
//!
//! Convenience layer over [`Simulator`] + [`Apple2System`] for hosts that
//! want a single object: key queueing, cumulative cycle accounting, screen
//! readback and trace control in one place.

use crate::apple2::{text_row_address, Apple2System, BatchResult};
use crate::error::{LoadError, SimError};
use crate::sim::Simulator;

pub struct Apple2Runner {
    sim: Simulator,
    system: Apple2System,
    queued_key: Option<u8>,
    cycles: u64,
}

impl Apple2Runner {
    /// Create a runner from flattened IR JSON.
    pub fn new(ir_json: &str, sub_cycles: u32) -> Result<Self, LoadError> {
        let sim = Simulator::new(ir_json)?;
        let system = Apple2System::new(&sim, sub_cycles)?;
        Ok(Self {
            sim,
            system,
            queued_key: None,
            cycles: 0,
        })
    }

    /// Reset simulation state, pending input and the cycle counter.
    pub fn reset(&mut self) {
        self.sim.reset();
        self.queued_key = None;
        self.cycles = 0;
    }

    /// Queue a single ASCII key to present on the keyboard input.
    pub fn queue_key(&mut self, ascii: u8) {
        self.queued_key = Some(ascii);
    }

    pub fn clear_key(&mut self) {
        self.queued_key = None;
    }

    pub fn key_pending(&self) -> bool {
        self.queued_key.is_some()
    }

    /// Total CPU cycles run through this runner.
    pub fn cycle_count(&self) -> u64 {
        self.cycles
    }

    pub fn load_rom(&mut self, data: &[u8]) {
        self.system.load_rom(data);
    }

    pub fn load_ram(&mut self, data: &[u8], offset: usize) {
        self.system.load_ram(data, offset);
    }

    pub fn read_ram(&self, offset: usize, len: usize) -> Vec<u8> {
        self.system.read_ram(offset, len).to_vec()
    }

    pub fn write_ram(&mut self, offset: usize, data: &[u8]) {
        self.system.write_ram(offset, data);
    }

    /// Read through the full address decode (RAM and ROM windows).
    pub fn read_memory(&self, offset: usize, len: usize) -> Vec<u8> {
        self.system.read_memory(offset, len)
    }

    /// Run batched CPU cycles, driving the queued key until the design
    /// consumes it.
    pub fn run_cpu_cycles(&mut self, n: u32) -> BatchResult {
        let key_data = self.queued_key.unwrap_or(0);
        let key_ready = self.queued_key.is_some();

        let result = self
            .system
            .run_cpu_cycles(&mut self.sim, n, key_data, key_ready);
        if result.key_cleared {
            self.queued_key = None;
        }
        self.cycles = self.cycles.saturating_add(u64::from(result.cycles_run));
        result
    }

    /// Read the text screen as 24 lines of 40 printable characters.
    pub fn read_screen_lines(&self) -> Vec<String> {
        let text_page = self.system.read_ram(0x0400, 0x0400);
        let mut lines = Vec::with_capacity(24);
        for row in 0..24usize {
            let base = text_row_address(row) - 0x0400;
            let mut line = String::with_capacity(40);
            for col in 0..40usize {
                let ch = text_page.get(base + col).copied().unwrap_or(0) & 0x7F;
                if (0x20..=0x7E).contains(&ch) {
                    line.push(ch as char);
                } else {
                    line.push(' ');
                }
            }
            lines.push(line);
        }
        lines
    }

    pub fn poke(&mut self, name: &str, value: u64) -> Result<(), SimError> {
        self.sim.poke(name, value)
    }

    pub fn peek(&self, name: &str) -> Result<u64, SimError> {
        self.sim.peek(name)
    }

    pub fn evaluate(&mut self) {
        self.sim.evaluate();
    }

    pub fn tick(&mut self) {
        self.sim.tick();
    }

    pub fn sim(&self) -> &Simulator {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut Simulator {
        &mut self.sim
    }

    // Trace passthroughs.

    pub fn trace_start(&mut self) {
        self.sim.trace_start();
    }

    pub fn trace_stop(&mut self) {
        self.sim.trace_stop();
    }

    pub fn trace_add_signal(&mut self, name: &str) -> bool {
        self.sim.trace_mut().add_signal_by_name(name)
    }

    pub fn trace_all_signals(&mut self) {
        self.sim.trace_mut().trace_all_signals();
    }

    pub fn trace_to_vcd(&self) -> String {
        self.sim.trace().to_vcd()
    }

    pub fn trace_take_live_vcd(&mut self) -> String {
        self.sim.trace_mut().take_live_vcd()
    }

    pub fn trace_save_vcd(&self, path: &str) -> Result<(), String> {
        self.sim.trace().save_vcd(path)
    }
}
