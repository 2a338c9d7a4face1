//! Simulation kernel.
//!
//! Owns the signal vector, register staging buffer and memory arrays for one
//! compiled design and drives them through the two-phase cycle: `evaluate`
//! runs the scheduled combinational assigns in a single pass (the topological
//! order makes a fixed point unnecessary), `tick` performs one rising-edge
//! step per active clock. A monotonic `time_tick` counter stamps both, and an
//! optional [`TraceRecorder`] samples the vector after each.

use crate::compile::{Design, RegUpdate, SignalKind};
use crate::error::{LoadError, SimError};
use crate::expr::mask_for;
use crate::vcd::TraceRecorder;

pub struct Simulator {
    design: Design,
    values: Vec<u64>,
    memories: Vec<Vec<u64>>,
    memory_masks: Vec<u64>,
    /// Remembered level per clock group, for rising-edge detection. A poke
    /// to a clock signal records the level it overwrites, which is what
    /// makes `poke(clk, 0); evaluate(); poke(clk, 1); tick()` register an
    /// edge without any implicit re-evaluation.
    prev_levels: Vec<u8>,
    /// Scratch: which groups rise in the current tick.
    rising: Vec<bool>,
    /// Staged next-state values, one slot per register update; groups index
    /// into it via `reg_base`.
    staged: Vec<u64>,
    reg_base: Vec<usize>,
    /// Staged read-port latches, flagged when the port's enable was true.
    staged_reads: Vec<u64>,
    read_latched: Vec<bool>,
    read_base: Vec<usize>,
    pending_writes: Vec<(usize, usize, u64)>,
    time_tick: u64,
    trace: TraceRecorder,
}

impl Simulator {
    /// Load, compile and allocate a simulation context from IR JSON.
    pub fn new(json: &str) -> Result<Self, LoadError> {
        Ok(Self::from_design(Design::from_json(json)?))
    }

    pub fn from_design(design: Design) -> Self {
        let values = vec![0u64; design.signals.len()];
        let memories: Vec<Vec<u64>> = design.memories.iter().map(|m| vec![0u64; m.depth]).collect();
        let memory_masks = design.memories.iter().map(|m| mask_for(m.width)).collect();

        let mut reg_base = Vec::with_capacity(design.clocks.len());
        let mut read_base = Vec::with_capacity(design.clocks.len());
        let mut reg_slots = 0;
        let mut read_slots = 0;
        for group in &design.clocks {
            reg_base.push(reg_slots);
            read_base.push(read_slots);
            reg_slots += group.regs.len();
            read_slots += group.reads.len();
        }

        let mut trace = TraceRecorder::new();
        trace.init(
            design.signals.iter().map(|s| s.name.clone()).collect(),
            design.signals.iter().map(|s| s.width).collect(),
        );
        trace.set_module_name(&design.name);

        let n_clocks = design.clocks.len();
        Self {
            design,
            values,
            memories,
            memory_masks,
            prev_levels: vec![0; n_clocks],
            rising: vec![false; n_clocks],
            staged: vec![0; reg_slots],
            reg_base,
            staged_reads: vec![0; read_slots],
            read_latched: vec![false; read_slots],
            read_base,
            pending_writes: Vec::new(),
            time_tick: 0,
            trace,
        }
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    // ------------------------------------------------------------------
    // Name/index services
    // ------------------------------------------------------------------

    pub fn signal_count(&self) -> usize {
        self.design.signals.len()
    }

    pub fn reg_count(&self) -> usize {
        self.design.reg_count
    }

    pub fn input_names(&self) -> &[String] {
        &self.design.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.design.output_names
    }

    pub fn signal_index(&self, name: &str) -> Option<usize> {
        self.design.index.get(name).copied()
    }

    pub fn has_signal(&self, name: &str) -> bool {
        self.design.index.contains_key(name)
    }

    /// Clock-list index of a signal, when it is registered as a process
    /// clock (`tick_forced` on that index will do something).
    pub fn clock_list_index(&self, signal_idx: usize) -> Option<usize> {
        let v = *self.design.clock_of_signal.get(signal_idx)?;
        (v >= 0).then_some(v as usize)
    }

    // ------------------------------------------------------------------
    // Poke / peek
    // ------------------------------------------------------------------

    /// Write a value (masked to the signal width) without propagating; the
    /// next `evaluate` or `tick` picks it up.
    #[inline(always)]
    pub fn poke_index(&mut self, idx: usize, value: u64) {
        let old = self.values[idx];
        let new = value & mask_for(self.design.signals[idx].width);
        // A level transition on a registered clock remembers the level it
        // replaces; re-poking the same level must not clobber a pending
        // edge.
        if (old ^ new) & 1 == 1 {
            if let Some(list) = self.clock_list_index(idx) {
                self.prev_levels[list] = (old & 1) as u8;
            }
        }
        self.values[idx] = new;
    }

    #[inline(always)]
    pub fn peek_index(&self, idx: usize) -> u64 {
        self.values[idx]
    }

    pub fn poke(&mut self, name: &str, value: u64) -> Result<(), SimError> {
        let idx = self
            .signal_index(name)
            .ok_or_else(|| SimError::NoSuchSignal(name.to_string()))?;
        self.poke_index(idx, value);
        Ok(())
    }

    pub fn peek(&self, name: &str) -> Result<u64, SimError> {
        let idx = self
            .signal_index(name)
            .ok_or_else(|| SimError::NoSuchSignal(name.to_string()))?;
        Ok(self.values[idx])
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn time_tick(&self) -> u64 {
        self.time_tick
    }

    // ------------------------------------------------------------------
    // Cycle execution
    // ------------------------------------------------------------------

    /// One pass over the scheduled combinational assigns. The schedule
    /// guarantees a settled result; this is deliberately not a fixed-point
    /// loop.
    pub fn evaluate(&mut self) {
        for assign in &self.design.comb {
            let value = self.design.arena.eval(assign.expr, &self.values) & assign.mask;
            self.values[assign.target] = value;
        }
        self.time_tick += 1;
        self.trace.capture(self.time_tick, &self.values);
    }

    /// One rising-edge step on every clock whose current level is high and
    /// whose remembered level is low, followed by a propagation pass. A
    /// derived clock that rises during that pass is picked up by the next
    /// `tick` (edges are observed across successive ticks).
    pub fn tick(&mut self) {
        for (g, group) in self.design.clocks.iter().enumerate() {
            self.rising[g] = self.values[group.clock] & 1 == 1 && self.prev_levels[g] == 0;
        }
        self.run_edges(true);
    }

    /// Unconditional rising edge on one registered clock, ignoring its
    /// level. External harnesses drive a single clock deterministically
    /// through this.
    pub fn tick_forced(&mut self, clock_list_idx: usize) -> Result<(), SimError> {
        if clock_list_idx >= self.design.clocks.len() {
            return Err(SimError::UnknownClock(clock_list_idx));
        }
        self.rising.fill(false);
        self.rising[clock_list_idx] = true;
        self.run_edges(false);
        Ok(())
    }

    /// Shared edge machinery. `update_all_prev` distinguishes `tick` (every
    /// clock's remembered level refreshes) from `tick_forced` (only the
    /// forced clock's, so pending edges elsewhere are not swallowed).
    fn run_edges(&mut self, update_all_prev: bool) {
        let design = &self.design;
        let arena = &design.arena;
        let values = &mut self.values;

        // Sampling phase: every next-state, enable, reset and memory port
        // expression reads the same pre-edge snapshot. Read ports capture
        // pre-write memory contents here.
        self.pending_writes.clear();
        for (g, group) in design.clocks.iter().enumerate() {
            if !self.rising[g] {
                continue;
            }
            for (i, ru) in group.regs.iter().enumerate() {
                self.staged[self.reg_base[g] + i] = next_reg_value(ru, design, values);
            }
            for (i, rp) in group.reads.iter().enumerate() {
                let slot = self.read_base[g] + i;
                if arena.eval(rp.enable, values) != 0 {
                    let addr = arena.eval(rp.addr, values) as usize;
                    let mem = &self.memories[rp.memory];
                    self.staged_reads[slot] = mem.get(addr).copied().unwrap_or(0);
                    self.read_latched[slot] = true;
                } else {
                    self.read_latched[slot] = false;
                }
            }
            for wp in &group.writes {
                if arena.eval(wp.enable, values) != 0 {
                    let addr = arena.eval(wp.addr, values) as usize;
                    let data = arena.eval(wp.data, values) & self.memory_masks[wp.memory];
                    self.pending_writes.push((wp.memory, addr, data));
                }
            }
        }

        // Commit registers.
        for (g, group) in design.clocks.iter().enumerate() {
            if !self.rising[g] {
                continue;
            }
            for (i, ru) in group.regs.iter().enumerate() {
                values[ru.target] = self.staged[self.reg_base[g] + i];
            }
        }

        // Service memory write ports; out-of-range addresses are dropped.
        for &(memory, addr, data) in &self.pending_writes {
            if let Some(cell) = self.memories[memory].get_mut(addr) {
                *cell = data;
            }
        }

        // Latch read ports.
        for (g, group) in design.clocks.iter().enumerate() {
            if !self.rising[g] {
                continue;
            }
            for (i, rp) in group.reads.iter().enumerate() {
                let slot = self.read_base[g] + i;
                if self.read_latched[slot] {
                    values[rp.target] = self.staged_reads[slot] & rp.mask;
                }
            }
        }

        // Remember the committed level of every affected clock, before the
        // propagation pass so an edge it produces stays observable.
        for (g, group) in design.clocks.iter().enumerate() {
            if update_all_prev || self.rising[g] {
                self.prev_levels[g] = (values[group.clock] & 1) as u8;
            }
        }

        self.time_tick += 1;
        self.trace.capture(self.time_tick, values);

        // Propagate the new register and latch values.
        self.evaluate();
    }

    /// Zero all register and memory storage, clear staged state and the
    /// trace buffer (the subscription survives), and run one propagation
    /// pass. Input ports are not reset; callers re-drive them.
    pub fn reset(&mut self) {
        for (idx, info) in self.design.signals.iter().enumerate() {
            if info.kind == SignalKind::Reg {
                self.values[idx] = 0;
            }
        }
        // Read-port latches are sequential storage too.
        for group in &self.design.clocks {
            for rp in &group.reads {
                self.values[rp.target] = 0;
            }
        }
        for mem in &mut self.memories {
            mem.fill(0);
        }
        self.staged.fill(0);
        self.staged_reads.fill(0);
        self.read_latched.fill(false);
        self.prev_levels.fill(0);
        self.time_tick = 0;
        self.trace.clear();
        self.evaluate();
    }

    // ------------------------------------------------------------------
    // Tracing
    // ------------------------------------------------------------------

    pub fn trace(&self) -> &TraceRecorder {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut TraceRecorder {
        &mut self.trace
    }

    /// Enable tracing and capture the current state as the baseline.
    pub fn trace_start(&mut self) {
        self.trace.start();
        self.trace.capture(self.time_tick, &self.values);
    }

    pub fn trace_stop(&mut self) {
        self.trace.stop();
    }

    /// Manual sample at the current `time_tick`.
    pub fn capture(&mut self) {
        self.trace.capture(self.time_tick, &self.values);
    }
}

#[inline(always)]
fn next_reg_value(ru: &RegUpdate, design: &Design, values: &[u64]) -> u64 {
    if let Some(rs) = ru.reset {
        if values[rs.signal] & 1 == rs.active_level {
            return ru.reset_value;
        }
    }
    if let Some(enable) = ru.enable {
        if design.arena.eval(enable, values) == 0 {
            return values[ru.target];
        }
    }
    design.arena.eval(ru.next, values) & ru.mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter_ir(width: u32) -> String {
        json!({
            "ports": [{"name": "clk", "direction": "in", "width": 1}],
            "regs": [{"name": "q", "width": width}],
            "processes": [{
                "clock": "clk",
                "statements": [{"target": "q", "expr": {
                    "type": "binary", "op": "+",
                    "left": {"type": "signal", "name": "q"},
                    "right": {"type": "literal", "value": 1, "width": width}
                }}]
            }]
        })
        .to_string()
    }

    #[test]
    fn poke_masks_to_width() {
        let ir = json!({
            "ports": [{"name": "a", "direction": "in", "width": 4}]
        })
        .to_string();
        let mut sim = Simulator::new(&ir).unwrap();
        sim.poke("a", 0x1FF).unwrap();
        assert_eq!(sim.peek("a").unwrap(), 0xF);
    }

    #[test]
    fn poke_unknown_signal_errors() {
        let sim = Simulator::new(&counter_ir(2)).unwrap();
        assert!(matches!(
            sim.peek("ghost"),
            Err(SimError::NoSuchSignal(name)) if name == "ghost"
        ));
    }

    #[test]
    fn tick_advances_time_by_two() {
        let mut sim = Simulator::new(&counter_ir(2)).unwrap();
        let t0 = sim.time_tick();
        sim.tick();
        assert_eq!(sim.time_tick(), t0 + 2);
        sim.evaluate();
        assert_eq!(sim.time_tick(), t0 + 3);
    }

    #[test]
    fn clock_edge_via_poke_then_tick() {
        let mut sim = Simulator::new(&counter_ir(4)).unwrap();
        sim.reset();
        for expected in 1..=3u64 {
            sim.poke("clk", 0).unwrap();
            sim.evaluate();
            sim.poke("clk", 1).unwrap();
            sim.tick();
            assert_eq!(sim.peek("q").unwrap(), expected);
        }
    }

    #[test]
    fn tick_forced_rejects_bad_index() {
        let mut sim = Simulator::new(&counter_ir(2)).unwrap();
        let before = sim.peek("q").unwrap();
        assert!(matches!(sim.tick_forced(7), Err(SimError::UnknownClock(7))));
        assert_eq!(sim.peek("q").unwrap(), before);
    }

    #[test]
    fn clock_list_index_roundtrip() {
        let sim = Simulator::new(&counter_ir(2)).unwrap();
        let clk = sim.signal_index("clk").unwrap();
        let q = sim.signal_index("q").unwrap();
        assert_eq!(sim.clock_list_index(clk), Some(0));
        assert_eq!(sim.clock_list_index(q), None);
    }
}
