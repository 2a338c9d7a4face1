//! Apple II system extension: host-side RAM/ROM and batched execution.
//!
//! Wraps the generic kernel with the machine's memory map so that many clock
//! cycles run per host call. The 48 KiB RAM, 12 KiB ROM, speaker and
//! keyboard-strobe accounting all live here, in-process; the host boundary
//! sees only a compact batch result and bulk memory slices on request.

use log::debug;

use crate::error::LoadError;
use crate::sim::Simulator;

pub const RAM_SIZE: usize = 48 * 1024;
pub const ROM_SIZE: usize = 12 * 1024;
/// ROM window `$D000..=$FFFF`.
pub const ROM_BASE: usize = 0xD000;
/// Softswitch/IO window starts here; reads return 0 from the bus service.
pub const IO_BASE: usize = 0xC000;
pub const TEXT_PAGE_START: usize = 0x0400;
pub const TEXT_PAGE_END: usize = 0x07FF;
pub const HIRES_PAGE_START: usize = 0x2000;
pub const HIRES_PAGE_END: usize = 0x3FFF;
/// One nominal 6502 cycle at full accuracy.
pub const SUB_CYCLES_PER_CPU_CYCLE: u32 = 14;

/// Result of one batched `run_cpu_cycles` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchResult {
    /// A write in the batch hit the text page.
    pub text_dirty: bool,
    /// The design consumed the pending key (rising edge on `read_key`).
    pub key_cleared: bool,
    pub cycles_run: u32,
    pub speaker_toggles: u32,
}

/// Bus signal indices resolved once at construction.
#[derive(Debug, Clone, Copy)]
struct BusSignals {
    clk: usize,
    ram_addr: usize,
    ram_do: usize,
    ram_we: usize,
    d: usize,
    k: usize,
    read_key: usize,
    speaker: usize,
}

/// Host-side Apple II state. Methods take the kernel explicitly so the FFI
/// context can own both side by side.
pub struct Apple2System {
    ram: Vec<u8>,
    rom: Vec<u8>,
    sig: BusSignals,
    prev_speaker: u64,
    prev_read_key: u64,
    sub_cycles: u32,
}

impl Apple2System {
    /// Resolve the bus signals and allocate host memory. Designs without
    /// the Apple II bus interface are rejected. `sub_cycles` is the
    /// accuracy knob, clamped to 1..=14; 14 is the correctness target.
    pub fn new(sim: &Simulator, sub_cycles: u32) -> Result<Self, LoadError> {
        let resolve = |name: &str| {
            sim.signal_index(name)
                .ok_or_else(|| LoadError::UnknownSignal(name.to_string()))
        };
        let sig = BusSignals {
            clk: resolve("clk_14m")?,
            ram_addr: resolve("ram_addr")?,
            ram_do: resolve("ram_do")?,
            ram_we: resolve("ram_we")?,
            d: resolve("d")?,
            k: resolve("k")?,
            read_key: resolve("read_key")?,
            speaker: resolve("speaker")?,
        };
        let sub_cycles = sub_cycles.clamp(1, SUB_CYCLES_PER_CPU_CYCLE);
        debug!("apple2 extension attached, {sub_cycles} sub-cycles per CPU cycle");
        Ok(Self {
            ram: vec![0u8; RAM_SIZE],
            rom: vec![0u8; ROM_SIZE],
            sig,
            prev_speaker: 0,
            prev_read_key: 0,
            sub_cycles,
        })
    }

    /// Quick check whether a design carries the Apple II bus interface.
    pub fn is_apple2_design(sim: &Simulator) -> bool {
        sim.has_signal("ram_addr") && sim.has_signal("ram_do") && sim.has_signal("ram_we")
    }

    pub fn sub_cycles(&self) -> u32 {
        self.sub_cycles
    }

    // ------------------------------------------------------------------
    // Bulk memory operations. All clamp to their storage extents and copy.
    // ------------------------------------------------------------------

    pub fn load_rom(&mut self, data: &[u8]) {
        let len = data.len().min(self.rom.len());
        self.rom[..len].copy_from_slice(&data[..len]);
    }

    pub fn load_ram(&mut self, data: &[u8], offset: usize) {
        let end = (offset + data.len()).min(self.ram.len());
        let len = end.saturating_sub(offset);
        if len > 0 {
            self.ram[offset..end].copy_from_slice(&data[..len]);
        }
    }

    pub fn read_ram(&self, offset: usize, len: usize) -> &[u8] {
        let start = offset.min(self.ram.len());
        let end = (offset + len).min(self.ram.len());
        &self.ram[start..end]
    }

    pub fn write_ram(&mut self, offset: usize, data: &[u8]) {
        let end = (offset + data.len()).min(self.ram.len());
        let len = end.saturating_sub(offset);
        if len > 0 {
            self.ram[offset..end].copy_from_slice(&data[..len]);
        }
    }

    /// Read through the address decode (RAM and ROM windows alike), so a
    /// disassembler can fetch across the `$BFFF`/`$D000` boundary.
    pub fn read_memory(&self, offset: usize, len: usize) -> Vec<u8> {
        let start = offset.min(0x1_0000);
        let end = (offset + len).min(0x1_0000);
        (start..end).map(|addr| self.bus_data(addr)).collect()
    }

    #[inline(always)]
    fn bus_data(&self, addr: usize) -> u8 {
        if addr >= ROM_BASE {
            self.rom.get(addr - ROM_BASE).copied().unwrap_or(0)
        } else if addr >= IO_BASE {
            0
        } else {
            // addr < $C000 is always inside the 48 KiB RAM
            self.ram[addr]
        }
    }

    // ------------------------------------------------------------------
    // Batched execution
    // ------------------------------------------------------------------

    /// One 14 MHz sub-cycle: drive the keyboard, clock low + settle, service
    /// the bus, clock high + tick, then latch writes and account strobes.
    /// Returns (text_dirty, key_cleared, speaker_toggled).
    #[inline(always)]
    fn run_sub_cycle(
        &mut self,
        sim: &mut Simulator,
        key_data: u8,
        key_ready: bool,
    ) -> (bool, bool, bool) {
        let k = if key_ready { u64::from(key_data) | 0x80 } else { 0 };
        sim.poke_index(self.sig.k, k);

        sim.poke_index(self.sig.clk, 0);
        sim.evaluate();

        let addr = sim.peek_index(self.sig.ram_addr) as usize;
        sim.poke_index(self.sig.ram_do, u64::from(self.bus_data(addr)));
        sim.evaluate();

        sim.poke_index(self.sig.clk, 1);
        sim.tick();

        let mut text_dirty = false;
        if sim.peek_index(self.sig.ram_we) & 1 == 1 {
            let write_addr = sim.peek_index(self.sig.ram_addr) as usize;
            if write_addr < IO_BASE {
                self.ram[write_addr] = (sim.peek_index(self.sig.d) & 0xFF) as u8;
                text_dirty = (TEXT_PAGE_START..=TEXT_PAGE_END).contains(&write_addr);
            }
        }

        let read_key = sim.peek_index(self.sig.read_key) & 1;
        let key_cleared = read_key == 1 && self.prev_read_key == 0;
        self.prev_read_key = read_key;

        let speaker = sim.peek_index(self.sig.speaker);
        let speaker_toggled = speaker != self.prev_speaker;
        self.prev_speaker = speaker;

        (text_dirty, key_cleared, speaker_toggled)
    }

    /// Run `n` CPU cycles of `sub_cycles` sub-cycles each, entirely
    /// in-process. Once the design consumes the pending key, the keyboard
    /// input drops for the remainder of the batch.
    pub fn run_cpu_cycles(
        &mut self,
        sim: &mut Simulator,
        n: u32,
        key_data: u8,
        key_ready: bool,
    ) -> BatchResult {
        let mut result = BatchResult {
            cycles_run: n,
            ..BatchResult::default()
        };
        let mut key_ready = key_ready;

        for _ in 0..n {
            for _ in 0..self.sub_cycles {
                let (text_dirty, key_cleared, speaker_toggled) =
                    self.run_sub_cycle(sim, key_data, key_ready);
                result.text_dirty |= text_dirty;
                if key_cleared {
                    key_ready = false;
                    result.key_cleared = true;
                }
                if speaker_toggled {
                    result.speaker_toggles += 1;
                }
            }
        }

        result
    }
}

/// Base address of a text page 1 row (0..24).
pub fn text_row_address(row: usize) -> usize {
    let group = row / 8;
    let line_in_group = row % 8;
    TEXT_PAGE_START + line_in_group * 0x80 + group * 0x28
}

/// Base address of a hi-res page 1 row (0..192).
pub fn hires_row_address(row: usize) -> usize {
    let section = row / 64;
    let group = (row % 64) / 8;
    let line_in_group = row % 8;
    HIRES_PAGE_START + line_in_group * 0x400 + group * 0x80 + section * 0x28
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_rows_interleave() {
        assert_eq!(text_row_address(0), 0x0400);
        assert_eq!(text_row_address(1), 0x0480);
        assert_eq!(text_row_address(7), 0x0780);
        assert_eq!(text_row_address(8), 0x0428);
        assert_eq!(text_row_address(23), 0x07D0);
    }

    #[test]
    fn hires_rows_interleave() {
        assert_eq!(hires_row_address(0), 0x2000);
        assert_eq!(hires_row_address(1), 0x2400);
        assert_eq!(hires_row_address(8), 0x2080);
        assert_eq!(hires_row_address(64), 0x2028);
        assert_eq!(hires_row_address(191), 0x3FD0);
    }

    fn stub_system() -> Apple2System {
        let ir = serde_json::json!({
            "ports": [
                {"name": "clk_14m", "direction": "in", "width": 1},
                {"name": "ram_do", "direction": "in", "width": 8},
                {"name": "k", "direction": "in", "width": 8},
                {"name": "ram_addr", "direction": "out", "width": 16},
                {"name": "ram_we", "direction": "out", "width": 1},
                {"name": "d", "direction": "out", "width": 8},
                {"name": "read_key", "direction": "out", "width": 1},
                {"name": "speaker", "direction": "out", "width": 1}
            ]
        })
        .to_string();
        let sim = Simulator::new(&ir).unwrap();
        assert!(Apple2System::is_apple2_design(&sim));
        Apple2System::new(&sim, 14).unwrap()
    }

    #[test]
    fn rom_window_decode() {
        let mut sys = stub_system();
        let mut rom = vec![0u8; ROM_SIZE];
        rom[0] = 0xAA;
        rom[ROM_SIZE - 1] = 0xBB;
        sys.load_rom(&rom);
        sys.write_ram(0x1234, &[0xCC]);
        assert_eq!(sys.bus_data(0xD000), 0xAA);
        assert_eq!(sys.bus_data(0xFFFF), 0xBB);
        assert_eq!(sys.bus_data(0x1234), 0xCC);
        assert_eq!(sys.bus_data(0xC000), 0);
        assert_eq!(sys.bus_data(0xC010), 0);
    }

    #[test]
    fn read_memory_crosses_the_rom_boundary() {
        let mut sys = stub_system();
        sys.write_ram(0xBFFF, &[0x11]);
        sys.load_rom(&[0x22]);
        // $BFFF..=$D000 spans RAM, the IO window and the first ROM byte.
        let bytes = sys.read_memory(0xBFFF, 0x1102);
        assert_eq!(bytes[0], 0x11);
        assert!(bytes[1..0x1101].iter().all(|&b| b == 0));
        assert_eq!(bytes[0x1101], 0x22);
    }

    #[test]
    fn bulk_operations_clamp() {
        let mut sys = stub_system();
        sys.load_ram(&[1, 2, 3], RAM_SIZE - 2);
        assert_eq!(sys.read_ram(RAM_SIZE - 2, 10), &[1, 2]);
        assert!(sys.read_ram(RAM_SIZE + 5, 4).is_empty());
        sys.load_rom(&vec![0x7F; ROM_SIZE + 100]);
        assert_eq!(sys.read_memory(0xFFFF, 1), &[0x7F]);
    }

    #[test]
    fn missing_bus_signal_is_rejected() {
        let ir = serde_json::json!({
            "ports": [{"name": "clk_14m", "direction": "in", "width": 1}]
        })
        .to_string();
        let sim = Simulator::new(&ir).unwrap();
        assert!(!Apple2System::is_apple2_design(&sim));
        assert!(Apple2System::new(&sim, 14).is_err());
    }
}
