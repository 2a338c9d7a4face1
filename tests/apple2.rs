//! Apple II host loop: batched execution, memory service and the
//! equivalence between batched and manually driven sub-cycles.

mod common;

use common::*;
use rtlsim::apple2::{Apple2System, IO_BASE, ROM_BASE, TEXT_PAGE_END, TEXT_PAGE_START};
use rtlsim::{Apple2Runner, Simulator};

fn demo_system(sub_cycles: u32) -> (Simulator, Apple2System) {
    let sim = Simulator::new(&apple2_demo_ir()).unwrap();
    let sys = Apple2System::new(&sim, sub_cycles).unwrap();
    (sim, sys)
}

fn demo_rom() -> Vec<u8> {
    let mut rom = vec![0u8; 12 * 1024];
    rom[0] = 0x42; // fetched from $D000 and stored to $0400
    rom
}

#[test]
fn rom_byte_lands_in_the_text_page() {
    let (mut sim, mut sys) = demo_system(14);
    sys.load_rom(&demo_rom());
    sim.reset();

    let result = sys.run_cpu_cycles(&mut sim, 2, 0, false);
    assert_eq!(result.cycles_run, 2);
    assert!(result.text_dirty);
    assert_eq!(sys.read_ram(0x0400, 1), &[0x42]);
}

#[test]
fn speaker_toggles_are_counted() {
    let (mut sim, mut sys) = demo_system(14);
    sim.reset();
    // The demo toggles the speaker every fourth sub-cycle.
    let result = sys.run_cpu_cycles(&mut sim, 2, 0, false);
    assert_eq!(result.speaker_toggles, 7);
}

#[test]
fn key_is_consumed_once_per_batch() {
    let (mut sim, mut sys) = demo_system(14);
    sim.reset();
    let result = sys.run_cpu_cycles(&mut sim, 1, 0x0D, true);
    assert!(result.key_cleared);
}

#[test]
fn sub_cycle_knob_scales_the_batch() {
    let (mut sim, mut sys) = demo_system(1);
    assert_eq!(sys.sub_cycles(), 1);
    sim.reset();
    let result = sys.run_cpu_cycles(&mut sim, 8, 0, false);
    assert_eq!(result.cycles_run, 8);
    // 8 sub-cycles total: the speaker flip-flop fired twice.
    assert_eq!(result.speaker_toggles, 2);
}

#[test]
fn batching_granularity_is_unobservable() {
    let (mut sim_a, mut sys_a) = demo_system(14);
    let (mut sim_b, mut sys_b) = demo_system(14);
    sys_a.load_rom(&demo_rom());
    sys_b.load_rom(&demo_rom());
    sim_a.reset();
    sim_b.reset();

    let big = sys_a.run_cpu_cycles(&mut sim_a, 6, 0, false);
    let mut toggles = 0;
    let mut dirty = false;
    for _ in 0..6 {
        let r = sys_b.run_cpu_cycles(&mut sim_b, 1, 0, false);
        toggles += r.speaker_toggles;
        dirty |= r.text_dirty;
    }

    assert_eq!(big.speaker_toggles, toggles);
    assert_eq!(big.text_dirty, dirty);
    assert_eq!(sim_a.values(), sim_b.values());
    assert_eq!(sys_a.read_ram(0, 0xC000), sys_b.read_ram(0, 0xC000));
}

/// The unbatched reference path: the same per-sub-cycle sequence driven by
/// name through the public kernel API, with host memory kept locally.
struct ManualHost {
    ram: Vec<u8>,
    rom: Vec<u8>,
    prev_speaker: u64,
    prev_read_key: u64,
    speaker_toggles: u32,
    text_dirty: bool,
    key_cleared: bool,
}

impl ManualHost {
    fn new(rom: Vec<u8>) -> Self {
        Self {
            ram: vec![0u8; IO_BASE],
            rom,
            prev_speaker: 0,
            prev_read_key: 0,
            speaker_toggles: 0,
            text_dirty: false,
            key_cleared: false,
        }
    }

    fn sub_cycle(&mut self, sim: &mut Simulator, key_data: u8, key_ready: bool) {
        let k = if key_ready { u64::from(key_data) | 0x80 } else { 0 };
        sim.poke("k", k).unwrap();
        sim.poke("clk_14m", 0).unwrap();
        sim.evaluate();

        let addr = sim.peek("ram_addr").unwrap() as usize;
        let data = if addr >= ROM_BASE {
            self.rom.get(addr - ROM_BASE).copied().unwrap_or(0)
        } else if addr >= IO_BASE {
            0
        } else {
            self.ram[addr]
        };
        sim.poke("ram_do", u64::from(data)).unwrap();
        sim.evaluate();

        sim.poke("clk_14m", 1).unwrap();
        sim.tick();

        if sim.peek("ram_we").unwrap() & 1 == 1 {
            let write_addr = sim.peek("ram_addr").unwrap() as usize;
            if write_addr < IO_BASE {
                self.ram[write_addr] = (sim.peek("d").unwrap() & 0xFF) as u8;
                if (TEXT_PAGE_START..=TEXT_PAGE_END).contains(&write_addr) {
                    self.text_dirty = true;
                }
            }
        }

        let read_key = sim.peek("read_key").unwrap() & 1;
        if read_key == 1 && self.prev_read_key == 0 {
            self.key_cleared = true;
        }
        self.prev_read_key = read_key;

        let speaker = sim.peek("speaker").unwrap();
        if speaker != self.prev_speaker {
            self.speaker_toggles += 1;
        }
        self.prev_speaker = speaker;
    }
}

#[test]
fn batched_loop_matches_the_unbatched_path() {
    let n_cpu = 3u32;

    let (mut sim_batched, mut sys) = demo_system(14);
    sys.load_rom(&demo_rom());
    sim_batched.reset();
    let result = sys.run_cpu_cycles(&mut sim_batched, n_cpu, 0x41, true);

    let mut sim_manual = Simulator::new(&apple2_demo_ir()).unwrap();
    sim_manual.reset();
    let mut host = ManualHost::new(demo_rom());
    let mut key_ready = true;
    for _ in 0..n_cpu * 14 {
        host.sub_cycle(&mut sim_manual, 0x41, key_ready);
        if host.key_cleared {
            key_ready = false;
        }
    }

    assert_eq!(result.text_dirty, host.text_dirty);
    assert_eq!(result.key_cleared, host.key_cleared);
    assert_eq!(result.speaker_toggles, host.speaker_toggles);
    assert_eq!(sim_batched.values(), sim_manual.values());
    assert_eq!(sys.read_ram(0, IO_BASE), &host.ram[..]);
}

#[test]
fn runner_queues_and_consumes_keys() {
    let mut runner = Apple2Runner::new(&apple2_demo_ir(), 14).unwrap();
    runner.load_rom(&demo_rom());
    runner.reset();

    runner.queue_key(b'A');
    assert!(runner.key_pending());
    let result = runner.run_cpu_cycles(1);
    assert!(result.key_cleared);
    assert!(!runner.key_pending());
    assert_eq!(runner.cycle_count(), 1);
}

#[test]
fn runner_reads_the_screen() {
    let mut runner = Apple2Runner::new(&apple2_demo_ir(), 14).unwrap();
    runner.load_rom(&demo_rom());
    runner.reset();
    runner.run_cpu_cycles(2);

    // $0400 is row 0, column 0; 0x42 renders as 'B'.
    let lines = runner.read_screen_lines();
    assert_eq!(lines.len(), 24);
    assert!(lines[0].starts_with('B'));
    assert!(lines.iter().all(|l| l.len() == 40));
}

#[test]
fn ffi_batched_roundtrip() {
    use rtlsim::ffi::{
        rtl_sim_apple2_load_rom, rtl_sim_apple2_read_ram, rtl_sim_apple2_run_cpu_cycles,
        rtl_sim_create, rtl_sim_destroy, rtl_sim_is_apple2_mode, rtl_sim_reset, BatchRecord,
    };
    use std::os::raw::c_char;

    let json = apple2_demo_ir();
    let rom = demo_rom();
    unsafe {
        let mut err: *mut c_char = std::ptr::null_mut();
        let ctx = rtl_sim_create(json.as_ptr() as *const c_char, json.len(), 14, &mut err);
        assert!(!ctx.is_null());
        assert_eq!(rtl_sim_is_apple2_mode(ctx), 1);

        assert_eq!(rtl_sim_apple2_load_rom(ctx, rom.as_ptr(), rom.len()), 0);
        rtl_sim_reset(ctx);

        let mut record = BatchRecord::default();
        assert_eq!(rtl_sim_apple2_run_cpu_cycles(ctx, 2, 0, 0, &mut record), 0);
        assert_eq!(record.cycles_run, 2);
        assert_eq!(record.text_dirty, 1);
        assert_eq!(record.key_cleared, 1);
        assert_eq!(record.speaker_toggles, 7);

        let mut byte = 0u8;
        assert_eq!(rtl_sim_apple2_read_ram(ctx, 0x0400, 1, &mut byte), 1);
        assert_eq!(byte, 0x42);

        rtl_sim_destroy(ctx);
    }
}
