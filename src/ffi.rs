//! C ABI entry points.
//!
//! The host drives the simulator through a flat set of functions taking an
//! opaque context pointer. Strings cross the boundary as UTF-8 with an
//! explicit length; bulk data as (pointer, length) pairs copied into
//! caller-provided buffers. Every allocation handed to the caller must be
//! released through `rtl_sim_free_string`, never another allocator. Creation
//! failures are reported through the error-out pointer protocol.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_uint};
use std::ptr;
use std::slice;

use crate::apple2::Apple2System;
use crate::sim::Simulator;

/// Opaque simulator context passed to all entry points.
pub struct RtlSimContext {
    pub core: Simulator,
    pub apple2: Option<Apple2System>,
}

impl RtlSimContext {
    fn new(json: &str, sub_cycles: u32) -> Result<Self, String> {
        let core = Simulator::new(json).map_err(|e| e.to_string())?;
        let apple2 = if Apple2System::is_apple2_design(&core) {
            Some(Apple2System::new(&core, sub_cycles).map_err(|e| e.to_string())?)
        } else {
            None
        };
        Ok(Self { core, apple2 })
    }
}

unsafe fn str_arg<'a>(ptr: *const c_char, len: usize) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err("null string argument".to_string());
    }
    let bytes = slice::from_raw_parts(ptr as *const u8, len);
    std::str::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {e}"))
}

unsafe fn report_error(error_out: *mut *mut c_char, message: String) {
    if !error_out.is_null() {
        // Interior NULs cannot come from our error Display impls.
        let msg = CString::new(message).unwrap_or_default();
        *error_out = msg.into_raw();
    }
}

fn string_out(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Create a simulator context from IR JSON. Designs carrying the Apple II
/// bus signals get the batched runner attached; `sub_cycles` is its accuracy
/// knob (1..=14). Returns null on error with a message in `error_out`.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_create(
    json: *const c_char,
    json_len: usize,
    sub_cycles: c_uint,
    error_out: *mut *mut c_char,
) -> *mut RtlSimContext {
    let json = match str_arg(json, json_len) {
        Ok(s) => s,
        Err(e) => {
            report_error(error_out, e);
            return ptr::null_mut();
        }
    };
    match RtlSimContext::new(json, sub_cycles) {
        Ok(ctx) => Box::into_raw(Box::new(ctx)),
        Err(e) => {
            report_error(error_out, e);
            ptr::null_mut()
        }
    }
}

/// Destroy a context and everything it owns.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_destroy(ctx: *mut RtlSimContext) {
    if !ctx.is_null() {
        drop(Box::from_raw(ctx));
    }
}

/// Free any string returned by these entry points (error messages, name
/// lists, VCD snapshots).
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ---------------------------------------------------------------------------
// Signal access
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_poke(
    ctx: *mut RtlSimContext,
    name: *const c_char,
    name_len: usize,
    value: u64,
) -> c_int {
    let Some(ctx) = ctx.as_mut() else { return -1 };
    let Ok(name) = str_arg(name, name_len) else {
        return -1;
    };
    match ctx.core.poke(name, value) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_peek(
    ctx: *const RtlSimContext,
    name: *const c_char,
    name_len: usize,
    value_out: *mut u64,
) -> c_int {
    let Some(ctx) = ctx.as_ref() else { return -1 };
    let Ok(name) = str_arg(name, name_len) else {
        return -1;
    };
    match ctx.core.peek(name) {
        Ok(value) => {
            if !value_out.is_null() {
                *value_out = value;
            }
            0
        }
        Err(_) => -1,
    }
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_has_signal(
    ctx: *const RtlSimContext,
    name: *const c_char,
    name_len: usize,
) -> c_int {
    let Some(ctx) = ctx.as_ref() else { return 0 };
    match str_arg(name, name_len) {
        Ok(name) => ctx.core.has_signal(name) as c_int,
        Err(_) => 0,
    }
}

/// Dense index of a signal, or -1.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_signal_index(
    ctx: *const RtlSimContext,
    name: *const c_char,
    name_len: usize,
) -> c_int {
    let Some(ctx) = ctx.as_ref() else { return -1 };
    let Ok(name) = str_arg(name, name_len) else {
        return -1;
    };
    ctx.core.signal_index(name).map_or(-1, |idx| idx as c_int)
}

/// Clock-list index of a signal, or -1 when it is not a registered clock.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_clock_list_index(
    ctx: *const RtlSimContext,
    signal_idx: c_uint,
) -> c_int {
    let Some(ctx) = ctx.as_ref() else { return -1 };
    ctx.core
        .clock_list_index(signal_idx as usize)
        .map_or(-1, |idx| idx as c_int)
}

// ---------------------------------------------------------------------------
// Cycle execution
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_evaluate(ctx: *mut RtlSimContext) {
    if let Some(ctx) = ctx.as_mut() {
        ctx.core.evaluate();
    }
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_tick(ctx: *mut RtlSimContext) {
    if let Some(ctx) = ctx.as_mut() {
        ctx.core.tick();
    }
}

/// Rising-edge step restricted to one registered clock. Returns -1 (and
/// changes nothing) for an unknown clock-list index.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_tick_forced(
    ctx: *mut RtlSimContext,
    clock_list_idx: c_uint,
) -> c_int {
    let Some(ctx) = ctx.as_mut() else { return -1 };
    match ctx.core.tick_forced(clock_list_idx as usize) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_reset(ctx: *mut RtlSimContext) {
    if let Some(ctx) = ctx.as_mut() {
        ctx.core.reset();
    }
}

// ---------------------------------------------------------------------------
// Name/index services
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_signal_count(ctx: *const RtlSimContext) -> c_uint {
    ctx.as_ref().map_or(0, |ctx| ctx.core.signal_count() as c_uint)
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_reg_count(ctx: *const RtlSimContext) -> c_uint {
    ctx.as_ref().map_or(0, |ctx| ctx.core.reg_count() as c_uint)
}

/// Newline-joined input port names, in declaration order.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_input_names(ctx: *const RtlSimContext) -> *mut c_char {
    let Some(ctx) = ctx.as_ref() else {
        return ptr::null_mut();
    };
    string_out(ctx.core.input_names().join("\n"))
}

/// Newline-joined output port names, in declaration order.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_output_names(ctx: *const RtlSimContext) -> *mut c_char {
    let Some(ctx) = ctx.as_ref() else {
        return ptr::null_mut();
    };
    string_out(ctx.core.output_names().join("\n"))
}

// ---------------------------------------------------------------------------
// VCD tracing
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_trace_start(ctx: *mut RtlSimContext) {
    if let Some(ctx) = ctx.as_mut() {
        ctx.core.trace_start();
    }
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_trace_stop(ctx: *mut RtlSimContext) {
    if let Some(ctx) = ctx.as_mut() {
        ctx.core.trace_stop();
    }
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_trace_add_signal(
    ctx: *mut RtlSimContext,
    name: *const c_char,
    name_len: usize,
) -> c_int {
    let Some(ctx) = ctx.as_mut() else { return 0 };
    match str_arg(name, name_len) {
        Ok(name) => ctx.core.trace_mut().add_signal_by_name(name) as c_int,
        Err(_) => 0,
    }
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_trace_all_signals(ctx: *mut RtlSimContext) {
    if let Some(ctx) = ctx.as_mut() {
        ctx.core.trace_mut().trace_all_signals();
    }
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_trace_set_timescale(
    ctx: *mut RtlSimContext,
    timescale: *const c_char,
    timescale_len: usize,
) {
    if let Some(ctx) = ctx.as_mut() {
        if let Ok(ts) = str_arg(timescale, timescale_len) {
            ctx.core.trace_mut().set_timescale(ts);
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_trace_clear(ctx: *mut RtlSimContext) {
    if let Some(ctx) = ctx.as_mut() {
        ctx.core.trace_mut().clear();
    }
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_trace_capture(ctx: *mut RtlSimContext) {
    if let Some(ctx) = ctx.as_mut() {
        ctx.core.capture();
    }
}

/// Full accumulated VCD dump. Free with `rtl_sim_free_string`.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_trace_to_vcd(ctx: *const RtlSimContext) -> *mut c_char {
    let Some(ctx) = ctx.as_ref() else {
        return ptr::null_mut();
    };
    string_out(ctx.core.trace().to_vcd())
}

/// VCD bytes appended since the previous take; the caller never sees the
/// same byte twice. Free with `rtl_sim_free_string`.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_trace_take_live_vcd(ctx: *mut RtlSimContext) -> *mut c_char {
    let Some(ctx) = ctx.as_mut() else {
        return ptr::null_mut();
    };
    string_out(ctx.core.trace_mut().take_live_vcd())
}

// ---------------------------------------------------------------------------
// Apple II extension
// ---------------------------------------------------------------------------

/// Batched execution result, 16 bytes little-endian on every supported
/// target.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchRecord {
    pub text_dirty: i32,
    pub key_cleared: i32,
    pub cycles_run: u32,
    pub speaker_toggles: u32,
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_is_apple2_mode(ctx: *const RtlSimContext) -> c_int {
    ctx.as_ref().map_or(0, |ctx| ctx.apple2.is_some() as c_int)
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_apple2_load_rom(
    ctx: *mut RtlSimContext,
    data: *const u8,
    data_len: usize,
) -> c_int {
    let Some(ctx) = ctx.as_mut() else { return -1 };
    let Some(apple2) = ctx.apple2.as_mut() else {
        return -1;
    };
    if data.is_null() {
        return -1;
    }
    apple2.load_rom(slice::from_raw_parts(data, data_len));
    0
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_apple2_load_ram(
    ctx: *mut RtlSimContext,
    data: *const u8,
    data_len: usize,
    offset: c_uint,
) -> c_int {
    let Some(ctx) = ctx.as_mut() else { return -1 };
    let Some(apple2) = ctx.apple2.as_mut() else {
        return -1;
    };
    if data.is_null() {
        return -1;
    }
    apple2.load_ram(slice::from_raw_parts(data, data_len), offset as usize);
    0
}

/// Copy RAM into a caller-provided buffer. Returns the number of bytes
/// copied (clamped to the RAM extent), or -1.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_apple2_read_ram(
    ctx: *const RtlSimContext,
    offset: c_uint,
    len: c_uint,
    out: *mut u8,
) -> c_int {
    let Some(ctx) = ctx.as_ref() else { return -1 };
    let Some(apple2) = ctx.apple2.as_ref() else {
        return -1;
    };
    if out.is_null() {
        return -1;
    }
    let bytes = apple2.read_ram(offset as usize, len as usize);
    ptr::copy_nonoverlapping(bytes.as_ptr(), out, bytes.len());
    bytes.len() as c_int
}

#[no_mangle]
pub unsafe extern "C" fn rtl_sim_apple2_write_ram(
    ctx: *mut RtlSimContext,
    offset: c_uint,
    data: *const u8,
    data_len: usize,
) -> c_int {
    let Some(ctx) = ctx.as_mut() else { return -1 };
    let Some(apple2) = ctx.apple2.as_mut() else {
        return -1;
    };
    if data.is_null() {
        return -1;
    }
    apple2.write_ram(offset as usize, slice::from_raw_parts(data, data_len));
    0
}

/// Copy through the unified RAM/ROM decode into a caller-provided buffer.
/// Returns the number of bytes copied, or -1.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_apple2_read_memory(
    ctx: *const RtlSimContext,
    offset: c_uint,
    len: c_uint,
    out: *mut u8,
) -> c_int {
    let Some(ctx) = ctx.as_ref() else { return -1 };
    let Some(apple2) = ctx.apple2.as_ref() else {
        return -1;
    };
    if out.is_null() {
        return -1;
    }
    let bytes = apple2.read_memory(offset as usize, len as usize);
    ptr::copy_nonoverlapping(bytes.as_ptr(), out, bytes.len());
    bytes.len() as c_int
}

/// Run `n_cpu` batched CPU cycles and fill the 16-byte result record.
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_apple2_run_cpu_cycles(
    ctx: *mut RtlSimContext,
    n_cpu: c_uint,
    key_data: u8,
    key_ready: c_int,
    result_out: *mut BatchRecord,
) -> c_int {
    let Some(ctx) = ctx.as_mut() else { return -1 };
    let Some(apple2) = ctx.apple2.as_mut() else {
        return -1;
    };
    let result = apple2.run_cpu_cycles(&mut ctx.core, n_cpu, key_data, key_ready != 0);
    if !result_out.is_null() {
        *result_out = BatchRecord {
            text_dirty: result.text_dirty as i32,
            key_cleared: result.key_cleared as i32,
            cycles_run: result.cycles_run,
            speaker_toggles: result.speaker_toggles,
        };
    }
    0
}
