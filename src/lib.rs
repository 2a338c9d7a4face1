//! Cycle-accurate RTL/IR netlist simulator with a batched Apple II runner.
//!
//! The crate consumes a structural netlist in JSON IR form (ports, nets,
//! registers, memories, combinational assigns, clocked processes) and
//! executes it cycle-accurately:
//!
//! - Expressions live in a flat arena with index children; evaluation is a
//!   recursive walk, masked bit-exact at every node.
//! - A load-time scheduler orders the combinational assigns topologically
//!   (combinational cycles are a fatal load error) and groups clocked work
//!   per clock signal, so `evaluate` is a single linear pass and `tick` a
//!   deterministic two-phase edge step.
//! - A live VCD recorder appends deltas to a buffer that *is* the event
//!   log; hosts stream it incrementally without re-reading bytes.
//! - The Apple II extension internalizes the 48 KiB RAM / 12 KiB ROM bus
//!   service so thousands of clock cycles run per host call, returning a
//!   compact batch record.
//!
//! The C ABI in [`ffi`] exposes the whole surface to foreign hosts.

pub mod apple2;
pub mod compile;
pub mod error;
pub mod expr;
pub mod ffi;
pub mod ir;
pub mod runner;
pub mod sim;
pub mod vcd;

pub use apple2::{Apple2System, BatchResult};
pub use compile::Design;
pub use error::{LoadError, SimError};
pub use runner::Apple2Runner;
pub use sim::Simulator;
pub use vcd::TraceRecorder;
