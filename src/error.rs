//! Error taxonomy for IR loading and simulation.

use thiserror::Error;

/// Errors raised while loading and compiling an IR document. Any of these
/// aborts the load; no simulation context is created.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed IR JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("duplicate signal `{0}`")]
    DuplicateSignal(String),

    #[error("unknown signal reference `{0}`")]
    UnknownSignal(String),

    #[error("literal {value:#x} does not fit in {width} bits")]
    WidthMismatch { value: u64, width: u32 },

    #[error("signal `{0}` has zero width")]
    ZeroWidth(String),

    #[error("multiple drivers for signal `{0}`")]
    MultipleDrivers(String),

    #[error("assign target `{0}` is not a net or output port")]
    InvalidAssignTarget(String),

    #[error("process target `{0}` is not a register")]
    InvalidProcessTarget(String),

    #[error("unsupported operator `{0}`")]
    UnsupportedOperator(String),

    #[error("slice [{hi}:{lo}] out of range for {width}-bit value")]
    SliceOutOfRange { hi: u32, lo: u32, width: u32 },

    #[error("clock signal `{0}` is updated by a process it clocks")]
    ClockFeedback(String),

    #[error("combinational cycle through: {}", .0.join(", "))]
    CombinationalCycle(Vec<String>),
}

/// Runtime errors. `UnknownClock` is a no-op condition; everything else a
/// well-formed design cannot produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("unknown signal `{0}`")]
    NoSuchSignal(String),

    #[error("unknown clock list index {0}")]
    UnknownClock(usize),
}
