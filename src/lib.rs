#![forbid(unsafe_code)]

//! tvm_core – a teaching stack virtual machine with an observable execution engine.
//!
//! The crate is split into a handful of building blocks:
//!
//! * [`bytecode`] – the instruction set table, the [`Program`] word sequence and its
//!   loaders, a disassembler, the sample programs, and the fetch-decode-execute engine.
//! * [`memory`] – capacity-checked operand stack, call stack and global memory.
//! * [`concurrency`] – the pause/resume/halt [`ControlChannel`] and the parked event queue.
//! * [`integration`] – the instrumentation bus publishing [`VmEvent`]s to subscribers.
//! * [`machine`] – the [`VirtualMachine`] facade that runs the engine on a dedicated
//!   worker thread.
//!
//! Execution state is owned by exactly one engine. Callers only ever see copies of it,
//! delivered as events or in the final [`RunOutcome`].

pub mod bytecode;
pub mod concurrency;
pub mod integration;
pub mod logging;
pub mod machine;
pub mod memory;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bytecode::spec::{InstructionInfo, Opcode, Program, ProgramError, ISA};
pub use bytecode::vm::{RunOutcome, Termination};
pub use concurrency::control::ControlChannel;
pub use integration::{EventBus, Subscription, VmEvent};
pub use machine::{VirtualMachine, VmHandle};

/// Machine word held by the operand stack, locals and globals.
pub type Word = i64;

/// Maximum number of values on the operand stack.
pub const STACK_CAPACITY: usize = 1000;
/// Maximum call depth.
pub const CALLSTACK_CAPACITY: usize = 100;
/// Local slots available to a single call frame (arguments included).
pub const LOCALS_CAPACITY: usize = 10;

/// Result type used across tvm_core.
pub type VmResult<T> = std::result::Result<T, VmError>;

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum VmError {
    #[error("invalid entry point {ip} (program length {len})")]
    InvalidEntryPoint { ip: Word, len: usize },
    #[error("invalid opcode {value} at address {address}")]
    InvalidOpcode { address: usize, value: Word },
    #[error("instruction pointer {ip} outside program")]
    InvalidInstructionPointer { ip: Word },
    #[error("operand stack overflow (capacity {capacity})")]
    StackOverflow { capacity: usize },
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("call stack overflow (capacity {capacity})")]
    CallStackOverflow { capacity: usize },
    #[error("call stack underflow")]
    CallStackUnderflow,
    #[error("local index {index} out of range for frame with {len} locals")]
    InvalidLocalIndex { index: Word, len: usize },
    #[error("global index {index} out of range for {len} globals")]
    InvalidGlobalIndex { index: Word, len: usize },
    #[error("frame requests {requested} locals, capacity is {capacity}")]
    TooManyLocals { requested: usize, capacity: usize },
    #[error("invalid call layout: {args} args, {locals} locals")]
    InvalidCallLayout { args: Word, locals: Word },
    #[error("branch condition {value} at address {address} is neither 0 nor 1")]
    InvalidCondition { address: usize, value: Word },
    #[error("run exceeded step limit of {limit}")]
    StepLimitExceeded { limit: u64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("program error: {0}")]
    Program(#[from] ProgramError),
    #[error("failed to spawn engine worker: {0}")]
    WorkerSpawn(String),
    #[error("engine worker panicked")]
    WorkerPanicked,
}

/// Configuration for one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Publish disassembly and stack/memory snapshots alongside register events.
    pub trace: bool,
    /// Pause between instructions so a human can follow the run. Zero disables pacing.
    pub step_delay: Duration,
    /// Abort the run after this many executed instructions.
    pub step_limit: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            trace: true,
            step_delay: Self::DEFAULT_STEP_DELAY,
            step_limit: None,
        }
    }
}

impl VmConfig {
    pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(250);

    /// Default configuration without inter-instruction pacing.
    pub fn unpaced() -> Self {
        Self {
            step_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    /// Caps the number of executed instructions.
    pub fn with_step_limit(mut self, step_limit: u64) -> VmResult<Self> {
        if step_limit == 0 {
            return Err(VmError::InvalidConfig(
                "step limit must be greater than zero".into(),
            ));
        }
        self.step_limit = Some(step_limit);
        Ok(self)
    }

    /// Parses a TOML document with `trace`, `step_delay_ms` and `step_limit` keys.
    /// Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> VmResult<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|err| VmError::InvalidConfig(err.to_string()))?;
        let config = Self {
            trace: file.trace,
            step_delay: Duration::from_millis(file.step_delay_ms),
            step_limit: None,
        };
        match file.step_limit {
            Some(limit) => config.with_step_limit(limit),
            None => Ok(config),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    trace: bool,
    step_delay_ms: u64,
    step_limit: Option<u64>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let defaults = VmConfig::default();
        Self {
            trace: defaults.trace,
            step_delay_ms: defaults.step_delay.as_millis() as u64,
            step_limit: defaults.step_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_visual_pace() {
        let config = VmConfig::default();
        assert!(config.trace);
        assert_eq!(config.step_delay, Duration::from_millis(250));
        assert_eq!(config.step_limit, None);
    }

    #[test]
    fn step_limit_validation() {
        assert!(VmConfig::default().with_step_limit(0).is_err());
        let config = VmConfig::default().with_step_limit(5).unwrap();
        assert_eq!(config.step_limit, Some(5));
    }

    #[test]
    fn parses_toml_config() {
        let config = VmConfig::from_toml_str(
            r#"
trace = false
step_delay_ms = 10
step_limit = 500
"#,
        )
        .expect("valid config");
        assert!(!config.trace);
        assert_eq!(config.step_delay, Duration::from_millis(10));
        assert_eq!(config.step_limit, Some(500));
    }

    #[test]
    fn toml_config_keeps_defaults_for_missing_keys() {
        let config = VmConfig::from_toml_str("step_delay_ms = 0").expect("valid config");
        assert!(config.trace);
        assert_eq!(config.step_delay, Duration::ZERO);
    }

    #[test]
    fn toml_config_rejects_unknown_keys_and_zero_limit() {
        assert!(matches!(
            VmConfig::from_toml_str("speed = 3"),
            Err(VmError::InvalidConfig(_))
        ));
        assert!(matches!(
            VmConfig::from_toml_str("step_limit = 0"),
            Err(VmError::InvalidConfig(_))
        ));
    }
}
