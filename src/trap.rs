use std::fmt;

use thiserror::Error;

/// All ways execution can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Trap {
    #[error("integer divide by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("out of bounds memory access: {len} bytes at {address:#x} (memory size {size})")]
    MemoryOutOfBounds { address: u64, len: usize, size: usize },
    #[error("out of memory")]
    OutOfMemory,
    #[error("unreachable executed")]
    Unreachable,
    #[error("operand stack underflow: need {needed}, have {depth}")]
    StackUnderflow { needed: usize, depth: usize },
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("undefined element {0}")]
    UndefinedElement(u32),
    #[error("uninitialized element {0}")]
    UninitializedElement(u32),
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    #[error("undefined function {0}")]
    UndefinedFunction(u32),
    #[error("undefined type {0}")]
    UndefinedType(u32),
    #[error("undefined table {0}")]
    UndefinedTable(u32),
    #[error("undefined global {0}")]
    UndefinedGlobal(u32),
    #[error("undefined local {0}")]
    UndefinedLocal(u32),
    #[error("global {0} is immutable")]
    ImmutableGlobal(u32),
    #[error("branch depth {0} exceeds enclosing labels")]
    InvalidBranchDepth(u32),
    #[error("undefined export: {0}")]
    UndefinedExport(String),
    #[error("arguments do not match signature {0}")]
    ArgumentMismatch(String),
    #[error("host function returned values not matching its signature")]
    HostSignatureMismatch,
    #[error("host error: {0}")]
    HostError(String),
}

pub type Result<T> = std::result::Result<T, Trap>;

/// Where in a body a trap was raised: the leading opcode byte of the
/// faulting instruction and its index within the enclosing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site {
    pub opcode: u8,
    pub offset: usize,
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opcode {:#04x} at instruction {}", self.opcode, self.offset)
    }
}

/// A trap that aborted an invocation, located at the instruction that
/// raised it when one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecError {
    pub trap: Trap,
    pub site: Option<Site>,
}

impl ExecError {
    pub fn at(trap: Trap, opcode: u8, offset: usize) -> Self {
        ExecError { trap, site: Some(Site { opcode, offset }) }
    }
}

impl From<Trap> for ExecError {
    fn from(trap: Trap) -> Self {
        ExecError { trap, site: None }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.site {
            Some(site) => write!(f, "trap: {} ({site})", self.trap),
            None => write!(f, "trap: {}", self.trap),
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.trap)
    }
}

/// Result of running code on a machine.
pub type ExecResult<T> = std::result::Result<T, ExecError>;
