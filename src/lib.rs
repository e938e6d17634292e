//! Lumen: a stack-machine interpreter for WebAssembly-style bytecode.
//!
//! Function bodies are decoded from their binary opcode stream into a
//! nested [`ir::Instruction`] tree and run on a [`Machine`] with untyped
//! 64-bit operand cells, linear memory, globals and indirect-call tables.
//!
//! # Quick start
//!
//! ```rust
//! use lumen::{Module, Runtime, types::{FuncType, Val, ValType}, ir::{Function, Instruction, I32BinOp}};
//!
//! let mut module = Module::new();
//! let add = module.add_function(Function::new(
//!     "add",
//!     FuncType::new([ValType::I32, ValType::I32], [ValType::I32]),
//!     vec![],
//!     vec![
//!         Instruction::LocalGet(0),
//!         Instruction::LocalGet(1),
//!         Instruction::I32Binary(I32BinOp::Add),
//!     ],
//! ));
//! module.export("add", add);
//!
//! let rt = Runtime::new();
//! let mut machine = rt.instantiate(&module).unwrap();
//! let result = machine.invoke("add", &[Val::I32(3), Val::I32(4)]).unwrap();
//! assert_eq!(result, vec![Val::I32(7)]);
//! ```

pub mod decode;
pub mod frame;
pub mod global;
pub mod host;
pub mod ir;
pub mod machine;
pub mod memory;
pub mod module;
pub mod numeric;
pub mod runtime;
pub mod stack;
pub mod table;
pub mod trap;
pub mod types;

pub use decode::{DecodeError, Decoder};
pub use host::{HostFunc, HostReturn};
pub use machine::Machine;
pub use module::Module;
pub use runtime::{Config, Runtime};
pub use trap::{ExecError, Result, Trap};
pub use types::{FuncType, Val, ValType};

/// Failure of either phase, for callers that decode and run in one go.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl From<Trap> for Error {
    fn from(trap: Trap) -> Self {
        Error::Exec(trap.into())
    }
}
