use crate::types::{Val, ValType};

/// A typed global cell shared by every call on a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Global {
    pub ty: ValType,
    pub mutable: bool,
    bits: u64,
}

impl Global {
    pub fn new(init: Val, mutable: bool) -> Self {
        Global { ty: init.ty(), mutable, bits: init.to_bits() }
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Overwrites the cell regardless of mutability; the interpreter checks
    /// `mutable` before calling this.
    pub fn set_bits(&mut self, bits: u64) {
        self.bits = match self.ty {
            ValType::I32 | ValType::F32 => bits & 0xFFFF_FFFF,
            ValType::I64 | ValType::F64 => bits,
        };
    }

    pub fn value(&self) -> Val {
        Val::from_bits(self.ty, self.bits)
    }
}
