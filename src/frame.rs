use crate::stack::OperandStack;
use crate::trap::{Result, Trap};
use crate::types::{Val, ValType};

/// A local slot: declared type plus its current cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    pub ty: ValType,
    pub bits: u64,
}

/// Locals of one activation: parameters first, then declared locals.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    vars: Vec<Variable>,
}

impl Frame {
    /// Pops `params` off `stack` (the first pushed argument becomes local
    /// 0) and appends zeroed `locals`.
    pub fn enter(stack: &mut OperandStack, params: &[ValType], locals: &[ValType]) -> Result<Self> {
        let args = stack.top(params.len())?;
        let mut vars = Vec::with_capacity(params.len() + locals.len());
        vars.extend(
            params
                .iter()
                .zip(args)
                .map(|(&ty, &bits)| Variable { ty, bits: mask(ty, bits) }),
        );
        let base = stack.len() - params.len();
        stack.truncate(base);
        vars.extend(locals.iter().map(|&ty| Variable { ty, bits: 0 }));
        Ok(Frame { vars })
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    #[inline]
    pub fn get(&self, index: u32) -> Result<u64> {
        self.vars
            .get(index as usize)
            .map(|v| v.bits)
            .ok_or(Trap::UndefinedLocal(index))
    }

    /// Stores `bits`, truncated to the slot's width.
    #[inline]
    pub fn set(&mut self, index: u32, bits: u64) -> Result<()> {
        let var = self.vars.get_mut(index as usize).ok_or(Trap::UndefinedLocal(index))?;
        var.bits = mask(var.ty, bits);
        Ok(())
    }

    pub fn value(&self, index: u32) -> Result<Val> {
        let var = self.vars.get(index as usize).ok_or(Trap::UndefinedLocal(index))?;
        Ok(Val::from_bits(var.ty, var.bits))
    }
}

fn mask(ty: ValType, bits: u64) -> u64 {
    match ty {
        ValType::I32 | ValType::F32 => bits & 0xFFFF_FFFF,
        ValType::I64 | ValType::F64 => bits,
    }
}
