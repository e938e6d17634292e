//! Binary function-body decoder.
//!
//! Turns the raw opcode stream of one function body into a nested
//! [`Instruction`] tree. Block, loop and if bodies are decoded recursively
//! up to their matching `end`, so the interpreter never scans for jump
//! targets.

use log::trace;
use thiserror::Error;

use crate::ir::{
    opcode, BlockType, F32BinOp, F64BinOp, I32BinOp, I64BinOp, Instruction, LoadOp, MemArg,
    NullaryOp, SatOp, StoreOp, UnaryOp,
};
use crate::types::ValType;

/// Upper bound on the locals one code entry may declare.
pub const MAX_LOCALS: u64 = 50_000;

/// Deepest `block`/`loop`/`if` nesting a body may have. Nested bodies are
/// decoded recursively, so this also bounds native stack use.
pub const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {byte:#04x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("unknown sub-opcode {sub} after prefix {prefix:#04x} at offset {offset}")]
    UnknownPrefixedOpcode { prefix: u8, sub: u32, offset: usize },
    #[error("unexpected end of stream at offset {offset}")]
    UnexpectedEof { offset: usize },
    #[error("malformed LEB128 integer at offset {offset}")]
    MalformedLeb { offset: usize },
    #[error("invalid value type {byte:#04x} at offset {offset}")]
    InvalidValueType { byte: u8, offset: usize },
    #[error("invalid block type {byte:#04x} at offset {offset}")]
    InvalidBlockType { byte: u8, offset: usize },
    #[error("unexpected {byte:#04x} outside a block at offset {offset}")]
    UnexpectedOpcode { byte: u8, offset: usize },
    #[error("expected end marker 0x0b at offset {offset}, found {found:?}")]
    MissingEndMarker { found: Option<u8>, offset: usize },
    #[error("reserved byte must be zero, found {byte:#04x} at offset {offset}")]
    InvalidReserved { byte: u8, offset: usize },
    #[error("body length mismatch: expected {expected} bytes, decoded {consumed}")]
    LengthMismatch { expected: usize, consumed: usize },
    #[error("too many locals ({count}) at offset {offset}")]
    TooManyLocals { count: u64, offset: usize },
    #[error("blocks nested deeper than {} at offset {offset}", MAX_NESTING)]
    NestingTooDeep { offset: usize },
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Locals and instructions of one code-section entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeEntry {
    pub locals: Vec<ValType>,
    pub body: Vec<Instruction>,
}

/// How a nested sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminator {
    End,
    Else,
}

enum Step {
    Instr(Instruction),
    Terminator(Terminator),
}

/// A cursor over encoded bytes.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Decoder { bytes, pos: 0, depth: 0 }
    }

    /// Current offset into the stream.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    // ── Primitive reads ──────────────────────────────────────────────────────

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(DecodeError::UnexpectedEof { offset: self.bytes.len() })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    /// Unsigned LEB128, at most 5 bytes, value must fit in 32 bits.
    pub fn read_var_u32(&mut self) -> Result<u32> {
        let start = self.pos;
        let mut result: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift == 28 && byte & 0xF0 != 0 {
                return Err(DecodeError::MalformedLeb { offset: start });
            }
            result |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 28 {
                return Err(DecodeError::MalformedLeb { offset: start });
            }
        }
    }

    /// Signed LEB128 into 32 bits.
    pub fn read_var_i32(&mut self) -> Result<i32> {
        let start = self.pos;
        let v = self.read_signed(32)?;
        i32::try_from(v).map_err(|_| DecodeError::MalformedLeb { offset: start })
    }

    /// Signed LEB128 into 64 bits.
    pub fn read_var_i64(&mut self) -> Result<i64> {
        self.read_signed(64)
    }

    fn read_signed(&mut self, bits: u32) -> Result<i64> {
        let start = self.pos;
        let max_bytes = (bits + 6) / 7;
        let mut result: i64 = 0;
        let mut shift: u32 = 0;
        for _ in 0..max_bytes {
            let byte = self.read_u8()?;
            // The tenth byte of a 64-bit value holds only the sign bit.
            if shift == 63 && byte != 0x00 && byte != 0x7F {
                return Err(DecodeError::MalformedLeb { offset: start });
            }
            if shift < 64 {
                result |= i64::from(byte & 0x7F) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }
        Err(DecodeError::MalformedLeb { offset: start })
    }

    /// Raw little-endian IEEE-754 bits.
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(u32::from_le_bytes(self.read_array()?)))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_le_bytes(self.read_array()?)))
    }

    fn read_val_type(&mut self) -> Result<ValType> {
        let offset = self.pos;
        let byte = self.read_u8()?;
        ValType::from_u8(byte).ok_or(DecodeError::InvalidValueType { byte, offset })
    }

    fn read_block_type(&mut self) -> Result<BlockType> {
        let offset = self.pos;
        let byte = self.read_u8()?;
        if byte == opcode::BLOCK_EMPTY {
            return Ok(BlockType::Empty);
        }
        ValType::from_u8(byte)
            .map(BlockType::Value)
            .ok_or(DecodeError::InvalidBlockType { byte, offset })
    }

    fn read_mem_arg(&mut self) -> Result<MemArg> {
        let align = self.read_var_u32()?;
        let offset = self.read_var_u32()?;
        Ok(MemArg { align, offset })
    }

    fn read_reserved(&mut self) -> Result<()> {
        let offset = self.pos;
        match self.read_u8()? {
            0 => Ok(()),
            byte => Err(DecodeError::InvalidReserved { byte, offset }),
        }
    }

    // ── Bodies ───────────────────────────────────────────────────────────────

    /// Decodes `length - 1` bytes of instructions. `length` counts the
    /// trailing end marker, which must follow and is left unconsumed.
    pub fn decode_body(&mut self, length: usize) -> Result<Vec<Instruction>> {
        let start = self.pos;
        let Some(expected) = length.checked_sub(1) else {
            return Err(DecodeError::MissingEndMarker { found: None, offset: start });
        };
        let end = start + expected;

        let mut code = Vec::new();
        while self.pos < end {
            let offset = self.pos;
            match self.read_instruction()? {
                Step::Instr(ins) => code.push(ins),
                Step::Terminator(_) => {
                    let byte = self.bytes[offset];
                    return Err(DecodeError::UnexpectedOpcode { byte, offset });
                }
            }
        }

        if self.pos != end {
            return Err(DecodeError::LengthMismatch {
                expected,
                consumed: self.pos - start,
            });
        }
        match self.bytes.get(end) {
            Some(&opcode::END) => Ok(code),
            found => Err(DecodeError::MissingEndMarker { found: found.copied(), offset: end }),
        }
    }

    /// Decodes a whole code-section entry: byte size, local declaration
    /// groups, then the body including its end marker.
    pub fn decode_code_entry(&mut self) -> Result<CodeEntry> {
        let size = self.read_var_u32()? as usize;
        let start = self.pos;

        let groups = self.read_var_u32()?;
        let mut locals = Vec::new();
        let mut total: u64 = 0;
        for _ in 0..groups {
            let offset = self.pos;
            let count = self.read_var_u32()?;
            total += u64::from(count);
            if total > MAX_LOCALS {
                return Err(DecodeError::TooManyLocals { count: total, offset });
            }
            let ty = self.read_val_type()?;
            locals.extend(std::iter::repeat(ty).take(count as usize));
        }

        let header = self.pos - start;
        let remaining = size.checked_sub(header).ok_or(DecodeError::LengthMismatch {
            expected: size,
            consumed: header,
        })?;
        let body = self.decode_body(remaining)?;
        self.pos += 1; // end marker
        Ok(CodeEntry { locals, body })
    }

    /// Decodes instructions until the `end` (or `else`) closing the
    /// current block.
    fn decode_nested(&mut self, offset: usize) -> Result<(Vec<Instruction>, Terminator)> {
        if self.depth >= MAX_NESTING {
            return Err(DecodeError::NestingTooDeep { offset });
        }
        self.depth += 1;
        let mut code = Vec::new();
        let term = loop {
            match self.read_instruction()? {
                Step::Instr(ins) => code.push(ins),
                Step::Terminator(t) => break t,
            }
        };
        self.depth -= 1;
        Ok((code, term))
    }

    fn read_instruction(&mut self) -> Result<Step> {
        let offset = self.pos;
        let byte = self.read_u8()?;
        trace!("decode {byte:#04x} at {offset}");

        let ins = match byte {
            // ── Structure ────────────────────────────────────────────────────
            opcode::END => return Ok(Step::Terminator(Terminator::End)),
            opcode::ELSE => return Ok(Step::Terminator(Terminator::Else)),
            opcode::BLOCK | opcode::LOOP => {
                let ty = self.read_block_type()?;
                let (body, term) = self.decode_nested(offset)?;
                if term == Terminator::Else {
                    return Err(DecodeError::UnexpectedOpcode {
                        byte: opcode::ELSE,
                        offset: self.pos - 1,
                    });
                }
                if byte == opcode::BLOCK {
                    Instruction::Block { ty, body }
                } else {
                    Instruction::Loop { ty, body }
                }
            }
            opcode::IF => {
                let ty = self.read_block_type()?;
                let (then, term) = self.decode_nested(offset)?;
                let otherwise = match term {
                    Terminator::End => Vec::new(),
                    Terminator::Else => {
                        let (otherwise, term) = self.decode_nested(offset)?;
                        if term == Terminator::Else {
                            return Err(DecodeError::UnexpectedOpcode {
                                byte: opcode::ELSE,
                                offset: self.pos - 1,
                            });
                        }
                        otherwise
                    }
                };
                Instruction::If { ty, then, otherwise }
            }

            // ── Branches and calls ───────────────────────────────────────────
            opcode::BR => Instruction::Br(self.read_var_u32()?),
            opcode::BR_IF => Instruction::BrIf(self.read_var_u32()?),
            opcode::BR_TABLE => {
                let count = self.read_var_u32()?;
                let mut targets = Vec::with_capacity((count as usize).min(1024));
                for _ in 0..count {
                    targets.push(self.read_var_u32()?);
                }
                let default = self.read_var_u32()?;
                Instruction::BrTable { targets, default }
            }
            opcode::CALL => Instruction::Call(self.read_var_u32()?),
            opcode::CALL_INDIRECT => {
                let type_index = self.read_var_u32()?;
                let table_index = self.read_var_u32()?;
                Instruction::CallIndirect { type_index, table_index }
            }

            // ── Variables ────────────────────────────────────────────────────
            opcode::SELECT => Instruction::Select,
            opcode::LOCAL_GET => Instruction::LocalGet(self.read_var_u32()?),
            opcode::LOCAL_SET => Instruction::LocalSet(self.read_var_u32()?),
            opcode::LOCAL_TEE => Instruction::LocalTee(self.read_var_u32()?),
            opcode::GLOBAL_GET => Instruction::GlobalGet(self.read_var_u32()?),
            opcode::GLOBAL_SET => Instruction::GlobalSet(self.read_var_u32()?),

            // ── Constants ────────────────────────────────────────────────────
            opcode::I32_CONST => Instruction::I32Const(self.read_var_i32()?),
            opcode::I64_CONST => Instruction::I64Const(self.read_var_i64()?),
            opcode::F32_CONST => Instruction::F32Const(self.read_f32()?),
            opcode::F64_CONST => Instruction::F64Const(self.read_f64()?),

            opcode::PREFIX_FC => {
                let sub = self.read_var_u32()?;
                let op = u8::try_from(sub).ok().and_then(SatOp::from_u8).ok_or(
                    DecodeError::UnknownPrefixedOpcode { prefix: byte, sub, offset },
                )?;
                Instruction::Saturating(op)
            }

            _ => self.read_plain(byte, offset)?,
        };
        Ok(Step::Instr(ins))
    }

    /// Single-byte operations, memory accesses and memory size/grow.
    fn read_plain(&mut self, byte: u8, offset: usize) -> Result<Instruction> {
        if let Some(op) = LoadOp::from_u8(byte) {
            return Ok(Instruction::Load(op, self.read_mem_arg()?));
        }
        if let Some(op) = StoreOp::from_u8(byte) {
            return Ok(Instruction::Store(op, self.read_mem_arg()?));
        }
        if let Some(op) = NullaryOp::from_u8(byte) {
            if op == NullaryOp::MemorySize {
                self.read_reserved()?;
            }
            return Ok(Instruction::Nullary(op));
        }
        if let Some(op) = UnaryOp::from_u8(byte) {
            if op == UnaryOp::MemoryGrow {
                self.read_reserved()?;
            }
            return Ok(Instruction::Unary(op));
        }
        if let Some(op) = I32BinOp::from_u8(byte) {
            return Ok(Instruction::I32Binary(op));
        }
        if let Some(op) = I64BinOp::from_u8(byte) {
            return Ok(Instruction::I64Binary(op));
        }
        if let Some(op) = F32BinOp::from_u8(byte) {
            return Ok(Instruction::F32Binary(op));
        }
        if let Some(op) = F64BinOp::from_u8(byte) {
            return Ok(Instruction::F64Binary(op));
        }
        Err(DecodeError::UnknownOpcode { byte, offset })
    }
}

/// Decodes a standalone body: the whole slice is instructions followed by
/// a final end marker.
pub fn decode_function_body(bytes: &[u8]) -> Result<Vec<Instruction>> {
    Decoder::new(bytes).decode_body(bytes.len())
}
