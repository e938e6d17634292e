use std::fmt::{self, Write as _};
use std::sync::Arc;

use crate::host::HostFunc;
use crate::types::{FuncType, ValType};

/// Leading opcode bytes of the instructions that carry structure or
/// immediates rather than a single operation byte.
pub mod opcode {
    pub const BLOCK: u8 = 0x02;
    pub const LOOP: u8 = 0x03;
    pub const IF: u8 = 0x04;
    pub const ELSE: u8 = 0x05;
    pub const END: u8 = 0x0B;
    pub const BR: u8 = 0x0C;
    pub const BR_IF: u8 = 0x0D;
    pub const BR_TABLE: u8 = 0x0E;
    pub const CALL: u8 = 0x10;
    pub const CALL_INDIRECT: u8 = 0x11;
    pub const SELECT: u8 = 0x1B;
    pub const LOCAL_GET: u8 = 0x20;
    pub const LOCAL_SET: u8 = 0x21;
    pub const LOCAL_TEE: u8 = 0x22;
    pub const GLOBAL_GET: u8 = 0x23;
    pub const GLOBAL_SET: u8 = 0x24;
    pub const I32_CONST: u8 = 0x41;
    pub const I64_CONST: u8 = 0x42;
    pub const F32_CONST: u8 = 0x43;
    pub const F64_CONST: u8 = 0x44;
    pub const PREFIX_FC: u8 = 0xFC;
    pub const BLOCK_EMPTY: u8 = 0x40;
}

/// Declares a `#[repr(u8)]` operation enum whose discriminants are the
/// encoded opcode bytes, with byte lookup and text mnemonics.
macro_rules! opcodes {
    ($(#[$meta:meta])* pub enum $name:ident { $($variant:ident = $byte:literal => $text:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $byte,)*
        }

        impl $name {
            pub fn from_u8(byte: u8) -> Option<Self> {
                match byte {
                    $($byte => Some($name::$variant),)*
                    _ => None,
                }
            }

            pub fn opcode(self) -> u8 {
                self as u8
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)*
                }
            }
        }
    };
}

opcodes! {
    /// Operations with no immediates that consume nothing.
    pub enum NullaryOp {
        Unreachable = 0x00 => "unreachable",
        Nop = 0x01 => "nop",
        Return = 0x0F => "return",
        MemorySize = 0x3F => "memory.size",
    }
}

opcodes! {
    /// Operations that consume exactly one operand.
    pub enum UnaryOp {
        Drop = 0x1A => "drop",
        MemoryGrow = 0x40 => "memory.grow",

        // ── Integer tests and bit counts ─────────────────────────────────────
        I32Eqz = 0x45 => "i32.eqz",
        I64Eqz = 0x50 => "i64.eqz",
        I32Clz = 0x67 => "i32.clz",
        I32Ctz = 0x68 => "i32.ctz",
        I32Popcnt = 0x69 => "i32.popcnt",
        I64Clz = 0x79 => "i64.clz",
        I64Ctz = 0x7A => "i64.ctz",
        I64Popcnt = 0x7B => "i64.popcnt",

        // ── Float unary ──────────────────────────────────────────────────────
        F32Abs = 0x8B => "f32.abs",
        F32Neg = 0x8C => "f32.neg",
        F32Ceil = 0x8D => "f32.ceil",
        F32Floor = 0x8E => "f32.floor",
        F32Trunc = 0x8F => "f32.trunc",
        F32Nearest = 0x90 => "f32.nearest",
        F32Sqrt = 0x91 => "f32.sqrt",
        F64Abs = 0x99 => "f64.abs",
        F64Neg = 0x9A => "f64.neg",
        F64Ceil = 0x9B => "f64.ceil",
        F64Floor = 0x9C => "f64.floor",
        F64Trunc = 0x9D => "f64.trunc",
        F64Nearest = 0x9E => "f64.nearest",
        F64Sqrt = 0x9F => "f64.sqrt",

        // ── Conversions ──────────────────────────────────────────────────────
        I32WrapI64 = 0xA7 => "i32.wrap_i64",
        I32TruncF32S = 0xA8 => "i32.trunc_f32_s",
        I32TruncF32U = 0xA9 => "i32.trunc_f32_u",
        I32TruncF64S = 0xAA => "i32.trunc_f64_s",
        I32TruncF64U = 0xAB => "i32.trunc_f64_u",
        I64ExtendI32S = 0xAC => "i64.extend_i32_s",
        I64ExtendI32U = 0xAD => "i64.extend_i32_u",
        I64TruncF32S = 0xAE => "i64.trunc_f32_s",
        I64TruncF32U = 0xAF => "i64.trunc_f32_u",
        I64TruncF64S = 0xB0 => "i64.trunc_f64_s",
        I64TruncF64U = 0xB1 => "i64.trunc_f64_u",
        F32ConvertI32S = 0xB2 => "f32.convert_i32_s",
        F32ConvertI32U = 0xB3 => "f32.convert_i32_u",
        F32ConvertI64S = 0xB4 => "f32.convert_i64_s",
        F32ConvertI64U = 0xB5 => "f32.convert_i64_u",
        F32DemoteF64 = 0xB6 => "f32.demote_f64",
        F64ConvertI32S = 0xB7 => "f64.convert_i32_s",
        F64ConvertI32U = 0xB8 => "f64.convert_i32_u",
        F64ConvertI64S = 0xB9 => "f64.convert_i64_s",
        F64ConvertI64U = 0xBA => "f64.convert_i64_u",
        F64PromoteF32 = 0xBB => "f64.promote_f32",
        I32ReinterpretF32 = 0xBC => "i32.reinterpret_f32",
        I64ReinterpretF64 = 0xBD => "i64.reinterpret_f64",
        F32ReinterpretI32 = 0xBE => "f32.reinterpret_i32",
        F64ReinterpretI64 = 0xBF => "f64.reinterpret_i64",

        // ── Sign extension ───────────────────────────────────────────────────
        I32Extend8S = 0xC0 => "i32.extend8_s",
        I32Extend16S = 0xC1 => "i32.extend16_s",
        I64Extend8S = 0xC2 => "i64.extend8_s",
        I64Extend16S = 0xC3 => "i64.extend16_s",
        I64Extend32S = 0xC4 => "i64.extend32_s",
    }
}

opcodes! {
    /// Two i32 operands: comparisons push an i32 flag, the rest an i32.
    pub enum I32BinOp {
        Eq = 0x46 => "i32.eq",
        Ne = 0x47 => "i32.ne",
        LtS = 0x48 => "i32.lt_s",
        LtU = 0x49 => "i32.lt_u",
        GtS = 0x4A => "i32.gt_s",
        GtU = 0x4B => "i32.gt_u",
        LeS = 0x4C => "i32.le_s",
        LeU = 0x4D => "i32.le_u",
        GeS = 0x4E => "i32.ge_s",
        GeU = 0x4F => "i32.ge_u",
        Add = 0x6A => "i32.add",
        Sub = 0x6B => "i32.sub",
        Mul = 0x6C => "i32.mul",
        DivS = 0x6D => "i32.div_s",
        DivU = 0x6E => "i32.div_u",
        RemS = 0x6F => "i32.rem_s",
        RemU = 0x70 => "i32.rem_u",
        And = 0x71 => "i32.and",
        Or = 0x72 => "i32.or",
        Xor = 0x73 => "i32.xor",
        Shl = 0x74 => "i32.shl",
        ShrS = 0x75 => "i32.shr_s",
        ShrU = 0x76 => "i32.shr_u",
        Rotl = 0x77 => "i32.rotl",
        Rotr = 0x78 => "i32.rotr",
    }
}

opcodes! {
    pub enum I64BinOp {
        Eq = 0x51 => "i64.eq",
        Ne = 0x52 => "i64.ne",
        LtS = 0x53 => "i64.lt_s",
        LtU = 0x54 => "i64.lt_u",
        GtS = 0x55 => "i64.gt_s",
        GtU = 0x56 => "i64.gt_u",
        LeS = 0x57 => "i64.le_s",
        LeU = 0x58 => "i64.le_u",
        GeS = 0x59 => "i64.ge_s",
        GeU = 0x5A => "i64.ge_u",
        Add = 0x7C => "i64.add",
        Sub = 0x7D => "i64.sub",
        Mul = 0x7E => "i64.mul",
        DivS = 0x7F => "i64.div_s",
        DivU = 0x80 => "i64.div_u",
        RemS = 0x81 => "i64.rem_s",
        RemU = 0x82 => "i64.rem_u",
        And = 0x83 => "i64.and",
        Or = 0x84 => "i64.or",
        Xor = 0x85 => "i64.xor",
        Shl = 0x86 => "i64.shl",
        ShrS = 0x87 => "i64.shr_s",
        ShrU = 0x88 => "i64.shr_u",
        Rotl = 0x89 => "i64.rotl",
        Rotr = 0x8A => "i64.rotr",
    }
}

opcodes! {
    pub enum F32BinOp {
        Eq = 0x5B => "f32.eq",
        Ne = 0x5C => "f32.ne",
        Lt = 0x5D => "f32.lt",
        Gt = 0x5E => "f32.gt",
        Le = 0x5F => "f32.le",
        Ge = 0x60 => "f32.ge",
        Add = 0x92 => "f32.add",
        Sub = 0x93 => "f32.sub",
        Mul = 0x94 => "f32.mul",
        Div = 0x95 => "f32.div",
        Min = 0x96 => "f32.min",
        Max = 0x97 => "f32.max",
        Copysign = 0x98 => "f32.copysign",
    }
}

opcodes! {
    pub enum F64BinOp {
        Eq = 0x61 => "f64.eq",
        Ne = 0x62 => "f64.ne",
        Lt = 0x63 => "f64.lt",
        Gt = 0x64 => "f64.gt",
        Le = 0x65 => "f64.le",
        Ge = 0x66 => "f64.ge",
        Add = 0xA0 => "f64.add",
        Sub = 0xA1 => "f64.sub",
        Mul = 0xA2 => "f64.mul",
        Div = 0xA3 => "f64.div",
        Min = 0xA4 => "f64.min",
        Max = 0xA5 => "f64.max",
        Copysign = 0xA6 => "f64.copysign",
    }
}

opcodes! {
    /// Saturating truncations, encoded as `0xFC` followed by the sub-opcode.
    pub enum SatOp {
        I32TruncSatF32S = 0 => "i32.trunc_sat_f32_s",
        I32TruncSatF32U = 1 => "i32.trunc_sat_f32_u",
        I32TruncSatF64S = 2 => "i32.trunc_sat_f64_s",
        I32TruncSatF64U = 3 => "i32.trunc_sat_f64_u",
        I64TruncSatF32S = 4 => "i64.trunc_sat_f32_s",
        I64TruncSatF32U = 5 => "i64.trunc_sat_f32_u",
        I64TruncSatF64S = 6 => "i64.trunc_sat_f64_s",
        I64TruncSatF64U = 7 => "i64.trunc_sat_f64_u",
    }
}

opcodes! {
    pub enum LoadOp {
        I32Load = 0x28 => "i32.load",
        I64Load = 0x29 => "i64.load",
        F32Load = 0x2A => "f32.load",
        F64Load = 0x2B => "f64.load",
        I32Load8S = 0x2C => "i32.load8_s",
        I32Load8U = 0x2D => "i32.load8_u",
        I32Load16S = 0x2E => "i32.load16_s",
        I32Load16U = 0x2F => "i32.load16_u",
        I64Load8S = 0x30 => "i64.load8_s",
        I64Load8U = 0x31 => "i64.load8_u",
        I64Load16S = 0x32 => "i64.load16_s",
        I64Load16U = 0x33 => "i64.load16_u",
        I64Load32S = 0x34 => "i64.load32_s",
        I64Load32U = 0x35 => "i64.load32_u",
    }
}

opcodes! {
    pub enum StoreOp {
        I32Store = 0x36 => "i32.store",
        I64Store = 0x37 => "i64.store",
        F32Store = 0x38 => "f32.store",
        F64Store = 0x39 => "f64.store",
        I32Store8 = 0x3A => "i32.store8",
        I32Store16 = 0x3B => "i32.store16",
        I64Store8 = 0x3C => "i64.store8",
        I64Store16 = 0x3D => "i64.store16",
        I64Store32 = 0x3E => "i64.store32",
    }
}

/// Alignment hint and constant offset of a load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemArg {
    pub align: u32,
    pub offset: u32,
}

impl MemArg {
    pub fn new(align: u32, offset: u32) -> Self {
        MemArg { align, offset }
    }
}

/// Result type of a structured block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValType),
}

impl BlockType {
    pub fn arity(self) -> usize {
        match self {
            BlockType::Empty => 0,
            BlockType::Value(_) => 1,
        }
    }
}

/// One decoded instruction with all immediates resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // ── Plain operations ─────────────────────────────────────────────────────
    Nullary(NullaryOp),
    Unary(UnaryOp),
    I32Binary(I32BinOp),
    I64Binary(I64BinOp),
    F32Binary(F32BinOp),
    F64Binary(F64BinOp),
    Saturating(SatOp),

    // ── Memory ───────────────────────────────────────────────────────────────
    Load(LoadOp, MemArg),
    Store(StoreOp, MemArg),

    // ── Constants ────────────────────────────────────────────────────────────
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),

    // ── Variables ────────────────────────────────────────────────────────────
    Select,
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // ── Calls ────────────────────────────────────────────────────────────────
    Call(u32),
    CallIndirect { type_index: u32, table_index: u32 },

    // ── Control flow ─────────────────────────────────────────────────────────
    Block { ty: BlockType, body: Vec<Instruction> },
    Loop { ty: BlockType, body: Vec<Instruction> },
    If { ty: BlockType, then: Vec<Instruction>, otherwise: Vec<Instruction> },
    Br(u32),
    BrIf(u32),
    BrTable { targets: Vec<u32>, default: u32 },
}

impl Instruction {
    /// The leading byte of this instruction's encoding.
    pub fn opcode(&self) -> u8 {
        use Instruction::*;
        match self {
            Nullary(op) => op.opcode(),
            Unary(op) => op.opcode(),
            I32Binary(op) => op.opcode(),
            I64Binary(op) => op.opcode(),
            F32Binary(op) => op.opcode(),
            F64Binary(op) => op.opcode(),
            Saturating(_) => opcode::PREFIX_FC,
            Load(op, _) => op.opcode(),
            Store(op, _) => op.opcode(),
            I32Const(_) => opcode::I32_CONST,
            I64Const(_) => opcode::I64_CONST,
            F32Const(_) => opcode::F32_CONST,
            F64Const(_) => opcode::F64_CONST,
            Select => opcode::SELECT,
            LocalGet(_) => opcode::LOCAL_GET,
            LocalSet(_) => opcode::LOCAL_SET,
            LocalTee(_) => opcode::LOCAL_TEE,
            GlobalGet(_) => opcode::GLOBAL_GET,
            GlobalSet(_) => opcode::GLOBAL_SET,
            Call(_) => opcode::CALL,
            CallIndirect { .. } => opcode::CALL_INDIRECT,
            Block { .. } => opcode::BLOCK,
            Loop { .. } => opcode::LOOP,
            If { .. } => opcode::IF,
            Br(_) => opcode::BR,
            BrIf(_) => opcode::BR_IF,
            BrTable { .. } => opcode::BR_TABLE,
        }
    }

    pub fn nop() -> Self {
        Instruction::Nullary(NullaryOp::Nop)
    }

    pub fn ret() -> Self {
        Instruction::Nullary(NullaryOp::Return)
    }

    pub fn drop() -> Self {
        Instruction::Unary(UnaryOp::Drop)
    }
}

/// Single-line rendering. Nested bodies are not printed; see [`disassemble`].
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match self {
            Nullary(op) => f.write_str(op.mnemonic()),
            Unary(op) => f.write_str(op.mnemonic()),
            I32Binary(op) => f.write_str(op.mnemonic()),
            I64Binary(op) => f.write_str(op.mnemonic()),
            F32Binary(op) => f.write_str(op.mnemonic()),
            F64Binary(op) => f.write_str(op.mnemonic()),
            Saturating(op) => f.write_str(op.mnemonic()),
            Load(op, m) => write!(f, "{} align={} offset={}", op.mnemonic(), m.align, m.offset),
            Store(op, m) => write!(f, "{} align={} offset={}", op.mnemonic(), m.align, m.offset),
            I32Const(v) => write!(f, "i32.const {v}"),
            I64Const(v) => write!(f, "i64.const {v}"),
            F32Const(v) => write!(f, "f32.const {v}"),
            F64Const(v) => write!(f, "f64.const {v}"),
            Select => f.write_str("select"),
            LocalGet(i) => write!(f, "local.get {i}"),
            LocalSet(i) => write!(f, "local.set {i}"),
            LocalTee(i) => write!(f, "local.tee {i}"),
            GlobalGet(i) => write!(f, "global.get {i}"),
            GlobalSet(i) => write!(f, "global.set {i}"),
            Call(i) => write!(f, "call {i}"),
            CallIndirect { type_index, table_index } => {
                write!(f, "call_indirect type={type_index} table={table_index}")
            }
            Block { ty, .. } => write!(f, "block{}", BlockTypeSuffix(*ty)),
            Loop { ty, .. } => write!(f, "loop{}", BlockTypeSuffix(*ty)),
            If { ty, .. } => write!(f, "if{}", BlockTypeSuffix(*ty)),
            Br(d) => write!(f, "br {d}"),
            BrIf(d) => write!(f, "br_if {d}"),
            BrTable { targets, default } => {
                f.write_str("br_table")?;
                for t in targets {
                    write!(f, " {t}")?;
                }
                write!(f, " {default}")
            }
        }
    }
}

struct BlockTypeSuffix(BlockType);

impl fmt::Display for BlockTypeSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            BlockType::Empty => Ok(()),
            BlockType::Value(ty) => write!(f, " (result {ty})"),
        }
    }
}

/// Renders an instruction sequence as an indented tree, one instruction
/// per line, with `else`/`end` closing nested bodies.
pub fn disassemble(code: &[Instruction]) -> String {
    let mut out = String::new();
    write_tree(&mut out, code, 0);
    out
}

fn write_tree(out: &mut String, code: &[Instruction], depth: usize) {
    for ins in code {
        let pad = "  ".repeat(depth);
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{pad}{ins}");
        match ins {
            Instruction::Block { body, .. } | Instruction::Loop { body, .. } => {
                write_tree(out, body, depth + 1);
                let _ = writeln!(out, "{pad}end");
            }
            Instruction::If { then, otherwise, .. } => {
                write_tree(out, then, depth + 1);
                if !otherwise.is_empty() {
                    let _ = writeln!(out, "{pad}else");
                    write_tree(out, otherwise, depth + 1);
                }
                let _ = writeln!(out, "{pad}end");
            }
            _ => {}
        }
    }
}

/// What a function runs when called.
#[derive(Debug, Clone)]
pub enum FuncBody {
    /// Interpreted instructions. `Arc` so recursive calls share one body.
    Code(Arc<Vec<Instruction>>),
    Host(HostFunc),
}

/// A callable function: signature, extra locals and body.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ty: FuncType,
    pub locals: Vec<ValType>, // extra locals beyond params
    pub body: FuncBody,
}

impl Function {
    pub fn new(
        name: impl Into<String>,
        ty: FuncType,
        locals: Vec<ValType>,
        body: Vec<Instruction>,
    ) -> Self {
        Function {
            name: name.into(),
            ty,
            locals,
            body: FuncBody::Code(Arc::new(body)),
        }
    }

    /// A function implemented by the embedder.
    pub fn host(name: impl Into<String>, func: HostFunc) -> Self {
        Function {
            name: name.into(),
            ty: func.ty().clone(),
            locals: Vec::new(),
            body: FuncBody::Host(func),
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self.body, FuncBody::Host(_))
    }
}
