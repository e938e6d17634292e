use std::fmt;

/// Primitive value types, tagged with their binary encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValType {
    I32 = 0x7F,
    I64 = 0x7E,
    F32 = 0x7D,
    F64 = 0x7C,
}

impl ValType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x7F => Some(ValType::I32),
            0x7E => Some(ValType::I64),
            0x7D => Some(ValType::F32),
            0x7C => Some(ValType::F64),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "i32" => Some(ValType::I32),
            "i64" => Some(ValType::I64),
            "f32" => Some(ValType::F32),
            "f64" => Some(ValType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
        })
    }
}

/// Function signature. Two signatures are the same type when their
/// parameter and result lists are equal element by element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: impl Into<Vec<ValType>>, results: impl Into<Vec<ValType>>) -> Self {
        FuncType { params: params.into(), results: results.into() }
    }

    pub fn is_void(&self) -> bool {
        self.results.is_empty()
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |tys: &[ValType]| {
            tys.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
        };
        write!(f, "(param {}) (result {})", join(&self.params), join(&self.results))
    }
}

/// A typed runtime value, used wherever values cross the machine boundary.
///
/// Inside the machine every value is an untagged `u64` cell; `to_bits` and
/// `from_bits` are the only conversions between the two views. i32 and f32
/// occupy the low 32 bits of a cell, the upper half is zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Val {
    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(_) => ValType::I32,
            Val::I64(_) => ValType::I64,
            Val::F32(_) => ValType::F32,
            Val::F64(_) => ValType::F64,
        }
    }

    pub fn as_i32(self) -> Option<i32> {
        if let Val::I32(v) = self {
            Some(v)
        } else {
            None
        }
    }
    pub fn as_i64(self) -> Option<i64> {
        if let Val::I64(v) = self {
            Some(v)
        } else {
            None
        }
    }
    pub fn as_f32(self) -> Option<f32> {
        if let Val::F32(v) = self {
            Some(v)
        } else {
            None
        }
    }
    pub fn as_f64(self) -> Option<f64> {
        if let Val::F64(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn default_for(ty: ValType) -> Val {
        match ty {
            ValType::I32 => Val::I32(0),
            ValType::I64 => Val::I64(0),
            ValType::F32 => Val::F32(0.0),
            ValType::F64 => Val::F64(0.0),
        }
    }

    /// The cell bit pattern of this value.
    pub fn to_bits(self) -> u64 {
        match self {
            Val::I32(v) => u64::from(v as u32),
            Val::I64(v) => v as u64,
            Val::F32(v) => u64::from(v.to_bits()),
            Val::F64(v) => v.to_bits(),
        }
    }

    /// Reads a cell as a value of type `ty`. 32-bit types use the low half.
    pub fn from_bits(ty: ValType, bits: u64) -> Val {
        match ty {
            ValType::I32 => Val::I32(bits as u32 as i32),
            ValType::I64 => Val::I64(bits as i64),
            ValType::F32 => Val::F32(f32::from_bits(bits as u32)),
            ValType::F64 => Val::F64(f64::from_bits(bits)),
        }
    }

    /// Parses `text` as a value of type `ty`.
    pub fn parse(ty: ValType, text: &str) -> Option<Val> {
        match ty {
            ValType::I32 => text.parse().ok().map(Val::I32),
            ValType::I64 => text.parse().ok().map(Val::I64),
            ValType::F32 => text.parse().ok().map(Val::F32),
            ValType::F64 => text.parse().ok().map(Val::F64),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::I32(v) => write!(f, "i32:{v}"),
            Val::I64(v) => write!(f, "i64:{v}"),
            Val::F32(v) => write!(f, "f32:{v}"),
            Val::F64(v) => write!(f, "f64:{v}"),
        }
    }
}
