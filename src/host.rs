//! Native functions callable from guest code.
//!
//! A host function receives its arguments as typed values in parameter
//! order and hands back a [`HostReturn`]. Whatever shape it returns is
//! flattened and checked against the declared result types before the
//! values reach the operand stack.

use std::fmt;
use std::sync::Arc;

use crate::trap::{Result, Trap};
use crate::types::{FuncType, Val};

/// Signature of the closure behind a [`HostFunc`].
pub type HostFn = dyn Fn(&[Val]) -> Result<HostReturn> + Send + Sync;

/// What a host function produced.
#[derive(Debug, Clone, PartialEq)]
pub enum HostReturn {
    Unit,
    Single(Val),
    I32s(Vec<i32>),
    I64s(Vec<i64>),
    F32s(Vec<f32>),
    F64s(Vec<f64>),
    /// Mixed result types, in declaration order.
    Tuple(Vec<Val>),
}

impl HostReturn {
    pub fn into_vals(self) -> Vec<Val> {
        match self {
            HostReturn::Unit => Vec::new(),
            HostReturn::Single(v) => vec![v],
            HostReturn::I32s(vs) => vs.into_iter().map(Val::I32).collect(),
            HostReturn::I64s(vs) => vs.into_iter().map(Val::I64).collect(),
            HostReturn::F32s(vs) => vs.into_iter().map(Val::F32).collect(),
            HostReturn::F64s(vs) => vs.into_iter().map(Val::F64).collect(),
            HostReturn::Tuple(vs) => vs,
        }
    }
}

impl From<()> for HostReturn {
    fn from(_: ()) -> Self {
        HostReturn::Unit
    }
}

impl From<Val> for HostReturn {
    fn from(v: Val) -> Self {
        HostReturn::Single(v)
    }
}

impl From<i32> for HostReturn {
    fn from(v: i32) -> Self {
        HostReturn::Single(Val::I32(v))
    }
}

impl From<i64> for HostReturn {
    fn from(v: i64) -> Self {
        HostReturn::Single(Val::I64(v))
    }
}

impl From<f32> for HostReturn {
    fn from(v: f32) -> Self {
        HostReturn::Single(Val::F32(v))
    }
}

impl From<f64> for HostReturn {
    fn from(v: f64) -> Self {
        HostReturn::Single(Val::F64(v))
    }
}

/// A typed native callable. Cloning shares the closure.
#[derive(Clone)]
pub struct HostFunc {
    ty: FuncType,
    func: Arc<HostFn>,
}

impl HostFunc {
    pub fn new<F>(ty: FuncType, func: F) -> Self
    where
        F: Fn(&[Val]) -> Result<HostReturn> + Send + Sync + 'static,
    {
        HostFunc { ty, func: Arc::new(func) }
    }

    pub fn ty(&self) -> &FuncType {
        &self.ty
    }

    /// Runs the closure and returns its results in declaration order.
    pub fn invoke(&self, args: &[Val]) -> Result<Vec<Val>> {
        let vals = (self.func)(args)?.into_vals();
        let matches = vals.len() == self.ty.results.len()
            && vals.iter().zip(&self.ty.results).all(|(v, &ty)| v.ty() == ty);
        if !matches {
            return Err(Trap::HostSignatureMismatch);
        }
        Ok(vals)
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc").field("ty", &self.ty).finish_non_exhaustive()
    }
}
