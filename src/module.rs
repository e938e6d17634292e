//! Module assembly.
//!
//! A [`Module`] is the static description a machine is instantiated from:
//! signatures, functions, exports, tables, globals and the initial memory
//! image. Everything is supplied by the embedder through the builder
//! methods; only function bodies are ever decoded from bytes.

use crate::{
    decode::{self, Decoder},
    global::Global,
    host::{HostFunc, HostReturn},
    ir::Function,
    table::Table,
    trap::Result,
    types::{FuncType, Val},
};

/// A module description, ready to be instantiated.
pub struct Module {
    /// Signatures referenced by `call_indirect`.
    pub types: Vec<FuncType>,
    /// Guest and host functions, in index order.
    pub functions: Vec<Function>,
    /// Exported function names → function index.
    pub exports: Vec<(String, u32)>,
    /// Data segments: (memory offset, bytes).
    pub data_segments: Vec<(u32, Vec<u8>)>,
    /// Initial page count for linear memory.
    pub initial_memory_pages: usize,
    /// Maximum page count (None = format limit).
    pub max_memory_pages: Option<usize>,
    pub tables: Vec<Table>,
    pub globals: Vec<Global>,
}

impl Module {
    /// Create an empty module with one page of memory.
    pub fn new() -> Self {
        Module {
            types: Vec::new(),
            functions: Vec::new(),
            exports: Vec::new(),
            data_segments: Vec::new(),
            initial_memory_pages: 1,
            max_memory_pages: None,
            tables: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Adds a signature, reusing an identical one. Returns its type index.
    pub fn add_type(&mut self, ty: FuncType) -> u32 {
        if let Some(i) = self.types.iter().position(|t| *t == ty) {
            return i as u32;
        }
        self.types.push(ty);
        (self.types.len() - 1) as u32
    }

    /// Returns the function index.
    pub fn add_function(&mut self, func: Function) -> u32 {
        self.functions.push(func);
        (self.functions.len() - 1) as u32
    }

    /// Register a host function. It takes the next function index.
    pub fn register_host<F>(&mut self, name: impl Into<String>, ty: FuncType, func: F) -> u32
    where
        F: Fn(&[Val]) -> Result<HostReturn> + Send + Sync + 'static,
    {
        self.add_function(Function::host(name, HostFunc::new(ty, func)))
    }

    /// Decodes a code-section entry (size, locals, body) into a function.
    pub fn add_code_entry(
        &mut self,
        name: impl Into<String>,
        ty: FuncType,
        entry: &[u8],
    ) -> decode::Result<u32> {
        let decoded = Decoder::new(entry).decode_code_entry()?;
        Ok(self.add_function(Function::new(name, ty, decoded.locals, decoded.body)))
    }

    pub fn export(&mut self, name: impl Into<String>, func_index: u32) {
        self.exports.push((name.into(), func_index));
    }

    /// Find an export by name. Returns function index.
    pub fn find_export(&self, name: &str) -> Option<u32> {
        self.exports.iter().find(|(n, _)| n == name).map(|(_, idx)| *idx)
    }

    /// Returns the table index.
    pub fn add_table(&mut self, table: Table) -> u32 {
        self.tables.push(table);
        (self.tables.len() - 1) as u32
    }

    /// Returns the global index.
    pub fn add_global(&mut self, init: Val, mutable: bool) -> u32 {
        self.globals.push(Global::new(init, mutable));
        (self.globals.len() - 1) as u32
    }

    pub fn add_data(&mut self, offset: u32, bytes: impl Into<Vec<u8>>) {
        self.data_segments.push((offset, bytes.into()));
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}
