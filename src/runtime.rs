use log::debug;

use crate::{machine::Machine, module::Module, stack, trap::Result};

/// Limits applied to every machine a [`Runtime`] creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Upper bound for `memory.grow`. Applies when smaller than the
    /// module's own maximum.
    pub max_memory_pages: Option<usize>,
    /// Initial operand stack capacity, in cells.
    pub stack_capacity: usize,
    /// Nested call limit before `CallStackExhausted`.
    pub max_call_depth: usize,
}

impl Config {
    pub fn new() -> Self {
        Config {
            max_memory_pages: None,
            stack_capacity: stack::DEFAULT_CAPACITY,
            max_call_depth: 1024,
        }
    }

    pub fn max_memory_pages(mut self, pages: usize) -> Self {
        self.max_memory_pages = Some(pages);
        self
    }

    pub fn stack_capacity(mut self, cells: usize) -> Self {
        self.stack_capacity = cells;
        self
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point for embedders: holds the configuration and turns modules
/// into runnable machines.
pub struct Runtime {
    config: Config,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Runtime { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Instantiate a module, applying data segments and wiring host functions.
    pub fn instantiate(&self, module: &Module) -> Result<Machine> {
        debug!(
            "instantiating module: {} functions, {} exports",
            module.functions.len(),
            module.exports.len()
        );
        Machine::new(module, &self.config)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
