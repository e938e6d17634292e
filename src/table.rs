use crate::trap::{Result, Trap};

/// Function references for indirect calls. Empty slots are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    elements: Vec<Option<u32>>,
    max: Option<u32>,
}

impl Table {
    pub fn new(size: u32, max: Option<u32>) -> Self {
        Table { elements: vec![None; size as usize], max }
    }

    /// A table whose slots hold `elements` in order.
    pub fn with_elements(elements: Vec<Option<u32>>) -> Self {
        Table { elements, max: None }
    }

    pub fn len(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Slot contents. Out-of-range indices trap; empty slots return `None`.
    pub fn get(&self, index: u32) -> Result<Option<u32>> {
        self.elements
            .get(index as usize)
            .copied()
            .ok_or(Trap::UndefinedElement(index))
    }

    pub fn set(&mut self, index: u32, func: Option<u32>) -> Result<()> {
        let slot = self
            .elements
            .get_mut(index as usize)
            .ok_or(Trap::UndefinedElement(index))?;
        *slot = func;
        Ok(())
    }

    /// Appends `delta` empty slots. Returns the previous length.
    pub fn grow(&mut self, delta: u32) -> Result<u32> {
        let old = self.len();
        let new = old.checked_add(delta).ok_or(Trap::OutOfMemory)?;
        if self.max.is_some_and(|m| new > m) {
            return Err(Trap::OutOfMemory);
        }
        self.elements.resize(new as usize, None);
        Ok(old)
    }
}
