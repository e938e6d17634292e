//! The operand stack.
//!
//! Cells are untyped `u64`s. The instruction consuming a cell decides how
//! to read it; i32 and f32 live in the low 32 bits.

use crate::trap::{Result, Trap};

/// Default initial capacity, in cells.
pub const DEFAULT_CAPACITY: usize = 1024;

pub struct OperandStack {
    cells: Vec<u64>,
}

impl OperandStack {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        OperandStack { cells: Vec::with_capacity(capacity.max(1)) }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cells.capacity()
    }

    #[inline]
    pub fn push(&mut self, cell: u64) {
        if self.cells.len() == self.cells.capacity() {
            // Grow by half again rather than doubling.
            let extra = (self.cells.capacity() / 2).max(1);
            self.cells.reserve_exact(extra);
        }
        self.cells.push(cell);
    }

    #[inline]
    pub fn pop(&mut self) -> Result<u64> {
        self.cells.pop().ok_or(Trap::StackUnderflow { needed: 1, depth: 0 })
    }

    pub fn peek(&self) -> Result<u64> {
        self.cells.last().copied().ok_or(Trap::StackUnderflow { needed: 1, depth: 0 })
    }

    // ── Typed views ──────────────────────────────────────────────────────────

    #[inline]
    pub fn push_i32(&mut self, v: i32) {
        self.push(u64::from(v as u32));
    }

    #[inline]
    pub fn push_i64(&mut self, v: i64) {
        self.push(v as u64);
    }

    #[inline]
    pub fn push_f32(&mut self, v: f32) {
        self.push(u64::from(v.to_bits()));
    }

    #[inline]
    pub fn push_f64(&mut self, v: f64) {
        self.push(v.to_bits());
    }

    #[inline]
    pub fn push_bool(&mut self, b: bool) {
        self.push(u64::from(b));
    }

    #[inline]
    pub fn pop_i32(&mut self) -> Result<i32> {
        self.pop().map(|c| c as u32 as i32)
    }

    #[inline]
    pub fn pop_i64(&mut self) -> Result<i64> {
        self.pop().map(|c| c as i64)
    }

    #[inline]
    pub fn pop_f32(&mut self) -> Result<f32> {
        self.pop().map(|c| f32::from_bits(c as u32))
    }

    #[inline]
    pub fn pop_f64(&mut self) -> Result<f64> {
        self.pop().map(f64::from_bits)
    }

    /// Fails unless at least `n` cells are present.
    pub fn require(&self, n: usize) -> Result<()> {
        if self.cells.len() < n {
            return Err(Trap::StackUnderflow { needed: n, depth: self.cells.len() });
        }
        Ok(())
    }

    /// Top `n` cells, bottom first.
    pub fn top(&self, n: usize) -> Result<&[u64]> {
        self.require(n)?;
        Ok(&self.cells[self.cells.len() - n..])
    }

    pub fn truncate(&mut self, len: usize) {
        self.cells.truncate(len);
    }

    /// Keeps the top `keep` cells and discards the `drop` cells beneath
    /// them.
    pub fn drop_keep(&mut self, drop: usize, keep: usize) -> Result<()> {
        if drop == 0 {
            return Ok(());
        }
        let total = drop
            .checked_add(keep)
            .ok_or(Trap::StackUnderflow { needed: usize::MAX, depth: self.cells.len() })?;
        self.require(total)?;
        let len = self.cells.len();
        let kept_from = len - keep;
        let dest = len - total;
        self.cells.copy_within(kept_from..len, dest);
        self.cells.truncate(dest + keep);
        Ok(())
    }
}

impl Default for OperandStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_types_pop_in_reverse() {
        let mut s = OperandStack::new();
        s.push_f32(1.25);
        s.push_f64(-2.5);
        s.push_i32(-7);
        s.push_i64(1 << 40);
        assert_eq!(s.pop_i64().unwrap(), 1 << 40);
        assert_eq!(s.pop_i32().unwrap(), -7);
        assert_eq!(s.pop_f64().unwrap(), -2.5);
        assert_eq!(s.pop_f32().unwrap(), 1.25);
        assert!(s.is_empty());
    }

    #[test]
    fn i32_cell_has_zero_upper_half() {
        let mut s = OperandStack::new();
        s.push_i32(-1);
        assert_eq!(s.peek().unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn pop_empty_underflows() {
        let mut s = OperandStack::new();
        assert_eq!(s.pop(), Err(Trap::StackUnderflow { needed: 1, depth: 0 }));
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut s = OperandStack::with_capacity(2);
        for i in 0..10 {
            s.push(i);
        }
        assert_eq!(s.len(), 10);
        assert!(s.capacity() >= 10);
        assert_eq!(s.pop().unwrap(), 9);
    }

    #[test]
    fn drop_keep_moves_kept_cells_down() {
        let mut s = OperandStack::new();
        for v in [1, 2, 3, 4, 5] {
            s.push(v);
        }
        s.drop_keep(2, 1).unwrap();
        assert_eq!(s.top(3).unwrap(), &[1, 2, 5]);
    }

    #[test]
    fn drop_keep_zero_drop_is_noop() {
        let mut s = OperandStack::new();
        s.push(9);
        s.drop_keep(0, 5).unwrap();
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn drop_keep_checks_depth() {
        let mut s = OperandStack::new();
        s.push(1);
        s.push(2);
        assert_eq!(
            s.drop_keep(2, 1),
            Err(Trap::StackUnderflow { needed: 3, depth: 2 })
        );
        assert_eq!(s.len(), 2);
    }
}
