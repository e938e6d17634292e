use crate::trap::{Result, Trap};

/// Size of one linear-memory page.
pub const PAGE_SIZE: usize = 65_536;

/// Largest page count any memory may reach (4 GiB).
pub const MAX_PAGES: usize = 65_536;

/// Linear memory of a machine: a little-endian byte buffer sized in pages.
pub struct Memory {
    data: Vec<u8>,
    max_pages: Option<usize>,
}

impl Memory {
    pub fn new(initial_pages: usize, max_pages: Option<usize>) -> Self {
        let size = initial_pages * PAGE_SIZE;
        Memory {
            data: vec![0u8; size],
            max_pages,
        }
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Current size in pages.
    pub fn pages(&self) -> usize {
        self.data.len() / PAGE_SIZE
    }

    pub fn max_pages(&self) -> Option<usize> {
        self.max_pages
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Grow by `delta` pages. Returns the old page count.
    pub fn grow(&mut self, delta: usize) -> Result<usize> {
        let old_pages = self.pages();
        let limit = self.max_pages.map_or(MAX_PAGES, |m| m.min(MAX_PAGES));
        let new_pages = old_pages
            .checked_add(delta)
            .filter(|&n| n <= limit)
            .ok_or(Trap::OutOfMemory)?;
        self.data.resize(new_pages * PAGE_SIZE, 0);
        Ok(old_pages)
    }

    /// Resolves `[address, address + len)` to a buffer range.
    fn range(&self, address: u64, len: usize) -> Result<std::ops::Range<usize>> {
        let oob = || Trap::MemoryOutOfBounds { address, len, size: self.data.len() };
        let start = usize::try_from(address).map_err(|_| oob())?;
        let end = start.checked_add(len).ok_or_else(oob)?;
        if end > self.data.len() {
            return Err(oob());
        }
        Ok(start..end)
    }

    /// Bytes at `[address, address + len)`.
    pub fn load(&self, address: u64, len: usize) -> Result<&[u8]> {
        let r = self.range(address, len)?;
        Ok(&self.data[r])
    }

    pub fn store(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        let r = self.range(address, bytes.len())?;
        self.data[r].copy_from_slice(bytes);
        Ok(())
    }

    fn read_array<const N: usize>(&self, address: u64) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.load(address, N)?);
        Ok(out)
    }

    // ── Typed reads ──────────────────────────────────────────────────────────

    pub fn read_u8(&self, address: u64) -> Result<u8> {
        self.read_array::<1>(address).map(|b| b[0])
    }

    pub fn read_u16(&self, address: u64) -> Result<u16> {
        self.read_array(address).map(u16::from_le_bytes)
    }

    pub fn read_u32(&self, address: u64) -> Result<u32> {
        self.read_array(address).map(u32::from_le_bytes)
    }

    pub fn read_i32(&self, address: u64) -> Result<i32> {
        self.read_u32(address).map(|v| v as i32)
    }

    pub fn read_u64(&self, address: u64) -> Result<u64> {
        self.read_array(address).map(u64::from_le_bytes)
    }

    pub fn read_i64(&self, address: u64) -> Result<i64> {
        self.read_u64(address).map(|v| v as i64)
    }

    pub fn read_f32(&self, address: u64) -> Result<f32> {
        self.read_u32(address).map(f32::from_bits)
    }

    pub fn read_f64(&self, address: u64) -> Result<f64> {
        self.read_u64(address).map(f64::from_bits)
    }

    // ── Typed writes ─────────────────────────────────────────────────────────

    pub fn write_u8(&mut self, address: u64, val: u8) -> Result<()> {
        self.store(address, &[val])
    }

    pub fn write_u16(&mut self, address: u64, val: u16) -> Result<()> {
        self.store(address, &val.to_le_bytes())
    }

    pub fn write_u32(&mut self, address: u64, val: u32) -> Result<()> {
        self.store(address, &val.to_le_bytes())
    }

    pub fn write_i32(&mut self, address: u64, val: i32) -> Result<()> {
        self.write_u32(address, val as u32)
    }

    pub fn write_u64(&mut self, address: u64, val: u64) -> Result<()> {
        self.store(address, &val.to_le_bytes())
    }

    pub fn write_i64(&mut self, address: u64, val: i64) -> Result<()> {
        self.write_u64(address, val as u64)
    }

    pub fn write_f32(&mut self, address: u64, val: f32) -> Result<()> {
        self.write_u32(address, val.to_bits())
    }

    pub fn write_f64(&mut self, address: u64, val: f64) -> Result<()> {
        self.write_u64(address, val.to_bits())
    }
}

/// Effective address of an access: base plus constant offset, with no
/// 32-bit wraparound.
#[inline]
pub fn effective_address(base: u32, offset: u32) -> u64 {
    u64::from(base) + u64::from(offset)
}
