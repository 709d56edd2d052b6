use std::{fmt, ops::Range};

use crate::{MachineError, system::MappedMemory};

/// Allocation granularity of the page bitmap.
pub const PAGE_SIZE: usize = 4096;

/// Arena size used when nothing else is configured (1 MiB).
pub const DEFAULT_ARENA_SIZE: usize = 1024 * 1024;

/// An offset into the arena. `0` is never handed out and acts as null.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u32);

impl Address {
    pub const NULL: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn add(self, bytes: u32) -> Self {
        Self(self.0.wrapping_add(bytes))
    }

    #[inline]
    #[must_use]
    pub const fn sub(self, bytes: u32) -> Self {
        Self(self.0.wrapping_sub(bytes))
    }

    #[inline]
    #[must_use]
    pub const fn offset(self, bytes: i32) -> Self {
        Self(self.0.wrapping_add_signed(bytes))
    }
}

impl From<Address> for u32 {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// The single fixed-size byte buffer backing all machine memory, plus the
/// bitmap that tracks which of its pages are in use.
///
/// A set bit marks a free page. Page `n` lives in byte `n / 8`, bit `n % 8`.
#[derive(Debug)]
pub struct Arena {
    memory: MappedMemory,
    bitmap: Box<[u8]>,
    pages: usize,
    lock: bool,
}

impl Arena {
    pub fn new(size: usize) -> Result<Self, MachineError> {
        if size == 0 || !size.is_multiple_of(PAGE_SIZE) {
            return Err(MachineError::control(format!(
                "arena size {size} must be a non-zero multiple of {PAGE_SIZE}"
            )));
        }
        if size > u32::MAX as usize {
            return Err(MachineError::control(format!(
                "arena size {size} is not addressable with 32 bit addresses"
            )));
        }

        let memory = MappedMemory::new(size)
            .ok_or_else(|| MachineError::exhausted(format!("could not map {size} bytes")))?;
        let pages = size / PAGE_SIZE;
        let mut arena = Self {
            memory,
            bitmap: vec![0xFF; pages.div_ceil(8)].into_boxed_slice(),
            pages,
            lock: false,
        };
        // page 0 backs the null address
        arena.set_used(0);
        Ok(arena)
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    #[inline]
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages
    }

    #[inline]
    fn bit(page: usize) -> (usize, u8) {
        (page / 8, 1 << (page % 8))
    }

    #[inline]
    fn set_used(&mut self, page: usize) {
        let (byte, mask) = Self::bit(page);
        self.bitmap[byte] &= !mask;
    }

    #[inline]
    fn set_unused(&mut self, page: usize) {
        let (byte, mask) = Self::bit(page);
        self.bitmap[byte] |= mask;
    }

    #[inline]
    fn page_is_free(&self, page: usize) -> bool {
        let (byte, mask) = Self::bit(page);
        self.bitmap[byte] & mask != 0
    }

    /// Whether the page containing `address` is free.
    #[must_use]
    pub fn is_free(&self, address: Address) -> bool {
        let page = address.raw() as usize / PAGE_SIZE;
        page < self.pages && self.page_is_free(page)
    }

    #[must_use]
    pub fn free_page_count(&self) -> usize {
        (0..self.pages).filter(|&p| self.page_is_free(p)).count()
    }

    /// First-fit search for `n` consecutive free pages. A request for zero
    /// pages is served as one page.
    pub fn alloc_pages(&mut self, n: usize) -> Result<Address, MachineError> {
        let n = n.max(1);
        let mut start = 0;
        while start + n <= self.pages {
            match (start..start + n).rev().find(|&p| !self.page_is_free(p)) {
                // no run can start at or before a used page
                Some(used) => start = used + 1,
                None => {
                    for page in start..start + n {
                        self.set_used(page);
                    }
                    let address = Address::new((start * PAGE_SIZE) as u32);
                    log::trace!("allocated {n} page(s) at {address}");
                    return Ok(address);
                }
            }
        }
        Err(MachineError::exhausted(format!(
            "memory exhausted: no run of {n} free page(s) left"
        )))
    }

    /// Marks `n` pages starting at `address` free again. Freeing pages that
    /// are already free is a contract violation.
    pub fn free_pages(&mut self, address: Address, n: usize) {
        debug_assert!(address.raw() as usize % PAGE_SIZE == 0, "unaligned page address {address}");
        let first = address.raw() as usize / PAGE_SIZE;
        for page in first..(first + n.max(1)).min(self.pages) {
            debug_assert!(!self.page_is_free(page), "page {page} freed twice");
            self.set_unused(page);
        }
        log::trace!("freed {n} page(s) at {address}");
    }

    /// Takes the busy flag. Returns `false` if it was already held.
    pub fn try_lock(&mut self) -> bool {
        if self.lock {
            return false;
        }
        self.lock = true;
        true
    }

    pub fn unlock(&mut self) {
        self.lock = false;
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock
    }

    // ── raw access ────────────────────────────────────────────────

    fn range(&self, address: Address, len: usize) -> Result<Range<usize>, MachineError> {
        let start = address.raw() as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.size() => Ok(start..end),
            _ => Err(MachineError::range(format!(
                "access of {len} byte(s) at {address} is outside the arena"
            ))),
        }
    }

    pub fn bytes(&self, address: Address, len: usize) -> Result<&[u8], MachineError> {
        let range = self.range(address, len)?;
        Ok(&self.memory.as_slice()[range])
    }

    pub fn bytes_mut(&mut self, address: Address, len: usize) -> Result<&mut [u8], MachineError> {
        let range = self.range(address, len)?;
        Ok(&mut self.memory.as_mut_slice()[range])
    }

    pub fn read_u8(&self, address: Address) -> Result<u8, MachineError> {
        Ok(self.bytes(address, 1)?[0])
    }

    pub fn read_u32(&self, address: Address) -> Result<u32, MachineError> {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.bytes(address, 4)?);
        Ok(u32::from_le_bytes(word))
    }

    pub fn write_u32(&mut self, address: Address, value: u32) -> Result<(), MachineError> {
        self.bytes_mut(address, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_address(&self, address: Address) -> Result<Address, MachineError> {
        self.read_u32(address).map(Address::new)
    }

    pub fn write_address(&mut self, address: Address, value: Address) -> Result<(), MachineError> {
        self.write_u32(address, value.raw())
    }

    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> Result<(), MachineError> {
        self.bytes_mut(address, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Bytes from `address` up to, not including, the next NUL.
    pub fn read_cstr(&self, address: Address) -> Result<&[u8], MachineError> {
        let start = self.range(address, 0)?.start;
        let tail = &self.memory.as_slice()[start..];
        let len = tail.iter().position(|&b| b == 0).ok_or_else(|| {
            MachineError::range(format!("unterminated string at {address}"))
        })?;
        Ok(&tail[..len])
    }

    pub fn fill(&mut self, address: Address, len: usize, byte: u8) -> Result<(), MachineError> {
        self.bytes_mut(address, len)?.fill(byte);
        Ok(())
    }

    pub fn copy_within(&mut self, src: Address, dst: Address, len: usize) -> Result<(), MachineError> {
        let src = self.range(src, len)?;
        let dst = self.range(dst, len)?.start;
        self.memory.as_mut_slice().copy_within(src, dst);
        Ok(())
    }
}
