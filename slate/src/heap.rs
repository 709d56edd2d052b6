use crate::{Address, Allocator, Arena, DEFAULT_ARENA_SIZE, MachineError, PAGE_SIZE};

/// Bytes in front of every block: a class or state word, then the requested
/// size of a small block or the page count of a large one.
pub const BLOCK_HEADER_SIZE: u32 = 8;

const MIN_BLOCK_SHIFT: u32 = 4;
/// Small blocks are 16, 32, ..., 2048 bytes including the header.
const SIZE_CLASSES: usize = 8;
const MAX_SMALL_BLOCK: usize = 1 << (MIN_BLOCK_SHIFT as usize + SIZE_CLASSES - 1);

const LARGE_BLOCK: u32 = u32::MAX;
const FREE_BLOCK: u32 = u32::MAX - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapSettings {
    /// Total arena size in bytes. Must be a multiple of [`PAGE_SIZE`].
    pub arena_size: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            arena_size: DEFAULT_ARENA_SIZE, // 1 MB
        }
    }
}

impl HeapSettings {
    #[inline]
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.arena_size == 0 {
            return Err("arena_size must be > 0");
        }
        if !self.arena_size.is_multiple_of(PAGE_SIZE) {
            return Err("arena_size must be a multiple of the page size");
        }
        if self.arena_size > u32::MAX as usize {
            return Err("arena_size must be addressable with 32 bits");
        }
        // page 0 is reserved, the operand stack and at least one block need room
        if self.arena_size < 4 * PAGE_SIZE {
            return Err("arena_size must span at least four pages");
        }
        Ok(())
    }
}

/// Overrides for [`HeapSettings`]; unset fields keep their defaults.
#[derive(Debug, Clone, Default)]
pub struct HeapCreateInfo {
    pub arena_size: Option<usize>,
}

impl From<HeapCreateInfo> for HeapSettings {
    fn from(info: HeapCreateInfo) -> Self {
        let mut settings = HeapSettings::default();
        if let Some(size) = info.arena_size {
            settings.arena_size = size;
        }
        settings
    }
}

/// General purpose block allocator over the page arena.
///
/// Requests up to 2 KiB (header included) are rounded to a power of two and
/// served from per-class free lists, each refilled by carving a single page.
/// Larger requests take a dedicated run of pages that is returned to the
/// arena on free. A free small block stores `FREE_BLOCK` in its first word and
/// the next free block in its second.
#[derive(Debug)]
pub struct Heap {
    pub(crate) arena: Arena,
    free_lists: [Address; SIZE_CLASSES],
    live_blocks: usize,
}

impl Heap {
    pub fn new(settings: HeapSettings) -> Result<Self, MachineError> {
        settings
            .validate()
            .map_err(|reason| MachineError::control(format!("invalid heap settings: {reason}")))?;
        let arena = Arena::new(settings.arena_size)?;
        log::debug!(
            "created heap with {} pages of {PAGE_SIZE} bytes",
            arena.page_count()
        );
        Ok(Self {
            arena,
            free_lists: [Address::NULL; SIZE_CLASSES],
            live_blocks: 0,
        })
    }

    /// Number of blocks handed out and not yet freed.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live_blocks
    }

    #[inline]
    fn class_size(class: usize) -> usize {
        1 << (MIN_BLOCK_SHIFT as usize + class)
    }

    #[inline]
    fn class_for(total: usize) -> usize {
        let mut class = 0;
        while Self::class_size(class) < total {
            class += 1;
        }
        class
    }

    #[inline]
    fn large_pages(requested: usize) -> usize {
        (requested + BLOCK_HEADER_SIZE as usize).div_ceil(PAGE_SIZE)
    }

    fn with_lock<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, MachineError>,
    ) -> Result<T, MachineError> {
        if !self.arena.try_lock() {
            return Err(MachineError::control("allocator re-entered while busy"));
        }
        let result = f(self);
        self.arena.unlock();
        result
    }

    fn refill(&mut self, class: usize) -> Result<(), MachineError> {
        let page = self.arena.alloc_pages(1)?;
        let size = Self::class_size(class) as u32;
        let count = PAGE_SIZE as u32 / size;
        for i in 0..count {
            let block = page.add(i * size);
            let next = if i + 1 < count {
                block.add(size)
            } else {
                self.free_lists[class]
            };
            self.arena.write_u32(block, FREE_BLOCK)?;
            self.arena.write_address(block.add(4), next)?;
        }
        self.free_lists[class] = page;
        Ok(())
    }

    fn allocate_block(&mut self, size: usize) -> Result<Address, MachineError> {
        let requested = u32::try_from(size)
            .map_err(|_| MachineError::exhausted(format!("allocation of {size} bytes")))?;
        let total = size + BLOCK_HEADER_SIZE as usize;

        let block = if total <= MAX_SMALL_BLOCK {
            let class = Self::class_for(total);
            if self.free_lists[class].is_null() {
                self.refill(class)?;
            }
            let block = self.free_lists[class];
            self.free_lists[class] = self.arena.read_address(block.add(4))?;
            self.arena.write_u32(block, class as u32)?;
            self.arena.write_u32(block.add(4), requested)?;
            block
        } else {
            let pages = Self::large_pages(size);
            let block = self.arena.alloc_pages(pages)?;
            self.arena.write_u32(block, LARGE_BLOCK)?;
            self.arena.write_u32(block.add(4), pages as u32)?;
            block
        };
        self.live_blocks += 1;
        Ok(block.add(BLOCK_HEADER_SIZE))
    }

    fn release_block(&mut self, address: Address) -> Result<(), MachineError> {
        let block = address.sub(BLOCK_HEADER_SIZE);
        match self.arena.read_u32(block)? {
            LARGE_BLOCK => {
                let pages = self.arena.read_u32(block.add(4))? as usize;
                self.arena.free_pages(block, pages);
            }
            FREE_BLOCK => {
                return Err(MachineError::control(format!("block {address} freed twice")));
            }
            class if (class as usize) < SIZE_CLASSES => {
                let class = class as usize;
                self.arena.write_u32(block, FREE_BLOCK)?;
                self.arena.write_address(block.add(4), self.free_lists[class])?;
                self.free_lists[class] = block;
            }
            other => {
                return Err(MachineError::control(format!(
                    "corrupted block header {other:#x} at {address}"
                )));
            }
        }
        self.live_blocks -= 1;
        Ok(())
    }

    /// Usable bytes of the block at `address`, and for small blocks the size
    /// it was last requested with.
    fn block_sizes(&self, address: Address) -> Result<(usize, Option<usize>), MachineError> {
        let block = address.sub(BLOCK_HEADER_SIZE);
        let word = self.arena.read_u32(block.add(4))? as usize;
        let header = BLOCK_HEADER_SIZE as usize;
        match self.arena.read_u32(block)? {
            LARGE_BLOCK => Ok((word * PAGE_SIZE - header, None)),
            class if (class as usize) < SIZE_CLASSES => {
                Ok((Self::class_size(class as usize) - header, Some(word)))
            }
            _ => Err(MachineError::control(format!(
                "resize of a block that is not allocated at {address}"
            ))),
        }
    }
}

impl Allocator for Heap {
    fn malloc(&mut self, size: usize) -> Result<Address, MachineError> {
        self.with_lock(|heap| heap.allocate_block(size))
    }

    fn realloc(&mut self, address: Address, size: usize) -> Result<Address, MachineError> {
        if address.is_null() {
            return self.malloc(size);
        }
        let (capacity, requested) = self.block_sizes(address)?;
        if size <= capacity {
            if requested.is_some() {
                self.arena.write_u32(address.sub(4), size as u32)?;
            }
            return Ok(address);
        }
        let moved = self.malloc(size)?;
        let keep = requested.unwrap_or(capacity).min(size);
        self.arena.copy_within(address, moved, keep)?;
        self.free(address)?;
        Ok(moved)
    }

    fn free(&mut self, address: Address) -> Result<(), MachineError> {
        if address.is_null() {
            return Ok(());
        }
        self.with_lock(|heap| heap.release_block(address))
    }

    #[inline]
    fn arena(&self) -> &Arena {
        &self.arena
    }

    #[inline]
    fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_heap() -> Heap {
        Heap::new(HeapSettings {
            arena_size: 64 * PAGE_SIZE,
        })
        .expect("create heap")
    }

    #[test]
    fn settings_validation() {
        assert!(HeapSettings::default().validate().is_ok());
        assert!(HeapSettings { arena_size: 0 }.validate().is_err());
        assert!(HeapSettings { arena_size: PAGE_SIZE * 8 + 1 }.validate().is_err());
        assert!(HeapSettings { arena_size: PAGE_SIZE }.validate().is_err());
    }

    #[test]
    fn create_info_overrides_defaults() {
        let settings = HeapSettings::from(HeapCreateInfo {
            arena_size: Some(16 * PAGE_SIZE),
        });
        assert_eq!(settings.arena_size, 16 * PAGE_SIZE);
        assert_eq!(HeapSettings::from(HeapCreateInfo::default()), HeapSettings::default());
    }

    #[test]
    fn small_blocks_share_a_page_and_are_reused() {
        let mut heap = create_test_heap();
        let free_before = heap.arena().free_page_count();

        let a = heap.malloc(10).unwrap();
        let b = heap.malloc(12).unwrap();
        assert_ne!(a, b);
        assert_eq!(heap.arena().free_page_count(), free_before - 1);

        heap.free(a).unwrap();
        let c = heap.malloc(16).unwrap();
        assert_eq!(c, a, "freed block of the same class is reused first");
        assert_eq!(heap.live_blocks(), 2);
    }

    #[test]
    fn large_blocks_return_their_pages() {
        let mut heap = create_test_heap();
        let free_before = heap.arena().free_page_count();

        let big = heap.malloc(3 * PAGE_SIZE).unwrap();
        assert_eq!(heap.arena().free_page_count(), free_before - 4);
        heap.free(big).unwrap();
        assert_eq!(heap.arena().free_page_count(), free_before);
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn zero_sized_allocation_is_valid() {
        let mut heap = create_test_heap();
        let a = heap.malloc(0).unwrap();
        assert!(!a.is_null());
        heap.free(a).unwrap();
    }

    #[test]
    fn double_free_is_detected() {
        let mut heap = create_test_heap();
        let a = heap.malloc(24).unwrap();
        heap.free(a).unwrap();
        let err = heap.free(a).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Control);
    }

    #[test]
    fn realloc_preserves_contents_when_growing() {
        let mut heap = create_test_heap();
        let a = heap.malloc(5).unwrap();
        heap.arena_mut().write_bytes(a, b"slate").unwrap();

        let grown = heap.realloc(a, 5000).unwrap();
        assert_ne!(grown, a);
        assert_eq!(heap.arena().bytes(grown, 5).unwrap(), b"slate");

        let shrunk = heap.realloc(grown, 2).unwrap();
        assert_eq!(shrunk, grown, "shrinking stays in place");
        assert_eq!(heap.arena().bytes(shrunk, 2).unwrap(), b"sl");
        assert_eq!(heap.live_blocks(), 1);
    }

    #[test]
    fn realloc_within_capacity_stays_in_place() {
        let mut heap = create_test_heap();
        let a = heap.malloc(9).unwrap(); // 32 byte class
        assert_eq!(heap.realloc(a, 20).unwrap(), a);
    }

    #[test]
    fn calloc_zero_fills() {
        let mut heap = create_test_heap();
        let a = heap.malloc(64).unwrap();
        heap.arena_mut().fill(a, 64, 0xEE).unwrap();
        heap.free(a).unwrap();

        let b = heap.calloc(16, 4).unwrap();
        assert_eq!(b, a);
        assert!(heap.arena().bytes(b, 64).unwrap().iter().all(|&x| x == 0));
    }

    #[test]
    fn exhaustion_propagates_from_the_page_allocator() {
        let mut heap = Heap::new(HeapSettings {
            arena_size: 4 * PAGE_SIZE,
        })
        .unwrap();
        let err = heap.malloc(8 * PAGE_SIZE).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Exhausted);
        assert!(!heap.arena().is_locked(), "a failed request releases the busy flag");
    }
}
