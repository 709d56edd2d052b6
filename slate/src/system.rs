use std::ptr::NonNull;

#[cfg(unix)]
mod unix {
    use core::ffi::c_void;

    pub const PROT_READ: i32 = 0x1;
    pub const PROT_WRITE: i32 = 0x2;

    pub const MAP_PRIVATE: i32 = 0x02;

    #[cfg(target_os = "linux")]
    pub const MAP_ANON: i32 = 0x20;
    #[cfg(not(target_os = "linux"))]
    pub const MAP_ANON: i32 = 0x1000;

    pub const MAP_FAILED: isize = -1;

    /// posix mmap and munmap
    /// # Safety
    /// see valid mmap and munmap usage online
    unsafe extern "C" {
        pub fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        pub fn munmap(addr: *mut c_void, length: usize) -> i32;
    }
}

#[cfg(not(unix))]
const MAP_ALIGN: usize = 4096;

#[cfg(unix)]
fn map(len: usize) -> Option<NonNull<u8>> {
    use unix::*;
    // SAFETY: a fresh private anonymous mapping touches no existing memory
    let ptr = unsafe {
        mmap(
            core::ptr::null_mut(),
            len,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANON,
            -1,
            0,
        )
    };
    if ptr as isize == MAP_FAILED {
        return None;
    }
    NonNull::new(ptr.cast())
}

#[cfg(unix)]
fn unmap(ptr: NonNull<u8>, len: usize) {
    // SAFETY: ptr and len come from a successful `map`
    if unsafe { unix::munmap(ptr.as_ptr().cast(), len) } != 0 {
        log::warn!("munmap of {len} bytes failed");
    }
}

#[cfg(not(unix))]
fn map(len: usize) -> Option<NonNull<u8>> {
    let layout = std::alloc::Layout::from_size_align(len, MAP_ALIGN).ok()?;
    // SAFETY: callers never pass a zero length
    NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
}

#[cfg(not(unix))]
fn unmap(ptr: NonNull<u8>, len: usize) {
    if let Ok(layout) = std::alloc::Layout::from_size_align(len, MAP_ALIGN) {
        // SAFETY: ptr was allocated by `map` with this layout
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// A zero-initialised memory region owned by one arena, released on drop.
#[derive(Debug)]
pub struct MappedMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is exclusively owned and only reached through &self / &mut self
unsafe impl Send for MappedMemory {}

impl MappedMemory {
    #[must_use]
    pub fn new(len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let ptr = map(len)?;
        Some(Self { ptr, len })
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes for the lifetime of self
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and uniquely borrowed
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedMemory {
    fn drop(&mut self) {
        unmap(self.ptr, self.len);
    }
}
