//! Fixed-region memory pool for DMA descriptor lists.
//!
//! The pool never touches the memory it manages: all bookkeeping lives in
//! `alloc` collections, so the whole region is usable and alignment padding
//! returns to the free list instead of being lost.

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

use alloc::collections::BTreeMap;
use core::{fmt, ptr::NonNull};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// `init` called on a pool that already manages a region.
    AlreadyInit,
    /// Empty or inverted address range.
    InvalidRange,
    /// The pointer was not handed out by this pool.
    UnknownPointer,
    NotInit,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            PoolError::AlreadyInit => "memory pool already initialized",
            PoolError::InvalidRange => "invalid memory pool range",
            PoolError::UnknownPointer => "pointer does not belong to the memory pool",
            PoolError::NotInit => "memory pool not initialized",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = core::result::Result<T, PoolError>;

#[inline]
const fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

/// First-fit allocator over `[start, end)`.
///
/// Free ranges are kept sorted by address and coalesced on free, so a
/// fresh pool behaves like a bump allocator and freeing everything gives the
/// whole region back as one range.
#[derive(Debug, Default)]
pub struct MemPool {
    start: usize,
    end: usize,
    /// start -> length
    free: BTreeMap<usize, usize>,
    /// start -> length
    used: BTreeMap<usize, usize>,
    ready: bool,
}

impl MemPool {
    pub const fn new() -> Self {
        MemPool {
            start: 0,
            end: 0,
            free: BTreeMap::new(),
            used: BTreeMap::new(),
            ready: false,
        }
    }

    /// Hand the region `[start, end)` to the pool.
    ///
    /// The region must stay valid and otherwise unused until [`MemPool::deinit`].
    pub fn init(&mut self, start: usize, end: usize) -> Result<()> {
        if self.ready {
            return Err(PoolError::AlreadyInit);
        }
        if start == 0 || end <= start {
            return Err(PoolError::InvalidRange);
        }
        self.start = start;
        self.end = end;
        self.free.clear();
        self.used.clear();
        self.free.insert(start, end - start);
        self.ready = true;
        debug!("mem pool [{:#x}, {:#x}) ready", start, end);
        Ok(())
    }

    /// Forget the region. Outstanding allocations become dangling.
    pub fn deinit(&mut self) {
        if !self.used.is_empty() {
            warn!("mem pool deinit with {} live allocations", self.used.len());
        }
        self.free.clear();
        self.used.clear();
        self.start = 0;
        self.end = 0;
        self.ready = false;
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Allocate `size` bytes whose address is a multiple of `align`.
    ///
    /// Returns `None` when the pool is not initialized, the request is
    /// malformed (zero size, non power-of-two alignment) or no free range
    /// can hold it.
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if !self.ready || size == 0 || !align.is_power_of_two() {
            return None;
        }

        let (range_start, range_len, addr) = self.free.iter().find_map(|(&start, &len)| {
            let addr = align_up(start, align);
            let range_end = start + len;
            match addr.checked_add(size) {
                Some(end) if addr < range_end && end <= range_end => Some((start, len, addr)),
                _ => None,
            }
        })?;

        self.free.remove(&range_start);
        if addr > range_start {
            self.free.insert(range_start, addr - range_start);
        }
        let tail = range_start + range_len - (addr + size);
        if tail > 0 {
            self.free.insert(addr + size, tail);
        }
        self.used.insert(addr, size);
        trace!("mem pool alloc {:#x} size {:#x} align {:#x}", addr, size, align);
        NonNull::new(addr as *mut u8)
    }

    /// Return an allocation to the pool.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<()> {
        if !self.ready {
            return Err(PoolError::NotInit);
        }
        let addr = ptr.as_ptr() as usize;
        let mut len = self.used.remove(&addr).ok_or(PoolError::UnknownPointer)?;
        let mut start = addr;

        // merge with the following range
        if let Some(next_len) = self.free.remove(&(start + len)) {
            len += next_len;
        }
        // merge with the preceding range
        if let Some((&prev, &prev_len)) = self.free.range(..start).next_back() {
            if prev + prev_len == start {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        self.free.insert(start, len);
        trace!("mem pool free {:#x}", addr);
        Ok(())
    }

    /// Total bytes managed by the pool.
    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.end - self.start
    }

    /// Bytes currently available, alignment padding included.
    pub fn free_bytes(&self) -> usize {
        self.free.values().sum()
    }

    /// Number of live allocations.
    #[inline]
    pub fn allocations(&self) -> usize {
        self.used.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x1000;

    fn pool(len: usize) -> MemPool {
        let mut pool = MemPool::new();
        pool.init(BASE, BASE + len).unwrap();
        pool
    }

    #[test]
    fn init_rejects_bad_ranges() {
        let mut pool = MemPool::new();
        assert_eq!(pool.init(0x2000, 0x2000), Err(PoolError::InvalidRange));
        assert_eq!(pool.init(0, 0x100), Err(PoolError::InvalidRange));
        pool.init(0x2000, 0x3000).unwrap();
        assert_eq!(pool.init(0x2000, 0x3000), Err(PoolError::AlreadyInit));
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mut pool = pool(0x1000);
        let a = pool.alloc_aligned(0x30, 0x10).unwrap().as_ptr() as usize;
        let b = pool.alloc_aligned(0x100, 0x80).unwrap().as_ptr() as usize;
        assert_eq!(a % 0x10, 0);
        assert_eq!(b % 0x80, 0);
        assert!(b >= a + 0x30);
        assert_eq!(pool.allocations(), 2);
    }

    #[test]
    fn free_coalesces_back_to_one_range() {
        let mut pool = pool(0x800);
        let before = pool.free_bytes();
        let a = pool.alloc_aligned(0x40, 0x40).unwrap();
        let b = pool.alloc_aligned(0x200, 0x80).unwrap();
        let c = pool.alloc_aligned(0x10, 0x10).unwrap();
        pool.free(b).unwrap();
        pool.free(a).unwrap();
        pool.free(c).unwrap();
        assert_eq!(pool.free_bytes(), before);
        assert_eq!(pool.free.len(), 1);
        // the whole region is usable again
        assert!(pool.alloc_aligned(0x800, 0x10).is_some());
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pool = pool(0x400);
        assert!(pool.alloc_aligned(0x400, 0x80).is_some());
        assert!(pool.alloc_aligned(0x20, 0x20).is_none());
    }

    #[test]
    fn malformed_requests() {
        let mut pool = pool(0x400);
        assert!(pool.alloc_aligned(0, 0x10).is_none());
        assert!(pool.alloc_aligned(0x10, 0x30).is_none());
        let mut idle = MemPool::new();
        assert!(idle.alloc_aligned(0x10, 0x10).is_none());
    }

    #[test]
    fn unknown_pointer_is_rejected() {
        let mut pool = pool(0x400);
        let bogus = NonNull::new((BASE + 0x8) as *mut u8).unwrap();
        assert_eq!(pool.free(bogus), Err(PoolError::UnknownPointer));
        let a = pool.alloc_aligned(0x10, 0x10).unwrap();
        pool.free(a).unwrap();
        assert_eq!(pool.free(a), Err(PoolError::UnknownPointer));
    }

    #[test]
    fn deinit_resets() {
        let mut pool = pool(0x400);
        pool.alloc_aligned(0x10, 0x10).unwrap();
        pool.deinit();
        assert!(!pool.is_ready());
        assert_eq!(pool.free_bytes(), 0);
        pool.init(BASE, BASE + 0x100).unwrap();
        assert_eq!(pool.free_bytes(), 0x100);
    }
}
