use core::cell::UnsafeCell;
use core::mem::size_of;
use core::ptr::null_mut;

use parking_lot::lock_api::RawMutex as RawMutexApi;
use parking_lot::RawMutex;

use crate::internal::align_up;

// ------------------------------------------------------
// Tuning parameters
// ------------------------------------------------------

/// Granularity of the page provider. Every heap extension is a run of
/// `2^order` pages of this size.
pub const PAGE_SIZE: usize = 4096;

/// All block sizes and payload addresses are multiples of this.
pub const ALIGNMENT: usize = 8;

/// A boundary tag is a single machine word at each end of a block.
pub const TAG_SIZE: usize = size_of::<usize>();

/// Number of size-class free lists per region.
pub const NUM_BINS: usize = 20;

/// Number of selectable regions, region zero included.
pub const NUM_REGIONS: usize = 1000;

/// Smallest block the allocator will carve. A freed block of this size must
/// hold both boundary tags and the free-block record between them.
pub const MIN_BLK_SIZE: usize = align_up(2 * TAG_SIZE + size_of::<FreeRecord>());

// ------------------------------------------------------
// Main internal data-structures
// ------------------------------------------------------

/// Record written over the payload area of every free block.
///
/// `tag` is the head boundary tag itself: the block's total size with the
/// allocated bit (bit 0) clear. The matching foot tag sits in the last word
/// of the block. The remaining fields are only meaningful while the block is
/// free; an allocated block's payload overwrites them.
#[repr(C)]
pub struct FreeRecord {
    pub tag: usize,
    pub region_id: u32,
    pub prev: *mut FreeRecord,
    pub next: *mut FreeRecord,
}

/// One contiguous run of pages obtained from the page provider in a single
/// call. Nodes for every region live in region zero's heap and are never
/// released.
#[repr(C)]
pub struct PageNode {
    pub page_start: *mut u8,
    pub num_pages: usize,
    pub next: *mut PageNode,
}

/// An independently locked heap. `lock` guards the free lists and the page
/// list; every block reachable from `first_free` lies inside a run on the
/// page list and carries `id` in its free-block record.
#[repr(C)]
pub struct Region {
    pub id: u32,
    pub lock: RawMutex,
    pub first_free: [*mut FreeRecord; NUM_BINS],
    pub page_head: *mut PageNode,
    pub page_tail: *mut PageNode,
}

impl Region {
    pub const fn new(id: u32) -> Self {
        Self {
            id,
            lock: <RawMutex as RawMutexApi>::INIT,
            first_free: [null_mut(); NUM_BINS],
            page_head: null_mut(),
            page_tail: null_mut(),
        }
    }
}

// ------------------------------------------------------
// Static storage
// ------------------------------------------------------

/// A cell around a `T`, which implements `Send` + `Sync` and can be
/// accessed using `unsafe`. Hosts the statically allocated region zero.
#[repr(transparent)]
pub struct StaticCell<T> {
    inner: UnsafeCell<T>,
}

impl<T> StaticCell<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            inner: UnsafeCell::new(inner),
        }
    }

    /// Gets a mutable pointer to the wrapped value.
    pub const fn get(&self) -> *mut T {
        self.inner.get()
    }
}

unsafe impl<T> Send for StaticCell<T> {}
unsafe impl<T> Sync for StaticCell<T> {}
