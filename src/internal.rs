use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::types::{FreeRecord, ALIGNMENT, MIN_BLK_SIZE, TAG_SIZE};

/// Round `size` up to the machine alignment.
#[inline]
pub const fn align_up(size: usize) -> usize {
    (size + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

// Bin boundaries, by total block size:
//  0..=13   48, 64, 80, .. 256 in steps of 16
//  14..=18  512, 1024, 2048, 4096, 8192
//  19       everything larger
#[inline]
pub fn bin_index(size: usize) -> usize {
    if size <= 256 {
        let i = (size as isize - 1) / 16 - 2;
        if i <= 0 {
            0
        } else {
            i as usize
        }
    } else if size <= 512 {
        14
    } else if size <= 1024 {
        15
    } else if size <= 2048 {
        16
    } else if size <= 4096 {
        17
    } else if size <= 8192 {
        18
    } else {
        19
    }
}

// -------------------------------------------------------------------
// Boundary tags
//
// A block is a word-aligned span carrying one tag word at each end.
// Both tags hold the block's total size with bit 0 set while the block
// is allocated. All tag arithmetic lives behind this view.
// -------------------------------------------------------------------

/// Typed view over a block's head tag address.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Block(pub *mut u8);

impl Block {
    /// View the block whose payload starts at `payload`.
    ///
    /// # Safety
    /// `payload` must have been produced by this allocator and not freed.
    #[inline]
    pub unsafe fn from_payload(payload: *mut u8) -> Block {
        Block(payload.sub(TAG_SIZE))
    }

    #[inline]
    pub fn payload(self) -> *mut u8 {
        unsafe { self.0.add(TAG_SIZE) }
    }

    #[inline]
    pub fn record(self) -> *mut FreeRecord {
        self.0 as *mut FreeRecord
    }

    /// Raw head tag word.
    ///
    /// # Safety
    /// `self` must point at a live block of some page run.
    #[inline]
    pub unsafe fn tag(self) -> usize {
        *(self.0 as *const usize)
    }

    /// Total size with the allocated bit stripped.
    ///
    /// # Safety
    /// See [`Block::tag`].
    #[inline]
    pub unsafe fn size(self) -> usize {
        self.tag() & !1
    }

    /// # Safety
    /// See [`Block::tag`].
    #[inline]
    pub unsafe fn is_alloc(self) -> bool {
        self.tag() & 1 == 1
    }

    /// Write both boundary tags.
    ///
    /// # Safety
    /// The block must span `size` writable bytes owned by the caller's
    /// region, and the caller must hold that region's lock.
    #[inline]
    pub unsafe fn set_headers(self, alloc: bool, size: usize) {
        debug_assert!(size % ALIGNMENT == 0);
        debug_assert!(size >= MIN_BLK_SIZE);
        let tag = if alloc { size | 1 } else { size };
        *(self.0 as *mut usize) = tag;
        *(self.0.add(size - TAG_SIZE) as *mut usize) = tag;
    }

    /// First byte past the block.
    ///
    /// # Safety
    /// See [`Block::tag`].
    #[inline]
    pub unsafe fn end(self) -> *mut u8 {
        self.0.add(self.size())
    }
}

// -------------------------------------------------------------------
// Thread identity
//
// Dense process-local ids, assigned on first use. Id 0 is never handed
// out so a fresh thread cannot silently share region zero's heap.
// -------------------------------------------------------------------

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_ID: Cell<u32> = const { Cell::new(0) };
}

#[inline]
pub fn thread_id() -> u32 {
    THREAD_ID.with(|slot| {
        let mut id = slot.get();
        if id == 0 {
            id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            slot.set(id);
        }
        id
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NUM_BINS;

    #[test]
    fn align_up_rounds_to_words() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 8);
        assert_eq!(align_up(8), 8);
        assert_eq!(align_up(9), 16);
        assert_eq!(align_up(2064), 2064);
    }

    #[test]
    fn bin_index_ladder() {
        // the small ladder: 16-byte steps from the minimum block upwards
        assert_eq!(bin_index(MIN_BLK_SIZE), 0);
        assert_eq!(bin_index(64), 1);
        assert_eq!(bin_index(65), 2);
        assert_eq!(bin_index(128), 5);
        assert_eq!(bin_index(256), 13);
        // the power-of-two ladder
        assert_eq!(bin_index(257), 14);
        assert_eq!(bin_index(512), 14);
        assert_eq!(bin_index(513), 15);
        assert_eq!(bin_index(1024), 15);
        assert_eq!(bin_index(2048), 16);
        assert_eq!(bin_index(4096), 17);
        assert_eq!(bin_index(8192), 18);
        assert_eq!(bin_index(8193), 19);
        assert_eq!(bin_index(1 << 30), 19);
    }

    #[test]
    fn bin_index_is_deterministic_and_in_range() {
        for size in (MIN_BLK_SIZE..20_000).step_by(8) {
            let b = bin_index(size);
            assert!(b < NUM_BINS);
            assert_eq!(b, bin_index(size));
        }
    }

    #[test]
    fn tags_round_trip() {
        // word-aligned scratch buffer standing in for a page run
        let mut buf = [0usize; 16];
        let blk = Block(buf.as_mut_ptr() as *mut u8);
        unsafe {
            blk.set_headers(true, 64);
            assert!(blk.is_alloc());
            assert_eq!(blk.size(), 64);
            assert_eq!(blk.tag(), 64 | 1);
            // foot mirrors head
            assert_eq!(buf[7], 64 | 1);

            blk.set_headers(false, 64);
            assert!(!blk.is_alloc());
            assert_eq!(blk.size(), 64);
            assert_eq!(buf[0], buf[7]);
            assert_eq!(blk.end(), (buf.as_mut_ptr() as *mut u8).wrapping_add(64));
        }
    }

    #[test]
    fn thread_ids_are_stable_and_distinct() {
        let here = thread_id();
        assert_eq!(here, thread_id());
        let other = std::thread::spawn(thread_id).join().unwrap();
        assert_ne!(here, other);
        assert_ne!(other, 0);
    }
}
