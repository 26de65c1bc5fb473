use core::mem::size_of;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use log::debug;
use parking_lot::Mutex;

use crate::internal::thread_id;
use crate::region;
use crate::types::{Region, StaticCell, NUM_REGIONS};

/* -----------------------------------------------------------
  Region table

  A fixed array of region pointers, lazily filled. The table
  lock is only ever taken here, during initialisation, and is
  ordered strictly before any region lock. The fast path is an
  acquire load of the entry; the store inside the critical
  section releases.

  Region zero is statically allocated: it hosts every other
  region's record and every page-list node, so there is nowhere
  else its own record could live.
----------------------------------------------------------- */

static TABLE_LOCK: Mutex<()> = Mutex::new(());

const EMPTY_SLOT: AtomicPtr<Region> = AtomicPtr::new(ptr::null_mut());
static REGIONS: [AtomicPtr<Region>; NUM_REGIONS] = [EMPTY_SLOT; NUM_REGIONS];

static REGION_ZERO: StaticCell<Region> = StaticCell::new(Region::new(0));

/// Current table entry for `id`, null if the region was never touched.
#[inline]
pub(crate) fn region_ptr(id: u32) -> *mut Region {
    REGIONS[id as usize].load(Ordering::Acquire)
}

/// Make sure region zero and region `id` exist, creating them on first use.
pub(crate) fn ensure_region(id: u32) -> *mut Region {
    if REGIONS[0].load(Ordering::Acquire).is_null() {
        let _table = TABLE_LOCK.lock();
        if REGIONS[0].load(Ordering::Relaxed).is_null() {
            init_region(0);
        }
    }
    if id != 0 && REGIONS[id as usize].load(Ordering::Acquire).is_null() {
        let _table = TABLE_LOCK.lock();
        if REGIONS[id as usize].load(Ordering::Relaxed).is_null() {
            init_region(id);
        }
    }
    REGIONS[id as usize].load(Ordering::Acquire)
}

// Caller holds the table lock and has re-checked that the slot is empty.
fn init_region(id: u32) {
    debug!("region {}: initialising (thread {})", id, thread_id());
    let region = if id == 0 {
        let zero = REGION_ZERO.get();
        unsafe { ptr::write(zero, Region::new(0)) };
        zero
    } else {
        // region records for every other id live in region zero's heap
        let mem = region::alloc(size_of::<Region>(), 0) as *mut Region;
        unsafe { ptr::write(mem, Region::new(id)) };
        mem
    };
    REGIONS[id as usize].store(region, Ordering::Release);
}

/// Drop every region back to the never-touched state.
///
/// Page runs and region records are leaked: pages are never returned to the
/// provider in this design, and the records live inside those pages.
///
/// # Safety
/// No other thread may be using the allocator, and every pointer previously
/// returned by [`crate::alloc`] becomes dangling.
#[doc(hidden)]
pub unsafe fn reset_for_tests() {
    let _table = TABLE_LOCK.lock();
    for slot in REGIONS.iter() {
        slot.store(ptr::null_mut(), Ordering::Release);
    }
}
