use core::mem::size_of;
use core::ptr::null_mut;

use log::{debug, trace};
use parking_lot::lock_api::RawMutex as _;

use crate::internal::{align_up, bin_index, thread_id, Block};
use crate::types::{
    FreeRecord, PageNode, Region, MIN_BLK_SIZE, NUM_BINS, PAGE_SIZE, TAG_SIZE,
};
use crate::{init, os, stats};

/* -----------------------------------------------------------
  Region engine

  Each region is an independent heap: NUM_BINS doubly linked
  free lists segregated by size class, plus a singly linked
  list of the page runs that back them. Everything below runs
  under the owning region's lock.

  Blocks carve page runs exactly: walking a run tag by tag
  from its start always lands on the run's end.
----------------------------------------------------------- */

// Block size a page-list node occupies inside region zero.
const PAGE_NODE_BLK_SIZE: usize = {
    let blk = align_up(size_of::<PageNode>() + 2 * TAG_SIZE);
    if blk < MIN_BLK_SIZE {
        MIN_BLK_SIZE
    } else {
        blk
    }
};

/* -----------------------------------------------------------
  Free-list discipline
----------------------------------------------------------- */

// Insert at the head of the bin for the block's size.
unsafe fn push_free(region: *mut Region, blk: *mut FreeRecord) {
    let index = bin_index((*blk).tag);
    trace!(
        "region {}: block {:p} ({} bytes) -> bin {}",
        (*region).id,
        blk,
        (*blk).tag,
        index
    );
    debug_assert!((*blk).tag & 1 == 0);

    (*blk).prev = null_mut();
    (*blk).next = (*region).first_free[index];
    if !(*region).first_free[index].is_null() {
        (*(*region).first_free[index]).prev = blk;
    }
    (*region).first_free[index] = blk;
}

// Unlink from wherever the block sits in its bin.
unsafe fn unlink_free(region: *mut Region, blk: *mut FreeRecord) {
    let index = bin_index((*blk).tag);
    if !(*blk).prev.is_null() {
        (*(*blk).prev).next = (*blk).next;
    }
    if !(*blk).next.is_null() {
        (*(*blk).next).prev = (*blk).prev;
    }
    if (*region).first_free[index] == blk {
        (*region).first_free[index] = (*blk).next;
    }
}

/* -----------------------------------------------------------
  Split
----------------------------------------------------------- */

// Take `free_blk` off its list and allocate its leading `blk_size` bytes.
// The remainder becomes a new free block when it is strictly larger than
// MIN_BLK_SIZE; otherwise the allocation absorbs it whole.
unsafe fn alloc_block(
    region: *mut Region,
    free_blk: *mut FreeRecord,
    mut blk_size: usize,
) -> *mut u8 {
    let total = (*free_blk).tag;
    debug_assert!((*free_blk).tag & 1 == 0);
    debug_assert!(total >= blk_size);
    let extra = total - blk_size;

    unlink_free(region, free_blk);

    if extra > MIN_BLK_SIZE {
        let rest = (free_blk as *mut u8).add(blk_size) as *mut FreeRecord;
        Block(rest as *mut u8).set_headers(false, extra);
        (*rest).region_id = (*region).id;
        trace!(
            "region {}: split {:p}, remainder {} bytes at {:p}",
            (*region).id,
            free_blk,
            extra,
            rest
        );
        push_free(region, rest);
    } else {
        blk_size += extra;
    }

    Block(free_blk as *mut u8).set_headers(true, blk_size);
    free_blk as *mut u8
}

/* -----------------------------------------------------------
  Heap extension
----------------------------------------------------------- */

// Fetch a fresh power-of-two run of pages large enough for `blk_size`,
// install one free block spanning it, and record the run on the page list.
// Returns a free block (already on its list) that covers at least
// `blk_size` bytes.
//
// The page-list node always lives in region zero. For region zero itself
// the node is carved off the front of the new run inside this critical
// section; going through `alloc` again would recurse into the extension
// path. For every other region the node comes from a nested
// `alloc(_, 0)`: region zero's lock is terminal in the lock order, so
// taking it while holding this region's lock cannot deadlock.
unsafe fn extend_heap(region: *mut Region, blk_size: usize) -> *mut FreeRecord {
    stats::note_extend();
    let id = (*region).id;

    let required = if id == 0 {
        align_up(blk_size + PAGE_NODE_BLK_SIZE)
    } else {
        blk_size
    };
    let order = os::order_for_pages((required + PAGE_SIZE - 1) / PAGE_SIZE);
    let num_pages = 1usize << order;
    debug!("region {}: extending heap by {} pages", id, num_pages);

    let base = os::fetch_pages(order);
    let run_size = num_pages * PAGE_SIZE;

    let blk = base as *mut FreeRecord;
    Block(base).set_headers(false, run_size);
    (*blk).region_id = id;
    push_free(region, blk);

    let (node, free_blk) = if id == 0 {
        let carved = alloc_block(region, blk, PAGE_NODE_BLK_SIZE);
        let node = Block(carved).payload() as *mut PageNode;
        (*node).page_start = base;
        (node, base.add(PAGE_NODE_BLK_SIZE) as *mut FreeRecord)
    } else {
        let node = alloc(size_of::<PageNode>(), 0) as *mut PageNode;
        (*node).page_start = base;
        (node, blk)
    };
    (*node).num_pages = num_pages;
    (*node).next = null_mut();

    // the page list is insertion-ordered, not address-ordered
    if (*region).page_head.is_null() {
        (*region).page_head = node;
    } else {
        (*(*region).page_tail).next = node;
    }
    (*region).page_tail = node;

    free_blk
}

/* -----------------------------------------------------------
  Coalescing

  Neighbours are located straight from the boundary tags (or,
  with the scan-coalesce feature, by scanning the neighbour's
  bin for a matching address). A candidate only qualifies when
  its tag shows a free, non-zero-sized block, the probe stays
  inside the page run, and its record names this region.
----------------------------------------------------------- */

unsafe fn find_free_left(region: *mut Region, addr: *mut u8) -> *mut FreeRecord {
    // a block starting a page has no foot tag below it to inspect
    if addr as usize % PAGE_SIZE == 0 {
        return null_mut();
    }
    let foot = *(addr.sub(TAG_SIZE) as *const usize);
    if foot & 1 == 1 || foot == 0 {
        return null_mut();
    }
    if cfg!(feature = "scan-coalesce") {
        let mut cur = (*region).first_free[bin_index(foot)];
        while !cur.is_null() {
            if (cur as *mut u8).add((*cur).tag) == addr {
                return cur;
            }
            cur = (*cur).next;
        }
        null_mut()
    } else {
        let cand = addr.sub(foot) as *mut FreeRecord;
        if (*cand).region_id == (*region).id {
            cand
        } else {
            null_mut()
        }
    }
}

unsafe fn find_free_right(
    region: *mut Region,
    addr: *mut u8,
    size: usize,
) -> *mut FreeRecord {
    let head = addr.add(size);
    // runs end on page boundaries, so this also rejects past-the-end
    if head as usize % PAGE_SIZE == 0 {
        return null_mut();
    }
    let tag = *(head as *const usize);
    if tag & 1 == 1 || tag == 0 {
        return null_mut();
    }
    if cfg!(feature = "scan-coalesce") {
        let mut cur = (*region).first_free[bin_index(tag)];
        while !cur.is_null() {
            if cur == head as *mut FreeRecord {
                return cur;
            }
            cur = (*cur).next;
        }
        null_mut()
    } else {
        let cand = head as *mut FreeRecord;
        if (*cand).region_id == (*region).id {
            cand
        } else {
            null_mut()
        }
    }
}

// Merge a newly freed block with its free neighbours, leaving `blk`
// pointing at the merged block with both tags rewritten.
unsafe fn coalesce(region: *mut Region, blk: &mut *mut FreeRecord) {
    let addr = *blk as *mut u8;
    let size = (**blk).tag;

    let left = find_free_left(region, addr);
    let right = find_free_right(region, addr, size);

    let mut new_size = size;
    if !left.is_null() {
        trace!("region {}: coalescing left into {:p}", (*region).id, left);
        unlink_free(region, left);
        new_size += (*left).tag;
        *blk = left;
    }
    if !right.is_null() {
        trace!("region {}: coalescing right with {:p}", (*region).id, right);
        unlink_free(region, right);
        new_size += (*right).tag;
    }

    Block(*blk as *mut u8).set_headers(false, new_size);
}

/* -----------------------------------------------------------
  Entry points
----------------------------------------------------------- */

pub fn alloc(size: usize, region_id: u32) -> *mut u8 {
    let region = init::ensure_region(region_id);
    unsafe {
        (*region).lock.lock();
        stats::note_alloc();

        let mut blk_size = align_up(size + 2 * TAG_SIZE);
        if blk_size < MIN_BLK_SIZE {
            blk_size = MIN_BLK_SIZE;
        }
        trace!(
            "region {}: allocating {} bytes ({} byte block, thread {})",
            region_id,
            size,
            blk_size,
            thread_id()
        );

        let mut mem: *mut u8 = null_mut();
        'search: for index in bin_index(blk_size)..NUM_BINS {
            let mut cur = (*region).first_free[index];
            while !cur.is_null() {
                stats::note_step();
                if (*cur).tag > blk_size {
                    trace!(
                        "region {}: fit in bin {}: {:p} ({} bytes)",
                        region_id,
                        index,
                        cur,
                        (*cur).tag
                    );
                    mem = alloc_block(region, cur, blk_size);
                    break 'search;
                }
                cur = (*cur).next;
            }
        }

        if mem.is_null() {
            debug!("region {}: no fit for {} bytes, extending", region_id, blk_size);
            let fresh = extend_heap(region, blk_size);
            mem = alloc_block(region, fresh, blk_size);
        }

        (*region).lock.unlock();
        Block(mem).payload()
    }
}

/// # Safety
/// `payload` must come from `alloc(_, region_id)` on this allocator and must
/// not have been freed already.
pub unsafe fn free(payload: *mut u8, region_id: u32) {
    let region = init::ensure_region(region_id);
    (*region).lock.lock();
    stats::note_free();
    trace!(
        "region {}: freeing {:p} (thread {})",
        region_id,
        payload,
        thread_id()
    );

    let blk = Block::from_payload(payload);
    let mut merged = blk.record();
    blk.set_headers(false, blk.size());

    coalesce(region, &mut merged);
    (*merged).region_id = region_id;
    push_free(region, merged);

    (*region).lock.unlock();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_node_block_meets_minimum() {
        assert!(PAGE_NODE_BLK_SIZE >= MIN_BLK_SIZE);
        assert_eq!(PAGE_NODE_BLK_SIZE % crate::types::ALIGNMENT, 0);
    }
}
