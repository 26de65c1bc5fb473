use log::debug;
use parking_lot::lock_api::RawMutex as _;

use crate::init;
use crate::internal::{bin_index, Block};
use crate::types::{FreeRecord, ALIGNMENT, MIN_BLK_SIZE, NUM_BINS, PAGE_SIZE};

/* -----------------------------------------------------------
  Diagnostics

  Walks a region's page runs tag by tag under the region lock.
  Intended for tests and debugging; none of this is on any
  allocation path.
----------------------------------------------------------- */

/// Summary of one region's heap, taken under its lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionReport {
    /// Page runs on the page list.
    pub runs: usize,
    /// Total pages across all runs.
    pub pages: usize,
    pub free_blocks: usize,
    pub used_blocks: usize,
    /// Size of the largest free block, boundary tags included.
    pub largest_free: usize,
}

/// Summarise region `id`. A region that was never touched reports all zeros.
pub fn report(id: u32) -> RegionReport {
    let region = init::region_ptr(id);
    if region.is_null() {
        return RegionReport::default();
    }
    let mut out = RegionReport::default();
    unsafe {
        (*region).lock.lock();
        let mut node = (*region).page_head;
        while !node.is_null() {
            out.runs += 1;
            out.pages += (*node).num_pages;
            let end = (*node).page_start.add((*node).num_pages * PAGE_SIZE);
            let mut cursor = (*node).page_start;
            while cursor < end {
                let blk = Block(cursor);
                if blk.is_alloc() {
                    out.used_blocks += 1;
                } else {
                    out.free_blocks += 1;
                    if blk.size() > out.largest_free {
                        out.largest_free = blk.size();
                    }
                }
                cursor = blk.end();
            }
            node = (*node).next;
        }
        (*region).lock.unlock();
    }
    out
}

/// Log every block of region `id`, run by run, at debug level.
pub fn dump_region(id: u32) {
    let region = init::region_ptr(id);
    if region.is_null() {
        return;
    }
    unsafe {
        (*region).lock.lock();
        let mut node = (*region).page_head;
        let mut run = 1;
        while !node.is_null() {
            debug!(
                "region {}: run {}: {} pages at {:p}",
                id,
                run,
                (*node).num_pages,
                (*node).page_start
            );
            let end = (*node).page_start.add((*node).num_pages * PAGE_SIZE);
            let mut cursor = (*node).page_start;
            while cursor < end {
                let blk = Block(cursor);
                if blk.is_alloc() {
                    debug!("  used block: {} bytes @{:p}", blk.size(), cursor);
                } else {
                    debug!(
                        "  free block: {} bytes @{:p} -> {:p}",
                        blk.size(),
                        cursor,
                        (*blk.record()).next
                    );
                }
                cursor = blk.end();
            }
            node = (*node).next;
            run += 1;
        }
        (*region).lock.unlock();
    }
}

/// Check every structural invariant of region `id`, panicking on the first
/// violation: blocks tile each run exactly with equal head and foot tags,
/// free blocks carry this region's id and are maximally coalesced, and each
/// bin is a well-formed acyclic doubly linked list of blocks of its class.
///
/// Coalescing stops at page boundaries, so two free blocks meeting exactly
/// on a page seam are tolerated.
pub fn verify_region(id: u32) {
    let region = init::region_ptr(id);
    if region.is_null() {
        return;
    }
    unsafe {
        (*region).lock.lock();

        let mut free_in_runs = 0usize;
        let mut node = (*region).page_head;
        while !node.is_null() {
            let start = (*node).page_start;
            let end = start.add((*node).num_pages * PAGE_SIZE);
            assert_eq!(start as usize % PAGE_SIZE, 0, "run start not page-aligned");

            let mut cursor = start;
            let mut prev_was_free = false;
            while cursor < end {
                let blk = Block(cursor);
                let size = blk.size();
                assert!(size >= MIN_BLK_SIZE, "undersized block @{:p}", cursor);
                assert_eq!(size % ALIGNMENT, 0, "misaligned size @{:p}", cursor);
                assert!(cursor.add(size) <= end, "block overruns its run @{:p}", cursor);
                let foot = *(cursor.add(size - crate::types::TAG_SIZE) as *const usize);
                assert_eq!(blk.tag(), foot, "head/foot tag mismatch @{:p}", cursor);

                if blk.is_alloc() {
                    prev_was_free = false;
                } else {
                    assert!(
                        !prev_was_free || cursor as usize % PAGE_SIZE == 0,
                        "adjacent free blocks @{:p} (missed coalesce)",
                        cursor
                    );
                    prev_was_free = true;
                    free_in_runs += 1;
                    assert_eq!(
                        (*blk.record()).region_id,
                        id,
                        "free block @{:p} claims foreign region",
                        cursor
                    );
                }
                cursor = cursor.add(size);
            }
            assert_eq!(cursor, end, "blocks do not tile the run exactly");
            node = (*node).next;
        }

        // every free block in the runs must be listed exactly once, in the
        // bin matching its size
        let mut listed = 0usize;
        for index in 0..NUM_BINS {
            let head = (*region).first_free[index];
            if !head.is_null() {
                assert!((*head).prev.is_null(), "bin {} head has a prev", index);
            }
            let mut cur = head;
            let mut prev: *mut FreeRecord = core::ptr::null_mut();
            while !cur.is_null() {
                listed += 1;
                assert!(listed <= free_in_runs, "free list cycle in bin {}", index);
                assert_eq!((*cur).tag & 1, 0, "allocated block on bin {}", index);
                assert_eq!(bin_index((*cur).tag), index, "block in wrong bin");
                assert_eq!((*cur).prev, prev, "broken prev link in bin {}", index);
                prev = cur;
                cur = (*cur).next;
            }
        }
        assert_eq!(listed, free_in_runs, "free lists disagree with the runs");

        (*region).lock.unlock();
    }
}
