//! Concurrency scenarios: disjoint regions must behave like fully
//! independent allocators, and the thread-local convenience API must keep
//! each thread inside its own region.

mod common;

use std::thread;

use common::{alloc_filled, free_checked};
use rmalloc::inspect::{report, verify_region};
use rmalloc::{NUM_REGIONS, PAGE_SIZE};

#[test]
fn disjoint_regions_do_not_interfere() {
    const THREADS: u32 = 4;
    const ITERS: usize = 10_000;

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let region = 100 + i;
            thread::spawn(move || {
                let byte = 0xc0 + i as u8;
                for _ in 0..ITERS {
                    let p = alloc_filled(1000, region, byte);
                    free_checked(p, 1000, region, byte);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // each region took exactly one page and holds it, fully coalesced,
    // independent of the other threads
    for i in 0..THREADS {
        let r = report(100 + i);
        assert_eq!(r.runs, 1);
        assert_eq!(r.pages, 1);
        assert_eq!(r.used_blocks, 0);
        assert_eq!(r.free_blocks, 1);
        assert_eq!(r.largest_free, PAGE_SIZE);
        verify_region(100 + i);
    }
}

#[test]
fn concurrent_mixed_sizes_settle_clean() {
    const THREADS: u32 = 3;

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let region = 150 + i;
            thread::spawn(move || {
                let mut live = Vec::new();
                for n in 0..400usize {
                    let size = match n % 100 {
                        0 => 100_000,
                        1..=4 => 25_000,
                        5..=19 => 10_000,
                        20..=39 => 5_000,
                        40..=59 => 1_000,
                        60..=79 => 500,
                        _ => 100,
                    };
                    let byte = 0x40 + (n % 64) as u8;
                    live.push((size, alloc_filled(size, region, byte), byte));
                }
                for (size, p, byte) in live {
                    free_checked(p, size, region, byte);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for i in 0..THREADS {
        verify_region(150 + i);
        let r = report(150 + i);
        assert_eq!(r.used_blocks, 0);
        assert!(r.free_blocks >= r.runs);
    }
}

#[test]
fn thread_local_api_uses_a_private_region() {
    let handles: Vec<_> = (0..3u8)
        .map(|i| {
            thread::spawn(move || {
                let region = rmalloc::thread_region();
                assert!(region < NUM_REGIONS as u32);
                assert_eq!(region, rmalloc::thread_region());

                let byte = 0xd0 + i;
                for _ in 0..100 {
                    let p = rmalloc::thread_alloc(777);
                    common::fill(p, 777, byte);
                    assert!(common::holds(p, 777, byte));
                    unsafe { rmalloc::thread_free(p) };
                }
                verify_region(region);
                region
            })
        })
        .collect();

    let regions: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(regions.windows(2).all(|w| w[0] != w[1]));
}
