use core::sync::atomic::{AtomicUsize, Ordering};

// Process-wide diagnostic counters. Relaxed ordering throughout: the
// numbers are advisory and never synchronise anything.

static SEARCH_STEPS: AtomicUsize = AtomicUsize::new(0);
static EXTENDS: AtomicUsize = AtomicUsize::new(0);
static ALLOCS: AtomicUsize = AtomicUsize::new(0);
static FREES: AtomicUsize = AtomicUsize::new(0);

#[inline]
pub(crate) fn note_step() {
    SEARCH_STEPS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn note_extend() {
    EXTENDS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn note_alloc() {
    ALLOCS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn note_free() {
    FREES.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of the allocator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Free blocks examined during first-fit searches.
    pub search_steps: usize,
    /// Heap extensions, i.e. page-provider calls.
    pub extends: usize,
    pub allocs: usize,
    pub frees: usize,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        search_steps: SEARCH_STEPS.load(Ordering::Relaxed),
        extends: EXTENDS.load(Ordering::Relaxed),
        allocs: ALLOCS.load(Ordering::Relaxed),
        frees: FREES.load(Ordering::Relaxed),
    }
}
