//! Payload helpers shared by the integration tests: every allocation is
//! filled with a known byte and re-checked just before it is freed, so a
//! block that overlaps another live allocation shows up as a corrupted
//! pattern.

pub fn fill(p: *mut u8, len: usize, byte: u8) {
    unsafe {
        for i in 0..len {
            p.add(i).write(byte);
        }
    }
}

pub fn holds(p: *mut u8, len: usize, byte: u8) -> bool {
    unsafe { (0..len).all(|i| p.add(i).read() == byte) }
}

pub fn alloc_filled(size: usize, region: u32, byte: u8) -> *mut u8 {
    let p = rmalloc::alloc(size, region);
    assert!(!p.is_null());
    fill(p, size, byte);
    p
}

pub fn free_checked(p: *mut u8, size: usize, region: u32, byte: u8) {
    assert!(holds(p, size, byte), "payload {:p} was disturbed", p);
    unsafe { rmalloc::free(p, region) };
}
