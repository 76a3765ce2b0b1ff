//! An allocator that counts live allocations, for leak tests.
//!
//! Install it in a test binary with `#[global_allocator]`, then compare
//! [`live`] before and after the code under test. Counts are per thread, so
//! the test harness running other tests in parallel doesn't disturb them.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::Cell,
};

thread_local! {
    static LIVE: Cell<isize> = const { Cell::new(0) };
}

/// A [`System`] allocator that tracks the number of live allocations made
/// by the current thread.
pub struct CountingAlloc;

impl CountingAlloc {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for CountingAlloc {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(delta: isize) {
    // The slot may already be gone while the thread shuts down.
    let _ = LIVE.try_with(|live| live.set(live.get() + delta));
}

/// Live allocations made (and not yet freed) by the current thread.
pub fn live() -> isize {
    LIVE.try_with(Cell::get).unwrap_or(0)
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            bump(1);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        bump(-1);
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            bump(1);
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        System.realloc(ptr, layout, new_size)
    }
}
