//! Allocation accounting for the measured phase.
use std::alloc::{GlobalAlloc, Layout, System};

use metrics_harness::{RuntimeProbe, RuntimeSample};
use portable_atomic::{AtomicU64, Ordering};

/// Wraps the system allocator, counting every allocation and the bytes it asked for.
pub struct CountingAllocator {
    allocations: AtomicU64,
    bytes: AtomicU64,
}

impl CountingAllocator {
    pub const fn new() -> CountingAllocator {
        CountingAllocator { allocations: AtomicU64::new(0), bytes: AtomicU64::new(0) }
    }

    #[inline]
    fn count(&self, size: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size as u64, Ordering::Relaxed);
    }
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.count(layout.size());
        System.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.count(layout.size());
        System.alloc_zeroed(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.count(new_size);
        System.realloc(ptr, layout, new_size)
    }
}

impl RuntimeProbe for CountingAllocator {
    fn sample(&self) -> RuntimeSample {
        RuntimeSample {
            allocations: self.allocations.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            // Native code has no collector.
            pause: None,
        }
    }
}

/// Reads the process-wide allocator through a `'static` reference.
pub struct GlobalProbe(pub &'static CountingAllocator);

impl RuntimeProbe for GlobalProbe {
    fn sample(&self) -> RuntimeSample {
        self.0.sample()
    }
}
