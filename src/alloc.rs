//! Heap passthrough for buffers handed across the C boundary.
//!
//! Every block carries a small header recording its size, so [`free`]
//! needs nothing but the pointer. All blocks are 16-byte aligned.

use std::alloc::{self, Layout};
use std::ptr;

/// Alignment of every block returned from this module.
pub const ALIGNMENT: usize = 16;

const HEADER: usize = ALIGNMENT;

fn layout(size: usize) -> Option<Layout> {
    let total = size.checked_add(HEADER)?;
    Layout::from_size_align(total, ALIGNMENT).ok()
}

/// Allocates `size` uninitialized bytes on a 16-byte boundary. Null on
/// overflow or failure.
pub fn malloc(size: usize) -> *mut u8 {
    let Some(layout) = layout(size) else {
        return ptr::null_mut();
    };
    // SAFETY: layout has non-zero size (HEADER > 0).
    let base = unsafe { alloc::alloc(layout) };
    if base.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: base is valid for HEADER bytes and aligned for usize.
    unsafe {
        (base as *mut usize).write(size);
        base.add(HEADER)
    }
}

/// Copies `bytes` into a fresh block.
pub fn copy_from_slice(bytes: &[u8]) -> *mut u8 {
    let block = malloc(bytes.len());
    if !block.is_null() {
        // SAFETY: block is valid for bytes.len() bytes and cannot overlap.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), block, bytes.len()) };
    }
    block
}

/// Returns a block to the heap. Null is ignored.
///
/// # Safety
/// `block` must be null or come from this module and not be freed yet.
pub unsafe fn free(block: *mut u8) {
    if block.is_null() {
        return;
    }
    unsafe {
        let base = block.sub(HEADER);
        let size = (base as *const usize).read();
        if let Some(layout) = layout(size) {
            alloc::dealloc(base, layout);
        }
    }
}
