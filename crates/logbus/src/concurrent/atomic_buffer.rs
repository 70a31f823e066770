// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Atomic access to raw shared memory regions.
//!
//! [`AtomicBuffer`] is a borrowed, copyable view over a byte region shared
//! between threads and processes (a mapped log file, the CnC file, the
//! counters area). All cross-agent coordination in the driver funnels
//! through the small set of operations here:
//!
//! - plain get/put for single-writer fields read on the same thread
//! - `_volatile` get (acquire) / `_ordered` put (release) pairs for fields
//!   published across agents
//! - `get_and_add` / `compare_and_set` for contended counters (raw tails,
//!   ring buffer tails)
//!
//! Values are little-endian two's complement, matching the wire protocol,
//! so a buffer written on one host can be scanned on another.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

/// View over a raw shared memory region with atomic accessors.
///
/// Copies of the view alias the same memory; the region must outlive every
/// copy (the driver guarantees this by keeping mapped files alive in the
/// owning resource until close).
#[derive(Clone, Copy)]
pub struct AtomicBuffer {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: all mutation goes through atomic operations or through
// `put_bytes`/`set_memory`, whose single-writer discipline is enforced by
// the framing protocol (frame_length release-store gates readers).
unsafe impl Send for AtomicBuffer {}
unsafe impl Sync for AtomicBuffer {}

impl AtomicBuffer {
    /// Wrap a raw region.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for the
    /// lifetime of every copy of the returned view, and must be at least
    /// 8-byte aligned (mmap regions are page aligned).
    #[must_use]
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Self {
        debug_assert!(ptr.align_offset(8) == 0, "buffer must be 8-byte aligned");
        Self { ptr, len }
    }

    /// View over an owned byte vector (tests and scratch buffers).
    ///
    /// The caller keeps the vector alive for as long as the view is used.
    #[must_use]
    pub fn wrap_slice(slice: &mut [u8]) -> Self {
        // SAFETY: the slice is valid for its whole length; Vec/Box
        // allocations of u64-sized content are 8-byte aligned on every
        // supported platform, enforced by the debug_assert in from_raw_parts.
        unsafe { Self::from_raw_parts(slice.as_mut_ptr(), slice.len()) }
    }

    /// Sub-view of `[offset, offset + len)`.
    ///
    /// # Panics
    ///
    /// Panics if the range falls outside the buffer.
    #[must_use]
    pub fn view(&self, offset: usize, len: usize) -> Self {
        self.bounds_check(offset, len);
        // SAFETY: the range was bounds checked against this view, which is
        // itself valid by construction.
        unsafe { Self::from_raw_parts(self.ptr.add(offset), len) }
    }

    /// Capacity of the view in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.len
    }

    #[inline]
    fn bounds_check(&self, offset: usize, len: usize) {
        assert!(
            offset + len <= self.len,
            "index out of bounds: offset={} len={} capacity={}",
            offset,
            len,
            self.len
        );
    }

    #[inline]
    fn atomic_i64(&self, offset: usize) -> &AtomicI64 {
        self.bounds_check(offset, 8);
        debug_assert!(offset % 8 == 0, "unaligned i64 access at {offset}");
        // SAFETY: in range, 8-byte aligned, and AtomicI64 has the same
        // layout as i64. Shared access is the point of the type.
        unsafe { &*self.ptr.add(offset).cast::<AtomicI64>() }
    }

    #[inline]
    fn atomic_i32(&self, offset: usize) -> &AtomicI32 {
        self.bounds_check(offset, 4);
        debug_assert!(offset % 4 == 0, "unaligned i32 access at {offset}");
        // SAFETY: as atomic_i64, for the 4-byte case.
        unsafe { &*self.ptr.add(offset).cast::<AtomicI32>() }
    }

    // ===== i64 =====

    /// Plain load (single-writer fields read on the owning thread).
    #[inline]
    #[must_use]
    pub fn get_i64(&self, offset: usize) -> i64 {
        self.atomic_i64(offset).load(Ordering::Relaxed)
    }

    /// Plain store.
    #[inline]
    pub fn put_i64(&self, offset: usize, value: i64) {
        self.atomic_i64(offset).store(value, Ordering::Relaxed);
    }

    /// Acquire load: observes everything released before the matching
    /// `put_i64_ordered`.
    #[inline]
    #[must_use]
    pub fn get_i64_volatile(&self, offset: usize) -> i64 {
        self.atomic_i64(offset).load(Ordering::Acquire)
    }

    /// Release store: publishes preceding writes to acquire readers.
    #[inline]
    pub fn put_i64_ordered(&self, offset: usize, value: i64) {
        self.atomic_i64(offset).store(value, Ordering::Release);
    }

    /// Atomic fetch-and-add, returning the previous value.
    #[inline]
    pub fn get_and_add_i64(&self, offset: usize, delta: i64) -> i64 {
        self.atomic_i64(offset).fetch_add(delta, Ordering::AcqRel)
    }

    /// Atomic compare-and-set. Returns true when the swap happened.
    #[inline]
    pub fn compare_and_set_i64(&self, offset: usize, expected: i64, update: i64) -> bool {
        self.atomic_i64(offset)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // ===== i32 =====

    /// Plain load.
    #[inline]
    #[must_use]
    pub fn get_i32(&self, offset: usize) -> i32 {
        self.atomic_i32(offset).load(Ordering::Relaxed)
    }

    /// Plain store.
    #[inline]
    pub fn put_i32(&self, offset: usize, value: i32) {
        self.atomic_i32(offset).store(value, Ordering::Relaxed);
    }

    /// Acquire load.
    #[inline]
    #[must_use]
    pub fn get_i32_volatile(&self, offset: usize) -> i32 {
        self.atomic_i32(offset).load(Ordering::Acquire)
    }

    /// Release store.
    #[inline]
    pub fn put_i32_ordered(&self, offset: usize, value: i32) {
        self.atomic_i32(offset).store(value, Ordering::Release);
    }

    /// Atomic compare-and-set on an i32 field.
    #[inline]
    pub fn compare_and_set_i32(&self, offset: usize, expected: i32, update: i32) -> bool {
        self.atomic_i32(offset)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // ===== bytes =====

    /// Single byte load.
    #[inline]
    #[must_use]
    pub fn get_u8(&self, offset: usize) -> u8 {
        self.bounds_check(offset, 1);
        // SAFETY: in range; byte loads are untearable.
        unsafe { self.ptr.add(offset).read_volatile() }
    }

    /// Single byte store.
    #[inline]
    pub fn put_u8(&self, offset: usize, value: u8) {
        self.bounds_check(offset, 1);
        // SAFETY: in range.
        unsafe { self.ptr.add(offset).write_volatile(value) }
    }

    /// Copy bytes into the buffer. Not atomic: callers gate visibility with
    /// a subsequent ordered store (frame_length, ring record header).
    #[inline]
    pub fn put_bytes(&self, offset: usize, src: &[u8]) {
        self.bounds_check(offset, src.len());
        // SAFETY: the destination range is in bounds; src is a live slice.
        // Source and destination never overlap (src is process-local).
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset), src.len());
        }
    }

    /// Copy bytes out of the buffer. Callers acquire-load the gating field
    /// first (frame_length) so the copied range is fully published.
    #[inline]
    pub fn get_bytes(&self, offset: usize, dst: &mut [u8]) {
        self.bounds_check(offset, dst.len());
        // SAFETY: the source range is in bounds; dst is a live slice.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.add(offset), dst.as_mut_ptr(), dst.len());
        }
    }

    /// Fill a range with `value` (buffer cleaning, padding, unblock).
    #[inline]
    pub fn set_memory(&self, offset: usize, len: usize, value: u8) {
        self.bounds_check(offset, len);
        // SAFETY: range is in bounds.
        unsafe {
            std::ptr::write_bytes(self.ptr.add(offset), value, len);
        }
    }

    /// Borrow a range as a plain slice for datagram send/receive staging.
    ///
    /// Only used where the framing protocol guarantees the range is stable:
    /// committed frames behind the scanned limit, or receive staging areas
    /// owned by one thread.
    #[inline]
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        self.bounds_check(offset, len);
        // SAFETY: in range; stability is the caller's contract above.
        unsafe { std::slice::from_raw_parts(self.ptr.add(offset), len) }
    }
}

impl std::fmt::Debug for AtomicBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicBuffer")
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(len: usize) -> (Vec<u8>, AtomicBuffer) {
        let mut backing = vec![0u8; len];
        let view = AtomicBuffer::wrap_slice(&mut backing);
        (backing, view)
    }

    #[test]
    fn test_put_get_round_trip() {
        let (_backing, buf) = buffer(64);

        buf.put_i64(0, -42);
        assert_eq!(buf.get_i64(0), -42);

        buf.put_i32(8, 7);
        assert_eq!(buf.get_i32(8), 7);

        buf.put_i64_ordered(16, i64::MAX);
        assert_eq!(buf.get_i64_volatile(16), i64::MAX);
    }

    #[test]
    fn test_get_and_add_returns_previous() {
        let (_backing, buf) = buffer(64);

        buf.put_i64(0, 100);
        assert_eq!(buf.get_and_add_i64(0, 32), 100);
        assert_eq!(buf.get_i64(0), 132);
    }

    #[test]
    fn test_compare_and_set() {
        let (_backing, buf) = buffer(64);

        buf.put_i64(0, 5);
        assert!(buf.compare_and_set_i64(0, 5, 6));
        assert!(!buf.compare_and_set_i64(0, 5, 7));
        assert_eq!(buf.get_i64(0), 6);
    }

    #[test]
    fn test_bytes_and_memset() {
        let (_backing, buf) = buffer(64);

        buf.put_bytes(8, &[1, 2, 3, 4]);
        let mut out = [0u8; 4];
        buf.get_bytes(8, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);

        buf.set_memory(8, 4, 0);
        buf.get_bytes(8, &mut out);
        assert_eq!(out, [0, 0, 0, 0]);
    }

    #[test]
    fn test_view_offsets_into_parent() {
        let (_backing, buf) = buffer(64);

        let sub = buf.view(32, 32);
        sub.put_i64(0, 999);
        assert_eq!(buf.get_i64(32), 999);
        assert_eq!(sub.capacity(), 32);
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn test_bounds_checked() {
        let (_backing, buf) = buffer(16);
        buf.put_i64(16, 1);
    }

    #[test]
    fn test_native_layout_matches_wire() {
        let (_backing, buf) = buffer(16);

        buf.put_i32(0, 0x0102_0304);
        let mut out = [0u8; 4];
        buf.get_bytes(0, &mut out);
        assert_eq!(out, 0x0102_0304i32.to_le_bytes());
    }
}
