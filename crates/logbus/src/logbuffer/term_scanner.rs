// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scanner for contiguous committed frames ready to be transmitted.
//!
//! The sender scans the active term from its position for up to an
//! MTU-bounded number of bytes. The scan stops at the first uncommitted
//! frame (zero length). A padding frame terminates the scan too: its
//! header is transmitted so receivers learn about the rotation, but its
//! body is only skipped, reported separately as `padding`.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::logbuffer::frame::{self, HEADER_LENGTH};

/// Outcome of a scan packed as `(padding << 32) | available`.
pub type ScanOutcome = i64;

/// Bytes of committed frames available to transmit.
#[inline]
#[must_use]
pub const fn available(outcome: ScanOutcome) -> i32 {
    outcome as i32
}

/// Additional bytes to skip past transmitted padding.
#[inline]
#[must_use]
pub const fn padding(outcome: ScanOutcome) -> i32 {
    (outcome >> 32) as i32
}

#[inline]
const fn pack(padding: i32, available: i32) -> ScanOutcome {
    ((padding as i64) << 32) | (available as i64 & 0xFFFF_FFFF)
}

/// Scan `term_buffer` from `offset` for up to `max_length` bytes of
/// contiguous committed frames.
#[must_use]
pub fn scan_for_availability(
    term_buffer: &AtomicBuffer,
    offset: usize,
    max_length: usize,
) -> ScanOutcome {
    let max_length = max_length.min(term_buffer.capacity() - offset);
    let mut available: i32 = 0;
    let mut padding: i32 = 0;

    while (available as usize) < max_length {
        let frame_offset = offset + available as usize;
        let frame_length = frame::frame_length_volatile(term_buffer, frame_offset);
        if frame_length <= 0 {
            break;
        }

        let mut aligned_frame_length = frame::aligned_frame_length(frame_length);
        if frame::is_padding_frame(term_buffer, frame_offset) {
            padding = aligned_frame_length - HEADER_LENGTH as i32;
            aligned_frame_length = HEADER_LENGTH as i32;
        }

        available += aligned_frame_length;

        if available as usize > max_length {
            available -= aligned_frame_length;
            padding = 0;
            break;
        }

        if padding != 0 {
            break;
        }
    }

    pack(padding, available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::atomic_buffer::AtomicBuffer;
    use crate::logbuffer::frame::{
        frame_length_ordered, set_frame_type, DATA_FRAME_TYPE, FRAME_ALIGNMENT, PADDING_FRAME_TYPE,
    };

    const TERM_LENGTH: usize = 4096;
    const MTU: usize = 1024;

    fn term() -> (Vec<u8>, AtomicBuffer) {
        let mut backing = vec![0u8; TERM_LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);
        (backing, buffer)
    }

    fn commit_frame(buffer: &AtomicBuffer, offset: usize, frame_length: i32, frame_type: u16) {
        set_frame_type(buffer, offset, frame_type);
        frame_length_ordered(buffer, offset, frame_length);
    }

    #[test]
    fn test_empty_term_yields_nothing() {
        let (_backing, buffer) = term();
        let outcome = scan_for_availability(&buffer, 0, MTU);
        assert_eq!(available(outcome), 0);
        assert_eq!(padding(outcome), 0);
    }

    #[test]
    fn test_single_committed_frame() {
        let (_backing, buffer) = term();
        commit_frame(&buffer, 0, 100, DATA_FRAME_TYPE);

        let outcome = scan_for_availability(&buffer, 0, MTU);
        assert_eq!(available(outcome), 128); // aligned
        assert_eq!(padding(outcome), 0);
    }

    #[test]
    fn test_scan_stops_at_uncommitted_frame() {
        let (_backing, buffer) = term();
        commit_frame(&buffer, 0, 64, DATA_FRAME_TYPE);
        // Frame at 64 is claimed but uncommitted (length 0).
        commit_frame(&buffer, 128, 64, DATA_FRAME_TYPE);

        let outcome = scan_for_availability(&buffer, 0, MTU);
        assert_eq!(available(outcome), 64);
    }

    #[test]
    fn test_scan_bounded_by_mtu() {
        let (_backing, buffer) = term();
        for i in 0..8 {
            commit_frame(&buffer, i * 256, 256, DATA_FRAME_TYPE);
        }

        let outcome = scan_for_availability(&buffer, 0, 1000);
        // 3 x 256 fits under 1000, the 4th would overflow the MTU bound.
        assert_eq!(available(outcome), 768);
    }

    #[test]
    fn test_padding_frame_sends_header_and_skips_body() {
        let (_backing, buffer) = term();
        commit_frame(&buffer, 0, 96, DATA_FRAME_TYPE);
        commit_frame(&buffer, 96, (TERM_LENGTH - 96) as i32, PADDING_FRAME_TYPE);

        let outcome = scan_for_availability(&buffer, 0, MTU);
        assert_eq!(available(outcome), 96 + FRAME_ALIGNMENT as i32);
        assert_eq!(
            padding(outcome),
            (TERM_LENGTH - 96 - FRAME_ALIGNMENT) as i32
        );
    }

    #[test]
    fn test_scan_from_mid_term_offset() {
        let (_backing, buffer) = term();
        commit_frame(&buffer, 2048, 512, DATA_FRAME_TYPE);

        let outcome = scan_for_availability(&buffer, 2048, MTU);
        assert_eq!(available(outcome), 512);
        assert_eq!(padding(outcome), 0);
    }
}
