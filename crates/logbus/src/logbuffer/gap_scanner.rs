// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scanner for reception gaps within a term, feeding NAK generation.
//!
//! A gap is a run of uncommitted bytes between the rebuild offset (the
//! contiguous gap-free position) and the high-water mark (the furthest
//! byte received). Frames always start on an alignment boundary, so the
//! scan walks in those steps.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::logbuffer::frame::{self, FRAME_ALIGNMENT};

/// A detected gap to be NAKed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub term_id: i32,
    pub term_offset: i32,
    pub length: i32,
}

/// Scan for the first gap in `[rebuild_offset, hwm_offset)`.
///
/// Returns the gap when one exists. A gap running to the high-water mark
/// is reported up to `hwm_offset` (more data may still be in flight; the
/// NAK delay generator absorbs the churn).
#[must_use]
pub fn scan_for_gap(
    term_buffer: &AtomicBuffer,
    term_id: i32,
    rebuild_offset: usize,
    hwm_offset: usize,
) -> Option<Gap> {
    let limit = hwm_offset.min(term_buffer.capacity());
    let mut offset = rebuild_offset;

    // Skip over the committed prefix.
    while offset < limit {
        let frame_length = frame::frame_length_volatile(term_buffer, offset);
        if frame_length <= 0 {
            break;
        }
        offset += frame::aligned_frame_length(frame_length) as usize;
    }

    if offset >= limit {
        return None;
    }

    // Measure the uncommitted run.
    let gap_begin = offset;
    while offset < limit && frame::frame_length_volatile(term_buffer, offset) <= 0 {
        offset += FRAME_ALIGNMENT;
    }

    Some(Gap {
        term_id,
        term_offset: gap_begin as i32,
        length: (offset.min(limit) - gap_begin) as i32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::frame::{frame_length_ordered, set_frame_type, DATA_FRAME_TYPE};

    const TERM_LENGTH: usize = 4096;

    fn term() -> (Vec<u8>, AtomicBuffer) {
        let mut backing = vec![0u8; TERM_LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);
        (backing, buffer)
    }

    fn commit(buffer: &AtomicBuffer, offset: usize, length: i32) {
        set_frame_type(buffer, offset, DATA_FRAME_TYPE);
        frame_length_ordered(buffer, offset, length);
    }

    #[test]
    fn test_no_gap_when_contiguous() {
        let (_backing, buffer) = term();
        commit(&buffer, 0, 64);
        commit(&buffer, 64, 64);

        assert_eq!(scan_for_gap(&buffer, 1, 0, 128), None);
    }

    #[test]
    fn test_detects_gap_between_frames() {
        let (_backing, buffer) = term();
        commit(&buffer, 0, 64);
        // 64..192 missing
        commit(&buffer, 192, 64);

        let gap = scan_for_gap(&buffer, 1, 0, 256).expect("gap");
        assert_eq!(
            gap,
            Gap {
                term_id: 1,
                term_offset: 64,
                length: 128
            }
        );
    }

    #[test]
    fn test_gap_running_to_hwm() {
        let (_backing, buffer) = term();
        commit(&buffer, 0, 64);

        let gap = scan_for_gap(&buffer, 7, 0, 512).expect("gap");
        assert_eq!(gap.term_offset, 64);
        assert_eq!(gap.length, 448);
    }

    #[test]
    fn test_scan_starts_at_rebuild_offset() {
        let (_backing, buffer) = term();
        // Rebuild is already past the first frames.
        commit(&buffer, 256, 64);

        let gap = scan_for_gap(&buffer, 1, 256, 512).expect("gap");
        assert_eq!(gap.term_offset, 320);
    }
}
