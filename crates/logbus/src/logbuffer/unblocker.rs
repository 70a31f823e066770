// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unblocking of a log stalled behind a crashed producer.
//!
//! A producer that fetch-adds the raw tail and dies before committing
//! leaves a zero-length frame that stops the sender's scan forever. Once
//! the unblock timeout has expired (so the claim cannot still be in
//! flight), the stalled range is rewritten as a committed padding frame.
//!
//! The rewrite is idempotent: a second attempt observes a committed frame
//! at the blocked offset and does nothing.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::logbuffer::descriptor::{self, index_by_position, position_bits_to_shift, raw_tail_volatile};
use crate::logbuffer::frame::{self, FRAME_ALIGNMENT, PADDING_FRAME_TYPE};

/// Attempt to unblock the log at `blocked_position`.
///
/// Returns true when state was changed (padding written or log rotated).
#[must_use]
pub fn unblock(
    term_buffers: &[AtomicBuffer],
    meta: &AtomicBuffer,
    blocked_position: i64,
) -> bool {
    let term_length = term_buffers[0].capacity();
    let bits = position_bits_to_shift(term_length);
    let index = index_by_position(blocked_position, bits);
    let term_offset = (blocked_position & (term_length as i64 - 1)) as usize;
    let term_buffer = &term_buffers[index];

    let raw_tail = raw_tail_volatile(meta, index);
    let tail_offset = descriptor::term_offset(raw_tail, term_length) as usize;

    let expected_term_id = descriptor::compute_term_id_from_position(
        blocked_position,
        bits,
        descriptor::initial_term_id(meta),
    );
    if descriptor::term_id(raw_tail) != expected_term_id {
        // The previous term filled but no producer completed the
        // rotation into this partition. Finish it.
        let previous_index = (index + descriptor::PARTITION_COUNT - 1) % descriptor::PARTITION_COUNT;
        descriptor::rotate_log(meta, previous_index, expected_term_id.wrapping_sub(1));
        return true;
    }

    if frame::frame_length_volatile(term_buffer, term_offset) != 0 {
        return false; // committed while we were deciding; nothing to do
    }

    // Find where the stalled claim ends: the next committed frame, or the
    // tail if nothing beyond it was ever committed.
    let mut scan = term_offset + FRAME_ALIGNMENT;
    while scan < tail_offset {
        if frame::frame_length_volatile(term_buffer, scan) != 0 {
            break;
        }
        scan += FRAME_ALIGNMENT;
    }

    let pad_end = scan.min(tail_offset.max(term_offset));
    if pad_end <= term_offset {
        return false;
    }

    frame::set_frame_type(term_buffer, term_offset, PADDING_FRAME_TYPE);
    frame::frame_length_ordered(term_buffer, term_offset, (pad_end - term_offset) as i32);

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::descriptor::{
        initialize, pack_tail, LOG_META_DATA_LENGTH,
    };
    use crate::logbuffer::frame::{frame_length_ordered, set_frame_type, DATA_FRAME_TYPE};

    const TERM_LENGTH: usize = 64 * 1024;
    const INITIAL_TERM_ID: i32 = 5;

    struct Fixture {
        _term_backings: Vec<Vec<u8>>,
        _meta_backing: Vec<u8>,
        terms: Vec<AtomicBuffer>,
        meta: AtomicBuffer,
    }

    fn fixture() -> Fixture {
        let mut term_backings: Vec<Vec<u8>> = (0..3).map(|_| vec![0u8; TERM_LENGTH]).collect();
        let mut meta_backing = vec![0u8; LOG_META_DATA_LENGTH];
        let terms: Vec<AtomicBuffer> = term_backings
            .iter_mut()
            .map(|b| AtomicBuffer::wrap_slice(b))
            .collect();
        let meta = AtomicBuffer::wrap_slice(&mut meta_backing);
        initialize(&meta, INITIAL_TERM_ID, TERM_LENGTH, 1408, 1, &[0u8; 32]);

        Fixture {
            _term_backings: term_backings,
            _meta_backing: meta_backing,
            terms,
            meta,
        }
    }

    #[test]
    fn test_pads_dead_claim_up_to_tail() {
        let f = fixture();
        // Producer claimed 128 bytes at offset 0 and died.
        f.meta.put_i64(0, pack_tail(INITIAL_TERM_ID, 128));

        assert!(unblock(&f.terms, &f.meta, 0));
        assert!(frame::is_padding_frame(&f.terms[0], 0));
        assert_eq!(frame::frame_length_volatile(&f.terms[0], 0), 128);
    }

    #[test]
    fn test_unblock_twice_is_a_no_op() {
        let f = fixture();
        f.meta.put_i64(0, pack_tail(INITIAL_TERM_ID, 128));

        assert!(unblock(&f.terms, &f.meta, 0));
        assert!(!unblock(&f.terms, &f.meta, 0));
        assert_eq!(frame::frame_length_volatile(&f.terms[0], 0), 128);
    }

    #[test]
    fn test_pads_only_up_to_next_committed_frame() {
        let f = fixture();
        // Dead claim of 64 at offset 0; healthy committed frame at 64.
        f.meta.put_i64(0, pack_tail(INITIAL_TERM_ID, 192));
        set_frame_type(&f.terms[0], 64, DATA_FRAME_TYPE);
        frame_length_ordered(&f.terms[0], 64, 128);

        assert!(unblock(&f.terms, &f.meta, 0));
        assert_eq!(frame::frame_length_volatile(&f.terms[0], 0), 64);
        assert!(frame::is_padding_frame(&f.terms[0], 0));
        // The healthy frame is untouched.
        assert!(!frame::is_padding_frame(&f.terms[0], 64));
    }

    #[test]
    fn test_committed_frame_needs_no_unblock() {
        let f = fixture();
        f.meta.put_i64(0, pack_tail(INITIAL_TERM_ID, 64));
        set_frame_type(&f.terms[0], 0, DATA_FRAME_TYPE);
        frame_length_ordered(&f.terms[0], 0, 64);

        assert!(!unblock(&f.terms, &f.meta, 0));
    }

    #[test]
    fn test_unblocks_stuck_rotation() {
        let f = fixture();
        // Term 0 completely full, rotation never happened.
        f.meta
            .put_i64(0, pack_tail(INITIAL_TERM_ID, TERM_LENGTH as i32));

        let blocked = TERM_LENGTH as i64; // position at the term boundary
        assert!(unblock(&f.terms, &f.meta, blocked));
        assert_eq!(descriptor::active_partition_index(&f.meta), 1);
        assert_eq!(
            raw_tail_volatile(&f.meta, 1),
            pack_tail(INITIAL_TERM_ID + 1, 0)
        );
    }
}
