// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Term buffer appender supporting many producers on one append-only log.
//!
//! Producers serialize only through an atomic fetch-and-add on the
//! partition's raw-tail counter; everything after the reservation is
//! uncontended. A frame becomes visible to consumers with the release
//! store of its `frame_length` (zero means "not yet committed").
//!
//! When a reservation trips the end of the term, the appender writes one
//! padding frame over the remainder and reports `TRIPPED` so the caller
//! rotates to the next partition. A reservation that lands entirely past
//! the end (another producer already tripped) reports `FAILED`.

use crate::bits::align;
use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::logbuffer::buffer_claim::BufferClaim;
use crate::logbuffer::descriptor::{self, pack_tail};
use crate::logbuffer::frame::{
    self, BEGIN_FRAG_FLAG, END_FRAG_FLAG, FRAME_ALIGNMENT, HEADER_LENGTH, PADDING_FRAME_TYPE,
};
use crate::logbuffer::header_writer::HeaderWriter;

/// The append tripped the end of the term; rotate and retry.
pub const TRIPPED: i32 = -1;

/// The append landed past the end of an already-tripped term.
pub const FAILED: i32 = -2;

/// Supplies the reserved-value word for a frame about to be committed.
pub type ReservedValueSupplier<'a> = &'a dyn Fn(&AtomicBuffer, usize, usize) -> i64;

/// Result of an append: `(term_id, resulting_offset_or_sentinel)`.
#[inline]
#[must_use]
pub const fn append_term_id(result: i64) -> i32 {
    (result >> 32) as i32
}

/// Resulting offset part of an append result (or `TRIPPED`/`FAILED`).
#[inline]
#[must_use]
pub const fn append_term_offset(result: i64) -> i32 {
    result as i32
}

/// Appender over one term partition and its raw-tail counter.
pub struct TermAppender {
    term_buffer: AtomicBuffer,
    meta_buffer: AtomicBuffer,
    tail_counter_offset: usize,
}

impl TermAppender {
    /// View over `partition_index` of a log.
    #[must_use]
    pub fn new(term_buffer: AtomicBuffer, meta_buffer: AtomicBuffer, partition_index: usize) -> Self {
        Self {
            term_buffer,
            meta_buffer,
            tail_counter_offset: descriptor::tail_counter_offset(partition_index),
        }
    }

    /// Volatile read of this partition's raw tail.
    #[must_use]
    pub fn raw_tail_volatile(&self) -> i64 {
        self.meta_buffer.get_i64_volatile(self.tail_counter_offset)
    }

    /// Claim space for `length` payload bytes with zero-copy semantics.
    ///
    /// On success returns the packed result plus a [`BufferClaim`] the
    /// caller fills and commits. On `TRIPPED`/`FAILED` no claim is
    /// returned.
    pub fn claim(&self, header: &HeaderWriter, length: usize) -> (i64, Option<BufferClaim>) {
        let frame_length = length + HEADER_LENGTH;
        let aligned_length = align(frame_length, FRAME_ALIGNMENT);
        let raw_tail = self.get_and_add_raw_tail(aligned_length);
        let term_offset = raw_tail & 0xFFFF_FFFF;
        let term_id = descriptor::term_id(raw_tail);
        let term_length = self.term_buffer.capacity();

        let resulting_offset = term_offset + aligned_length as i64;
        if resulting_offset > term_length as i64 {
            let result = self.handle_end_of_log(header, term_offset, term_id);
            (result, None)
        } else {
            let offset = term_offset as usize;
            header.write(&self.term_buffer, offset, term_id);
            let claim = BufferClaim::new(self.term_buffer, offset, frame_length);
            (pack_tail(term_id, resulting_offset as i32), Some(claim))
        }
    }

    /// Append an unfragmented message.
    ///
    /// Returns the packed `(term_id, resulting_offset)` result, with
    /// `TRIPPED`/`FAILED` in the offset part at the end of the log.
    pub fn append_unfragmented(
        &self,
        header: &HeaderWriter,
        payload: &[u8],
        reserved_value_supplier: Option<ReservedValueSupplier<'_>>,
    ) -> i64 {
        let frame_length = payload.len() + HEADER_LENGTH;
        let aligned_length = align(frame_length, FRAME_ALIGNMENT);
        let raw_tail = self.get_and_add_raw_tail(aligned_length);
        let term_offset = raw_tail & 0xFFFF_FFFF;
        let term_id = descriptor::term_id(raw_tail);
        let term_length = self.term_buffer.capacity();

        let resulting_offset = term_offset + aligned_length as i64;
        if resulting_offset > term_length as i64 {
            return self.handle_end_of_log(header, term_offset, term_id);
        }

        let offset = term_offset as usize;
        header.write(&self.term_buffer, offset, term_id);
        self.term_buffer.put_bytes(offset + HEADER_LENGTH, payload);

        if let Some(supplier) = reserved_value_supplier {
            let reserved = supplier(&self.term_buffer, offset, frame_length);
            self.term_buffer
                .put_i64(frame::reserved_value_offset(offset), reserved);
        }

        frame::frame_length_ordered(&self.term_buffer, offset, frame_length as i32);

        pack_tail(term_id, resulting_offset as i32)
    }

    /// Append a message fragmented into MTU-bounded frames.
    ///
    /// All fragments are reserved in one fetch-and-add so they are
    /// contiguous; flags mark the begin and end fragments.
    pub fn append_fragmented(
        &self,
        header: &HeaderWriter,
        payload: &[u8],
        max_payload_length: usize,
        reserved_value_supplier: Option<ReservedValueSupplier<'_>>,
    ) -> i64 {
        let num_max_payloads = payload.len() / max_payload_length;
        let remaining_payload = payload.len() % max_payload_length;
        let last_frame_length = if remaining_payload > 0 {
            align(remaining_payload + HEADER_LENGTH, FRAME_ALIGNMENT)
        } else {
            0
        };
        let required_length =
            (num_max_payloads * (max_payload_length + HEADER_LENGTH)) + last_frame_length;

        let raw_tail = self.get_and_add_raw_tail(required_length);
        let term_offset = raw_tail & 0xFFFF_FFFF;
        let term_id = descriptor::term_id(raw_tail);
        let term_length = self.term_buffer.capacity();

        let resulting_offset = term_offset + required_length as i64;
        if resulting_offset > term_length as i64 {
            return self.handle_end_of_log(header, term_offset, term_id);
        }

        let mut flags = BEGIN_FRAG_FLAG;
        let mut offset = term_offset as usize;
        let mut remaining = payload.len();

        loop {
            let bytes_to_write = remaining.min(max_payload_length);
            let frame_length = bytes_to_write + HEADER_LENGTH;
            let aligned_length = align(frame_length, FRAME_ALIGNMENT);

            header.write(&self.term_buffer, offset, term_id);
            self.term_buffer.put_bytes(
                offset + HEADER_LENGTH,
                &payload[payload.len() - remaining..payload.len() - remaining + bytes_to_write],
            );

            if remaining <= max_payload_length {
                flags |= END_FRAG_FLAG;
            }
            frame::set_frame_flags(&self.term_buffer, offset, flags);

            if let Some(supplier) = reserved_value_supplier {
                let reserved = supplier(&self.term_buffer, offset, frame_length);
                self.term_buffer
                    .put_i64(frame::reserved_value_offset(offset), reserved);
            }

            frame::frame_length_ordered(&self.term_buffer, offset, frame_length as i32);

            flags = 0;
            offset += aligned_length;
            remaining -= bytes_to_write;

            if remaining == 0 {
                break;
            }
        }

        pack_tail(term_id, resulting_offset as i32)
    }

    fn handle_end_of_log(&self, header: &HeaderWriter, term_offset: i64, term_id: i32) -> i64 {
        let term_length = self.term_buffer.capacity() as i64;
        let mut resulting_offset = FAILED;

        if term_offset <= term_length {
            resulting_offset = TRIPPED;

            if term_offset < term_length {
                let offset = term_offset as usize;
                let padding_length = (term_length - term_offset) as usize;
                header.write(&self.term_buffer, offset, term_id);
                frame::set_frame_type(&self.term_buffer, offset, PADDING_FRAME_TYPE);
                frame::frame_length_ordered(&self.term_buffer, offset, padding_length as i32);
            }
        }

        pack_tail(term_id, resulting_offset)
    }

    fn get_and_add_raw_tail(&self, aligned_length: usize) -> i64 {
        self.meta_buffer
            .get_and_add_i64(self.tail_counter_offset, aligned_length as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::descriptor::{
        initialise_tail_with_term_id, LOG_META_DATA_LENGTH,
    };
    use crate::protocol::data::DataHeader;

    const TERM_LENGTH: usize = 64 * 1024;
    const TERM_ID: i32 = 7;

    struct Fixture {
        _term_backing: Vec<u8>,
        _meta_backing: Vec<u8>,
        term: AtomicBuffer,
        meta: AtomicBuffer,
        header: HeaderWriter,
    }

    fn fixture() -> Fixture {
        let mut term_backing = vec![0u8; TERM_LENGTH];
        let mut meta_backing = vec![0u8; LOG_META_DATA_LENGTH];
        let term = AtomicBuffer::wrap_slice(&mut term_backing);
        let meta = AtomicBuffer::wrap_slice(&mut meta_backing);
        initialise_tail_with_term_id(&meta, 0, TERM_ID);
        let header = HeaderWriter::new(&DataHeader::default_header(1, 10, TERM_ID));

        Fixture {
            _term_backing: term_backing,
            _meta_backing: meta_backing,
            term,
            meta,
            header,
        }
    }

    #[test]
    fn test_append_commits_frame_at_tail() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        let result = appender.append_unfragmented(&f.header, b"hello", None);
        assert_eq!(append_term_id(result), TERM_ID);
        assert_eq!(append_term_offset(result), 64); // 5 + 32 aligned to 32

        assert_eq!(frame::frame_length_volatile(&f.term, 0), 37);
        assert_eq!(frame::frame_term_id(&f.term, 0), TERM_ID);
        let mut payload = [0u8; 5];
        f.term.get_bytes(HEADER_LENGTH, &mut payload);
        assert_eq!(&payload, b"hello");
    }

    #[test]
    fn test_appends_are_disjoint_and_contiguous() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        let first = appender.append_unfragmented(&f.header, &[1u8; 32], None);
        let second = appender.append_unfragmented(&f.header, &[2u8; 32], None);

        assert_eq!(append_term_offset(first), 64);
        assert_eq!(append_term_offset(second), 128);
        assert_eq!(frame::frame_term_offset(&f.term, 64), 64);
    }

    #[test]
    fn test_claim_defers_commit() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        let (result, claim) = appender.claim(&f.header, 16);
        let claim = claim.expect("claim succeeds");
        assert_eq!(append_term_offset(result), 64);

        // Uncommitted: consumers still see zero length.
        assert_eq!(frame::frame_length_volatile(&f.term, 0), 0);

        claim.put_bytes(0, &[9u8; 16]);
        claim.commit();
        assert_eq!(frame::frame_length_volatile(&f.term, 0), 48);
    }

    #[test]
    fn test_aborted_claim_becomes_padding() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        let (_, claim) = appender.claim(&f.header, 16);
        claim.expect("claim succeeds").abort();

        assert_eq!(frame::frame_length_volatile(&f.term, 0), 48);
        assert!(frame::is_padding_frame(&f.term, 0));
    }

    #[test]
    fn test_trip_pads_remainder_and_reports() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        // Park the tail 64 bytes from the end of the term.
        initialise_tail_with_term_id(&f.meta, 0, TERM_ID);
        f.meta.put_i64(0, pack_tail(TERM_ID, (TERM_LENGTH - 64) as i32));

        let result = appender.append_unfragmented(&f.header, &[0u8; 96], None);
        assert_eq!(append_term_offset(result), TRIPPED);
        assert_eq!(append_term_id(result), TERM_ID);

        let pad_offset = TERM_LENGTH - 64;
        assert!(frame::is_padding_frame(&f.term, pad_offset));
        assert_eq!(frame::frame_length_volatile(&f.term, pad_offset), 64);
    }

    #[test]
    fn test_append_after_trip_fails() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        f.meta.put_i64(0, pack_tail(TERM_ID, (TERM_LENGTH - 64) as i32));
        let tripped = appender.append_unfragmented(&f.header, &[0u8; 96], None);
        assert_eq!(append_term_offset(tripped), TRIPPED);

        let failed = appender.append_unfragmented(&f.header, &[0u8; 96], None);
        assert_eq!(append_term_offset(failed), FAILED);
    }

    #[test]
    fn test_exact_fit_trips_without_padding() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        f.meta.put_i64(0, pack_tail(TERM_ID, TERM_LENGTH as i32));
        let result = appender.append_unfragmented(&f.header, &[0u8; 32], None);
        assert_eq!(append_term_offset(result), TRIPPED);
        // Offset equaled term length: no room for a padding header, none written.
        assert_eq!(frame::frame_length_volatile(&f.term, TERM_LENGTH - 32), 0);
    }

    #[test]
    fn test_fragmented_append_sets_boundary_flags() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        let payload = vec![5u8; 250];
        let result = appender.append_fragmented(&f.header, &payload, 100, None);
        assert!(append_term_offset(result) > 0);

        // Three fragments: 100, 100, 50 bytes of payload.
        let first_flags = frame::frame_flags(&f.term, 0);
        assert_eq!(first_flags & BEGIN_FRAG_FLAG, BEGIN_FRAG_FLAG);
        assert_eq!(first_flags & END_FRAG_FLAG, 0);

        let second_offset = align(132, FRAME_ALIGNMENT);
        let second_flags = frame::frame_flags(&f.term, second_offset);
        assert_eq!(second_flags & (BEGIN_FRAG_FLAG | END_FRAG_FLAG), 0);

        let third_offset = second_offset * 2;
        let third_flags = frame::frame_flags(&f.term, third_offset);
        assert_eq!(third_flags & END_FRAG_FLAG, END_FRAG_FLAG);
        assert_eq!(frame::frame_length_volatile(&f.term, third_offset), 82);
    }

    #[test]
    fn test_reserved_value_supplier_is_applied() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        let supplier = |_: &AtomicBuffer, _: usize, frame_length: usize| frame_length as i64;
        appender.append_unfragmented(&f.header, &[0u8; 8], Some(&supplier));

        assert_eq!(f.term.get_i64(frame::reserved_value_offset(0)), 40);
    }
}
