// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer-side fragment reader over one term partition.
//!
//! Walks committed frames from an offset, delivering data fragments to a
//! handler and skipping padding. Used by spy subscribers and by tests to
//! verify what producers committed.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::logbuffer::frame::{self, HEADER_LENGTH};

/// Header fields of a delivered fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_length: i32,
    pub flags: u8,
    pub session_id: i32,
    pub stream_id: i32,
    pub term_id: i32,
    pub term_offset: i32,
}

/// Read up to `fragments_limit` data fragments starting at `term_offset`.
///
/// `handler(payload, header)` receives each fragment's payload slice.
/// Returns `(new_offset, fragments_read)`; the new offset accounts for
/// padding skipped at the end of the term.
pub fn read<F: FnMut(&[u8], FragmentHeader)>(
    term_buffer: &AtomicBuffer,
    term_offset: usize,
    fragments_limit: usize,
    mut handler: F,
) -> (usize, usize) {
    let capacity = term_buffer.capacity();
    let mut offset = term_offset;
    let mut fragments_read = 0;

    while fragments_read < fragments_limit && offset < capacity {
        let frame_length = frame::frame_length_volatile(term_buffer, offset);
        if frame_length <= 0 {
            break;
        }

        let frame_offset = offset;
        offset += frame::aligned_frame_length(frame_length) as usize;

        if frame::is_padding_frame(term_buffer, frame_offset) {
            continue;
        }

        let header = FragmentHeader {
            frame_length,
            flags: frame::frame_flags(term_buffer, frame_offset),
            session_id: frame::frame_session_id(term_buffer, frame_offset),
            stream_id: frame::frame_stream_id(term_buffer, frame_offset),
            term_id: frame::frame_term_id(term_buffer, frame_offset),
            term_offset: frame::frame_term_offset(term_buffer, frame_offset),
        };

        let payload = term_buffer.slice(
            frame_offset + HEADER_LENGTH,
            frame_length as usize - HEADER_LENGTH,
        );
        handler(payload, header);
        fragments_read += 1;
    }

    (offset, fragments_read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::descriptor::{initialise_tail_with_term_id, LOG_META_DATA_LENGTH};
    use crate::logbuffer::header_writer::HeaderWriter;
    use crate::logbuffer::term_appender::TermAppender;
    use crate::protocol::data::DataHeader;

    const TERM_LENGTH: usize = 64 * 1024;

    #[test]
    fn test_reads_back_appended_fragments_in_order() {
        let mut term_backing = vec![0u8; TERM_LENGTH];
        let mut meta_backing = vec![0u8; LOG_META_DATA_LENGTH];
        let term = AtomicBuffer::wrap_slice(&mut term_backing);
        let meta = AtomicBuffer::wrap_slice(&mut meta_backing);
        initialise_tail_with_term_id(&meta, 0, 3);

        let header = HeaderWriter::new(&DataHeader::default_header(5, 50, 3));
        let appender = TermAppender::new(term, meta, 0);

        let payloads: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 40 + i as usize]).collect();
        for p in &payloads {
            appender.append_unfragmented(&header, p, None);
        }

        let mut seen = Vec::new();
        let (offset, count) = read(&term, 0, usize::MAX, |payload, hdr| {
            assert_eq!(hdr.session_id, 5);
            assert_eq!(hdr.stream_id, 50);
            assert_eq!(hdr.term_id, 3);
            seen.push(payload.to_vec());
        });

        assert_eq!(count, 10);
        assert_eq!(seen, payloads);
        assert!(offset > 0);

        // No further fragments from the same offset.
        let (_, more) = read(&term, offset, usize::MAX, |_, _| {});
        assert_eq!(more, 0);
    }

    #[test]
    fn test_respects_fragment_limit() {
        let mut term_backing = vec![0u8; TERM_LENGTH];
        let mut meta_backing = vec![0u8; LOG_META_DATA_LENGTH];
        let term = AtomicBuffer::wrap_slice(&mut term_backing);
        let meta = AtomicBuffer::wrap_slice(&mut meta_backing);
        initialise_tail_with_term_id(&meta, 0, 0);

        let header = HeaderWriter::new(&DataHeader::default_header(1, 1, 0));
        let appender = TermAppender::new(term, meta, 0);
        for _ in 0..5 {
            appender.append_unfragmented(&header, &[7u8; 8], None);
        }

        let (offset, count) = read(&term, 0, 2, |_, _| {});
        assert_eq!(count, 2);
        let (_, rest) = read(&term, offset, usize::MAX, |_, _| {});
        assert_eq!(rest, 3);
    }
}
