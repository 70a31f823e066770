// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer of default frame headers into claimed term regions.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::logbuffer::frame::HEADER_LENGTH;

const TERM_OFFSET_OFFSET: usize = 8;
const TERM_ID_OFFSET: usize = 20;

/// Applies the prebuilt default header (version, flags, type, session id,
/// stream id) to each claimed frame, injecting the per-frame term offset
/// and term id.
///
/// The frame length word is NOT written here: it stays zero until the
/// appender commits the frame with a release store.
#[derive(Clone)]
pub struct HeaderWriter {
    template: [u8; HEADER_LENGTH],
}

impl HeaderWriter {
    /// Build from a stream's default header template (from the log
    /// metadata trailer).
    #[must_use]
    pub fn new(default_header: &[u8]) -> Self {
        let mut template = [0u8; HEADER_LENGTH];
        let len = default_header.len().min(HEADER_LENGTH);
        template[..len].copy_from_slice(&default_header[..len]);
        Self { template }
    }

    /// Write the header for a frame claimed at `term_offset`.
    pub fn write(&self, term_buffer: &AtomicBuffer, term_offset: usize, term_id: i32) {
        // Version, flags, type, session id, stream id come from the
        // template; the length word (bytes 0..4) is skipped so the frame
        // stays uncommitted.
        term_buffer.put_bytes(term_offset + 4, &self.template[4..HEADER_LENGTH]);
        term_buffer.put_i32(term_offset + TERM_OFFSET_OFFSET, term_offset as i32);
        term_buffer.put_i32(term_offset + TERM_ID_OFFSET, term_id);
    }
}
