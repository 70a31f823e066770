// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame descriptor: layout and accessors for frames within a term buffer.
//!
//! Every frame starts with the 32-byte data header (identical to the wire
//! format, so a committed range can be handed to the socket untouched):
//!
//! ```text
//!   0        4      5      6        8
//!   +--------+------+------+--------+
//!   |frame len|ver  |flags | type   |
//!   +--------+------+------+--------+
//!   | term offset   | session id    |
//!   +---------------+---------------+
//!   | stream id     | term id       |
//!   +---------------+---------------+
//!   |        reserved value         |
//!   +-------------------------------+
//!   | payload ...
//! ```
//!
//! `frame_length` is the commit gate: it is zero from buffer cleaning until
//! the producer release-stores the final length, and consumers must
//! acquire-load it before touching any other field of the frame.

use crate::bits::align_i32;
use crate::concurrent::atomic_buffer::AtomicBuffer;

/// Length of the frame header in bytes.
pub const HEADER_LENGTH: usize = 32;

/// Frames are aligned on this boundary within a term.
pub const FRAME_ALIGNMENT: usize = 32;

/// Frame type for padding at the end of a term.
pub const PADDING_FRAME_TYPE: u16 = 0x00;

/// Frame type for data frames.
pub const DATA_FRAME_TYPE: u16 = 0x01;

/// Current protocol version.
pub const CURRENT_VERSION: u8 = 0x0;

/// First fragment of a message.
pub const BEGIN_FRAG_FLAG: u8 = 0x80;
/// Last fragment of a message.
pub const END_FRAG_FLAG: u8 = 0x40;
/// Producer finalized the stream at this frame.
pub const EOS_FLAG: u8 = 0x20;
/// Unfragmented: both begin and end.
pub const UNFRAGMENTED: u8 = BEGIN_FRAG_FLAG | END_FRAG_FLAG;

const VERSION_OFFSET: usize = 4;
const FLAGS_OFFSET: usize = 5;
const TYPE_OFFSET: usize = 6;
const TERM_OFFSET_OFFSET: usize = 8;
const SESSION_ID_OFFSET: usize = 12;
const STREAM_ID_OFFSET: usize = 16;
const TERM_ID_OFFSET: usize = 20;
const RESERVED_VALUE_OFFSET: usize = 24;

/// Offset of the reserved value field within a frame.
#[inline]
#[must_use]
pub const fn reserved_value_offset(frame_offset: usize) -> usize {
    frame_offset + RESERVED_VALUE_OFFSET
}

/// Acquire-load of a frame's length. Zero means not yet committed.
#[inline]
#[must_use]
pub fn frame_length_volatile(buffer: &AtomicBuffer, frame_offset: usize) -> i32 {
    buffer.get_i32_volatile(frame_offset)
}

/// Commit a frame: release-store its final length.
#[inline]
pub fn frame_length_ordered(buffer: &AtomicBuffer, frame_offset: usize, length: i32) {
    buffer.put_i32_ordered(frame_offset, length);
}

/// Frame type field.
#[inline]
#[must_use]
pub fn frame_type(buffer: &AtomicBuffer, frame_offset: usize) -> u16 {
    u16::from_le_bytes([
        buffer.get_u8(frame_offset + TYPE_OFFSET),
        buffer.get_u8(frame_offset + TYPE_OFFSET + 1),
    ])
}

/// Set the frame type field.
#[inline]
pub fn set_frame_type(buffer: &AtomicBuffer, frame_offset: usize, frame_type: u16) {
    let bytes = frame_type.to_le_bytes();
    buffer.put_u8(frame_offset + TYPE_OFFSET, bytes[0]);
    buffer.put_u8(frame_offset + TYPE_OFFSET + 1, bytes[1]);
}

/// Is the frame at `frame_offset` a padding frame?
#[inline]
#[must_use]
pub fn is_padding_frame(buffer: &AtomicBuffer, frame_offset: usize) -> bool {
    frame_type(buffer, frame_offset) == PADDING_FRAME_TYPE
}

/// Frame flags field.
#[inline]
#[must_use]
pub fn frame_flags(buffer: &AtomicBuffer, frame_offset: usize) -> u8 {
    buffer.get_u8(frame_offset + FLAGS_OFFSET)
}

/// Set the frame flags field.
#[inline]
pub fn set_frame_flags(buffer: &AtomicBuffer, frame_offset: usize, flags: u8) {
    buffer.put_u8(frame_offset + FLAGS_OFFSET, flags);
}

/// Protocol version field.
#[inline]
#[must_use]
pub fn frame_version(buffer: &AtomicBuffer, frame_offset: usize) -> u8 {
    buffer.get_u8(frame_offset + VERSION_OFFSET)
}

/// Term offset field.
#[inline]
#[must_use]
pub fn frame_term_offset(buffer: &AtomicBuffer, frame_offset: usize) -> i32 {
    buffer.get_i32(frame_offset + TERM_OFFSET_OFFSET)
}

/// Session id field.
#[inline]
#[must_use]
pub fn frame_session_id(buffer: &AtomicBuffer, frame_offset: usize) -> i32 {
    buffer.get_i32(frame_offset + SESSION_ID_OFFSET)
}

/// Stream id field.
#[inline]
#[must_use]
pub fn frame_stream_id(buffer: &AtomicBuffer, frame_offset: usize) -> i32 {
    buffer.get_i32(frame_offset + STREAM_ID_OFFSET)
}

/// Term id field.
#[inline]
#[must_use]
pub fn frame_term_id(buffer: &AtomicBuffer, frame_offset: usize) -> i32 {
    buffer.get_i32(frame_offset + TERM_ID_OFFSET)
}

/// Frame length aligned to [`FRAME_ALIGNMENT`].
#[inline]
#[must_use]
pub fn aligned_frame_length(length: i32) -> i32 {
    align_i32(length, FRAME_ALIGNMENT as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term() -> (Vec<u8>, AtomicBuffer) {
        let mut backing = vec![0u8; 1024];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);
        (backing, buffer)
    }

    #[test]
    fn test_commit_gate_round_trip() {
        let (_backing, buffer) = term();

        assert_eq!(frame_length_volatile(&buffer, 0), 0);
        frame_length_ordered(&buffer, 0, 96);
        assert_eq!(frame_length_volatile(&buffer, 0), 96);
    }

    #[test]
    fn test_type_and_flags_fields() {
        let (_backing, buffer) = term();

        set_frame_type(&buffer, 64, DATA_FRAME_TYPE);
        set_frame_flags(&buffer, 64, UNFRAGMENTED | EOS_FLAG);

        assert_eq!(frame_type(&buffer, 64), DATA_FRAME_TYPE);
        assert!(!is_padding_frame(&buffer, 64));
        assert_eq!(frame_flags(&buffer, 64) & BEGIN_FRAG_FLAG, BEGIN_FRAG_FLAG);
        assert_eq!(frame_flags(&buffer, 64) & EOS_FLAG, EOS_FLAG);

        set_frame_type(&buffer, 0, PADDING_FRAME_TYPE);
        assert!(is_padding_frame(&buffer, 0));
    }

    #[test]
    fn test_aligned_frame_length() {
        assert_eq!(aligned_frame_length(32), 32);
        assert_eq!(aligned_frame_length(33), 64);
        assert_eq!(aligned_frame_length(1), 32);
    }
}
