// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data frame header (type 0x01), identical on the wire and in term logs.

use super::header::{FrameHeader, CURRENT_VERSION, HDR_TYPE_DATA};
use std::convert::TryInto;

/// First fragment of a message.
pub const BEGIN_FLAG: u8 = 0x80;
/// Last fragment of a message.
pub const END_FLAG: u8 = 0x40;
/// Producer has finalized the stream.
pub const EOS_FLAG: u8 = 0x20;
/// Unfragmented message flags.
pub const BEGIN_AND_END_FLAGS: u8 = BEGIN_FLAG | END_FLAG;
/// Heartbeat carrying end-of-stream notice.
pub const BEGIN_END_AND_EOS_FLAGS: u8 = BEGIN_FLAG | END_FLAG | EOS_FLAG;

/// Length of the data header.
pub const DATA_HEADER_LENGTH: usize = 32;

/// Data frame header.
///
/// A zero `frame_length` with type DATA is a heartbeat: it carries the
/// sender's current `(term_id, term_offset)` and, when flagged, EOS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub frame_length: i32,
    pub flags: u8,
    pub term_offset: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub term_id: i32,
    pub reserved_value: i64,
}

impl DataHeader {
    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; DATA_HEADER_LENGTH] {
        let mut buf = [0u8; DATA_HEADER_LENGTH];
        FrameHeader {
            frame_length: self.frame_length,
            version: CURRENT_VERSION,
            flags: self.flags,
            frame_type: HDR_TYPE_DATA,
        }
        .encode_into(&mut buf);
        buf[8..12].copy_from_slice(&self.term_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.session_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.stream_id.to_le_bytes());
        buf[20..24].copy_from_slice(&self.term_id.to_le_bytes());
        buf[24..32].copy_from_slice(&self.reserved_value.to_le_bytes());
        buf
    }

    /// Decode from wire bytes.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < DATA_HEADER_LENGTH {
            return None;
        }
        let header = FrameHeader::decode(buf)?;

        Some(Self {
            frame_length: header.frame_length,
            flags: header.flags,
            term_offset: i32::from_le_bytes(buf[8..12].try_into().ok()?),
            session_id: i32::from_le_bytes(buf[12..16].try_into().ok()?),
            stream_id: i32::from_le_bytes(buf[16..20].try_into().ok()?),
            term_id: i32::from_le_bytes(buf[20..24].try_into().ok()?),
            reserved_value: i64::from_le_bytes(buf[24..32].try_into().ok()?),
        })
    }

    /// Is this a heartbeat frame (zero length)?
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.frame_length == 0
    }

    /// Does the frame carry the end-of-stream flag?
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.flags & EOS_FLAG == EOS_FLAG
    }

    /// Default header template stored in a log's metadata trailer and
    /// applied to every appended frame.
    #[must_use]
    pub fn default_header(session_id: i32, stream_id: i32, initial_term_id: i32) -> [u8; DATA_HEADER_LENGTH] {
        DataHeader {
            frame_length: 0,
            flags: BEGIN_AND_END_FLAGS,
            term_offset: 0,
            session_id,
            stream_id,
            term_id: initial_term_id,
            reserved_value: 0,
        }
        .encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let header = DataHeader {
            frame_length: 1056,
            flags: BEGIN_AND_END_FLAGS,
            term_offset: 8192,
            session_id: -1234,
            stream_id: 1001,
            term_id: 77,
            reserved_value: 0x0123_4567_89AB_CDEF,
        };

        assert_eq!(DataHeader::decode(&header.encode()), Some(header));
    }

    #[test]
    fn test_heartbeat_and_eos_predicates() {
        let mut header = DataHeader {
            frame_length: 0,
            flags: BEGIN_END_AND_EOS_FLAGS,
            term_offset: 0,
            session_id: 1,
            stream_id: 1,
            term_id: 0,
            reserved_value: 0,
        };
        assert!(header.is_heartbeat());
        assert!(header.is_end_of_stream());

        header.flags = BEGIN_AND_END_FLAGS;
        assert!(!header.is_end_of_stream());
    }

    #[test]
    fn test_default_header_template() {
        let template = DataHeader::default_header(5, 50, 500);
        let decoded = DataHeader::decode(&template).expect("decode");
        assert_eq!(decoded.frame_length, 0);
        assert_eq!(decoded.session_id, 5);
        assert_eq!(decoded.stream_id, 50);
        assert_eq!(decoded.term_id, 500);
        assert_eq!(decoded.flags, BEGIN_AND_END_FLAGS);
    }
}
