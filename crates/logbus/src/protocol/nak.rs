// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NAK frame (type 0x02): requests retransmission of a term range.

use super::header::{FrameHeader, CURRENT_VERSION, HDR_TYPE_NAK};
use std::convert::TryInto;

/// Length of the NAK frame.
pub const NAK_HEADER_LENGTH: usize = 28;

/// NAK fields: the `(term_id, term_offset, length)` range to resend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NakHeader {
    pub session_id: i32,
    pub stream_id: i32,
    pub term_id: i32,
    pub term_offset: i32,
    pub length: i32,
}

impl NakHeader {
    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; NAK_HEADER_LENGTH] {
        let mut buf = [0u8; NAK_HEADER_LENGTH];
        FrameHeader {
            frame_length: NAK_HEADER_LENGTH as i32,
            version: CURRENT_VERSION,
            flags: 0,
            frame_type: HDR_TYPE_NAK,
        }
        .encode_into(&mut buf);
        buf[8..12].copy_from_slice(&self.session_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.stream_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.term_id.to_le_bytes());
        buf[20..24].copy_from_slice(&self.term_offset.to_le_bytes());
        buf[24..28].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Decode from wire bytes.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < NAK_HEADER_LENGTH {
            return None;
        }

        Some(Self {
            session_id: i32::from_le_bytes(buf[8..12].try_into().ok()?),
            stream_id: i32::from_le_bytes(buf[12..16].try_into().ok()?),
            term_id: i32::from_le_bytes(buf[16..20].try_into().ok()?),
            term_offset: i32::from_le_bytes(buf[20..24].try_into().ok()?),
            length: i32::from_le_bytes(buf[24..28].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let nak = NakHeader {
            session_id: 9,
            stream_id: 900,
            term_id: 12,
            term_offset: 65536,
            length: 4096,
        };

        let bytes = nak.encode();
        assert_eq!(FrameHeader::decode(&bytes).expect("header").frame_type, HDR_TYPE_NAK);
        assert_eq!(NakHeader::decode(&bytes), Some(nak));
    }
}
