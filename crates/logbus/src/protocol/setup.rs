// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Setup frame (type 0x05): announces a stream's layout to receivers.
//!
//! Repeated by the sender every setup interval until a status message
//! confirms a receiver exists. The receiver creates its publication image
//! from these parameters.

use super::header::{FrameHeader, CURRENT_VERSION, HDR_TYPE_SETUP};
use std::convert::TryInto;

/// Length of the setup frame.
pub const SETUP_HEADER_LENGTH: usize = 40;

/// Setup frame fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupHeader {
    pub term_offset: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub initial_term_id: i32,
    pub active_term_id: i32,
    pub term_length: i32,
    pub mtu_length: i32,
    pub ttl: i32,
}

impl SetupHeader {
    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; SETUP_HEADER_LENGTH] {
        let mut buf = [0u8; SETUP_HEADER_LENGTH];
        FrameHeader {
            frame_length: SETUP_HEADER_LENGTH as i32,
            version: CURRENT_VERSION,
            flags: 0,
            frame_type: HDR_TYPE_SETUP,
        }
        .encode_into(&mut buf);
        buf[8..12].copy_from_slice(&self.term_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.session_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.stream_id.to_le_bytes());
        buf[20..24].copy_from_slice(&self.initial_term_id.to_le_bytes());
        buf[24..28].copy_from_slice(&self.active_term_id.to_le_bytes());
        buf[28..32].copy_from_slice(&self.term_length.to_le_bytes());
        buf[32..36].copy_from_slice(&self.mtu_length.to_le_bytes());
        buf[36..40].copy_from_slice(&self.ttl.to_le_bytes());
        buf
    }

    /// Decode from wire bytes.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < SETUP_HEADER_LENGTH {
            return None;
        }

        Some(Self {
            term_offset: i32::from_le_bytes(buf[8..12].try_into().ok()?),
            session_id: i32::from_le_bytes(buf[12..16].try_into().ok()?),
            stream_id: i32::from_le_bytes(buf[16..20].try_into().ok()?),
            initial_term_id: i32::from_le_bytes(buf[20..24].try_into().ok()?),
            active_term_id: i32::from_le_bytes(buf[24..28].try_into().ok()?),
            term_length: i32::from_le_bytes(buf[28..32].try_into().ok()?),
            mtu_length: i32::from_le_bytes(buf[32..36].try_into().ok()?),
            ttl: i32::from_le_bytes(buf[36..40].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let setup = SetupHeader {
            term_offset: 992,
            session_id: 42,
            stream_id: 1001,
            initial_term_id: -5,
            active_term_id: -3,
            term_length: 64 * 1024,
            mtu_length: 1408,
            ttl: 8,
        };

        let bytes = setup.encode();
        assert_eq!(FrameHeader::decode(&bytes).expect("header").frame_type, HDR_TYPE_SETUP);
        assert_eq!(SetupHeader::decode(&bytes), Some(setup));
    }
}
