// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTT measurement frame (type 0x06).
//!
//! A receiver probes with an echo timestamp; the sender replies with the
//! REPLY flag, echoing the timestamp so the receiver can measure the
//! round trip.

use super::header::{FrameHeader, CURRENT_VERSION, HDR_TYPE_RTT};
use std::convert::TryInto;

/// This frame is a reply to a probe.
pub const RTT_REPLY_FLAG: u8 = 0x80;

/// Length of the RTT frame.
pub const RTT_HEADER_LENGTH: usize = 40;

/// RTT measurement fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttMeasurement {
    pub flags: u8,
    pub session_id: i32,
    pub stream_id: i32,
    pub echo_timestamp_ns: i64,
    pub reception_delta_ns: i64,
    pub receiver_id: i64,
}

impl RttMeasurement {
    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; RTT_HEADER_LENGTH] {
        let mut buf = [0u8; RTT_HEADER_LENGTH];
        FrameHeader {
            frame_length: RTT_HEADER_LENGTH as i32,
            version: CURRENT_VERSION,
            flags: self.flags,
            frame_type: HDR_TYPE_RTT,
        }
        .encode_into(&mut buf);
        buf[8..12].copy_from_slice(&self.session_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.stream_id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.echo_timestamp_ns.to_le_bytes());
        buf[24..32].copy_from_slice(&self.reception_delta_ns.to_le_bytes());
        buf[32..40].copy_from_slice(&self.receiver_id.to_le_bytes());
        buf
    }

    /// Decode from wire bytes.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < RTT_HEADER_LENGTH {
            return None;
        }
        let header = FrameHeader::decode(buf)?;

        Some(Self {
            flags: header.flags,
            session_id: i32::from_le_bytes(buf[8..12].try_into().ok()?),
            stream_id: i32::from_le_bytes(buf[12..16].try_into().ok()?),
            echo_timestamp_ns: i64::from_le_bytes(buf[16..24].try_into().ok()?),
            reception_delta_ns: i64::from_le_bytes(buf[24..32].try_into().ok()?),
            receiver_id: i64::from_le_bytes(buf[32..40].try_into().ok()?),
        })
    }

    /// Is this a reply to a probe?
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.flags & RTT_REPLY_FLAG == RTT_REPLY_FLAG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let rtt = RttMeasurement {
            flags: RTT_REPLY_FLAG,
            session_id: 4,
            stream_id: 44,
            echo_timestamp_ns: 1_234_567_890,
            reception_delta_ns: -50,
            receiver_id: 777,
        };

        let decoded = RttMeasurement::decode(&rtt.encode()).expect("decode");
        assert_eq!(decoded, rtt);
        assert!(decoded.is_reply());
    }
}
