// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Status message (type 0x03): receiver feedback driving flow control.
//!
//! Carries the consumption point and the receiver window; the sender's
//! flow-control strategy turns these into the sender limit. The
//! setup-flag variant asks the sender to re-announce the stream layout.

use super::header::{FrameHeader, CURRENT_VERSION, HDR_TYPE_SM};
use std::convert::TryInto;

/// Receiver requests a SETUP frame (unknown session seen on data).
pub const SEND_SETUP_FLAG: u8 = 0x80;

/// Length of the fixed part; application feedback may follow.
pub const SM_HEADER_LENGTH: usize = 36;

/// Status message fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub flags: u8,
    pub session_id: i32,
    pub stream_id: i32,
    pub consumption_term_id: i32,
    pub consumption_term_offset: i32,
    pub receiver_window_length: i32,
    pub receiver_id: i64,
    /// Application-specific feedback (group tags for tagged flow control).
    pub feedback: Vec<u8>,
}

impl StatusMessage {
    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SM_HEADER_LENGTH + self.feedback.len()];
        FrameHeader {
            frame_length: buf.len() as i32,
            version: CURRENT_VERSION,
            flags: self.flags,
            frame_type: HDR_TYPE_SM,
        }
        .encode_into(&mut buf);
        buf[8..12].copy_from_slice(&self.session_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.stream_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.consumption_term_id.to_le_bytes());
        buf[20..24].copy_from_slice(&self.consumption_term_offset.to_le_bytes());
        buf[24..28].copy_from_slice(&self.receiver_window_length.to_le_bytes());
        buf[28..36].copy_from_slice(&self.receiver_id.to_le_bytes());
        buf[SM_HEADER_LENGTH..].copy_from_slice(&self.feedback);
        buf
    }

    /// Decode from wire bytes.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < SM_HEADER_LENGTH {
            return None;
        }
        let header = FrameHeader::decode(buf)?;
        let frame_length = (header.frame_length as usize).min(buf.len());

        Some(Self {
            flags: header.flags,
            session_id: i32::from_le_bytes(buf[8..12].try_into().ok()?),
            stream_id: i32::from_le_bytes(buf[12..16].try_into().ok()?),
            consumption_term_id: i32::from_le_bytes(buf[16..20].try_into().ok()?),
            consumption_term_offset: i32::from_le_bytes(buf[20..24].try_into().ok()?),
            receiver_window_length: i32::from_le_bytes(buf[24..28].try_into().ok()?),
            receiver_id: i64::from_le_bytes(buf[28..36].try_into().ok()?),
            feedback: buf[SM_HEADER_LENGTH..frame_length].to_vec(),
        })
    }

    /// Does the message ask for a SETUP frame?
    #[must_use]
    pub fn is_send_setup(&self) -> bool {
        self.flags & SEND_SETUP_FLAG == SEND_SETUP_FLAG
    }
}
