// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Flow-control strategies deriving the sender limit from status messages.
//!
//! The sender calls [`FlowControl::on_status_message`] for every SM and
//! [`FlowControl::on_idle`] only on duty cycles that sent nothing; the
//! returned limit is release-stored into `sender_limit` by the caller.

use crate::config::FLOW_CONTROL_RECEIVER_TIMEOUT_NS;
use crate::logbuffer::descriptor::compute_position;
use crate::protocol::status::StatusMessage;
use std::net::SocketAddr;

/// Strategy interface: position limit beyond which the sender must not
/// transmit.
pub trait FlowControl: Send {
    /// Called once when the owning publication is created.
    fn initialize(&mut self, initial_term_id: i32, term_length: usize);

    /// Incorporate a status message and return the new sender limit.
    #[allow(clippy::too_many_arguments)]
    fn on_status_message(
        &mut self,
        msg: &StatusMessage,
        src: SocketAddr,
        sender_limit: i64,
        initial_term_id: i32,
        position_bits_to_shift: u32,
        now_ns: i64,
    ) -> i64;

    /// Let the strategy decay its state on an idle cycle; returns the
    /// possibly-reduced limit.
    fn on_idle(&mut self, now_ns: i64, sender_limit: i64) -> i64;
}

fn message_position(msg: &StatusMessage, initial_term_id: i32, bits: u32) -> i64 {
    compute_position(
        msg.consumption_term_id,
        msg.consumption_term_offset,
        bits,
        initial_term_id,
    )
}

// =======================================================================
// Unicast
// =======================================================================

/// Unicast: one receiver, its consumption point plus its window.
#[derive(Debug, Default)]
pub struct UnicastFlowControl;

impl FlowControl for UnicastFlowControl {
    fn initialize(&mut self, _initial_term_id: i32, _term_length: usize) {}

    fn on_status_message(
        &mut self,
        msg: &StatusMessage,
        _src: SocketAddr,
        sender_limit: i64,
        initial_term_id: i32,
        position_bits_to_shift: u32,
        _now_ns: i64,
    ) -> i64 {
        let position = message_position(msg, initial_term_id, position_bits_to_shift);
        sender_limit.max(position + i64::from(msg.receiver_window_length))
    }

    fn on_idle(&mut self, _now_ns: i64, sender_limit: i64) -> i64 {
        sender_limit
    }
}

// =======================================================================
// Multicast max
// =======================================================================

/// Multicast, optimistic: run at the fastest receiver; slow receivers
/// recover via NAK or fall behind.
#[derive(Debug, Default)]
pub struct MaxMulticastFlowControl;

impl FlowControl for MaxMulticastFlowControl {
    fn initialize(&mut self, _initial_term_id: i32, _term_length: usize) {}

    fn on_status_message(
        &mut self,
        msg: &StatusMessage,
        _src: SocketAddr,
        sender_limit: i64,
        initial_term_id: i32,
        position_bits_to_shift: u32,
        _now_ns: i64,
    ) -> i64 {
        let position = message_position(msg, initial_term_id, position_bits_to_shift);
        sender_limit.max(position + i64::from(msg.receiver_window_length))
    }

    fn on_idle(&mut self, _now_ns: i64, sender_limit: i64) -> i64 {
        sender_limit
    }
}

// =======================================================================
// Multicast min
// =======================================================================

#[derive(Debug)]
struct TrackedReceiver {
    receiver_id: i64,
    last_position: i64,
    last_position_plus_window: i64,
    time_of_last_status_message_ns: i64,
}

/// Multicast, conservative: run at the slowest live receiver. Receivers
/// silent past the timeout stop holding the stream back.
#[derive(Debug)]
pub struct MinMulticastFlowControl {
    receivers: Vec<TrackedReceiver>,
    receiver_timeout_ns: i64,
}

impl MinMulticastFlowControl {
    #[must_use]
    pub fn new() -> Self {
        Self {
            receivers: Vec::new(),
            receiver_timeout_ns: FLOW_CONTROL_RECEIVER_TIMEOUT_NS as i64,
        }
    }

    fn track(&mut self, msg: &StatusMessage, position: i64, now_ns: i64) {
        let window_edge = position + i64::from(msg.receiver_window_length);
        match self
            .receivers
            .iter_mut()
            .find(|r| r.receiver_id == msg.receiver_id)
        {
            Some(receiver) => {
                receiver.last_position = receiver.last_position.max(position);
                receiver.last_position_plus_window = window_edge;
                receiver.time_of_last_status_message_ns = now_ns;
            }
            None => self.receivers.push(TrackedReceiver {
                receiver_id: msg.receiver_id,
                last_position: position,
                last_position_plus_window: window_edge,
                time_of_last_status_message_ns: now_ns,
            }),
        }
    }

    fn min_window_edge(&self, fallback: i64) -> i64 {
        self.receivers
            .iter()
            .map(|r| r.last_position_plus_window)
            .min()
            .unwrap_or(fallback)
    }
}

impl Default for MinMulticastFlowControl {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowControl for MinMulticastFlowControl {
    fn initialize(&mut self, _initial_term_id: i32, _term_length: usize) {}

    fn on_status_message(
        &mut self,
        msg: &StatusMessage,
        _src: SocketAddr,
        sender_limit: i64,
        initial_term_id: i32,
        position_bits_to_shift: u32,
        now_ns: i64,
    ) -> i64 {
        let position = message_position(msg, initial_term_id, position_bits_to_shift);
        self.track(msg, position, now_ns);
        self.min_window_edge(sender_limit)
    }

    fn on_idle(&mut self, now_ns: i64, sender_limit: i64) -> i64 {
        let timeout = self.receiver_timeout_ns;
        self.receivers
            .retain(|r| now_ns.saturating_sub(r.time_of_last_status_message_ns) <= timeout);
        self.min_window_edge(sender_limit)
    }
}

// =======================================================================
// Multicast tagged
// =======================================================================

/// Tag carried in SM feedback for group membership (first 8 bytes, LE).
#[must_use]
pub fn feedback_tag(msg: &StatusMessage) -> Option<i64> {
    if msg.feedback.len() < 8 {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&msg.feedback[..8]);
    Some(i64::from_le_bytes(bytes))
}

/// Multicast min restricted to receivers carrying a matching feedback
/// tag; untagged receivers get the data but do not gate the stream.
#[derive(Debug)]
pub struct TaggedMulticastFlowControl {
    inner: MinMulticastFlowControl,
    group_tag: i64,
}

impl TaggedMulticastFlowControl {
    #[must_use]
    pub fn new(group_tag: i64) -> Self {
        Self {
            inner: MinMulticastFlowControl::new(),
            group_tag,
        }
    }
}

impl FlowControl for TaggedMulticastFlowControl {
    fn initialize(&mut self, initial_term_id: i32, term_length: usize) {
        self.inner.initialize(initial_term_id, term_length);
    }

    fn on_status_message(
        &mut self,
        msg: &StatusMessage,
        src: SocketAddr,
        sender_limit: i64,
        initial_term_id: i32,
        position_bits_to_shift: u32,
        now_ns: i64,
    ) -> i64 {
        if feedback_tag(msg) != Some(self.group_tag) {
            return sender_limit;
        }
        self.inner.on_status_message(
            msg,
            src,
            sender_limit,
            initial_term_id,
            position_bits_to_shift,
            now_ns,
        )
    }

    fn on_idle(&mut self, now_ns: i64, sender_limit: i64) -> i64 {
        self.inner.on_idle(now_ns, sender_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BITS: u32 = 16; // 64 KiB terms
    const INITIAL_TERM_ID: i32 = 0;

    fn sm(receiver_id: i64, term_id: i32, term_offset: i32, window: i32) -> StatusMessage {
        StatusMessage {
            flags: 0,
            session_id: 1,
            stream_id: 1,
            consumption_term_id: term_id,
            consumption_term_offset: term_offset,
            receiver_window_length: window,
            receiver_id,
            feedback: Vec::new(),
        }
    }

    fn src() -> SocketAddr {
        "127.0.0.1:40123".parse().expect("addr")
    }

    #[test]
    fn test_unicast_limit_is_position_plus_window() {
        let mut fc = UnicastFlowControl;
        let limit = fc.on_status_message(&sm(1, 0, 4096, 65536), src(), 0, INITIAL_TERM_ID, BITS, 0);
        assert_eq!(limit, 4096 + 65536);

        // A stale SM never pulls the limit backwards.
        let limit = fc.on_status_message(&sm(1, 0, 0, 1024), src(), limit, INITIAL_TERM_ID, BITS, 0);
        assert_eq!(limit, 4096 + 65536);
    }

    #[test]
    fn test_min_multicast_tracks_slowest_receiver() {
        let mut fc = MinMulticastFlowControl::new();

        let limit = fc.on_status_message(&sm(1, 0, 8192, 4096), src(), 0, INITIAL_TERM_ID, BITS, 0);
        assert_eq!(limit, 8192 + 4096);

        let limit =
            fc.on_status_message(&sm(2, 0, 1024, 4096), src(), limit, INITIAL_TERM_ID, BITS, 0);
        assert_eq!(limit, 1024 + 4096);
    }

    #[test]
    fn test_min_multicast_expires_silent_receivers() {
        let mut fc = MinMulticastFlowControl::new();

        fc.on_status_message(&sm(1, 0, 8192, 4096), src(), 0, INITIAL_TERM_ID, BITS, 0);
        let limit =
            fc.on_status_message(&sm(2, 0, 1024, 4096), src(), 0, INITIAL_TERM_ID, BITS, 1000);
        assert_eq!(limit, 1024 + 4096);

        // Both receivers go silent past the timeout and stop gating.
        let after = (FLOW_CONTROL_RECEIVER_TIMEOUT_NS + 2000) as i64;
        let limit = fc.on_idle(after, limit);
        // Everyone expired: limit holds (no receiver left to gate on).
        assert_eq!(limit, 1024 + 4096);

        // A fresh SM re-establishes tracking.
        let limit = fc.on_status_message(&sm(1, 1, 0, 2048), src(), limit, INITIAL_TERM_ID, BITS, after);
        assert_eq!(limit, 65536 + 2048);
    }

    #[test]
    fn test_tagged_ignores_wrong_tag() {
        let mut fc = TaggedMulticastFlowControl::new(42);

        let mut tagged = sm(1, 0, 1024, 4096);
        tagged.feedback = 42i64.to_le_bytes().to_vec();
        let mut untagged = sm(2, 0, 64, 128);
        untagged.feedback = 7i64.to_le_bytes().to_vec();

        let limit = fc.on_status_message(&tagged, src(), 0, INITIAL_TERM_ID, BITS, 0);
        assert_eq!(limit, 1024 + 4096);

        // Wrong tag: no effect on the limit.
        let limit = fc.on_status_message(&untagged, src(), limit, INITIAL_TERM_ID, BITS, 0);
        assert_eq!(limit, 1024 + 4096);
    }

    #[test]
    fn test_feedback_tag_parsing() {
        let mut msg = sm(1, 0, 0, 0);
        assert_eq!(feedback_tag(&msg), None);
        msg.feedback = 99i64.to_le_bytes().to_vec();
        assert_eq!(feedback_tag(&msg), Some(99));
    }
}
