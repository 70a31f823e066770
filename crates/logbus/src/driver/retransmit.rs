// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NAK-driven retransmission scheduling.
//!
//! A fixed pool of retransmit actions tracks in-flight ranges. A NAK whose
//! range is already covered by an active action is ignored. Unicast NAKs
//! fire immediately; multicast NAKs are delayed by a randomized backoff so
//! one retransmission can serve a crowd of receivers. After a resend the
//! action lingers, suppressing duplicate NAKs for the same loss.

use crate::config::RETRANSMIT_ACTION_POOL_SIZE;

/// Generates delays for NAK handling and retransmit pacing.
pub trait FeedbackDelayGenerator: Send {
    /// Next delay in nanoseconds; 0 means immediate.
    fn generate_delay_ns(&mut self) -> u64;
}

/// Fixed delay (0 for the unicast cases).
#[derive(Debug, Clone, Copy)]
pub struct StaticDelayGenerator {
    delay_ns: u64,
}

impl StaticDelayGenerator {
    #[must_use]
    pub fn new(delay_ns: u64) -> Self {
        Self { delay_ns }
    }
}

impl FeedbackDelayGenerator for StaticDelayGenerator {
    fn generate_delay_ns(&mut self) -> u64 {
        self.delay_ns
    }
}

/// Randomized delay in `[0, max_backoff_ns)` to stagger multicast crowds.
#[derive(Debug, Clone, Copy)]
pub struct RandomDelayGenerator {
    max_backoff_ns: u64,
}

impl RandomDelayGenerator {
    #[must_use]
    pub fn new(max_backoff_ns: u64) -> Self {
        Self { max_backoff_ns }
    }
}

impl FeedbackDelayGenerator for RandomDelayGenerator {
    fn generate_delay_ns(&mut self) -> u64 {
        if self.max_backoff_ns == 0 {
            0
        } else {
            fastrand::u64(..self.max_backoff_ns)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionState {
    Inactive,
    Delayed,
    Lingering,
}

#[derive(Debug, Clone, Copy)]
struct RetransmitAction {
    term_id: i32,
    term_offset: i32,
    length: i32,
    state: ActionState,
    expiry_ns: i64,
}

impl RetransmitAction {
    const fn idle() -> Self {
        Self {
            term_id: 0,
            term_offset: 0,
            length: 0,
            state: ActionState::Inactive,
            expiry_ns: 0,
        }
    }

    fn covers(&self, term_id: i32, term_offset: i32) -> bool {
        self.state != ActionState::Inactive
            && self.term_id == term_id
            && term_offset >= self.term_offset
            && term_offset < self.term_offset + self.length
    }
}

/// Per-publication retransmit scheduler.
pub struct RetransmitHandler {
    actions: [RetransmitAction; RETRANSMIT_ACTION_POOL_SIZE],
    delay_generator: Box<dyn FeedbackDelayGenerator>,
    linger_generator: Box<dyn FeedbackDelayGenerator>,
}

impl RetransmitHandler {
    #[must_use]
    pub fn new(
        delay_generator: Box<dyn FeedbackDelayGenerator>,
        linger_generator: Box<dyn FeedbackDelayGenerator>,
    ) -> Self {
        Self {
            actions: [RetransmitAction::idle(); RETRANSMIT_ACTION_POOL_SIZE],
            delay_generator,
            linger_generator,
        }
    }

    /// Handle a NAK for `(term_id, term_offset, length)`.
    ///
    /// `resend(term_id, term_offset, length)` fires immediately for
    /// zero-delay strategies, otherwise when the scheduled delay expires
    /// in [`RetransmitHandler::process_timeouts`].
    pub fn on_nak<F: FnMut(i32, i32, usize)>(
        &mut self,
        term_id: i32,
        term_offset: i32,
        length: i32,
        term_length: usize,
        now_ns: i64,
        mut resend: F,
    ) {
        if self.is_covered(term_id, term_offset) {
            return; // duplicate of an in-flight action
        }

        let Some(slot) = self
            .actions
            .iter_mut()
            .find(|a| a.state == ActionState::Inactive)
        else {
            return; // pool exhausted; later NAKs will retry
        };

        let length = length.min(term_length.saturating_sub(term_offset.max(0) as usize) as i32);
        slot.term_id = term_id;
        slot.term_offset = term_offset;
        slot.length = length;

        let delay = self.delay_generator.generate_delay_ns();
        if delay == 0 {
            resend(term_id, term_offset, length as usize);
            slot.state = ActionState::Lingering;
            slot.expiry_ns = now_ns + self.linger_generator.generate_delay_ns() as i64;
        } else {
            slot.state = ActionState::Delayed;
            slot.expiry_ns = now_ns + delay as i64;
        }
    }

    /// Fire expired delays and retire expired lingers.
    pub fn process_timeouts<F: FnMut(i32, i32, usize)>(&mut self, now_ns: i64, mut resend: F) {
        for i in 0..self.actions.len() {
            let action = self.actions[i];
            match action.state {
                ActionState::Delayed if now_ns >= action.expiry_ns => {
                    resend(action.term_id, action.term_offset, action.length as usize);
                    self.actions[i].state = ActionState::Lingering;
                    self.actions[i].expiry_ns =
                        now_ns + self.linger_generator.generate_delay_ns() as i64;
                }
                ActionState::Lingering if now_ns >= action.expiry_ns => {
                    self.actions[i].state = ActionState::Inactive;
                }
                _ => {}
            }
        }
    }

    fn is_covered(&self, term_id: i32, term_offset: i32) -> bool {
        self.actions.iter().any(|a| a.covers(term_id, term_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TERM_LENGTH: usize = 64 * 1024;

    fn unicast_handler() -> RetransmitHandler {
        RetransmitHandler::new(
            Box::new(StaticDelayGenerator::new(0)),
            Box::new(StaticDelayGenerator::new(60_000_000)),
        )
    }

    #[test]
    fn test_unicast_nak_fires_immediately() {
        let mut handler = unicast_handler();
        let mut resends = Vec::new();

        handler.on_nak(5, 1024, 4096, TERM_LENGTH, 0, |t, o, l| {
            resends.push((t, o, l));
        });

        assert_eq!(resends, vec![(5, 1024, 4096)]);
    }

    #[test]
    fn test_linger_suppresses_duplicate_naks() {
        let mut handler = unicast_handler();
        let mut resends = 0;

        handler.on_nak(5, 1024, 4096, TERM_LENGTH, 0, |_, _, _| resends += 1);
        // Same range, and a sub-range, while lingering.
        handler.on_nak(5, 1024, 4096, TERM_LENGTH, 10, |_, _, _| resends += 1);
        handler.on_nak(5, 2048, 128, TERM_LENGTH, 20, |_, _, _| resends += 1);
        assert_eq!(resends, 1);

        // After the linger expires the same NAK fires again.
        handler.process_timeouts(100_000_000, |_, _, _| resends += 1);
        handler.on_nak(5, 1024, 4096, TERM_LENGTH, 100_000_001, |_, _, _| resends += 1);
        assert_eq!(resends, 2);
    }

    #[test]
    fn test_delayed_nak_fires_on_timeout() {
        let mut handler = RetransmitHandler::new(
            Box::new(StaticDelayGenerator::new(1_000_000)),
            Box::new(StaticDelayGenerator::new(1_000_000)),
        );
        let mut resends = Vec::new();

        handler.on_nak(3, 0, 1024, TERM_LENGTH, 0, |t, o, l| resends.push((t, o, l)));
        assert!(resends.is_empty());

        handler.process_timeouts(999_999, |t, o, l| resends.push((t, o, l)));
        assert!(resends.is_empty());

        handler.process_timeouts(1_000_000, |t, o, l| resends.push((t, o, l)));
        assert_eq!(resends, vec![(3, 0, 1024)]);
    }

    #[test]
    fn test_different_terms_are_independent() {
        let mut handler = unicast_handler();
        let mut resends = 0;

        handler.on_nak(1, 0, 256, TERM_LENGTH, 0, |_, _, _| resends += 1);
        handler.on_nak(2, 0, 256, TERM_LENGTH, 0, |_, _, _| resends += 1);
        assert_eq!(resends, 2);
    }

    #[test]
    fn test_length_clamped_to_term_end() {
        let mut handler = unicast_handler();
        let mut resends = Vec::new();

        handler.on_nak(
            1,
            (TERM_LENGTH - 1024) as i32,
            8192,
            TERM_LENGTH,
            0,
            |t, o, l| resends.push((t, o, l)),
        );
        assert_eq!(resends, vec![(1, (TERM_LENGTH - 1024) as i32, 1024)]);
    }

    #[test]
    fn test_random_delay_bounded() {
        let mut generator = RandomDelayGenerator::new(1000);
        for _ in 0..100 {
            assert!(generator.generate_delay_ns() < 1000);
        }
        let mut zero = RandomDelayGenerator::new(0);
        assert_eq!(zero.generate_delay_ns(), 0);
    }
}
