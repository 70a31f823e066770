// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Idle strategies for agent duty cycles.
//!
//! An agent calls [`IdleStrategy::idle`] with the work count of its last
//! duty cycle; a zero count escalates the strategy's waiting behavior,
//! any work resets it.

use std::thread;
use std::time::Duration;

/// How an agent waits when a duty cycle does no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleStrategy {
    /// Burn the core; lowest latency, one core per agent.
    BusySpin,
    /// Yield to the OS scheduler.
    Yielding,
    /// Sleep a fixed period.
    Sleeping(Duration),
    /// Spin, then yield, then park for escalating periods.
    Backoff {
        max_spins: u32,
        max_yields: u32,
        min_park: Duration,
        max_park: Duration,
    },
}

/// Default backoff: spin briefly, yield briefly, park up to 1 ms.
pub const BACKOFF_DEFAULT: IdleStrategy = IdleStrategy::Backoff {
    max_spins: 10,
    max_yields: 20,
    min_park: Duration::from_micros(1),
    max_park: Duration::from_millis(1),
};

impl IdleStrategy {
    /// Parse a strategy name from configuration.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "busyspin" | "busy-spin" => Some(IdleStrategy::BusySpin),
            "yield" | "yielding" => Some(IdleStrategy::Yielding),
            "sleep" | "sleeping" => Some(IdleStrategy::Sleeping(Duration::from_millis(1))),
            "backoff" => Some(BACKOFF_DEFAULT),
            _ => None,
        }
    }

    /// Fresh mutable state for this strategy.
    #[must_use]
    pub fn new_state(&self) -> IdleState {
        IdleState {
            spins: 0,
            yields: 0,
            park: match self {
                IdleStrategy::Backoff { min_park, .. } => *min_park,
                _ => Duration::ZERO,
            },
        }
    }

    /// Apply one idle step. `work_count > 0` resets the escalation.
    pub fn idle(&self, state: &mut IdleState, work_count: usize) {
        if work_count > 0 {
            *state = self.new_state();
            return;
        }

        match self {
            IdleStrategy::BusySpin => std::hint::spin_loop(),
            IdleStrategy::Yielding => thread::yield_now(),
            IdleStrategy::Sleeping(period) => thread::sleep(*period),
            IdleStrategy::Backoff {
                max_spins,
                max_yields,
                min_park,
                max_park,
            } => {
                if state.spins < *max_spins {
                    state.spins += 1;
                    std::hint::spin_loop();
                } else if state.yields < *max_yields {
                    state.yields += 1;
                    thread::yield_now();
                } else {
                    thread::sleep(state.park);
                    state.park = (state.park * 2).min(*max_park).max(*min_park);
                }
            }
        }
    }
}

/// Mutable escalation state owned by the agent runner.
#[derive(Debug, Clone)]
pub struct IdleState {
    spins: u32,
    yields: u32,
    park: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!(IdleStrategy::parse("busyspin"), Some(IdleStrategy::BusySpin));
        assert_eq!(IdleStrategy::parse("YIELD"), Some(IdleStrategy::Yielding));
        assert!(matches!(
            IdleStrategy::parse("sleep"),
            Some(IdleStrategy::Sleeping(_))
        ));
        assert!(matches!(
            IdleStrategy::parse("backoff"),
            Some(IdleStrategy::Backoff { .. })
        ));
        assert_eq!(IdleStrategy::parse("nope"), None);
    }

    #[test]
    fn test_backoff_escalates_then_resets() {
        let strategy = IdleStrategy::Backoff {
            max_spins: 2,
            max_yields: 2,
            min_park: Duration::from_nanos(1),
            max_park: Duration::from_nanos(8),
        };
        let mut state = strategy.new_state();

        for _ in 0..10 {
            strategy.idle(&mut state, 0);
        }
        assert_eq!(state.spins, 2);
        assert_eq!(state.yields, 2);
        assert!(state.park > Duration::from_nanos(1));

        strategy.idle(&mut state, 3);
        assert_eq!(state.spins, 0);
        assert_eq!(state.yields, 0);
    }
}
