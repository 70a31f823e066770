// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IPC publication: the network publication state machine without the
//! UDP I/O.
//!
//! Producers and subscribers share the log buffer directly; the conductor
//! only maintains the publisher limit, unblocks stalled claims, and runs
//! the drain/linger lifecycle.

use crate::concurrent::counters::{AtomicCounter, Position, SystemCounterId, SystemCounters};
use crate::driver::clock::DriverClock;
use crate::driver::{ConductorAction, DriverManagedResource};
use crate::logbuffer::descriptor::{self, position_bits_to_shift};
use crate::logbuffer::raw_log::RawLog;
use crate::logbuffer::unblocker;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU8, Ordering};

/// IPC publication lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IpcPublicationState {
    Active = 0,
    Inactive = 1,
    Linger = 2,
    Done = 3,
}

impl IpcPublicationState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => IpcPublicationState::Inactive,
            2 => IpcPublicationState::Linger,
            3 => IpcPublicationState::Done,
            _ => IpcPublicationState::Active,
        }
    }
}

/// Shared-memory-only publication.
pub struct IpcPublication {
    registration_id: i64,
    session_id: i32,
    stream_id: i32,
    initial_term_id: i32,
    term_buffer_length: usize,
    position_bits_to_shift: u32,
    term_window_length: usize,
    unblock_timeout_ns: i64,
    linger_timeout_ns: i64,
    is_exclusive: bool,

    raw_log: Mutex<Option<RawLog>>,
    meta: crate::concurrent::atomic_buffer::AtomicBuffer,
    term_buffers: Vec<crate::concurrent::atomic_buffer::AtomicBuffer>,
    log_file_name: String,

    publisher_limit: Position,
    subscriber_positions: ArcSwap<Vec<Position>>,
    ref_count: AtomicI32,
    state: AtomicU8,

    clean_position: AtomicI64,
    time_of_last_consumer_position_change_ns: AtomicI64,
    last_consumer_position: AtomicI64,
    time_of_last_state_change_ns: AtomicI64,

    unblocked_publications: AtomicCounter,
    clock: DriverClock,
}

impl IpcPublication {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration_id: i64,
        session_id: i32,
        stream_id: i32,
        initial_term_id: i32,
        term_window_length: usize,
        unblock_timeout_ns: i64,
        linger_timeout_ns: i64,
        is_exclusive: bool,
        raw_log: RawLog,
        publisher_limit: Position,
        system_counters: &SystemCounters,
        clock: DriverClock,
    ) -> Self {
        let term_length = raw_log.term_length();
        let now_ns = clock.nano_time() as i64;

        Self {
            registration_id,
            session_id,
            stream_id,
            initial_term_id,
            term_buffer_length: term_length,
            position_bits_to_shift: position_bits_to_shift(term_length),
            term_window_length,
            unblock_timeout_ns,
            linger_timeout_ns,
            is_exclusive,
            meta: raw_log.meta_data(),
            term_buffers: raw_log.term_buffers(),
            log_file_name: raw_log.file_name(),
            raw_log: Mutex::new(Some(raw_log)),
            publisher_limit,
            subscriber_positions: ArcSwap::from_pointee(Vec::new()),
            ref_count: AtomicI32::new(0),
            state: AtomicU8::new(IpcPublicationState::Active as u8),
            clean_position: AtomicI64::new(0),
            time_of_last_consumer_position_change_ns: AtomicI64::new(now_ns),
            last_consumer_position: AtomicI64::new(0),
            time_of_last_state_change_ns: AtomicI64::new(now_ns),
            unblocked_publications: *system_counters.get(SystemCounterId::UnblockedPublications),
            clock,
        }
    }

    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    #[must_use]
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    #[must_use]
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.is_exclusive
    }

    #[must_use]
    pub fn log_file_name(&self) -> &str {
        &self.log_file_name
    }

    #[must_use]
    pub fn publisher_limit_id(&self) -> i32 {
        self.publisher_limit.id()
    }

    #[must_use]
    pub fn state(&self) -> IpcPublicationState {
        IpcPublicationState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_accepting_subscriptions(&self) -> bool {
        self.state() == IpcPublicationState::Active
    }

    /// Producer cursor from the active raw tail.
    #[must_use]
    pub fn producer_position(&self) -> i64 {
        let raw_tail = descriptor::active_raw_tail_volatile(&self.meta);
        let term_offset = descriptor::term_offset(raw_tail, self.term_buffer_length);

        descriptor::compute_position(
            descriptor::term_id(raw_tail),
            term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        )
    }

    /// New subscribers join at the producer's current position.
    #[must_use]
    pub fn join_position(&self) -> i64 {
        self.producer_position()
    }

    /// Slowest subscriber position (producer position when none).
    #[must_use]
    pub fn consumer_position(&self) -> i64 {
        self.subscriber_positions
            .load()
            .iter()
            .map(Position::get_volatile)
            .min()
            .unwrap_or_else(|| self.producer_position())
    }

    pub fn add_subscriber(&self, position: Position) {
        self.subscriber_positions.rcu(|old| {
            let mut positions = (**old).clone();
            positions.push(position);
            positions
        });
    }

    pub fn remove_subscriber(&self, counter_id: i32) {
        self.subscriber_positions.rcu(|old| {
            old.iter()
                .filter(|p| p.id() != counter_id)
                .copied()
                .collect::<Vec<_>>()
        });
    }

    pub fn inc_ref(&self) -> i32 {
        self.ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The last publication link starts the drain.
    pub fn dec_ref(&self) -> i32 {
        let count = self.ref_count.fetch_sub(1, Ordering::Relaxed) - 1;
        if count == 0 {
            descriptor::set_end_of_stream_position(&self.meta, self.producer_position());
            self.state
                .store(IpcPublicationState::Inactive as u8, Ordering::Release);
            self.time_of_last_state_change_ns
                .store(self.clock.nano_time() as i64, Ordering::Relaxed);
        }
        count
    }

    /// Conductor duty cycle: advance the publisher limit behind the
    /// slowest subscriber. Returns 1 when the limit moved.
    pub fn update_publishers_limit(&self) -> usize {
        if self.state() != IpcPublicationState::Active {
            return 0;
        }

        let subscribers = self.subscriber_positions.load();
        if subscribers.is_empty() {
            // Nobody consuming: hold the producer at its current point.
            let producer_position = self.producer_position();
            if self.publisher_limit.get() > producer_position {
                self.publisher_limit.set_ordered(producer_position);
            }
            return 0;
        }

        let min_position = subscribers
            .iter()
            .map(Position::get_volatile)
            .min()
            .unwrap_or(0);

        let proposed = min_position + self.term_window_length as i64;
        if self.publisher_limit.propose_max_ordered(proposed) {
            self.clean_buffer(proposed);
            return 1;
        }

        0
    }

    /// Free the log file. Called by the conductor on delete.
    pub fn delete_log(&self) {
        if let Some(raw_log) = self.raw_log.lock().take() {
            if let Err(e) = raw_log.close() {
                log::warn!(
                    "[IpcPublication] failed to delete log for registration {}: {}",
                    self.registration_id,
                    e
                );
            }
        }
    }

    fn clean_buffer(&self, publisher_limit: i64) {
        let clean_position = self.clean_position.load(Ordering::Relaxed);
        let dirty_range = publisher_limit - clean_position;
        let reserved_range = self.term_buffer_length as i64 * 2;

        if dirty_range > reserved_range {
            let index =
                descriptor::index_by_position(clean_position, self.position_bits_to_shift);
            let term_offset = (clean_position & (self.term_buffer_length as i64 - 1)) as usize;
            let bytes_for_cleaning = (dirty_range - reserved_range) as usize;
            let length = bytes_for_cleaning.min(self.term_buffer_length - term_offset);

            self.term_buffers[index].set_memory(term_offset, length, 0);
            self.clean_position
                .store(clean_position + length as i64, Ordering::Relaxed);
        }
    }

    fn check_for_blocked_publisher(&self, now_ns: i64) {
        let consumer_position = self.consumer_position();

        if consumer_position == self.last_consumer_position.load(Ordering::Relaxed)
            && self.producer_position() > consumer_position
        {
            if now_ns
                > self
                    .time_of_last_consumer_position_change_ns
                    .load(Ordering::Relaxed)
                    + self.unblock_timeout_ns
                && unblocker::unblock(&self.term_buffers, &self.meta, consumer_position)
            {
                self.unblocked_publications.increment();
            }
        } else {
            self.time_of_last_consumer_position_change_ns
                .store(now_ns, Ordering::Relaxed);
            self.last_consumer_position
                .store(consumer_position, Ordering::Relaxed);
        }
    }

    fn is_drained(&self) -> bool {
        let producer_position = self.producer_position();
        self.subscriber_positions
            .load()
            .iter()
            .all(|p| p.get_volatile() >= producer_position)
    }
}

impl DriverManagedResource for IpcPublication {
    fn on_time_event(&self, now_ns: i64, _now_ms: i64, actions: &mut Vec<ConductorAction>) {
        match self.state() {
            IpcPublicationState::Active => {
                self.check_for_blocked_publisher(now_ns);
            }

            IpcPublicationState::Inactive => {
                if self.is_drained() {
                    self.state
                        .store(IpcPublicationState::Linger as u8, Ordering::Release);
                    self.time_of_last_state_change_ns
                        .store(now_ns, Ordering::Relaxed);
                    actions.push(ConductorAction::IpcToLinger {
                        registration_id: self.registration_id,
                    });
                }
            }

            IpcPublicationState::Linger => {
                if now_ns
                    > self.time_of_last_state_change_ns.load(Ordering::Relaxed)
                        + self.linger_timeout_ns
                {
                    self.state
                        .store(IpcPublicationState::Done as u8, Ordering::Release);
                    actions.push(ConductorAction::CleanupIpcPublication {
                        registration_id: self.registration_id,
                    });
                }
            }

            IpcPublicationState::Done => {}
        }
    }

    fn has_reached_end_of_life(&self) -> bool {
        self.state() == IpcPublicationState::Done
    }
}
