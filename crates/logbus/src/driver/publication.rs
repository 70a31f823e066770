// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network publication: the per-outbound-stream state machine.
//!
//! Owned by the conductor, duty-cycled by the sender. The two agents
//! touch disjoint field groups kept on separate cache lines; everything
//! crossing the boundary goes through positions and atomics.
//!
//! Lifecycle: `ACTIVE` until the last publication link drops, `DRAINING`
//! until the sender has transmitted every committed byte and spies have
//! drained, `LINGER` to serve late NAKs, then `CLOSING` for removal once
//! the sender confirms release.

use crate::concurrent::counters::{AtomicCounter, Position, SystemCounterId, SystemCounters};
use crate::driver::clock::DriverClock;
use crate::driver::flow_control::FlowControl;
use crate::driver::retransmit::RetransmitHandler;
use crate::driver::send_endpoint::SendChannelEndpoint;
use crate::driver::{ConductorAction, DriverManagedResource};
use crate::logbuffer::descriptor::{
    self, compute_term_id_from_position, index_by_position, position_bits_to_shift,
};
use crate::logbuffer::raw_log::RawLog;
use crate::logbuffer::term_scanner::{available, padding, scan_for_availability};
use crate::logbuffer::unblocker;
use crate::protocol::data::{self, DataHeader};
use crate::protocol::rtt::{RttMeasurement, RTT_HEADER_LENGTH, RTT_REPLY_FLAG};
use crate::protocol::setup::{SetupHeader, SETUP_HEADER_LENGTH};
use crate::protocol::status::StatusMessage;
use arc_swap::ArcSwap;
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

/// Publication lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PublicationState {
    Active = 0,
    Draining = 1,
    Linger = 2,
    Closing = 3,
}

impl PublicationState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PublicationState::Draining,
            2 => PublicationState::Linger,
            3 => PublicationState::Closing,
            _ => PublicationState::Active,
        }
    }
}

/// Fields mutated only on the conductor thread.
#[derive(Debug)]
struct ConductorFields {
    clean_position: AtomicI64,
    time_of_last_activity_ns: AtomicI64,
    last_sender_position: AtomicI64,
    ref_count: AtomicI32,
}

/// Fields mutated only on the sender thread.
#[derive(Debug)]
struct SenderFields {
    time_of_last_send_or_heartbeat_ns: AtomicI64,
    time_of_last_setup_ns: AtomicI64,
    track_sender_limits: AtomicBool,
    should_send_setup_frame: AtomicBool,
}

/// Static parameters of a new network publication.
#[derive(Debug, Clone, Copy)]
pub struct PublicationParameters {
    pub registration_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub initial_term_id: i32,
    pub mtu_length: usize,
    pub term_window_length: usize,
    pub unblock_timeout_ns: i64,
    pub connection_timeout_ms: i64,
    pub linger_timeout_ns: i64,
    pub setup_timeout_ns: i64,
    pub heartbeat_timeout_ns: i64,
    pub is_exclusive: bool,
}

/// Publication to be sent to registered subscribers.
pub struct NetworkPublication {
    params: PublicationParameters,
    term_buffer_length: usize,
    term_length_mask: i64,
    position_bits_to_shift: u32,

    raw_log: Mutex<Option<RawLog>>,
    meta: crate::concurrent::atomic_buffer::AtomicBuffer,
    term_buffers: Vec<crate::concurrent::atomic_buffer::AtomicBuffer>,
    log_file_name: String,

    publisher_limit: Position,
    sender_position: Position,
    sender_limit: Position,
    spy_positions: ArcSwap<Vec<Position>>,

    channel_endpoint: Arc<SendChannelEndpoint>,
    flow_control: Mutex<Box<dyn FlowControl>>,
    retransmit_handler: Mutex<RetransmitHandler>,
    clock: DriverClock,

    is_connected: AtomicBool,
    has_sender_released: AtomicBool,
    is_end_of_stream: AtomicBool,
    state: AtomicU8,

    conductor: CachePadded<ConductorFields>,
    sender: CachePadded<SenderFields>,

    heartbeats_sent: AtomicCounter,
    retransmits_sent: AtomicCounter,
    short_sends: AtomicCounter,
    sender_flow_control_limits: AtomicCounter,
    unblocked_publications: AtomicCounter,
}

impl NetworkPublication {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: PublicationParameters,
        raw_log: RawLog,
        publisher_limit: Position,
        sender_position: Position,
        sender_limit: Position,
        channel_endpoint: Arc<SendChannelEndpoint>,
        mut flow_control: Box<dyn FlowControl>,
        retransmit_handler: RetransmitHandler,
        system_counters: &SystemCounters,
        clock: DriverClock,
    ) -> Self {
        let term_length = raw_log.term_length();
        flow_control.initialize(params.initial_term_id, term_length);

        let now_ns = clock.nano_time() as i64;
        let meta = raw_log.meta_data();
        let term_buffers = raw_log.term_buffers();
        let log_file_name = raw_log.file_name();

        Self {
            params,
            term_buffer_length: term_length,
            term_length_mask: term_length as i64 - 1,
            position_bits_to_shift: position_bits_to_shift(term_length),
            raw_log: Mutex::new(Some(raw_log)),
            meta,
            term_buffers,
            log_file_name,
            publisher_limit,
            sender_position,
            sender_limit,
            spy_positions: ArcSwap::from_pointee(Vec::new()),
            channel_endpoint,
            flow_control: Mutex::new(flow_control),
            retransmit_handler: Mutex::new(retransmit_handler),
            clock,
            is_connected: AtomicBool::new(false),
            has_sender_released: AtomicBool::new(false),
            is_end_of_stream: AtomicBool::new(false),
            state: AtomicU8::new(PublicationState::Active as u8),
            conductor: CachePadded::new(ConductorFields {
                clean_position: AtomicI64::new(0),
                time_of_last_activity_ns: AtomicI64::new(now_ns),
                last_sender_position: AtomicI64::new(0),
                ref_count: AtomicI32::new(0),
            }),
            sender: CachePadded::new(SenderFields {
                time_of_last_send_or_heartbeat_ns: AtomicI64::new(
                    now_ns - params.heartbeat_timeout_ns - 1,
                ),
                time_of_last_setup_ns: AtomicI64::new(now_ns - params.setup_timeout_ns - 1),
                track_sender_limits: AtomicBool::new(true),
                should_send_setup_frame: AtomicBool::new(true),
            }),
            heartbeats_sent: *system_counters.get(SystemCounterId::HeartbeatsSent),
            retransmits_sent: *system_counters.get(SystemCounterId::RetransmitsSent),
            short_sends: *system_counters.get(SystemCounterId::ShortSends),
            sender_flow_control_limits: *system_counters
                .get(SystemCounterId::SenderFlowControlLimits),
            unblocked_publications: *system_counters.get(SystemCounterId::UnblockedPublications),
        }
    }

    // ===== identity =====

    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.params.registration_id
    }

    #[must_use]
    pub fn session_id(&self) -> i32 {
        self.params.session_id
    }

    #[must_use]
    pub fn stream_id(&self) -> i32 {
        self.params.stream_id
    }

    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.params.is_exclusive
    }

    #[must_use]
    pub fn mtu_length(&self) -> usize {
        self.params.mtu_length
    }

    #[must_use]
    pub fn term_length(&self) -> usize {
        self.term_buffer_length
    }

    #[must_use]
    pub fn channel_endpoint(&self) -> &Arc<SendChannelEndpoint> {
        &self.channel_endpoint
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
    pub fn sender_position_id(&self) -> i32 {
        self.sender_position.id()
    }

    #[must_use]
    pub fn sender_limit_id(&self) -> i32 {
        self.sender_limit.id()
    }

    #[must_use]
    pub fn state(&self) -> PublicationState {
        PublicationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Spies may join only while the publication is active.
    #[must_use]
    pub fn is_accepting_subscriptions(&self) -> bool {
        self.state() == PublicationState::Active
    }

    // ===== sender duty cycle =====

    /// One sender duty cycle: setup, data, heartbeat, flow-control decay,
    /// retransmit timers. Returns bytes sent.
    pub fn send(&self, now_ns: i64) -> usize {
        let sender_position = self.sender_position.get();
        let active_term_id = compute_term_id_from_position(
            sender_position,
            self.position_bits_to_shift,
            self.params.initial_term_id,
        );
        let term_offset = (sender_position & self.term_length_mask) as usize;

        if self.sender.should_send_setup_frame.load(Ordering::Relaxed) {
            self.setup_message_check(now_ns, active_term_id, term_offset);
        }

        let mut bytes_sent = self.send_data(now_ns, sender_position, term_offset);

        if bytes_sent == 0 {
            bytes_sent = self.heartbeat_message_check(now_ns, active_term_id, term_offset);
            let mut flow_control = self.flow_control.lock();
            self.sender_limit
                .set_ordered(flow_control.on_idle(now_ns, self.sender_limit.get()));
        }

        let mut retransmit_handler = self.retransmit_handler.lock();
        retransmit_handler.process_timeouts(now_ns, |term_id, term_offset, length| {
            self.resend(term_id, term_offset, length);
        });

        bytes_sent
    }

    /// Handle a status message arriving on the channel endpoint.
    pub fn on_status_message(
        &self,
        msg: &StatusMessage,
        src: SocketAddr,
        now_ns: i64,
        epoch_ms: i64,
    ) {
        descriptor::set_time_of_last_status_message(&self.meta, epoch_ms);
        self.is_connected.store(true, Ordering::Release);

        let mut flow_control = self.flow_control.lock();
        let new_limit = flow_control.on_status_message(
            msg,
            src,
            self.sender_limit.get(),
            self.params.initial_term_id,
            self.position_bits_to_shift,
            now_ns,
        );
        self.sender_limit.set_ordered(new_limit);
    }

    /// Handle a NAK: delegate to the retransmit scheduler.
    pub fn on_nak(&self, term_id: i32, term_offset: i32, length: i32, now_ns: i64) {
        let mut retransmit_handler = self.retransmit_handler.lock();
        retransmit_handler.on_nak(
            term_id,
            term_offset,
            length,
            self.term_buffer_length,
            now_ns,
            |term_id, term_offset, length| {
                self.resend(term_id, term_offset, length);
            },
        );
    }

    /// Reply to an RTT probe carrying the REPLY request flag.
    pub fn on_rtt_measurement(&self, msg: &RttMeasurement) {
        if msg.flags & RTT_REPLY_FLAG == RTT_REPLY_FLAG {
            let reply = RttMeasurement {
                flags: 0,
                session_id: self.params.session_id,
                stream_id: self.params.stream_id,
                echo_timestamp_ns: msg.echo_timestamp_ns,
                reception_delta_ns: 0,
                receiver_id: msg.receiver_id,
            };

            match self.channel_endpoint.send(&reply.encode()) {
                Ok(n) if n == RTT_HEADER_LENGTH => {}
                _ => self.short_sends.increment(),
            }
        }
    }

    /// Resend a committed range in MTU-bounded datagrams.
    pub fn resend(&self, term_id: i32, term_offset: i32, length: usize) {
        let sender_position = self.sender_position.get();
        let resend_position = descriptor::compute_position(
            term_id,
            term_offset,
            self.position_bits_to_shift,
            self.params.initial_term_id,
        );

        let in_window = resend_position < sender_position
            && resend_position >= sender_position - self.term_buffer_length as i64;
        if !in_window {
            return;
        }

        let index = index_by_position(resend_position, self.position_bits_to_shift);
        let term_buffer = &self.term_buffers[index];

        let mut remaining = length as i64;
        let mut offset = term_offset as usize;

        while remaining > 0 && offset < self.term_buffer_length {
            let outcome = scan_for_availability(term_buffer, offset, self.params.mtu_length);
            let bytes_available = available(outcome);
            if bytes_available <= 0 {
                break;
            }

            let slice = term_buffer.slice(offset, bytes_available as usize);
            match self.channel_endpoint.send(slice) {
                Ok(n) if n == bytes_available as usize => {}
                _ => {
                    self.short_sends.increment();
                    break;
                }
            }

            let advanced = bytes_available + padding(outcome);
            offset += advanced as usize;
            remaining -= i64::from(advanced);
        }

        self.retransmits_sent.increment();
    }

    fn send_data(&self, now_ns: i64, sender_position: i64, term_offset: usize) -> usize {
        let available_window = self.sender_limit.get() - sender_position;
        if available_window > 0 {
            let scan_limit = (available_window as usize).min(self.params.mtu_length);
            let index = index_by_position(sender_position, self.position_bits_to_shift);

            let outcome = scan_for_availability(&self.term_buffers[index], term_offset, scan_limit);
            let bytes_available = available(outcome);
            if bytes_available > 0 {
                let slice = self.term_buffers[index].slice(term_offset, bytes_available as usize);
                match self.channel_endpoint.send(slice) {
                    Ok(n) if n == bytes_available as usize => {
                        self.sender
                            .time_of_last_send_or_heartbeat_ns
                            .store(now_ns, Ordering::Relaxed);
                        self.sender.track_sender_limits.store(true, Ordering::Relaxed);
                        self.sender_position.set_ordered(
                            sender_position + i64::from(bytes_available + padding(outcome)),
                        );
                        return bytes_available as usize;
                    }
                    _ => {
                        self.short_sends.increment();
                    }
                }
            }
        } else if self.sender.track_sender_limits.swap(false, Ordering::Relaxed) {
            self.sender_flow_control_limits.increment();
        }

        0
    }

    fn setup_message_check(&self, now_ns: i64, active_term_id: i32, term_offset: usize) {
        if now_ns
            > self.sender.time_of_last_setup_ns.load(Ordering::Relaxed) + self.params.setup_timeout_ns
        {
            let setup = SetupHeader {
                term_offset: term_offset as i32,
                session_id: self.params.session_id,
                stream_id: self.params.stream_id,
                initial_term_id: self.params.initial_term_id,
                active_term_id,
                term_length: self.term_buffer_length as i32,
                mtu_length: self.params.mtu_length as i32,
                ttl: self.channel_endpoint.multicast_ttl(),
            };

            match self.channel_endpoint.send(&setup.encode()) {
                Ok(n) if n == SETUP_HEADER_LENGTH => {}
                _ => self.short_sends.increment(),
            }

            self.sender.time_of_last_setup_ns.store(now_ns, Ordering::Relaxed);
            self.sender
                .time_of_last_send_or_heartbeat_ns
                .store(now_ns, Ordering::Relaxed);

            if self.is_connected.load(Ordering::Acquire) {
                self.sender
                    .should_send_setup_frame
                    .store(false, Ordering::Relaxed);
            }
        }
    }

    fn heartbeat_message_check(
        &self,
        now_ns: i64,
        active_term_id: i32,
        term_offset: usize,
    ) -> usize {
        let last = self
            .sender
            .time_of_last_send_or_heartbeat_ns
            .load(Ordering::Relaxed);
        if now_ns <= last + self.params.heartbeat_timeout_ns {
            return 0;
        }

        let flags = if self.is_end_of_stream.load(Ordering::Acquire) {
            data::BEGIN_END_AND_EOS_FLAGS
        } else {
            data::BEGIN_AND_END_FLAGS
        };

        let heartbeat = DataHeader {
            frame_length: 0,
            flags,
            term_offset: term_offset as i32,
            session_id: self.params.session_id,
            stream_id: self.params.stream_id,
            term_id: active_term_id,
            reserved_value: 0,
        };

        let bytes = heartbeat.encode();
        match self.channel_endpoint.send(&bytes) {
            Ok(n) if n == bytes.len() => {}
            _ => self.short_sends.increment(),
        }

        self.heartbeats_sent.increment();
        self.sender
            .time_of_last_send_or_heartbeat_ns
            .store(now_ns, Ordering::Relaxed);

        bytes.len()
    }

    // ===== conductor duty cycle =====

    /// Recompute the publisher limit from the slowest consumer. Returns 1
    /// when the limit advanced.
    pub fn update_publisher_limit(&self) -> usize {
        let sender_position = self.sender_position.get_volatile();

        if self.is_connected.load(Ordering::Acquire) {
            let mut min_consumer_position = sender_position;
            for spy in self.spy_positions.load().iter() {
                min_consumer_position = min_consumer_position.min(spy.get_volatile());
            }

            let proposed = min_consumer_position + self.params.term_window_length as i64;
            if self.publisher_limit.propose_max_ordered(proposed) {
                self.clean_buffer(proposed);
                return 1;
            }
        } else if self.publisher_limit.get() > sender_position {
            self.publisher_limit.set_ordered(sender_position);
        }

        0
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
            self.params.initial_term_id,
        )
    }

    /// Sender cursor; spies join the stream here.
    #[must_use]
    pub fn consumer_position(&self) -> i64 {
        self.sender_position.get_volatile()
    }

    /// Link a spy subscriber position (published as a fresh array so the
    /// sender never observes a half-mutated set).
    pub fn add_spy_position(&self, position: Position) {
        self.spy_positions.rcu(|old| {
            let mut positions = (**old).clone();
            positions.push(position);
            positions
        });
    }

    /// Unlink a spy subscriber position by counter id.
    pub fn remove_spy_position(&self, counter_id: i32) {
        self.spy_positions.rcu(|old| {
            old.iter()
                .filter(|p| p.id() != counter_id)
                .copied()
                .collect::<Vec<_>>()
        });
    }

    /// Does the publication currently feed any spy?
    #[must_use]
    pub fn has_spies(&self) -> bool {
        !self.spy_positions.load().is_empty()
    }

    /// Another publication link attached.
    pub fn inc_ref(&self) -> i32 {
        self.conductor.ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// A publication link detached; the last one starts the drain.
    pub fn dec_ref(&self) -> i32 {
        let count = self.conductor.ref_count.fetch_sub(1, Ordering::Relaxed) - 1;
        if count == 0 {
            descriptor::set_end_of_stream_position(&self.meta, self.producer_position());
            self.state
                .store(PublicationState::Draining as u8, Ordering::Release);
            self.conductor
                .time_of_last_activity_ns
                .store(self.clock.nano_time() as i64, Ordering::Relaxed);
            self.channel_endpoint.dec_ref();
        }
        count
    }

    /// The sender processed the remove command; the conductor may delete.
    pub fn sender_release(&self) {
        self.has_sender_released.store(true, Ordering::Release);
    }

    /// Free the log file. Called by the conductor on delete.
    pub fn delete_log(&self) {
        if let Some(raw_log) = self.raw_log.lock().take() {
            if let Err(e) = raw_log.close() {
                log::warn!(
                    "[NetworkPublication] failed to delete log for registration {}: {}",
                    self.params.registration_id,
                    e
                );
            }
        }
    }

    fn clean_buffer(&self, publisher_limit: i64) {
        let clean_position = self.conductor.clean_position.load(Ordering::Relaxed);
        let dirty_range = publisher_limit - clean_position;
        let reserved_range = self.term_buffer_length as i64 * 2;

        if dirty_range > reserved_range {
            let index = index_by_position(clean_position, self.position_bits_to_shift);
            let dirty_term = &self.term_buffers[index];
            let term_offset = (clean_position & self.term_length_mask) as usize;
            let bytes_for_cleaning = (dirty_range - reserved_range) as usize;
            let length = bytes_for_cleaning.min(self.term_buffer_length - term_offset);

            dirty_term.set_memory(term_offset, length, 0);
            self.conductor
                .clean_position
                .store(clean_position + length as i64, Ordering::Relaxed);
        }
    }

    fn check_for_blocked_publisher(&self, now_ns: i64, sender_position: i64) {
        if sender_position == self.conductor.last_sender_position.load(Ordering::Relaxed)
            && self.producer_position() > sender_position
        {
            if now_ns
                > self.conductor.time_of_last_activity_ns.load(Ordering::Relaxed)
                    + self.params.unblock_timeout_ns
                && unblocker::unblock(&self.term_buffers, &self.meta, sender_position)
            {
                self.unblocked_publications.increment();
            }
        } else {
            self.conductor
                .time_of_last_activity_ns
                .store(now_ns, Ordering::Relaxed);
            self.conductor
                .last_sender_position
                .store(sender_position, Ordering::Relaxed);
        }
    }

    fn spies_finished_consuming(
        &self,
        actions: &mut Vec<ConductorAction>,
        eos_position: i64,
    ) -> bool {
        let spies = self.spy_positions.load();
        if spies.is_empty() {
            return true;
        }

        if spies.iter().all(|spy| spy.get_volatile() >= eos_position) {
            actions.push(ConductorAction::CleanupSpies {
                registration_id: self.params.registration_id,
            });
            self.spy_positions.store(Arc::new(Vec::new()));
            return true;
        }

        false
    }

    fn update_connected_status(&self, now_ms: i64) {
        if self.is_connected.load(Ordering::Acquire)
            && now_ms
                > descriptor::time_of_last_status_message(&self.meta)
                    + self.params.connection_timeout_ms
        {
            self.is_connected.store(false, Ordering::Release);
        }
    }
}

impl DriverManagedResource for NetworkPublication {
    fn on_time_event(&self, now_ns: i64, now_ms: i64, actions: &mut Vec<ConductorAction>) {
        self.update_connected_status(now_ms);

        match self.state() {
            PublicationState::Active => {
                self.check_for_blocked_publisher(now_ns, self.sender_position.get_volatile());
            }

            PublicationState::Draining => {
                let sender_position = self.sender_position.get_volatile();
                if sender_position
                    == self.conductor.last_sender_position.load(Ordering::Relaxed)
                {
                    if self.producer_position() > sender_position {
                        if unblocker::unblock(&self.term_buffers, &self.meta, sender_position) {
                            self.unblocked_publications.increment();
                            self.conductor
                                .time_of_last_activity_ns
                                .store(now_ns, Ordering::Relaxed);
                            return;
                        }

                        if self.is_connected.load(Ordering::Acquire) {
                            return;
                        }
                    }

                    if self.spies_finished_consuming(actions, sender_position) {
                        self.is_end_of_stream.store(true, Ordering::Release);
                        self.conductor
                            .time_of_last_activity_ns
                            .store(now_ns, Ordering::Relaxed);
                        self.state
                            .store(PublicationState::Linger as u8, Ordering::Release);
                    }
                } else {
                    self.conductor
                        .last_sender_position
                        .store(sender_position, Ordering::Relaxed);
                    self.conductor
                        .time_of_last_activity_ns
                        .store(now_ns, Ordering::Relaxed);
                }
            }

            PublicationState::Linger => {
                if now_ns
                    > self.conductor.time_of_last_activity_ns.load(Ordering::Relaxed)
                        + self.params.linger_timeout_ns
                {
                    actions.push(ConductorAction::CleanupPublication {
                        registration_id: self.params.registration_id,
                    });
                    self.state
                        .store(PublicationState::Closing as u8, Ordering::Release);
                }
            }

            PublicationState::Closing => {}
        }
    }

    fn has_reached_end_of_life(&self) -> bool {
        self.has_sender_released.load(Ordering::Acquire)
    }
}
