// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publication image: receiver-side state for one `(session, stream,
//! source)` tuple.
//!
//! The receiver inserts arriving packets into the image's log buffer,
//! advances the high-water mark and the gap-free rebuild position, sends
//! status messages paced by position progress and a timeout, and NAKs
//! reception gaps after a delay. The conductor tracks subscriber windows
//! and drives the liveness state machine:
//! `ACTIVE -> INACTIVE -> LINGER -> DONE`.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::concurrent::counters::{AtomicCounter, Position, SystemCounterId, SystemCounters};
use crate::driver::congestion::CongestionControl;
use crate::driver::retransmit::FeedbackDelayGenerator;
use crate::driver::{ConductorAction, DriverManagedResource};
use crate::logbuffer::descriptor::{
    self, compute_position, index_by_position, position_bits_to_shift,
};
use crate::logbuffer::frame::{self, FRAME_ALIGNMENT, PADDING_FRAME_TYPE};
use crate::logbuffer::gap_scanner::{scan_for_gap, Gap};
use crate::logbuffer::raw_log::RawLog;
use crate::logbuffer::term_rebuilder;
use crate::protocol::nak::{NakHeader, NAK_HEADER_LENGTH};
use crate::protocol::status::{StatusMessage, SM_HEADER_LENGTH};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

/// Image lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImageState {
    Active = 0,
    Inactive = 1,
    Linger = 2,
    Done = 3,
}

impl ImageState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ImageState::Inactive,
            2 => ImageState::Linger,
            3 => ImageState::Done,
            _ => ImageState::Active,
        }
    }
}

/// Receiver-thread loss tracking: the gap currently being repaired.
#[derive(Debug, Default)]
struct LossState {
    active_gap: Option<Gap>,
    deadline_ns: i64,
}

/// Static parameters of a new image.
#[derive(Debug, Clone, Copy)]
pub struct ImageParameters {
    pub correlation_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub initial_term_id: i32,
    pub mtu_length: usize,
    pub liveness_timeout_ns: i64,
    pub status_message_timeout_ns: i64,
    pub is_reliable: bool,
}

/// Receiver-side view of one producer session on one stream.
pub struct PublicationImage {
    params: ImageParameters,
    term_length: usize,
    term_length_mask: i64,
    position_bits_to_shift: u32,

    raw_log: Mutex<Option<RawLog>>,
    meta: AtomicBuffer,
    term_buffers: Vec<AtomicBuffer>,
    log_file_name: String,

    control_address: SocketAddr,
    source_address: SocketAddr,
    receiver_id: i64,

    hwm_position: Position,
    rebuild_position: Position,
    subscriber_positions: ArcSwap<Vec<Position>>,
    congestion_control: Mutex<Box<dyn CongestionControl>>,
    nak_delay_generator: Mutex<Box<dyn FeedbackDelayGenerator>>,
    loss: Mutex<LossState>,

    state: AtomicU8,
    time_of_last_state_change_ns: AtomicI64,
    last_packet_ns: AtomicI64,
    last_sm_ns: AtomicI64,
    last_sm_position: AtomicI64,
    receiver_window_length: AtomicI64,
    force_status_message: AtomicBool,
    end_of_stream_position: AtomicI64,
    is_end_of_stream: AtomicBool,

    status_messages_sent: AtomicCounter,
    naks_sent: AtomicCounter,
    heartbeats_received: AtomicCounter,
    flow_control_under_runs: AtomicCounter,
    flow_control_over_runs: AtomicCounter,
    loss_gap_fills: AtomicCounter,
    short_sends: AtomicCounter,
}

impl PublicationImage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: ImageParameters,
        raw_log: RawLog,
        join_position: i64,
        hwm_position: Position,
        rebuild_position: Position,
        subscriber_positions: Vec<Position>,
        congestion_control: Box<dyn CongestionControl>,
        nak_delay_generator: Box<dyn FeedbackDelayGenerator>,
        control_address: SocketAddr,
        source_address: SocketAddr,
        receiver_id: i64,
        system_counters: &SystemCounters,
        now_ns: i64,
    ) -> Self {
        let term_length = raw_log.term_length();
        let initial_window = congestion_control.initial_window_length();

        hwm_position.set_ordered(join_position);
        rebuild_position.set_ordered(join_position);

        Self {
            params,
            term_length,
            term_length_mask: term_length as i64 - 1,
            position_bits_to_shift: position_bits_to_shift(term_length),
            meta: raw_log.meta_data(),
            term_buffers: raw_log.term_buffers(),
            log_file_name: raw_log.file_name(),
            raw_log: Mutex::new(Some(raw_log)),
            control_address,
            source_address,
            receiver_id,
            hwm_position,
            rebuild_position,
            subscriber_positions: ArcSwap::from_pointee(subscriber_positions),
            congestion_control: Mutex::new(congestion_control),
            nak_delay_generator: Mutex::new(nak_delay_generator),
            loss: Mutex::new(LossState::default()),
            state: AtomicU8::new(ImageState::Active as u8),
            time_of_last_state_change_ns: AtomicI64::new(now_ns),
            last_packet_ns: AtomicI64::new(now_ns),
            last_sm_ns: AtomicI64::new(now_ns - params.status_message_timeout_ns - 1),
            last_sm_position: AtomicI64::new(join_position),
            receiver_window_length: AtomicI64::new(initial_window as i64),
            force_status_message: AtomicBool::new(true),
            end_of_stream_position: AtomicI64::new(i64::MAX),
            is_end_of_stream: AtomicBool::new(false),
            status_messages_sent: *system_counters.get(SystemCounterId::StatusMessagesSent),
            naks_sent: *system_counters.get(SystemCounterId::NaksSent),
            heartbeats_received: *system_counters.get(SystemCounterId::HeartbeatsReceived),
            flow_control_under_runs: *system_counters.get(SystemCounterId::FlowControlUnderRuns),
            flow_control_over_runs: *system_counters.get(SystemCounterId::FlowControlOverRuns),
            loss_gap_fills: *system_counters.get(SystemCounterId::LossGapFills),
            short_sends: *system_counters.get(SystemCounterId::ShortSends),
        }
    }

    // ===== identity =====

    #[must_use]
    pub fn correlation_id(&self) -> i64 {
        self.params.correlation_id
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
    pub fn log_file_name(&self) -> &str {
        &self.log_file_name
    }

    #[must_use]
    pub fn source_address(&self) -> SocketAddr {
        self.source_address
    }

    #[must_use]
    pub fn source_identity(&self) -> String {
        self.source_address.to_string()
    }

    #[must_use]
    pub fn state(&self) -> ImageState {
        ImageState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Late subscribers may link only while the image is active.
    #[must_use]
    pub fn is_accepting_subscriptions(&self) -> bool {
        self.state() == ImageState::Active
    }

    /// Gap-free contiguous position; late subscribers join here.
    #[must_use]
    pub fn rebuild_position(&self) -> i64 {
        self.rebuild_position.get_volatile()
    }

    #[must_use]
    pub fn hwm_position_id(&self) -> i32 {
        self.hwm_position.id()
    }

    #[must_use]
    pub fn rebuild_position_id(&self) -> i32 {
        self.rebuild_position.id()
    }

    // ===== receiver thread =====

    /// Insert an arriving data packet (one or more frames starting at
    /// `term_offset` in `term_id`). Returns bytes inserted.
    pub fn insert_packet(
        &self,
        term_id: i32,
        term_offset: i32,
        packet: &[u8],
        now_ns: i64,
    ) -> usize {
        let packet_position = compute_position(
            term_id,
            term_offset,
            self.position_bits_to_shift,
            self.params.initial_term_id,
        );
        let proposed_position = packet_position + packet.len() as i64;
        let rebuild_position = self.rebuild_position.get();

        if self.is_heartbeat(packet) {
            self.heartbeats_received.increment();
            let flags = packet.get(5).copied().unwrap_or(0);
            if flags & frame::EOS_FLAG != 0 {
                self.is_end_of_stream.store(true, Ordering::Release);
                self.end_of_stream_position
                    .store(packet_position, Ordering::Release);
            }
            self.last_packet_ns.store(now_ns, Ordering::Release);
            self.hwm_position.propose_max_ordered(packet_position);
            return 0;
        }

        // Window validation: completely old packets are duplicates,
        // packets beyond a term past the rebuild point cannot be stored.
        if proposed_position <= rebuild_position {
            self.flow_control_under_runs.increment();
            return 0;
        }
        if proposed_position > rebuild_position + self.term_length as i64 {
            self.flow_control_over_runs.increment();
            return 0;
        }

        let index = index_by_position(packet_position, self.position_bits_to_shift);
        term_rebuilder::insert(&self.term_buffers[index], term_offset as usize, packet);

        self.hwm_position.propose_max_ordered(proposed_position);
        self.last_packet_ns.store(now_ns, Ordering::Release);
        self.advance_rebuild();

        packet.len()
    }

    /// Send a status message when position progress or the timeout calls
    /// for one. Returns work done.
    pub fn send_pending_status_message(&self, socket: &UdpSocket, now_ns: i64) -> usize {
        if self.state() != ImageState::Active {
            return 0;
        }

        let sm_position = self.consumption_position();
        let window = self.receiver_window_length.load(Ordering::Acquire);
        let threshold = window / 4;
        let position_changed =
            sm_position - self.last_sm_position.load(Ordering::Relaxed) > threshold;
        let timed_out =
            now_ns > self.last_sm_ns.load(Ordering::Relaxed) + self.params.status_message_timeout_ns;
        let forced = self.force_status_message.swap(false, Ordering::AcqRel);

        if !(position_changed || timed_out || forced) {
            return 0;
        }

        let term_id = descriptor::compute_term_id_from_position(
            sm_position,
            self.position_bits_to_shift,
            self.params.initial_term_id,
        );
        let term_offset = (sm_position & self.term_length_mask) as i32;

        let sm = StatusMessage {
            flags: 0,
            session_id: self.params.session_id,
            stream_id: self.params.stream_id,
            consumption_term_id: term_id,
            consumption_term_offset: term_offset,
            receiver_window_length: window as i32,
            receiver_id: self.receiver_id,
            feedback: Vec::new(),
        };

        match socket.send_to(&sm.encode(), self.control_address) {
            Ok(n) if n == SM_HEADER_LENGTH => {
                self.status_messages_sent.increment();
                self.last_sm_ns.store(now_ns, Ordering::Relaxed);
                self.last_sm_position.store(sm_position, Ordering::Relaxed);
                1
            }
            _ => {
                self.short_sends.increment();
                0
            }
        }
    }

    /// Detect gaps and emit a NAK (reliable) or gap-fill padding
    /// (unreliable) once the loss delay expires. Returns work done.
    pub fn send_pending_loss(&self, socket: &UdpSocket, now_ns: i64) -> usize {
        let gap = self.scan_first_gap();
        let mut loss = self.loss.lock();

        let Some(gap) = gap else {
            loss.active_gap = None;
            return 0;
        };

        if loss.active_gap != Some(gap) {
            loss.active_gap = Some(gap);
            loss.deadline_ns = now_ns + self.nak_delay_generator.lock().generate_delay_ns() as i64;
        }

        if now_ns < loss.deadline_ns {
            return 0;
        }

        if self.params.is_reliable {
            let nak = NakHeader {
                session_id: self.params.session_id,
                stream_id: self.params.stream_id,
                term_id: gap.term_id,
                term_offset: gap.term_offset,
                length: gap.length,
            };
            match socket.send_to(&nak.encode(), self.control_address) {
                Ok(n) if n == NAK_HEADER_LENGTH => self.naks_sent.increment(),
                _ => self.short_sends.increment(),
            }
            loss.deadline_ns = now_ns + self.params.status_message_timeout_ns;
        } else {
            // Best-effort stream: pad over the hole so consumption moves on.
            let index = descriptor::index_by_term(self.params.initial_term_id, gap.term_id);
            let term_buffer = &self.term_buffers[index];
            frame::set_frame_type(term_buffer, gap.term_offset as usize, PADDING_FRAME_TYPE);
            frame::frame_length_ordered(term_buffer, gap.term_offset as usize, gap.length);
            self.loss_gap_fills.increment();
            loss.active_gap = None;
            self.advance_rebuild();
        }

        1
    }

    // ===== conductor thread =====

    /// Recompute the advertised window from subscriber progress.
    pub fn track_rebuild(&self, now_ns: i64) {
        let consumption = self.consumption_position();
        let hwm = self.hwm_position.get_volatile();

        let mut congestion_control = self.congestion_control.lock();
        let (window, force_sm) = congestion_control.on_track_rebuild(now_ns, consumption, hwm);
        self.receiver_window_length
            .store(window as i64, Ordering::Release);
        if force_sm {
            self.force_status_message.store(true, Ordering::Release);
        }
    }

    /// Link a subscriber position (snapshot swap).
    pub fn add_subscriber(&self, position: Position) {
        self.subscriber_positions.rcu(|old| {
            let mut positions = (**old).clone();
            positions.push(position);
            positions
        });
    }

    /// Unlink a subscriber position by counter id.
    pub fn remove_subscriber(&self, counter_id: i32) {
        self.subscriber_positions.rcu(|old| {
            old.iter()
                .filter(|p| p.id() != counter_id)
                .copied()
                .collect::<Vec<_>>()
        });
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_positions.load().len()
    }

    /// Free the log file. Called by the conductor on delete.
    pub fn delete_log(&self) {
        if let Some(raw_log) = self.raw_log.lock().take() {
            if let Err(e) = raw_log.close() {
                log::warn!(
                    "[PublicationImage] failed to delete log for correlation {}: {}",
                    self.params.correlation_id,
                    e
                );
            }
        }
    }

    fn consumption_position(&self) -> i64 {
        let positions = self.subscriber_positions.load();
        positions
            .iter()
            .map(Position::get_volatile)
            .min()
            .unwrap_or_else(|| self.rebuild_position.get_volatile())
    }

    fn is_drained(&self) -> bool {
        let rebuild = self.rebuild_position.get_volatile();
        self.subscriber_positions
            .load()
            .iter()
            .all(|p| p.get_volatile() >= rebuild)
    }

    fn is_heartbeat(&self, packet: &[u8]) -> bool {
        packet.len() >= 4 && i32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]) == 0
    }

    /// Advance the rebuild position over contiguous committed frames,
    /// crossing partitions as terms complete.
    fn advance_rebuild(&self) {
        let mut rebuild = self.rebuild_position.get();
        let hwm = self.hwm_position.get();

        while rebuild < hwm {
            let index = index_by_position(rebuild, self.position_bits_to_shift);
            let term_buffer = &self.term_buffers[index];
            let term_offset = (rebuild & self.term_length_mask) as usize;
            let term_begin = rebuild - term_offset as i64;
            let hwm_in_term = (hwm - term_begin).min(self.term_length as i64) as usize;

            match scan_for_gap(term_buffer, 0, term_offset, hwm_in_term) {
                Some(gap) => {
                    rebuild = term_begin + i64::from(gap.term_offset);
                    break;
                }
                None => {
                    rebuild = term_begin + hwm_in_term as i64;
                    if hwm_in_term < self.term_length {
                        break;
                    }
                }
            }
        }

        self.rebuild_position.propose_max_ordered(rebuild);
    }

    /// First gap between the rebuild position and the high-water mark.
    fn scan_first_gap(&self) -> Option<Gap> {
        let rebuild = self.rebuild_position.get();
        let hwm = self.hwm_position.get();
        if rebuild >= hwm {
            return None;
        }

        let index = index_by_position(rebuild, self.position_bits_to_shift);
        let term_buffer = &self.term_buffers[index];
        let term_offset = (rebuild & self.term_length_mask) as usize;
        let term_begin = rebuild - term_offset as i64;
        let hwm_in_term = (hwm - term_begin).min(self.term_length as i64) as usize;
        let term_id = descriptor::compute_term_id_from_position(
            rebuild,
            self.position_bits_to_shift,
            self.params.initial_term_id,
        );

        scan_for_gap(term_buffer, term_id, term_offset, hwm_in_term)
    }
}

impl DriverManagedResource for PublicationImage {
    fn on_time_event(&self, now_ns: i64, _now_ms: i64, actions: &mut Vec<ConductorAction>) {
        match self.state() {
            ImageState::Active => {
                let eos_drained = self.is_end_of_stream.load(Ordering::Acquire)
                    && self.is_drained()
                    && self.rebuild_position.get_volatile()
                        >= self.end_of_stream_position.load(Ordering::Acquire);
                let lively =
                    now_ns <= self.last_packet_ns.load(Ordering::Acquire) + self.params.liveness_timeout_ns;

                if eos_drained || !lively {
                    self.state.store(ImageState::Inactive as u8, Ordering::Release);
                    self.time_of_last_state_change_ns
                        .store(now_ns, Ordering::Relaxed);
                }
            }

            ImageState::Inactive => {
                if self.is_drained()
                    || now_ns
                        > self.time_of_last_state_change_ns.load(Ordering::Relaxed)
                            + self.params.liveness_timeout_ns
                {
                    self.state.store(ImageState::Linger as u8, Ordering::Release);
                    self.time_of_last_state_change_ns
                        .store(now_ns, Ordering::Relaxed);
                    actions.push(ConductorAction::ImageToLinger {
                        correlation_id: self.params.correlation_id,
                    });
                }
            }

            ImageState::Linger => {
                if now_ns
                    > self.time_of_last_state_change_ns.load(Ordering::Relaxed)
                        + self.params.liveness_timeout_ns
                {
                    self.state.store(ImageState::Done as u8, Ordering::Release);
                    actions.push(ConductorAction::CleanupImage {
                        correlation_id: self.params.correlation_id,
                    });
                }
            }

            ImageState::Done => {}
        }
    }

    fn has_reached_end_of_life(&self) -> bool {
        self.state() == ImageState::Done
    }
}
