// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive channel endpoints: shared inbound UDP sockets plus the data
//! packet dispatcher.
//!
//! One endpoint per canonical channel form, shared by every subscription
//! on that channel. Arriving datagrams are dispatched per
//! `(stream_id, session_id)`: data for a known image is inserted, data
//! for an unknown session on a subscribed stream elicits a SETUP from the
//! sender, and SETUP frames ask the conductor to create the image.
//!
//! Session states walk `PENDING_SETUP -> INIT_IN_PROGRESS -> ACTIVE ->
//! ON_COOL_DOWN`; the cool-down absorbs stale datagrams after an image
//! dies so it is not immediately recreated by in-flight packets.

use crate::concurrent::counters::{AtomicCounter, SystemCounterId, SystemCounters};
use crate::config::PENDING_SETUP_TIMEOUT_NS;
use crate::driver::image::PublicationImage;
use crate::driver::proxies::{ConductorCmd, ConductorProxy};
use crate::driver::send_endpoint::{CHANNEL_STATUS_ACTIVE, CHANNEL_STATUS_CLOSED};
use crate::driver::udp_channel::UdpChannel;
use crate::error::{DriverError, Result};
use crate::protocol::data::DataHeader;
use crate::protocol::header::{self, FrameHeader};
use crate::protocol::setup::SetupHeader;
use crate::protocol::status::{StatusMessage, SEND_SETUP_FLAG};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

#[derive(Clone)]
enum SessionState {
    PendingSetup { elicit_deadline_ns: i64 },
    InitInProgress,
    Active(Arc<PublicationImage>),
    OnCoolDown,
}

/// Dispatches datagrams to images by `(stream_id, session_id)`.
pub struct DataPacketDispatcher {
    subscribed_streams: HashSet<i32>,
    sessions: HashMap<(i32, i32), SessionState>,
}

impl DataPacketDispatcher {
    fn new() -> Self {
        Self {
            subscribed_streams: HashSet::new(),
            sessions: HashMap::new(),
        }
    }

    fn add_subscription(&mut self, stream_id: i32) {
        self.subscribed_streams.insert(stream_id);
    }

    fn remove_subscription(&mut self, stream_id: i32) {
        self.subscribed_streams.remove(&stream_id);
        self.sessions.retain(|(stream, _), _| *stream != stream_id);
    }

    fn activate_image(&mut self, image: &Arc<PublicationImage>) {
        self.sessions.insert(
            (image.stream_id(), image.session_id()),
            SessionState::Active(Arc::clone(image)),
        );
    }

    fn cool_down(&mut self, session_id: i32, stream_id: i32) {
        self.sessions
            .insert((stream_id, session_id), SessionState::OnCoolDown);
    }

    fn remove_cool_down(&mut self, session_id: i32, stream_id: i32) {
        if let Some(SessionState::OnCoolDown) = self.sessions.get(&(stream_id, session_id)) {
            self.sessions.remove(&(stream_id, session_id));
        }
    }
}

/// Shared inbound socket for one canonical channel.
pub struct ReceiveChannelEndpoint {
    udp_channel: UdpChannel,
    socket: UdpSocket,
    dispatcher: Mutex<DataPacketDispatcher>,
    /// Conductor-side per-stream subscription refcounts.
    stream_refs: Mutex<HashMap<i32, i32>>,
    receiver_id: i64,
    status: AtomicCounter,
}

impl ReceiveChannelEndpoint {
    /// Bind the channel's receive socket (joining the group for
    /// multicast).
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the socket cannot be bound.
    pub fn new(udp_channel: UdpChannel, status: AtomicCounter) -> Result<Self> {
        let bind_addr = udp_channel.bind_address().ok_or_else(|| {
            DriverError::InvalidChannel(format!(
                "subscription channel needs an endpoint: {}",
                udp_channel.original_uri()
            ))
        })?;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;

        if udp_channel.is_multicast() {
            let IpAddr::V4(group) = bind_addr.ip() else {
                return Err(DriverError::InvalidChannel(format!(
                    "multicast group must be IPv4: {}",
                    udp_channel.original_uri()
                )));
            };
            let interface = match udp_channel.interface().map(|addr| addr.ip()) {
                Some(IpAddr::V4(addr)) => addr,
                _ => Ipv4Addr::UNSPECIFIED,
            };
            let wildcard = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), bind_addr.port());
            socket.bind(&wildcard.into())?;
            socket.join_multicast_v4(&group, &interface)?;
        } else {
            socket.bind(&bind_addr.into())?;
        }

        let socket: UdpSocket = socket.into();
        status.set_ordered(CHANNEL_STATUS_ACTIVE);

        log::debug!(
            "[ReceiveChannelEndpoint] open canonical={} bind={}",
            udp_channel.canonical_form(),
            bind_addr
        );

        Ok(Self {
            udp_channel,
            socket,
            dispatcher: Mutex::new(DataPacketDispatcher::new()),
            stream_refs: Mutex::new(HashMap::new()),
            receiver_id: fastrand::i64(..),
            status,
        })
    }

    #[must_use]
    pub fn udp_channel(&self) -> &UdpChannel {
        &self.udp_channel
    }

    #[must_use]
    pub fn canonical_form(&self) -> &str {
        self.udp_channel.canonical_form()
    }

    #[must_use]
    pub fn status_counter_id(&self) -> i32 {
        self.status.id()
    }

    /// Receiver id stamped into this endpoint's status messages.
    #[must_use]
    pub fn receiver_id(&self) -> i64 {
        self.receiver_id
    }

    /// Socket used for SM/NAK sends by images on this endpoint.
    #[must_use]
    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    // ===== conductor-side stream refcounts =====

    /// Count a subscription onto a stream; returns the new count.
    pub fn inc_ref_to_stream(&self, stream_id: i32) -> i32 {
        let mut refs = self.stream_refs.lock();
        let count = refs.entry(stream_id).or_insert(0);
        *count += 1;
        *count
    }

    /// Release a subscription from a stream; returns the new count.
    pub fn dec_ref_to_stream(&self, stream_id: i32) -> i32 {
        let mut refs = self.stream_refs.lock();
        match refs.get_mut(&stream_id) {
            Some(count) => {
                *count -= 1;
                if *count <= 0 {
                    refs.remove(&stream_id);
                    0
                } else {
                    *count
                }
            }
            None => 0,
        }
    }

    /// No subscriptions reference the endpoint any more.
    #[must_use]
    pub fn should_be_closed(&self) -> bool {
        self.stream_refs.lock().is_empty()
    }

    /// Flip the status indicator for attached observers.
    pub fn indicate_closed(&self) {
        self.status.set_ordered(CHANNEL_STATUS_CLOSED);
    }

    // ===== receiver-side dispatch =====

    /// Register stream interest with the dispatcher.
    pub fn add_subscription(&self, stream_id: i32) {
        self.dispatcher.lock().add_subscription(stream_id);
    }

    /// Remove stream interest and any session state under it.
    pub fn remove_subscription(&self, stream_id: i32) {
        self.dispatcher.lock().remove_subscription(stream_id);
    }

    /// Activate a freshly created image for dispatch.
    pub fn activate_image(&self, image: &Arc<PublicationImage>) {
        self.dispatcher.lock().activate_image(image);
    }

    /// Park a dead session so stale packets cannot resurrect it.
    pub fn cool_down(&self, session_id: i32, stream_id: i32) {
        self.dispatcher.lock().cool_down(session_id, stream_id);
    }

    /// Allow a parked session to be set up again.
    pub fn remove_cool_down(&self, session_id: i32, stream_id: i32) {
        self.dispatcher.lock().remove_cool_down(session_id, stream_id);
    }

    /// Drain the socket, dispatching datagrams. Returns datagrams
    /// handled.
    pub fn poll(
        &self,
        buf: &mut [u8],
        conductor_proxy: &ConductorProxy,
        counters: &SystemCounters,
        now_ns: i64,
        endpoint: &Arc<ReceiveChannelEndpoint>,
    ) -> usize {
        let mut work_count = 0;

        loop {
            let (length, src) = match self.socket.recv_from(buf) {
                Ok(result) => result,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::debug!(
                        "[ReceiveChannelEndpoint] recv failed on {}: {}",
                        self.canonical_form(),
                        e
                    );
                    break;
                }
            };

            counters
                .get(SystemCounterId::BytesReceived)
                .add(length as i64);

            let Some(frame) = FrameHeader::decode(&buf[..length]) else {
                counters.get(SystemCounterId::InvalidPackets).increment();
                continue;
            };

            match frame.frame_type {
                header::HDR_TYPE_DATA | header::HDR_TYPE_PAD => {
                    self.on_data_packet(&buf[..length], src, counters, now_ns);
                }
                header::HDR_TYPE_SETUP => {
                    self.on_setup(&buf[..length], src, conductor_proxy, counters, endpoint);
                }
                header::HDR_TYPE_RTT => {
                    // Probe replies only matter to adaptive congestion
                    // control; the static window ignores them.
                }
                _ => {
                    counters.get(SystemCounterId::InvalidPackets).increment();
                }
            }

            work_count += 1;
        }

        work_count
    }

    /// Retry timed-out setup elicitations (receiver duty cycle).
    pub fn check_pending_setups(&self, now_ns: i64) {
        let mut dispatcher = self.dispatcher.lock();
        dispatcher.sessions.retain(|_, state| {
            !matches!(state, SessionState::PendingSetup { elicit_deadline_ns }
                if now_ns > *elicit_deadline_ns)
        });
    }

    fn on_data_packet(
        &self,
        packet: &[u8],
        src: SocketAddr,
        counters: &SystemCounters,
        now_ns: i64,
    ) {
        let Some(data) = DataHeader::decode(packet) else {
            counters.get(SystemCounterId::InvalidPackets).increment();
            return;
        };

        let key = (data.stream_id, data.session_id);
        let state = {
            let dispatcher = self.dispatcher.lock();
            if !dispatcher.subscribed_streams.contains(&data.stream_id) {
                return;
            }
            dispatcher.sessions.get(&key).cloned()
        };

        match state {
            Some(SessionState::Active(image)) => {
                image.insert_packet(data.term_id, data.term_offset, packet, now_ns);
            }
            Some(SessionState::PendingSetup { .. })
            | Some(SessionState::InitInProgress)
            | Some(SessionState::OnCoolDown) => {
                // Image not available yet (or deliberately parked).
            }
            None => {
                self.elicit_setup(&data, src, counters, now_ns);
            }
        }
    }

    fn elicit_setup(
        &self,
        data: &DataHeader,
        src: SocketAddr,
        counters: &SystemCounters,
        now_ns: i64,
    ) {
        let sm = StatusMessage {
            flags: SEND_SETUP_FLAG,
            session_id: data.session_id,
            stream_id: data.stream_id,
            consumption_term_id: data.term_id,
            consumption_term_offset: 0,
            receiver_window_length: 0,
            receiver_id: self.receiver_id,
            feedback: Vec::new(),
        };

        match self.socket.send_to(&sm.encode(), src) {
            Ok(_) => {
                counters
                    .get(SystemCounterId::StatusMessagesSent)
                    .increment();
                self.dispatcher.lock().sessions.insert(
                    (data.stream_id, data.session_id),
                    SessionState::PendingSetup {
                        elicit_deadline_ns: now_ns + PENDING_SETUP_TIMEOUT_NS as i64,
                    },
                );
            }
            Err(_) => counters.get(SystemCounterId::ShortSends).increment(),
        }
    }

    fn on_setup(
        &self,
        packet: &[u8],
        src: SocketAddr,
        conductor_proxy: &ConductorProxy,
        counters: &SystemCounters,
        endpoint: &Arc<ReceiveChannelEndpoint>,
    ) {
        let Some(setup) = SetupHeader::decode(packet) else {
            counters.get(SystemCounterId::InvalidPackets).increment();
            return;
        };

        let key = (setup.stream_id, setup.session_id);
        {
            let dispatcher = self.dispatcher.lock();
            if !dispatcher.subscribed_streams.contains(&setup.stream_id) {
                return;
            }
            match dispatcher.sessions.get(&key) {
                None | Some(SessionState::PendingSetup { .. }) => {}
                _ => return, // already in progress, active, or cooling down
            }
        }

        let offered = conductor_proxy.offer(ConductorCmd::CreatePublicationImage {
            session_id: setup.session_id,
            stream_id: setup.stream_id,
            initial_term_id: setup.initial_term_id,
            active_term_id: setup.active_term_id,
            term_offset: setup.term_offset,
            term_length: setup.term_length,
            mtu_length: setup.mtu_length,
            control_address: src,
            source_address: src,
            endpoint: Arc::clone(endpoint),
        });

        if offered {
            self.dispatcher
                .lock()
                .sessions
                .insert(key, SessionState::InitInProgress);
        }
        // On a failed offer the state stays pending so the sender's next
        // SETUP retries.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::atomic_buffer::AtomicBuffer;
    use crate::concurrent::counters::{CountersManager, COUNTER_LENGTH, METADATA_RECORD_LENGTH};
    use crossbeam::queue::ArrayQueue;

    struct Fixture {
        _metadata_backing: Vec<u8>,
        _values_backing: Vec<u8>,
        counters: SystemCounters,
        status: AtomicCounter,
        queue: Arc<ArrayQueue<ConductorCmd>>,
        proxy: ConductorProxy,
    }

    fn fixture() -> Fixture {
        let mut metadata_backing = vec![0u8; METADATA_RECORD_LENGTH * 64];
        let mut values_backing = vec![0u8; COUNTER_LENGTH * 64];
        let metadata = AtomicBuffer::wrap_slice(&mut metadata_backing);
        let values = AtomicBuffer::wrap_slice(&mut values_backing);
        let mut manager = CountersManager::new(metadata, values).expect("manager");
        let counters = SystemCounters::new(&mut manager).expect("counters");
        let status_id = manager.allocate(5, 0, "rcv-channel").expect("status");
        let status = manager.new_atomic_counter(status_id);
        let queue = Arc::new(ArrayQueue::new(16));
        let proxy = ConductorProxy::new(
            Arc::clone(&queue),
            *counters.get(SystemCounterId::ConductorProxyFails),
        );

        Fixture {
            _metadata_backing: metadata_backing,
            _values_backing: values_backing,
            counters,
            status,
            queue,
            proxy,
        }
    }

    fn endpoint(f: &Fixture) -> Arc<ReceiveChannelEndpoint> {
        let channel = UdpChannel::parse("aeron:udp?endpoint=127.0.0.1:0").expect("channel");
        Arc::new(ReceiveChannelEndpoint::new(channel, f.status).expect("endpoint"))
    }

    #[test]
    fn test_stream_refcounts() {
        let f = fixture();
        let endpoint = endpoint(&f);

        assert!(endpoint.should_be_closed());
        assert_eq!(endpoint.inc_ref_to_stream(10), 1);
        assert_eq!(endpoint.inc_ref_to_stream(10), 2);
        assert_eq!(endpoint.inc_ref_to_stream(11), 1);
        assert!(!endpoint.should_be_closed());

        assert_eq!(endpoint.dec_ref_to_stream(10), 1);
        assert_eq!(endpoint.dec_ref_to_stream(10), 0);
        assert_eq!(endpoint.dec_ref_to_stream(11), 0);
        assert!(endpoint.should_be_closed());
    }

    #[test]
    fn test_setup_posts_create_image_once() {
        let f = fixture();
        let ep = endpoint(&f);
        ep.add_subscription(42);

        let setup = SetupHeader {
            term_offset: 0,
            session_id: 5,
            stream_id: 42,
            initial_term_id: 9,
            active_term_id: 9,
            term_length: 64 * 1024,
            mtu_length: 1408,
            ttl: 0,
        };
        let src: SocketAddr = "127.0.0.1:55555".parse().expect("addr");

        ep.on_setup(&setup.encode(), src, &f.proxy, &f.counters, &ep);
        // Second setup while INIT_IN_PROGRESS is ignored.
        ep.on_setup(&setup.encode(), src, &f.proxy, &f.counters, &ep);

        assert_eq!(f.queue.len(), 1);
        match f.queue.pop().expect("cmd") {
            ConductorCmd::CreatePublicationImage {
                session_id,
                stream_id,
                term_length,
                ..
            } => {
                assert_eq!(session_id, 5);
                assert_eq!(stream_id, 42);
                assert_eq!(term_length, 64 * 1024);
            }
        }
    }

    #[test]
    fn test_setup_for_unsubscribed_stream_ignored() {
        let f = fixture();
        let ep = endpoint(&f);

        let setup = SetupHeader {
            term_offset: 0,
            session_id: 5,
            stream_id: 42,
            initial_term_id: 9,
            active_term_id: 9,
            term_length: 64 * 1024,
            mtu_length: 1408,
            ttl: 0,
        };
        let src: SocketAddr = "127.0.0.1:55555".parse().expect("addr");
        ep.on_setup(&setup.encode(), src, &f.proxy, &f.counters, &ep);
        assert!(f.queue.is_empty());
    }

    #[test]
    fn test_unknown_session_data_elicits_setup() {
        let f = fixture();
        let ep = endpoint(&f);
        ep.add_subscription(42);

        // A socket standing in for the publisher's control address.
        let sender = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let src = sender.local_addr().expect("addr");

        let data = DataHeader {
            frame_length: 64,
            flags: crate::protocol::data::BEGIN_AND_END_FLAGS,
            term_offset: 0,
            session_id: 5,
            stream_id: 42,
            term_id: 9,
            reserved_value: 0,
        };
        let mut packet = data.encode().to_vec();
        packet.resize(64, 0);

        ep.on_data_packet(&packet, src, &f.counters, 0);

        sender
            .set_read_timeout(Some(std::time::Duration::from_secs(1)))
            .expect("timeout");
        let mut buf = [0u8; 64];
        let (n, _) = sender.recv_from(&mut buf).expect("recv elicit");
        let sm = StatusMessage::decode(&buf[..n]).expect("sm");
        assert!(sm.is_send_setup());
        assert_eq!(sm.session_id, 5);

        // Elicit only once while pending.
        ep.on_data_packet(&packet, src, &f.counters, 0);
        assert!(sender.recv_from(&mut buf).is_err());
    }

    #[test]
    fn test_cool_down_blocks_and_releases() {
        let f = fixture();
        let ep = endpoint(&f);
        ep.add_subscription(42);
        ep.cool_down(5, 42);

        let setup = SetupHeader {
            term_offset: 0,
            session_id: 5,
            stream_id: 42,
            initial_term_id: 9,
            active_term_id: 9,
            term_length: 64 * 1024,
            mtu_length: 1408,
            ttl: 0,
        };
        let src: SocketAddr = "127.0.0.1:55555".parse().expect("addr");
        ep.on_setup(&setup.encode(), src, &f.proxy, &f.counters, &ep);
        assert!(f.queue.is_empty());

        ep.remove_cool_down(5, 42);
        ep.on_setup(&setup.encode(), src, &f.proxy, &f.counters, &ep);
        assert_eq!(f.queue.len(), 1);
    }
}
