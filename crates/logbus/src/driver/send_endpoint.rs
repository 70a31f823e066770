// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Send channel endpoints: shared outbound UDP sockets.
//!
//! One endpoint per canonical channel form, shared by every publication on
//! that channel and reference counted by publications and spy
//! subscriptions. The endpoint also receives the control traffic (status
//! messages, NAKs, RTT probes) arriving on its socket and dispatches it to
//! the owning publication by `(session_id, stream_id)`.

use crate::concurrent::counters::{AtomicCounter, SystemCounterId, SystemCounters};
use crate::driver::publication::NetworkPublication;
use crate::driver::udp_channel::UdpChannel;
use crate::error::{DriverError, Result};
use crate::protocol::header::{self, FrameHeader};
use crate::protocol::nak::NakHeader;
use crate::protocol::rtt::RttMeasurement;
use crate::protocol::status::StatusMessage;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};

/// Channel status indicator values.
pub const CHANNEL_STATUS_ACTIVE: i64 = 1;
pub const CHANNEL_STATUS_CLOSED: i64 = -1;

/// Shared outbound socket for one canonical channel.
pub struct SendChannelEndpoint {
    udp_channel: UdpChannel,
    socket: UdpSocket,
    destination: Option<SocketAddr>,
    /// Manual-control MDC destination list (sender thread).
    mdc_destinations: Mutex<Vec<SocketAddr>>,
    /// Control message dispatch by (session_id, stream_id). Weak so the
    /// endpoint never keeps a dead publication alive.
    dispatch: Mutex<HashMap<(i32, i32), Weak<NetworkPublication>>>,
    /// Publications and spy subscriptions holding this endpoint open.
    ref_count: AtomicI32,
    status: AtomicCounter,
}

impl SendChannelEndpoint {
    /// Open the socket for a channel.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the socket cannot be created
    /// or bound.
    pub fn new(udp_channel: UdpChannel, status: AtomicCounter) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;

        let bind_addr: SocketAddr = udp_channel
            .interface()
            .unwrap_or_else(|| "0.0.0.0:0".parse().expect("wildcard addr"));
        socket.bind(&bind_addr.into())?;

        if udp_channel.is_multicast() && udp_channel.multicast_ttl() > 0 {
            socket.set_multicast_ttl_v4(udp_channel.multicast_ttl() as u32)?;
        }

        let socket: UdpSocket = socket.into();
        let destination = udp_channel.endpoint().or_else(|| udp_channel.control());
        status.set_ordered(CHANNEL_STATUS_ACTIVE);

        log::debug!(
            "[SendChannelEndpoint] open canonical={} destination={:?}",
            udp_channel.canonical_form(),
            destination
        );

        Ok(Self {
            udp_channel,
            socket,
            destination,
            mdc_destinations: Mutex::new(Vec::new()),
            dispatch: Mutex::new(HashMap::new()),
            ref_count: AtomicI32::new(0),
            status,
        })
    }

    /// The resolved channel.
    #[must_use]
    pub fn udp_channel(&self) -> &UdpChannel {
        &self.udp_channel
    }

    /// Canonical form keying the conductor's endpoint map.
    #[must_use]
    pub fn canonical_form(&self) -> &str {
        self.udp_channel.canonical_form()
    }

    /// Channel status counter id (reported in ready responses).
    #[must_use]
    pub fn status_counter_id(&self) -> i32 {
        self.status.id()
    }

    /// Multicast TTL carried in SETUP frames.
    #[must_use]
    pub fn multicast_ttl(&self) -> i32 {
        self.udp_channel.multicast_ttl()
    }

    /// Send a datagram to the channel destination (or every MDC
    /// destination). Returns the bytes accepted; for MDC the minimum
    /// across destinations so short sends are observed.
    ///
    /// # Errors
    ///
    /// `WouldBlock` and transient socket errors surface to the caller,
    /// which treats them as short sends.
    pub fn send(&self, data: &[u8]) -> io::Result<usize> {
        if let Some(destination) = self.destination {
            return self.socket.send_to(data, destination);
        }

        let destinations = self.mdc_destinations.lock();
        if destinations.is_empty() {
            // MDC with nobody attached: the stream flows past them.
            return Ok(data.len());
        }

        let mut min_sent = data.len();
        for destination in destinations.iter() {
            let sent = self.socket.send_to(data, *destination)?;
            min_sent = min_sent.min(sent);
        }
        Ok(min_sent)
    }

    /// Register a publication for control-message dispatch.
    pub fn register_publication(&self, publication: &Arc<NetworkPublication>) {
        self.dispatch.lock().insert(
            (publication.session_id(), publication.stream_id()),
            Arc::downgrade(publication),
        );
    }

    /// Remove a publication from control-message dispatch.
    pub fn unregister_publication(&self, publication: &NetworkPublication) {
        self.dispatch
            .lock()
            .remove(&(publication.session_id(), publication.stream_id()));
    }

    /// Drain control messages from the socket, dispatching to
    /// publications. Returns the number of messages handled.
    pub fn poll_control(
        &self,
        buf: &mut [u8],
        counters: &SystemCounters,
        now_ns: i64,
        epoch_ms: i64,
    ) -> usize {
        let mut work_count = 0;

        loop {
            let (length, src) = match self.socket.recv_from(buf) {
                Ok(result) => result,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::debug!(
                        "[SendChannelEndpoint] control recv failed on {}: {}",
                        self.canonical_form(),
                        e
                    );
                    break;
                }
            };

            let Some(frame) = FrameHeader::decode(&buf[..length]) else {
                counters.get(SystemCounterId::InvalidPackets).increment();
                continue;
            };

            match frame.frame_type {
                header::HDR_TYPE_SM => {
                    if let Some(msg) = StatusMessage::decode(&buf[..length]) {
                        counters
                            .get(SystemCounterId::StatusMessagesReceived)
                            .increment();
                        if let Some(publication) =
                            self.lookup(msg.session_id, msg.stream_id)
                        {
                            publication.on_status_message(&msg, src, now_ns, epoch_ms);
                        }
                    } else {
                        counters.get(SystemCounterId::InvalidPackets).increment();
                    }
                }
                header::HDR_TYPE_NAK => {
                    if let Some(nak) = NakHeader::decode(&buf[..length]) {
                        counters.get(SystemCounterId::NaksReceived).increment();
                        if let Some(publication) =
                            self.lookup(nak.session_id, nak.stream_id)
                        {
                            publication.on_nak(nak.term_id, nak.term_offset, nak.length, now_ns);
                        }
                    } else {
                        counters.get(SystemCounterId::InvalidPackets).increment();
                    }
                }
                header::HDR_TYPE_RTT => {
                    if let Some(rtt) = RttMeasurement::decode(&buf[..length]) {
                        if let Some(publication) =
                            self.lookup(rtt.session_id, rtt.stream_id)
                        {
                            publication.on_rtt_measurement(&rtt);
                        }
                    } else {
                        counters.get(SystemCounterId::InvalidPackets).increment();
                    }
                }
                _ => {
                    counters.get(SystemCounterId::InvalidPackets).increment();
                }
            }

            work_count += 1;
        }

        work_count
    }

    /// Add a manual MDC destination.
    ///
    /// # Errors
    ///
    /// Rejected for endpoints without manual control mode.
    pub fn validate_allows_manual_control(&self) -> Result<()> {
        if !self.udp_channel.is_manual_control_mode() {
            return Err(DriverError::Generic(
                "Control channel does not allow manual control".to_string(),
            ));
        }
        Ok(())
    }

    /// Add an MDC destination (sender thread).
    pub fn add_destination(&self, destination: SocketAddr) {
        let mut destinations = self.mdc_destinations.lock();
        if !destinations.contains(&destination) {
            destinations.push(destination);
        }
    }

    /// Remove an MDC destination (sender thread).
    pub fn remove_destination(&self, destination: SocketAddr) {
        self.mdc_destinations.lock().retain(|d| *d != destination);
    }

    /// Another publication or spy now shares the endpoint.
    pub fn inc_ref(&self) -> i32 {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// A publication or spy released the endpoint.
    pub fn dec_ref(&self) -> i32 {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Nobody references the endpoint any more.
    #[must_use]
    pub fn should_be_closed(&self) -> bool {
        self.ref_count.load(Ordering::Acquire) <= 0
    }

    /// Flip the status indicator for attached observers.
    pub fn indicate_closed(&self) {
        self.status.set_ordered(CHANNEL_STATUS_CLOSED);
    }

    fn lookup(&self, session_id: i32, stream_id: i32) -> Option<Arc<NetworkPublication>> {
        self.dispatch
            .lock()
            .get(&(session_id, stream_id))
            .and_then(Weak::upgrade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::atomic_buffer::AtomicBuffer;
    use crate::concurrent::counters::COUNTER_LENGTH;

    fn status_counter(backing: &mut Vec<u8>) -> AtomicCounter {
        AtomicCounter::new(AtomicBuffer::wrap_slice(backing), 0)
    }

    #[test]
    fn test_open_sets_status_and_sends() {
        let mut backing = vec![0u8; COUNTER_LENGTH];
        let status = status_counter(&mut backing);

        let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
        let addr = receiver.local_addr().expect("addr");

        let channel =
            UdpChannel::parse(&format!("aeron:udp?endpoint={addr}")).expect("channel");
        let endpoint = SendChannelEndpoint::new(channel, status).expect("endpoint");
        assert_eq!(status.get(), CHANNEL_STATUS_ACTIVE);

        let sent = endpoint.send(b"frame bytes").expect("send");
        assert_eq!(sent, 11);

        let mut buf = [0u8; 64];
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(1)))
            .expect("timeout");
        let (n, _) = receiver.recv_from(&mut buf).expect("recv");
        assert_eq!(&buf[..n], b"frame bytes");
    }

    #[test]
    fn test_ref_counting() {
        let mut backing = vec![0u8; COUNTER_LENGTH];
        let status = status_counter(&mut backing);
        let channel = UdpChannel::parse("aeron:udp?endpoint=127.0.0.1:0").expect("channel");
        let endpoint = SendChannelEndpoint::new(channel, status).expect("endpoint");

        assert!(endpoint.should_be_closed());
        assert_eq!(endpoint.inc_ref(), 1);
        assert_eq!(endpoint.inc_ref(), 2);
        assert!(!endpoint.should_be_closed());
        assert_eq!(endpoint.dec_ref(), 1);
        assert_eq!(endpoint.dec_ref(), 0);
        assert!(endpoint.should_be_closed());
    }

    #[test]
    fn test_mdc_validation_and_destinations() {
        let mut backing = vec![0u8; COUNTER_LENGTH];
        let status = status_counter(&mut backing);
        let channel = UdpChannel::parse("aeron:udp?control-mode=manual").expect("channel");
        let endpoint = SendChannelEndpoint::new(channel, status).expect("endpoint");
        assert!(endpoint.validate_allows_manual_control().is_ok());

        // No destinations yet: sends are accepted and dropped.
        assert_eq!(endpoint.send(&[0u8; 32]).expect("send"), 32);

        let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
        let addr = receiver.local_addr().expect("addr");
        endpoint.add_destination(addr);
        assert_eq!(endpoint.send(&[7u8; 16]).expect("send"), 16);

        let mut buf = [0u8; 64];
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(1)))
            .expect("timeout");
        let (n, _) = receiver.recv_from(&mut buf).expect("recv");
        assert_eq!(n, 16);

        endpoint.remove_destination(addr);
        assert_eq!(endpoint.send(&[7u8; 16]).expect("send"), 16);

        let unicast = UdpChannel::parse("aeron:udp?endpoint=127.0.0.1:0").expect("channel");
        let mut backing2 = vec![0u8; COUNTER_LENGTH];
        let unicast_endpoint =
            SendChannelEndpoint::new(unicast, status_counter(&mut backing2)).expect("endpoint");
        assert!(unicast_endpoint.validate_allows_manual_control().is_err());
    }
}
