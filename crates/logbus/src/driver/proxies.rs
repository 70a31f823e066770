// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inter-agent command queues and their proxies.
//!
//! Conductor -> Sender and Conductor -> Receiver are SPSC queues; Sender
//! and Receiver -> Conductor share one MPSC queue. A failed offer
//! increments a counter; conductor-side proxies park the command and
//! retry it on the next duty cycle, receiver-side offers report failure
//! so the caller can leave its state retryable.

use crate::concurrent::counters::AtomicCounter;
use crate::concurrent::spsc::OneToOneQueue;
use crate::driver::image::PublicationImage;
use crate::driver::publication::NetworkPublication;
use crate::driver::receive_endpoint::ReceiveChannelEndpoint;
use crate::driver::send_endpoint::SendChannelEndpoint;
use crossbeam::queue::ArrayQueue;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

/// Commands for the Sender agent.
pub enum SenderCmd {
    RegisterSendChannelEndpoint(Arc<SendChannelEndpoint>),
    CloseSendChannelEndpoint(Arc<SendChannelEndpoint>),
    NewNetworkPublication(Arc<NetworkPublication>),
    RemoveNetworkPublication(Arc<NetworkPublication>),
    AddDestination {
        endpoint: Arc<SendChannelEndpoint>,
        destination: SocketAddr,
    },
    RemoveDestination {
        endpoint: Arc<SendChannelEndpoint>,
        destination: SocketAddr,
    },
}

/// Commands for the Receiver agent.
pub enum ReceiverCmd {
    RegisterReceiveChannelEndpoint(Arc<ReceiveChannelEndpoint>),
    CloseReceiveChannelEndpoint(Arc<ReceiveChannelEndpoint>),
    AddSubscription {
        endpoint: Arc<ReceiveChannelEndpoint>,
        stream_id: i32,
    },
    RemoveSubscription {
        endpoint: Arc<ReceiveChannelEndpoint>,
        stream_id: i32,
    },
    NewPublicationImage {
        endpoint: Arc<ReceiveChannelEndpoint>,
        image: Arc<PublicationImage>,
    },
    RemoveCoolDown {
        endpoint: Arc<ReceiveChannelEndpoint>,
        session_id: i32,
        stream_id: i32,
    },
}

/// Events posted back to the Conductor by the I/O agents.
pub enum ConductorCmd {
    /// Receiver saw a SETUP (or elicited one) for an unknown session.
    CreatePublicationImage {
        session_id: i32,
        stream_id: i32,
        initial_term_id: i32,
        active_term_id: i32,
        term_offset: i32,
        term_length: i32,
        mtu_length: i32,
        control_address: SocketAddr,
        source_address: SocketAddr,
        endpoint: Arc<ReceiveChannelEndpoint>,
    },
}

/// Conductor-side proxy to the Sender.
pub struct SenderProxy {
    queue: Arc<OneToOneQueue<SenderCmd>>,
    pending: VecDeque<SenderCmd>,
    failed_offers: AtomicCounter,
}

impl SenderProxy {
    #[must_use]
    pub fn new(queue: Arc<OneToOneQueue<SenderCmd>>, failed_offers: AtomicCounter) -> Self {
        Self {
            queue,
            pending: VecDeque::new(),
            failed_offers,
        }
    }

    /// Queue a command, parking it locally when the queue is full.
    pub fn offer(&mut self, cmd: SenderCmd) {
        self.retry_pending();
        if self.pending.is_empty() {
            if let Err(cmd) = self.queue.offer(cmd) {
                self.failed_offers.increment();
                self.pending.push_back(cmd);
            }
        } else {
            self.pending.push_back(cmd);
        }
    }

    /// Push parked commands; called once per conductor duty cycle.
    pub fn retry_pending(&mut self) {
        while let Some(cmd) = self.pending.pop_front() {
            if let Err(cmd) = self.queue.offer(cmd) {
                self.pending.push_front(cmd);
                break;
            }
        }
    }
}

/// Conductor-side proxy to the Receiver.
pub struct ReceiverProxy {
    queue: Arc<OneToOneQueue<ReceiverCmd>>,
    pending: VecDeque<ReceiverCmd>,
    failed_offers: AtomicCounter,
}

impl ReceiverProxy {
    #[must_use]
    pub fn new(queue: Arc<OneToOneQueue<ReceiverCmd>>, failed_offers: AtomicCounter) -> Self {
        Self {
            queue,
            pending: VecDeque::new(),
            failed_offers,
        }
    }

    /// Queue a command, parking it locally when the queue is full.
    pub fn offer(&mut self, cmd: ReceiverCmd) {
        self.retry_pending();
        if self.pending.is_empty() {
            if let Err(cmd) = self.queue.offer(cmd) {
                self.failed_offers.increment();
                self.pending.push_back(cmd);
            }
        } else {
            self.pending.push_back(cmd);
        }
    }

    /// Push parked commands; called once per conductor duty cycle.
    pub fn retry_pending(&mut self) {
        while let Some(cmd) = self.pending.pop_front() {
            if let Err(cmd) = self.queue.offer(cmd) {
                self.pending.push_front(cmd);
                break;
            }
        }
    }
}

/// I/O-agent-side proxy to the Conductor (shared, many producers).
#[derive(Clone)]
pub struct ConductorProxy {
    queue: Arc<ArrayQueue<ConductorCmd>>,
    failed_offers: AtomicCounter,
}

impl ConductorProxy {
    #[must_use]
    pub fn new(queue: Arc<ArrayQueue<ConductorCmd>>, failed_offers: AtomicCounter) -> Self {
        Self {
            queue,
            failed_offers,
        }
    }

    /// Offer an event. Returns false (and counts) when the queue is full
    /// so the caller can leave its state retryable.
    pub fn offer(&self, cmd: ConductorCmd) -> bool {
        if self.queue.push(cmd).is_err() {
            self.failed_offers.increment();
            return false;
        }
        true
    }
}
