// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client liveness and the links binding clients to publications,
//! subscriptions, images, and spies.
//!
//! Links exist so resources survive individual clients: a publication
//! stays alive while any link references it, and a dead client's links
//! are reaped by the managed-resource sweep, decrementing whatever they
//! point at.

use crate::concurrent::counters::Position;
use crate::driver::ipc_publication::IpcPublication;
use crate::driver::publication::NetworkPublication;
use crate::driver::receive_endpoint::ReceiveChannelEndpoint;
use crate::driver::{ConductorAction, DriverManagedResource};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A client process talking to the driver, tracked by keepalives.
pub struct DriverClient {
    client_id: i64,
    liveness_timeout_ns: i64,
    liveness_deadline_ns: Cell<i64>,
    timed_out: Arc<AtomicBool>,
}

impl DriverClient {
    #[must_use]
    pub fn new(client_id: i64, liveness_timeout_ns: i64, now_ns: i64) -> Self {
        Self {
            client_id,
            liveness_timeout_ns,
            liveness_deadline_ns: Cell::new(now_ns + liveness_timeout_ns),
            timed_out: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    /// Shared flag observed by this client's links.
    #[must_use]
    pub fn timed_out_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.timed_out)
    }

    /// Refresh the liveness deadline on a keepalive.
    pub fn on_keepalive(&self, now_ns: i64) {
        self.liveness_deadline_ns
            .set(now_ns + self.liveness_timeout_ns);
    }
}

impl DriverManagedResource for DriverClient {
    fn on_time_event(&self, now_ns: i64, _now_ms: i64, _actions: &mut Vec<ConductorAction>) {
        if now_ns > self.liveness_deadline_ns.get() {
            if !self.timed_out.swap(true, Ordering::Relaxed) {
                log::info!("[DriverConductor] client {} timed out", self.client_id);
            }
        }
    }

    fn has_reached_end_of_life(&self) -> bool {
        self.timed_out.load(Ordering::Relaxed)
    }
}

/// What a publication link keeps alive.
pub enum PublicationTarget {
    Network(Arc<NetworkPublication>),
    Ipc(Arc<IpcPublication>),
}

/// One client registration of a publication.
pub struct PublicationLink {
    registration_id: i64,
    client_timed_out: Arc<AtomicBool>,
    target: PublicationTarget,
    reached_end_of_life: Cell<bool>,
}

impl PublicationLink {
    #[must_use]
    pub fn new(
        registration_id: i64,
        client_timed_out: Arc<AtomicBool>,
        target: PublicationTarget,
    ) -> Self {
        match &target {
            PublicationTarget::Network(publication) => {
                publication.inc_ref();
            }
            PublicationTarget::Ipc(publication) => {
                publication.inc_ref();
            }
        }

        Self {
            registration_id,
            client_timed_out,
            target,
            reached_end_of_life: Cell::new(false),
        }
    }

    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    /// Drop the reference this link holds.
    pub fn close(&self) {
        match &self.target {
            PublicationTarget::Network(publication) => {
                publication.dec_ref();
            }
            PublicationTarget::Ipc(publication) => {
                publication.dec_ref();
            }
        }
    }

    /// Explicit removal by the owning client.
    pub fn mark_removed(&self) {
        self.reached_end_of_life.set(true);
    }
}

impl DriverManagedResource for PublicationLink {
    fn on_time_event(&self, _now_ns: i64, _now_ms: i64, _actions: &mut Vec<ConductorAction>) {
        if self.client_timed_out.load(Ordering::Relaxed) {
            self.reached_end_of_life.set(true);
        }
    }

    fn has_reached_end_of_life(&self) -> bool {
        self.reached_end_of_life.get()
    }
}

/// Where a subscription link attaches.
#[derive(Clone)]
pub enum SubscriptionKind {
    Network {
        endpoint: Arc<ReceiveChannelEndpoint>,
        is_reliable: bool,
    },
    Ipc,
    Spy {
        canonical_form: String,
    },
}

/// A position linked to one source (image, IPC publication, or spied
/// network publication).
pub struct LinkedPosition {
    /// Correlation/registration id of the source.
    pub source_id: i64,
    pub position: Position,
}

/// One client subscription and its per-source positions.
pub struct SubscriptionLink {
    registration_id: i64,
    stream_id: i32,
    channel: String,
    kind: SubscriptionKind,
    client_timed_out: Arc<AtomicBool>,
    positions: Vec<LinkedPosition>,
    reached_end_of_life: Cell<bool>,
}

impl SubscriptionLink {
    #[must_use]
    pub fn new(
        registration_id: i64,
        stream_id: i32,
        channel: String,
        kind: SubscriptionKind,
        client_timed_out: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registration_id,
            stream_id,
            channel,
            kind,
            client_timed_out,
            positions: Vec::new(),
            reached_end_of_life: Cell::new(false),
        }
    }

    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    #[must_use]
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn kind(&self) -> &SubscriptionKind {
        &self.kind
    }

    /// Endpoint for network subscriptions.
    #[must_use]
    pub fn endpoint(&self) -> Option<&Arc<ReceiveChannelEndpoint>> {
        match &self.kind {
            SubscriptionKind::Network { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    /// Reliability chosen for network subscriptions.
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        match &self.kind {
            SubscriptionKind::Network { is_reliable, .. } => *is_reliable,
            _ => true,
        }
    }

    /// Does this subscription match an image arriving on `endpoint`?
    #[must_use]
    pub fn matches_network(&self, endpoint: &Arc<ReceiveChannelEndpoint>, stream_id: i32) -> bool {
        match &self.kind {
            SubscriptionKind::Network { endpoint: own, .. } => {
                self.stream_id == stream_id && Arc::ptr_eq(own, endpoint)
            }
            _ => false,
        }
    }

    /// Does this subscription match an IPC publication?
    #[must_use]
    pub fn matches_ipc(&self, stream_id: i32) -> bool {
        matches!(self.kind, SubscriptionKind::Ipc) && self.stream_id == stream_id
    }

    /// Does this subscription spy on publications over `canonical_form`?
    #[must_use]
    pub fn matches_spy(&self, canonical_form: &str, stream_id: i32) -> bool {
        match &self.kind {
            SubscriptionKind::Spy { canonical_form: own } => {
                self.stream_id == stream_id && own == canonical_form
            }
            _ => false,
        }
    }

    /// Record a linked source position.
    pub fn link(&mut self, source_id: i64, position: Position) {
        self.positions.push(LinkedPosition {
            source_id,
            position,
        });
    }

    /// Remove the link for `source_id`, returning its position for
    /// counter reclamation.
    pub fn unlink(&mut self, source_id: i64) -> Option<Position> {
        let index = self.positions.iter().position(|l| l.source_id == source_id)?;
        Some(self.positions.remove(index).position)
    }

    #[must_use]
    pub fn is_linked(&self, source_id: i64) -> bool {
        self.positions.iter().any(|l| l.source_id == source_id)
    }

    /// Drain every linked position (subscription close / client reap).
    pub fn take_positions(&mut self) -> Vec<LinkedPosition> {
        std::mem::take(&mut self.positions)
    }

    /// Explicit removal by the owning client.
    pub fn mark_removed(&self) {
        self.reached_end_of_life.set(true);
    }
}

impl DriverManagedResource for SubscriptionLink {
    fn on_time_event(&self, _now_ns: i64, _now_ms: i64, _actions: &mut Vec<ConductorAction>) {
        if self.client_timed_out.load(Ordering::Relaxed) {
            self.reached_end_of_life.set(true);
        }
    }

    fn has_reached_end_of_life(&self) -> bool {
        self.reached_end_of_life.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_times_out_without_keepalive() {
        let client = DriverClient::new(7, 5_000_000_000, 0);
        let mut actions = Vec::new();

        client.on_time_event(1_000_000_000, 0, &mut actions);
        assert!(!client.has_reached_end_of_life());

        client.on_keepalive(4_000_000_000);
        client.on_time_event(6_000_000_000, 0, &mut actions);
        assert!(!client.has_reached_end_of_life());

        client.on_time_event(10_000_000_000, 0, &mut actions);
        assert!(client.has_reached_end_of_life());
    }

    #[test]
    fn test_client_timeout_propagates_to_links() {
        let client = DriverClient::new(7, 1_000, 0);
        let flag = client.timed_out_flag();

        let link = SubscriptionLink::new(
            1,
            10,
            "aeron:ipc".to_string(),
            SubscriptionKind::Ipc,
            flag,
        );

        let mut actions = Vec::new();
        link.on_time_event(0, 0, &mut actions);
        assert!(!link.has_reached_end_of_life());

        client.on_time_event(2_000, 0, &mut actions);
        link.on_time_event(2_000, 0, &mut actions);
        assert!(link.has_reached_end_of_life());
    }
}
