// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The media driver: conductor, I/O agents, and per-stream lifecycle.
//!
//! # Architecture
//!
//! ```text
//! clients --commands--> ManyToOneRingBuffer --> DriverConductor
//!    ^                                              |  owns publications,
//!    +-- BroadcastTransmitter <---responses---------+  images, links,
//!                                                   |  endpoints, clients
//!                    SPSC cmds v         v SPSC cmds
//!                        Sender          Receiver
//!                          |                 |
//!                     UDP out            UDP in
//!                          ^                 |
//!              SM/NAK/RTT -+                 +--> term rebuild, SM, NAK
//!
//! producers/subscribers <--shared memory log buffers--> Sender/Receiver
//! ```
//!
//! The conductor is the only owner of driver state; the Sender and
//! Receiver observe shared publications and images through atomics and
//! positions, never through locks on the hot path.

/// Client responses over the broadcast channel.
pub mod client_proxy;
/// Driver clocks.
pub mod clock;
/// Control protocol codecs.
pub mod commands;
/// Congestion-control interface.
pub mod congestion;
/// The orchestrating conductor agent.
pub mod conductor;
/// Driver configuration context.
pub mod context;
/// Control (CnC) file layout.
pub mod cnc;
/// Flow-control strategies.
pub mod flow_control;
/// Receiver-side per-session image.
pub mod image;
/// IPC (shared-memory only) publications.
pub mod ipc_publication;
/// Clients, publication links, subscription links.
pub mod links;
/// Driver assembly and threading modes.
pub mod media_driver;
/// Network publication state machine.
pub mod publication;
/// Inter-agent queues and proxies.
pub mod proxies;
/// Receiver agent and receive endpoints.
pub mod receive_endpoint;
/// The receiver I/O agent.
pub mod receiver;
/// Retransmission scheduling.
pub mod retransmit;
/// Send endpoints (shared outbound sockets).
pub mod send_endpoint;
/// The sender I/O agent.
pub mod sender;
/// Agent trait and runners.
pub mod agent;
/// Channel URI parsing.
pub mod uri;
/// Resolved UDP channels.
pub mod udp_channel;

pub use clock::DriverClock;
pub use conductor::DriverConductor;
pub use context::DriverContext;
pub use media_driver::MediaDriver;

/// Deferred effects produced while sweeping managed resources.
///
/// Resource time-event hooks run against shared state; anything that has
/// to touch the conductor's collections (unlinking subscribers, telling
/// the sender to drop a publication) is queued here and applied after the
/// sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConductorAction {
    /// Spies finished draining a publication: notify and unlink them.
    CleanupSpies { registration_id: i64 },
    /// Publication left LINGER: release it from the sender and maybe its
    /// endpoint.
    CleanupPublication { registration_id: i64 },
    /// Image went inactive: notify subscribers it is unavailable.
    ImageToLinger { correlation_id: i64 },
    /// Image reached end of life: unlink subscribers.
    CleanupImage { correlation_id: i64 },
    /// IPC publication drained: notify subscribers it is unavailable.
    IpcToLinger { registration_id: i64 },
    /// IPC publication reached end of life: unlink subscribers.
    CleanupIpcPublication { registration_id: i64 },
}

/// Capability shared by every resource the conductor sweeps on its timer
/// tick: clients, links, publications, images.
pub trait DriverManagedResource {
    /// Advance time-driven state, queueing deferred conductor work.
    fn on_time_event(&self, now_ns: i64, now_ms: i64, actions: &mut Vec<ConductorAction>);

    /// True once the resource can be removed and deleted.
    fn has_reached_end_of_life(&self) -> bool;
}
