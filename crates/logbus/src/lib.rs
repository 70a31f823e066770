// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # logbus - shared-memory log-bus media driver
//!
//! A low-latency publish/subscribe messaging transport built on
//! memory-mapped term log buffers and UDP. The media driver is a single
//! long-running process that creates and tears down publications and
//! subscriptions on behalf of local client processes, owns the log files
//! over which producers and consumers exchange frames with zero copies,
//! and runs the network send path, receive path, and NAK-driven
//! retransmission.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                      Client Processes                         |
//! |  commands -> to-driver ring | responses <- broadcast channel  |
//! +---------------------------------------------------------------+
//! |                      Driver Conductor                         |
//! |  publications | subscriptions | images | clients | endpoints  |
//! +---------------------------------------------------------------+
//! |            Sender                |          Receiver          |
//! |  term scan -> UDP | SM/NAK in   |  UDP -> term rebuild, SM/NAK|
//! +---------------------------------------------------------------+
//! |                  Shared-Memory Log Buffers                    |
//! |     3 term partitions + metadata trailer, one per stream      |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use logbus::driver::{DriverContext, MediaDriver};
//!
//! fn main() -> logbus::Result<()> {
//!     let driver = MediaDriver::launch(DriverContext::new())?;
//!     println!("driver up at {}", driver.dir().display());
//!     // ... run until shutdown ...
//!     driver.close();
//!     Ok(())
//! }
//! ```
//!
//! Clients talk to the driver through the control file in the driver
//! directory: commands go into the to-driver ring, responses come back
//! over the broadcast channel, and data moves through the mapped term
//! logs named in the ready responses.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`driver::MediaDriver`] | Launches and owns the agent threads |
//! | [`driver::DriverContext`] | Launch configuration (dirs, timeouts, modes) |
//! | [`driver::DriverConductor`] | Orchestrates all driver state |
//! | [`logbuffer::TermAppender`] | Producer-side append-only framing engine |
//! | [`concurrent::ManyToOneRingBuffer`] | Client command ring |
//!
//! ## Modules Overview
//!
//! - [`driver`] - Conductor, Sender, Receiver, lifecycle (start here)
//! - [`logbuffer`] - Term buffers, appenders, scanners, the log layout
//! - [`protocol`] - Wire frame codecs (data, setup, SM, NAK, RTT)
//! - [`concurrent`] - Rings, broadcast, counters, mapped files
//! - [`config`] - Defaults and environment overrides

/// Bit manipulation helpers.
pub mod bits;
/// Driver configuration defaults and environment overrides.
pub mod config;
/// Shared-memory concurrency primitives.
pub mod concurrent;
/// The media driver: conductor, agents, per-stream lifecycle.
pub mod driver;
/// Error type and control-protocol error codes.
pub mod error;
/// Log buffer framing substrate.
pub mod logbuffer;
/// Wire protocol frame codecs.
pub mod protocol;

pub use error::{DriverError, ErrorCode, Result};

/// logbus version string.
pub const VERSION: &str = "0.2.0";
