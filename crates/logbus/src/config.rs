// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driver configuration - single source of truth.
//!
//! This module centralizes the layout constants, timeouts, and tunables of
//! the media driver. **Never hardcode these elsewhere!**
//!
//! Two levels:
//! - Compile-time constants (frame layout, protocol defaults, timeouts)
//! - `LOGBUS_*` environment overrides picked up by [`crate::driver::DriverContext`]
//!
//! All timeouts are steady-clock nanoseconds unless the name says `_MS`.

use std::path::PathBuf;
use std::time::Duration;

// =======================================================================
// Term buffers
// =======================================================================

/// Minimum length of a term buffer (64 KiB). Must be a power of two.
pub const TERM_MIN_LENGTH: usize = 64 * 1024;

/// Maximum length of a term buffer (1 GiB).
pub const TERM_MAX_LENGTH: usize = 1024 * 1024 * 1024;

/// Default term length for network publications (16 MiB).
pub const TERM_DEFAULT_LENGTH: usize = 16 * 1024 * 1024;

/// Default term length for IPC publications (64 MiB).
///
/// IPC streams have no network window holding them back, so the default is
/// larger to keep fast producers off the back-pressure path.
pub const IPC_TERM_DEFAULT_LENGTH: usize = 64 * 1024 * 1024;

/// Largest UDP payload the driver will ever emit (IPv4 limit minus headers).
pub const MAX_UDP_PAYLOAD_LENGTH: usize = 65504;

/// Default MTU: fits an ethernet frame with headroom for tunnel overheads.
pub const MTU_DEFAULT_LENGTH: usize = 1408;

/// Default publication term window. 0 means "half the term length".
pub const PUBLICATION_TERM_WINDOW_DEFAULT: usize = 0;

/// Initial window granted to a new publication image (128 KiB).
pub const INITIAL_WINDOW_DEFAULT_LENGTH: usize = 128 * 1024;

/// Window length for a publication: no consumer may fall more than half a
/// term behind, whatever was configured.
#[must_use]
pub fn publication_term_window_length(term_length: usize, configured: usize) -> usize {
    let half = term_length / 2;
    if configured == 0 {
        half
    } else {
        half.min(configured)
    }
}

// =======================================================================
// Control (CnC) buffers
// =======================================================================

/// Length of the many-to-one ring carrying client commands to the driver.
pub const TO_DRIVER_BUFFER_DEFAULT_LENGTH: usize = 1024 * 1024;

/// Length of the broadcast buffer carrying responses to clients.
pub const TO_CLIENTS_BUFFER_DEFAULT_LENGTH: usize = 1024 * 1024;

/// Length of the counters value buffer. Metadata is derived from it.
pub const COUNTERS_VALUES_BUFFER_DEFAULT_LENGTH: usize = 1024 * 1024;

/// Length of the distinct error log region.
pub const ERROR_BUFFER_DEFAULT_LENGTH: usize = 1024 * 1024;

// =======================================================================
// Duty cycle
// =======================================================================

/// Commands drained from the conductor queues per duty cycle.
pub const COMMAND_DRAIN_LIMIT: usize = 10;

/// Capacity of each inter-agent command queue.
pub const CMD_QUEUE_CAPACITY: usize = 1024;

/// Interval between conductor timer sweeps (1 s).
pub const TIMER_INTERVAL_NS: u64 = 1_000_000_000;

// =======================================================================
// Timeouts (steady clock)
// =======================================================================

/// A client that misses keepalives for this long is reaped (5 s).
pub const CLIENT_LIVENESS_TIMEOUT_NS: u64 = 5_000_000_000;

/// An image with no incoming activity for this long goes inactive (10 s).
pub const IMAGE_LIVENESS_TIMEOUT_NS: u64 = 10_000_000_000;

/// A publisher that claimed space but never committed blocks the sender for
/// at most this long before the claim is rewritten as padding (10 s).
pub const PUBLICATION_UNBLOCK_TIMEOUT_NS: u64 = 10_000_000_000;

/// SETUP frames are repeated at this interval until a status message
/// arrives (100 ms).
pub const PUBLICATION_SETUP_TIMEOUT_NS: u64 = 100_000_000;

/// An idle publication emits a heartbeat data frame at this interval (100 ms).
pub const PUBLICATION_HEARTBEAT_TIMEOUT_NS: u64 = 100_000_000;

/// Maximum quiet period between status messages from an image (200 ms).
pub const STATUS_MESSAGE_TIMEOUT_NS: u64 = 200_000_000;

/// Drained publications linger this long for late NAKs before closing (5 s).
pub const PUBLICATION_LINGER_NS: u64 = 5_000_000_000;

/// A publication with no status message for this long is disconnected (5 s,
/// wall clock - status message times are stamped in epoch milliseconds).
pub const PUBLICATION_CONNECTION_TIMEOUT_MS: u64 = 5_000;

/// How long the receiver waits for the image to materialize after electing
/// to send a SETUP elicitation before retrying (1 s).
pub const PENDING_SETUP_TIMEOUT_NS: u64 = 1_000_000_000;

// =======================================================================
// Loss handling
// =======================================================================

/// Unicast gaps are NAKed immediately.
pub const NAK_UNICAST_DELAY_NS: u64 = 0;

/// Multicast gaps are NAKed after a randomized delay in `[0, max)` so a
/// crowd of receivers does not stampede the sender (60 ms max).
pub const NAK_MULTICAST_MAX_BACKOFF_NS: u64 = 60_000_000;

/// Unicast retransmits fire immediately.
pub const RETRANSMIT_UNICAST_DELAY_NS: u64 = 0;

/// After a retransmit fires, identical NAKs are ignored for this long (60 ms).
pub const RETRANSMIT_UNICAST_LINGER_NS: u64 = 60_000_000;

/// Number of retransmit actions tracked concurrently per publication.
pub const RETRANSMIT_ACTION_POOL_SIZE: usize = 16;

/// Status messages per `initial_window_length` consumed; drives SM cadence
/// between the timeout-based sends.
pub const STATUS_MESSAGE_RATIO: usize = 4;

/// Receivers silent for this long fall out of multicast flow control (2 s).
pub const FLOW_CONTROL_RECEIVER_TIMEOUT_NS: u64 = 2_000_000_000;

// =======================================================================
// Threading
// =======================================================================

/// Agent-to-thread assignment for the three driver roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingMode {
    /// One thread per role: conductor, sender, receiver.
    Dedicated,
    /// Sender and receiver share a network thread; conductor has its own.
    SharedNetwork,
    /// All three roles on a single thread.
    Shared,
}

impl ThreadingMode {
    /// Parse the `LOGBUS_THREADING_MODE` value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "DEDICATED" => Some(ThreadingMode::Dedicated),
            "SHARED_NETWORK" => Some(ThreadingMode::SharedNetwork),
            "SHARED" => Some(ThreadingMode::Shared),
            _ => None,
        }
    }
}

// =======================================================================
// Environment overrides
// =======================================================================

/// Driver directory: `LOGBUS_DIR`, defaulting to `<tmp>/logbus-<user>`.
#[must_use]
pub fn default_driver_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LOGBUS_DIR") {
        return PathBuf::from(dir);
    }

    let user = std::env::var("USER").unwrap_or_else(|_| "default".to_string());
    std::env::temp_dir().join(format!("logbus-{user}"))
}

/// Term length override: `LOGBUS_TERM_LENGTH` (bytes, power of two).
#[must_use]
pub fn term_length_from_env() -> Option<usize> {
    env_usize("LOGBUS_TERM_LENGTH")
}

/// MTU override: `LOGBUS_MTU_LENGTH` (bytes).
#[must_use]
pub fn mtu_length_from_env() -> Option<usize> {
    env_usize("LOGBUS_MTU_LENGTH")
}

/// Threading mode override: `LOGBUS_THREADING_MODE`.
#[must_use]
pub fn threading_mode_from_env() -> Option<ThreadingMode> {
    std::env::var("LOGBUS_THREADING_MODE")
        .ok()
        .and_then(|v| ThreadingMode::parse(&v))
}

/// Client liveness override: `LOGBUS_CLIENT_LIVENESS_TIMEOUT` (e.g. "5s",
/// "500ms", or raw nanoseconds).
#[must_use]
pub fn client_liveness_timeout_from_env() -> Option<u64> {
    std::env::var("LOGBUS_CLIENT_LIVENESS_TIMEOUT")
        .ok()
        .and_then(|v| parse_duration_ns(&v))
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Parse "10s" / "250ms" / "1000000" (ns) into nanoseconds.
#[must_use]
pub fn parse_duration_ns(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Some(stripped) = value.strip_suffix("ms") {
        return stripped
            .trim()
            .parse::<u64>()
            .ok()
            .map(|ms| Duration::from_millis(ms).as_nanos() as u64);
    }
    if let Some(stripped) = value.strip_suffix('s') {
        return stripped
            .trim()
            .parse::<u64>()
            .ok()
            .map(|s| Duration::from_secs(s).as_nanos() as u64);
    }
    value.parse::<u64>().ok()
}
