// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driver context: the concluded configuration a media driver runs with.
//!
//! Defaults come from [`crate::config`] (including `LOGBUS_*` environment
//! overrides); builder methods override per launch. `conclude` validates
//! the combination once before the driver starts.

use crate::bits::is_power_of_two;
use crate::concurrent::idle::{IdleStrategy, BACKOFF_DEFAULT};
use crate::config::{self, ThreadingMode};
use crate::error::{DriverError, Result};
use crate::logbuffer::descriptor::check_term_length;
use std::path::PathBuf;
use std::time::Duration;

/// Concluded launch configuration.
#[derive(Debug, Clone)]
pub struct DriverContext {
    pub dir: PathBuf,
    pub threading_mode: ThreadingMode,
    pub term_buffer_length: usize,
    pub ipc_term_buffer_length: usize,
    pub mtu_length: usize,
    pub publication_term_window_length: usize,
    pub initial_window_length: usize,
    pub to_driver_buffer_length: usize,
    pub to_clients_buffer_length: usize,
    pub counter_values_buffer_length: usize,
    pub error_buffer_length: usize,
    pub client_liveness_timeout_ns: u64,
    pub image_liveness_timeout_ns: u64,
    pub publication_unblock_timeout_ns: u64,
    pub publication_linger_timeout_ns: u64,
    pub publication_setup_timeout_ns: u64,
    pub publication_heartbeat_timeout_ns: u64,
    pub status_message_timeout_ns: u64,
    pub publication_connection_timeout_ms: u64,
    pub timer_interval_ns: u64,
    pub conductor_idle_strategy: IdleStrategy,
    pub sender_idle_strategy: IdleStrategy,
    pub receiver_idle_strategy: IdleStrategy,
    pub shared_idle_strategy: IdleStrategy,
    /// Delete a pre-existing driver directory at launch.
    pub dir_delete_on_start: bool,
    /// Delete the driver directory at shutdown.
    pub dir_delete_on_shutdown: bool,
    /// Fault log file pages in at creation.
    pub pre_touch_mapped_memory: bool,
}

impl Default for DriverContext {
    fn default() -> Self {
        Self {
            dir: config::default_driver_dir(),
            threading_mode: config::threading_mode_from_env()
                .unwrap_or(ThreadingMode::Dedicated),
            term_buffer_length: config::term_length_from_env()
                .unwrap_or(config::TERM_DEFAULT_LENGTH),
            ipc_term_buffer_length: config::IPC_TERM_DEFAULT_LENGTH,
            mtu_length: config::mtu_length_from_env().unwrap_or(config::MTU_DEFAULT_LENGTH),
            publication_term_window_length: config::PUBLICATION_TERM_WINDOW_DEFAULT,
            initial_window_length: config::INITIAL_WINDOW_DEFAULT_LENGTH,
            to_driver_buffer_length: config::TO_DRIVER_BUFFER_DEFAULT_LENGTH,
            to_clients_buffer_length: config::TO_CLIENTS_BUFFER_DEFAULT_LENGTH,
            counter_values_buffer_length: config::COUNTERS_VALUES_BUFFER_DEFAULT_LENGTH,
            error_buffer_length: config::ERROR_BUFFER_DEFAULT_LENGTH,
            client_liveness_timeout_ns: config::client_liveness_timeout_from_env()
                .unwrap_or(config::CLIENT_LIVENESS_TIMEOUT_NS),
            image_liveness_timeout_ns: config::IMAGE_LIVENESS_TIMEOUT_NS,
            publication_unblock_timeout_ns: config::PUBLICATION_UNBLOCK_TIMEOUT_NS,
            publication_linger_timeout_ns: config::PUBLICATION_LINGER_NS,
            publication_setup_timeout_ns: config::PUBLICATION_SETUP_TIMEOUT_NS,
            publication_heartbeat_timeout_ns: config::PUBLICATION_HEARTBEAT_TIMEOUT_NS,
            status_message_timeout_ns: config::STATUS_MESSAGE_TIMEOUT_NS,
            publication_connection_timeout_ms: config::PUBLICATION_CONNECTION_TIMEOUT_MS,
            timer_interval_ns: config::TIMER_INTERVAL_NS,
            conductor_idle_strategy: IdleStrategy::Sleeping(Duration::from_millis(1)),
            sender_idle_strategy: BACKOFF_DEFAULT,
            receiver_idle_strategy: BACKOFF_DEFAULT,
            shared_idle_strategy: BACKOFF_DEFAULT,
            dir_delete_on_start: true,
            dir_delete_on_shutdown: false,
            pre_touch_mapped_memory: false,
        }
    }
}

impl DriverContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dir(mut self, dir: PathBuf) -> Self {
        self.dir = dir;
        self
    }

    #[must_use]
    pub fn threading_mode(mut self, mode: ThreadingMode) -> Self {
        self.threading_mode = mode;
        self
    }

    #[must_use]
    pub fn term_buffer_length(mut self, length: usize) -> Self {
        self.term_buffer_length = length;
        self
    }

    #[must_use]
    pub fn mtu_length(mut self, length: usize) -> Self {
        self.mtu_length = length;
        self
    }

    #[must_use]
    pub fn client_liveness_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.client_liveness_timeout_ns = timeout_ns;
        self
    }

    #[must_use]
    pub fn image_liveness_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.image_liveness_timeout_ns = timeout_ns;
        self
    }

    #[must_use]
    pub fn publication_unblock_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.publication_unblock_timeout_ns = timeout_ns;
        self
    }

    #[must_use]
    pub fn publication_linger_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.publication_linger_timeout_ns = timeout_ns;
        self
    }

    #[must_use]
    pub fn timer_interval_ns(mut self, interval_ns: u64) -> Self {
        self.timer_interval_ns = interval_ns;
        self
    }

    #[must_use]
    pub fn status_message_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.status_message_timeout_ns = timeout_ns;
        self
    }

    #[must_use]
    pub fn dir_delete_on_shutdown(mut self, delete: bool) -> Self {
        self.dir_delete_on_shutdown = delete;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` naming the violated constraint.
    pub fn conclude(self) -> Result<Self> {
        check_term_length(self.term_buffer_length)?;
        check_term_length(self.ipc_term_buffer_length)?;

        if self.mtu_length <= crate::logbuffer::frame::HEADER_LENGTH
            || self.mtu_length > config::MAX_UDP_PAYLOAD_LENGTH
        {
            return Err(DriverError::InvalidConfiguration(format!(
                "mtu length out of range: {}",
                self.mtu_length
            )));
        }

        for (name, length) in [
            ("to-driver buffer", self.to_driver_buffer_length),
            ("to-clients buffer", self.to_clients_buffer_length),
        ] {
            if !is_power_of_two(length as u64) {
                return Err(DriverError::InvalidConfiguration(format!(
                    "{name} length not a power of two: {length}"
                )));
            }
        }

        if self.client_liveness_timeout_ns == 0 {
            return Err(DriverError::InvalidConfiguration(
                "client liveness timeout must be positive".to_string(),
            ));
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_conclude() {
        let ctx = DriverContext::new().conclude().expect("valid defaults");
        assert_eq!(ctx.term_buffer_length, config::TERM_DEFAULT_LENGTH);
        assert_eq!(ctx.mtu_length, config::MTU_DEFAULT_LENGTH);
    }

    #[test]
    fn test_conclude_rejects_bad_values() {
        assert!(DriverContext::new()
            .term_buffer_length(100_000)
            .conclude()
            .is_err());
        assert!(DriverContext::new().mtu_length(16).conclude().is_err());
        assert!(DriverContext::new()
            .client_liveness_timeout_ns(0)
            .conclude()
            .is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let ctx = DriverContext::new()
            .threading_mode(ThreadingMode::Shared)
            .term_buffer_length(64 * 1024)
            .publication_linger_timeout_ns(1)
            .conclude()
            .expect("valid");
        assert_eq!(ctx.threading_mode, ThreadingMode::Shared);
        assert_eq!(ctx.term_buffer_length, 64 * 1024);
        assert_eq!(ctx.publication_linger_timeout_ns, 1);
    }
}
