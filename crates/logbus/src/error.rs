// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driver error type and the control-protocol error codes reported to
//! clients.
//!
//! Command handling never tears the driver down: every failed command is
//! converted into an `ERROR` response carrying one of the [`ErrorCode`]
//! values, logged, and the conductor moves on to the next command.

use std::io;

/// Result alias used throughout the driver.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Error codes carried in `ERROR` responses on the to-clients channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Unspecified failure (resource allocation, I/O, internal).
    Generic = 0,
    /// Channel URI could not be parsed or is not usable.
    InvalidChannel = 1,
    /// Registration id does not refer to a live subscription.
    UnknownSubscription = 2,
    /// Registration id does not refer to a live publication.
    UnknownPublication = 3,
    /// Channel endpoint could not be created or used.
    ChannelEndpointError = 4,
}

impl ErrorCode {
    /// Decode a wire value, falling back to `Generic` for unknown codes.
    #[must_use]
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => ErrorCode::InvalidChannel,
            2 => ErrorCode::UnknownSubscription,
            3 => ErrorCode::UnknownPublication,
            4 => ErrorCode::ChannelEndpointError,
            _ => ErrorCode::Generic,
        }
    }
}

/// Errors raised while conducting the media driver.
#[derive(Debug)]
pub enum DriverError {
    /// Channel URI is malformed or carries unusable parameters.
    InvalidChannel(String),
    /// Driver context or configuration value out of range.
    InvalidConfiguration(String),
    /// Registration id does not match any live publication.
    UnknownPublication(i64),
    /// Registration id does not match any live subscription.
    UnknownSubscription(i64),
    /// Parameters clash with an existing entity sharing the resource
    /// (shared publication param mismatch, reliability conflict).
    ClashingState(String),
    /// Underlying file or socket operation failed.
    Io(io::Error),
    /// Shared memory mapping failed.
    Mapping(String),
    /// Control file version does not match this driver.
    VersionMismatch { expected: i32, actual: i32 },
    /// Anything else worth reporting to the offending client.
    Generic(String),
}

impl DriverError {
    /// Control-protocol code reported for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            DriverError::InvalidChannel(_) => ErrorCode::InvalidChannel,
            DriverError::UnknownPublication(_) => ErrorCode::UnknownPublication,
            DriverError::UnknownSubscription(_) => ErrorCode::UnknownSubscription,
            DriverError::ClashingState(_) | DriverError::InvalidConfiguration(_) => {
                ErrorCode::Generic
            }
            DriverError::Io(_)
            | DriverError::Mapping(_)
            | DriverError::VersionMismatch { .. }
            | DriverError::Generic(_) => ErrorCode::Generic,
        }
    }
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::InvalidChannel(msg) => write!(f, "Invalid channel: {}", msg),
            DriverError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            DriverError::UnknownPublication(id) => write!(f, "Unknown publication: {}", id),
            DriverError::UnknownSubscription(id) => write!(f, "Unknown subscription: {}", id),
            DriverError::ClashingState(msg) => write!(f, "{}", msg),
            DriverError::Io(e) => write!(f, "I/O error: {}", e),
            DriverError::Mapping(msg) => write!(f, "Mapping failed: {}", msg),
            DriverError::VersionMismatch { expected, actual } => write!(
                f,
                "Control file version mismatch: expected {} got {}",
                expected, actual
            ),
            DriverError::Generic(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DriverError {
    fn from(e: io::Error) -> Self {
        DriverError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_round_trip() {
        for code in [
            ErrorCode::Generic,
            ErrorCode::InvalidChannel,
            ErrorCode::UnknownSubscription,
            ErrorCode::UnknownPublication,
            ErrorCode::ChannelEndpointError,
        ] {
            assert_eq!(ErrorCode::from_i32(code as i32), code);
        }
        assert_eq!(ErrorCode::from_i32(999), ErrorCode::Generic);
    }

    #[test]
    fn test_display_names_entities() {
        let err = DriverError::UnknownPublication(42);
        assert_eq!(err.to_string(), "Unknown publication: 42");
        assert_eq!(err.code(), ErrorCode::UnknownPublication);
    }
}
