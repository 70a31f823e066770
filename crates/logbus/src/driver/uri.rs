// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel URI parsing.
//!
//! `aeron:<media>?<param>=<value>|<param>=<value>` with `|` (canonical) or
//! `&` accepted as the separator. Recognized media are `udp` and the
//! shared-memory `ipc`. A `aeron-spy:` prefix subscribes to the local tap
//! of a network publication instead of the network itself.

use crate::error::{DriverError, Result};
use std::collections::HashMap;

/// URI scheme.
pub const SCHEME: &str = "aeron:";
/// Spy prefix for shared-memory taps on network publications.
pub const SPY_PREFIX: &str = "aeron-spy:";
/// The shared-memory media.
pub const IPC_MEDIA: &str = "ipc";
/// The UDP media.
pub const UDP_MEDIA: &str = "udp";
/// Canonical IPC channel.
pub const IPC_CHANNEL: &str = "aeron:ipc";

// Recognized parameter names.
pub const ENDPOINT_PARAM_NAME: &str = "endpoint";
pub const INTERFACE_PARAM_NAME: &str = "interface";
pub const CONTROL_PARAM_NAME: &str = "control";
pub const CONTROL_MODE_PARAM_NAME: &str = "control-mode";
pub const TTL_PARAM_NAME: &str = "ttl";
pub const MTU_PARAM_NAME: &str = "mtu";
pub const TERM_LENGTH_PARAM_NAME: &str = "term-length";
pub const INITIAL_TERM_ID_PARAM_NAME: &str = "init-term-id";
pub const TERM_ID_PARAM_NAME: &str = "term-id";
pub const TERM_OFFSET_PARAM_NAME: &str = "term-offset";
pub const SESSION_ID_PARAM_NAME: &str = "session-id";
pub const RELIABLE_STREAM_PARAM_NAME: &str = "reliable";
pub const TAGS_PARAM_NAME: &str = "tags";

pub const CONTROL_MODE_MANUAL: &str = "manual";
pub const CONTROL_MODE_DYNAMIC: &str = "dynamic";

/// A parsed channel URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUri {
    media: String,
    is_spy: bool,
    params: HashMap<String, String>,
    original: String,
}

impl ChannelUri {
    /// Parse a channel URI string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChannel` for a bad scheme, unknown media, or
    /// malformed parameter list.
    pub fn parse(uri: &str) -> Result<Self> {
        let original = uri.to_string();
        let (is_spy, rest) = match uri.strip_prefix(SPY_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, uri),
        };

        let rest = rest
            .strip_prefix(SCHEME)
            .ok_or_else(|| DriverError::InvalidChannel(format!("missing '{SCHEME}' scheme: {uri}")))?;

        let (media, query) = match rest.split_once('?') {
            Some((media, query)) => (media, Some(query)),
            None => (rest, None),
        };

        if media != UDP_MEDIA && media != IPC_MEDIA {
            return Err(DriverError::InvalidChannel(format!(
                "unknown media '{media}': {uri}"
            )));
        }
        if is_spy && media != UDP_MEDIA {
            return Err(DriverError::InvalidChannel(format!(
                "spies only apply to udp channels: {uri}"
            )));
        }

        let mut params = HashMap::new();
        if let Some(query) = query {
            for pair in query.split(['|', '&']) {
                if pair.is_empty() {
                    continue;
                }
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    DriverError::InvalidChannel(format!("malformed param '{pair}': {uri}"))
                })?;
                if key.is_empty() || value.is_empty() {
                    return Err(DriverError::InvalidChannel(format!(
                        "empty param key or value '{pair}': {uri}"
                    )));
                }
                params.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Self {
            media: media.to_string(),
            is_spy,
            params,
            original,
        })
    }

    /// The media part (`udp` or `ipc`).
    #[must_use]
    pub fn media(&self) -> &str {
        &self.media
    }

    /// Is this the shared-memory media?
    #[must_use]
    pub fn is_ipc(&self) -> bool {
        self.media == IPC_MEDIA
    }

    /// Was the URI prefixed `aeron-spy:`?
    #[must_use]
    pub fn is_spy(&self) -> bool {
        self.is_spy
    }

    /// Parameter lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parameter lookup with a default.
    #[must_use]
    pub fn get_or_default<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse an integer parameter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChannel` when present but unparsable.
    pub fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.parse::<i64>().map(Some).map_err(|_| {
                DriverError::InvalidChannel(format!("param '{key}={value}' is not an integer"))
            }),
        }
    }

    /// The URI as the client supplied it.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }
}
