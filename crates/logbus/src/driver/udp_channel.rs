// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resolved UDP channel: addresses, multicast/MDC classification, and the
//! canonical form keying the endpoint maps.

use crate::config;
use crate::driver::uri::{
    self, ChannelUri, CONTROL_MODE_DYNAMIC, CONTROL_MODE_MANUAL,
};
use crate::error::{DriverError, Result};
use crate::logbuffer::descriptor::check_term_length;
use std::net::{SocketAddr, ToSocketAddrs};

/// A parsed and resolved UDP channel.
#[derive(Debug, Clone)]
pub struct UdpChannel {
    uri: ChannelUri,
    /// Data destination (unicast peer or multicast group); None for
    /// manual-control MDC channels that only ever send to destinations.
    endpoint: Option<SocketAddr>,
    /// Explicit control address for MDC.
    control: Option<SocketAddr>,
    /// Local interface to bind.
    interface: Option<SocketAddr>,
    control_mode_manual: bool,
    control_mode_dynamic: bool,
    multicast_ttl: i32,
    canonical_form: String,
}

impl UdpChannel {
    /// Parse and resolve a UDP channel URI.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChannel` when the URI is not UDP, addresses do not
    /// resolve, or the parameter combination is unusable.
    pub fn parse(channel: &str) -> Result<Self> {
        let uri = ChannelUri::parse(channel)?;
        if uri.is_ipc() {
            return Err(DriverError::InvalidChannel(format!(
                "not a udp channel: {channel}"
            )));
        }

        let endpoint = uri
            .get(uri::ENDPOINT_PARAM_NAME)
            .map(resolve_address)
            .transpose()?;
        let control = uri
            .get(uri::CONTROL_PARAM_NAME)
            .map(resolve_address)
            .transpose()?;
        let interface = uri
            .get(uri::INTERFACE_PARAM_NAME)
            .map(resolve_address)
            .transpose()?;

        let control_mode = uri.get(uri::CONTROL_MODE_PARAM_NAME);
        let control_mode_manual = control_mode == Some(CONTROL_MODE_MANUAL);
        let control_mode_dynamic = control_mode == Some(CONTROL_MODE_DYNAMIC);
        if let Some(mode) = control_mode {
            if !control_mode_manual && !control_mode_dynamic {
                return Err(DriverError::InvalidChannel(format!(
                    "unknown control-mode '{mode}': {channel}"
                )));
            }
        }

        if endpoint.is_none() && control.is_none() && !control_mode_manual {
            return Err(DriverError::InvalidChannel(format!(
                "channel must have an endpoint or control address: {channel}"
            )));
        }

        let multicast_ttl = uri
            .get_i64(uri::TTL_PARAM_NAME)?
            .map_or(0, |ttl| ttl as i32);

        let canonical_form = canonicalize(&endpoint, &control, control_mode_manual);

        Ok(Self {
            uri,
            endpoint,
            control,
            interface,
            control_mode_manual,
            control_mode_dynamic,
            multicast_ttl,
            canonical_form,
        })
    }

    /// The parsed URI.
    #[must_use]
    pub fn uri(&self) -> &ChannelUri {
        &self.uri
    }

    /// The URI string as supplied by the client.
    #[must_use]
    pub fn original_uri(&self) -> &str {
        self.uri.original()
    }

    /// Canonical form keying the endpoint maps: channels with the same
    /// canonical form share one socket.
    #[must_use]
    pub fn canonical_form(&self) -> &str {
        &self.canonical_form
    }

    /// Remote data address.
    #[must_use]
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    /// Explicit control address.
    #[must_use]
    pub fn control(&self) -> Option<SocketAddr> {
        self.control
    }

    /// Local interface address to bind, if constrained.
    #[must_use]
    pub fn interface(&self) -> Option<SocketAddr> {
        self.interface
    }

    /// Is the data destination a multicast group?
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.endpoint.is_some_and(|addr| addr.ip().is_multicast())
    }

    /// Does the channel carry an explicit control address?
    #[must_use]
    pub fn has_explicit_control(&self) -> bool {
        self.control.is_some()
    }

    /// Multi-destination-cast with destinations managed by the client.
    #[must_use]
    pub fn is_manual_control_mode(&self) -> bool {
        self.control_mode_manual
    }

    /// Multi-destination-cast with destinations learned from status
    /// messages.
    #[must_use]
    pub fn is_dynamic_control_mode(&self) -> bool {
        self.control_mode_dynamic
    }

    /// Multicast TTL override (0 = OS default).
    #[must_use]
    pub fn multicast_ttl(&self) -> i32 {
        self.multicast_ttl
    }

    /// Address the receive side binds for this channel.
    #[must_use]
    pub fn bind_address(&self) -> Option<SocketAddr> {
        self.endpoint.or(self.control)
    }
}

fn resolve_address(spec: &str) -> Result<SocketAddr> {
    if let Ok(addr) = spec.parse::<SocketAddr>() {
        return Ok(addr);
    }

    spec.to_socket_addrs()
        .map_err(|e| DriverError::InvalidChannel(format!("cannot resolve '{spec}': {e}")))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| DriverError::InvalidChannel(format!("no address for '{spec}'")))
}

fn canonicalize(
    endpoint: &Option<SocketAddr>,
    control: &Option<SocketAddr>,
    manual: bool,
) -> String {
    match (endpoint, control) {
        (Some(endpoint), Some(control)) => format!("udp-c-{control}-e-{endpoint}"),
        (Some(endpoint), None) => format!("udp-e-{endpoint}"),
        (None, Some(control)) => format!("udp-c-{control}"),
        (None, None) => {
            debug_assert!(manual);
            "udp-mdc-manual".to_string()
        }
    }
}

/// Stream parameters extracted from a publication channel URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicationParams {
    pub term_length: usize,
    pub mtu_length: usize,
    pub session_id: Option<i32>,
}

impl PublicationParams {
    /// Extract and validate against driver defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChannel` for out-of-range values or replay-style
    /// positioning params, which this driver does not serve.
    pub fn from_uri(
        uri: &ChannelUri,
        default_term_length: usize,
        default_mtu: usize,
    ) -> Result<Self> {
        for replay_param in [
            uri::INITIAL_TERM_ID_PARAM_NAME,
            uri::TERM_ID_PARAM_NAME,
            uri::TERM_OFFSET_PARAM_NAME,
        ] {
            if uri.get(replay_param).is_some() {
                return Err(DriverError::InvalidChannel(format!(
                    "'{replay_param}' positioning is not supported"
                )));
            }
        }

        let term_length = match uri.get_i64(uri::TERM_LENGTH_PARAM_NAME)? {
            Some(value) => {
                let length = value as usize;
                check_term_length(length)?;
                length
            }
            None => default_term_length,
        };

        let mtu_length = match uri.get_i64(uri::MTU_PARAM_NAME)? {
            Some(value) => {
                let mtu = value as usize;
                if !(crate::logbuffer::frame::HEADER_LENGTH + 1..=config::MAX_UDP_PAYLOAD_LENGTH)
                    .contains(&mtu)
                {
                    return Err(DriverError::InvalidChannel(format!(
                        "mtu {mtu} out of range"
                    )));
                }
                mtu
            }
            None => default_mtu,
        };

        let session_id = uri
            .get_i64(uri::SESSION_ID_PARAM_NAME)?
            .map(|value| value as i32);

        Ok(Self {
            term_length,
            mtu_length,
            session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unicast_channel() {
        let channel = UdpChannel::parse("aeron:udp?endpoint=127.0.0.1:40123").expect("parse");
        assert_eq!(
            channel.endpoint(),
            Some("127.0.0.1:40123".parse().expect("addr"))
        );
        assert!(!channel.is_multicast());
        assert_eq!(channel.canonical_form(), "udp-e-127.0.0.1:40123");
    }

    #[test]
    fn test_same_channel_same_canonical_form() {
        let a = UdpChannel::parse("aeron:udp?endpoint=127.0.0.1:40123").expect("parse");
        let b = UdpChannel::parse("aeron:udp?endpoint=127.0.0.1:40123|mtu=4096").expect("parse");
        assert_eq!(a.canonical_form(), b.canonical_form());
    }

    #[test]
    fn test_multicast_channel() {
        let channel =
            UdpChannel::parse("aeron:udp?endpoint=224.0.1.1:40456|ttl=16").expect("parse");
        assert!(channel.is_multicast());
        assert_eq!(channel.multicast_ttl(), 16);
    }

    #[test]
    fn test_mdc_channels() {
        let manual =
            UdpChannel::parse("aeron:udp?control-mode=manual").expect("parse");
        assert!(manual.is_manual_control_mode());
        assert_eq!(manual.canonical_form(), "udp-mdc-manual");

        let dynamic = UdpChannel::parse(
            "aeron:udp?control=127.0.0.1:40500|control-mode=dynamic",
        )
        .expect("parse");
        assert!(dynamic.is_dynamic_control_mode());
        assert!(dynamic.has_explicit_control());
    }

    #[test]
    fn test_rejects_endpointless_non_mdc() {
        assert!(UdpChannel::parse("aeron:udp").is_err());
        assert!(UdpChannel::parse("aeron:udp?ttl=4").is_err());
        assert!(UdpChannel::parse("aeron:ipc").is_err());
    }

    #[test]
    fn test_publication_params() {
        let uri = ChannelUri::parse(
            "aeron:udp?endpoint=127.0.0.1:40123|term-length=65536|mtu=4096|session-id=55",
        )
        .expect("parse");
        let params = PublicationParams::from_uri(&uri, 16 * 1024 * 1024, 1408).expect("params");
        assert_eq!(params.term_length, 65536);
        assert_eq!(params.mtu_length, 4096);
        assert_eq!(params.session_id, Some(55));
    }

    #[test]
    fn test_publication_params_defaults() {
        let uri = ChannelUri::parse("aeron:udp?endpoint=127.0.0.1:40123").expect("parse");
        let params = PublicationParams::from_uri(&uri, 1 << 24, 1408).expect("params");
        assert_eq!(params.term_length, 1 << 24);
        assert_eq!(params.mtu_length, 1408);
        assert_eq!(params.session_id, None);
    }

    #[test]
    fn test_publication_params_reject_replay_and_bad_values() {
        let replay =
            ChannelUri::parse("aeron:udp?endpoint=127.0.0.1:1|term-id=5").expect("parse");
        assert!(PublicationParams::from_uri(&replay, 1 << 24, 1408).is_err());

        let bad_term =
            ChannelUri::parse("aeron:udp?endpoint=127.0.0.1:1|term-length=12345").expect("parse");
        assert!(PublicationParams::from_uri(&bad_term, 1 << 24, 1408).is_err());

        let bad_mtu =
            ChannelUri::parse("aeron:udp?endpoint=127.0.0.1:1|mtu=100000").expect("parse");
        assert!(PublicationParams::from_uri(&bad_mtu, 1 << 24, 1408).is_err());
    }
}
