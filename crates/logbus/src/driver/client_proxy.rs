// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Conductor-side proxy publishing responses to clients.
//!
//! Every command is answered with exactly one response on the to-clients
//! broadcast channel; image availability events fan out to every linked
//! subscriber.

use crate::concurrent::broadcast::BroadcastTransmitter;
use crate::driver::commands::DriverResponse;
use crate::error::ErrorCode;

/// Writes [`DriverResponse`]s to the broadcast transmitter.
pub struct ClientProxy {
    transmitter: BroadcastTransmitter,
}

impl ClientProxy {
    #[must_use]
    pub fn new(transmitter: BroadcastTransmitter) -> Self {
        Self { transmitter }
    }

    /// Send any response.
    pub fn send(&mut self, response: &DriverResponse) {
        if let Err(e) = self
            .transmitter
            .transmit(response.msg_type_id(), &response.encode())
        {
            log::error!("[ClientProxy] failed to transmit response: {}", e);
        }
    }

    pub fn operation_succeeded(&mut self, correlation_id: i64) {
        self.send(&DriverResponse::OperationSucceeded { correlation_id });
    }

    pub fn on_error(&mut self, correlation_id: i64, error_code: ErrorCode, message: &str) {
        log::debug!(
            "[ClientProxy] error response correlation={} code={:?}: {}",
            correlation_id,
            error_code,
            message
        );
        self.send(&DriverResponse::Error {
            offending_correlation_id: correlation_id,
            error_code,
            message: message.to_string(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_publication_ready(
        &mut self,
        correlation_id: i64,
        registration_id: i64,
        session_id: i32,
        stream_id: i32,
        publisher_limit_counter_id: i32,
        channel_status_counter_id: i32,
        is_exclusive: bool,
        log_file: &str,
    ) {
        self.send(&DriverResponse::PublicationReady {
            correlation_id,
            registration_id,
            session_id,
            stream_id,
            publisher_limit_counter_id,
            channel_status_counter_id,
            is_exclusive,
            log_file: log_file.to_string(),
        });
    }

    pub fn on_subscription_ready(&mut self, correlation_id: i64, channel_status_counter_id: i32) {
        self.send(&DriverResponse::SubscriptionReady {
            correlation_id,
            channel_status_counter_id,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_available_image(
        &mut self,
        correlation_id: i64,
        session_id: i32,
        stream_id: i32,
        subscriber_registration_id: i64,
        subscriber_position_counter_id: i32,
        log_file: &str,
        source_identity: &str,
    ) {
        self.send(&DriverResponse::AvailableImage {
            correlation_id,
            session_id,
            stream_id,
            subscriber_registration_id,
            subscriber_position_counter_id,
            log_file: log_file.to_string(),
            source_identity: source_identity.to_string(),
        });
    }

    pub fn on_unavailable_image(
        &mut self,
        correlation_id: i64,
        subscriber_registration_id: i64,
        stream_id: i32,
        channel: &str,
    ) {
        self.send(&DriverResponse::UnavailableImage {
            correlation_id,
            subscriber_registration_id,
            stream_id,
            channel: channel.to_string(),
        });
    }

    pub fn on_counter_ready(&mut self, correlation_id: i64, counter_id: i32) {
        self.send(&DriverResponse::CounterReady {
            correlation_id,
            counter_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::atomic_buffer::AtomicBuffer;
    use crate::concurrent::broadcast::{BroadcastReceiver, TRAILER_LENGTH};
    use crate::driver::commands::ON_PUBLICATION_READY;

    #[test]
    fn test_responses_reach_a_receiver() {
        let mut backing = vec![0u8; 4096 + TRAILER_LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);
        let mut proxy = ClientProxy::new(BroadcastTransmitter::wrap(buffer).expect("tx"));
        let mut rx = BroadcastReceiver::wrap(buffer).expect("rx");

        proxy.on_publication_ready(9, 9, 55, 1001, 3, 4, false, "/tmp/x.logbuffer");

        let mut seen = None;
        assert!(rx.receive_next(|msg_type, payload| {
            seen = DriverResponse::decode(msg_type, payload);
            assert_eq!(msg_type, ON_PUBLICATION_READY);
        }));

        match seen {
            Some(DriverResponse::PublicationReady {
                correlation_id,
                session_id,
                log_file,
                ..
            }) => {
                assert_eq!(correlation_id, 9);
                assert_eq!(session_id, 55);
                assert_eq!(log_file, "/tmp/x.logbuffer");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
