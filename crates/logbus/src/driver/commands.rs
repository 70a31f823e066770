// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control protocol: commands clients write to the to-driver ring and the
//! responses the driver broadcasts back.
//!
//! Every command carries the issuing client id and a correlation id drawn
//! from the ring's correlation counter; every response echoes the
//! correlation id it answers. Strings are encoded as an i32 length
//! followed by UTF-8 bytes; all integers are little-endian.

use crate::error::ErrorCode;
use std::convert::TryInto;

// Command message type ids (to-driver ring).
pub const ADD_PUBLICATION: i32 = 0x01;
pub const REMOVE_PUBLICATION: i32 = 0x02;
pub const ADD_SUBSCRIPTION: i32 = 0x03;
pub const REMOVE_SUBSCRIPTION: i32 = 0x04;
pub const CLIENT_KEEPALIVE: i32 = 0x05;
pub const ADD_DESTINATION: i32 = 0x06;
pub const REMOVE_DESTINATION: i32 = 0x07;

// Response message type ids (to-clients broadcast).
pub const ON_OPERATION_SUCCESS: i32 = 0x10;
pub const ON_ERROR: i32 = 0x11;
pub const ON_PUBLICATION_READY: i32 = 0x12;
pub const ON_SUBSCRIPTION_READY: i32 = 0x13;
pub const ON_AVAILABLE_IMAGE: i32 = 0x14;
pub const ON_UNAVAILABLE_IMAGE: i32 = 0x15;
pub const ON_COUNTER_READY: i32 = 0x16;

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    AddPublication {
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        is_exclusive: bool,
        channel: String,
    },
    RemovePublication {
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
    },
    AddSubscription {
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: String,
    },
    RemoveSubscription {
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
    },
    ClientKeepalive {
        client_id: i64,
    },
    AddDestination {
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
        channel: String,
    },
    RemoveDestination {
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
        channel: String,
    },
}

impl ClientCommand {
    /// Ring message type id for this command.
    #[must_use]
    pub fn msg_type_id(&self) -> i32 {
        match self {
            ClientCommand::AddPublication { .. } => ADD_PUBLICATION,
            ClientCommand::RemovePublication { .. } => REMOVE_PUBLICATION,
            ClientCommand::AddSubscription { .. } => ADD_SUBSCRIPTION,
            ClientCommand::RemoveSubscription { .. } => REMOVE_SUBSCRIPTION,
            ClientCommand::ClientKeepalive { .. } => CLIENT_KEEPALIVE,
            ClientCommand::AddDestination { .. } => ADD_DESTINATION,
            ClientCommand::RemoveDestination { .. } => REMOVE_DESTINATION,
        }
    }

    /// Encode the command payload (without the ring record header).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        match self {
            ClientCommand::AddPublication {
                client_id,
                correlation_id,
                stream_id,
                is_exclusive,
                channel,
            } => {
                put_i64(&mut buf, *client_id);
                put_i64(&mut buf, *correlation_id);
                put_i32(&mut buf, *stream_id);
                put_i32(&mut buf, i32::from(*is_exclusive));
                put_string(&mut buf, channel);
            }
            ClientCommand::RemovePublication {
                client_id,
                correlation_id,
                registration_id,
            }
            | ClientCommand::RemoveSubscription {
                client_id,
                correlation_id,
                registration_id,
            } => {
                put_i64(&mut buf, *client_id);
                put_i64(&mut buf, *correlation_id);
                put_i64(&mut buf, *registration_id);
            }
            ClientCommand::AddSubscription {
                client_id,
                correlation_id,
                stream_id,
                channel,
            } => {
                put_i64(&mut buf, *client_id);
                put_i64(&mut buf, *correlation_id);
                put_i32(&mut buf, *stream_id);
                put_string(&mut buf, channel);
            }
            ClientCommand::ClientKeepalive { client_id } => {
                put_i64(&mut buf, *client_id);
            }
            ClientCommand::AddDestination {
                client_id,
                correlation_id,
                registration_id,
                channel,
            }
            | ClientCommand::RemoveDestination {
                client_id,
                correlation_id,
                registration_id,
                channel,
            } => {
                put_i64(&mut buf, *client_id);
                put_i64(&mut buf, *correlation_id);
                put_i64(&mut buf, *registration_id);
                put_string(&mut buf, channel);
            }
        }
        buf
    }

    /// Decode a command from its ring message type and payload.
    #[must_use]
    pub fn decode(msg_type_id: i32, buf: &[u8]) -> Option<Self> {
        let mut cursor = Cursor { buf, offset: 0 };
        match msg_type_id {
            ADD_PUBLICATION => Some(ClientCommand::AddPublication {
                client_id: cursor.i64()?,
                correlation_id: cursor.i64()?,
                stream_id: cursor.i32()?,
                is_exclusive: cursor.i32()? != 0,
                channel: cursor.string()?,
            }),
            REMOVE_PUBLICATION => Some(ClientCommand::RemovePublication {
                client_id: cursor.i64()?,
                correlation_id: cursor.i64()?,
                registration_id: cursor.i64()?,
            }),
            ADD_SUBSCRIPTION => Some(ClientCommand::AddSubscription {
                client_id: cursor.i64()?,
                correlation_id: cursor.i64()?,
                stream_id: cursor.i32()?,
                channel: cursor.string()?,
            }),
            REMOVE_SUBSCRIPTION => Some(ClientCommand::RemoveSubscription {
                client_id: cursor.i64()?,
                correlation_id: cursor.i64()?,
                registration_id: cursor.i64()?,
            }),
            CLIENT_KEEPALIVE => Some(ClientCommand::ClientKeepalive {
                client_id: cursor.i64()?,
            }),
            ADD_DESTINATION => Some(ClientCommand::AddDestination {
                client_id: cursor.i64()?,
                correlation_id: cursor.i64()?,
                registration_id: cursor.i64()?,
                channel: cursor.string()?,
            }),
            REMOVE_DESTINATION => Some(ClientCommand::RemoveDestination {
                client_id: cursor.i64()?,
                correlation_id: cursor.i64()?,
                registration_id: cursor.i64()?,
                channel: cursor.string()?,
            }),
            _ => None,
        }
    }
}

/// A driver response broadcast to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverResponse {
    OperationSucceeded {
        correlation_id: i64,
    },
    Error {
        offending_correlation_id: i64,
        error_code: ErrorCode,
        message: String,
    },
    PublicationReady {
        correlation_id: i64,
        registration_id: i64,
        session_id: i32,
        stream_id: i32,
        publisher_limit_counter_id: i32,
        channel_status_counter_id: i32,
        is_exclusive: bool,
        log_file: String,
    },
    SubscriptionReady {
        correlation_id: i64,
        channel_status_counter_id: i32,
    },
    AvailableImage {
        correlation_id: i64,
        session_id: i32,
        stream_id: i32,
        subscriber_registration_id: i64,
        subscriber_position_counter_id: i32,
        log_file: String,
        source_identity: String,
    },
    UnavailableImage {
        correlation_id: i64,
        subscriber_registration_id: i64,
        stream_id: i32,
        channel: String,
    },
    CounterReady {
        correlation_id: i64,
        counter_id: i32,
    },
}

impl DriverResponse {
    /// Broadcast message type id for this response.
    #[must_use]
    pub fn msg_type_id(&self) -> i32 {
        match self {
            DriverResponse::OperationSucceeded { .. } => ON_OPERATION_SUCCESS,
            DriverResponse::Error { .. } => ON_ERROR,
            DriverResponse::PublicationReady { .. } => ON_PUBLICATION_READY,
            DriverResponse::SubscriptionReady { .. } => ON_SUBSCRIPTION_READY,
            DriverResponse::AvailableImage { .. } => ON_AVAILABLE_IMAGE,
            DriverResponse::UnavailableImage { .. } => ON_UNAVAILABLE_IMAGE,
            DriverResponse::CounterReady { .. } => ON_COUNTER_READY,
        }
    }

    /// Encode the response payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        match self {
            DriverResponse::OperationSucceeded { correlation_id } => {
                put_i64(&mut buf, *correlation_id);
            }
            DriverResponse::Error {
                offending_correlation_id,
                error_code,
                message,
            } => {
                put_i64(&mut buf, *offending_correlation_id);
                put_i32(&mut buf, *error_code as i32);
                put_string(&mut buf, message);
            }
            DriverResponse::PublicationReady {
                correlation_id,
                registration_id,
                session_id,
                stream_id,
                publisher_limit_counter_id,
                channel_status_counter_id,
                is_exclusive,
                log_file,
            } => {
                put_i64(&mut buf, *correlation_id);
                put_i64(&mut buf, *registration_id);
                put_i32(&mut buf, *session_id);
                put_i32(&mut buf, *stream_id);
                put_i32(&mut buf, *publisher_limit_counter_id);
                put_i32(&mut buf, *channel_status_counter_id);
                put_i32(&mut buf, i32::from(*is_exclusive));
                put_string(&mut buf, log_file);
            }
            DriverResponse::SubscriptionReady {
                correlation_id,
                channel_status_counter_id,
            } => {
                put_i64(&mut buf, *correlation_id);
                put_i32(&mut buf, *channel_status_counter_id);
            }
            DriverResponse::AvailableImage {
                correlation_id,
                session_id,
                stream_id,
                subscriber_registration_id,
                subscriber_position_counter_id,
                log_file,
                source_identity,
            } => {
                put_i64(&mut buf, *correlation_id);
                put_i32(&mut buf, *session_id);
                put_i32(&mut buf, *stream_id);
                put_i64(&mut buf, *subscriber_registration_id);
                put_i32(&mut buf, *subscriber_position_counter_id);
                put_string(&mut buf, log_file);
                put_string(&mut buf, source_identity);
            }
            DriverResponse::UnavailableImage {
                correlation_id,
                subscriber_registration_id,
                stream_id,
                channel,
            } => {
                put_i64(&mut buf, *correlation_id);
                put_i64(&mut buf, *subscriber_registration_id);
                put_i32(&mut buf, *stream_id);
                put_string(&mut buf, channel);
            }
            DriverResponse::CounterReady {
                correlation_id,
                counter_id,
            } => {
                put_i64(&mut buf, *correlation_id);
                put_i32(&mut buf, *counter_id);
            }
        }
        buf
    }

    /// Decode a response from its broadcast type and payload.
    #[must_use]
    pub fn decode(msg_type_id: i32, buf: &[u8]) -> Option<Self> {
        let mut cursor = Cursor { buf, offset: 0 };
        match msg_type_id {
            ON_OPERATION_SUCCESS => Some(DriverResponse::OperationSucceeded {
                correlation_id: cursor.i64()?,
            }),
            ON_ERROR => Some(DriverResponse::Error {
                offending_correlation_id: cursor.i64()?,
                error_code: ErrorCode::from_i32(cursor.i32()?),
                message: cursor.string()?,
            }),
            ON_PUBLICATION_READY => Some(DriverResponse::PublicationReady {
                correlation_id: cursor.i64()?,
                registration_id: cursor.i64()?,
                session_id: cursor.i32()?,
                stream_id: cursor.i32()?,
                publisher_limit_counter_id: cursor.i32()?,
                channel_status_counter_id: cursor.i32()?,
                is_exclusive: cursor.i32()? != 0,
                log_file: cursor.string()?,
            }),
            ON_SUBSCRIPTION_READY => Some(DriverResponse::SubscriptionReady {
                correlation_id: cursor.i64()?,
                channel_status_counter_id: cursor.i32()?,
            }),
            ON_AVAILABLE_IMAGE => Some(DriverResponse::AvailableImage {
                correlation_id: cursor.i64()?,
                session_id: cursor.i32()?,
                stream_id: cursor.i32()?,
                subscriber_registration_id: cursor.i64()?,
                subscriber_position_counter_id: cursor.i32()?,
                log_file: cursor.string()?,
                source_identity: cursor.string()?,
            }),
            ON_UNAVAILABLE_IMAGE => Some(DriverResponse::UnavailableImage {
                correlation_id: cursor.i64()?,
                subscriber_registration_id: cursor.i64()?,
                stream_id: cursor.i32()?,
                channel: cursor.string()?,
            }),
            ON_COUNTER_READY => Some(DriverResponse::CounterReady {
                correlation_id: cursor.i64()?,
                counter_id: cursor.i32()?,
            }),
            _ => None,
        }
    }
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_string(buf: &mut Vec<u8>, value: &str) {
    put_i32(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

struct Cursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl Cursor<'_> {
    fn i32(&mut self) -> Option<i32> {
        let bytes = self.buf.get(self.offset..self.offset + 4)?;
        self.offset += 4;
        Some(i32::from_le_bytes(bytes.try_into().ok()?))
    }

    fn i64(&mut self) -> Option<i64> {
        let bytes = self.buf.get(self.offset..self.offset + 8)?;
        self.offset += 8;
        Some(i64::from_le_bytes(bytes.try_into().ok()?))
    }

    fn string(&mut self) -> Option<String> {
        let length = self.i32()?;
        if length < 0 {
            return None;
        }
        let bytes = self.buf.get(self.offset..self.offset + length as usize)?;
        self.offset += length as usize;
        String::from_utf8(bytes.to_vec()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trips() {
        let commands = vec![
            ClientCommand::AddPublication {
                client_id: 1,
                correlation_id: 100,
                stream_id: 10,
                is_exclusive: true,
                channel: "aeron:udp?endpoint=127.0.0.1:40123".to_string(),
            },
            ClientCommand::RemovePublication {
                client_id: 1,
                correlation_id: 101,
                registration_id: 100,
            },
            ClientCommand::AddSubscription {
                client_id: 2,
                correlation_id: 102,
                stream_id: 10,
                channel: "aeron:ipc".to_string(),
            },
            ClientCommand::RemoveSubscription {
                client_id: 2,
                correlation_id: 103,
                registration_id: 102,
            },
            ClientCommand::ClientKeepalive { client_id: 2 },
            ClientCommand::AddDestination {
                client_id: 1,
                correlation_id: 104,
                registration_id: 100,
                channel: "aeron:udp?endpoint=10.0.0.1:9999".to_string(),
            },
            ClientCommand::RemoveDestination {
                client_id: 1,
                correlation_id: 105,
                registration_id: 100,
                channel: "aeron:udp?endpoint=10.0.0.1:9999".to_string(),
            },
        ];

        for command in commands {
            let decoded = ClientCommand::decode(command.msg_type_id(), &command.encode());
            assert_eq!(decoded, Some(command));
        }
    }

    #[test]
    fn test_response_round_trips() {
        let responses = vec![
            DriverResponse::OperationSucceeded { correlation_id: 5 },
            DriverResponse::Error {
                offending_correlation_id: 6,
                error_code: ErrorCode::UnknownPublication,
                message: "Unknown publication: 42".to_string(),
            },
            DriverResponse::PublicationReady {
                correlation_id: 7,
                registration_id: 7,
                session_id: -55,
                stream_id: 1001,
                publisher_limit_counter_id: 24,
                channel_status_counter_id: 25,
                is_exclusive: false,
                log_file: "/dev/shm/logbus/publications/x.logbuffer".to_string(),
            },
            DriverResponse::SubscriptionReady {
                correlation_id: 8,
                channel_status_counter_id: 26,
            },
            DriverResponse::AvailableImage {
                correlation_id: 9,
                session_id: -55,
                stream_id: 1001,
                subscriber_registration_id: 8,
                subscriber_position_counter_id: 27,
                log_file: "/dev/shm/logbus/images/y.logbuffer".to_string(),
                source_identity: "127.0.0.1:40123".to_string(),
            },
            DriverResponse::UnavailableImage {
                correlation_id: 9,
                subscriber_registration_id: 8,
                stream_id: 1001,
                channel: "aeron:udp?endpoint=127.0.0.1:40123".to_string(),
            },
            DriverResponse::CounterReady {
                correlation_id: 10,
                counter_id: 30,
            },
        ];

        for response in responses {
            let decoded = DriverResponse::decode(response.msg_type_id(), &response.encode());
            assert_eq!(decoded, Some(response));
        }
    }

    #[test]
    fn test_decode_rejects_unknown_and_truncated() {
        assert_eq!(ClientCommand::decode(0x7F, &[0u8; 16]), None);
        let keepalive = ClientCommand::ClientKeepalive { client_id: 3 };
        assert_eq!(ClientCommand::decode(CLIENT_KEEPALIVE, &keepalive.encode()[..4]), None);
    }
}
