// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end loopback: a full media driver publishes to itself over UDP.
//!
//! The test acts as a driver client: it maps the CnC file, issues
//! commands over the to-driver ring, appends frames into the publication
//! log exactly as the client library would, and reads them back from the
//! image log once the receiver has rebuilt them.

use logbus::concurrent::atomic_buffer::AtomicBuffer;
use logbus::concurrent::broadcast::BroadcastReceiver;
use logbus::concurrent::counters::Position;
use logbus::concurrent::mmap::MappedFile;
use logbus::concurrent::ringbuffer::ManyToOneRingBuffer;
use logbus::driver::cnc::CncFile;
use logbus::driver::commands::{ClientCommand, DriverResponse};
use logbus::driver::context::DriverContext;
use logbus::driver::media_driver::MediaDriver;
use logbus::logbuffer::descriptor;
use logbus::logbuffer::header_writer::HeaderWriter;
use logbus::logbuffer::term_appender::TermAppender;
use logbus::logbuffer::term_reader;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const TERM_LENGTH: usize = 64 * 1024;
const STREAM_ID: i32 = 1001;

fn unique_dir() -> PathBuf {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("logbus_loopback_{ts}"))
}

fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind probe");
    socket.local_addr().expect("addr").port()
}

/// A mapped log viewed the way a client maps the file the driver names in
/// its ready responses.
struct MappedLog {
    mapped: MappedFile,
    term_length: usize,
}

impl MappedLog {
    fn map(log_file: &str, term_length: usize) -> Self {
        let mapped = MappedFile::map_existing(
            Path::new(log_file),
            descriptor::compute_log_length(term_length),
        )
        .expect("map log");
        Self {
            mapped,
            term_length,
        }
    }

    fn term_buffer(&self, index: usize) -> AtomicBuffer {
        // SAFETY: the mapping covers all partitions plus the trailer.
        unsafe {
            AtomicBuffer::from_raw_parts(
                self.mapped.as_ptr().add(index * self.term_length),
                self.term_length,
            )
        }
    }

    fn meta(&self) -> AtomicBuffer {
        // SAFETY: trailer follows the partitions inside the mapping.
        unsafe {
            AtomicBuffer::from_raw_parts(
                self.mapped.as_ptr().add(3 * self.term_length),
                descriptor::LOG_META_DATA_LENGTH,
            )
        }
    }
}

struct Client {
    ring: ManyToOneRingBuffer,
    responses: BroadcastReceiver,
    client_id: i64,
    _cnc: CncFile,
}

impl Client {
    fn connect(dir: &Path) -> Self {
        let cnc = CncFile::map_existing(dir).expect("map cnc");
        let ring = ManyToOneRingBuffer::wrap(cnc.to_driver_buffer()).expect("ring");
        let responses = BroadcastReceiver::wrap(cnc.to_clients_buffer()).expect("rx");
        Self {
            ring,
            responses,
            client_id: 7,
            _cnc: cnc,
        }
    }

    fn counter_values(&self) -> AtomicBuffer {
        self._cnc.counter_values_buffer()
    }

    fn add_publication(&self, channel: &str) -> i64 {
        let correlation_id = self.ring.next_correlation_id();
        let cmd = ClientCommand::AddPublication {
            client_id: self.client_id,
            correlation_id,
            stream_id: STREAM_ID,
            is_exclusive: false,
            channel: channel.to_string(),
        };
        assert!(self.ring.write(cmd.msg_type_id(), &cmd.encode()).expect("write"));
        correlation_id
    }

    fn add_subscription(&self, channel: &str) -> i64 {
        let correlation_id = self.ring.next_correlation_id();
        let cmd = ClientCommand::AddSubscription {
            client_id: self.client_id,
            correlation_id,
            stream_id: STREAM_ID,
            channel: channel.to_string(),
        };
        assert!(self.ring.write(cmd.msg_type_id(), &cmd.encode()).expect("write"));
        correlation_id
    }

    fn remove_publication(&self, registration_id: i64) {
        let correlation_id = self.ring.next_correlation_id();
        let cmd = ClientCommand::RemovePublication {
            client_id: self.client_id,
            correlation_id,
            registration_id,
        };
        assert!(self.ring.write(cmd.msg_type_id(), &cmd.encode()).expect("write"));
    }

    fn keepalive(&self) {
        let cmd = ClientCommand::ClientKeepalive {
            client_id: self.client_id,
        };
        let _ = self.ring.write(cmd.msg_type_id(), &cmd.encode());
    }

    /// Wait for the next response matching `f`, pumping keepalives.
    fn await_response<T>(
        &mut self,
        timeout: Duration,
        mut f: impl FnMut(&DriverResponse) -> Option<T>,
    ) -> T {
        let deadline = Instant::now() + timeout;
        loop {
            let mut matched = None;
            self.responses.receive_next(|msg_type_id, payload| {
                if let Some(response) = DriverResponse::decode(msg_type_id, payload) {
                    matched = f(&response);
                }
            });
            if let Some(value) = matched {
                return value;
            }
            assert!(Instant::now() < deadline, "timed out awaiting response");
            self.keepalive();
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

#[test]
fn test_publish_subscribe_loopback() {
    let dir = unique_dir();
    let port = free_udp_port();
    let channel = format!("aeron:udp?endpoint=127.0.0.1:{port}");

    let driver = MediaDriver::launch(
        DriverContext::new()
            .dir(dir.clone())
            .term_buffer_length(TERM_LENGTH)
            .timer_interval_ns(1_000_000)
            .image_liveness_timeout_ns(300_000_000)
            .publication_linger_timeout_ns(50_000_000)
            .status_message_timeout_ns(20_000_000)
            .client_liveness_timeout_ns(10_000_000_000)
            .dir_delete_on_shutdown(true),
    )
    .expect("launch driver");

    let mut client = Client::connect(&dir);

    // Subscribe first so the image is created as soon as SETUP arrives.
    let sub_correlation = client.add_subscription(&channel);
    client.await_response(Duration::from_secs(5), |response| match response {
        DriverResponse::SubscriptionReady { correlation_id, .. }
            if *correlation_id == sub_correlation =>
        {
            Some(())
        }
        _ => None,
    });

    let pub_correlation = client.add_publication(&channel);
    let (pub_registration, session_id, pub_log) =
        client.await_response(Duration::from_secs(5), |response| match response {
            DriverResponse::PublicationReady {
                correlation_id,
                registration_id,
                session_id,
                log_file,
                ..
            } if *correlation_id == pub_correlation => {
                Some((*registration_id, *session_id, log_file.clone()))
            }
            _ => None,
        });

    // Publish three messages through the mapped log, as a client would.
    let publication_log = MappedLog::map(&pub_log, TERM_LENGTH);
    let meta = publication_log.meta();
    assert_eq!(descriptor::term_length(&meta), TERM_LENGTH);
    assert_eq!(descriptor::mtu_length(&meta), 1408);

    let header_writer = HeaderWriter::new(&descriptor::default_frame_header(&meta));
    let active_index = descriptor::active_partition_index(&meta);
    let appender = TermAppender::new(publication_log.term_buffer(active_index), meta, active_index);

    let payloads: Vec<Vec<u8>> = (0..3u8)
        .map(|i| format!("loopback message {i}").into_bytes())
        .collect();
    for payload in &payloads {
        let result = appender.append_unfragmented(&header_writer, payload, None);
        assert!(
            logbus::logbuffer::term_appender::append_term_offset(result) > 0,
            "append failed"
        );
    }

    // The receiver elects an image once SETUP lands; every linked
    // subscriber gets the image log file.
    let (image_correlation, image_log, sub_position_id) =
        client.await_response(Duration::from_secs(10), |response| match response {
            DriverResponse::AvailableImage {
                correlation_id,
                session_id: image_session,
                subscriber_registration_id,
                subscriber_position_counter_id,
                log_file,
                ..
            } if *subscriber_registration_id == sub_correlation => {
                assert_eq!(*image_session, session_id);
                Some((*correlation_id, log_file.clone(), *subscriber_position_counter_id))
            }
            _ => None,
        });

    // Read the frames back from the rebuilt image log.
    let image = MappedLog::map(&image_log, TERM_LENGTH);
    let image_meta = image.meta();
    assert_eq!(descriptor::initial_term_id(&image_meta), descriptor::initial_term_id(&meta));

    let initial_index = descriptor::active_partition_index(&image_meta);
    let term_buffer = image.term_buffer(initial_index);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut received: Vec<Vec<u8>> = Vec::new();
    let mut offset = 0;
    while received.len() < payloads.len() {
        let (new_offset, _) = term_reader::read(&term_buffer, offset, usize::MAX, |payload, header| {
            assert_eq!(header.session_id, session_id);
            assert_eq!(header.stream_id, STREAM_ID);
            received.push(payload.to_vec());
        });
        offset = new_offset;
        assert!(Instant::now() < deadline, "timed out waiting for data");
        client.keepalive();
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(received, payloads);

    // Consume up to the rebuilt position so the image can drain.
    let sub_position = Position::new(client.counter_values(), sub_position_id);
    sub_position.set_ordered(offset as i64);

    // Tear the publication down; once heartbeats stop, the image goes
    // inactive, lingers, and the subscriber is told it is gone.
    client.remove_publication(pub_registration);
    client.await_response(Duration::from_secs(15), |response| match response {
        DriverResponse::UnavailableImage { correlation_id, .. }
            if *correlation_id == image_correlation =>
        {
            Some(())
        }
        _ => None,
    });

    driver.close();
    assert!(!dir.exists());
}
