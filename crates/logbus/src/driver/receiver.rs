// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The Receiver agent: the inbound I/O duty cycle.
//!
//! Per cycle: drain conductor commands, poll every receive endpoint
//! (inserting data into images, dispatching SETUPs), then let each live
//! image flush its pending status messages and loss NAKs. Images whose
//! state left ACTIVE are retired to the dispatcher cool-down.

use crate::concurrent::counters::SystemCounters;
use crate::concurrent::spsc::OneToOneQueue;
use crate::config::{COMMAND_DRAIN_LIMIT, MAX_UDP_PAYLOAD_LENGTH};
use crate::driver::agent::Agent;
use crate::driver::clock::DriverClock;
use crate::driver::image::{ImageState, PublicationImage};
use crate::driver::proxies::{ConductorProxy, ReceiverCmd};
use crate::driver::receive_endpoint::ReceiveChannelEndpoint;
use std::sync::Arc;

/// Inbound I/O agent.
pub struct Receiver {
    cmd_queue: Arc<OneToOneQueue<ReceiverCmd>>,
    conductor_proxy: ConductorProxy,
    endpoints: Vec<Arc<ReceiveChannelEndpoint>>,
    images: Vec<(Arc<ReceiveChannelEndpoint>, Arc<PublicationImage>)>,
    system_counters: Arc<SystemCounters>,
    clock: DriverClock,
    recv_buf: Vec<u8>,
}

impl Receiver {
    #[must_use]
    pub fn new(
        cmd_queue: Arc<OneToOneQueue<ReceiverCmd>>,
        conductor_proxy: ConductorProxy,
        system_counters: Arc<SystemCounters>,
        clock: DriverClock,
    ) -> Self {
        Self {
            cmd_queue,
            conductor_proxy,
            endpoints: Vec::new(),
            images: Vec::new(),
            system_counters,
            clock,
            recv_buf: vec![0u8; MAX_UDP_PAYLOAD_LENGTH],
        }
    }

    fn on_cmd(&mut self, cmd: ReceiverCmd) {
        match cmd {
            ReceiverCmd::RegisterReceiveChannelEndpoint(endpoint) => {
                self.endpoints.push(endpoint);
            }
            ReceiverCmd::CloseReceiveChannelEndpoint(endpoint) => {
                self.endpoints.retain(|e| !Arc::ptr_eq(e, &endpoint));
                self.images.retain(|(e, _)| !Arc::ptr_eq(e, &endpoint));
            }
            ReceiverCmd::AddSubscription {
                endpoint,
                stream_id,
            } => {
                endpoint.add_subscription(stream_id);
            }
            ReceiverCmd::RemoveSubscription {
                endpoint,
                stream_id,
            } => {
                endpoint.remove_subscription(stream_id);
                self.images
                    .retain(|(e, image)| !(Arc::ptr_eq(e, &endpoint) && image.stream_id() == stream_id));
            }
            ReceiverCmd::NewPublicationImage { endpoint, image } => {
                endpoint.activate_image(&image);
                self.images.push((endpoint, image));
            }
            ReceiverCmd::RemoveCoolDown {
                endpoint,
                session_id,
                stream_id,
            } => {
                endpoint.remove_cool_down(session_id, stream_id);
            }
        }
    }

    fn poll_endpoints(&mut self, now_ns: i64) -> usize {
        let mut work_count = 0;
        for endpoint in &self.endpoints {
            work_count += endpoint.poll(
                &mut self.recv_buf,
                &self.conductor_proxy,
                &self.system_counters,
                now_ns,
                endpoint,
            );
            endpoint.check_pending_setups(now_ns);
        }
        work_count
    }

    fn service_images(&mut self, now_ns: i64) -> usize {
        let mut work_count = 0;

        // Retire images that left ACTIVE: park their session so stale
        // packets cannot resurrect them.
        self.images.retain(|(endpoint, image)| {
            if image.state() == ImageState::Active {
                true
            } else {
                endpoint.cool_down(image.session_id(), image.stream_id());
                false
            }
        });

        for (endpoint, image) in &self.images {
            work_count += image.send_pending_status_message(endpoint.socket(), now_ns);
            work_count += image.send_pending_loss(endpoint.socket(), now_ns);
        }

        work_count
    }
}

impl Agent for Receiver {
    fn role_name(&self) -> &'static str {
        "driver-receiver"
    }

    fn do_work(&mut self) -> usize {
        let mut work_count = 0;

        for _ in 0..COMMAND_DRAIN_LIMIT {
            match self.cmd_queue.poll() {
                Some(cmd) => {
                    self.on_cmd(cmd);
                    work_count += 1;
                }
                None => break,
            }
        }

        let now_ns = self.clock.nano_time() as i64;
        work_count += self.poll_endpoints(now_ns);
        work_count += self.service_images(now_ns);

        work_count
    }

    fn on_close(&mut self) {
        self.images.clear();
        self.endpoints.clear();
        log::debug!("[Receiver] closed");
    }
}
