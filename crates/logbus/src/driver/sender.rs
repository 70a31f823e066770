// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The Sender agent: the outbound I/O duty cycle.
//!
//! Per cycle: drain conductor commands, poll control traffic (status
//! messages, NAKs, RTT probes) on every send endpoint, then give each
//! publication one send opportunity, rotating the starting point so no
//! stream starves the others.

use crate::concurrent::counters::{SystemCounterId, SystemCounters};
use crate::concurrent::spsc::OneToOneQueue;
use crate::config::{COMMAND_DRAIN_LIMIT, MAX_UDP_PAYLOAD_LENGTH};
use crate::driver::agent::Agent;
use crate::driver::clock::DriverClock;
use crate::driver::proxies::SenderCmd;
use crate::driver::publication::NetworkPublication;
use crate::driver::send_endpoint::SendChannelEndpoint;
use std::sync::Arc;

/// Outbound I/O agent.
pub struct Sender {
    cmd_queue: Arc<OneToOneQueue<SenderCmd>>,
    publications: Vec<Arc<NetworkPublication>>,
    endpoints: Vec<Arc<SendChannelEndpoint>>,
    system_counters: Arc<SystemCounters>,
    clock: DriverClock,
    control_buf: Vec<u8>,
    round_robin_index: usize,
}

impl Sender {
    #[must_use]
    pub fn new(
        cmd_queue: Arc<OneToOneQueue<SenderCmd>>,
        system_counters: Arc<SystemCounters>,
        clock: DriverClock,
    ) -> Self {
        Self {
            cmd_queue,
            publications: Vec::new(),
            endpoints: Vec::new(),
            system_counters,
            clock,
            control_buf: vec![0u8; MAX_UDP_PAYLOAD_LENGTH],
            round_robin_index: 0,
        }
    }

    fn on_cmd(&mut self, cmd: SenderCmd) {
        match cmd {
            SenderCmd::RegisterSendChannelEndpoint(endpoint) => {
                self.endpoints.push(endpoint);
            }
            SenderCmd::CloseSendChannelEndpoint(endpoint) => {
                self.endpoints.retain(|e| !Arc::ptr_eq(e, &endpoint));
            }
            SenderCmd::NewNetworkPublication(publication) => {
                publication.channel_endpoint().register_publication(&publication);
                self.publications.push(publication);
            }
            SenderCmd::RemoveNetworkPublication(publication) => {
                self.publications.retain(|p| !Arc::ptr_eq(p, &publication));
                publication.channel_endpoint().unregister_publication(&publication);
                publication.sender_release();
            }
            SenderCmd::AddDestination {
                endpoint,
                destination,
            } => {
                endpoint.add_destination(destination);
            }
            SenderCmd::RemoveDestination {
                endpoint,
                destination,
            } => {
                endpoint.remove_destination(destination);
            }
        }
    }

    fn poll_control(&mut self, now_ns: i64, epoch_ms: i64) -> usize {
        let mut work_count = 0;
        for endpoint in &self.endpoints {
            work_count += endpoint.poll_control(
                &mut self.control_buf,
                &self.system_counters,
                now_ns,
                epoch_ms,
            );
        }
        work_count
    }

    fn do_send(&mut self, now_ns: i64) -> usize {
        let publication_count = self.publications.len();
        if publication_count == 0 {
            return 0;
        }

        // Rotate the starting publication for fairness under load.
        let start = self.round_robin_index % publication_count;
        self.round_robin_index = self.round_robin_index.wrapping_add(1);

        let mut bytes_sent = 0;
        for i in 0..publication_count {
            let publication = &self.publications[(start + i) % publication_count];
            bytes_sent += publication.send(now_ns);
        }

        if bytes_sent > 0 {
            self.system_counters
                .get(SystemCounterId::BytesSent)
                .add(bytes_sent as i64);
        }

        bytes_sent
    }
}

impl Agent for Sender {
    fn role_name(&self) -> &'static str {
        "driver-sender"
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
        let epoch_ms = self.clock.epoch_ms();

        work_count += self.poll_control(now_ns, epoch_ms);
        work_count += self.do_send(now_ns);

        work_count
    }

    fn on_close(&mut self) {
        for publication in self.publications.drain(..) {
            publication.sender_release();
        }
        self.endpoints.clear();
        log::debug!("[Sender] closed");
    }
}
