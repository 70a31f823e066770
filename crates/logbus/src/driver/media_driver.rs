// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Media driver assembly: the control file, the counters area, the three
//! agents, and the chosen threading mode.
//!
//! `DEDICATED` runs conductor, sender, and receiver on a thread each;
//! `SHARED_NETWORK` folds sender and receiver onto one network thread;
//! `SHARED` folds all three onto a single thread. Shutdown is
//! cooperative: each agent observes the stop flag on its next duty cycle
//! and runs its close hook.

use crate::concurrent::broadcast::BroadcastTransmitter;
use crate::concurrent::counters::{CountersManager, SystemCounterId, SystemCounters};
use crate::concurrent::errorlog::DistinctErrorLog;
use crate::concurrent::ringbuffer::ManyToOneRingBuffer;
use crate::concurrent::spsc::OneToOneQueue;
use crate::config::{ThreadingMode, CMD_QUEUE_CAPACITY};
use crate::driver::agent::{AgentRunner, CompositeAgent};
use crate::driver::client_proxy::ClientProxy;
use crate::driver::clock::DriverClock;
use crate::driver::cnc::CncFile;
use crate::driver::conductor::{ConductorDependencies, DriverConductor};
use crate::driver::context::DriverContext;
use crate::driver::proxies::{ConductorProxy, ReceiverProxy, SenderProxy};
use crate::driver::receiver::Receiver;
use crate::driver::sender::Sender;
use crate::error::Result;
use crate::logbuffer::raw_log::LogFactory;
use crossbeam::queue::ArrayQueue;
use std::path::Path;
use std::sync::Arc;

/// A running media driver.
pub struct MediaDriver {
    ctx: DriverContext,
    runners: Vec<AgentRunner>,
}

impl MediaDriver {
    /// Launch a driver with the given context.
    ///
    /// # Errors
    ///
    /// Fails when the driver directory, control file, sockets, or agent
    /// threads cannot be set up.
    pub fn launch(ctx: DriverContext) -> Result<Self> {
        let ctx = ctx.conclude()?;

        if ctx.dir_delete_on_start && ctx.dir.exists() {
            std::fs::remove_dir_all(&ctx.dir)?;
        }
        std::fs::create_dir_all(&ctx.dir)?;

        log::info!(
            "[MediaDriver] launching dir={} mode={:?}",
            ctx.dir.display(),
            ctx.threading_mode
        );

        let cnc = CncFile::create(
            &ctx.dir,
            ctx.to_driver_buffer_length,
            ctx.to_clients_buffer_length,
            ctx.counter_values_buffer_length,
            ctx.error_buffer_length,
            ctx.client_liveness_timeout_ns,
        )?;

        let to_driver_ring = ManyToOneRingBuffer::wrap(cnc.to_driver_buffer())?;
        let to_clients = BroadcastTransmitter::wrap(cnc.to_clients_buffer())?;
        let mut counters_manager =
            CountersManager::new(cnc.counter_metadata_buffer(), cnc.counter_values_buffer())?;
        let system_counters = Arc::new(SystemCounters::new(&mut counters_manager)?);
        let error_log = DistinctErrorLog::new(cnc.error_log_buffer());

        let clock = DriverClock::new();
        let log_factory = LogFactory::new(&ctx.dir, ctx.pre_touch_mapped_memory)?;

        let sender_queue = Arc::new(OneToOneQueue::with_capacity(CMD_QUEUE_CAPACITY));
        let receiver_queue = Arc::new(OneToOneQueue::with_capacity(CMD_QUEUE_CAPACITY));
        let conductor_queue = Arc::new(ArrayQueue::new(CMD_QUEUE_CAPACITY));

        let sender_proxy = SenderProxy::new(
            Arc::clone(&sender_queue),
            *system_counters.get(SystemCounterId::SenderProxyFails),
        );
        let receiver_proxy = ReceiverProxy::new(
            Arc::clone(&receiver_queue),
            *system_counters.get(SystemCounterId::ReceiverProxyFails),
        );
        let conductor_proxy = ConductorProxy::new(
            Arc::clone(&conductor_queue),
            *system_counters.get(SystemCounterId::ConductorProxyFails),
        );

        let conductor = DriverConductor::new(ConductorDependencies {
            ctx: ctx.clone(),
            clock,
            log_factory,
            counters_manager,
            system_counters: Arc::clone(&system_counters),
            to_driver_ring,
            client_proxy: ClientProxy::new(to_clients),
            sender_proxy,
            receiver_proxy,
            conductor_cmd_queue: Arc::clone(&conductor_queue),
            error_log,
            cnc_mapping: Some(cnc.mapped()),
        });

        let sender = Sender::new(sender_queue, Arc::clone(&system_counters), clock);
        let receiver = Receiver::new(
            receiver_queue,
            conductor_proxy,
            Arc::clone(&system_counters),
            clock,
        );

        let mut runners = Vec::new();
        match ctx.threading_mode {
            ThreadingMode::Dedicated => {
                runners.push(AgentRunner::start(
                    Box::new(conductor),
                    ctx.conductor_idle_strategy,
                )?);
                runners.push(AgentRunner::start(
                    Box::new(sender),
                    ctx.sender_idle_strategy,
                )?);
                runners.push(AgentRunner::start(
                    Box::new(receiver),
                    ctx.receiver_idle_strategy,
                )?);
            }
            ThreadingMode::SharedNetwork => {
                runners.push(AgentRunner::start(
                    Box::new(conductor),
                    ctx.conductor_idle_strategy,
                )?);
                runners.push(AgentRunner::start(
                    Box::new(CompositeAgent::new(
                        "driver-network",
                        vec![Box::new(sender), Box::new(receiver)],
                    )),
                    ctx.shared_idle_strategy,
                )?);
            }
            ThreadingMode::Shared => {
                runners.push(AgentRunner::start(
                    Box::new(CompositeAgent::new(
                        "driver-shared",
                        vec![Box::new(conductor), Box::new(sender), Box::new(receiver)],
                    )),
                    ctx.shared_idle_strategy,
                )?);
            }
        }

        Ok(Self { ctx, runners })
    }

    /// Driver directory (clients connect through its CnC file).
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.ctx.dir
    }

    /// Stop all agents and release the driver directory.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // I/O agents first: the conductor unmaps log files on close.
        for runner in self.runners.drain(..).rev() {
            runner.close();
        }

        if self.ctx.dir_delete_on_shutdown {
            if let Err(e) = std::fs::remove_dir_all(&self.ctx.dir) {
                log::warn!(
                    "[MediaDriver] failed to delete dir {}: {}",
                    self.ctx.dir.display(),
                    e
                );
            }
        }

        log::info!("[MediaDriver] closed dir={}", self.ctx.dir.display());
    }
}

impl Drop for MediaDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
