// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The driver conductor: single-threaded orchestrator of all driver
//! state.
//!
//! One duty cycle drains client commands from the to-driver ring,
//! consumes events posted by the Sender and Receiver, runs the timer
//! sweep over every managed resource, and refreshes per-stream tracking
//! (image rebuild windows, publisher limits).
//!
//! Failure policy: a failed command produces exactly one `ERROR` response
//! for its correlation id, a distinct-error-log record, and a bumped
//! error counter; the conductor never tears down over a client mistake.

use crate::concurrent::counters::{CountersManager, Position, SystemCounterId, SystemCounters};
use crate::concurrent::errorlog::DistinctErrorLog;
use crate::concurrent::mmap::MappedFile;
use crate::concurrent::ringbuffer::ManyToOneRingBuffer;
use crate::config::{COMMAND_DRAIN_LIMIT, NAK_MULTICAST_MAX_BACKOFF_NS, NAK_UNICAST_DELAY_NS,
    RETRANSMIT_UNICAST_DELAY_NS, RETRANSMIT_UNICAST_LINGER_NS};
use crate::driver::agent::Agent;
use crate::driver::client_proxy::ClientProxy;
use crate::driver::clock::DriverClock;
use crate::driver::commands::ClientCommand;
use crate::driver::congestion::StaticWindowCongestionControl;
use crate::driver::context::DriverContext;
use crate::driver::flow_control::{
    FlowControl, MaxMulticastFlowControl, TaggedMulticastFlowControl, UnicastFlowControl,
};
use crate::driver::image::{ImageParameters, PublicationImage};
use crate::driver::ipc_publication::IpcPublication;
use crate::driver::links::{
    DriverClient, PublicationLink, PublicationTarget, SubscriptionKind, SubscriptionLink,
};
use crate::driver::proxies::{ConductorCmd, ReceiverCmd, ReceiverProxy, SenderCmd, SenderProxy};
use crate::driver::publication::{NetworkPublication, PublicationParameters};
use crate::driver::receive_endpoint::ReceiveChannelEndpoint;
use crate::driver::retransmit::{RandomDelayGenerator, RetransmitHandler, StaticDelayGenerator};
use crate::driver::send_endpoint::SendChannelEndpoint;
use crate::driver::udp_channel::{PublicationParams, UdpChannel};
use crate::driver::uri::{self, ChannelUri};
use crate::driver::{ConductorAction, DriverManagedResource};
use crate::error::{DriverError, Result};
use crate::logbuffer::descriptor::{self, position_bits_to_shift};
use crate::logbuffer::raw_log::LogFactory;
use crate::protocol::data::DataHeader;
use crate::config::publication_term_window_length;
use crossbeam::queue::ArrayQueue;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

// Counter type ids recorded in the counters metadata.
pub const PUBLISHER_LIMIT_TYPE_ID: i32 = 1;
pub const SENDER_POSITION_TYPE_ID: i32 = 2;
pub const SENDER_LIMIT_TYPE_ID: i32 = 3;
pub const SUBSCRIBER_POSITION_TYPE_ID: i32 = 4;
pub const RECEIVER_HWM_TYPE_ID: i32 = 5;
pub const RECEIVER_POSITION_TYPE_ID: i32 = 6;
pub const SEND_CHANNEL_STATUS_TYPE_ID: i32 = 7;
pub const RECEIVE_CHANNEL_STATUS_TYPE_ID: i32 = 8;

struct ImageRecord {
    image: Arc<PublicationImage>,
    endpoint: Arc<ReceiveChannelEndpoint>,
}

/// Everything the conductor needs at construction.
pub struct ConductorDependencies {
    pub ctx: DriverContext,
    pub clock: DriverClock,
    pub log_factory: LogFactory,
    pub counters_manager: CountersManager,
    pub system_counters: Arc<SystemCounters>,
    pub to_driver_ring: ManyToOneRingBuffer,
    pub client_proxy: ClientProxy,
    pub sender_proxy: SenderProxy,
    pub receiver_proxy: ReceiverProxy,
    pub conductor_cmd_queue: Arc<ArrayQueue<ConductorCmd>>,
    pub error_log: DistinctErrorLog,
    /// Keeps the CnC mapping alive for the conductor's buffer views.
    pub cnc_mapping: Option<Arc<MappedFile>>,
}

/// Single-threaded orchestrator agent.
pub struct DriverConductor {
    ctx: DriverContext,
    clock: DriverClock,
    log_factory: LogFactory,
    counters_manager: CountersManager,
    system_counters: Arc<SystemCounters>,
    to_driver_ring: ManyToOneRingBuffer,
    client_proxy: ClientProxy,
    sender_proxy: SenderProxy,
    receiver_proxy: ReceiverProxy,
    conductor_cmd_queue: Arc<ArrayQueue<ConductorCmd>>,
    error_log: DistinctErrorLog,
    _cnc_mapping: Option<Arc<MappedFile>>,

    send_endpoints: HashMap<String, Arc<SendChannelEndpoint>>,
    receive_endpoints: HashMap<String, Arc<ReceiveChannelEndpoint>>,
    network_publications: Vec<Arc<NetworkPublication>>,
    ipc_publications: Vec<Arc<IpcPublication>>,
    images: Vec<ImageRecord>,
    publication_links: Vec<PublicationLink>,
    subscription_links: Vec<SubscriptionLink>,
    clients: Vec<DriverClient>,

    next_session_id: i32,
    time_of_last_timer_check_ns: i64,
    time_of_last_to_driver_position_change_ns: i64,
    last_consumer_command_position: i64,
}

impl DriverConductor {
    #[must_use]
    pub fn new(deps: ConductorDependencies) -> Self {
        let now_ns = deps.clock.nano_time() as i64;
        let last_consumer_command_position = deps.to_driver_ring.consumer_position();

        Self {
            ctx: deps.ctx,
            clock: deps.clock,
            log_factory: deps.log_factory,
            counters_manager: deps.counters_manager,
            system_counters: deps.system_counters,
            to_driver_ring: deps.to_driver_ring,
            client_proxy: deps.client_proxy,
            sender_proxy: deps.sender_proxy,
            receiver_proxy: deps.receiver_proxy,
            conductor_cmd_queue: deps.conductor_cmd_queue,
            error_log: deps.error_log,
            _cnc_mapping: deps.cnc_mapping,
            send_endpoints: HashMap::new(),
            receive_endpoints: HashMap::new(),
            network_publications: Vec::new(),
            ipc_publications: Vec::new(),
            images: Vec::new(),
            publication_links: Vec::new(),
            subscription_links: Vec::new(),
            clients: Vec::new(),
            next_session_id: fastrand::i32(..),
            time_of_last_timer_check_ns: now_ns,
            time_of_last_to_driver_position_change_ns: now_ns,
            last_consumer_command_position,
        }
    }

    // =================================================================
    // command handling
    // =================================================================

    fn on_client_command(&mut self, cmd: ClientCommand) {
        let (correlation_id, result) = match cmd {
            ClientCommand::AddPublication {
                client_id,
                correlation_id,
                stream_id,
                is_exclusive,
                channel,
            } => (
                correlation_id,
                self.on_add_publication(client_id, correlation_id, stream_id, &channel, is_exclusive),
            ),
            ClientCommand::RemovePublication {
                correlation_id,
                registration_id,
                ..
            } => (
                correlation_id,
                self.on_remove_publication(registration_id, correlation_id),
            ),
            ClientCommand::AddSubscription {
                client_id,
                correlation_id,
                stream_id,
                channel,
            } => (
                correlation_id,
                self.on_add_subscription(client_id, correlation_id, stream_id, &channel),
            ),
            ClientCommand::RemoveSubscription {
                correlation_id,
                registration_id,
                ..
            } => (
                correlation_id,
                self.on_remove_subscription(registration_id, correlation_id),
            ),
            ClientCommand::ClientKeepalive { client_id } => {
                self.on_client_keepalive(client_id);
                return;
            }
            ClientCommand::AddDestination {
                correlation_id,
                registration_id,
                channel,
                ..
            } => (
                correlation_id,
                self.on_add_destination(registration_id, &channel, correlation_id),
            ),
            ClientCommand::RemoveDestination {
                correlation_id,
                registration_id,
                channel,
                ..
            } => (
                correlation_id,
                self.on_remove_destination(registration_id, &channel, correlation_id),
            ),
        };

        if let Err(error) = result {
            self.on_command_error(correlation_id, &error);
        }
    }

    fn on_command_error(&mut self, correlation_id: i64, error: &DriverError) {
        let message = error.to_string();
        log::warn!(
            "[DriverConductor] command failed correlation={}: {}",
            correlation_id,
            message
        );
        self.system_counters.get(SystemCounterId::Errors).increment();
        self.error_log
            .record(error.code() as i32, &message, self.clock.epoch_ms());
        self.client_proxy
            .on_error(correlation_id, error.code(), &message);
    }

    fn on_add_publication(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: &str,
        is_exclusive: bool,
    ) -> Result<()> {
        let channel_uri = ChannelUri::parse(channel)?;
        if channel_uri.is_ipc() {
            self.on_add_ipc_publication(client_id, correlation_id, stream_id, channel, is_exclusive)
        } else {
            self.on_add_network_publication(
                client_id,
                correlation_id,
                stream_id,
                channel,
                is_exclusive,
            )
        }
    }

    fn on_add_network_publication(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: &str,
        is_exclusive: bool,
    ) -> Result<()> {
        let udp_channel = UdpChannel::parse(channel)?;
        let params = PublicationParams::from_uri(
            udp_channel.uri(),
            self.ctx.term_buffer_length,
            self.ctx.mtu_length,
        )?;

        let channel_endpoint = self.get_or_create_send_endpoint(&udp_channel)?;

        let existing = if is_exclusive {
            None
        } else {
            self.network_publications
                .iter()
                .find(|p| {
                    p.stream_id() == stream_id
                        && Arc::ptr_eq(p.channel_endpoint(), &channel_endpoint)
                        && p.is_accepting_subscriptions()
                        && !p.is_exclusive()
                })
                .cloned()
        };

        let publication = match existing {
            Some(publication) => {
                confirm_match(&params, &publication)?;
                publication
            }
            None => self.new_network_publication(
                correlation_id,
                stream_id,
                channel,
                &udp_channel,
                channel_endpoint,
                &params,
                is_exclusive,
            )?,
        };

        let client_flag = self.get_or_add_client(client_id).timed_out_flag();
        self.publication_links.push(PublicationLink::new(
            correlation_id,
            client_flag,
            PublicationTarget::Network(Arc::clone(&publication)),
        ));

        self.client_proxy.on_publication_ready(
            correlation_id,
            publication.registration_id(),
            publication.session_id(),
            stream_id,
            publication.publisher_limit_id(),
            publication.channel_endpoint().status_counter_id(),
            is_exclusive,
            publication.log_file_name(),
        );

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn new_network_publication(
        &mut self,
        registration_id: i64,
        stream_id: i32,
        channel: &str,
        udp_channel: &UdpChannel,
        channel_endpoint: Arc<SendChannelEndpoint>,
        params: &PublicationParams,
        is_exclusive: bool,
    ) -> Result<Arc<NetworkPublication>> {
        let session_id = match params.session_id {
            Some(session_id) => session_id,
            None => self.next_session_id(stream_id, &channel_endpoint),
        };
        let initial_term_id = fastrand::i32(..);

        let label_suffix = format!("{registration_id} {session_id} {stream_id} {channel}");
        let publisher_limit = self.allocate_position(
            PUBLISHER_LIMIT_TYPE_ID,
            registration_id,
            &format!("pub-lmt: {label_suffix}"),
        )?;
        let sender_position = self.allocate_position(
            SENDER_POSITION_TYPE_ID,
            registration_id,
            &format!("snd-pos: {label_suffix}"),
        )?;
        let sender_limit = self.allocate_position(
            SENDER_LIMIT_TYPE_ID,
            registration_id,
            &format!("snd-lmt: {label_suffix}"),
        )?;

        let raw_log = self.log_factory.new_network_publication(
            udp_channel.canonical_form(),
            session_id,
            stream_id,
            registration_id,
            params.term_length,
        )?;
        descriptor::initialize(
            &raw_log.meta_data(),
            initial_term_id,
            params.term_length,
            params.mtu_length,
            registration_id,
            &DataHeader::default_header(session_id, stream_id, initial_term_id),
        );

        let is_multicast_flow = udp_channel.is_multicast() || udp_channel.has_explicit_control();
        let flow_control: Box<dyn FlowControl> = if is_multicast_flow {
            match udp_channel.uri().get_i64(uri::TAGS_PARAM_NAME)? {
                Some(tag) => Box::new(TaggedMulticastFlowControl::new(tag)),
                None => Box::new(MaxMulticastFlowControl),
            }
        } else {
            Box::new(UnicastFlowControl)
        };

        let retransmit_handler = if udp_channel.is_multicast() {
            RetransmitHandler::new(
                Box::new(RandomDelayGenerator::new(NAK_MULTICAST_MAX_BACKOFF_NS)),
                Box::new(StaticDelayGenerator::new(RETRANSMIT_UNICAST_LINGER_NS)),
            )
        } else {
            RetransmitHandler::new(
                Box::new(StaticDelayGenerator::new(RETRANSMIT_UNICAST_DELAY_NS)),
                Box::new(StaticDelayGenerator::new(RETRANSMIT_UNICAST_LINGER_NS)),
            )
        };

        let publication_params = PublicationParameters {
            registration_id,
            session_id,
            stream_id,
            initial_term_id,
            mtu_length: params.mtu_length,
            term_window_length: publication_term_window_length(
                params.term_length,
                self.ctx.publication_term_window_length,
            ),
            unblock_timeout_ns: self.ctx.publication_unblock_timeout_ns as i64,
            connection_timeout_ms: self.ctx.publication_connection_timeout_ms as i64,
            linger_timeout_ns: self.ctx.publication_linger_timeout_ns as i64,
            setup_timeout_ns: self.ctx.publication_setup_timeout_ns as i64,
            heartbeat_timeout_ns: self.ctx.publication_heartbeat_timeout_ns as i64,
            is_exclusive,
        };

        let publication = Arc::new(NetworkPublication::new(
            publication_params,
            raw_log,
            publisher_limit,
            sender_position,
            sender_limit,
            Arc::clone(&channel_endpoint),
            flow_control,
            retransmit_handler,
            &self.system_counters,
            self.clock,
        ));

        channel_endpoint.inc_ref();
        self.network_publications.push(Arc::clone(&publication));
        self.sender_proxy
            .offer(SenderCmd::NewNetworkPublication(Arc::clone(&publication)));
        self.link_spies(&publication);

        log::info!(
            "[DriverConductor] new network publication registration={} session={} stream={} channel={}",
            registration_id,
            session_id,
            stream_id,
            channel
        );

        Ok(publication)
    }

    fn on_add_ipc_publication(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: &str,
        is_exclusive: bool,
    ) -> Result<()> {
        let channel_uri = ChannelUri::parse(channel)?;
        let params = PublicationParams::from_uri(
            &channel_uri,
            self.ctx.ipc_term_buffer_length,
            self.ctx.mtu_length,
        )?;

        let existing = if is_exclusive {
            None
        } else {
            self.ipc_publications
                .iter()
                .find(|p| {
                    p.stream_id() == stream_id
                        && p.is_accepting_subscriptions()
                        && !p.is_exclusive()
                })
                .cloned()
        };

        let publication = match existing {
            Some(publication) => publication,
            None => self.new_ipc_publication(correlation_id, stream_id, &params, is_exclusive)?,
        };

        let client_flag = self.get_or_add_client(client_id).timed_out_flag();
        self.publication_links.push(PublicationLink::new(
            correlation_id,
            client_flag,
            PublicationTarget::Ipc(Arc::clone(&publication)),
        ));

        self.client_proxy.on_publication_ready(
            correlation_id,
            publication.registration_id(),
            publication.session_id(),
            stream_id,
            publication.publisher_limit_id(),
            0,
            is_exclusive,
            publication.log_file_name(),
        );

        self.link_ipc_subscriptions(&publication);
        Ok(())
    }

    fn new_ipc_publication(
        &mut self,
        registration_id: i64,
        stream_id: i32,
        params: &PublicationParams,
        is_exclusive: bool,
    ) -> Result<Arc<IpcPublication>> {
        let session_id = match params.session_id {
            Some(session_id) => session_id,
            None => {
                let id = self.next_session_id;
                self.next_session_id = self.next_session_id.wrapping_add(1);
                id
            }
        };
        let initial_term_id = fastrand::i32(..);

        let publisher_limit = self.allocate_position(
            PUBLISHER_LIMIT_TYPE_ID,
            registration_id,
            &format!("pub-lmt: {registration_id} {session_id} {stream_id} {}", uri::IPC_CHANNEL),
        )?;

        let raw_log = self.log_factory.new_ipc_publication(
            session_id,
            stream_id,
            registration_id,
            params.term_length,
        )?;
        descriptor::initialize(
            &raw_log.meta_data(),
            initial_term_id,
            params.term_length,
            params.mtu_length,
            registration_id,
            &DataHeader::default_header(session_id, stream_id, initial_term_id),
        );

        let publication = Arc::new(IpcPublication::new(
            registration_id,
            session_id,
            stream_id,
            initial_term_id,
            publication_term_window_length(
                params.term_length,
                self.ctx.publication_term_window_length,
            ),
            self.ctx.publication_unblock_timeout_ns as i64,
            self.ctx.publication_linger_timeout_ns as i64,
            is_exclusive,
            raw_log,
            publisher_limit,
            &self.system_counters,
            self.clock,
        ));

        self.ipc_publications.push(Arc::clone(&publication));
        Ok(publication)
    }

    fn on_remove_publication(&mut self, registration_id: i64, correlation_id: i64) -> Result<()> {
        let index = self
            .publication_links
            .iter()
            .position(|link| link.registration_id() == registration_id)
            .ok_or(DriverError::UnknownPublication(registration_id))?;

        let link = self.publication_links.swap_remove(index);
        link.close();

        self.client_proxy.operation_succeeded(correlation_id);
        Ok(())
    }

    fn on_add_subscription(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: &str,
    ) -> Result<()> {
        let channel_uri = ChannelUri::parse(channel)?;

        if channel_uri.is_spy() {
            self.on_add_spy_subscription(client_id, correlation_id, stream_id, channel)
        } else if channel_uri.is_ipc() {
            self.on_add_ipc_subscription(client_id, correlation_id, stream_id, channel)
        } else {
            self.on_add_network_subscription(client_id, correlation_id, stream_id, channel)
        }
    }

    fn on_add_network_subscription(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: &str,
    ) -> Result<()> {
        let udp_channel = UdpChannel::parse(channel)?;
        let is_reliable =
            udp_channel.uri().get_or_default(uri::RELIABLE_STREAM_PARAM_NAME, "true") != "false";

        self.check_for_clashing_subscription(&udp_channel, stream_id, is_reliable)?;

        let endpoint = self.get_or_create_receive_endpoint(&udp_channel)?;
        if endpoint.inc_ref_to_stream(stream_id) == 1 {
            self.receiver_proxy.offer(ReceiverCmd::AddSubscription {
                endpoint: Arc::clone(&endpoint),
                stream_id,
            });
        }

        let client_flag = self.get_or_add_client(client_id).timed_out_flag();
        let mut link = SubscriptionLink::new(
            correlation_id,
            stream_id,
            channel.to_string(),
            SubscriptionKind::Network {
                endpoint: Arc::clone(&endpoint),
                is_reliable,
            },
            client_flag,
        );

        self.client_proxy
            .on_subscription_ready(correlation_id, endpoint.status_counter_id());

        // Link any images already flowing on this endpoint and stream.
        for record in &self.images {
            if Arc::ptr_eq(&record.endpoint, &endpoint)
                && record.image.stream_id() == stream_id
                && record.image.is_accepting_subscriptions()
            {
                let image = &record.image;
                let join_position = image.rebuild_position();
                let position = self.counters_manager.allocate(
                    SUBSCRIBER_POSITION_TYPE_ID,
                    correlation_id,
                    &format!(
                        "sub-pos: {correlation_id} {} {stream_id} {channel}",
                        image.session_id()
                    ),
                )?;
                let position = self.counters_manager.new_position(position);
                position.set_ordered(join_position);

                image.add_subscriber(position);
                link.link(image.correlation_id(), position);

                self.client_proxy.on_available_image(
                    image.correlation_id(),
                    image.session_id(),
                    stream_id,
                    correlation_id,
                    position.id(),
                    image.log_file_name(),
                    &image.source_identity(),
                );
            }
        }

        self.subscription_links.push(link);
        Ok(())
    }

    fn on_add_ipc_subscription(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: &str,
    ) -> Result<()> {
        let client_flag = self.get_or_add_client(client_id).timed_out_flag();
        let mut link = SubscriptionLink::new(
            correlation_id,
            stream_id,
            channel.to_string(),
            SubscriptionKind::Ipc,
            client_flag,
        );

        self.client_proxy.on_subscription_ready(correlation_id, 0);

        let publications: Vec<Arc<IpcPublication>> = self
            .ipc_publications
            .iter()
            .filter(|p| p.stream_id() == stream_id && p.is_accepting_subscriptions())
            .cloned()
            .collect();

        for publication in publications {
            let join_position = publication.join_position();
            let counter_id = self.counters_manager.allocate(
                SUBSCRIBER_POSITION_TYPE_ID,
                correlation_id,
                &format!(
                    "sub-pos: {correlation_id} {} {stream_id} {channel}",
                    publication.session_id()
                ),
            )?;
            let position = self.counters_manager.new_position(counter_id);
            position.set_ordered(join_position);

            publication.add_subscriber(position);
            link.link(publication.registration_id(), position);

            self.client_proxy.on_available_image(
                publication.registration_id(),
                publication.session_id(),
                stream_id,
                correlation_id,
                position.id(),
                publication.log_file_name(),
                uri::IPC_CHANNEL,
            );
        }

        self.subscription_links.push(link);
        Ok(())
    }

    fn on_add_spy_subscription(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: &str,
    ) -> Result<()> {
        let udp_channel = UdpChannel::parse(channel)?;
        let canonical_form = udp_channel.canonical_form().to_string();

        let client_flag = self.get_or_add_client(client_id).timed_out_flag();
        let mut link = SubscriptionLink::new(
            correlation_id,
            stream_id,
            channel.to_string(),
            SubscriptionKind::Spy {
                canonical_form: canonical_form.clone(),
            },
            client_flag,
        );

        self.client_proxy.on_subscription_ready(correlation_id, 0);

        let publications: Vec<Arc<NetworkPublication>> = self
            .network_publications
            .iter()
            .filter(|p| {
                p.stream_id() == stream_id
                    && p.channel_endpoint().canonical_form() == canonical_form
                    && p.is_accepting_subscriptions()
            })
            .cloned()
            .collect();

        for publication in publications {
            let join_position = publication.consumer_position();
            let counter_id = self.counters_manager.allocate(
                SUBSCRIBER_POSITION_TYPE_ID,
                correlation_id,
                &format!(
                    "sub-pos: {correlation_id} {} {stream_id} {channel}",
                    publication.session_id()
                ),
            )?;
            let position = self.counters_manager.new_position(counter_id);
            position.set_ordered(join_position);

            publication.add_spy_position(position);
            link.link(publication.registration_id(), position);

            self.client_proxy.on_available_image(
                publication.registration_id(),
                publication.session_id(),
                stream_id,
                correlation_id,
                position.id(),
                publication.log_file_name(),
                uri::IPC_CHANNEL,
            );
        }

        self.subscription_links.push(link);
        Ok(())
    }

    fn on_remove_subscription(&mut self, registration_id: i64, correlation_id: i64) -> Result<()> {
        let index = self
            .subscription_links
            .iter()
            .position(|link| link.registration_id() == registration_id)
            .ok_or(DriverError::UnknownSubscription(registration_id))?;

        let link = self.subscription_links.swap_remove(index);
        self.close_subscription_link(link);

        self.client_proxy.operation_succeeded(correlation_id);
        Ok(())
    }

    fn on_client_keepalive(&mut self, client_id: i64) {
        self.system_counters
            .get(SystemCounterId::ClientKeepAlives)
            .increment();

        let now_ns = self.clock.nano_time() as i64;
        if let Some(client) = self.clients.iter().find(|c| c.client_id() == client_id) {
            client.on_keepalive(now_ns);
        }
    }

    fn on_add_destination(
        &mut self,
        registration_id: i64,
        destination_channel: &str,
        correlation_id: i64,
    ) -> Result<()> {
        let (endpoint, destination) =
            self.resolve_destination(registration_id, destination_channel)?;
        self.sender_proxy.offer(SenderCmd::AddDestination {
            endpoint,
            destination,
        });
        self.client_proxy.operation_succeeded(correlation_id);
        Ok(())
    }

    fn on_remove_destination(
        &mut self,
        registration_id: i64,
        destination_channel: &str,
        correlation_id: i64,
    ) -> Result<()> {
        let (endpoint, destination) =
            self.resolve_destination(registration_id, destination_channel)?;
        self.sender_proxy.offer(SenderCmd::RemoveDestination {
            endpoint,
            destination,
        });
        self.client_proxy.operation_succeeded(correlation_id);
        Ok(())
    }

    fn resolve_destination(
        &mut self,
        registration_id: i64,
        destination_channel: &str,
    ) -> Result<(Arc<SendChannelEndpoint>, SocketAddr)> {
        let publication = self
            .network_publications
            .iter()
            .find(|p| p.registration_id() == registration_id)
            .ok_or(DriverError::UnknownPublication(registration_id))?;

        let endpoint = Arc::clone(publication.channel_endpoint());
        endpoint.validate_allows_manual_control()?;

        let destination_channel = UdpChannel::parse(destination_channel)?;
        let destination = destination_channel.endpoint().ok_or_else(|| {
            DriverError::InvalidChannel(format!(
                "destination has no endpoint: {}",
                destination_channel.original_uri()
            ))
        })?;

        Ok((endpoint, destination))
    }

    /// Receiver saw a SETUP: create the image if any subscription wants it.
    fn on_create_publication_image(
        &mut self,
        session_id: i32,
        stream_id: i32,
        initial_term_id: i32,
        active_term_id: i32,
        term_offset: i32,
        term_length: i32,
        mtu_length: i32,
        control_address: SocketAddr,
        source_address: SocketAddr,
        endpoint: Arc<ReceiveChannelEndpoint>,
    ) -> Result<()> {
        descriptor::check_term_length(term_length as usize)?;

        let has_interest = self.subscription_links.iter().any(|link| {
            link.matches_network(&endpoint, stream_id)
        });
        if !has_interest {
            return Ok(());
        }

        let correlation_id = self.to_driver_ring.next_correlation_id();
        let bits = position_bits_to_shift(term_length as usize);
        let join_position =
            descriptor::compute_position(active_term_id, term_offset, bits, initial_term_id);

        let raw_log = self.log_factory.new_image(
            endpoint.canonical_form(),
            session_id,
            stream_id,
            correlation_id,
            term_length as usize,
        )?;
        descriptor::initialize(
            &raw_log.meta_data(),
            initial_term_id,
            term_length as usize,
            mtu_length as usize,
            correlation_id,
            &DataHeader::default_header(session_id, stream_id, initial_term_id),
        );

        let hwm_id = self.counters_manager.allocate(
            RECEIVER_HWM_TYPE_ID,
            correlation_id,
            &format!("rcv-hwm: {correlation_id} {session_id} {stream_id}"),
        )?;
        let rebuild_id = self.counters_manager.allocate(
            RECEIVER_POSITION_TYPE_ID,
            correlation_id,
            &format!("rcv-pos: {correlation_id} {session_id} {stream_id}"),
        )?;
        let hwm_position = self.counters_manager.new_position(hwm_id);
        let rebuild_position = self.counters_manager.new_position(rebuild_id);

        // Subscriber positions for every matching link, plus the ready
        // events to broadcast once the image exists.
        let mut subscriber_positions = Vec::new();
        let mut availability = Vec::new();
        let mut is_reliable = true;

        for link in &mut self.subscription_links {
            if !link.matches_network(&endpoint, stream_id) {
                continue;
            }
            is_reliable = link.is_reliable();

            let counter_id = self.counters_manager.allocate(
                SUBSCRIBER_POSITION_TYPE_ID,
                link.registration_id(),
                &format!(
                    "sub-pos: {} {session_id} {stream_id} {}",
                    link.registration_id(),
                    link.channel()
                ),
            )?;
            let position = self.counters_manager.new_position(counter_id);
            position.set_ordered(join_position);

            subscriber_positions.push(position);
            link.link(correlation_id, position);
            availability.push((link.registration_id(), position.id()));
        }

        let params = ImageParameters {
            correlation_id,
            session_id,
            stream_id,
            initial_term_id,
            mtu_length: mtu_length as usize,
            liveness_timeout_ns: self.ctx.image_liveness_timeout_ns as i64,
            status_message_timeout_ns: self.ctx.status_message_timeout_ns as i64,
            is_reliable,
        };

        let nak_delay: Box<dyn crate::driver::retransmit::FeedbackDelayGenerator> =
            if endpoint.udp_channel().is_multicast() {
                Box::new(RandomDelayGenerator::new(NAK_MULTICAST_MAX_BACKOFF_NS))
            } else {
                Box::new(StaticDelayGenerator::new(NAK_UNICAST_DELAY_NS))
            };

        let log_file_name = raw_log.file_name();
        let image = Arc::new(PublicationImage::new(
            params,
            raw_log,
            join_position,
            hwm_position,
            rebuild_position,
            subscriber_positions,
            Box::new(StaticWindowCongestionControl::new(
                self.ctx.initial_window_length,
                term_length as usize,
            )),
            nak_delay,
            control_address,
            source_address,
            endpoint.receiver_id(),
            &self.system_counters,
            self.clock.nano_time() as i64,
        ));

        self.images.push(ImageRecord {
            image: Arc::clone(&image),
            endpoint: Arc::clone(&endpoint),
        });
        self.receiver_proxy.offer(ReceiverCmd::NewPublicationImage {
            endpoint,
            image: Arc::clone(&image),
        });

        let source_identity = image.source_identity();
        for (subscriber_registration_id, counter_id) in availability {
            self.client_proxy.on_available_image(
                correlation_id,
                session_id,
                stream_id,
                subscriber_registration_id,
                counter_id,
                &log_file_name,
                &source_identity,
            );
        }

        log::debug!(
            "[DriverConductor] new image correlation={} session={} stream={} source={}",
            correlation_id,
            session_id,
            stream_id,
            source_identity
        );

        Ok(())
    }

    // =================================================================
    // helpers
    // =================================================================

    fn allocate_position(&mut self, type_id: i32, key: i64, label: &str) -> Result<Position> {
        let id = self.counters_manager.allocate(type_id, key, label)?;
        Ok(self.counters_manager.new_position(id))
    }

    fn get_or_create_send_endpoint(
        &mut self,
        udp_channel: &UdpChannel,
    ) -> Result<Arc<SendChannelEndpoint>> {
        if let Some(endpoint) = self.send_endpoints.get(udp_channel.canonical_form()) {
            return Ok(Arc::clone(endpoint));
        }

        let status_id = self.counters_manager.allocate(
            SEND_CHANNEL_STATUS_TYPE_ID,
            0,
            &format!("snd-channel: {}", udp_channel.original_uri()),
        )?;
        let status = self.counters_manager.new_atomic_counter(status_id);

        let endpoint = Arc::new(SendChannelEndpoint::new(udp_channel.clone(), status)?);
        self.send_endpoints
            .insert(udp_channel.canonical_form().to_string(), Arc::clone(&endpoint));
        self.sender_proxy
            .offer(SenderCmd::RegisterSendChannelEndpoint(Arc::clone(&endpoint)));

        Ok(endpoint)
    }

    fn get_or_create_receive_endpoint(
        &mut self,
        udp_channel: &UdpChannel,
    ) -> Result<Arc<ReceiveChannelEndpoint>> {
        if let Some(endpoint) = self.receive_endpoints.get(udp_channel.canonical_form()) {
            return Ok(Arc::clone(endpoint));
        }

        let status_id = self.counters_manager.allocate(
            RECEIVE_CHANNEL_STATUS_TYPE_ID,
            0,
            &format!("rcv-channel: {}", udp_channel.original_uri()),
        )?;
        let status = self.counters_manager.new_atomic_counter(status_id);

        let endpoint = Arc::new(ReceiveChannelEndpoint::new(udp_channel.clone(), status)?);
        self.receive_endpoints
            .insert(udp_channel.canonical_form().to_string(), Arc::clone(&endpoint));
        self.receiver_proxy
            .offer(ReceiverCmd::RegisterReceiveChannelEndpoint(Arc::clone(&endpoint)));

        Ok(endpoint)
    }

    fn check_for_clashing_subscription(
        &self,
        udp_channel: &UdpChannel,
        stream_id: i32,
        is_reliable: bool,
    ) -> Result<()> {
        if let Some(endpoint) = self.receive_endpoints.get(udp_channel.canonical_form()) {
            for link in &self.subscription_links {
                if link.matches_network(endpoint, stream_id) && link.is_reliable() != is_reliable {
                    return Err(DriverError::ClashingState(format!(
                        "Option conflicts with existing subscriptions: reliable={is_reliable}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn get_or_add_client(&mut self, client_id: i64) -> &DriverClient {
        let now_ns = self.clock.nano_time() as i64;
        if let Some(index) = self.clients.iter().position(|c| c.client_id() == client_id) {
            return &self.clients[index];
        }

        self.clients.push(DriverClient::new(
            client_id,
            self.ctx.client_liveness_timeout_ns as i64,
            now_ns,
        ));
        self.clients.last().expect("just pushed")
    }

    fn next_session_id(&mut self, stream_id: i32, endpoint: &Arc<SendChannelEndpoint>) -> i32 {
        loop {
            let candidate = self.next_session_id;
            self.next_session_id = self.next_session_id.wrapping_add(1);

            let clashes = self.network_publications.iter().any(|p| {
                p.session_id() == candidate
                    && p.stream_id() == stream_id
                    && Arc::ptr_eq(p.channel_endpoint(), endpoint)
            });
            if !clashes {
                return candidate;
            }
        }
    }

    fn link_spies(&mut self, publication: &Arc<NetworkPublication>) {
        let canonical = publication.channel_endpoint().canonical_form().to_string();
        let stream_id = publication.stream_id();

        for index in 0..self.subscription_links.len() {
            if !self.subscription_links[index].matches_spy(&canonical, stream_id)
                || self.subscription_links[index].is_linked(publication.registration_id())
            {
                continue;
            }

            let join_position = publication.consumer_position();
            let registration_id = self.subscription_links[index].registration_id();
            let channel = self.subscription_links[index].channel().to_string();

            let counter_id = match self.counters_manager.allocate(
                SUBSCRIBER_POSITION_TYPE_ID,
                registration_id,
                &format!(
                    "sub-pos: {registration_id} {} {stream_id} {channel}",
                    publication.session_id()
                ),
            ) {
                Ok(id) => id,
                Err(e) => {
                    log::error!("[DriverConductor] spy position allocation failed: {}", e);
                    continue;
                }
            };
            let position = self.counters_manager.new_position(counter_id);
            position.set_ordered(join_position);

            publication.add_spy_position(position);
            self.subscription_links[index].link(publication.registration_id(), position);

            self.client_proxy.on_available_image(
                publication.registration_id(),
                publication.session_id(),
                stream_id,
                registration_id,
                position.id(),
                publication.log_file_name(),
                uri::IPC_CHANNEL,
            );
        }
    }

    fn link_ipc_subscriptions(&mut self, publication: &Arc<IpcPublication>) {
        let stream_id = publication.stream_id();

        for index in 0..self.subscription_links.len() {
            if !self.subscription_links[index].matches_ipc(stream_id)
                || self.subscription_links[index].is_linked(publication.registration_id())
            {
                continue;
            }

            let join_position = publication.join_position();
            let registration_id = self.subscription_links[index].registration_id();
            let channel = self.subscription_links[index].channel().to_string();

            let counter_id = match self.counters_manager.allocate(
                SUBSCRIBER_POSITION_TYPE_ID,
                registration_id,
                &format!(
                    "sub-pos: {registration_id} {} {stream_id} {channel}",
                    publication.session_id()
                ),
            ) {
                Ok(id) => id,
                Err(e) => {
                    log::error!("[DriverConductor] ipc position allocation failed: {}", e);
                    continue;
                }
            };
            let position = self.counters_manager.new_position(counter_id);
            position.set_ordered(join_position);

            publication.add_subscriber(position);
            self.subscription_links[index].link(publication.registration_id(), position);

            self.client_proxy.on_available_image(
                publication.registration_id(),
                publication.session_id(),
                stream_id,
                registration_id,
                position.id(),
                publication.log_file_name(),
                uri::IPC_CHANNEL,
            );
        }
    }

    fn close_subscription_link(&mut self, mut link: SubscriptionLink) {
        for linked in link.take_positions() {
            let counter_id = linked.position.id();
            for record in &self.images {
                record.image.remove_subscriber(counter_id);
            }
            for publication in &self.ipc_publications {
                publication.remove_subscriber(counter_id);
            }
            for publication in &self.network_publications {
                publication.remove_spy_position(counter_id);
            }
            self.counters_manager.free(counter_id);
        }

        if let SubscriptionKind::Network { endpoint, .. } = link.kind() {
            let endpoint = Arc::clone(endpoint);
            if endpoint.dec_ref_to_stream(link.stream_id()) == 0 {
                self.receiver_proxy.offer(ReceiverCmd::RemoveSubscription {
                    endpoint: Arc::clone(&endpoint),
                    stream_id: link.stream_id(),
                });
            }

            if endpoint.should_be_closed() {
                endpoint.indicate_closed();
                self.receive_endpoints.remove(endpoint.canonical_form());
                self.counters_manager.free(endpoint.status_counter_id());
                self.receiver_proxy
                    .offer(ReceiverCmd::CloseReceiveChannelEndpoint(endpoint));
            }
        }
    }

    // =================================================================
    // timers
    // =================================================================

    fn process_timers(&mut self, now_ns: i64) -> usize {
        if now_ns <= self.time_of_last_timer_check_ns + self.ctx.timer_interval_ns as i64 {
            return 0;
        }

        self.heartbeat_and_check_timers(now_ns);
        self.check_for_blocked_to_driver_commands(now_ns);
        self.time_of_last_timer_check_ns = now_ns;
        1
    }

    fn heartbeat_and_check_timers(&mut self, now_ns: i64) {
        let now_ms = self.clock.epoch_ms();
        self.to_driver_ring.consumer_heartbeat_time(now_ms);

        let mut actions = Vec::new();

        // Clients first: their timeout flags drive the link sweeps below.
        sweep(&mut self.clients, now_ns, now_ms, &mut actions, |_| {});

        let mut closed_publication_links = Vec::new();
        sweep(
            &mut self.publication_links,
            now_ns,
            now_ms,
            &mut actions,
            |link| closed_publication_links.push(link),
        );
        for link in closed_publication_links {
            link.close();
        }

        let mut removed_subscriptions = Vec::new();
        sweep(
            &mut self.subscription_links,
            now_ns,
            now_ms,
            &mut actions,
            |link| removed_subscriptions.push(link),
        );
        for link in removed_subscriptions {
            self.close_subscription_link(link);
        }

        let mut removed_publications = Vec::new();
        sweep_arc(
            &mut self.network_publications,
            now_ns,
            now_ms,
            &mut actions,
            |publication| removed_publications.push(publication),
        );
        for publication in removed_publications {
            self.counters_manager.free(publication.publisher_limit_id());
            self.counters_manager.free(publication.sender_position_id());
            self.counters_manager.free(publication.sender_limit_id());
            publication.delete_log();
        }

        let mut removed_ipc = Vec::new();
        sweep_arc(
            &mut self.ipc_publications,
            now_ns,
            now_ms,
            &mut actions,
            |publication| removed_ipc.push(publication),
        );
        for publication in removed_ipc {
            self.counters_manager.free(publication.publisher_limit_id());
            publication.delete_log();
        }

        let mut removed_images = Vec::new();
        {
            let mut index = 0;
            while index < self.images.len() {
                self.images[index]
                    .image
                    .on_time_event(now_ns, now_ms, &mut actions);
                if self.images[index].image.has_reached_end_of_life() {
                    removed_images.push(self.images.swap_remove(index));
                } else {
                    index += 1;
                }
            }
        }
        for record in removed_images {
            // Release the dispatcher cool-down so the session can be set
            // up afresh once stale datagrams have drained.
            self.receiver_proxy.offer(ReceiverCmd::RemoveCoolDown {
                endpoint: Arc::clone(&record.endpoint),
                session_id: record.image.session_id(),
                stream_id: record.image.stream_id(),
            });
            self.counters_manager.free(record.image.hwm_position_id());
            self.counters_manager
                .free(record.image.rebuild_position_id());
            record.image.delete_log();
        }

        for action in actions {
            self.apply_action(action);
        }
    }

    fn apply_action(&mut self, action: ConductorAction) {
        match action {
            ConductorAction::CleanupSpies { registration_id } => {
                self.cleanup_spies(registration_id);
            }
            ConductorAction::CleanupPublication { registration_id } => {
                self.cleanup_publication(registration_id);
            }
            ConductorAction::ImageToLinger { correlation_id } => {
                self.notify_unavailable_image(correlation_id);
            }
            ConductorAction::CleanupImage { correlation_id } => {
                self.cleanup_image(correlation_id);
            }
            ConductorAction::IpcToLinger { registration_id } => {
                self.notify_unavailable_ipc(registration_id);
            }
            ConductorAction::CleanupIpcPublication { registration_id } => {
                self.cleanup_ipc_publication(registration_id);
            }
        }
    }

    fn cleanup_spies(&mut self, registration_id: i64) {
        let Some(publication) = self
            .network_publications
            .iter()
            .find(|p| p.registration_id() == registration_id)
            .cloned()
        else {
            return;
        };

        for link in &mut self.subscription_links {
            if let Some(position) = link.unlink(registration_id) {
                self.client_proxy.on_unavailable_image(
                    registration_id,
                    link.registration_id(),
                    publication.stream_id(),
                    link.channel(),
                );
                self.counters_manager.free(position.id());
            }
        }
    }

    fn cleanup_publication(&mut self, registration_id: i64) {
        let Some(publication) = self
            .network_publications
            .iter()
            .find(|p| p.registration_id() == registration_id)
            .cloned()
        else {
            return;
        };

        self.sender_proxy
            .offer(SenderCmd::RemoveNetworkPublication(Arc::clone(&publication)));

        let endpoint = Arc::clone(publication.channel_endpoint());
        if endpoint.should_be_closed() {
            endpoint.indicate_closed();
            self.send_endpoints.remove(endpoint.canonical_form());
            self.counters_manager.free(endpoint.status_counter_id());
            self.sender_proxy
                .offer(SenderCmd::CloseSendChannelEndpoint(endpoint));
        }
    }

    fn notify_unavailable_image(&mut self, correlation_id: i64) {
        let Some(record) = self
            .images
            .iter()
            .find(|r| r.image.correlation_id() == correlation_id)
        else {
            return;
        };
        let stream_id = record.image.stream_id();

        for link in &self.subscription_links {
            if link.is_linked(correlation_id) {
                self.client_proxy.on_unavailable_image(
                    correlation_id,
                    link.registration_id(),
                    stream_id,
                    link.channel(),
                );
            }
        }
    }

    fn cleanup_image(&mut self, correlation_id: i64) {
        // The image itself is swept by the caller; only the subscriber
        // links still reference it here.
        for link in &mut self.subscription_links {
            if let Some(position) = link.unlink(correlation_id) {
                self.counters_manager.free(position.id());
            }
        }
    }

    fn notify_unavailable_ipc(&mut self, registration_id: i64) {
        let Some(publication) = self
            .ipc_publications
            .iter()
            .find(|p| p.registration_id() == registration_id)
        else {
            return;
        };
        let stream_id = publication.stream_id();

        for link in &self.subscription_links {
            if link.is_linked(registration_id) {
                self.client_proxy.on_unavailable_image(
                    registration_id,
                    link.registration_id(),
                    stream_id,
                    uri::IPC_CHANNEL,
                );
            }
        }
    }

    fn cleanup_ipc_publication(&mut self, registration_id: i64) {
        for link in &mut self.subscription_links {
            if let Some(position) = link.unlink(registration_id) {
                self.counters_manager.free(position.id());
            }
        }
    }

    fn check_for_blocked_to_driver_commands(&mut self, now_ns: i64) {
        let consumer_position = self.to_driver_ring.consumer_position();

        if consumer_position == self.last_consumer_command_position {
            if self.to_driver_ring.producer_position() > consumer_position
                && now_ns
                    > self.time_of_last_to_driver_position_change_ns
                        + self.ctx.client_liveness_timeout_ns as i64
                && self.to_driver_ring.unblock()
            {
                self.system_counters
                    .get(SystemCounterId::UnblockedCommands)
                    .increment();
            }
        } else {
            self.time_of_last_to_driver_position_change_ns = now_ns;
            self.last_consumer_command_position = consumer_position;
        }
    }
}

impl Agent for DriverConductor {
    fn role_name(&self) -> &'static str {
        "driver-conductor"
    }

    fn do_work(&mut self) -> usize {
        let mut work_count = 0;

        self.sender_proxy.retry_pending();
        self.receiver_proxy.retry_pending();

        // Client commands from the to-driver ring.
        let mut commands = Vec::new();
        work_count += self
            .to_driver_ring
            .read(COMMAND_DRAIN_LIMIT, |msg_type_id, payload| {
                commands.push((msg_type_id, ClientCommand::decode(msg_type_id, payload)));
            });
        for (msg_type_id, command) in commands {
            match command {
                Some(command) => self.on_client_command(command),
                None => {
                    log::warn!("[DriverConductor] undecodable command type={}", msg_type_id);
                    self.system_counters.get(SystemCounterId::Errors).increment();
                }
            }
        }

        // Events from the I/O agents.
        for _ in 0..COMMAND_DRAIN_LIMIT {
            match self.conductor_cmd_queue.pop() {
                Some(ConductorCmd::CreatePublicationImage {
                    session_id,
                    stream_id,
                    initial_term_id,
                    active_term_id,
                    term_offset,
                    term_length,
                    mtu_length,
                    control_address,
                    source_address,
                    endpoint,
                }) => {
                    work_count += 1;
                    if let Err(error) = self.on_create_publication_image(
                        session_id,
                        stream_id,
                        initial_term_id,
                        active_term_id,
                        term_offset,
                        term_length,
                        mtu_length,
                        control_address,
                        source_address,
                        endpoint,
                    ) {
                        let message = error.to_string();
                        log::error!("[DriverConductor] image creation failed: {}", message);
                        self.system_counters.get(SystemCounterId::Errors).increment();
                        self.error_log
                            .record(error.code() as i32, &message, self.clock.epoch_ms());
                    }
                }
                None => break,
            }
        }

        let now_ns = self.clock.nano_time() as i64;
        work_count += self.process_timers(now_ns);

        for record in &self.images {
            record.image.track_rebuild(now_ns);
        }

        for publication in &self.network_publications {
            work_count += publication.update_publisher_limit();
        }
        for publication in &self.ipc_publications {
            work_count += publication.update_publishers_limit();
        }

        work_count
    }

    fn on_close(&mut self) {
        for publication in self.network_publications.drain(..) {
            publication.delete_log();
        }
        for publication in self.ipc_publications.drain(..) {
            publication.delete_log();
        }
        for record in self.images.drain(..) {
            record.image.delete_log();
        }
        self.send_endpoints.clear();
        self.receive_endpoints.clear();
        log::info!("[DriverConductor] closed");
    }
}

fn confirm_match(params: &PublicationParams, publication: &NetworkPublication) -> Result<()> {
    if params.mtu_length != publication.mtu_length() {
        return Err(DriverError::ClashingState(format!(
            "existing publication has different MTU length: {} requested {}",
            publication.mtu_length(),
            params.mtu_length
        )));
    }
    if params.term_length != publication.term_length() {
        return Err(DriverError::ClashingState(format!(
            "existing publication has different term length: {} requested {}",
            publication.term_length(),
            params.term_length
        )));
    }
    if let Some(session_id) = params.session_id {
        if session_id != publication.session_id() {
            return Err(DriverError::ClashingState(format!(
                "existing publication has different session id: {} requested {}",
                publication.session_id(),
                session_id
            )));
        }
    }
    Ok(())
}

fn sweep<T, F>(
    list: &mut Vec<T>,
    now_ns: i64,
    now_ms: i64,
    actions: &mut Vec<ConductorAction>,
    mut on_remove: F,
) where
    T: DriverManagedResource,
    F: FnMut(T),
{
    let mut index = 0;
    while index < list.len() {
        list[index].on_time_event(now_ns, now_ms, actions);
        if list[index].has_reached_end_of_life() {
            on_remove(list.swap_remove(index));
        } else {
            index += 1;
        }
    }
}

fn sweep_arc<T, F>(
    list: &mut Vec<Arc<T>>,
    now_ns: i64,
    now_ms: i64,
    actions: &mut Vec<ConductorAction>,
    mut on_remove: F,
) where
    T: DriverManagedResource,
    F: FnMut(Arc<T>),
{
    let mut index = 0;
    while index < list.len() {
        list[index].on_time_event(now_ns, now_ms, actions);
        if list[index].has_reached_end_of_life() {
            on_remove(list.swap_remove(index));
        } else {
            index += 1;
        }
    }
}
