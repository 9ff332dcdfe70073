//! Dispatcher glue: classifies inbound frames, drives the timer tick, and
//! fans engine output onto the links. No routing decision lives here.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use etherparse::Ipv4HeaderSlice;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::args::Args;
use crate::fwd::{ForwardDecision, ForwardingEngine};
use crate::link::{self, LinkLayer};
use crate::protocol::rip::{self, Command, Outbound, RipConfig, UpdateEngine};
use crate::protocol::{Protocol, ProtocolHandler};
use crate::route::{InterfaceTable, RoutingTable};
use crate::utils::net::Ipv4PacketBuilder;

pub struct NodeBuilder<'a> {
    args: &'a Args,
    built: bool,
    tick_interval: Duration,
    rip_config: RipConfig,
    protocol_handlers: HashMap<Protocol, Box<dyn ProtocolHandler>>,
}

impl<'a> NodeBuilder<'a> {
    pub fn new(args: &'a Args) -> Self {
        Self {
            args,
            built: false,
            tick_interval: Duration::from_secs(1),
            rip_config: RipConfig::default(),
            protocol_handlers: HashMap::new(),
        }
    }

    /// Set the interval between periodic full-table advertisements.
    pub fn with_update_interval(&mut self, interval: Duration) -> &mut Self {
        self.rip_config.update_interval = interval;
        self
    }

    /// Set how long a route may go unrefreshed before it expires.
    pub fn with_route_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.rip_config.route_timeout = timeout;
        self
    }

    /// Set how long an expired route lingers before deletion.
    pub fn with_gc_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.rip_config.gc_timeout = timeout;
        self
    }

    /// Set the minimum spacing between triggered updates.
    pub fn with_triggered_hold(&mut self, hold: Duration) -> &mut Self {
        self.rip_config.triggered_hold = hold;
        self
    }

    /// Set how often the timer logic runs.
    pub fn with_tick_interval(&mut self, interval: Duration) -> &mut Self {
        self.tick_interval = interval;
        self
    }

    /// Provide a handler for locally delivered traffic of a protocol.
    ///
    /// Replaces any handler that is associated with the protocol. RIP is
    /// consumed by the node itself and cannot be overridden.
    pub fn with_protocol_handler<H: ProtocolHandler + 'static>(
        &mut self,
        protocol: Protocol,
        handler: H,
    ) -> &mut Self {
        self.protocol_handlers.insert(protocol, Box::new(handler));
        self
    }

    pub async fn build(&mut self) -> link::Result<Node> {
        if self.built {
            panic!("A NodeBuilder can only be built once.");
        }
        self.built = true;

        let now = Instant::now();
        let interfaces = self.args.interfaces();
        let routes = Arc::new(RwLock::new(RoutingTable::with_direct_routes(
            &interfaces,
            now,
        )));
        let links = Arc::new(LinkLayer::new(self.args).await?);

        let rip = UpdateEngine::new(routes.clone(), interfaces.clone(), self.rip_config, now);
        let fwd = ForwardingEngine::new(routes.clone(), interfaces.clone());

        let mut protocol_handlers = HashMap::new();
        self.protocol_handlers.drain().for_each(|(proto, handler)| {
            protocol_handlers.insert(proto, handler);
        });

        Ok(Node {
            links,
            interfaces,
            routes,
            rip,
            fwd,
            tick_interval: self.tick_interval,
            protocol_handlers,
        })
    }
}

pub struct Node {
    links: Arc<LinkLayer>,
    interfaces: Arc<InterfaceTable>,
    routes: Arc<RwLock<RoutingTable>>,
    rip: UpdateEngine,
    fwd: ForwardingEngine,
    tick_interval: Duration,
    protocol_handlers: HashMap<Protocol, Box<dyn ProtocolHandler>>,
}

impl Node {
    pub async fn run(&self) {
        let mut inbound = self.links.listen().await;
        let mut tick = tokio::time::interval(self.tick_interval);

        self.send_outbounds(self.rip.startup_requests()).await;

        loop {
            tokio::select! {
                result = inbound.recv() => match result {
                    Ok(bytes) => self.handle_frame(&bytes).await,
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("missed handling {n} packets b/c internal buffer full")
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tick.tick() => {
                    let out = self.rip.on_tick(Instant::now()).await;
                    self.send_outbounds(out).await;
                }
            }
        }
    }

    pub async fn routing_table(&self) -> RwLockReadGuard<'_, RoutingTable> {
        self.routes.read().await
    }

    pub fn interfaces(&self) -> &InterfaceTable {
        &self.interfaces
    }

    /// Turns on a link interface.
    pub async fn activate(&self, if_index: u16) -> link::Result<()> {
        self.links.activate_link(if_index).await
    }

    /// Turns off a link interface.
    pub async fn deactivate(&self, if_index: u16) -> link::Result<()> {
        self.links.deactivate_link(if_index).await
    }

    async fn handle_frame(&self, bytes: &[u8]) {
        match self.fwd.forward(bytes).await {
            ForwardDecision::Drop(reason) => {
                log::debug!("dropping packet: {:?}", reason);
            }
            ForwardDecision::Deliver => self.consume_packet(bytes).await,
            ForwardDecision::Forward {
                if_index,
                next_hop,
                packet,
            } => {
                // The link layer resolves the next hop to its peer endpoint;
                // a down or missing link is a resolution failure.
                if let Err(e) = self.links.send_on(if_index, &packet).await {
                    log::warn!(
                        "could not reach next hop {} on interface {}: {:?}",
                        next_hop,
                        if_index,
                        e
                    );
                }
            }
        }
    }

    async fn consume_packet(&self, bytes: &[u8]) {
        let header = match Ipv4HeaderSlice::from_slice(bytes) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("unparseable delivered packet: {:?}", e);
                return;
            }
        };
        let payload = &bytes[header.slice().len()..];

        match Protocol::try_from(header.protocol()) {
            Ok(Protocol::Rip) => self.handle_rip(header.source_addr(), payload).await,
            Ok(protocol) => match self.protocol_handlers.get(&protocol) {
                Some(handler) => handler.handle_packet(&header, payload).await,
                None => log::warn!("no protocol handler for protocol {:?}", protocol),
            },
            Err(_) => log::warn!("unrecognized protocol {}", header.protocol()),
        }
    }

    async fn handle_rip(&self, src: Ipv4Addr, payload: &[u8]) {
        let if_index = match self.interfaces.get_by_peer(src) {
            Some(interface) => interface.index(),
            None => {
                log::debug!("RIP message from unknown peer {}, ignoring", src);
                return;
            }
        };

        if let Some(l) = self.links.find_link_to(src).await {
            if l.is_disabled() {
                log::info!("ignoring RIP packet from {}, link disabled", src);
                return;
            }
        }

        let message = match rip::disassemble(payload) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("malformed RIP message from {}: {:?}", src, e);
                return;
            }
        };

        let out = match message.command {
            Command::Response => {
                self.rip
                    .on_response(src, if_index, &message, Instant::now())
                    .await
            }
            Command::Request => self.rip.on_request(src, if_index).await,
        };
        self.send_outbounds(out).await;
    }

    async fn send_outbounds(&self, outbounds: Vec<Outbound>) {
        for outbound in outbounds {
            let interface = match self.interfaces.get(outbound.if_index) {
                Some(i) => *i,
                None => {
                    log::error!("outbound message for unknown interface {}", outbound.if_index);
                    continue;
                }
            };

            let payload = rip::assemble(&outbound.message);
            let packet = match Ipv4PacketBuilder::default()
                .with_src(interface.addr())
                .with_dst(outbound.dst)
                .with_protocol(Protocol::Rip)
                .with_payload(&payload)
                .build()
            {
                Ok(p) => p,
                Err(e) => {
                    log::error!("could not build RIP packet: {:?}", e);
                    continue;
                }
            };

            if let Err(e) = self.links.send_on(outbound.if_index, &packet).await {
                log::debug!(
                    "could not send RIP message on interface {}: {:?}",
                    outbound.if_index,
                    e
                );
            }
        }
    }
}
