//! Per-packet forwarding decisions for transit traffic.

use std::net::Ipv4Addr;
use std::sync::Arc;

use etherparse::Ipv4HeaderSlice;
use tokio::sync::RwLock;

use crate::route::{InterfaceTable, RoutingTable};

#[derive(Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The buffer does not parse as an IPv4 packet.
    Malformed,
    ChecksumInvalid,
    NoRoute,
    TtlExpired,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ForwardDecision {
    /// Destined to one of this router's addresses; consume locally.
    Deliver,
    /// Send `packet` out of `if_index` toward `next_hop`. Link-address
    /// resolution for the next hop is the caller's job.
    Forward {
        if_index: u16,
        next_hop: Ipv4Addr,
        packet: Vec<u8>,
    },
    Drop(DropReason),
}

pub struct ForwardingEngine {
    routes: Arc<RwLock<RoutingTable>>,
    interfaces: Arc<InterfaceTable>,
}

impl ForwardingEngine {
    pub fn new(routes: Arc<RwLock<RoutingTable>>, interfaces: Arc<InterfaceTable>) -> Self {
        Self { routes, interfaces }
    }

    /// Decide what to do with one received packet.
    ///
    /// Never mutates `bytes`; a `Forward` decision carries a newly owned
    /// copy with the TTL decremented and the header checksum recomputed.
    pub async fn forward(&self, bytes: &[u8]) -> ForwardDecision {
        let header = match Ipv4HeaderSlice::from_slice(bytes) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("unparseable packet: {:?}", e);
                return ForwardDecision::Drop(DropReason::Malformed);
            }
        };

        if !validate_header_checksum(&header) {
            log::debug!("packet header checksum invalid; dropping packet");
            return ForwardDecision::Drop(DropReason::ChecksumInvalid);
        }

        let dst = header.destination_addr();
        if self.interfaces.is_local_addr(dst) {
            return ForwardDecision::Deliver;
        }

        let (if_index, next_hop) = {
            let table = self.routes.read().await;
            match table.lookup(dst) {
                None => {
                    log::warn!("no route to {}, dropping packet", dst);
                    return ForwardDecision::Drop(DropReason::NoRoute);
                }
                Some(entry) => {
                    if entry.is_unreachable() {
                        log::warn!("route to {} unreachable, dropping packet", dst);
                        return ForwardDecision::Drop(DropReason::NoRoute);
                    }
                    // A zero next hop marks a directly connected network:
                    // the destination itself is the link target.
                    let next_hop = if entry.next_hop().is_unspecified() {
                        dst
                    } else {
                        entry.next_hop()
                    };
                    (entry.if_index(), next_hop)
                }
            }
        };

        if header.ttl() <= 1 {
            log::debug!("TTL expired for packet to {}", dst);
            return ForwardDecision::Drop(DropReason::TtlExpired);
        }

        let payload = &bytes[header.slice().len()..];
        let mut out_header = header.to_header();
        out_header.time_to_live -= 1;

        let mut packet = Vec::with_capacity(bytes.len());
        // write() recomputes the header checksum for the new TTL.
        if out_header.write(&mut packet).is_err() {
            log::error!("failed to re-serialize header for {}", dst);
            return ForwardDecision::Drop(DropReason::Malformed);
        }
        packet.extend_from_slice(payload);

        ForwardDecision::Forward {
            if_index,
            next_hop,
            packet,
        }
    }
}

pub fn validate_header_checksum(header: &Ipv4HeaderSlice<'_>) -> bool {
    let owned_header = header.to_header();
    match owned_header.calc_header_checksum() {
        Ok(expected_checksum) => expected_checksum == header.header_checksum(),
        Err(_) => false,
    }
}
