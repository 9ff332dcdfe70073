//! Merging of received advertisements into the routing table, plus the
//! periodic, triggered, and aging timers (RFC2453 3.8, 3.9, 3.10).
//!
//! Every operation is a deterministic function of its inputs and the supplied
//! clock reading; the engine performs no I/O. Messages to transmit come back
//! to the caller as [`Outbound`] batches.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use crate::protocol::rip::codec::{Command, RipEntry, RipMessage};
use crate::route::{InterfaceTable, Prefix, RouteEntry, RoutingTable, INFINITY_METRIC};

#[derive(Copy, Clone, Debug)]
pub struct RipConfig {
    /// Interval between full-table advertisements.
    pub update_interval: Duration,
    /// A route unrefreshed for this long is forced to infinity.
    pub route_timeout: Duration,
    /// An unreachable route unrefreshed for this long is deleted.
    pub gc_timeout: Duration,
    /// Minimum spacing between triggered updates.
    pub triggered_hold: Duration,
}

impl Default for RipConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(30),
            route_timeout: Duration::from_secs(180),
            gc_timeout: Duration::from_secs(120),
            triggered_hold: Duration::from_secs(1),
        }
    }
}

/// A message the caller should transmit out of `if_index`, addressed to
/// `dst`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Outbound {
    pub if_index: u16,
    pub dst: Ipv4Addr,
    pub message: RipMessage,
}

struct TimerState {
    last_periodic: Instant,
    /// `None` until the first triggered update goes out.
    last_triggered: Option<Instant>,
    /// Routes changed since the last advertisement that mentioned them.
    pending: HashSet<Prefix>,
}

impl TimerState {
    fn triggered_hold_elapsed(&self, now: Instant, hold: Duration) -> bool {
        match self.last_triggered {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= hold,
        }
    }
}

pub struct UpdateEngine {
    routes: Arc<RwLock<RoutingTable>>,
    interfaces: Arc<InterfaceTable>,
    config: RipConfig,
    timers: Mutex<TimerState>,
}

impl UpdateEngine {
    pub fn new(
        routes: Arc<RwLock<RoutingTable>>,
        interfaces: Arc<InterfaceTable>,
        config: RipConfig,
        now: Instant,
    ) -> Self {
        Self {
            routes,
            interfaces,
            config,
            timers: Mutex::new(TimerState {
                last_periodic: now,
                last_triggered: None,
                pending: HashSet::new(),
            }),
        }
    }

    /// Full-table requests to every peer, sent once at startup so learned
    /// routes repopulate faster than one periodic interval (RFC2453 3.9.1).
    pub fn startup_requests(&self) -> Vec<Outbound> {
        self.interfaces
            .iter()
            .map(|interface| Outbound {
                if_index: interface.index(),
                dst: interface.peer(),
                message: RipMessage::request(),
            })
            .collect()
    }

    /// Merge a response from `src` received on `if_index` into the table.
    ///
    /// Returns a triggered update for the changed routes, unless the minimum
    /// inter-trigger spacing holds it back (a later tick flushes it then).
    pub async fn on_response(
        &self,
        src: Ipv4Addr,
        if_index: u16,
        message: &RipMessage,
        now: Instant,
    ) -> Vec<Outbound> {
        debug_assert_eq!(message.command, Command::Response);

        let mut changed = Vec::new();
        {
            let mut table = self.routes.write().await;
            for advert in &message.entries {
                if let Some(prefix) = self.merge_advert(&mut table, src, if_index, advert, now) {
                    changed.push(prefix);
                }
            }
        }

        if changed.is_empty() {
            return Vec::new();
        }

        let mut timers = self.timers.lock().await;
        timers.pending.extend(changed);
        if !timers.triggered_hold_elapsed(now, self.config.triggered_hold) {
            // Coalesce with the next flush.
            return Vec::new();
        }
        self.flush_triggered(&mut timers, now).await
    }

    /// Bellman-Ford relaxation of one advertisement. Returns the prefix when
    /// the table changed.
    fn merge_advert(
        &self,
        table: &mut RoutingTable,
        src: Ipv4Addr,
        if_index: u16,
        advert: &RipEntry,
        now: Instant,
    ) -> Option<Prefix> {
        let prefix = match Prefix::from_netmask(advert.address, advert.mask) {
            Some(p) => p,
            None => {
                log::warn!(
                    "ignoring advertisement for {} with non-contiguous mask {}",
                    advert.address,
                    advert.mask
                );
                return None;
            }
        };

        let candidate = (advert.metric + 1).min(INFINITY_METRIC as u32) as u8;

        let current = match table.get(&prefix).copied() {
            None => {
                if candidate < INFINITY_METRIC {
                    log::info!("new route {} via {} metric {}", prefix, src, candidate);
                    table.upsert(RouteEntry::new_learned(prefix, src, if_index, candidate, now));
                    return Some(prefix);
                }
                return None;
            }
            Some(entry) => entry,
        };

        // Direct routes are configuration, not protocol state.
        if current.is_direct() {
            return None;
        }

        if candidate < current.metric() {
            log::info!(
                "route {} improved: {} via {} -> {} via {}",
                prefix,
                current.metric(),
                current.next_hop(),
                candidate,
                src
            );
            table.upsert(RouteEntry::new_learned(prefix, src, if_index, candidate, now));
            return Some(prefix);
        }

        if current.next_hop() != src {
            // Equal or worse metric from a different peer: first writer wins.
            return None;
        }

        // News from the peer that owns the route.
        if candidate == current.metric() {
            if candidate < INFINITY_METRIC {
                if let Some(entry) = table.get_mut(&prefix) {
                    entry.refresh(now);
                }
            }
            return None;
        }

        if candidate >= INFINITY_METRIC {
            if let Some(entry) = table.get_mut(&prefix) {
                entry.mark_unreachable(now);
            }
        } else {
            log::info!("route {} metric moved to {} by {}", prefix, candidate, src);
            table.upsert(RouteEntry::new_learned(prefix, src, if_index, candidate, now));
        }
        Some(prefix)
    }

    /// Answer a table request with the full table, addressed to the
    /// requester (RFC2453 3.9.1).
    pub async fn on_request(&self, src: Ipv4Addr, if_index: u16) -> Vec<Outbound> {
        let interface = match self.interfaces.get(if_index) {
            Some(i) => *i,
            None => {
                log::warn!("request from {} on unknown interface {}", src, if_index);
                return Vec::new();
            }
        };

        let table = self.routes.read().await;
        let adverts = advertisements(&table, interface.index(), None);
        drop(table);

        RipMessage::chunk_responses(adverts)
            .into_iter()
            .map(|message| Outbound {
                if_index,
                dst: src,
                message,
            })
            .collect()
    }

    /// One pass of the timer logic: age routes, then emit whichever of the
    /// periodic or held-back triggered advertisements is due.
    pub async fn on_tick(&self, now: Instant) -> Vec<Outbound> {
        let invalidated = {
            let mut table = self.routes.write().await;
            table.age(now, self.config.route_timeout, self.config.gc_timeout)
        };

        let mut timers = self.timers.lock().await;
        timers.pending.extend(invalidated);

        if now.saturating_duration_since(timers.last_periodic) >= self.config.update_interval {
            timers.last_periodic = now;
            // The full table covers anything a pending trigger would carry.
            timers.pending.clear();
            timers.last_triggered = Some(now);
            return self.full_advertisements().await;
        }

        if !timers.pending.is_empty()
            && timers.triggered_hold_elapsed(now, self.config.triggered_hold)
        {
            return self.flush_triggered(&mut timers, now).await;
        }

        Vec::new()
    }

    async fn flush_triggered(&self, timers: &mut TimerState, now: Instant) -> Vec<Outbound> {
        let changed = std::mem::take(&mut timers.pending);
        timers.last_triggered = Some(now);

        let table = self.routes.read().await;
        let mut out = Vec::new();
        for interface in self.interfaces.iter() {
            let adverts = advertisements(&table, interface.index(), Some(&changed));
            for message in RipMessage::chunk_responses(adverts) {
                out.push(Outbound {
                    if_index: interface.index(),
                    dst: interface.peer(),
                    message,
                });
            }
        }
        out
    }

    async fn full_advertisements(&self) -> Vec<Outbound> {
        let table = self.routes.read().await;
        let mut out = Vec::new();
        for interface in self.interfaces.iter() {
            log::debug!("sending periodic update to {}", interface.peer());
            let adverts = advertisements(&table, interface.index(), None);
            for message in RipMessage::chunk_responses(adverts) {
                out.push(Outbound {
                    if_index: interface.index(),
                    dst: interface.peer(),
                    message,
                });
            }
        }
        out
    }
}

/// Build the advertisement list for one egress interface, with split horizon
/// and poisoned reverse: learned routes are advertised back toward their own
/// egress at infinity.
fn advertisements(
    table: &RoutingTable,
    out_if: u16,
    only: Option<&HashSet<Prefix>>,
) -> Vec<RipEntry> {
    table
        .entries()
        .iter()
        .filter(|entry| only.map_or(true, |wanted| wanted.contains(&entry.prefix())))
        .map(|entry| {
            let metric = if !entry.is_direct() && entry.if_index() == out_if {
                INFINITY_METRIC
            } else {
                entry.metric()
            };
            RipEntry {
                address: entry.prefix().addr(),
                mask: entry.prefix().mask(),
                next_hop: Ipv4Addr::UNSPECIFIED,
                metric: metric as u32,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture;
    use crate::route::RouteState;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    struct Harness {
        routes: Arc<RwLock<RoutingTable>>,
        engine: UpdateEngine,
        t0: Instant,
    }

    fn make_engine(config: RipConfig) -> Harness {
        let t0 = Instant::now();
        let interfaces = Arc::new(fixture::four_port_router());
        let routes = Arc::new(RwLock::new(RoutingTable::with_direct_routes(
            &interfaces,
            t0,
        )));
        let engine = UpdateEngine::new(routes.clone(), interfaces, config, t0);
        Harness { routes, engine, t0 }
    }

    fn advert(address: &str, metric: u32) -> RipEntry {
        RipEntry {
            address: ip(address),
            mask: ip("255.255.255.0"),
            next_hop: ip("0.0.0.0"),
            metric,
        }
    }

    const PEER_1: &str = "10.0.1.2";

    #[tokio::test]
    async fn response_inserts_route_with_incremented_metric() {
        let h = make_engine(RipConfig::default());
        let msg = RipMessage::response(vec![advert("10.0.5.0", 1)]);

        h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;

        let table = h.routes.read().await;
        let entry = table.lookup(ip("10.0.5.7")).unwrap();
        assert_eq!(entry.metric(), 2);
        assert_eq!(entry.next_hop(), ip(PEER_1));
        assert_eq!(entry.if_index(), 1);
        assert!(!entry.is_direct());
    }

    #[tokio::test]
    async fn unreachable_advertisement_is_not_inserted() {
        let h = make_engine(RipConfig::default());
        let msg = RipMessage::response(vec![advert("10.0.5.0", 16)]);

        h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;

        assert!(h.routes.read().await.lookup(ip("10.0.5.7")).is_none());
    }

    #[tokio::test]
    async fn better_metric_replaces_worse() {
        let h = make_engine(RipConfig::default());

        let msg = RipMessage::response(vec![advert("10.0.5.0", 4)]);
        h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;

        let msg = RipMessage::response(vec![advert("10.0.5.0", 2)]);
        h.engine.on_response(ip("10.0.2.2"), 2, &msg, h.t0).await;

        let table = h.routes.read().await;
        let entry = table.lookup(ip("10.0.5.7")).unwrap();
        assert_eq!(entry.metric(), 3);
        assert_eq!(entry.next_hop(), ip("10.0.2.2"));
        assert_eq!(entry.if_index(), 2);
    }

    #[tokio::test]
    async fn equal_metric_from_other_peer_is_ignored() {
        let h = make_engine(RipConfig::default());

        let msg = RipMessage::response(vec![advert("10.0.5.0", 3)]);
        h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;
        h.engine.on_response(ip("10.0.2.2"), 2, &msg, h.t0).await;

        let table = h.routes.read().await;
        let entry = table.lookup(ip("10.0.5.7")).unwrap();
        // First writer wins.
        assert_eq!(entry.next_hop(), ip(PEER_1));
    }

    #[tokio::test]
    async fn owner_peer_metric_increase_propagates() {
        let h = make_engine(RipConfig::default());

        let msg = RipMessage::response(vec![advert("10.0.5.0", 2)]);
        h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;

        let msg = RipMessage::response(vec![advert("10.0.5.0", 5)]);
        h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;

        let table = h.routes.read().await;
        let entry = table.lookup(ip("10.0.5.7")).unwrap();
        assert_eq!(entry.metric(), 6);
        assert_eq!(entry.next_hop(), ip(PEER_1));
    }

    #[tokio::test]
    async fn poison_from_owner_invalidates_then_gc_removes() {
        let config = RipConfig::default();
        let h = make_engine(config);

        let msg = RipMessage::response(vec![advert("10.0.5.0", 1)]);
        h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;

        let t1 = h.t0 + Duration::from_secs(5);
        let msg = RipMessage::response(vec![advert("10.0.5.0", 16)]);
        h.engine.on_response(ip(PEER_1), 1, &msg, t1).await;

        {
            let table = h.routes.read().await;
            let entry = table.lookup(ip("10.0.5.7")).unwrap();
            assert!(entry.is_unreachable());
            assert!(matches!(entry.state(), RouteState::Invalid { .. }));
        }

        // Not yet collected...
        h.engine
            .on_tick(t1 + config.gc_timeout - Duration::from_secs(1))
            .await;
        assert!(h.routes.read().await.lookup(ip("10.0.5.7")).is_some());

        // ...collected once the GC timeout elapses with no refresh.
        h.engine.on_tick(t1 + config.gc_timeout).await;
        assert!(h.routes.read().await.lookup(ip("10.0.5.7")).is_none());
    }

    #[tokio::test]
    async fn route_expires_from_ticks_alone() {
        let config = RipConfig::default();
        let h = make_engine(config);

        let msg = RipMessage::response(vec![advert("10.0.5.0", 1)]);
        h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;

        h.engine
            .on_tick(h.t0 + config.route_timeout - Duration::from_secs(1))
            .await;
        assert_eq!(
            h.routes
                .read()
                .await
                .lookup(ip("10.0.5.7"))
                .unwrap()
                .state(),
            RouteState::Valid
        );

        let out = h.engine.on_tick(h.t0 + config.route_timeout).await;
        let entry_state = h
            .routes
            .read()
            .await
            .lookup(ip("10.0.5.7"))
            .unwrap()
            .state();
        assert!(matches!(entry_state, RouteState::Invalid { .. }));

        // The expiry is itself a change worth a triggered update.
        assert!(!out.is_empty());
        let carries_poison = out.iter().any(|o| {
            o.message
                .entries
                .iter()
                .any(|e| e.address == ip("10.0.5.0") && e.metric == 16)
        });
        assert!(carries_poison);
    }

    #[tokio::test]
    async fn refresh_restarts_the_expiry_timer() {
        let config = RipConfig::default();
        let h = make_engine(config);

        let msg = RipMessage::response(vec![advert("10.0.5.0", 1)]);
        h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;

        // Same advertisement again, most of a timeout later.
        let t1 = h.t0 + config.route_timeout - Duration::from_secs(10);
        h.engine.on_response(ip(PEER_1), 1, &msg, t1).await;

        // The original deadline passes without expiry.
        h.engine.on_tick(h.t0 + config.route_timeout).await;
        assert_eq!(
            h.routes
                .read()
                .await
                .lookup(ip("10.0.5.7"))
                .unwrap()
                .state(),
            RouteState::Valid
        );
    }

    #[tokio::test]
    async fn triggered_update_advertises_only_changed_routes() {
        let h = make_engine(RipConfig::default());

        let msg = RipMessage::response(vec![advert("10.0.5.0", 1)]);
        let out = h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;

        assert!(!out.is_empty());
        for outbound in &out {
            assert_eq!(outbound.message.command, Command::Response);
            // Only the changed route, not the direct routes.
            assert_eq!(outbound.message.entries.len(), 1);
            assert_eq!(outbound.message.entries[0].address, ip("10.0.5.0"));
        }
        // One per interface.
        assert_eq!(out.len(), 4);
    }

    #[tokio::test]
    async fn triggered_updates_are_rate_limited() {
        let config = RipConfig::default();
        let h = make_engine(config);

        let msg = RipMessage::response(vec![advert("10.0.5.0", 1)]);
        let first = h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;
        assert!(!first.is_empty());

        // A second change inside the hold interval is coalesced, not sent.
        let msg = RipMessage::response(vec![advert("10.0.6.0", 1)]);
        let t1 = h.t0 + config.triggered_hold / 2;
        let held = h.engine.on_response(ip(PEER_1), 1, &msg, t1).await;
        assert!(held.is_empty());

        // A tick after the hold expires flushes the pending change.
        let t2 = h.t0 + config.triggered_hold;
        let flushed = h.engine.on_tick(t2).await;
        assert!(!flushed.is_empty());
        let carries_pending = flushed.iter().any(|o| {
            o.message
                .entries
                .iter()
                .any(|e| e.address == ip("10.0.6.0"))
        });
        assert!(carries_pending);
    }

    #[tokio::test]
    async fn periodic_update_carries_the_full_table() {
        let config = RipConfig::default();
        let h = make_engine(config);

        // Nothing due before the interval.
        let out = h
            .engine
            .on_tick(h.t0 + config.update_interval - Duration::from_secs(1))
            .await;
        assert!(out.is_empty());

        let out = h.engine.on_tick(h.t0 + config.update_interval).await;
        // Four interfaces, each advertised the four direct routes.
        assert_eq!(out.len(), 4);
        for outbound in &out {
            assert_eq!(outbound.message.entries.len(), 4);
            let interface_peer = Ipv4Addr::new(10, 0, outbound.if_index as u8, 2);
            assert_eq!(outbound.dst, interface_peer);
        }
    }

    #[tokio::test]
    async fn request_is_answered_with_the_full_table() {
        let h = make_engine(RipConfig::default());

        let out = h.engine.on_request(ip(PEER_1), 1).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dst, ip(PEER_1));
        assert_eq!(out[0].if_index, 1);
        assert_eq!(out[0].message.command, Command::Response);
        assert_eq!(out[0].message.entries.len(), 4);
    }

    #[tokio::test]
    async fn poisoned_reverse_on_learned_routes() {
        let h = make_engine(RipConfig::default());

        let msg = RipMessage::response(vec![advert("10.0.5.0", 1)]);
        h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;

        let out = h.engine.on_request(ip(PEER_1), 1).await;
        let learned = out[0]
            .message
            .entries
            .iter()
            .find(|e| e.address == ip("10.0.5.0"))
            .unwrap();
        // Advertised back toward its own egress at infinity.
        assert_eq!(learned.metric, 16);

        let out = h.engine.on_request(ip("10.0.2.2"), 2).await;
        let learned = out[0]
            .message
            .entries
            .iter()
            .find(|e| e.address == ip("10.0.5.0"))
            .unwrap();
        assert_eq!(learned.metric, 2);
    }

    #[tokio::test]
    async fn large_tables_are_chunked_across_messages() {
        let config = RipConfig::default();
        let h = make_engine(config);

        let entries: Vec<RipEntry> = (0..30u8)
            .map(|i| RipEntry {
                address: Ipv4Addr::new(10, 9, i, 0),
                mask: ip("255.255.255.0"),
                next_hop: ip("0.0.0.0"),
                metric: 1,
            })
            .collect();
        // Two messages' worth of routes, fed in under the cap.
        for chunk in entries.chunks(25) {
            let msg = RipMessage::response(chunk.to_vec());
            h.engine.on_response(ip(PEER_1), 1, &msg, h.t0).await;
        }

        let out = h.engine.on_request(ip("10.0.2.2"), 2).await;
        // 30 learned + 4 direct = 34 adverts: two messages.
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].message.entries.len(), 25);
        assert_eq!(out[1].message.entries.len(), 9);
    }

    #[tokio::test]
    async fn startup_requests_cover_all_interfaces() {
        let h = make_engine(RipConfig::default());
        let out = h.engine.startup_requests();
        assert_eq!(out.len(), 4);
        for outbound in &out {
            assert_eq!(outbound.message.command, Command::Request);
            assert!(outbound.message.entries.is_empty());
        }
    }
}
