use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// RIP infinity. A route at this metric is logically unreachable.
pub const INFINITY_METRIC: u8 = 16;

/// An IPv4 network prefix with a mask length between 0 and 32.
///
/// The address is stored canonicalized: bits below the mask are cleared, so
/// two prefixes covering the same network always compare equal.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Prefix {
    addr: Ipv4Addr,
    len: u8,
}

impl Prefix {
    pub fn new(addr: Ipv4Addr, len: u8) -> Self {
        debug_assert!(len <= 32, "prefix length out of range: {len}");
        let len = len.min(32);
        let masked = u32::from(addr) & Self::mask_bits(len);
        Self {
            addr: Ipv4Addr::from(masked),
            len,
        }
    }

    /// Construct a prefix from an address and a dotted-quad netmask, as
    /// carried in RIP advertisements. Returns `None` for a non-contiguous
    /// mask.
    pub fn from_netmask(addr: Ipv4Addr, mask: Ipv4Addr) -> Option<Self> {
        let bits = u32::from(mask);
        let len = bits.leading_ones() as u8;
        if bits != Self::mask_bits(len) {
            return None;
        }
        Some(Self::new(addr, len))
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(Self::mask_bits(self.len))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask_bits(self.len) == u32::from(self.addr)
    }

    fn mask_bits(len: u8) -> u32 {
        if len == 0 {
            0
        } else {
            u32::MAX << (32 - len)
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RouteOrigin {
    /// Installed from interface configuration at startup; never ages.
    Direct,
    /// Learned from a peer's advertisement; subject to aging.
    Learned,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RouteState {
    Valid,
    /// Metric forced to infinity; kept advertised until garbage collection.
    Invalid { since: Instant },
}

#[derive(Copy, Clone, Debug)]
pub struct RouteEntry {
    prefix: Prefix,
    next_hop: Ipv4Addr,
    if_index: u16,
    metric: u8,
    origin: RouteOrigin,
    state: RouteState,
    refreshed_at: Instant,
}

impl RouteEntry {
    pub fn new_direct(prefix: Prefix, if_index: u16, now: Instant) -> Self {
        Self {
            prefix,
            next_hop: Ipv4Addr::UNSPECIFIED,
            if_index,
            // A directly connected network costs one hop (RFC2453 3.6).
            metric: 1,
            origin: RouteOrigin::Direct,
            state: RouteState::Valid,
            refreshed_at: now,
        }
    }

    pub fn new_learned(
        prefix: Prefix,
        next_hop: Ipv4Addr,
        if_index: u16,
        metric: u8,
        now: Instant,
    ) -> Self {
        debug_assert!(metric <= INFINITY_METRIC, "metric out of range: {metric}");
        Self {
            prefix,
            next_hop,
            if_index,
            metric: metric.min(INFINITY_METRIC),
            origin: RouteOrigin::Learned,
            state: RouteState::Valid,
            refreshed_at: now,
        }
    }

    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    /// The advertising peer, or 0.0.0.0 for a directly connected network.
    pub fn next_hop(&self) -> Ipv4Addr {
        self.next_hop
    }

    pub fn if_index(&self) -> u16 {
        self.if_index
    }

    pub fn metric(&self) -> u8 {
        self.metric
    }

    pub fn state(&self) -> RouteState {
        self.state
    }

    pub fn is_direct(&self) -> bool {
        self.origin == RouteOrigin::Direct
    }

    pub fn is_unreachable(&self) -> bool {
        self.metric >= INFINITY_METRIC
    }

    /// Restart the expiry timer without touching the route itself.
    pub fn refresh(&mut self, now: Instant) {
        log::debug!("resetting timer for route: {}", self);
        self.state = RouteState::Valid;
        self.refreshed_at = now;
    }

    /// Force the metric to infinity and start the garbage-collection timer.
    pub fn mark_unreachable(&mut self, now: Instant) {
        log::info!("route to {} now unreachable", self.prefix);
        self.metric = INFINITY_METRIC;
        self.state = RouteState::Invalid { since: now };
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.prefix, self.next_hop, self.if_index, self.metric
        )
    }
}

/// Destination-keyed route storage with longest-prefix-match lookup.
///
/// Entries are kept ordered by descending mask length, so a lookup scan
/// returns the most specific covering route first. Prefixes of equal length
/// are disjoint, which makes the result independent of insertion order.
#[derive(Default)]
pub struct RoutingTable {
    routes: Vec<RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Seed the table with one direct route per configured interface.
    pub fn with_direct_routes(interfaces: &InterfaceTable, now: Instant) -> Self {
        let mut table = Self::new();
        for interface in interfaces.iter() {
            table.upsert(RouteEntry::new_direct(
                interface.network(),
                interface.index(),
                now,
            ));
        }
        table
    }

    /// Insert a route, replacing any existing entry for the same prefix.
    ///
    /// The replacement swaps the whole entry in one assignment; readers never
    /// observe a partially updated route.
    pub fn upsert(&mut self, entry: RouteEntry) {
        match self.routes.iter().position(|e| e.prefix == entry.prefix) {
            Some(i) => self.routes[i] = entry,
            None => {
                let at = self
                    .routes
                    .partition_point(|e| e.prefix.len() >= entry.prefix.len());
                self.routes.insert(at, entry);
            }
        }
    }

    pub fn remove(&mut self, prefix: &Prefix) {
        self.routes.retain(|e| e.prefix != *prefix);
    }

    /// Longest-prefix-match lookup. Returns `None` when no entry covers the
    /// address; there is no default route.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<&RouteEntry> {
        self.routes.iter().find(|e| e.prefix.contains(addr))
    }

    pub fn get(&self, prefix: &Prefix) -> Option<&RouteEntry> {
        self.routes.iter().find(|e| e.prefix == *prefix)
    }

    pub fn get_mut(&mut self, prefix: &Prefix) -> Option<&mut RouteEntry> {
        self.routes.iter_mut().find(|e| e.prefix == *prefix)
    }

    pub fn entries(&self) -> &[RouteEntry] {
        self.routes.as_slice()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Drive the per-route timers: expire stale routes to Invalid and delete
    /// Invalid routes whose garbage-collection timeout has elapsed.
    ///
    /// Returns the prefixes invalidated by this pass, for a triggered update.
    pub fn age(
        &mut self,
        now: Instant,
        route_timeout: Duration,
        gc_timeout: Duration,
    ) -> Vec<Prefix> {
        let mut invalidated = Vec::new();

        for entry in &mut self.routes {
            if entry.is_direct() {
                continue;
            }
            if entry.state == RouteState::Valid
                && now.saturating_duration_since(entry.refreshed_at) >= route_timeout
            {
                log::warn!("route expired without refresh: {}", entry);
                entry.mark_unreachable(now);
                invalidated.push(entry.prefix);
            }
        }

        let len_before = self.routes.len();
        self.routes.retain(|e| match e.state {
            RouteState::Valid => true,
            RouteState::Invalid { since } => now.saturating_duration_since(since) < gc_timeout,
        });
        let num_deleted = len_before - self.routes.len();
        if num_deleted > 0 {
            log::info!("table pruned, {num_deleted} routes deleted");
        }

        invalidated
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.routes.iter().fold(Ok(()), |acc, entry| {
            acc.and_then(|_| writeln!(f, "{}", entry))
        })
    }
}

/// One of the router's fixed interfaces. Created at startup, immutable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    index: u16,
    addr: Ipv4Addr,
    prefix_len: u8,
    peer: Ipv4Addr,
}

impl Interface {
    pub fn new(index: u16, addr: Ipv4Addr, prefix_len: u8, peer: Ipv4Addr) -> Self {
        Self {
            index,
            addr,
            prefix_len,
            peer,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn peer(&self) -> Ipv4Addr {
        self.peer
    }

    /// The directly connected network on this interface.
    pub fn network(&self) -> Prefix {
        Prefix::new(self.addr, self.prefix_len)
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}/{}\t{}",
            self.index, self.addr, self.prefix_len, self.peer
        )
    }
}

pub struct InterfaceTable {
    interfaces: Vec<Interface>,
}

impl InterfaceTable {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        Self { interfaces }
    }

    pub fn get(&self, index: u16) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.index == index)
    }

    pub fn get_by_peer(&self, peer: Ipv4Addr) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.peer == peer)
    }

    pub fn is_local_addr(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.iter().any(|i| i.addr == addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

impl fmt::Display for InterfaceTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.interfaces.iter().fold(Ok(()), |acc, interface| {
            acc.and_then(|_| writeln!(f, "{}", interface))
        })
    }
}
