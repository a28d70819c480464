//! Fisheye State Routing.
//!
//! Every node keeps a topology table with one entry per directed link it has heard of, and exchanges that
//! table with its immediate neighbours only. How often an entry is passed on depends on how far away its
//! origin is: entries about nearby nodes go out with the inner scope timers, entries about distant nodes
//! with the slower outer ones. Routes are recomputed locally whenever the table changes.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use log::{debug, error, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::serde_as;

use crate::concepts::destination::NetworkDestination;
use crate::concepts::neighbour::Link;
use crate::concepts::packet::{FsrPacket, LinkAdvert, OutboundPacket, Payload};
use crate::concepts::route::ProtocolTag;
use crate::concepts::topology::{
    FsrNeighbour, PathInfo, ScopeClass, TopologyLinkEntry, INFINITE_COST, SEQNO_OVERFLOW,
};
use crate::feedback::{Counters, RoutingEvent, RoutingWarning, SendError, WarningClass};
use crate::framework::{FsrConfig, RoutingSystem, SimTime};
use crate::rib::Redistribute;
use crate::timer::{FsrTimer, TimerRequest};

const TAG: ProtocolTag = ProtocolTag::Fisheye;

#[serde_as]
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Fisheye<T: RoutingSystem + ?Sized> {
    pub address: T::NodeAddress,
    pub config: FsrConfig,
    #[serde_as(as = "Vec<(_, _)>")]
    pub links: HashMap<T::NodeAddress, FsrNeighbour<T>>,
    /// (origin, neighbour) -> entry
    #[serde_as(as = "Vec<(_, _)>")]
    pub topology: HashMap<(T::NodeAddress, T::NodeAddress), TopologyLinkEntry>,
    /// stamped on our own link entries
    pub seqno: u32,
    #[serde_as(as = "Vec<(_, _)>")]
    pub paths: HashMap<T::NodeAddress, PathInfo<T>>,
    #[serde_as(as = "Vec<(_, _)>")]
    pub scopes: HashMap<T::NodeAddress, ScopeClass>,
    pub outbound_packets: Vec<OutboundPacket<T>>,
    #[serde(skip)]
    pub timers: Vec<TimerRequest<FsrTimer>>,
    #[serde(skip)]
    pub events: Vec<RoutingEvent<T>>,
    pub counters: Counters,
}

impl<T: RoutingSystem + ?Sized> Fisheye<T> {
    pub fn new(address: T::NodeAddress, config: FsrConfig) -> Self {
        Self {
            address,
            config,
            links: HashMap::new(),
            topology: HashMap::new(),
            seqno: 0,
            paths: HashMap::new(),
            scopes: HashMap::new(),
            outbound_packets: Vec::new(),
            timers: Vec::new(),
            events: Vec::new(),
            counters: Counters::default(),
        }
    }

    /// The innermost scope fires right away so neighbours hear about us, the outer ones after one interval
    pub fn start(&mut self) {
        let own = self.own_tier();
        for (tier, scope) in self.config.scopes.iter().enumerate() {
            let delay = if tier == own { SimTime::ZERO } else { scope.interval };
            self.timers.push(TimerRequest::after(delay, FsrTimer::Scope { tier }));
        }
        self.timers
            .push(TimerRequest::after(self.config.housekeeping_interval, FsrTimer::Housekeeping));
    }

    // region Interface

    pub fn path_to(&self, node: &T::NodeAddress) -> Option<&PathInfo<T>> {
        self.paths.get(node)
    }

    pub fn scope_of(&self, node: &T::NodeAddress) -> Option<ScopeClass> {
        self.scopes.get(node).copied()
    }

    pub fn entry(&self, origin: &T::NodeAddress, neighbour: &T::NodeAddress) -> Option<&TopologyLinkEntry> {
        self.topology.get(&(origin.clone(), neighbour.clone()))
    }

    /// Links are assumed up until `neighbor_timeout` passes without hearing from them
    pub fn add_link(&mut self, mut link: Link<T>, now: SimTime, rib: &mut dyn Redistribute<T>) {
        if link.cost == 0 {
            self.warn(RoutingWarning::MetricIsZero {
                neighbour: link.addr.clone(),
            });
            link.cost = 1;
        }
        let addr = link.addr.clone();
        let cost = link.cost;
        self.links.insert(
            addr.clone(),
            FsrNeighbour {
                link,
                last_heard: now,
                up: true,
            },
        );
        self.stamp_own(&addr, cost);
        self.recompute(rib);
    }

    pub fn set_link_cost(&mut self, neighbour: &T::NodeAddress, cost: u32, rib: &mut dyn Redistribute<T>) {
        let cost = cost.max(1);
        let Some(n) = self.links.get_mut(neighbour) else {
            return;
        };
        n.link.cost = cost;
        if n.up {
            self.stamp_own(neighbour, cost);
            self.recompute(rib);
        }
    }

    pub fn remove_link(&mut self, neighbour: &T::NodeAddress, rib: &mut dyn Redistribute<T>) {
        if self.links.remove(neighbour).is_some() {
            self.stamp_own(neighbour, INFINITE_COST);
            self.recompute(rib);
        }
    }

    pub fn on_send_failed(&mut self, neighbour: &T::NodeAddress, error: SendError) {
        // the scope timers resend everything on their next cycle
        self.warn(RoutingWarning::SendFailed {
            neighbour: neighbour.clone(),
            error,
        });
    }

    // endregion

    // region Timers

    pub fn handle_timer(&mut self, timer: FsrTimer, now: SimTime, rib: &mut dyn Redistribute<T>) {
        match timer {
            FsrTimer::Scope { tier } => self.broadcast_scope(tier),
            FsrTimer::Housekeeping => {
                self.housekeeping(now, rib);
                self.timers
                    .push(TimerRequest::after(self.config.housekeeping_interval, FsrTimer::Housekeeping));
            }
        }
    }

    fn own_tier(&self) -> usize {
        ScopeClass::classify(0, &self.config).tier
    }

    fn broadcast_scope(&mut self, tier: usize) {
        let Some(interval) = self.config.scopes.get(tier).map(|s| s.interval) else {
            return;
        };
        let own = tier == self.own_tier();
        if own && self.bump_seqno() {
            // refresh our live links so they outlive the lifetime at every other node
            let seqno = self.seqno;
            for ((origin, _), entry) in self.topology.iter_mut() {
                if *origin == self.address && !entry.is_withdrawn() {
                    entry.seqno = seqno;
                    entry.age = SimTime::ZERO;
                }
            }
        }

        let mut adverts: Vec<LinkAdvert<T>> = self
            .topology
            .iter()
            .filter(|((origin, _), _)| self.tier_of(origin) == Some(tier))
            .map(|((origin, neighbour), entry)| LinkAdvert {
                origin: origin.clone(),
                neighbour: neighbour.clone(),
                seqno: entry.seqno,
                cost: entry.cost as i64,
            })
            .collect();
        adverts.sort_by(|a, b| (&a.origin, &a.neighbour).cmp(&(&b.origin, &b.neighbour)));

        // the innermost scope doubles as our keep-alive, so it goes out even when empty
        if own || !adverts.is_empty() {
            let mut links: Vec<&Link<T>> = self.links.values().map(|n| &n.link).collect();
            links.sort_by(|a, b| a.addr.cmp(&b.addr));
            let packets: Vec<OutboundPacket<T>> = links
                .into_iter()
                .map(|link| OutboundPacket {
                    itf: link.itf.clone(),
                    dest: link.addr.clone(),
                    payload: Payload::Fisheye(FsrPacket::TopologyUpdate {
                        tier,
                        links: adverts.clone(),
                    }),
                })
                .collect();
            trace!("{} scope {tier}: {} entries to {} neighbours", json!(self.address), adverts.len(), packets.len());
            self.outbound_packets.extend(packets);
        }

        self.timers
            .push(TimerRequest::after(interval, FsrTimer::Scope { tier }));
    }

    /// Ages every entry, expires old ones and detects silent neighbours
    fn housekeeping(&mut self, now: SimTime, rib: &mut dyn Redistribute<T>) {
        let step = self.config.housekeeping_interval;
        let lifetime = self.config.link_lifetime;
        let mut changed = false;

        for ((origin, _), entry) in self.topology.iter_mut() {
            if *origin == self.address && !entry.is_withdrawn() {
                continue; // our live links are refreshed by the scope timer
            }
            entry.age = entry.age.saturating_add(step);
        }

        let mut expired: Vec<(T::NodeAddress, T::NodeAddress)> = self
            .topology
            .iter()
            .filter(|(_, e)| e.age > lifetime)
            .map(|(key, _)| key.clone())
            .collect();
        expired.sort();
        for key in expired {
            if let Some(entry) = self.topology.remove(&key) {
                debug!("{} expired link {} -> {}", json!(self.address), json!(key.0), json!(key.1));
                changed |= !entry.is_withdrawn();
                self.events.push(RoutingEvent::LinkExpired {
                    origin: key.0,
                    neighbour: key.1,
                });
            }
        }

        let timeout = self.config.neighbor_timeout;
        let mut silent: Vec<T::NodeAddress> = self
            .links
            .iter()
            .filter(|(_, n)| n.up && now.saturating_sub(n.last_heard) > timeout)
            .map(|(addr, _)| addr.clone())
            .collect();
        silent.sort();
        for addr in silent {
            warn!("{} lost fisheye neighbour {}", json!(self.address), json!(addr));
            if let Some(n) = self.links.get_mut(&addr) {
                n.up = false;
            }
            self.stamp_own(&addr, INFINITE_COST);
            self.events.push(RoutingEvent::NeighbourLost {
                neighbour: addr,
                protocol: TAG,
            });
            changed = true;
        }

        if changed {
            self.recompute(rib);
        }
    }

    // endregion

    // region Topology

    /// handle a single topology update
    pub fn handle_packet(
        &mut self,
        packet: &FsrPacket<T>,
        itf: &T::InterfaceId,
        sender: &T::NodeAddress,
        now: SimTime,
        rib: &mut dyn Redistribute<T>,
    ) {
        if !self.links.get(sender).is_some_and(|n| n.link.itf == *itf) {
            self.warn(RoutingWarning::UnknownNeighbour {
                neighbour: sender.clone(),
            });
            return;
        }
        let FsrPacket::TopologyUpdate { links: adverts, .. } = packet;

        // one bad entry poisons the whole message, nothing is applied
        for advert in adverts {
            if advert.seqno == SEQNO_OVERFLOW {
                self.warn(RoutingWarning::SequenceOverflow { sender: sender.clone() });
                return;
            }
            if advert.cost < 0 {
                self.warn(RoutingWarning::NegativeCost {
                    sender: sender.clone(),
                    cost: advert.cost,
                });
                return;
            }
        }

        let mut changed = false;
        let revived = match self.links.get_mut(sender) {
            Some(n) => {
                n.last_heard = now;
                let revived = !n.up;
                n.up = true;
                revived.then_some(n.link.cost)
            }
            None => None,
        };
        if let Some(cost) = revived {
            debug!("{} regained fisheye neighbour {}", json!(self.address), json!(sender));
            self.stamp_own(sender, cost);
            changed = true;
        }

        for advert in adverts {
            changed |= self.accept(advert);
        }

        if changed {
            self.recompute(rib);
        }
    }

    /// Applies one advert, returns whether the usable topology changed
    fn accept(&mut self, advert: &LinkAdvert<T>) -> bool {
        if advert.origin == self.address {
            if advert.seqno > self.seqno {
                self.warn(RoutingWarning::DesynchronizedSeqno {
                    old_seqno: self.seqno,
                    new_seqno: advert.seqno,
                });
                self.seqno = advert.seqno;
            }
            return false; // we are the authority on our own links
        }

        let cost = u32::try_from(advert.cost).unwrap_or(INFINITE_COST);
        let key = (advert.origin.clone(), advert.neighbour.clone());
        if let Some(stored) = self.topology.get(&key).map(|e| e.seqno) {
            if advert.seqno <= stored {
                self.noise(RoutingWarning::StaleSequence {
                    origin: advert.origin.clone(),
                    neighbour: advert.neighbour.clone(),
                    seqno: advert.seqno,
                    stored,
                });
                return false;
            }
        }
        let changed = match self.topology.get_mut(&key) {
            Some(entry) => {
                let changed = entry.cost != cost;
                entry.seqno = advert.seqno;
                entry.cost = cost;
                entry.age = SimTime::ZERO;
                changed
            }
            None => {
                if !self.make_room() {
                    return false;
                }
                self.topology.insert(
                    key,
                    TopologyLinkEntry {
                        seqno: advert.seqno,
                        cost,
                        age: SimTime::ZERO,
                    },
                );
                cost != INFINITE_COST
            }
        };
        self.events.push(RoutingEvent::LinkAccepted {
            origin: advert.origin.clone(),
            neighbour: advert.neighbour.clone(),
            seqno: advert.seqno,
        });
        changed
    }

    /// Writes our own entry for a link with a fresh sequence number
    fn stamp_own(&mut self, neighbour: &T::NodeAddress, cost: u32) {
        if !self.bump_seqno() {
            return;
        }
        self.topology.insert(
            (self.address.clone(), neighbour.clone()),
            TopologyLinkEntry {
                seqno: self.seqno,
                cost,
                age: SimTime::ZERO,
            },
        );
    }

    fn bump_seqno(&mut self) -> bool {
        match self.seqno.checked_add(1).filter(|s| *s != SEQNO_OVERFLOW) {
            Some(next) => {
                self.seqno = next;
                true
            }
            None => {
                error!("{} exhausted its sequence number space", json!(self.address));
                self.counters.record(WarningClass::InvariantViolation);
                false
            }
        }
    }

    /// Frees a slot by dropping the oldest foreign entry, returns false when nothing can go
    fn make_room(&mut self) -> bool {
        if self.topology.len() < self.config.max_topology_entries {
            return true;
        }
        let victim = self
            .topology
            .iter()
            .filter(|((origin, _), _)| *origin != self.address)
            .max_by(|(ka, a), (kb, b)| a.age.cmp(&b.age).then_with(|| kb.cmp(ka)))
            .map(|(key, _)| key.clone());
        self.warn(RoutingWarning::TableFull {
            table: "topology table",
            capacity: self.config.max_topology_entries,
        });
        match victim {
            Some(key) => {
                self.topology.remove(&key);
                self.events.push(RoutingEvent::LinkExpired {
                    origin: key.0,
                    neighbour: key.1,
                });
                true
            }
            None => false,
        }
    }

    // endregion

    // region Route Selection

    fn tier_of(&self, node: &T::NodeAddress) -> Option<usize> {
        if *node == self.address {
            Some(self.own_tier())
        } else {
            self.scopes.get(node).map(|s| s.tier)
        }
    }

    /// Dijkstra over the usable entries of the topology table
    pub fn shortest_paths(&self) -> HashMap<T::NodeAddress, PathInfo<T>> {
        let mut adjacency: HashMap<&T::NodeAddress, Vec<(&T::NodeAddress, u32)>> = HashMap::new();
        for ((origin, neighbour), entry) in &self.topology {
            if entry.is_withdrawn() {
                continue;
            }
            if *origin == self.address && !self.links.get(neighbour).is_some_and(|n| n.up) {
                continue;
            }
            adjacency.entry(origin).or_default().push((neighbour, entry.cost));
        }

        let mut paths = HashMap::new();
        let mut settled: HashSet<&T::NodeAddress> = HashSet::new();
        let mut heap = BinaryHeap::new();
        heap.push(Reverse((0u64, 0u32, &self.address, None::<&T::NodeAddress>)));

        while let Some(Reverse((cost, hops, node, first))) = heap.pop() {
            if !settled.insert(node) {
                continue;
            }
            if let Some(via) = first.and_then(|first| self.links.get(first)) {
                paths.insert(
                    node.clone(),
                    PathInfo {
                        next_hop: via.link.addr.clone(),
                        interface: via.link.itf.clone(),
                        cost: cost.min((INFINITE_COST - 1) as u64) as u32,
                        hops,
                    },
                );
            }
            for (next, weight) in adjacency.get(node).into_iter().flatten() {
                if settled.contains(*next) {
                    continue;
                }
                heap.push(Reverse((cost + *weight as u64, hops + 1, *next, first.or(Some(*next)))));
            }
        }
        paths
    }

    /// Recomputes paths, pushes the differences to the RIB and reclassifies scopes
    fn recompute(&mut self, rib: &mut dyn Redistribute<T>) {
        let fresh = self.shortest_paths();

        let mut gone: Vec<T::NodeAddress> = self
            .paths
            .keys()
            .filter(|node| !fresh.contains_key(*node))
            .cloned()
            .collect();
        gone.sort();
        for node in gone {
            debug!("{} can no longer reach {}", json!(self.address), json!(node));
            rib.withdraw(&NetworkDestination::host(node.clone()), TAG);
            if let Some(old) = self.scopes.remove(&node) {
                self.events.push(RoutingEvent::ScopeChanged {
                    node,
                    from: Some(old.tier),
                    to: None,
                });
            }
        }

        let mut reached: Vec<(&T::NodeAddress, &PathInfo<T>)> = fresh.iter().collect();
        reached.sort_by(|a, b| a.0.cmp(b.0));
        for (node, path) in reached {
            // unchanged paths are pushed again so a route the RIB evicted comes back once there is room
            rib.redistribute(
                NetworkDestination::host(node.clone()),
                path.next_hop.clone(),
                path.interface.clone(),
                path.cost,
                TAG,
            );
            let class = ScopeClass::classify(path.hops, &self.config);
            let previous = self.scopes.insert(node.clone(), class);
            if previous.map(|p| p.tier) != Some(class.tier) {
                self.events.push(RoutingEvent::ScopeChanged {
                    node: node.clone(),
                    from: previous.map(|p| p.tier),
                    to: Some(class.tier),
                });
            }
        }

        self.paths = fresh;
    }

    // endregion

    fn warn(&mut self, warning: RoutingWarning<T>) {
        warn!("[fsr {}] {warning}", json!(self.address));
        self.counters.record(warning.class());
        self.events.push(RoutingEvent::Warning(warning));
    }

    /// duplicates are the normal case for fisheye, count them without raising events
    fn noise(&mut self, warning: RoutingWarning<T>) {
        trace!("[fsr {}] {warning}", json!(self.address));
        self.counters.record(warning.class());
    }
}
