use std::cmp::Reverse;
use std::collections::HashMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::concepts::destination::NetworkDestination;
use crate::concepts::route::{ProtocolTag, RouteRecord};
use crate::feedback::{Counters, RoutingEvent, RoutingWarning};
use crate::framework::{RibConfig, RoutingSystem, SimTime};

/// Write-only view of the RIB handed to the engines. Engines never read routes back.
pub trait Redistribute<T: RoutingSystem + ?Sized> {
    /// records or updates the candidate route of `protocol` for `destination`
    fn redistribute(
        &mut self,
        destination: NetworkDestination<T>,
        next_hop: T::NodeAddress,
        interface: T::InterfaceId,
        metric: u32,
        protocol: ProtocolTag,
    );
    /// removes the candidate route of `protocol` for `destination`, if any
    fn withdraw(&mut self, destination: &NetworkDestination<T>, protocol: ProtocolTag);
}

/// All candidates for one destination, exactly one of which is active
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct RibSlot<T: RoutingSystem + ?Sized> {
    pub candidates: Vec<RouteRecord<T>>,
    pub active: ProtocolTag,
}

impl<T: RoutingSystem + ?Sized> RibSlot<T> {
    pub fn active_record(&self) -> Option<&RouteRecord<T>> {
        self.candidates.iter().find(|c| c.protocol == self.active)
    }
}

/// Routing Information Base. Arbitrates between the candidates of all protocols by administrative
/// preference, then metric. Changes of the active route are visible as soon as a call returns.
#[serde_as]
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Rib<T: RoutingSystem + ?Sized> {
    pub config: RibConfig,
    #[serde_as(as = "Vec<(_, _)>")]
    routes: HashMap<NetworkDestination<T>, RibSlot<T>>,
    now: SimTime,
    pub counters: Counters,
    #[serde(skip)]
    events: Vec<RoutingEvent<T>>,
}

/// whether `challenger` may displace `incumbent`
fn beats<T: RoutingSystem + ?Sized>(config: &RibConfig, challenger: &RouteRecord<T>, incumbent: &RouteRecord<T>) -> bool {
    let cp = config.preference(challenger.protocol);
    let ip = config.preference(incumbent.protocol);
    cp > ip || (cp == ip && challenger.metric < incumbent.metric)
}

/// picks the winner among all candidates, `incumbent` keeps its place on ties
fn arbitrate<T: RoutingSystem + ?Sized>(config: &RibConfig, slot: &mut RibSlot<T>, incumbent: Option<ProtocolTag>) {
    let mut best: Option<&RouteRecord<T>> = incumbent.and_then(|tag| slot.candidates.iter().find(|c| c.protocol == tag));
    for candidate in &slot.candidates {
        best = match best {
            Some(cur) if !beats(config, candidate, cur) => Some(cur),
            _ => Some(candidate),
        };
    }
    if let Some(best) = best {
        slot.active = best.protocol;
    }
}

impl<T: RoutingSystem + ?Sized> Rib<T> {
    pub fn new(config: RibConfig) -> Self {
        Self {
            config,
            routes: HashMap::new(),
            now: SimTime::ZERO,
            counters: Counters::default(),
            events: Vec::new(),
        }
    }

    /// Sets the timestamp recorded on routes installed from now on
    pub fn advance_clock(&mut self, now: SimTime) {
        self.now = now;
    }

    pub fn lookup(&self, destination: &NetworkDestination<T>) -> Option<RouteRecord<T>> {
        self.routes
            .get(destination)
            .and_then(|slot| slot.active_record())
            .cloned()
    }

    /// Longest-prefix match of an address against the active routes
    pub fn resolve(&self, addr: &T::NodeAddress) -> Option<RouteRecord<T>> {
        self.routes
            .iter()
            .filter(|(dest, _)| dest.contains(addr))
            .max_by_key(|(dest, _)| dest.prefix_len())
            .and_then(|(_, slot)| slot.active_record())
            .cloned()
    }

    /// every active route
    pub fn routes(&self) -> impl Iterator<Item = &RouteRecord<T>> {
        self.routes.values().filter_map(|slot| slot.active_record())
    }

    pub fn candidates(&self, destination: &NetworkDestination<T>) -> &[RouteRecord<T>] {
        self.routes
            .get(destination)
            .map(|slot| slot.candidates.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Withdraws every candidate of one protocol, used when a protocol is shut down
    pub fn withdraw_protocol(&mut self, protocol: ProtocolTag) {
        let mut owned: Vec<NetworkDestination<T>> = self
            .routes
            .iter()
            .filter(|(_, slot)| slot.candidates.iter().any(|c| c.protocol == protocol))
            .map(|(dest, _)| dest.clone())
            .collect();
        owned.sort();
        for destination in owned {
            self.withdraw(&destination, protocol);
        }
    }

    pub fn drain_events(&mut self) -> Vec<RoutingEvent<T>> {
        std::mem::take(&mut self.events)
    }

    /// Makes room for `newcomer` by dropping the least preferred destination. The newcomer is refused
    /// instead when it would not rank strictly above that destination.
    fn evict(&mut self, newcomer: &RouteRecord<T>) -> bool {
        let config = &self.config;
        let victim = self
            .routes
            .iter()
            .filter_map(|(dest, slot)| slot.active_record().map(|r| (dest, r)))
            .min_by_key(|(_, r)| (config.preference(r.protocol), Reverse(r.metric), r.installed_at))
            .map(|(dest, r)| (dest.clone(), r.protocol, (config.preference(r.protocol), Reverse(r.metric))));
        let rank = (config.preference(newcomer.protocol), Reverse(newcomer.metric));

        let warning = RoutingWarning::TableFull {
            table: "RIB",
            capacity: self.config.max_destinations,
        };
        warn!("{warning}");
        self.counters.record(warning.class());
        self.events.push(RoutingEvent::Warning(warning));

        match victim {
            Some((_, _, victim_rank)) if rank <= victim_rank => {
                debug!("refusing {}, the table holds nothing worse", newcomer.destination);
                false
            }
            Some((destination, protocol, _)) => {
                self.routes.remove(&destination);
                self.events.push(RoutingEvent::RouteWithdrawn { destination, protocol });
                true
            }
            None => true,
        }
    }
}

impl<T: RoutingSystem + ?Sized> Redistribute<T> for Rib<T> {
    fn redistribute(
        &mut self,
        destination: NetworkDestination<T>,
        next_hop: T::NodeAddress,
        interface: T::InterfaceId,
        metric: u32,
        protocol: ProtocolTag,
    ) {
        let record = RouteRecord {
            destination: destination.clone(),
            next_hop,
            interface,
            metric,
            protocol,
            installed_at: self.now,
        };

        if !self.routes.contains_key(&destination) {
            if self.routes.len() >= self.config.max_destinations && !self.evict(&record) {
                return;
            }
            debug!("installing {} via {:?} ({protocol}, metric {metric})", destination, record.next_hop);
            self.events.push(RoutingEvent::RouteInstalled { route: record.clone() });
            self.routes.insert(
                destination,
                RibSlot {
                    candidates: vec![record],
                    active: protocol,
                },
            );
            return;
        }

        let config = &self.config;
        let Some(slot) = self.routes.get_mut(&destination) else {
            return;
        };
        let previous = slot.active_record().cloned();

        match slot.candidates.iter_mut().find(|c| c.protocol == protocol) {
            Some(existing) if existing.same_path(&record) => return,
            Some(existing) => *existing = record,
            None => slot.candidates.push(record),
        }

        if slot.active == protocol {
            // our own candidate changed, it may have lost against the others
            arbitrate(config, slot, Some(protocol));
        } else {
            let challenger = slot.candidates.iter().find(|c| c.protocol == protocol);
            if let (Some(challenger), Some(incumbent)) = (challenger, slot.active_record()) {
                if beats(config, challenger, incumbent) {
                    slot.active = protocol;
                }
            }
        }

        if let Some(active) = slot.active_record() {
            let changed = match &previous {
                Some(prev) => prev.protocol != active.protocol || !prev.same_path(active),
                None => true,
            };
            if changed {
                debug!("active route for {} is now via {:?} ({})", destination, active.next_hop, active.protocol);
                self.events.push(RoutingEvent::RouteInstalled { route: active.clone() });
            }
        }
    }

    fn withdraw(&mut self, destination: &NetworkDestination<T>, protocol: ProtocolTag) {
        let config = &self.config;
        let Some(slot) = self.routes.get_mut(destination) else {
            return;
        };
        let Some(pos) = slot.candidates.iter().position(|c| c.protocol == protocol) else {
            return;
        };
        slot.candidates.remove(pos);

        if slot.candidates.is_empty() {
            debug!("withdrawing {} ({protocol})", destination);
            self.routes.remove(destination);
            self.events.push(RoutingEvent::RouteWithdrawn {
                destination: destination.clone(),
                protocol,
            });
        } else if slot.active == protocol {
            arbitrate(config, slot, None);
            if let Some(active) = slot.active_record() {
                debug!("{} fell back to {:?} ({})", destination, active.next_hop, active.protocol);
                self.events.push(RoutingEvent::RouteInstalled { route: active.clone() });
            }
        }
    }
}
