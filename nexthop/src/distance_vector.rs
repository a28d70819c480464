use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use log::{debug, warn};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::serde_as;

use crate::concepts::destination::NetworkDestination;
use crate::concepts::neighbour::Link;
use crate::concepts::packet::{DvPacket, OutboundPacket, Payload, VectorEntry};
use crate::concepts::route::ProtocolTag;
use crate::concepts::vector::{DistanceVectorEntry, EntryState, NeighborVector};
use crate::feedback::{Counters, RoutingEvent, RoutingWarning, SendError};
use crate::framework::{DvConfig, RoutingSystem, SimTime, SplitHorizon};
use crate::rib::Redistribute;
use crate::timer::{DvTimer, TimerRequest};
use crate::util::{jittered, seeded_rng, sum_inf, unseeded_rng, up_to};

const TAG: ProtocolTag = ProtocolTag::DistanceVector;

/// Bellman-Ford distance-vector engine with split horizon, triggered updates and hold-down.
#[serde_as]
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct DistanceVector<T: RoutingSystem + ?Sized> {
    pub address: T::NodeAddress,
    pub config: DvConfig,
    #[serde_as(as = "Vec<(_, _)>")]
    pub routes: HashMap<NetworkDestination<T>, DistanceVectorEntry<T>>,
    #[serde_as(as = "Vec<(_, _)>")]
    pub neighbours: HashMap<T::NodeAddress, NeighborVector<T>>,
    pub outbound_packets: Vec<OutboundPacket<T>>,
    #[serde(skip)]
    pub timers: Vec<TimerRequest<DvTimer<T>>>,
    #[serde(skip)]
    pub events: Vec<RoutingEvent<T>>,
    pub counters: Counters,
    triggered_pending: bool,
    /// last epoch handed out to an entry
    last_epoch: u64,
    #[serde(skip, default = "unseeded_rng")]
    rng: StdRng,
}

/// What a single received advertisement does to our entry
enum Verdict {
    Ignore,
    /// same next hop, same cost
    Refresh,
    Learn(u32),
    /// same next hop, new cost
    Update(u32),
    /// strictly better route through a different neighbour
    Switch(u32),
    Invalidate,
    /// an invalid entry becomes usable again
    Revive(u32),
}

impl<T: RoutingSystem + ?Sized> DistanceVector<T> {
    pub fn new(address: T::NodeAddress, config: DvConfig) -> Self {
        let mut hasher = DefaultHasher::new();
        address.hash(&mut hasher);
        let rng = seeded_rng(config.seed ^ hasher.finish());

        let mut routes = HashMap::new();
        routes.insert(
            NetworkDestination::host(address.clone()),
            DistanceVectorEntry::local(SimTime::ZERO, 0),
        );
        Self {
            address,
            config,
            routes,
            neighbours: HashMap::new(),
            outbound_packets: Vec::new(),
            timers: Vec::new(),
            events: Vec::new(),
            counters: Counters::default(),
            triggered_pending: false,
            last_epoch: 0,
            rng,
        }
    }

    /// Schedules the first periodic update, staggered to avoid synchronisation between nodes
    pub fn start(&mut self) {
        let delay = up_to(&mut self.rng, self.config.periodic_jitter);
        self.timers.push(TimerRequest::after(delay, DvTimer::Periodic));
    }

    // region Interface

    pub fn cost_to(&self, destination: &NetworkDestination<T>) -> Option<u32> {
        self.routes
            .get(destination)
            .filter(|e| e.is_valid())
            .map(|e| e.cost)
    }

    pub fn next_hop_to(&self, destination: &NetworkDestination<T>) -> Option<&T::NodeAddress> {
        self.routes
            .get(destination)
            .filter(|e| e.is_valid())
            .and_then(|e| e.next_hop.as_ref())
    }

    /// Advertises a network attached to this node at cost 0
    pub fn add_local_network(&mut self, destination: NetworkDestination<T>, now: SimTime, rib: &mut dyn Redistribute<T>) {
        if let Some(prev) = self.routes.get(&destination) {
            if prev.is_local() {
                return;
            }
            if prev.is_valid() {
                rib.withdraw(&destination, TAG);
            }
        }
        let epoch = self.next_epoch();
        self.routes.insert(destination, DistanceVectorEntry::local(now, epoch));
        self.schedule_triggered();
    }

    pub fn add_link(&mut self, mut link: Link<T>) {
        if link.cost == 0 {
            self.warn(RoutingWarning::MetricIsZero {
                neighbour: link.addr.clone(),
            });
            link.cost = 1;
        }
        let addr = link.addr.clone();
        self.neighbours.insert(addr, NeighborVector::new(link));
    }

    /// Changes the cost of a link and re-evaluates every destination heard over it
    pub fn set_link_cost(&mut self, neighbour: &T::NodeAddress, cost: u32, now: SimTime, rib: &mut dyn Redistribute<T>) {
        let cost = if cost == 0 {
            self.warn(RoutingWarning::MetricIsZero {
                neighbour: neighbour.clone(),
            });
            1
        } else {
            cost
        };
        let Some(nv) = self.neighbours.get_mut(neighbour) else {
            return;
        };
        nv.link.cost = cost;
        let link = nv.link.clone();
        let heard: Vec<(NetworkDestination<T>, u32)> = nv.costs.iter().map(|(d, c)| (d.clone(), *c)).collect();

        for (destination, advertised) in &heard {
            self.consider(&link, destination, *advertised, now, rib);
        }
        // a more expensive link may leave a cheaper path through another neighbour
        for (destination, _) in heard {
            self.reevaluate(&destination, now, rib);
        }
        self.schedule_triggered();
    }

    pub fn remove_link(&mut self, neighbour: &T::NodeAddress, now: SimTime, rib: &mut dyn Redistribute<T>) {
        if self.neighbours.remove(neighbour).is_none() {
            return;
        }
        self.invalidate_via(neighbour, now, rib);
        self.schedule_triggered();
    }

    pub fn on_send_failed(&mut self, neighbour: &T::NodeAddress, error: SendError) {
        // the next periodic update resends the full vector anyway
        self.warn(RoutingWarning::SendFailed {
            neighbour: neighbour.clone(),
            error,
        });
    }

    // endregion

    // region Timers

    pub fn handle_timer(&mut self, timer: DvTimer<T>, now: SimTime, rib: &mut dyn Redistribute<T>) {
        match timer {
            DvTimer::Periodic => {
                self.broadcast_vector(false);
                for entry in self.routes.values_mut() {
                    entry.changed = false;
                }
                let delay = jittered(&mut self.rng, self.config.periodic_interval, self.config.periodic_jitter);
                self.timers.push(TimerRequest::after(delay, DvTimer::Periodic));
            }
            DvTimer::Triggered => {
                self.triggered_pending = false;
                if self.routes.values().any(|e| e.changed) {
                    self.broadcast_vector(true);
                    for entry in self.routes.values_mut() {
                        entry.changed = false;
                    }
                }
            }
            DvTimer::NeighbourTimeout { neighbour } => self.check_neighbour(&neighbour, now, rib),
            DvTimer::HoldDown { destination, epoch } => {
                let expired = matches!(self.routes.get(&destination), Some(e) if e.epoch == epoch && !e.is_valid());
                if expired {
                    if let Some(entry) = self.routes.get_mut(&destination) {
                        entry.held_down_until = None;
                    }
                    self.reevaluate(&destination, now, rib);
                }
            }
            DvTimer::Garbage { destination, epoch } => {
                let collectable = matches!(self.routes.get(&destination), Some(e) if e.epoch == epoch && !e.is_valid());
                if collectable {
                    debug!("{} removed after garbage collection", destination);
                    self.routes.remove(&destination);
                }
            }
        }
        self.schedule_triggered();
    }

    fn schedule_triggered(&mut self) {
        if !self.triggered_pending && self.routes.values().any(|e| e.changed) {
            self.triggered_pending = true;
            self.timers
                .push(TimerRequest::after(self.config.triggered_delay, DvTimer::Triggered));
        }
    }

    fn check_neighbour(&mut self, neighbour: &T::NodeAddress, now: SimTime, rib: &mut dyn Redistribute<T>) {
        let timeout = self.config.neighbour_timeout();
        let Some(nv) = self.neighbours.get_mut(neighbour) else {
            return; // link was removed
        };
        nv.timeout_armed = false;
        let Some(last) = nv.received_at else {
            return;
        };
        let deadline = last.saturating_add(timeout);
        if now < deadline {
            nv.timeout_armed = true;
            self.timers.push(TimerRequest::after(
                deadline - now,
                DvTimer::NeighbourTimeout {
                    neighbour: neighbour.clone(),
                },
            ));
            return;
        }

        warn!("Neighbour {} has been silent for {:?}", json!(neighbour), timeout);
        nv.received_at = None;
        nv.costs.clear();
        self.events.push(RoutingEvent::NeighbourLost {
            neighbour: neighbour.clone(),
            protocol: TAG,
        });
        self.invalidate_via(neighbour, now, rib);
    }

    // endregion

    // region Route Selection

    /// handle a single packet
    pub fn handle_packet(
        &mut self,
        packet: &DvPacket<T>,
        itf: &T::InterfaceId,
        sender: &T::NodeAddress,
        now: SimTime,
        rib: &mut dyn Redistribute<T>,
    ) {
        let infinity = self.config.infinity;
        let timeout = self.config.neighbour_timeout();
        if !self.neighbours.get(sender).is_some_and(|nv| nv.link.itf == *itf) {
            self.warn(RoutingWarning::UnknownNeighbour {
                neighbour: sender.clone(),
            });
            return;
        }
        let Some(nv) = self.neighbours.get_mut(sender) else {
            return;
        };

        nv.received_at = Some(now);
        let arm = !nv.timeout_armed;
        nv.timeout_armed = true;
        let link = nv.link.clone();

        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        let mut dropped = Vec::new();
        for entry in packet.entries() {
            if entry.cost > infinity || !entry.destination.is_canonical() {
                dropped.push(RoutingWarning::MalformedEntry {
                    neighbour: sender.clone(),
                    destination: entry.destination.clone(),
                });
            } else if !seen.insert(entry.destination.clone()) {
                dropped.push(RoutingWarning::DuplicateEntry {
                    neighbour: sender.clone(),
                    destination: entry.destination.clone(),
                });
            } else {
                accepted.push(entry);
            }
        }

        if packet.is_full() {
            nv.costs.clear();
        }
        for entry in &accepted {
            nv.costs.insert(entry.destination.clone(), entry.cost);
        }

        if arm {
            self.timers.push(TimerRequest::after(
                timeout,
                DvTimer::NeighbourTimeout {
                    neighbour: sender.clone(),
                },
            ));
        }
        for warning in dropped {
            self.warn(warning);
        }

        for entry in accepted {
            self.consider(&link, &entry.destination, entry.cost, now, rib);
        }

        if packet.is_full() {
            // our next hop no longer lists these at all
            let missing: Vec<NetworkDestination<T>> = self
                .routes
                .iter()
                .filter(|(dest, e)| e.is_valid() && e.routes_via(sender) && !seen.contains(*dest))
                .map(|(dest, _)| dest.clone())
                .collect();
            for destination in missing {
                self.consider(&link, &destination, infinity, now, rib);
            }
        }

        self.schedule_triggered();
    }

    fn judge(&self, link: &Link<T>, destination: &NetworkDestination<T>, advertised: u32, now: SimTime) -> Verdict {
        let infinity = self.config.infinity;
        let candidate = sum_inf(advertised, link.cost, infinity);

        let Some(entry) = self.routes.get(destination) else {
            return if candidate < infinity {
                Verdict::Learn(candidate)
            } else {
                Verdict::Ignore
            };
        };
        if entry.is_local() {
            return Verdict::Ignore;
        }
        let from_next_hop = entry.routes_via(&link.addr);

        match entry.state {
            EntryState::Valid if from_next_hop => {
                // always listen to the current next hop, even when it got worse
                if candidate >= infinity {
                    Verdict::Invalidate
                } else if candidate != entry.cost {
                    Verdict::Update(candidate)
                } else {
                    Verdict::Refresh
                }
            }
            EntryState::Valid if candidate < entry.cost => Verdict::Switch(candidate),
            EntryState::Valid => Verdict::Ignore,
            EntryState::Invalid if candidate >= infinity => Verdict::Ignore,
            EntryState::Invalid => {
                let held = entry.held_cost.unwrap_or(infinity);
                if entry.is_held_down(now) && candidate > held {
                    Verdict::Ignore
                } else {
                    Verdict::Revive(candidate)
                }
            }
        }
    }

    /// Applies a single (destination, advertised cost) pair heard over `link`
    fn consider(
        &mut self,
        link: &Link<T>,
        destination: &NetworkDestination<T>,
        advertised: u32,
        now: SimTime,
        rib: &mut dyn Redistribute<T>,
    ) {
        match self.judge(link, destination, advertised, now) {
            Verdict::Ignore => {}
            Verdict::Refresh => {
                if let Some(entry) = self.routes.get_mut(destination) {
                    entry.updated = now;
                    // a no-op unless the RIB evicted the route
                    rib.redistribute(destination.clone(), link.addr.clone(), link.itf.clone(), entry.cost, TAG);
                }
            }
            Verdict::Learn(cost) => {
                if !self.make_room() {
                    return;
                }
                debug!(
                    "{} learned {} via {} at cost {cost}",
                    json!(self.address),
                    destination,
                    json!(link.addr)
                );
                let epoch = self.next_epoch();
                self.routes
                    .insert(destination.clone(), DistanceVectorEntry::learned(link, cost, now, epoch));
                rib.redistribute(destination.clone(), link.addr.clone(), link.itf.clone(), cost, TAG);
            }
            Verdict::Update(cost) | Verdict::Switch(cost) | Verdict::Revive(cost) => {
                let epoch = self.next_epoch();
                let Some(entry) = self.routes.get_mut(destination) else {
                    return;
                };
                if entry.state == EntryState::Invalid {
                    // outstanding hold-down and garbage timers no longer apply
                    entry.epoch = epoch;
                }
                entry.cost = cost;
                entry.next_hop = Some(link.addr.clone());
                entry.interface = Some(link.itf.clone());
                entry.state = EntryState::Valid;
                entry.held_down_until = None;
                entry.held_cost = None;
                entry.updated = now;
                entry.changed = true;
                rib.redistribute(destination.clone(), link.addr.clone(), link.itf.clone(), cost, TAG);
            }
            Verdict::Invalidate => self.invalidate(destination, now, rib),
        }
    }

    /// Marks a destination unreachable, withdraws it and starts hold-down and garbage collection
    fn invalidate(&mut self, destination: &NetworkDestination<T>, now: SimTime, rib: &mut dyn Redistribute<T>) {
        let infinity = self.config.infinity;
        let hold_down = self.config.hold_down;
        if !matches!(self.routes.get(destination), Some(e) if e.is_valid() && !e.is_local()) {
            return;
        }
        let epoch = self.next_epoch();
        let Some(entry) = self.routes.get_mut(destination) else {
            return;
        };
        debug!("{} lost {}", json!(self.address), destination);
        entry.state = EntryState::Invalid;
        entry.held_cost = Some(entry.cost);
        entry.cost = infinity;
        entry.updated = now;
        entry.changed = true;
        entry.epoch = epoch;
        entry.held_down_until = if hold_down.is_zero() { None } else { Some(now.saturating_add(hold_down)) };

        rib.withdraw(destination, TAG);
        self.timers.push(TimerRequest::after(
            self.config.gc_interval,
            DvTimer::Garbage {
                destination: destination.clone(),
                epoch,
            },
        ));
        if hold_down.is_zero() {
            self.reevaluate(destination, now, rib);
        } else {
            self.timers.push(TimerRequest::after(
                hold_down,
                DvTimer::HoldDown {
                    destination: destination.clone(),
                    epoch,
                },
            ));
        }
    }

    fn invalidate_via(&mut self, neighbour: &T::NodeAddress, now: SimTime, rib: &mut dyn Redistribute<T>) {
        let affected: Vec<NetworkDestination<T>> = self
            .routes
            .iter()
            .filter(|(_, e)| e.is_valid() && e.routes_via(neighbour))
            .map(|(dest, _)| dest.clone())
            .collect();
        for destination in affected {
            self.invalidate(&destination, now, rib);
        }
    }

    /// Picks the best alternative for an invalid destination from the vectors we already hold
    fn reevaluate(&mut self, destination: &NetworkDestination<T>, now: SimTime, rib: &mut dyn Redistribute<T>) {
        let infinity = self.config.infinity;
        let best = self
            .neighbours
            .values()
            .filter(|nv| nv.received_at.is_some())
            .filter_map(|nv| {
                nv.costs
                    .get(destination)
                    .map(|adv| (sum_inf(*adv, nv.link.cost, infinity), nv.link.clone()))
            })
            .filter(|(cost, _)| *cost < infinity)
            .min_by(|(ca, la), (cb, lb)| ca.cmp(cb).then_with(|| la.addr.cmp(&lb.addr)));

        if let Some((cost, link)) = best {
            let advertised = cost - link.cost;
            self.consider(&link, destination, advertised, now, rib);
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.last_epoch += 1;
        self.last_epoch
    }

    /// Frees a slot for a new destination, returns false when the table stays full
    fn make_room(&mut self) -> bool {
        if self.routes.len() < self.config.max_entries {
            return true;
        }
        let victim = self
            .routes
            .iter()
            .filter(|(_, e)| !e.is_valid())
            .min_by_key(|(_, e)| e.updated)
            .map(|(dest, _)| dest.clone());
        self.warn(RoutingWarning::TableFull {
            table: "distance vector table",
            capacity: self.config.max_entries,
        });
        match victim {
            Some(dest) => {
                self.routes.remove(&dest);
                true
            }
            None => false,
        }
    }

    // endregion

    // region Advertisement

    /// the vector as seen by `neighbour`, with split horizon applied
    fn vector_for(&self, neighbour: &T::NodeAddress, only_changed: bool) -> Vec<VectorEntry<T>> {
        let infinity = self.config.infinity;
        let mut entries: Vec<VectorEntry<T>> = Vec::new();
        for (destination, entry) in &self.routes {
            if only_changed && !entry.changed {
                continue;
            }
            let mut cost = if entry.is_valid() { entry.cost } else { infinity };
            if entry.routes_via(neighbour) {
                match self.config.split_horizon {
                    SplitHorizon::Disabled => {}
                    SplitHorizon::Simple => continue,
                    SplitHorizon::PoisonReverse => cost = infinity,
                }
            }
            entries.push(VectorEntry {
                destination: destination.clone(),
                cost,
            });
        }
        entries.sort_by(|a, b| a.destination.cmp(&b.destination));
        entries
    }

    fn broadcast_vector(&mut self, only_changed: bool) {
        let mut links: Vec<Link<T>> = self.neighbours.values().map(|nv| nv.link.clone()).collect();
        links.sort_by(|a, b| a.addr.cmp(&b.addr));
        for link in links {
            let entries = self.vector_for(&link.addr, only_changed);
            let packet = if only_changed {
                if entries.is_empty() {
                    continue;
                }
                DvPacket::TriggeredUpdate { entries }
            } else {
                DvPacket::FullVector { entries }
            };
            self.outbound_packets.push(OutboundPacket {
                itf: link.itf,
                dest: link.addr,
                payload: Payload::DistanceVector(packet),
            });
        }
    }

    // endregion

    fn warn(&mut self, warning: RoutingWarning<T>) {
        warn!("[dv {}] {warning}", json!(self.address));
        self.counters.record(warning.class());
        self.events.push(RoutingEvent::Warning(warning));
    }
}
