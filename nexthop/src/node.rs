use std::collections::BTreeMap;

use log::{debug, info};
use serde_json::json;

use crate::concepts::destination::NetworkDestination;
use crate::concepts::neighbour::Link;
use crate::concepts::packet::Payload;
use crate::concepts::route::{ProtocolTag, RouteRecord};
use crate::distance_vector::DistanceVector;
use crate::feedback::{RoutingError, RoutingEvent, SendError};
use crate::fisheye::Fisheye;
use crate::framework::{Kernel, NodeConfig, RoutingSystem};
use crate::rib::{Redistribute, Rib};
use crate::timer::{TimerHandle, TimerKind, TimerRegistry};

pub type Observer<T> = Box<dyn FnMut(&RoutingEvent<T>)>;

/// Everything routing-related that lives on one simulated node.
///
/// The kernel drives the node through `on_timer_fire` and `on_message_received`. Each call runs to completion,
/// flushing queued packets and timers to the kernel before it returns.
pub struct Node<T: RoutingSystem + ?Sized> {
    pub address: T::NodeAddress,
    pub config: NodeConfig,
    pub rib: Rib<T>,
    pub distance_vector: Option<DistanceVector<T>>,
    pub fisheye: Option<Fisheye<T>>,
    pub timers: TimerRegistry<T>,
    links: BTreeMap<T::NodeAddress, Link<T>>,
    local_networks: Vec<NetworkDestination<T>>,
    observers: Vec<Observer<T>>,
    started: bool,
}

impl<T: RoutingSystem + ?Sized> Node<T> {
    pub fn new(address: T::NodeAddress, config: NodeConfig) -> Result<Self, RoutingError<T>> {
        config.validate::<T>()?;
        let distance_vector = config
            .distance_vector
            .enabled
            .then(|| DistanceVector::new(address.clone(), config.distance_vector.clone()));
        let fisheye = config
            .fisheye
            .enabled
            .then(|| Fisheye::new(address.clone(), config.fisheye.clone()));
        Ok(Self {
            rib: Rib::new(config.rib.clone()),
            address,
            config,
            distance_vector,
            fisheye,
            timers: TimerRegistry::default(),
            links: BTreeMap::new(),
            local_networks: Vec::new(),
            observers: Vec::new(),
            started: false,
        })
    }

    /// Arms the periodic timers of every enabled protocol
    pub fn start(&mut self, kernel: &mut impl Kernel<T>) {
        if self.started {
            return;
        }
        self.started = true;
        info!("starting routing on {}", json!(self.address));
        self.rib.advance_clock(kernel.now());
        if let Some(dv) = &mut self.distance_vector {
            dv.start();
        }
        if let Some(fsr) = &mut self.fisheye {
            fsr.start();
        }
        self.flush(kernel);
    }

    /// Registers an observer for route and topology events
    pub fn subscribe(&mut self, observer: Observer<T>) {
        self.observers.push(observer);
    }

    pub fn lookup(&self, destination: &NetworkDestination<T>) -> Option<RouteRecord<T>> {
        self.rib.lookup(destination)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link<T>> {
        self.links.values()
    }

    // region Topology

    pub fn add_link(&mut self, itf: T::InterfaceId, neighbour: T::NodeAddress, cost: u32, kernel: &mut impl Kernel<T>) {
        let now = kernel.now();
        self.rib.advance_clock(now);
        let link = Link {
            itf,
            addr: neighbour.clone(),
            cost,
        };
        self.links.insert(neighbour, link.clone());
        if let Some(dv) = &mut self.distance_vector {
            dv.add_link(link.clone());
        }
        if let Some(fsr) = &mut self.fisheye {
            fsr.add_link(link, now, &mut self.rib);
        }
        self.flush(kernel);
    }

    pub fn set_link_cost(
        &mut self,
        neighbour: &T::NodeAddress,
        cost: u32,
        kernel: &mut impl Kernel<T>,
    ) -> Result<(), RoutingError<T>> {
        let now = kernel.now();
        self.rib.advance_clock(now);
        let Some(link) = self.links.get_mut(neighbour) else {
            return Err(RoutingError::UnknownLink {
                neighbour: neighbour.clone(),
            });
        };
        link.cost = cost.max(1);
        if let Some(dv) = &mut self.distance_vector {
            dv.set_link_cost(neighbour, cost, now, &mut self.rib);
        }
        if let Some(fsr) = &mut self.fisheye {
            fsr.set_link_cost(neighbour, cost, &mut self.rib);
        }
        self.flush(kernel);
        Ok(())
    }

    pub fn remove_link(&mut self, neighbour: &T::NodeAddress, kernel: &mut impl Kernel<T>) {
        let now = kernel.now();
        self.rib.advance_clock(now);
        if self.links.remove(neighbour).is_none() {
            return;
        }
        if let Some(dv) = &mut self.distance_vector {
            dv.remove_link(neighbour, now, &mut self.rib);
        }
        if let Some(fsr) = &mut self.fisheye {
            fsr.remove_link(neighbour, &mut self.rib);
        }
        self.flush(kernel);
    }

    /// Attaches a network to this node, advertised by the distance-vector engine at cost 0
    pub fn add_local_network(
        &mut self,
        destination: NetworkDestination<T>,
        kernel: &mut impl Kernel<T>,
    ) -> Result<(), RoutingError<T>> {
        if !destination.is_canonical() {
            return Err(RoutingError::MalformedDestination { destination });
        }
        let now = kernel.now();
        self.rib.advance_clock(now);
        if !self.local_networks.contains(&destination) {
            self.local_networks.push(destination.clone());
        }
        if let Some(dv) = &mut self.distance_vector {
            dv.add_local_network(destination, now, &mut self.rib);
        }
        self.flush(kernel);
        Ok(())
    }

    /// Turns a protocol on or off at runtime. Turning one off withdraws all of its routes.
    pub fn set_protocol_enabled(&mut self, protocol: ProtocolTag, enabled: bool, kernel: &mut impl Kernel<T>) {
        let now = kernel.now();
        self.rib.advance_clock(now);
        match (protocol, enabled) {
            (ProtocolTag::DistanceVector, false) => {
                if self.distance_vector.take().is_some() {
                    self.shutdown(protocol);
                }
            }
            (ProtocolTag::Fisheye, false) => {
                if self.fisheye.take().is_some() {
                    self.shutdown(protocol);
                }
            }
            (ProtocolTag::DistanceVector, true) if self.distance_vector.is_none() => {
                let mut dv = DistanceVector::new(self.address.clone(), self.config.distance_vector.clone());
                for link in self.links.values() {
                    dv.add_link(link.clone());
                }
                for network in &self.local_networks {
                    dv.add_local_network(network.clone(), now, &mut self.rib);
                }
                if self.started {
                    dv.start();
                }
                self.distance_vector = Some(dv);
            }
            (ProtocolTag::Fisheye, true) if self.fisheye.is_none() => {
                let mut fsr = Fisheye::new(self.address.clone(), self.config.fisheye.clone());
                for link in self.links.values() {
                    fsr.add_link(link.clone(), now, &mut self.rib);
                }
                if self.started {
                    fsr.start();
                }
                self.fisheye = Some(fsr);
            }
            _ => {}
        }
        self.flush(kernel);
    }

    fn shutdown(&mut self, protocol: ProtocolTag) {
        let cancelled = self.timers.cancel_protocol(protocol);
        debug!("{} disabled {protocol}, cancelled {cancelled} timers", json!(self.address));
        self.rib.withdraw_protocol(protocol);
    }

    // endregion

    // region Redistribution

    /// Folds a route computed by another routing protocol into RIB arbitration
    pub fn redistribute_external(
        &mut self,
        destination: NetworkDestination<T>,
        next_hop: T::NodeAddress,
        interface: T::InterfaceId,
        metric: u32,
        protocol: ProtocolTag,
        kernel: &mut impl Kernel<T>,
    ) -> Result<(), RoutingError<T>> {
        if protocol.is_internal() {
            return Err(RoutingError::ReservedProtocolTag { tag: protocol });
        }
        if !destination.is_canonical() {
            return Err(RoutingError::MalformedDestination { destination });
        }
        self.rib.advance_clock(kernel.now());
        self.rib.redistribute(destination, next_hop, interface, metric, protocol);
        self.flush(kernel);
        Ok(())
    }

    pub fn withdraw_external(
        &mut self,
        destination: &NetworkDestination<T>,
        protocol: ProtocolTag,
        kernel: &mut impl Kernel<T>,
    ) -> Result<(), RoutingError<T>> {
        if protocol.is_internal() {
            return Err(RoutingError::ReservedProtocolTag { tag: protocol });
        }
        self.rib.advance_clock(kernel.now());
        self.rib.withdraw(destination, protocol);
        self.flush(kernel);
        Ok(())
    }

    // endregion

    // region Kernel Events

    pub fn on_timer_fire(&mut self, handle: TimerHandle, kernel: &mut impl Kernel<T>) {
        let Some(kind) = self.timers.take(handle) else {
            return; // cancelled, or delivered twice
        };
        let now = kernel.now();
        self.rib.advance_clock(now);
        match kind {
            TimerKind::DistanceVector(timer) => {
                if let Some(dv) = &mut self.distance_vector {
                    dv.handle_timer(timer, now, &mut self.rib);
                }
            }
            TimerKind::Fisheye(timer) => {
                if let Some(fsr) = &mut self.fisheye {
                    fsr.handle_timer(timer, now, &mut self.rib);
                }
            }
        }
        self.flush(kernel);
    }

    pub fn on_message_received(
        &mut self,
        itf: &T::InterfaceId,
        sender: &T::NodeAddress,
        payload: &Payload<T>,
        kernel: &mut impl Kernel<T>,
    ) {
        let now = kernel.now();
        self.rib.advance_clock(now);
        match payload {
            Payload::DistanceVector(packet) => {
                if let Some(dv) = &mut self.distance_vector {
                    dv.handle_packet(packet, itf, sender, now, &mut self.rib);
                }
            }
            Payload::Fisheye(packet) => {
                if let Some(fsr) = &mut self.fisheye {
                    fsr.handle_packet(packet, itf, sender, now, &mut self.rib);
                }
            }
        }
        self.flush(kernel);
    }

    /// Reports a message the kernel accepted earlier but could not deliver
    pub fn on_send_failed(&mut self, neighbour: &T::NodeAddress, payload: &Payload<T>, error: SendError) {
        self.send_failed(neighbour, payload, error);
        self.notify();
    }

    fn send_failed(&mut self, neighbour: &T::NodeAddress, payload: &Payload<T>, error: SendError) {
        match payload {
            Payload::DistanceVector(_) => {
                if let Some(dv) = &mut self.distance_vector {
                    dv.on_send_failed(neighbour, error);
                }
            }
            Payload::Fisheye(_) => {
                if let Some(fsr) = &mut self.fisheye {
                    fsr.on_send_failed(neighbour, error);
                }
            }
        }
    }

    // endregion

    /// Hands everything the engines queued during this event to the kernel and the observers
    fn flush(&mut self, kernel: &mut impl Kernel<T>) {
        let mut timers = Vec::new();
        let mut packets = Vec::new();
        if let Some(dv) = &mut self.distance_vector {
            timers.extend(dv.timers.drain(..).map(|t| (t.delay, TimerKind::DistanceVector(t.kind))));
            packets.append(&mut dv.outbound_packets);
        }
        if let Some(fsr) = &mut self.fisheye {
            timers.extend(fsr.timers.drain(..).map(|t| (t.delay, TimerKind::Fisheye(t.kind))));
            packets.append(&mut fsr.outbound_packets);
        }

        for (delay, kind) in timers {
            self.timers.schedule(&self.address, delay, kind, kernel);
        }
        for packet in packets {
            let result = kernel.send_message(&self.address, &packet.itf, &packet.dest, packet.payload.clone());
            if let Err(error) = result {
                self.send_failed(&packet.dest, &packet.payload, error);
            }
        }
        self.notify();
    }

    fn notify(&mut self) {
        let mut events = self.rib.drain_events();
        if let Some(dv) = &mut self.distance_vector {
            events.append(&mut dv.events);
        }
        if let Some(fsr) = &mut self.fisheye {
            events.append(&mut fsr.events);
        }
        for event in &events {
            for observer in &mut self.observers {
                observer(event);
            }
        }
    }
}
