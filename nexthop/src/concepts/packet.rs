use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::concepts::destination::NetworkDestination;
use crate::framework::RoutingSystem;

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub struct VectorEntry<T: RoutingSystem + ?Sized> {
    pub destination: NetworkDestination<T>,
    /// advertised cost, the engine's infinity for an unreachable destination
    pub cost: u32,
}

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub enum DvPacket<T: RoutingSystem + ?Sized> {
    /// the sender's complete table, sent every periodic cycle
    FullVector { entries: Vec<VectorEntry<T>> },
    /// only the entries that changed since the last update, sent after the coalescing window
    TriggeredUpdate { entries: Vec<VectorEntry<T>> },
}

impl<T: RoutingSystem + ?Sized> DvPacket<T> {
    pub fn entries(&self) -> &[VectorEntry<T>] {
        match self {
            DvPacket::FullVector { entries } => entries,
            DvPacket::TriggeredUpdate { entries } => entries,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, DvPacket::FullVector { .. })
    }
}

/// A single link of the topology, as carried on the wire
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub struct LinkAdvert<T: RoutingSystem + ?Sized> {
    pub origin: T::NodeAddress,
    pub neighbour: T::NodeAddress,
    pub seqno: u32,
    /// signed on the wire, negative costs are rejected on receipt
    pub cost: i64,
}

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub enum FsrPacket<T: RoutingSystem + ?Sized> {
    /// topology entries of the scope tier whose timer fired
    TopologyUpdate { tier: usize, links: Vec<LinkAdvert<T>> },
}

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub enum Payload<T: RoutingSystem + ?Sized> {
    DistanceVector(DvPacket<T>),
    Fisheye(FsrPacket<T>),
}

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()))]
#[serde(bound = "")]
pub struct OutboundPacket<T: RoutingSystem + ?Sized> {
    /// send via this interface
    pub itf: T::InterfaceId,
    /// to this neighbour
    pub dest: T::NodeAddress,
    pub payload: Payload<T>,
}
