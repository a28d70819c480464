use std::fmt::{Display, Formatter};

use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::concepts::destination::NetworkDestination;
use crate::framework::{RoutingSystem, SimTime};

/// Identifies the source of a route. The set is closed, each engine redistributes under its own tag only.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ProtocolTag {
    Static,
    DistanceVector,
    Fisheye,
    /// a routing protocol outside of this crate, injected through the redistribution hook
    External(u16),
}

impl ProtocolTag {
    /// Tags owned by the engines in this crate, which cannot be claimed by external protocols
    pub fn is_internal(&self) -> bool {
        matches!(self, ProtocolTag::DistanceVector | ProtocolTag::Fisheye)
    }
}

impl Display for ProtocolTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolTag::Static => write!(f, "static"),
            ProtocolTag::DistanceVector => write!(f, "dv"),
            ProtocolTag::Fisheye => write!(f, "fsr"),
            ProtocolTag::External(id) => write!(f, "ext-{id}"),
        }
    }
}

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()), Eq)]
#[serde(bound = "")]
pub struct RouteRecord<T: RoutingSystem + ?Sized> {
    pub destination: NetworkDestination<T>,
    /// the neighbour packets for this destination are forwarded to
    pub next_hop: T::NodeAddress,
    /// the egress interface towards the next hop
    pub interface: T::InterfaceId,
    /// protocol specific cost, only comparable between routes with the same tag
    pub metric: u32,
    pub protocol: ProtocolTag,
    /// when this record was last changed
    pub installed_at: SimTime,
}

impl<T: RoutingSystem + ?Sized> RouteRecord<T> {
    /// Whether the forwarding-relevant parts of two records agree
    pub fn same_path(&self, other: &RouteRecord<T>) -> bool {
        self.next_hop == other.next_hop && self.interface == other.interface && self.metric == other.metric
    }
}
