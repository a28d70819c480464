use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::framework::RoutingSystem;

/// A configured adjacency to a directly connected node
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()), Eq)]
#[serde(bound = "")]
pub struct Link<T: RoutingSystem + ?Sized> {
    /// the local interface the neighbour is reached over, the pair (itf, addr) is unique
    pub itf: T::InterfaceId,
    /// the routing network address of the neighbour
    pub addr: T::NodeAddress,
    /// Direct link-cost to this neighbour. Lower is better, never zero.
    pub cost: u32,
}
