use std::collections::HashMap;

use educe::Educe;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::concepts::destination::NetworkDestination;
use crate::concepts::neighbour::Link;
use crate::framework::{RoutingSystem, SimTime};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryState {
    /// reachable below infinity
    Valid,
    /// at infinity, kept until the garbage collection timer removes it
    Invalid,
}

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()))]
#[serde(bound = "")]
pub struct DistanceVectorEntry<T: RoutingSystem + ?Sized> {
    pub cost: u32,
    /// `None` for destinations attached to this node
    pub next_hop: Option<T::NodeAddress>,
    pub interface: Option<T::InterfaceId>,
    pub updated: SimTime,
    pub state: EntryState,
    /// finite updates that are worse than `held_cost` are ignored until this deadline
    pub held_down_until: Option<SimTime>,
    /// the cost the entry had before it was invalidated
    pub held_cost: Option<u32>,
    /// pending inclusion in the next triggered update
    pub changed: bool,
    /// replaced whenever the entry's timers become irrelevant, drawn from the engine's counter so a
    /// re-created entry never matches timers left behind by an earlier one
    pub epoch: u64,
}

impl<T: RoutingSystem + ?Sized> DistanceVectorEntry<T> {
    pub fn local(now: SimTime, epoch: u64) -> Self {
        Self {
            cost: 0,
            next_hop: None,
            interface: None,
            updated: now,
            state: EntryState::Valid,
            held_down_until: None,
            held_cost: None,
            changed: true,
            epoch,
        }
    }

    pub fn learned(link: &Link<T>, cost: u32, now: SimTime, epoch: u64) -> Self {
        Self {
            cost,
            next_hop: Some(link.addr.clone()),
            interface: Some(link.itf.clone()),
            updated: now,
            state: EntryState::Valid,
            held_down_until: None,
            held_cost: None,
            changed: true,
            epoch,
        }
    }

    pub fn is_local(&self) -> bool {
        self.next_hop.is_none()
    }

    pub fn is_valid(&self) -> bool {
        self.state == EntryState::Valid
    }

    pub fn is_held_down(&self, now: SimTime) -> bool {
        matches!(self.held_down_until, Some(until) if now < until)
    }

    pub fn routes_via(&self, neighbour: &T::NodeAddress) -> bool {
        self.next_hop.as_ref() == Some(neighbour)
    }
}

/// The last vector heard from one neighbour
#[serde_as]
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()))]
#[serde(bound = "")]
pub struct NeighborVector<T: RoutingSystem + ?Sized> {
    pub link: Link<T>,
    /// advertised cost per destination, before adding the link cost
    #[serde_as(as = "Vec<(_, _)>")]
    pub costs: HashMap<NetworkDestination<T>, u32>,
    /// `None` until the first vector arrives, or after the neighbour went silent
    pub received_at: Option<SimTime>,
    /// whether a silence timer is outstanding for this neighbour
    pub timeout_armed: bool,
}

impl<T: RoutingSystem + ?Sized> NeighborVector<T> {
    pub fn new(link: Link<T>) -> Self {
        Self {
            link,
            costs: HashMap::new(),
            received_at: None,
            timeout_armed: false,
        }
    }
}
