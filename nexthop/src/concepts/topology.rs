use std::time::Duration;

use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::concepts::neighbour::Link;
use crate::framework::{FsrConfig, RoutingSystem, SimTime};

/// Cost of a withdrawn link. Such entries are kept until they expire but never used for paths.
pub const INFINITE_COST: u32 = u32::MAX;
/// Sequence numbers never reach this value, an advert carrying it has overflowed
pub const SEQNO_OVERFLOW: u32 = u32::MAX;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub enum Freshness {
    Fresh,
    /// not refreshed for longer than `stale_after`, still used
    Stale,
    /// older than `link_lifetime`, removed by the next aging sweep
    Expired,
}

#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct TopologyLinkEntry {
    pub seqno: u32,
    pub cost: u32,
    /// time since this entry was last accepted
    pub age: Duration,
}

impl TopologyLinkEntry {
    pub fn is_withdrawn(&self) -> bool {
        self.cost == INFINITE_COST
    }

    pub fn freshness(&self, config: &FsrConfig) -> Freshness {
        if self.age > config.link_lifetime {
            Freshness::Expired
        } else if self.age > config.stale_after {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }
}

/// A configured link of this node, together with its liveness
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()))]
#[serde(bound = "")]
pub struct FsrNeighbour<T: RoutingSystem + ?Sized> {
    pub link: Link<T>,
    pub last_heard: SimTime,
    pub up: bool,
}

/// The fisheye scope a destination currently belongs to
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScopeClass {
    /// index into the configured scope tiers
    pub tier: usize,
    pub hops: u32,
}

impl ScopeClass {
    pub fn classify(hops: u32, config: &FsrConfig) -> Self {
        let tier = config
            .scopes
            .iter()
            .position(|scope| scope.max_hops.map_or(true, |max| hops <= max))
            .unwrap_or(config.scopes.len().saturating_sub(1));
        Self { tier, hops }
    }
}

/// Result of the shortest path computation for one destination node
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()), Eq)]
#[serde(bound = "")]
pub struct PathInfo<T: RoutingSystem + ?Sized> {
    /// the neighbour on the first hop of the path
    pub next_hop: T::NodeAddress,
    pub interface: T::InterfaceId,
    pub cost: u32,
    pub hops: u32,
}
