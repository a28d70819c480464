use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::concepts::destination::NetworkDestination;
use crate::concepts::packet::Payload;
use crate::concepts::route::ProtocolTag;
use crate::feedback::{RoutingError, SendError};
use crate::timer::TimerHandle;

/// Simulated time, measured from the start of the simulation.
pub type SimTime = Duration;

pub trait RoutingSystem {
    /// Address of a node (and of a network, together with a mask). MUST be globally unique per node.
    type NodeAddress: Ord + PartialOrd + RootData + RootKey;
    /// Local identifier of one of the node's interfaces
    type InterfaceId: Ord + PartialOrd + RootData + RootKey;

    /// The mask that turns an address into a host destination
    fn host_mask() -> Self::NodeAddress;

    /// Whether `addr` falls inside `network`. The default only matches the network address itself.
    fn contains(network: &NetworkDestination<Self>, addr: &Self::NodeAddress) -> bool {
        network.address == *addr
    }

    /// Number of significant bits in a mask, used for longest-prefix matching
    fn prefix_len(_mask: &Self::NodeAddress) -> u32 {
        0
    }

    /// Whether the destination is well formed, e.g. carries no host bits outside of its mask
    fn is_canonical(_destination: &NetworkDestination<Self>) -> bool {
        true
    }
}

pub trait RootData: Clone + Debug + Serialize + DeserializeOwned + Sized {}
pub trait RootKey: Eq + PartialEq + Hash {}
impl<T: Eq + PartialEq + Hash> RootKey for T {}
impl<T: Clone + Debug + Serialize + DeserializeOwned + Sized> RootData for T {}

/// The discrete-event kernel hosting the node. Every call is non-blocking.
pub trait Kernel<T: RoutingSystem + ?Sized> {
    /// Current simulated time
    fn now(&self) -> SimTime;
    /// Deliver `handle` back to `node` through `Node::on_timer_fire` after `delay`
    fn schedule_timer(&mut self, node: &T::NodeAddress, delay: Duration, handle: TimerHandle);
    /// Transmit a control message from `node` to its neighbour over `itf`
    fn send_message(
        &mut self,
        node: &T::NodeAddress,
        itf: &T::InterfaceId,
        neighbour: &T::NodeAddress,
        payload: Payload<T>,
    ) -> Result<(), SendError>;
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum SplitHorizon {
    /// advertise every destination to every neighbour
    Disabled,
    /// omit destinations routed through the receiving neighbour
    Simple,
    /// advertise destinations routed through the receiving neighbour at infinity
    #[default]
    PoisonReverse,
}

#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DvConfig {
    pub enabled: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub periodic_interval: Duration,
    /// the periodic interval is drawn uniformly from `periodic_interval ± periodic_jitter`
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub periodic_jitter: Duration,
    /// coalescing window for triggered updates
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub triggered_delay: Duration,
    /// a neighbour is considered silent after `timeout_multiplier * periodic_interval`
    pub timeout_multiplier: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub hold_down: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub gc_interval: Duration,
    pub infinity: u32,
    pub split_horizon: SplitHorizon,
    pub max_entries: usize,
    pub seed: u64,
}

impl DvConfig {
    pub fn neighbour_timeout(&self) -> Duration {
        self.periodic_interval
            .checked_mul(self.timeout_multiplier)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for DvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            periodic_interval: Duration::from_secs(30),
            periodic_jitter: Duration::from_secs(5),
            triggered_delay: Duration::from_secs(1),
            timeout_multiplier: 6,
            hold_down: Duration::from_secs(60),
            gc_interval: Duration::from_secs(120),
            infinity: 16,
            split_horizon: SplitHorizon::PoisonReverse,
            max_entries: 4096,
            seed: 0,
        }
    }
}

#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ScopeTier {
    /// inclusive hop bound of this tier, `None` for the outermost tier
    pub max_hops: Option<u32>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
}

#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct FsrConfig {
    pub enabled: bool,
    /// ordered from the innermost tier outwards
    pub scopes: Vec<ScopeTier>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub housekeeping_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub stale_after: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub link_lifetime: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub neighbor_timeout: Duration,
    pub max_topology_entries: usize,
}

impl Default for FsrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scopes: vec![
                ScopeTier {
                    max_hops: Some(2),
                    interval: Duration::from_secs(5),
                },
                ScopeTier {
                    max_hops: None,
                    interval: Duration::from_secs(15),
                },
            ],
            housekeeping_interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(30),
            link_lifetime: Duration::from_secs(60),
            neighbor_timeout: Duration::from_secs(15),
            max_topology_entries: 8192,
        }
    }
}

#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RibConfig {
    /// administrative preference per protocol, higher wins
    #[serde_as(as = "Vec<(_, _)>")]
    pub preferences: BTreeMap<ProtocolTag, u8>,
    /// preference of any external tag not listed in `preferences`
    pub external_preference: u8,
    pub max_destinations: usize,
}

impl RibConfig {
    pub fn preference(&self, tag: ProtocolTag) -> u8 {
        if let Some(pref) = self.preferences.get(&tag) {
            return *pref;
        }
        match tag {
            ProtocolTag::Static => 200,
            ProtocolTag::Fisheye => 120,
            ProtocolTag::DistanceVector => 100,
            ProtocolTag::External(_) => self.external_preference,
        }
    }
}

impl Default for RibConfig {
    fn default() -> Self {
        Self {
            preferences: BTreeMap::new(),
            external_preference: 50,
            max_destinations: 16384,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct NodeConfig {
    pub rib: RibConfig,
    pub distance_vector: DvConfig,
    pub fisheye: FsrConfig,
}

impl NodeConfig {
    /// Checks that the configuration is internally consistent
    pub fn validate<T: RoutingSystem + ?Sized>(&self) -> Result<(), RoutingError<T>> {
        let dv = &self.distance_vector;
        if dv.periodic_interval.is_zero() {
            return Err(RoutingError::InvalidConfig("periodic_interval must be non-zero"));
        }
        if dv.periodic_jitter >= dv.periodic_interval {
            return Err(RoutingError::InvalidConfig("periodic_jitter must be below periodic_interval"));
        }
        if dv.infinity < 2 {
            return Err(RoutingError::InvalidConfig("infinity must be at least 2"));
        }
        if dv.timeout_multiplier == 0 {
            return Err(RoutingError::InvalidConfig("timeout_multiplier must be non-zero"));
        }
        if dv.hold_down > dv.gc_interval {
            return Err(RoutingError::InvalidConfig("hold_down must not exceed gc_interval"));
        }
        if dv.max_entries == 0 {
            return Err(RoutingError::InvalidConfig("max_entries must be non-zero"));
        }
        if self.rib.max_destinations == 0 {
            return Err(RoutingError::InvalidConfig("max_destinations must be non-zero"));
        }

        let fsr = &self.fisheye;
        let Some(outer) = fsr.scopes.last() else {
            return Err(RoutingError::InvalidConfig("at least one fisheye scope is required"));
        };
        if outer.max_hops.is_some() {
            return Err(RoutingError::InvalidConfig("the outermost fisheye scope must be unbounded"));
        }
        let mut prev = None;
        for (i, tier) in fsr.scopes.iter().enumerate() {
            if tier.interval.is_zero() {
                return Err(RoutingError::InvalidConfig("fisheye scope intervals must be non-zero"));
            }
            if let (Some(prev), Some(cur)) = (prev, tier.max_hops) {
                if cur <= prev {
                    return Err(RoutingError::InvalidConfig("fisheye scope bounds must be increasing"));
                }
            }
            if tier.max_hops.is_none() && i + 1 != fsr.scopes.len() {
                return Err(RoutingError::InvalidConfig("only the outermost fisheye scope may be unbounded"));
            }
            prev = tier.max_hops;
        }
        if fsr.housekeeping_interval.is_zero() {
            return Err(RoutingError::InvalidConfig("housekeeping_interval must be non-zero"));
        }
        if fsr.stale_after > fsr.link_lifetime {
            return Err(RoutingError::InvalidConfig("stale_after must not exceed link_lifetime"));
        }
        // our own links always fall in the innermost tier, whose updates double as keep-alives
        if fsr.scopes.first().is_some_and(|inner| fsr.neighbor_timeout <= inner.interval) {
            return Err(RoutingError::InvalidConfig(
                "neighbor_timeout must exceed the innermost fisheye scope interval",
            ));
        }
        if fsr.max_topology_entries == 0 {
            return Err(RoutingError::InvalidConfig("max_topology_entries must be non-zero"));
        }
        Ok(())
    }
}
