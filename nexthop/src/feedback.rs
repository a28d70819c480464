use educe::Educe;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::concepts::destination::NetworkDestination;
use crate::concepts::route::{ProtocolTag, RouteRecord};
use crate::framework::RoutingSystem;

/// Errors returned to the host for misuse of the API. Protocol traffic never produces these.
#[derive(Error)]
#[derive(Educe)]
#[educe(Debug(bound()))]
pub enum RoutingError<T: RoutingSystem + ?Sized> {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Internal tags belong to the engines of this node and cannot be used for injected routes
    #[error("Protocol tag {tag} is reserved for an internal engine")]
    ReservedProtocolTag { tag: ProtocolTag },
    #[error("Destination {destination} is not a canonical network")]
    MalformedDestination { destination: NetworkDestination<T> },
    #[error("No link to {neighbour:?}")]
    UnknownLink { neighbour: T::NodeAddress },
}

/// Returned by the kernel when a control message could not be handed to the link layer
#[derive(Error, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum SendError {
    #[error("interface is down")]
    InterfaceDown,
    #[error("no such neighbour on the interface")]
    UnknownNeighbour,
    #[error("transmit queue is full")]
    QueueFull,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub enum WarningClass {
    /// duplicate, reordered or stale control traffic
    TransientNoise,
    /// a table hit its configured bound
    ResourceExhaustion,
    /// a message violated a protocol invariant and was dropped without mutation
    InvariantViolation,
    /// the kernel failed to deliver a message
    CollaboratorFailure,
}

/// Although this is an error enum, these should be treated as warnings.
/// Every variant is locally recoverable, the node keeps running.
#[derive(Error)]
#[derive(Educe)]
#[educe(Clone(bound()), Debug(bound()))]
pub enum RoutingWarning<T: RoutingSystem + ?Sized> {
    /// The metric over a link should never be zero (this may result in routing loops!)
    /// If this warning is triggered, the metric is raised to 1.
    #[error("Zero link cost to {neighbour:?}, using 1")]
    MetricIsZero { neighbour: T::NodeAddress },
    #[error("Dropped message from unknown neighbour {neighbour:?}")]
    UnknownNeighbour { neighbour: T::NodeAddress },
    /// The destination carried host bits outside of its mask, or the cost was above infinity
    #[error("Dropped malformed entry for {destination} from {neighbour:?}")]
    MalformedEntry {
        neighbour: T::NodeAddress,
        destination: NetworkDestination<T>,
    },
    #[error("Dropped duplicate entry for {destination} from {neighbour:?}")]
    DuplicateEntry {
        neighbour: T::NodeAddress,
        destination: NetworkDestination<T>,
    },
    /// A link-state advert did not carry a newer sequence number than the stored one
    #[error("Stale advert for ({origin:?}, {neighbour:?}): seqno {seqno} <= {stored}")]
    StaleSequence {
        origin: T::NodeAddress,
        neighbour: T::NodeAddress,
        seqno: u32,
        stored: u32,
    },
    #[error("Rejected topology update from {sender:?}: sequence number overflow")]
    SequenceOverflow { sender: T::NodeAddress },
    #[error("Rejected topology update from {sender:?}: negative cost {cost}")]
    NegativeCost { sender: T::NodeAddress, cost: i64 },
    /// A neighbour advertised our own links with a higher seqno than we hold.
    /// NOTE: This might be an indication of node data loss!
    #[error("Desynchronized seqno, advancing from {old_seqno} to {new_seqno}")]
    DesynchronizedSeqno { old_seqno: u32, new_seqno: u32 },
    #[error("{table} is full ({capacity} entries)")]
    TableFull { table: &'static str, capacity: usize },
    #[error("Failed to send to {neighbour:?}: {error}")]
    SendFailed {
        neighbour: T::NodeAddress,
        error: SendError,
    },
}

impl<T: RoutingSystem + ?Sized> RoutingWarning<T> {
    pub fn class(&self) -> WarningClass {
        match self {
            RoutingWarning::UnknownNeighbour { .. }
            | RoutingWarning::DuplicateEntry { .. }
            | RoutingWarning::StaleSequence { .. } => WarningClass::TransientNoise,
            RoutingWarning::TableFull { .. } => WarningClass::ResourceExhaustion,
            RoutingWarning::MetricIsZero { .. }
            | RoutingWarning::MalformedEntry { .. }
            | RoutingWarning::SequenceOverflow { .. }
            | RoutingWarning::NegativeCost { .. }
            | RoutingWarning::DesynchronizedSeqno { .. } => WarningClass::InvariantViolation,
            RoutingWarning::SendFailed { .. } => WarningClass::CollaboratorFailure,
        }
    }
}

/// Observation hook payload. External tracers subscribe through `Node::subscribe`.
#[derive(Educe)]
#[educe(Clone(bound()), Debug(bound()))]
pub enum RoutingEvent<T: RoutingSystem + ?Sized> {
    /// the active route for a destination changed
    RouteInstalled { route: RouteRecord<T> },
    /// a destination no longer has any active route
    RouteWithdrawn {
        destination: NetworkDestination<T>,
        protocol: ProtocolTag,
    },
    LinkAccepted {
        origin: T::NodeAddress,
        neighbour: T::NodeAddress,
        seqno: u32,
    },
    LinkExpired {
        origin: T::NodeAddress,
        neighbour: T::NodeAddress,
    },
    ScopeChanged {
        node: T::NodeAddress,
        from: Option<usize>,
        to: Option<usize>,
    },
    NeighbourLost {
        neighbour: T::NodeAddress,
        protocol: ProtocolTag,
    },
    Warning(RoutingWarning<T>),
}

/// Per-engine tallies of recoverable conditions
#[derive(Serialize, Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct Counters {
    pub transient_noise: u64,
    pub resource_exhaustion: u64,
    pub invariant_violations: u64,
    pub send_failures: u64,
}

impl Counters {
    pub fn record(&mut self, class: WarningClass) {
        match class {
            WarningClass::TransientNoise => self.transient_noise += 1,
            WarningClass::ResourceExhaustion => self.resource_exhaustion += 1,
            WarningClass::InvariantViolation => self.invariant_violations += 1,
            WarningClass::CollaboratorFailure => self.send_failures += 1,
        }
    }
}
