//! Glue between engine timers and kernel timer events.
//!
//! Engines queue `TimerRequest`s describing *what* should happen later. The registry turns each request
//! into an opaque `TimerHandle` that the kernel hands back when the timer fires. Handles are single use:
//! once fired or cancelled, a handle resolves to nothing and the event is dropped.

use std::collections::HashMap;
use std::time::Duration;

use educe::Educe;
use log::trace;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::concepts::destination::NetworkDestination;
use crate::concepts::route::ProtocolTag;
use crate::framework::{Kernel, RoutingSystem};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TimerHandle(pub u64);

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub enum DvTimer<T: RoutingSystem + ?Sized> {
    Periodic,
    Triggered,
    /// re-checks whether the neighbour has been silent for a full timeout
    NeighbourTimeout { neighbour: T::NodeAddress },
    HoldDown {
        destination: NetworkDestination<T>,
        epoch: u64,
    },
    Garbage {
        destination: NetworkDestination<T>,
        epoch: u64,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub enum FsrTimer {
    Scope { tier: usize },
    Housekeeping,
}

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub enum TimerKind<T: RoutingSystem + ?Sized> {
    DistanceVector(DvTimer<T>),
    Fisheye(FsrTimer),
}

impl<T: RoutingSystem + ?Sized> TimerKind<T> {
    pub fn protocol(&self) -> ProtocolTag {
        match self {
            TimerKind::DistanceVector(_) => ProtocolTag::DistanceVector,
            TimerKind::Fisheye(_) => ProtocolTag::Fisheye,
        }
    }
}

/// A timer an engine wants to have delivered back to it after `delay`
#[derive(Clone, Debug)]
pub struct TimerRequest<K> {
    pub delay: Duration,
    pub kind: K,
}

impl<K> TimerRequest<K> {
    pub fn after(delay: Duration, kind: K) -> Self {
        Self { delay, kind }
    }
}

/// Per-node registry of outstanding timers, keyed by handle
#[serde_as]
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct TimerRegistry<T: RoutingSystem + ?Sized> {
    next_handle: u64,
    #[serde_as(as = "Vec<(_, _)>")]
    pending: HashMap<TimerHandle, TimerKind<T>>,
}

impl<T: RoutingSystem + ?Sized> Default for TimerRegistry<T> {
    fn default() -> Self {
        Self {
            next_handle: 0,
            pending: HashMap::new(),
        }
    }
}

impl<T: RoutingSystem + ?Sized> TimerRegistry<T> {
    /// registers the timer and asks the kernel to deliver it back to `node`
    pub fn schedule(
        &mut self,
        node: &T::NodeAddress,
        delay: Duration,
        kind: TimerKind<T>,
        kernel: &mut impl Kernel<T>,
    ) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        trace!("scheduling {:?} as {:?} in {:?}", kind, handle, delay);
        self.pending.insert(handle, kind);
        kernel.schedule_timer(node, delay, handle);
        handle
    }

    /// resolves a fired handle, returns `None` for handles that already fired or were cancelled
    pub fn take(&mut self, handle: TimerHandle) -> Option<TimerKind<T>> {
        self.pending.remove(&handle)
    }

    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.pending.remove(&handle).is_some()
    }

    /// invalidates every outstanding timer of one protocol
    pub fn cancel_protocol(&mut self, protocol: ProtocolTag) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, kind| kind.protocol() != protocol);
        before - self.pending.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
