use std::fmt::{Display, Formatter};

use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::framework::RoutingSystem;

/// A destination network, identified by its address and mask
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()), Eq, Hash(bound()), PartialOrd, Ord)]
#[serde(bound = "")]
pub struct NetworkDestination<T: RoutingSystem + ?Sized> {
    pub address: T::NodeAddress,
    pub mask: T::NodeAddress,
}

impl<T: RoutingSystem + ?Sized> NetworkDestination<T> {
    pub fn new(address: T::NodeAddress, mask: T::NodeAddress) -> Self {
        Self { address, mask }
    }

    /// A destination covering exactly one node
    pub fn host(address: T::NodeAddress) -> Self {
        Self {
            address,
            mask: T::host_mask(),
        }
    }

    pub fn is_host(&self) -> bool {
        self.mask == T::host_mask()
    }

    pub fn contains(&self, addr: &T::NodeAddress) -> bool {
        T::contains(self, addr)
    }

    pub fn prefix_len(&self) -> u32 {
        T::prefix_len(&self.mask)
    }

    pub fn is_canonical(&self) -> bool {
        T::is_canonical(self)
    }
}

impl<T: RoutingSystem + ?Sized> Display for NetworkDestination<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}/{:?}", self.address, self.mask)
    }
}
