//! nexthop is a pair of I/O free intra-network routing engines, a distance-vector protocol and Fisheye State
//! Routing, that share a per-node Routing Information Base.
//!
//! The host (usually a discrete-event simulator) implements [`framework::Kernel`] and drives a
//! [`node::Node`] with timer and message events.

pub mod concepts;
pub mod distance_vector;
pub mod feedback;
pub mod fisheye;
pub mod framework;
pub mod node;
pub mod rib;
pub mod timer;
pub mod util;
