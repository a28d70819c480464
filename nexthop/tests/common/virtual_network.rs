use std::collections::BTreeMap;
use std::time::Duration;

use nexthop::concepts::destination::NetworkDestination;
use nexthop::concepts::packet::Payload;
use nexthop::concepts::route::RouteRecord;
use nexthop::feedback::SendError;
use nexthop::framework::{Kernel, NodeConfig, RoutingSystem, SimTime};
use nexthop::node::Node;
use nexthop::timer::TimerHandle;
use simplelog::{Config, LevelFilter, TestLogger};

pub struct VirtualSystem;

impl RoutingSystem for VirtualSystem {
    type NodeAddress = u32;
    type InterfaceId = u16;

    fn host_mask() -> u32 {
        u32::MAX
    }

    fn contains(network: &NetworkDestination<Self>, addr: &u32) -> bool {
        addr & network.mask == network.address
    }

    fn prefix_len(mask: &u32) -> u32 {
        mask.count_ones()
    }

    fn is_canonical(destination: &NetworkDestination<Self>) -> bool {
        destination.address & !destination.mask == 0
    }
}

pub type Dest = NetworkDestination<VirtualSystem>;

pub fn host(addr: u32) -> Dest {
    NetworkDestination::host(addr)
}

pub fn init_logging() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}

pub enum Event {
    Timer {
        node: u32,
        handle: TimerHandle,
    },
    Message {
        node: u32,
        itf: u16,
        sender: u32,
        payload: Payload<VirtualSystem>,
    },
}

pub struct VirtualLink {
    pub a: u32,
    pub b: u32,
    pub up: bool,
}

pub struct SentPacket {
    pub at: SimTime,
    pub from: u32,
    pub to: u32,
    pub payload: Payload<VirtualSystem>,
}

/// A single-threaded discrete-event kernel. Links are point to point, the link id doubles as the interface id.
pub struct VirtualKernel {
    pub now: SimTime,
    pub latency: Duration,
    pub links: BTreeMap<u16, VirtualLink>,
    pub sent: Vec<SentPacket>,
    queue: BTreeMap<(SimTime, u64), Event>,
    seq: u64,
}

impl VirtualKernel {
    fn push(&mut self, at: SimTime, event: Event) {
        self.queue.insert((at, self.seq), event);
        self.seq += 1;
    }

    /// Duplicates the next queued event, as an at-least-once kernel may do
    pub fn duplicate_next_timer(&mut self) -> Option<TimerHandle> {
        let (at, node, handle) = self.queue.iter().find_map(|((at, _), event)| match event {
            Event::Timer { node, handle } => Some((*at, *node, *handle)),
            _ => None,
        })?;
        self.push(at, Event::Timer { node, handle });
        Some(handle)
    }
}

impl Kernel<VirtualSystem> for VirtualKernel {
    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule_timer(&mut self, node: &u32, delay: Duration, handle: TimerHandle) {
        self.push(self.now.saturating_add(delay), Event::Timer { node: *node, handle });
    }

    fn send_message(
        &mut self,
        node: &u32,
        itf: &u16,
        neighbour: &u32,
        payload: Payload<VirtualSystem>,
    ) -> Result<(), SendError> {
        let Some(link) = self.links.get(itf) else {
            return Err(SendError::InterfaceDown);
        };
        let peer = if link.a == *node {
            link.b
        } else if link.b == *node {
            link.a
        } else {
            return Err(SendError::InterfaceDown);
        };
        if peer != *neighbour {
            return Err(SendError::UnknownNeighbour);
        }
        let up = link.up;
        self.sent.push(SentPacket {
            at: self.now,
            from: *node,
            to: peer,
            payload: payload.clone(),
        });
        // a severed link swallows packets silently, the sender cannot tell
        if up {
            let at = self.now + self.latency;
            self.push(
                at,
                Event::Message {
                    node: peer,
                    itf: *itf,
                    sender: *node,
                    payload,
                },
            );
        }
        Ok(())
    }
}

pub struct VirtualNetwork {
    pub nodes: BTreeMap<u32, Node<VirtualSystem>>,
    pub kernel: VirtualKernel,
}

impl VirtualNetwork {
    /// links are (link id, node a, node b, cost)
    pub fn create(nodes: &[u32], links: &[(u16, u32, u32, u32)], config: NodeConfig) -> VirtualNetwork {
        let mut kernel = VirtualKernel {
            now: SimTime::ZERO,
            latency: Duration::from_millis(10),
            links: BTreeMap::new(),
            sent: Vec::new(),
            queue: BTreeMap::new(),
            seq: 0,
        };
        let mut routers = BTreeMap::new();
        for id in nodes {
            let node = Node::new(*id, config.clone()).unwrap_or_else(|e| panic!("bad config: {e}"));
            routers.insert(*id, node);
        }
        for (lid, a, b, cost) in links {
            kernel.links.insert(*lid, VirtualLink { a: *a, b: *b, up: true });
            for (me, other) in [(a, b), (b, a)] {
                if let Some(node) = routers.get_mut(me) {
                    node.add_link(*lid, *other, *cost, &mut kernel);
                }
            }
        }
        VirtualNetwork { nodes: routers, kernel }
    }

    pub fn start(&mut self) {
        for node in self.nodes.values_mut() {
            node.start(&mut self.kernel);
        }
    }

    pub fn run_until(&mut self, until: SimTime) {
        while let Some((&(at, _), _)) = self.kernel.queue.first_key_value() {
            if at > until {
                break;
            }
            let Some((_, event)) = self.kernel.queue.pop_first() else {
                break;
            };
            self.kernel.now = at;
            match event {
                Event::Timer { node, handle } => {
                    if let Some(n) = self.nodes.get_mut(&node) {
                        n.on_timer_fire(handle, &mut self.kernel);
                    }
                }
                Event::Message {
                    node,
                    itf,
                    sender,
                    payload,
                } => {
                    if let Some(n) = self.nodes.get_mut(&node) {
                        n.on_message_received(&itf, &sender, &payload, &mut self.kernel);
                    }
                }
            }
        }
        self.kernel.now = until;
    }

    pub fn run_for(&mut self, duration: Duration) {
        let until = self.kernel.now + duration;
        self.run_until(until);
    }

    /// Silently drops everything sent over the link from now on
    pub fn sever(&mut self, link: u16) {
        if let Some(l) = self.kernel.links.get_mut(&link) {
            l.up = false;
        }
    }

    pub fn mend(&mut self, link: u16) {
        if let Some(l) = self.kernel.links.get_mut(&link) {
            l.up = true;
        }
    }

    pub fn set_cost(&mut self, link: u16, cost: u32) {
        let Some((a, b)) = self.kernel.links.get(&link).map(|l| (l.a, l.b)) else {
            return;
        };
        for (me, other) in [(a, b), (b, a)] {
            if let Some(node) = self.nodes.get_mut(&me) {
                node.set_link_cost(&other, cost, &mut self.kernel)
                    .unwrap_or_else(|e| panic!("{e}"));
            }
        }
    }

    /// Runs `f` against one node, with the kernel available for calls that need it
    pub fn with_node<R>(&mut self, id: u32, f: impl FnOnce(&mut Node<VirtualSystem>, &mut VirtualKernel) -> R) -> R {
        let node = self.nodes.get_mut(&id).unwrap_or_else(|| panic!("No node {id} found"));
        f(node, &mut self.kernel)
    }

    pub fn node(&self, id: u32) -> &Node<VirtualSystem> {
        self.nodes.get(&id).unwrap_or_else(|| panic!("No node {id} found"))
    }

    pub fn node_mut(&mut self, id: u32) -> &mut Node<VirtualSystem> {
        self.nodes.get_mut(&id).unwrap_or_else(|| panic!("No node {id} found"))
    }

    pub fn route(&self, cur: u32, dest: u32) -> Option<RouteRecord<VirtualSystem>> {
        self.node(cur).lookup(&host(dest))
    }

    pub fn get_next_hop(&self, cur: u32, dest: u32) -> u32 {
        self.route(cur, dest)
            .unwrap_or_else(|| panic!("No route found from {cur} to {dest}"))
            .next_hop
    }

    pub fn get_metric_to(&self, cur: u32, dest: u32) -> u32 {
        self.route(cur, dest)
            .unwrap_or_else(|| panic!("No route found from {cur} to {dest}"))
            .metric
    }

    pub fn dv_cost(&self, cur: u32, dest: u32) -> Option<u32> {
        self.node(cur)
            .distance_vector
            .as_ref()
            .and_then(|dv| dv.cost_to(&host(dest)))
    }
}
