use std::collections::BTreeMap;
use std::time::Duration;

use nexthop::framework::{NodeConfig, ScopeTier};

use crate::common::virtual_network::VirtualNetwork;

pub const LINE: [(u16, u32, u32, u32); 2] = [(0, 1, 2, 1), (1, 2, 3, 1)];

pub const SIMPLE_WEIGHTED: [(u16, u32, u32, u32); 7] = [
    (0, 1, 2, 2),
    (1, 1, 3, 1),
    (2, 2, 3, 4),
    (3, 2, 4, 5),
    (4, 3, 4, 9),
    (5, 3, 5, 8),
    (6, 4, 5, 1),
];

/// only the distance-vector engine, no jitter
pub fn dv_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.fisheye.enabled = false;
    config.distance_vector.periodic_jitter = Duration::ZERO;
    config
}

/// only the fisheye engine, one hop of near scope
pub fn fsr_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.distance_vector.enabled = false;
    config.fisheye.scopes = vec![
        ScopeTier {
            max_hops: Some(1),
            interval: Duration::from_secs(5),
        },
        ScopeTier {
            max_hops: None,
            interval: Duration::from_secs(15),
        },
    ];
    config
}

pub fn vnet_line(config: NodeConfig) -> VirtualNetwork {
    VirtualNetwork::create(&[1, 2, 3], &LINE, config)
}

pub fn vnet_simple_weighted(config: NodeConfig) -> VirtualNetwork {
    VirtualNetwork::create(&[1, 2, 3, 4, 5], &SIMPLE_WEIGHTED, config)
}

/// 1 - 2 - 3 - 4 - 5 - 6
pub fn vnet_long_line(config: NodeConfig) -> VirtualNetwork {
    VirtualNetwork::create(
        &[1, 2, 3, 4, 5, 6],
        &[(0, 1, 2, 1), (1, 2, 3, 1), (2, 3, 4, 1), (3, 4, 5, 1), (4, 5, 6, 1)],
        config,
    )
}

/// Reference all-pairs shortest path costs (Floyd-Warshall)
pub fn reference_costs(nodes: &[u32], links: &[(u16, u32, u32, u32)]) -> BTreeMap<(u32, u32), u32> {
    let mut dist: BTreeMap<(u32, u32), u32> = BTreeMap::new();
    for a in nodes {
        dist.insert((*a, *a), 0);
    }
    for (_, a, b, cost) in links {
        for key in [(*a, *b), (*b, *a)] {
            let cur = dist.entry(key).or_insert(u32::MAX);
            *cur = (*cur).min(*cost);
        }
    }
    for k in nodes {
        for i in nodes {
            for j in nodes {
                let (Some(ik), Some(kj)) = (dist.get(&(*i, *k)).copied(), dist.get(&(*k, *j)).copied()) else {
                    continue;
                };
                let through = ik.saturating_add(kj);
                let cur = dist.entry((*i, *j)).or_insert(u32::MAX);
                if through < *cur {
                    *cur = through;
                }
            }
        }
    }
    dist
}
