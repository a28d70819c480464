use std::time::Duration;

use nexthop::concepts::destination::NetworkDestination;
use nexthop::concepts::neighbour::Link;
use nexthop::concepts::packet::{DvPacket, Payload, VectorEntry};
use nexthop::concepts::route::ProtocolTag;
use nexthop::distance_vector::DistanceVector;
use nexthop::feedback::RoutingEvent;
use nexthop::framework::{DvConfig, RibConfig, SplitHorizon};
use nexthop::rib::{Redistribute, Rib};
use nexthop::timer::DvTimer;

use crate::common::graphs::{dv_config, reference_costs, vnet_line, vnet_simple_weighted, SIMPLE_WEIGHTED};
use crate::common::virtual_network::{host, init_logging, VirtualNetwork, VirtualSystem};

mod common;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn entries(costs: &[(u32, u32)]) -> Vec<VectorEntry<VirtualSystem>> {
    costs
        .iter()
        .map(|(dest, cost)| VectorEntry {
            destination: host(*dest),
            cost: *cost,
        })
        .collect()
}

fn full(costs: &[(u32, u32)]) -> DvPacket<VirtualSystem> {
    DvPacket::FullVector { entries: entries(costs) }
}

fn triggered(costs: &[(u32, u32)]) -> DvPacket<VirtualSystem> {
    DvPacket::TriggeredUpdate { entries: entries(costs) }
}

/// node 1, linked to 2 over interface 0 and to 3 over interface 1, both at cost 1
fn engine(config: DvConfig) -> (DistanceVector<VirtualSystem>, Rib<VirtualSystem>) {
    let mut dv = DistanceVector::new(1, config);
    dv.add_link(Link { itf: 0, addr: 2, cost: 1 });
    dv.add_link(Link { itf: 1, addr: 3, cost: 1 });
    (dv, Rib::new(RibConfig::default()))
}

fn assert_loop_free(net: &VirtualNetwork, nodes: &[u32]) {
    for src in nodes {
        for dst in nodes {
            if src == dst {
                continue;
            }
            let mut cur = *src;
            let mut hops = 0;
            while cur != *dst {
                cur = net.get_next_hop(cur, *dst);
                hops += 1;
                assert!(hops <= nodes.len(), "forwarding loop from {src} to {dst}");
            }
        }
    }
}

#[test]
fn line_converges() {
    init_logging();
    let mut net = vnet_line(dv_config());
    net.start();
    net.run_for(secs(10));

    assert_eq!(net.get_next_hop(1, 3), 2);
    assert_eq!(net.get_metric_to(1, 3), 2);
    assert_eq!(net.get_next_hop(3, 1), 2);
    assert_eq!(net.get_metric_to(2, 1), 1);
    assert_eq!(net.route(1, 3).map(|r| r.protocol), Some(ProtocolTag::DistanceVector));
}

#[test]
fn weighted_graph_matches_shortest_paths() {
    init_logging();
    let nodes = [1, 2, 3, 4, 5];
    let mut net = vnet_simple_weighted(dv_config());
    net.start();
    net.run_for(secs(60));

    let reference = reference_costs(&nodes, &SIMPLE_WEIGHTED);
    for a in nodes {
        for b in nodes {
            if a == b {
                continue;
            }
            assert_eq!(net.get_metric_to(a, b), reference[&(a, b)], "cost from {a} to {b}");
            assert_eq!(net.dv_cost(a, b), Some(reference[&(a, b)]));
        }
    }
    assert_loop_free(&net, &nodes);
}

#[test]
fn silent_neighbour_withdraws_routes() {
    init_logging();
    let mut net = vnet_line(dv_config());
    net.start();
    net.run_for(secs(10));
    assert!(net.route(1, 3).is_some());

    net.sever(1);
    // well before the neighbour timeout nothing has changed yet
    net.run_for(secs(100));
    assert_eq!(net.get_next_hop(1, 3), 2);

    net.run_for(secs(90));
    assert!(net.route(2, 3).is_none());
    assert!(net.route(1, 3).is_none());
    assert!(net.route(3, 1).is_none());
    assert_eq!(net.get_next_hop(1, 2), 2);
}

#[test]
fn silent_next_hop_takes_everything_behind_it() {
    init_logging();
    let mut net = vnet_line(dv_config());
    net.start();
    net.run_for(secs(10));
    net.sever(0);

    // node 2 was last heard right after convergence, about a second in
    net.run_until(secs(180));
    assert_eq!(net.get_next_hop(1, 3), 2);

    net.run_until(secs(183));
    assert!(net.route(1, 3).is_none());
    assert!(net.route(1, 2).is_none());
}

#[test]
fn mended_link_restores_routes() {
    init_logging();
    let mut net = vnet_line(dv_config());
    net.start();
    net.run_for(secs(10));
    net.sever(1);
    net.run_for(secs(190));
    assert!(net.route(1, 3).is_none());

    net.mend(1);
    net.run_for(secs(40));
    assert_eq!(net.get_metric_to(1, 3), 2);
    assert_eq!(net.get_metric_to(3, 1), 2);
}

#[test]
fn link_cost_change_reroutes() {
    init_logging();
    let mut net = VirtualNetwork::create(&[1, 2, 3], &[(0, 1, 2, 1), (1, 2, 3, 1), (2, 1, 3, 5)], dv_config());
    net.start();
    net.run_for(secs(10));
    assert_eq!(net.get_next_hop(1, 3), 2);
    assert_eq!(net.get_metric_to(1, 3), 2);

    net.set_cost(0, 10);
    net.run_for(secs(5));
    assert_eq!(net.get_next_hop(1, 3), 3);
    assert_eq!(net.get_metric_to(1, 3), 5);

    // node 3 only hears about the cheaper direct path with the next periodic update
    net.run_for(secs(30));
    assert_eq!(net.get_next_hop(2, 1), 3);
    assert_eq!(net.get_metric_to(2, 1), 6);
}

#[test]
fn poison_reverse_on_the_wire() {
    init_logging();
    let mut net = vnet_line(dv_config());
    net.start();
    net.run_for(secs(65));

    let mut checked = 0;
    for sent in net.kernel.sent.iter().filter(|p| p.from == 2 && p.to == 1) {
        let Payload::DistanceVector(packet) = &sent.payload else {
            continue;
        };
        for entry in packet.entries() {
            if entry.destination == host(1) {
                assert_eq!(entry.cost, 16, "route back to its own next hop must be poisoned");
                checked += 1;
            }
        }
    }
    assert!(checked > 0);
}

#[test]
fn simple_split_horizon_omits_entries() {
    init_logging();
    let mut config = dv_config();
    config.distance_vector.split_horizon = SplitHorizon::Simple;
    let mut net = vnet_line(config);
    net.start();
    net.run_for(secs(65));

    assert_eq!(net.get_metric_to(1, 3), 2);
    for sent in net.kernel.sent.iter().filter(|p| p.from == 2 && p.to == 1) {
        let Payload::DistanceVector(packet) = &sent.payload else {
            continue;
        };
        assert!(packet.entries().iter().all(|e| e.destination != host(1)));
    }
}

#[test]
fn periodic_updates_keep_their_cadence() {
    init_logging();
    let mut net = vnet_line(dv_config());
    net.start();
    net.run_for(secs(95));

    let full_vectors = net
        .kernel
        .sent
        .iter()
        .filter(|p| p.from == 1)
        .filter(|p| matches!(&p.payload, Payload::DistanceVector(packet) if packet.is_full()))
        .count();
    // fired at 0, 30, 60 and 90 seconds
    assert_eq!(full_vectors, 4);
}

#[test]
fn hold_down_ignores_worse_routes() {
    init_logging();
    let (mut dv, mut rib) = engine(DvConfig::default());

    dv.handle_packet(&full(&[(2, 0), (9, 1)]), &0, &2, secs(1), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), Some(2));
    assert_eq!(rib.lookup(&host(9)).map(|r| r.next_hop), Some(2));

    dv.handle_packet(&triggered(&[(9, 16)]), &0, &2, secs(2), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), None);
    assert!(rib.lookup(&host(9)).is_none());

    // a worse path while held down is remembered but not used
    dv.handle_packet(&full(&[(3, 0), (9, 5)]), &1, &3, secs(3), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), None);

    let epoch = dv.routes[&host(9)].epoch;
    let stale = DvTimer::HoldDown {
        destination: host(9),
        epoch: epoch - 1,
    };
    dv.handle_timer(stale, secs(62), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), None);

    let current = DvTimer::HoldDown {
        destination: host(9),
        epoch,
    };
    dv.handle_timer(current, secs(62), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), Some(6));
    assert_eq!(dv.next_hop_to(&host(9)), Some(&3));
    assert_eq!(rib.lookup(&host(9)).map(|r| r.metric), Some(6));
}

#[test]
fn hold_down_accepts_equal_or_better_routes() {
    init_logging();
    let (mut dv, mut rib) = engine(DvConfig::default());
    dv.handle_packet(&full(&[(9, 3)]), &0, &2, secs(1), &mut rib);
    dv.handle_packet(&triggered(&[(9, 16)]), &0, &2, secs(2), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), None);

    dv.handle_packet(&full(&[(9, 2)]), &1, &3, secs(3), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), Some(3));
    assert_eq!(dv.next_hop_to(&host(9)), Some(&3));
}

#[test]
fn without_hold_down_alternatives_apply_at_once() {
    init_logging();
    let config = DvConfig {
        hold_down: Duration::ZERO,
        ..DvConfig::default()
    };
    let (mut dv, mut rib) = engine(config);
    dv.handle_packet(&full(&[(9, 1)]), &0, &2, secs(1), &mut rib);
    dv.handle_packet(&full(&[(9, 4)]), &1, &3, secs(1), &mut rib);
    assert_eq!(dv.next_hop_to(&host(9)), Some(&2));

    dv.handle_packet(&triggered(&[(9, 16)]), &0, &2, secs(2), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), Some(5));
    assert_eq!(rib.lookup(&host(9)).map(|r| r.next_hop), Some(3));
}

#[test]
fn full_vector_omission_means_unreachable() {
    init_logging();
    let (mut dv, mut rib) = engine(DvConfig::default());
    dv.handle_packet(&full(&[(2, 0), (9, 1)]), &0, &2, secs(1), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), Some(2));

    // triggered updates only carry changes, silence about 9 means nothing
    dv.handle_packet(&triggered(&[(2, 0)]), &0, &2, secs(2), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), Some(2));

    dv.handle_packet(&full(&[(2, 0)]), &0, &2, secs(3), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), None);
    assert_eq!(dv.cost_to(&host(2)), Some(1));
}

#[test]
fn malformed_and_duplicate_entries_are_dropped() {
    init_logging();
    let (mut dv, mut rib) = engine(DvConfig::default());
    let packet = DvPacket::FullVector {
        entries: vec![
            VectorEntry {
                destination: host(7),
                cost: 17,
            },
            VectorEntry {
                destination: NetworkDestination::new(0x0A00_0001, 0xFFFF_FF00),
                cost: 1,
            },
            VectorEntry {
                destination: host(8),
                cost: 2,
            },
            VectorEntry {
                destination: host(8),
                cost: 1,
            },
        ],
    };
    dv.handle_packet(&packet, &0, &2, secs(1), &mut rib);

    assert_eq!(dv.cost_to(&host(7)), None);
    assert_eq!(dv.cost_to(&NetworkDestination::new(0x0A00_0001, 0xFFFF_FF00)), None);
    // the first occurrence wins
    assert_eq!(dv.cost_to(&host(8)), Some(3));
    assert_eq!(dv.counters.invariant_violations, 2);
    assert_eq!(dv.counters.transient_noise, 1);
}

#[test]
fn unknown_sender_is_ignored() {
    init_logging();
    let (mut dv, mut rib) = engine(DvConfig::default());
    dv.handle_packet(&full(&[(9, 1)]), &0, &7, secs(1), &mut rib);
    // known neighbour, wrong interface
    dv.handle_packet(&full(&[(9, 1)]), &1, &2, secs(1), &mut rib);

    assert_eq!(dv.cost_to(&host(9)), None);
    assert!(rib.is_empty());
    assert_eq!(dv.counters.transient_noise, 2);
}

#[test]
fn zero_link_cost_is_raised() {
    init_logging();
    let mut dv: DistanceVector<VirtualSystem> = DistanceVector::new(1, DvConfig::default());
    dv.add_link(Link { itf: 0, addr: 2, cost: 0 });
    assert_eq!(dv.neighbours[&2].link.cost, 1);
    assert_eq!(dv.counters.invariant_violations, 1);
}

#[test]
fn neighbour_timeout_rearms_until_silent() {
    init_logging();
    let (mut dv, mut rib) = engine(DvConfig::default());
    dv.handle_packet(&full(&[(9, 1)]), &0, &2, secs(0), &mut rib);
    dv.handle_packet(&full(&[(9, 1)]), &0, &2, secs(50), &mut rib);
    dv.timers.clear();

    dv.handle_timer(DvTimer::NeighbourTimeout { neighbour: 2 }, secs(180), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), Some(2));
    let rearmed = dv
        .timers
        .iter()
        .find(|t| matches!(t.kind, DvTimer::NeighbourTimeout { .. }))
        .map(|t| t.delay);
    assert_eq!(rearmed, Some(secs(50)));

    dv.events.clear();
    dv.handle_timer(DvTimer::NeighbourTimeout { neighbour: 2 }, secs(230), &mut rib);
    assert_eq!(dv.cost_to(&host(9)), None);
    assert!(dv
        .events
        .iter()
        .any(|e| matches!(e, RoutingEvent::NeighbourLost { neighbour: 2, .. })));
}

#[test]
fn garbage_collection_forgets_invalid_entries() {
    init_logging();
    let (mut dv, mut rib) = engine(DvConfig::default());
    dv.handle_packet(&full(&[(9, 1)]), &0, &2, secs(1), &mut rib);
    dv.remove_link(&2, secs(2), &mut rib);
    assert!(dv.routes.contains_key(&host(9)));
    let epoch = dv.routes[&host(9)].epoch;

    dv.handle_timer(
        DvTimer::Garbage {
            destination: host(9),
            epoch,
        },
        secs(122),
        &mut rib,
    );
    assert!(!dv.routes.contains_key(&host(9)));
}

#[test]
fn recreated_entries_ignore_timers_of_their_predecessor() {
    init_logging();
    let config = DvConfig {
        max_entries: 2,
        ..DvConfig::default()
    };
    let (mut dv, mut rib) = engine(config);
    dv.handle_packet(&triggered(&[(9, 1)]), &0, &2, secs(0), &mut rib);
    dv.handle_packet(&triggered(&[(9, 16)]), &0, &2, secs(1), &mut rib);
    let first_life = dv.routes[&host(9)].epoch;

    // the table holds our own address and one more entry, so 8 pushes out the invalid 9
    dv.handle_packet(&triggered(&[(8, 1)]), &0, &2, secs(2), &mut rib);
    assert!(!dv.routes.contains_key(&host(9)));
    dv.handle_packet(&triggered(&[(8, 16)]), &0, &2, secs(3), &mut rib);

    dv.handle_packet(&triggered(&[(9, 1)]), &0, &2, secs(100), &mut rib);
    assert!(!dv.routes.contains_key(&host(8)));
    dv.handle_packet(&triggered(&[(9, 16)]), &0, &2, secs(110), &mut rib);
    assert_ne!(dv.routes[&host(9)].epoch, first_life);

    let stale_gc = DvTimer::Garbage {
        destination: host(9),
        epoch: first_life,
    };
    dv.handle_timer(stale_gc, secs(121), &mut rib);
    assert!(dv.routes.contains_key(&host(9)));

    let stale_hold_down = DvTimer::HoldDown {
        destination: host(9),
        epoch: first_life,
    };
    dv.handle_timer(stale_hold_down, secs(121), &mut rib);
    assert!(dv.routes[&host(9)].is_held_down(secs(121)));
}

#[test]
fn refreshed_routes_return_to_the_rib() {
    init_logging();
    let (mut dv, _) = engine(DvConfig::default());
    let mut rib = Rib::new(RibConfig {
        max_destinations: 1,
        ..RibConfig::default()
    });
    dv.handle_packet(&full(&[(9, 1)]), &0, &2, secs(1), &mut rib);
    assert!(rib.lookup(&host(9)).is_some());

    rib.redistribute(host(99), 3, 1, 1, ProtocolTag::Static);
    assert!(rib.lookup(&host(9)).is_none());
    rib.withdraw(&host(99), ProtocolTag::Static);

    dv.handle_packet(&full(&[(9, 1)]), &0, &2, secs(31), &mut rib);
    assert_eq!(rib.lookup(&host(9)).map(|r| (r.next_hop, r.metric)), Some((2, 2)));
}

#[test]
fn huge_durations_saturate() {
    init_logging();
    let config = DvConfig {
        periodic_interval: Duration::MAX,
        periodic_jitter: Duration::MAX,
        timeout_multiplier: u32::MAX,
        hold_down: Duration::MAX,
        gc_interval: Duration::MAX,
        ..DvConfig::default()
    };
    assert_eq!(config.neighbour_timeout(), Duration::MAX);
    let (mut dv, mut rib) = engine(config);
    dv.handle_packet(&full(&[(9, 1)]), &0, &2, secs(1), &mut rib);
    dv.handle_packet(&triggered(&[(9, 16)]), &0, &2, secs(2), &mut rib);
    assert_eq!(dv.routes[&host(9)].held_down_until, Some(Duration::MAX));

    dv.timers.clear();
    dv.handle_timer(DvTimer::NeighbourTimeout { neighbour: 2 }, secs(3), &mut rib);
    dv.handle_timer(DvTimer::Periodic, secs(3), &mut rib);
    assert!(dv.timers.iter().any(|t| matches!(t.kind, DvTimer::NeighbourTimeout { .. })));
    assert!(dv.timers.iter().any(|t| matches!(t.kind, DvTimer::Periodic)));
}

#[test]
fn local_networks_are_advertised_at_zero() {
    init_logging();
    let mut net = vnet_line(dv_config());
    let network = NetworkDestination::new(0x0A00_0000, 0xFFFF_FF00);
    net.with_node(3, |node, kernel| node.add_local_network(network.clone(), kernel))
        .unwrap_or_else(|e| panic!("{e}"));
    net.start();
    net.run_for(secs(10));

    let route = net.node(1).lookup(&network).unwrap_or_else(|| panic!("no route to {network}"));
    assert_eq!(route.metric, 2);
    assert_eq!(route.next_hop, 2);
    // the owner never installs its own network
    assert!(net.node(3).lookup(&network).is_none());
    assert_eq!(net.node(1).rib.resolve(&0x0A00_0042).map(|r| r.next_hop), Some(2));
}
