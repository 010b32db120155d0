mod common;

use std::thread;
use std::time::{Duration, Instant};

use kadwalk::{Config, Dht, Id};

use common::{closest, ids, init_logging, local, BlackHole, SimulatedNetwork};

const NETWORK_SIZE: usize = 200;

fn dht(network: &SimulatedNetwork) -> (Dht, kadwalk::Contact) {
    let local = local();

    let dht = Dht::builder()
        .bootstrap(&network.some_contacts(8))
        .build(local.clone(), network.clone())
        .unwrap();

    (dht, local)
}

#[test]
fn find_node_returns_the_closest_nodes() {
    init_logging();

    let network = SimulatedNetwork::new(NETWORK_SIZE);
    let (dht, local) = dht(&network);

    let target = Id::random();
    let result = dht.find_node(target).unwrap();

    let mut everyone = network.contacts();
    everyone.push(local);

    assert_eq!(ids(&result.contacts()), ids(&closest(everyone, &target, 20)));
    assert_eq!(result.target, target);
    assert!(result.statistics.requests < NETWORK_SIZE);
    assert_eq!(result.statistics.timeouts, 0);
    assert!(result.collisions.is_empty());
}

#[test]
fn find_node_skips_offline_nodes() {
    let network = SimulatedNetwork::new(NETWORK_SIZE);
    let (dht, local) = dht(&network);

    let target = Id::random();

    for offline in network.closest(&target, 5) {
        network.set_online(offline.id(), false);
    }

    let result = dht.find_node(target).unwrap();

    let mut everyone = network.online_contacts();
    everyone.push(local);

    assert_eq!(ids(&result.contacts()), ids(&closest(everyone, &target, 20)));
    assert!(result.statistics.timeouts >= 5);
}

#[test]
fn responders_end_up_in_the_routing_table() {
    let network = SimulatedNetwork::new(NETWORK_SIZE);
    let (dht, _) = dht(&network);

    let result = dht.find_node(Id::random()).unwrap();

    let table = dht.routing_table();
    let table = table.read().unwrap();

    for responder in result.contacts().iter().filter(|c| !c.is_local()) {
        if let Some(contact) = table.get(responder.id()) {
            assert!(contact.round_trip_time().is_some());
        }
    }

    assert!(table.size() > 8);
}

#[test]
fn find_value_stops_at_first_holder() {
    let network = SimulatedNetwork::new(NETWORK_SIZE);
    let (dht, _) = dht(&network);

    let key = Id::from_data(b"hello");
    let holders = network.store(key, b"world", 3);

    let result = dht.find_value(key).unwrap();

    assert!(result.is_found());
    assert_eq!(result.key, key);
    assert!(result.values.iter().all(|v| v.data.as_ref() == b"world"));
    assert!(ids(&holders).contains(&result.values[0].creator));
}

#[test]
fn find_value_without_holders() {
    let network = SimulatedNetwork::new(NETWORK_SIZE);
    let (dht, local) = dht(&network);

    let key = Id::random();
    let result = dht.find_value(key).unwrap();

    assert!(!result.is_found());

    let mut everyone = network.contacts();
    everyone.push(local);

    let responders: Vec<_> = result.responders.iter().map(|r| r.contact.clone()).collect();
    assert_eq!(ids(&responders), ids(&closest(everyone, &key, 20)));
}

#[test]
fn bootstrapping() {
    let network = SimulatedNetwork::new(NETWORK_SIZE);
    let (dht, _) = dht(&network);

    assert!(dht.bootstrapped().unwrap());
}

#[test]
fn concurrent_lookups() {
    let network = SimulatedNetwork::new(NETWORK_SIZE);
    let (dht, _) = dht(&network);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dht = dht.clone();
            thread::spawn(move || dht.find_node(Id::random()).unwrap())
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap();
        assert_eq!(result.responders.len(), 20);
    }

    let info = dht.info().unwrap();
    assert_eq!(info.completed_lookups(), 4);
    assert_eq!(info.active_lookups(), 0);
    assert!(info.average_hops() >= 1.0);
}

#[test]
fn lookup_timeout_wakes_the_actor() {
    init_logging();

    let network = SimulatedNetwork::new(20);
    let black_hole = BlackHole::default();

    let config = Config {
        node_lookup_timeout: Duration::from_millis(200),
        ..Default::default()
    };

    let mut routing_table = kadwalk::RoutingTable::with_config(local(), &config);
    for contact in network.contacts() {
        routing_table.add(contact, false);
    }

    let dht = Dht::with_routing_table(config, routing_table, black_hole.clone()).unwrap();

    let start = Instant::now();
    let result = dht.find_node(Id::random()).unwrap();

    assert!(start.elapsed() >= Duration::from_millis(200));
    // Only the local contact.
    assert_eq!(result.responders.len(), 1);
    assert_eq!(result.statistics.requests, 3);
    assert_eq!(black_hole.pending(), 3);
}

#[test]
fn shutdown_finishes_running_lookups() {
    let black_hole = BlackHole::default();
    let network = SimulatedNetwork::new(5);

    let config = Config {
        node_lookup_timeout: Duration::ZERO,
        ..Default::default()
    };

    let mut dht = Dht::builder()
        .config(config)
        .bootstrap(&network.contacts())
        .build(local(), black_hole.clone())
        .unwrap();

    let clone = dht.clone();
    let lookup = thread::spawn(move || clone.find_node(Id::random()));

    while black_hole.pending() < 3 {
        thread::sleep(Duration::from_millis(5));
    }

    dht.shutdown();

    let result = lookup.join().unwrap().unwrap();
    assert_eq!(result.statistics.requests, 3);
    assert!(dht.find_node(Id::random()).is_err());
}
