//! The reference join, anycast and leave scenarios.

use std::sync::{Arc, Mutex};

use canopy_integration_tests::{assert_consistent, network, spawn_named};
use canopy_protocols::{PeerId, PeerStatus};
use canopy_topology::{Adjacency, Bound, Constraint, Coordinate, Direction, Element, Zone};

fn zone(lower: &[&Element], upper: &[&Element]) -> Zone {
    Zone::new(
        Coordinate::new(lower.iter().map(|e| (*e).clone()).collect()),
        Coordinate::new(upper.iter().map(|e| (*e).clone()).collect()),
    )
    .unwrap()
}

#[tokio::test]
async fn join_splits_on_first_dimension() {
    let network = network(2, "A", "Z");
    let peers = spawn_named(&network, &["p1", "p2"]).await;
    let (p1, p2) = (&peers[0], &peers[1]);

    p1.create().await.unwrap();
    let joined = p2.join(p1.id()).await.unwrap();

    let (a, z) = (Element::new("A"), Element::new("Z"));
    let m = Element::middle(&a, &z);
    assert_eq!(p1.zone().await.unwrap(), Some(zone(&[&a, &a], &[&m, &z])));
    assert_eq!(joined, zone(&[&m, &a], &[&z, &z]));
    assert_eq!(p2.zone().await.unwrap(), Some(joined));

    assert_eq!(
        p1.neighbor_table().await.unwrap().find(&p2.id()),
        Some(Adjacency::new(0, Direction::Superior))
    );
    assert_eq!(
        p2.neighbor_table().await.unwrap().find(&p1.id()),
        Some(Adjacency::new(0, Direction::Inferior))
    );
    assert_eq!(p2.status().await.unwrap(), PeerStatus::Joined);
    assert_consistent(&network).await;
}

#[tokio::test]
async fn anycast_hits_each_matching_zone_once() {
    let network = network(3, "a", "z");
    let peers = spawn_named(&network, &["p1", "p2", "p3", "p4"]).await;
    let (p1, p2, p3, p4) = (&peers[0], &peers[1], &peers[2], &peers[3]);

    p1.create().await.unwrap();
    p2.join(p1.id()).await.unwrap();
    p3.join(p1.id()).await.unwrap();
    p4.join(p2.id()).await.unwrap();
    assert_consistent(&network).await;

    let subject = Constraint::any(3).with(0, Bound::Point(Element::new("k")));
    let invoked = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&invoked);

    for origin in &peers {
        invoked.lock().unwrap().clear();
        let outcome = origin
            .route_anycast(subject.clone(), {
                let seen = Arc::clone(&seen);
                move |peer: PeerId, _: &Zone| {
                    seen.lock().unwrap().push(peer);
                    None
                }
            })
            .await
            .unwrap();

        let mut expected = vec![p1.id(), p3.id()];
        expected.sort();
        assert_eq!(outcome.peers(), expected, "from {}", origin.id());

        let mut calls = invoked.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, expected);
        assert!(!calls.contains(&p2.id()) && !calls.contains(&p4.id()));
    }
}

#[tokio::test]
async fn leave_merges_into_the_only_mergeable_neighbor() {
    let network = network(2, "A", "Z");
    let peers = spawn_named(&network, &["p1", "p2", "p3"]).await;
    let (p1, p2, p3) = (&peers[0], &peers[1], &peers[2]);

    p1.create().await.unwrap();
    p2.join(p1.id()).await.unwrap();
    p3.join(p1.id()).await.unwrap();

    let z1 = p1.zone().await.unwrap().unwrap();
    let z3 = p3.zone().await.unwrap().unwrap();
    let z2 = p2.zone().await.unwrap().unwrap();
    assert!(z1.can_merge(&z3).is_some());
    assert!(z2.can_merge(&z3).is_none());

    p3.leave().await.unwrap();

    assert_eq!(p1.zone().await.unwrap(), Some(z1.merge(&z3).unwrap()));
    assert_eq!(p2.zone().await.unwrap(), Some(z2));
    for peer in [p1, p2] {
        assert!(!peer.neighbor_table().await.unwrap().contains(&p3.id()));
    }
    assert!(!network.contains(&p3.id()).await);
    assert_consistent(&network).await;
}
