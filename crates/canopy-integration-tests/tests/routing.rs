//! Unicast, anycast and broadcast over grown overlays.

use std::collections::BTreeSet;

use canopy_integration_tests::{grow, init_tracing, network, spawn_named, tracker};
use canopy_protocols::{Error, Network, OverlayConfig, PeerId, RoutingFailure};
use canopy_topology::{Bound, Constraint, Coordinate, Element, Zone};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

fn coordinates() -> Vec<Coordinate> {
    ["0", "3", "A", "M", "Q", "a", "k", "x", "z"]
        .iter()
        .flat_map(|x| ["1", "G", "h", "y"].iter().map(move |y| Coordinate::from_strs(&[*x, *y, "m"])))
        .collect()
}

#[tokio::test]
async fn unicast_reaches_the_owner_from_anywhere() {
    let network = network(3, "0", "{");
    let tracker = tracker(&network);
    let peers = grow(&network, &tracker, 20).await;

    for target in coordinates() {
        let mut owners = BTreeSet::new();
        for origin in peers.iter().step_by(3) {
            let outcome = origin.route_unicast(target.clone()).await.unwrap();
            assert!(outcome.zone.contains(&target));
            assert!(outcome.hops as usize <= peers.len());
            owners.insert(outcome.owner);
        }
        assert_eq!(owners.len(), 1, "{target} has one owner");
    }
}

#[tokio::test]
async fn unicast_to_own_zone_takes_no_hops() {
    let network = network(2, "A", "Z");
    let peers = spawn_named(&network, &["p1", "p2"]).await;
    peers[0].create().await.unwrap();
    let zone = peers[1].join(peers[0].id()).await.unwrap();

    let outcome = peers[1].route_unicast(zone.lower().clone()).await.unwrap();
    assert_eq!(outcome.owner, peers[1].id());
    assert_eq!(outcome.hops, 0);
}

#[tokio::test]
async fn hop_limit_stops_forwarding() {
    let network = Network::new(
        OverlayConfig::fast()
            .with_dimensions(2)
            .with_bounds("A", "Z")
            .with_max_hops(1),
    )
    .unwrap();
    let peers = spawn_named(&network, &["p1", "p2", "p3", "p4"]).await;
    peers[0].create().await.unwrap();
    peers[1].join(peers[0].id()).await.unwrap();
    peers[2].join(peers[0].id()).await.unwrap();
    peers[3].join(peers[1].id()).await.unwrap();

    // p1 holds the lower-left quarter, p4 the upper-right one: two hops apart.
    let err = peers[0]
        .route_unicast(Coordinate::from_strs(&["Y", "Y"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::RoutingIncomplete {
            hops: 1,
            reason: RoutingFailure::TtlExceeded { max_hops: 1 }
        }
    ));

    let outcome = peers[0]
        .route_unicast(Coordinate::from_strs(&["Y", "B"]))
        .await
        .unwrap();
    assert_eq!(outcome.owner, peers[1].id());
}

#[tokio::test]
async fn anycast_range_hits_exactly_the_intersecting_zones() {
    let network = network(3, "0", "{");
    let tracker = tracker(&network);
    let peers = grow(&network, &tracker, 16).await;

    let constraint = Constraint::any(3)
        .with(
            0,
            Bound::Range {
                low: Element::new("F"),
                high: Element::new("f"),
            },
        )
        .with(2, Bound::Point(Element::new("q")));
    let expected: BTreeSet<PeerId> = network
        .snapshot()
        .await
        .into_iter()
        .filter(|s| s.zone.as_ref().is_some_and(|z| constraint.matches_zone(z)))
        .map(|s| s.id)
        .collect();
    assert!(!expected.is_empty());

    for origin in peers.iter().take(4) {
        let outcome = origin
            .route_anycast(constraint.clone(), |_: PeerId, zone: &Zone| {
                Some(zone.to_string().into_bytes())
            })
            .await
            .unwrap();
        let hits = outcome.peers();
        let unique: BTreeSet<PeerId> = hits.iter().copied().collect();
        assert_eq!(hits.len(), unique.len(), "duplicate hits");
        assert_eq!(unique, expected);
        assert!(outcome.hits.iter().all(|h| h.payload.is_some()));
    }
}

#[tokio::test]
async fn broadcast_reaches_every_peer_once() {
    let network = network(2, "A", "Z");
    let tracker = tracker(&network);
    let peers = grow(&network, &tracker, 12).await;

    let mut receivers = Vec::new();
    for peer in &peers {
        receivers.push(peer.subscribe().await.unwrap());
    }

    let outcome = peers[5].route_broadcast(b"epoch 7".to_vec()).await.unwrap();
    assert_eq!(outcome.hits.len(), peers.len());

    for rx in &mut receivers {
        assert_eq!(rx.recv().await.unwrap(), b"epoch 7".to_vec());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }
}

#[tokio::test]
async fn slow_subscribers_lag_and_silent_peers_still_count() {
    init_tracing();
    let config = OverlayConfig::fast()
        .with_dimensions(2)
        .with_bounds("A", "Z")
        .with_delivery_capacity(2);
    let network = Network::new(config).unwrap();
    let peers = spawn_named(&network, &["p1", "p2"]).await;
    peers[0].create().await.unwrap();
    peers[1].join(peers[0].id()).await.unwrap();

    // Only p1 listens, and it reads nothing until three payloads are in.
    let mut rx = peers[0].subscribe().await.unwrap();
    for epoch in 1..=3u8 {
        let outcome = peers[1].route_broadcast(vec![epoch]).await.unwrap();
        assert_eq!(outcome.hits.len(), 2);
    }

    assert!(matches!(rx.recv().await, Err(RecvError::Lagged(1))));
    assert_eq!(rx.recv().await.unwrap(), vec![2]);
    assert_eq!(rx.recv().await.unwrap(), vec![3]);
}

#[tokio::test]
async fn multicast_routes_around_a_crashed_neighbor() {
    let network = network(2, "A", "Z");
    let tracker = tracker(&network);
    let peers = grow(&network, &tracker, 10).await;

    let dead = peers[4].id();
    let first = peers[4]
        .neighbor_table()
        .await
        .unwrap()
        .ids()
        .into_iter()
        .next()
        .unwrap();
    assert!(network.crash(&dead).await);

    // Nobody has reported the crash; the first origin finds out by trying.
    let outcome = network.handle(first).route_broadcast(b"after crash".to_vec()).await.unwrap();
    assert_eq!(outcome.unreachable, vec![dead]);

    for (i, origin) in peers.iter().filter(|p| p.id() != dead).enumerate() {
        let outcome = if i % 2 == 0 {
            origin.route_broadcast(b"after crash".to_vec()).await.unwrap()
        } else {
            origin
                .route_anycast(Constraint::any(2), |peer: PeerId, _: &Zone| Some(peer.as_bytes().to_vec()))
                .await
                .unwrap()
        };
        let hits = outcome.peers();
        let unique: BTreeSet<PeerId> = hits.iter().copied().collect();
        assert_eq!(hits.len(), unique.len(), "duplicate hits");
        assert!(!unique.contains(&dead));
        assert!(unique.contains(&origin.id()));
    }
}

#[tokio::test]
async fn routing_through_an_unjoined_peer_fails() {
    let network = network(2, "A", "Z");
    let peers = spawn_named(&network, &["p1"]).await;

    let err = peers[0]
        .route_unicast(Coordinate::from_strs(&["B", "B"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::RoutingIncomplete {
            reason: RoutingFailure::NotJoined,
            ..
        }
    ));
}
