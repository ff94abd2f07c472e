//! Byte codec for values that cross a network hop.
//!
//! Zones, coordinates, neighbor tables and join offers are encoded with
//! bincode. Tables keep their entries in ordered maps, so encoding the same
//! value always yields the same bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encode a value.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JoinOffer, NeighborEntry, NeighborTable, OverlayError, PeerId, SplitEntry};
    use canopy_topology::{Constraint, Coordinate, Direction, Element, Space, Zone, RADIX};

    fn offer() -> JoinOffer {
        let space = Space::new(2, Element::new("A"), Element::new("Z")).unwrap();
        let (low, high) = space.zone().split(0).unwrap();
        let (_, corner) = low.split(1).unwrap();
        let mut neighbors = NeighborTable::new(2);
        neighbors.add(NeighborEntry::new(PeerId::from_name("p1"), low), 0, Direction::Inferior);
        neighbors.add(NeighborEntry::new(PeerId::from_name("p3"), corner), 0, Direction::Inferior);
        JoinOffer {
            landmark: NeighborEntry::new(PeerId::from_name("p1"), space.zone()),
            zone: high,
            neighbors,
            split_history: vec![SplitEntry {
                dimension: 0,
                direction: Direction::Superior,
            }],
        }
    }

    #[test]
    fn join_offer_survives_a_hop_byte_for_byte() {
        let original = offer();
        let bytes = encode(&original).unwrap();
        let decoded: JoinOffer = decode(&bytes).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(encode(&decoded).unwrap(), bytes);
    }

    #[test]
    fn midpoint_digits_are_preserved() {
        let m = Element::middle(&Element::new("A"), &Element::new("Z"));
        let zone = Zone::new(
            Coordinate::new(vec![m.clone(), Element::new("A")]),
            Coordinate::from_strs(&["Z", "Z"]),
        )
        .unwrap();
        let decoded: Zone = decode(&encode(&zone).unwrap()).unwrap();
        assert_eq!(decoded.lower()[0], m);
    }

    #[test]
    fn constraint_encodes() {
        let constraint = Constraint::any(3).with(0, canopy_topology::Bound::Point(Element::new("k")));
        let decoded: Constraint = decode(&encode(&constraint).unwrap()).unwrap();
        assert_eq!(decoded, constraint);
    }

    #[test]
    fn truncated_input_is_a_codec_error() {
        let bytes = encode(&offer()).unwrap();
        let result: Result<JoinOffer> = decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(OverlayError::Codec(_))));
    }

    #[test]
    fn inverted_zone_is_rejected() {
        let corners = (Coordinate::from_strs(&["Z", "Z"]), Coordinate::from_strs(&["A", "A"]));
        let result: Result<Zone> = decode(&encode(&corners).unwrap());
        assert!(matches!(result, Err(OverlayError::Codec(_))));

        let space = (2usize, Element::new("Z"), Element::new("A"));
        let result: Result<Space> = decode(&encode(&space).unwrap());
        assert!(matches!(result, Err(OverlayError::Codec(_))));
    }

    #[test]
    fn decoded_elements_are_canonical() {
        let padded: Element = decode(&encode(&vec![65u32, 0, 0]).unwrap()).unwrap();
        assert_eq!(padded, Element::new("A"));
        assert_eq!(encode(&padded).unwrap(), encode(&Element::new("A")).unwrap());

        let result: Result<Element> = decode(&encode(&vec![65u32, RADIX]).unwrap());
        assert!(matches!(result, Err(OverlayError::Codec(_))));
    }

    #[test]
    fn offer_with_a_bad_zone_is_rejected() {
        let mut bytes = encode(&offer()).unwrap();
        let good: JoinOffer = decode(&bytes).unwrap();
        // Swap the offered zone's corners in place.
        let zone = encode(&good.zone).unwrap();
        let swapped = encode(&(good.zone.upper().clone(), good.zone.lower().clone())).unwrap();
        let at = bytes
            .windows(zone.len())
            .position(|w| w == zone.as_slice())
            .unwrap();
        bytes[at..at + zone.len()].copy_from_slice(&swapped);
        let result: Result<JoinOffer> = decode(&bytes);
        assert!(matches!(result, Err(OverlayError::Codec(_))));
    }
}
