//! Bookkeeping of a segment's pieces across one repair attempt.

use std::collections::HashSet;

use erasure::UploadedPiece;
use itertools::Itertools;
use model::{AddressedOrderLimit, Node, NodeId, Piece, RedundancyScheme};

/// Pieces of a segment split by a single snapshot of missing piece numbers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PieceClassification {
    pub healthy: Vec<Piece>,
    pub unhealthy: Vec<Piece>,

    /// Every node holding a piece of the segment, healthy or not. New pieces must not land there.
    pub excluded_nodes: Vec<NodeId>,
}

impl PieceClassification {
    pub fn classify(pieces: &[Piece], missing: &[u16]) -> Self {
        let missing: HashSet<u16> = missing.iter().copied().collect();
        let (unhealthy, healthy): (Vec<Piece>, Vec<Piece>) = pieces
            .iter()
            .cloned()
            .partition(|piece| missing.contains(&piece.piece_num));
        let excluded_nodes = pieces.iter().map(|piece| piece.node_id).unique().collect();
        Self {
            healthy,
            unhealthy,
            excluded_nodes,
        }
    }

    pub fn num_healthy(&self) -> usize {
        self.healthy.len()
    }
}

/// Piece records for the uploads that succeeded, numbered by their slot.
pub fn repaired_pieces(results: &[Option<UploadedPiece>]) -> Vec<Piece> {
    results
        .iter()
        .enumerate()
        .filter_map(|(num, uploaded)| {
            uploaded
                .as_ref()
                .map(|uploaded| Piece::new(num as u16, uploaded.node_id, uploaded.hash.clone()))
        })
        .collect()
}

/// Pieces to drop from the pointer when committing a repair.
///
/// Pieces that failed verification always go. Unhealthy pieces all go once the segment reaches
/// its success threshold; short of it, only those whose piece number was taken over by a
/// repaired piece go, so a later attempt can still count on the others coming back.
pub fn pieces_to_remove(
    scheme: &RedundancyScheme,
    unhealthy: &[Piece],
    repaired: &[Piece],
    failed_verification: &[Piece],
    healthy_after_repair: usize,
) -> Vec<Piece> {
    let mut to_remove: Vec<Piece> = if healthy_after_repair >= scheme.success_threshold() {
        unhealthy.to_vec()
    } else {
        let repaired: HashSet<u16> = repaired.iter().map(|piece| piece.piece_num).collect();
        unhealthy
            .iter()
            .filter(|piece| repaired.contains(&piece.piece_num))
            .cloned()
            .collect()
    };

    for piece in failed_verification {
        if !to_remove.contains(piece) {
            to_remove.push(piece.clone());
        }
    }
    to_remove
}

/// Assign `nodes` to the piece numbers no download was authorized for, lowest number first.
///
/// The result has `total` slots; slots left over once the nodes run out stay empty.
pub fn replacement_slots(
    total: usize,
    get_limits: &[Option<AddressedOrderLimit>],
    nodes: &[Node],
) -> Vec<Option<Node>> {
    let mut nodes = nodes.iter();
    (0..total)
        .map(|num| match get_limits.get(num) {
            Some(Some(_)) => None,
            _ => nodes.next().cloned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use model::{Node, NodeId, Piece, PieceHash, PieceId, RedundancyScheme};

    use super::{pieces_to_remove, replacement_slots, PieceClassification};

    fn pieces(nums: std::ops::Range<u16>) -> Vec<Piece> {
        nums.map(|num| Piece::new(num, NodeId::from(num as u64 + 1), PieceHash::default()))
            .collect()
    }

    fn scheme() -> RedundancyScheme {
        RedundancyScheme::new(3, 5, 7, 10, 256).unwrap()
    }

    #[test]
    fn test_classify() {
        let pieces = pieces(0..10);
        let classification = PieceClassification::classify(&pieces, &[1, 3, 5, 42]);
        assert_eq!(7, classification.num_healthy());
        assert_eq!(
            vec![1, 3, 5],
            classification
                .unhealthy
                .iter()
                .map(|piece| piece.piece_num)
                .collect::<Vec<_>>()
        );
        assert_eq!(10, classification.excluded_nodes.len());
        assert!(classification
            .healthy
            .iter()
            .all(|piece| !classification.unhealthy.contains(piece)));
    }

    #[test]
    fn test_pieces_to_remove_on_success() {
        let all = pieces(0..10);
        let classification = PieceClassification::classify(&all, &[4, 5, 6, 7, 8, 9]);
        let repaired: Vec<Piece> = (4..7)
            .map(|num| Piece::new(num, NodeId::from(100 + num as u64), PieceHash::default()))
            .collect();
        let failed = vec![all[1].clone()];

        let to_remove =
            pieces_to_remove(&scheme(), &classification.unhealthy, &repaired, &failed, 7);
        assert_eq!(7, to_remove.len());
        assert!(classification
            .unhealthy
            .iter()
            .all(|piece| to_remove.contains(piece)));
        assert!(to_remove.contains(&all[1]));
    }

    #[test]
    fn test_pieces_to_remove_on_partial_repair() {
        let all = pieces(0..10);
        let classification = PieceClassification::classify(&all, &[4, 5, 6, 7, 8, 9]);
        let repaired = vec![Piece::new(4, NodeId::from(104), PieceHash::default())];

        let to_remove = pieces_to_remove(&scheme(), &classification.unhealthy, &repaired, &[], 5);
        assert_eq!(vec![all[4].clone()], to_remove);
    }

    #[test]
    fn test_failed_pieces_are_not_removed_twice() {
        let all = pieces(0..4);
        let to_remove = pieces_to_remove(&scheme(), &all[2..], &[], &all[3..], 7);
        assert_eq!(2, to_remove.len());
    }

    #[test]
    fn test_replacement_slots() {
        let root = PieceId::default();
        let get_limits: Vec<_> = (0..5u16)
            .map(|num| {
                (num % 2 == 0).then(|| {
                    mock_server::order_limit(
                        &root,
                        NodeId::from(num as u64),
                        num,
                        model::OrderAction::GetRepair,
                    )
                })
            })
            .collect();
        let nodes = vec![
            Node::new(NodeId::from(7), "a:1"),
            Node::new(NodeId::from(8), "b:1"),
        ];

        let slots = replacement_slots(6, &get_limits, &nodes);
        assert_eq!(6, slots.len());
        assert_eq!(Some(&nodes[0]), slots[1].as_ref());
        assert_eq!(Some(&nodes[1]), slots[3].as_ref());
        assert!(slots[5].is_none());
        assert_eq!(2, slots.iter().flatten().count());
    }
}
