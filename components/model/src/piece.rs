use std::fmt::{self, Debug, Formatter};

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::node::NodeId;

/// SHA-256 digest of the bytes of a stored piece.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct PieceHash(Bytes);

impl PieceHash {
    pub fn new(digest: Bytes) -> Self {
        Self(digest)
    }

    /// Hash the piece payload.
    pub fn of(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(&Sha256::digest(data)))
    }

    /// Test if `data` is exactly the payload this hash was computed from.
    pub fn verify(&self, data: &[u8]) -> bool {
        Sha256::digest(data).as_slice() == self.0.as_ref()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl Debug for PieceHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PieceHash(")?;
        for byte in self.0.iter().take(6) {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Storage key of a piece on a particular node.
///
/// A segment carries a single root piece ID; the key each node stores its piece under is
/// derived from the root, the node identity and the piece number, so that two nodes never
/// learn they hold pieces of the same segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PieceId([u8; 32]);

impl PieceId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn derive(&self, node_id: &NodeId, piece_num: u16) -> PieceId {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.update(node_id.as_bytes());
        hasher.update(piece_num.to_be_bytes());
        PieceId(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// One erasure-coded fragment of a segment as recorded in the segment pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    /// Position of the piece in the erasure code output; unique within a segment.
    pub piece_num: u16,

    /// Node currently holding the piece. Changes when the piece is replaced by repair.
    pub node_id: NodeId,

    /// Produced at upload time and verified on every later download.
    pub hash: PieceHash,
}

impl Piece {
    pub fn new(piece_num: u16, node_id: NodeId, hash: PieceHash) -> Self {
        Self {
            piece_num,
            node_id,
            hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PieceHash, PieceId};
    use crate::node::NodeId;

    #[test]
    fn test_hash_verify() {
        let hash = PieceHash::of(b"erasure share");
        assert!(hash.verify(b"erasure share"));
        assert!(!hash.verify(b"erasure shard"));
        assert_eq!(32, hash.as_bytes().len());
    }

    #[test]
    fn test_derive_piece_id() {
        let root = PieceId::new([7u8; 32]);
        let a = root.derive(&NodeId::from(1), 0);
        assert_eq!(a, root.derive(&NodeId::from(1), 0));
        assert_ne!(a, root.derive(&NodeId::from(2), 0));
        assert_ne!(a, root.derive(&NodeId::from(1), 1));
    }
}
