pub mod error;
pub mod node;
pub mod order;
pub mod path;
pub mod piece;
pub mod pointer;
pub mod redundancy;

pub use crate::node::{Node, NodeId};
pub use crate::order::{AddressedOrderLimit, OrderAction, OrderLimit, PiecePrivateKey, SerialNumber};
pub use crate::path::{BucketScope, SegmentPath};
pub use crate::piece::{Piece, PieceHash, PieceId};
pub use crate::pointer::{RemoteSegment, Segment, SegmentPointer};
pub use crate::redundancy::{Health, RedundancyScheme, RepairClass};
