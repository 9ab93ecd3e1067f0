//! Repair of erasure-coded segments whose pieces were lost to node churn.
//!
//! [`segments::SegmentRepairer`] decides whether a segment needs repair, rebuilds it from the
//! surviving pieces and stores fresh pieces on replacement nodes. [`service::RepairService`]
//! feeds it from the repair queue.

#![allow(async_fn_in_trait)]

pub mod error;
pub mod pieces;
pub mod report;
pub mod segments;
pub mod service;

use model::{
    error::ServiceError, AddressedOrderLimit, BucketScope, Node, NodeId, Piece, PiecePrivateKey,
    SegmentPath, SegmentPointer,
};

#[cfg(test)]
use mockall::automock;

pub use crate::error::RepairError;
pub use crate::report::{RepairReport, RepairStatus};
pub use crate::segments::{IrreparableSegment, RepairAttempt, RepairOutcome, SegmentRepairer};
pub use crate::service::{IrreparableStore, Repair, RepairQueue, RepairService};

/// Durable segment metadata.
#[cfg_attr(test, automock)]
pub trait MetadataStore {
    /// Fetch the pointer of a segment. `ServiceError::NotFound` if it no longer exists.
    async fn get(&self, path: &SegmentPath) -> Result<SegmentPointer, ServiceError>;

    /// Atomically append `add` to and drop `remove` from the segment's pieces, taking the repair
    /// stamps from `base`. Returns the pointer as stored.
    async fn update_pieces(
        &self,
        path: &SegmentPath,
        base: &SegmentPointer,
        add: Vec<Piece>,
        remove: Vec<Piece>,
    ) -> Result<SegmentPointer, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// Liveness and placement knowledge about storage nodes.
#[cfg_attr(test, automock)]
pub trait NodeDirectory {
    /// Piece numbers of `pieces` whose node is unreachable or gone.
    async fn find_missing_pieces(&self, pieces: &[Piece]) -> Result<Vec<u16>, ServiceError>;

    /// Select up to `count` nodes to hold new pieces, none of them in `excluded`.
    async fn find_storage_nodes_for_repair(
        &self,
        count: usize,
        excluded: &[NodeId],
    ) -> Result<Vec<Node>, ServiceError>;

    async fn record_audit_outcome(
        &self,
        node_id: NodeId,
        outcome: AuditOutcome,
    ) -> Result<(), ServiceError>;
}

/// Order limits indexed by piece number, with the key to sign orders against them.
#[derive(Debug, Clone)]
pub struct OrderLimits {
    pub limits: Vec<Option<AddressedOrderLimit>>,
    pub key: PiecePrivateKey,
}

/// Issues transfer authorizations.
#[cfg_attr(test, automock)]
pub trait OrderService {
    async fn create_get_repair_order_limits(
        &self,
        scope: &BucketScope,
        pointer: &SegmentPointer,
        pieces: &[Piece],
    ) -> Result<OrderLimits, ServiceError>;

    /// Authorize uploads to `nodes`, assigning them piece numbers not covered by `get_limits`.
    async fn create_put_repair_order_limits(
        &self,
        scope: &BucketScope,
        pointer: &SegmentPointer,
        get_limits: &[Option<AddressedOrderLimit>],
        nodes: &[Node],
    ) -> Result<OrderLimits, ServiceError>;
}
