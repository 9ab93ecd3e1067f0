use bytes::Bytes;
use chrono::{DateTime, Utc};
use derivative::Derivative;
use uuid::Uuid;

use crate::{node::NodeId, path::BucketScope, piece::PieceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerialNumber([u8; 16]);

impl SerialNumber {
    pub fn random() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    GetRepair,
    PutRepair,
}

/// Short-lived permission, signed by the authorization service, for one node to serve one
/// transfer of one piece. The repairer only carries it to the node.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLimit {
    pub serial_number: SerialNumber,
    pub scope: BucketScope,
    pub node_id: NodeId,
    pub piece_id: PieceId,
    pub piece_num: u16,
    pub action: OrderAction,

    /// Maximum number of bytes the transfer may move.
    pub limit: u64,

    pub expiration: DateTime<Utc>,
    pub signature: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddressedOrderLimit {
    pub limit: OrderLimit,
    pub address: String,
}

impl AddressedOrderLimit {
    pub fn node_id(&self) -> NodeId {
        self.limit.node_id
    }

    pub fn piece_num(&self) -> u16 {
        self.limit.piece_num
    }
}

/// Private key the repairer signs its orders with; issued together with a batch of limits.
#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct PiecePrivateKey {
    #[derivative(Debug = "ignore")]
    key: Bytes,
}

impl PiecePrivateKey {
    pub fn new(key: Bytes) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.key
    }
}
