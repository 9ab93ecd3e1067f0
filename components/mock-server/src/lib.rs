//! In-memory storage node network for tests.
//!
//! Every node keeps its pieces in a shared map keyed by node and piece id. A node's behavior can
//! be switched at any time to simulate churn, slowness or dishonesty.

use std::{collections::HashMap, time::Duration};

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use erasure::{EcError, ErasureCodec, PieceStore};
use log::{debug, trace};
use model::{
    error::ServiceError, AddressedOrderLimit, BucketScope, NodeId, OrderAction, OrderLimit, Piece,
    PieceHash, PieceId, PiecePrivateKey, RedundancyScheme, SerialNumber,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeBehavior {
    #[default]
    Online,

    /// Every request fails as if the node were unreachable.
    Offline,

    /// Serves pieces with flipped bytes and stores uploads damaged.
    Corrupt,

    /// Answers after the given delay.
    Slow(Duration),

    /// Serves downloads but refuses to store new pieces.
    RejectUploads,
}

#[derive(Default)]
struct State {
    pieces: HashMap<(NodeId, PieceId), Bytes>,
    behaviors: HashMap<NodeId, NodeBehavior>,
    downloads: usize,
    uploads: usize,
}

#[derive(Default)]
pub struct MemoryNetwork {
    state: Mutex<State>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, node_id: NodeId, behavior: NodeBehavior) {
        self.state.lock().behaviors.insert(node_id, behavior);
    }

    pub fn behavior(&self, node_id: &NodeId) -> NodeBehavior {
        self.state
            .lock()
            .behaviors
            .get(node_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn store_piece(&self, node_id: NodeId, piece_id: PieceId, data: Bytes) {
        self.state.lock().pieces.insert((node_id, piece_id), data);
    }

    pub fn piece(&self, node_id: &NodeId, piece_id: &PieceId) -> Option<Bytes> {
        self.state.lock().pieces.get(&(*node_id, *piece_id)).cloned()
    }

    /// Number of pieces the network holds across all nodes.
    pub fn piece_count(&self) -> usize {
        self.state.lock().pieces.len()
    }

    /// Number of download requests served, failed ones included.
    pub fn download_count(&self) -> usize {
        self.state.lock().downloads
    }

    /// Number of upload requests received, failed ones included.
    pub fn upload_count(&self) -> usize {
        self.state.lock().uploads
    }

    /// Erasure-code `data` and store piece `i` on `nodes[i]`, for as many nodes as given.
    ///
    /// Returns the piece records a segment pointer would carry.
    pub fn seed_segment(
        &self,
        scheme: &RedundancyScheme,
        root_piece_id: &PieceId,
        data: &[u8],
        nodes: &[NodeId],
    ) -> Result<Vec<Piece>, EcError> {
        let pieces = ErasureCodec::new(scheme)?.encode_segment(data)?;
        let mut state = self.state.lock();
        let records = pieces
            .into_iter()
            .zip(nodes)
            .enumerate()
            .map(|(num, (data, node_id))| {
                let piece_num = num as u16;
                let hash = PieceHash::of(&data);
                state
                    .pieces
                    .insert((*node_id, root_piece_id.derive(node_id, piece_num)), data);
                Piece::new(piece_num, *node_id, hash)
            })
            .collect();
        debug!("Seeded {} bytes over {} nodes", data.len(), nodes.len());
        Ok(records)
    }

    async fn delay(&self, node_id: &NodeId) -> NodeBehavior {
        let behavior = self.behavior(node_id);
        if let NodeBehavior::Slow(delay) = behavior {
            tokio::time::sleep(delay).await;
        }
        behavior
    }
}

/// Build an order limit for piece `piece_num` of the segment rooted at `root` on `node_id`.
pub fn order_limit(
    root: &PieceId,
    node_id: NodeId,
    piece_num: u16,
    action: OrderAction,
) -> AddressedOrderLimit {
    AddressedOrderLimit {
        limit: OrderLimit {
            serial_number: SerialNumber::random(),
            scope: BucketScope::new("project/bucket"),
            node_id,
            piece_id: root.derive(&node_id, piece_num),
            piece_num,
            action,
            limit: u64::MAX,
            expiration: Utc::now() + chrono::Duration::hours(1),
            signature: Bytes::from_static(b"signed"),
        },
        address: format!("{node_id}.storage.test:28967"),
    }
}

fn corrupt(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::from(data);
    buf.iter_mut().for_each(|b| *b = !*b);
    buf.freeze()
}

impl PieceStore for MemoryNetwork {
    async fn download(
        &self,
        limit: &AddressedOrderLimit,
        _key: &PiecePrivateKey,
        size: u64,
    ) -> Result<Bytes, ServiceError> {
        self.state.lock().downloads += 1;
        let node_id = limit.node_id();
        let behavior = self.delay(&node_id).await;
        if behavior == NodeBehavior::Offline {
            return Err(ServiceError::unavailable(format!("node {node_id} is offline")));
        }

        let data = self
            .piece(&node_id, &limit.limit.piece_id)
            .ok_or(ServiceError::NotFound)?;
        let data = data.slice(..data.len().min(size as usize));
        trace!(
            "Node {} serves {} bytes of piece {}",
            node_id,
            data.len(),
            limit.piece_num()
        );
        if behavior == NodeBehavior::Corrupt {
            return Ok(corrupt(&data));
        }
        Ok(data)
    }

    async fn upload(
        &self,
        limit: &AddressedOrderLimit,
        _key: &PiecePrivateKey,
        data: Bytes,
    ) -> Result<PieceHash, ServiceError> {
        self.state.lock().uploads += 1;
        let node_id = limit.node_id();
        let data = match self.delay(&node_id).await {
            NodeBehavior::Offline => {
                return Err(ServiceError::unavailable(format!("node {node_id} is offline")))
            }
            NodeBehavior::RejectUploads => {
                return Err(ServiceError::rejected(format!(
                    "node {node_id} refuses new pieces"
                )))
            }
            NodeBehavior::Corrupt => corrupt(&data),
            NodeBehavior::Online | NodeBehavior::Slow(_) => data,
        };

        let hash = PieceHash::of(&data);
        self.store_piece(node_id, limit.limit.piece_id, data);
        Ok(hash)
    }
}
