//! Piece transfer engine.
//!
//! Downloads enough pieces of a segment from storage nodes to rebuild it, and uploads freshly
//! encoded pieces to replacement nodes. Transfers run concurrently on the current task; a
//! single misbehaving node never fails the whole transfer.

#![allow(async_fn_in_trait)]

pub mod codec;
mod download;
pub mod error;
pub mod reader;
mod upload;

use std::{rc::Rc, time::Duration};

use bytes::Bytes;
use model::{error::ServiceError, AddressedOrderLimit, NodeId, Piece, PieceHash, PiecePrivateKey};

#[cfg(test)]
use mockall::automock;

pub use crate::codec::ErasureCodec;
pub use crate::error::{EcError, FailureCause};
pub use crate::reader::SegmentReader;

/// Client side of the storage node piece protocol.
#[cfg_attr(test, automock)]
pub trait PieceStore {
    /// Fetch `size` bytes of the piece `limit` grants access to.
    async fn download(
        &self,
        limit: &AddressedOrderLimit,
        key: &PiecePrivateKey,
        size: u64,
    ) -> Result<Bytes, ServiceError>;

    /// Store `data` as the piece `limit` grants access to. The node acknowledges with the hash of
    /// the bytes it stored.
    async fn upload(
        &self,
        limit: &AddressedOrderLimit,
        key: &PiecePrivateKey,
        data: Bytes,
    ) -> Result<PieceHash, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Deadline for a single piece download.
    pub download_timeout: Duration,

    /// Cap on simultaneous transfers.
    pub max_concurrent_transfers: usize,

    /// Pieces requested beyond the minimum required.
    pub download_overfetch: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from(&config::Repairer::default())
    }
}

impl From<&config::Repairer> for TransferOptions {
    fn from(config: &config::Repairer) -> Self {
        Self {
            download_timeout: config.download_timeout(),
            max_concurrent_transfers: config.max_concurrent_transfers.max(1),
            download_overfetch: config.download_overfetch,
        }
    }
}

/// A piece together with the order limit authorizing its download.
#[derive(Debug, Clone)]
pub struct AuthorizedPiece {
    pub piece: Piece,
    pub limit: AddressedOrderLimit,
}

/// A piece whose download was given up.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedPiece {
    pub piece: Piece,
    pub cause: FailureCause,
}

pub struct DownloadOutcome {
    /// Reader over the reconstructed segment, or why it could not be reconstructed.
    pub reader: Result<SegmentReader, EcError>,

    /// Pieces that were attempted and failed. Pieces never attempted are not listed.
    pub failed_pieces: Vec<FailedPiece>,
}

/// Acknowledgement of a stored piece.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedPiece {
    pub node_id: NodeId,
    pub hash: PieceHash,
}

pub struct TransferEngine<S> {
    store: Rc<S>,
    options: TransferOptions,
}

impl<S> TransferEngine<S>
where
    S: PieceStore,
{
    pub fn new(store: Rc<S>, options: TransferOptions) -> Self {
        Self { store, options }
    }
}
