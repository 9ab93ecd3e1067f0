use std::{collections::VecDeque, time::Duration};

use bytes::Bytes;
use futures::{stream::FuturesUnordered, StreamExt};
use log::{debug, trace, warn};
use model::{PiecePrivateKey, RedundancyScheme};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::ErasureCodec,
    error::{EcError, FailureCause},
    reader::SegmentReader,
    AuthorizedPiece, DownloadOutcome, FailedPiece, PieceStore, TransferEngine,
};

impl<S> TransferEngine<S>
where
    S: PieceStore,
{
    /// Download pieces of a segment until `min_required` of them pass verification, then hand
    /// back a reader decoding the segment from them.
    ///
    /// Fetches start for `min_required + download_overfetch` pieces; each failure is replaced by
    /// the next candidate. Once enough pieces are verified the remaining fetches are dropped.
    /// When the candidates left can no longer reach `min_required`, the reader is
    /// `EcError::Irreparable`.
    pub async fn download(
        &self,
        pieces: Vec<AuthorizedPiece>,
        key: &PiecePrivateKey,
        scheme: &RedundancyScheme,
        segment_size: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> DownloadOutcome {
        let codec = match ErasureCodec::new(scheme) {
            Ok(codec) => codec,
            Err(e) => {
                return DownloadOutcome {
                    reader: Err(e),
                    failed_pieces: vec![],
                }
            }
        };

        let mut shares: Vec<Option<Bytes>> = vec![None; scheme.total()];
        let mut failed_pieces = vec![];
        let interrupted = {
            let gather = self.gather(
                pieces,
                key,
                scheme,
                segment_size,
                &mut shares,
                &mut failed_pieces,
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(EcError::Cancelled),
                res = tokio::time::timeout(timeout, gather) => match res {
                    Ok(()) => None,
                    Err(_elapsed) => Some(EcError::Timeout(timeout)),
                },
            }
        };

        let reader = match interrupted {
            Some(e) => {
                debug!("Piece download interrupted: {e}");
                Err(e)
            }
            None => SegmentReader::new(codec, shares, segment_size),
        };
        DownloadOutcome {
            reader,
            failed_pieces,
        }
    }

    async fn gather(
        &self,
        pieces: Vec<AuthorizedPiece>,
        key: &PiecePrivateKey,
        scheme: &RedundancyScheme,
        segment_size: u64,
        shares: &mut [Option<Bytes>],
        failed_pieces: &mut Vec<FailedPiece>,
    ) {
        let required = scheme.min_required();
        let wanted = required + self.options.download_overfetch;
        let piece_size = scheme.piece_size(segment_size);

        let mut candidates: VecDeque<AuthorizedPiece> = pieces
            .into_iter()
            .filter(|authorized| {
                let in_range = (authorized.piece.piece_num as usize) < shares.len();
                if !in_range {
                    warn!(
                        "Skip piece {} of node {}: beyond total of {}",
                        authorized.piece.piece_num,
                        authorized.piece.node_id,
                        shares.len()
                    );
                }
                in_range
            })
            .collect();

        let mut inflight = FuturesUnordered::new();
        let mut verified = 0;
        loop {
            if verified + inflight.len() + candidates.len() < required {
                debug!(
                    "Only {} pieces verified, {} in flight and {} left; {} required",
                    verified,
                    inflight.len(),
                    candidates.len(),
                    required
                );
                return;
            }

            while inflight.len() < self.options.max_concurrent_transfers
                && verified + inflight.len() < wanted
            {
                match candidates.pop_front() {
                    Some(authorized) => inflight.push(self.fetch(authorized, key, piece_size)),
                    None => break,
                }
            }

            let Some((authorized, result)) = inflight.next().await else {
                return;
            };
            match result {
                Ok(data) => {
                    trace!(
                        "Downloaded piece {} from node {}",
                        authorized.piece.piece_num,
                        authorized.piece.node_id
                    );
                    shares[authorized.piece.piece_num as usize] = Some(data);
                    verified += 1;
                    if verified >= required {
                        return;
                    }
                }
                Err(cause) => {
                    warn!(
                        "Failed to download piece {} from node {}: {cause}",
                        authorized.piece.piece_num, authorized.piece.node_id
                    );
                    failed_pieces.push(FailedPiece {
                        piece: authorized.piece,
                        cause,
                    });
                }
            }
        }
    }

    async fn fetch(
        &self,
        authorized: AuthorizedPiece,
        key: &PiecePrivateKey,
        piece_size: usize,
    ) -> (AuthorizedPiece, Result<Bytes, FailureCause>) {
        let result = match tokio::time::timeout(
            self.options.download_timeout,
            self.store
                .download(&authorized.limit, key, piece_size as u64),
        )
        .await
        {
            Err(_elapsed) => Err(FailureCause::Timeout),
            Ok(Err(e)) => Err(FailureCause::Node(e)),
            Ok(Ok(data)) if data.len() != piece_size => Err(FailureCause::SizeMismatch {
                expected: piece_size,
                actual: data.len(),
            }),
            Ok(Ok(data)) if !authorized.piece.hash.verify(&data) => {
                Err(FailureCause::HashMismatch)
            }
            Ok(Ok(data)) => Ok(data),
        };
        (authorized, result)
    }
}

#[cfg(test)]
mod tests {
    use std::{rc::Rc, time::Duration};

    use bytes::Bytes;
    use chrono::Utc;
    use model::{
        error::ServiceError, AddressedOrderLimit, BucketScope, NodeId, OrderAction, OrderLimit,
        Piece, PieceHash, PieceId, PiecePrivateKey, RedundancyScheme, SerialNumber,
    };
    use tokio_util::sync::CancellationToken;

    use crate::{
        codec::ErasureCodec, error::EcError, AuthorizedPiece, FailureCause, MockPieceStore,
        TransferEngine, TransferOptions,
    };

    fn authorize(piece_num: u16, hash: PieceHash) -> AuthorizedPiece {
        let node_id = NodeId::from(piece_num as u64 + 1);
        AuthorizedPiece {
            piece: Piece::new(piece_num, node_id, hash),
            limit: AddressedOrderLimit {
                limit: OrderLimit {
                    serial_number: SerialNumber::random(),
                    scope: BucketScope::new("project/bucket"),
                    node_id,
                    piece_id: PieceId::default().derive(&node_id, piece_num),
                    piece_num,
                    action: OrderAction::GetRepair,
                    limit: 0,
                    expiration: Utc::now(),
                    signature: Bytes::new(),
                },
                address: format!("node-{piece_num}:7777"),
            },
        }
    }

    fn options() -> TransferOptions {
        TransferOptions {
            download_timeout: Duration::from_secs(1),
            max_concurrent_transfers: 8,
            download_overfetch: 0,
        }
    }

    #[tokio::test]
    async fn test_download_replaces_failed_pieces() -> Result<(), EcError> {
        ulog::try_init_log();
        let scheme = RedundancyScheme::new(2, 2, 3, 4, 8).unwrap();
        let data = Bytes::from_static(b"repair me, please");
        let pieces = ErasureCodec::new(&scheme)?.encode_segment(&data)?;

        let stored = pieces.clone();
        let mut store = MockPieceStore::new();
        store.expect_download().returning(move |limit, _, _| {
            match limit.piece_num() {
                0 => Err(ServiceError::unavailable("connection refused")),
                num => Ok(stored[num as usize].clone()),
            }
        });

        let authorized: Vec<_> = pieces
            .iter()
            .enumerate()
            .map(|(num, piece)| authorize(num as u16, PieceHash::of(piece)))
            .collect();
        let engine = TransferEngine::new(Rc::new(store), options());
        let outcome = engine
            .download(
                authorized,
                &PiecePrivateKey::new(Bytes::from_static(b"key")),
                &scheme,
                data.len() as u64,
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(1, outcome.failed_pieces.len());
        assert_eq!(0, outcome.failed_pieces[0].piece.piece_num);
        assert!(matches!(
            outcome.failed_pieces[0].cause,
            FailureCause::Node(ServiceError::Unavailable(_))
        ));
        assert_eq!(data, outcome.reader?.read_all()?);
        Ok(())
    }

    #[tokio::test]
    async fn test_download_cancelled() {
        let scheme = RedundancyScheme::new(2, 2, 3, 4, 8).unwrap();
        let store = MockPieceStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let engine = TransferEngine::new(Rc::new(store), options());
        let outcome = engine
            .download(
                vec![
                    authorize(0, PieceHash::default()),
                    authorize(1, PieceHash::default()),
                ],
                &PiecePrivateKey::new(Bytes::new()),
                &scheme,
                16,
                Duration::from_secs(10),
                &cancel,
            )
            .await;
        assert!(matches!(outcome.reader, Err(EcError::Cancelled)));
        assert!(outcome.failed_pieces.is_empty());
    }
}
