use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt};
use log::{debug, info, warn};
use model::{AddressedOrderLimit, PieceHash, PiecePrivateKey, RedundancyScheme};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::ErasureCodec,
    error::{EcError, FailureCause},
    reader::SegmentReader,
    PieceStore, TransferEngine, UploadedPiece,
};

impl<S> TransferEngine<S>
where
    S: PieceStore,
{
    /// Re-encode the segment read from `reader` and upload the pieces to the nodes in `limits`.
    ///
    /// `limits` is indexed by piece number and must have `total` slots; only pieces with an
    /// order limit are uploaded. The result has one slot per piece number, `None` wherever no
    /// upload was authorized, the node failed or the shared `timeout` expired first.
    pub async fn upload(
        &self,
        limits: &[Option<AddressedOrderLimit>],
        key: &PiecePrivateKey,
        scheme: &RedundancyScheme,
        reader: SegmentReader,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<UploadedPiece>>, EcError> {
        if limits.len() != scheme.total() {
            return Err(EcError::LimitsMismatch {
                expected: scheme.total(),
                actual: limits.len(),
            });
        }

        let pieces = encode(&ErasureCodec::new(scheme)?, reader)?;
        let attempted = limits.iter().flatten().count();
        let mut uploads = stream::iter(
            limits
                .iter()
                .zip(pieces)
                .enumerate()
                .filter_map(|(num, (limit, piece))| limit.as_ref().map(|limit| (num, limit, piece))),
        )
        .map(|(num, limit, piece)| self.put(num, limit, key, piece))
        .buffer_unordered(self.options.max_concurrent_transfers);

        let mut results: Vec<Option<UploadedPiece>> = vec![None; scheme.total()];
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut timed_out = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EcError::Cancelled),
                _ = &mut deadline => {
                    timed_out = true;
                    break;
                }
                next = uploads.next() => match next {
                    Some((num, Ok(uploaded))) => results[num] = Some(uploaded),
                    Some((num, Err(cause))) => {
                        warn!(
                            "Failed to upload piece {} to node {:?}: {cause}",
                            num,
                            limits[num].as_ref().map(AddressedOrderLimit::node_id)
                        );
                    }
                    None => break,
                },
            }
        }

        let succeeded = results.iter().flatten().count();
        if timed_out {
            info!(
                "Upload deadline of {:?} expired with {}/{} pieces stored",
                timeout, succeeded, attempted
            );
        }
        match succeeded {
            0 if timed_out => Err(EcError::Timeout(timeout)),
            0 => Err(EcError::AllUploadsFailed(attempted)),
            _ => {
                debug!("Uploaded {}/{} pieces", succeeded, attempted);
                Ok(results)
            }
        }
    }

    async fn put(
        &self,
        num: usize,
        limit: &AddressedOrderLimit,
        key: &PiecePrivateKey,
        piece: Bytes,
    ) -> (usize, Result<UploadedPiece, FailureCause>) {
        let expected = PieceHash::of(&piece);
        let result = match self.store.upload(limit, key, piece).await {
            Ok(hash) if hash == expected => Ok(UploadedPiece {
                node_id: limit.node_id(),
                hash,
            }),
            Ok(_) => Err(FailureCause::HashMismatch),
            Err(e) => Err(FailureCause::Node(e)),
        };
        (num, result)
    }
}

/// Encode every stripe the reader yields, concatenating share `i` of each stripe into piece `i`.
fn encode(codec: &ErasureCodec, reader: SegmentReader) -> Result<Vec<Bytes>, EcError> {
    let scheme = codec.scheme();
    let piece_size = scheme.piece_size(reader.segment_size());
    let mut pieces: Vec<BytesMut> = (0..scheme.total())
        .map(|_| BytesMut::with_capacity(piece_size))
        .collect();
    for stripe in reader {
        let shares = codec.encode_stripe(&stripe?)?;
        for (piece, share) in pieces.iter_mut().zip(shares) {
            piece.extend_from_slice(&share);
        }
    }
    Ok(pieces.into_iter().map(BytesMut::freeze).collect())
}

#[cfg(test)]
mod tests {
    use std::{rc::Rc, time::Duration};

    use bytes::Bytes;
    use model::{PiecePrivateKey, RedundancyScheme};
    use tokio_util::sync::CancellationToken;

    use crate::{
        codec::ErasureCodec, error::EcError, reader::SegmentReader, MockPieceStore,
        TransferEngine, TransferOptions,
    };

    fn reader(scheme: &RedundancyScheme, data: &[u8]) -> SegmentReader {
        let codec = ErasureCodec::new(scheme).unwrap();
        let pieces = codec.encode_segment(data).unwrap().into_iter().map(Some).collect();
        SegmentReader::new(codec, pieces, data.len() as u64).unwrap()
    }

    #[tokio::test]
    async fn test_upload_rejects_short_limits() {
        let scheme = RedundancyScheme::new(2, 2, 3, 4, 8).unwrap();
        let engine = TransferEngine::new(Rc::new(MockPieceStore::new()), TransferOptions::default());
        let res = engine
            .upload(
                &[None, None],
                &PiecePrivateKey::new(Bytes::new()),
                &scheme,
                reader(&scheme, b"abc"),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(
            res,
            Err(EcError::LimitsMismatch {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_upload_without_limits() {
        let scheme = RedundancyScheme::new(2, 2, 3, 4, 8).unwrap();
        let engine = TransferEngine::new(Rc::new(MockPieceStore::new()), TransferOptions::default());
        let res = engine
            .upload(
                &[None, None, None, None],
                &PiecePrivateKey::new(Bytes::new()),
                &scheme,
                reader(&scheme, b"abc"),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(res, Err(EcError::AllUploadsFailed(0))));
    }
}
