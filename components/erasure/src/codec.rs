use bytes::{Bytes, BytesMut};
use model::RedundancyScheme;
use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::EcError;

/// Reed-Solomon code applied stripe by stripe.
///
/// A stripe is `min_required` erasure shares of `share_size` bytes. Encoding a stripe yields
/// `total` shares; piece `i` of a segment is the concatenation of share `i` of every stripe.
/// Any `min_required` shares of a stripe decode it.
pub struct ErasureCodec {
    scheme: RedundancyScheme,

    /// `None` when the scheme has no parity shares and every share is required.
    rs: Option<ReedSolomon>,
}

impl ErasureCodec {
    pub fn new(scheme: &RedundancyScheme) -> Result<Self, EcError> {
        let data_shards = scheme.min_required();
        let parity_shards = scheme.total() - data_shards;
        let rs = if parity_shards == 0 {
            None
        } else {
            Some(ReedSolomon::new(data_shards, parity_shards).map_err(|e| {
                EcError::InvalidScheme(format!(
                    "{data_shards} data shards, {parity_shards} parity shards: {e}"
                ))
            })?)
        };
        Ok(Self {
            scheme: *scheme,
            rs,
        })
    }

    pub fn scheme(&self) -> &RedundancyScheme {
        &self.scheme
    }

    /// Encode one stripe into `total` shares. A short stripe is zero padded.
    pub fn encode_stripe(&self, stripe: &[u8]) -> Result<Vec<Vec<u8>>, EcError> {
        let share_size = self.scheme.share_size();
        if stripe.len() > self.scheme.stripe_size() {
            return Err(EcError::Codec(format!(
                "stripe of {} bytes exceeds stripe size {}",
                stripe.len(),
                self.scheme.stripe_size()
            )));
        }

        let mut shares: Vec<Vec<u8>> = (0..self.scheme.total())
            .map(|i| {
                let mut share = vec![0u8; share_size];
                if i < self.scheme.min_required() {
                    let start = (i * share_size).min(stripe.len());
                    let end = ((i + 1) * share_size).min(stripe.len());
                    share[..end - start].copy_from_slice(&stripe[start..end]);
                }
                share
            })
            .collect();

        if let Some(rs) = &self.rs {
            rs.encode(&mut shares)?;
        }
        Ok(shares)
    }

    /// Decode one stripe from the shares at hand, indexed by piece number.
    pub fn decode_stripe(&self, shares: &mut [Option<Vec<u8>>]) -> Result<Vec<u8>, EcError> {
        if shares.len() != self.scheme.total() {
            return Err(EcError::Codec(format!(
                "expected {} shares, got {}",
                self.scheme.total(),
                shares.len()
            )));
        }
        let available = shares.iter().filter(|share| share.is_some()).count();
        if available < self.scheme.min_required() {
            return Err(EcError::Irreparable {
                available,
                required: self.scheme.min_required(),
            });
        }

        if let Some(rs) = &self.rs {
            rs.reconstruct_data(shares)?;
        }

        let mut stripe = Vec::with_capacity(self.scheme.stripe_size());
        for share in shares.iter().take(self.scheme.min_required()) {
            match share {
                Some(share) => stripe.extend_from_slice(share),
                None => return Err(EcError::Codec("stripe reconstruction incomplete".into())),
            }
        }
        Ok(stripe)
    }

    /// Encode a whole segment into its `total` pieces.
    pub fn encode_segment(&self, data: &[u8]) -> Result<Vec<Bytes>, EcError> {
        let stripe_size = self.scheme.stripe_size();
        let stripe_count = self.scheme.stripe_count(data.len() as u64);
        let piece_size = self.scheme.piece_size(data.len() as u64);
        let mut pieces: Vec<BytesMut> = (0..self.scheme.total())
            .map(|_| BytesMut::with_capacity(piece_size))
            .collect();

        for index in 0..stripe_count {
            let start = (index * stripe_size).min(data.len());
            let end = ((index + 1) * stripe_size).min(data.len());
            let shares = self.encode_stripe(&data[start..end])?;
            for (piece, share) in pieces.iter_mut().zip(shares) {
                piece.extend_from_slice(&share);
            }
        }
        Ok(pieces.into_iter().map(BytesMut::freeze).collect())
    }
}
