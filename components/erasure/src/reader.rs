use bytes::{Bytes, BytesMut};
use log::trace;

use crate::{codec::ErasureCodec, error::EcError};

/// Streams the content of a segment, decoding it stripe by stripe from downloaded pieces.
///
/// Each item is the content of one stripe; the last one is cut at the segment size so that
/// padding never leaks out.
pub struct SegmentReader {
    codec: ErasureCodec,

    /// Downloaded pieces indexed by piece number.
    pieces: Vec<Option<Bytes>>,

    segment_size: u64,
    stripe_count: usize,
    next_stripe: usize,
    emitted: u64,
    closed: bool,
}

impl SegmentReader {
    pub(crate) fn new(
        codec: ErasureCodec,
        pieces: Vec<Option<Bytes>>,
        segment_size: u64,
    ) -> Result<Self, EcError> {
        let scheme = *codec.scheme();
        let piece_size = scheme.piece_size(segment_size);
        let available = pieces.iter().flatten().count();
        if available < scheme.min_required() {
            return Err(EcError::Irreparable {
                available,
                required: scheme.min_required(),
            });
        }
        if let Some(piece) = pieces.iter().flatten().find(|p| p.len() != piece_size) {
            return Err(EcError::Codec(format!(
                "piece has {} bytes, expected {piece_size}",
                piece.len()
            )));
        }

        Ok(Self {
            codec,
            pieces,
            segment_size,
            stripe_count: scheme.stripe_count(segment_size),
            next_stripe: 0,
            emitted: 0,
            closed: false,
        })
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    pub fn stripe_count(&self) -> usize {
        self.stripe_count
    }

    /// Decode every remaining stripe into one buffer holding exactly the segment content.
    pub fn read_all(&mut self) -> Result<Bytes, EcError> {
        let mut buf = BytesMut::with_capacity(self.segment_size as usize);
        for stripe in self.by_ref() {
            buf.extend_from_slice(&stripe?);
        }
        Ok(buf.freeze())
    }

    /// Release the downloaded pieces. Further reads yield nothing.
    pub fn close(&mut self) {
        self.pieces.clear();
        self.closed = true;
    }

    fn decode_next(&mut self) -> Result<Bytes, EcError> {
        let share_size = self.codec.scheme().share_size();
        let offset = self.next_stripe * share_size;
        let mut shares: Vec<Option<Vec<u8>>> = self
            .pieces
            .iter()
            .map(|piece| {
                piece
                    .as_ref()
                    .map(|piece| piece[offset..offset + share_size].to_vec())
            })
            .collect();
        let mut stripe = self.codec.decode_stripe(&mut shares)?;

        let remaining = self.segment_size - self.emitted;
        stripe.truncate(remaining.min(stripe.len() as u64) as usize);
        self.emitted += stripe.len() as u64;
        trace!(
            "Decoded stripe {}/{} carrying {} bytes",
            self.next_stripe + 1,
            self.stripe_count,
            stripe.len()
        );
        Ok(Bytes::from(stripe))
    }
}

impl Iterator for SegmentReader {
    type Item = Result<Bytes, EcError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed || self.next_stripe >= self.stripe_count {
            return None;
        }
        let stripe = self.decode_next();
        self.next_stripe += 1;
        if stripe.is_err() {
            self.close();
        }
        Some(stripe)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use model::RedundancyScheme;

    use super::SegmentReader;
    use crate::{codec::ErasureCodec, error::EcError};

    fn pieces_of(scheme: &RedundancyScheme, data: &[u8], keep: &[usize]) -> Vec<Option<Bytes>> {
        let codec = ErasureCodec::new(scheme).unwrap();
        codec
            .encode_segment(data)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(num, piece)| keep.contains(&num).then_some(piece))
            .collect()
    }

    #[test]
    fn test_read_all() -> Result<(), EcError> {
        let scheme = RedundancyScheme::new(2, 3, 4, 5, 16).unwrap();
        let data: Vec<u8> = (0..100u8).collect();
        let pieces = pieces_of(&scheme, &data, &[1, 4]);

        let mut reader = SegmentReader::new(ErasureCodec::new(&scheme)?, pieces, 100)?;
        assert_eq!(4, reader.stripe_count());
        assert_eq!(&data[..], &reader.read_all()?[..]);
        assert!(reader.next().is_none());
        Ok(())
    }

    #[test]
    fn test_stripes_are_lazy() -> Result<(), EcError> {
        let scheme = RedundancyScheme::new(2, 3, 4, 5, 16).unwrap();
        let data: Vec<u8> = (0..40u8).collect();
        let pieces = pieces_of(&scheme, &data, &[0, 2, 3]);

        let mut reader = SegmentReader::new(ErasureCodec::new(&scheme)?, pieces, 40)?;
        let first = reader.next().unwrap()?;
        assert_eq!(&data[..32], &first[..]);
        reader.close();
        assert!(reader.next().is_none());
        Ok(())
    }

    #[test]
    fn test_empty_segment() -> Result<(), EcError> {
        let scheme = RedundancyScheme::new(2, 3, 4, 5, 16).unwrap();
        let pieces = pieces_of(&scheme, &[], &[0, 1]);
        let mut reader = SegmentReader::new(ErasureCodec::new(&scheme)?, pieces, 0)?;
        assert_eq!(1, reader.stripe_count());
        assert!(reader.read_all()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_too_few_pieces() {
        let scheme = RedundancyScheme::new(2, 3, 4, 5, 16).unwrap();
        let pieces = pieces_of(&scheme, b"hello", &[3]);
        let codec = ErasureCodec::new(&scheme).unwrap();
        assert!(matches!(
            SegmentReader::new(codec, pieces, 5),
            Err(EcError::Irreparable {
                available: 1,
                required: 2
            })
        ));
    }
}
