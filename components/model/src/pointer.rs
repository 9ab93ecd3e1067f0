use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

use crate::{
    path::SegmentPath,
    piece::{Piece, PieceId},
    redundancy::RedundancyScheme,
};

/// Durable description of one segment, owned by the metadata store.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPointer {
    pub path: SegmentPath,

    /// Size in bytes of the segment content before erasure coding.
    pub segment_size: u64,

    pub creation_time: DateTime<Utc>,

    /// Segments past their expiration are never repaired.
    pub expiration_time: Option<DateTime<Utc>>,

    pub last_repaired: Option<DateTime<Utc>>,

    pub repair_count: u32,

    pub segment: Segment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Small segment stored inline in the metadata; there is nothing to repair.
    Inline(Bytes),

    /// Erasure-coded segment spread over storage nodes.
    Remote(RemoteSegment),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSegment {
    pub redundancy: RedundancyScheme,
    pub root_piece_id: PieceId,
    pub pieces: Vec<Piece>,
}

impl SegmentPointer {
    pub fn remote(&self) -> Option<&RemoteSegment> {
        match &self.segment {
            Segment::Remote(remote) => Some(remote),
            Segment::Inline(_) => None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time
            .map(|expiration| expiration < now)
            .unwrap_or(false)
    }

    /// Time since the segment was created or last repaired, whichever is later.
    ///
    /// Clock skew may record a repair before creation; the later instant is used so the age
    /// is never inflated by it.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        let since = match self.last_repaired {
            Some(last_repaired) if self.creation_time < last_repaired => last_repaired,
            _ => self.creation_time,
        };
        now - since
    }

    /// Stamp a successful repair.
    pub fn mark_repaired(&mut self, now: DateTime<Utc>) {
        self.last_repaired = Some(now);
        self.repair_count += 1;
    }
}
