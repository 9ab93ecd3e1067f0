use crate::error::ModelError;

/// Largest number of pieces a GF(2^8) Reed-Solomon code can produce.
pub const MAX_TOTAL_PIECES: usize = 256;

/// Parameters of the erasure code a segment is stored with.
///
/// Invariant: `0 < min_required <= repair_threshold <= success_threshold <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedundancyScheme {
    /// Number of pieces needed to decode the segment.
    min_required: usize,

    /// At or below this many healthy pieces the segment gets repaired.
    repair_threshold: usize,

    /// Number of healthy pieces a repair aims for.
    success_threshold: usize,

    /// Number of pieces the erasure code produces.
    total: usize,

    /// Size in bytes of one erasure share, the per-stripe slice of a piece.
    share_size: usize,
}

/// Health of a segment with respect to its redundancy scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Fewer healthy pieces than needed to decode.
    Irreparable { available: usize, required: usize },

    /// Healthy pieces above the effective repair threshold.
    Healthy,

    /// At or under the effective repair threshold but still decodable.
    NeedsRepair,
}

/// Result of a repair judged by the number of healthy pieces after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairClass {
    /// Still at or under the repair threshold.
    Failed,

    /// Above the repair threshold, under the success threshold.
    Partial,

    Success,
}

impl RepairClass {
    pub fn classify(scheme: &RedundancyScheme, healthy_after_repair: usize) -> Self {
        if healthy_after_repair <= scheme.repair_threshold {
            RepairClass::Failed
        } else if healthy_after_repair < scheme.success_threshold {
            RepairClass::Partial
        } else {
            RepairClass::Success
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepairClass::Failed => "failed",
            RepairClass::Partial => "partial",
            RepairClass::Success => "success",
        }
    }
}

impl RedundancyScheme {
    /// Build a scheme, validating its thresholds.
    ///
    /// A `repair_threshold` of 0 defaults to `min_required` and a `success_threshold` of 0
    /// defaults to `total`.
    pub fn new(
        min_required: usize,
        repair_threshold: usize,
        success_threshold: usize,
        total: usize,
        share_size: usize,
    ) -> Result<Self, ModelError> {
        let repair_threshold = if repair_threshold == 0 {
            min_required
        } else {
            repair_threshold
        };
        let success_threshold = if success_threshold == 0 {
            total
        } else {
            success_threshold
        };

        if min_required == 0 {
            return Err(ModelError::InvalidRedundancy(
                "min required must be positive".to_owned(),
            ));
        }
        if repair_threshold < min_required {
            return Err(ModelError::InvalidRedundancy(format!(
                "repair threshold {repair_threshold} is less than min required {min_required}"
            )));
        }
        if success_threshold < repair_threshold {
            return Err(ModelError::InvalidRedundancy(format!(
                "success threshold {success_threshold} is less than repair threshold {repair_threshold}"
            )));
        }
        if total < success_threshold {
            return Err(ModelError::InvalidRedundancy(format!(
                "total {total} is less than success threshold {success_threshold}"
            )));
        }
        if total > MAX_TOTAL_PIECES {
            return Err(ModelError::InvalidRedundancy(format!(
                "total {total} exceeds {MAX_TOTAL_PIECES}"
            )));
        }
        if share_size == 0 {
            return Err(ModelError::InvalidRedundancy(
                "share size must be positive".to_owned(),
            ));
        }

        Ok(Self {
            min_required,
            repair_threshold,
            success_threshold,
            total,
            share_size,
        })
    }

    pub fn min_required(&self) -> usize {
        self.min_required
    }

    pub fn repair_threshold(&self) -> usize {
        self.repair_threshold
    }

    pub fn success_threshold(&self) -> usize {
        self.success_threshold
    }

    /// Number of pieces a healthy segment should have; equal to the success threshold.
    pub fn optimal_threshold(&self) -> usize {
        self.success_threshold
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn share_size(&self) -> usize {
        self.share_size
    }

    /// Bytes of segment content carried by one stripe.
    pub fn stripe_size(&self) -> usize {
        self.min_required * self.share_size
    }

    /// Number of stripes needed for a segment of `segment_size` bytes. Never zero.
    pub fn stripe_count(&self, segment_size: u64) -> usize {
        let stripe_size = self.stripe_size() as u64;
        segment_size.div_ceil(stripe_size).max(1) as usize
    }

    /// Size in bytes of every piece of a segment of `segment_size` bytes.
    pub fn piece_size(&self, segment_size: u64) -> usize {
        self.stripe_count(segment_size) * self.share_size
    }

    /// Decide whether a segment with `num_healthy` pieces needs repair.
    ///
    /// `repair_override`, when present, takes precedence over the scheme's own repair
    /// threshold.
    pub fn assess(&self, num_healthy: usize, repair_override: Option<usize>) -> Health {
        if num_healthy < self.min_required {
            return Health::Irreparable {
                available: num_healthy,
                required: self.min_required,
            };
        }

        if num_healthy > self.effective_repair_threshold(repair_override) {
            Health::Healthy
        } else {
            Health::NeedsRepair
        }
    }

    pub fn effective_repair_threshold(&self, repair_override: Option<usize>) -> usize {
        match repair_override {
            Some(threshold) if threshold > 0 => threshold,
            _ => self.repair_threshold,
        }
    }

    /// Number of replacement nodes to request so that, counting the healthy pieces, the
    /// segment reaches the optimal threshold over-provisioned by `excess_fraction`.
    pub fn replacement_count(&self, excess_fraction: f64, num_healthy: usize) -> usize {
        let excess_fraction = excess_fraction.max(0.0);
        let wanted = (self.optimal_threshold() as f64 * (1.0 + excess_fraction)).ceil() as usize;
        wanted.saturating_sub(num_healthy)
    }
}
