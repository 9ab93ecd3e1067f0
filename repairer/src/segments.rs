use std::{rc::Rc, time::Duration};

use chrono::{DateTime, Utc};
use erasure::{AuthorizedPiece, EcError, PieceStore, TransferEngine, TransferOptions};
use log::{debug, info, trace, warn};
use model::{Health, OrderAction, Piece, RepairClass, SegmentPath, SegmentPointer};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    error::RepairError,
    pieces::{self, PieceClassification},
    report::{RepairReport, RepairStatus},
    AuditOutcome, MetadataStore, NodeDirectory, OrderService,
};

/// A segment with fewer retrievable pieces than its code needs. It must be filed for
/// follow-up rather than retried or dropped.
#[derive(Debug, Clone, Error)]
#[error("Segment {path} is irreparable: {available} available pieces < {required} required")]
pub struct IrreparableSegment {
    pub path: SegmentPath,
    pub pointer: SegmentPointer,
    pub available: usize,
    pub required: usize,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum RepairOutcome {
    /// Done with the segment. The error, if any, is for monitoring only.
    Retired(Option<RepairError>),

    /// Done with the segment, which belongs in the irreparable segment store.
    Irreparable(IrreparableSegment),

    /// The segment stays queued for another attempt.
    Retryable(RepairError),
}

impl RepairOutcome {
    /// Whether the segment should leave the repair queue.
    pub fn should_retire(&self) -> bool {
        !matches!(self, RepairOutcome::Retryable(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepairOutcome::Retired(_) => "retired",
            RepairOutcome::Irreparable(_) => "irreparable",
            RepairOutcome::Retryable(_) => "retryable",
        }
    }
}

#[derive(Debug)]
pub struct RepairAttempt {
    pub outcome: RepairOutcome,
    pub report: RepairReport,
}

pub struct SegmentRepairer<M, D, O, S> {
    metadata: Rc<M>,
    directory: Rc<D>,
    orders: Rc<O>,
    engine: TransferEngine<S>,

    /// Shared deadline of the uploads.
    timeout: Duration,

    /// Deadline of a whole attempt, the download included.
    total_timeout: Duration,

    excess_optimal_threshold: f64,
    repair_override: Option<usize>,
}

impl<M, D, O, S> SegmentRepairer<M, D, O, S>
where
    M: MetadataStore,
    D: NodeDirectory,
    O: OrderService,
    S: PieceStore,
{
    pub fn new(
        metadata: Rc<M>,
        directory: Rc<D>,
        orders: Rc<O>,
        store: Rc<S>,
        config: &config::Repairer,
    ) -> Self {
        Self {
            metadata,
            directory,
            orders,
            engine: TransferEngine::new(store, TransferOptions::from(config)),
            timeout: config.timeout(),
            total_timeout: config.total_timeout(),
            excess_optimal_threshold: config.max_excess_rate_optimal_threshold.max(0.0),
            repair_override: config.repair_override(),
        }
    }

    /// Repair the segment at `path` if it needs it.
    ///
    /// The attempt is bounded by the total timeout and gives up as soon as `cancel` fires; both
    /// leave the segment retryable and its pointer untouched.
    pub async fn repair(&self, path: &SegmentPath, cancel: &CancellationToken) -> RepairAttempt {
        let log_ident = format!("Segment[{path}] ");
        let mut report = RepairReport::new(path.clone());

        let deadline = Instant::now() + self.total_timeout;
        let interrupted = {
            let attempt = self.attempt(path, &log_ident, deadline, cancel, &mut report);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RepairError::Cancelled),
                res = tokio::time::timeout_at(deadline, attempt) => {
                    res.map_err(|_elapsed| RepairError::Timeout(self.total_timeout))
                }
            }
        };

        let outcome = match interrupted {
            Ok(outcome) => outcome,
            Err(e) => {
                report.status = match e {
                    RepairError::Cancelled => RepairStatus::Cancelled,
                    _ => RepairStatus::TimedOut,
                };
                info!("{}Repair interrupted: {}", log_ident, e);
                RepairOutcome::Retryable(e)
            }
        };
        RepairAttempt { outcome, report }
    }

    async fn attempt(
        &self,
        path: &SegmentPath,
        log_ident: &str,
        deadline: Instant,
        cancel: &CancellationToken,
        report: &mut RepairReport,
    ) -> RepairOutcome {
        let mut pointer = match self.metadata.get(path).await {
            Ok(pointer) => pointer,
            Err(e) if e.is_not_found() => {
                debug!("{}Segment was deleted", log_ident);
                report.status = RepairStatus::SegmentDeleted;
                return RepairOutcome::Retired(None);
            }
            Err(e) => {
                warn!("{}Failed to fetch segment pointer: {}", log_ident, e);
                report.status = RepairStatus::MetadataFetchFailed;
                return RepairOutcome::Retryable(RepairError::MetadataFetch(e));
            }
        };

        let Some(remote) = pointer.remote() else {
            report.status = RepairStatus::InlineSegment;
            return RepairOutcome::Retired(Some(RepairError::InvalidSegment(
                "cannot repair inline segment".to_owned(),
            )));
        };

        if pointer.is_expired(Utc::now()) {
            debug!("{}Segment expired, skip repair", log_ident);
            report.status = RepairStatus::Expired;
            return RepairOutcome::Retired(None);
        }

        report.segment_size = Some(pointer.segment_size);
        let scheme = remote.redundancy;
        report.total_pieces = Some(scheme.total());

        let missing = match self.directory.find_missing_pieces(&remote.pieces).await {
            Ok(missing) => missing,
            Err(e) => {
                warn!("{}Failed to identify missing pieces: {}", log_ident, e);
                report.status = RepairStatus::DirectoryQueryFailed;
                return RepairOutcome::Retryable(RepairError::DirectoryQuery(e));
            }
        };
        let classification = PieceClassification::classify(&remote.pieces, &missing);
        let num_healthy = classification.num_healthy();
        report.healthy_before = Some(num_healthy);

        match scheme.assess(num_healthy, self.repair_override) {
            Health::Irreparable {
                available,
                required,
            } => {
                warn!(
                    "{}Only {} healthy pieces, {} required to decode",
                    log_ident, available, required
                );
                report.status = RepairStatus::NodesUnavailable;
                return RepairOutcome::Irreparable(IrreparableSegment {
                    path: path.clone(),
                    pointer,
                    available,
                    required,
                    detected_at: Utc::now(),
                });
            }
            Health::Healthy => {
                debug!(
                    "{}Segment above repair threshold: {} healthy, threshold {}",
                    log_ident,
                    num_healthy,
                    scheme.effective_repair_threshold(self.repair_override)
                );
                report.status = RepairStatus::Unnecessary;
                return RepairOutcome::Retired(None);
            }
            Health::NeedsRepair => {}
        }

        let scope = match path.bucket_scope() {
            Ok(scope) => scope,
            Err(e) => {
                report.status = RepairStatus::InvalidPath;
                return RepairOutcome::Retired(Some(RepairError::InvalidSegment(format!(
                    "invalid path; cannot repair segment: {e}"
                ))));
            }
        };

        let get_limits = match self
            .orders
            .create_get_repair_order_limits(&scope, &pointer, &classification.healthy)
            .await
        {
            Ok(get_limits) => get_limits,
            Err(e) => {
                report.status = RepairStatus::AuthorizationFailed;
                return RepairOutcome::Retryable(RepairError::Authorization {
                    action: OrderAction::GetRepair,
                    source: e,
                });
            }
        };

        let request_count = scheme.replacement_count(self.excess_optimal_threshold, num_healthy);
        if request_count == 0 {
            info!(
                "{}{} healthy pieces already reach the optimal threshold {}",
                log_ident,
                num_healthy,
                scheme.optimal_threshold()
            );
            report.status = RepairStatus::Unnecessary;
            return RepairOutcome::Retired(None);
        }

        let new_nodes = match self
            .directory
            .find_storage_nodes_for_repair(request_count, &classification.excluded_nodes)
            .await
        {
            Ok(new_nodes) => new_nodes,
            Err(e) => {
                warn!("{}Failed to find {} new nodes: {}", log_ident, request_count, e);
                report.status = RepairStatus::DirectoryQueryFailed;
                return RepairOutcome::Retryable(RepairError::DirectoryQuery(e));
            }
        };

        let put_limits = match self
            .orders
            .create_put_repair_order_limits(&scope, &pointer, &get_limits.limits, &new_nodes)
            .await
        {
            Ok(put_limits) => put_limits,
            Err(e) => {
                report.status = RepairStatus::AuthorizationFailed;
                return RepairOutcome::Retryable(RepairError::Authorization {
                    action: OrderAction::PutRepair,
                    source: e,
                });
            }
        };

        let authorized: Vec<AuthorizedPiece> = classification
            .healthy
            .iter()
            .filter_map(|piece| {
                let limit = get_limits
                    .limits
                    .get(piece.piece_num as usize)
                    .and_then(Option::as_ref);
                if limit.is_none() {
                    debug!(
                        "{}No download authorized for piece {} on node {}",
                        log_ident, piece.piece_num, piece.node_id
                    );
                }
                limit.map(|limit| AuthorizedPiece {
                    piece: piece.clone(),
                    limit: limit.clone(),
                })
            })
            .collect();

        trace!(
            "{}Downloading from {} of {} healthy pieces",
            log_ident,
            authorized.len(),
            num_healthy
        );
        let download = self
            .engine
            .download(
                authorized,
                &get_limits.key,
                &scheme,
                pointer.segment_size,
                deadline.saturating_duration_since(Instant::now()),
                cancel,
            )
            .await;

        let (failed_verification, transient): (Vec<_>, Vec<_>) = download
            .failed_pieces
            .into_iter()
            .partition(|failed| failed.cause.is_verification_failure());
        report.audit_failures = failed_verification.len();
        report.transient_failures = transient.len();
        for failed in &transient {
            debug!(
                "{}Piece {} on node {} unavailable: {}",
                log_ident, failed.piece.piece_num, failed.piece.node_id, failed.cause
            );
        }
        let failed_verification: Vec<Piece> = failed_verification
            .into_iter()
            .map(|failed| failed.piece)
            .collect();
        self.record_audit_failures(log_ident, &failed_verification)
            .await;

        let reader = match download.reader {
            Ok(reader) => reader,
            Err(EcError::Irreparable {
                available,
                required,
            }) => {
                warn!(
                    "{}Downloaded {} pieces, {} required to decode",
                    log_ident, available, required
                );
                report.status = RepairStatus::TooManyNodesFailed;
                return RepairOutcome::Irreparable(IrreparableSegment {
                    path: path.clone(),
                    pointer,
                    available,
                    required,
                    detected_at: Utc::now(),
                });
            }
            Err(EcError::Cancelled) => {
                report.status = RepairStatus::Cancelled;
                return RepairOutcome::Retryable(RepairError::Cancelled);
            }
            // The download runs on what is left of the attempt deadline.
            Err(EcError::Timeout(_)) => {
                info!("{}Download did not finish in time", log_ident);
                report.status = RepairStatus::TimedOut;
                return RepairOutcome::Retryable(RepairError::Timeout(self.total_timeout));
            }
            Err(e) => {
                warn!("{}Segment could not be reconstructed: {}", log_ident, e);
                report.status = RepairStatus::ReconstructionFailed;
                return RepairOutcome::Retired(Some(RepairError::Reconstruction(e)));
            }
        };

        let results = match self
            .engine
            .upload(
                &put_limits.limits,
                &put_limits.key,
                &scheme,
                reader,
                self.timeout,
                cancel,
            )
            .await
        {
            Ok(results) => results,
            Err(EcError::Cancelled) => {
                report.status = RepairStatus::Cancelled;
                return RepairOutcome::Retryable(RepairError::Cancelled);
            }
            Err(e) => {
                warn!("{}Failed to upload repaired pieces: {}", log_ident, e);
                report.status = RepairStatus::UploadFailed;
                return RepairOutcome::Retryable(RepairError::Upload(e));
            }
        };

        let repaired = pieces::repaired_pieces(&results);
        let healthy_after_repair = num_healthy + repaired.len();
        let class = RepairClass::classify(&scheme, healthy_after_repair);
        report.healthy_after = Some(healthy_after_repair);
        report.class = Some(class);
        info!(
            "{}Uploaded {} pieces, {} healthy after repair: {}",
            log_ident,
            repaired.len(),
            healthy_after_repair,
            class.as_str()
        );

        let to_remove = pieces::pieces_to_remove(
            &scheme,
            &classification.unhealthy,
            &repaired,
            &failed_verification,
            healthy_after_repair,
        );

        let now = Utc::now();
        let segment_age = pointer.age(now);
        pointer.mark_repaired(now);
        if let Err(e) = self
            .metadata
            .update_pieces(path, &pointer, repaired, to_remove)
            .await
        {
            warn!("{}Failed to commit repaired pieces: {}", log_ident, e);
            report.status = RepairStatus::CommitFailed;
            return RepairOutcome::Retryable(RepairError::Commit(e));
        }

        report.segment_age = Some(segment_age.to_std().unwrap_or_default());
        report.repair_count = Some(pointer.repair_count);
        report.status = RepairStatus::Repaired;
        RepairOutcome::Retired(None)
    }

    async fn record_audit_failures(&self, log_ident: &str, pieces: &[Piece]) {
        for piece in pieces {
            info!(
                "{}Piece {} on node {} failed verification",
                log_ident, piece.piece_num, piece.node_id
            );
            if let Err(e) = self
                .directory
                .record_audit_outcome(piece.node_id, AuditOutcome::Failure)
                .await
            {
                debug!(
                    "{}Failed to record audit failure of node {}: {}",
                    log_ident, piece.node_id, e
                );
            }
        }
    }
}
