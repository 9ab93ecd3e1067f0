use std::{rc::Rc, time::Duration};

use erasure::PieceStore;
use futures::{stream::FuturesUnordered, StreamExt};
use log::{error, info, trace, warn};
use model::{error::ServiceError, SegmentPath};
use observation::metrics::repair_metrics;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

use crate::{
    segments::{IrreparableSegment, RepairAttempt, RepairOutcome, SegmentRepairer},
    MetadataStore, NodeDirectory, OrderService,
};

/// Queue of segments suspected to need repair, filled by an external checker.
#[cfg_attr(test, automock)]
pub trait RepairQueue {
    /// Next segment to repair, if any.
    async fn select(&self) -> Result<Option<SegmentPath>, ServiceError>;

    async fn delete(&self, path: &SegmentPath) -> Result<(), ServiceError>;
}

/// Record of segments that can no longer be reconstructed.
#[cfg_attr(test, automock)]
pub trait IrreparableStore {
    async fn insert(&self, segment: IrreparableSegment) -> Result<(), ServiceError>;
}

#[cfg_attr(test, automock)]
pub trait Repair {
    async fn repair(&self, path: &SegmentPath, cancel: &CancellationToken) -> RepairAttempt;
}

impl<M, D, O, S> Repair for SegmentRepairer<M, D, O, S>
where
    M: MetadataStore,
    D: NodeDirectory,
    O: OrderService,
    S: PieceStore,
{
    async fn repair(&self, path: &SegmentPath, cancel: &CancellationToken) -> RepairAttempt {
        SegmentRepairer::repair(self, path, cancel).await
    }
}

/// Drains the repair queue, running up to `max_repair` attempts at once on the current task.
pub struct RepairService<Q, I, R> {
    queue: Rc<Q>,
    irreparable: Rc<I>,
    repairer: Rc<R>,
    max_repair: usize,
    interval: Duration,
}

impl<Q, I, R> RepairService<Q, I, R>
where
    Q: RepairQueue,
    I: IrreparableStore,
    R: Repair,
{
    pub fn new(
        queue: Rc<Q>,
        irreparable: Rc<I>,
        repairer: Rc<R>,
        config: &config::Repairer,
    ) -> Self {
        Self {
            queue,
            irreparable,
            repairer,
            max_repair: config.max_repair.max(1),
            interval: config.interval(),
        }
    }

    /// Run until `cancel` fires. Attempts in flight at that point are awaited; they observe the
    /// same token and finish promptly.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Repair service started, max-repair={}, interval={:?}",
            self.max_repair, self.interval
        );
        let mut inflight = FuturesUnordered::new();
        loop {
            while inflight.len() < self.max_repair && !cancel.is_cancelled() {
                match self.queue.select().await {
                    Ok(Some(path)) => {
                        trace!("Selected segment {} for repair", path);
                        inflight.push(self.attempt(path, &cancel));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to select a segment from the repair queue: {}", e);
                        break;
                    }
                }
            }

            if inflight.is_empty() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => continue,
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some((path, attempt)) = inflight.next() => self.process(path, attempt).await,
            }
        }

        while let Some((path, attempt)) = inflight.next().await {
            self.process(path, attempt).await;
        }
        info!("Repair service stopped");
    }

    async fn attempt(
        &self,
        path: SegmentPath,
        cancel: &CancellationToken,
    ) -> (SegmentPath, RepairAttempt) {
        let attempt = self.repairer.repair(&path, cancel).await;
        (path, attempt)
    }

    async fn process(&self, path: SegmentPath, attempt: RepairAttempt) {
        attempt.report.record_metrics();
        repair_metrics::repair_outcome(attempt.outcome.as_str());

        match attempt.outcome {
            RepairOutcome::Retired(None) => {
                trace!("Segment {} retired from the repair queue", path);
            }
            RepairOutcome::Retired(Some(e)) => {
                info!("Segment {} retired from the repair queue: {}", path, e);
            }
            RepairOutcome::Irreparable(segment) => {
                warn!("{}", segment);
                if let Err(e) = self.irreparable.insert(segment).await {
                    error!(
                        "Failed to file irreparable segment {}, keep it queued: {}",
                        path, e
                    );
                    return;
                }
            }
            RepairOutcome::Retryable(e) => {
                info!("Segment {} stays queued for retry: {}", path, e);
                return;
            }
        }

        if let Err(e) = self.queue.delete(&path).await {
            error!("Failed to delete segment {} from the repair queue: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{rc::Rc, time::Duration};

    use bytes::Bytes;
    use chrono::Utc;
    use model::{error::ServiceError, Segment, SegmentPath, SegmentPointer};
    use tokio_util::sync::CancellationToken;

    use super::{MockIrreparableStore, MockRepair, MockRepairQueue, RepairService};
    use crate::{
        error::RepairError,
        report::RepairReport,
        segments::{IrreparableSegment, RepairAttempt, RepairOutcome},
    };

    const RETIRED: &str = "p/s0/b/retired";
    const IRREPARABLE: &str = "p/s1/b/irreparable";
    const RETRYABLE: &str = "p/s2/b/retryable";

    fn attempt_for(path: &SegmentPath) -> RepairAttempt {
        let outcome = match path.as_str() {
            RETIRED => RepairOutcome::Retired(None),
            IRREPARABLE => RepairOutcome::Irreparable(IrreparableSegment {
                path: path.clone(),
                pointer: SegmentPointer {
                    path: path.clone(),
                    segment_size: 4,
                    creation_time: Utc::now(),
                    expiration_time: None,
                    last_repaired: None,
                    repair_count: 0,
                    segment: Segment::Inline(Bytes::from_static(b"data")),
                },
                available: 2,
                required: 3,
                detected_at: Utc::now(),
            }),
            _ => RepairOutcome::Retryable(RepairError::Cancelled),
        };
        RepairAttempt {
            outcome,
            report: RepairReport::new(path.clone()),
        }
    }

    /// A queue handing out `paths` once, then cancelling the service.
    fn queue(paths: &[&str], cancel: &CancellationToken) -> MockRepairQueue {
        let mut paths: Vec<SegmentPath> = paths.iter().rev().map(SegmentPath::new).collect();
        let cancel = cancel.clone();
        let mut queue = MockRepairQueue::new();
        queue.expect_select().returning(move || {
            let path = paths.pop();
            if path.is_none() {
                cancel.cancel();
            }
            Ok(path)
        });
        queue
    }

    fn repairer() -> MockRepair {
        let mut repairer = MockRepair::new();
        repairer
            .expect_repair()
            .returning(|path, _| attempt_for(path));
        repairer
    }

    fn config() -> config::Repairer {
        config::Repairer {
            max_repair: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_routes_outcomes() {
        ulog::try_init_log();
        let cancel = CancellationToken::new();
        let mut queue = queue(&[RETIRED, IRREPARABLE, RETRYABLE], &cancel);
        queue
            .expect_delete()
            .withf(|path| path.as_str() == RETIRED)
            .times(1)
            .returning(|_| Ok(()));
        queue
            .expect_delete()
            .withf(|path| path.as_str() == IRREPARABLE)
            .times(1)
            .returning(|_| Ok(()));
        queue
            .expect_delete()
            .withf(|path| path.as_str() == RETRYABLE)
            .never();
        let mut irreparable = MockIrreparableStore::new();
        irreparable
            .expect_insert()
            .withf(|segment| segment.available == 2 && segment.required == 3)
            .times(1)
            .returning(|_| Ok(()));

        let service = RepairService::new(
            Rc::new(queue),
            Rc::new(irreparable),
            Rc::new(repairer()),
            &config(),
        );
        service.run(cancel).await;
    }

    #[tokio::test]
    async fn test_irreparable_stays_queued_when_filing_fails() {
        let cancel = CancellationToken::new();
        let mut queue = queue(&[IRREPARABLE], &cancel);
        queue.expect_delete().never();
        let mut irreparable = MockIrreparableStore::new();
        irreparable
            .expect_insert()
            .times(1)
            .returning(|_| Err(ServiceError::unavailable("store down")));

        let service = RepairService::new(
            Rc::new(queue),
            Rc::new(irreparable),
            Rc::new(repairer()),
            &config(),
        );
        service.run(cancel).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_on_empty_queue() {
        let cancel = CancellationToken::new();
        let mut selects = 0;
        let mut queue = MockRepairQueue::new();
        let token = cancel.clone();
        queue.expect_select().times(2).returning(move || {
            selects += 1;
            if selects == 2 {
                token.cancel();
            }
            Ok(None)
        });
        let mut repairer = MockRepair::new();
        repairer.expect_repair().never();

        let service = RepairService::new(
            Rc::new(queue),
            Rc::new(MockIrreparableStore::new()),
            Rc::new(repairer),
            &config(),
        );
        let started = tokio::time::Instant::now();
        service.run(cancel).await;
        assert!(started.elapsed() >= Duration::from_millis(config().interval_ms));
    }

    #[tokio::test]
    async fn test_queue_failure_does_not_stop_the_service() {
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let token = cancel.clone();
        let mut queue = MockRepairQueue::new();
        queue.expect_select().returning(move || {
            calls += 1;
            match calls {
                1 => Err(ServiceError::Timeout),
                2 => Ok(Some(SegmentPath::new(RETIRED))),
                _ => {
                    token.cancel();
                    Ok(None)
                }
            }
        });
        queue.expect_delete().times(1).returning(|_| Ok(()));

        let service = RepairService::new(
            Rc::new(queue),
            Rc::new(MockIrreparableStore::new()),
            Rc::new(repairer()),
            &config::Repairer {
                interval_ms: 10,
                ..config()
            },
        );
        service.run(cancel).await;
    }
}
