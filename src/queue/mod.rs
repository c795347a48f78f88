//! Durable job queue contract: rolling-window rate limit, bounded
//! concurrency, exponential-backoff retry. FIFO between distinct orders is
//! not guaranteed and not observable.

pub mod memory;
pub mod redis;

pub use memory::MemoryJobQueue;
pub use redis::RedisJobQueue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::Order;
use crate::error::Result;

/// Queue contract parameters
#[derive(Debug, Clone)]
pub struct QueueLimits {
    /// Max jobs a pool may begin processing per rolling window
    pub max_throughput: u32,
    /// Rolling window for the throughput limit
    pub window: Duration,
    /// Max jobs in an active processing state at any instant
    pub concurrency: usize,
    /// First attempt plus retries
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_throughput: 100,
            window: Duration::from_secs(60),
            concurrency: 10,
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl QueueLimits {
    /// Delay before redelivering a job whose `attempts_made`-th attempt
    /// just failed: base × 2^(attempts_made - 1).
    pub fn backoff_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
    }
}

/// Queue payload: the order snapshot taken at intake, keyed by
/// `job_id == order_id`. Attempt count travels alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredJob {
    pub order: Order,
    pub attempts_made: u32,
}

/// A job handed to a worker. Holds the concurrency permit for as long as
/// the attempt is in flight; dropping the job releases the slot.
pub struct ReservedJob {
    pub order: Order,
    /// 1-based number of the attempt the worker is about to run
    pub attempt: u32,
    _permit: OwnedSemaphorePermit,
}

impl ReservedJob {
    pub fn order_id(&self) -> Uuid {
        self.order.order_id
    }
}

/// What the queue did with a failed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDisposition {
    /// Redelivery scheduled after the backoff delay
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted (or the failure was fatal); job retired
    Discarded { attempts: u32 },
}

/// Durable job queue seam. Rate limiting and the concurrency cap are
/// enforced here, not by workers: a worker may run any job it reserves
/// immediately.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue an order snapshot. Re-enqueueing a live job id is a no-op.
    async fn enqueue(&self, order: &Order) -> Result<()>;

    /// Block until the next eligible job clears the rate limit and a
    /// concurrency slot frees up. Returns `None` once the queue has been
    /// shut down and drained of permits.
    async fn reserve(&self) -> Result<Option<ReservedJob>>;

    /// Retire a job that ran to success.
    async fn complete(&self, job: ReservedJob) -> Result<()>;

    /// Record a failed attempt. Schedules the backoff redelivery unless the
    /// attempt was the last (or `fatal`), in which case the job is retired
    /// and the caller owns the post-mortem.
    async fn fail(&self, job: ReservedJob, error: &str, fatal: bool) -> Result<JobDisposition>;

    /// Stop handing out jobs; in-flight attempts run to disposition.
    fn shutdown(&self);
}

/// Shared admission control: the rolling start-window and the concurrency
/// semaphore, identical across backends.
pub(crate) struct Governor {
    limits: QueueLimits,
    slots: std::sync::Arc<Semaphore>,
    starts: tokio::sync::Mutex<VecDeque<Instant>>,
}

impl Governor {
    pub(crate) fn new(limits: QueueLimits) -> Self {
        let slots = std::sync::Arc::new(Semaphore::new(limits.concurrency));
        Self {
            limits,
            slots,
            starts: tokio::sync::Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn limits(&self) -> &QueueLimits {
        &self.limits
    }

    /// Wait for a concurrency slot and a start-window opening. Returns
    /// `None` when the queue has been shut down.
    pub(crate) async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        let permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return None,
        };

        loop {
            let wait = {
                let mut starts = self.starts.lock().await;
                let now = Instant::now();
                while starts
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.limits.window)
                {
                    starts.pop_front();
                }
                if (starts.len() as u32) < self.limits.max_throughput {
                    starts.push_back(now);
                    None
                } else {
                    // Sleep until the oldest start ages out of the window.
                    let oldest = *starts.front().expect("window is non-empty");
                    Some(
                        self.limits
                            .window
                            .saturating_sub(now.duration_since(oldest)),
                    )
                }
            };

            match wait {
                None => return Some(permit),
                Some(delay) => tokio::time::sleep(delay.max(Duration::from_millis(1))).await,
            }
        }
    }

    pub(crate) fn reserve_job(&self, order: Order, attempt: u32, permit: OwnedSemaphorePermit) -> ReservedJob {
        ReservedJob {
            order,
            attempt,
            _permit: permit,
        }
    }

    pub(crate) fn close(&self) {
        self.slots.close();
    }
}
