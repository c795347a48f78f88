use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{Governor, JobDisposition, JobQueue, QueueLimits, ReservedJob};
use crate::domain::Order;
use crate::error::Result;

/// Delayed redelivery entry; min-heap on due time.
struct DelayedJob {
    due: Instant,
    seq: u64,
    order: Order,
    attempts_made: u32,
}

impl PartialEq for DelayedJob {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DelayedJob {}

impl PartialOrd for DelayedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the earliest due first.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    ready: VecDeque<(Order, u32)>,
    delayed: BinaryHeap<DelayedJob>,
    live: HashSet<Uuid>,
    completed: VecDeque<Uuid>,
    seq: u64,
}

/// In-process job queue sharing the governor with the Redis backend. Used
/// by the test harness and as the dev fallback when no Redis is configured.
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    governor: Governor,
    shutdown: AtomicBool,
}

const COMPLETED_RETENTION: usize = 100;

impl MemoryJobQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                delayed: BinaryHeap::new(),
                live: HashSet::new(),
                completed: VecDeque::new(),
                seq: 0,
            }),
            notify: Notify::new(),
            governor: Governor::new(limits),
            shutdown: AtomicBool::new(false),
        }
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, order: &Order) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.live.insert(order.order_id) {
            debug!(order_id = %order.order_id, "job already enqueued, skipping");
            return Ok(());
        }
        state.ready.push_back((order.clone(), 0));
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn reserve(&self) -> Result<Option<ReservedJob>> {
        loop {
            if self.is_shut_down() {
                return Ok(None);
            }

            let popped = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                while state.delayed.peek().is_some_and(|d| d.due <= now) {
                    let job = state.delayed.pop().expect("peeked entry exists");
                    state.ready.push_back((job.order, job.attempts_made));
                }
                state.ready.pop_front()
            };

            if let Some((order, attempts_made)) = popped {
                match self.governor.admit().await {
                    Some(permit) => {
                        return Ok(Some(self.governor.reserve_job(
                            order,
                            attempts_made + 1,
                            permit,
                        )))
                    }
                    None => return Ok(None),
                }
            }

            // Idle: wake on enqueue/redelivery or re-check shortly for due
            // delayed jobs.
            let _ = tokio::time::timeout(Duration::from_millis(50), self.notify.notified()).await;
        }
    }

    async fn complete(&self, job: ReservedJob) -> Result<()> {
        let mut state = self.state.lock().await;
        state.live.remove(&job.order_id());
        state.completed.push_back(job.order_id());
        while state.completed.len() > COMPLETED_RETENTION {
            state.completed.pop_front();
        }
        Ok(())
    }

    async fn fail(&self, job: ReservedJob, error: &str, fatal: bool) -> Result<JobDisposition> {
        let attempts_made = job.attempt;
        let limits = self.governor.limits();
        let is_final = fatal || attempts_made >= limits.max_attempts;

        let mut state = self.state.lock().await;
        if is_final {
            state.live.remove(&job.order_id());
            debug!(order_id = %job.order_id(), attempts_made, error, "job retired");
            return Ok(JobDisposition::Discarded {
                attempts: attempts_made,
            });
        }

        let delay = limits.backoff_delay(attempts_made);
        state.seq += 1;
        let seq = state.seq;
        state.delayed.push(DelayedJob {
            due: Instant::now() + delay,
            seq,
            order: job.order.clone(),
            attempts_made,
        });
        drop(state);
        self.notify.notify_waiters();

        Ok(JobDisposition::Retry {
            attempt: attempts_made,
            delay,
        })
    }

    fn shutdown(&self) {
        self.shutdown.store(true, AtomicOrdering::SeqCst);
        self.governor.close();
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderType;
    use rust_decimal_macros::dec;

    fn limits() -> QueueLimits {
        QueueLimits {
            max_throughput: 100,
            window: Duration::from_secs(60),
            concurrency: 10,
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
        }
    }

    fn sample_order() -> Order {
        Order::new(
            OrderType::Market,
            "SOL".to_string(),
            "USDC".to_string(),
            dec!(1),
            None,
        )
    }

    #[tokio::test]
    async fn test_enqueue_reserve_complete() {
        let queue = MemoryJobQueue::new(limits());
        let order = sample_order();

        queue.enqueue(&order).await.unwrap();
        let job = queue.reserve().await.unwrap().unwrap();
        assert_eq!(job.order_id(), order.order_id);
        assert_eq!(job.attempt, 1);
        queue.complete(job).await.unwrap();

        // Retired; the id may be enqueued again afterwards.
        queue.enqueue(&order).await.unwrap();
        let job = queue.reserve().await.unwrap().unwrap();
        assert_eq!(job.attempt, 1);
    }

    #[tokio::test]
    async fn test_enqueue_live_job_is_idempotent() {
        let queue = MemoryJobQueue::new(limits());
        let order = sample_order();

        queue.enqueue(&order).await.unwrap();
        queue.enqueue(&order).await.unwrap();

        let job = queue.reserve().await.unwrap().unwrap();
        queue.complete(job).await.unwrap();

        // Only one copy was ever queued.
        let state = queue.state.lock().await;
        assert!(state.ready.is_empty());
    }

    #[tokio::test]
    async fn test_fail_schedules_backoff_then_discards() {
        let queue = MemoryJobQueue::new(limits());
        let order = sample_order();
        queue.enqueue(&order).await.unwrap();

        let job = queue.reserve().await.unwrap().unwrap();
        let disposition = queue.fail(job, "congestion", false).await.unwrap();
        assert_eq!(
            disposition,
            JobDisposition::Retry {
                attempt: 1,
                delay: Duration::from_millis(20)
            }
        );

        let start = Instant::now();
        let job = queue.reserve().await.unwrap().unwrap();
        assert_eq!(job.attempt, 2);
        assert!(start.elapsed() >= Duration::from_millis(20));

        let disposition = queue.fail(job, "congestion", false).await.unwrap();
        assert!(matches!(disposition, JobDisposition::Retry { attempt: 2, .. }));

        let job = queue.reserve().await.unwrap().unwrap();
        assert_eq!(job.attempt, 3);
        let disposition = queue.fail(job, "congestion", false).await.unwrap();
        assert_eq!(disposition, JobDisposition::Discarded { attempts: 3 });
    }

    #[tokio::test]
    async fn test_fatal_failure_discards_immediately() {
        let queue = MemoryJobQueue::new(limits());
        let order = sample_order();
        queue.enqueue(&order).await.unwrap();

        let job = queue.reserve().await.unwrap().unwrap();
        let disposition = queue.fail(job, "schema violation", true).await.unwrap();
        assert_eq!(disposition, JobDisposition::Discarded { attempts: 1 });
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_reserve() {
        let queue = std::sync::Arc::new(MemoryJobQueue::new(limits()));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.reserve().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shutdown();

        let reserved = waiter.await.unwrap().unwrap();
        assert!(reserved.is_none());
    }
}
