use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Governor, JobDisposition, JobQueue, QueueLimits, ReservedJob, StoredJob};
use crate::domain::Order;
use crate::error::Result;

const LIVE_SET: &str = "dexflow:queue:live";
const READY_LIST: &str = "dexflow:queue:ready";
const DELAYED_ZSET: &str = "dexflow:queue:delayed";
const COMPLETED_LIST: &str = "dexflow:queue:completed";
const FAILED_LIST: &str = "dexflow:queue:failed";

// Retention hints, not observable contract.
const COMPLETED_TTL_SECS: i64 = 3600;
const COMPLETED_KEEP: isize = 100;
const FAILED_TTL_SECS: i64 = 7200;

fn job_key(order_id: &str) -> String {
    format!("dexflow:job:{order_id}")
}

/// Redis-backed job queue. Jobs live as JSON blobs keyed by order id, with
/// a ready list for eligible work and a delayed zset (score = due time in
/// epoch millis) for backoff redeliveries. Admission control is local to
/// the pool via the shared governor.
pub struct RedisJobQueue {
    pool: Pool,
    governor: Governor,
    shutdown: AtomicBool,
}

impl RedisJobQueue {
    pub async fn new(redis_url: &str, limits: QueueLimits) -> Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;

        // Fail fast on a bad address instead of at the first reserve.
        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        info!("Connected to Redis queue backend");

        Ok(Self {
            pool,
            governor: Governor::new(limits),
            shutdown: AtomicBool::new(false),
        })
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Move every due delayed job back onto the ready list.
    async fn promote_due(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let now_ms = Utc::now().timestamp_millis() as f64;
        let due: Vec<String> = conn.zrangebyscore(DELAYED_ZSET, "-inf", now_ms).await?;
        for order_id in due {
            let removed: i64 = conn.zrem(DELAYED_ZSET, &order_id).await?;
            if removed > 0 {
                let _: () = conn.lpush(READY_LIST, &order_id).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, order: &Order) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let id = order.order_id.to_string();

        let added: i64 = conn.sadd(LIVE_SET, &id).await?;
        if added == 0 {
            debug!(order_id = %id, "job already enqueued, skipping");
            return Ok(());
        }

        let stored = StoredJob {
            order: order.clone(),
            attempts_made: 0,
        };
        let _: () = conn.set(job_key(&id), serde_json::to_string(&stored)?).await?;
        let _: () = conn.lpush(READY_LIST, &id).await?;
        Ok(())
    }

    async fn reserve(&self) -> Result<Option<ReservedJob>> {
        loop {
            if self.is_shut_down() {
                return Ok(None);
            }

            self.promote_due().await?;

            let popped: Option<String> = {
                let mut conn = self.pool.get().await?;
                conn.rpop(READY_LIST, None).await?
            };

            let Some(id) = popped else {
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            };

            let raw: Option<String> = {
                let mut conn = self.pool.get().await?;
                conn.get(job_key(&id)).await?
            };
            let Some(raw) = raw else {
                warn!(order_id = %id, "ready list referenced a missing job record");
                continue;
            };
            let stored: StoredJob = serde_json::from_str(&raw)?;

            match self.governor.admit().await {
                Some(permit) => {
                    return Ok(Some(self.governor.reserve_job(
                        stored.order,
                        stored.attempts_made + 1,
                        permit,
                    )))
                }
                None => return Ok(None),
            }
        }
    }

    async fn complete(&self, job: ReservedJob) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let id = job.order_id().to_string();

        let _: () = conn.srem(LIVE_SET, &id).await?;
        let _: () = conn.del(job_key(&id)).await?;
        let _: () = conn.lpush(COMPLETED_LIST, &id).await?;
        let _: () = conn.ltrim(COMPLETED_LIST, 0, COMPLETED_KEEP - 1).await?;
        let _: () = conn.expire(COMPLETED_LIST, COMPLETED_TTL_SECS).await?;
        Ok(())
    }

    async fn fail(&self, job: ReservedJob, error: &str, fatal: bool) -> Result<JobDisposition> {
        let attempts_made = job.attempt;
        let limits = self.governor.limits();
        let is_final = fatal || attempts_made >= limits.max_attempts;
        let id = job.order_id().to_string();
        let mut conn = self.pool.get().await?;

        if is_final {
            let _: () = conn.srem(LIVE_SET, &id).await?;
            let _: () = conn.del(job_key(&id)).await?;
            let _: () = conn.lpush(FAILED_LIST, &id).await?;
            let _: () = conn.expire(FAILED_LIST, FAILED_TTL_SECS).await?;
            debug!(order_id = %id, attempts_made, error, "job retired");
            return Ok(JobDisposition::Discarded {
                attempts: attempts_made,
            });
        }

        let delay = limits.backoff_delay(attempts_made);
        let stored = StoredJob {
            order: job.order.clone(),
            attempts_made,
        };
        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let _: () = conn.set(job_key(&id), serde_json::to_string(&stored)?).await?;
        let _: () = conn.zadd(DELAYED_ZSET, &id, due_ms).await?;

        Ok(JobDisposition::Retry {
            attempt: attempts_made,
            delay,
        })
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.governor.close();
    }
}
