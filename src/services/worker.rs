use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::OrderStore;
use crate::domain::{Order, OrderPatch, OrderStatus, OrderType};
use crate::error::{EngineError, Result};
use crate::queue::{JobDisposition, JobQueue, ReservedJob};
use crate::router::DexRouter;
use crate::services::ConnectionRegistry;

/// Worker pool tuning. `max_attempts` mirrors the queue limit so the
/// post-mortem can report `Attempts: N/M`.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub workers: usize,
    pub build_delay: Duration,
    pub close_grace: Duration,
    pub max_attempts: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            build_delay: Duration::from_millis(500),
            close_grace: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

/// Structured failure evidence recorded when an order exhausts its
/// attempts.
#[derive(Debug, Serialize)]
struct PostMortem {
    order_id: Uuid,
    error: String,
    attempts: u32,
    max_attempts: u32,
    failed_at: DateTime<Utc>,
    token_in: String,
    token_out: String,
    amount_in: Decimal,
    order_type: OrderType,
}

/// Drives the order state machine: reserve a job, walk
/// routing → building → submitted → confirmed, publish every transition,
/// and hand failures back to the queue's retry policy.
pub struct WorkerPool {
    store: Arc<dyn OrderStore>,
    queue: Arc<dyn JobQueue>,
    router: Arc<DexRouter>,
    registry: Arc<ConnectionRegistry>,
    settings: WorkerSettings,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn OrderStore>,
        queue: Arc<dyn JobQueue>,
        router: Arc<DexRouter>,
        registry: Arc<ConnectionRegistry>,
        settings: WorkerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            queue,
            router,
            registry,
            settings,
        })
    }

    /// Spawn the worker tasks. Each loops until the queue shuts down.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.settings.workers)
            .map(|worker_id| {
                let pool = Arc::clone(&self);
                tokio::spawn(async move {
                    pool.run_worker(worker_id).await;
                })
            })
            .collect()
    }

    async fn run_worker(&self, worker_id: usize) {
        loop {
            match self.queue.reserve().await {
                Ok(Some(job)) => self.handle_job(job).await,
                Ok(None) => {
                    info!(worker_id, "worker stopping");
                    break;
                }
                Err(e) => {
                    error!(worker_id, "queue reserve failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle_job(&self, job: ReservedJob) {
        let order_id = job.order_id();
        let attempt = job.attempt;

        match self.process_attempt(&job).await {
            Ok(()) => {
                if let Err(e) = self.queue.complete(job).await {
                    error!(%order_id, "failed to mark job complete: {}", e);
                }
            }
            Err(err) => {
                let fatal = err.is_fatal();
                let order = job.order.clone();
                match self.queue.fail(job, &err.to_string(), fatal).await {
                    Ok(JobDisposition::Retry { attempt, delay }) => {
                        warn!(
                            %order_id,
                            attempt,
                            max_attempts = self.settings.max_attempts,
                            next_delay_ms = delay.as_millis() as u64,
                            "attempt failed, retry scheduled: {}",
                            err
                        );
                    }
                    Ok(JobDisposition::Discarded { attempts }) => {
                        self.record_post_mortem(&order, &err, attempts).await;
                    }
                    Err(qe) => {
                        error!(%order_id, attempt, "failed to record job failure: {}", qe);
                    }
                }
            }
        }
    }

    /// One pass through the state machine. Every store write lands before
    /// its publication so a reconnecting client always sees a persisted
    /// status consistent with the stream.
    async fn process_attempt(&self, job: &ReservedJob) -> Result<()> {
        let order = &job.order;
        let order_id = order.order_id;

        info!(%order_id, attempt = job.attempt, "processing order");

        self.advance(order_id, OrderStatus::Routing, OrderPatch::status(OrderStatus::Routing), None)
            .await?;

        let route = self
            .router
            .best_route(&order.token_in, &order.token_out, order.amount_in)
            .await?;
        let dex = route.selected_dex;

        self.advance(
            order_id,
            OrderStatus::Building,
            OrderPatch::status(OrderStatus::Building).with_dex_used(dex),
            Some(json!({ "dex_used": dex })),
        )
        .await?;

        // Transaction assembly.
        tokio::time::sleep(self.settings.build_delay).await;

        self.advance(
            order_id,
            OrderStatus::Submitted,
            OrderPatch::status(OrderStatus::Submitted),
            None,
        )
        .await?;

        let receipt = self
            .router
            .execute_swap(dex, order.amount_in, route.quote.amount_out, order.slippage)
            .await?;

        self.advance(
            order_id,
            OrderStatus::Confirmed,
            OrderPatch::status(OrderStatus::Confirmed).with_fill(
                receipt.tx_hash.clone(),
                receipt.executed_price,
                receipt.amount_out,
            ),
            Some(json!({
                "tx_hash": receipt.tx_hash,
                "executed_price": receipt.executed_price,
                "amount_out": receipt.amount_out,
                "dex_used": dex,
            })),
        )
        .await?;

        info!(
            %order_id,
            %dex,
            tx_hash = %receipt.tx_hash,
            executed_price = %receipt.executed_price,
            amount_out = %receipt.amount_out,
            "order confirmed"
        );

        Arc::clone(&self.registry).schedule_close(order_id, self.settings.close_grace);

        Ok(())
    }

    async fn advance(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        patch: OrderPatch,
        data: Option<serde_json::Value>,
    ) -> Result<()> {
        self.store.update(order_id, patch).await?;
        self.registry.publish(order_id, status, data);
        Ok(())
    }

    /// Terminal failure: persist the failed status with the attempt trail,
    /// publish the failure frame, and close the stream after the grace
    /// period.
    async fn record_post_mortem(&self, order: &Order, err: &EngineError, attempts: u32) {
        let order_id = order.order_id;
        let failed_at = Utc::now();
        let post_mortem = PostMortem {
            order_id,
            error: err.to_string(),
            attempts,
            max_attempts: self.settings.max_attempts,
            failed_at,
            token_in: order.token_in.clone(),
            token_out: order.token_out.clone(),
            amount_in: order.amount_in,
            order_type: order.order_type,
        };
        error!(
            post_mortem = %serde_json::to_string(&post_mortem).unwrap_or_default(),
            "order failed terminally"
        );

        let error_text = format!(
            "{} | Attempts: {}/{} | Failed at: {}",
            err,
            attempts,
            self.settings.max_attempts,
            failed_at.to_rfc3339()
        );

        let patch = OrderPatch::status(OrderStatus::Failed).with_error(error_text.clone());
        if let Err(store_err) = self.store.update(order_id, patch).await {
            // The stream frame still goes out; the row keeps its last state.
            error!(%order_id, "failed to persist post-mortem: {}", store_err);
        }

        self.registry.publish(
            order_id,
            OrderStatus::Failed,
            Some(json!({
                "error": error_text,
                "attempts": attempts,
                "max_attempts": self.settings.max_attempts,
                "timestamp": failed_at,
            })),
        );

        Arc::clone(&self.registry).schedule_close(order_id, self.settings.close_grace);
    }
}
