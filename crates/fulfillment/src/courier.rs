//! Courier label orchestration.
//!
//! Orders that need a courier get an outbox job in the same transaction that
//! creates them. A [`CourierWorker`] claims due jobs and hands each one to the
//! [`CourierOrchestrator`], which calls the courier and records the outcome.
//! Nothing here ever reaches back to the request that created the order.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, TimeDelta, Utc};
use domain::OrderStatus;
use futures_util::StreamExt;
use order_store::{CourierJob, OrderStore, StatusChange};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::services::{CourierError, CourierService, GuideRequest, SenderDetails};

const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Exponential retry schedule for failed courier calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Total calls allowed, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Returns how long to wait after the `attempts`-th failed call, or
    /// `None` once the schedule is exhausted.
    pub fn delay_after(&self, attempts: u32) -> Option<Duration> {
        let index = attempts.checked_sub(1)? as usize;
        self.backoff().build().nth(index)
    }
}

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// A label was attached to the order.
    Labelled { tracking_number: String },
    /// The job was completed without calling the courier.
    Skipped { reason: &'static str },
    /// The call failed and will be retried.
    Retrying {
        next_attempt_at: DateTime<Utc>,
        error: String,
    },
    /// The job was given up.
    Dead { error: String },
}

/// Turns courier outbox jobs into shipping labels.
pub struct CourierOrchestrator<S: OrderStore> {
    store: S,
    courier: Arc<dyn CourierService>,
    sender: SenderDetails,
    retry: RetryPolicy,
}

impl<S: OrderStore> CourierOrchestrator<S> {
    /// Creates a new orchestrator.
    pub fn new(
        store: S,
        courier: Arc<dyn CourierService>,
        sender: SenderDetails,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            courier,
            sender,
            retry,
        }
    }

    /// Processes one claimed job.
    ///
    /// Courier failures are recorded on the job and reported as an outcome.
    /// Only store failures are returned as errors; the job then stays leased
    /// and is picked up again once the lease expires.
    #[tracing::instrument(skip(self, job), fields(order_id = %job.order_id, attempt = job.attempts))]
    pub async fn process(&self, job: &CourierJob) -> Result<JobOutcome> {
        let Some(order) = self.store.get_order(job.order_id).await? else {
            return self.bury(job, "order not found".to_string()).await;
        };

        if order.status == OrderStatus::Cancelled {
            self.store.complete_courier_job(order.id).await?;
            tracing::info!("order cancelled, courier label skipped");
            return Ok(JobOutcome::Skipped {
                reason: "order cancelled",
            });
        }

        if order.has_tracking() {
            self.store.complete_courier_job(order.id).await?;
            return Ok(JobOutcome::Skipped {
                reason: "label already attached",
            });
        }

        if let Err(err) = self.sender.validate() {
            return self.fail(job, err).await;
        }

        let request = GuideRequest::for_order(&order, &self.sender);
        let response = match self.courier.create_guide(&request).await {
            Ok(response) => response,
            Err(err) => return self.fail(job, err).await,
        };

        if !response.success {
            let message = response
                .error_message
                .unwrap_or_else(|| "no reason given".to_string());
            return self.fail(job, CourierError::Rejected(message)).await;
        }
        if response.tracking_number.is_empty() {
            return self
                .fail(
                    job,
                    CourierError::Rejected("response without tracking number".to_string()),
                )
                .await;
        }

        let advance = order
            .status
            .transition_to(OrderStatus::Processing)
            .ok()
            .map(|to| StatusChange {
                from: order.status,
                to,
            });
        let updated = self
            .store
            .attach_courier_label(
                order.id,
                &response.tracking_number,
                &response.label_url,
                advance,
            )
            .await?;
        self.store.complete_courier_job(order.id).await?;

        metrics::counter!("courier_labels_created_total").increment(1);
        tracing::info!(
            tracking_number = %response.tracking_number,
            status = %updated.status,
            "courier label attached"
        );

        Ok(JobOutcome::Labelled {
            tracking_number: response.tracking_number,
        })
    }

    async fn fail(&self, job: &CourierJob, err: CourierError) -> Result<JobOutcome> {
        metrics::counter!("courier_job_failures_total").increment(1);
        let error = err.to_string();

        if err.is_retryable()
            && let Some(delay) = self.retry.delay_after(job.attempts)
        {
            let next_attempt_at =
                Utc::now() + TimeDelta::from_std(delay).unwrap_or(TimeDelta::hours(1));
            self.store
                .reschedule_courier_job(job.order_id, &error, next_attempt_at)
                .await?;
            tracing::warn!(%error, %next_attempt_at, "courier call failed, retrying later");
            return Ok(JobOutcome::Retrying {
                next_attempt_at,
                error,
            });
        }

        self.bury(job, error).await
    }

    async fn bury(&self, job: &CourierJob, error: String) -> Result<JobOutcome> {
        self.store.bury_courier_job(job.order_id, &error).await?;
        metrics::counter!("courier_jobs_dead_total").increment(1);
        tracing::error!(%error, "courier job abandoned");
        Ok(JobOutcome::Dead { error })
    }
}

/// Scheduling knobs for the courier worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to look for due jobs without being nudged.
    pub poll_interval: Duration,
    /// How long a claimed job stays invisible to other claims.
    pub lease: Duration,
    /// Jobs claimed per round.
    pub batch_size: usize,
    /// Jobs processed at the same time.
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            lease: Duration::from_secs(120),
            batch_size: 16,
            concurrency: 4,
        }
    }
}

/// Background task that drains the courier outbox.
pub struct CourierWorker<S: OrderStore> {
    orchestrator: Arc<CourierOrchestrator<S>>,
    notify: Arc<Notify>,
    config: WorkerConfig,
}

impl<S: OrderStore> Clone for CourierWorker<S> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            notify: self.notify.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: OrderStore + 'static> CourierWorker<S> {
    /// Creates a new worker woken by `notify` in addition to its poll interval.
    pub fn new(
        orchestrator: CourierOrchestrator<S>,
        notify: Arc<Notify>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            notify,
            config,
        }
    }

    /// Claims one batch of due jobs and processes it.
    ///
    /// Returns the number of jobs claimed.
    pub async fn run_once(&self) -> Result<usize> {
        let now = Utc::now();
        let lease_until =
            now + TimeDelta::from_std(self.config.lease).unwrap_or(TimeDelta::hours(1));
        let jobs = self
            .orchestrator
            .store
            .claim_courier_jobs(now, lease_until, self.config.batch_size)
            .await?;
        let claimed = jobs.len();

        let orchestrator = &self.orchestrator;
        futures_util::stream::iter(jobs)
            .for_each_concurrent(self.config.concurrency.max(1), |job| async move {
                if let Err(err) = orchestrator.process(&job).await {
                    tracing::error!(
                        order_id = %job.order_id,
                        error = %err,
                        "courier job failed to record, lease will expire"
                    );
                }
            })
            .await;

        Ok(claimed)
    }

    async fn drain(&self) {
        loop {
            match self.run_once().await {
                Ok(claimed) if claimed >= self.config.batch_size => continue,
                Ok(_) => return,
                Err(err) => {
                    tracing::error!(error = %err, "failed to claim courier jobs");
                    return;
                }
            }
        }
    }

    /// Runs until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "courier worker started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
                _ = self.notify.notified() => {}
            }
            self.drain().await;
        }

        tracing::info!("courier worker stopped");
    }

    /// Spawns the worker and restarts it if it panics.
    pub fn spawn_supervised(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let handle = tokio::spawn(self.clone().run(shutdown.clone()));
                match handle.await {
                    Err(err) if err.is_panic() => {
                        metrics::counter!("courier_worker_restarts_total").increment(1);
                        tracing::error!(error = %err, "courier worker panicked, restarting");
                        tokio::time::sleep(RESTART_DELAY).await;
                    }
                    _ => break,
                }
            }
        })
    }
}
