//! Periodic delivery of the collector's metrics through a fixed worker pool.
//!
//! Every report tick snapshots the [`MetricMap`] into jobs (one per metric
//! in single mode, one for the whole snapshot in batch mode) and queues them
//! for `workers` tasks. Each job is delivered under the retry policy. On
//! cancellation the tick loop stops, the queue is closed and the workers
//! drain what is left before the sender returns.

use crate::config::SendMode;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use telemon_collector::MetricMap;
use telemon_common::dto::MetricDto;
use telemon_common::retry::RetryPolicy;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum Job {
    One(MetricDto),
    Batch(Vec<MetricDto>),
}

impl Job {
    fn len(&self) -> usize {
        match self {
            Job::One(_) => 1,
            Job::Batch(items) => items.len(),
        }
    }
}

pub struct Sender<T> {
    transport: Arc<T>,
    metrics: MetricMap,
    mode: SendMode,
    workers: usize,
    report_interval: Duration,
    retry: RetryPolicy,
}

impl<T: Transport> Sender<T> {
    pub fn new(
        transport: Arc<T>,
        metrics: MetricMap,
        mode: SendMode,
        workers: usize,
        report_interval: Duration,
    ) -> Self {
        Self {
            transport,
            metrics,
            mode,
            workers: workers.max(1),
            report_interval,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn snapshot_jobs(&self) -> Vec<Job> {
        let dtos: Vec<MetricDto> = self
            .metrics
            .snapshot()
            .await
            .iter()
            .map(MetricDto::from)
            .collect();
        if dtos.is_empty() {
            return Vec::new();
        }
        match self.mode {
            SendMode::Single => dtos.into_iter().map(Job::One).collect(),
            SendMode::Batch => vec![Job::Batch(dtos)],
        }
    }

    fn spawn_workers(
        &self,
        queue: mpsc::Receiver<Job>,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let queue = Arc::new(Mutex::new(queue));
        (0..self.workers)
            .map(|id| {
                let queue = queue.clone();
                let transport = self.transport.clone();
                let retry = self.retry.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let job = queue.lock().await.recv().await;
                        let Some(job) = job else { break };
                        deliver(id, transport.as_ref(), &retry, &cancel, job).await;
                    }
                    tracing::debug!(worker = id, "Sender worker finished");
                })
            })
            .collect()
    }

    /// Sends the current snapshot once through the worker pool and waits
    /// for every job to finish.
    pub async fn flush_once(&self, cancel: &CancellationToken) {
        let jobs = self.snapshot_jobs().await;
        if jobs.is_empty() {
            return;
        }
        let (tx, rx) = mpsc::channel::<Job>(jobs.len());
        let handles = self.spawn_workers(rx, cancel);
        tracing::debug!(jobs = jobs.len(), "Flushing metrics on demand");
        for job in jobs {
            if tx.send(job).await.is_err() {
                tracing::error!("Sender queue closed unexpectedly");
                break;
            }
        }
        drop(tx);
        join_workers(handles).await;
    }

    /// Runs until `cancel` fires, then drains the queue.
    pub async fn run(self, cancel: CancellationToken) {
        let (tx, rx) = mpsc::channel::<Job>(self.workers * 16);
        let handles = self.spawn_workers(rx, &cancel);
        let mut tick = tokio::time::interval(self.report_interval);
        // The first tick fires immediately, before anything was collected.
        tick.tick().await;

        tracing::info!(
            workers = self.workers,
            mode = ?self.mode,
            interval_ms = self.report_interval.as_millis() as u64,
            "Starting sender"
        );

        'ticks: loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let jobs = self.snapshot_jobs().await;
                    tracing::debug!(jobs = jobs.len(), "Flushing metrics");
                    for job in jobs {
                        tokio::select! {
                            _ = cancel.cancelled() => break 'ticks,
                            sent = tx.send(job) => {
                                if sent.is_err() {
                                    tracing::error!("Sender queue closed unexpectedly");
                                    break 'ticks;
                                }
                            }
                        }
                    }
                }
            }
        }

        drop(tx);
        join_workers(handles).await;
        tracing::info!("Sender stopped");
    }
}

async fn join_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Sender worker panicked");
        }
    }
}

async fn deliver<T: Transport>(
    worker: usize,
    transport: &T,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    job: Job,
) {
    let count = job.len();
    let job = &job;
    let result = retry
        .retry_with_result(cancel, move || async move {
            match job {
                Job::One(dto) => transport.send_one(dto).await,
                Job::Batch(dtos) => transport.send_batch(dtos).await,
            }
        })
        .await;
    match result {
        Ok(()) => tracing::debug!(worker, count, "Metrics delivered"),
        Err(e) => tracing::warn!(worker, count, error = %e, "Failed to deliver metrics"),
    }
}
