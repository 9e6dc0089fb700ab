//! Background translation jobs.
//!
//! Jobs go onto a bounded queue through a [`JobSubmitter`] without ever
//! blocking the caller. A dispatcher task drains the queue and runs at most
//! `workers` jobs at a time. Each job walks `Queued -> Running` and ends in
//! either `Completed` or `Failed`; nothing is requeued.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::AppResult;
use crate::i18n::Language;
use crate::metrics::{JobMetrics, MetricsReport};
use crate::retry::{with_retry_if, RetryConfig};
use crate::store::{TaskRepository, TranslationStore};
use crate::translation::{TranslationError, TranslationProvider};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of jobs executing at once
    pub workers: usize,
    /// Jobs waiting beyond this are dropped at submission
    pub queue_capacity: usize,
    /// Language task text is authored in
    pub source: Language,
    /// Language every job translates into
    pub target: Language,
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            source: Language::canonical(),
            target: Language::ENGLISH,
            retry: RetryConfig::none(),
        }
    }
}

/// Request to translate one task into one language. Lives only in memory.
#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub task_id: i64,
    pub target: Language,
    pub enqueued_at: DateTime<Utc>,
}

impl TranslationJob {
    pub fn new(task_id: i64, target: Language) -> Self {
        Self {
            task_id,
            target,
            enqueued_at: Utc::now(),
        }
    }
}

/// How a job that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Translation upserted
    Translated,
    /// Task was deleted before or while the job ran
    TaskMissing,
}

/// Cloneable handle for enqueueing translation jobs.
#[derive(Clone)]
pub struct JobSubmitter {
    tx: mpsc::Sender<TranslationJob>,
    target: Language,
    in_flight: Arc<watch::Sender<usize>>,
    metrics: Arc<JobMetrics>,
}

impl JobSubmitter {
    /// Enqueue a translation of `task_id` into the configured target language.
    ///
    /// Never waits. Returns `false` if the job was dropped because the queue
    /// is full or the scheduler has stopped.
    pub fn submit(&self, task_id: i64) -> bool {
        let job = TranslationJob::new(task_id, self.target);

        // Count before sending so wait_idle cannot observe a gap
        self.in_flight.send_modify(|n| *n += 1);

        match self.tx.try_send(job) {
            Ok(()) => {
                self.metrics.record_submitted();
                debug!(task_id, language = %self.target, "Translation job queued");
                true
            }
            Err(err) => {
                self.in_flight.send_modify(|n| *n -= 1);
                self.metrics.record_dropped();
                let reason = match err {
                    TrySendError::Full(_) => "queue full",
                    TrySendError::Closed(_) => "scheduler stopped",
                };
                warn!(
                    task_id,
                    language = %self.target,
                    reason,
                    "Dropping translation job"
                );
                false
            }
        }
    }

    /// Resolve once every accepted job has reached a terminal state.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // Err only if the sender is gone, which cannot happen while self is alive
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn target(&self) -> Language {
        self.target
    }

    pub fn metrics(&self) -> MetricsReport {
        self.metrics.report()
    }
}

/// Owns the dispatcher task. Dropping it without [`shutdown`](Self::shutdown)
/// still stops intake, but running jobs are not awaited.
pub struct TranslationScheduler {
    submitter: JobSubmitter,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
}

impl TranslationScheduler {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        provider: Arc<dyn TranslationProvider>,
        tasks: Arc<dyn TaskRepository>,
        store: Arc<dyn TranslationStore>,
    ) -> Self {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (in_flight, _) = watch::channel(0usize);
        let in_flight = Arc::new(in_flight);
        let metrics = Arc::new(JobMetrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = Arc::new(JobRunner {
            provider,
            tasks,
            store,
            source: config.source,
            retry: config.retry,
            metrics: Arc::clone(&metrics),
        });

        let dispatcher = tokio::spawn(dispatch(
            rx,
            shutdown_rx,
            runner,
            workers,
            Arc::clone(&in_flight),
        ));

        info!(
            "✓ Translation scheduler started ({} workers, queue capacity {}, {} -> {})",
            workers,
            config.queue_capacity,
            config.source.name(),
            config.target.name()
        );

        Self {
            submitter: JobSubmitter {
                tx,
                target: config.target,
                in_flight,
                metrics,
            },
            shutdown_tx,
            dispatcher,
        }
    }

    pub fn submitter(&self) -> JobSubmitter {
        self.submitter.clone()
    }

    /// Stop accepting jobs, run everything already queued, and wait for
    /// running jobs to finish.
    pub async fn shutdown(self) {
        info!("Stopping translation scheduler");
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.dispatcher.await {
            error!("Translation dispatcher terminated abnormally: {}", e);
        }

        let report = self.submitter.metrics();
        info!(
            "Translation scheduler stopped (completed: {}, skipped: {}, failed: {}, dropped: {})",
            report.completed, report.skipped, report.failed, report.dropped
        );
    }
}

/// Decrements the in-flight count when a job ends, panics included.
struct InFlightGuard(Arc<watch::Sender<usize>>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<TranslationJob>,
    mut shutdown: watch::Receiver<bool>,
    runner: Arc<JobRunner>,
    workers: usize,
    in_flight: Arc<watch::Sender<usize>>,
) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut running = JoinSet::new();
    let mut closing = false;

    loop {
        tokio::select! {
            _ = shutdown.changed(), if !closing => {
                // Queued jobs are still delivered after close
                closing = true;
                rx.close();
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    error!("Translation job panicked: {}", e);
                }
            }
            job = rx.recv() => {
                let Some(job) = job else { break };
                let guard = InFlightGuard(Arc::clone(&in_flight));
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                let runner = Arc::clone(&runner);
                running.spawn(async move {
                    let _permit = permit;
                    let _guard = guard;
                    runner.run(job).await;
                });
            }
        }
    }

    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            error!("Translation job panicked: {}", e);
        }
    }
}

struct JobRunner {
    provider: Arc<dyn TranslationProvider>,
    tasks: Arc<dyn TaskRepository>,
    store: Arc<dyn TranslationStore>,
    source: Language,
    retry: RetryConfig,
    metrics: Arc<JobMetrics>,
}

impl JobRunner {
    async fn run(&self, job: TranslationJob) {
        self.metrics.record_started();
        let waited_ms = (Utc::now() - job.enqueued_at).num_milliseconds();
        debug!(
            task_id = job.task_id,
            language = %job.target,
            waited_ms,
            "Translation job running"
        );

        match self.execute(&job).await {
            Ok(JobOutcome::Translated) => {
                self.metrics.record_completed();
                info!(task_id = job.task_id, language = %job.target, "✓ Translation stored");
            }
            Ok(JobOutcome::TaskMissing) => {
                self.metrics.record_skipped();
                debug!(
                    task_id = job.task_id,
                    language = %job.target,
                    "Task no longer exists, skipping translation"
                );
            }
            Err(e) => {
                self.metrics.record_failed();
                error!(
                    task_id = job.task_id,
                    language = %job.target,
                    error = %e,
                    "Translation job failed"
                );
            }
        }
    }

    async fn execute(&self, job: &TranslationJob) -> AppResult<JobOutcome> {
        let Some(task) = self.tasks.get_task(job.task_id).await? else {
            return Ok(JobOutcome::TaskMissing);
        };

        let title = self
            .translate_field(Some(task.title.as_str()), job.target)
            .await?
            .unwrap_or_else(|| task.title.clone());
        let description = self
            .translate_field(task.description.as_deref(), job.target)
            .await?;

        match self
            .store
            .upsert_translation(task.id, job.target.code(), &title, description.as_deref())
            .await
        {
            Ok(_) => Ok(JobOutcome::Translated),
            // Deleted while the provider was working; never resurrect it
            Err(e) if e.is_not_found() => Ok(JobOutcome::TaskMissing),
            Err(e) => Err(e),
        }
    }

    async fn translate_field(
        &self,
        text: Option<&str>,
        target: Language,
    ) -> Result<Option<String>, TranslationError> {
        with_retry_if(
            &self.retry,
            "translate",
            || self.provider.translate(text, self.source, target),
            TranslationError::is_retryable,
        )
        .await
    }
}
