//! N identical pollers that lease jobs and dispatch to a registered processor.

use crate::models::job::{Job, JobType};
use crate::services::job_service::JobService;
use async_trait::async_trait;
use backplane_common::{Error, StructuredError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The two shapes a processor can fail with: a classified failure the pool should
/// route through `fail_with_details`, or anything else, routed through `fail`.
#[derive(Debug)]
pub enum ProcessorError {
    Structured(StructuredError),
    Other(Error),
}

impl From<StructuredError> for ProcessorError {
    fn from(e: StructuredError) -> Self {
        ProcessorError::Structured(e)
    }
}

impl From<Error> for ProcessorError {
    fn from(e: Error) -> Self {
        ProcessorError::Other(e)
    }
}

/// A component that executes one job type end-to-end. On success it records its own
/// result via `JobService::complete` so it can attach a domain-shaped result map; on
/// failure it returns a `ProcessorError` and the pool applies the retry policy.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    fn can_process(&self, job_type: JobType) -> bool;
    async fn process(&self, ctx: CancellationToken, job: Job) -> Result<(), ProcessorError>;
}

/// Long-lived worker pool leasing jobs from a fixed poll interval.
pub struct WorkerPool {
    job_service: JobService,
    processors: Vec<Arc<dyn JobProcessor>>,
    poll_interval: Duration,
    worker_count: usize,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        job_service: JobService,
        processors: Vec<Arc<dyn JobProcessor>>,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            job_service,
            processors,
            poll_interval,
            worker_count,
            shutdown: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Spawn `worker_count` pollers. Errors if the pool is already running
    /// (`stop()` must be awaited before starting again).
    pub fn start(&mut self) -> Result<(), Error> {
        if !self.handles.is_empty() {
            return Err(Error::InvalidInput(
                "worker pool is already started".to_string(),
            ));
        }

        for index in 0..self.worker_count {
            let worker_id = format!("worker-{}", index);
            let job_service = self.job_service.clone();
            let processors = self.processors.clone();
            let poll_interval = self.poll_interval;
            let shutdown = self.shutdown.clone();

            let handle = tokio::spawn(async move {
                run_worker_loop(worker_id, job_service, processors, poll_interval, shutdown).await;
            });
            self.handles.push(handle);
        }

        Ok(())
    }

    /// Signal every worker to stop after its current iteration, then wait for all
    /// of them to exit.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

async fn run_worker_loop(
    worker_id: String,
    job_service: JobService,
    processors: Vec<Arc<dyn JobProcessor>>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    // The union of types any registered processor advertises via `can_process`,
    // computed once: a worker with no processor for a type must never claim it and
    // leave it stranded in `processing` with nothing to run it.
    let allowed_types: Vec<JobType> = JobType::ALL
        .into_iter()
        .filter(|job_type| processors.iter().any(|p| p.can_process(*job_type)))
        .collect();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(worker_id, "worker stopping on shutdown signal");
                return;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }

        if allowed_types.is_empty() {
            continue;
        }

        let job = match job_service.claim_next(&worker_id, &allowed_types).await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "claim_next failed");
                continue;
            }
        };

        let Some(job) = job else {
            continue;
        };

        let Some(processor) = processors.iter().find(|p| p.can_process(job.job_type)) else {
            tracing::error!(
                worker_id,
                job_id = job.id,
                job_type = %job.job_type,
                "no registered processor for job type"
            );
            let _ = job_service
                .fail(job.id, "no processor registered for this job type")
                .await;
            continue;
        };

        let job_id = job.id;
        let run_ctx = shutdown.child_token();
        match processor.process(run_ctx, job).await {
            Ok(()) => {}
            Err(ProcessorError::Structured(err)) => {
                if let Err(e) = job_service.fail_with_details(job_id, &err).await {
                    tracing::error!(worker_id, job_id, error = %e, "failed to persist structured job failure");
                }
            }
            Err(ProcessorError::Other(err)) => {
                if let Err(e) = job_service.fail(job_id, &err.to_string()).await {
                    tracing::error!(worker_id, job_id, error = %e, "failed to persist job failure");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::initialize_schema;
    use crate::models::job::EnqueueOptions;
    use backplane_common::EventBus;
    use sqlx::SqlitePool;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProcessor {
        job_type: JobType,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobProcessor for CountingProcessor {
        fn can_process(&self, job_type: JobType) -> bool {
            job_type == self.job_type
        }

        async fn process(&self, _ctx: CancellationToken, _job: Job) -> Result<(), ProcessorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_pool_claims_and_dispatches_to_matching_processor() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        let job_service = JobService::new(pool, EventBus::new(16));

        job_service
            .enqueue(JobType::Waveform, HashMap::new(), EnqueueOptions::default())
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let processor = Arc::new(CountingProcessor {
            job_type: JobType::Waveform,
            calls: calls.clone(),
        });

        let mut worker_pool = WorkerPool::new(
            job_service,
            vec![processor],
            2,
            Duration::from_millis(5),
        );
        worker_pool.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        worker_pool.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worker_leaves_jobs_of_unregistered_types_pending() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        let job_service = JobService::new(pool, EventBus::new(16));

        let unhandled_id = job_service
            .enqueue(JobType::PodcastSync, HashMap::new(), EnqueueOptions::default())
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let processor = Arc::new(CountingProcessor {
            job_type: JobType::Waveform,
            calls: calls.clone(),
        });

        let mut worker_pool = WorkerPool::new(
            job_service.clone(),
            vec![processor],
            2,
            Duration::from_millis(5),
        );
        worker_pool.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        worker_pool.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let unhandled = job_service.get(unhandled_id).await.unwrap().unwrap();
        assert_eq!(unhandled.status, crate::models::job::JobStatus::Pending);
        assert!(unhandled.worker_id.is_none());
    }

    #[tokio::test]
    async fn starting_an_already_started_pool_errors() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        let job_service = JobService::new(pool, EventBus::new(16));
        let mut worker_pool = WorkerPool::new(job_service, vec![], 1, Duration::from_millis(5));

        worker_pool.start().unwrap();
        assert!(worker_pool.start().is_err());
        worker_pool.stop().await;
    }
}
