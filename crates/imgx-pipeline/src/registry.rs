//! Registry of in-flight jobs.
//!
//! Holds each job's handle and the cancellation token of its one
//! outstanding status query. Passed to the poller at construction; there
//! is no process-wide instance.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use imgx_models::{JobHandle, JobId};

#[derive(Debug)]
struct TrackedJob {
    handle: JobHandle,
    query: Option<CancellationToken>,
}

#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, TrackedJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: JobHandle) {
        let mut jobs = self.jobs.write().await;
        jobs.insert(
            handle.job_id.clone(),
            TrackedJob {
                handle,
                query: None,
            },
        );
    }

    pub async fn get(&self, job_id: &JobId) -> Option<JobHandle> {
        self.jobs.read().await.get(job_id).map(|job| job.handle.clone())
    }

    /// Record the token of a newly issued query, cancelling the previous
    /// one if it is still outstanding.
    pub async fn track_query(&self, job_id: &JobId, token: CancellationToken) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            if let Some(previous) = job.query.replace(token) {
                previous.cancel();
            }
        }
    }

    /// Drop a resolved job, cancelling any query still attached to it.
    pub async fn remove(&self, job_id: &JobId) -> Option<JobHandle> {
        let job = self.jobs.write().await.remove(job_id)?;
        if let Some(token) = job.query {
            token.cancel();
        }
        Some(job.handle)
    }

    /// Cancel every outstanding query and forget all jobs.
    pub async fn cancel_all(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let count = jobs.len();
        for (_, job) in jobs.drain() {
            if let Some(token) = job.query {
                token.cancel();
            }
        }
        if count > 0 {
            debug!("Cancelled {} tracked jobs", count);
        }
        count
    }

    pub async fn active_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> JobHandle {
        JobHandle::new(JobId::from_string(id), 0, "a.png")
    }

    #[tokio::test]
    async fn test_new_query_cancels_previous() {
        let registry = JobRegistry::new();
        registry.register(handle("job-1")).await;

        let first = CancellationToken::new();
        let second = CancellationToken::new();
        registry.track_query(&JobId::from_string("job-1"), first.clone()).await;
        registry.track_query(&JobId::from_string("job-1"), second.clone()).await;

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[tokio::test]
    async fn test_remove_cancels_outstanding_query() {
        let registry = JobRegistry::new();
        registry.register(handle("job-1")).await;
        let token = CancellationToken::new();
        registry.track_query(&JobId::from_string("job-1"), token.clone()).await;

        let removed = registry.remove(&JobId::from_string("job-1")).await.unwrap();
        assert_eq!(removed.original_file_name, "a.png");
        assert!(token.is_cancelled());
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let registry = JobRegistry::new();
        registry.register(handle("job-1")).await;
        registry.register(handle("job-2")).await;
        let token = CancellationToken::new();
        registry.track_query(&JobId::from_string("job-2"), token.clone()).await;

        assert_eq!(registry.cancel_all().await, 2);
        assert!(token.is_cancelled());
        assert!(registry.get(&JobId::from_string("job-1")).await.is_none());
    }
}
