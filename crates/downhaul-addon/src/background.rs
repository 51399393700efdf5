//! Background execution of threaded addon hooks.
//!
//! Jobs run on the blocking pool of a tokio runtime, either one owned by the
//! dispatcher (sized from [`ManagerConfig`]) or a runtime supplied by the
//! host. Submission never waits; failures are logged by the worker and not
//! reported back.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::error::AddonResult;
use crate::guard::guarded;

/// Handle to one submitted job. Dropping it does not cancel the job.
#[derive(Debug)]
pub struct BackgroundTask {
    pub id: Uuid,
    pub label: String,
    pub submitted_at: DateTime<Utc>,
    join: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

pub struct BackgroundDispatcher {
    handle: Handle,
    /// Present when the dispatcher built its own runtime.
    runtime: Option<Runtime>,
    submitted: AtomicU64,
}

impl fmt::Debug for BackgroundDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundDispatcher")
            .field("owns_runtime", &self.runtime.is_some())
            .field("submitted", &self.submitted())
            .finish()
    }
}

impl BackgroundDispatcher {
    /// Build a dedicated worker runtime.
    pub fn new(config: &ManagerConfig) -> AddonResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads.max(1))
            .thread_name(config.thread_name.clone())
            .build()?;
        tracing::debug!(
            max_jobs = config.worker_threads,
            thread_name = %config.thread_name,
            "addon worker pool started"
        );
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            submitted: AtomicU64::new(0),
        })
    }

    /// Run jobs on a runtime owned by the host.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: None,
            submitted: AtomicU64::new(0),
        }
    }

    /// Run `job` on a worker thread and return immediately.
    pub fn submit<F>(&self, label: impl Into<String>, job: F) -> BackgroundTask
    where
        F: FnOnce() -> AddonResult + Send + 'static,
    {
        let id = Uuid::new_v4();
        let label = label.into();
        let task_label = label.clone();

        let join = self.handle.spawn_blocking(move || {
            let start = std::time::Instant::now();
            match guarded(&task_label, job) {
                Ok(()) => tracing::debug!(
                    task = %task_label,
                    task_id = %id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "background hook finished"
                ),
                Err(e) => tracing::error!(
                    task = %task_label,
                    task_id = %id,
                    "background hook failed: {e}"
                ),
            }
        });
        self.submitted.fetch_add(1, Ordering::Relaxed);

        BackgroundTask {
            id,
            label,
            submitted_at: Utc::now(),
            join,
        }
    }

    /// Total number of jobs submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl Drop for BackgroundDispatcher {
    fn drop(&mut self) {
        // In-flight jobs keep running on detached threads.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
