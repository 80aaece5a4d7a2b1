use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Task status tracking
#[derive(Debug, Clone, Default)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

impl TaskStatus {
    fn record<E: Display>(&mut self, now: DateTime<Utc>, result: &Result<(), E>) {
        self.last_run = Some(now);
        self.run_count += 1;
        match result {
            Ok(()) => {
                self.last_success = Some(now);
                self.success_count += 1;
                self.last_error = None;
            }
            Err(e) => {
                self.error_count += 1;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

struct Job {
    token: CancellationToken,
    status: Arc<RwLock<TaskStatus>>,
}

/// Runs periodic jobs identified by a tag.
///
/// Scheduling a job under a tag that is already in use replaces the running
/// job. The first run happens one period after scheduling.
pub struct Scheduler {
    handle: Handle,
    shutdown: CancellationToken,
    jobs: Mutex<HashMap<String, Job>>,
}

impl Scheduler {
    /// Uses the runtime of the calling context.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            shutdown: CancellationToken::new(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn every<F, E>(&self, tag: impl Into<String>, period: Duration, mut job: F)
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Display,
    {
        let tag = tag.into();
        let token = self.shutdown.child_token();
        let status = Arc::new(RwLock::new(TaskStatus::default()));

        let previous = self.jobs.lock().insert(
            tag.clone(),
            Job {
                token: token.clone(),
                status: status.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(tag = %tag, "replacing scheduled job");
            previous.token.cancel();
        }

        let task_tag = tag.clone();
        self.handle.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let result = job();
                        if let Err(e) = &result {
                            warn!(tag = %task_tag, error = %e, "scheduled job failed");
                        }
                        status.write().record(Utc::now(), &result);
                    }
                }
            }
            debug!(tag = %task_tag, "scheduled job stopped");
        });
    }

    /// Stops the job with this tag. Returns whether one was scheduled.
    pub fn cancel(&self, tag: &str) -> bool {
        match self.jobs.lock().remove(tag) {
            Some(job) => {
                job.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, tag: &str) -> bool {
        self.jobs.lock().contains_key(tag)
    }

    pub fn task_status(&self, tag: &str) -> Option<TaskStatus> {
        self.jobs.lock().get(tag).map(|job| job.status.read().clone())
    }

    /// Stops every job.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.jobs.lock().clear();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn advance(period: Duration, times: u32) {
        tokio::task::yield_now().await;
        for _ in 0..times {
            tokio::time::advance(period).await;
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_every_period() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.every("job", Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        });

        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        advance(Duration::from_secs(10), 3).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        let status = scheduler.task_status("job").unwrap();
        assert_eq!(status.run_count, 3);
        assert_eq!(status.success_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_tracked() {
        let scheduler = Scheduler::new();
        scheduler.every("failing", Duration::from_secs(1), || Err("meter offline"));

        advance(Duration::from_secs(1), 2).await;
        let status = scheduler.task_status("failing").unwrap();
        assert_eq!(status.error_count, 2);
        assert_eq!(status.last_error.as_deref(), Some("meter offline"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_tag_replaces_job() {
        let scheduler = Scheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        scheduler.every("sampling", Duration::from_secs(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        });
        let counter = second.clone();
        scheduler.every("sampling", Duration::from_secs(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        });

        advance(Duration::from_secs(5), 2).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_job() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.every("job", Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        });

        advance(Duration::from_secs(1), 1).await;
        assert!(scheduler.cancel("job"));
        assert!(!scheduler.cancel("job"));
        assert!(!scheduler.is_scheduled("job"));

        advance(Duration::from_secs(1), 3).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
