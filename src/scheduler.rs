//! Eviction Scheduler
//!
//! One shared background runtime that drives every periodic eviction pass.
//! Passes are isolated: a failing or panicking pass is logged and counted,
//! and the next tick runs as usual.

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::cluster::{PrimaryPolling, Standalone};
use crate::error::{StoreError, StoreResult};
use crate::metrics::StoreMetrics;

/// Handle to one scheduled eviction task
#[derive(Debug)]
pub struct TaskHandle {
    label: String,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stop future runs. A pass already executing finishes.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Shared periodic-task scheduler with explicit start/stop
pub struct Scheduler {
    threads: usize,
    runtime: Mutex<Option<Runtime>>,
    primary: Arc<dyn PrimaryPolling>,
    metrics: Arc<StoreMetrics>,
}

impl Scheduler {
    /// Scheduler for a standalone node
    pub fn new(threads: usize) -> Self {
        Self::with_primary(threads, Arc::new(Standalone), Arc::new(StoreMetrics::new()))
    }

    /// Scheduler whose passes only run while `primary` reports this node as primary.
    pub fn with_primary(
        threads: usize,
        primary: Arc<dyn PrimaryPolling>,
        metrics: Arc<StoreMetrics>,
    ) -> Self {
        Self {
            threads: threads.max(1),
            runtime: Mutex::new(None),
            primary,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    /// Spin up the worker threads. Idempotent.
    pub fn start(&self) -> StoreResult<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Ok(());
        }
        let built = Builder::new_multi_thread()
            .worker_threads(self.threads)
            .max_blocking_threads(self.threads)
            .thread_name("stowage-expiry")
            .enable_time()
            .build()
            .map_err(|e| StoreError::StoreUnavailable(format!("failed to start scheduler: {}", e)))?;
        *runtime = Some(built);
        info!(threads = self.threads, "Eviction scheduler started");
        Ok(())
    }

    /// Shut the worker threads down without waiting for in-flight passes.
    pub fn stop(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
            info!("Eviction scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Run `pass` every `period`, first after one full period.
    pub fn schedule_eviction<F>(&self, label: &str, period: Duration, pass: F) -> StoreResult<TaskHandle>
    where
        F: Fn() -> StoreResult<usize> + Send + Sync + 'static,
    {
        if period.is_zero() {
            return Err(StoreError::Configuration(format!(
                "eviction interval for '{}' must be positive",
                label
            )));
        }
        let runtime = self.runtime.lock();
        let runtime = runtime
            .as_ref()
            .ok_or_else(|| StoreError::StoreUnavailable("scheduler is not running".to_string()))?;

        let pass = Arc::new(pass);
        let primary = self.primary.clone();
        let metrics = self.metrics.clone();
        let task_label = label.to_string();

        let handle = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !primary.is_primary() {
                    metrics.record_skipped_pass();
                    debug!(task = %task_label, "Not the primary node, skipping eviction");
                    continue;
                }

                let pass = pass.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    panic::catch_unwind(AssertUnwindSafe(|| (*pass)()))
                })
                .await;

                match outcome {
                    Ok(Ok(Ok(removed))) => {
                        metrics.record_pass(removed);
                        if removed > 0 {
                            debug!(task = %task_label, removed = removed, "Eviction pass finished");
                        }
                    }
                    Ok(Ok(Err(e))) => {
                        metrics.record_failed_pass();
                        error!(task = %task_label, error = %e, "Eviction pass failed");
                    }
                    Ok(Err(_)) | Err(_) => {
                        metrics.record_failed_pass();
                        error!(task = %task_label, "Eviction pass panicked");
                    }
                }
            }
        });

        debug!(task = %label, period_ms = period.as_millis() as u64, "Scheduled eviction");
        Ok(TaskHandle {
            label: label.to_string(),
            handle,
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterNode, NodeRole};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_requires_start() {
        let scheduler = Scheduler::new(1);
        let result = scheduler.schedule_eviction("t", Duration::from_millis(10), || Ok(0));
        assert!(matches!(result, Err(StoreError::StoreUnavailable(_))));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let scheduler = Scheduler::new(1);
        scheduler.start().unwrap();
        let result = scheduler.schedule_eviction("t", Duration::ZERO, || Ok(0));
        assert!(matches!(result, Err(StoreError::Configuration(_))));
    }

    #[test]
    fn test_runs_periodically_and_cancels() {
        let scheduler = Scheduler::new(1);
        scheduler.start().unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = scheduler
            .schedule_eviction("count", Duration::from_millis(20), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .unwrap();

        thread::sleep(Duration::from_millis(300));
        task.cancel();
        thread::sleep(Duration::from_millis(50));
        let after_cancel = runs.load(Ordering::SeqCst);
        assert!(after_cancel >= 3);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
        assert!(scheduler.metrics().entries_evicted() >= 3);
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_failures_do_not_stop_task() {
        let scheduler = Scheduler::new(1);
        scheduler.start().unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let _task = scheduler
            .schedule_eviction("flaky", Duration::from_millis(20), move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n % 2 == 0 {
                    Err(StoreError::StoreUnavailable("disk gone".to_string()))
                } else {
                    panic!("boom")
                }
            })
            .unwrap();

        thread::sleep(Duration::from_millis(300));
        assert!(runs.load(Ordering::SeqCst) >= 4);
        assert!(scheduler.metrics().failed_passes() >= 4);
    }

    #[test]
    fn test_failing_task_does_not_stall_others() {
        let scheduler = Scheduler::new(1);
        scheduler.start().unwrap();

        let _broken = scheduler
            .schedule_eviction("broken", Duration::from_millis(20), || -> StoreResult<usize> {
                panic!("corrupted partition")
            })
            .unwrap();

        let healthy = Arc::new(AtomicUsize::new(0));
        let counter = healthy.clone();
        let _task = scheduler
            .schedule_eviction("healthy", Duration::from_millis(20), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .unwrap();

        thread::sleep(Duration::from_millis(300));
        assert!(healthy.load(Ordering::SeqCst) >= 4);
        assert!(scheduler.metrics().failed_passes() >= 4);
        assert!(scheduler.metrics().entries_evicted() >= 4);
    }

    #[test]
    fn test_passes_bounded_by_thread_count() {
        let scheduler = Scheduler::new(1);
        scheduler.start().unwrap();

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..3)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                scheduler
                    .schedule_eviction(&format!("slow-{}", i), Duration::from_millis(10), move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(30));
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(0)
                    })
                    .unwrap()
            })
            .collect();

        thread::sleep(Duration::from_millis(300));
        drop(tasks);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(scheduler.metrics().eviction_passes() >= 3);
    }

    #[test]
    fn test_follower_skips_passes() {
        let node = Arc::new(ClusterNode::new(2, NodeRole::Follower));
        let metrics = Arc::new(StoreMetrics::new());
        let scheduler = Scheduler::with_primary(1, node.clone(), metrics.clone());
        scheduler.start().unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let _task = scheduler
            .schedule_eviction("guarded", Duration::from_millis(20), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            })
            .unwrap();

        thread::sleep(Duration::from_millis(150));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(metrics.skipped_passes() > 0);

        node.promote();
        thread::sleep(Duration::from_millis(150));
        assert!(runs.load(Ordering::SeqCst) > 0);
    }
}
