//! Background task scheduler for the worker daemon.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How often a periodic task runs.
#[derive(Debug, Clone, Copy)]
pub enum TaskFrequency {
    /// Run every N seconds.
    Seconds(u64),
    /// Run every N minutes.
    Minutes(u64),
    /// Run every hour.
    Hourly,
}

impl TaskFrequency {
    /// Interval between runs.
    pub fn duration(&self) -> Duration {
        match self {
            TaskFrequency::Seconds(secs) => Duration::from_secs(*secs),
            TaskFrequency::Minutes(mins) => Duration::from_secs(*mins * 60),
            TaskFrequency::Hourly => Duration::from_secs(3600),
        }
    }
}

/// A periodic background task.
#[async_trait::async_trait]
pub trait PeriodicTask: Send + Sync {
    /// Task name, used for logging.
    fn name(&self) -> &'static str;

    /// How often the task runs.
    fn frequency(&self) -> TaskFrequency;

    /// One run of the task.
    async fn execute(&self) -> Result<(), String>;
}

/// Runs registered tasks on their intervals until shut down.
pub struct TaskScheduler {
    tasks: Vec<Arc<dyn PeriodicTask>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            tasks: Vec::new(),
            shutdown_tx,
            shutdown_rx,
            handles: Vec::new(),
        }
    }

    /// Register a task with the scheduler.
    pub fn register<T: PeriodicTask + 'static>(&mut self, task: T) {
        self.tasks.push(Arc::new(task));
    }

    /// Spawn one loop per registered task.
    pub fn start(&mut self) {
        info!("Starting task scheduler with {} tasks", self.tasks.len());

        for task in &self.tasks {
            let task = Arc::clone(task);
            let mut shutdown_rx = self.shutdown_rx.clone();

            let handle = tokio::spawn(async move {
                let name = task.name();
                let frequency = task.frequency();
                let mut interval = tokio::time::interval(frequency.duration());

                // The first tick fires immediately; skip it.
                interval.tick().await;

                info!(task = name, frequency = ?frequency, "Task scheduled");

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let start = std::time::Instant::now();

                            match task.execute().await {
                                Ok(()) => {
                                    info!(
                                        task = name,
                                        elapsed_ms = start.elapsed().as_millis() as u64,
                                        "Task run completed"
                                    );
                                }
                                Err(e) => {
                                    error!(
                                        task = name,
                                        elapsed_ms = start.elapsed().as_millis() as u64,
                                        error = %e,
                                        "Task run failed"
                                    );
                                }
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                info!(task = name, "Task shutting down");
                                break;
                            }
                        }
                    }
                }
            });

            self.handles.push(handle);
        }
    }

    /// Signal shutdown to every task loop. Returns immediately.
    pub fn shutdown(&self) {
        info!("Initiating task scheduler shutdown");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for all task loops to finish, up to the timeout.
    pub async fn wait_for_shutdown(self, timeout: Duration) {
        info!("Waiting for tasks to complete (timeout: {:?})", timeout);

        let shutdown_future = async {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    warn!("Task panicked: {}", e);
                }
            }
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(()) => info!("All tasks completed gracefully"),
            Err(_) => warn!("Task shutdown timed out after {:?}", timeout),
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestTask {
        run_count: Arc<AtomicUsize>,
        should_fail: bool,
    }

    #[async_trait::async_trait]
    impl PeriodicTask for TestTask {
        fn name(&self) -> &'static str {
            "test_task"
        }

        fn frequency(&self) -> TaskFrequency {
            TaskFrequency::Seconds(1)
        }

        async fn execute(&self) -> Result<(), String> {
            self.run_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                Err("Test failure".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_frequency_durations() {
        assert_eq!(
            TaskFrequency::Seconds(30).duration(),
            Duration::from_secs(30)
        );
        assert_eq!(
            TaskFrequency::Minutes(5).duration(),
            Duration::from_secs(300)
        );
        assert_eq!(TaskFrequency::Hourly.duration(), Duration::from_secs(3600));
    }

    #[test]
    fn test_scheduler_register() {
        let mut scheduler = TaskScheduler::new();
        assert!(scheduler.tasks.is_empty());

        scheduler.register(TestTask {
            run_count: Arc::new(AtomicUsize::new(0)),
            should_fail: false,
        });
        assert_eq!(scheduler.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_shutdown() {
        let mut scheduler = TaskScheduler::new();
        let run_count = Arc::new(AtomicUsize::new(0));
        scheduler.register(TestTask {
            run_count: Arc::clone(&run_count),
            should_fail: false,
        });
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(100)).await;

        scheduler.shutdown();
        scheduler.wait_for_shutdown(Duration::from_secs(2)).await;

        // The first tick is skipped, so no run is expected yet.
        assert_eq!(run_count.load(Ordering::SeqCst), 0);
    }
}
