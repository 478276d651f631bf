use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Shared stop flag. Tasks check it between units of work so a shutdown
/// request interrupts a long-running tick at the next safe point.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Locks the flag, recovering from poisoning: a poisoned flag still
    /// carries its value, and a worker must never panic on it.
    fn flag(&self) -> std::sync::MutexGuard<'_, bool> {
        match self.inner.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.flag()
    }

    fn stop(&self) {
        *self.flag() = true;
        self.inner.1.notify_all();
    }

    /// Sleeps for `interval` or until stopped, whichever comes first.
    /// Returns true if the signal fired.
    fn wait(&self, interval: Duration) -> bool {
        let cvar = &self.inner.1;
        let deadline = Instant::now() + interval;
        let mut stopped = self.flag();
        loop {
            if *stopped {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = match cvar.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for background tasks that run periodically
pub trait BackgroundTask: Send + 'static {
    /// Task name for logging and the worker thread
    fn name(&self) -> &'static str;

    /// How often to run this task
    fn interval(&self) -> Duration;

    /// Execute one tick. `stop` should be polled between units of work.
    fn execute(&self, stop: &StopSignal) -> Result<()>;
}

/// Scheduler manages background worker threads with graceful shutdown:
/// `shutdown` raises the stop signal and joins every worker.
pub struct Scheduler {
    workers: Vec<JoinHandle<()>>,
    stop: StopSignal,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            stop: StopSignal::new(),
        }
    }

    /// Spawn a worker thread running the task on its interval
    pub fn register<T: BackgroundTask>(&mut self, task: T) -> Result<()> {
        let stop = self.stop.clone();
        let handle = std::thread::Builder::new()
            .name(task.name().to_string())
            .spawn(move || {
                let mut run_id = 0u64;
                loop {
                    if stop.wait(task.interval()) {
                        tracing::info!(task = task.name(), "task shutting down");
                        break;
                    }
                    run_id += 1;
                    if let Err(e) = task.execute(&stop) {
                        tracing::error!(
                            task = task.name(),
                            run_id,
                            error = %e,
                            "task execution failed"
                        );
                    }
                }
            })?;

        self.workers.push(handle);
        Ok(())
    }

    /// Graceful shutdown - signal and wait for all workers
    pub fn shutdown(self) {
        self.stop.stop();
        for worker in self.workers {
            if worker.join().is_err() {
                tracing::error!("background task panicked");
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
