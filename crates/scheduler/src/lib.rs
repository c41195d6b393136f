use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const IDLE_WITHOUT_TASKS: Duration = Duration::from_secs(1);

/// Time source and idle primitive for the control loop.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Wait for up to `duration`. Returns `false` once shutdown was requested.
    fn idle(&mut self, duration: Duration) -> bool;
}

/// Plain blocking sleep, never requests shutdown.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn idle(&mut self, duration: Duration) -> bool {
        std::thread::sleep(duration);
        true
    }
}

/// Idles on a current-thread runtime and stops when the shutdown future completes.
pub struct RuntimeClock {
    runtime: Rc<Runtime>,
    shutdown: Pin<Box<dyn Future<Output = ()>>>,
    stopped: bool,
}

impl RuntimeClock {
    /// Stop on Ctrl-C.
    pub fn new(runtime: Rc<Runtime>) -> Self {
        Self::with_shutdown(runtime, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "ctrl-c handler unavailable");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
    }

    pub fn with_shutdown(runtime: Rc<Runtime>, shutdown: impl Future<Output = ()> + 'static) -> Self {
        Self {
            runtime,
            shutdown: Box::pin(shutdown),
            stopped: false,
        }
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn idle(&mut self, duration: Duration) -> bool {
        if self.stopped {
            return false;
        }
        let shutdown = &mut self.shutdown;
        let stopped = self.runtime.block_on(async {
            tokio::select! {
                _ = sleep(duration) => false,
                _ = shutdown => true,
            }
        });
        self.stopped = stopped;
        !stopped
    }
}

#[derive(Debug)]
struct Task<K> {
    key: K,
    interval: Duration,
    next_due: Option<Instant>,
}

/// Cooperative periodic task table.
///
/// A task is due immediately after registration and then every `interval`.
/// When a cycle overruns, the missed ticks are dropped rather than replayed.
#[derive(Debug)]
pub struct Scheduler<K> {
    tasks: Vec<Task<K>>,
}

impl<K: Clone + Debug> Scheduler<K> {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn every(&mut self, key: K, interval: Duration) -> &mut Self {
        self.tasks.push(Task {
            key,
            interval: interval.max(Duration::from_millis(1)),
            next_due: None,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Keys due at `now`, in registration order. Their next deadline is advanced.
    pub fn due(&mut self, now: Instant) -> Vec<K> {
        let mut due = Vec::new();
        for task in &mut self.tasks {
            let deadline = task.next_due.unwrap_or(now);
            if deadline > now {
                continue;
            }

            let lag = now.saturating_duration_since(deadline);
            let mut next = deadline + task.interval;
            if next <= now {
                debug!(task = ?task.key, lag_ms = lag.as_millis(), "ticks skipped");
                next = now + task.interval;
            }
            task.next_due = Some(next);
            due.push(task.key.clone());
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.iter().filter_map(|task| task.next_due).min()
    }

    /// Run due tasks and idle in between until the clock reports shutdown.
    pub fn run(&mut self, clock: &mut impl Clock, mut handler: impl FnMut(&K)) {
        let mut iteration = 0u64;
        loop {
            let cycle_start = clock.now();
            for key in self.due(cycle_start) {
                let started = clock.now();
                handler(&key);
                let elapsed = clock.now().saturating_duration_since(started);
                debug!(task = ?key, elapsed_ms = elapsed.as_millis(), "task complete");
            }

            iteration = iteration.wrapping_add(1);
            let now = clock.now();
            let delay = self
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(now))
                .unwrap_or(IDLE_WITHOUT_TASKS);
            let elapsed = now.saturating_duration_since(cycle_start);
            debug!(
                iteration,
                elapsed_ms = elapsed.as_millis(),
                delay_ms = delay.as_millis(),
                "scheduler cycle complete"
            );

            if !clock.idle(delay) {
                info!(iteration, "scheduler stopped");
                break;
            }
        }
    }
}

impl<K: Clone + Debug> Default for Scheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}
