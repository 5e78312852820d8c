//! Worker pool with hard per-task timeouts and bounded retries
//!
//! Linear programs on genome-scale models occasionally hang inside the solver, and a hung
//! solve cannot be interrupted cooperatively. Each task therefore runs on its own named
//! thread and reports back over a channel; the coordinating thread stops waiting once the
//! deadline passes and abandons the worker. An abandoned worker still holds its slot in the
//! pool until it finishes or until another full timeout has passed, after which it is
//! replaced. Tasks which time out or fault are retried with a longer timeout, up to a
//! maximum number of attempts, after which they resolve to a [`TaskFailure`] instead of a
//! value.
//!
//! Every worker shares one read-only context (usually a model or a linear problem), fixed
//! when the pool is created.
use std::any::Any;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Result of a single attempt at a task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    /// The task finished and produced a value
    Completed(T),
    /// The task did not finish before its deadline
    TimedOut,
    /// The task returned an error or panicked
    Faulted(String),
}

/// Why an item has no value after every attempt was used
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskFailure {
    #[error("timed out on all {attempts} attempts")]
    TimedOut { attempts: usize },
    #[error("failed after {attempts} attempts: {reason}")]
    Faulted { attempts: usize, reason: String },
}

/// How long to wait for each attempt, and how many attempts to make
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Timeout of the first attempt, attempt `n` waits `n * timeout`
    pub timeout: Duration,
    pub max_attempts: usize,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_attempts: usize) -> Self {
        Self {
            timeout,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Timeout for the (1-based) `attempt`
    pub fn timeout_for(&self, attempt: usize) -> Duration {
        self.timeout
            .checked_mul(attempt as u32)
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    /// Every item failed, which points at a problem with the shared context rather than
    /// individual items
    #[error("all {items} {label} tasks failed, last failure: {last}")]
    SystemicFailure {
        label: String,
        items: usize,
        last: TaskFailure,
    },
}

type TaskFn<C, I, T> = dyn Fn(&C, &I) -> Result<T, String> + Send + Sync;

/// How often the pool checks on abandoned workers while every slot is held by one
const ABANDONED_POLL: Duration = Duration::from_millis(10);

/// A worker which is still running
struct Running {
    /// None when the timeout is too large to represent
    deadline: Option<Instant>,
    handle: JoinHandle<()>,
}

/// A worker which missed its deadline
struct Abandoned {
    label: String,
    handle: JoinHandle<()>,
    /// When the worker stops counting against the thread limit
    release: Option<Instant>,
}

/// A pool of at most `threads` concurrent workers sharing a read-only context
///
/// Workers that timed out count against `threads` while they keep running, so a hanging
/// task never lets the number of busy threads grow past the limit for longer than one
/// extra timeout.
pub struct TaskPool<C, I, T> {
    label: String,
    context: Arc<C>,
    task: Arc<TaskFn<C, I, T>>,
    threads: usize,
    abandoned: Mutex<Vec<Abandoned>>,
}

impl<C, I, T> TaskPool<C, I, T>
where
    C: Send + Sync + 'static,
    I: Clone + Send + 'static,
    T: Send + 'static,
{
    /// Create a new pool
    ///
    /// # Parameters
    /// - `label`: Used to name worker threads and in log messages
    /// - `context`: Read-only state handed to every task
    /// - `threads`: Maximum number of tasks running at once (at least 1)
    /// - `task`: Work to run for each item, an `Err` is treated as a fault
    pub fn new<F, E>(label: &str, context: C, threads: usize, task: F) -> Self
    where
        F: Fn(&C, &I) -> Result<T, E> + Send + Sync + 'static,
        E: Display,
    {
        Self {
            label: label.to_string(),
            context: Arc::new(context),
            task: Arc::new(move |ctx: &C, item: &I| task(ctx, item).map_err(|err| err.to_string())),
            threads: threads.max(1),
            abandoned: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Run every item once with the given timeout
    ///
    /// Outcomes are returned in the same order as `items`.
    pub fn run_batch(&self, items: &[I], timeout: Duration) -> Vec<TaskOutcome<T>> {
        let (tx, rx) = mpsc::channel::<(usize, TaskOutcome<T>)>();
        let mut outcomes: Vec<Option<TaskOutcome<T>>> = (0..items.len()).map(|_| None).collect();
        let mut running: IndexMap<usize, Running> = IndexMap::new();
        let mut next = 0;
        let mut remaining = items.len();

        while remaining > 0 {
            let hung = self.hung_workers();
            while running.len() + hung < self.threads && next < items.len() {
                let index = next;
                next += 1;
                match self.spawn(index, items[index].clone(), tx.clone()) {
                    Ok(handle) => {
                        let deadline = Instant::now().checked_add(timeout);
                        running.insert(index, Running { deadline, handle });
                    }
                    Err(err) => {
                        outcomes[index] = Some(TaskOutcome::Faulted(format!(
                            "unable to spawn worker thread: {err}"
                        )));
                        remaining -= 1;
                    }
                }
            }
            if running.is_empty() {
                if remaining > 0 {
                    // Every slot is held by an abandoned worker
                    thread::sleep(ABANDONED_POLL);
                }
                continue;
            }

            let nearest = running.values().filter_map(|worker| worker.deadline).min();
            let mut wait = nearest.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            if hung > 0 {
                wait = Some(wait.map_or(ABANDONED_POLL, |wait| wait.min(ABANDONED_POLL)));
            }
            let received = match wait {
                Some(wait) => rx.recv_timeout(wait),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok((index, outcome)) => {
                    // A task past its deadline has already been resolved as timed out
                    if running.shift_remove(&index).is_some() {
                        outcomes[index] = Some(outcome);
                        remaining -= 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    let expired: Vec<usize> = running
                        .iter()
                        .filter(|(_, worker)| matches!(worker.deadline, Some(d) if d <= now))
                        .map(|(index, _)| *index)
                        .collect();
                    for index in expired {
                        if let Some(worker) = running.shift_remove(&index) {
                            warn!(pool = %self.label, item = index, ?timeout, "task timed out, abandoning worker");
                            self.abandon(worker.handle, timeout);
                        }
                        outcomes[index] = Some(TaskOutcome::TimedOut);
                        remaining -= 1;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    for (index, _) in running.drain(..) {
                        outcomes[index] = Some(TaskOutcome::Faulted("worker channel closed".to_string()));
                        remaining -= 1;
                    }
                }
            }
        }

        outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or_else(|| TaskOutcome::Faulted("never scheduled".to_string())))
            .collect()
    }

    /// Keep a timed out worker counting against the thread limit for another `timeout`
    fn abandon(&self, handle: JoinHandle<()>, timeout: Duration) {
        let label = handle.thread().name().unwrap_or(self.label.as_str()).to_string();
        let release = Instant::now().checked_add(timeout);
        self.abandoned_workers().push(Abandoned { label, handle, release });
    }

    /// Number of abandoned workers still holding a slot
    ///
    /// Finished workers are dropped, as are workers whose grace period is over. Those
    /// cannot be stopped and keep running detached.
    fn hung_workers(&self) -> usize {
        let now = Instant::now();
        let mut abandoned = self.abandoned_workers();
        abandoned.retain(|worker| {
            if worker.handle.is_finished() {
                return false;
            }
            let released = matches!(worker.release, Some(release) if release <= now);
            if released {
                warn!(pool = %self.label, worker = %worker.label, "replacing hung worker, it keeps running detached");
            }
            !released
        });
        abandoned.len()
    }

    fn abandoned_workers(&self) -> std::sync::MutexGuard<'_, Vec<Abandoned>> {
        // The list stays valid even if a thread panicked while holding the lock
        match self.abandoned.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run every item, retrying timed out or faulted items
    ///
    /// # Returns
    /// One entry per item, in the same order as `items`. Items which did not complete
    /// within `policy.max_attempts` attempts resolve to a [`TaskFailure`].
    ///
    /// # Errors
    /// [`PoolError::SystemicFailure`] when every item failed.
    pub fn run_with_retry(
        &self,
        items: &[I],
        policy: RetryPolicy,
    ) -> Result<Vec<Result<T, TaskFailure>>, PoolError> {
        let mut results: Vec<Option<Result<T, TaskFailure>>> = (0..items.len()).map(|_| None).collect();
        let mut pending: Vec<usize> = (0..items.len()).collect();
        let mut last_failure: IndexMap<usize, TaskOutcome<()>> = IndexMap::new();
        let mut attempt = 0;

        while !pending.is_empty() && attempt < policy.max_attempts {
            attempt += 1;
            let timeout = policy.timeout_for(attempt);
            let batch: Vec<I> = pending.iter().map(|index| items[*index].clone()).collect();
            debug!(pool = %self.label, attempt, items = batch.len(), ?timeout, "running batch");
            let outcomes = self.run_batch(&batch, timeout);

            let mut retry = Vec::new();
            for (index, outcome) in pending.iter().zip(outcomes) {
                match outcome {
                    TaskOutcome::Completed(value) => {
                        results[*index] = Some(Ok(value));
                        last_failure.shift_remove(index);
                    }
                    TaskOutcome::TimedOut => {
                        last_failure.insert(*index, TaskOutcome::TimedOut);
                        retry.push(*index);
                    }
                    TaskOutcome::Faulted(reason) => {
                        debug!(pool = %self.label, item = *index, %reason, "task faulted");
                        last_failure.insert(*index, TaskOutcome::Faulted(reason));
                        retry.push(*index);
                    }
                }
            }
            if !retry.is_empty() && attempt < policy.max_attempts {
                warn!(pool = %self.label, items = retry.len(), attempt, "retrying failed tasks");
            }
            pending = retry;
        }

        let mut last = None;
        for index in pending {
            let failure = match last_failure.shift_remove(&index) {
                Some(TaskOutcome::Faulted(reason)) => TaskFailure::Faulted {
                    attempts: attempt,
                    reason,
                },
                _ => TaskFailure::TimedOut { attempts: attempt },
            };
            warn!(pool = %self.label, item = index, %failure, "giving up on task");
            last = Some(failure.clone());
            results[index] = Some(Err(failure));
        }

        let results: Vec<Result<T, TaskFailure>> = results
            .into_iter()
            .map(|result| result.unwrap_or(Err(TaskFailure::TimedOut { attempts: attempt })))
            .collect();
        if !results.is_empty() && results.iter().all(|result| result.is_err()) {
            return Err(PoolError::SystemicFailure {
                label: self.label.clone(),
                items: results.len(),
                last: last.unwrap_or(TaskFailure::TimedOut { attempts: attempt }),
            });
        }
        Ok(results)
    }

    fn spawn(
        &self,
        index: usize,
        item: I,
        tx: mpsc::Sender<(usize, TaskOutcome<T>)>,
    ) -> std::io::Result<JoinHandle<()>> {
        let context = Arc::clone(&self.context);
        let task = Arc::clone(&self.task);
        thread::Builder::new()
            .name(format!("{}-{}", self.label, index))
            .spawn(move || {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task(&context, &item))) {
                    Ok(Ok(value)) => TaskOutcome::Completed(value),
                    Ok(Err(reason)) => TaskOutcome::Faulted(reason),
                    Err(payload) => TaskOutcome::Faulted(panic_message(payload)),
                };
                // The receiver is gone if the pool stopped waiting, nothing to report then
                let _ = tx.send((index, outcome));
            })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {message}")
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts task bodies running at the same time
    #[derive(Default)]
    struct Activity {
        calls: AtomicUsize,
        active: AtomicUsize,
        most_active: AtomicUsize,
        slow_done: AtomicBool,
        started_while_slow: AtomicBool,
    }

    impl Activity {
        fn enter(&self) -> usize {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.most_active.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst)
        }

        fn leave(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn results_keep_item_order() {
        let pool = TaskPool::new("square", 3usize, 4, |offset: &usize, x: &usize| {
            // Later items finish first
            thread::sleep(Duration::from_millis((10 - *x as u64) * 2));
            Ok::<usize, String>(x * x + offset)
        });
        let items: Vec<usize> = (0..10).collect();
        let results = pool
            .run_with_retry(&items, RetryPolicy::new(Duration::from_secs(10), 3))
            .unwrap();
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..10).map(|x| x * x + 3).collect::<Vec<_>>());
    }

    #[test]
    fn timed_out_task_is_retried() {
        let calls = AtomicUsize::new(0);
        let pool = TaskPool::new("slow", calls, 2, |calls: &AtomicUsize, x: &u32| {
            if *x == 1 && calls.fetch_add(1, Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_secs(2));
            }
            Ok::<u32, String>(*x)
        });
        let results = pool
            .run_with_retry(&[0, 1, 2], RetryPolicy::new(Duration::from_millis(200), 3))
            .unwrap();
        assert_eq!(results, vec![Ok(0), Ok(1), Ok(2)]);
        assert_eq!(pool.context().load(Ordering::SeqCst), 2);
    }

    #[test]
    fn persistent_failures_resolve_to_errors() {
        let pool = TaskPool::new("flaky", (), 2, |_: &(), x: &i32| {
            if *x < 0 {
                Err(format!("negative input {x}"))
            } else {
                Ok(*x)
            }
        });
        let results = pool
            .run_with_retry(&[1, -1, 2], RetryPolicy::new(Duration::from_secs(5), 2))
            .unwrap();
        assert_eq!(results[0], Ok(1));
        assert_eq!(
            results[1],
            Err(TaskFailure::Faulted {
                attempts: 2,
                reason: "negative input -1".to_string()
            })
        );
        assert_eq!(results[2], Ok(2));
    }

    #[test]
    fn panics_are_faults() {
        let pool = TaskPool::new("panicky", (), 1, |_: &(), x: &i32| {
            if *x == 0 {
                panic!("boom");
            }
            Ok::<i32, String>(*x)
        });
        let outcomes = pool.run_batch(&[0, 1], Duration::from_secs(5));
        assert_eq!(outcomes[0], TaskOutcome::Faulted("worker panicked: boom".to_string()));
        assert_eq!(outcomes[1], TaskOutcome::Completed(1));
    }

    #[test]
    fn all_failures_are_systemic() {
        let pool = TaskPool::new("broken", (), 2, |_: &(), _: &i32| Err::<i32, _>("bad context"));
        let result = pool.run_with_retry(&[1, 2, 3], RetryPolicy::new(Duration::from_secs(5), 2));
        assert!(matches!(
            result,
            Err(PoolError::SystemicFailure { items: 3, .. })
        ));
    }

    #[test]
    fn empty_input() {
        let pool = TaskPool::new("empty", (), 2, |_: &(), x: &i32| Ok::<i32, String>(*x));
        let results = pool
            .run_with_retry(&[], RetryPolicy::new(Duration::from_secs(1), 3))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn retry_timeouts_grow() {
        let policy = RetryPolicy::new(Duration::from_secs(10), 3);
        assert_eq!(policy.timeout_for(1), Duration::from_secs(10));
        assert_eq!(policy.timeout_for(3), Duration::from_secs(30));
        assert_eq!(RetryPolicy::new(Duration::from_secs(1), 0).max_attempts, 1);
    }

    #[test]
    fn timed_out_workers_keep_their_slot() {
        let pool = TaskPool::new("hung", Activity::default(), 1, |activity: &Activity, x: &u32| {
            let call = activity.enter();
            if *x == 0 && call == 0 {
                thread::sleep(Duration::from_millis(300));
            }
            activity.leave();
            Ok::<u32, String>(*x)
        });
        let results = pool
            .run_with_retry(&[0, 1], RetryPolicy::new(Duration::from_millis(250), 3))
            .unwrap();
        assert_eq!(results, vec![Ok(0), Ok(1)]);
        // Item 1 waited for the abandoned worker instead of running next to it
        assert_eq!(pool.context().most_active.load(Ordering::SeqCst), 1);
        assert_eq!(pool.context().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn hung_workers_are_replaced_after_a_grace_period() {
        let pool = TaskPool::new("stuck", Activity::default(), 1, |activity: &Activity, x: &u32| {
            let call = activity.enter();
            if *x == 0 && call == 0 {
                thread::sleep(Duration::from_millis(800));
                activity.slow_done.store(true, Ordering::SeqCst);
            } else if *x == 1 && !activity.slow_done.load(Ordering::SeqCst) {
                activity.started_while_slow.store(true, Ordering::SeqCst);
            }
            activity.leave();
            Ok::<u32, String>(*x)
        });
        let results = pool
            .run_with_retry(&[0, 1], RetryPolicy::new(Duration::from_millis(100), 3))
            .unwrap();
        assert_eq!(results, vec![Ok(0), Ok(1)]);
        assert!(pool.context().started_while_slow.load(Ordering::SeqCst));
    }
}
