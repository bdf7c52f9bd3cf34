//! Bounded-concurrency task runner
//!
//! Runs a list of independent asynchronous operations with at most
//! `max_concurrent` in flight. Operations are dispatched in input order;
//! completion order is whatever the network gives us, so outcomes are
//! reported twice: immediately through the `on_complete` callback, and in
//! the returned list, which is rebuilt in input order.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};

/// Errors for a malformed task list. Individual task failures never end up here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("max_concurrent must be at least 1")]
    ZeroConcurrency,

    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(String),
}

/// One operation to run, identified by `id`
pub struct Task<'a, T, E> {
    pub id: String,
    future: BoxFuture<'a, Result<T, E>>,
}

impl<'a, T, E> Task<'a, T, E> {
    pub fn new<F>(id: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'a,
    {
        Self {
            id: id.into(),
            future: Box::pin(future),
        }
    }
}

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome<T, E> {
    pub id: String,
    pub result: Result<T, E>,
}

impl<T, E> TaskOutcome<T, E> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runner tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Upper bound on operations in flight
    pub max_concurrent: usize,
    /// Pause after each dispatch before considering the next one
    pub dispatch_delay: Duration,
}

impl RunOptions {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            dispatch_delay: Duration::ZERO,
        }
    }

    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }
}

/// Run `tasks` with bounded concurrency.
///
/// `on_complete` is called once per task as soon as it settles. In-flight
/// operations keep running during the dispatch delay, and everything is
/// drained before returning.
pub async fn run_tasks<'a, T, E, F>(
    tasks: Vec<Task<'a, T, E>>,
    options: RunOptions,
    mut on_complete: F,
) -> Result<Vec<TaskOutcome<T, E>>, RunnerError>
where
    F: FnMut(&TaskOutcome<T, E>),
{
    if options.max_concurrent == 0 {
        return Err(RunnerError::ZeroConcurrency);
    }

    let mut ids = HashSet::with_capacity(tasks.len());
    for task in &tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(RunnerError::DuplicateTaskId(task.id.clone()));
        }
    }
    drop(ids);

    let total = tasks.len();
    let mut slots: Vec<Option<TaskOutcome<T, E>>> = (0..total).map(|_| None).collect();
    let mut in_flight = FuturesUnordered::new();

    let mut settle = |index: usize, outcome: TaskOutcome<T, E>| {
        tracing::trace!(task = %outcome.id, ok = outcome.is_ok(), "Task settled");
        on_complete(&outcome);
        slots[index] = Some(outcome);
    };

    for (index, Task { id, future }) in tasks.into_iter().enumerate() {
        tracing::trace!(task = %id, index, total, "Dispatching task");
        in_flight.push(async move {
            let result = future.await;
            (index, TaskOutcome { id, result })
        });

        if !options.dispatch_delay.is_zero() {
            let pause = tokio::time::sleep(options.dispatch_delay);
            tokio::pin!(pause);
            loop {
                tokio::select! {
                    _ = &mut pause => break,
                    Some((index, outcome)) = in_flight.next() => settle(index, outcome),
                }
            }
        }

        while in_flight.len() >= options.max_concurrent {
            match in_flight.next().await {
                Some((index, outcome)) => settle(index, outcome),
                None => break,
            }
        }
    }

    while let Some((index, outcome)) = in_flight.next().await {
        settle(index, outcome);
    }

    Ok(slots.into_iter().flatten().collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn gauged_tasks(gauge: &Arc<Gauge>, count: usize) -> Vec<Task<'static, usize, String>> {
        (0..count)
            .map(|i| {
                let gauge = Arc::clone(gauge);
                Task::new(format!("task-{i}"), async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(5 + (i as u64 % 3) * 5)).await;
                    gauge.leave();
                    if i % 4 == 0 {
                        Err(format!("task {i} failed"))
                    } else {
                        Ok(i)
                    }
                })
            })
            .collect()
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        for limit in [1, 2, 5] {
            let gauge = Gauge::new();
            let outcomes = run_tasks(gauged_tasks(&gauge, 12), RunOptions::new(limit), |_| {})
                .await
                .unwrap();

            assert_eq!(outcomes.len(), 12);
            assert!(gauge.peak.load(Ordering::SeqCst) <= limit);
            assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_cancel_siblings() {
        let gauge = Gauge::new();
        let mut settled = Vec::new();
        let outcomes = run_tasks(gauged_tasks(&gauge, 8), RunOptions::new(3), |o| {
            settled.push((o.id.clone(), o.is_ok()))
        })
        .await
        .unwrap();

        assert_eq!(settled.len(), 8);
        assert_eq!(outcomes.iter().filter(|o| o.result.is_err()).count(), 2);
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 6);
    }

    #[tokio::test]
    async fn test_outcomes_follow_input_order() {
        let tasks: Vec<Task<'static, u64, ()>> = [30u64, 1, 15, 5]
            .into_iter()
            .map(|ms| {
                Task::new(format!("sleep-{ms}"), async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(ms)
                })
            })
            .collect();

        let mut completion = Vec::new();
        let outcomes = run_tasks(tasks, RunOptions::new(4), |o| completion.push(o.id.clone()))
            .await
            .unwrap();

        let ids: Vec<_> = outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["sleep-30", "sleep-1", "sleep-15", "sleep-5"]);
        assert_eq!(completion.first().map(String::as_str), Some("sleep-1"));
    }

    #[tokio::test]
    async fn test_dispatch_delay_paces_dispatches() {
        let tasks: Vec<Task<'static, (), ()>> = (0..4)
            .map(|i| Task::new(format!("t{i}"), async { Ok(()) }))
            .collect();

        let start = tokio::time::Instant::now();
        let options = RunOptions::new(10).with_dispatch_delay(Duration::from_millis(20));
        let outcomes = run_tasks(tasks, options, |_| {}).await.unwrap();

        assert_eq!(outcomes.len(), 4);
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_malformed_task_lists() {
        let empty: Vec<Task<'static, (), ()>> = Vec::new();
        assert_eq!(
            run_tasks(empty, RunOptions::new(0), |_| {}).await.unwrap_err(),
            RunnerError::ZeroConcurrency
        );

        let duplicated: Vec<Task<'static, (), ()>> = vec![
            Task::new("same", async { Ok(()) }),
            Task::new("same", async { Ok(()) }),
        ];
        assert_eq!(
            run_tasks(duplicated, RunOptions::new(2), |_| {}).await.unwrap_err(),
            RunnerError::DuplicateTaskId("same".to_string())
        );
    }

    #[test]
    fn test_empty_task_list() {
        let empty: Vec<Task<'static, (), ()>> = Vec::new();
        let outcomes = tokio_test::block_on(run_tasks(empty, RunOptions::new(1), |_| {})).unwrap();
        assert!(outcomes.is_empty());
    }
}
