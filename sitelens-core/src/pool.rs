//! Bounded worker pool for per-page scan tasks.
//!
//! Tasks are submitted all at once and each waits on a shared semaphore, so
//! at most `concurrency` run at any moment. Completions come back one at a
//! time through [`PoolRun::next`] in whatever order they finish; the caller
//! consumes them from a single loop, which is what keeps run-state updates
//! serialized.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const DEFAULT_SCAN_CONCURRENCY: usize = 3;
pub const DEFAULT_DIAGNOSTICS_CONCURRENCY: usize = 2;

/// One finished task.
#[derive(Debug)]
pub struct Completion<T> {
    /// Submission index of the item.
    pub index: usize,
    /// The task's output, or the panic message if it panicked.
    pub outcome: Result<T, String>,
    /// Tasks finished so far, this one included.
    pub completed: usize,
    pub total: usize,
}

pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn run<I, T, F, Fut>(&self, items: Vec<I>, task: F) -> PoolRun<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(usize, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let task = Arc::new(task);
        let total = items.len();
        let mut set = JoinSet::new();

        debug!("Submitting {} tasks at concurrency {}", total, self.concurrency);

        for (index, item) in items.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let task = task.clone();
            set.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => AssertUnwindSafe(task(index, item))
                        .catch_unwind()
                        .await
                        .map_err(panic_message),
                    Err(_) => Err("worker pool closed".to_string()),
                };
                (index, outcome)
            });
        }

        PoolRun {
            set,
            total,
            completed: 0,
        }
    }
}

pub struct PoolRun<T> {
    set: JoinSet<(usize, Result<T, String>)>,
    total: usize,
    completed: usize,
}

impl<T: Send + 'static> PoolRun<T> {
    pub fn total(&self) -> usize {
        self.total
    }

    /// Next finished task, or `None` once every task has been reported.
    pub async fn next(&mut self) -> Option<Completion<T>> {
        loop {
            match self.set.join_next().await? {
                Ok((index, outcome)) => {
                    self.completed += 1;
                    return Some(Completion {
                        index,
                        outcome,
                        completed: self.completed,
                        total: self.total,
                    });
                }
                Err(e) => {
                    // Tasks are never aborted, so this is unreachable in practice.
                    warn!("Worker task vanished: {}", e);
                    self.completed += 1;
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Caps concurrent calls to a slow or rate-limited service.
#[derive(Clone)]
pub struct Limiter {
    semaphore: Arc<Semaphore>,
}

impl Limiter {
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits.max(1))),
        }
    }

    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        let _permit = self.semaphore.acquire().await.ok()?;
        Some(fut.await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let pool = WorkerPool::new(2);
        let mut run = pool.run(vec![1, 2, 3], |_, n: i32| async move {
            if n == 2 {
                panic!("bad item");
            }
            n * 10
        });

        let mut ok = Vec::new();
        let mut failed = Vec::new();
        while let Some(done) = run.next().await {
            match done.outcome {
                Ok(v) => ok.push(v),
                Err(msg) => failed.push((done.index, msg)),
            }
        }
        ok.sort();
        assert_eq!(ok, vec![10, 30]);
        assert_eq!(failed, vec![(1, "bad item".to_string())]);
    }

    #[tokio::test]
    async fn test_empty_run() {
        let pool = WorkerPool::new(3);
        let mut run = pool.run(Vec::<u8>::new(), |_, n| async move { n });
        assert_eq!(run.total(), 0);
        assert!(run.next().await.is_none());
    }
}
