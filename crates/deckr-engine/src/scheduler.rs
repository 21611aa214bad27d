use std::sync::mpsc;
use std::thread;

use anyhow::{anyhow, Result};

use crate::error::DeckError;
use crate::progress::RunTracker;

/// First task failure observed in completion order.
#[derive(Debug)]
pub struct TaskFailure {
    pub index: usize,
    pub completed: usize,
    pub cause: anyhow::Error,
}

/// Runs tasks in sequential windows of `batch_size`, one scoped thread per
/// task inside a window.
///
/// Workers only send `(index, result)` back over a channel; the calling
/// thread owns the result slots and the completion counter, so output order
/// always matches input order no matter when tasks finish.
#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    batch_size: usize,
}

impl BatchScheduler {
    pub fn new(batch_size: usize) -> Result<Self, DeckError> {
        if batch_size == 0 {
            return Err(DeckError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fail-fast: once a window settles with a failure, later windows never
    /// start and nothing is returned. Progress stops at the first failure.
    /// Reporting `complete` is left to the caller, after its own output is
    /// in place.
    pub fn run<T, R, F>(
        &self,
        tasks: &[T],
        tracker: &RunTracker<'_>,
        worker: F,
    ) -> Result<Vec<R>, TaskFailure>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync,
    {
        let total = tasks.len();
        let mut completed = 0usize;
        let mut out: Vec<R> = Vec::with_capacity(total);

        for (window_idx, window) in tasks.chunks(self.batch_size).enumerate() {
            let offset = window_idx * self.batch_size;
            let mut slots: Vec<Option<R>> = window.iter().map(|_| None).collect();
            let mut failure: Option<TaskFailure> = None;

            thread::scope(|scope| {
                let (tx, rx) = mpsc::channel::<(usize, Result<R>)>();
                for (idx, task) in window.iter().enumerate() {
                    let tx = tx.clone();
                    let worker = &worker;
                    scope.spawn(move || {
                        let result = worker(task);
                        let _ = tx.send((idx, result));
                    });
                }
                drop(tx);

                for (idx, result) in rx {
                    if failure.is_some() {
                        continue;
                    }
                    match result {
                        Ok(value) => {
                            completed += 1;
                            slots[idx] = Some(value);
                            tracker.slide_done(
                                completed,
                                total,
                                format!("Slide {} of {total} rendered", offset + idx + 1),
                            );
                        }
                        Err(cause) => {
                            failure = Some(TaskFailure {
                                index: offset + idx,
                                completed,
                                cause,
                            });
                        }
                    }
                }
            });

            if let Some(failure) = failure {
                return Err(failure);
            }
            for (idx, slot) in slots.into_iter().enumerate() {
                match slot {
                    Some(value) => out.push(value),
                    None => {
                        return Err(TaskFailure {
                            index: offset + idx,
                            completed,
                            cause: anyhow!("worker exited without a result"),
                        })
                    }
                }
            }
        }

        Ok(out)
    }
}
