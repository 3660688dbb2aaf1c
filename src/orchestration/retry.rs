//! Retry decisions for failed task attempts.

use std::time::Duration;

use crate::core::task::Task;

/// Outcome of [`RetryPolicy::on_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The task is pending again and should be queued after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// The task is terminally failed.
    Exhausted { attempts: u32 },
}

/// Fixed-delay retry with a per-task attempt budget.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Record a failed attempt on a running task and move it on.
    ///
    /// `retry_count` is bumped and the error stored. While
    /// `retry_count <= max_retries` the task goes back to pending,
    /// otherwise it is marked failed.
    pub fn on_failure(&self, task: &mut Task, error: String) -> RetryDecision {
        task.retry_count += 1;
        task.error = Some(error);

        if task.retry_count <= task.max_retries && task.reset_for_retry() {
            RetryDecision::Retry {
                attempt: task.retry_count,
                delay: self.delay,
            }
        } else {
            task.fail();
            RetryDecision::Exhausted {
                attempts: task.retry_count,
            }
        }
    }
}
