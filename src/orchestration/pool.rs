//! Worker pool.
//!
//! A fixed number of Tokio tasks pull ready tasks from the scheduler, run
//! the target agent under the task's deadline and report the outcome back.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::task::Task;
use crate::orchestration::registry::AgentRegistry;
use crate::orchestration::scheduler::{Outcome, SchedulerHandle};
use crate::util::spawn_with_timeout;
use crate::Error;

/// Pause after an unexpected worker error.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct WorkerPool;

impl WorkerPool {
    /// Spawn `size` workers. They stop when `cancel` fires or the
    /// scheduler goes away.
    pub fn spawn(
        size: usize,
        scheduler: SchedulerHandle,
        registry: AgentRegistry,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..size)
            .map(|id| {
                let worker = Worker {
                    id,
                    scheduler: scheduler.clone(),
                    registry: registry.clone(),
                    poll_interval,
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    scheduler: SchedulerHandle,
    registry: AgentRegistry,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "worker started");
        while !self.cancel.is_cancelled() {
            match self.scheduler.next_task(self.id, self.poll_interval).await {
                Ok(Some(task)) => {
                    let task_id = task.id;
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            warn!(worker = self.id, task_id = %task_id.short(), "worker stopped mid-task");
                            let reason = "worker stopped before the task finished".to_string();
                            if let Err(e) = self.scheduler.cancel_with_reason(task_id, reason).await {
                                debug!(worker = self.id, error = %e, "could not cancel abandoned task");
                            }
                            break;
                        }
                        _ = self.execute(task) => {}
                    }
                }
                Ok(None) => {}
                Err(Error::SchedulerClosed) => break,
                Err(e) => {
                    error!(worker = self.id, error = %e, "worker error");
                    sleep(ERROR_BACKOFF).await;
                }
            }
        }
        debug!(worker = self.id, "worker stopped");
    }

    async fn execute(&self, task: Task) {
        debug!(
            worker = self.id,
            task_id = %task.id.short(),
            task_type = %task.task_type,
            agent_id = %task.agent_id,
            "executing task"
        );
        let outcome = invoke(&self.registry, &task).await;
        if let Err(e) = self.scheduler.finish(task.id, outcome).await {
            error!(worker = self.id, task_id = %task.id, error = %e, "could not report task outcome");
        }
    }
}

/// Run the task's agent once and classify the result.
pub async fn invoke(registry: &AgentRegistry, task: &Task) -> Outcome {
    let Some(agent) = registry.get(&task.agent_id).await else {
        return Outcome::failed(Error::NotRegistered(task.agent_id.clone()).to_string());
    };
    // The agent may be unregistered between the lookup and here.
    if let Err(e) = registry.touch(&task.agent_id).await {
        debug!(task_id = %task.id.short(), error = %e, "agent left before the call");
    }

    let context = task.context.clone();
    let call = spawn_with_timeout(task.timeout, async move { agent.process(&context).await });
    match call.await {
        Ok(Ok(result)) if result.success => Outcome::Succeeded(result),
        Ok(Ok(result)) => Outcome::Failed {
            error: result
                .error
                .clone()
                .unwrap_or_else(|| "agent reported failure".to_string()),
            result: Some(result),
        },
        Ok(Err(e)) => Outcome::failed(e.to_string()),
        Err(e) => {
            info!(task_id = %task.id.short(), error = %e, "agent call aborted");
            Outcome::failed(e.to_string())
        }
    }
}
