//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building an orchestrator tuned for fast tests
//! - Scripted agents (succeed, fail, panic, stall, unhealthy)
//! - Collecting emitted events

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use wagon::orchestration::events::{EventKind, OrchestratorEvent};
use wagon::orchestration::health::HEALTH_CHECK_OPERATION;
use wagon::{
    Agent, AgentId, AgentResult, Config, Context, Error, Orchestrator, Result, Task, TaskId,
    TaskStatus,
};

/// Config with short intervals so tests finish quickly.
pub fn fast_config() -> Config {
    Config {
        max_concurrent_tasks: 4,
        task_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_millis(10),
        health_check_interval: Duration::from_millis(50),
        health_probe_timeout: Duration::from_millis(100),
        queue_depth_warning: 100,
        default_max_retries: 0,
        poll_interval: Duration::from_millis(20),
        load_builtin_templates: false,
    }
}

/// A started orchestrator built from `config`.
pub async fn started(config: Config) -> Orchestrator {
    let orchestrator = Orchestrator::new(config).expect("valid config");
    orchestrator.start().await.expect("start");
    orchestrator
}

/// What a `ScriptedAgent` does with each task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    /// Return a successful result echoing the context.
    Succeed,
    /// Return an unsuccessful result.
    Fail,
    /// Return `Err` from `process`.
    Error,
    /// Fail the first `n` calls, then succeed.
    FailTimes(usize),
    /// Panic inside `process`.
    Panic,
    /// Sleep this long before succeeding.
    Slow(Duration),
}

/// Agent whose behavior is fixed at construction and which counts its calls.
pub struct ScriptedAgent {
    id: AgentId,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Context>>>,
    healthy: bool,
}

impl ScriptedAgent {
    pub fn new(id: &str, behavior: Behavior) -> Self {
        Self {
            id: AgentId::from(id),
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            cleanups: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
            healthy: true,
        }
    }

    /// Answer health probes with an unsuccessful result.
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Counter of task calls, excluding health probes.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Counter of `cleanup` calls.
    pub fn cleanups(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.cleanups)
    }

    /// Contexts received by task calls, in order.
    pub fn seen(&self) -> Arc<Mutex<Vec<Context>>> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    fn agent_type(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["testing".to_string()]
    }

    async fn process(&self, context: &Context) -> Result<AgentResult> {
        if context.get_str("operation") == Some(HEALTH_CHECK_OPERATION) {
            return Ok(if self.healthy {
                AgentResult::empty_success()
            } else {
                AgentResult::failure("probe rejected")
            });
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen
            .lock()
            .expect("seen lock")
            .push(context.clone());

        match self.behavior {
            Behavior::Succeed => Ok(AgentResult::success(json!({ "call": call }))),
            Behavior::Fail => Ok(AgentResult::failure(format!("scripted failure {}", call))),
            Behavior::Error => Err(Error::Agent(format!("scripted error {}", call))),
            Behavior::FailTimes(n) if call <= n => {
                Ok(AgentResult::failure(format!("transient failure {}", call)))
            }
            Behavior::FailTimes(_) => Ok(AgentResult::success(json!({ "call": call }))),
            Behavior::Panic => panic!("scripted panic"),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(AgentResult::success(json!({ "call": call })))
            }
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Register `agent` and return its id.
pub async fn register(orchestrator: &Orchestrator, agent: ScriptedAgent) -> AgentId {
    orchestrator
        .register_agent(Arc::new(agent))
        .await
        .expect("register agent")
}

/// Record every event of the given kinds.
pub fn record(orchestrator: &Orchestrator, kinds: &[EventKind]) -> Arc<Mutex<Vec<OrchestratorEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in kinds {
        let sink = Arc::clone(&events);
        orchestrator.on(*kind, move |event| {
            sink.lock().expect("event lock").push(event.clone());
            Ok(())
        });
    }
    events
}

/// Poll until the task reaches a terminal status.
pub async fn wait_terminal(orchestrator: &Orchestrator, task_id: TaskId, limit: Duration) -> Task {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let task = orchestrator
            .get_task_status(task_id)
            .await
            .expect("scheduler alive")
            .expect("task known");
        if task.is_terminal() {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {} still {:?} after {:?}",
            task_id,
            task.status,
            limit
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `check` holds or `limit` passes.
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub fn statuses(tasks: &[Task]) -> Vec<TaskStatus> {
    tasks.iter().map(|t| t.status).collect()
}
