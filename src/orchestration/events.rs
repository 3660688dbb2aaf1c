//! Lifecycle event bus.
//!
//! Components publish [`OrchestratorEvent`]s with [`EventBus::emit`], which
//! only queues the event. A single dispatcher task delivers each event to
//! the handlers registered for its kind, in registration order. A handler
//! that errors or panics is logged and skipped; the remaining handlers
//! still run.
//!
//! Events are only queued while a dispatcher is running. Emitting on a bus
//! whose dispatcher was never started, or has stopped, drops the event.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::agent::AgentId;
use crate::core::task::{TaskId, TaskPriority};
use crate::util::panic_message;
use crate::workflow::{ExecutionId, WorkflowId};
use crate::Result;

/// Names handlers subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentRegistered,
    AgentUnregistered,
    TaskSubmitted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskRetry,
    TaskCancelled,
    WorkflowStarted,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowCompleted,
    WorkflowFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AgentRegistered => "agent_registered",
            EventKind::AgentUnregistered => "agent_unregistered",
            EventKind::TaskSubmitted => "task_submitted",
            EventKind::TaskStarted => "task_started",
            EventKind::TaskCompleted => "task_completed",
            EventKind::TaskFailed => "task_failed",
            EventKind::TaskRetry => "task_retry",
            EventKind::TaskCancelled => "task_cancelled",
            EventKind::WorkflowStarted => "workflow_started",
            EventKind::WorkflowPaused => "workflow_paused",
            EventKind::WorkflowResumed => "workflow_resumed",
            EventKind::WorkflowCompleted => "workflow_completed",
            EventKind::WorkflowFailed => "workflow_failed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle notification and its payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    AgentRegistered {
        agent_id: AgentId,
        agent_type: String,
        capabilities: Vec<String>,
    },
    AgentUnregistered {
        agent_id: AgentId,
    },
    TaskSubmitted {
        task_id: TaskId,
        agent_id: AgentId,
        priority: TaskPriority,
    },
    TaskStarted {
        task_id: TaskId,
        agent_id: AgentId,
    },
    TaskCompleted {
        task_id: TaskId,
        agent_id: AgentId,
        /// Seconds spent inside the agent call.
        execution_time: f64,
    },
    TaskFailed {
        task_id: TaskId,
        agent_id: AgentId,
        error: String,
    },
    TaskRetry {
        task_id: TaskId,
        attempt: u32,
        error: Option<String>,
    },
    TaskCancelled {
        task_id: TaskId,
        reason: Option<String>,
    },
    WorkflowStarted {
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
    },
    WorkflowPaused {
        workflow_id: WorkflowId,
    },
    WorkflowResumed {
        workflow_id: WorkflowId,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
    },
    WorkflowFailed {
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        failed_steps: Vec<String>,
    },
}

impl OrchestratorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            OrchestratorEvent::AgentRegistered { .. } => EventKind::AgentRegistered,
            OrchestratorEvent::AgentUnregistered { .. } => EventKind::AgentUnregistered,
            OrchestratorEvent::TaskSubmitted { .. } => EventKind::TaskSubmitted,
            OrchestratorEvent::TaskStarted { .. } => EventKind::TaskStarted,
            OrchestratorEvent::TaskCompleted { .. } => EventKind::TaskCompleted,
            OrchestratorEvent::TaskFailed { .. } => EventKind::TaskFailed,
            OrchestratorEvent::TaskRetry { .. } => EventKind::TaskRetry,
            OrchestratorEvent::TaskCancelled { .. } => EventKind::TaskCancelled,
            OrchestratorEvent::WorkflowStarted { .. } => EventKind::WorkflowStarted,
            OrchestratorEvent::WorkflowPaused { .. } => EventKind::WorkflowPaused,
            OrchestratorEvent::WorkflowResumed { .. } => EventKind::WorkflowResumed,
            OrchestratorEvent::WorkflowCompleted { .. } => EventKind::WorkflowCompleted,
            OrchestratorEvent::WorkflowFailed { .. } => EventKind::WorkflowFailed,
        }
    }

    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            OrchestratorEvent::TaskSubmitted { task_id, .. }
            | OrchestratorEvent::TaskStarted { task_id, .. }
            | OrchestratorEvent::TaskCompleted { task_id, .. }
            | OrchestratorEvent::TaskFailed { task_id, .. }
            | OrchestratorEvent::TaskRetry { task_id, .. }
            | OrchestratorEvent::TaskCancelled { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }
}

type SyncHandler = Arc<dyn Fn(&OrchestratorEvent) -> Result<()> + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(OrchestratorEvent) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

struct Inner {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
    tx: mpsc::UnboundedSender<OrchestratorEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<OrchestratorEvent>>>,
    dispatching: AtomicBool,
}

/// Cheaply cloneable publish/subscribe hub.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                tx,
                rx: Mutex::new(Some(rx)),
                dispatching: AtomicBool::new(false),
            }),
        }
    }

    /// Register a synchronous handler for `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&OrchestratorEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.add(kind, Handler::Sync(Arc::new(handler)));
    }

    /// Register an asynchronous handler for `kind`.
    pub fn on_async<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(OrchestratorEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add(
            kind,
            Handler::Async(Arc::new(move |event| handler(event).boxed())),
        );
    }

    fn add(&self, kind: EventKind, handler: Handler) {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.entry(kind).or_default().push(handler);
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Queue an event for delivery. Never blocks.
    ///
    /// Without a running dispatcher the event is dropped.
    pub fn emit(&self, event: OrchestratorEvent) {
        if !self.is_dispatching() {
            trace!(event = %event.kind(), "no dispatcher, dropping event");
            return;
        }
        trace!(event = %event.kind(), "event emitted");
        if self.inner.tx.send(event).is_err() {
            debug!("event dispatcher gone, dropping event");
        }
    }

    /// Deliver `event` to its handlers now, in registration order.
    pub async fn dispatch(&self, event: OrchestratorEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = {
            let map = self
                .inner
                .handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match map.get(&kind) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        for (index, handler) in handlers.into_iter().enumerate() {
            let outcome = match handler {
                Handler::Sync(f) => std::panic::catch_unwind(AssertUnwindSafe(|| f(&event))),
                Handler::Async(f) => {
                    let event = event.clone();
                    AssertUnwindSafe(async move { f(event).await })
                        .catch_unwind()
                        .await
                }
            };
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(event = %kind, handler = index, error = %e, "event handler failed"),
                Err(panic) => error!(
                    event = %kind,
                    handler = index,
                    panic = %panic_message(panic.as_ref()),
                    "event handler panicked"
                ),
            }
        }
    }

    pub fn is_dispatching(&self) -> bool {
        self.inner.dispatching.load(Ordering::Acquire)
    }

    /// Start the dispatcher task. Returns `None` if one was already started.
    ///
    /// Events emitted before this call are not delivered.
    pub fn spawn_dispatcher(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = self
            .inner
            .rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        let bus = self.clone();
        self.inner.dispatching.store(true, Ordering::Release);

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("event dispatcher cancelled");
                        break;
                    }
                    next = rx.recv() => match next {
                        Some(event) => bus.dispatch(event).await,
                        None => break,
                    }
                }
            }
            bus.inner.dispatching.store(false, Ordering::Release);
        }))
    }
}
