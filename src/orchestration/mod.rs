//! Orchestration layer.
//!
//! The scheduler actor owns all task state. Workers pull from it, the
//! health monitor samples it, and every component reports lifecycle
//! changes through the event bus. [`Orchestrator`] is the entry point that
//! wires them together.

pub mod events;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod scheduler;

pub use events::{EventBus, EventKind, OrchestratorEvent};
pub use health::{AgentHealth, ConnectivityProbe, HealthConfig, HealthMonitor, HealthReport};
pub use metrics::{AgentCounters, AgentTaskStats, Metrics};
pub use orchestrator::{AgentStatus, Orchestrator, SystemStatus};
pub use pool::WorkerPool;
pub use registry::AgentRegistry;
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{Outcome, SchedulerHandle, SchedulerSettings, SchedulerSnapshot};
