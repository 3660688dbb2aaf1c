//! Wagon: an in-process orchestrator for pluggable agents.
//!
//! Callers register [`Agent`]s, submit prioritised tasks with
//! dependencies, and run multi-step workflows whose steps become tasks.
//! Everything is in memory; see [`Orchestrator`] for the entry point.

pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod util;
pub mod workflow;

pub use agent::{Agent, AgentHandle, AgentId, AgentResult, SharedAgent};
pub use config::Config;
pub use core::context::Context;
pub use core::task::{Task, TaskId, TaskPriority, TaskRequest, TaskStatus};
pub use error::{Error, Result};
pub use orchestration::{
    AgentStatus, ConnectivityProbe, EventKind, HealthReport, Orchestrator, OrchestratorEvent,
    SystemStatus,
};
pub use workflow::{
    ExecutionId, Workflow, WorkflowExecution, WorkflowId, WorkflowStatus, WorkflowStep,
};
