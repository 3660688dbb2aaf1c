//! Workflow management for the wagon orchestrator.
//!
//! A workflow is a named graph of steps. The engine validates the graph,
//! expands it into dependent scheduler tasks on execution and rolls the
//! task outcomes back up into a workflow outcome.

pub mod engine;
pub mod templates;
mod types;

pub use engine::WorkflowEngine;
pub use templates::WorkflowTemplate;
pub use types::{
    ExecutionId, StepTask, Workflow, WorkflowExecution, WorkflowId, WorkflowStatus, WorkflowStep,
};
