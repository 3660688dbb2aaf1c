//! Core domain models for the orchestrator.
//!
//! This module contains the fundamental data structures used throughout
//! the orchestration system: tasks, their payloads and the workflow step
//! graph.

pub mod context;
pub mod dag;
pub mod task;

pub use context::Context;
pub use dag::StepGraph;
pub use task::{Task, TaskCallback, TaskId, TaskPriority, TaskRequest, TaskStatus};
