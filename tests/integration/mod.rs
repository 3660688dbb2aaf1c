//! Integration test suite for wagon.
//!
//! These tests drive a real `Orchestrator` (scheduler actor, worker pool,
//! event bus and health monitor) through its public API with scripted
//! agents.
//!
//! # Test Categories
//!
//! - `scheduling`: Priorities, dependencies, cancellation and status
//! - `retry`: Retry budget, timeouts and failure isolation
//! - `workflow_e2e`: Full workflow execution tests
//! - `recovery`: Health monitoring, panics and shutdown

mod fixtures;

mod recovery;
mod retry;
mod scheduling;
