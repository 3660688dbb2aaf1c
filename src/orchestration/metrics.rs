//! Aggregate execution counters.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

/// Terminal outcomes of one agent's tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentCounters {
    pub completed: u64,
    pub failed: u64,
}

impl AgentCounters {
    /// Failed share of terminal outcomes, `0.0` with none yet.
    pub fn error_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            0.0
        } else {
            self.failed as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Finished agent calls, including retried attempts.
    pub tasks_executed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    pub tasks_retried: u64,
    /// Rolling mean over completed tasks, in seconds.
    pub average_execution_time: f64,
    pub agents: BTreeMap<AgentId, AgentCounters>,
}

impl Metrics {
    pub fn record_attempt(&mut self) {
        self.tasks_executed += 1;
    }

    pub fn record_completed(&mut self, agent_id: &AgentId, elapsed: Duration) {
        self.tasks_completed += 1;
        let n = self.tasks_completed as f64;
        self.average_execution_time += (elapsed.as_secs_f64() - self.average_execution_time) / n;
        self.agents.entry(agent_id.clone()).or_default().completed += 1;
    }

    pub fn record_failed(&mut self, agent_id: &AgentId) {
        self.tasks_failed += 1;
        self.agents.entry(agent_id.clone()).or_default().failed += 1;
    }

    pub fn record_retry(&mut self) {
        self.tasks_retried += 1;
    }

    pub fn record_cancelled(&mut self) {
        self.tasks_cancelled += 1;
    }

    pub fn error_rate(&self) -> f64 {
        AgentCounters {
            completed: self.tasks_completed,
            failed: self.tasks_failed,
        }
        .error_rate()
    }

    pub fn agent_error_rate(&self, agent_id: &AgentId) -> f64 {
        self.agents
            .get(agent_id)
            .map_or(0.0, AgentCounters::error_rate)
    }
}

/// Task counts for one agent, taken from the scheduler's task table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentTaskStats {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub error_rate: f64,
}
