//! The agent contract.
//!
//! Agents are external workers. The orchestrator only ever calls
//! `initialize`, `process` and `cleanup` through this trait and never
//! inspects what an agent does internally.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::context::Context;
use crate::Result;

/// Identifier an agent registers under, e.g. `"intelligence_agent"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Outcome reported by `Agent::process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn success(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
        }
    }

    pub fn empty_success() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// A pluggable worker.
///
/// `process` may report failure either with an unsuccessful
/// [`AgentResult`] or by returning `Err`; the scheduler treats both the
/// same way.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> AgentId;

    fn agent_type(&self) -> &str;

    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether `initialize` has already run. Registration skips
    /// initialization for agents that report `true`.
    fn is_initialized(&self) -> bool {
        false
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn process(&self, context: &Context) -> Result<AgentResult>;

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

pub type SharedAgent = Arc<dyn Agent>;

/// What the registry knows about an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHandle {
    pub id: AgentId,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub initialized: bool,
    pub last_activity: Option<DateTime<Utc>>,
}

impl AgentHandle {
    pub fn for_agent(agent: &dyn Agent) -> Self {
        Self {
            id: agent.id(),
            agent_type: agent.agent_type().to_string(),
            capabilities: agent.capabilities(),
            initialized: agent.is_initialized(),
            last_activity: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}
