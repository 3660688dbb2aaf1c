//! Agent registry.
//!
//! Maps agent ids to the live agent object and the handle describing it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::agent::{AgentHandle, AgentId, SharedAgent};
use crate::orchestration::events::{EventBus, OrchestratorEvent};
use crate::{Error, Result};

struct RegisteredAgent {
    agent: SharedAgent,
    handle: AgentHandle,
}

/// Shared table of registered agents.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<AgentId, RegisteredAgent>>>,
    events: EventBus,
}

impl AgentRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Initialize (unless already initialized) and store an agent.
    ///
    /// An existing entry with the same id is replaced. If initialization
    /// fails nothing is stored and the error is returned.
    pub async fn register(&self, agent: SharedAgent) -> Result<AgentId> {
        let id = agent.id();
        if !agent.is_initialized() {
            agent.initialize().await?;
        }

        let mut handle = AgentHandle::for_agent(agent.as_ref());
        handle.initialized = true;
        let agent_type = handle.agent_type.clone();
        let capabilities = handle.capabilities.clone();

        let previous = self
            .agents
            .write()
            .await
            .insert(id.clone(), RegisteredAgent { agent, handle });
        if previous.is_some() {
            warn!(agent_id = %id, "agent re-registered, previous entry replaced");
        }

        info!(agent_id = %id, agent_type = %agent_type, "agent registered");
        self.events.emit(OrchestratorEvent::AgentRegistered {
            agent_id: id.clone(),
            agent_type,
            capabilities,
        });
        Ok(id)
    }

    /// Remove an agent after running its cleanup.
    ///
    /// A cleanup failure is logged; the entry is removed regardless.
    pub async fn unregister(&self, id: &AgentId) -> Result<()> {
        let entry = self
            .agents
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::NotRegistered(id.clone()))?;

        if let Err(e) = entry.agent.cleanup().await {
            error!(agent_id = %id, error = %e, "agent cleanup failed");
        }

        info!(agent_id = %id, "agent unregistered");
        self.events
            .emit(OrchestratorEvent::AgentUnregistered { agent_id: id.clone() });
        Ok(())
    }

    pub async fn get(&self, id: &AgentId) -> Option<SharedAgent> {
        self.agents
            .read()
            .await
            .get(id)
            .map(|entry| Arc::clone(&entry.agent))
    }

    pub async fn handle(&self, id: &AgentId) -> Option<AgentHandle> {
        self.agents.read().await.get(id).map(|entry| entry.handle.clone())
    }

    pub async fn contains(&self, id: &AgentId) -> bool {
        self.agents.read().await.contains_key(id)
    }

    /// Record activity for an agent.
    pub async fn touch(&self, id: &AgentId) -> Result<()> {
        let mut agents = self.agents.write().await;
        let entry = agents
            .get_mut(id)
            .ok_or_else(|| Error::NotRegistered(id.clone()))?;
        entry.handle.touch();
        Ok(())
    }

    /// Registered ids, sorted.
    pub async fn ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of every registered agent, sorted by id.
    pub async fn agents(&self) -> Vec<(AgentId, SharedAgent)> {
        let mut agents: Vec<(AgentId, SharedAgent)> = self
            .agents
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.agent)))
            .collect();
        agents.sort_by(|a, b| a.0.cmp(&b.0));
        agents
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Run cleanup on every agent, keeping them registered.
    pub async fn cleanup_all(&self) {
        for (id, agent) in self.agents().await {
            if let Err(e) = agent.cleanup().await {
                error!(agent_id = %id, error = %e, "agent cleanup failed");
            }
        }
    }
}
