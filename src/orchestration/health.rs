//! Health monitoring for agents, the backlog and the database.
//!
//! The `HealthMonitor` runs on a fixed interval. Each cycle it:
//! - probes every registered agent concurrently with a health-check
//!   context under a short deadline
//! - asks the connectivity probe (if any) whether the database is up
//! - samples queue depth and running-task count from the scheduler
//!
//! Problems are logged and recorded in the [`HealthReport`]. They never
//! stop scheduling and never unregister an agent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentId, SharedAgent};
use crate::config::Config;
use crate::core::context::Context;
use crate::orchestration::registry::AgentRegistry;
use crate::orchestration::scheduler::SchedulerHandle;
use crate::util::spawn_with_timeout;
use crate::Result;

/// Context value sent to agents when probing them.
pub const HEALTH_CHECK_OPERATION: &str = "health_check";

/// Configuration for health monitoring.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Time between cycles.
    pub interval: Duration,
    /// Deadline for one agent probe.
    pub probe_timeout: Duration,
    /// Queue depth above which a cycle warns.
    pub queue_depth_warning: usize,
}

impl From<&Config> for HealthConfig {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.health_check_interval,
            probe_timeout: config.health_probe_timeout,
            queue_depth_warning: config.queue_depth_warning,
        }
    }
}

/// Boundary to the persistence layer.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// Result of probing one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: AgentId,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Outcome of one health cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub agents: Vec<AgentHealth>,
    /// `None` when no connectivity probe is configured.
    pub database: Option<bool>,
    pub queue_depth: usize,
    pub running_tasks: usize,
}

impl HealthReport {
    pub fn unhealthy_agents(&self) -> Vec<&AgentId> {
        self.agents
            .iter()
            .filter(|a| !a.healthy)
            .map(|a| &a.agent_id)
            .collect()
    }

    pub fn is_degraded(&self, queue_depth_warning: usize) -> bool {
        self.agents.iter().any(|a| !a.healthy)
            || self.database == Some(false)
            || self.queue_depth > queue_depth_warning
    }
}

/// Periodic health supervisor.
#[derive(Clone)]
pub struct HealthMonitor {
    config: HealthConfig,
    registry: AgentRegistry,
    scheduler: SchedulerHandle,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    latest: Arc<RwLock<Option<HealthReport>>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        registry: AgentRegistry,
        scheduler: SchedulerHandle,
        probe: Option<Arc<dyn ConnectivityProbe>>,
    ) -> Self {
        Self {
            config,
            registry,
            scheduler,
            probe,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// The report of the most recent cycle.
    pub async fn latest(&self) -> Option<HealthReport> {
        self.latest.read().await.clone()
    }

    /// Run one cycle and keep its report.
    pub async fn check(&self) -> Result<HealthReport> {
        let agents = self.registry.agents().await;
        let probes = agents
            .into_iter()
            .map(|(id, agent)| probe_agent(id, agent, self.config.probe_timeout));
        let agents = join_all(probes).await;

        let database = match &self.probe {
            Some(probe) => Some(probe.is_connected().await),
            None => None,
        };

        let snapshot = self.scheduler.snapshot().await?;
        let report = HealthReport {
            checked_at: Utc::now(),
            agents,
            database,
            queue_depth: snapshot.queue_depth,
            running_tasks: snapshot.running,
        };

        for agent in report.agents.iter().filter(|a| !a.healthy) {
            warn!(
                agent_id = %agent.agent_id,
                detail = agent.detail.as_deref().unwrap_or("unknown"),
                "agent unhealthy"
            );
        }
        if report.database == Some(false) {
            warn!("database connectivity check failed");
        }
        if report.queue_depth > self.config.queue_depth_warning {
            warn!(
                queue_depth = report.queue_depth,
                threshold = self.config.queue_depth_warning,
                "task queue backlog"
            );
        }
        debug!(
            agents = report.agents.len(),
            queue_depth = report.queue_depth,
            running = report.running_tasks,
            "health check complete"
        );

        *self.latest.write().await = Some(report.clone());
        Ok(report)
    }

    /// Run cycles every `interval` until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?self.config.interval, "health monitor started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("health monitor cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.check().await {
                            warn!(error = %e, "health check failed");
                        }
                    }
                }
            }
        })
    }
}

/// Call `process` with a health-check context under `deadline`.
pub async fn probe_agent(id: AgentId, agent: SharedAgent, deadline: Duration) -> AgentHealth {
    let context = Context::new().with("operation", HEALTH_CHECK_OPERATION);
    let call = spawn_with_timeout(deadline, async move { agent.process(&context).await });
    let (healthy, detail) = match call.await {
        Ok(Ok(result)) if result.success => (true, None),
        Ok(Ok(result)) => (
            false,
            Some(result.error.unwrap_or_else(|| "unsuccessful result".to_string())),
        ),
        Ok(Err(e)) | Err(e) => (false, Some(e.to_string())),
    };
    AgentHealth {
        agent_id: id,
        healthy,
        detail,
    }
}
