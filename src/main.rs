use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use wagon::workflow::templates::{self, CAMPAIGN_ANALYSIS};
use wagon::{
    Agent, AgentId, AgentResult, Config, Context, Error, Orchestrator, Result, WorkflowStatus,
};

/// Wagon - in-process orchestrator for pluggable agents
#[derive(Parser, Debug)]
#[command(name = "wagon")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    WAGON_DEBUG=1   Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (defaults to ~/.wagon/wagon.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a built-in workflow against demo agents and print the outcome as JSON
    Run {
        /// Template name
        #[arg(default_value = CAMPAIGN_ANALYSIS)]
        workflow: String,

        /// Seconds to wait for the execution to finish
        #[arg(long, default_value_t = 30)]
        wait: u64,
    },

    /// Print the effective configuration as TOML
    Config,

    /// List the built-in workflow templates
    Templates,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    wagon::log::init(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Run { workflow, wait } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_workflow(config, &workflow, Duration::from_secs(wait)))
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Templates => {
            for template in templates::builtin() {
                println!("{:<24} {}", template.name, template.description);
                for step in &template.steps {
                    println!("    {:<22} -> {}", step.id, step.agent_id);
                }
            }
            Ok(())
        }
    }
}

async fn run_workflow(config: Config, name: &str, wait: Duration) -> Result<()> {
    let orchestrator = Orchestrator::new(Config {
        load_builtin_templates: true,
        ..config
    })?;
    orchestrator
        .register_agent(Arc::new(EchoAgent::new("intelligence_agent", "intelligence")))
        .await?;
    orchestrator
        .register_agent(Arc::new(EchoAgent::new("security_agent", "security")))
        .await?;
    orchestrator.start().await?;

    let outcome = execute(&orchestrator, name, wait).await;
    orchestrator.stop().await;
    let execution = outcome?;

    let status = orchestrator.get_system_status().await?;
    let output = serde_json::json!({
        "execution": execution,
        "system": status,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if execution.status == WorkflowStatus::Failed {
        warn!(execution_id = %execution.id, "workflow failed");
    }
    Ok(())
}

async fn execute(
    orchestrator: &Orchestrator,
    name: &str,
    wait: Duration,
) -> Result<wagon::WorkflowExecution> {
    let workflow_id = orchestrator
        .find_workflow(name)
        .await
        .ok_or_else(|| Error::InvalidWorkflow(format!("no workflow named '{}'", name)))?;

    let context = Context::new()
        .with("campaign_id", "demo")
        .with("requested_by", "wagon-cli");
    let execution_id = orchestrator.execute_workflow(workflow_id, context).await?;
    info!(%execution_id, workflow = name, "waiting for execution");

    orchestrator.wait_for_execution(&execution_id, wait).await
}

/// Demo agent that echoes its context back as the result.
struct EchoAgent {
    id: AgentId,
    agent_type: String,
}

impl EchoAgent {
    fn new(id: &str, agent_type: &str) -> Self {
        Self {
            id: AgentId::from(id),
            agent_type: agent_type.to_string(),
        }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    fn agent_type(&self) -> &str {
        &self.agent_type
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["echo".to_string()]
    }

    async fn process(&self, context: &Context) -> Result<AgentResult> {
        Ok(AgentResult::success(serde_json::json!({
            "agent": self.id.as_str(),
            "input": context.clone().into_value(),
        })))
    }
}
