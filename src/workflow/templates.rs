//! Built-in workflow templates.

use crate::core::context::Context;
use crate::workflow::WorkflowStep;

pub const CAMPAIGN_ANALYSIS: &str = "Campaign Analysis";

/// A workflow definition registered at startup.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    pub name: String,
    pub description: String,
    pub steps: Vec<WorkflowStep>,
}

/// Every template loaded when `load_builtin_templates` is set.
pub fn builtin() -> Vec<WorkflowTemplate> {
    vec![campaign_analysis()]
}

/// Collect data and audit security in parallel, analyse performance once
/// the data is in, then report on both.
pub fn campaign_analysis() -> WorkflowTemplate {
    let steps = vec![
        WorkflowStep::new("data_collection", "intelligence_agent", "collect_campaign_data")
            .with_context(Context::new().with("analysis_type", "campaign_performance")),
        WorkflowStep::new("security_check", "security_agent", "security_audit")
            .with_context(Context::new().with("audit_type", "campaign_security")),
        WorkflowStep::new("performance_analysis", "intelligence_agent", "analyze_performance")
            .with_context(Context::new().with("include_visualizations", true))
            .depends_on(["data_collection"]),
        WorkflowStep::new("generate_report", "intelligence_agent", "generate_report")
            .with_context(Context::new().with("report_type", "comprehensive"))
            .depends_on(["performance_analysis", "security_check"]),
    ];

    WorkflowTemplate {
        name: CAMPAIGN_ANALYSIS.to_string(),
        description: "Full performance and security analysis of a campaign".to_string(),
        steps,
    }
}
