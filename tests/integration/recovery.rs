//! Health monitor and recovery integration tests.
//!
//! These tests verify that failures in agents, callbacks and event
//! handlers stay contained, that health problems are reported without
//! side effects, and that shutdown leaves state queryable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use wagon::orchestration::events::EventKind;
use wagon::{ConnectivityProbe, Error, Orchestrator, TaskRequest, TaskStatus};

use crate::fixtures::{
    eventually, fast_config, register, started, wait_terminal, Behavior, ScriptedAgent,
};

struct Flapping(Arc<AtomicUsize>);

#[async_trait]
impl ConnectivityProbe for Flapping {
    /// Up for the first check, down afterwards.
    async fn is_connected(&self) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst) == 0
    }
}

/// Given a panicking agent
/// When its task runs
/// Then the task fails and the same workers keep serving other tasks
#[tokio::test]
async fn test_agent_panic_is_contained() {
    let orchestrator = started(wagon::Config {
        max_concurrent_tasks: 1,
        ..fast_config()
    })
    .await;
    register(&orchestrator, ScriptedAgent::new("bomb", Behavior::Panic)).await;
    register(&orchestrator, ScriptedAgent::new("worker", Behavior::Succeed)).await;

    let bomb = orchestrator
        .submit_task(TaskRequest::new("explode", "bomb"))
        .await
        .unwrap();
    let bomb = wait_terminal(&orchestrator, bomb, Duration::from_secs(5)).await;
    assert_eq!(bomb.status, TaskStatus::Failed);
    assert!(bomb.error.unwrap().contains("scripted panic"));

    let after = orchestrator
        .submit_task(TaskRequest::new("work", "worker"))
        .await
        .unwrap();
    let after = wait_terminal(&orchestrator, after, Duration::from_secs(5)).await;
    assert_eq!(after.status, TaskStatus::Completed);
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_callback_and_handler_panics_are_contained() {
    let orchestrator = started(fast_config()).await;
    register(&orchestrator, ScriptedAgent::new("worker", Behavior::Succeed)).await;

    let delivered = Arc::new(AtomicUsize::new(0));
    orchestrator.on(EventKind::TaskCompleted, |_| panic!("handler exploded"));
    {
        let delivered = Arc::clone(&delivered);
        orchestrator.on(EventKind::TaskCompleted, move |_| {
            delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let first = orchestrator
        .submit_task(
            TaskRequest::new("job", "worker").with_callback(|_| panic!("callback exploded")),
        )
        .await
        .unwrap();
    let first = wait_terminal(&orchestrator, first, Duration::from_secs(5)).await;
    assert_eq!(first.status, TaskStatus::Completed);

    let second = orchestrator
        .submit_task(TaskRequest::new("job", "worker"))
        .await
        .unwrap();
    let second = wait_terminal(&orchestrator, second, Duration::from_secs(5)).await;
    assert_eq!(second.status, TaskStatus::Completed);

    assert!(
        eventually(Duration::from_secs(1), || delivered.load(Ordering::SeqCst) == 2).await,
        "later handlers must still run"
    );
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_health_reports_unhealthy_agent_without_removing_it() {
    let orchestrator = started(fast_config()).await;
    register(&orchestrator, ScriptedAgent::new("well", Behavior::Succeed)).await;
    register(
        &orchestrator,
        ScriptedAgent::new("sick", Behavior::Succeed).unhealthy(),
    )
    .await;

    let report = orchestrator.health_check().await.unwrap();
    let unhealthy: Vec<String> = report
        .unhealthy_agents()
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    assert_eq!(unhealthy, vec!["sick".to_string()]);
    assert_eq!(report.database, None);

    // The sick agent still takes work.
    let id = orchestrator
        .submit_task(TaskRequest::new("job", "sick"))
        .await
        .unwrap();
    let task = wait_terminal(&orchestrator, id, Duration::from_secs(5)).await;
    assert_eq!(task.status, TaskStatus::Completed);

    let status = orchestrator.get_system_status().await.unwrap();
    assert_eq!(status.registered_agents.len(), 2);
    assert!(status.health.is_some());
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_periodic_health_sees_database_outage() {
    let checks = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::new(fast_config())
        .unwrap()
        .with_connectivity_probe(Arc::new(Flapping(Arc::clone(&checks))));
    orchestrator.start().await.unwrap();

    let mut degraded = false;
    for _ in 0..50 {
        let status = orchestrator.get_system_status().await.unwrap();
        if status.health.as_ref().and_then(|h| h.database) == Some(false) {
            degraded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(degraded, "periodic check should report the outage");
    assert!(orchestrator.is_running().await);
    orchestrator.stop().await;

    // Down on the first check, so start refuses.
    let refused = Orchestrator::new(fast_config())
        .unwrap()
        .with_connectivity_probe(Arc::new(Flapping(Arc::new(AtomicUsize::new(1)))));
    assert!(matches!(
        refused.start().await.unwrap_err(),
        Error::DatabaseUnavailable
    ));
}

#[tokio::test]
async fn test_stop_cleans_up_agents_and_keeps_state() {
    let orchestrator = started(fast_config()).await;
    let agent = ScriptedAgent::new("worker", Behavior::Succeed);
    let cleanups = agent.cleanups();
    register(&orchestrator, agent).await;

    let id = orchestrator
        .submit_task(TaskRequest::new("job", "worker"))
        .await
        .unwrap();
    wait_terminal(&orchestrator, id, Duration::from_secs(5)).await;

    orchestrator.stop().await;
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert!(!orchestrator.is_running().await);

    let task = orchestrator.get_task_status(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    // Submissions still queue after stop; nothing runs them until restart.
    let queued = orchestrator
        .submit_task(TaskRequest::new("job", "worker"))
        .await
        .unwrap();
    let status = orchestrator.get_system_status().await.unwrap();
    assert_eq!(status.queue_size, 1);

    orchestrator.start().await.unwrap();
    let queued = wait_terminal(&orchestrator, queued, Duration::from_secs(5)).await;
    assert_eq!(queued.status, TaskStatus::Completed);
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_unregister_cleans_up_and_fails_queued_work() {
    // Not started: the task stays queued while its agent goes away.
    let orchestrator = Orchestrator::new(fast_config()).unwrap();
    let agent = ScriptedAgent::new("worker", Behavior::Succeed);
    let cleanups = agent.cleanups();
    let id = register(&orchestrator, agent).await;

    let task_id = orchestrator
        .submit_task(TaskRequest::new("job", "worker"))
        .await
        .unwrap();
    orchestrator.unregister_agent(&id).await.unwrap();
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    orchestrator.start().await.unwrap();
    let task = wait_terminal(&orchestrator, task_id, Duration::from_secs(5)).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("not registered"));
    orchestrator.stop().await;
}
