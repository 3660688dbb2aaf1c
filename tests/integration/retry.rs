//! Retry and failure-handling integration tests.

use std::sync::atomic::Ordering;
use std::time::Duration;

use wagon::orchestration::events::{EventKind, OrchestratorEvent};
use wagon::{Config, TaskRequest, TaskStatus};

use crate::fixtures::{
    eventually, fast_config, record, register, started, statuses, wait_terminal, Behavior,
    ScriptedAgent,
};

/// Given an agent that always fails and max_retries = 2
/// When a task is submitted
/// Then it is attempted three times and ends Failed
#[tokio::test]
async fn test_retry_budget_is_max_retries_plus_one_attempts() {
    let orchestrator = started(fast_config()).await;
    let agent = ScriptedAgent::new("flaky", Behavior::Fail);
    let calls = agent.calls();
    register(&orchestrator, agent).await;
    let events = record(&orchestrator, &[EventKind::TaskRetry, EventKind::TaskFailed]);

    let id = orchestrator
        .submit_task(TaskRequest::new("job", "flaky").with_max_retries(2))
        .await
        .unwrap();
    let task = wait_terminal(&orchestrator, id, Duration::from_secs(5)).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(task.retry_count, 3);
    assert_eq!(task.error.as_deref(), Some("scripted failure 3"));

    assert!(eventually(Duration::from_secs(1), || events.lock().unwrap().len() == 3).await);
    let events = events.lock().unwrap();
    let attempts: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::TaskRetry { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(events.last().unwrap().kind(), EventKind::TaskFailed);

    let status = orchestrator.get_system_status().await.unwrap();
    assert_eq!(status.metrics.tasks_retried, 2);
    assert_eq!(status.metrics.tasks_failed, 1);
    assert_eq!(status.metrics.tasks_executed, 3);
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_transient_failure_recovers() {
    let orchestrator = started(fast_config()).await;
    let agent = ScriptedAgent::new("flaky", Behavior::FailTimes(1));
    let calls = agent.calls();
    register(&orchestrator, agent).await;

    let id = orchestrator
        .submit_task(TaskRequest::new("job", "flaky").with_max_retries(1))
        .await
        .unwrap();
    let task = wait_terminal(&orchestrator, id, Duration::from_secs(5)).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retry_count, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(task.error.is_none());
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_default_retry_budget_comes_from_config() {
    let orchestrator = started(Config {
        default_max_retries: 1,
        ..fast_config()
    })
    .await;
    let agent = ScriptedAgent::new("broken", Behavior::Error);
    let calls = agent.calls();
    register(&orchestrator, agent).await;

    let id = orchestrator
        .submit_task(TaskRequest::new("job", "broken"))
        .await
        .unwrap();
    let task = wait_terminal(&orchestrator, id, Duration::from_secs(5)).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.max_retries, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(task.error.unwrap().contains("scripted error"));
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_timeout_counts_as_failure() {
    let orchestrator = started(fast_config()).await;
    register(
        &orchestrator,
        ScriptedAgent::new("stalled", Behavior::Slow(Duration::from_secs(30))),
    )
    .await;

    let id = orchestrator
        .submit_task(
            TaskRequest::new("job", "stalled").with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    let task = wait_terminal(&orchestrator, id, Duration::from_secs(5)).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("timed out"));
    orchestrator.stop().await;
}

/// Given a chain a -> b -> c where a fails for good
/// Then b and c are cancelled and never run
#[tokio::test]
async fn test_failure_cancels_dependents() {
    let orchestrator = started(fast_config()).await;
    register(&orchestrator, ScriptedAgent::new("broken", Behavior::Fail)).await;
    let downstream = ScriptedAgent::new("downstream", Behavior::Succeed);
    let calls = downstream.calls();
    register(&orchestrator, downstream).await;

    let a = orchestrator
        .submit_task(TaskRequest::new("a", "broken"))
        .await
        .unwrap();
    let b = orchestrator
        .submit_task(TaskRequest::new("b", "downstream").depends_on([a]))
        .await
        .unwrap();
    let c = orchestrator
        .submit_task(TaskRequest::new("c", "downstream").depends_on([b]))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for id in [a, b, c] {
        tasks.push(wait_terminal(&orchestrator, id, Duration::from_secs(5)).await);
    }
    assert_eq!(
        statuses(&tasks),
        vec![
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::Cancelled
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_one_failure_does_not_affect_independent_tasks() {
    let orchestrator = started(fast_config()).await;
    register(&orchestrator, ScriptedAgent::new("broken", Behavior::Fail)).await;
    register(&orchestrator, ScriptedAgent::new("worker", Behavior::Succeed)).await;

    let bad = orchestrator
        .submit_task(TaskRequest::new("bad", "broken"))
        .await
        .unwrap();
    let good = orchestrator
        .submit_task(TaskRequest::new("good", "worker"))
        .await
        .unwrap();

    let bad = wait_terminal(&orchestrator, bad, Duration::from_secs(5)).await;
    let good = wait_terminal(&orchestrator, good, Duration::from_secs(5)).await;
    assert_eq!(bad.status, TaskStatus::Failed);
    assert_eq!(good.status, TaskStatus::Completed);

    let broken = orchestrator
        .get_agent_status(&"broken".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(broken.tasks_failed, 1);
    assert!((broken.error_rate - 1.0).abs() < f64::EPSILON);
    orchestrator.stop().await;
}
