//! Scheduling integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use wagon::orchestration::events::{EventKind, OrchestratorEvent};
use wagon::{Config, Context, Error, Orchestrator, TaskPriority, TaskRequest, TaskStatus};

use crate::fixtures::{
    eventually, fast_config, record, register, started, wait_terminal, Behavior, ScriptedAgent,
};

/// Given one worker and a backlog submitted before start
/// When the pool starts
/// Then tasks run by priority, ties in submission order
#[tokio::test]
async fn test_single_worker_runs_by_priority_then_fifo() {
    let orchestrator = Orchestrator::new(Config {
        max_concurrent_tasks: 1,
        ..fast_config()
    })
    .unwrap();
    register(&orchestrator, ScriptedAgent::new("worker", Behavior::Succeed)).await;

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut ids = Vec::new();
    for (label, priority) in [
        ("low", TaskPriority::Low),
        ("normal-1", TaskPriority::Normal),
        ("critical", TaskPriority::Critical),
        ("normal-2", TaskPriority::Normal),
        ("high", TaskPriority::High),
    ] {
        let order = Arc::clone(&order);
        let request = TaskRequest::new("job", "worker")
            .with_priority(priority)
            .with_callback(move |_| order.lock().unwrap().push(label));
        ids.push(orchestrator.submit_task(request).await.unwrap());
    }

    orchestrator.start().await.unwrap();
    for id in ids {
        wait_terminal(&orchestrator, id, Duration::from_secs(5)).await;
    }

    assert_eq!(
        *order.lock().unwrap(),
        vec!["critical", "high", "normal-1", "normal-2", "low"]
    );
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_dependent_waits_for_dependency() {
    let orchestrator = started(fast_config()).await;
    register(
        &orchestrator,
        ScriptedAgent::new("slow", Behavior::Slow(Duration::from_millis(100))),
    )
    .await;
    register(&orchestrator, ScriptedAgent::new("fast", Behavior::Succeed)).await;

    let first = orchestrator
        .submit_task(TaskRequest::new("prepare", "slow"))
        .await
        .unwrap();
    let second = orchestrator
        .submit_task(TaskRequest::new("use", "fast").depends_on([first]))
        .await
        .unwrap();

    let second = wait_terminal(&orchestrator, second, Duration::from_secs(5)).await;
    let first = orchestrator.get_task_status(first).await.unwrap().unwrap();
    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(second.status, TaskStatus::Completed);
    assert!(second.started_at.unwrap() >= first.completed_at.unwrap());

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_submit_validation() {
    let orchestrator = Orchestrator::new(fast_config()).unwrap();

    let err = orchestrator
        .submit_task(TaskRequest::new("job", "ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotRegistered(_)));

    register(&orchestrator, ScriptedAgent::new("worker", Behavior::Succeed)).await;
    let err = orchestrator
        .submit_task(TaskRequest::new("job", "worker").depends_on([wagon::TaskId::new()]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DependencyNotFound(_)));

    assert_eq!(orchestrator.get_system_status().await.unwrap().queue_size, 0);
}

#[tokio::test]
async fn test_cancel_pending_cascades_to_dependents() {
    // Not started, so nothing leaves the queue.
    let orchestrator = Orchestrator::new(fast_config()).unwrap();
    register(&orchestrator, ScriptedAgent::new("worker", Behavior::Succeed)).await;
    let events = record(&orchestrator, &[EventKind::TaskCancelled]);

    let root = orchestrator
        .submit_task(TaskRequest::new("root", "worker"))
        .await
        .unwrap();
    let child = orchestrator
        .submit_task(TaskRequest::new("child", "worker").depends_on([root]))
        .await
        .unwrap();
    let grandchild = orchestrator
        .submit_task(TaskRequest::new("grandchild", "worker").depends_on([child]))
        .await
        .unwrap();

    assert!(orchestrator.cancel_task(root).await.unwrap());
    assert!(!orchestrator.cancel_task(root).await.unwrap());

    for id in [root, child, grandchild] {
        let task = orchestrator.get_task_status(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }
    let status = orchestrator.get_system_status().await.unwrap();
    assert_eq!(status.queue_size, 0);
    assert_eq!(status.cancelled_tasks, 3);

    assert!(
        eventually(Duration::from_secs(1), || events.lock().unwrap().len() == 3).await,
        "expected three cancellation events"
    );
}

#[tokio::test]
async fn test_cancel_unknown_task_returns_false() {
    let orchestrator = Orchestrator::new(fast_config()).unwrap();
    assert!(!orchestrator.cancel_task(wagon::TaskId::new()).await.unwrap());
    assert!(orchestrator
        .get_task_status(wagon::TaskId::new())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_cancel_running_task_discards_late_result() {
    let orchestrator = started(fast_config()).await;
    register(
        &orchestrator,
        ScriptedAgent::new("slow", Behavior::Slow(Duration::from_millis(200))),
    )
    .await;
    let completed = record(&orchestrator, &[EventKind::TaskCompleted]);

    let id = orchestrator
        .submit_task(TaskRequest::new("job", "slow"))
        .await
        .unwrap();
    for _ in 0..200 {
        let task = orchestrator.get_task_status(id).await.unwrap().unwrap();
        if task.status == TaskStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(orchestrator.cancel_task(id).await.unwrap());
    tokio::time::sleep(Duration::from_millis(400)).await;

    let task = orchestrator.get_task_status(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(completed.lock().unwrap().is_empty());
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_context_and_events_flow_through() {
    let orchestrator = started(fast_config()).await;
    let agent = ScriptedAgent::new("worker", Behavior::Succeed);
    let seen = agent.seen();
    register(&orchestrator, agent).await;
    let events = record(
        &orchestrator,
        &[
            EventKind::TaskSubmitted,
            EventKind::TaskStarted,
            EventKind::TaskCompleted,
        ],
    );

    let id = orchestrator
        .submit_task(
            TaskRequest::new("job", "worker").with_context(Context::new().with("campaign_id", 42)),
        )
        .await
        .unwrap();
    let task = wait_terminal(&orchestrator, id, Duration::from_secs(5)).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.result.unwrap().success);
    assert_eq!(seen.lock().unwrap()[0].get("campaign_id"), Some(&serde_json::json!(42)));

    assert!(eventually(Duration::from_secs(1), || events.lock().unwrap().len() == 3).await);
    let kinds: Vec<EventKind> = events.lock().unwrap().iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::TaskSubmitted,
            EventKind::TaskStarted,
            EventKind::TaskCompleted
        ]
    );
    assert!(matches!(
        &events.lock().unwrap()[2],
        OrchestratorEvent::TaskCompleted { task_id, .. } if *task_id == id
    ));

    let agent_status = orchestrator
        .get_agent_status(&"worker".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agent_status.tasks_completed, 1);
    assert!(agent_status.last_activity.is_some());

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_parallel_workers_share_the_backlog() {
    let orchestrator = started(Config {
        max_concurrent_tasks: 4,
        ..fast_config()
    })
    .await;
    register(
        &orchestrator,
        ScriptedAgent::new("slow", Behavior::Slow(Duration::from_millis(150))),
    )
    .await;

    let started_at = std::time::Instant::now();
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            orchestrator
                .submit_task(TaskRequest::new("job", "slow"))
                .await
                .unwrap(),
        );
    }
    for id in ids {
        wait_terminal(&orchestrator, id, Duration::from_secs(5)).await;
    }
    // Four 150ms tasks in sequence would take 600ms.
    assert!(started_at.elapsed() < Duration::from_millis(550));

    let status = orchestrator.get_system_status().await.unwrap();
    assert_eq!(status.completed_tasks, 4);
    assert_eq!(status.metrics.tasks_completed, 4);
    orchestrator.stop().await;
}
