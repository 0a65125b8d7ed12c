//! Whole runtimes against a scripted service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use replayflow::runtime::PollerConfig;
use replayflow::{
    BoxError, ContextName, Decision, Error, EventType, HandlerRegistry, RuntimeConfig, TaskContext,
    TaskOutcome, WorkerRuntime, WorkflowClient, task_fn,
};
use test_utils::{HistoryBuilder, ScriptedClient, TaskReport, assignment};
use tokio::sync::oneshot;

use crate::support::{
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT, charge_task, init_test_tracing, order_workflow,
    wait_until,
};

fn handlers() -> HandlerRegistry {
    HandlerRegistry::builder()
        .on(
            EventType::WorkflowExecutionStarted,
            ContextName::Workflow(order_workflow()),
            |ctx, decisions| {
                decisions.schedule_task(charge_task(), ctx.input()?.map(String::from));
                Ok(())
            },
        )
        .on(
            EventType::TaskCompleted,
            ContextName::Task(charge_task()),
            |ctx, decisions| {
                decisions.complete_workflow(ctx.output()?.map(String::from))?;
                Ok(())
            },
        )
        .on(
            EventType::WorkflowExecutionSignaled,
            ContextName::signal("explode"),
            |_ctx, _decisions| Err("signal handler blew up".into()),
        )
        .build()
        .expect("handlers should register")
}

fn runtime(client: &Arc<ScriptedClient>) -> WorkerRuntime {
    let client: Arc<dyn WorkflowClient> = client.clone();
    WorkerRuntime::builder(client)
        .handlers(handlers())
        .register_task(
            charge_task(),
            task_fn(|ctx: TaskContext| async move {
                Ok::<_, BoxError>(TaskOutcome::completed(format!(
                    "charged {}",
                    ctx.input().unwrap_or("0")
                )))
            }),
        )
        .config(RuntimeConfig {
            identity: Some("host-1".into()),
            poller: PollerConfig {
                poll_error_backoff: Duration::from_millis(10),
                shutdown_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            ..Default::default()
        })
        .build()
        .expect("runtime should build")
}

#[tokio::test]
async fn workflow_runs_from_start_to_completion() -> Result<()> {
    init_test_tracing();
    let client = Arc::new(ScriptedClient::new());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(runtime(&client).run(async {
        stop_rx.await.ok();
    }));

    let mut history = HistoryBuilder::start(order_workflow(), Some("1250"));
    client.queue_history(&history, "token-1", 100);

    let first = wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        Ok(client.submissions().first().map(|(_, batch)| batch.clone()))
    })
    .await?;
    let [Decision::ScheduleTask { task_id, input, .. }] = first.as_slice() else {
        panic!("expected one scheduled task, got {first:?}");
    };
    assert_eq!(input.as_deref(), Some("1250"));

    // The service hands the scheduled task to the task poller
    client.queue_task(assignment("task-token-1", task_id, charge_task(), Some("1250")));
    let reports = wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        let reports = client.reports();
        Ok((!reports.is_empty()).then_some(reports))
    })
    .await?;
    assert_eq!(
        reports,
        vec![TaskReport::Completed {
            task_token: "task-token-1".into(),
            result: Some("charged 1250".into()),
        }]
    );

    history.apply(&first);
    history.task_started(task_id);
    history.task_completed(task_id, Some("charged 1250"));
    history.decision_started();
    client.queue_history(&history, "token-2", 100);

    let second = wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        Ok(client.submissions().get(1).map(|(_, batch)| batch.clone()))
    })
    .await?;
    assert!(
        second.as_slice().iter().any(|d| matches!(
            d,
            Decision::CompleteWorkflow { result } if result.as_deref() == Some("charged 1250")
        )),
        "{second:?}"
    );

    let polls = client.decision_polls();
    assert!(polls.iter().all(|p| p.identity == "host-1-decision"));

    let _ = stop_tx.send(());
    tokio::time::timeout(DEFAULT_TEST_TIMEOUT, running).await???;
    Ok(())
}

#[tokio::test]
async fn handler_errors_stop_the_runtime() -> Result<()> {
    init_test_tracing();
    let client = Arc::new(ScriptedClient::new());
    let mut history = HistoryBuilder::start(order_workflow(), None);
    history.signal("explode", None);
    client.queue_history(&history, "token-1", 100);

    let err = tokio::time::timeout(
        DEFAULT_TEST_TIMEOUT,
        runtime(&client).run(std::future::pending()),
    )
    .await?
    .unwrap_err();

    assert!(matches!(
        err,
        Error::Handler {
            event_type: EventType::WorkflowExecutionSignaled,
            ..
        }
    ));
    assert!(client.submissions().is_empty());
    Ok(())
}

#[tokio::test]
async fn idle_runtime_stops_gracefully() -> Result<()> {
    init_test_tracing();
    let client = Arc::new(ScriptedClient::new());

    tokio::time::timeout(
        DEFAULT_TEST_TIMEOUT,
        runtime(&client).run(tokio::time::sleep(Duration::from_millis(50))),
    )
    .await??;

    assert!(!client.decision_polls().is_empty());
    assert!(client.reports().is_empty());
    Ok(())
}
