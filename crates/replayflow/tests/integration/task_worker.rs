//! Task pollers against a scripted service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use replayflow::runtime::{Poller, PollerConfig, TaskWorker};
use replayflow::task::MAX_REASON_LENGTH;
use replayflow::{
    BoxError, Heartbeat, TaskContext, TaskExecutor, TaskOutcome, TaskRegistry, TaskType, WorkflowClient,
    task_fn,
};
use test_utils::{ScriptedClient, TaskReport, assignment};

use crate::support::{
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT, charge_task, init_test_tracing, wait_until,
};

/// Charges the amount in its input, checking for cancellation first.
struct ChargeCard;

#[async_trait]
impl TaskExecutor for ChargeCard {
    type Error = std::num::ParseIntError;

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, Self::Error> {
        if ctx.heartbeat(Some("charging")).await.ok() == Some(Heartbeat::CancelRequested) {
            return Ok(TaskOutcome::CancellationRequested {
                details: Some("stopped before charging".into()),
            });
        }
        let cents: u64 = ctx.input().unwrap_or_default().parse()?;
        Ok(TaskOutcome::completed(format!("charged {cents}")))
    }
}

fn registry() -> Arc<TaskRegistry> {
    let registry = TaskRegistry::builder()
        .register(charge_task(), ChargeCard)
        .register(
            TaskType::new("verbose", "1"),
            task_fn(|_ctx| async { Err::<TaskOutcome, BoxError>("x".repeat(1000).into()) }),
        )
        .build()
        .expect("executors should register");
    Arc::new(registry)
}

fn poller(client: &Arc<ScriptedClient>) -> Poller<TaskWorker> {
    let config = PollerConfig {
        identity: Some("worker-1".into()),
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let client: Arc<dyn WorkflowClient> = client.clone();
    Poller::new(TaskWorker::new(client, registry(), &config), config)
}

#[tokio::test]
async fn completed_tasks_report_their_result() -> Result<()> {
    init_test_tracing();
    let client = Arc::new(ScriptedClient::new());
    client.queue_task(assignment("token-1", "charge-1", charge_task(), Some("1250")));

    assert!(poller(&client).poll_once().await?);

    assert_eq!(
        client.reports(),
        vec![TaskReport::Completed {
            task_token: "token-1".into(),
            result: Some("charged 1250".into()),
        }]
    );
    assert_eq!(
        client.heartbeats(),
        vec![("token-1".to_string(), Some("charging".to_string()))]
    );
    Ok(())
}

#[tokio::test]
async fn executor_errors_report_failures() -> Result<()> {
    let client = Arc::new(ScriptedClient::new());
    client.queue_task(assignment("token-1", "charge-1", charge_task(), Some("lots")));

    poller(&client).poll_once().await?;

    let reports = client.reports();
    let [TaskReport::Failed {
        reason, details, ..
    }] = reports.as_slice()
    else {
        panic!("expected a failure, got {reports:?}");
    };
    assert_eq!(reason.as_deref(), Some("invalid digit found in string"));
    assert!(details.as_deref().unwrap_or_default().contains("ParseIntError"));
    Ok(())
}

#[tokio::test]
async fn requested_cancellation_reports_canceled() -> Result<()> {
    let client = Arc::new(ScriptedClient::new());
    client.request_cancellation();
    client.queue_task(assignment("token-1", "charge-1", charge_task(), Some("1250")));

    poller(&client).poll_once().await?;

    assert_eq!(
        client.reports(),
        vec![TaskReport::Canceled {
            task_token: "token-1".into(),
            details: Some("stopped before charging".into()),
        }]
    );
    Ok(())
}

#[tokio::test]
async fn unknown_task_types_report_failures() -> Result<()> {
    let client = Arc::new(ScriptedClient::new());
    client.queue_task(assignment("token-1", "ship-1", TaskType::new("ship", "2"), None));

    poller(&client).poll_once().await?;

    assert_eq!(
        client.reports(),
        vec![TaskReport::Failed {
            task_token: "token-1".into(),
            reason: Some("unknown task type ship:2".into()),
            details: None,
        }]
    );
    Ok(())
}

#[tokio::test]
async fn long_failure_reasons_are_truncated() -> Result<()> {
    let client = Arc::new(ScriptedClient::new());
    client.queue_task(assignment("token-1", "verbose-1", TaskType::new("verbose", "1"), None));

    poller(&client).poll_once().await?;

    let reports = client.reports();
    let [TaskReport::Failed {
        reason: Some(reason),
        ..
    }] = reports.as_slice()
    else {
        panic!("expected a failure, got {reports:?}");
    };
    assert_eq!(reason.chars().count(), MAX_REASON_LENGTH);
    Ok(())
}

#[tokio::test]
async fn running_poller_works_through_the_queue() -> Result<()> {
    init_test_tracing();
    let client = Arc::new(ScriptedClient::new());
    let handle = poller(&client).spawn();

    for i in 0..3 {
        client.queue_task(assignment(
            &format!("token-{i}"),
            &format!("charge-{i}"),
            charge_task(),
            Some("100"),
        ));
    }

    let reports = wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        let reports = client.reports();
        Ok((reports.len() == 3).then_some(reports))
    })
    .await?;

    assert!(
        reports
            .iter()
            .all(|r| matches!(r, TaskReport::Completed { .. }))
    );

    handle.stop();
    handle.join().await?;
    Ok(())
}
