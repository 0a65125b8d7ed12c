//! Decision pollers against a scripted service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use replayflow::runtime::{ConsumeMode, DecisionWorker, Poller, PollerConfig, PollerState};
use replayflow::{
    ContextName, Decision, Dispatcher, Error, EventType, HandlerRegistry, RemoteError,
    WorkflowClient,
};
use test_utils::{HistoryBuilder, ScriptedClient};

use crate::support::{
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT, charge_task, init_test_tracing, order_workflow,
    wait_until,
};

fn handlers() -> Arc<HandlerRegistry> {
    let registry = HandlerRegistry::builder()
        .on(
            EventType::WorkflowExecutionStarted,
            ContextName::Workflow(order_workflow()),
            |ctx, decisions| {
                decisions.schedule_task(charge_task(), ctx.input()?.map(String::from));
                Ok(())
            },
        )
        .on(
            EventType::WorkflowExecutionSignaled,
            ContextName::signal("explode"),
            |_ctx, _decisions| Err("signal handler blew up".into()),
        )
        .build()
        .expect("handlers should register");
    Arc::new(registry)
}

fn config() -> PollerConfig {
    PollerConfig {
        identity: Some("decider-1".into()),
        task_list: "orders".into(),
        poll_error_backoff: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn poller(client: &Arc<ScriptedClient>, config: PollerConfig) -> Poller<DecisionWorker> {
    let client: Arc<dyn WorkflowClient> = client.clone();
    Poller::new(DecisionWorker::new(client, handlers(), &config), config)
}

// =============================================================================
// Single cycles
// =============================================================================

#[tokio::test]
async fn paged_history_is_assembled_before_dispatch() -> Result<()> {
    init_test_tracing();
    let client = Arc::new(ScriptedClient::new());
    let mut history = HistoryBuilder::start(order_workflow(), Some("7"));
    for _ in 0..3 {
        history.signal("noise", None);
    }
    // Six events in pages of two
    client.queue_history(&history, "token-1", 2);

    let poller = poller(&client, config());
    assert!(poller.poll_once().await?);

    let polls = client.decision_polls();
    assert_eq!(polls.len(), 3);
    assert!(polls.iter().all(|p| p.identity == "decider-1" && p.task_list == "orders"));

    let submissions = client.submissions();
    assert_eq!(submissions.len(), 1);
    let (token, batch) = &submissions[0];
    assert_eq!(token, "token-1");
    assert!(matches!(
        batch.as_slice(),
        [Decision::ScheduleTask { input, .. }] if input.as_deref() == Some("7")
    ));
    assert_eq!(poller.state(), PollerState::Idle);
    Ok(())
}

#[tokio::test]
async fn missing_history_page_fails_the_poll_without_stopping() -> Result<()> {
    init_test_tracing();
    let client = Arc::new(ScriptedClient::new());
    let mut history = HistoryBuilder::start(order_workflow(), Some("7"));
    for _ in 0..3 {
        history.signal("noise", None);
    }
    client.queue_history(&history, "token-1", 2);
    client.lose_follow_up_page("token-1-page-2");

    let poller = poller(&client, config());
    let err = poller.poll_once().await.unwrap_err();

    assert!(matches!(err, Error::Remote(RemoteError::Transient(_))), "{err}");
    assert!(!err.is_fatal());
    assert!(client.submissions().is_empty());

    // The service redelivers the whole task
    client.queue_history(&history, "token-2", 2);
    assert!(poller.poll_once().await?);

    let submissions = client.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, "token-2");
    Ok(())
}

#[tokio::test]
async fn only_new_events_are_dispatched() -> Result<()> {
    let client = Arc::new(ScriptedClient::new());
    let mut history = HistoryBuilder::start(order_workflow(), Some("7"));
    let first = Dispatcher::new(handlers()).dispatch(&history.log(), history.workflow())?;
    history.apply(&first);
    history.signal("noise", None);
    history.decision_started();
    client.queue_history(&history, "token-2", 100);

    poller(&client, config()).poll_once().await?;

    let submissions = client.submissions();
    assert!(submissions[0].1.is_empty(), "{:?}", submissions[0].1);
    Ok(())
}

#[tokio::test]
async fn fail_fast_reports_an_empty_poll() {
    let client = Arc::new(ScriptedClient::new());
    let poller = poller(
        &client,
        PollerConfig {
            consume_mode: ConsumeMode::FailFast,
            poll_timeout: Some(Duration::from_millis(20)),
            ..config()
        },
    );

    let err = poller.poll_once().await.unwrap_err();

    assert!(matches!(err, Error::NoUnitAvailable("decision")));
}

// =============================================================================
// Running loop
// =============================================================================

#[tokio::test]
async fn handler_errors_stop_the_poller() -> Result<()> {
    init_test_tracing();
    let client = Arc::new(ScriptedClient::new());
    let mut history = HistoryBuilder::start(order_workflow(), None);
    history.signal("explode", None);
    client.queue_history(&history, "token-1", 100);

    let handle = poller(&client, config()).spawn();
    let err = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, handle.join())
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
async fn remote_failures_do_not_stop_the_poller() -> Result<()> {
    init_test_tracing();
    let client = Arc::new(ScriptedClient::new());
    let history = HistoryBuilder::start(order_workflow(), None);

    client.fail_next_decision_poll(RemoteError::Transient("throttled".into()));
    client.fail_next_submission(RemoteError::UnknownResource("token-1".into()));
    client.queue_history(&history, "token-1", 100);
    client.queue_history(&history, "token-2", 100);

    let handle = poller(&client, config()).spawn();

    let submissions = wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        let submissions = client.submissions();
        Ok((!submissions.is_empty()).then_some(submissions))
    })
    .await?;

    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, "token-2");
    assert!(!handle.is_finished());

    handle.stop();
    handle.join().await?;
    Ok(())
}
