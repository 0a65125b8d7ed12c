//! Decision cycles over simulated histories, end to end.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use replayflow::retry::{retry_marker_name, retry_timer_id};
use replayflow::{
    CLOSE_CONTROL_MARKER, CloseWorkflowControl, ContextName, ControlPayload, Decision,
    DecisionBatch, Dispatcher, Error, EventAttributes, EventType, HandlerRegistry,
    HandlerRegistryBuilder, RetryPolicy,
};
use test_utils::HistoryBuilder;

use crate::support::{Recorder, charge_task, init_test_tracing, order_workflow};

fn dispatcher(builder: HandlerRegistryBuilder) -> Result<Dispatcher> {
    Ok(Dispatcher::new(Arc::new(builder.build()?)))
}

/// Run one decision cycle and let the "service" record its decisions.
fn cycle(dispatcher: &Dispatcher, history: &mut HistoryBuilder) -> Result<DecisionBatch> {
    let batch = dispatcher.dispatch(&history.log(), history.workflow())?;
    history.apply(&batch);
    Ok(batch)
}

/// Handlers that schedule `charge` on start and complete with its result.
fn charge_workflow(seen: &Recorder) -> HandlerRegistryBuilder {
    let completed = seen.clone();
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
            move |ctx, decisions| {
                completed.record(ctx)?;
                decisions.complete_workflow(ctx.output()?.map(String::from))?;
                Ok(())
            },
        )
}

fn only_scheduled_task(batch: &DecisionBatch) -> String {
    match batch.as_slice() {
        [Decision::ScheduleTask { task_id, .. }] => task_id.clone(),
        other => panic!("expected a single schedule, got {other:?}"),
    }
}

// =============================================================================
// Workflow start
// =============================================================================

#[test]
fn started_handler_sees_workflow_input() -> Result<()> {
    init_test_tracing();
    let seen = Recorder::default();
    let dispatcher = dispatcher(HandlerRegistry::builder().on(
        EventType::WorkflowExecutionStarted,
        ContextName::Workflow(order_workflow()),
        seen.handler(),
    ))?;

    let mut history = HistoryBuilder::start(order_workflow(), Some("my-input"));
    let batch = cycle(&dispatcher, &mut history)?;

    assert!(batch.is_empty());
    assert_eq!(seen.count(EventType::WorkflowExecutionStarted), 1);
    assert_eq!(seen.seen()[0].input.as_deref(), Some("my-input"));

    // Replaying the same history in a later cycle does not dispatch it again
    history.signal("ping", None);
    history.decision_started();
    cycle(&dispatcher, &mut history)?;

    assert_eq!(seen.count(EventType::WorkflowExecutionStarted), 1);
    Ok(())
}

#[test]
fn unregistered_workflow_types_are_skipped() -> Result<()> {
    let seen = Recorder::default();
    let dispatcher = dispatcher(HandlerRegistry::builder().on(
        EventType::WorkflowExecutionStarted,
        ContextName::workflow("invoice", "1"),
        seen.handler(),
    ))?;

    let mut history = HistoryBuilder::start(order_workflow(), None);
    let batch = cycle(&dispatcher, &mut history)?;

    assert!(batch.is_empty());
    assert!(seen.seen().is_empty());
    Ok(())
}

// =============================================================================
// Tasks
// =============================================================================

#[test]
fn completed_task_is_dispatched_once_with_its_output() -> Result<()> {
    init_test_tracing();
    let seen = Recorder::default();
    let dispatcher = dispatcher(charge_workflow(&seen))?;

    let mut history = HistoryBuilder::start(order_workflow(), Some("42"));
    let task_id = only_scheduled_task(&cycle(&dispatcher, &mut history)?);
    assert!(task_id.starts_with("charge-"));

    history.task_started(&task_id);
    history.task_completed(&task_id, Some("ok"));
    history.decision_started();
    let batch = cycle(&dispatcher, &mut history)?;

    let completed = seen.seen();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].event_type, EventType::TaskCompleted);
    assert_eq!(completed[0].output.as_deref(), Some("ok"));
    assert_eq!(completed[0].input.as_deref(), Some("42"));
    assert_eq!(completed[0].task_type, Some(charge_task()));

    assert_eq!(
        batch.as_slice().last(),
        Some(&Decision::CompleteWorkflow {
            result: Some("ok".into())
        })
    );
    Ok(())
}

#[test]
fn failed_task_is_retried_until_it_succeeds() -> Result<()> {
    init_test_tracing();
    let seen = Recorder::default();
    let dispatcher = dispatcher(
        charge_workflow(&seen)
            .retry_policy(charge_task(), RetryPolicy::constant_delay(Duration::from_secs(5), 2)),
    )?;
    let mut history = HistoryBuilder::start(order_workflow(), None);
    let task_id = only_scheduled_task(&cycle(&dispatcher, &mut history)?);
    let timer_id = retry_timer_id(&charge_task(), &task_id);
    let marker_name = retry_marker_name(&charge_task(), &task_id);

    let mut timers_fired = 0;
    for retry in 1..=2u32 {
        history.task_started(&task_id);
        history.task_failed(&task_id, "card declined", None);
        history.decision_started();
        let batch = cycle(&dispatcher, &mut history)?;

        let [Decision::StartTimer {
            timer_id: started,
            start_to_fire,
            control: Some(_),
        }] = batch.as_slice()
        else {
            panic!("expected a retry timer, got {batch:?}");
        };
        assert_eq!(started, &timer_id);
        assert_eq!(*start_to_fire, Duration::from_secs(5));

        history.timer_fired(&timer_id);
        timers_fired += 1;
        history.decision_started();
        let batch = cycle(&dispatcher, &mut history)?;

        let [
            Decision::ScheduleTask {
                task_id: rescheduled,
                task_type,
                ..
            },
            Decision::RecordMarker {
                marker_name: marker,
                details,
            },
        ] = batch.as_slice()
        else {
            panic!("expected a reschedule and a retry marker, got {batch:?}");
        };
        assert_eq!(rescheduled, &task_id);
        assert_eq!(task_type, &charge_task());
        assert_eq!(marker, &marker_name);
        assert_eq!(details.as_deref(), Some(retry.to_string().as_str()));
    }

    assert_eq!(timers_fired, 2);
    assert_eq!(history.log().latest_marker_details(&marker_name), Some("2"));

    history.task_started(&task_id);
    history.task_completed(&task_id, Some("ok"));
    history.decision_started();
    let batch = cycle(&dispatcher, &mut history)?;

    assert_eq!(seen.count(EventType::TaskCompleted), 1);
    assert!(batch.iter().any(Decision::is_terminal));
    Ok(())
}

#[test]
fn exhausted_retries_fail_the_workflow() -> Result<()> {
    init_test_tracing();
    let seen = Recorder::default();
    let dispatcher = dispatcher(
        charge_workflow(&seen)
            .retry_policy(charge_task(), RetryPolicy::constant_delay(Duration::from_secs(1), 1)),
    )?;
    let mut history = HistoryBuilder::start(order_workflow(), None);
    let task_id = only_scheduled_task(&cycle(&dispatcher, &mut history)?);
    let timer_id = retry_timer_id(&charge_task(), &task_id);

    history.task_failed(&task_id, "card declined", None);
    history.decision_started();
    cycle(&dispatcher, &mut history)?;
    history.timer_fired(&timer_id);
    history.decision_started();
    cycle(&dispatcher, &mut history)?;

    history.task_failed(&task_id, "card declined", Some("issuer said no"));
    history.decision_started();
    let batch = cycle(&dispatcher, &mut history)?;

    assert_eq!(
        batch.as_slice().last(),
        Some(&Decision::FailWorkflow {
            reason: Some("charge:1: card declined".into()),
            details: Some("issuer said no".into()),
        })
    );
    Ok(())
}

#[test]
fn same_type_tasks_failing_together_retry_independently() -> Result<()> {
    init_test_tracing();
    let dispatcher = dispatcher(
        HandlerRegistry::builder()
            .on(
                EventType::WorkflowExecutionStarted,
                ContextName::Workflow(order_workflow()),
                |_ctx, decisions| {
                    decisions.schedule_task(charge_task(), Some("10".into()));
                    decisions.schedule_task(charge_task(), Some("20".into()));
                    Ok(())
                },
            )
            .retry_policy(charge_task(), RetryPolicy::constant_delay(Duration::from_secs(5), 1)),
    )?;

    let mut history = HistoryBuilder::start(order_workflow(), None);
    cycle(&dispatcher, &mut history)?;
    let mut task_ids: Vec<String> = history
        .scheduled_tasks()
        .into_iter()
        .map(|(task_id, _)| task_id)
        .collect();
    task_ids.sort();
    assert_eq!(task_ids.len(), 2);

    for task_id in &task_ids {
        history.task_failed(task_id, "card declined", None);
    }
    history.decision_started();
    let batch = cycle(&dispatcher, &mut history)?;

    let mut timers: Vec<String> = batch
        .iter()
        .filter_map(|decision| match decision {
            Decision::StartTimer { timer_id, .. } => Some(timer_id.clone()),
            _ => None,
        })
        .collect();
    timers.sort();
    let mut expected: Vec<String> = task_ids
        .iter()
        .map(|task_id| retry_timer_id(&charge_task(), task_id))
        .collect();
    expected.sort();
    assert_eq!(timers, expected);

    for timer_id in &expected {
        history.timer_fired(timer_id);
    }
    history.decision_started();
    let batch = cycle(&dispatcher, &mut history)?;

    let mut rescheduled: Vec<String> = batch
        .iter()
        .filter_map(|decision| match decision {
            Decision::ScheduleTask { task_id, .. } => Some(task_id.clone()),
            _ => None,
        })
        .collect();
    rescheduled.sort();
    assert_eq!(rescheduled, task_ids);

    let log = history.log();
    for task_id in &task_ids {
        let marker_name = retry_marker_name(&charge_task(), task_id);
        assert_eq!(log.latest_marker_details(&marker_name), Some("1"));
    }
    Ok(())
}

#[test]
fn exhausted_retries_reach_a_registered_failure_handler() -> Result<()> {
    let seen = Recorder::default();
    let dispatcher = dispatcher(
        HandlerRegistry::builder()
            .on(
                EventType::WorkflowExecutionStarted,
                ContextName::Workflow(order_workflow()),
                |_ctx, decisions| {
                    decisions.schedule_task(charge_task(), None);
                    Ok(())
                },
            )
            .on(EventType::TaskFailed, ContextName::Task(charge_task()), seen.handler()),
    )?;

    let mut history = HistoryBuilder::start(order_workflow(), None);
    let task_id = only_scheduled_task(&cycle(&dispatcher, &mut history)?);

    history.task_failed(&task_id, "card declined", None);
    history.decision_started();
    let batch = cycle(&dispatcher, &mut history)?;

    // No retry policy: the failure goes straight to the handler
    assert!(batch.is_empty());
    assert_eq!(seen.count(EventType::TaskFailed), 1);
    Ok(())
}

#[test]
fn timed_out_tasks_are_retried() -> Result<()> {
    let seen = Recorder::default();
    let dispatcher = dispatcher(
        charge_workflow(&seen)
            .retry_policy(charge_task(), RetryPolicy::constant_delay(Duration::from_secs(3), 1)),
    )?;

    let mut history = HistoryBuilder::start(order_workflow(), None);
    let task_id = only_scheduled_task(&cycle(&dispatcher, &mut history)?);

    history.task_timed_out(&task_id, "START_TO_CLOSE");
    history.decision_started();
    let batch = cycle(&dispatcher, &mut history)?;

    assert!(matches!(
        batch.as_slice(),
        [Decision::StartTimer { start_to_fire, .. }] if *start_to_fire == Duration::from_secs(3)
    ));
    Ok(())
}

// =============================================================================
// Timers
// =============================================================================

#[test]
fn fired_timer_carries_its_id_and_control() -> Result<()> {
    let seen = Recorder::default();
    let dispatcher = dispatcher(
        HandlerRegistry::builder()
            .on(
                EventType::WorkflowExecutionStarted,
                ContextName::Workflow(order_workflow()),
                |_ctx, decisions| {
                    decisions.start_timer("t1", Duration::from_secs(5), Some("x".into()));
                    Ok(())
                },
            )
            .on(EventType::TimerFired, ContextName::timer("t1"), seen.handler()),
    )?;

    let mut history = HistoryBuilder::start(order_workflow(), None);
    let batch = cycle(&dispatcher, &mut history)?;
    assert_eq!(
        batch.as_slice(),
        [Decision::StartTimer {
            timer_id: "t1".into(),
            start_to_fire: Duration::from_secs(5),
            control: Some("x".into()),
        }]
    );

    history.timer_fired("t1");
    history.decision_started();
    cycle(&dispatcher, &mut history)?;

    let fired = seen.seen();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].timer_id.as_deref(), Some("t1"));
    assert_eq!(fired[0].control.as_deref(), Some("x"));
    Ok(())
}

#[test]
fn canceled_timer_can_force_a_decision() -> Result<()> {
    let dispatcher = dispatcher(HandlerRegistry::builder().on(
        EventType::WorkflowExecutionSignaled,
        ContextName::signal("abort"),
        |_ctx, decisions| {
            decisions.cancel_timer("t1", true);
            Ok(())
        },
    ))?;

    let mut history = HistoryBuilder::start(order_workflow(), None);
    history.apply(&DecisionBatch::default());
    history.timer_started("t1", Duration::from_secs(60));
    history.signal("abort", None);
    history.decision_started();
    let batch = cycle(&dispatcher, &mut history)?;

    let [
        Decision::CancelTimer { timer_id },
        Decision::StartTimer {
            timer_id: forced,
            start_to_fire,
            ..
        },
    ] = batch.as_slice()
    else {
        panic!("expected cancel plus forcing timer, got {batch:?}");
    };
    assert_eq!(timer_id, "t1");
    assert!(forced.starts_with(replayflow::decision::FORCE_DECISION_TIMER_PREFIX));
    assert_eq!(*start_to_fire, Duration::ZERO);
    Ok(())
}

// =============================================================================
// Close recovery
// =============================================================================

#[test]
fn rejected_close_is_reissued_from_its_marker() -> Result<()> {
    init_test_tracing();
    let seen = Recorder::default();
    let dispatcher = dispatcher(
        HandlerRegistry::builder()
            .on(
                EventType::WorkflowExecutionStarted,
                ContextName::Workflow(order_workflow()),
                |_ctx, decisions| {
                    decisions.complete_workflow(Some("done".into()))?;
                    Ok(())
                },
            )
            .on(
                EventType::CompleteWorkflowExecutionFailed,
                ContextName::Workflow(order_workflow()),
                seen.handler(),
            ),
    )?;

    let mut history = HistoryBuilder::start(order_workflow(), None);
    let first = dispatcher.dispatch(&history.log(), history.workflow())?;
    history.apply_rejecting_close(&first, "UNHANDLED_DECISION");
    history.signal("late", None);
    history.decision_started();

    let retried = cycle(&dispatcher, &mut history)?;

    assert_eq!(retried, first);
    assert_eq!(
        retried.as_slice()[1],
        Decision::CompleteWorkflow {
            result: Some("done".into())
        }
    );
    // Recovery consumes the failure before any handler sees it
    assert!(seen.seen().is_empty());
    Ok(())
}

#[test]
fn rejected_close_without_marker_is_reissued_empty() -> Result<()> {
    let dispatcher = dispatcher(HandlerRegistry::builder())?;

    let mut history = HistoryBuilder::start(order_workflow(), None);
    history.apply(&DecisionBatch::default());
    history.push(EventAttributes::FailWorkflowExecutionFailed {
        cause: "UNHANDLED_DECISION".into(),
    });
    history.decision_started();
    let batch = cycle(&dispatcher, &mut history)?;

    let empty = CloseWorkflowControl::Fail {
        reason: None,
        details: None,
    };
    assert_eq!(
        batch.as_slice(),
        [
            Decision::RecordMarker {
                marker_name: CLOSE_CONTROL_MARKER.into(),
                details: Some(empty.encode()?),
            },
            Decision::FailWorkflow {
                reason: None,
                details: None,
            },
        ]
    );
    Ok(())
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn handler_errors_abort_the_cycle() -> Result<()> {
    let dispatcher = dispatcher(HandlerRegistry::builder().on(
        EventType::WorkflowExecutionStarted,
        ContextName::Workflow(order_workflow()),
        |_ctx, decisions| {
            decisions.schedule_task(charge_task(), None);
            Err("inventory service unreachable".into())
        },
    ))?;

    let history = HistoryBuilder::start(order_workflow(), None);
    let err = dispatcher
        .dispatch(&history.log(), history.workflow())
        .unwrap_err();

    let Error::Handler {
        event_id,
        event_type,
        source,
    } = err
    else {
        panic!("expected handler error, got {err:?}");
    };
    assert_eq!(event_id, 1);
    assert_eq!(event_type, EventType::WorkflowExecutionStarted);
    assert_eq!(source.to_string(), "inventory service unreachable");
    Ok(())
}

#[test]
fn child_workflow_events_are_unsupported() -> Result<()> {
    let dispatcher = dispatcher(HandlerRegistry::builder())?;

    let mut history = HistoryBuilder::start(order_workflow(), None);
    history.apply(&DecisionBatch::default());
    history.push(EventAttributes::Other {
        event_type: EventType::StartChildWorkflowExecutionInitiated,
        payload: serde_json::Value::Null,
    });
    history.decision_started();

    let err = dispatcher
        .dispatch(&history.log(), history.workflow())
        .unwrap_err();

    assert!(matches!(err, Error::UnsupportedCategory { .. }));
    Ok(())
}
