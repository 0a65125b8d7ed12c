//! Automatic retry of failed and timed-out tasks.
//!
//! Retry state lives entirely in history, so it survives worker restarts:
//!
//! - On `TaskFailed`/`TaskTimedOut`, the policy for the task type is asked
//!   for the delay before the next attempt. If there is one, a retry timer is
//!   started whose control payload is a [`RetryControl`].
//! - On the retry timer's `TimerFired`, the original `TaskScheduled` event is
//!   looked up through the control, re-issued verbatim, and the retry counter
//!   marker is bumped in the same batch.
//!
//! - [`RetryPolicy`] — backoff configuration
//! - [`RetryPolicies`] — default policy plus per-task-type overrides

mod control;
mod policy;

use std::collections::HashMap;

use tracing::{debug, info, warn};

pub use control::{
    RETRY_MARKER_PREFIX, RETRY_TIMER_PREFIX, RetryControl, is_retry_timer, retry_marker_name,
    retry_timer_id,
};
pub use policy::RetryPolicy;

use crate::codec::ControlPayload;
use crate::decision::{Decision, DecisionBuilder};
use crate::error::{Error, Result};
use crate::event::{EventAttributes, EventContext, EventLog, EventType, TaskType};
use crate::options::millis;

/// Retry policies keyed by task type.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicies {
    default: RetryPolicy,
    per_type: HashMap<TaskType, RetryPolicy>,
}

impl RetryPolicies {
    pub fn new(default: RetryPolicy) -> Self {
        Self {
            default,
            per_type: HashMap::new(),
        }
    }

    pub fn set(&mut self, task_type: TaskType, policy: RetryPolicy) {
        self.per_type.insert(task_type, policy);
    }

    pub fn set_default(&mut self, policy: RetryPolicy) {
        self.default = policy;
    }

    /// The policy in effect for `task_type`.
    pub fn policy_for(&self, task_type: &TaskType) -> RetryPolicy {
        self.per_type
            .get(task_type)
            .copied()
            .unwrap_or(self.default)
    }
}

/// What the retry engine did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryOutcome {
    /// Not a retry concern.
    Forward,
    /// Retry decisions were emitted; the event is consumed.
    Handled,
    /// The policy gave up on the task.
    Exhausted,
}

/// Run the retry engine over one event.
pub(crate) fn intercept(
    policies: &RetryPolicies,
    ctx: &EventContext<'_>,
    decisions: &mut DecisionBuilder,
) -> Result<RetryOutcome> {
    match ctx.event_type() {
        EventType::TaskFailed | EventType::TaskTimedOut => on_task_failure(policies, ctx, decisions),
        EventType::TimerFired => on_timer_fired(ctx, decisions),
        _ => Ok(RetryOutcome::Forward),
    }
}

fn on_task_failure(
    policies: &RetryPolicies,
    ctx: &EventContext<'_>,
    decisions: &mut DecisionBuilder,
) -> Result<RetryOutcome> {
    let Some(task) = ctx.task() else {
        return Ok(RetryOutcome::Forward);
    };
    let policy = policies.policy_for(task.task_type);
    if !policy.should_retry() {
        return Ok(RetryOutcome::Forward);
    }
    let Some(scheduled_event_id) = task.scheduled_event_id else {
        return Ok(RetryOutcome::Forward);
    };

    let marker_name = retry_marker_name(task.task_type, task.task_id);
    let retries = retry_count(ctx.log(), &marker_name)?;
    let attempt = retries.saturating_add(1);

    let Some(delay) = policy.next_delay(attempt) else {
        warn!(
            workflow = %ctx.workflow().execution,
            task_type = %task.task_type,
            task_id = task.task_id,
            retries,
            "Retry policy exhausted"
        );
        return Ok(RetryOutcome::Exhausted);
    };

    let control = RetryControl {
        scheduled_event_id,
        marker_name,
    };
    decisions.start_timer(
        retry_timer_id(task.task_type, task.task_id),
        delay,
        Some(control.encode()?),
    );

    info!(
        workflow = %ctx.workflow().execution,
        task_type = %task.task_type,
        task_id = task.task_id,
        attempt,
        delay_ms = millis(delay),
        "Retry scheduled"
    );
    Ok(RetryOutcome::Handled)
}

fn on_timer_fired(ctx: &EventContext<'_>, decisions: &mut DecisionBuilder) -> Result<RetryOutcome> {
    if !is_retry_timer(ctx.timer_id()?) {
        return Ok(RetryOutcome::Forward);
    }
    let Some(payload) = ctx.control()? else {
        warn!(
            event_id = ctx.event_id(),
            timer_id = ctx.timer_id()?,
            "Retry timer fired without control payload"
        );
        return Ok(RetryOutcome::Forward);
    };
    let control = RetryControl::decode(payload)?;

    let missing = || {
        Error::missing_reference(
            ctx.event_id(),
            control.scheduled_event_id,
            EventType::TaskScheduled,
        )
    };
    let scheduled = ctx
        .log()
        .event_by_id(control.scheduled_event_id)
        .ok_or_else(missing)?;
    let EventAttributes::TaskScheduled {
        task_id,
        task_type,
        input,
        control: task_control,
        options,
    } = scheduled.attributes()
    else {
        return Err(missing());
    };

    decisions.push(Decision::ScheduleTask {
        task_id: task_id.clone(),
        task_type: task_type.clone(),
        input: input.clone(),
        control: task_control.clone(),
        options: options.clone(),
    });

    let retries = retry_count(ctx.log(), &control.marker_name)?.saturating_add(1);
    decisions.record_marker(
        control.marker_name.as_str(),
        Some(serde_json::to_string(&retries)?),
    );

    debug!(
        workflow = %ctx.workflow().execution,
        task_type = %task_type,
        task_id = %task_id,
        retries,
        "Task rescheduled"
    );
    Ok(RetryOutcome::Handled)
}

/// Retries recorded so far in the counter marker `marker_name`.
fn retry_count(log: &EventLog, marker_name: &str) -> Result<u32> {
    match log.latest_marker_details(marker_name) {
        Some(details) => Ok(serde_json::from_str(details)?),
        None => Ok(0),
    }
}
