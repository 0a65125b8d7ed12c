use serde::{Deserialize, Serialize};

use crate::codec::ControlPayload;
use crate::event::TaskType;

/// Prefix of the timers that drive task retries.
pub const RETRY_TIMER_PREFIX: &str = "--retry-timer-";

/// Prefix of the markers that count task retries.
pub const RETRY_MARKER_PREFIX: &str = "--retry-count-";

/// Control payload of a retry timer.
///
/// Carries what the timer-fired handler needs to re-issue the original
/// schedule: the `TaskScheduled` event to copy, and the marker counting
/// retries so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryControl {
    pub scheduled_event_id: i64,
    pub marker_name: String,
}

impl ControlPayload for RetryControl {}

/// Timer id of the retry timer for task instance `task_id` of `task_type`.
///
/// Instances of one type retry independently, even within one batch.
pub fn retry_timer_id(task_type: &TaskType, task_id: &str) -> String {
    format!("{RETRY_TIMER_PREFIX}{}:{task_id}", task_type.name)
}

/// Marker name of the retry counter for task instance `task_id` of `task_type`.
pub fn retry_marker_name(task_type: &TaskType, task_id: &str) -> String {
    format!("{RETRY_MARKER_PREFIX}{}:{task_id}", task_type.name)
}

/// Returns `true` if `timer_id` names a retry timer.
pub fn is_retry_timer(timer_id: &str) -> bool {
    timer_id.starts_with(RETRY_TIMER_PREFIX)
}
