//! Immutable, indexed view over one delivered workflow history.

use std::collections::HashMap;

use nonempty::NonEmpty;

use super::{EventAttributes, EventType, WorkflowEvent};
use crate::error::{Error, Result};

/// Lifecycle state of one scheduled task, derived from history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Never scheduled.
    Initial,
    Scheduled,
    ScheduleFailed,
    Started,
    CancelRequested,
    Completed,
    Failed,
    TimedOut,
    Canceled,
}

impl TaskState {
    /// Returns `true` once the task can no longer produce events.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            TaskState::ScheduleFailed
                | TaskState::Completed
                | TaskState::Failed
                | TaskState::TimedOut
                | TaskState::Canceled
        )
    }
}

/// A workflow history, newest event first.
///
/// Built once per decision task. The service delivers history in reverse
/// pages, so storage order is newest-first; [`new_events`](Self::new_events)
/// hands events to dispatch oldest-first.
///
/// # Invariants
///
/// - never empty
/// - ids run from 1 to [`len`](Self::len) without gaps
/// - ids are unique and strictly descending in storage order
#[derive(Debug, Clone)]
pub struct EventLog {
    events: NonEmpty<WorkflowEvent>,
    index: HashMap<i64, usize>,
    previous_started_event_id: i64,
}

impl EventLog {
    /// Build a log from delivered events in any order.
    ///
    /// `previous_started_event_id` is the id of the last decision task the
    /// workflow already processed (0 if none). Events with repeated ids
    /// (redelivered across pages) are collapsed.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyHistory`] if `events` is empty
    /// - [`Error::IncompleteHistory`] if the ids do not run from 1 without gaps
    pub fn new(mut events: Vec<WorkflowEvent>, previous_started_event_id: i64) -> Result<Self> {
        events.sort_by(|a, b| b.id().cmp(&a.id()));
        events.dedup_by_key(|event| event.id());

        let events = NonEmpty::from_vec(events).ok_or(Error::EmptyHistory)?;

        if let Some(missing_event_id) = (1..)
            .zip(events.iter().rev())
            .find_map(|(expected, event)| (event.id() != expected).then_some(expected))
        {
            return Err(Error::IncompleteHistory { missing_event_id });
        }

        let index = events
            .iter()
            .enumerate()
            .map(|(position, event)| (event.id(), position))
            .collect();

        Ok(Self {
            events,
            index,
            previous_started_event_id,
        })
    }

    /// All events, newest first.
    pub fn events(&self) -> impl Iterator<Item = &WorkflowEvent> {
        self.events.iter()
    }

    /// Number of distinct events; never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Look up an event by id. Unknown ids yield `None`.
    pub fn event_by_id(&self, id: i64) -> Option<&WorkflowEvent> {
        self.index
            .get(&id)
            .and_then(|&position| self.events.get(position))
    }

    pub fn newest(&self) -> &WorkflowEvent {
        self.events.first()
    }

    pub fn oldest(&self) -> &WorkflowEvent {
        self.events.last()
    }

    /// The boundary supplied with the decision task.
    pub fn previous_started_event_id(&self) -> i64 {
        self.previous_started_event_id
    }

    /// Events with id greater than `boundary`, oldest first.
    pub fn events_after(&self, boundary: i64) -> Vec<&WorkflowEvent> {
        let mut events: Vec<_> = self
            .events
            .iter()
            .take_while(|event| event.id() > boundary)
            .collect();
        events.reverse();
        events
    }

    /// Events the workflow has not yet decided on, oldest first.
    pub fn new_events(&self) -> Vec<&WorkflowEvent> {
        self.events_after(self.previous_started_event_id)
    }

    /// The `WorkflowExecutionStarted` event, if present.
    pub fn workflow_started(&self) -> Option<&WorkflowEvent> {
        let oldest = self.oldest();
        (oldest.event_type() == EventType::WorkflowExecutionStarted).then_some(oldest)
    }

    /// All recorded markers, newest first.
    pub fn markers(&self) -> impl Iterator<Item = &WorkflowEvent> {
        self.events
            .iter()
            .filter(|event| event.event_type() == EventType::MarkerRecorded)
    }

    /// The most recently recorded marker named `name`.
    pub fn latest_marker(&self, name: &str) -> Option<&WorkflowEvent> {
        self.markers().find(|event| {
            matches!(
                event.attributes(),
                EventAttributes::MarkerRecorded { marker_name, .. } if marker_name == name
            )
        })
    }

    /// The details of the most recent marker named `name`.
    pub fn latest_marker_details(&self, name: &str) -> Option<&str> {
        match self.latest_marker(name)?.attributes() {
            EventAttributes::MarkerRecorded { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    /// All received signals, newest first.
    pub fn signals(&self) -> impl Iterator<Item = &WorkflowEvent> {
        self.events
            .iter()
            .filter(|event| event.event_type() == EventType::WorkflowExecutionSignaled)
    }

    /// The latest `TaskScheduled` event for the task instance `task_id`.
    pub fn scheduled_event_for(&self, task_id: &str) -> Option<&WorkflowEvent> {
        self.events.iter().find(|event| {
            matches!(
                event.attributes(),
                EventAttributes::TaskScheduled { task_id: id, .. } if id == task_id
            )
        })
    }

    /// The current state of the task instance `task_id`.
    ///
    /// Walks history newest-first and returns the state implied by the most
    /// recent event that concerns the task.
    pub fn task_state(&self, task_id: &str) -> TaskState {
        let scheduled_id = self.scheduled_event_for(task_id).map(WorkflowEvent::id);

        for event in self.events.iter() {
            let state = match event.attributes() {
                EventAttributes::ScheduleTaskFailed { task_id: id, .. } if id == task_id => {
                    Some(TaskState::ScheduleFailed)
                }
                EventAttributes::TaskCancelRequested { task_id: id } if id == task_id => {
                    Some(TaskState::CancelRequested)
                }
                EventAttributes::TaskScheduled { task_id: id, .. } if id == task_id => {
                    Some(TaskState::Scheduled)
                }
                EventAttributes::TaskStarted {
                    scheduled_event_id, ..
                } if Some(*scheduled_event_id) == scheduled_id => Some(TaskState::Started),
                EventAttributes::TaskCompleted {
                    scheduled_event_id, ..
                } if Some(*scheduled_event_id) == scheduled_id => Some(TaskState::Completed),
                EventAttributes::TaskFailed {
                    scheduled_event_id, ..
                } if Some(*scheduled_event_id) == scheduled_id => Some(TaskState::Failed),
                EventAttributes::TaskTimedOut {
                    scheduled_event_id, ..
                } if Some(*scheduled_event_id) == scheduled_id => Some(TaskState::TimedOut),
                EventAttributes::TaskCanceled {
                    scheduled_event_id, ..
                } if Some(*scheduled_event_id) == scheduled_id => Some(TaskState::Canceled),
                _ => None,
            };
            if let Some(state) = state {
                return state;
            }
        }

        TaskState::Initial
    }
}
