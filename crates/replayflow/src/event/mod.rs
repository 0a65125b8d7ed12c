//! History events and the identities they refer to.
//!
//! A workflow's history is an append-only list of [`WorkflowEvent`]s owned by
//! the remote service. Each event has a 1-based id, a type, a category derived
//! once from the type, and attributes specific to that type.
//!
//! - [`EventLog`] — immutable, indexed view over one delivered history
//! - [`EventContext`] — one event prepared for dispatch to a handler
//! - [`ContextName`] — the dispatch key extracted from an event

mod context;
mod log;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

pub use context::{
    ContextName, EventContext, EventDetails, Facet, MarkerDetails, SignalDetails, TaskDetails,
    TimerDetails, WorkflowDetails,
};
pub use log::{EventLog, TaskState};

use crate::options::{TaskOptions, WorkflowOptions};

/// A registered task type.
///
/// # Example
///
/// ```
/// use replayflow::TaskType;
///
/// let task_type = TaskType::new("resize-image", "1.0");
/// assert_eq!(task_type.to_string(), "resize-image:1.0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskType {
    pub name: String,
    pub version: String,
}

impl TaskType {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// A registered workflow type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowType {
    pub name: String,
    pub version: String,
}

impl WorkflowType {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Identifies one run of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Caller-chosen workflow id.
    pub workflow_id: String,
    /// Service-assigned id of this run.
    pub run_id: String,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for WorkflowExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.run_id)
    }
}

/// Identity metadata for the decision task being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowInfo {
    /// Domain the workflow runs in.
    pub domain: String,
    /// The workflow run.
    pub execution: WorkflowExecution,
    /// The workflow's registered type.
    pub workflow_type: WorkflowType,
    /// Id of the `DecisionTaskStarted` event of the batch being decided.
    pub decision_started_event_id: i64,
}

/// Coarse classification of history events; the first dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    WorkflowExecution,
    DecisionTask,
    Task,
    Timer,
    Marker,
    Signal,
    ChildWorkflow,
    ExternalWorkflow,
    Lambda,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Every history event type the service emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // workflow execution
    WorkflowExecutionStarted,
    WorkflowExecutionCompleted,
    CompleteWorkflowExecutionFailed,
    WorkflowExecutionFailed,
    FailWorkflowExecutionFailed,
    WorkflowExecutionTimedOut,
    WorkflowExecutionCanceled,
    CancelWorkflowExecutionFailed,
    WorkflowExecutionCancelRequested,
    WorkflowExecutionTerminated,
    // decision task
    DecisionTaskScheduled,
    DecisionTaskStarted,
    DecisionTaskCompleted,
    DecisionTaskTimedOut,
    // task
    TaskScheduled,
    ScheduleTaskFailed,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskTimedOut,
    TaskCanceled,
    TaskCancelRequested,
    RequestCancelTaskFailed,
    // timer
    TimerStarted,
    StartTimerFailed,
    TimerFired,
    TimerCanceled,
    CancelTimerFailed,
    // marker
    MarkerRecorded,
    RecordMarkerFailed,
    // signal
    WorkflowExecutionSignaled,
    // child workflow
    StartChildWorkflowExecutionInitiated,
    StartChildWorkflowExecutionFailed,
    ChildWorkflowExecutionStarted,
    ChildWorkflowExecutionCompleted,
    ChildWorkflowExecutionFailed,
    ChildWorkflowExecutionTimedOut,
    ChildWorkflowExecutionCanceled,
    ChildWorkflowExecutionTerminated,
    // external workflow
    SignalExternalWorkflowExecutionInitiated,
    SignalExternalWorkflowExecutionFailed,
    ExternalWorkflowExecutionSignaled,
    RequestCancelExternalWorkflowExecutionInitiated,
    RequestCancelExternalWorkflowExecutionFailed,
    ExternalWorkflowExecutionCancelRequested,
    // lambda
    LambdaFunctionScheduled,
    ScheduleLambdaFunctionFailed,
    LambdaFunctionStarted,
    StartLambdaFunctionFailed,
    LambdaFunctionCompleted,
    LambdaFunctionFailed,
    LambdaFunctionTimedOut,
}

impl EventType {
    /// The category this event type belongs to.
    pub fn category(self) -> EventCategory {
        use EventType::*;
        match self {
            WorkflowExecutionStarted
            | WorkflowExecutionCompleted
            | CompleteWorkflowExecutionFailed
            | WorkflowExecutionFailed
            | FailWorkflowExecutionFailed
            | WorkflowExecutionTimedOut
            | WorkflowExecutionCanceled
            | CancelWorkflowExecutionFailed
            | WorkflowExecutionCancelRequested
            | WorkflowExecutionTerminated => EventCategory::WorkflowExecution,
            DecisionTaskScheduled
            | DecisionTaskStarted
            | DecisionTaskCompleted
            | DecisionTaskTimedOut => EventCategory::DecisionTask,
            TaskScheduled
            | ScheduleTaskFailed
            | TaskStarted
            | TaskCompleted
            | TaskFailed
            | TaskTimedOut
            | TaskCanceled
            | TaskCancelRequested
            | RequestCancelTaskFailed => EventCategory::Task,
            TimerStarted | StartTimerFailed | TimerFired | TimerCanceled | CancelTimerFailed => {
                EventCategory::Timer
            }
            MarkerRecorded | RecordMarkerFailed => EventCategory::Marker,
            WorkflowExecutionSignaled => EventCategory::Signal,
            StartChildWorkflowExecutionInitiated
            | StartChildWorkflowExecutionFailed
            | ChildWorkflowExecutionStarted
            | ChildWorkflowExecutionCompleted
            | ChildWorkflowExecutionFailed
            | ChildWorkflowExecutionTimedOut
            | ChildWorkflowExecutionCanceled
            | ChildWorkflowExecutionTerminated => EventCategory::ChildWorkflow,
            SignalExternalWorkflowExecutionInitiated
            | SignalExternalWorkflowExecutionFailed
            | ExternalWorkflowExecutionSignaled
            | RequestCancelExternalWorkflowExecutionInitiated
            | RequestCancelExternalWorkflowExecutionFailed
            | ExternalWorkflowExecutionCancelRequested => EventCategory::ExternalWorkflow,
            LambdaFunctionScheduled
            | ScheduleLambdaFunctionFailed
            | LambdaFunctionStarted
            | StartLambdaFunctionFailed
            | LambdaFunctionCompleted
            | LambdaFunctionFailed
            | LambdaFunctionTimedOut => EventCategory::Lambda,
        }
    }

    /// Returns `true` for the events reporting that a close decision failed.
    pub fn is_close_failure(self) -> bool {
        matches!(
            self,
            EventType::CompleteWorkflowExecutionFailed
                | EventType::FailWorkflowExecutionFailed
                | EventType::CancelWorkflowExecutionFailed
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Type-specific attributes of a history event.
///
/// The variant determines the event's [`EventType`]. Events of categories the
/// framework does not interpret arrive as [`EventAttributes::Other`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventAttributes {
    WorkflowExecutionStarted {
        workflow_type: WorkflowType,
        input: Option<String>,
        #[serde(default)]
        options: WorkflowOptions,
        #[serde(default)]
        tags: Vec<String>,
    },
    WorkflowExecutionCompleted {
        result: Option<String>,
    },
    CompleteWorkflowExecutionFailed {
        cause: String,
    },
    WorkflowExecutionFailed {
        reason: Option<String>,
        details: Option<String>,
    },
    FailWorkflowExecutionFailed {
        cause: String,
    },
    WorkflowExecutionTimedOut {
        timeout_type: String,
    },
    WorkflowExecutionCanceled {
        details: Option<String>,
    },
    CancelWorkflowExecutionFailed {
        cause: String,
    },
    WorkflowExecutionCancelRequested {
        cause: Option<String>,
    },
    WorkflowExecutionTerminated {
        reason: Option<String>,
        details: Option<String>,
    },
    DecisionTaskScheduled {
        task_list: String,
    },
    DecisionTaskStarted {
        scheduled_event_id: i64,
        identity: Option<String>,
    },
    DecisionTaskCompleted {
        scheduled_event_id: i64,
        started_event_id: i64,
    },
    DecisionTaskTimedOut {
        scheduled_event_id: i64,
        started_event_id: i64,
        timeout_type: String,
    },
    TaskScheduled {
        task_id: String,
        task_type: TaskType,
        input: Option<String>,
        control: Option<String>,
        #[serde(default)]
        options: TaskOptions,
    },
    ScheduleTaskFailed {
        task_id: String,
        task_type: TaskType,
        cause: String,
    },
    TaskStarted {
        scheduled_event_id: i64,
        identity: Option<String>,
    },
    TaskCompleted {
        scheduled_event_id: i64,
        result: Option<String>,
    },
    TaskFailed {
        scheduled_event_id: i64,
        reason: Option<String>,
        details: Option<String>,
    },
    TaskTimedOut {
        scheduled_event_id: i64,
        timeout_type: String,
        details: Option<String>,
    },
    TaskCanceled {
        scheduled_event_id: i64,
        details: Option<String>,
    },
    TaskCancelRequested {
        task_id: String,
    },
    RequestCancelTaskFailed {
        task_id: String,
        cause: String,
    },
    TimerStarted {
        timer_id: String,
        start_to_fire: Duration,
        control: Option<String>,
    },
    StartTimerFailed {
        timer_id: String,
        cause: String,
    },
    TimerFired {
        timer_id: String,
        started_event_id: i64,
    },
    TimerCanceled {
        timer_id: String,
        started_event_id: i64,
    },
    CancelTimerFailed {
        timer_id: String,
        cause: String,
    },
    MarkerRecorded {
        marker_name: String,
        details: Option<String>,
    },
    RecordMarkerFailed {
        marker_name: String,
        cause: String,
    },
    WorkflowExecutionSignaled {
        signal_name: String,
        input: Option<String>,
    },
    /// An event the framework carries but does not interpret.
    Other {
        event_type: EventType,
        #[serde(default)]
        payload: Value,
    },
}

impl EventAttributes {
    /// The event type these attributes describe.
    pub fn event_type(&self) -> EventType {
        use EventAttributes as A;
        match self {
            A::WorkflowExecutionStarted { .. } => EventType::WorkflowExecutionStarted,
            A::WorkflowExecutionCompleted { .. } => EventType::WorkflowExecutionCompleted,
            A::CompleteWorkflowExecutionFailed { .. } => EventType::CompleteWorkflowExecutionFailed,
            A::WorkflowExecutionFailed { .. } => EventType::WorkflowExecutionFailed,
            A::FailWorkflowExecutionFailed { .. } => EventType::FailWorkflowExecutionFailed,
            A::WorkflowExecutionTimedOut { .. } => EventType::WorkflowExecutionTimedOut,
            A::WorkflowExecutionCanceled { .. } => EventType::WorkflowExecutionCanceled,
            A::CancelWorkflowExecutionFailed { .. } => EventType::CancelWorkflowExecutionFailed,
            A::WorkflowExecutionCancelRequested { .. } => {
                EventType::WorkflowExecutionCancelRequested
            }
            A::WorkflowExecutionTerminated { .. } => EventType::WorkflowExecutionTerminated,
            A::DecisionTaskScheduled { .. } => EventType::DecisionTaskScheduled,
            A::DecisionTaskStarted { .. } => EventType::DecisionTaskStarted,
            A::DecisionTaskCompleted { .. } => EventType::DecisionTaskCompleted,
            A::DecisionTaskTimedOut { .. } => EventType::DecisionTaskTimedOut,
            A::TaskScheduled { .. } => EventType::TaskScheduled,
            A::ScheduleTaskFailed { .. } => EventType::ScheduleTaskFailed,
            A::TaskStarted { .. } => EventType::TaskStarted,
            A::TaskCompleted { .. } => EventType::TaskCompleted,
            A::TaskFailed { .. } => EventType::TaskFailed,
            A::TaskTimedOut { .. } => EventType::TaskTimedOut,
            A::TaskCanceled { .. } => EventType::TaskCanceled,
            A::TaskCancelRequested { .. } => EventType::TaskCancelRequested,
            A::RequestCancelTaskFailed { .. } => EventType::RequestCancelTaskFailed,
            A::TimerStarted { .. } => EventType::TimerStarted,
            A::StartTimerFailed { .. } => EventType::StartTimerFailed,
            A::TimerFired { .. } => EventType::TimerFired,
            A::TimerCanceled { .. } => EventType::TimerCanceled,
            A::CancelTimerFailed { .. } => EventType::CancelTimerFailed,
            A::MarkerRecorded { .. } => EventType::MarkerRecorded,
            A::RecordMarkerFailed { .. } => EventType::RecordMarkerFailed,
            A::WorkflowExecutionSignaled { .. } => EventType::WorkflowExecutionSignaled,
            A::Other { event_type, .. } => *event_type,
        }
    }
}

/// One immutable history event.
///
/// The type and category are computed once from the attributes at
/// construction and never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "EventRecord")]
pub struct WorkflowEvent {
    id: i64,
    #[serde(skip_serializing)]
    event_type: EventType,
    #[serde(skip_serializing)]
    category: EventCategory,
    timestamp: OffsetDateTime,
    attributes: EventAttributes,
}

/// Serialized shape of an event; type and category are derived on load.
#[derive(Deserialize)]
struct EventRecord {
    id: i64,
    timestamp: OffsetDateTime,
    attributes: EventAttributes,
}

impl From<EventRecord> for WorkflowEvent {
    fn from(record: EventRecord) -> Self {
        WorkflowEvent::new(record.id, record.timestamp, record.attributes)
    }
}

impl WorkflowEvent {
    pub fn new(id: i64, timestamp: OffsetDateTime, attributes: EventAttributes) -> Self {
        let event_type = attributes.event_type();
        Self {
            id,
            event_type,
            category: event_type.category(),
            timestamp,
            attributes,
        }
    }

    /// The event id; 1-based, unique within one history.
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn attributes(&self) -> &EventAttributes {
        &self.attributes
    }
}
