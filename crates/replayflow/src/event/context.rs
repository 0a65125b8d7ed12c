//! Turning one history event into a handler-facing context.
//!
//! Extraction resolves everything a handler needs up front: the dispatch
//! key ([`ContextName`]), and the event's facets, following references to
//! earlier events (a task result points at its `TaskScheduled` event, a timer
//! firing points at its `TimerStarted` event) through the [`EventLog`].

use std::fmt;
use std::time::Duration;

use super::{
    EventAttributes, EventCategory, EventLog, EventType, TaskType, WorkflowEvent, WorkflowInfo,
    WorkflowType,
};
use crate::error::{Error, Result};

/// Dispatch key of an event within its category.
///
/// Equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextName {
    /// Task events, keyed by the task type.
    Task(TaskType),
    /// Signals, keyed by signal name.
    Signal(String),
    /// Timer events, keyed by timer id.
    Timer(String),
    /// Marker events, keyed by marker name.
    Marker(String),
    /// Workflow lifecycle events, keyed by the workflow type.
    Workflow(WorkflowType),
    /// Decision task bookkeeping events. There is one key for all of them.
    DecisionTask,
}

impl ContextName {
    pub fn task(name: impl Into<String>, version: impl Into<String>) -> Self {
        ContextName::Task(TaskType::new(name, version))
    }

    pub fn signal(name: impl Into<String>) -> Self {
        ContextName::Signal(name.into())
    }

    pub fn timer(timer_id: impl Into<String>) -> Self {
        ContextName::Timer(timer_id.into())
    }

    pub fn marker(name: impl Into<String>) -> Self {
        ContextName::Marker(name.into())
    }

    pub fn workflow(name: impl Into<String>, version: impl Into<String>) -> Self {
        ContextName::Workflow(WorkflowType::new(name, version))
    }

    /// The event category whose events are keyed by this shape.
    pub fn category(&self) -> EventCategory {
        match self {
            ContextName::Task(_) => EventCategory::Task,
            ContextName::Signal(_) => EventCategory::Signal,
            ContextName::Timer(_) => EventCategory::Timer,
            ContextName::Marker(_) => EventCategory::Marker,
            ContextName::Workflow(_) => EventCategory::WorkflowExecution,
            ContextName::DecisionTask => EventCategory::DecisionTask,
        }
    }
}

impl fmt::Display for ContextName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextName::Task(task_type) => write!(f, "task {task_type}"),
            ContextName::Signal(name) => write!(f, "signal {name}"),
            ContextName::Timer(id) => write!(f, "timer {id}"),
            ContextName::Marker(name) => write!(f, "marker {name}"),
            ContextName::Workflow(workflow_type) => write!(f, "workflow {workflow_type}"),
            ContextName::DecisionTask => f.write_str("decision task"),
        }
    }
}

/// A named piece of data an event may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    Input,
    Output,
    Reason,
    Details,
    Cause,
    Control,
    TaskType,
    TimerId,
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Facet::Input => "input",
            Facet::Output => "output",
            Facet::Reason => "reason",
            Facet::Details => "details",
            Facet::Cause => "cause",
            Facet::Control => "control",
            Facet::TaskType => "task type",
            Facet::TimerId => "timer id",
        };
        f.write_str(name)
    }
}

impl EventType {
    /// The facets events of this type carry.
    pub fn facets(self) -> &'static [Facet] {
        use EventType::*;
        use Facet as F;
        match self {
            WorkflowExecutionStarted | WorkflowExecutionSignaled => &[F::Input],
            WorkflowExecutionCompleted => &[F::Output],
            WorkflowExecutionFailed | WorkflowExecutionTerminated => &[F::Reason, F::Details],
            WorkflowExecutionCanceled | MarkerRecorded => &[F::Details],
            WorkflowExecutionTimedOut
            | WorkflowExecutionCancelRequested
            | CompleteWorkflowExecutionFailed
            | FailWorkflowExecutionFailed
            | CancelWorkflowExecutionFailed
            | RecordMarkerFailed => &[F::Cause],
            TaskScheduled | TaskStarted | TaskCancelRequested => {
                &[F::TaskType, F::Input, F::Control]
            }
            ScheduleTaskFailed | RequestCancelTaskFailed => &[F::TaskType, F::Cause],
            TaskCompleted => &[F::TaskType, F::Input, F::Control, F::Output],
            TaskFailed => &[F::TaskType, F::Input, F::Control, F::Reason, F::Details],
            TaskTimedOut => &[F::TaskType, F::Input, F::Control, F::Cause, F::Details],
            TaskCanceled => &[F::TaskType, F::Input, F::Control, F::Details],
            TimerStarted | TimerFired | TimerCanceled => &[F::TimerId, F::Control],
            StartTimerFailed | CancelTimerFailed => &[F::TimerId, F::Cause],
            _ => &[],
        }
    }

    /// Returns `true` if events of this type carry `facet`.
    pub fn has_facet(self, facet: Facet) -> bool {
        self.facets().contains(&facet)
    }
}

/// Data extracted from a workflow lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowDetails<'a> {
    pub workflow_type: &'a WorkflowType,
    pub input: Option<&'a str>,
    pub result: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub details: Option<&'a str>,
    pub cause: Option<&'a str>,
}

/// Data extracted from a task event, with schedule attributes resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDetails<'a> {
    /// The task instance id chosen when the task was scheduled.
    pub task_id: &'a str,
    pub task_type: &'a TaskType,
    /// Id of the resolved `TaskScheduled` event; `None` for `ScheduleTaskFailed`.
    pub scheduled_event_id: Option<i64>,
    pub input: Option<&'a str>,
    pub control: Option<&'a str>,
    pub result: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub details: Option<&'a str>,
    pub cause: Option<&'a str>,
}

/// Data extracted from a timer event, with the start control resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerDetails<'a> {
    pub timer_id: &'a str,
    pub control: Option<&'a str>,
    pub start_to_fire: Option<Duration>,
    pub cause: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerDetails<'a> {
    pub marker_name: &'a str,
    pub details: Option<&'a str>,
    pub cause: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalDetails<'a> {
    pub signal_name: &'a str,
    pub input: Option<&'a str>,
}

/// Category-specific data of an extracted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDetails<'a> {
    Workflow(WorkflowDetails<'a>),
    DecisionTask,
    Task(TaskDetails<'a>),
    Timer(TimerDetails<'a>),
    Marker(MarkerDetails<'a>),
    Signal(SignalDetails<'a>),
}

/// One history event prepared for dispatch.
///
/// Contexts borrow the log they were extracted from and live for one
/// dispatch. Facet accessors return [`Error::MissingFacet`] when the event
/// type does not carry the facet; that is a handler bug, not a runtime
/// condition.
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    event: &'a WorkflowEvent,
    log: &'a EventLog,
    workflow: &'a WorkflowInfo,
    details: EventDetails<'a>,
}

impl<'a> EventContext<'a> {
    /// Extract the context of `event`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedCategory`] for child-workflow, external-workflow
    ///   and lambda events
    /// - [`Error::MismatchedAttributes`] if the attributes are uninterpreted
    /// - [`Error::MissingReference`] if a referenced event is not in `log`
    pub fn extract(
        event: &'a WorkflowEvent,
        log: &'a EventLog,
        workflow: &'a WorkflowInfo,
    ) -> Result<Self> {
        let details = match event.category() {
            EventCategory::WorkflowExecution => workflow_details(event, workflow)?,
            EventCategory::DecisionTask => match event.attributes() {
                EventAttributes::Other { .. } => return Err(mismatched(event)),
                _ => EventDetails::DecisionTask,
            },
            EventCategory::Task => task_details(event, log)?,
            EventCategory::Timer => timer_details(event, log)?,
            EventCategory::Marker => match event.attributes() {
                EventAttributes::MarkerRecorded {
                    marker_name,
                    details,
                } => EventDetails::Marker(MarkerDetails {
                    marker_name,
                    details: details.as_deref(),
                    cause: None,
                }),
                EventAttributes::RecordMarkerFailed { marker_name, cause } => {
                    EventDetails::Marker(MarkerDetails {
                        marker_name,
                        details: None,
                        cause: Some(cause.as_str()),
                    })
                }
                _ => return Err(mismatched(event)),
            },
            EventCategory::Signal => match event.attributes() {
                EventAttributes::WorkflowExecutionSignaled { signal_name, input } => {
                    EventDetails::Signal(SignalDetails {
                        signal_name,
                        input: input.as_deref(),
                    })
                }
                _ => return Err(mismatched(event)),
            },
            category @ (EventCategory::ChildWorkflow
            | EventCategory::ExternalWorkflow
            | EventCategory::Lambda) => {
                return Err(Error::UnsupportedCategory {
                    event_id: event.id(),
                    category,
                });
            }
        };

        Ok(Self {
            event,
            log,
            workflow,
            details,
        })
    }

    pub fn event(&self) -> &'a WorkflowEvent {
        self.event
    }

    pub fn event_id(&self) -> i64 {
        self.event.id()
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    pub fn log(&self) -> &'a EventLog {
        self.log
    }

    pub fn workflow(&self) -> &'a WorkflowInfo {
        self.workflow
    }

    pub fn details(&self) -> &EventDetails<'a> {
        &self.details
    }

    /// The dispatch key of this event.
    pub fn name(&self) -> ContextName {
        match &self.details {
            EventDetails::Workflow(d) => ContextName::Workflow(d.workflow_type.clone()),
            EventDetails::DecisionTask => ContextName::DecisionTask,
            EventDetails::Task(d) => ContextName::Task(d.task_type.clone()),
            EventDetails::Timer(d) => ContextName::timer(d.timer_id),
            EventDetails::Marker(d) => ContextName::marker(d.marker_name),
            EventDetails::Signal(d) => ContextName::signal(d.signal_name),
        }
    }

    /// Returns `true` if this event carries `facet`.
    pub fn has(&self, facet: Facet) -> bool {
        self.event_type().has_facet(facet)
    }

    pub fn input(&self) -> Result<Option<&'a str>> {
        self.require(Facet::Input)?;
        Ok(match self.details {
            EventDetails::Workflow(d) => d.input,
            EventDetails::Task(d) => d.input,
            EventDetails::Signal(d) => d.input,
            _ => None,
        })
    }

    /// The task or workflow result.
    pub fn output(&self) -> Result<Option<&'a str>> {
        self.require(Facet::Output)?;
        Ok(match self.details {
            EventDetails::Workflow(d) => d.result,
            EventDetails::Task(d) => d.result,
            _ => None,
        })
    }

    pub fn reason(&self) -> Result<Option<&'a str>> {
        self.require(Facet::Reason)?;
        Ok(match self.details {
            EventDetails::Workflow(d) => d.reason,
            EventDetails::Task(d) => d.reason,
            _ => None,
        })
    }

    pub fn details_text(&self) -> Result<Option<&'a str>> {
        self.require(Facet::Details)?;
        Ok(match self.details {
            EventDetails::Workflow(d) => d.details,
            EventDetails::Task(d) => d.details,
            EventDetails::Marker(d) => d.details,
            _ => None,
        })
    }

    pub fn cause(&self) -> Result<Option<&'a str>> {
        self.require(Facet::Cause)?;
        Ok(match self.details {
            EventDetails::Workflow(d) => d.cause,
            EventDetails::Task(d) => d.cause,
            EventDetails::Timer(d) => d.cause,
            EventDetails::Marker(d) => d.cause,
            _ => None,
        })
    }

    /// The opaque control string attached when the task was scheduled or the
    /// timer was started.
    pub fn control(&self) -> Result<Option<&'a str>> {
        self.require(Facet::Control)?;
        Ok(match self.details {
            EventDetails::Task(d) => d.control,
            EventDetails::Timer(d) => d.control,
            _ => None,
        })
    }

    pub fn task_type(&self) -> Result<&'a TaskType> {
        self.require(Facet::TaskType)?;
        match self.details {
            EventDetails::Task(d) => Ok(d.task_type),
            _ => Err(self.missing(Facet::TaskType)),
        }
    }

    pub fn timer_id(&self) -> Result<&'a str> {
        self.require(Facet::TimerId)?;
        match self.details {
            EventDetails::Timer(d) => Ok(d.timer_id),
            _ => Err(self.missing(Facet::TimerId)),
        }
    }

    /// The task details, for task events.
    pub fn task(&self) -> Option<&TaskDetails<'a>> {
        match &self.details {
            EventDetails::Task(d) => Some(d),
            _ => None,
        }
    }

    fn require(&self, facet: Facet) -> Result<()> {
        if self.has(facet) {
            Ok(())
        } else {
            Err(self.missing(facet))
        }
    }

    fn missing(&self, facet: Facet) -> Error {
        Error::MissingFacet {
            facet,
            event_type: self.event_type(),
        }
    }
}

fn mismatched(event: &WorkflowEvent) -> Error {
    Error::MismatchedAttributes {
        event_id: event.id(),
        event_type: event.event_type(),
    }
}

fn workflow_details<'a>(
    event: &'a WorkflowEvent,
    workflow: &'a WorkflowInfo,
) -> Result<EventDetails<'a>> {
    let mut details = WorkflowDetails {
        workflow_type: &workflow.workflow_type,
        input: None,
        result: None,
        reason: None,
        details: None,
        cause: None,
    };

    match event.attributes() {
        EventAttributes::WorkflowExecutionStarted {
            workflow_type,
            input,
            ..
        } => {
            details.workflow_type = workflow_type;
            details.input = input.as_deref();
        }
        EventAttributes::WorkflowExecutionCompleted { result } => {
            details.result = result.as_deref();
        }
        EventAttributes::WorkflowExecutionFailed {
            reason,
            details: text,
        }
        | EventAttributes::WorkflowExecutionTerminated {
            reason,
            details: text,
        } => {
            details.reason = reason.as_deref();
            details.details = text.as_deref();
        }
        EventAttributes::WorkflowExecutionCanceled { details: text } => {
            details.details = text.as_deref();
        }
        EventAttributes::CompleteWorkflowExecutionFailed { cause }
        | EventAttributes::FailWorkflowExecutionFailed { cause }
        | EventAttributes::CancelWorkflowExecutionFailed { cause }
        | EventAttributes::WorkflowExecutionTimedOut {
            timeout_type: cause,
        } => {
            details.cause = Some(cause.as_str());
        }
        EventAttributes::WorkflowExecutionCancelRequested { cause } => {
            details.cause = cause.as_deref();
        }
        _ => return Err(mismatched(event)),
    }

    Ok(EventDetails::Workflow(details))
}

/// Attributes of the `TaskScheduled` event a task event refers to.
struct Scheduled<'a> {
    event_id: i64,
    task_id: &'a str,
    task_type: &'a TaskType,
    input: Option<&'a str>,
    control: Option<&'a str>,
}

impl<'a> Scheduled<'a> {
    fn from_event(event: &'a WorkflowEvent) -> Option<Self> {
        match event.attributes() {
            EventAttributes::TaskScheduled {
                task_id,
                task_type,
                input,
                control,
                ..
            } => Some(Scheduled {
                event_id: event.id(),
                task_id,
                task_type,
                input: input.as_deref(),
                control: control.as_deref(),
            }),
            _ => None,
        }
    }

    fn by_event_id(event: &WorkflowEvent, log: &'a EventLog, scheduled_event_id: i64) -> Result<Self> {
        log.event_by_id(scheduled_event_id)
            .and_then(Scheduled::from_event)
            .ok_or_else(|| {
                Error::missing_reference(event.id(), scheduled_event_id, EventType::TaskScheduled)
            })
    }

    fn by_task_id(event: &WorkflowEvent, log: &'a EventLog, task_id: &str) -> Result<Self> {
        log.scheduled_event_for(task_id)
            .and_then(Scheduled::from_event)
            .ok_or_else(|| Error::missing_reference(event.id(), task_id, EventType::TaskScheduled))
    }

    fn details(self) -> TaskDetails<'a> {
        TaskDetails {
            task_id: self.task_id,
            task_type: self.task_type,
            scheduled_event_id: Some(self.event_id),
            input: self.input,
            control: self.control,
            result: None,
            reason: None,
            details: None,
            cause: None,
        }
    }
}

fn task_details<'a>(event: &'a WorkflowEvent, log: &'a EventLog) -> Result<EventDetails<'a>> {
    let details = match event.attributes() {
        EventAttributes::TaskScheduled { .. } => Scheduled::from_event(event)
            .ok_or_else(|| mismatched(event))?
            .details(),
        EventAttributes::ScheduleTaskFailed {
            task_id,
            task_type,
            cause,
        } => TaskDetails {
            task_id,
            task_type,
            scheduled_event_id: None,
            input: None,
            control: None,
            result: None,
            reason: None,
            details: None,
            cause: Some(cause.as_str()),
        },
        EventAttributes::TaskStarted {
            scheduled_event_id, ..
        } => Scheduled::by_event_id(event, log, *scheduled_event_id)?.details(),
        EventAttributes::TaskCompleted {
            scheduled_event_id,
            result,
        } => TaskDetails {
            result: result.as_deref(),
            ..Scheduled::by_event_id(event, log, *scheduled_event_id)?.details()
        },
        EventAttributes::TaskFailed {
            scheduled_event_id,
            reason,
            details,
        } => TaskDetails {
            reason: reason.as_deref(),
            details: details.as_deref(),
            ..Scheduled::by_event_id(event, log, *scheduled_event_id)?.details()
        },
        EventAttributes::TaskTimedOut {
            scheduled_event_id,
            timeout_type,
            details,
        } => TaskDetails {
            cause: Some(timeout_type.as_str()),
            details: details.as_deref(),
            ..Scheduled::by_event_id(event, log, *scheduled_event_id)?.details()
        },
        EventAttributes::TaskCanceled {
            scheduled_event_id,
            details,
        } => TaskDetails {
            details: details.as_deref(),
            ..Scheduled::by_event_id(event, log, *scheduled_event_id)?.details()
        },
        EventAttributes::TaskCancelRequested { task_id } => {
            Scheduled::by_task_id(event, log, task_id)?.details()
        }
        EventAttributes::RequestCancelTaskFailed { task_id, cause } => TaskDetails {
            input: None,
            control: None,
            cause: Some(cause.as_str()),
            ..Scheduled::by_task_id(event, log, task_id)?.details()
        },
        _ => return Err(mismatched(event)),
    };

    Ok(EventDetails::Task(details))
}

fn timer_details<'a>(event: &'a WorkflowEvent, log: &'a EventLog) -> Result<EventDetails<'a>> {
    let details = match event.attributes() {
        EventAttributes::TimerStarted {
            timer_id,
            start_to_fire,
            control,
        } => TimerDetails {
            timer_id,
            control: control.as_deref(),
            start_to_fire: Some(*start_to_fire),
            cause: None,
        },
        EventAttributes::TimerFired {
            timer_id,
            started_event_id,
        }
        | EventAttributes::TimerCanceled {
            timer_id,
            started_event_id,
        } => {
            let started = log.event_by_id(*started_event_id).and_then(|started| {
                match started.attributes() {
                    EventAttributes::TimerStarted {
                        start_to_fire,
                        control,
                        ..
                    } => Some((control.as_deref(), *start_to_fire)),
                    _ => None,
                }
            });
            let (control, start_to_fire) = started.ok_or_else(|| {
                Error::missing_reference(event.id(), started_event_id, EventType::TimerStarted)
            })?;
            TimerDetails {
                timer_id,
                control,
                start_to_fire: Some(start_to_fire),
                cause: None,
            }
        }
        EventAttributes::StartTimerFailed { timer_id, cause }
        | EventAttributes::CancelTimerFailed { timer_id, cause } => TimerDetails {
            timer_id,
            control: None,
            start_to_fire: None,
            cause: Some(cause.as_str()),
        },
        _ => return Err(mismatched(event)),
    };

    Ok(EventDetails::Timer(details))
}
