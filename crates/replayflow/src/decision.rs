//! Decisions and the per-cycle builder that accumulates them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::close::{CLOSE_CONTROL_MARKER, CloseWorkflowControl};
use crate::codec::ControlPayload;
use crate::error::Result;
use crate::event::TaskType;
use crate::options::TaskOptions;

/// Prefix of the zero-duration timers that force a follow-up decision task.
pub const FORCE_DECISION_TIMER_PREFIX: &str = "--force-decision-";

/// One instruction to the workflow service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decisionType")]
pub enum Decision {
    ScheduleTask {
        task_id: String,
        task_type: TaskType,
        input: Option<String>,
        control: Option<String>,
        #[serde(default)]
        options: TaskOptions,
    },
    StartTimer {
        timer_id: String,
        start_to_fire: Duration,
        control: Option<String>,
    },
    CancelTimer {
        timer_id: String,
    },
    RecordMarker {
        marker_name: String,
        details: Option<String>,
    },
    CompleteWorkflow {
        result: Option<String>,
    },
    FailWorkflow {
        reason: Option<String>,
        details: Option<String>,
    },
    CancelWorkflow {
        details: Option<String>,
    },
}

impl Decision {
    /// Returns `true` for decisions that close the workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Decision::CompleteWorkflow { .. }
                | Decision::FailWorkflow { .. }
                | Decision::CancelWorkflow { .. }
        )
    }
}

/// Parameters of one task to schedule.
///
/// # Example
///
/// ```
/// use replayflow::{DecisionBuilder, TaskOptions, TaskRequest, TaskType, Timeout};
///
/// let mut decisions = DecisionBuilder::new();
/// let task_id = decisions.schedule(
///     TaskRequest::new(TaskType::new("resize-image", "1.0"))
///         .with_input("{\"width\":640}")
///         .with_options(TaskOptions::default().with_heartbeat_timeout(Timeout::secs(30))),
/// );
/// assert!(task_id.starts_with("resize-image-"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub task_type: TaskType,
    pub input: Option<String>,
    pub control: Option<String>,
    pub options: TaskOptions,
}

impl TaskRequest {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            input: None,
            control: None,
            options: TaskOptions::default(),
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_control(mut self, control: impl Into<String>) -> Self {
        self.control = Some(control.into());
        self
    }

    /// Per-call overrides, layered over the registered defaults for the type.
    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }
}

/// Accumulates the decisions of one decision cycle.
///
/// A builder is created per cycle and consumed when the batch is submitted.
/// Decisions can only be appended.
#[derive(Debug, Default)]
pub struct DecisionBuilder {
    decisions: Vec<Decision>,
    task_defaults: Arc<HashMap<TaskType, TaskOptions>>,
}

impl DecisionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder that merges per-call task options over `task_defaults`.
    pub fn with_task_defaults(task_defaults: Arc<HashMap<TaskType, TaskOptions>>) -> Self {
        Self {
            decisions: Vec::new(),
            task_defaults,
        }
    }

    /// Schedule `task_type` with `input` and default options.
    ///
    /// Returns the generated task instance id.
    pub fn schedule_task(&mut self, task_type: TaskType, input: Option<String>) -> String {
        self.schedule(TaskRequest {
            input,
            ..TaskRequest::new(task_type)
        })
    }

    /// Schedule a task. Returns the generated task instance id.
    ///
    /// Every call yields a fresh id, so one task type can be scheduled any
    /// number of times in the same cycle.
    pub fn schedule(&mut self, request: TaskRequest) -> String {
        let task_id = format!("{}-{}", request.task_type.name, Uuid::now_v7());
        let options = match self.task_defaults.get(&request.task_type) {
            Some(defaults) => request.options.merged_over(defaults),
            None => request.options,
        };

        self.decisions.push(Decision::ScheduleTask {
            task_id: task_id.clone(),
            task_type: request.task_type,
            input: request.input,
            control: request.control,
            options,
        });
        task_id
    }

    /// Start a timer. `control` comes back verbatim on the fired or canceled
    /// event.
    pub fn start_timer(
        &mut self,
        timer_id: impl Into<String>,
        start_to_fire: Duration,
        control: Option<String>,
    ) {
        self.decisions.push(Decision::StartTimer {
            timer_id: timer_id.into(),
            start_to_fire,
            control,
        });
    }

    /// Cancel a timer.
    ///
    /// The service does not always schedule a new decision task for a
    /// cancellation alone. With `force_decision`, a zero-duration timer is
    /// added to the batch so a follow-up decision task is guaranteed.
    pub fn cancel_timer(&mut self, timer_id: impl Into<String>, force_decision: bool) {
        self.decisions.push(Decision::CancelTimer {
            timer_id: timer_id.into(),
        });
        if force_decision {
            self.start_timer(
                format!("{FORCE_DECISION_TIMER_PREFIX}{}", Uuid::now_v7()),
                Duration::ZERO,
                None,
            );
        }
    }

    pub fn record_marker(&mut self, marker_name: impl Into<String>, details: Option<String>) {
        self.decisions.push(Decision::RecordMarker {
            marker_name: marker_name.into(),
            details,
        });
    }

    /// Complete the workflow with `result`.
    pub fn complete_workflow(&mut self, result: Option<String>) -> Result<()> {
        self.close_workflow(CloseWorkflowControl::Complete { result })
    }

    /// Fail the workflow.
    pub fn fail_workflow(&mut self, reason: Option<String>, details: Option<String>) -> Result<()> {
        self.close_workflow(CloseWorkflowControl::Fail { reason, details })
    }

    /// Cancel the workflow.
    pub fn cancel_workflow(&mut self, details: Option<String>) -> Result<()> {
        self.close_workflow(CloseWorkflowControl::Cancel { details })
    }

    /// Record `control` in the close-control marker, then add its close
    /// decision. Both land in the same batch.
    pub fn close_workflow(&mut self, control: CloseWorkflowControl) -> Result<()> {
        let payload = control.encode()?;
        self.record_marker(CLOSE_CONTROL_MARKER, Some(payload));
        self.decisions.push(control.into_decision());
        Ok(())
    }

    /// Append a fully-formed decision as is.
    pub(crate) fn push(&mut self, decision: Decision) {
        self.decisions.push(decision);
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Snapshot of the decisions so far. Later calls do not affect it.
    pub fn get(&self) -> DecisionBatch {
        DecisionBatch(self.decisions.as_slice().into())
    }

    pub fn into_batch(self) -> DecisionBatch {
        DecisionBatch(self.decisions.into())
    }
}

/// An immutable batch of decisions, submitted atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionBatch(Arc<[Decision]>);

impl DecisionBatch {
    pub fn iter(&self) -> std::slice::Iter<'_, Decision> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Decision] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a DecisionBatch {
    type Item = &'a Decision;
    type IntoIter = std::slice::Iter<'a, Decision>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl From<Vec<Decision>> for DecisionBatch {
    fn from(decisions: Vec<Decision>) -> Self {
        DecisionBatch(decisions.into())
    }
}

impl Serialize for DecisionBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for DecisionBatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<Decision>::deserialize(deserializer).map(DecisionBatch::from)
    }
}
