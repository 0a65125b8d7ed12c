//! Boundary to the remote workflow service.
//!
//! The service owns persistence, timers and task queues. This crate only
//! needs the long-poll and respond calls below; transport, wire format and
//! transport-level retries belong to the [`WorkflowClient`] implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::decision::DecisionBatch;
use crate::event::{TaskType, WorkflowEvent, WorkflowExecution, WorkflowInfo, WorkflowType};

/// A failed call to the workflow service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The domain, task list, workflow or task token is unknown to the service.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// Throttling, network failure or service unavailability.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The service refused the request as invalid.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// A `Result` alias for calls to the workflow service.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Parameters of one long poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub domain: String,
    pub task_list: String,
    /// Identity of the polling worker, recorded in history.
    pub identity: String,
}

/// One page of a decision task.
///
/// Events within a page and across pages are newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTaskPage {
    /// Token identifying the decision task when responding.
    pub task_token: String,
    pub execution: WorkflowExecution,
    pub workflow_type: WorkflowType,
    /// Id of the `DecisionTaskStarted` event of the previous decision task.
    pub previous_started_event_id: i64,
    /// Id of the `DecisionTaskStarted` event of this decision task.
    pub started_event_id: i64,
    pub events: Vec<WorkflowEvent>,
    /// Present when more (older) events remain.
    pub next_page_token: Option<String>,
}

/// A decision task with every page collected.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTask {
    pub task_token: String,
    pub workflow: WorkflowInfo,
    pub previous_started_event_id: i64,
    pub events: Vec<WorkflowEvent>,
}

impl DecisionTask {
    /// Start assembling a decision task from its first page.
    pub fn from_first_page(domain: &str, page: DecisionTaskPage) -> Self {
        Self {
            task_token: page.task_token,
            workflow: WorkflowInfo {
                domain: domain.to_string(),
                execution: page.execution,
                workflow_type: page.workflow_type,
                decision_started_event_id: page.started_event_id,
            },
            previous_started_event_id: page.previous_started_event_id,
            events: page.events,
        }
    }

    /// Append the events of a follow-up page.
    pub fn extend(&mut self, page: DecisionTaskPage) {
        self.events.extend(page.events);
    }
}

/// One task assigned to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskAssignment {
    /// Token identifying the task when reporting.
    pub task_token: String,
    /// Task instance id chosen by the scheduling decision.
    pub task_id: String,
    pub task_type: TaskType,
    pub input: Option<String>,
    /// The workflow run that scheduled the task.
    pub execution: WorkflowExecution,
    pub started_event_id: i64,
}

/// Result of a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatResponse {
    /// The workflow asked for this task to be canceled.
    pub cancel_requested: bool,
}

/// Calls this crate makes against the workflow service.
///
/// Polls are long polls. `Ok(None)` means the poll ended without work.
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Poll for a decision task, or fetch a further page of one.
    async fn poll_for_decision_task(
        &self,
        request: &PollRequest,
        next_page_token: Option<&str>,
    ) -> RemoteResult<Option<DecisionTaskPage>>;

    /// Submit the decisions of one decision task, atomically.
    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: &DecisionBatch,
    ) -> RemoteResult<()>;

    /// Poll for a task.
    async fn poll_for_task(&self, request: &PollRequest) -> RemoteResult<Option<TaskAssignment>>;

    async fn respond_task_completed(&self, task_token: &str, result: Option<&str>)
    -> RemoteResult<()>;

    async fn respond_task_failed(
        &self,
        task_token: &str,
        reason: Option<&str>,
        details: Option<&str>,
    ) -> RemoteResult<()>;

    async fn respond_task_canceled(&self, task_token: &str, details: Option<&str>)
    -> RemoteResult<()>;

    /// Report liveness of a running task.
    async fn record_task_heartbeat(
        &self,
        task_token: &str,
        details: Option<&str>,
    ) -> RemoteResult<HeartbeatResponse>;
}
