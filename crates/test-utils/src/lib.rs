//! Test doubles for replayflow.
//!
//! - [`HistoryBuilder`] — builds histories event by event and plays the
//!   service's part by turning decision batches into history events
//! - [`ScriptedClient`] — an in-memory [`WorkflowClient`] fed with scripted
//!   decision tasks and task assignments, recording everything sent back

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use replayflow::{
    Decision, DecisionBatch, DecisionTaskPage, EventAttributes, EventLog, HeartbeatResponse,
    PollRequest, RemoteError, RemoteResult, TaskAssignment, TaskType, WorkflowClient,
    WorkflowEvent, WorkflowExecution, WorkflowInfo, WorkflowOptions, WorkflowType,
};
use time::OffsetDateTime;
use tokio::sync::Notify;

pub const TEST_DOMAIN: &str = "test-domain";

/// Builds a workflow history in id order.
///
/// Event ids are assigned sequentially from 1. Timestamps are fixed so
/// histories compare equal across runs.
#[derive(Debug, Clone)]
pub struct HistoryBuilder {
    workflow: WorkflowInfo,
    events: Vec<WorkflowEvent>,
    previous_started_event_id: i64,
    decision_scheduled_event_id: i64,
}

impl HistoryBuilder {
    /// An empty history for a run of `workflow_type`.
    pub fn new(workflow_type: WorkflowType) -> Self {
        Self {
            workflow: WorkflowInfo {
                domain: TEST_DOMAIN.to_string(),
                execution: WorkflowExecution::new("wf-1", "run-1"),
                workflow_type,
                decision_started_event_id: 0,
            },
            events: Vec::new(),
            previous_started_event_id: 0,
            decision_scheduled_event_id: 0,
        }
    }

    /// A started workflow with its first decision task in progress.
    pub fn start(workflow_type: WorkflowType, input: Option<&str>) -> Self {
        let mut history = Self::new(workflow_type.clone());
        history.push(EventAttributes::WorkflowExecutionStarted {
            workflow_type,
            input: input.map(String::from),
            options: WorkflowOptions::default(),
            tags: Vec::new(),
        });
        history.decision_started();
        history
    }

    pub fn workflow(&self) -> &WorkflowInfo {
        &self.workflow
    }

    pub fn previous_started_event_id(&self) -> i64 {
        self.previous_started_event_id
    }

    pub fn next_id(&self) -> i64 {
        self.events.len() as i64 + 1
    }

    /// Append an event and return its id.
    pub fn push(&mut self, attributes: EventAttributes) -> i64 {
        let id = self.next_id();
        self.events
            .push(WorkflowEvent::new(id, OffsetDateTime::UNIX_EPOCH, attributes));
        id
    }

    /// Schedule and start a decision task.
    pub fn decision_started(&mut self) -> i64 {
        self.decision_scheduled_event_id = self.push(EventAttributes::DecisionTaskScheduled {
            task_list: "default".into(),
        });
        let started = self.push(EventAttributes::DecisionTaskStarted {
            scheduled_event_id: self.decision_scheduled_event_id,
            identity: Some("test-worker".into()),
        });
        self.workflow.decision_started_event_id = started;
        started
    }

    /// Record what the service records when a decision task completes with
    /// `batch`: the completion, then one event per decision.
    pub fn apply(&mut self, batch: &DecisionBatch) {
        self.complete_decision_task(batch, None);
    }

    /// Like [`apply`](Self::apply), but the service refuses to close the
    /// workflow: the close decision is recorded as failed with `cause`.
    pub fn apply_rejecting_close(&mut self, batch: &DecisionBatch, cause: &str) {
        self.complete_decision_task(batch, Some(cause));
    }

    fn complete_decision_task(&mut self, batch: &DecisionBatch, close_rejection: Option<&str>) {
        let started_event_id = self.workflow.decision_started_event_id;
        self.push(EventAttributes::DecisionTaskCompleted {
            scheduled_event_id: self.decision_scheduled_event_id,
            started_event_id,
        });
        self.previous_started_event_id = started_event_id;

        for decision in batch {
            let attributes = match decision.clone() {
                Decision::ScheduleTask {
                    task_id,
                    task_type,
                    input,
                    control,
                    options,
                } => EventAttributes::TaskScheduled {
                    task_id,
                    task_type,
                    input,
                    control,
                    options,
                },
                Decision::StartTimer {
                    timer_id,
                    start_to_fire,
                    control,
                } => EventAttributes::TimerStarted {
                    timer_id,
                    start_to_fire,
                    control,
                },
                Decision::CancelTimer { timer_id } => EventAttributes::TimerCanceled {
                    started_event_id: self.timer_started_event_id(&timer_id),
                    timer_id,
                },
                Decision::RecordMarker {
                    marker_name,
                    details,
                } => EventAttributes::MarkerRecorded {
                    marker_name,
                    details,
                },
                Decision::CompleteWorkflow { result } => match close_rejection {
                    Some(cause) => EventAttributes::CompleteWorkflowExecutionFailed {
                        cause: cause.to_string(),
                    },
                    None => EventAttributes::WorkflowExecutionCompleted { result },
                },
                Decision::FailWorkflow { reason, details } => match close_rejection {
                    Some(cause) => EventAttributes::FailWorkflowExecutionFailed {
                        cause: cause.to_string(),
                    },
                    None => EventAttributes::WorkflowExecutionFailed { reason, details },
                },
                Decision::CancelWorkflow { details } => match close_rejection {
                    Some(cause) => EventAttributes::CancelWorkflowExecutionFailed {
                        cause: cause.to_string(),
                    },
                    None => EventAttributes::WorkflowExecutionCanceled { details },
                },
            };
            self.push(attributes);
        }
    }

    /// Id of the latest `TaskScheduled` event for `task_id`.
    ///
    /// # Panics
    ///
    /// If the task was never scheduled.
    pub fn scheduled_event_id(&self, task_id: &str) -> i64 {
        self.events
            .iter()
            .rev()
            .find(|e| {
                matches!(e.attributes(), EventAttributes::TaskScheduled { task_id: id, .. } if id == task_id)
            })
            .map(WorkflowEvent::id)
            .unwrap_or_else(|| panic!("task {task_id} was never scheduled"))
    }

    /// Id of the latest `TimerStarted` event for `timer_id`.
    ///
    /// # Panics
    ///
    /// If the timer was never started.
    pub fn timer_started_event_id(&self, timer_id: &str) -> i64 {
        self.events
            .iter()
            .rev()
            .find(|e| {
                matches!(e.attributes(), EventAttributes::TimerStarted { timer_id: id, .. } if id == timer_id)
            })
            .map(WorkflowEvent::id)
            .unwrap_or_else(|| panic!("timer {timer_id} was never started"))
    }

    /// Task ids scheduled so far, oldest first.
    pub fn scheduled_tasks(&self) -> Vec<(String, TaskType)> {
        self.events
            .iter()
            .filter_map(|e| match e.attributes() {
                EventAttributes::TaskScheduled {
                    task_id, task_type, ..
                } => Some((task_id.clone(), task_type.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn task_started(&mut self, task_id: &str) -> i64 {
        let scheduled_event_id = self.scheduled_event_id(task_id);
        self.push(EventAttributes::TaskStarted {
            scheduled_event_id,
            identity: Some("test-worker".into()),
        })
    }

    pub fn task_completed(&mut self, task_id: &str, result: Option<&str>) -> i64 {
        let scheduled_event_id = self.scheduled_event_id(task_id);
        self.push(EventAttributes::TaskCompleted {
            scheduled_event_id,
            result: result.map(String::from),
        })
    }

    pub fn task_failed(&mut self, task_id: &str, reason: &str, details: Option<&str>) -> i64 {
        let scheduled_event_id = self.scheduled_event_id(task_id);
        self.push(EventAttributes::TaskFailed {
            scheduled_event_id,
            reason: Some(reason.to_string()),
            details: details.map(String::from),
        })
    }

    pub fn task_timed_out(&mut self, task_id: &str, timeout_type: &str) -> i64 {
        let scheduled_event_id = self.scheduled_event_id(task_id);
        self.push(EventAttributes::TaskTimedOut {
            scheduled_event_id,
            timeout_type: timeout_type.to_string(),
            details: None,
        })
    }

    pub fn timer_fired(&mut self, timer_id: &str) -> i64 {
        let started_event_id = self.timer_started_event_id(timer_id);
        self.push(EventAttributes::TimerFired {
            timer_id: timer_id.to_string(),
            started_event_id,
        })
    }

    pub fn timer_started(&mut self, timer_id: &str, start_to_fire: Duration) -> i64 {
        self.push(EventAttributes::TimerStarted {
            timer_id: timer_id.to_string(),
            start_to_fire,
            control: None,
        })
    }

    pub fn signal(&mut self, signal_name: &str, input: Option<&str>) -> i64 {
        self.push(EventAttributes::WorkflowExecutionSignaled {
            signal_name: signal_name.to_string(),
            input: input.map(String::from),
        })
    }

    pub fn marker(&mut self, marker_name: &str, details: Option<&str>) -> i64 {
        self.push(EventAttributes::MarkerRecorded {
            marker_name: marker_name.to_string(),
            details: details.map(String::from),
        })
    }

    /// Events newest first, as the service delivers them.
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.iter().rev().cloned().collect()
    }

    /// The history as an [`EventLog`].
    ///
    /// # Panics
    ///
    /// If the history is empty.
    pub fn log(&self) -> EventLog {
        EventLog::new(self.events(), self.previous_started_event_id)
            .expect("history should form a valid event log")
    }

    /// The history split into pages of `page_size` events, newest first.
    pub fn pages(&self, task_token: &str, page_size: usize) -> Vec<DecisionTaskPage> {
        let events = self.events();
        let chunks: Vec<Vec<WorkflowEvent>> = events
            .chunks(page_size.max(1))
            .map(<[WorkflowEvent]>::to_vec)
            .collect();
        let count = chunks.len();

        chunks
            .into_iter()
            .enumerate()
            .map(|(i, events)| DecisionTaskPage {
                task_token: task_token.to_string(),
                execution: self.workflow.execution.clone(),
                workflow_type: self.workflow.workflow_type.clone(),
                previous_started_event_id: self.previous_started_event_id,
                started_event_id: self.workflow.decision_started_event_id,
                events,
                next_page_token: (i + 1 < count).then(|| format!("{task_token}-page-{}", i + 1)),
            })
            .collect()
    }
}

/// What a worker reported for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReport {
    Completed {
        task_token: String,
        result: Option<String>,
    },
    Failed {
        task_token: String,
        reason: Option<String>,
        details: Option<String>,
    },
    Canceled {
        task_token: String,
        details: Option<String>,
    },
}

/// In-memory [`WorkflowClient`].
///
/// Polls pop scripted work in order and hang while none is queued, like a
/// long poll against an idle service.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    decision_tasks: Mutex<VecDeque<RemoteResult<DecisionTaskPage>>>,
    follow_up_pages: Mutex<HashMap<String, DecisionTaskPage>>,
    lost_pages: Mutex<HashSet<String>>,
    tasks: Mutex<VecDeque<RemoteResult<TaskAssignment>>>,
    submissions: Mutex<Vec<(String, DecisionBatch)>>,
    submit_failures: Mutex<VecDeque<RemoteError>>,
    reports: Mutex<Vec<TaskReport>>,
    heartbeats: Mutex<Vec<(String, Option<String>)>>,
    decision_polls: Mutex<Vec<PollRequest>>,
    cancel_requested: AtomicBool,
    work_queued: Notify,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a decision task made of `pages`, the first page first.
    pub fn queue_decision_task(&self, pages: Vec<DecisionTaskPage>) {
        let mut pages = pages.into_iter();
        let Some(first) = pages.next() else {
            return;
        };

        let mut token = first.next_page_token.clone();
        {
            let mut follow_ups = self.follow_up_pages.lock().unwrap();
            for page in pages {
                if let Some(t) = token.take() {
                    token = page.next_page_token.clone();
                    follow_ups.insert(t, page);
                }
            }
        }
        self.decision_tasks.lock().unwrap().push_back(Ok(first));
        self.work_queued.notify_waiters();
    }

    /// Queue the whole of `history` as one decision task.
    pub fn queue_history(&self, history: &HistoryBuilder, task_token: &str, page_size: usize) {
        self.queue_decision_task(history.pages(task_token, page_size));
    }

    /// Answer the follow-up page behind `next_page_token` with no page at all.
    pub fn lose_follow_up_page(&self, next_page_token: &str) {
        self.follow_up_pages.lock().unwrap().remove(next_page_token);
        self.lost_pages
            .lock()
            .unwrap()
            .insert(next_page_token.to_string());
    }

    /// Make the next decision poll fail with `error`.
    pub fn fail_next_decision_poll(&self, error: RemoteError) {
        self.decision_tasks.lock().unwrap().push_back(Err(error));
        self.work_queued.notify_waiters();
    }

    /// Make the next decision submission fail with `error`.
    pub fn fail_next_submission(&self, error: RemoteError) {
        self.submit_failures.lock().unwrap().push_back(error);
    }

    pub fn queue_task(&self, assignment: TaskAssignment) {
        self.tasks.lock().unwrap().push_back(Ok(assignment));
        self.work_queued.notify_waiters();
    }

    /// Answer every heartbeat with a cancellation request.
    pub fn request_cancellation(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Decision batches submitted so far, with their task tokens.
    pub fn submissions(&self) -> Vec<(String, DecisionBatch)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<TaskReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn heartbeats(&self) -> Vec<(String, Option<String>)> {
        self.heartbeats.lock().unwrap().clone()
    }

    /// Every decision poll request received, follow-up pages included.
    pub fn decision_polls(&self) -> Vec<PollRequest> {
        self.decision_polls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowClient for ScriptedClient {
    async fn poll_for_decision_task(
        &self,
        request: &PollRequest,
        next_page_token: Option<&str>,
    ) -> RemoteResult<Option<DecisionTaskPage>> {
        self.decision_polls.lock().unwrap().push(request.clone());

        if let Some(token) = next_page_token {
            if self.lost_pages.lock().unwrap().remove(token) {
                return Ok(None);
            }
            return match self.follow_up_pages.lock().unwrap().remove(token) {
                Some(page) => Ok(Some(page)),
                None => Err(RemoteError::UnknownResource(format!("page token {token}"))),
            };
        }

        loop {
            let queued = self.work_queued.notified();
            if let Some(next) = self.decision_tasks.lock().unwrap().pop_front() {
                return next.map(Some);
            }
            queued.await;
        }
    }

    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: &DecisionBatch,
    ) -> RemoteResult<()> {
        if let Some(error) = self.submit_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.submissions
            .lock()
            .unwrap()
            .push((task_token.to_string(), decisions.clone()));
        Ok(())
    }

    async fn poll_for_task(&self, _request: &PollRequest) -> RemoteResult<Option<TaskAssignment>> {
        loop {
            let queued = self.work_queued.notified();
            if let Some(next) = self.tasks.lock().unwrap().pop_front() {
                return next.map(Some);
            }
            queued.await;
        }
    }

    async fn respond_task_completed(
        &self,
        task_token: &str,
        result: Option<&str>,
    ) -> RemoteResult<()> {
        self.reports.lock().unwrap().push(TaskReport::Completed {
            task_token: task_token.to_string(),
            result: result.map(String::from),
        });
        Ok(())
    }

    async fn respond_task_failed(
        &self,
        task_token: &str,
        reason: Option<&str>,
        details: Option<&str>,
    ) -> RemoteResult<()> {
        self.reports.lock().unwrap().push(TaskReport::Failed {
            task_token: task_token.to_string(),
            reason: reason.map(String::from),
            details: details.map(String::from),
        });
        Ok(())
    }

    async fn respond_task_canceled(
        &self,
        task_token: &str,
        details: Option<&str>,
    ) -> RemoteResult<()> {
        self.reports.lock().unwrap().push(TaskReport::Canceled {
            task_token: task_token.to_string(),
            details: details.map(String::from),
        });
        Ok(())
    }

    async fn record_task_heartbeat(
        &self,
        task_token: &str,
        details: Option<&str>,
    ) -> RemoteResult<HeartbeatResponse> {
        self.heartbeats
            .lock()
            .unwrap()
            .push((task_token.to_string(), details.map(String::from)));
        Ok(HeartbeatResponse {
            cancel_requested: self.cancel_requested.load(Ordering::SeqCst),
        })
    }
}

/// A task assignment for `task_id` of `task_type`.
pub fn assignment(
    task_token: &str,
    task_id: &str,
    task_type: TaskType,
    input: Option<&str>,
) -> TaskAssignment {
    TaskAssignment {
        task_token: task_token.to_string(),
        task_id: task_id.to_string(),
        task_type,
        input: input.map(String::from),
        execution: WorkflowExecution::new("wf-1", "run-1"),
        started_event_id: 1,
    }
}
