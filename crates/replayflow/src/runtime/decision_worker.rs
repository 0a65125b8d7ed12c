//! Decision poller: turns decision tasks into decision batches.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::config::PollerConfig;
use super::poller::{PollSource, PollerState, PollerStatus};
use crate::client::{DecisionTask, PollRequest, RemoteError, WorkflowClient};
use crate::dispatch::{Dispatcher, HandlerRegistry};
use crate::error::{Error, Result};
use crate::event::EventLog;

/// Polls decision tasks and answers each with one decision batch.
///
/// # Lifecycle
///
/// 1. Long poll for a decision task, following every history page
/// 2. Build the [`EventLog`] and dispatch each new event once
/// 3. Submit the collected decisions in a single response
///
/// Dispatch errors (a failing handler, a history that does not add up) are
/// fatal and stop the poller. Failed remote calls are logged and the poller
/// moves on; the service hands the decision task out again once it times
/// out.
pub struct DecisionWorker {
    client: Arc<dyn WorkflowClient>,
    dispatcher: Dispatcher,
    request: PollRequest,
}

impl DecisionWorker {
    pub fn new(
        client: Arc<dyn WorkflowClient>,
        registry: Arc<HandlerRegistry>,
        config: &PollerConfig,
    ) -> Self {
        Self {
            client,
            dispatcher: Dispatcher::new(registry),
            request: config.poll_request(),
        }
    }

    pub fn request(&self) -> &PollRequest {
        &self.request
    }
}

#[async_trait]
impl PollSource for DecisionWorker {
    type Unit = DecisionTask;

    fn kind(&self) -> &'static str {
        "decision"
    }

    fn identity(&self) -> &str {
        &self.request.identity
    }

    async fn poll(&self) -> Result<Option<DecisionTask>> {
        let Some(first) = self
            .client
            .poll_for_decision_task(&self.request, None)
            .await?
        else {
            return Ok(None);
        };

        let mut next_page = first.next_page_token.clone();
        let mut task = DecisionTask::from_first_page(&self.request.domain, first);

        while let Some(token) = next_page.take() {
            let Some(page) = self
                .client
                .poll_for_decision_task(&self.request, Some(&token))
                .await?
            else {
                // The service owes every page it announced
                return Err(RemoteError::Transient(format!(
                    "history page {token} was not delivered"
                ))
                .into());
            };
            debug!(
                workflow = %task.workflow.execution,
                events = page.events.len(),
                "Fetched history page"
            );
            next_page = page.next_page_token.clone();
            task.extend(page);
        }

        Ok(Some(task))
    }

    async fn process(&self, task: DecisionTask, status: &PollerStatus) -> Result<()> {
        status.set(PollerState::Dispatching);

        let DecisionTask {
            task_token,
            workflow,
            previous_started_event_id,
            events,
        } = task;

        let log = EventLog::new(events, previous_started_event_id)?;
        debug!(
            workflow = %workflow.execution,
            events = log.len(),
            new_events = log.new_events().len(),
            "Dispatching decision task"
        );

        let batch = self.dispatcher.dispatch(&log, &workflow)?;

        status.set(PollerState::Reporting);
        self.client
            .respond_decision_task_completed(&task_token, &batch)
            .await?;

        info!(
            identity = %self.request.identity,
            workflow = %workflow.execution,
            decisions = batch.len(),
            "Decision task completed"
        );
        Ok(())
    }

    fn is_fatal(&self, error: &Error) -> bool {
        error.is_fatal()
    }
}
