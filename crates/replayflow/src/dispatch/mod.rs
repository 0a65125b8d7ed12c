//! Routing new history events to handlers.
//!
//! - [`HandlerRegistry`] — `(event type, context name) → handler`, built once
//! - [`Dispatcher`] — runs one decision cycle over an [`EventLog`]
//!
//! Before a user handler sees an event, two framework interceptors run:
//! close-decision recovery (see [`crate::close`]) and the retry engine
//! (see [`crate::retry`]). Either may consume the event.

mod registry;

use std::sync::Arc;

use tracing::{debug, trace};

pub use registry::{EventHandler, FnHandler, HandlerKey, HandlerRegistry, HandlerRegistryBuilder};

use crate::close;
use crate::decision::{DecisionBatch, DecisionBuilder};
use crate::error::{Error, Result};
use crate::event::{EventContext, EventLog, WorkflowInfo};
use crate::retry::{self, RetryOutcome};

/// Runs decision cycles against a shared [`HandlerRegistry`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Dispatch every new event of `log`, oldest first, and return the
    /// decisions the cycle produced.
    ///
    /// Events without a registered handler are skipped. The first error
    /// aborts the cycle and no decisions are returned.
    pub fn dispatch(&self, log: &EventLog, workflow: &WorkflowInfo) -> Result<DecisionBatch> {
        let mut decisions = self.registry.decision_builder();

        for event in log.new_events() {
            let ctx = EventContext::extract(event, log, workflow)?;
            self.dispatch_one(&ctx, &mut decisions)?;
        }

        debug!(
            workflow = %workflow.execution,
            decisions = decisions.len(),
            "Decision cycle dispatched"
        );
        Ok(decisions.into_batch())
    }

    fn dispatch_one(&self, ctx: &EventContext<'_>, decisions: &mut DecisionBuilder) -> Result<()> {
        if close::recover(ctx, decisions)? {
            return Ok(());
        }

        let outcome = retry::intercept(self.registry.retry_policies(), ctx, decisions)?;
        if outcome == RetryOutcome::Handled {
            return Ok(());
        }

        let name = ctx.name();
        match self.registry.get(ctx.event_type(), &name) {
            Some(handler) => {
                trace!(
                    event_id = ctx.event_id(),
                    event_type = %ctx.event_type(),
                    name = %name,
                    "Dispatching event"
                );
                handler
                    .handle(ctx, decisions)
                    .map_err(|source| Error::handler(ctx.event_id(), ctx.event_type(), source))
            }
            None if outcome == RetryOutcome::Exhausted => fail_exhausted(ctx, decisions),
            None => Ok(()),
        }
    }
}

/// Fail the workflow with the failure of a task whose retries ran out.
fn fail_exhausted(ctx: &EventContext<'_>, decisions: &mut DecisionBuilder) -> Result<()> {
    let Some(task) = ctx.task() else {
        return Ok(());
    };
    let reason = task
        .reason
        .or(task.cause)
        .map(|reason| format!("{}: {reason}", task.task_type))
        .unwrap_or_else(|| format!("{}: {}", task.task_type, ctx.event_type()));

    debug!(
        workflow = %ctx.workflow().execution,
        task_type = %task.task_type,
        "Failing workflow after exhausted retries"
    );
    decisions.fail_workflow(Some(reason), task.details.map(String::from))
}
