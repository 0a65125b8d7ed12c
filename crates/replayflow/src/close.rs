//! Recovery of close decisions the service rejected.
//!
//! Every close decision goes out together with a marker holding its
//! parameters (see [`DecisionBuilder::close_workflow`]). When the service
//! answers with `CompleteWorkflowExecutionFailed`, `FailWorkflowExecutionFailed`
//! or `CancelWorkflowExecutionFailed` (typically because new events arrived
//! in the meantime), the latest marker is read back and the same close
//! decision is issued again.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::ControlPayload;
use crate::decision::{Decision, DecisionBuilder};
use crate::error::Result;
use crate::event::{EventContext, EventType};

/// Name of the marker that stores close-decision parameters.
pub const CLOSE_CONTROL_MARKER: &str = "--close-workflow-control";

/// Parameters of a close decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloseWorkflowControl {
    Complete {
        result: Option<String>,
    },
    Fail {
        reason: Option<String>,
        details: Option<String>,
    },
    Cancel {
        details: Option<String>,
    },
}

impl ControlPayload for CloseWorkflowControl {}

impl CloseWorkflowControl {
    /// The close decision these parameters describe.
    pub fn into_decision(self) -> Decision {
        match self {
            CloseWorkflowControl::Complete { result } => Decision::CompleteWorkflow { result },
            CloseWorkflowControl::Fail { reason, details } => {
                Decision::FailWorkflow { reason, details }
            }
            CloseWorkflowControl::Cancel { details } => Decision::CancelWorkflow { details },
        }
    }

    /// Parameterless control matching the close decision that `failed` reports on.
    pub fn empty_for(failed: EventType) -> Option<Self> {
        match failed {
            EventType::CompleteWorkflowExecutionFailed => {
                Some(CloseWorkflowControl::Complete { result: None })
            }
            EventType::FailWorkflowExecutionFailed => Some(CloseWorkflowControl::Fail {
                reason: None,
                details: None,
            }),
            EventType::CancelWorkflowExecutionFailed => {
                Some(CloseWorkflowControl::Cancel { details: None })
            }
            _ => None,
        }
    }
}

/// Re-issue the close decision whose failure `ctx` reports.
///
/// Returns `false` if `ctx` is not a close-failure event.
pub(crate) fn recover(ctx: &EventContext<'_>, decisions: &mut DecisionBuilder) -> Result<bool> {
    let Some(empty) = CloseWorkflowControl::empty_for(ctx.event_type()) else {
        return Ok(false);
    };

    let recorded = ctx
        .log()
        .latest_marker_details(CLOSE_CONTROL_MARKER)
        .map(CloseWorkflowControl::decode);

    let control = match recorded {
        Some(Ok(control)) => {
            debug!(
                event_id = ctx.event_id(),
                workflow = %ctx.workflow().execution,
                "Re-issuing recorded close decision"
            );
            control
        }
        Some(Err(e)) => {
            warn!(
                event_id = ctx.event_id(),
                workflow = %ctx.workflow().execution,
                error = %e,
                "Close control marker is unreadable, re-issuing close decision without parameters"
            );
            empty
        }
        None => {
            warn!(
                event_id = ctx.event_id(),
                workflow = %ctx.workflow().execution,
                "Close control marker is missing, re-issuing close decision without parameters"
            );
            empty
        }
    };

    decisions.close_workflow(control)?;
    Ok(true)
}
