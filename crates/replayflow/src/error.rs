//! Error types for replayflow.

use thiserror::Error;

use crate::client::RemoteError;
use crate::event::{ContextName, EventCategory, EventType, Facet, TaskType};

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by user-supplied event handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in replayflow operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A decision task was delivered without any history events.
    #[error("event history is empty")]
    EmptyHistory,

    /// The delivered ids do not run from 1 without gaps, so the history is partial.
    ///
    /// Dispatching against a partial history would corrupt every handler's
    /// view of the workflow, so this is never retried.
    #[error("event history is incomplete: event {missing_event_id} is missing")]
    IncompleteHistory {
        /// The lowest id absent from the delivered events.
        missing_event_id: i64,
    },

    /// An event belongs to a category that has no dispatch key.
    #[error("event {event_id} belongs to the {category} category, which cannot be dispatched")]
    UnsupportedCategory {
        /// The offending event.
        event_id: i64,
        /// Its category.
        category: EventCategory,
    },

    /// A handler asked a context for a facet its event type does not carry.
    #[error("{event_type} events do not carry the {facet} facet")]
    MissingFacet {
        /// The facet that was requested.
        facet: Facet,
        /// The type of the event behind the context.
        event_type: EventType,
    },

    /// An event of a dispatchable category carries uninterpreted attributes.
    #[error("event {event_id} of type {event_type} carries attributes of an unsupported shape")]
    MismatchedAttributes {
        /// The offending event.
        event_id: i64,
        /// Its declared type.
        event_type: EventType,
    },

    /// An event points at another event that is not in the history.
    #[error("event {event_id} references {referenced}, which is not a {expected} event in the history")]
    MissingReference {
        /// The event holding the reference.
        event_id: i64,
        /// The referenced event id or task id.
        referenced: String,
        /// The event type the reference should resolve to.
        expected: EventType,
    },

    /// Failed to encode or decode a control payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A timeout value was neither whole seconds nor `"NONE"`.
    #[error("invalid timeout value: {0:?}")]
    InvalidTimeout(String),

    /// The remote workflow service rejected or failed a call.
    #[error("remote service error: {0}")]
    Remote(#[from] RemoteError),

    /// A registered event handler returned an error.
    #[error("handler for event {event_id} ({event_type}) failed: {source}")]
    Handler {
        /// The event being dispatched.
        event_id: i64,
        /// Its type.
        event_type: EventType,
        /// The handler's error.
        #[source]
        source: BoxError,
    },

    /// A fail-fast poller found nothing to consume.
    #[error("no {0} unit available")]
    NoUnitAvailable(&'static str),

    /// Processing a polled unit panicked.
    #[error("{kind} unit panicked: {message}")]
    UnitPanicked {
        /// The poller kind (`decision` or `task`).
        kind: &'static str,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// An event handler was registered more than once for the same key.
    #[error("duplicate handler registration: {event_type} for {name}")]
    DuplicateHandler {
        /// The event type of the duplicate key.
        event_type: EventType,
        /// The context name of the duplicate key.
        name: ContextName,
    },

    /// A handler was registered under a name that its event type never produces.
    #[error("{event_type} events are never keyed by {name}")]
    InvalidHandlerKey {
        /// The event type of the rejected key.
        event_type: EventType,
        /// The context name of the rejected key.
        name: ContextName,
    },

    /// A task executor was registered more than once for the same task type.
    #[error("duplicate task executor registration: {0}")]
    DuplicateExecutor(TaskType),
}

impl Error {
    /// Returns `true` if the error must stop a decision loop.
    ///
    /// Remote failures are transient from the loop's point of view: the
    /// service redelivers an unanswered decision task once it times out.
    /// Everything else means local state or user code is broken.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Remote(_))
    }

    pub(crate) fn handler(event_id: i64, event_type: EventType, source: BoxError) -> Self {
        Error::Handler {
            event_id,
            event_type,
            source,
        }
    }

    pub(crate) fn missing_reference(
        event_id: i64,
        referenced: impl ToString,
        expected: EventType,
    ) -> Self {
        Error::MissingReference {
            event_id,
            referenced: referenced.to_string(),
            expected,
        }
    }
}
