//! Poller and runtime configuration.

use std::time::Duration;

use uuid::Uuid;

use crate::client::PollRequest;

/// Task list polled when none is configured.
pub const DEFAULT_TASK_LIST: &str = "default";

/// What a poller does when a poll yields nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConsumeMode {
    /// Treat it as a no-op and poll again.
    #[default]
    Repeat,
    /// Treat it as an error and stop.
    FailFast,
}

/// Configuration of one poller.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use replayflow::runtime::PollerConfig;
///
/// let config = PollerConfig {
///     domain: "billing".into(),
///     task_list: "payments".into(),
///     poll_timeout: Some(Duration::from_secs(70)),
///     concurrency: 4,  // Up to 4 tasks in flight per poller
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Identity reported to the service.
    ///
    /// If `None`, one is derived from the runtime identity.
    pub identity: Option<String>,

    /// Domain the workflows live in.
    /// Default: `"default"`.
    pub domain: String,

    /// Task list (queue) to poll.
    /// Default: `"default"`.
    pub task_list: String,

    /// Upper bound on one poll.
    ///
    /// `None` waits until the service ends the long poll itself. A poll that
    /// hits this bound counts as "nothing available".
    /// Default: `None`.
    pub poll_timeout: Option<Duration>,

    /// Units processed at once by one poller.
    ///
    /// Decision pollers should keep this at 1: decision tasks of one
    /// workflow must not be processed concurrently.
    /// Default: 1.
    pub concurrency: usize,

    /// Pause after a failed poll before polling again.
    /// Default: 1 second.
    pub poll_error_backoff: Duration,

    /// Behavior when a poll yields nothing.
    /// Default: [`ConsumeMode::Repeat`].
    pub consume_mode: ConsumeMode,

    /// Maximum time to wait for in-flight units when stopping.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl PollerConfig {
    /// The poll request this configuration describes.
    ///
    /// Without a configured identity, a random one is used.
    pub fn poll_request(&self) -> PollRequest {
        PollRequest {
            domain: self.domain.clone(),
            task_list: self.task_list.clone(),
            identity: self
                .identity
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            identity: None,
            domain: "default".to_string(),
            task_list: DEFAULT_TASK_LIST.to_string(),
            poll_timeout: None,
            concurrency: 1,
            poll_error_backoff: Duration::from_secs(1),
            consume_mode: ConsumeMode::Repeat,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration of a [`WorkerRuntime`](super::WorkerRuntime).
///
/// # Example
///
/// ```
/// use replayflow::runtime::{PollerConfig, RuntimeConfig};
///
/// let config = RuntimeConfig {
///     identity: Some("billing-host-1".into()),
///     decision_pollers: 2,
///     task_pollers: 4,
///     poller: PollerConfig {
///         task_list: "payments".into(),
///         ..Default::default()
///     },
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Base identity for every poller of the runtime.
    ///
    /// Pollers report `"{identity}-decision"` and `"{identity}-task"`, with
    /// an index suffix when there is more than one of a kind. If `None`, a
    /// UUID is generated at build time.
    pub identity: Option<String>,

    /// Number of decision pollers. Default: 1.
    pub decision_pollers: usize,

    /// Number of task pollers. Default: 1.
    pub task_pollers: usize,

    /// Settings shared by every poller.
    pub poller: PollerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            identity: None,
            decision_pollers: 1,
            task_pollers: 1,
            poller: PollerConfig::default(),
        }
    }
}
