//! Scheduling options for tasks and workflow executions.
//!
//! Every duration-valued option travels on the wire as whole seconds, or as
//! the literal `"NONE"` when the option means "no timeout". [`Timeout`] owns
//! that encoding in both directions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Wire literal for "no timeout".
pub const NO_TIMEOUT: &str = "NONE";

/// A duration-valued option that may be disabled.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use replayflow::Timeout;
///
/// assert_eq!("NONE".parse::<Timeout>().unwrap(), Timeout::Unlimited);
/// assert_eq!("30".parse::<Timeout>().unwrap(), Timeout::After(Duration::from_secs(30)));
/// assert_eq!(Timeout::Unlimited.to_string(), "NONE");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// No timeout (`"NONE"` on the wire).
    Unlimited,
    /// Time out after the given duration. On the wire, fractions round up to
    /// the next whole second.
    After(Duration),
}

impl Timeout {
    /// A timeout of `secs` seconds.
    pub fn secs(secs: u64) -> Self {
        Timeout::After(Duration::from_secs(secs))
    }

    /// Returns the duration, or `None` when unlimited.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Timeout::Unlimited => None,
            Timeout::After(duration) => Some(*duration),
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Unlimited => f.write_str(NO_TIMEOUT),
            Timeout::After(duration) => {
                let partial = u64::from(duration.subsec_nanos() > 0);
                write!(f, "{}", duration.as_secs().saturating_add(partial))
            }
        }
    }
}

impl FromStr for Timeout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == NO_TIMEOUT {
            return Ok(Timeout::Unlimited);
        }
        s.parse::<u64>()
            .map(Timeout::secs)
            .map_err(|_| Error::InvalidTimeout(s.to_string()))
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

impl Serialize for Timeout {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timeout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Options for one scheduled task.
///
/// Every field is optional: unset fields fall back to the defaults registered
/// for the task type (see [`merged_over`](Self::merged_over)), and after that
/// to whatever the service has on record for the type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Queue (task list) the task is delivered on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_list: Option<String>,

    /// Delivery priority; higher runs first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Total time from scheduling to completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_timeout: Option<Timeout>,

    /// Time a task may wait in the queue before a worker picks it up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_to_start_timeout: Option<Timeout>,

    /// Time a worker may spend executing the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_timeout: Option<Timeout>,

    /// Maximum gap between heartbeats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout: Option<Timeout>,
}

impl TaskOptions {
    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_total_timeout(mut self, timeout: Timeout) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    pub fn with_wait_to_start_timeout(mut self, timeout: Timeout) -> Self {
        self.wait_to_start_timeout = Some(timeout);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Timeout) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Timeout) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    /// Layer these per-call overrides over `defaults`.
    pub fn merged_over(&self, defaults: &TaskOptions) -> TaskOptions {
        TaskOptions {
            task_list: self.task_list.clone().or_else(|| defaults.task_list.clone()),
            priority: self.priority.or(defaults.priority),
            total_timeout: self.total_timeout.or(defaults.total_timeout),
            wait_to_start_timeout: self.wait_to_start_timeout.or(defaults.wait_to_start_timeout),
            execution_timeout: self.execution_timeout.or(defaults.execution_timeout),
            heartbeat_timeout: self.heartbeat_timeout.or(defaults.heartbeat_timeout),
        }
    }
}

/// Options a workflow execution was started with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOptions {
    /// Queue (task list) decision tasks are delivered on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_list: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Total time the execution may stay open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_timeout: Option<Timeout>,

    /// Time a decider may spend on one decision task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_timeout: Option<Timeout>,
}
