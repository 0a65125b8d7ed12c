//! Encoding of control payloads attached to timers and markers.
//!
//! Timers and markers carry opaque strings that the service hands back
//! verbatim when the timer fires or the marker is read from history. The
//! framework stores its own structured state there (retry bookkeeping,
//! close-decision parameters) as JSON.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;

/// A value that can travel through a timer or marker payload.
///
/// `decode(encode(x)) == x` holds for every implementor.
pub trait ControlPayload: Serialize + DeserializeOwned {
    /// Encode the value into an opaque payload string.
    fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a payload string produced by [`encode`](Self::encode).
    fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
