//! Messages exchanged between processes.

use crate::clock::Clock;
use crate::process::ProcessId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Unique message identifier within one engine run, displayed as `m<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn seq(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('m').unwrap_or(s).parse().map(Self)
    }
}

/// An immutable message produced by a send.
///
/// The timestamp is a snapshot of the sender's clock taken at send time and
/// never aliases the sender's live clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    sender: ProcessId,
    timestamp: Clock,
    #[serde(default)]
    payload: Value,
}

impl Message {
    pub(crate) fn new(id: MessageId, sender: ProcessId, timestamp: Clock, payload: Value) -> Self {
        Self {
            id,
            sender,
            timestamp,
            payload,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn sender(&self) -> &ProcessId {
        &self.sender
    }

    pub fn timestamp(&self) -> &Clock {
        &self.timestamp
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The payload when it is a plain string, e.g. chat text.
    pub fn text(&self) -> Option<&str> {
        self.payload.as_str()
    }
}
