//! Error types for causal delivery.

use crate::message::MessageId;
use crate::process::ProcessId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while driving the delivery engine.
#[derive(Error, Debug)]
pub enum CausalError {
    /// Receive referenced a message id that no prior send produced
    #[error("message {0} was never sent")]
    UnknownMessage(MessageId),

    /// Script step referenced a label that no prior send step bound
    #[error("message label `{0}` was never sent")]
    UnknownLabel(String),

    /// Command referenced a process outside the fixed membership
    #[error("process `{0}` is not a member")]
    UnknownProcess(String),

    /// A defensive check failed: a clock went backwards, a message was
    /// about to enter history twice, or clock shapes disagree
    #[error("invariant violated at {process}: {detail}")]
    InvariantViolation { process: ProcessId, detail: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The mailbox task of a process is no longer running
    #[error("mailbox of {0} is closed")]
    MailboxClosed(ProcessId),
}

impl CausalError {
    /// Classify this error for observers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownMessage(_) | Self::UnknownLabel(_) => ErrorKind::UnknownMessage,
            Self::UnknownProcess(_) => ErrorKind::UnknownProcess,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            Self::Config(_) => ErrorKind::Config,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::MailboxClosed(_) => ErrorKind::Transport,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Nothing the engine reports is transient; inputs that are merely not
    /// ready yet are buffered, not failed.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Check if this error indicates corrupted engine state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation { .. } | Self::UnknownProcess(_) | Self::Config(_)
        )
    }
}

/// Closed error taxonomy carried by [`Notification::Error`](crate::Notification::Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownMessage,
    UnknownProcess,
    InvariantViolation,
    Config,
    Serialization,
    Transport,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownMessage => "unknown_message",
            Self::UnknownProcess => "unknown_process",
            Self::InvariantViolation => "invariant_violation",
            Self::Config => "config",
            Self::Serialization => "serialization",
            Self::Transport => "transport",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for causal delivery operations
pub type Result<T> = std::result::Result<T, CausalError>;
