//! Notifications emitted by the engine and the observers that consume them.
//!
//! The engine never depends on what an observer does with a notification.
//! Within one command, notifications are emitted in delivery order, so an
//! observer that appends them to a log sees each process's history order.

use crate::clock::Clock;
use crate::error::{CausalError, ErrorKind};
use crate::message::MessageId;
use crate::metrics;
use crate::process::ProcessId;
use crate::state::StateEvent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event reported to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A message entered the process's history; `clock` is the receiver's
    /// clock right after delivery.
    Delivered {
        process: ProcessId,
        message_id: MessageId,
        clock: Clock,
    },
    /// A message is not deliverable yet and was put in the pending set.
    Buffered {
        process: ProcessId,
        message_id: MessageId,
    },
    /// A command failed.
    Error { kind: ErrorKind, context: String },
}

impl Notification {
    pub(crate) fn error(err: &CausalError) -> Self {
        Self::Error {
            kind: err.kind(),
            context: err.to_string(),
        }
    }

    /// Process this notification concerns, if any.
    pub fn process(&self) -> Option<&ProcessId> {
        match self {
            Self::Delivered { process, .. } | Self::Buffered { process, .. } => Some(process),
            Self::Error { .. } => None,
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::Delivered { message_id, .. } | Self::Buffered { message_id, .. } => {
                Some(*message_id)
            }
            Self::Error { .. } => None,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered {
                process,
                message_id,
                clock,
            } => match clock {
                Clock::Vector(_) => write!(f, "{process} delivers {message_id} {clock}"),
                Clock::Matrix(_) => write!(f, "{process} delivers {message_id}\n{clock}"),
            },
            Self::Buffered {
                process,
                message_id,
            } => write!(f, "{process} buffers {message_id} (pending)"),
            Self::Error { kind, context } => write!(f, "error [{kind}]: {context}"),
        }
    }
}

/// Consumer of engine notifications.
///
/// Observers are called while the engine holds the affected process, so
/// they must not issue commands back into the same engine.
pub trait Observer: Send + Sync {
    fn notify(&self, notification: &Notification);
}

impl<F> Observer for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn notify(&self, notification: &Notification) {
        self(notification)
    }
}

/// Fan-out list held by an engine.
#[derive(Clone, Default)]
pub(crate) struct Observers(Vec<Arc<dyn Observer>>);

impl Observers {
    pub fn push(&mut self, observer: Arc<dyn Observer>) {
        self.0.push(observer);
    }

    pub fn notify(&self, notification: &Notification) {
        for observer in &self.0 {
            observer.notify(notification);
        }
    }

    /// Turn a process state change into a notification and fan it out.
    pub fn publish(&self, process: &ProcessId, event: StateEvent) {
        let notification = match event {
            StateEvent::Delivered {
                message_id,
                clock,
                drained,
            } => {
                metrics::record_delivered(drained);
                Notification::Delivered {
                    process: process.clone(),
                    message_id,
                    clock,
                }
            }
            StateEvent::Buffered { message_id } => {
                metrics::record_buffered();
                Notification::Buffered {
                    process: process.clone(),
                    message_id,
                }
            }
        };
        self.notify(&notification);
    }

    /// Log, count and fan out a command failure.
    pub fn report(&self, err: &CausalError) {
        if err.is_fatal() {
            tracing::error!(kind = %err.kind(), "{}", err);
        } else {
            tracing::warn!(kind = %err.kind(), "{}", err);
        }
        metrics::record_error(err.kind());
        self.notify(&Notification::error(err));
    }
}

/// Keeps every notification in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    log: Mutex<Vec<Notification>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Copy of everything recorded so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.log.lock().clone()
    }

    /// Drain the recorded notifications.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.log.lock())
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    /// Delivered message ids of one process, in delivery order.
    pub fn delivered_to(&self, process: &str) -> Vec<MessageId> {
        self.log
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Delivered {
                    process: p,
                    message_id,
                    ..
                } if p.as_str() == process => Some(*message_id),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ErrorKind> {
        self.log
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Error { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn notify(&self, notification: &Notification) {
        self.log.lock().push(notification.clone());
    }
}

/// Writes every notification as a `tracing` event under target `causal`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::Delivered {
                process,
                message_id,
                clock,
            } => {
                tracing::info!(
                    target: "causal",
                    %process,
                    %message_id,
                    clock = %clock,
                    "delivered"
                );
            }
            Notification::Buffered {
                process,
                message_id,
            } => {
                tracing::info!(target: "causal", %process, %message_id, "buffered");
            }
            Notification::Error { kind, context } => {
                tracing::warn!(target: "causal", %kind, "{}", context);
            }
        }
    }
}

/// Forwards notifications into an unbounded tokio channel.
///
/// Notifications emitted after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Observer for ChannelObserver {
    fn notify(&self, notification: &Notification) {
        let _ = self.tx.send(notification.clone());
    }
}
