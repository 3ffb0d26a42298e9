//! One mailbox task per process.
//!
//! Each process gets an unbounded tokio channel and a task that feeds every
//! message it receives into [`SharedEngine::receive_message`]. Messages
//! posted to the same process are handled in posting order; different
//! processes progress independently.

use crate::error::{CausalError, Result};
use crate::message::Message;
use crate::process::ProcessId;
use crate::shared::SharedEngine;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Running mailbox tasks of an engine.
pub struct Mailboxes {
    engine: Arc<SharedEngine>,
    senders: HashMap<ProcessId, mpsc::UnboundedSender<Message>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Mailboxes {
    /// Spawn one task per member. Must be called inside a tokio runtime.
    pub fn spawn(engine: Arc<SharedEngine>) -> Self {
        let mut senders = HashMap::new();
        let mut tasks = Vec::new();

        for process in engine.membership().iter() {
            let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
            let engine = engine.clone();
            let pid = process.clone();

            tasks.push(tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    // failures already went to the observers
                    if let Err(e) = engine.receive_message(pid.as_str(), &message) {
                        tracing::debug!(process = %pid, error = %e, "mailbox receive failed");
                    }
                }
                tracing::debug!(process = %pid, "mailbox closed");
            }));
            senders.insert(process.clone(), tx);
        }

        Self {
            engine,
            senders,
            tasks,
        }
    }

    /// Queue `message` for delivery at `process`.
    pub fn post(&self, process: &str, message: Message) -> Result<()> {
        let (pid, tx) = self
            .senders
            .get_key_value(process)
            .ok_or_else(|| CausalError::UnknownProcess(process.to_string()))?;

        tx.send(message)
            .map_err(|_| CausalError::MailboxClosed(pid.clone()))
    }

    /// Queue `message` at every member except its sender.
    pub fn broadcast(&self, message: &Message) -> Result<()> {
        for process in self.engine.membership().iter() {
            if process != message.sender() {
                self.post(process.as_str(), message.clone())?;
            }
        }
        Ok(())
    }

    pub fn engine(&self) -> &Arc<SharedEngine> {
        &self.engine
    }

    /// Close every mailbox and wait until queued messages are handled.
    pub async fn shutdown(self) {
        drop(self.senders);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "mailbox task failed");
            }
        }
    }
}
