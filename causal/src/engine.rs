//! Single-threaded delivery engine.
//!
//! The engine owns one [`ProcessState`] per member and a registry of every
//! message sent since the last reset. It accepts three commands:
//!
//! - **Send**: advance the sender's clock, snapshot it into a new message,
//!   then drain the sender's pending set.
//! - **Receive**: deliver the message if it is deliverable (then drain),
//!   otherwise buffer it.
//! - **Reset**: return every process to its creation-time state and forget
//!   all sent messages.
//!
//! Message ids are never reused, not even across resets, so a message still
//! travelling when the engine was reset can never pass for a newer one.
//!
//! Commands run to completion, drain included, before the next one is
//! accepted. Every failed command is reported to the observers as
//! [`Notification::Error`](crate::Notification::Error) and returned.

use crate::clock::{Clock, ClockModel};
use crate::config::EngineConfig;
use crate::error::{CausalError, Result};
use crate::message::{Message, MessageId};
use crate::metrics;
use crate::observer::{Observer, Observers};
use crate::process::Membership;
use crate::state::{ProcessState, ReceiveOutcome, StateEvent};
use crate::tracing_ext;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Counters since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub sent: u64,
    pub delivered: u64,
    pub buffered: u64,
    /// Receives absorbed because the message was already pending or delivered.
    pub duplicates: u64,
    pub errors: u64,
    /// Messages currently pending across all processes.
    pub pending: usize,
}

impl EngineStats {
    pub(crate) fn count(&mut self, event: &StateEvent) {
        match event {
            StateEvent::Delivered { .. } => self.delivered += 1,
            StateEvent::Buffered { .. } => self.buffered += 1,
        }
    }
}

/// Causal delivery engine driven by one caller at a time.
pub struct DeliveryEngine {
    config: EngineConfig,
    membership: Membership,
    processes: Vec<ProcessState>,
    messages: HashMap<MessageId, Message>,
    next_id: u64,
    observers: Observers,
    stats: EngineStats,
}

impl DeliveryEngine {
    /// Create an engine with every process at its initial state.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let membership = config.membership()?;
        let processes = membership
            .iter()
            .enumerate()
            .map(|(index, id)| ProcessState::new(id.clone(), index, config.model, membership.len()))
            .collect();

        Ok(Self {
            config,
            membership,
            processes,
            messages: HashMap::new(),
            next_id: 0,
            observers: Observers::default(),
            stats: EngineStats::default(),
        })
    }

    /// Default membership (`P1`, `P2`, `P3`) with the given model.
    pub fn with_model(model: ClockModel) -> Result<Self> {
        Self::new(EngineConfig::with_model(model))
    }

    /// Register an observer for every future notification.
    pub fn subscribe(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Command `Send(process, payload)`.
    ///
    /// Returns the new message; its id is what `receive` expects.
    pub fn send<P: Into<Value>>(&mut self, process: &str, payload: P) -> Result<Message> {
        let _span = tracing_ext::send_span(process, self.config.model.as_str()).entered();
        let result = self.send_inner(process, payload.into());
        self.check(result)
    }

    fn send_inner(&mut self, process: &str, payload: Value) -> Result<Message> {
        let index = self.membership.resolve(process)?;
        let state = &mut self.processes[index];
        let timestamp = state.stamp(self.config.model)?;

        let id = MessageId::new(self.next_id);
        self.next_id += 1;

        let message = Message::new(id, state.id().clone(), timestamp, payload);
        tracing::debug!(process, message_id = %id, timestamp = %message.timestamp(), "sent");
        self.messages.insert(id, message.clone());
        self.stats.sent += 1;
        metrics::record_sent();

        // a send cannot unblock its own pending messages, but the contract
        // is to re-check after every command
        self.drain_index(index)?;

        Ok(message)
    }

    /// Command `Receive(process, message_id)`.
    ///
    /// Fails with `UnknownMessage` if no send since the last reset produced
    /// `id`; the receiving process is left untouched in that case.
    pub fn receive(&mut self, process: &str, id: MessageId) -> Result<ReceiveOutcome> {
        let _span = tracing_ext::receive_span(process, &id.to_string()).entered();
        let result = self.receive_by_id(process, id);
        self.check(result)
    }

    fn receive_by_id(&mut self, process: &str, id: MessageId) -> Result<ReceiveOutcome> {
        self.membership.resolve(process)?;
        let message = self
            .messages
            .get(&id)
            .cloned()
            .ok_or(CausalError::UnknownMessage(id))?;

        self.receive_inner(process, &message)
    }

    /// Receive a message value handed over by a transport.
    ///
    /// The message must have been sent since the last reset: anything else
    /// fails with `UnknownMessage`, and the registered copy is what gets
    /// delivered.
    ///
    /// A process receiving its own message gets [`ReceiveOutcome::OwnMessage`]
    /// and nothing changes. Broadcasts never address the sender, so this is
    /// logged as a driver mistake.
    pub fn receive_message(&mut self, process: &str, message: &Message) -> Result<ReceiveOutcome> {
        let _span = tracing_ext::receive_span(process, &message.id().to_string()).entered();
        let result = self.receive_by_id(process, message.id());
        self.check(result)
    }

    fn receive_inner(&mut self, process: &str, message: &Message) -> Result<ReceiveOutcome> {
        let index = self.membership.resolve(process)?;
        let sender = self.membership.resolve(message.sender().as_str())?;

        let observers = &self.observers;
        let stats = &mut self.stats;
        let state = &mut self.processes[index];
        let pid = state.id().clone();

        let outcome = state.receive(
            self.config.model,
            message,
            sender,
            self.config.check_invariants,
            &mut |event| {
                stats.count(&event);
                observers.publish(&pid, event);
            },
        );
        metrics::set_pending(pid.as_str(), state.pending_len());

        let outcome = outcome?;
        if matches!(
            outcome,
            ReceiveOutcome::AlreadyPending | ReceiveOutcome::AlreadyDelivered
        ) {
            self.stats.duplicates += 1;
            metrics::record_duplicate();
        }

        Ok(outcome)
    }

    /// Deliver whatever in `process`'s pending set has become deliverable.
    pub fn drain_pending(&mut self, process: &str) -> Result<Vec<MessageId>> {
        let _span = tracing_ext::drain_span(process).entered();
        let result = self
            .membership
            .resolve(process)
            .and_then(|index| self.drain_index(index));
        self.check(result)
    }

    fn drain_index(&mut self, index: usize) -> Result<Vec<MessageId>> {
        let observers = &self.observers;
        let stats = &mut self.stats;
        let state = &mut self.processes[index];
        let pid = state.id().clone();

        let drained = state.drain(self.config.model, self.config.check_invariants, &mut |event| {
            stats.count(&event);
            observers.publish(&pid, event);
        });
        metrics::set_pending(pid.as_str(), state.pending_len());

        drained
    }

    /// Command `Reset()`: every process back to a zero clock, empty history
    /// and empty pending set; all sent messages are forgotten.
    pub fn reset(&mut self) {
        for state in &mut self.processes {
            state.reset(self.config.model);
            metrics::set_pending(state.id().as_str(), 0);
        }
        self.messages.clear();
        self.stats = EngineStats::default();
        tracing::info!(model = %self.config.model, "engine reset");
    }

    /// Report an error raised on behalf of this engine, e.g. by a script
    /// driver, exactly like a failed command.
    pub fn report_error(&mut self, err: &CausalError) {
        self.stats.errors += 1;
        self.observers.report(err);
    }

    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.report_error(e);
        }
        result
    }

    pub fn state(&self, process: &str) -> Result<&ProcessState> {
        let index = self.membership.resolve(process)?;
        Ok(&self.processes[index])
    }

    /// All process states in membership order.
    pub fn states(&self) -> impl Iterator<Item = &ProcessState> {
        self.processes.iter()
    }

    pub fn clock(&self, process: &str) -> Result<&Clock> {
        self.state(process).map(ProcessState::clock)
    }

    pub fn history(&self, process: &str) -> Result<&[MessageId]> {
        self.state(process).map(ProcessState::history)
    }

    /// Pending message ids of `process` in insertion order.
    pub fn pending(&self, process: &str) -> Result<Vec<MessageId>> {
        Ok(self.state(process)?.pending().map(Message::id).collect())
    }

    /// A message sent since the last reset.
    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id)
    }

    /// Every message sent since the last reset, in send order.
    pub fn messages(&self) -> Vec<&Message> {
        let mut messages: Vec<_> = self.messages.values().collect();
        messages.sort_by_key(|m| m.id());
        messages
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn model(&self) -> ClockModel {
        self.config.model
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            pending: self.processes.iter().map(ProcessState::pending_len).sum(),
            ..self.stats
        }
    }
}
