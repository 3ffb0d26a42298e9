//! Thread-safe delivery engine.
//!
//! [`SharedEngine`] gives every process its own lock, so commands that
//! target different processes run in parallel while commands on the same
//! process are serialized. A receive and the drain it triggers run under a
//! single hold of the receiver's lock, which keeps the single-caller
//! guarantees per process.
//!
//! Lock order is process (ascending membership position) before the message
//! registry. Observers run while the affected process is locked.

use crate::clock::{Clock, ClockModel};
use crate::config::EngineConfig;
use crate::engine::EngineStats;
use crate::error::{CausalError, Result};
use crate::message::{Message, MessageId};
use crate::metrics;
use crate::observer::{Observer, Observers};
use crate::process::Membership;
use crate::state::{ProcessState, ReceiveOutcome, StateEvent};
use crate::tracing_ext;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    delivered: AtomicU64,
    buffered: AtomicU64,
    duplicates: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn count(&self, event: &StateEvent) {
        match event {
            StateEvent::Delivered { .. } => self.delivered.fetch_add(1, Ordering::Relaxed),
            StateEvent::Buffered { .. } => self.buffered.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn clear(&self) {
        for counter in [
            &self.sent,
            &self.delivered,
            &self.buffered,
            &self.duplicates,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Causal delivery engine safe to share between threads and tasks.
pub struct SharedEngine {
    config: EngineConfig,
    membership: Membership,
    processes: Vec<Mutex<ProcessState>>,
    messages: RwLock<HashMap<MessageId, Message>>,
    next_id: AtomicU64,
    observers: RwLock<Observers>,
    counters: Counters,
}

impl SharedEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let membership = config.membership()?;
        let processes = membership
            .iter()
            .enumerate()
            .map(|(index, id)| {
                Mutex::new(ProcessState::new(
                    id.clone(),
                    index,
                    config.model,
                    membership.len(),
                ))
            })
            .collect();

        Ok(Self {
            config,
            membership,
            processes,
            messages: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            observers: RwLock::new(Observers::default()),
            counters: Counters::default(),
        })
    }

    /// Convenience constructor returning the engine behind an `Arc`.
    pub fn shared(config: EngineConfig) -> Result<Arc<Self>> {
        Self::new(config).map(Arc::new)
    }

    /// Register an observer. Must not be called from inside an observer.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) {
        self.observers.write().push(observer);
    }

    pub fn send<P: Into<Value>>(&self, process: &str, payload: P) -> Result<Message> {
        let _span = tracing_ext::send_span(process, self.config.model.as_str()).entered();
        let result = self.send_inner(process, payload.into());
        self.check(result)
    }

    fn send_inner(&self, process: &str, payload: Value) -> Result<Message> {
        let index = self.membership.resolve(process)?;
        let mut state = self.processes[index].lock();
        let timestamp = state.stamp(self.config.model)?;

        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let message = Message::new(id, state.id().clone(), timestamp, payload);
        self.messages.write().insert(id, message.clone());
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        metrics::record_sent();
        tracing::debug!(process, message_id = %id, timestamp = %message.timestamp(), "sent");

        self.drain_locked(&mut state)?;

        Ok(message)
    }

    /// Receive a message sent since the last reset, by id.
    pub fn receive(&self, process: &str, id: MessageId) -> Result<ReceiveOutcome> {
        let _span = tracing_ext::receive_span(process, &id.to_string()).entered();
        let result = self.receive_inner(process, id);
        self.check(result)
    }

    /// Receive a message value handed over by a transport. Only its id is
    /// trusted; a message from before the last reset is `UnknownMessage`.
    pub fn receive_message(&self, process: &str, message: &Message) -> Result<ReceiveOutcome> {
        let _span = tracing_ext::receive_span(process, &message.id().to_string()).entered();
        let result = self.receive_inner(process, message.id());
        self.check(result)
    }

    fn receive_inner(&self, process: &str, id: MessageId) -> Result<ReceiveOutcome> {
        let index = self.membership.resolve(process)?;
        let mut state = self.processes[index].lock();

        // looked up under the receiver's lock: a reset needs that lock too,
        // so it cannot clear the registry between lookup and delivery
        let message = self
            .messages
            .read()
            .get(&id)
            .cloned()
            .ok_or(CausalError::UnknownMessage(id))?;
        let sender = self.membership.resolve(message.sender().as_str())?;

        let observers = self.observers.read();
        let pid = state.id().clone();

        let outcome = state.receive(
            self.config.model,
            &message,
            sender,
            self.config.check_invariants,
            &mut |event| {
                self.counters.count(&event);
                observers.publish(&pid, event);
            },
        );
        metrics::set_pending(pid.as_str(), state.pending_len());

        let outcome = outcome?;
        if matches!(
            outcome,
            ReceiveOutcome::AlreadyPending | ReceiveOutcome::AlreadyDelivered
        ) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            metrics::record_duplicate();
        }

        Ok(outcome)
    }

    pub fn drain_pending(&self, process: &str) -> Result<Vec<MessageId>> {
        let _span = tracing_ext::drain_span(process).entered();
        let result = self
            .membership
            .resolve(process)
            .and_then(|index| self.drain_locked(&mut self.processes[index].lock()));
        self.check(result)
    }

    fn drain_locked(&self, state: &mut ProcessState) -> Result<Vec<MessageId>> {
        let observers = self.observers.read();
        let pid = state.id().clone();

        let drained = state.drain(self.config.model, self.config.check_invariants, &mut |event| {
            self.counters.count(&event);
            observers.publish(&pid, event);
        });
        metrics::set_pending(pid.as_str(), state.pending_len());

        drained
    }

    /// Reset every process and forget all sent messages. Ids keep counting
    /// up, so messages still queued somewhere are rejected afterwards.
    ///
    /// Takes every process lock, so it waits for in-flight commands and
    /// no command observes a half-reset engine.
    pub fn reset(&self) {
        let mut guards: Vec<_> = self.processes.iter().map(|p| p.lock()).collect();
        for state in guards.iter_mut() {
            state.reset(self.config.model);
            metrics::set_pending(state.id().as_str(), 0);
        }
        self.messages.write().clear();
        self.counters.clear();
        tracing::info!(model = %self.config.model, "engine reset");
    }

    pub fn report_error(&self, err: &CausalError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.observers.read().report(err);
    }

    fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.report_error(e);
        }
        result
    }

    /// Snapshot of one process.
    pub fn state(&self, process: &str) -> Result<ProcessState> {
        let index = self.membership.resolve(process)?;
        Ok(self.processes[index].lock().clone())
    }

    /// Snapshot of every process, taken under all locks at once.
    pub fn states(&self) -> Vec<ProcessState> {
        let guards: Vec<_> = self.processes.iter().map(|p| p.lock()).collect();
        guards.iter().map(|state| (**state).clone()).collect()
    }

    pub fn clock(&self, process: &str) -> Result<Clock> {
        let index = self.membership.resolve(process)?;
        Ok(self.processes[index].lock().clock().clone())
    }

    pub fn history(&self, process: &str) -> Result<Vec<MessageId>> {
        let index = self.membership.resolve(process)?;
        Ok(self.processes[index].lock().history().to_vec())
    }

    pub fn pending(&self, process: &str) -> Result<Vec<MessageId>> {
        let index = self.membership.resolve(process)?;
        Ok(self.processes[index].lock().pending().map(Message::id).collect())
    }

    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.messages.read().get(&id).cloned()
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
            sent: self.counters.sent.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            buffered: self.counters.buffered.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            pending: self.processes.iter().map(|p| p.lock().pending_len()).sum(),
        }
    }
}
