//! Per-process delivery state.
//!
//! A process owns its clock, the ordered history of delivered message ids
//! and the pending set of messages that arrived too early. From one
//! process's point of view a message moves `unknown -> pending -> delivered`
//! and never leaves `delivered`.

use crate::clock::{Clock, ClockMismatch, ClockModel};
use crate::error::{CausalError, Result};
use crate::message::{Message, MessageId};
use crate::process::ProcessId;
use std::collections::HashSet;

/// What happened to a received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Delivered right away; `drained` lists pending messages delivered
    /// afterwards, in delivery order.
    Delivered { drained: Vec<MessageId> },
    /// Not deliverable yet; now pending.
    Buffered,
    /// Already pending; nothing changed.
    AlreadyPending,
    /// Already in history; nothing changed.
    AlreadyDelivered,
    /// The receiver is the sender; nothing changed.
    OwnMessage,
}

impl ReceiveOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// True for the outcomes that left the process untouched.
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            Self::AlreadyPending | Self::AlreadyDelivered | Self::OwnMessage
        )
    }
}

/// State change reported by [`ProcessState`] while it handles a message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StateEvent {
    Delivered {
        message_id: MessageId,
        clock: Clock,
        drained: bool,
    },
    Buffered {
        message_id: MessageId,
    },
}

/// Clock, history and pending buffer of one process.
#[derive(Debug, Clone)]
pub struct ProcessState {
    id: ProcessId,
    index: usize,
    clock: Clock,
    history: Vec<MessageId>,
    delivered: HashSet<MessageId>,
    /// Insertion order decides which message is tried first on a drain pass.
    pending: Vec<(usize, Message)>,
    pending_ids: HashSet<MessageId>,
}

impl ProcessState {
    /// Fresh state: zero clock, empty history, nothing pending.
    pub fn new(id: ProcessId, index: usize, model: ClockModel, width: usize) -> Self {
        Self {
            id,
            index,
            clock: model.zero(width),
            history: Vec::new(),
            delivered: HashSet::new(),
            pending: Vec::new(),
            pending_ids: HashSet::new(),
        }
    }

    /// Return to the creation-time state.
    pub fn reset(&mut self, model: ClockModel) {
        self.clock = model.zero(self.clock.width());
        self.history.clear();
        self.delivered.clear();
        self.pending.clear();
        self.pending_ids.clear();
    }

    pub fn id(&self) -> &ProcessId {
        &self.id
    }

    /// Membership position of this process.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Delivered message ids in delivery order.
    pub fn history(&self) -> &[MessageId] {
        &self.history
    }

    pub fn has_delivered(&self, id: &MessageId) -> bool {
        self.delivered.contains(id)
    }

    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.pending_ids.contains(id)
    }

    /// Pending messages in insertion order.
    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.pending.iter().map(|(_, message)| message)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Advance the clock for a local send and return the timestamp.
    pub fn stamp(&mut self, model: ClockModel) -> Result<Clock> {
        model
            .advance_on_send(&mut self.clock, self.index)
            .map_err(|e| self.mismatch(e))
    }

    /// Deliver `message` if it is deliverable, otherwise buffer it.
    ///
    /// `sender` is the membership position of `message.sender()`. Every
    /// delivery and buffering is reported through `sink` in the order it
    /// happens.
    pub(crate) fn receive(
        &mut self,
        model: ClockModel,
        message: &Message,
        sender: usize,
        check: bool,
        sink: &mut dyn FnMut(StateEvent),
    ) -> Result<ReceiveOutcome> {
        let id = message.id();

        if sender == self.index {
            tracing::warn!(process = %self.id, message_id = %id, "ignoring own message");
            return Ok(ReceiveOutcome::OwnMessage);
        }
        if self.delivered.contains(&id) {
            tracing::debug!(process = %self.id, message_id = %id, "already delivered");
            return Ok(ReceiveOutcome::AlreadyDelivered);
        }
        if self.pending_ids.contains(&id) {
            tracing::debug!(process = %self.id, message_id = %id, "already pending");
            return Ok(ReceiveOutcome::AlreadyPending);
        }

        if self.deliverable(model, message, sender)? {
            let clock = self.deliver(model, message, sender, check)?;
            sink(StateEvent::Delivered {
                message_id: id,
                clock,
                drained: false,
            });
            let drained = self.drain(model, check, sink)?;
            return Ok(ReceiveOutcome::Delivered { drained });
        }

        tracing::debug!(process = %self.id, message_id = %id, "buffering");
        self.pending_ids.insert(id);
        self.pending.push((sender, message.clone()));
        sink(StateEvent::Buffered { message_id: id });

        Ok(ReceiveOutcome::Buffered)
    }

    /// Deliver pending messages until a full pass delivers nothing.
    ///
    /// Each pass walks the pending set in insertion order and delivers every
    /// message deliverable at that point. Every productive pass removes at
    /// least one message, so there are at most `pending_len() + 1` passes.
    pub(crate) fn drain(
        &mut self,
        model: ClockModel,
        check: bool,
        sink: &mut dyn FnMut(StateEvent),
    ) -> Result<Vec<MessageId>> {
        let mut drained = Vec::new();

        loop {
            let mut progressed = false;
            let mut i = 0;

            while i < self.pending.len() {
                let (sender, message) = &self.pending[i];
                if !self.deliverable(model, message, *sender)? {
                    i += 1;
                    continue;
                }

                let (sender, message) = self.pending.remove(i);
                self.pending_ids.remove(&message.id());

                let clock = match self.deliver(model, &message, sender, check) {
                    Ok(clock) => clock,
                    Err(e) => {
                        // keep the message pending; the clock is untouched
                        self.pending_ids.insert(message.id());
                        self.pending.insert(i, (sender, message));
                        return Err(e);
                    }
                };

                tracing::debug!(
                    process = %self.id,
                    message_id = %message.id(),
                    "delivered from pending"
                );
                drained.push(message.id());
                sink(StateEvent::Delivered {
                    message_id: message.id(),
                    clock,
                    drained: true,
                });
                progressed = true;
            }

            if !progressed {
                break;
            }
        }

        Ok(drained)
    }

    fn deliverable(&self, model: ClockModel, message: &Message, sender: usize) -> Result<bool> {
        model
            .is_deliverable(&self.clock, message.timestamp(), sender)
            .map_err(|e| self.mismatch(e))
    }

    /// Apply the model's delivery rule and record the id in history.
    ///
    /// With `check` set, a delivery that would record an id twice or move
    /// any clock entry backwards is rejected and leaves the state untouched.
    /// `receive` and `drain` only call this for fresh, deliverable messages,
    /// so these checks are defensive and never fire on well-formed input.
    fn deliver(
        &mut self,
        model: ClockModel,
        message: &Message,
        sender: usize,
        check: bool,
    ) -> Result<Clock> {
        let id = message.id();

        if check && self.delivered.contains(&id) {
            return Err(self.violation(format!("{id} would be delivered twice")));
        }

        let mut next = self.clock.clone();
        model
            .apply_on_deliver(&mut next, message.timestamp(), sender, self.index)
            .map_err(|e| self.mismatch(e))?;

        if check && !next.dominates(&self.clock) {
            return Err(self.violation(format!(
                "delivering {id} would move clock {} back to {next}",
                self.clock
            )));
        }
        let sender_entry = next.causal_vector().get(sender);
        if check && sender_entry < message.timestamp().causal_vector().get(sender) {
            return Err(self.violation(format!(
                "delivering {id} left the sender entry behind its timestamp"
            )));
        }

        self.clock = next;
        self.history.push(id);
        self.delivered.insert(id);

        Ok(self.clock.clone())
    }

    fn mismatch(&self, err: ClockMismatch) -> CausalError {
        self.violation(err.to_string())
    }

    fn violation(&self, detail: String) -> CausalError {
        tracing::error!(process = %self.id, "{}", detail);
        CausalError::InvariantViolation {
            process: self.id.clone(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VectorClock;
    use serde_json::Value;

    fn sender_and_receiver(model: ClockModel) -> (ProcessState, ProcessState) {
        (
            ProcessState::new(ProcessId::from("A"), 0, model, 3),
            ProcessState::new(ProcessId::from("B"), 1, model, 3),
        )
    }

    fn send(state: &mut ProcessState, model: ClockModel, seq: u64) -> Message {
        let timestamp = state.stamp(model).unwrap();
        Message::new(MessageId::new(seq), state.id().clone(), timestamp, Value::Null)
    }

    fn vector(counters: &[u64]) -> Clock {
        Clock::Vector(VectorClock::from_counters(counters.to_vec()))
    }

    #[test]
    fn test_out_of_order_then_drain() {
        let model = ClockModel::VectorPartial;
        let (mut a, mut b) = sender_and_receiver(model);
        let m0 = send(&mut a, model, 0);
        let m1 = send(&mut a, model, 1);

        let mut events = Vec::new();
        let mut sink = |e: StateEvent| events.push(e);

        let outcome = b.receive(model, &m1, 0, true, &mut sink).unwrap();
        assert_eq!(outcome, ReceiveOutcome::Buffered);
        assert!(b.is_pending(&m1.id()));

        let outcome = b.receive(model, &m0, 0, true, &mut sink).unwrap();
        assert_eq!(
            outcome,
            ReceiveOutcome::Delivered {
                drained: vec![m1.id()]
            }
        );

        assert_eq!(b.history(), &[m0.id(), m1.id()]);
        assert_eq!(b.clock(), &vector(&[2, 0, 0]));
        assert_eq!(b.pending_len(), 0);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], StateEvent::Buffered { .. }));
        assert!(matches!(events[2], StateEvent::Delivered { drained: true, .. }));
    }

    #[test]
    fn test_duplicates_are_noops() {
        let model = ClockModel::VectorMerge;
        let (mut a, mut b) = sender_and_receiver(model);
        let m0 = send(&mut a, model, 0);
        let m1 = send(&mut a, model, 1);
        let mut sink = |_: StateEvent| {};

        b.receive(model, &m1, 0, true, &mut sink).unwrap();
        assert_eq!(
            b.receive(model, &m1, 0, true, &mut sink).unwrap(),
            ReceiveOutcome::AlreadyPending
        );
        assert_eq!(b.pending_len(), 1);

        b.receive(model, &m0, 0, true, &mut sink).unwrap();
        assert_eq!(
            b.receive(model, &m0, 0, true, &mut sink).unwrap(),
            ReceiveOutcome::AlreadyDelivered
        );
        assert_eq!(b.history().len(), 2);
    }

    #[test]
    fn test_own_message_ignored() {
        let model = ClockModel::VectorPartial;
        let (mut a, _) = sender_and_receiver(model);
        let m0 = send(&mut a, model, 0);
        let mut sink = |_: StateEvent| {};

        let outcome = a.receive(model, &m0, 0, true, &mut sink).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(a.pending_len(), 0);
        assert!(a.history().is_empty());
    }

    #[test]
    fn test_drain_chain_in_one_call() {
        let model = ClockModel::VectorPartial;
        let (mut a, mut b) = sender_and_receiver(model);
        let messages: Vec<_> = (0..5).map(|seq| send(&mut a, model, seq)).collect();
        let mut sink = |_: StateEvent| {};

        for message in messages.iter().skip(1).rev() {
            b.receive(model, message, 0, true, &mut sink).unwrap();
        }
        assert_eq!(b.pending_len(), 4);

        let outcome = b.receive(model, &messages[0], 0, true, &mut sink).unwrap();
        assert_eq!(
            outcome,
            ReceiveOutcome::Delivered {
                drained: messages[1..].iter().map(Message::id).collect()
            }
        );
        assert_eq!(b.clock(), &vector(&[5, 0, 0]));
    }

    #[test]
    fn test_shape_mismatch_is_violation() {
        let (_, mut b) = sender_and_receiver(ClockModel::VectorPartial);
        let foreign = Message::new(
            MessageId::new(0),
            ProcessId::from("A"),
            ClockModel::Matrix.zero(3),
            Value::Null,
        );
        let mut sink = |_: StateEvent| {};

        let err = b
            .receive(ClockModel::VectorPartial, &foreign, 0, true, &mut sink)
            .unwrap_err();
        assert!(matches!(err, CausalError::InvariantViolation { .. }));
        assert_eq!(b.pending_len(), 0);
        assert_eq!(b.clock(), &vector(&[0, 0, 0]));
    }

    #[test]
    fn test_deliver_rejects_second_delivery() {
        let model = ClockModel::VectorMerge;
        let (mut a, mut b) = sender_and_receiver(model);
        let m0 = send(&mut a, model, 0);
        b.deliver(model, &m0, 0, true).unwrap();
        let before = b.clock().clone();

        let err = b.deliver(model, &m0, 0, true).unwrap_err();

        assert!(matches!(err, CausalError::InvariantViolation { .. }));
        assert_eq!(b.history(), &[m0.id()]);
        assert_eq!(b.clock(), &before);
    }

    #[test]
    fn test_deliver_rejects_clock_moving_back() {
        let model = ClockModel::VectorPartial;
        let (mut a, mut b) = sender_and_receiver(model);
        let m0 = send(&mut a, model, 0);
        let m1 = send(&mut a, model, 1);
        b.deliver(model, &m0, 0, true).unwrap();
        b.deliver(model, &m1, 0, true).unwrap();

        // an old timestamp under a fresh id would copy A's entry back to 1
        let replayed = Message::new(
            MessageId::new(9),
            a.id().clone(),
            vector(&[1, 0, 0]),
            Value::Null,
        );
        let err = b.deliver(model, &replayed, 0, true).unwrap_err();

        assert!(matches!(err, CausalError::InvariantViolation { .. }));
        assert_eq!(b.clock(), &vector(&[2, 0, 0]));
        assert_eq!(b.history(), &[m0.id(), m1.id()]);

        // unchecked, the same delivery goes through
        b.deliver(model, &replayed, 0, false).unwrap();
        assert_eq!(b.clock(), &vector(&[1, 0, 0]));
        assert_eq!(b.history().len(), 3);
    }

    #[test]
    fn test_reset() {
        let model = ClockModel::Matrix;
        let (mut a, mut b) = sender_and_receiver(model);
        let m0 = send(&mut a, model, 0);
        let m1 = send(&mut a, model, 1);
        let mut sink = |_: StateEvent| {};
        b.receive(model, &m1, 0, true, &mut sink).unwrap();
        b.receive(model, &m0, 0, true, &mut sink).unwrap();

        a.reset(model);
        b.reset(model);

        assert_eq!(a.clock(), &model.zero(3));
        assert_eq!(b.clock(), &model.zero(3));
        assert!(b.history().is_empty());
        assert_eq!(b.pending_len(), 0);
        assert!(!b.has_delivered(&m0.id()));
    }
}
