//! Virtual network for simulation.
//!
//! Every sent message is copied to each other member and held in flight
//! until the harness releases it. Faults act per copy.

use crate::message::Message;
use crate::process::{Membership, ProcessId};
use crate::sim::{FaultConfig, SimRng};
use serde::Serialize;
use std::collections::VecDeque;

/// A copy of a message on its way to one process.
#[derive(Debug, Clone)]
pub struct InFlightMessage {
    pub to: ProcessId,
    pub message: Message,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub messages_duplicated: u64,
}

pub struct VirtualNetwork {
    rng: SimRng,
    config: FaultConfig,
    in_flight: VecDeque<InFlightMessage>,
    stats: NetworkStats,
}

impl VirtualNetwork {
    pub fn new(rng: SimRng, config: FaultConfig) -> Self {
        Self {
            rng,
            config,
            in_flight: VecDeque::new(),
            stats: NetworkStats::default(),
        }
    }

    /// Queue one copy of `message` for every member except its sender.
    pub fn broadcast(&mut self, message: &Message, membership: &Membership) {
        for to in membership.iter().filter(|p| *p != message.sender()) {
            self.send(to.clone(), message.clone());
        }
    }

    pub fn send(&mut self, to: ProcessId, message: Message) {
        self.stats.messages_sent += 1;

        if self.rng.next_bool(self.config.drop_probability) {
            tracing::trace!(to = %to, message_id = %message.id(), "dropped");
            self.stats.messages_dropped += 1;
            return;
        }

        if self.rng.next_bool(self.config.duplicate_probability) {
            self.stats.messages_duplicated += 1;
            self.in_flight.push_back(InFlightMessage {
                to: to.clone(),
                message: message.clone(),
            });
        }
        self.in_flight.push_back(InFlightMessage { to, message });
    }

    /// Release the next copy: oldest first, or a random one when reordering.
    pub fn next_message(&mut self) -> Option<InFlightMessage> {
        let next = if self.config.reorder {
            let idx = self.rng.next_usize(self.in_flight.len());
            self.in_flight.swap_remove_back(idx)
        } else {
            self.in_flight.pop_front()
        };

        if next.is_some() {
            self.stats.messages_delivered += 1;
        }
        next
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockModel;
    use crate::message::MessageId;
    use serde_json::Value;

    fn message(seq: u64) -> Message {
        Message::new(
            MessageId::new(seq),
            ProcessId::from("P1"),
            ClockModel::VectorPartial.zero(3),
            Value::Null,
        )
    }

    fn membership() -> Membership {
        Membership::new(["P1", "P2", "P3"]).unwrap()
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let mut network = VirtualNetwork::new(SimRng::new(1), FaultConfig::none());
        network.broadcast(&message(0), &membership());

        assert_eq!(network.in_flight(), 2);
        let first = network.next_message().unwrap();
        let second = network.next_message().unwrap();
        assert_eq!(first.to.as_str(), "P2");
        assert_eq!(second.to.as_str(), "P3");
        assert!(network.next_message().is_none());
        assert_eq!(network.stats().messages_delivered, 2);
    }

    #[test]
    fn test_everything_dropped() {
        let mut network = VirtualNetwork::new(SimRng::new(1), FaultConfig::none().with_drop(1.0));
        network.broadcast(&message(0), &membership());

        assert!(network.is_idle());
        assert_eq!(network.stats().messages_dropped, 2);
    }

    #[test]
    fn test_duplicates_and_reordering_keep_every_copy() {
        let config = FaultConfig::reordering().with_duplicate(1.0);
        let mut network = VirtualNetwork::new(SimRng::new(9), config);
        for seq in 0..5 {
            network.broadcast(&message(seq), &membership());
        }

        let mut released = Vec::new();
        while let Some(copy) = network.next_message() {
            released.push(copy.message.id().seq());
        }
        released.sort();

        let expected: Vec<u64> = (0..5).flat_map(|seq| [seq; 4]).collect();
        assert_eq!(released, expected);
        assert_eq!(network.stats().messages_duplicated, 10);
    }
}
