//! Delivery property checking.
//!
//! Verifies a finished run against the engine's guarantees: clocks never
//! decrease, no message is delivered twice, delivery order respects
//! causality, observers saw history order, and (when the run allows it)
//! nothing is left pending.

use crate::clock::Clock;
use crate::engine::DeliveryEngine;
use crate::message::MessageId;
use crate::observer::Notification;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Result of a property check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub passed: bool,
    pub violations: Vec<Violation>,
}

impl CheckResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    pub fn fail(violations: Vec<Violation>) -> Self {
        Self {
            passed: false,
            violations,
        }
    }

    fn from_violations(violations: Vec<Violation>) -> Self {
        if violations.is_empty() {
            Self::pass()
        } else {
            Self::fail(violations)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.passed
    }

    pub fn error_message(&self) -> Option<String> {
        if self.passed {
            None
        } else {
            Some(
                self.violations
                    .iter()
                    .map(|v| v.description.clone())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub description: String,
    pub process: String,
    pub message_ids: Vec<MessageId>,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A clock component decreased between two deliveries.
    NonMonotonic,
    /// A message id appears twice in one history.
    DuplicateDelivery,
    /// A message was delivered before one that happened before it, or
    /// was delivered by its own sender.
    CausalOrder,
    /// Delivered notifications disagree with the recorded history.
    HistoryMismatch,
    /// A message was still pending, or never arrived, at the end of a run
    /// that should have delivered everything.
    StuckMessage,
}

/// Check `engine` and the notifications recorded while driving it.
///
/// `expect_liveness` additionally requires every process to have delivered
/// every message sent by the others.
pub fn check(
    engine: &DeliveryEngine,
    notifications: &[Notification],
    expect_liveness: bool,
) -> CheckResult {
    let mut violations = Vec::new();
    let mut clocks: HashMap<&str, Vec<(MessageId, &Clock)>> = HashMap::new();

    for notification in notifications {
        if let Notification::Delivered {
            process,
            message_id,
            clock,
        } = notification
        {
            clocks
                .entry(process.as_str())
                .or_default()
                .push((*message_id, clock));
        }
    }

    for state in engine.states() {
        let process = state.id().as_str();
        let history = state.history();
        let observed = clocks.remove(process).unwrap_or_default();

        // monotonicity across successive delivered clocks and the final clock
        let mut previous: Option<(MessageId, &Clock)> = None;
        for &(id, clock) in &observed {
            if let Some((prev_id, prev)) = previous {
                if !clock.dominates(prev) {
                    violations.push(Violation {
                        description: format!(
                            "{process} clock went from {prev} to {clock} delivering {id}"
                        ),
                        process: process.to_string(),
                        message_ids: vec![prev_id, id],
                        kind: ViolationKind::NonMonotonic,
                    });
                }
            }
            previous = Some((id, clock));
        }
        if let Some((id, last)) = previous {
            if !state.clock().dominates(last) {
                violations.push(Violation {
                    description: format!(
                        "{process} final clock {} is behind {last}",
                        state.clock()
                    ),
                    process: process.to_string(),
                    message_ids: vec![id],
                    kind: ViolationKind::NonMonotonic,
                });
            }
        }

        let observed_ids: Vec<MessageId> = observed.iter().map(|(id, _)| *id).collect();
        if observed_ids != history {
            violations.push(Violation {
                description: format!(
                    "{process} notifications {observed_ids:?} differ from history {history:?}"
                ),
                process: process.to_string(),
                message_ids: history.to_vec(),
                kind: ViolationKind::HistoryMismatch,
            });
        }

        let mut seen = HashSet::new();
        for &id in history {
            if !seen.insert(id) {
                violations.push(Violation {
                    description: format!("{process} delivered {id} twice"),
                    process: process.to_string(),
                    message_ids: vec![id],
                    kind: ViolationKind::DuplicateDelivery,
                });
            }
        }

        violations.extend(check_causal_order(engine, process, history));

        if expect_liveness {
            violations.extend(check_liveness(engine, process, &seen, state.pending_len()));
        }
    }

    CheckResult::from_violations(violations)
}

fn check_causal_order(
    engine: &DeliveryEngine,
    process: &str,
    history: &[MessageId],
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let delivered: Vec<_> = history.iter().filter_map(|id| engine.message(*id)).collect();

    for (j, later) in delivered.iter().enumerate() {
        if later.sender().as_str() == process {
            violations.push(Violation {
                description: format!("{process} delivered its own message {}", later.id()),
                process: process.to_string(),
                message_ids: vec![later.id()],
                kind: ViolationKind::CausalOrder,
            });
        }

        let later_vector = later.timestamp().causal_vector();
        for earlier in &delivered[..j] {
            if later_vector.happens_before(&earlier.timestamp().causal_vector()) {
                violations.push(Violation {
                    description: format!(
                        "{process} delivered {} before {} which happened before it",
                        earlier.id(),
                        later.id()
                    ),
                    process: process.to_string(),
                    message_ids: vec![earlier.id(), later.id()],
                    kind: ViolationKind::CausalOrder,
                });
            }
        }
    }

    violations
}

fn check_liveness(
    engine: &DeliveryEngine,
    process: &str,
    delivered: &HashSet<MessageId>,
    pending: usize,
) -> Vec<Violation> {
    let missing: Vec<MessageId> = engine
        .messages()
        .into_iter()
        .filter(|m| m.sender().as_str() != process && !delivered.contains(&m.id()))
        .map(|m| m.id())
        .collect();

    if missing.is_empty() && pending == 0 {
        return Vec::new();
    }

    vec![Violation {
        description: format!("{process} never delivered {missing:?} ({pending} pending)"),
        process: process.to_string(),
        message_ids: missing,
        kind: ViolationKind::StuckMessage,
    }]
}
