//! Delivery metrics through the `metrics` facade.
//!
//! No recorder is installed by this crate; without one every call is a no-op.
//!
//! # Metrics
//!
//! ## Counters
//! - `causal_messages_sent_total`
//! - `causal_messages_delivered_total` - by `path` (`direct`, `drained`)
//! - `causal_messages_buffered_total`
//! - `causal_duplicates_total` - receives absorbed as no-ops
//! - `causal_errors_total` - by `kind`
//!
//! ## Gauges
//! - `causal_pending_messages` - pending set size by `process`

use crate::error::ErrorKind;
use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const SENT_TOTAL: &str = "causal_messages_sent_total";
    pub const DELIVERED_TOTAL: &str = "causal_messages_delivered_total";
    pub const BUFFERED_TOTAL: &str = "causal_messages_buffered_total";
    pub const DUPLICATES_TOTAL: &str = "causal_duplicates_total";
    pub const ERRORS_TOTAL: &str = "causal_errors_total";
    pub const PENDING_MESSAGES: &str = "causal_pending_messages";
}

/// Delivery path labels.
pub mod path {
    pub const DIRECT: &str = "direct";
    pub const DRAINED: &str = "drained";
}

pub fn record_sent() {
    counter!(names::SENT_TOTAL).increment(1);
}

pub fn record_delivered(drained: bool) {
    let path = if drained { path::DRAINED } else { path::DIRECT };
    counter!(names::DELIVERED_TOTAL, "path" => path).increment(1);
}

pub fn record_buffered() {
    counter!(names::BUFFERED_TOTAL).increment(1);
}

pub fn record_duplicate() {
    counter!(names::DUPLICATES_TOTAL).increment(1);
}

pub fn record_error(kind: ErrorKind) {
    counter!(names::ERRORS_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Set the pending set size of a process.
pub fn set_pending(process: &str, count: usize) {
    gauge!(names::PENDING_MESSAGES, "process" => process.to_string()).set(count as f64);
}
