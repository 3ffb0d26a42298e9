//! Tracing span helpers.
//!
//! # Spans
//!
//! The following spans are emitted under target `causal`:
//!
//! - `causal.engine.send` - a send command
//! - `causal.engine.receive` - a receive command, including its drain
//! - `causal.engine.drain` - an explicit drain command
//! - `causal.script.step` - one step of a script

use tracing::{info_span, Span};

/// Span names.
pub mod span_names {
    pub const SEND: &str = "causal.engine.send";
    pub const RECEIVE: &str = "causal.engine.receive";
    pub const DRAIN: &str = "causal.engine.drain";
    pub const SCRIPT_STEP: &str = "causal.script.step";
}

pub fn send_span(process: &str, model: &str) -> Span {
    info_span!(
        target: "causal",
        "causal.engine.send",
        process = %process,
        model = %model,
        otel.name = span_names::SEND,
    )
}

pub fn receive_span(process: &str, message_id: &str) -> Span {
    info_span!(
        target: "causal",
        "causal.engine.receive",
        process = %process,
        message_id = %message_id,
        otel.name = span_names::RECEIVE,
    )
}

pub fn drain_span(process: &str) -> Span {
    info_span!(
        target: "causal",
        "causal.engine.drain",
        process = %process,
        otel.name = span_names::DRAIN,
    )
}

pub fn script_step_span(script: &str, step: usize) -> Span {
    info_span!(
        target: "causal",
        "causal.script.step",
        script = %script,
        step = step,
        otel.name = span_names::SCRIPT_STEP,
    )
}
