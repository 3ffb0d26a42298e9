//! Causal message delivery.
//!
//! Processes exchange messages that may arrive in any order. Each process
//! delivers a message to the application only once everything it causally
//! depends on has been delivered; messages that arrive too early wait in a
//! pending set and are released by a fixed-point drain.
//!
//! Three clock models are available, selected per engine:
//!
//! - **`vector-partial`**: vector clocks; a delivery copies only the
//!   sender's counter.
//! - **`vector-merge`**: vector clocks; a delivery merges the whole
//!   timestamp and counts as a local event.
//! - **`matrix`**: matrix clocks; deliverability looks at the diagonal,
//!   the other cells carry second-hand knowledge.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   commands   ┌────────────────┐  notifications  ┌──────────┐
//! │ ScriptRunner │ ───────────▶ │ DeliveryEngine │ ──────────────▶ │ Observer │
//! │  Simulation  │              │  SharedEngine  │                 └──────────┘
//! └──────────────┘              └───────┬────────┘
//!                                       │ one per process
//!                                       ▼
//!                               ┌────────────────┐
//!                               │  ProcessState  │── ClockModel
//!                               └────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use causal::{ClockModel, DeliveryEngine, ReceiveOutcome};
//!
//! let mut engine = DeliveryEngine::with_model(ClockModel::VectorPartial)?;
//! let m0 = engine.send("P1", "first")?;
//! let m1 = engine.send("P1", "second")?;
//!
//! // m1 arrives first and has to wait for m0
//! assert_eq!(engine.receive("P2", m1.id())?, ReceiveOutcome::Buffered);
//! assert_eq!(
//!     engine.receive("P2", m0.id())?,
//!     ReceiveOutcome::Delivered { drained: vec![m1.id()] }
//! );
//! assert_eq!(engine.clock("P2")?.to_string(), "[2, 0, 0]");
//! # Ok::<(), causal::CausalError>(())
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod metrics;
pub mod observer;
pub mod process;
pub mod script;
pub mod shared;
pub mod sim;
pub mod state;
pub mod tracing_ext;

pub use clock::{Clock, ClockMismatch, ClockModel, MatrixClock, VectorClock};
pub use config::{ConfigBuilder, EngineConfig, DEFAULT_MODEL, DEFAULT_PROCESSES};
pub use engine::{DeliveryEngine, EngineStats};
pub use error::{CausalError, ErrorKind, Result};
pub use mailbox::Mailboxes;
pub use message::{Message, MessageId};
pub use observer::{ChannelObserver, Notification, Observer, RecordingObserver, TracingObserver};
pub use process::{Membership, ProcessId};
pub use script::{
    Command, RunSummary, Script, ScriptRunner, Step, StepOutcome, StepResult, BUILTIN_SCRIPTS,
};
pub use shared::SharedEngine;
pub use state::{ProcessState, ReceiveOutcome};
