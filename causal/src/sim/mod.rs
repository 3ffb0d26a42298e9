//! Deterministic simulation.
//!
//! Drives an engine with random sends over a virtual network that reorders,
//! duplicates and drops copies, then checks the delivery properties on the
//! result. Same seed, same run.
//!
//! ```
//! use causal::sim::{FaultConfig, Simulation};
//! use causal::EngineConfig;
//!
//! let mut sim = Simulation::new(EngineConfig::default(), FaultConfig::reordering(), 42).unwrap();
//! let report = sim.run(50).unwrap();
//! assert!(report.passed());
//! ```

mod checker;
mod faults;
mod harness;
mod network;
mod rng;

pub use checker::{check, CheckResult, Violation, ViolationKind};
pub use faults::{FaultConfig, FaultPreset};
pub use harness::{SimReport, Simulation};
pub use network::{InFlightMessage, NetworkStats, VirtualNetwork};
pub use rng::SimRng;
