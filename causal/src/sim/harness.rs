//! Simulation harness.

use crate::clock::ClockModel;
use crate::config::EngineConfig;
use crate::engine::{DeliveryEngine, EngineStats};
use crate::error::{CausalError, Result};
use crate::message::MessageId;
use crate::observer::RecordingObserver;
use crate::sim::{check, CheckResult, FaultConfig, NetworkStats, SimRng, VirtualNetwork};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Random interleaving of sends and network releases over one engine.
pub struct Simulation {
    seed: u64,
    engine: DeliveryEngine,
    network: VirtualNetwork,
    rng: SimRng,
    recorder: Arc<RecordingObserver>,
}

/// Outcome of [`Simulation::run`].
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub seed: u64,
    pub model: ClockModel,
    pub sent: usize,
    pub network: NetworkStats,
    pub engine: EngineStats,
    /// Delivered ids per process, in membership order.
    pub histories: Vec<(String, Vec<MessageId>)>,
    pub liveness_checked: bool,
    pub check: CheckResult,
}

impl SimReport {
    pub fn passed(&self) -> bool {
        self.check.is_ok()
    }
}

impl Simulation {
    pub fn new(config: EngineConfig, faults: FaultConfig, seed: u64) -> Result<Self> {
        let rng = SimRng::new(seed);
        let network_rng = SimRng::new(rng.next_u64());

        let mut engine = DeliveryEngine::new(config)?;
        let recorder = RecordingObserver::new();
        engine.subscribe(recorder.clone());

        Ok(Self {
            seed,
            engine,
            network: VirtualNetwork::new(network_rng, faults),
            rng,
            recorder,
        })
    }

    /// Perform `sends` sends from random processes, interleaved with
    /// random releases from the network, then release everything left.
    pub fn run(&mut self, sends: usize) -> Result<SimReport> {
        let width = self.engine.membership().len();
        let mut sent = 0;

        while sent < sends || !self.network.is_idle() {
            let send_now = sent < sends && (self.network.is_idle() || self.rng.next_bool(0.5));

            if send_now {
                let index = self.rng.next_usize(width);
                let process = self
                    .engine
                    .membership()
                    .get(index)
                    .cloned()
                    .ok_or_else(|| CausalError::UnknownProcess(index.to_string()))?;
                let message = self.engine.send(process.as_str(), Value::from(sent as u64))?;
                self.network.broadcast(&message, self.engine.membership());
                sent += 1;
            } else if let Some(copy) = self.network.next_message() {
                self.engine.receive_message(copy.to.as_str(), &copy.message)?;
            }
        }

        let liveness_checked = self.expects_liveness();
        let check = check(&self.engine, &self.recorder.notifications(), liveness_checked);
        if !check.is_ok() {
            tracing::warn!(
                seed = self.seed,
                "simulation check failed: {:?}",
                check.error_message()
            );
        }

        Ok(SimReport {
            seed: self.seed,
            model: self.engine.model(),
            sent,
            network: self.network.stats(),
            engine: self.engine.stats(),
            histories: self
                .engine
                .states()
                .map(|s| (s.id().to_string(), s.history().to_vec()))
                .collect(),
            liveness_checked,
            check,
        })
    }

    /// Only the partial vector model with a lossless network guarantees
    /// that every message is eventually delivered. The merging models
    /// count deliveries as local events, which later messages from other
    /// processes cannot account for.
    fn expects_liveness(&self) -> bool {
        self.engine.model() == ClockModel::VectorPartial
            && self.network.stats().messages_dropped == 0
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn engine(&self) -> &DeliveryEngine {
        &self.engine
    }

    pub fn network(&self) -> &VirtualNetwork {
        &self.network
    }

    pub fn recorder(&self) -> &Arc<RecordingObserver> {
        &self.recorder
    }
}
