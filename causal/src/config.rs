//! Engine configuration and defaults.

use crate::clock::ClockModel;
use crate::error::{CausalError, Result};
use crate::process::Membership;
use serde::{Deserialize, Serialize};

/// Process names used when none are configured.
pub const DEFAULT_PROCESSES: [&str; 3] = ["P1", "P2", "P3"];

/// Clock model used when none is configured.
pub const DEFAULT_MODEL: ClockModel = ClockModel::VectorPartial;

/// Configuration for a delivery engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Process names in clock order. Membership is closed.
    pub processes: Vec<String>,

    /// Timestamp algebra shared by every process.
    pub model: ClockModel,

    /// Abort a delivery that would move a clock backwards or record a
    /// message twice.
    pub check_invariants: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            processes: DEFAULT_PROCESSES.iter().map(|p| p.to_string()).collect(),
            model: DEFAULT_MODEL,
            check_invariants: true,
        }
    }
}

impl EngineConfig {
    /// Default membership with the given model.
    pub fn with_model(model: ClockModel) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration and build its membership.
    pub fn membership(&self) -> Result<Membership> {
        Membership::new(self.processes.iter().cloned())
    }

    pub fn validate(&self) -> Result<()> {
        self.membership().map(|_| ())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    processes: Option<Vec<String>>,
    model: Option<ClockModel>,
    check_invariants: Option<bool>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the membership.
    pub fn processes<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.processes = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Append one process to the membership.
    pub fn process<N: Into<String>>(mut self, name: N) -> Self {
        self.processes.get_or_insert_with(Vec::new).push(name.into());
        self
    }

    pub fn model(mut self, model: ClockModel) -> Self {
        self.model = Some(model);
        self
    }

    pub fn check_invariants(mut self, enabled: bool) -> Self {
        self.check_invariants = Some(enabled);
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let defaults = EngineConfig::default();
        let config = EngineConfig {
            processes: self.processes.unwrap_or(defaults.processes),
            model: self.model.unwrap_or(defaults.model),
            check_invariants: self.check_invariants.unwrap_or(defaults.check_invariants),
        };

        if config.processes.is_empty() {
            return Err(CausalError::Config("at least one process is required".to_owned()));
        }
        config.validate()?;

        Ok(config)
    }
}
