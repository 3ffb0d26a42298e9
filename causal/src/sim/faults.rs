//! Fault injection for the virtual network.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transport misbehaviour applied to every copy of a message in flight.
///
/// Probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Probability of losing a copy.
    pub drop_probability: f64,
    /// Probability of delivering a copy twice.
    pub duplicate_probability: f64,
    /// Release in-flight copies in random order instead of FIFO.
    pub reorder: bool,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl FaultConfig {
    /// Reliable FIFO network.
    pub fn none() -> Self {
        Self {
            drop_probability: 0.0,
            duplicate_probability: 0.0,
            reorder: false,
        }
    }

    /// Arbitrary reordering plus duplicates; nothing is lost, so every
    /// message must eventually be delivered under the partial vector model.
    pub fn reordering() -> Self {
        Self {
            drop_probability: 0.0,
            duplicate_probability: 0.1,
            reorder: true,
        }
    }

    /// Reordering, duplicates and drops.
    pub fn chaotic() -> Self {
        Self {
            drop_probability: 0.05,
            duplicate_probability: 0.2,
            reorder: true,
        }
    }

    pub fn with_drop(mut self, probability: f64) -> Self {
        self.drop_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn with_duplicate(mut self, probability: f64) -> Self {
        self.duplicate_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// True when no copy can be lost.
    pub fn is_lossless(&self) -> bool {
        self.drop_probability == 0.0
    }
}

/// Named fault presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPreset {
    #[default]
    None,
    Reordering,
    Chaotic,
}

impl FaultPreset {
    pub const ALL: [FaultPreset; 3] = [Self::None, Self::Reordering, Self::Chaotic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Reordering => "reordering",
            Self::Chaotic => "chaotic",
        }
    }

    pub fn config(&self) -> FaultConfig {
        match self {
            Self::None => FaultConfig::none(),
            Self::Reordering => FaultConfig::reordering(),
            Self::Chaotic => FaultConfig::chaotic(),
        }
    }
}

impl fmt::Display for FaultPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.as_str() == s)
            .ok_or_else(|| format!("unknown fault preset `{s}` (none, reordering, chaotic)"))
    }
}
