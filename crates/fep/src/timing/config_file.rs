// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timing configuration file.
//!
//! Overrides step listener settings per participant:
//!
//! ```toml
//! [participants.vehicle]
//! system_timeout_s = 30
//!
//! [participants.vehicle.steps.dynamics]
//! cycle_time_us = 10000
//! max_runtime_us = 2000
//! runtime_violation = "warn"
//! inputs = ["throttle"]
//! outputs = ["speed"]
//! ```

use super::types::StepConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Timing settings of one participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantTiming {
    /// Client system timeout in seconds.
    #[serde(default)]
    pub system_timeout_s: Option<i64>,

    /// Step listener configurations by step name.
    #[serde(default)]
    pub steps: BTreeMap<String, StepConfig>,
}

/// Parsed timing configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfiguration {
    #[serde(default)]
    pub participants: BTreeMap<String, ParticipantTiming>,
}

impl TimingConfiguration {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Entry of `participant`, if any.
    pub fn participant(&self, participant: &str) -> Option<&ParticipantTiming> {
        self.participants.get(participant)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for (name, participant) in &self.participants {
            if let Some(timeout) = participant.system_timeout_s {
                if timeout <= 0 {
                    return Err(Error::Config(format!(
                        "participant '{}': system_timeout_s must be > 0 (got {})",
                        name, timeout
                    )));
                }
            }
            for (step, config) in &participant.steps {
                config.validate().map_err(|e| {
                    Error::Config(format!("participant '{}', step '{}': {}", name, step, e))
                })?;
            }
        }
        Ok(())
    }
}
