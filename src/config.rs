// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! JSON analysis configuration.
//!
//! Every field is optional; command-line flags override what the file
//! provides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::converge::SearchConfig;
use crate::scenario::{CapturePolicy, SignalSet};
use crate::table::TableError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Clock net name.
    pub clock: Option<String>,
    /// Input nets, in scenario key order.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Scope path of the monitored nets in the VCD, e.g. `tb/dut`.
    pub vcd_scope: Option<String>,
    /// Whether the stimulus enumerates all input transitions.
    pub exhaustive: bool,
    /// Overrides the capture edge implied by `exhaustive`.
    pub capture: Option<CapturePolicy>,
    pub search: SearchConfig,
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let file = std::fs::File::open(path)
            .map_err(|e| TableError::Io(format!("{}: {}", path.display(), e)))?;
        let reader = std::io::BufReader::new(file);
        let config: AnalysisConfig = serde_json::from_reader(reader)?;
        clilog::info!("Loaded analysis config: {:?}", config);
        Ok(config)
    }

    /// Capture edge in effect.
    pub fn capture_policy(&self) -> CapturePolicy {
        self.capture
            .unwrap_or_else(|| CapturePolicy::for_mode(self.exhaustive))
    }

    /// The declared nets. A clock and at least one output are required.
    pub fn signals(&self) -> Result<SignalSet, TableError> {
        let clock = self
            .clock
            .as_deref()
            .ok_or_else(|| TableError::Schema("no clock net configured".into()))?;
        if self.outputs.is_empty() {
            return Err(TableError::Schema("no output nets configured".into()));
        }
        Ok(SignalSet::new(clock, &self.inputs[..], &self.outputs[..]))
    }
}
