// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Endpoint arrival times reported by a static timing tool.
//!
//! The report is a JSON document of the form
//! `{"endpoint_timing": [{"node_identifier": .., "T_arr": ..}, ..]}` with
//! arrival times in seconds. They are converted to picoseconds, the unit of
//! the simulated delays.

use compact_str::CompactString;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

use crate::table::TableError;

/// Seconds to picoseconds.
pub const SECONDS_TO_PS: f64 = 1e12;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeId {
    Int(i64),
    Str(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Seconds {
    Num(f64),
    Str(String),
}

#[derive(Debug, Deserialize)]
struct EndpointEntry {
    node_identifier: NodeId,
    #[serde(rename = "T_arr")]
    t_arr: Seconds,
}

#[derive(Debug, Deserialize)]
struct EndpointReport {
    endpoint_timing: Vec<EndpointEntry>,
}

/// Arrival time per endpoint in picoseconds, in report order. A node
/// listed twice keeps its last arrival.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointTiming {
    arrivals: IndexMap<CompactString, f64>,
}

impl EndpointTiming {
    pub fn from_json_str(text: &str) -> Result<Self, TableError> {
        let report: EndpointReport = serde_json::from_str(text)?;
        let mut arrivals = IndexMap::with_capacity(report.endpoint_timing.len());
        for entry in report.endpoint_timing {
            let node: CompactString = match entry.node_identifier {
                NodeId::Int(i) => compact_str::format_compact!("{}", i),
                NodeId::Str(s) => s.into(),
            };
            let seconds = match entry.t_arr {
                Seconds::Num(x) => x,
                Seconds::Str(s) => s.trim().parse::<f64>().map_err(|_| {
                    TableError::Json(format!("endpoint {}: bad T_arr '{}'", node, s))
                })?,
            };
            arrivals.insert(node, seconds * SECONDS_TO_PS);
        }
        Ok(EndpointTiming { arrivals })
    }

    pub fn load(path: &Path) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TableError::Io(format!("{}: {}", path.display(), e)))?;
        let timing = Self::from_json_str(&text)?;
        clilog::info!(
            "Loaded arrival times of {} endpoints from {}",
            timing.len(),
            path.display()
        );
        Ok(timing)
    }

    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }

    /// Arrival time of `node` in picoseconds.
    pub fn arrival_ps(&self, node: &str) -> Option<f64> {
        self.arrivals.get(node).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.arrivals.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Endpoint with the latest arrival.
    pub fn worst(&self) -> Option<(&str, f64)> {
        self.iter().max_by(|a, b| a.1.total_cmp(&b.1))
    }
}
