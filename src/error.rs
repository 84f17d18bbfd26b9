// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Errors raised while turning waveforms into transition scenarios.
//!
//! Every variant here aborts the extraction: a partially built scenario
//! table is not trustworthy, so callers propagate these with `?` up to the
//! binary, which reports them and exits with status 1.

use crate::logic::TransitionClass;
use crate::waveform::Time;

/// Failure while extracting transition scenarios from event timelines.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceError {
    /// An event timeline contains a value pairing the edge classifier
    /// does not recognize (e.g. `x -> x`, or `1 -> x`), or events out of order.
    MalformedTrace(String),
    /// A declared clock, input or output net has no timeline.
    UnknownSignal(String),
    /// The clock rose fewer than two times, so no cycle can be formed.
    InsufficientClock { net: String, rises: usize },
    /// A cycle's capture edge does not come after its launch edge.
    CapturePrecedesLaunch {
        cycle: usize,
        launch: Time,
        capture: Time,
    },
    /// The same input-transition tuple produced a different response.
    /// Delays and times are in the unit of the source (ticks or ps).
    InconsistentScenario {
        scenario: String,
        expected: (TransitionClass, f64),
        found: (TransitionClass, f64),
        first_seen: f64,
        conflict_time: f64,
    },
    /// The scenario universe `4^inputs` is too large to enumerate.
    ScenarioSpaceTooLarge { inputs: usize, limit: usize },
    /// A requested output index is outside the declared outputs.
    OutputIndex { index: usize, outputs: usize },
    /// Underlying I/O failure while reading a waveform.
    Io(String),
    /// The VCD header or value stream could not be parsed.
    Vcd(String),
}

impl std::fmt::Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceError::MalformedTrace(msg) => write!(f, "malformed trace: {}", msg),
            TraceError::UnknownSignal(name) => {
                write!(f, "unknown signal '{}': no timeline was loaded for it", name)
            }
            TraceError::InsufficientClock { net, rises } => write!(
                f,
                "clock '{}' rises {} time(s); at least 2 rising edges are needed",
                net, rises
            ),
            TraceError::CapturePrecedesLaunch {
                cycle,
                launch,
                capture,
            } => write!(
                f,
                "cycle {}: capture edge @{} does not follow launch edge @{}",
                cycle, capture, launch
            ),
            TraceError::InconsistentScenario {
                scenario,
                expected,
                found,
                first_seen,
                conflict_time,
            } => write!(
                f,
                "inconsistent response for input scenario {}: expected {} (delay {}) first seen @{}, \
                 found {} (delay {}) @{}",
                scenario, expected.0, expected.1, first_seen, found.0, found.1, conflict_time
            ),
            TraceError::ScenarioSpaceTooLarge { inputs, limit } => write!(
                f,
                "{} inputs give 4^{} scenarios; at most {} inputs are supported",
                inputs, inputs, limit
            ),
            TraceError::OutputIndex { index, outputs } => write!(
                f,
                "output index {} out of range ({} declared outputs)",
                index, outputs
            ),
            TraceError::Io(msg) => write!(f, "waveform I/O error: {}", msg),
            TraceError::Vcd(msg) => write!(f, "VCD error: {}", msg),
        }
    }
}

impl std::error::Error for TraceError {}

impl From<std::io::Error> for TraceError {
    fn from(e: std::io::Error) -> Self {
        TraceError::Io(e.to_string())
    }
}
