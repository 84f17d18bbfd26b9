// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Per-cycle transition scenarios.
//!
//! Each clock cycle `i` is bounded by a launch edge (`rise[i]`) and a
//! capture edge chosen by the [`CapturePolicy`]. Inputs are classified by
//! the first event inside that window, outputs by the value they settle to
//! before capture, and the output delay is measured from the launch edge.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::clock::ClockEdges;
use crate::error::TraceError;
use crate::logic::{classify, LogicValue, TransitionClass};
use crate::waveform::{EventTimeline, Time, Waveform};

/// Which clock edge closes a cycle's observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    /// First falling edge after launch. Outputs must settle within half a
    /// period, leaving the other half for the next stimulus.
    HalfCycle,
    /// The next rising edge.
    FullCycle,
}

impl CapturePolicy {
    /// Default policy for a stimulus mode: exhaustive stimulus captures at
    /// the half cycle, randomized stimulus at the next full cycle.
    pub fn for_mode(exhaustive: bool) -> Self {
        if exhaustive {
            CapturePolicy::HalfCycle
        } else {
            CapturePolicy::FullCycle
        }
    }
}

impl std::fmt::Display for CapturePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapturePolicy::HalfCycle => write!(f, "half_cycle"),
            CapturePolicy::FullCycle => write!(f, "full_cycle"),
        }
    }
}

impl std::str::FromStr for CapturePolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "half_cycle" | "half" => Ok(CapturePolicy::HalfCycle),
            "full_cycle" | "full" => Ok(CapturePolicy::FullCycle),
            _ => Err(format!(
                "Unknown capture policy '{}', expected half_cycle or full_cycle",
                s
            )),
        }
    }
}

/// Names of the monitored nets. Input order fixes the scenario key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSet {
    pub clock: CompactString,
    pub inputs: Vec<CompactString>,
    pub outputs: Vec<CompactString>,
}

impl SignalSet {
    pub fn new<S: AsRef<str>>(clock: &str, inputs: &[S], outputs: &[S]) -> Self {
        SignalSet {
            clock: clock.into(),
            inputs: inputs.iter().map(|s| s.as_ref().into()).collect(),
            outputs: outputs.iter().map(|s| s.as_ref().into()).collect(),
        }
    }

    /// Clock, then inputs, then outputs.
    pub fn all_nets(&self) -> Vec<&str> {
        std::iter::once(self.clock.as_str())
            .chain(self.inputs.iter().map(|s| s.as_str()))
            .chain(self.outputs.iter().map(|s| s.as_str()))
            .collect()
    }

    pub fn output_index(&self, name: &str) -> Result<usize, TraceError> {
        self.outputs
            .iter()
            .position(|o| o == name)
            .ok_or_else(|| TraceError::UnknownSignal(name.to_string()))
    }
}

/// What one output did during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputResponse {
    pub transition: TransitionClass,
    /// Ticks from launch until the output reached its final value.
    pub delay: Time,
}

/// Transitions of all monitored nets over one clock cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleTransitionRecord {
    pub cycle: usize,
    pub launch: Time,
    pub capture: Time,
    /// In declared input order.
    pub inputs: Vec<TransitionClass>,
    /// In declared output order.
    pub outputs: Vec<OutputResponse>,
}

impl CycleTransitionRecord {
    /// Input transition of the named net.
    pub fn input(&self, signals: &SignalSet, name: &str) -> Result<TransitionClass, TraceError> {
        signals
            .inputs
            .iter()
            .position(|i| i == name)
            .map(|i| self.inputs[i])
            .ok_or_else(|| TraceError::UnknownSignal(name.to_string()))
    }

    /// Response of the named output.
    pub fn output(&self, signals: &SignalSet, name: &str) -> Result<OutputResponse, TraceError> {
        Ok(self.outputs[signals.output_index(name)?])
    }

    /// The slowest output of the cycle, the later output on equal delays.
    /// `None` without outputs.
    pub fn max_response(&self) -> Option<(usize, OutputResponse)> {
        self.outputs
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (i, o)| match best {
                Some((_, b)) if b.delay > o.delay => best,
                _ => Some((i, o)),
            })
    }

    /// Time the response of `output` settled: launch plus its delay.
    pub fn settle_time(&self, output: usize) -> Result<Time, TraceError> {
        Ok(self.launch + self.response(output)?.delay)
    }

    pub fn response(&self, output: usize) -> Result<OutputResponse, TraceError> {
        self.outputs
            .get(output)
            .copied()
            .ok_or(TraceError::OutputIndex {
                index: output,
                outputs: self.outputs.len(),
            })
    }
}

/// Builds [`CycleTransitionRecord`]s from the timelines of one waveform.
pub struct CycleScenarioBuilder<'w> {
    signals: &'w SignalSet,
    clock: ClockEdges,
    inputs: Vec<&'w EventTimeline>,
    outputs: Vec<&'w EventTimeline>,
    policy: CapturePolicy,
}

impl<'w> CycleScenarioBuilder<'w> {
    /// Segment the clock and resolve every declared net.
    pub fn new(
        waveform: &'w Waveform,
        signals: &'w SignalSet,
        policy: CapturePolicy,
    ) -> Result<Self, TraceError> {
        let clock = ClockEdges::from_timeline(&signals.clock, waveform.get(&signals.clock)?)?;
        let inputs = signals
            .inputs
            .iter()
            .map(|n| waveform.get(n))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = signals
            .outputs
            .iter()
            .map(|n| waveform.get(n))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CycleScenarioBuilder {
            signals,
            clock,
            inputs,
            outputs,
            policy,
        })
    }

    pub fn clock(&self) -> &ClockEdges {
        &self.clock
    }

    pub fn policy(&self) -> CapturePolicy {
        self.policy
    }

    /// One cycle per rising edge except the last.
    pub fn num_cycles(&self) -> usize {
        self.clock.rises().len() - 1
    }

    /// Capture edge of cycle `i`.
    pub fn capture_edge(&self, i: usize) -> Result<Time, TraceError> {
        let launch = self.clock.rises()[i];
        let capture = match self.policy {
            CapturePolicy::FullCycle => self.clock.rises()[i + 1],
            CapturePolicy::HalfCycle => self.clock.next_fall_after(launch).ok_or_else(|| {
                TraceError::MalformedTrace(format!(
                    "clock '{}' has no falling edge after launch @{}",
                    self.signals.clock, launch
                ))
            })?,
        };
        if capture <= launch {
            return Err(TraceError::CapturePrecedesLaunch {
                cycle: i,
                launch,
                capture,
            });
        }
        Ok(capture)
    }

    /// Classify every input and output over cycle `i`.
    pub fn record(&self, i: usize) -> Result<CycleTransitionRecord, TraceError> {
        let launch = self.clock.rises()[i];
        let capture = self.capture_edge(i)?;

        let mut inputs = Vec::with_capacity(self.inputs.len());
        for (name, tl) in self.signals.inputs.iter().zip(&self.inputs) {
            let (_, prev) = value_before(name, tl, launch)?;
            let next = match tl.first_at_or_after(launch) {
                Some(j) if tl.times()[j] < capture => tl.values()[j],
                _ => prev,
            };
            inputs.push(classify_net(name, i, prev, next)?);
        }

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for (name, tl) in self.signals.outputs.iter().zip(&self.outputs) {
            let (_, prev) = value_before(name, tl, launch)?;
            let (t_final, last) = value_before(name, tl, capture)?;
            outputs.push(OutputResponse {
                transition: classify_net(name, i, prev, last)?,
                delay: t_final.max(launch) - launch,
            });
        }

        Ok(CycleTransitionRecord {
            cycle: i,
            launch,
            capture,
            inputs,
            outputs,
        })
    }

    /// Lazily produce the record of every cycle in order.
    pub fn cycles(&self) -> impl Iterator<Item = Result<CycleTransitionRecord, TraceError>> + '_ {
        (0..self.num_cycles()).map(move |i| self.record(i))
    }
}

fn value_before(
    name: &str,
    tl: &EventTimeline,
    t: Time,
) -> Result<(Time, LogicValue), TraceError> {
    tl.last_before(t).map(|j| tl.event(j)).ok_or_else(|| {
        TraceError::MalformedTrace(format!("net '{}' has no value before @{}", name, t))
    })
}

pub(crate) fn classify_net(
    name: &str,
    cycle: usize,
    prev: LogicValue,
    next: LogicValue,
) -> Result<TransitionClass, TraceError> {
    classify(prev, next).map_err(|e| match e {
        TraceError::MalformedTrace(msg) => {
            TraceError::MalformedTrace(format!("net '{}' in cycle {}: {}", name, cycle, msg))
        }
        other => other,
    })
}

/// Extract the records of all cycles of `waveform` at once.
pub fn build_cycle_records(
    waveform: &Waveform,
    signals: &SignalSet,
    policy: CapturePolicy,
) -> Result<Vec<CycleTransitionRecord>, TraceError> {
    let timer = clilog::stimer!("build_cycle_records");
    let builder = CycleScenarioBuilder::new(waveform, signals, policy)?;
    let records = builder.cycles().collect::<Result<Vec<_>, _>>()?;
    clilog::info!(
        "Extracted {} cycles ({} capture, nominal period {} ticks)",
        records.len(),
        policy,
        builder.clock().nominal_period()
    );
    clilog::finish!(timer);
    Ok(records)
}
