// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Bounded-memory cycle extraction straight from the VCD value stream.
//!
//! [`CycleStream`] yields the same records as
//! [`CycleScenarioBuilder`](crate::scenario::CycleScenarioBuilder) over a
//! fully loaded waveform. It only keeps the latest events of each monitored
//! net and the cycles whose capture edge has not been confirmed yet, so its
//! memory does not grow with the length of the trace.

use std::collections::VecDeque;
use std::path::Path;

use crate::error::TraceError;
use crate::logic::{classify, LogicValue, TransitionClass};
use crate::scenario::{
    classify_net, CapturePolicy, CycleTransitionRecord, OutputResponse, SignalSet,
};
use crate::waveform::{Time, VcdChanges};

type Event = (Time, LogicValue);

/// The few events of one net a cycle can still ask about.
#[derive(Debug, Clone, Copy, Default)]
struct NetState {
    /// Last event strictly before the time of `latest`.
    settled: Option<Event>,
    /// First event at the time of `latest`.
    first_now: Option<Event>,
    latest: Option<Event>,
}

impl NetState {
    fn push(&mut self, time: Time, value: LogicValue) -> Result<(), String> {
        match self.latest {
            Some((t, _)) if time < t => {
                return Err(format!("event @{} precedes previous event @{}", time, t));
            }
            Some((t, _)) if time == t => {}
            _ => {
                self.settled = self.latest;
                self.first_now = Some((time, value));
            }
        }
        self.latest = Some((time, value));
        Ok(())
    }

    /// Last event strictly before `t`, for `t` not before the latest event.
    fn before(&self, t: Time) -> Option<Event> {
        match self.latest {
            Some((lt, _)) if lt < t => self.latest,
            _ => self.settled,
        }
    }

    /// First event at `t`, if one has been seen.
    fn at(&self, t: Time) -> Option<Event> {
        self.first_now.filter(|&(ft, _)| ft == t)
    }
}

/// A cycle whose record is not complete or not yet confirmed.
#[derive(Debug)]
struct OpenCycle {
    cycle: usize,
    launch: Time,
    capture: Option<Time>,
    inputs_before: Vec<Option<Event>>,
    /// First input event at or after launch.
    inputs_first: Vec<Option<Event>>,
    outputs_before: Vec<Option<Event>>,
    /// Last output event before capture.
    outputs_final: Vec<Option<Event>>,
}

fn no_value(name: &str, t: Time) -> TraceError {
    TraceError::MalformedTrace(format!("net '{}' has no value before @{}", name, t))
}

impl OpenCycle {
    fn finish(self, signals: &SignalSet) -> Result<CycleTransitionRecord, TraceError> {
        let OpenCycle {
            cycle,
            launch,
            capture,
            inputs_before,
            inputs_first,
            outputs_before,
            outputs_final,
        } = self;
        let capture = capture.ok_or_else(|| {
            TraceError::MalformedTrace(format!(
                "clock '{}' has no falling edge after launch @{}",
                signals.clock, launch
            ))
        })?;

        let mut inputs = Vec::with_capacity(signals.inputs.len());
        let inputs_seen = inputs_before.into_iter().zip(inputs_first);
        for (name, (before, first)) in signals.inputs.iter().zip(inputs_seen) {
            let (_, prev) = before.ok_or_else(|| no_value(name, launch))?;
            let next = match first {
                Some((t, v)) if t < capture => v,
                _ => prev,
            };
            inputs.push(classify_net(name, cycle, prev, next)?);
        }

        let mut outputs = Vec::with_capacity(signals.outputs.len());
        let outputs_seen = outputs_before.into_iter().zip(outputs_final);
        for (name, (before, last)) in signals.outputs.iter().zip(outputs_seen) {
            let (_, prev) = before.ok_or_else(|| no_value(name, launch))?;
            let (t_final, last) = last.ok_or_else(|| no_value(name, capture))?;
            outputs.push(OutputResponse {
                transition: classify_net(name, cycle, prev, last)?,
                delay: t_final.max(launch) - launch,
            });
        }

        Ok(CycleTransitionRecord {
            cycle,
            launch,
            capture,
            inputs,
            outputs,
        })
    }
}

/// Counts reported once the stream is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub cycles: usize,
    pub rises: usize,
    pub falls: usize,
    pub last_time: Time,
}

/// Folds value changes into cycle records. Net 0 is the clock, followed by
/// the inputs and then the outputs.
struct Extractor<'s> {
    signals: &'s SignalSet,
    policy: CapturePolicy,
    nets: Vec<NetState>,
    open: VecDeque<OpenCycle>,
    rises: usize,
    falls: usize,
    emitted: usize,
}

impl<'s> Extractor<'s> {
    fn new(signals: &'s SignalSet, policy: CapturePolicy) -> Self {
        Extractor {
            signals,
            policy,
            nets: vec![NetState::default(); 1 + signals.inputs.len() + signals.outputs.len()],
            open: VecDeque::new(),
            rises: 0,
            falls: 0,
            emitted: 0,
        }
    }

    fn net_name(&self, idx: usize) -> &str {
        let k = self.signals.inputs.len();
        match idx {
            0 => self.signals.clock.as_str(),
            i if i <= k => self.signals.inputs[i - 1].as_str(),
            i => self.signals.outputs[i - 1 - k].as_str(),
        }
    }

    fn change<F, E>(
        &mut self,
        time: Time,
        idx: usize,
        value: LogicValue,
        on_cycle: &mut F,
    ) -> Result<(), E>
    where
        F: FnMut(CycleTransitionRecord) -> Result<(), E>,
        E: From<TraceError>,
    {
        let clock_prev = match idx {
            0 => self.nets[0].latest.map(|(_, v)| v),
            _ => None,
        };
        if let Err(msg) = self.nets[idx].push(time, value) {
            let name = self.net_name(idx);
            return Err(TraceError::MalformedTrace(format!("net '{}': {}", name, msg)).into());
        }

        let k = self.signals.inputs.len();
        if (1..=k).contains(&idx) {
            for c in self.open.iter_mut().filter(|c| c.capture.is_none()) {
                let first = &mut c.inputs_first[idx - 1];
                if first.is_none() {
                    *first = Some((time, value));
                }
            }
        }

        let Some(prev) = clock_prev else {
            return Ok(());
        };
        let class = classify(prev, value).map_err(|_| {
            TraceError::MalformedTrace(format!(
                "clock '{}' @{}: unrecognized value transition {} -> {}",
                self.signals.clock, time, prev, value
            ))
        })?;
        match class {
            TransitionClass::Rise => self.rise(time, on_cycle),
            TransitionClass::Fall => {
                self.fall(time);
                Ok(())
            }
            TransitionClass::High | TransitionClass::Low => Ok(()),
        }
    }

    fn capture(&mut self, pos: usize, at: Time) {
        let k = self.signals.inputs.len();
        let finals = (0..self.signals.outputs.len())
            .map(|o| self.nets[1 + k + o].before(at))
            .collect();
        let c = &mut self.open[pos];
        c.outputs_final = finals;
        c.capture = Some(at);
    }

    fn rise<F, E>(&mut self, time: Time, on_cycle: &mut F) -> Result<(), E>
    where
        F: FnMut(CycleTransitionRecord) -> Result<(), E>,
        E: From<TraceError>,
    {
        self.rises += 1;
        if self.policy == CapturePolicy::FullCycle {
            if let Some(pos) = self.open.iter().position(|c| c.capture.is_none()) {
                let (cycle, launch) = (self.open[pos].cycle, self.open[pos].launch);
                if time <= launch {
                    return Err(TraceError::CapturePrecedesLaunch {
                        cycle,
                        launch,
                        capture: time,
                    }
                    .into());
                }
                self.capture(pos, time);
            }
        }

        // A later rise exists, so every captured cycle launched before now
        // is a real cycle.
        while self
            .open
            .front()
            .is_some_and(|c| c.capture.is_some() && c.launch < time)
        {
            if let Some(c) = self.open.pop_front() {
                on_cycle(c.finish(self.signals)?)?;
                self.emitted += 1;
            }
        }

        let k = self.signals.inputs.len();
        let inputs = &self.nets[1..=k];
        let outputs = &self.nets[1 + k..];
        self.open.push_back(OpenCycle {
            cycle: self.rises - 1,
            launch: time,
            capture: None,
            inputs_before: inputs.iter().map(|n| n.before(time)).collect(),
            inputs_first: inputs.iter().map(|n| n.at(time)).collect(),
            outputs_before: outputs.iter().map(|n| n.before(time)).collect(),
            outputs_final: Vec::new(),
        });
        Ok(())
    }

    fn fall(&mut self, time: Time) {
        self.falls += 1;
        if self.policy != CapturePolicy::HalfCycle {
            return;
        }
        for pos in 0..self.open.len() {
            let c = &self.open[pos];
            if c.capture.is_none() && c.launch < time {
                self.capture(pos, time);
            }
        }
    }

    fn finish<F, E>(mut self, on_cycle: &mut F) -> Result<(usize, usize, usize), E>
    where
        F: FnMut(CycleTransitionRecord) -> Result<(), E>,
        E: From<TraceError>,
    {
        if self.rises < 2 {
            return Err(TraceError::InsufficientClock {
                net: self.signals.clock.to_string(),
                rises: self.rises,
            }
            .into());
        }
        // The last rise launches no cycle.
        let num_cycles = self.rises - 1;
        while let Some(c) = self.open.pop_front() {
            if c.cycle >= num_cycles {
                break;
            }
            on_cycle(c.finish(self.signals)?)?;
            self.emitted += 1;
        }
        Ok((self.emitted, self.rises, self.falls))
    }
}

/// Extracts cycle records from a VCD while reading it.
pub struct CycleStream<'s> {
    changes: VcdChanges,
    signals: &'s SignalSet,
    policy: CapturePolicy,
}

impl<'s> CycleStream<'s> {
    /// Parse the VCD header and bind every net of `signals`.
    pub fn open(
        path: &Path,
        scope: Option<&str>,
        signals: &'s SignalSet,
        policy: CapturePolicy,
    ) -> Result<Self, TraceError> {
        let changes = VcdChanges::open(path, scope, &signals.all_nets())?;
        Ok(CycleStream {
            changes,
            signals,
            policy,
        })
    }

    pub fn ps_per_tick(&self) -> f64 {
        self.changes.ps_per_tick
    }

    /// Read the value stream and hand each cycle record to `on_cycle` in
    /// cycle order.
    pub fn run<F, E>(self, mut on_cycle: F) -> Result<StreamSummary, E>
    where
        F: FnMut(CycleTransitionRecord) -> Result<(), E>,
        E: From<TraceError>,
    {
        let timer = clilog::stimer!("stream_cycles");
        let CycleStream {
            changes,
            signals,
            policy,
        } = self;
        let mut ex = Extractor::new(signals, policy);
        let last_time = changes.for_each(|time, idx, value| {
            ex.change(time, idx, value, &mut on_cycle)
        })?;
        let (cycles, rises, falls) = ex.finish(&mut on_cycle)?;
        clilog::info!(
            "Streamed {} cycles ({} capture, {} rising / {} falling clock edges, last timestamp {})",
            cycles,
            policy,
            rises,
            falls,
            last_time
        );
        clilog::finish!(timer);
        Ok(StreamSummary {
            cycles,
            rises,
            falls,
            last_time,
        })
    }

    /// Collect every record. Mostly useful on small traces and in tests.
    pub fn collect(self) -> Result<Vec<CycleTransitionRecord>, TraceError> {
        let mut records = Vec::new();
        self.run(|r| {
            records.push(r);
            Ok::<_, TraceError>(())
        })?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::build_cycle_records;
    use crate::waveform::load_vcd;
    use std::path::PathBuf;
    use TransitionClass::*;

    // Input a switches at launch ahead of the clock token, b and y switch at
    // the half-cycle capture edge ahead of the clock token.
    const GLITCHY_VCD: &str = "\
$timescale 1ns $end
$scope module top $end
$var wire 1 ! clk $end
$var wire 1 \" a $end
$var wire 1 % b $end
$var wire 1 & y $end
$var wire 1 ' z $end
$upscope $end
$enddefinitions $end
#0
$dumpvars
0!
0\"
0%
x&
0'
$end
#5
0&
#10
1\"
1!
#12
1&
#14
1'
#20
1%
0&
0!
#30
1!
#40
0!
#50
1!
";

    fn write_vcd(dir: &tempfile::TempDir, text: &str) -> PathBuf {
        let path = dir.path().join("trace.vcd");
        std::fs::write(&path, text).unwrap();
        path
    }

    fn two_outputs() -> SignalSet {
        SignalSet::new("clk", &["a", "b"], &["y", "z"])
    }

    fn batch(path: &Path, signals: &SignalSet, policy: CapturePolicy) -> Vec<CycleTransitionRecord> {
        let wf = load_vcd(path, None, &signals.all_nets()).unwrap();
        build_cycle_records(&wf, signals, policy).unwrap()
    }

    fn responses(r: &CycleTransitionRecord) -> Vec<(TransitionClass, Time)> {
        r.outputs.iter().map(|o| (o.transition, o.delay)).collect()
    }

    #[test]
    fn test_half_cycle_window_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_vcd(&dir, GLITCHY_VCD);
        let signals = two_outputs();
        let stream = CycleStream::open(&path, None, &signals, CapturePolicy::HalfCycle).unwrap();
        assert_eq!(stream.ps_per_tick(), 1000.);
        let records = stream.collect().unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!((records[0].launch, records[0].capture), (10, 20));
        assert_eq!(records[0].inputs, vec![Rise, Low]);
        assert_eq!(responses(&records[0]), vec![(Rise, 2), (Rise, 4)]);

        assert_eq!((records[1].launch, records[1].capture), (30, 40));
        assert_eq!(records[1].inputs, vec![High, High]);
        assert_eq!(responses(&records[1]), vec![(Low, 0), (High, 0)]);

        assert_eq!(records, batch(&path, &signals, CapturePolicy::HalfCycle));
    }

    #[test]
    fn test_full_cycle_matches_loaded_waveform() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_vcd(&dir, GLITCHY_VCD);
        let signals = two_outputs();
        let records = CycleStream::open(&path, None, &signals, CapturePolicy::FullCycle)
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].inputs, vec![Rise, Rise]);
        assert_eq!(responses(&records[0]), vec![(Low, 10), (Rise, 4)]);
        assert_eq!(records, batch(&path, &signals, CapturePolicy::FullCycle));
    }

    #[test]
    fn test_and2_fixture_matches_loaded_waveform() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/and2.vcd");
        let signals = SignalSet::new("clk", &["a", "b"], &["y"]);
        for policy in [CapturePolicy::HalfCycle, CapturePolicy::FullCycle] {
            let mut streamed = Vec::new();
            let summary = CycleStream::open(&path, Some("tb/dut"), &signals, policy)
                .unwrap()
                .run(|r| {
                    streamed.push(r);
                    Ok::<_, TraceError>(())
                })
                .unwrap();
            assert_eq!(summary.cycles, 4);
            assert_eq!(summary.rises, 5);
            assert_eq!(summary.last_time, 50);
            assert_eq!(streamed, batch(&path, &signals, policy), "{}", policy);
        }
    }

    #[test]
    fn test_single_rise_is_insufficient_clock() {
        let dir = tempfile::tempdir().unwrap();
        let text = GLITCHY_VCD.split("#30").next().unwrap();
        let path = write_vcd(&dir, text);
        let signals = two_outputs();
        let err = CycleStream::open(&path, None, &signals, CapturePolicy::HalfCycle)
            .unwrap()
            .collect()
            .unwrap_err();
        assert_eq!(
            err,
            TraceError::InsufficientClock {
                net: "clk".into(),
                rises: 1
            }
        );
    }

    #[test]
    fn test_callback_error_stops_the_stream() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/and2.vcd");
        let signals = SignalSet::new("clk", &["a", "b"], &["y"]);
        let mut seen = 0;
        let err = CycleStream::open(&path, Some("tb/dut"), &signals, CapturePolicy::FullCycle)
            .unwrap()
            .run(|_| {
                seen += 1;
                if seen == 2 {
                    return Err(TraceError::OutputIndex {
                        index: 9,
                        outputs: 1,
                    });
                }
                Ok(())
            })
            .unwrap_err();
        assert_eq!(seen, 2);
        assert_eq!(
            err,
            TraceError::OutputIndex {
                index: 9,
                outputs: 1
            }
        );
    }

    #[test]
    fn test_missing_net_is_unknown_signal() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/and2.vcd");
        let signals = SignalSet::new("clk", &["a", "c"], &["y"]);
        let err = CycleStream::open(&path, Some("tb/dut"), &signals, CapturePolicy::FullCycle)
            .err()
            .unwrap();
        assert_eq!(err, TraceError::UnknownSignal("c".into()));
    }
}
