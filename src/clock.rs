// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Clock edge extraction and half-cycle segmentation.

use crate::error::TraceError;
use crate::logic::{classify, LogicValue, TransitionClass};
use crate::waveform::{EventTimeline, Time};

/// Rising and falling edge times of the global clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockEdges {
    rises: Vec<Time>,
    falls: Vec<Time>,
}

/// One window between two consecutive clock edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfCycle {
    pub start: Time,
    pub end: Time,
    /// Clock level during the window.
    pub level: LogicValue,
}

impl ClockEdges {
    /// Scan the clock timeline and record the time of every Rise and Fall.
    ///
    /// The initial `x -> 0` of a freshly started simulation counts as a
    /// falling edge, matching the edge classifier.
    pub fn from_timeline(net: &str, timeline: &EventTimeline) -> Result<Self, TraceError> {
        let mut rises = Vec::new();
        let mut falls = Vec::new();
        for i in 1..timeline.len() {
            let (_, prev) = timeline.event(i - 1);
            let (time, next) = timeline.event(i);
            let class = classify(prev, next).map_err(|_| {
                TraceError::MalformedTrace(format!(
                    "clock '{}' @{}: unrecognized value transition {} -> {}",
                    net, time, prev, next
                ))
            })?;
            match class {
                TransitionClass::Rise => rises.push(time),
                TransitionClass::Fall => falls.push(time),
                TransitionClass::High | TransitionClass::Low => {}
            }
        }
        if rises.len() < 2 {
            return Err(TraceError::InsufficientClock {
                net: net.to_string(),
                rises: rises.len(),
            });
        }
        clilog::debug!(
            "Clock '{}': {} rising and {} falling edges",
            net,
            rises.len(),
            falls.len()
        );
        Ok(ClockEdges { rises, falls })
    }

    #[inline]
    pub fn rises(&self) -> &[Time] {
        &self.rises
    }

    #[inline]
    pub fn falls(&self) -> &[Time] {
        &self.falls
    }

    /// First falling edge strictly after `t`.
    pub fn next_fall_after(&self, t: Time) -> Option<Time> {
        let i = self.falls.partition_point(|&f| f <= t);
        self.falls.get(i).copied()
    }

    /// Median distance between consecutive rising edges.
    pub fn nominal_period(&self) -> Time {
        let mut diffs = self
            .rises
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect::<Vec<_>>();
        diffs.sort_unstable();
        diffs[diffs.len() / 2]
    }

    /// Split the span between the first and last clock edge into windows
    /// bounded by consecutive edges.
    pub fn half_cycles(&self) -> Vec<HalfCycle> {
        let mut edges = self
            .rises
            .iter()
            .map(|&t| (t, LogicValue::High))
            .chain(self.falls.iter().map(|&t| (t, LogicValue::Low)))
            .collect::<Vec<_>>();
        edges.sort_by_key(|&(t, _)| t);
        edges
            .windows(2)
            .filter(|w| w[1].0 > w[0].0)
            .map(|w| HalfCycle {
                start: w[0].0,
                end: w[1].0,
                level: w[0].1,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LogicValue::*;

    fn clock(events: &[(Time, LogicValue)]) -> EventTimeline {
        EventTimeline::from_events(events.iter().copied()).unwrap()
    }

    #[test]
    fn test_edges_from_initialized_clock() {
        let tl = clock(&[
            (0, Unknown),
            (0, Low),
            (10, High),
            (15, Low),
            (20, High),
            (25, Low),
            (30, High),
        ]);
        let edges = ClockEdges::from_timeline("clk", &tl).unwrap();
        assert_eq!(edges.rises(), &[10, 20, 30]);
        // x -> 0 at t=0 counts as the first fall.
        assert_eq!(edges.falls(), &[0, 15, 25]);
        assert_eq!(edges.nominal_period(), 10);
        assert_eq!(edges.next_fall_after(10), Some(15));
        assert_eq!(edges.next_fall_after(25), None);
    }

    #[test]
    fn test_steady_values_produce_no_edges() {
        let tl = clock(&[(0, Low), (5, Low), (10, High), (12, High), (20, Low), (30, High)]);
        let edges = ClockEdges::from_timeline("clk", &tl).unwrap();
        assert_eq!(edges.rises(), &[10, 30]);
        assert_eq!(edges.falls(), &[20]);
    }

    #[test]
    fn test_insufficient_clock() {
        let tl = clock(&[(0, Low), (10, High), (15, Low)]);
        let err = ClockEdges::from_timeline("clk", &tl).unwrap_err();
        assert_eq!(
            err,
            TraceError::InsufficientClock {
                net: "clk".into(),
                rises: 1
            }
        );
    }

    #[test]
    fn test_unknown_clock_value_is_malformed() {
        let tl = clock(&[(0, Low), (10, High), (12, Unknown), (20, High)]);
        assert!(matches!(
            ClockEdges::from_timeline("clk", &tl),
            Err(TraceError::MalformedTrace(_))
        ));
    }

    #[test]
    fn test_half_cycles() {
        let tl = clock(&[(0, Low), (10, High), (15, Low), (20, High), (25, Low), (30, High)]);
        let edges = ClockEdges::from_timeline("clk", &tl).unwrap();
        let windows = edges.half_cycles();
        assert_eq!(windows.len(), 4);
        assert_eq!(
            windows[0],
            HalfCycle {
                start: 10,
                end: 15,
                level: High
            }
        );
        assert_eq!(windows[1].level, Low);
        assert_eq!(windows[3].end, 30);
    }
}
