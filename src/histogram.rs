// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Normalized delay histograms.
//!
//! Delays are grouped by exact value. Every histogram carries a row at
//! delay 0 (with probability 0 if no case had zero delay) so that
//! histograms from different sources always share that anchor point.

use std::collections::BTreeMap;

use crate::dedup::ScenarioTable;
use crate::error::TraceError;
use crate::scenario::CycleTransitionRecord;
use crate::stats::StatsError;

/// Allowed deviation of a histogram's total probability from 1.
pub const PROBABILITY_TOLERANCE: f64 = 1e-9;

/// Totally ordered delay value. `-0.0` is folded into `0.0`.
#[derive(Debug, Clone, Copy)]
pub struct DelayKey(f64);

impl DelayKey {
    pub fn new(delay: f64) -> Result<Self, StatsError> {
        if !delay.is_finite() {
            return Err(StatsError::NonFinite(delay));
        }
        Ok(DelayKey(if delay == 0. { 0. } else { delay }))
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for DelayKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0).is_eq()
    }
}

impl Eq for DelayKey {}

impl PartialOrd for DelayKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramRow {
    pub delay: f64,
    pub probability: f64,
}

/// How seen scenarios of a [`ScenarioTable`] are weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioWeighting {
    /// Each seen scenario is one case (exhaustive coverage).
    Uniform,
    /// Each scenario counts as often as it was simulated.
    Occurrence,
}

/// Streaming delay counter. Chunks of raw delays are folded in with
/// [`HistogramAccumulator::add_chunk`]; memory grows only with the number
/// of distinct delay values.
#[derive(Debug, Clone, Default)]
pub struct HistogramAccumulator {
    counts: BTreeMap<DelayKey, u64>,
    total: u64,
}

impl HistogramAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, delay: f64) -> Result<(), StatsError> {
        self.add_weighted(delay, 1)
    }

    pub fn add_weighted(&mut self, delay: f64, count: u64) -> Result<(), StatsError> {
        if count == 0 {
            return Ok(());
        }
        *self.counts.entry(DelayKey::new(delay)?).or_insert(0) += count;
        self.total += count;
        Ok(())
    }

    pub fn add_chunk(&mut self, delays: &[f64]) -> Result<(), StatsError> {
        for &d in delays {
            self.add(d)?;
        }
        Ok(())
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn finalize(self) -> Result<DelayHistogram, StatsError> {
        if self.total == 0 {
            return Err(StatsError::TooFewSamples { needed: 1, got: 0 });
        }
        let total = self.total as f64;
        let mut rows = self
            .counts
            .into_iter()
            .map(|(k, c)| HistogramRow {
                delay: k.value(),
                probability: c as f64 / total,
            })
            .collect::<Vec<_>>();
        insert_zero_anchor(&mut rows);
        Ok(DelayHistogram {
            rows,
            cases: self.total,
        })
    }
}

/// `rows` must be sorted by delay.
fn insert_zero_anchor(rows: &mut Vec<HistogramRow>) {
    if let Err(pos) = rows.binary_search_by(|r| r.delay.total_cmp(&0.)) {
        rows.insert(
            pos,
            HistogramRow {
                delay: 0.,
                probability: 0.,
            },
        );
    }
}

/// Probability distribution over distinct delay values, sorted ascending,
/// always containing delay 0.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayHistogram {
    rows: Vec<HistogramRow>,
    /// Number of cases the histogram was built from. Zero when loaded from
    /// probabilities alone.
    cases: u64,
}

impl DelayHistogram {
    /// Histogram of a multiset of delays.
    pub fn from_delays<I>(delays: I) -> Result<Self, StatsError>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut acc = HistogramAccumulator::new();
        for d in delays {
            acc.add(d)?;
        }
        acc.finalize()
    }

    /// Histogram over the seen scenarios of a table, delays scaled by
    /// `delay_scale` (e.g. picoseconds per tick).
    pub fn from_scenarios(
        table: &ScenarioTable,
        weighting: ScenarioWeighting,
        delay_scale: f64,
    ) -> Result<Self, StatsError> {
        let mut acc = HistogramAccumulator::new();
        for rec in table.seen_records() {
            let w = match weighting {
                ScenarioWeighting::Uniform => 1,
                ScenarioWeighting::Occurrence => rec.count,
            };
            acc.add_weighted(rec.delay as f64 * delay_scale, w)?;
        }
        acc.finalize()
    }

    /// Histogram of the delay of output number `output`, one case per cycle.
    pub fn from_cycle_records(
        records: &[CycleTransitionRecord],
        output: usize,
        delay_scale: f64,
    ) -> Result<Self, TraceError> {
        let mut acc = HistogramAccumulator::new();
        for r in records {
            let delay = r.response(output)?.delay as f64 * delay_scale;
            acc.add(delay)
                .map_err(|e| TraceError::MalformedTrace(e.to_string()))?;
        }
        acc.finalize()
            .map_err(|e| TraceError::MalformedTrace(format!("no cycles: {}", e)))
    }

    /// Histogram from precomputed rows, e.g. a loaded histogram table.
    ///
    /// Rows are sorted, duplicate delays merged and the zero anchor added.
    /// The total probability must be within `tolerance` of 1.
    pub fn from_rows(mut rows: Vec<HistogramRow>, tolerance: f64) -> Result<Self, StatsError> {
        for r in rows.iter_mut() {
            r.delay = DelayKey::new(r.delay)?.value();
            if !r.probability.is_finite() || r.probability < 0. {
                return Err(StatsError::NonFinite(r.probability));
            }
        }
        rows.sort_by(|a, b| a.delay.total_cmp(&b.delay));
        rows.dedup_by(|later, first| {
            if later.delay == first.delay {
                first.probability += later.probability;
                true
            } else {
                false
            }
        });
        insert_zero_anchor(&mut rows);
        let total: f64 = rows.iter().map(|r| r.probability).sum();
        if (total - 1.).abs() > tolerance {
            return Err(StatsError::MassMismatch {
                left: total,
                right: 1.,
            });
        }
        Ok(DelayHistogram { rows, cases: 0 })
    }

    pub fn rows(&self) -> &[HistogramRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cases(&self) -> u64 {
        self.cases
    }

    pub fn total_probability(&self) -> f64 {
        self.rows.iter().map(|r| r.probability).sum()
    }

    /// Probability of exactly `delay`, zero if absent.
    pub fn probability_of(&self, delay: f64) -> f64 {
        self.rows
            .binary_search_by(|r| r.delay.total_cmp(&delay))
            .map(|i| self.rows[i].probability)
            .unwrap_or(0.)
    }

    pub fn mean(&self) -> f64 {
        self.rows.iter().map(|r| r.delay * r.probability).sum()
    }

    /// Largest delay with nonzero probability.
    pub fn max_delay(&self) -> f64 {
        self.rows
            .iter()
            .rev()
            .find(|r| r.probability > 0.)
            .map(|r| r.delay)
            .unwrap_or(0.)
    }

    /// Cumulative `(delay, P(D <= delay))` pairs.
    pub fn cdf(&self) -> Vec<(f64, f64)> {
        let mut acc = 0.;
        self.rows
            .iter()
            .map(|r| {
                acc += r.probability;
                (r.delay, acc)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::deduplicate;
    use crate::logic::TransitionClass::*;
    use crate::scenario::OutputResponse;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_histogram_from_delays() {
        let h = DelayHistogram::from_delays([0., 0., 0., 5., 5., 10.]).unwrap();
        let rows = h.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].delay, 0.);
        assert!(close(rows[0].probability, 0.5));
        assert!(close(rows[1].probability, 1. / 3.));
        assert!(close(rows[2].probability, 1. / 6.));
        assert!(close(h.total_probability(), 1.));
        assert_eq!(h.max_delay(), 10.);
        assert!(close(h.mean(), 20. / 6.));
        assert_eq!(h.cases(), 6);
    }

    #[test]
    fn test_zero_anchor_is_added_once() {
        let h = DelayHistogram::from_delays([7., 3., 7.]).unwrap();
        assert_eq!(h.rows()[0], HistogramRow { delay: 0., probability: 0. });
        assert_eq!(h.rows().iter().filter(|r| r.delay == 0.).count(), 1);
        assert!(close(h.probability_of(7.), 2. / 3.));
        assert_eq!(h.probability_of(4.), 0.);

        let neg_zero = DelayHistogram::from_delays([-0., 0., 2.]).unwrap();
        assert_eq!(neg_zero.len(), 2);
        assert!(close(neg_zero.probability_of(0.), 2. / 3.));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(DelayHistogram::from_delays([1., f64::NAN]).is_err());
        assert!(DelayHistogram::from_delays(Vec::<f64>::new()).is_err());
        let rows = vec![HistogramRow { delay: 1., probability: 0.7 }];
        assert!(matches!(
            DelayHistogram::from_rows(rows, PROBABILITY_TOLERANCE),
            Err(StatsError::MassMismatch { .. })
        ));
    }

    #[test]
    fn test_from_rows_sorts_and_merges() {
        let rows = vec![
            HistogramRow { delay: 5., probability: 0.25 },
            HistogramRow { delay: 2., probability: 0.5 },
            HistogramRow { delay: 5., probability: 0.25 },
        ];
        let h = DelayHistogram::from_rows(rows, PROBABILITY_TOLERANCE).unwrap();
        assert_eq!(
            h.rows(),
            &[
                HistogramRow { delay: 0., probability: 0. },
                HistogramRow { delay: 2., probability: 0.5 },
                HistogramRow { delay: 5., probability: 0.5 },
            ]
        );
        assert_eq!(h.cdf().last().map(|c| c.1), Some(1.));
    }

    #[test]
    fn test_chunked_matches_one_shot() {
        let delays = (0..1000).map(|i| ((i * 37) % 23) as f64).collect::<Vec<_>>();
        let mut acc = HistogramAccumulator::new();
        for chunk in delays.chunks(64) {
            acc.add_chunk(chunk).unwrap();
        }
        assert_eq!(acc.total(), 1000);
        assert_eq!(
            acc.finalize().unwrap(),
            DelayHistogram::from_delays(delays).unwrap()
        );
    }

    #[test]
    fn test_scenario_table_round_trip() {
        // One cycle per scenario: the table view and the raw delay list
        // describe the same multiset of delays.
        let cases = [(Rise, 4), (Fall, 0), (High, 4), (Low, 9)];
        let records = cases
            .iter()
            .enumerate()
            .map(|(i, &(input, delay))| CycleTransitionRecord {
                cycle: i,
                launch: 10 * i as u64,
                capture: 10 * i as u64 + 5,
                inputs: vec![input],
                outputs: vec![OutputResponse {
                    transition: High,
                    delay,
                }],
            })
            .collect::<Vec<_>>();
        let table = deduplicate(&records, 1, 0).unwrap();
        let from_table = DelayHistogram::from_scenarios(&table, ScenarioWeighting::Uniform, 1.).unwrap();
        let from_cycles = DelayHistogram::from_cycle_records(&records, 0, 1.).unwrap();
        let from_raw = DelayHistogram::from_delays(cases.iter().map(|c| c.1 as f64)).unwrap();
        assert_eq!(from_table.rows(), from_raw.rows());
        assert_eq!(from_cycles.rows(), from_raw.rows());

        let weighted =
            DelayHistogram::from_scenarios(&table, ScenarioWeighting::Occurrence, 2.).unwrap();
        assert!(close(weighted.probability_of(8.), 0.5));
    }
}
