// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Folding cycles into the universe of `4^k` input transition scenarios.
//!
//! A scenario key is the tuple of input transition classes in declared input
//! order. Keys are stored densely by their base-4 index, first input most
//! significant, digits ordered `R, F, H, L`. Iterating the table therefore
//! yields scenarios in the same canonical order as the exported tables.

use crate::error::TraceError;
use crate::logic::TransitionClass;
use crate::scenario::CycleTransitionRecord;
use crate::waveform::Time;

/// Widest input tuple whose scenario universe is enumerated densely.
pub const MAX_SCENARIO_INPUTS: usize = 12;

/// Ordered input transition tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScenarioKey(pub Vec<TransitionClass>);

impl ScenarioKey {
    /// Decode the `index`-th key of a `k`-input universe.
    pub fn from_index(mut index: usize, k: usize) -> Self {
        let mut classes = vec![TransitionClass::Rise; k];
        for slot in classes.iter_mut().rev() {
            *slot = TransitionClass::ALL[index % 4];
            index /= 4;
        }
        ScenarioKey(classes)
    }

    /// Position of this key in the canonical enumeration.
    pub fn index(&self) -> usize {
        scenario_index(&self.0)
    }

    pub fn classes(&self) -> &[TransitionClass] {
        &self.0
    }
}

impl std::fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

#[inline]
pub fn scenario_index(classes: &[TransitionClass]) -> usize {
    classes.iter().fold(0, |acc, c| acc * 4 + c.index())
}

/// Response folded over every occurrence of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioRecord {
    pub output: TransitionClass,
    pub delay: Time,
    pub count: u64,
    /// Launch time of the first cycle that realized the scenario.
    pub first_seen: Time,
}

/// Streaming deduplicator. Cycles can be fed one at a time or in chunks;
/// memory stays at one slot per possible scenario.
#[derive(Debug, Clone)]
pub struct ScenarioAccumulator {
    num_inputs: usize,
    output: usize,
    slots: Vec<Option<ScenarioRecord>>,
    total_cycles: u64,
}

impl ScenarioAccumulator {
    /// Accumulate the response of output number `output` over `num_inputs`
    /// inputs.
    pub fn new(num_inputs: usize, output: usize) -> Result<Self, TraceError> {
        if num_inputs > MAX_SCENARIO_INPUTS {
            return Err(TraceError::ScenarioSpaceTooLarge {
                inputs: num_inputs,
                limit: MAX_SCENARIO_INPUTS,
            });
        }
        Ok(ScenarioAccumulator {
            num_inputs,
            output,
            slots: vec![None; 1 << (2 * num_inputs)],
            total_cycles: 0,
        })
    }

    /// Record one observation of a scenario.
    pub fn add_case(
        &mut self,
        inputs: &[TransitionClass],
        output: TransitionClass,
        delay: Time,
        time: Time,
    ) -> Result<(), TraceError> {
        if inputs.len() != self.num_inputs {
            return Err(TraceError::MalformedTrace(format!(
                "scenario has {} input transitions, expected {}",
                inputs.len(),
                self.num_inputs
            )));
        }
        let idx = scenario_index(inputs);
        match self.slots[idx].as_mut() {
            Some(rec) => {
                if rec.output != output || rec.delay != delay {
                    return Err(TraceError::InconsistentScenario {
                        scenario: ScenarioKey(inputs.to_vec()).to_string(),
                        expected: (rec.output, rec.delay as f64),
                        found: (output, delay as f64),
                        first_seen: rec.first_seen as f64,
                        conflict_time: time as f64,
                    });
                }
                rec.count += 1;
            }
            None => {
                self.slots[idx] = Some(ScenarioRecord {
                    output,
                    delay,
                    count: 1,
                    first_seen: time,
                });
            }
        }
        self.total_cycles += 1;
        Ok(())
    }

    pub fn add(&mut self, record: &CycleTransitionRecord) -> Result<(), TraceError> {
        let resp = record.response(self.output)?;
        self.add_case(&record.inputs, resp.transition, resp.delay, record.launch)
    }

    pub fn add_chunk<'a, I>(&mut self, records: I) -> Result<(), TraceError>
    where
        I: IntoIterator<Item = &'a CycleTransitionRecord>,
    {
        for r in records {
            self.add(r)?;
        }
        Ok(())
    }

    pub fn finalize(self) -> ScenarioTable {
        let table = ScenarioTable {
            num_inputs: self.num_inputs,
            slots: self.slots,
            total_cycles: self.total_cycles,
        };
        clilog::info!(
            "Scenarios: {} of {} seen over {} cycles ({:.2}% missing)",
            table.seen(),
            table.universe_size(),
            table.total_cycles(),
            table.missing_fraction() * 100.
        );
        table
    }
}

/// The full scenario universe, each key seen or unseen.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioTable {
    num_inputs: usize,
    slots: Vec<Option<ScenarioRecord>>,
    total_cycles: u64,
}

impl ScenarioTable {
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// `4^k`.
    pub fn universe_size(&self) -> usize {
        self.slots.len()
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn seen(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn unseen(&self) -> usize {
        self.universe_size() - self.seen()
    }

    /// Fraction of the universe never realized.
    pub fn missing_fraction(&self) -> f64 {
        self.unseen() as f64 / self.universe_size() as f64
    }

    pub fn get(&self, key: &ScenarioKey) -> Option<&ScenarioRecord> {
        if key.0.len() != self.num_inputs {
            return None;
        }
        self.slots[key.index()].as_ref()
    }

    /// Every key in canonical order with its record, if seen.
    pub fn iter(&self) -> impl Iterator<Item = (ScenarioKey, Option<&ScenarioRecord>)> + '_ {
        let k = self.num_inputs;
        self.slots
            .iter()
            .enumerate()
            .map(move |(i, s)| (ScenarioKey::from_index(i, k), s.as_ref()))
    }

    pub fn seen_records(&self) -> impl Iterator<Item = &ScenarioRecord> + '_ {
        self.slots.iter().flatten()
    }

    /// Probability of each scenario under uniformly random input transitions.
    pub fn exact_prob(&self) -> f64 {
        1. / self.universe_size() as f64
    }

    /// Share of simulated cycles that realized `record`.
    pub fn measured_prob(&self, record: &ScenarioRecord) -> f64 {
        if self.total_cycles == 0 {
            0.
        } else {
            record.count as f64 / self.total_cycles as f64
        }
    }
}

/// Deduplicate `records` for output number `output`.
pub fn deduplicate<'a, I>(
    records: I,
    num_inputs: usize,
    output: usize,
) -> Result<ScenarioTable, TraceError>
where
    I: IntoIterator<Item = &'a CycleTransitionRecord>,
{
    let mut acc = ScenarioAccumulator::new(num_inputs, output)?;
    acc.add_chunk(records)?;
    Ok(acc.finalize())
}
