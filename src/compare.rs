// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Scenario-by-scenario comparison and merging of scenario tables.

use std::collections::HashMap;

use crate::error::TraceError;
use crate::logic::TransitionClass;
use crate::table::{ScenarioRow, ScenarioRows};

/// Delay difference of one scenario present in both tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioDiff {
    pub inputs: Vec<TransitionClass>,
    pub output: Option<TransitionClass>,
    pub left: f64,
    pub right: f64,
}

impl ScenarioDiff {
    /// `left - right`.
    pub fn difference(&self) -> f64 {
        self.left - self.right
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompareReport {
    /// Scenarios whose delays differ, in left table order.
    pub diffs: Vec<ScenarioDiff>,
    /// Scenarios with a delay in both tables.
    pub compared: usize,
    /// Scenarios with a delay only in the left table.
    pub only_left: usize,
    /// Scenarios with a delay only in the right table.
    pub only_right: usize,
}

impl CompareReport {
    pub fn max_abs_difference(&self) -> f64 {
        self.diffs
            .iter()
            .map(|d| d.difference().abs())
            .fold(0., f64::max)
    }
}

fn check_inputs(a: &ScenarioRows, b: &ScenarioRows) -> Result<(), TraceError> {
    if a.input_names == b.input_names {
        return Ok(());
    }
    let missing = a
        .input_names
        .iter()
        .chain(&b.input_names)
        .find(|n| !a.input_names.contains(*n) || !b.input_names.contains(*n))
        .cloned()
        .unwrap_or_else(|| format!("{:?} vs {:?}", a.input_names, b.input_names));
    Err(TraceError::UnknownSignal(missing))
}

fn index_rows(rows: &ScenarioRows) -> HashMap<&[TransitionClass], &ScenarioRow> {
    rows.rows.iter().map(|r| (r.inputs.as_slice(), r)).collect()
}

fn time_of(row: &ScenarioRow) -> f64 {
    row.sim_time.unwrap_or(0.)
}

/// Compare two tables over the same inputs.
///
/// Scenarios seen in both must agree on the output transition; a mismatch
/// is an [`TraceError::InconsistentScenario`].
pub fn compare_scenarios(a: &ScenarioRows, b: &ScenarioRows) -> Result<CompareReport, TraceError> {
    check_inputs(a, b)?;
    let right = index_rows(b);
    let mut report = CompareReport::default();
    for row in &a.rows {
        let other = right.get(row.inputs.as_slice()).copied();
        match (row.delay, other.and_then(|o| o.delay.map(|d| (o, d)))) {
            (Some(l), Some((other, r))) => {
                if let (Some(lo), Some(ro)) = (row.output, other.output) {
                    if lo != ro {
                        return Err(TraceError::InconsistentScenario {
                            scenario: crate::dedup::ScenarioKey(row.inputs.clone()).to_string(),
                            expected: (lo, l),
                            found: (ro, r),
                            first_seen: time_of(row),
                            conflict_time: time_of(other),
                        });
                    }
                }
                report.compared += 1;
                if l != r {
                    report.diffs.push(ScenarioDiff {
                        inputs: row.inputs.clone(),
                        output: row.output,
                        left: l,
                        right: r,
                    });
                }
            }
            (Some(_), None) => report.only_left += 1,
            (None, Some(_)) => report.only_right += 1,
            (None, None) => {}
        }
    }
    let left = index_rows(a);
    report.only_right += b
        .rows
        .iter()
        .filter(|r| r.delay.is_some() && !left.contains_key(r.inputs.as_slice()))
        .count();
    clilog::info!(
        "Compared {} scenarios: {} differ (max |diff| {}), {} only left, {} only right",
        report.compared,
        report.diffs.len(),
        report.max_abs_difference(),
        report.only_left,
        report.only_right
    );
    Ok(report)
}

/// Column name of the output in merged tables.
pub const MAX_OUTPUT_COLUMN: &str = "max_output_trans";

/// Per-scenario maximum delay over several tables, e.g. one per output.
///
/// The output transition of a merged row is dropped. Row order and the
/// probability columns follow the first table.
pub fn merge_max(tables: &[ScenarioRows]) -> Result<ScenarioRows, TraceError> {
    let Some(first) = tables.first() else {
        return Err(TraceError::MalformedTrace("no tables to merge".into()));
    };
    for t in &tables[1..] {
        check_inputs(first, t)?;
    }
    let indexed = tables[1..].iter().map(index_rows).collect::<Vec<_>>();
    let rows = first
        .rows
        .iter()
        .map(|row| {
            let delay = indexed
                .iter()
                .filter_map(|idx| idx.get(row.inputs.as_slice()).and_then(|r| r.delay))
                .chain(row.delay)
                .reduce(f64::max);
            ScenarioRow {
                inputs: row.inputs.clone(),
                output: None,
                delay,
                exact_prob: row.exact_prob,
                measured_prob: row.measured_prob,
                sim_time: row.sim_time,
            }
        })
        .collect();
    Ok(ScenarioRows {
        input_names: first.input_names.clone(),
        output_name: MAX_OUTPUT_COLUMN.to_string(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransitionClass::*;

    fn row(inputs: &[TransitionClass], output: TransitionClass, delay: Option<f64>) -> ScenarioRow {
        ScenarioRow {
            inputs: inputs.to_vec(),
            output: delay.map(|_| output),
            delay,
            exact_prob: Some(0.25),
            measured_prob: None,
            sim_time: None,
        }
    }

    fn table(output: &str, rows: Vec<ScenarioRow>) -> ScenarioRows {
        ScenarioRows {
            input_names: vec!["a".into()],
            output_name: output.into(),
            rows,
        }
    }

    #[test]
    fn test_compare_reports_differences() {
        let a = table(
            "y",
            vec![
                row(&[Rise], Rise, Some(10.)),
                row(&[Fall], Fall, Some(7.)),
                row(&[High], High, Some(0.)),
                row(&[Low], Low, None),
            ],
        );
        let b = table(
            "y",
            vec![
                row(&[Rise], Rise, Some(12.5)),
                row(&[Fall], Fall, Some(7.)),
                row(&[High], High, None),
                row(&[Low], Low, Some(1.)),
            ],
        );
        let report = compare_scenarios(&a, &b).unwrap();
        assert_eq!(report.compared, 2);
        assert_eq!(report.diffs.len(), 1);
        assert_eq!(report.diffs[0].inputs, vec![Rise]);
        assert_eq!(report.diffs[0].difference(), -2.5);
        assert_eq!(report.only_left, 1);
        assert_eq!(report.only_right, 1);
        assert_eq!(report.max_abs_difference(), 2.5);
    }

    #[test]
    fn test_compare_rejects_output_mismatch() {
        let mut a = table("y", vec![row(&[Rise], Rise, Some(3.25))]);
        let mut b = table("y", vec![row(&[Rise], Fall, Some(3.75))]);
        a.rows[0].sim_time = Some(1250.5);
        b.rows[0].sim_time = Some(980.);
        assert_eq!(
            compare_scenarios(&a, &b).unwrap_err(),
            TraceError::InconsistentScenario {
                scenario: "(R)".into(),
                expected: (Rise, 3.25),
                found: (Fall, 3.75),
                first_seen: 1250.5,
                conflict_time: 980.,
            }
        );
    }

    #[test]
    fn test_compare_rejects_different_inputs() {
        let a = table("y", vec![]);
        let mut b = table("y", vec![]);
        b.input_names = vec!["b".into()];
        assert_eq!(
            compare_scenarios(&a, &b).unwrap_err(),
            TraceError::UnknownSignal("a".into())
        );
    }

    #[test]
    fn test_merge_max() {
        let y = table(
            "y",
            vec![row(&[Rise], Rise, Some(10.)), row(&[Fall], Fall, Some(2.)), row(&[Low], Low, None)],
        );
        let z = table(
            "z",
            vec![row(&[Fall], Rise, Some(6.)), row(&[Rise], High, Some(4.)), row(&[Low], Low, None)],
        );
        let merged = merge_max(&[y, z]).unwrap();
        assert_eq!(merged.output_name, MAX_OUTPUT_COLUMN);
        let delays = merged.rows.iter().map(|r| r.delay).collect::<Vec<_>>();
        assert_eq!(delays, vec![Some(10.), Some(6.), None]);
        assert!(merged.rows.iter().all(|r| r.output.is_none()));
        assert!(merge_max(&[]).is_err());
    }
}
