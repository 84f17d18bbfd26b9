// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Tabular artifacts: scenario tables, per-cycle delay rows and histograms.
//!
//! All tables are CSV with a header. Readers locate the `delay` column by
//! name. The column just before it holds the output transition and every
//! column before that is an input, in declared order.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

use crate::dedup::ScenarioTable;
use crate::histogram::{DelayHistogram, HistogramRow, ScenarioWeighting, PROBABILITY_TOLERANCE};
use crate::logic::TransitionClass;
use crate::scenario::{CycleTransitionRecord, SignalSet};
use crate::stats::StatsError;

pub const DELAY_COLUMN: &str = "delay";

/// Output column text of rows that merge several outputs.
pub const MERGED_OUTPUT: &str = "-";

/// Failure reading or writing a table.
#[derive(Debug)]
pub enum TableError {
    Io(String),
    Csv(String),
    Json(String),
    MissingColumn { path: String, column: String },
    BadValue { line: u64, column: String, value: String },
    Schema(String),
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::Io(msg) => write!(f, "I/O error: {}", msg),
            TableError::Csv(msg) => write!(f, "CSV error: {}", msg),
            TableError::Json(msg) => write!(f, "JSON error: {}", msg),
            TableError::MissingColumn { path, column } => {
                write!(f, "{}: no '{}' column", path, column)
            }
            TableError::BadValue {
                line,
                column,
                value,
            } => write!(f, "line {}: bad value '{}' in column '{}'", line, value, column),
            TableError::Schema(msg) => write!(f, "table schema error: {}", msg),
        }
    }
}

impl std::error::Error for TableError {}

impl From<std::io::Error> for TableError {
    fn from(e: std::io::Error) -> Self {
        TableError::Io(e.to_string())
    }
}

impl From<csv::Error> for TableError {
    fn from(e: csv::Error) -> Self {
        TableError::Csv(e.to_string())
    }
}

impl From<serde_json::Error> for TableError {
    fn from(e: serde_json::Error) -> Self {
        TableError::Json(e.to_string())
    }
}

impl From<StatsError> for TableError {
    fn from(e: StatsError) -> Self {
        TableError::Schema(e.to_string())
    }
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>, TableError> {
    csv::Reader::from_path(path).map_err(|e| TableError::Csv(format!("{}: {}", path.display(), e)))
}

fn open_writer(path: &Path) -> Result<csv::Writer<File>, TableError> {
    csv::Writer::from_path(path).map_err(|e| TableError::Csv(format!("{}: {}", path.display(), e)))
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn parse_opt_f64(
    record: &csv::StringRecord,
    col: Option<usize>,
    name: &str,
) -> Result<Option<f64>, TableError> {
    let Some(field) = col.and_then(|c| record.get(c)).map(str::trim) else {
        return Ok(None);
    };
    if field.is_empty() {
        return Ok(None);
    }
    field.parse::<f64>().map(Some).map_err(|_| TableError::BadValue {
        line: line_of(record),
        column: name.to_string(),
        value: field.to_string(),
    })
}

fn column_index(
    headers: &csv::StringRecord,
    path: &Path,
    column: &str,
) -> Result<usize, TableError> {
    headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| TableError::MissingColumn {
            path: path.display().to_string(),
            column: column.to_string(),
        })
}

fn delay_column(headers: &csv::StringRecord, path: &Path) -> Result<usize, TableError> {
    column_index(headers, path, DELAY_COLUMN)
}

/// Delay column of one output in a multi-output cycle table.
pub fn output_delay_column(output: &str) -> String {
    format!("{}:{}", DELAY_COLUMN, output)
}

// ── Scenario tables ─────────────────────────────────────────────────────────

/// One row of a scenario or cycle-row table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioRow {
    pub inputs: Vec<TransitionClass>,
    /// `None` for unseen scenarios and for merged rows.
    pub output: Option<TransitionClass>,
    pub delay: Option<f64>,
    pub exact_prob: Option<f64>,
    pub measured_prob: Option<f64>,
    pub sim_time: Option<f64>,
}

/// A loaded table with its column names.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioRows {
    pub input_names: Vec<String>,
    pub output_name: String,
    pub rows: Vec<ScenarioRow>,
}

impl ScenarioRows {
    /// Delays of rows that carry one.
    pub fn delays(&self) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().filter_map(|r| r.delay)
    }

    /// Delay histogram over the rows that carry a delay.
    ///
    /// `Uniform` counts each row once. `Occurrence` weights rows by their
    /// `measured_prob` column, which must then be present on every such row.
    pub fn histogram(&self, weighting: ScenarioWeighting) -> Result<DelayHistogram, TableError> {
        match weighting {
            ScenarioWeighting::Uniform => Ok(DelayHistogram::from_delays(self.delays())?),
            ScenarioWeighting::Occurrence => {
                let rows = self
                    .rows
                    .iter()
                    .filter_map(|r| r.delay.map(|d| (r, d)))
                    .map(|(r, delay)| {
                        let probability = r.measured_prob.ok_or_else(|| {
                            TableError::Schema(format!(
                                "scenario ({}) has a delay but no measured_prob",
                                r.inputs
                                    .iter()
                                    .map(|c| c.as_str())
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            ))
                        })?;
                        Ok(HistogramRow { delay, probability })
                    })
                    .collect::<Result<Vec<_>, TableError>>()?;
                Ok(DelayHistogram::from_rows(rows, PROBABILITY_TOLERANCE)?)
            }
        }
    }
}

/// Write the full scenario universe for output number `output`.
///
/// Unseen scenarios are written with empty output and delay,
/// `measured_prob` 0 and `sim_time` -1. Delays and times are multiplied by
/// `delay_scale`.
pub fn write_scenario_table(
    path: &Path,
    signals: &SignalSet,
    output: usize,
    table: &ScenarioTable,
    delay_scale: f64,
) -> Result<(), TableError> {
    let output_name = signals.outputs.get(output).ok_or_else(|| {
        TableError::Schema(format!(
            "output index {} out of range ({} outputs)",
            output,
            signals.outputs.len()
        ))
    })?;
    if signals.inputs.len() != table.num_inputs() {
        return Err(TableError::Schema(format!(
            "{} input names for a {}-input scenario table",
            signals.inputs.len(),
            table.num_inputs()
        )));
    }
    let mut wtr = open_writer(path)?;
    let mut header = signals
        .inputs
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
    header.push(output_name.to_string());
    header.extend(
        [DELAY_COLUMN, "exact_prob", "measured_prob", "sim_time"]
            .iter()
            .map(|s| s.to_string()),
    );
    wtr.write_record(&header)?;

    let exact = table.exact_prob().to_string();
    for (key, rec) in table.iter() {
        let mut row = key
            .classes()
            .iter()
            .map(|c| c.as_str().to_string())
            .collect::<Vec<_>>();
        match rec {
            Some(rec) => {
                row.push(rec.output.as_str().to_string());
                row.push((rec.delay as f64 * delay_scale).to_string());
                row.push(exact.clone());
                row.push(table.measured_prob(rec).to_string());
                row.push((rec.first_seen as f64 * delay_scale).to_string());
            }
            None => {
                row.push(String::new());
                row.push(String::new());
                row.push(exact.clone());
                row.push("0".to_string());
                row.push("-1".to_string());
            }
        }
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    clilog::info!(
        "Wrote {} scenarios ({} seen) to {}",
        table.universe_size(),
        table.seen(),
        path.display()
    );
    Ok(())
}

/// Write already materialized rows, e.g. the result of a max merge.
pub fn write_scenario_rows(path: &Path, rows: &ScenarioRows) -> Result<(), TableError> {
    let mut wtr = open_writer(path)?;
    let mut header = rows.input_names.clone();
    header.push(rows.output_name.clone());
    header.extend(
        [DELAY_COLUMN, "exact_prob", "measured_prob", "sim_time"]
            .iter()
            .map(|s| s.to_string()),
    );
    wtr.write_record(&header)?;
    let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for r in &rows.rows {
        let mut rec = r
            .inputs
            .iter()
            .map(|c| c.as_str().to_string())
            .collect::<Vec<_>>();
        rec.push(match r.output {
            Some(o) => o.as_str().to_string(),
            None if r.delay.is_some() => MERGED_OUTPUT.to_string(),
            None => String::new(),
        });
        rec.push(opt(r.delay));
        rec.push(opt(r.exact_prob));
        rec.push(opt(r.measured_prob));
        rec.push(opt(r.sim_time));
        wtr.write_record(&rec)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Load a scenario table or a cycle-row table.
pub fn read_scenario_table(path: &Path) -> Result<ScenarioRows, TableError> {
    let mut rdr = open_reader(path)?;
    let headers = rdr.headers()?.clone();
    let delay_col = delay_column(&headers, path)?;
    if delay_col == 0 {
        return Err(TableError::Schema(format!(
            "{}: no output transition column before '{}'",
            path.display(),
            DELAY_COLUMN
        )));
    }
    let output_col = delay_col - 1;
    let find = |name: &str| headers.iter().position(|h| h.trim() == name);
    let (exact_col, measured_col, time_col) =
        (find("exact_prob"), find("measured_prob"), find("sim_time"));

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let parse_class = |col: usize| -> Result<Option<TransitionClass>, TableError> {
            let field = record.get(col).unwrap_or("").trim();
            if field.is_empty() || field == MERGED_OUTPUT {
                return Ok(None);
            }
            field
                .parse::<TransitionClass>()
                .map(Some)
                .map_err(|_| TableError::BadValue {
                    line: line_of(&record),
                    column: headers.get(col).unwrap_or("").to_string(),
                    value: field.to_string(),
                })
        };
        let mut inputs = Vec::with_capacity(output_col);
        for col in 0..output_col {
            let class = parse_class(col)?.ok_or_else(|| TableError::BadValue {
                line: line_of(&record),
                column: headers.get(col).unwrap_or("").to_string(),
                value: record.get(col).unwrap_or("").to_string(),
            })?;
            inputs.push(class);
        }
        rows.push(ScenarioRow {
            inputs,
            output: parse_class(output_col)?,
            delay: parse_opt_f64(&record, Some(delay_col), DELAY_COLUMN)?,
            exact_prob: parse_opt_f64(&record, exact_col, "exact_prob")?,
            measured_prob: parse_opt_f64(&record, measured_col, "measured_prob")?,
            sim_time: parse_opt_f64(&record, time_col, "sim_time")?.filter(|&t| t >= 0.),
        });
    }
    clilog::debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(ScenarioRows {
        input_names: headers
            .iter()
            .take(output_col)
            .map(|s| s.trim().to_string())
            .collect(),
        output_name: headers.get(output_col).unwrap_or("").trim().to_string(),
        rows,
    })
}

// ── Per-cycle rows ──────────────────────────────────────────────────────────

/// Streams one row per cycle: inputs, output transition, delay.
pub struct CycleRowWriter {
    wtr: csv::Writer<File>,
    output: usize,
    delay_scale: f64,
    rows: usize,
}

impl CycleRowWriter {
    pub fn create(
        path: &Path,
        signals: &SignalSet,
        output: usize,
        delay_scale: f64,
    ) -> Result<Self, TableError> {
        let output_name = signals.outputs.get(output).ok_or_else(|| {
            TableError::Schema(format!("output index {} out of range", output))
        })?;
        let mut wtr = open_writer(path)?;
        let header = signals
            .inputs
            .iter()
            .map(|s| s.as_str())
            .chain([output_name.as_str(), DELAY_COLUMN]);
        wtr.write_record(header)?;
        Ok(CycleRowWriter {
            wtr,
            output,
            delay_scale,
            rows: 0,
        })
    }

    pub fn write(&mut self, record: &CycleTransitionRecord) -> Result<(), TableError> {
        let resp = record
            .response(self.output)
            .map_err(|e| TableError::Schema(e.to_string()))?;
        let delay = (resp.delay as f64 * self.delay_scale).to_string();
        let row = record
            .inputs
            .iter()
            .map(|c| c.as_str())
            .chain([resp.transition.as_str(), delay.as_str()]);
        self.wtr.write_record(row)?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and return the number of rows written.
    pub fn finish(mut self) -> Result<usize, TableError> {
        self.wtr.flush()?;
        Ok(self.rows)
    }
}

/// Streams one row per cycle with every output: for each output its
/// transition, `delay:<output>` and `sim_time:<output>` (launch plus delay).
pub struct MultiOutputRowWriter {
    wtr: csv::Writer<File>,
    num_outputs: usize,
    delay_scale: f64,
    rows: usize,
}

impl MultiOutputRowWriter {
    pub fn create(path: &Path, signals: &SignalSet, delay_scale: f64) -> Result<Self, TableError> {
        let mut wtr = open_writer(path)?;
        let mut header = signals
            .inputs
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        for out in &signals.outputs {
            header.push(out.to_string());
            header.push(output_delay_column(out));
            header.push(format!("sim_time:{}", out));
        }
        wtr.write_record(&header)?;
        Ok(MultiOutputRowWriter {
            wtr,
            num_outputs: signals.outputs.len(),
            delay_scale,
            rows: 0,
        })
    }

    pub fn write(&mut self, record: &CycleTransitionRecord) -> Result<(), TableError> {
        if record.outputs.len() != self.num_outputs {
            return Err(TableError::Schema(format!(
                "cycle {} has {} outputs, table has {}",
                record.cycle,
                record.outputs.len(),
                self.num_outputs
            )));
        }
        let mut row = record
            .inputs
            .iter()
            .map(|c| c.as_str().to_string())
            .collect::<Vec<_>>();
        for resp in &record.outputs {
            row.push(resp.transition.as_str().to_string());
            row.push((resp.delay as f64 * self.delay_scale).to_string());
            row.push(((record.launch + resp.delay) as f64 * self.delay_scale).to_string());
        }
        self.wtr.write_record(&row)?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and return the number of rows written.
    pub fn finish(mut self) -> Result<usize, TableError> {
        self.wtr.flush()?;
        Ok(self.rows)
    }
}

/// Output column of per-cycle maximum tables.
pub const MAX_COLUMN: &str = "MAX";

/// Streams one row per cycle with the largest delay over all outputs. The
/// output transition is written as `-` and `sim_time` is the settle time
/// of the slowest output.
pub struct MaxRowWriter {
    wtr: csv::Writer<File>,
    delay_scale: f64,
    rows: usize,
}

impl MaxRowWriter {
    pub fn create(path: &Path, signals: &SignalSet, delay_scale: f64) -> Result<Self, TableError> {
        if signals.outputs.is_empty() {
            return Err(TableError::Schema("no outputs to take the maximum over".into()));
        }
        let mut wtr = open_writer(path)?;
        let header = signals
            .inputs
            .iter()
            .map(|s| s.as_str())
            .chain([MAX_COLUMN, DELAY_COLUMN, "sim_time"]);
        wtr.write_record(header)?;
        Ok(MaxRowWriter {
            wtr,
            delay_scale,
            rows: 0,
        })
    }

    pub fn write(&mut self, record: &CycleTransitionRecord) -> Result<(), TableError> {
        let (_, resp) = record.max_response().ok_or_else(|| {
            TableError::Schema(format!("cycle {} has no outputs", record.cycle))
        })?;
        let delay = (resp.delay as f64 * self.delay_scale).to_string();
        let sim_time = ((record.launch + resp.delay) as f64 * self.delay_scale).to_string();
        let row = record
            .inputs
            .iter()
            .map(|c| c.as_str())
            .chain([MERGED_OUTPUT, delay.as_str(), sim_time.as_str()]);
        self.wtr.write_record(row)?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and return the number of rows written.
    pub fn finish(mut self) -> Result<usize, TableError> {
        self.wtr.flush()?;
        Ok(self.rows)
    }
}

/// Reads the `delay` column of a table in fixed-size chunks. Rows with an
/// empty delay (unseen scenarios) are skipped.
pub struct DelayColumnReader {
    rdr: csv::Reader<File>,
    delay_col: usize,
    record: csv::StringRecord,
}

impl DelayColumnReader {
    pub fn open(path: &Path) -> Result<Self, TableError> {
        Self::open_column(path, DELAY_COLUMN)
    }

    /// Read the named column instead, e.g. `delay:<output>` of a
    /// multi-output table.
    pub fn open_column(path: &Path, column: &str) -> Result<Self, TableError> {
        let mut rdr = open_reader(path)?;
        let delay_col = column_index(rdr.headers()?, path, column)?;
        Ok(DelayColumnReader {
            rdr,
            delay_col,
            record: csv::StringRecord::new(),
        })
    }

    /// Replace `buf` with up to `chunk_size` delays. Returns how many were
    /// read; zero means the table is exhausted.
    pub fn next_chunk(&mut self, buf: &mut Vec<f64>, chunk_size: usize) -> Result<usize, TableError> {
        buf.clear();
        while buf.len() < chunk_size {
            if !self.rdr.read_record(&mut self.record)? {
                break;
            }
            if let Some(d) = parse_opt_f64(&self.record, Some(self.delay_col), DELAY_COLUMN)? {
                buf.push(d);
            }
        }
        Ok(buf.len())
    }
}

/// Number of delays in a table, read in chunks.
pub fn count_delays(path: &Path, chunk_size: usize) -> Result<usize, TableError> {
    let mut rdr = DelayColumnReader::open(path)?;
    let mut buf = Vec::with_capacity(chunk_size);
    let mut total = 0;
    loop {
        let n = rdr.next_chunk(&mut buf, chunk_size)?;
        if n == 0 {
            return Ok(total);
        }
        total += n;
    }
}

// ── Histograms ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct HistogramCsvRow {
    delay: f64,
    probability: f64,
}

pub fn write_histogram(path: &Path, hist: &DelayHistogram) -> Result<(), TableError> {
    let mut wtr = open_writer(path)?;
    for r in hist.rows() {
        wtr.serialize(HistogramCsvRow {
            delay: r.delay,
            probability: r.probability,
        })?;
    }
    wtr.flush()?;
    clilog::debug!("Wrote {} histogram rows to {}", hist.len(), path.display());
    Ok(())
}

/// Load a histogram table. The probabilities are checked to sum to 1
/// within `tolerance`.
pub fn read_histogram(path: &Path, tolerance: f64) -> Result<DelayHistogram, TableError> {
    let mut rdr = open_reader(path)?;
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: HistogramCsvRow = result?;
        rows.push(HistogramRow {
            delay: row.delay,
            probability: row.probability,
        });
    }
    DelayHistogram::from_rows(rows, tolerance)
        .map_err(|e| TableError::Schema(format!("{}: {}", path.display(), e)))
}
