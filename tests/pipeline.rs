// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! End-to-end: VCD to scenario table, cycle rows, histogram and convergence.

use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use tracedelay::converge::{search_mean, SearchConfig};
use tracedelay::dedup::deduplicate;
use tracedelay::extract::CycleStream;
use tracedelay::histogram::{DelayHistogram, HistogramAccumulator, PROBABILITY_TOLERANCE};
use tracedelay::logic::TransitionClass::*;
use tracedelay::sampling::{CsvDelaySource, DelaySource};
use tracedelay::scenario::{build_cycle_records, CapturePolicy, SignalSet};
use tracedelay::table::{
    read_histogram, read_scenario_table, write_histogram, write_scenario_table, CycleRowWriter,
    DelayColumnReader,
};
use tracedelay::waveform::load_vcd;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

#[test]
fn and2_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let signals = SignalSet::new("clk", &["a", "b"], &["y"]);
    let wf = load_vcd(&fixture("and2.vcd"), Some("tb/dut"), &signals.all_nets()).unwrap();
    let records = build_cycle_records(&wf, &signals, CapturePolicy::HalfCycle).unwrap();
    assert_eq!(records.len(), 4);
    let policy = CapturePolicy::HalfCycle;
    let streamed = CycleStream::open(&fixture("and2.vcd"), Some("tb/dut"), &signals, policy)
        .unwrap()
        .collect()
        .unwrap();
    assert_eq!(streamed, records);

    // Scenario table: 4 of 16 scenarios seen.
    let table = deduplicate(&records, 2, 0).unwrap();
    assert_eq!(table.seen(), 4);
    assert_eq!(table.missing_fraction(), 0.75);
    let scenarios_path = dir.path().join("scenarios.csv");
    write_scenario_table(&scenarios_path, &signals, 0, &table, wf.ps_per_tick).unwrap();
    let rows = read_scenario_table(&scenarios_path).unwrap();
    assert_eq!(rows.input_names, vec!["a", "b"]);
    assert_eq!(rows.output_name, "y");
    assert_eq!(rows.rows.len(), 16);
    let hr = rows
        .rows
        .iter()
        .find(|r| r.inputs == [High, Rise])
        .unwrap();
    assert_eq!((hr.output, hr.delay), (Some(Rise), Some(2.)));
    assert_eq!(rows.delays().count(), 4);

    // Cycle rows streamed to disk and read back in small chunks.
    let cycles_path = dir.path().join("cycles.csv");
    let mut writer = CycleRowWriter::create(&cycles_path, &signals, 0, wf.ps_per_tick).unwrap();
    for r in &records {
        writer.write(r).unwrap();
    }
    assert_eq!(writer.finish().unwrap(), 4);

    let mut rdr = DelayColumnReader::open(&cycles_path).unwrap();
    let mut acc = HistogramAccumulator::new();
    let mut buf = Vec::new();
    while rdr.next_chunk(&mut buf, 3).unwrap() > 0 {
        acc.add_chunk(&buf).unwrap();
    }
    let streamed = acc.finalize().unwrap();
    let direct = DelayHistogram::from_cycle_records(&records, 0, wf.ps_per_tick).unwrap();
    assert_eq!(streamed, direct);
    assert_eq!(streamed.probability_of(0.), 0.5);
    assert_eq!(streamed.probability_of(2.), 0.25);
    assert_eq!(streamed.max_delay(), 3.);

    let hist_path = dir.path().join("histogram.csv");
    write_histogram(&hist_path, &streamed).unwrap();
    let reread = read_histogram(&hist_path, PROBABILITY_TOLERANCE).unwrap();
    assert_eq!(reread.rows(), streamed.rows());

    // Mean of {0, 2, 3, 0} with a generous target converges.
    let mut source = CsvDelaySource::open(&cycles_path, 2).unwrap();
    assert_eq!(source.len(), 4);
    let cfg = SearchConfig {
        confidence: 0.9,
        target_interval_length: 100.,
        ..Default::default()
    };
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let result = search_mean(&mut source, &cfg, &mut rng).unwrap();
    assert!(result.is_converged());
    assert!(result.sample_size() >= 2 && result.sample_size() <= 4);
}
