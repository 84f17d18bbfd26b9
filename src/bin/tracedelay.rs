// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Command line interface of tracedelay.
//!
//! Exit status: 0 on success (or convergence), 1 on any error, 2 when a
//! convergence search runs out of samples.

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use tracedelay::compare::{compare_scenarios, merge_max};
use tracedelay::config::AnalysisConfig;
use tracedelay::converge::{
    interval_coverage, sample_histograms, search_max_probability, search_mean, Convergence,
};
use tracedelay::dedup::ScenarioAccumulator;
use tracedelay::emd::rank_by_emd;
use tracedelay::endpoint::EndpointTiming;
use tracedelay::histogram::{HistogramAccumulator, ScenarioWeighting, PROBABILITY_TOLERANCE};
use tracedelay::sampling::{CsvDelaySource, DEFAULT_CHUNK_SIZE};
use tracedelay::extract::CycleStream;
use tracedelay::scenario::CapturePolicy;
use tracedelay::table::{
    read_histogram, read_scenario_table, write_histogram, write_scenario_rows,
    write_scenario_table, CycleRowWriter, DelayColumnReader, MaxRowWriter, MultiOutputRowWriter,
};

const EXIT_NOT_CONVERGED: i32 = 2;

type CmdResult = Result<i32, Box<dyn Error>>;

#[derive(Parser)]
#[command(
    name = "tracedelay",
    about = "tracedelay: delay distributions and sample-size convergence from simulation traces"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract per-cycle transition scenarios from a VCD.
    ///
    /// Streams the VCD once and writes the scenario table, the per-cycle
    /// delay rows and the delay histogram of one output, plus optional
    /// per-cycle tables over all outputs.
    Extract(ExtractArgs),

    /// Build a delay histogram from the delay column of a table.
    Histogram(HistogramArgs),

    /// Find the smallest sample size at which a delay statistic converges.
    Converge(ConvergeArgs),

    /// Rank histograms by earth mover's distance to a reference.
    Emd(EmdArgs),

    /// Compare the delays of two scenario tables scenario by scenario.
    Compare(CompareArgs),

    /// Merge scenario tables into their per-scenario maximum delay.
    MaxMerge(MaxMergeArgs),

    /// Summarize endpoint arrival times from a timing report.
    Endpoints(EndpointsArgs),
}

#[derive(Parser)]
struct ExtractArgs {
    /// Simulation waveform.
    vcd: PathBuf,

    /// Analysis configuration JSON.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Clock net name.
    #[clap(long)]
    clock: Option<String>,

    /// Input nets in scenario key order (comma-separated).
    #[clap(long, value_delimiter = ',')]
    inputs: Vec<String>,

    /// Output nets (comma-separated).
    #[clap(long, value_delimiter = ',')]
    outputs: Vec<String>,

    /// The output whose response is tabulated. Defaults to the first.
    #[clap(long)]
    output: Option<String>,

    /// Scope path of the monitored nets in the VCD.
    #[clap(long)]
    vcd_scope: Option<String>,

    /// The stimulus enumerates all input transitions.
    #[clap(long)]
    exhaustive: bool,

    /// Capture edge: half_cycle or full_cycle. Defaults from --exhaustive.
    #[clap(long)]
    capture: Option<CapturePolicy>,

    /// Scenario table output path.
    #[clap(long)]
    scenarios_out: Option<PathBuf>,

    /// Per-cycle delay rows output path.
    #[clap(long)]
    cycles_out: Option<PathBuf>,

    /// Histogram output path.
    #[clap(long)]
    histogram_out: Option<PathBuf>,

    /// Per-cycle rows with the transition and delay of every output.
    #[clap(long)]
    outputs_out: Option<PathBuf>,

    /// Per-cycle rows with the largest delay over all outputs.
    #[clap(long)]
    max_out: Option<PathBuf>,

    /// Histogram of the per-cycle largest delay over all outputs.
    #[clap(long)]
    max_histogram_out: Option<PathBuf>,
}

#[derive(Parser)]
struct HistogramArgs {
    /// Scenario or cycle-row table.
    table: PathBuf,

    /// Histogram output path.
    #[clap(short, long)]
    output: PathBuf,

    /// Weight scenario-table rows instead of streaming one case per row:
    /// `uniform` over seen scenarios or by `occurrence`.
    #[clap(long, value_enum)]
    weighting: Option<Weighting>,

    /// Rows read per chunk.
    #[clap(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum Weighting {
    Uniform,
    Occurrence,
}

impl From<Weighting> for ScenarioWeighting {
    fn from(w: Weighting) -> Self {
        match w {
            Weighting::Uniform => ScenarioWeighting::Uniform,
            Weighting::Occurrence => ScenarioWeighting::Occurrence,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchMode {
    Mean,
    Max,
}

#[derive(Parser)]
struct ConvergeArgs {
    /// Cycle-row table holding the delay population.
    table: PathBuf,

    /// Statistic to converge.
    #[clap(long, value_enum, default_value = "mean")]
    search: SearchMode,

    /// Analysis configuration JSON supplying search parameters.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Known global maximum delay. Defaults to the observed maximum.
    #[clap(long)]
    true_max: Option<f64>,

    #[clap(long)]
    confidence: Option<f64>,

    /// Mean mode: largest acceptable interval length.
    #[clap(long)]
    target_length: Option<f64>,

    /// Max mode: largest acceptable interval width relative to the
    /// frequency of the maximum.
    #[clap(long)]
    target_ratio: Option<f64>,

    /// Stop bisecting once the bracket is this narrow.
    #[clap(long)]
    tolerance: Option<usize>,

    #[clap(long)]
    seed: Option<u64>,

    /// After convergence, draw this many samples of the converged size and
    /// report how many sample means fall inside the interval.
    #[clap(long, default_value_t = 0)]
    coverage_samples: usize,

    /// Rows read per chunk.
    #[clap(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

#[derive(Parser)]
struct EmdArgs {
    /// Reference histogram.
    reference: PathBuf,

    /// Histograms to score.
    #[clap(required = true)]
    candidates: Vec<PathBuf>,
}

#[derive(Parser)]
struct CompareArgs {
    left: PathBuf,
    right: PathBuf,
}

#[derive(Parser)]
struct MaxMergeArgs {
    /// Scenario tables over the same inputs.
    #[clap(short, long, num_args = 1.., required = true)]
    inputs: Vec<PathBuf>,

    /// Merged table output path.
    #[clap(short, long)]
    output: PathBuf,
}

#[derive(Parser)]
struct EndpointsArgs {
    /// Endpoint timing JSON report.
    report: PathBuf,

    /// Simulated histogram to compare the worst arrival against.
    #[clap(long)]
    histogram: Option<PathBuf>,
}

fn cmd_extract(args: ExtractArgs) -> CmdResult {
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if args.clock.is_some() {
        config.clock = args.clock.clone();
    }
    if !args.inputs.is_empty() {
        config.inputs = args.inputs.clone();
    }
    if !args.outputs.is_empty() {
        config.outputs = args.outputs.clone();
    }
    if args.vcd_scope.is_some() {
        config.vcd_scope = args.vcd_scope.clone();
    }
    config.exhaustive |= args.exhaustive;
    if args.capture.is_some() {
        config.capture = args.capture;
    }

    let signals = config.signals()?;
    let output = match &args.output {
        Some(name) => signals.output_index(name)?,
        None => 0,
    };
    let policy = config.capture_policy();
    clilog::info!(
        "Extracting {} inputs -> '{}' ({} capture) from {}",
        signals.inputs.len(),
        signals.outputs[output],
        policy,
        args.vcd.display()
    );

    let stream = CycleStream::open(&args.vcd, config.vcd_scope.as_deref(), &signals, policy)?;
    let scale = stream.ps_per_tick();

    let timer = clilog::stimer!("extract");
    let mut scenarios = ScenarioAccumulator::new(signals.inputs.len(), output)?;
    let mut hist = HistogramAccumulator::new();
    let mut max_hist = HistogramAccumulator::new();
    let mut cycle_rows = match &args.cycles_out {
        Some(path) => Some(CycleRowWriter::create(path, &signals, output, scale)?),
        None => None,
    };
    let mut output_rows = match &args.outputs_out {
        Some(path) => Some(MultiOutputRowWriter::create(path, &signals, scale)?),
        None => None,
    };
    let mut max_rows = match &args.max_out {
        Some(path) => Some(MaxRowWriter::create(path, &signals, scale)?),
        None => None,
    };
    let summary = stream.run(|record| -> Result<(), Box<dyn Error>> {
        scenarios.add(&record)?;
        hist.add(record.response(output)?.delay as f64 * scale)?;
        if let Some((_, slowest)) = record.max_response() {
            max_hist.add(slowest.delay as f64 * scale)?;
        }
        if let Some(w) = cycle_rows.as_mut() {
            w.write(&record)?;
        }
        if let Some(w) = output_rows.as_mut() {
            w.write(&record)?;
        }
        if let Some(w) = max_rows.as_mut() {
            w.write(&record)?;
        }
        Ok(())
    })?;
    let table = scenarios.finalize();
    clilog::finish!(timer);

    if let Some(w) = cycle_rows {
        let n = w.finish()?;
        clilog::info!("Wrote {} cycle rows", n);
    }
    if let Some(w) = output_rows {
        let n = w.finish()?;
        clilog::info!("Wrote {} rows over {} outputs", n, signals.outputs.len());
    }
    if let Some(w) = max_rows {
        let n = w.finish()?;
        clilog::info!("Wrote {} per-cycle maximum rows", n);
    }
    if let Some(path) = &args.scenarios_out {
        write_scenario_table(path, &signals, output, &table, scale)?;
    }
    let histogram = hist.finalize()?;
    clilog::info!(
        "{} cycles: mean delay {:.3} ps, max delay {} ps",
        histogram.cases(),
        histogram.mean(),
        histogram.max_delay()
    );
    if let Some(path) = &args.histogram_out {
        write_histogram(path, &histogram)?;
    }
    if let Some(path) = &args.max_histogram_out {
        let max_histogram = max_hist.finalize()?;
        clilog::info!(
            "Slowest output per cycle: mean delay {:.3} ps, max delay {} ps",
            max_histogram.mean(),
            max_histogram.max_delay()
        );
        write_histogram(path, &max_histogram)?;
    }
    println!(
        "cycles={} seen={} unseen={} missing_fraction={:.6}",
        summary.cycles,
        table.seen(),
        table.unseen(),
        table.missing_fraction()
    );
    Ok(0)
}

fn cmd_histogram(args: HistogramArgs) -> CmdResult {
    let histogram = match args.weighting {
        Some(w) => read_scenario_table(&args.table)?.histogram(w.into())?,
        None => {
            let mut rdr = DelayColumnReader::open(&args.table)?;
            let mut acc = HistogramAccumulator::new();
            let mut buf = Vec::with_capacity(args.chunk_size);
            while rdr.next_chunk(&mut buf, args.chunk_size.max(1))? > 0 {
                acc.add_chunk(&buf)?;
            }
            acc.finalize()?
        }
    };
    write_histogram(&args.output, &histogram)?;
    clilog::info!(
        "{} delays -> {} histogram rows, mean {:.3}",
        histogram.cases(),
        histogram.len(),
        histogram.mean()
    );
    Ok(0)
}

fn cmd_converge(args: ConvergeArgs) -> CmdResult {
    let mut cfg = match &args.config {
        Some(path) => AnalysisConfig::load(path)?.search,
        None => Default::default(),
    };
    cfg.confidence = args.confidence.unwrap_or(cfg.confidence);
    cfg.target_interval_length = args.target_length.unwrap_or(cfg.target_interval_length);
    cfg.target_relative_width = args.target_ratio.unwrap_or(cfg.target_relative_width);
    cfg.tolerance = args.tolerance.unwrap_or(cfg.tolerance);
    cfg.seed = args.seed.unwrap_or(cfg.seed);

    let mut source = CsvDelaySource::open(&args.table, args.chunk_size)?;
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(cfg.seed);
    let result = match args.search {
        SearchMode::Mean => search_mean(&mut source, &cfg, &mut rng)?,
        SearchMode::Max => search_max_probability(&mut source, args.true_max, &cfg, &mut rng)?,
    };

    match result {
        Convergence::Converged {
            sample_size,
            interval,
            iterations,
        } => {
            println!(
                "converged sample_size={} interval=[{}, {}] estimate={} iterations={}",
                sample_size, interval.lower, interval.upper, interval.estimate, iterations
            );
            if args.coverage_samples > 0 {
                let hists =
                    sample_histograms(&mut source, args.coverage_samples, sample_size, &mut rng)?;
                let coverage = interval_coverage(&hists, &interval);
                println!("coverage={:.4} (nominal {})", coverage, cfg.confidence);
            }
            Ok(0)
        }
        Convergence::NotConverged {
            best_sample_size,
            reason,
        } => {
            clilog::warn!("Not converged: {}", reason);
            println!("not_converged best_sample_size={}", best_sample_size);
            Ok(EXIT_NOT_CONVERGED)
        }
    }
}

fn cmd_emd(args: EmdArgs) -> CmdResult {
    let reference = read_histogram(&args.reference, PROBABILITY_TOLERANCE)?;
    let candidates = args
        .candidates
        .iter()
        .map(|p| {
            read_histogram(p, PROBABILITY_TOLERANCE).map(|h| (p.display().to_string(), h))
        })
        .collect::<Result<Vec<_>, _>>()?;
    for (name, score) in rank_by_emd(&reference, &candidates)? {
        println!("EMD {}: {}", name, score);
    }
    Ok(0)
}

fn cmd_compare(args: CompareArgs) -> CmdResult {
    let left = read_scenario_table(&args.left)?;
    let right = read_scenario_table(&args.right)?;
    let report = compare_scenarios(&left, &right)?;
    for d in &report.diffs {
        let inputs = d
            .inputs
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let output = d.output.map(|o| o.as_str()).unwrap_or("-");
        println!(
            "Delay diff: {:+.2} for scenario ({}) -> {}",
            d.difference(),
            inputs,
            output
        );
    }
    Ok(0)
}

fn cmd_max_merge(args: MaxMergeArgs) -> CmdResult {
    let tables = args
        .inputs
        .iter()
        .map(|p| read_scenario_table(p))
        .collect::<Result<Vec<_>, _>>()?;
    let merged = merge_max(&tables)?;
    write_scenario_rows(&args.output, &merged)?;
    clilog::info!(
        "Merged {} tables into {}",
        tables.len(),
        args.output.display()
    );
    Ok(0)
}

fn cmd_endpoints(args: EndpointsArgs) -> CmdResult {
    let timing = EndpointTiming::load(&args.report)?;
    let Some((node, arrival)) = timing.worst() else {
        clilog::warn!("No endpoints in {}", args.report.display());
        return Ok(0);
    };
    println!("worst_endpoint={} arrival_ps={}", node, arrival);
    if let Some(path) = &args.histogram {
        let hist = read_histogram(path, PROBABILITY_TOLERANCE)?;
        let sim_max = hist.max_delay();
        println!(
            "simulated_max_ps={} slack_vs_sim_ps={}",
            sim_max,
            arrival - sim_max
        );
        if sim_max > arrival {
            clilog::warn!(
                TD_SIM_EXCEEDS_STA,
                "Simulated max delay {} ps exceeds the reported arrival {} ps",
                sim_max,
                arrival
            );
        }
    }
    Ok(0)
}

fn main() {
    clilog::init_stderr_color_debug();
    clilog::enable_timer("tracedelay");
    clilog::set_max_print_count(clilog::Level::Warn, "TD_VCD_DUP_NET", 1);
    clilog::set_max_print_count(clilog::Level::Warn, "TD_VCD_UNKNOWN", 10);
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Extract(args) => cmd_extract(args),
        Commands::Histogram(args) => cmd_histogram(args),
        Commands::Converge(args) => cmd_converge(args),
        Commands::Emd(args) => cmd_emd(args),
        Commands::Compare(args) => cmd_compare(args),
        Commands::MaxMerge(args) => cmd_max_merge(args),
        Commands::Endpoints(args) => cmd_endpoints(args),
    };
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            clilog::error!("{}", e);
            std::process::exit(1);
        }
    }
}
