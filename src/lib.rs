// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! tracedelay: simulation-derived delay distributions for statistical timing
//! verification.
//!
//! Given a gate-level simulation trace of a clocked design, tracedelay
//! classifies what every input and output did in each clock cycle, folds the
//! cycles into input transition scenarios, and turns the measured output
//! delays into a probability distribution. The convergence engine then
//! decides how many randomly sampled cycles are needed before the mean delay
//! or the frequency of the worst-case delay can be trusted.
//!
//! # Pipeline
//!
//! ```text
//! VCD
//!   → Waveform          (waveform: per-net event timelines)
//!   → ClockEdges        (clock: rising/falling edges of the global clock)
//!   → cycle records     (scenario: transition classes + delay per cycle)
//!   → ScenarioTable     (dedup: 4^k scenario universe, determinism check)
//!   → DelayHistogram    (histogram: normalized delay distribution)
//!   → Convergence       (converge: sample size for mean / max frequency)
//! ```
//!
//! # Key modules
//!
//! - [`logic`]: logic values and the edge classifier
//! - [`waveform`]: event timelines and the VCD loader
//! - [`clock`]: clock segmentation
//! - [`scenario`]: per-cycle transition records and the capture policy
//! - [`extract`]: bounded-memory cycle extraction from the VCD stream
//! - [`dedup`]: scenario deduplication and missing-scenario reporting
//! - [`histogram`]: delay histograms with streaming accumulation
//! - [`stats`]: Student-t and Clopper–Pearson intervals
//! - [`sampling`]: in-memory and streamed delay populations
//! - [`converge`]: the binary-search convergence engine
//! - [`emd`]: earth mover's distance between histograms
//! - [`table`]: CSV scenario, cycle-row and histogram tables
//! - [`compare`]: scenario table comparison and max merge
//! - [`endpoint`]: endpoint arrival times from a timing report
//! - [`config`]: JSON analysis configuration

pub mod error;

pub mod logic;

pub mod waveform;

pub mod clock;

pub mod scenario;

pub mod extract;

pub mod dedup;

pub mod histogram;

pub mod stats;

pub mod sampling;

pub mod converge;

pub mod emd;

pub mod table;

pub mod compare;

pub mod endpoint;

pub mod config;
