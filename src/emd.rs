// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Earth mover's distance between delay histograms.
//!
//! Both histograms are laid over the union of their delay values with
//! missing entries zero-filled. The ground distance between two support
//! points is `|d_i - d_j|`. On a line with that ground distance, the
//! monotone (north-west corner) transport plan over the sorted support is
//! optimal, so no general transportation solver is needed.

use crate::histogram::{DelayHistogram, DelayKey};
use crate::stats::StatsError;
use std::collections::BTreeMap;

/// Largest tolerated difference between the total masses of two histograms.
pub const MASS_TOLERANCE: f64 = 1e-6;

/// Union support with both probability vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedHistograms {
    pub delays: Vec<f64>,
    pub left: Vec<f64>,
    pub right: Vec<f64>,
}

impl AlignedHistograms {
    pub fn new(a: &DelayHistogram, b: &DelayHistogram) -> Result<Self, StatsError> {
        let mut merged: BTreeMap<DelayKey, (f64, f64)> = BTreeMap::new();
        for r in a.rows() {
            merged.entry(DelayKey::new(r.delay)?).or_default().0 += r.probability;
        }
        for r in b.rows() {
            merged.entry(DelayKey::new(r.delay)?).or_default().1 += r.probability;
        }
        let mut aligned = AlignedHistograms {
            delays: Vec::with_capacity(merged.len()),
            left: Vec::with_capacity(merged.len()),
            right: Vec::with_capacity(merged.len()),
        };
        for (k, (l, r)) in merged {
            aligned.delays.push(k.value());
            aligned.left.push(l);
            aligned.right.push(r);
        }
        Ok(aligned)
    }

    /// `|d_i - d_j|` over the union support.
    pub fn ground_distance(&self) -> Vec<Vec<f64>> {
        self.delays
            .iter()
            .map(|di| self.delays.iter().map(|dj| (di - dj).abs()).collect())
            .collect()
    }
}

/// Minimum cost of moving the mass of `a` onto `b`.
pub fn emd(a: &DelayHistogram, b: &DelayHistogram) -> Result<f64, StatsError> {
    let aligned = AlignedHistograms::new(a, b)?;
    let (mass_l, mass_r) = (
        aligned.left.iter().sum::<f64>(),
        aligned.right.iter().sum::<f64>(),
    );
    if (mass_l - mass_r).abs() > MASS_TOLERANCE {
        return Err(StatsError::MassMismatch {
            left: mass_l,
            right: mass_r,
        });
    }
    let ground = aligned.ground_distance();

    let mut supply = aligned.left.clone();
    let mut demand = aligned.right.clone();
    let (mut i, mut j) = (0, 0);
    let mut cost = 0.;
    let n = aligned.delays.len();
    while i < n && j < n {
        let flow = supply[i].min(demand[j]);
        cost += flow * ground[i][j];
        supply[i] -= flow;
        demand[j] -= flow;
        if supply[i] <= 0. {
            i += 1;
        } else {
            j += 1;
        }
    }
    Ok(cost)
}

/// Score each candidate against `reference`, closest first.
pub fn rank_by_emd<'a>(
    reference: &DelayHistogram,
    candidates: &'a [(String, DelayHistogram)],
) -> Result<Vec<(&'a str, f64)>, StatsError> {
    let mut scores = candidates
        .iter()
        .map(|(name, h)| Ok((name.as_str(), emd(reference, h)?)))
        .collect::<Result<Vec<_>, StatsError>>()?;
    scores.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(scores)
}
