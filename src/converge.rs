// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Sample-size convergence search.
//!
//! Both modes bisect the sample size between a size known to be
//! insufficient and one verified to be sufficient, drawing a fresh random
//! sample at every step:
//!
//! * mean mode accepts `n` when the Student-t interval of the sample mean is
//!   no longer than `target_interval_length`;
//! * max mode accepts `n` when the Clopper–Pearson interval of the
//!   frequency of the maximum delay in the sample contains the population
//!   frequency and its width relative to that frequency is at most
//!   `target_relative_width`.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::histogram::DelayHistogram;
use crate::sampling::DelaySource;
use crate::stats::{
    clopper_pearson, mean_interval, mean_interval_from_moments, ConfidenceInterval,
    RunningMoments, StatsError,
};
use crate::table::TableError;

/// Parameters shared by both search modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Two-sided confidence level of every interval.
    pub confidence: f64,
    /// Mean mode: largest acceptable interval length, in delay units.
    pub target_interval_length: f64,
    /// Stop once the bracket is this narrow.
    pub tolerance: usize,
    /// Max mode: largest acceptable interval width relative to the
    /// population frequency of the maximum.
    pub target_relative_width: f64,
    /// Safety bound on bisection steps.
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            confidence: 0.99,
            target_interval_length: 5.,
            tolerance: 1,
            target_relative_width: 0.05,
            max_iterations: 10_000,
            seed: 0,
        }
    }
}

/// Outcome of a search. Running out of samples is an outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Convergence {
    Converged {
        sample_size: usize,
        /// Interval computed on the accepted sample.
        interval: ConfidenceInterval,
        iterations: usize,
    },
    NotConverged {
        best_sample_size: usize,
        reason: String,
    },
}

impl Convergence {
    pub fn is_converged(&self) -> bool {
        matches!(self, Convergence::Converged { .. })
    }

    pub fn sample_size(&self) -> usize {
        match self {
            Convergence::Converged { sample_size, .. } => *sample_size,
            Convergence::NotConverged {
                best_sample_size, ..
            } => *best_sample_size,
        }
    }
}

#[derive(Debug)]
pub enum SearchError {
    Stats(StatsError),
    Source(TableError),
    InvalidConfig(String),
    IterationCap { iterations: usize, lo: usize, hi: usize },
}

impl std::fmt::Display for SearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchError::Stats(e) => write!(f, "{}", e),
            SearchError::Source(e) => write!(f, "{}", e),
            SearchError::InvalidConfig(msg) => write!(f, "invalid search configuration: {}", msg),
            SearchError::IterationCap { iterations, lo, hi } => write!(
                f,
                "binary search did not terminate after {} iterations (bracket [{}, {}])",
                iterations, lo, hi
            ),
        }
    }
}

impl std::error::Error for SearchError {}

impl From<StatsError> for SearchError {
    fn from(e: StatsError) -> Self {
        SearchError::Stats(e)
    }
}

impl From<TableError> for SearchError {
    fn from(e: TableError) -> Self {
        SearchError::Source(e)
    }
}

impl SearchConfig {
    fn validate(&self) -> Result<(), SearchError> {
        if !(self.confidence > 0. && self.confidence < 1.) {
            return Err(StatsError::InvalidConfidence(self.confidence).into());
        }
        if self.tolerance == 0 {
            return Err(SearchError::InvalidConfig("tolerance must be at least 1".into()));
        }
        if self.max_iterations == 0 {
            return Err(SearchError::InvalidConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(self.target_interval_length >= 0.) || !(self.target_relative_width >= 0.) {
            return Err(SearchError::InvalidConfig(
                "targets must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Smallest accepted size in `(lo, hi]`, given `hi` is accepted with
/// interval `hi_interval`.
fn bisect<F>(
    mut lo: usize,
    mut hi: usize,
    mut hi_interval: ConfidenceInterval,
    cfg: &SearchConfig,
    mut accept: F,
) -> Result<(usize, ConfidenceInterval, usize), SearchError>
where
    F: FnMut(usize) -> Result<(bool, Option<ConfidenceInterval>), SearchError>,
{
    let mut iterations = 0;
    while hi - lo > cfg.tolerance {
        if iterations >= cfg.max_iterations {
            return Err(SearchError::IterationCap { iterations, lo, hi });
        }
        iterations += 1;
        let mid = lo + (hi - lo) / 2;
        match accept(mid)? {
            (true, Some(ci)) => {
                hi = mid;
                hi_interval = ci;
            }
            _ => lo = mid,
        }
    }
    Ok((hi, hi_interval, iterations))
}

/// Smallest sample size whose mean interval meets the target length.
pub fn search_mean<S, R>(
    source: &mut S,
    cfg: &SearchConfig,
    rng: &mut R,
) -> Result<Convergence, SearchError>
where
    S: DelaySource,
    R: Rng + ?Sized,
{
    cfg.validate()?;
    let timer = clilog::stimer!("search_mean");
    let n_total = source.len();
    if n_total < 2 {
        return Ok(Convergence::NotConverged {
            best_sample_size: n_total,
            reason: format!("population of {} is too small for a mean interval", n_total),
        });
    }

    let mut moments = RunningMoments::new();
    source.for_each_chunk(&mut |chunk| {
        moments.extend(chunk);
        Ok(())
    })?;
    let full = mean_interval_from_moments(&moments, cfg.confidence)?;
    clilog::info!(
        "Population of {}: mean {} (interval length {:.6}, target {})",
        n_total,
        full,
        full.length(),
        cfg.target_interval_length
    );
    if full.length() > cfg.target_interval_length {
        return Ok(Convergence::NotConverged {
            best_sample_size: n_total,
            reason: format!(
                "interval length {:.6} over all {} samples exceeds target {}",
                full.length(),
                n_total,
                cfg.target_interval_length
            ),
        });
    }

    let (sample_size, interval, iterations) = bisect(1, n_total, full, cfg, |n| {
        if n < 2 {
            return Ok((false, None));
        }
        let sample = source.sample(n, rng)?;
        let ci = mean_interval(&sample, cfg.confidence)?;
        let ok = ci.length() <= cfg.target_interval_length;
        clilog::debug!("trial n={}: mean {} length {:.6} -> {}", n, ci, ci.length(), ok);
        Ok((ok, Some(ci)))
    })?;
    clilog::info!(
        "Mean converged at n={} after {} trials: {}",
        sample_size,
        iterations,
        interval
    );
    clilog::finish!(timer);
    Ok(Convergence::Converged {
        sample_size,
        interval,
        iterations,
    })
}

/// Smallest sample size at which the frequency of the maximum delay is
/// estimated stably.
///
/// `true_max` defaults to the largest delay in the population. If it never
/// occurs, the search stops without probing.
pub fn search_max_probability<S, R>(
    source: &mut S,
    true_max: Option<f64>,
    cfg: &SearchConfig,
    rng: &mut R,
) -> Result<Convergence, SearchError>
where
    S: DelaySource,
    R: Rng + ?Sized,
{
    cfg.validate()?;
    let timer = clilog::stimer!("search_max_probability");
    let n_total = source.len();

    let mut observed_max = f64::NEG_INFINITY;
    let mut max_count = 0u64;
    let mut target_count = 0u64;
    source.for_each_chunk(&mut |chunk| {
        for &d in chunk {
            if d > observed_max {
                observed_max = d;
                max_count = 0;
            }
            if d == observed_max {
                max_count += 1;
            }
            if Some(d) == true_max {
                target_count += 1;
            }
        }
        Ok(())
    })?;
    let (max_delay, count) = match true_max {
        Some(m) => (m, target_count),
        None => (observed_max, max_count),
    };
    if count == 0 {
        return Ok(Convergence::NotConverged {
            best_sample_size: 0,
            reason: format!("max delay {} not found in {} samples", max_delay, n_total),
        });
    }
    if observed_max > max_delay {
        clilog::warn!(
            TD_MAX_EXCEEDED,
            "Observed delay {} exceeds the specified maximum {}",
            observed_max,
            max_delay
        );
    }

    let p_full = count as f64 / n_total as f64;
    let full = clopper_pearson(count, n_total as u64, cfg.confidence)?;
    clilog::info!(
        "Max delay {} occurs {} times in {} samples: p = {}",
        max_delay,
        count,
        n_total,
        full
    );
    if full.relative_width_to(p_full) > cfg.target_relative_width {
        return Ok(Convergence::NotConverged {
            best_sample_size: n_total,
            reason: format!(
                "relative interval width {:.4} over all {} samples exceeds target {}",
                full.relative_width_to(p_full),
                n_total,
                cfg.target_relative_width
            ),
        });
    }
    clilog::info!(
        "At least {} samples are needed to see the max with {}% confidence",
        required_sample_size_for_max(p_full, cfg.confidence)?,
        cfg.confidence * 100.
    );

    let (sample_size, interval, iterations) = bisect(0, n_total, full, cfg, |n| {
        if n == 0 {
            return Ok((false, None));
        }
        let sample = source.sample(n, rng)?;
        let k = sample.iter().filter(|&&d| d == max_delay).count() as u64;
        let ci = clopper_pearson(k, n as u64, cfg.confidence)?;
        let ok = k > 0
            && ci.contains(p_full)
            && ci.relative_width_to(p_full) <= cfg.target_relative_width;
        clilog::debug!("trial n={}: {} hits, p = {} -> {}", n, k, ci, ok);
        Ok((ok, Some(ci)))
    })?;
    clilog::info!(
        "Max probability converged at n={} after {} trials: {}",
        sample_size,
        iterations,
        interval
    );
    clilog::finish!(timer);
    Ok(Convergence::Converged {
        sample_size,
        interval,
        iterations,
    })
}

/// Smallest `n` with `1 - (1 - p)^n >= confidence`: the number of samples
/// needed to observe an event of probability `p` at least once.
pub fn required_sample_size_for_max(p: f64, confidence: f64) -> Result<usize, StatsError> {
    if !(confidence > 0. && confidence < 1.) {
        return Err(StatsError::InvalidConfidence(confidence));
    }
    if !(p > 0. && p <= 1.) {
        return Err(StatsError::NonFinite(p));
    }
    if p == 1. {
        return Ok(1);
    }
    let n = ((1. - confidence).ln() / (1. - p).ln()).ceil();
    Ok(n.max(1.) as usize)
}

/// Draw `num_samples` independent samples of `sample_size` delays and build
/// a histogram of each.
pub fn sample_histograms<S, R>(
    source: &mut S,
    num_samples: usize,
    sample_size: usize,
    rng: &mut R,
) -> Result<Vec<DelayHistogram>, SearchError>
where
    S: DelaySource,
    R: Rng + ?Sized,
{
    let mut hists = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        let sample = source.sample(sample_size, rng)?;
        hists.push(DelayHistogram::from_delays(sample)?);
    }
    Ok(hists)
}

/// Fraction of histograms whose mean lies inside `interval`.
pub fn interval_coverage(hists: &[DelayHistogram], interval: &ConfidenceInterval) -> f64 {
    if hists.is_empty() {
        return 0.;
    }
    let inside = hists.iter().filter(|h| interval.contains(h.mean())).count();
    inside as f64 / hists.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::InMemoryDelays;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn rng(seed: u64) -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(seed)
    }

    #[test]
    fn test_low_variance_converges_at_two() {
        let mut src = InMemoryDelays::new((0..1000).map(|i| 100. + i as f64 * 1e-9).collect());
        let res = search_mean(&mut src, &SearchConfig::default(), &mut rng(1)).unwrap();
        match res {
            Convergence::Converged {
                sample_size,
                iterations,
                ..
            } => {
                assert_eq!(sample_size, 2);
                assert!(iterations <= 12);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_all_zero_population_converges() {
        let mut src = InMemoryDelays::new(vec![0.; 50]);
        let res = search_mean(&mut src, &SearchConfig::default(), &mut rng(2)).unwrap();
        assert_eq!(res.sample_size(), 2);
        assert!(res.is_converged());
    }

    #[test]
    fn test_constant_nonzero_population_is_an_error() {
        let mut src = InMemoryDelays::new(vec![4.; 50]);
        let err = search_mean(&mut src, &SearchConfig::default(), &mut rng(2)).unwrap_err();
        assert!(matches!(err, SearchError::Stats(StatsError::Degenerate { .. })));
    }

    #[test]
    fn test_mean_not_converged_when_population_too_noisy() {
        let mut src = InMemoryDelays::new((0..20).map(|i| (i % 2) as f64 * 1000.).collect());
        let res = search_mean(&mut src, &SearchConfig::default(), &mut rng(3)).unwrap();
        assert_eq!(
            res.sample_size(),
            20,
            "best size is the whole population: {:?}",
            res
        );
        assert!(!res.is_converged());
    }

    #[test]
    fn test_mean_search_finds_intermediate_size() {
        let mut r = rng(4);
        let pop = (0..20_000)
            .map(|_| r.random_range(0..100) as f64)
            .collect::<Vec<_>>();
        let mut src = InMemoryDelays::new(pop);
        let cfg = SearchConfig {
            target_interval_length: 10.,
            ..SearchConfig::default()
        };
        let res = search_mean(&mut src, &cfg, &mut rng(5)).unwrap();
        // sd ~ 28.9, t ~ 2.58: length 10 needs roughly (2 * 2.58 * 28.9 / 10)^2 ~ 222.
        let n = res.sample_size();
        assert!(res.is_converged());
        assert!((100..600).contains(&n), "n = {}", n);
    }

    #[test]
    fn test_interval_length_shrinks_with_sample_size() {
        let mut r = rng(6);
        let pop = (0..5000)
            .map(|_| r.random_range(0..50) as f64)
            .collect::<Vec<_>>();
        let mut src = InMemoryDelays::new(pop);
        let mut sample_rng = rng(7);
        let mut previous = f64::INFINITY;
        for n in [5, 20, 80, 320, 1280] {
            let trials = 50;
            let mut total = 0.;
            for _ in 0..trials {
                let s = src.sample(n, &mut sample_rng).unwrap();
                total += mean_interval(&s, 0.95).unwrap().length();
            }
            let expected = total / trials as f64;
            assert!(expected <= previous, "n={}: {} > {}", n, expected, previous);
            previous = expected;
        }
    }

    #[test]
    fn test_missing_true_max_stops_immediately() {
        let mut src = InMemoryDelays::new(vec![1., 2., 3., 3.]);
        let res = search_max_probability(&mut src, Some(9.), &SearchConfig::default(), &mut rng(8))
            .unwrap();
        match res {
            Convergence::NotConverged {
                best_sample_size,
                reason,
            } => {
                assert_eq!(best_sample_size, 0);
                assert!(reason.contains("not found"), "{}", reason);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_noisy_max_is_rejected_on_full_population() {
        // One hit in 100 can never give a 5% relative interval.
        let mut delays = vec![1.; 99];
        delays.push(7.);
        let mut src = InMemoryDelays::new(delays);
        let res = search_max_probability(&mut src, None, &SearchConfig::default(), &mut rng(9))
            .unwrap();
        assert!(!res.is_converged());
        assert_eq!(res.sample_size(), 100);
    }

    #[test]
    fn test_max_search_converges() {
        // Half of the population sits at the maximum.
        let delays = (0..200_000).map(|i| if i % 2 == 0 { 10. } else { 3. }).collect();
        let mut src = InMemoryDelays::new(delays);
        let cfg = SearchConfig {
            target_relative_width: 0.1,
            ..SearchConfig::default()
        };
        let res = search_max_probability(&mut src, None, &cfg, &mut rng(10)).unwrap();
        match res {
            Convergence::Converged {
                sample_size,
                interval,
                ..
            } => {
                assert!(sample_size < 200_000);
                assert!(sample_size > 1000);
                assert!(interval.contains(0.5));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_required_sample_size_for_max() {
        // 1 - 0.5^7 = 0.992
        assert_eq!(required_sample_size_for_max(0.5, 0.99).unwrap(), 7);
        assert_eq!(required_sample_size_for_max(1., 0.99).unwrap(), 1);
        assert_eq!(required_sample_size_for_max(0.01, 0.95).unwrap(), 299);
        assert!(required_sample_size_for_max(0., 0.95).is_err());
    }

    #[test]
    fn test_sample_histograms_coverage() {
        let mut r = rng(11);
        let pop = (0..10_000)
            .map(|_| r.random_range(0..20) as f64)
            .collect::<Vec<_>>();
        let mut src = InMemoryDelays::new(pop.clone());
        let full = mean_interval(&pop, 0.99).unwrap();
        let wide = ConfidenceInterval {
            lower: full.estimate - 1.,
            upper: full.estimate + 1.,
            ..full
        };
        let hists = sample_histograms(&mut src, 40, 500, &mut rng(12)).unwrap();
        assert_eq!(hists.len(), 40);
        assert!(hists.iter().all(|h| (h.total_probability() - 1.).abs() < 1e-9));
        // Sample means of 500 draws have sd ~ 0.26, so +-1 covers nearly all.
        assert!(interval_coverage(&hists, &wide) > 0.9);
        assert_eq!(interval_coverage(&[], &wide), 0.);
    }

    #[test]
    fn test_zero_iteration_cap_is_rejected() {
        let mut src = InMemoryDelays::new((0..100).map(|i| i as f64).collect());
        let cfg = SearchConfig {
            max_iterations: 0,
            ..SearchConfig::default()
        };
        let err = search_mean(&mut src, &cfg, &mut rng(13)).unwrap_err();
        assert!(matches!(err, SearchError::InvalidConfig(ref m) if m.contains("max_iterations")));
        let err = search_max_probability(&mut src, None, &cfg, &mut rng(13)).unwrap_err();
        assert!(matches!(err, SearchError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let cfg: SearchConfig = serde_json::from_str(r#"{"confidence": 0.95}"#).unwrap();
        assert_eq!(cfg.confidence, 0.95);
        assert_eq!(cfg.max_iterations, 10_000);
        assert_eq!(cfg.tolerance, 1);
    }
}
