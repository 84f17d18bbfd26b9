// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Confidence intervals for sample means and binomial proportions.
//!
//! The Student-t interval for a mean and the exact Clopper–Pearson interval
//! for a proportion, with quantiles from `statrs`.

use statrs::distribution::{Beta, ContinuousCDF, StudentsT};

/// Numeric domain failure.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsError {
    /// Confidence level outside `(0, 1)`.
    InvalidConfidence(f64),
    /// Too few samples for the requested statistic.
    TooFewSamples { needed: usize, got: usize },
    /// Zero variance around a nonzero mean: the t interval is undefined.
    Degenerate { mean: f64 },
    /// A NaN or infinite value where a finite one is required.
    NonFinite(f64),
    /// `successes > trials` or `trials == 0`.
    InvalidProportion { successes: u64, trials: u64 },
    /// Two distributions do not carry the same total probability.
    MassMismatch { left: f64, right: f64 },
    /// Distribution parameters rejected by `statrs`.
    Distribution(String),
}

impl std::fmt::Display for StatsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsError::InvalidConfidence(c) => {
                write!(f, "confidence level {} is not in (0, 1)", c)
            }
            StatsError::TooFewSamples { needed, got } => {
                write!(f, "need at least {} samples, got {}", needed, got)
            }
            StatsError::Degenerate { mean } => write!(
                f,
                "zero-variance sample with nonzero mean {}: interval undefined",
                mean
            ),
            StatsError::NonFinite(v) => write!(f, "non-finite value {}", v),
            StatsError::InvalidProportion { successes, trials } => {
                write!(f, "invalid proportion {}/{}", successes, trials)
            }
            StatsError::MassMismatch { left, right } => write!(
                f,
                "distributions carry different total probability ({} vs {})",
                left, right
            ),
            StatsError::Distribution(e) => write!(f, "distribution parameters: {}", e),
        }
    }
}

impl std::error::Error for StatsError {}

fn check_confidence(confidence: f64) -> Result<(), StatsError> {
    if confidence > 0. && confidence < 1. {
        Ok(())
    } else {
        Err(StatsError::InvalidConfidence(confidence))
    }
}

// ── Intervals ───────────────────────────────────────────────────────────────

/// Two-sided interval around a point estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub estimate: f64,
    pub confidence: f64,
}

impl ConfidenceInterval {
    #[inline]
    pub fn length(&self) -> f64 {
        self.upper - self.lower
    }

    #[inline]
    pub fn contains(&self, x: f64) -> bool {
        self.lower <= x && x <= self.upper
    }

    /// Interval length relative to the point estimate. Infinite for a zero
    /// estimate.
    pub fn relative_width(&self) -> f64 {
        self.relative_width_to(self.estimate)
    }

    pub fn relative_width_to(&self, reference: f64) -> f64 {
        if reference == 0. {
            f64::INFINITY
        } else {
            self.length() / reference.abs()
        }
    }
}

impl std::fmt::Display for ConfidenceInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.6} [{:.6}, {:.6}] @{}%",
            self.estimate,
            self.lower,
            self.upper,
            self.confidence * 100.
        )
    }
}

/// Streaming mean and variance (Welford).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMoments {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningMoments {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn extend(&mut self, xs: &[f64]) {
        for &x in xs {
            self.push(x);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Unbiased sample variance. Zero below two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.
        } else {
            (self.m2 / (self.count - 1) as f64).max(0.)
        }
    }

    pub fn std_error(&self) -> f64 {
        (self.variance() / self.count as f64).sqrt()
    }
}

/// Student-t interval for the mean of `samples`.
pub fn mean_interval(samples: &[f64], confidence: f64) -> Result<ConfidenceInterval, StatsError> {
    let mut m = RunningMoments::new();
    for &x in samples {
        if !x.is_finite() {
            return Err(StatsError::NonFinite(x));
        }
        m.push(x);
    }
    mean_interval_from_moments(&m, confidence)
}

/// Student-t interval with `n - 1` degrees of freedom.
///
/// A zero-variance sample whose mean is exactly zero yields the
/// zero-length interval `[0, 0]`. Zero variance with any other mean is
/// [`StatsError::Degenerate`].
pub fn mean_interval_from_moments(
    m: &RunningMoments,
    confidence: f64,
) -> Result<ConfidenceInterval, StatsError> {
    check_confidence(confidence)?;
    if m.count() < 2 {
        return Err(StatsError::TooFewSamples {
            needed: 2,
            got: m.count() as usize,
        });
    }
    let mean = m.mean();
    let se = m.std_error();
    if !se.is_finite() || !mean.is_finite() {
        return Err(StatsError::NonFinite(se));
    }
    if se == 0. {
        if mean == 0. {
            return Ok(ConfidenceInterval {
                lower: 0.,
                upper: 0.,
                estimate: 0.,
                confidence,
            });
        }
        return Err(StatsError::Degenerate { mean });
    }
    let t = student_t_quantile(0.5 + confidence / 2., (m.count() - 1) as f64)?;
    Ok(ConfidenceInterval {
        lower: mean - t * se,
        upper: mean + t * se,
        estimate: mean,
        confidence,
    })
}

/// Exact (Clopper–Pearson) interval for a binomial proportion.
pub fn clopper_pearson(
    successes: u64,
    trials: u64,
    confidence: f64,
) -> Result<ConfidenceInterval, StatsError> {
    check_confidence(confidence)?;
    if trials == 0 || successes > trials {
        return Err(StatsError::InvalidProportion { successes, trials });
    }
    let alpha = 1. - confidence;
    let (k, n) = (successes as f64, trials as f64);
    let lower = if successes == 0 {
        0.
    } else {
        beta_quantile(alpha / 2., k, n - k + 1.)?
    };
    let upper = if successes == trials {
        1.
    } else {
        beta_quantile(1. - alpha / 2., k + 1., n - k)?
    };
    Ok(ConfidenceInterval {
        lower,
        upper,
        estimate: k / n,
        confidence,
    })
}

// ── Quantiles ───────────────────────────────────────────────────────────────

fn distribution_error(e: impl std::fmt::Display) -> StatsError {
    StatsError::Distribution(e.to_string())
}

/// Quantile of Student's t distribution with `dof` degrees of freedom.
pub fn student_t_quantile(p: f64, dof: f64) -> Result<f64, StatsError> {
    let t = StudentsT::new(0., 1., dof).map_err(distribution_error)?;
    Ok(t.inverse_cdf(p))
}

/// Quantile of the `Beta(a, b)` distribution.
pub fn beta_quantile(p: f64, a: f64, b: f64) -> Result<f64, StatsError> {
    let beta = Beta::new(a, b).map_err(distribution_error)?;
    Ok(beta.inverse_cdf(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_student_t_quantiles() {
        assert!(close(student_t_quantile(0.975, 10.).unwrap(), 2.228_139, 1e-5));
        assert!(close(student_t_quantile(0.975, 1.).unwrap(), 12.706_205, 1e-4));
        assert!(close(student_t_quantile(0.995, 30.).unwrap(), 2.749_996, 1e-5));
        assert!(close(student_t_quantile(0.025, 10.).unwrap(), -2.228_139, 1e-5));
        assert!(matches!(
            student_t_quantile(0.975, 0.),
            Err(StatsError::Distribution(_))
        ));
    }

    #[test]
    fn test_beta_quantiles() {
        // Beta(1, 1) is uniform; Beta(2, 1) has CDF x^2.
        assert!(close(beta_quantile(0.3, 1., 1.).unwrap(), 0.3, 1e-6));
        assert!(close(beta_quantile(0.09, 2., 1.).unwrap(), 0.3, 1e-6));
        assert!(beta_quantile(0.5, 0., 1.).is_err());
    }

    #[test]
    fn test_running_moments() {
        let mut m = RunningMoments::new();
        m.extend(&[2., 4., 4., 4., 5., 5., 7., 9.]);
        assert_eq!(m.count(), 8);
        assert!(close(m.mean(), 5., 1e-12));
        assert!(close(m.variance(), 32. / 7., 1e-12));
    }

    #[test]
    fn test_mean_interval() {
        let xs = [1., 2., 3., 4., 5., 6., 7., 8., 9., 10., 11.];
        let ci = mean_interval(&xs, 0.95).unwrap();
        // mean 6, sd sqrt(11), n 11, t(0.975, 10) 2.228139
        let half = 2.228_139 * (11f64).sqrt() / (11f64).sqrt();
        assert!(close(ci.estimate, 6., 1e-12));
        assert!(close(ci.length(), 2. * half, 1e-4));
        assert!(ci.contains(6.));
    }

    #[test]
    fn test_mean_interval_zero_variance() {
        let ci = mean_interval(&[0., 0., 0.], 0.99).unwrap();
        assert_eq!(ci.length(), 0.);
        assert_eq!(
            mean_interval(&[3., 3., 3.], 0.99),
            Err(StatsError::Degenerate { mean: 3. })
        );
        assert_eq!(
            mean_interval(&[3.], 0.99),
            Err(StatsError::TooFewSamples { needed: 2, got: 1 })
        );
        assert_eq!(
            mean_interval(&[1., 2.], 1.5),
            Err(StatsError::InvalidConfidence(1.5))
        );
    }

    #[test]
    fn test_clopper_pearson() {
        let ci = clopper_pearson(50, 100, 0.95).unwrap();
        assert!(close(ci.lower, 0.398_321, 1e-4));
        assert!(close(ci.upper, 0.601_679, 1e-4));
        assert!(close(ci.estimate, 0.5, 1e-12));

        let none = clopper_pearson(0, 20, 0.95).unwrap();
        assert_eq!(none.lower, 0.);
        // Upper bound for 0/n is 1 - (alpha/2)^(1/n).
        assert!(close(none.upper, 1. - 0.025f64.powf(1. / 20.), 1e-6));

        let all = clopper_pearson(20, 20, 0.95).unwrap();
        assert_eq!(all.upper, 1.);
        assert!(close(all.lower, 0.025f64.powf(1. / 20.), 1e-6));

        assert!(clopper_pearson(3, 2, 0.95).is_err());
        assert!(clopper_pearson(0, 0, 0.95).is_err());
    }

    #[test]
    fn test_relative_width() {
        let ci = ConfidenceInterval {
            lower: 0.9,
            upper: 1.1,
            estimate: 1.,
            confidence: 0.95,
        };
        assert!(close(ci.relative_width(), 0.2, 1e-12));
        assert!(close(ci.relative_width_to(2.), 0.1, 1e-12));
        assert!(ci.relative_width_to(0.).is_infinite());
    }
}
