//! Power-law solver: `y = a · C^b`.
//!
//! A log-log ordinary least squares fit gives the starting point, then a
//! Levenberg-Marquardt loop refines (a, b) against the *untransformed*
//! residuals, which weights all points equally instead of compressing the
//! high-concentration end the way a pure log-log fit does. The reported
//! r-squared is likewise computed on untransformed residuals so it is
//! comparable across metrics.

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::domain::{ChannelId, FitResult, MetricKind};
use crate::error::AnalysisError;
use crate::math::{linear_regression, solve_least_squares};

const MAX_ITERATIONS: usize = 100;
const STEP_TOLERANCE: f64 = 1e-10;
const SSR_TOLERANCE: f64 = 1e-12;

/// Fit `y = a · C^b` for one channel/metric series.
///
/// `concentrations` and `values` pair by index. Points must be strictly
/// positive on both axes: the model (and its log-log seed) is undefined
/// otherwise.
///
/// # Errors
/// `InvalidFitInputError` when fewer than 2 points are given, inputs are
/// non-positive or non-finite, or all concentrations coincide;
/// `FitConvergenceError` when the refinement loop exhausts its iteration
/// budget (callers may then use [`log_linear_fallback`]).
pub fn fit_power_law(
    channel: ChannelId,
    metric: MetricKind,
    concentrations: &[f64],
    values: &[f64],
    fit_points: usize,
) -> Result<FitResult, AnalysisError> {
    let seed = seed_fit(channel, metric, concentrations, values)?;

    let mut a = seed.a;
    let mut b = seed.b;
    let mut ssr = sum_squared_residuals(concentrations, values, a, b);
    let mut lambda: f64 = 1e-3;

    let n = concentrations.len();
    let mut converged = false;
    for iteration in 0..MAX_ITERATIONS {
        // Augmented system [J; sqrt(lambda)·I] δ = [r; 0], solved by SVD.
        let mut jac = DMatrix::zeros(n + 2, 2);
        let mut rhs = DVector::zeros(n + 2);
        for i in 0..n {
            let c = concentrations[i];
            let pow = c.powf(b);
            jac[(i, 0)] = pow;
            jac[(i, 1)] = a * pow * c.ln();
            rhs[i] = values[i] - a * pow;
        }
        let damping = lambda.sqrt();
        jac[(n, 0)] = damping;
        jac[(n + 1, 1)] = damping;

        let Some(delta) = solve_least_squares(&jac, &rhs) else {
            return Err(AnalysisError::FitConvergence {
                channel,
                metric,
                iterations: iteration,
            });
        };

        let a_next = a + delta[0];
        let b_next = b + delta[1];
        // The model requires a positive amplitude; treat a step out of the
        // valid region like a rejected step.
        if a_next > 0.0 && b_next.is_finite() {
            let ssr_next = sum_squared_residuals(concentrations, values, a_next, b_next);
            if ssr_next < ssr {
                let step = (delta[0] * delta[0] + delta[1] * delta[1]).sqrt();
                let scale = 1.0 + (a * a + b * b).sqrt();
                let improved = ssr - ssr_next;
                a = a_next;
                b = b_next;
                ssr = ssr_next;
                lambda = (lambda / 10.0).max(1e-12);
                if step < STEP_TOLERANCE * scale || improved < SSR_TOLERANCE * (1.0 + ssr) {
                    converged = true;
                    break;
                }
                continue;
            }
        }
        lambda *= 10.0;
        if lambda > 1e12 {
            // The damping has collapsed the step to nothing; the current
            // point is as good as this loop will get.
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(AnalysisError::FitConvergence {
            channel,
            metric,
            iterations: MAX_ITERATIONS,
        });
    }

    debug!("ch{channel} {metric}: a={a:.6e} b={b:.6}");
    Ok(build_result(concentrations, values, a, b, fit_points, false))
}

/// The log-log seed reported as a final (approximate) result.
///
/// Used when the nonlinear refinement fails to converge: the log-linear
/// parameters are still a usable calibration curve, just not the
/// least-squares optimum on the raw scale.
pub fn log_linear_fallback(
    channel: ChannelId,
    metric: MetricKind,
    concentrations: &[f64],
    values: &[f64],
    fit_points: usize,
) -> Result<FitResult, AnalysisError> {
    let seed = seed_fit(channel, metric, concentrations, values)?;
    Ok(build_result(
        concentrations,
        values,
        seed.a,
        seed.b,
        fit_points,
        true,
    ))
}

/// `fit_points` evenly spaced `(concentration, a·C^b)` samples over
/// `[cmin, cmax]`.
pub fn sample_curve(a: f64, b: f64, cmin: f64, cmax: f64, fit_points: usize) -> Vec<(f64, f64)> {
    let n = fit_points.max(2);
    (0..n)
        .map(|i| {
            let c = cmin + (cmax - cmin) * i as f64 / (n - 1) as f64;
            (c, a * c.powf(b))
        })
        .collect()
}

struct Seed {
    a: f64,
    b: f64,
}

/// Validate the inputs and produce log-log OLS starting parameters.
fn seed_fit(
    channel: ChannelId,
    metric: MetricKind,
    concentrations: &[f64],
    values: &[f64],
) -> Result<Seed, AnalysisError> {
    let invalid = |reason: String| AnalysisError::InvalidFitInput {
        channel,
        metric,
        reason,
    };

    if concentrations.len() != values.len() {
        return Err(invalid(format!(
            "{} concentrations but {} values",
            concentrations.len(),
            values.len()
        )));
    }
    if concentrations.len() < 2 {
        return Err(invalid(format!(
            "need at least 2 points, got {}",
            concentrations.len()
        )));
    }
    for (&c, &v) in concentrations.iter().zip(values.iter()) {
        if !(c.is_finite() && v.is_finite()) {
            return Err(invalid("non-finite point".into()));
        }
        if c <= 0.0 {
            return Err(invalid(format!("non-positive concentration {c}")));
        }
        if v <= 0.0 {
            return Err(invalid(format!(
                "non-positive {metric} value {v}; the power law is undefined"
            )));
        }
    }

    let log_c: Vec<f64> = concentrations.iter().map(|c| c.ln()).collect();
    let log_v: Vec<f64> = values.iter().map(|v| v.ln()).collect();
    let line = linear_regression(&log_c, &log_v)
        .ok_or_else(|| invalid("all concentrations coincide".into()))?;

    Ok(Seed {
        a: line.intercept.exp(),
        b: line.slope,
    })
}

fn sum_squared_residuals(concentrations: &[f64], values: &[f64], a: f64, b: f64) -> f64 {
    concentrations
        .iter()
        .zip(values.iter())
        .map(|(&c, &v)| {
            let r = v - a * c.powf(b);
            r * r
        })
        .sum()
}

fn build_result(
    concentrations: &[f64],
    values: &[f64],
    a: f64,
    b: f64,
    fit_points: usize,
    approximate: bool,
) -> FitResult {
    let ssr = sum_squared_residuals(concentrations, values, a, b);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let sst: f64 = values.iter().map(|&v| (v - mean) * (v - mean)).sum();
    let r_squared = if sst <= 1e-300 {
        if ssr <= 1e-300 { 1.0 } else { 0.0 }
    } else {
        1.0 - ssr / sst
    };

    let cmin = concentrations.iter().copied().fold(f64::INFINITY, f64::min);
    let cmax = concentrations
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    FitResult {
        a,
        b,
        r_squared,
        curve: sample_curve(a, b, cmin, cmax, fit_points),
        approximate,
    }
}
