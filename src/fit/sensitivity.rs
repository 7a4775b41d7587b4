//! Linear sensitivity: slope of the response against concentration.
//!
//! A quick-look companion to the power-law fit. Unlike the power law it
//! tolerates negative responses, so it stays available for falling
//! (p-type style) channels whose raw deltas are negative.

use crate::domain::{ChannelId, MetricKind, Sensitivity};
use crate::error::AnalysisError;
use crate::math::linear_regression;

/// Regress `response = intercept + slope · concentration`.
///
/// # Errors
/// `InvalidFitInputError` when fewer than 2 points are given, any value is
/// non-finite, or all concentrations coincide.
pub fn fit_sensitivity(
    channel: ChannelId,
    concentrations: &[f64],
    responses: &[f64],
) -> Result<Sensitivity, AnalysisError> {
    let invalid = |reason: String| AnalysisError::InvalidFitInput {
        channel,
        metric: MetricKind::Response,
        reason,
    };
    if concentrations.len() != responses.len() {
        return Err(invalid(format!(
            "{} concentrations but {} responses",
            concentrations.len(),
            responses.len()
        )));
    }
    let line = linear_regression(concentrations, responses).ok_or_else(|| {
        invalid("need at least 2 finite points with distinct concentrations".into())
    })?;
    Ok(Sensitivity {
        slope: line.slope,
        intercept: line.intercept,
        r_squared: line.r_squared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_linear_sensitivity() {
        let conc = [10.0, 50.0, 100.0];
        let resp = [1.5, 5.5, 10.5];
        let s = fit_sensitivity(1, &conc, &resp).unwrap();
        assert!((s.slope - 0.1).abs() < 1e-12);
        assert!((s.intercept - 0.5).abs() < 1e-12);
        assert!((s.r_squared - 1.0).abs() < 1e-12);
    }

    #[test]
    fn accepts_negative_responses() {
        let conc = [10.0, 50.0, 100.0];
        let resp = [-1.0, -5.0, -10.0];
        assert!(fit_sensitivity(1, &conc, &resp).unwrap().slope < 0.0);
    }

    #[test]
    fn rejects_degenerate_input() {
        assert!(matches!(
            fit_sensitivity(1, &[10.0], &[1.0]),
            Err(AnalysisError::InvalidFitInput { .. })
        ));
        assert!(matches!(
            fit_sensitivity(1, &[10.0, 10.0], &[1.0, 2.0]),
            Err(AnalysisError::InvalidFitInput { .. })
        ));
    }
}
