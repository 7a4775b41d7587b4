//! Normalizer: rescales each channel by its own value at a reference time.
//!
//! The reference value is linearly interpolated between the two bracketing
//! samples (exact match when the reference time falls on a sample), so the
//! normalized curve is exactly 1.0 at the reference time for every channel.
//!
//! Determinism: channels are processed in ascending index order and every
//! operation is a plain per-sample division, so identical inputs yield
//! bit-identical output.

use std::collections::BTreeMap;

use log::debug;

use crate::domain::{NormalizationSpec, NormalizedSeries, TimeSeries};
use crate::error::{AnalysisError, Issue, Scope};
use crate::math::value_at;

/// Reference values closer to zero than this are rejected as degenerate
/// rather than silently producing infinities.
const ZERO_EPS: f64 = 1e-12;

/// Normalize every channel, failing on the first problem.
///
/// # Errors
/// `RangeError` when the reference time lies outside the series;
/// `DegenerateNormalizationError` when any channel's reference value is
/// within epsilon of zero.
pub fn normalize(
    series: &TimeSeries,
    spec: &NormalizationSpec,
) -> Result<NormalizedSeries, AnalysisError> {
    let (out, issues) = normalize_partial(series, spec);
    if let Some(issue) = issues.into_iter().next() {
        return Err(issue.error);
    }
    out.ok_or_else(|| AnalysisError::Configuration("nothing to normalize".into()))
}

/// Collecting variant used by the pipeline: channels with a degenerate
/// reference value are dropped and reported, the rest are still
/// normalized. A reference time outside the series fails the whole stage
/// (there is no per-channel remedy).
pub fn normalize_partial(
    series: &TimeSeries,
    spec: &NormalizationSpec,
) -> (Option<NormalizedSeries>, Vec<Issue>) {
    let time = series.time();
    let t = spec.reference_time;
    if time.is_empty() || t < time[0] || t > time[time.len() - 1] {
        let error = AnalysisError::Range {
            reference_time: t,
            start: time.first().copied().unwrap_or(f64::NAN),
            end: time.last().copied().unwrap_or(f64::NAN),
        };
        return (None, vec![Issue::new(Scope::Run, error)]);
    }

    let mut channels = BTreeMap::new();
    let mut issues = Vec::new();

    for (id, values) in series.channels() {
        // In range per the check above, so the lookup cannot fail.
        let Some(reference) = value_at(time, values, t) else {
            continue;
        };
        if reference.abs() < ZERO_EPS {
            issues.push(Issue::new(
                Scope::Channel(id),
                AnalysisError::DegenerateNormalization {
                    channel: id,
                    value: reference,
                },
            ));
            continue;
        }
        channels.insert(id, values.iter().map(|&v| v / reference).collect());
    }

    debug!(
        "normalized {} channel(s) at t={t}, {} dropped",
        channels.len(),
        issues.len()
    );

    if channels.is_empty() {
        return (None, issues);
    }
    match TimeSeries::new(time.to_vec(), channels) {
        Ok(out) => (Some(out), issues),
        // Unreachable with a validated input series; surface it anyway.
        Err(error) => {
            issues.push(Issue::new(Scope::Run, error));
            (None, issues)
        }
    }
}
