//! Cycle metric extractor.
//!
//! For every (channel, cycle) pair this computes the baseline, the
//! exposure extremum, the signed response, and the threshold-crossing
//! response/recovery times. Channels are independent, so the per-channel
//! work runs on the rayon pool and results are combined by channel key,
//! never by arrival order.
//!
//! Extremum direction is detected per (channel, cycle) by comparing the
//! value at the end of exposure against the baseline. That keeps the
//! extractor agnostic to n-type/p-type sensor behavior without a
//! configuration flag that could desynchronize from the data.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{
    ChannelId, Cycle, CycleMetrics, MetricWarning, ResponseKind, TimeSeries,
};
use crate::error::{AnalysisError, Issue, Scope};
use crate::math::{crossing_time, nearest_index, window_indices};

/// Knobs for one extraction pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Fraction of the full response that defines the response time
    /// (0.9 = t-resp-90).
    pub response_threshold: f64,
    /// Fractional distance back toward baseline that defines the recovery
    /// time (0.1 = recovered to within 10% of baseline).
    pub recovery_threshold: f64,
    pub response_kind: ResponseKind,
    /// Divide the reported response by the cycle concentration.
    pub per_concentration: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            response_threshold: 0.9,
            recovery_threshold: 0.1,
            response_kind: ResponseKind::default(),
            per_concentration: false,
        }
    }
}

/// Metrics keyed by (channel, cycle index) plus the per-scope failures.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub metrics: BTreeMap<(ChannelId, usize), CycleMetrics>,
    pub issues: Vec<Issue>,
}

/// Extract metrics for every selected channel and every cycle.
///
/// `concentrations` pairs with `cycles` by index. A failure in one
/// (channel, cycle) is recorded as an [`Issue`] and never blocks the
/// others. Re-running with identical inputs yields bit-identical metrics.
pub fn extract(
    series: &TimeSeries,
    cycles: &[Cycle],
    concentrations: &[f64],
    channels: &BTreeSet<ChannelId>,
    opts: &ExtractOptions,
) -> Extraction {
    let per_channel: Vec<(ChannelId, Vec<Result<CycleMetrics, Issue>>)> = channels
        .par_iter()
        .filter_map(|&id| {
            let values = series.channel(id)?;
            let results = cycles
                .iter()
                .enumerate()
                .map(|(idx, cycle)| {
                    let concentration = concentrations.get(idx).copied().unwrap_or(f64::NAN);
                    extract_one(series.time(), values, id, idx, cycle, concentration, opts)
                        .map_err(|error| {
                            Issue::new(Scope::Cycle { channel: id, cycle: idx }, error)
                        })
                })
                .collect();
            Some((id, results))
        })
        .collect();

    let mut out = Extraction::default();
    for (id, results) in per_channel {
        for result in results {
            match result {
                Ok(metrics) => {
                    out.metrics.insert((id, metrics.cycle), metrics);
                }
                Err(issue) => out.issues.push(issue),
            }
        }
    }
    debug!(
        "extracted {} metric set(s), {} failure(s)",
        out.metrics.len(),
        out.issues.len()
    );
    out
}

fn extract_one(
    time: &[f64],
    values: &[f64],
    channel: ChannelId,
    cycle_index: usize,
    cycle: &Cycle,
    concentration: f64,
    opts: &ExtractOptions,
) -> Result<CycleMetrics, AnalysisError> {
    cycle.validate()?;

    let exposure = window_indices(time, cycle.exposure_start, cycle.exposure_end);
    if exposure.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            channel,
            cycle: cycle_index,
            window: "exposure",
            samples: exposure.len(),
        });
    }
    let recovery = window_indices(time, cycle.exposure_end, cycle.recovery_end);
    if recovery.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            channel,
            cycle: cycle_index,
            window: "recovery",
            samples: recovery.len(),
        });
    }

    // Baseline: the sample nearest to exposure onset.
    let baseline = values[nearest_index(time, cycle.exposure_start)];
    let end_value = values[nearest_index(time, cycle.exposure_end)];

    // Rising curve takes the max, falling curve the min; ties resolve to
    // the earliest sample so the response time stays deterministic.
    let rising = end_value >= baseline;
    let mut extremum = values[exposure.start];
    for i in exposure.clone() {
        if (rising && values[i] > extremum) || (!rising && values[i] < extremum) {
            extremum = values[i];
        }
    }

    let response = extremum - baseline;

    let mut warnings = Vec::new();
    if response == 0.0 {
        warnings.push(MetricWarning::ZeroResponse);
    }

    let response_time = threshold_time(
        time,
        values,
        exposure.clone(),
        cycle.exposure_start,
        cycle.exposure_end,
        baseline + opts.response_threshold * response,
        response,
        Leg::Exposure,
        &mut warnings,
    );

    let recovery_time = threshold_time(
        time,
        values,
        recovery,
        cycle.exposure_end,
        cycle.recovery_end,
        baseline + opts.recovery_threshold * response,
        response,
        Leg::Recovery,
        &mut warnings,
    );

    let baseline_relative = matches!(
        opts.response_kind,
        ResponseKind::PercentOfBaseline | ResponseKind::Ratio
    );
    let response_value = if baseline == 0.0 && baseline_relative {
        warnings.push(MetricWarning::ZeroBaseline);
        f64::NAN
    } else {
        report_response(response, baseline, extremum, concentration, opts)
    };

    Ok(CycleMetrics {
        channel,
        cycle: cycle_index,
        concentration,
        baseline,
        extremum,
        response,
        response_value,
        response_time,
        recovery_time,
        warnings,
    })
}

#[derive(Clone, Copy, PartialEq)]
enum Leg {
    Exposure,
    Recovery,
}

/// Elapsed time from `window_start` to the first crossing of `target`
/// within the sample window, interpolated between the bracketing samples.
///
/// During exposure the signal moves *toward* the extremum (crossing =
/// reaching the target from the baseline side); during recovery it moves
/// *back* (crossing = returning past the target from the extremum side).
/// Saturates to the full window length with a warning when the target is
/// never reached.
#[allow(clippy::too_many_arguments)]
fn threshold_time(
    time: &[f64],
    values: &[f64],
    window: std::ops::Range<usize>,
    window_start: f64,
    window_end: f64,
    target: f64,
    response: f64,
    leg: Leg,
    warnings: &mut Vec<MetricWarning>,
) -> f64 {
    // Direction of the exposure swing; a zero response counts as crossed
    // immediately on both legs.
    let sign = if response >= 0.0 { 1.0 } else { -1.0 };
    let crossed = |v: f64| match leg {
        Leg::Exposure => sign * (v - target) >= 0.0,
        Leg::Recovery => sign * (v - target) <= 0.0,
    };

    let mut prev: Option<usize> = None;
    for i in window.clone() {
        if crossed(values[i]) {
            let t_cross = match prev {
                // Already past the threshold at the first window sample.
                None => time[i],
                Some(p) => crossing_time(time[p], values[p], time[i], values[i], target),
            };
            let elapsed = t_cross - window_start;
            if elapsed <= 0.0 {
                warnings.push(match leg {
                    Leg::Exposure => MetricWarning::ZeroResponseTime,
                    Leg::Recovery => MetricWarning::ZeroRecoveryTime,
                });
            }
            return elapsed.max(0.0);
        }
        prev = Some(i);
    }

    warnings.push(match leg {
        Leg::Exposure => MetricWarning::ResponseSaturated,
        Leg::Recovery => MetricWarning::RecoverySaturated,
    });
    window_end - window_start
}

/// Convert the signed response delta into the reported value.
fn report_response(
    response: f64,
    baseline: f64,
    extremum: f64,
    concentration: f64,
    opts: &ExtractOptions,
) -> f64 {
    let value = match opts.response_kind {
        ResponseKind::Delta => response,
        ResponseKind::PercentOfBaseline => 100.0 * response.abs() / baseline,
        ResponseKind::Ratio => extremum / baseline,
    };
    if opts.per_concentration {
        value / concentration
    } else {
        value
    }
}
