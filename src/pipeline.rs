//! Run orchestration: transform → (normalize) → extract → fit → bundle.
//!
//! The pipeline owns nothing and caches nothing: every call takes the raw
//! series plus a configuration and returns a fresh bundle, so a host can
//! re-run with tweaked settings against the same raw table. Failures
//! below run scope are collected as [`Issue`]s; only problems that
//! invalidate the whole run (bad configuration, unusable visible range,
//! an out-of-range normalization reference time) abort it.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::domain::{
    AnalysisConfig, ChannelId, FitResult, MetricKind, NormalizedSeries, Sensitivity, TimeSeries,
};
use crate::error::{AnalysisError, Issue, Scope};
use crate::extract::{extract, ExtractOptions, Extraction};
use crate::fit::{fit_power_law, fit_sensitivity, log_linear_fallback};
use crate::normalize::normalize_partial;
use crate::report::{aggregate, AnalysisBundle};
use crate::transform::transform;

/// The bundle plus every non-fatal problem encountered along the way.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub bundle: AnalysisBundle,
    pub issues: Vec<Issue>,
}

/// Run the full analysis.
///
/// # Errors
/// `ConfigurationError` for invalid thresholds, mismatched
/// cycle/concentration lists, or a visible range that selects nothing;
/// `RangeError` when a requested normalization reference time lies
/// outside the series. Per-channel, per-cycle, and per-fit failures do
/// not abort the run; they are reported in [`AnalysisOutput::issues`].
pub fn run_analysis(
    raw: &TimeSeries,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, AnalysisError> {
    validate_config(config)?;
    let mut issues = Vec::new();

    let visible = transform(raw, &config.unit, &config.range)?;
    debug!(
        "visible: {} row(s), {} channel(s)",
        visible.len(),
        visible.channel_ids().len()
    );

    // Overlapping cycles are suspicious but not fatal: each cycle is
    // still analyzed on its own windows.
    for pair in config.cycles.windows(2) {
        if pair[1].exposure_start < pair[0].recovery_end {
            issues.push(Issue::new(
                Scope::Run,
                AnalysisError::Configuration(format!(
                    "cycle starting at {} overlaps the previous cycle ending at {}",
                    pair[1].exposure_start, pair[0].recovery_end
                )),
            ));
        }
    }

    // Normalization feeds plotting/export only; metrics always come from
    // the transformed series so responses stay in signal units.
    let normalized: Option<NormalizedSeries> = match &config.normalization {
        Some(spec) => {
            let (out, norm_issues) = normalize_partial(&visible, spec);
            // An out-of-range reference time is a run-level mistake, not
            // a per-channel one.
            if let Some(issue) = norm_issues
                .iter()
                .find(|issue| matches!(issue.error, AnalysisError::Range { .. }))
            {
                return Err(issue.error.clone());
            }
            issues.extend(norm_issues);
            out
        }
        None => None,
    };

    let channels: BTreeSet<ChannelId> = visible.channel_ids().into_iter().collect();
    let extraction = extract(
        &visible,
        &config.cycles,
        &config.concentrations,
        &channels,
        &ExtractOptions {
            response_threshold: config.response_threshold,
            recovery_threshold: config.recovery_threshold,
            response_kind: config.response_kind,
            per_concentration: config.per_concentration,
        },
    );
    issues.extend(extraction.issues.iter().cloned());

    let fits = fit_all(&extraction, &channels, config, &mut issues);
    let sensitivities = if config.sensitivity {
        sensitivities(&extraction, &channels, &mut issues)
    } else {
        BTreeMap::new()
    };

    let bundle = aggregate(
        &visible,
        normalized.as_ref(),
        &extraction.metrics,
        &fits,
        sensitivities,
        &config.concentrations,
        config.fit_points,
    )?;

    Ok(AnalysisOutput { bundle, issues })
}

fn validate_config(config: &AnalysisConfig) -> Result<(), AnalysisError> {
    if config.cycles.len() != config.concentrations.len() {
        return Err(AnalysisError::Configuration(format!(
            "{} cycle(s) but {} concentration(s)",
            config.cycles.len(),
            config.concentrations.len()
        )));
    }
    for &(name, value) in &[
        ("response", config.response_threshold),
        ("recovery", config.recovery_threshold),
    ] {
        if !value.is_finite() || value <= 0.0 || value > 1.0 {
            return Err(AnalysisError::Configuration(format!(
                "{name} threshold must be in (0, 1], got {value}"
            )));
        }
    }
    if config.fit_points < 2 {
        return Err(AnalysisError::Configuration(format!(
            "fit_points must be at least 2, got {}",
            config.fit_points
        )));
    }
    Ok(())
}

/// Power-law fit per channel and metric kind, with the log-linear
/// fallback when the nonlinear refinement stalls.
fn fit_all(
    extraction: &Extraction,
    channels: &BTreeSet<ChannelId>,
    config: &AnalysisConfig,
    issues: &mut Vec<Issue>,
) -> BTreeMap<(ChannelId, MetricKind), FitResult> {
    let mut fits = BTreeMap::new();
    for &channel in channels {
        for metric in MetricKind::ALL {
            let (conc, values) = fit_inputs(extraction, channel, metric);
            if conc.len() < 2 {
                // Nothing to regress; the missing cycles already produced
                // their own issues.
                continue;
            }
            match fit_power_law(channel, metric, &conc, &values, config.fit_points) {
                Ok(fit) => {
                    fits.insert((channel, metric), fit);
                }
                Err(error @ AnalysisError::FitConvergence { .. }) => {
                    issues.push(Issue::new(Scope::Fit { channel, metric }, error));
                    if let Ok(fallback) =
                        log_linear_fallback(channel, metric, &conc, &values, config.fit_points)
                    {
                        fits.insert((channel, metric), fallback);
                    }
                }
                Err(error) => {
                    issues.push(Issue::new(Scope::Fit { channel, metric }, error));
                }
            }
        }
    }
    fits
}

fn fit_inputs(
    extraction: &Extraction,
    channel: ChannelId,
    metric: MetricKind,
) -> (Vec<f64>, Vec<f64>) {
    let mut conc = Vec::new();
    let mut values = Vec::new();
    for ((ch, _), m) in &extraction.metrics {
        if *ch == channel {
            conc.push(m.concentration);
            values.push(m.metric(metric));
        }
    }
    (conc, values)
}

fn sensitivities(
    extraction: &Extraction,
    channels: &BTreeSet<ChannelId>,
    issues: &mut Vec<Issue>,
) -> BTreeMap<ChannelId, Sensitivity> {
    let mut out = BTreeMap::new();
    for &channel in channels {
        let (conc, values) = fit_inputs(extraction, channel, MetricKind::Response);
        if conc.len() < 2 {
            continue;
        }
        match fit_sensitivity(channel, &conc, &values) {
            Ok(s) => {
                out.insert(channel, s);
            }
            Err(error) => issues.push(Issue::new(
                Scope::Fit {
                    channel,
                    metric: MetricKind::Response,
                },
                error,
            )),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Cycle, NormalizationSpec, VisibleRange};

    fn pulsed_series(peaks: &[(f64, f64)]) -> TimeSeries {
        let time: Vec<f64> = (0..=400).map(|i| i as f64).collect();
        let ch1: Vec<f64> = time
            .iter()
            .map(|&t| {
                let mut v = 10.0;
                for &(start, peak) in peaks {
                    if t >= start && t < start + 20.0 {
                        v += peak * (t - start) / 20.0;
                    } else if t >= start + 20.0 && t < start + 40.0 {
                        v += peak * (start + 40.0 - t) / 20.0;
                    }
                }
                v
            })
            .collect();
        TimeSeries::new(time, [(1, ch1)].into_iter().collect()).unwrap()
    }

    fn config() -> AnalysisConfig {
        let range = VisibleRange::new(0.0, 400.0, [1].into_iter().collect());
        let cycles = vec![
            Cycle::new(50.0, 70.0, 90.0),
            Cycle::new(150.0, 170.0, 190.0),
            Cycle::new(250.0, 270.0, 290.0),
        ];
        AnalysisConfig::new(range, cycles, vec![25.0, 100.0, 400.0])
    }

    #[test]
    fn full_run_produces_metrics_and_fits() {
        // Peaks follow 2·sqrt(C): 10, 20, 40.
        let raw = pulsed_series(&[(50.0, 10.0), (150.0, 20.0), (250.0, 40.0)]);
        let out = run_analysis(&raw, &config()).unwrap();

        assert!(out.issues.is_empty(), "{:?}", out.issues);
        assert_eq!(out.bundle.responses.rows.len(), 3);

        let resp = out
            .bundle
            .fit_info
            .iter()
            .find(|row| row.metric == MetricKind::Response)
            .unwrap();
        assert!((resp.a - 2.0).abs() < 1e-6, "a = {}", resp.a);
        assert!((resp.b - 0.5).abs() < 1e-6, "b = {}", resp.b);
        assert!(!resp.approximate);
    }

    #[test]
    fn mismatched_concentration_list_is_a_configuration_error() {
        let raw = pulsed_series(&[(50.0, 10.0)]);
        let mut cfg = config();
        cfg.concentrations.pop();
        assert!(matches!(
            run_analysis(&raw, &cfg),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn bad_threshold_is_a_configuration_error() {
        let raw = pulsed_series(&[(50.0, 10.0)]);
        let mut cfg = config();
        cfg.response_threshold = 1.5;
        assert!(matches!(
            run_analysis(&raw, &cfg),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn overlapping_cycles_are_reported_not_fatal() {
        let raw = pulsed_series(&[(50.0, 10.0), (150.0, 20.0), (250.0, 40.0)]);
        let mut cfg = config();
        cfg.cycles[1] = Cycle::new(80.0, 170.0, 190.0);
        let out = run_analysis(&raw, &cfg).unwrap();
        assert!(out
            .issues
            .iter()
            .any(|issue| issue.scope == Scope::Run));
        assert_eq!(out.bundle.responses.rows.len(), 3);
    }

    #[test]
    fn normalization_is_exported_but_metrics_stay_in_signal_units() {
        let raw = pulsed_series(&[(50.0, 10.0), (150.0, 20.0), (250.0, 40.0)]);
        let mut cfg = config();
        cfg.normalization = Some(NormalizationSpec { reference_time: 10.0 });
        let out = run_analysis(&raw, &cfg).unwrap();

        let normalized = out.bundle.normalized.as_ref().unwrap();
        // Baseline 10 normalizes to 1.0 at the reference time.
        assert!((normalized.rows[10][1] - 1.0).abs() < 1e-12);

        // The normalized table is a view; responses are still extracted
        // from the transformed series, so the first cycle reports its raw
        // delta of 10, not 1.0.
        let resp_col = 1; // concentration, ch1 resp, ...
        assert!((out.bundle.responses.rows[0][resp_col] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_reference_time_aborts_the_run() {
        let raw = pulsed_series(&[(50.0, 10.0), (150.0, 20.0), (250.0, 40.0)]);
        let mut cfg = config();
        cfg.normalization = Some(NormalizationSpec { reference_time: 9999.0 });
        assert!(matches!(
            run_analysis(&raw, &cfg),
            Err(AnalysisError::Range { .. })
        ));
    }

    #[test]
    fn sensitivity_is_reported_when_requested() {
        let raw = pulsed_series(&[(50.0, 10.0), (150.0, 20.0), (250.0, 40.0)]);
        let mut cfg = config();
        cfg.sensitivity = true;
        let out = run_analysis(&raw, &cfg).unwrap();
        let s = out.bundle.sensitivities.get(&1).unwrap();
        assert!(s.slope > 0.0);
    }
}
