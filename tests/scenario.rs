//! End-to-end runs through the public API only.

use std::collections::BTreeMap;

use approx::assert_relative_eq;
use gas_curves::domain::{
    AnalysisConfig, Cycle, MetricKind, NormalizationSpec, TimeSeries, UnitConfig, VisibleRange,
};
use gas_curves::pipeline::run_analysis;

/// One channel rising linearly 10→20 over [50, 110] and falling back to
/// 10 by 160, sampled every 10 time units out to 300.
fn trapezoid_channel(time: &[f64]) -> Vec<f64> {
    time.iter()
        .map(|&t| {
            if t <= 50.0 {
                10.0
            } else if t <= 110.0 {
                10.0 + 10.0 * (t - 50.0) / 60.0
            } else if t <= 160.0 {
                20.0 - 10.0 * (t - 110.0) / 50.0
            } else {
                10.0
            }
        })
        .collect()
}

#[test]
fn trapezoid_cycle_metrics_through_the_pipeline() {
    let time: Vec<f64> = (0..=30).map(|i| i as f64 * 10.0).collect();
    let ch1 = trapezoid_channel(&time);
    let raw = TimeSeries::new(time, [(1, ch1)].into_iter().collect()).unwrap();

    let range = VisibleRange::new(0.0, 300.0, [1].into_iter().collect());
    let config = AnalysisConfig::new(range, vec![Cycle::new(50.0, 110.0, 160.0)], vec![100.0]);

    let out = run_analysis(&raw, &config).unwrap();
    assert!(out.issues.is_empty(), "{:?}", out.issues);

    // Columns: concentration, ch1 resp, ch1 respTime, ch1 recTime.
    let row = &out.bundle.responses.rows[0];
    assert_relative_eq!(row[0], 100.0);
    assert_relative_eq!(row[1], 10.0);
    assert_relative_eq!(row[2], 54.0, epsilon = 1e-9);
    assert_relative_eq!(row[3], 45.0, epsilon = 1e-9);
}

#[test]
fn unit_transform_and_normalization_compose_with_extraction() {
    // Raw time in seconds with a 1000 s acquisition offset; the analysis
    // is configured in minutes starting at zero.
    let time: Vec<f64> = (0..=300).map(|i| 1000.0 + i as f64 * 60.0).collect();
    let minutes: Vec<f64> = (0..=300).map(|i| i as f64).collect();
    let ch1: Vec<f64> = minutes
        .iter()
        .map(|&t| {
            if t < 50.0 || t >= 100.0 {
                40.0
            } else {
                40.0 + 40.0 * ((t - 50.0) / 25.0).min(1.0)
            }
        })
        .collect();
    let raw = TimeSeries::new(time, [(1, ch1)].into_iter().collect()).unwrap();

    let mut config = AnalysisConfig::new(
        VisibleRange::new(0.0, 300.0, [1].into_iter().collect()),
        vec![Cycle::new(50.0, 100.0, 150.0)],
        vec![200.0],
    );
    config.unit = UnitConfig {
        time_scale: 60.0,
        channel_scale: BTreeMap::new(),
        time_zero_shift: true,
    };
    config.normalization = Some(NormalizationSpec { reference_time: 10.0 });

    let out = run_analysis(&raw, &config).unwrap();
    assert!(out.issues.is_empty(), "{:?}", out.issues);

    // Responses are extracted from the transformed series even when a
    // normalized view is exported: 40 → 80 is a raw delta of 40.
    let row = &out.bundle.responses.rows[0];
    assert_relative_eq!(row[1], 40.0, epsilon = 1e-9);

    let normalized = out.bundle.normalized.as_ref().unwrap();
    assert_relative_eq!(normalized.rows[10][1], 1.0);
}

#[test]
fn power_law_calibration_is_recovered_across_cycles() {
    // Four exposures whose plateaus follow 2·C^0.5 above a baseline of 5.
    let time: Vec<f64> = (0..=1000).map(|i| i as f64).collect();
    let exposures: [(f64, f64); 4] =
        [(100.0, 16.0), (300.0, 64.0), (500.0, 256.0), (700.0, 1024.0)];
    let ch2: Vec<f64> = time
        .iter()
        .map(|&t| {
            let mut v = 5.0;
            for &(start, conc) in &exposures {
                let peak = 2.0 * conc.sqrt();
                if t >= start && t < start + 30.0 {
                    v += peak * ((t - start) / 20.0).min(1.0);
                } else if t >= start + 30.0 && t < start + 60.0 {
                    v += peak * (1.0 - (t - start - 30.0) / 20.0).max(0.0);
                }
            }
            v
        })
        .collect();
    let raw = TimeSeries::new(time, [(2, ch2)].into_iter().collect()).unwrap();

    let cycles: Vec<Cycle> = exposures
        .iter()
        .map(|&(start, _)| Cycle::new(start, start + 30.0, start + 60.0))
        .collect();
    let concentrations: Vec<f64> = exposures.iter().map(|&(_, c)| c).collect();
    let config = AnalysisConfig::new(
        VisibleRange::new(0.0, 1000.0, [2].into_iter().collect()),
        cycles,
        concentrations,
    );

    let out = run_analysis(&raw, &config).unwrap();
    assert!(out.issues.is_empty(), "{:?}", out.issues);

    let fit = out
        .bundle
        .fit_info
        .iter()
        .find(|row| row.channel == 2 && row.metric == MetricKind::Response)
        .unwrap();
    assert_relative_eq!(fit.a, 2.0, epsilon = 1e-6);
    assert_relative_eq!(fit.b, 0.5, epsilon = 1e-6);
    assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-9);
    assert!(!fit.approximate);

    // The shared-grid curve table spans the observed concentrations.
    let curves = &out.bundle.fit_curves;
    assert_relative_eq!(curves.rows.first().unwrap()[0], 16.0);
    assert_relative_eq!(curves.rows.last().unwrap()[0], 1024.0);
}
