//! Result aggregation: one bundle of export-ready tables per run.
//!
//! The host serializes these however it likes (CSV sheets, JSON, plots);
//! the core only guarantees stable column naming and ordering. Numeric
//! tables use NaN for holes (a cycle that failed on one channel) so row
//! alignment survives partial failures.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::domain::{
    ChannelId, CycleMetrics, FitResult, MetricKind, NormalizedSeries, Sensitivity, TimeSeries,
};
use crate::error::AnalysisError;
use crate::fit::sample_curve;

/// A rectangular, column-named table of f64 cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl DataTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// # Panics
    /// Panics when the row width disagrees with the header. All call
    /// sites build rows directly from the header they just declared.
    pub fn push_row(&mut self, row: Vec<f64>) {
        assert_eq!(row.len(), self.columns.len(), "row width mismatch");
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One line of the fit summary table. Typed rather than numeric because
/// it mixes identifiers and a flag with the parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitInfoRow {
    pub channel: ChannelId,
    pub metric: MetricKind,
    pub a: f64,
    pub b: f64,
    pub r_squared: f64,
    pub approximate: bool,
}

/// Everything one analysis run produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisBundle {
    /// Transformed series restricted to the visible range (time + one
    /// column per channel).
    pub visible: DataTable,
    /// Normalized series, present only when normalization was requested
    /// and produced at least one channel.
    pub normalized: Option<DataTable>,
    /// Per-cycle metrics: concentration, then `ch{i} resp`, `ch{i}
    /// respTime`, `ch{i} recTime` column groups.
    pub responses: DataTable,
    pub fit_info: Vec<FitInfoRow>,
    /// Fitted curves on a shared concentration grid, one column per
    /// (channel, metric) fit.
    pub fit_curves: DataTable,
    pub sensitivities: BTreeMap<ChannelId, Sensitivity>,
}

/// Assemble the bundle from the per-stage outputs.
///
/// # Errors
/// `InconsistentChannelSetError` when the metrics or fits reference a
/// channel absent from the visible series. That indicates the stages ran
/// against different selections and the bundle would silently misalign.
pub fn aggregate(
    visible: &TimeSeries,
    normalized: Option<&NormalizedSeries>,
    metrics: &BTreeMap<(ChannelId, usize), CycleMetrics>,
    fits: &BTreeMap<(ChannelId, MetricKind), FitResult>,
    sensitivities: BTreeMap<ChannelId, Sensitivity>,
    concentrations: &[f64],
    fit_points: usize,
) -> Result<AnalysisBundle, AnalysisError> {
    let channels = visible.channel_ids();

    for &(ch, cycle) in metrics.keys() {
        if !channels.contains(&ch) {
            return Err(AnalysisError::InconsistentChannelSet(format!(
                "metrics for ch{ch} cycle {cycle}, but ch{ch} is not in the visible series"
            )));
        }
    }
    for &(ch, metric) in fits.keys() {
        if !channels.contains(&ch) {
            return Err(AnalysisError::InconsistentChannelSet(format!(
                "{metric} fit for ch{ch}, but ch{ch} is not in the visible series"
            )));
        }
    }

    let bundle = AnalysisBundle {
        visible: series_table(visible),
        normalized: normalized.map(series_table),
        responses: response_table(&channels, metrics, concentrations),
        fit_info: fit_info_rows(fits),
        fit_curves: fit_curve_table(fits, fit_points),
        sensitivities,
    };
    debug!(
        "bundle: {} visible row(s), {} response row(s), {} fit(s)",
        bundle.visible.rows.len(),
        bundle.responses.rows.len(),
        bundle.fit_info.len()
    );
    Ok(bundle)
}

/// `time`, then `ch{i}` per channel in ascending index order.
fn series_table(series: &TimeSeries) -> DataTable {
    let mut columns = vec!["time".to_string()];
    columns.extend(series.channel_ids().iter().map(|id| format!("ch{id}")));

    let mut table = DataTable::new(columns);
    for (i, &t) in series.time().iter().enumerate() {
        let mut row = vec![t];
        row.extend(series.channels().map(|(_, values)| values[i]));
        table.push_row(row);
    }
    table
}

/// One row per cycle: concentration, then the response group for every
/// channel, then the response-time group, then the recovery-time group.
fn response_table(
    channels: &[ChannelId],
    metrics: &BTreeMap<(ChannelId, usize), CycleMetrics>,
    concentrations: &[f64],
) -> DataTable {
    let mut columns = vec!["concentration".to_string()];
    for kind in MetricKind::ALL {
        for &id in channels {
            columns.push(format!("ch{id} {}", kind.column_suffix()));
        }
    }

    let mut table = DataTable::new(columns);
    for (cycle, &concentration) in concentrations.iter().enumerate() {
        let mut row = vec![concentration];
        for kind in MetricKind::ALL {
            for &id in channels {
                row.push(
                    metrics
                        .get(&(id, cycle))
                        .map_or(f64::NAN, |m| m.metric(kind)),
                );
            }
        }
        table.push_row(row);
    }
    table
}

fn fit_info_rows(fits: &BTreeMap<(ChannelId, MetricKind), FitResult>) -> Vec<FitInfoRow> {
    fits.iter()
        .map(|(&(channel, metric), fit)| FitInfoRow {
            channel,
            metric,
            a: fit.a,
            b: fit.b,
            r_squared: fit.r_squared,
            approximate: fit.approximate,
        })
        .collect()
}

/// All fitted curves resampled onto one shared concentration grid so
/// they can live in a single table. The grid spans the union of the
/// individual fit ranges.
fn fit_curve_table(
    fits: &BTreeMap<(ChannelId, MetricKind), FitResult>,
    fit_points: usize,
) -> DataTable {
    let mut cmin = f64::INFINITY;
    let mut cmax = f64::NEG_INFINITY;
    for fit in fits.values() {
        if let (Some(first), Some(last)) = (fit.curve.first(), fit.curve.last()) {
            cmin = cmin.min(first.0);
            cmax = cmax.max(last.0);
        }
    }

    let mut columns = vec!["concentration".to_string()];
    columns.extend(
        fits.keys()
            .map(|(id, metric)| format!("ch{id} {}", metric.column_suffix())),
    );
    let mut table = DataTable::new(columns);
    if fits.is_empty() || !cmin.is_finite() || !cmax.is_finite() {
        return table;
    }

    for (c, _) in sample_curve(1.0, 1.0, cmin, cmax, fit_points) {
        let mut row = vec![c];
        row.extend(fits.values().map(|fit| fit.a * c.powf(fit.b)));
        table.push_row(row);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Cycle;
    use crate::extract::{extract, ExtractOptions};
    use crate::fit::fit_power_law;
    use std::collections::BTreeSet;

    fn series() -> TimeSeries {
        let time = vec![0.0, 1.0, 2.0];
        let ch1 = vec![10.0, 11.0, 12.0];
        let ch3 = vec![20.0, 22.0, 24.0];
        TimeSeries::new(time, [(1, ch1), (3, ch3)].into_iter().collect()).unwrap()
    }

    fn metrics_for(channel: ChannelId, cycle: usize, concentration: f64) -> CycleMetrics {
        CycleMetrics {
            channel,
            cycle,
            concentration,
            baseline: 10.0,
            extremum: 10.0 + concentration / 10.0,
            response: concentration / 10.0,
            response_value: concentration / 10.0,
            response_time: 5.0,
            recovery_time: 7.0,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn series_table_has_time_then_channels() {
        let table = series_table(&series());
        assert_eq!(table.columns, vec!["time", "ch1", "ch3"]);
        assert_eq!(table.rows[1], vec![1.0, 11.0, 22.0]);
    }

    #[test]
    fn response_table_groups_columns_by_metric() {
        let mut metrics = BTreeMap::new();
        metrics.insert((1u8, 0usize), metrics_for(1, 0, 50.0));
        metrics.insert((3u8, 0usize), metrics_for(3, 0, 50.0));
        metrics.insert((1u8, 1usize), metrics_for(1, 1, 100.0));
        // ch3 cycle 1 missing: the hole must be NaN, not a shifted row.

        let table = response_table(&[1, 3], &metrics, &[50.0, 100.0]);
        assert_eq!(
            table.columns,
            vec![
                "concentration",
                "ch1 resp",
                "ch3 resp",
                "ch1 respTime",
                "ch3 respTime",
                "ch1 recTime",
                "ch3 recTime",
            ]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][0], 50.0);
        assert_eq!(table.rows[0][1], 5.0);
        assert!(table.rows[1][2].is_nan());
        assert_eq!(table.rows[1][1], 10.0);
    }

    #[test]
    fn aggregate_rejects_foreign_channels() {
        let mut metrics = BTreeMap::new();
        metrics.insert((5u8, 0usize), metrics_for(5, 0, 50.0));
        let err = aggregate(
            &series(),
            None,
            &metrics,
            &BTreeMap::new(),
            BTreeMap::new(),
            &[50.0],
            100,
        );
        assert!(matches!(
            err,
            Err(AnalysisError::InconsistentChannelSet(_))
        ));
    }

    #[test]
    fn fit_curves_share_one_concentration_grid() {
        let conc: [f64; 3] = [10.0, 50.0, 200.0];
        let vals: Vec<f64> = conc.iter().map(|c| 2.0 * c.sqrt()).collect();
        let fit = fit_power_law(1, MetricKind::Response, &conc, &vals, 100).unwrap();

        let mut fits = BTreeMap::new();
        fits.insert((1u8, MetricKind::Response), fit.clone());
        fits.insert((3u8, MetricKind::Response), fit);

        let table = fit_curve_table(&fits, 100);
        assert_eq!(
            table.columns,
            vec!["concentration", "ch1 resp", "ch3 resp"]
        );
        assert_eq!(table.rows.len(), 100);
        assert!((table.rows[0][0] - 10.0).abs() < 1e-12);
        assert!((table.rows[99][0] - 200.0).abs() < 1e-12);
        // Identical fits give identical columns.
        assert_eq!(table.rows[42][1], table.rows[42][2]);
    }

    #[test]
    fn end_to_end_bundle_from_real_stage_outputs() {
        // Two cycles on one channel, metrics from the real extractor.
        let time: Vec<f64> = (0..=40).map(|i| i as f64).collect();
        let ch1: Vec<f64> = time
            .iter()
            .map(|&t| {
                let pulse = |start: f64, peak: f64| {
                    if t < start || t >= start + 10.0 {
                        0.0
                    } else if t < start + 5.0 {
                        peak * (t - start) / 5.0
                    } else {
                        peak * (start + 10.0 - t) / 5.0
                    }
                };
                10.0 + pulse(5.0, 4.0) + pulse(25.0, 8.0)
            })
            .collect();
        let visible = TimeSeries::new(time, [(1, ch1)].into_iter().collect()).unwrap();

        let cycles = [Cycle::new(5.0, 10.0, 15.0), Cycle::new(25.0, 30.0, 35.0)];
        let concentrations = [50.0, 100.0];
        let channels: BTreeSet<u8> = [1].into_iter().collect();
        let extraction = extract(
            &visible,
            &cycles,
            &concentrations,
            &channels,
            &ExtractOptions::default(),
        );
        assert!(extraction.issues.is_empty());

        let bundle = aggregate(
            &visible,
            None,
            &extraction.metrics,
            &BTreeMap::new(),
            BTreeMap::new(),
            &concentrations,
            100,
        )
        .unwrap();
        assert_eq!(bundle.responses.rows.len(), 2);
        assert_eq!(bundle.visible.rows.len(), 41);
        assert!(bundle.normalized.is_none());
        assert!(bundle.fit_info.is_empty());
    }
}
