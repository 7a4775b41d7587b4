//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during extraction and fitting
//! - exported to JSON/CSV by the host export layer
//! - reloaded later for plotting or comparisons

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Channel index, 1-based (`ch1`..`ch8`) following the acquisition
/// hardware convention.
pub type ChannelId = u8;

/// Maximum number of signal channels in one table.
pub const MAX_CHANNELS: usize = 8;

/// Normalized in-memory representation of the parsed time series:
/// one time vector plus up to [`MAX_CHANNELS`] same-length channel vectors.
///
/// Immutable after construction; every downstream stage produces a fresh
/// `TimeSeries` instead of patching this one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    time: Vec<f64>,
    channels: BTreeMap<ChannelId, Vec<f64>>,
}

/// A normalized series is shaped exactly like the input series; the alias
/// marks which stage produced it.
pub type NormalizedSeries = TimeSeries;

impl TimeSeries {
    /// Build a validated series.
    ///
    /// # Errors
    /// `ConfigurationError` if the time vector is empty, not strictly
    /// increasing, or non-finite; if any channel length differs from the
    /// time length; if a channel index is outside `1..=8`; or if there
    /// are more than [`MAX_CHANNELS`] channels.
    pub fn new(
        time: Vec<f64>,
        channels: BTreeMap<ChannelId, Vec<f64>>,
    ) -> Result<Self, AnalysisError> {
        if time.is_empty() {
            return Err(AnalysisError::Configuration("empty time vector".into()));
        }
        if time.iter().any(|t| !t.is_finite()) {
            return Err(AnalysisError::Configuration(
                "non-finite time value".into(),
            ));
        }
        if time.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AnalysisError::Configuration(
                "time vector must be strictly increasing with no duplicates".into(),
            ));
        }
        if channels.is_empty() {
            return Err(AnalysisError::Configuration("no channels".into()));
        }
        if channels.len() > MAX_CHANNELS {
            return Err(AnalysisError::Configuration(format!(
                "{} channels exceed the maximum of {MAX_CHANNELS}",
                channels.len()
            )));
        }
        for (&id, values) in &channels {
            if id == 0 || id as usize > MAX_CHANNELS {
                return Err(AnalysisError::Configuration(format!(
                    "channel index {id} outside 1..={MAX_CHANNELS}"
                )));
            }
            if values.len() != time.len() {
                return Err(AnalysisError::Configuration(format!(
                    "ch{id} has {} samples but the time vector has {}",
                    values.len(),
                    time.len()
                )));
            }
        }
        Ok(Self { time, channels })
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn channel(&self, id: ChannelId) -> Option<&[f64]> {
        self.channels.get(&id).map(Vec::as_slice)
    }

    /// Channel indices in ascending order.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.keys().copied().collect()
    }

    /// Iterate channels in ascending index order (deterministic).
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &[f64])> {
        self.channels.iter().map(|(&id, v)| (id, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Unit conversion applied before any analysis.
///
/// `time_scale` divides the raw time column (e.g. 60 for seconds→minutes);
/// `channel_scale` multiplies each raw channel into target units (missing
/// entries mean 1.0); `time_zero_shift` subtracts `time[0]` first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub time_scale: f64,
    pub channel_scale: BTreeMap<ChannelId, f64>,
    pub time_zero_shift: bool,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            channel_scale: BTreeMap::new(),
            time_zero_shift: false,
        }
    }
}

impl UnitConfig {
    /// Scale factor for one channel (1.0 when not configured).
    pub fn scale_for(&self, id: ChannelId) -> f64 {
        self.channel_scale.get(&id).copied().unwrap_or(1.0)
    }
}

/// The time sub-range and channel subset the user is analyzing.
///
/// Times are in *transformed* units (after zero-shift and `time_scale`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibleRange {
    pub start_time: f64,
    pub end_time: f64,
    pub selected_channels: BTreeSet<ChannelId>,
}

impl VisibleRange {
    pub fn new(
        start_time: f64,
        end_time: f64,
        selected_channels: BTreeSet<ChannelId>,
    ) -> Self {
        Self {
            start_time,
            end_time,
            selected_channels,
        }
    }
}

/// Reference time at which every channel is rescaled to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationSpec {
    pub reference_time: f64,
}

/// One exposure+recovery interval, in transformed time units.
///
/// The user declares the boundaries; the core never infers them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub exposure_start: f64,
    pub exposure_end: f64,
    pub recovery_end: f64,
}

impl Cycle {
    pub fn new(exposure_start: f64, exposure_end: f64, recovery_end: f64) -> Self {
        Self {
            exposure_start,
            exposure_end,
            recovery_end,
        }
    }

    /// # Errors
    /// `ConfigurationError` unless `exposure_start < exposure_end <
    /// recovery_end` and all boundaries are finite.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let ok = self.exposure_start.is_finite()
            && self.exposure_end.is_finite()
            && self.recovery_end.is_finite()
            && self.exposure_start < self.exposure_end
            && self.exposure_end < self.recovery_end;
        if ok {
            Ok(())
        } else {
            Err(AnalysisError::Configuration(format!(
                "cycle boundaries must satisfy exposure_start < exposure_end < recovery_end, got ({}, {}, {})",
                self.exposure_start, self.exposure_end, self.recovery_end
            )))
        }
    }
}

/// Which per-cycle metric a fit regresses against concentration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Response,
    ResponseTime,
    RecoveryTime,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::Response,
        MetricKind::ResponseTime,
        MetricKind::RecoveryTime,
    ];

    /// Column suffix used in the response table (`ch1 resp`, `ch1 respTime`,
    /// `ch1 recTime`).
    pub fn column_suffix(self) -> &'static str {
        match self {
            MetricKind::Response => "resp",
            MetricKind::ResponseTime => "respTime",
            MetricKind::RecoveryTime => "recTime",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MetricKind::Response => "response",
            MetricKind::ResponseTime => "response time",
            MetricKind::RecoveryTime => "recovery time",
        };
        write!(f, "{name}")
    }
}

/// How the signed response delta is converted into the reported value.
///
/// `Delta` reports the raw signal change; the other two match the classic
/// gas-sensing conventions ΔS/S0 in percent and S(gas)/S(air).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    #[default]
    Delta,
    PercentOfBaseline,
    Ratio,
}

/// Non-fatal conditions attached to a [`CycleMetrics`]. The saturated
/// value is still reported so the user can compare it against other
/// cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricWarning {
    /// The response threshold was never crossed; `response_time` is the
    /// full exposure window length.
    ResponseSaturated,
    /// The recovery threshold was never crossed; `recovery_time` is the
    /// full recovery window length.
    RecoverySaturated,
    /// The channel was already past the response threshold at the first
    /// window sample.
    ZeroResponseTime,
    /// The channel was already back within the recovery threshold at the
    /// first window sample.
    ZeroRecoveryTime,
    /// Flat curve: extremum equals baseline.
    ZeroResponse,
    /// Baseline is zero, so baseline-relative response kinds are
    /// undefined; `response_value` is NaN.
    ZeroBaseline,
}

/// Per (channel, cycle) metrics. Produced once per extraction call,
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleMetrics {
    pub channel: ChannelId,
    pub cycle: usize,
    pub concentration: f64,
    /// Channel value at the sample nearest to exposure onset.
    pub baseline: f64,
    /// Peak (rising curve) or trough (falling curve) within the exposure
    /// window.
    pub extremum: f64,
    /// Signed change `extremum - baseline`.
    pub response: f64,
    /// The reported response metric after applying [`ResponseKind`].
    pub response_value: f64,
    /// Elapsed time from exposure onset to the response-threshold
    /// crossing.
    pub response_time: f64,
    /// Elapsed time from exposure end to the recovery-threshold crossing.
    pub recovery_time: f64,
    pub warnings: Vec<MetricWarning>,
}

impl CycleMetrics {
    /// The value regressed against concentration for the given metric.
    pub fn metric(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Response => self.response_value,
            MetricKind::ResponseTime => self.response_time,
            MetricKind::RecoveryTime => self.recovery_time,
        }
    }
}

/// One fitting input: a cycle's concentration paired with the metrics it
/// produced on one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentrationPoint {
    pub concentration: f64,
    pub metrics: CycleMetrics,
}

/// Power-law fit `metric = a · concentration^b` for one channel and one
/// metric kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitResult {
    pub a: f64,
    pub b: f64,
    /// Computed against the untransformed residuals, not the log-log ones.
    pub r_squared: f64,
    /// Dense `(concentration, predicted)` samples spanning the observed
    /// concentration range, for smooth plotting.
    pub curve: Vec<(f64, f64)>,
    /// True when these are the log-linear fallback parameters reported
    /// after the nonlinear solver failed to converge.
    pub approximate: bool,
}

/// Linear sensitivity: slope of response vs concentration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sensitivity {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// A full run's configuration as understood by the pipeline.
///
/// The host owns this; the core holds no state between calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub unit: UnitConfig,
    pub range: VisibleRange,
    pub normalization: Option<NormalizationSpec>,
    /// User-declared cycle boundaries, in transformed time units.
    pub cycles: Vec<Cycle>,
    /// Exposure concentration per cycle (same length as `cycles`).
    pub concentrations: Vec<f64>,
    /// Fraction of the full response that defines `response_time`
    /// (0.9 = t-resp-90).
    pub response_threshold: f64,
    /// Fractional distance back toward baseline that defines
    /// `recovery_time` (0.1 = recovered to within 10%).
    pub recovery_threshold: f64,
    pub response_kind: ResponseKind,
    /// Divide the reported response by the cycle concentration.
    pub per_concentration: bool,
    /// Also compute the linear sensitivity regression per channel.
    pub sensitivity: bool,
    /// Number of samples in each fitted curve.
    pub fit_points: usize,
}

impl AnalysisConfig {
    /// Configuration with default thresholds for the given range and
    /// cycles.
    pub fn new(range: VisibleRange, cycles: Vec<Cycle>, concentrations: Vec<f64>) -> Self {
        Self {
            unit: UnitConfig::default(),
            range,
            normalization: None,
            cycles,
            concentrations,
            response_threshold: 0.9,
            recovery_threshold: 0.1,
            response_kind: ResponseKind::default(),
            per_concentration: false,
            sensitivity: false,
            fit_points: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(pairs: &[(ChannelId, Vec<f64>)]) -> BTreeMap<ChannelId, Vec<f64>> {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn time_series_accepts_valid_input() {
        let ts = TimeSeries::new(
            vec![0.0, 1.0, 2.0],
            channels(&[(1, vec![5.0, 6.0, 7.0]), (2, vec![1.0, 1.0, 1.0])]),
        )
        .unwrap();
        assert_eq!(ts.len(), 3);
        assert_eq!(ts.channel_ids(), vec![1, 2]);
        assert_eq!(ts.channel(2).unwrap(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn time_series_rejects_non_increasing_time() {
        let err = TimeSeries::new(vec![0.0, 1.0, 1.0], channels(&[(1, vec![0.0; 3])]));
        assert!(matches!(err, Err(AnalysisError::Configuration(_))));
    }

    #[test]
    fn time_series_rejects_length_mismatch() {
        let err = TimeSeries::new(vec![0.0, 1.0], channels(&[(1, vec![0.0; 3])]));
        assert!(matches!(err, Err(AnalysisError::Configuration(_))));
    }

    #[test]
    fn time_series_rejects_channel_index_out_of_range() {
        let err = TimeSeries::new(vec![0.0, 1.0], channels(&[(9, vec![0.0; 2])]));
        assert!(matches!(err, Err(AnalysisError::Configuration(_))));
    }

    #[test]
    fn cycle_validation_enforces_ordering() {
        assert!(Cycle::new(0.0, 10.0, 20.0).validate().is_ok());
        assert!(Cycle::new(10.0, 10.0, 20.0).validate().is_err());
        assert!(Cycle::new(0.0, 20.0, 15.0).validate().is_err());
    }
}
