use crate::{
    detectors::rpeak::PeakSet,
    error::{EkgError, Result},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Slack on the physiological gate so that intervals computed from rounded
/// timestamps are not rejected at the exact bound.
const GATE_TOLERANCE_S: f64 = 1e-9;

/// Knobs of the rate estimate on top of detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateOptions {
    /// Intervals deviating from the median by more than this fraction of it are dropped.
    pub outlier_fraction: f64,
    pub min_peaks_required: usize,
}

impl Default for RateOptions {
    fn default() -> Self {
        Self {
            outlier_fraction: 0.3,
            min_peaks_required: 3,
        }
    }
}

impl RateOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.outlier_fraction.is_finite() && self.outlier_fraction >= 0.0) {
            return Err(EkgError::InvalidParameters(format!(
                "outlier fraction must be a non-negative number, got {}",
                self.outlier_fraction
            )));
        }
        Ok(())
    }
}

/// Why no heart rate could be given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Unavailable {
    /// The analysed window is shorter than one detection window.
    InsufficientData { samples: usize, required: usize },
    InsufficientPeaks { got: usize, need: usize },
    /// Every interval failed the outlier or physiological filter.
    AllOutliers { intervals: usize },
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::InsufficientData { samples, required } => write!(
                f,
                "insufficient data: got {samples} samples, need {required}"
            ),
            Unavailable::InsufficientPeaks { got, need } => {
                write!(f, "insufficient peaks: got {got}, need {need}")
            }
            Unavailable::AllOutliers { .. } => write!(f, "all intervals rejected as outliers"),
        }
    }
}

/// Average heart rate over a recording or window, or the reason it is undetermined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HeartRateEstimate {
    Available {
        bpm: f64,
        intervals_used: usize,
        intervals_rejected: usize,
    },
    Unavailable { reason: Unavailable },
}

impl HeartRateEstimate {
    pub fn bpm(&self) -> Option<f64> {
        match self {
            HeartRateEstimate::Available { bpm, .. } => Some(*bpm),
            HeartRateEstimate::Unavailable { .. } => None,
        }
    }

    pub fn unavailable_reason(&self) -> Option<Unavailable> {
        match self {
            HeartRateEstimate::Available { .. } => None,
            HeartRateEstimate::Unavailable { reason } => Some(*reason),
        }
    }

    fn unavailable(reason: Unavailable) -> Self {
        HeartRateEstimate::Unavailable { reason }
    }
}

/// Average heart rate from a detection result.
///
/// The intervals between consecutive peaks are filtered twice: against the
/// median (`outlier_fraction`) and against the physiological bounds the peaks
/// were detected with. Both filters must pass.
pub fn average_heart_rate(peaks: &PeakSet, options: &RateOptions) -> Result<HeartRateEstimate> {
    options.validate()?;
    if peaks.is_too_short() {
        return Ok(HeartRateEstimate::unavailable(
            Unavailable::InsufficientData {
                samples: peaks.samples_analyzed,
                required: peaks.parameters.min_samples(),
            },
        ));
    }
    if peaks.len() < options.min_peaks_required {
        return Ok(HeartRateEstimate::unavailable(
            Unavailable::InsufficientPeaks {
                got: peaks.len(),
                need: options.min_peaks_required,
            },
        ));
    }
    let intervals = peaks.intervals();
    if intervals.is_empty() {
        return Ok(HeartRateEstimate::unavailable(
            Unavailable::InsufficientPeaks {
                got: peaks.len(),
                need: options.min_peaks_required.max(2),
            },
        ));
    }
    Ok(rate_from_intervals(
        &intervals,
        peaks.parameters.min_interval_s,
        peaks.parameters.max_interval_s,
        options.outlier_fraction,
    ))
}

/// Mean of the per-interval rates `60 / rr` over the intervals that survive
/// both filters. Averaging the rates differs from `60 / mean(rr)`.
pub fn rate_from_intervals(
    intervals: &[f64],
    min_interval_s: f64,
    max_interval_s: f64,
    outlier_fraction: f64,
) -> HeartRateEstimate {
    let Some(median) = median(intervals) else {
        return HeartRateEstimate::unavailable(Unavailable::AllOutliers { intervals: 0 });
    };
    let bound = outlier_fraction * median;
    let kept: Vec<f64> = intervals
        .iter()
        .copied()
        .filter(|rr| (rr - median).abs() <= bound)
        .filter(|&rr| {
            rr >= min_interval_s - GATE_TOLERANCE_S && rr <= max_interval_s + GATE_TOLERANCE_S
        })
        .collect();
    if kept.is_empty() {
        return HeartRateEstimate::unavailable(Unavailable::AllOutliers {
            intervals: intervals.len(),
        });
    }
    let bpm = kept.iter().map(|rr| 60.0 / rr).sum::<f64>() / kept.len() as f64;
    HeartRateEstimate::Available {
        bpm,
        intervals_used: kept.len(),
        intervals_rejected: intervals.len() - kept.len(),
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Beat-to-beat rate at the time of each peak that has a predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatePoint {
    pub time_s: f64,
    pub bpm: f64,
}

pub fn instantaneous_rates(peaks: &PeakSet) -> Vec<RatePoint> {
    peaks
        .peaks
        .iter()
        .filter_map(|p| {
            p.interval_s
                .filter(|rr| *rr > 0.0)
                .map(|rr| RatePoint {
                    time_s: p.time_s,
                    bpm: 60.0 / rr,
                })
        })
        .collect()
}

/// Unfiltered summary of the RR intervals of a detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalStats {
    pub n: usize,
    pub min_s: f64,
    pub max_s: f64,
    pub mean_s: f64,
    pub sdnn_s: f64,
    pub rmssd_s: f64,
    pub pnn50: f64,
    /// `60 / mean_s`, shown as a quick sanity check next to the averaged estimate.
    pub mean_interval_bpm: f64,
}

pub fn interval_stats(peaks: &PeakSet) -> Option<IntervalStats> {
    let rr = peaks.intervals();
    let n = rr.len();
    if n == 0 {
        return None;
    }
    let mean_s = rr.iter().sum::<f64>() / n as f64;
    let min_s = rr.iter().copied().fold(f64::INFINITY, f64::min);
    let max_s = rr.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (sdnn_s, rmssd_s, pnn50) = if n > 1 {
        let denom = n as f64 - 1.0;
        let sdnn = (rr.iter().map(|x| (x - mean_s).powi(2)).sum::<f64>() / denom).sqrt();
        let diffs: Vec<f64> = rr.windows(2).map(|w| w[1] - w[0]).collect();
        let rmssd = (diffs.iter().map(|d| d * d).sum::<f64>() / denom).sqrt();
        let pnn50 = diffs.iter().filter(|d| d.abs() > 0.050).count() as f64 / denom;
        (sdnn, rmssd, pnn50)
    } else {
        (0.0, 0.0, 0.0)
    };
    Some(IntervalStats {
        n,
        min_s,
        max_s,
        mean_s,
        sdnn_s,
        rmssd_s,
        pnn50,
        mean_interval_bpm: if mean_s > 0.0 { 60.0 / mean_s } else { 0.0 },
    })
}
