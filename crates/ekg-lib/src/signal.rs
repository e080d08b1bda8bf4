use crate::error::{EkgError, Result};
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Amplitude storage precision. `f64` keeps full precision, `f32` halves the
/// memory of long recordings.
pub trait Sample: Float + Debug + Send + Sync + 'static {}

impl<T> Sample for T where T: Float + Debug + Send + Sync + 'static {}

/// One single-lead EKG recording.
///
/// Amplitudes are millivolts. Times are seconds relative to the first sample and
/// strictly increasing. The series is immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSeries<T: Sample = f64> {
    amplitude: Vec<T>,
    time_s: Vec<f64>,
}

impl<T: Sample> SampleSeries<T> {
    /// Build a series from millisecond timestamps, the unit recordings are stored in.
    pub fn from_millis(amplitude: Vec<T>, time_ms: Vec<f64>) -> Result<Self> {
        validate(&amplitude, &time_ms)?;
        let origin = time_ms[0];
        let time_s = time_ms.iter().map(|t| (t - origin) / 1000.0).collect();
        Ok(Self { amplitude, time_s })
    }

    /// Build a series from timestamps already expressed in seconds.
    pub fn from_seconds(amplitude: Vec<T>, time_s: Vec<f64>) -> Result<Self> {
        validate(&amplitude, &time_s)?;
        let origin = time_s[0];
        let time_s = time_s.iter().map(|t| t - origin).collect();
        Ok(Self { amplitude, time_s })
    }

    /// Build a uniformly sampled series starting at t = 0.
    pub fn from_uniform(amplitude: Vec<T>, fs: f64) -> Result<Self> {
        if !(fs.is_finite() && fs > 0.0) {
            return Err(EkgError::InvalidParameters(format!(
                "sampling rate must be positive, got {fs}"
            )));
        }
        let time_s = (0..amplitude.len()).map(|i| i as f64 / fs).collect();
        Self::from_seconds(amplitude, time_s)
    }

    pub fn amplitude(&self) -> &[T] {
        &self.amplitude
    }

    pub fn time_s(&self) -> &[f64] {
        &self.time_s
    }

    pub fn len(&self) -> usize {
        self.amplitude.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitude.is_empty()
    }

    pub fn duration_s(&self) -> f64 {
        self.time_s.last().copied().unwrap_or(0.0)
    }

    /// Borrow the samples whose time falls inside `range` (both ends inclusive),
    /// or the whole recording when no range is given.
    pub fn view(&self, range: Option<SubRange>) -> SeriesView<'_, T> {
        let Some(range) = range else {
            return SeriesView {
                amplitude: &self.amplitude,
                time_s: &self.time_s,
                offset: 0,
            };
        };
        let start = self.time_s.partition_point(|&t| t < range.start_s);
        let end = self.time_s.partition_point(|&t| t <= range.end_s).max(start);
        SeriesView {
            amplitude: &self.amplitude[start..end],
            time_s: &self.time_s[start..end],
            offset: start,
        }
    }

    pub fn stats(&self) -> RecordStats {
        RecordStats::from_series(self)
    }
}

fn validate<T: Sample>(amplitude: &[T], time: &[f64]) -> Result<()> {
    if amplitude.is_empty() {
        return Err(EkgError::InvalidInput("series has no samples".into()));
    }
    if amplitude.len() != time.len() {
        return Err(EkgError::InvalidInput(format!(
            "{} amplitude values but {} timestamps",
            amplitude.len(),
            time.len()
        )));
    }
    if let Some(idx) = amplitude.iter().position(|v| !v.is_finite()) {
        return Err(EkgError::InvalidInput(format!(
            "non-finite amplitude at sample {idx}"
        )));
    }
    if let Some(idx) = time.iter().position(|t| !t.is_finite()) {
        return Err(EkgError::InvalidInput(format!(
            "non-finite timestamp at sample {idx}"
        )));
    }
    if let Some(idx) = time.windows(2).position(|w| w[1] <= w[0]) {
        return Err(EkgError::InvalidInput(format!(
            "timestamps not strictly increasing at sample {}",
            idx + 1
        )));
    }
    Ok(())
}

/// Borrowed window of a [`SampleSeries`]. `offset` is the index of the first
/// sample of the window inside the full recording.
#[derive(Debug, Clone, Copy)]
pub struct SeriesView<'a, T: Sample> {
    pub amplitude: &'a [T],
    pub time_s: &'a [f64],
    pub offset: usize,
}

impl<T: Sample> SeriesView<'_, T> {
    pub fn len(&self) -> usize {
        self.amplitude.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitude.is_empty()
    }
}

/// Inclusive time window in seconds from the start of the recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubRange {
    pub start_s: f64,
    pub end_s: f64,
}

impl SubRange {
    pub fn new(start_s: f64, end_s: f64) -> Result<Self> {
        if !start_s.is_finite() || !end_s.is_finite() {
            return Err(EkgError::InvalidInput(format!(
                "sub-range bounds must be finite, got [{start_s}, {end_s}]"
            )));
        }
        if start_s > end_s {
            return Err(EkgError::InvalidInput(format!(
                "sub-range start {start_s} s is after end {end_s} s"
            )));
        }
        Ok(Self { start_s, end_s })
    }

    /// Build a range from caller bounds expressed in `unit`.
    pub fn from_bounds(start: f64, end: f64, unit: TimeUnit, sampling_rate_hz: f64) -> Result<Self> {
        Self::new(
            unit.to_seconds(start, sampling_rate_hz)?,
            unit.to_seconds(end, sampling_rate_hz)?,
        )
    }

    pub fn width_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

/// Unit of a caller-supplied time bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    #[default]
    Seconds,
    Milliseconds,
    Samples,
    /// Guess the unit from the magnitude of the value. See [`TimeUnit::infer`].
    Auto,
}

impl TimeUnit {
    /// Magnitude heuristic: above 100000 the value is a sample count, above 1000
    /// milliseconds, otherwise seconds. Ambiguous for long recordings; prefer an
    /// explicit unit.
    pub fn infer(value: f64) -> TimeUnit {
        if value > 100_000.0 {
            TimeUnit::Samples
        } else if value > 1000.0 {
            TimeUnit::Milliseconds
        } else {
            TimeUnit::Seconds
        }
    }

    pub fn to_seconds(self, value: f64, sampling_rate_hz: f64) -> Result<f64> {
        match self {
            TimeUnit::Seconds => Ok(value),
            TimeUnit::Milliseconds => Ok(value / 1000.0),
            TimeUnit::Samples => {
                if !(sampling_rate_hz.is_finite() && sampling_rate_hz > 0.0) {
                    return Err(EkgError::InvalidParameters(format!(
                        "cannot convert samples to seconds at {sampling_rate_hz} Hz"
                    )));
                }
                Ok(value / sampling_rate_hz)
            }
            TimeUnit::Auto => TimeUnit::infer(value).to_seconds(value, sampling_rate_hz),
        }
    }
}

/// Summary of a recording shown next to the chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordStats {
    pub samples: usize,
    pub duration_s: f64,
    pub duration_min: f64,
    pub min_mv: f64,
    pub max_mv: f64,
    pub mean_mv: f64,
    /// `None` for single-sample recordings.
    pub estimated_sampling_rate_hz: Option<f64>,
}

impl RecordStats {
    pub fn from_series<T: Sample>(series: &SampleSeries<T>) -> Self {
        let values = series.amplitude().iter().filter_map(|v| v.to_f64());
        let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
        for v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        let samples = series.len();
        let duration_s = series.duration_s();
        let estimated_sampling_rate_hz = if samples > 1 && duration_s > 0.0 {
            Some((samples - 1) as f64 / duration_s)
        } else {
            None
        };
        Self {
            samples,
            duration_s,
            duration_min: duration_s / 60.0,
            min_mv: min,
            max_mv: max,
            mean_mv: sum / samples.max(1) as f64,
            estimated_sampling_rate_hz,
        }
    }
}
