use crate::{
    error::{EkgError, Result},
    signal::{Sample, SampleSeries, SeriesView, SubRange},
};
use serde::{Deserialize, Serialize};
use std::fmt;

const SPACING_TOLERANCE_S: f64 = 1e-9;

/// Level a local maximum has to exceed to count as an R-peak candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Threshold {
    /// `mean + (max - mean) * factor` over the analysed window. The nominal
    /// factor range is (0, 1]; other values are used as given and reported.
    Adaptive { factor: f64 },
    /// Fixed level in millivolts.
    Absolute { level_mv: f64 },
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::Adaptive { factor: 0.6 }
    }
}

impl Threshold {
    /// Build from the flag + factor pair used by callers that expose a single
    /// threshold knob: with `adaptive == false` the factor is an absolute level.
    pub fn from_flag(adaptive: bool, factor: f64) -> Self {
        if adaptive {
            Threshold::Adaptive { factor }
        } else {
            Threshold::Absolute { level_mv: factor }
        }
    }

    pub fn is_adaptive(&self) -> bool {
        matches!(self, Threshold::Adaptive { .. })
    }

    fn value(&self) -> f64 {
        match *self {
            Threshold::Adaptive { factor } => factor,
            Threshold::Absolute { level_mv } => level_mv,
        }
    }
}

/// Caller-facing detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParameters {
    /// Sampling rate used to turn time-based parameters into sample counts.
    pub sampling_rate_hz: u32,
    /// Half-width of the local-maximum window in samples. Derived from the
    /// sampling rate (about 20 ms) when unset.
    pub window_half_width: Option<usize>,
    pub threshold: Threshold,
    /// Shortest accepted RR interval (0.3 s, 200 bpm).
    pub min_interval_s: f64,
    /// Gaps longer than this (2.0 s, 30 bpm) are reported as likely missed beats.
    pub max_interval_s: f64,
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 500,
            window_half_width: None,
            threshold: Threshold::default(),
            min_interval_s: 0.3,
            max_interval_s: 2.0,
        }
    }
}

impl DetectionParameters {
    /// Validate and derive the sample-domain quantities.
    pub fn resolve(&self) -> Result<ResolvedParameters> {
        if self.sampling_rate_hz == 0 {
            return Err(EkgError::InvalidParameters(
                "sampling rate must be positive".into(),
            ));
        }
        if self.window_half_width == Some(0) {
            return Err(EkgError::InvalidParameters(
                "window half-width must be at least one sample".into(),
            ));
        }
        if let Some(w) = self.window_half_width {
            if w.checked_mul(2).and_then(|w| w.checked_add(1)).is_none() {
                return Err(EkgError::InvalidParameters(format!(
                    "window half-width {w} is too large"
                )));
            }
        }
        if !self.threshold.value().is_finite() {
            return Err(EkgError::InvalidParameters(format!(
                "threshold must be finite, got {}",
                self.threshold.value()
            )));
        }
        if !(self.min_interval_s.is_finite()
            && self.max_interval_s.is_finite()
            && self.min_interval_s > 0.0
            && self.min_interval_s < self.max_interval_s)
        {
            return Err(EkgError::InvalidParameters(format!(
                "interval bounds must satisfy 0 < min < max, got [{}, {}]",
                self.min_interval_s, self.max_interval_s
            )));
        }
        let fs = self.sampling_rate_hz as f64;
        let window_half_width = self
            .window_half_width
            .unwrap_or_else(|| ((fs * 0.02).round() as usize).max(5));
        Ok(ResolvedParameters {
            sampling_rate_hz: self.sampling_rate_hz,
            window_half_width,
            threshold: self.threshold,
            min_interval_s: self.min_interval_s,
            max_interval_s: self.max_interval_s,
            min_interval_samples: (self.min_interval_s * fs).round() as usize,
        })
    }
}

/// Detection parameters with every derived value filled in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParameters {
    pub sampling_rate_hz: u32,
    pub window_half_width: usize,
    pub threshold: Threshold,
    pub min_interval_s: f64,
    pub max_interval_s: f64,
    pub min_interval_samples: usize,
}

impl ResolvedParameters {
    /// Fewest samples a window needs to hold a single full detection window.
    pub fn min_samples(&self) -> usize {
        2 * self.window_half_width + 1
    }
}

/// One accepted R-peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Sample index relative to the analysed window.
    pub index: usize,
    /// Seconds from the start of the recording.
    pub time_s: f64,
    pub amplitude_mv: f64,
    /// Seconds since the previous peak, `None` for the first one.
    pub interval_s: Option<f64>,
}

/// Non-fatal findings collected during detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Two consecutive peaks further apart than the maximum interval, likely a missed beat.
    LargeGap {
        index: usize,
        gap_s: f64,
        max_interval_s: f64,
    },
    /// The window holds fewer samples than one detection window.
    TooShort { samples: usize, required: usize },
    /// Constant amplitude, nothing can exceed an adaptive threshold.
    FlatSignal,
    /// Adaptive factor outside (0, 1], used unchanged.
    ThresholdFactorOutOfRange { factor: f64 },
    /// No local maximum cleared the threshold.
    NoPeaks { threshold_mv: f64 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::LargeGap {
                index,
                gap_s,
                max_interval_s,
            } => write!(
                f,
                "large RR interval at sample {index}: {gap_s:.2}s exceeds {max_interval_s:.2}s"
            ),
            Diagnostic::TooShort { samples, required } => write!(
                f,
                "window holds {samples} samples, detection needs at least {required}"
            ),
            Diagnostic::FlatSignal => write!(f, "signal is flat, no peaks can be detected"),
            Diagnostic::ThresholdFactorOutOfRange { factor } => write!(
                f,
                "adaptive threshold factor {factor} is outside (0, 1], used as given"
            ),
            Diagnostic::NoPeaks { threshold_mv } => write!(
                f,
                "no peaks above {threshold_mv:.3} mV, check threshold and signal quality"
            ),
        }
    }
}

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakSet {
    pub peaks: Vec<Peak>,
    pub parameters: ResolvedParameters,
    pub range: Option<SubRange>,
    /// Index of the analysed window's first sample in the full recording.
    pub offset: usize,
    pub samples_analyzed: usize,
    /// Effective amplitude threshold, absent when detection did not get that far.
    pub threshold_mv: Option<f64>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PeakSet {
    fn empty(parameters: ResolvedParameters, range: Option<SubRange>, offset: usize, n: usize) -> Self {
        Self {
            peaks: Vec::new(),
            parameters,
            range,
            offset,
            samples_analyzed: n,
            threshold_mv: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.peaks.iter().map(|p| p.index).collect()
    }

    pub fn times(&self) -> Vec<f64> {
        self.peaks.iter().map(|p| p.time_s).collect()
    }

    /// RR intervals in seconds, one fewer than the number of peaks.
    pub fn intervals(&self) -> Vec<f64> {
        self.peaks.iter().filter_map(|p| p.interval_s).collect()
    }

    /// Whether the window was too short to run detection at all.
    pub fn is_too_short(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::TooShort { .. }))
    }

    pub fn large_gaps(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::LargeGap { .. }))
    }
}

/// Detect R-peaks over the whole recording or the samples inside `range`.
pub fn detect_peaks<T: Sample>(
    series: &SampleSeries<T>,
    params: &DetectionParameters,
    range: Option<SubRange>,
) -> Result<PeakSet> {
    let resolved = params.resolve()?;
    Ok(detect_in_view(series.view(range), &resolved, range))
}

/// Core pass: fixed-width local-maximum test, threshold, then greedy
/// left-to-right acceptance with a minimum spacing.
///
/// Acceptance is greedy: a candidate inside the exclusion window of an already
/// accepted peak is dropped even when it is larger. This keeps results
/// compatible with earlier recordings at the cost of occasionally keeping an
/// artifact over the true R-peak that follows it.
pub fn detect_in_view<T: Sample>(
    view: SeriesView<'_, T>,
    params: &ResolvedParameters,
    range: Option<SubRange>,
) -> PeakSet {
    let n = view.len();
    let mut set = PeakSet::empty(*params, range, view.offset, n);

    if let Threshold::Adaptive { factor } = params.threshold {
        if !(factor > 0.0 && factor <= 1.0) {
            set.diagnostics
                .push(Diagnostic::ThresholdFactorOutOfRange { factor });
        }
    }

    let half = params.window_half_width;
    if n < params.min_samples() {
        set.diagnostics.push(Diagnostic::TooShort {
            samples: n,
            required: params.min_samples(),
        });
        return set;
    }

    let values = view.amplitude;
    let Some(threshold) = amplitude_threshold(values, params.threshold) else {
        set.diagnostics.push(Diagnostic::FlatSignal);
        return set;
    };
    set.threshold_mv = Some(threshold);

    let mut last: Option<usize> = None;
    for i in half..n - half {
        let center = values[i];
        let amplitude_mv = center.to_f64().unwrap_or(f64::NAN);
        if amplitude_mv <= threshold {
            continue;
        }
        if !values[i - half..=i + half].iter().all(|&v| v <= center) {
            continue;
        }
        let time_s = view.time_s[i];
        if let Some(prev) = last {
            // The sample count is rounded; the time gap keeps the configured minimum exact.
            if i - prev < params.min_interval_samples
                || time_s - view.time_s[prev] < params.min_interval_s - SPACING_TOLERANCE_S
            {
                continue;
            }
        }

        let interval_s = last.map(|prev| time_s - view.time_s[prev]);
        if let Some(gap_s) = interval_s {
            if gap_s > params.max_interval_s {
                set.diagnostics.push(Diagnostic::LargeGap {
                    index: i,
                    gap_s,
                    max_interval_s: params.max_interval_s,
                });
            }
        }
        set.peaks.push(Peak {
            index: i,
            time_s,
            amplitude_mv,
            interval_s,
        });
        last = Some(i);
    }

    if set.peaks.is_empty() {
        set.diagnostics.push(Diagnostic::NoPeaks {
            threshold_mv: threshold,
        });
    }
    set
}

/// `None` when an adaptive threshold is requested over a constant signal.
fn amplitude_threshold<T: Sample>(values: &[T], threshold: Threshold) -> Option<f64> {
    match threshold {
        Threshold::Absolute { level_mv } => Some(level_mv),
        Threshold::Adaptive { factor } => {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            let mut sum = 0.0;
            for v in values.iter().filter_map(|v| v.to_f64()) {
                min = min.min(v);
                max = max.max(v);
                sum += v;
            }
            if max <= min {
                return None;
            }
            let mean = sum / values.len() as f64;
            Some(mean + (max - mean) * factor)
        }
    }
}
