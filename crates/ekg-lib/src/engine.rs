use crate::{
    detectors::rpeak::{detect_in_view, DetectionParameters, PeakSet, ResolvedParameters, Threshold},
    error::Result,
    metrics::heart_rate::{average_heart_rate, HeartRateEstimate, RateOptions},
    signal::{Sample, SampleSeries, SubRange},
};
use log::{debug, trace};
use std::{collections::HashMap, sync::Arc};

/// Value-equality key of one detection pass. Built from the resolved
/// parameters, so an unset window and its derived width share an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    sampling_rate_hz: u32,
    window_half_width: usize,
    adaptive: bool,
    threshold: u64,
    min_interval_s: u64,
    max_interval_s: u64,
    range: Option<(u64, u64)>,
}

impl CacheKey {
    fn new(params: &ResolvedParameters, range: Option<SubRange>) -> Self {
        let (adaptive, threshold) = match params.threshold {
            Threshold::Adaptive { factor } => (true, factor),
            Threshold::Absolute { level_mv } => (false, level_mv),
        };
        Self {
            sampling_rate_hz: params.sampling_rate_hz,
            window_half_width: params.window_half_width,
            adaptive,
            threshold: bits(threshold),
            min_interval_s: bits(params.min_interval_s),
            max_interval_s: bits(params.max_interval_s),
            range: range.map(|r| (bits(r.start_s), bits(r.end_s))),
        }
    }
}

// -0.0 and 0.0 compare equal, so they must hash equal too.
fn bits(value: f64) -> u64 {
    (value + 0.0).to_bits()
}

/// Analysis session over one loaded recording.
///
/// Detection results are memoized per (parameters, sub-range) for as long as the
/// recording is held; moving the display window over a range that was already
/// analysed costs a map lookup. The cache has no eviction, a single recording
/// yields few distinct keys. Replacing the recording drops every entry.
#[derive(Debug)]
pub struct PeakDetectionEngine<T: Sample = f64> {
    series: SampleSeries<T>,
    cache: HashMap<CacheKey, Arc<PeakSet>>,
}

impl<T: Sample> PeakDetectionEngine<T> {
    pub fn new(series: SampleSeries<T>) -> Self {
        Self {
            series,
            cache: HashMap::new(),
        }
    }

    pub fn series(&self) -> &SampleSeries<T> {
        &self.series
    }

    pub fn into_series(self) -> SampleSeries<T> {
        self.series
    }

    /// Swap in another recording and invalidate every cached result.
    pub fn replace_series(&mut self, series: SampleSeries<T>) {
        debug!(
            "replacing recording ({} -> {} samples), dropping {} cached detection(s)",
            self.series.len(),
            series.len(),
            self.cache.len()
        );
        self.series = series;
        self.cache.clear();
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    /// Detect peaks, reusing an earlier result for the same parameters and range.
    pub fn detect_peaks(
        &mut self,
        params: &DetectionParameters,
        range: Option<SubRange>,
    ) -> Result<Arc<PeakSet>> {
        let resolved = params.resolve()?;
        let key = CacheKey::new(&resolved, range);
        if let Some(hit) = self.cache.get(&key) {
            trace!("peak cache hit for {:?}", key);
            return Ok(Arc::clone(hit));
        }
        let set = Arc::new(detect_in_view(self.series.view(range), &resolved, range));
        debug!(
            "detected {} peak(s) over {} sample(s), range {:?}, {} diagnostic(s)",
            set.len(),
            set.samples_analyzed,
            range,
            set.diagnostics.len()
        );
        self.cache.insert(key, Arc::clone(&set));
        Ok(set)
    }

    pub fn average_heart_rate(
        &mut self,
        params: &DetectionParameters,
        range: Option<SubRange>,
        options: &RateOptions,
    ) -> Result<HeartRateEstimate> {
        options.validate()?;
        let peaks = self.detect_peaks(params, range)?;
        average_heart_rate(&peaks, options)
    }
}
