use crate::{
    detectors::rpeak::PeakSet,
    metrics::heart_rate::HeartRateEstimate,
    signal::{Sample, SampleSeries},
};
use serde::{Deserialize, Serialize};

/// Trace points kept for rendering unless the caller asks otherwise.
pub const DEFAULT_MAX_POINTS: usize = 10_000;

pub const TRACE_COLOR: u32 = 0x1F77B4;
pub const PEAK_COLOR: u32 = 0xD62728;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub color: Color,
}

/// `0xRRGGBB`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(&self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub size: u32,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Markers(MarkerSeries),
}

impl Series {
    /// Legend label.
    pub fn name(&self) -> &str {
        match self {
            Series::Line(line) => &line.name,
            Series::Markers(markers) => &markers.name,
        }
    }

    pub fn points(&self) -> &[[f64; 2]] {
        match self {
            Series::Line(line) => &line.points,
            Series::Markers(markers) => &markers.points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// `(x_min, x_max, y_min, y_max)` over every series, `None` when nothing is plotted.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut points = self.series.iter().flat_map(|s| s.points().iter());
        let first = points.next()?;
        let init = (first[0], first[0], first[1], first[1]);
        Some(points.fold(init, |(x0, x1, y0, y1), p| {
            (x0.min(p[0]), x1.max(p[0]), y0.min(p[1]), y1.max(p[1]))
        }))
    }
}

pub trait PlotBackend {
    fn draw(&mut self, fig: &Figure) -> anyhow::Result<()>;
}

/// Keep every `len / max_points`-th point once a trace exceeds `max_points`.
/// A `max_points` of zero disables reduction.
pub fn downsample(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if max_points == 0 || points.len() <= max_points {
        return points.to_vec();
    }
    let step = points.len() / max_points;
    points.iter().step_by(step).copied().collect()
}

fn title_for(estimate: &HeartRateEstimate) -> String {
    match estimate {
        HeartRateEstimate::Available { bpm, .. } => format!("EKG, mean heart rate {bpm:.1} bpm"),
        HeartRateEstimate::Unavailable { reason } => {
            format!("EKG, heart rate unavailable ({reason})")
        }
    }
}

/// EKG trace over the detection range with the detected R-peaks marked.
///
/// Only the trace is reduced to `max_points`; `peaks` must come from the
/// full-resolution series so markers sit on the true maxima.
pub fn figure_from_ekg<T: Sample>(
    series: &SampleSeries<T>,
    peaks: &PeakSet,
    estimate: &HeartRateEstimate,
    max_points: usize,
) -> Figure {
    let view = series.view(peaks.range);
    let trace: Vec<[f64; 2]> = view
        .time_s
        .iter()
        .zip(view.amplitude)
        .map(|(t, v)| [*t, v.to_f64().unwrap_or(f64::NAN)])
        .collect();

    let mut fig = Figure::new(Some(title_for(estimate)));
    fig.x.label = Some("Time (s)".into());
    fig.y.label = Some("Amplitude (mV)".into());
    fig.add_series(Series::Line(LineSeries {
        name: "EKG".into(),
        points: downsample(&trace, max_points),
        style: Style {
            width: 1.0,
            color: Color(TRACE_COLOR),
        },
    }));
    fig.add_series(Series::Markers(MarkerSeries {
        name: "R-peaks".into(),
        points: peaks
            .peaks
            .iter()
            .map(|p| [p.time_s, p.amplitude_mv])
            .collect(),
        size: 6,
        color: Color(PEAK_COLOR),
    }));
    fig
}
