use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ekg_lib::{
    config::AnalysisConfig,
    detectors::rpeak::{DetectionParameters, PeakSet, Threshold},
    engine::PeakDetectionEngine,
    io::{
        roster::{RecordLoader, Roster, SubjectInfo},
        text as text_io,
    },
    metrics::{
        heart_rate::{instantaneous_rates, interval_stats, HeartRateEstimate, IntervalStats, RatePoint},
        max_hr::{Gender, MaxHeartRateResult},
    },
    plot::{figure_from_ekg, Figure, PlotBackend, Series, DEFAULT_MAX_POINTS},
    signal::{RecordStats, Sample, SampleSeries, SubRange, TimeUnit},
};
use log::{debug, warn};
use plotters::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "ekg",
    version,
    about = "EKG R-peak detection and heart-rate estimation"
)]
struct Cli {
    /// Log filter when RUST_LOG is unset (e.g. `debug`, `ekg_lib=trace`)
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Precision {
    F32,
    F64,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RangeUnit {
    Seconds,
    Milliseconds,
    Samples,
    Auto,
}

impl From<RangeUnit> for TimeUnit {
    fn from(unit: RangeUnit) -> Self {
        match unit {
            RangeUnit::Seconds => TimeUnit::Seconds,
            RangeUnit::Milliseconds => TimeUnit::Milliseconds,
            RangeUnit::Samples => TimeUnit::Samples,
            RangeUnit::Auto => TimeUnit::Auto,
        }
    }
}

#[derive(Args, Debug)]
struct AnalysisArgs {
    /// TOML analysis config; the flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Sampling rate in Hz
    #[arg(long)]
    fs: Option<u32>,
    /// Half-width of the local-maximum window in samples
    #[arg(long)]
    window: Option<usize>,
    /// Adaptive threshold factor between the mean and the maximum
    #[arg(long, conflicts_with = "absolute_threshold")]
    threshold_factor: Option<f64>,
    /// Fixed threshold in mV instead of the adaptive one
    #[arg(long)]
    absolute_threshold: Option<f64>,
    /// Minimum RR interval in seconds
    #[arg(long)]
    min_interval: Option<f64>,
    /// Maximum RR interval in seconds
    #[arg(long)]
    max_interval: Option<f64>,
    /// Relative deviation from the median RR that rejects an interval
    #[arg(long)]
    outlier_fraction: Option<f64>,
    /// Peaks required before a heart rate is reported
    #[arg(long)]
    min_peaks: Option<usize>,
}

impl AnalysisArgs {
    fn resolve(&self) -> Result<AnalysisConfig> {
        let mut cfg = match &self.config {
            Some(path) => AnalysisConfig::load(path)?,
            None => AnalysisConfig::default(),
        };
        let detection = &mut cfg.detection;
        if let Some(fs) = self.fs {
            detection.sampling_rate_hz = fs;
        }
        if let Some(window) = self.window {
            detection.window_half_width = Some(window);
        }
        if let Some(level_mv) = self.absolute_threshold {
            detection.threshold = Threshold::Absolute { level_mv };
        } else if let Some(factor) = self.threshold_factor {
            detection.threshold = Threshold::Adaptive { factor };
        }
        if let Some(min) = self.min_interval {
            detection.min_interval_s = min;
        }
        if let Some(max) = self.max_interval {
            detection.max_interval_s = max;
        }
        if let Some(fraction) = self.outlier_fraction {
            cfg.rate.outlier_fraction = fraction;
        }
        if let Some(min_peaks) = self.min_peaks {
            cfg.rate.min_peaks_required = min_peaks;
        }
        cfg.detection.resolve()?;
        cfg.rate.validate()?;
        debug!("analysis config: {:?}", cfg);
        Ok(cfg)
    }
}

#[derive(Args, Debug)]
struct RangeArgs {
    /// Start of the analysis window
    #[arg(long, requires = "end")]
    start: Option<f64>,
    /// End of the analysis window (inclusive)
    #[arg(long, requires = "start")]
    end: Option<f64>,
    #[arg(long, value_enum, default_value_t = RangeUnit::Seconds)]
    range_unit: RangeUnit,
}

impl RangeArgs {
    fn resolve(&self, params: &DetectionParameters) -> Result<Option<SubRange>> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Ok(Some(SubRange::from_bounds(
                start,
                end,
                self.range_unit.into(),
                params.sampling_rate_hz as f64,
            )?)),
            (None, None) => Ok(None),
            _ => bail!("--start and --end must be given together"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect R-peaks in a tab-separated (mV, ms) recording
    FindPeaks {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        analysis: AnalysisArgs,
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long, value_enum, default_value_t = Precision::F64)]
        precision: Precision,
    },
    /// Average heart rate over the recording and an optional window
    HeartRate {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        analysis: AnalysisArgs,
        #[command(flatten)]
        range: RangeArgs,
        /// Also emit the beat-to-beat rate of every interval
        #[arg(long)]
        instantaneous: bool,
        #[arg(long, value_enum, default_value_t = Precision::F64)]
        precision: Precision,
    },
    /// Age-predicted maximum heart rate
    MaxHr {
        #[arg(long)]
        birth_year: i32,
        /// `male`, `female`, anything else counts as other
        #[arg(long)]
        gender: String,
        /// Reference year, defaults to the current one
        #[arg(long)]
        year: Option<i32>,
    },
    /// Sample count, duration and amplitude summary of a recording
    Stats {
        #[arg(long)]
        input: PathBuf,
    },
    /// Analyse one test from a JSON person database
    Report {
        #[arg(long)]
        roster: PathBuf,
        #[arg(long)]
        test_id: u64,
        /// Directory recording links resolve against, defaults to the roster's
        #[arg(long)]
        data_root: Option<PathBuf>,
        /// Reference year for the maximum heart rate
        #[arg(long)]
        year: Option<i32>,
        #[command(flatten)]
        analysis: AnalysisArgs,
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long, value_enum, default_value_t = Precision::F64)]
        precision: Precision,
    },
    /// Render the EKG trace with detected peaks to a PNG via plotters
    Plot {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        analysis: AnalysisArgs,
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long, default_value_t = DEFAULT_MAX_POINTS)]
        max_points: usize,
        #[arg(long, value_enum, default_value_t = Precision::F64)]
        precision: Precision,
    },
    /// Write a synthetic recording with Gaussian beats
    Simulate {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 500.0)]
        fs: f64,
        #[arg(long, default_value_t = 30.0)]
        duration: f64,
        #[arg(long, default_value_t = 72.0)]
        bpm: f64,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Uniform noise amplitude in mV
        #[arg(long, default_value_t = 0.02)]
        noise: f64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());
    match cli.command {
        Commands::FindPeaks {
            input,
            analysis,
            range,
            precision,
        } => match precision {
            Precision::F64 => cmd_find_peaks::<f64>(&input, &analysis, &range)?,
            Precision::F32 => cmd_find_peaks::<f32>(&input, &analysis, &range)?,
        },
        Commands::HeartRate {
            input,
            analysis,
            range,
            instantaneous,
            precision,
        } => match precision {
            Precision::F64 => cmd_heart_rate::<f64>(&input, &analysis, &range, instantaneous)?,
            Precision::F32 => cmd_heart_rate::<f32>(&input, &analysis, &range, instantaneous)?,
        },
        Commands::MaxHr {
            birth_year,
            gender,
            year,
        } => cmd_max_hr(birth_year, &gender, year)?,
        Commands::Stats { input } => cmd_stats(&input)?,
        Commands::Report {
            roster,
            test_id,
            data_root,
            year,
            analysis,
            range,
            precision,
        } => {
            let roster = load_roster(&roster, data_root.as_deref())?;
            match precision {
                Precision::F64 => cmd_report::<f64>(&roster, test_id, year, &analysis, &range)?,
                Precision::F32 => cmd_report::<f32>(&roster, test_id, year, &analysis, &range)?,
            }
        }
        Commands::Plot {
            input,
            out,
            analysis,
            range,
            max_points,
            precision,
        } => match precision {
            Precision::F64 => cmd_plot::<f64>(&input, &out, &analysis, &range, max_points)?,
            Precision::F32 => cmd_plot::<f32>(&input, &out, &analysis, &range, max_points)?,
        },
        Commands::Simulate {
            out,
            fs,
            duration,
            bpm,
            seed,
            noise,
        } => cmd_simulate(&out, fs, duration, bpm, seed, noise)?,
    }
    Ok(())
}

fn init_logging(level: Option<&str>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.init();
}

fn warn_diagnostics(peaks: &PeakSet) {
    for diagnostic in &peaks.diagnostics {
        warn!("{diagnostic}");
    }
}

fn warn_unavailable(label: &str, estimate: &HeartRateEstimate) {
    if let Some(reason) = estimate.unavailable_reason() {
        warn!("{label} heart rate unavailable: {reason}");
    }
}

fn print_json<S: Serialize>(value: &S) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn cmd_find_peaks<T: Sample>(input: &Path, analysis: &AnalysisArgs, range: &RangeArgs) -> Result<()> {
    let cfg = analysis.resolve()?;
    let range = range.resolve(&cfg.detection)?;
    let series: SampleSeries<T> = text_io::read_ekg_file(input)?;
    let mut engine = PeakDetectionEngine::new(series);
    let peaks = engine.detect_peaks(&cfg.detection, range)?;
    warn_diagnostics(&peaks);
    print_json(&*peaks)
}

#[derive(Serialize)]
struct HeartRateOutput {
    full: HeartRateEstimate,
    #[serde(skip_serializing_if = "Option::is_none")]
    range: Option<HeartRateEstimate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    intervals: Option<IntervalStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instantaneous: Option<Vec<RatePoint>>,
}

/// Full-record estimate plus the windowed one when a range is given. Interval
/// details describe the window if there is one.
fn analyse<T: Sample>(
    engine: &mut PeakDetectionEngine<T>,
    cfg: &AnalysisConfig,
    range: Option<SubRange>,
    instantaneous: bool,
) -> Result<HeartRateOutput> {
    let full = engine.average_heart_rate(&cfg.detection, None, &cfg.rate)?;
    warn_unavailable("full-record", &full);
    let windowed = match range {
        Some(range) => {
            let estimate = engine.average_heart_rate(&cfg.detection, Some(range), &cfg.rate)?;
            warn_unavailable("window", &estimate);
            Some(estimate)
        }
        None => None,
    };
    let peaks = engine.detect_peaks(&cfg.detection, range)?;
    warn_diagnostics(&peaks);
    Ok(HeartRateOutput {
        full,
        range: windowed,
        intervals: interval_stats(&peaks),
        instantaneous: instantaneous.then(|| instantaneous_rates(&peaks)),
    })
}

fn cmd_heart_rate<T: Sample>(
    input: &Path,
    analysis: &AnalysisArgs,
    range: &RangeArgs,
    instantaneous: bool,
) -> Result<()> {
    let cfg = analysis.resolve()?;
    let range = range.resolve(&cfg.detection)?;
    let series: SampleSeries<T> = text_io::read_ekg_file(input)?;
    let mut engine = PeakDetectionEngine::new(series);
    let output = analyse(&mut engine, &cfg, range, instantaneous)?;
    print_json(&output)
}

fn max_heart_rate(birth_year: i32, gender: Gender, year: Option<i32>) -> MaxHeartRateResult {
    match year {
        Some(year) => MaxHeartRateResult::from_birth_year(birth_year, gender, year),
        None => MaxHeartRateResult::for_current_year(birth_year, gender),
    }
}

fn cmd_max_hr(birth_year: i32, gender: &str, year: Option<i32>) -> Result<()> {
    print_json(&max_heart_rate(birth_year, Gender::from_label(gender), year))
}

fn cmd_stats(input: &Path) -> Result<()> {
    let series: SampleSeries = text_io::read_ekg_file(input)?;
    print_json(&series.stats())
}

fn load_roster(path: &Path, data_root: Option<&Path>) -> Result<Roster> {
    let roster = Roster::load(path)?;
    debug!("loaded {} person(s) from {}", roster.persons().len(), path.display());
    Ok(match data_root {
        Some(root) => roster.with_data_root(root),
        None => roster,
    })
}

#[derive(Serialize)]
struct ReportOutput {
    test_id: u64,
    date: String,
    name: String,
    subject: SubjectInfo,
    stats: RecordStats,
    max_hr: MaxHeartRateResult,
    #[serde(flatten)]
    heart_rate: HeartRateOutput,
}

fn cmd_report<T: Sample>(
    roster: &Roster,
    test_id: u64,
    year: Option<i32>,
    analysis: &AnalysisArgs,
    range: &RangeArgs,
) -> Result<()> {
    let cfg = analysis.resolve()?;
    let range = range.resolve(&cfg.detection)?;
    let name = roster
        .find_test(test_id)
        .map(|(person, _)| person.full_name())
        .ok_or_else(|| anyhow!("EKG with ID {test_id} not found in person database"))?;
    let record = roster.load_record::<T>(test_id)?;
    let stats = record.series.stats();
    let max_hr = max_heart_rate(record.subject.birth_year, record.subject.gender, year);
    let mut engine = PeakDetectionEngine::new(record.series);
    let heart_rate = analyse(&mut engine, &cfg, range, false)?;
    print_json(&ReportOutput {
        test_id: record.test_id,
        date: record.date,
        name,
        subject: record.subject,
        stats,
        max_hr,
        heart_rate,
    })
}

fn cmd_plot<T: Sample>(
    input: &Path,
    out: &Path,
    analysis: &AnalysisArgs,
    range: &RangeArgs,
    max_points: usize,
) -> Result<()> {
    let cfg = analysis.resolve()?;
    let range = range.resolve(&cfg.detection)?;
    let series: SampleSeries<T> = text_io::read_ekg_file(input)?;
    let mut engine = PeakDetectionEngine::new(series);
    let estimate = engine.average_heart_rate(&cfg.detection, range, &cfg.rate)?;
    let peaks = engine.detect_peaks(&cfg.detection, range)?;
    warn_diagnostics(&peaks);
    let fig = figure_from_ekg(engine.series(), &peaks, &estimate, max_points);
    PngBackend::new(out).draw(&fig)
}

/// Gaussian R-waves on a slow baseline, RR jittered by up to 2 %.
fn synthesize(fs: f64, duration: f64, bpm: f64, seed: u64, noise: f64) -> Result<SampleSeries> {
    if !(fs > 0.0 && duration > 0.0 && bpm > 0.0 && noise >= 0.0) {
        bail!("fs, duration and bpm must be positive and noise non-negative");
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let rr = 60.0 / bpm;
    let mut beats = Vec::new();
    let mut t = rr / 2.0;
    while t < duration {
        beats.push(t);
        t += rr * (1.0 + rng.gen_range(-0.02..0.02));
    }

    let n = (duration * fs).round() as usize;
    let sigma = 0.01;
    let amplitude: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64 / fs;
            let wave: f64 = beats
                .iter()
                .filter(|b| (t - **b).abs() < 6.0 * sigma)
                .map(|b| 1.2 * (-(t - b).powi(2) / (2.0 * sigma * sigma)).exp())
                .sum();
            let jitter = if noise > 0.0 {
                rng.gen_range(-noise..noise)
            } else {
                0.0
            };
            wave + 0.05 * (2.0 * std::f64::consts::PI * t).sin() + jitter
        })
        .collect();
    Ok(SampleSeries::from_uniform(amplitude, fs)?)
}

fn cmd_simulate(out: &Path, fs: f64, duration: f64, bpm: f64, seed: u64, noise: f64) -> Result<()> {
    let series = synthesize(fs, duration, bpm, seed, noise)?;
    text_io::write_ekg_file(&series, out)?;
    print_json(&series.stats())
}

struct PngBackend<'a> {
    path: &'a Path,
    size: (u32, u32),
}

impl<'a> PngBackend<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            size: (1200, 480),
        }
    }
}

impl PlotBackend for PngBackend<'_> {
    fn draw(&mut self, fig: &Figure) -> Result<()> {
        draw_plotters_figure(self.path, self.size, fig)
    }
}

fn draw_plotters_figure(path: &Path, size: (u32, u32), fig: &Figure) -> Result<()> {
    let (x_min, mut x_max, y_min, mut y_max) =
        fig.bounds().ok_or_else(|| anyhow!("nothing to plot"))?;
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }
    if y_max <= y_min {
        y_max = y_min + 1.0;
    }
    let backend = BitMapBackend::new(path, size);
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "EKG".into()),
            ("sans-serif", 24),
        )
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .x_desc(fig.x.label.clone().unwrap_or_default())
        .y_desc(fig.y.label.clone().unwrap_or_default())
        .draw()?;
    for series in &fig.series {
        match series {
            Series::Line(line) => {
                let (r, g, b) = line.style.color.rgb();
                let color = RGBColor(r, g, b);
                chart
                    .draw_series(LineSeries::new(
                        line.points.iter().map(|p| (p[0], p[1])),
                        color.stroke_width(line.style.width.max(1.0) as u32),
                    ))?
                    .label(line.name.as_str())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            }
            Series::Markers(markers) => {
                let (r, g, b) = markers.color.rgb();
                let style = RGBColor(r, g, b).filled();
                let size = markers.size as i32;
                chart
                    .draw_series(
                        markers
                            .points
                            .iter()
                            .map(|p| TriangleMarker::new((p[0], p[1]), size, style)),
                    )?
                    .label(markers.name.as_str())
                    .legend(move |(x, y)| TriangleMarker::new((x + 10, y), size, style));
            }
        }
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ekg_lib::detectors::rpeak::detect_peaks;

    #[test]
    fn synthetic_recording_has_one_peak_per_beat() {
        let series = synthesize(500.0, 20.0, 75.0, 7, 0.02).unwrap();
        let peaks = detect_peaks(&series, &DetectionParameters::default(), None).unwrap();
        // 0.4 s lead-in then 0.8 s beats
        assert!((24..=26).contains(&peaks.len()), "{}", peaks.len());
    }

    #[test]
    fn synthesis_is_reproducible() {
        let a = synthesize(250.0, 5.0, 60.0, 3, 0.05).unwrap();
        let b = synthesize(250.0, 5.0, 60.0, 3, 0.05).unwrap();
        assert_eq!(a, b);
        assert!(synthesize(250.0, 5.0, 0.0, 3, 0.05).is_err());
    }
}
