use crate::signal::{Sample, SampleSeries};
use rand::{rngs::StdRng, Rng};
use std::f64::consts::PI;

const BEAT_WIDTH_S: f64 = 0.01;

/// Beat onsets starting at `first`, each following RR interval added in turn.
pub fn beat_times(first: f64, rr: &[f64]) -> Vec<f64> {
    let mut beats = Vec::with_capacity(rr.len() + 1);
    let mut t = first;
    beats.push(t);
    for &interval in rr {
        t += interval;
        beats.push(t);
    }
    beats
}

/// Gaussian R-waves of 1.2 mV on a slow 0.05 mV baseline wander, timestamps in ms.
pub fn beat_series(fs: f64, duration_s: f64, beats: &[f64]) -> SampleSeries {
    let shaped: Vec<(f64, f64)> = beats.iter().map(|&t| (t, 1.2)).collect();
    shaped_beat_series(fs, duration_s, &shaped)
}

pub fn beat_series_f32(fs: f64, duration_s: f64, beats: &[f64]) -> SampleSeries<f32> {
    let shaped: Vec<(f64, f64)> = beats.iter().map(|&t| (t, 1.2)).collect();
    build(fs, duration_s, &shaped, |_| 0.0)
}

/// Beats given as `(time_s, amplitude_mv)` pairs.
pub fn shaped_beat_series(fs: f64, duration_s: f64, beats: &[(f64, f64)]) -> SampleSeries {
    build(fs, duration_s, beats, |_| 0.0)
}

pub fn noisy_beat_series(
    rng: &mut StdRng,
    fs: f64,
    duration_s: f64,
    beats: &[f64],
) -> SampleSeries {
    let shaped: Vec<(f64, f64)> = beats
        .iter()
        .map(|&t| (t, rng.gen_range(0.8..1.4)))
        .collect();
    let noise: Vec<f64> = (0..(duration_s * fs) as usize)
        .map(|_| rng.gen_range(-0.02..0.02))
        .collect();
    build(fs, duration_s, &shaped, |i| noise[i])
}

fn build<T: Sample>(
    fs: f64,
    duration_s: f64,
    beats: &[(f64, f64)],
    noise: impl Fn(usize) -> f64,
) -> SampleSeries<T> {
    let samples = (duration_s * fs) as usize;
    let mut amplitude = Vec::with_capacity(samples);
    let mut time_ms = Vec::with_capacity(samples);
    for i in 0..samples {
        let t = i as f64 / fs;
        let mut v = 0.05 * (2.0 * PI * t).sin() + noise(i);
        for &(bt, amp) in beats {
            v += amp * (-0.5 * ((t - bt) / BEAT_WIDTH_S).powi(2)).exp();
        }
        amplitude.push(num_traits::cast::<f64, T>(v).expect("representable amplitude"));
        time_ms.push(i as f64 * 1000.0 / fs);
    }
    SampleSeries::from_millis(amplitude, time_ms).expect("valid synthetic series")
}
