use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::{error::Error, fs, path::PathBuf};

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .expect("crates dir")
        .parent()
        .expect("workspace root")
        .to_path_buf()
}

fn recording() -> String {
    workspace_root()
        .join("test_data/ekg_synthetic_100bpm.txt")
        .to_string_lossy()
        .to_string()
}

fn run_json(args: &[&str]) -> Result<Value, Box<dyn Error>> {
    let output = cargo_bin_cmd!("ekg")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    Ok(serde_json::from_slice(&output)?)
}

fn assert_close(a: f64, b: f64, tol: f64) {
    let diff = (a - b).abs();
    assert!(diff <= tol, "diff {diff} exceeded tol {tol} ({a} vs {b})");
}

#[test]
fn find_peaks_on_fixture() -> Result<(), Box<dyn Error>> {
    let input = recording();
    let peaks = run_json(&["find-peaks", "--input", &input, "--fs", "500"])?;
    let list = peaks["peaks"].as_array().expect("peaks array");
    assert_eq!(list.len(), 16);
    assert_eq!(list[0]["index"], 250);
    assert_close(list[0]["time_s"].as_f64().unwrap(), 0.5, 1e-9);
    assert!(list[0]["interval_s"].is_null());
    assert_close(list[1]["interval_s"].as_f64().unwrap(), 0.6, 1e-9);
    assert_eq!(peaks["diagnostics"].as_array().unwrap().len(), 0);
    Ok(())
}

#[test]
fn reduced_precision_finds_the_same_peaks() -> Result<(), Box<dyn Error>> {
    let input = recording();
    let full = run_json(&["find-peaks", "--input", &input])?;
    let reduced = run_json(&["find-peaks", "--input", &input, "--precision", "f32"])?;
    let indices = |v: &Value| -> Vec<u64> {
        v["peaks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["index"].as_u64().unwrap())
            .collect()
    };
    assert_eq!(indices(&full), indices(&reduced));
    Ok(())
}

#[test]
fn windowed_peaks_are_relative_to_the_window() -> Result<(), Box<dyn Error>> {
    let input = recording();
    let peaks = run_json(&[
        "find-peaks", "--input", &input, "--start", "2000", "--end", "6000", "--range-unit",
        "milliseconds",
    ])?;
    assert_eq!(peaks["offset"], 1000);
    let list = peaks["peaks"].as_array().unwrap();
    assert_eq!(list.len(), 7);
    assert_eq!(list[0]["index"], 150);
    assert_close(list[0]["time_s"].as_f64().unwrap(), 2.3, 1e-9);
    Ok(())
}

#[test]
fn heart_rate_full_and_windowed() -> Result<(), Box<dyn Error>> {
    let input = recording();
    let hr = run_json(&[
        "heart-rate", "--input", &input, "--start", "2", "--end", "6", "--instantaneous",
    ])?;
    assert_eq!(hr["full"]["status"], "available");
    assert_close(hr["full"]["bpm"].as_f64().unwrap(), 100.0, 1e-6);
    assert_eq!(hr["full"]["intervals_used"], 15);
    assert_close(hr["range"]["bpm"].as_f64().unwrap(), 100.0, 1e-6);
    assert_eq!(hr["intervals"]["n"], 6);
    assert_eq!(hr["instantaneous"].as_array().unwrap().len(), 6);
    Ok(())
}

#[test]
fn heart_rate_reports_why_it_is_unavailable() -> Result<(), Box<dyn Error>> {
    let input = recording();
    let hr = run_json(&["heart-rate", "--input", &input, "--min-peaks", "20"])?;
    assert_eq!(hr["full"]["status"], "unavailable");
    assert_eq!(hr["full"]["reason"]["kind"], "insufficient_peaks");
    assert_eq!(hr["full"]["reason"]["got"], 16);
    assert_eq!(hr["full"]["reason"]["need"], 20);
    assert!(hr.get("range").is_none());
    Ok(())
}

#[test]
fn absolute_threshold_above_every_beat_finds_nothing() -> Result<(), Box<dyn Error>> {
    let input = recording();
    let peaks = run_json(&["find-peaks", "--input", &input, "--absolute-threshold", "5.0"])?;
    assert_eq!(peaks["peaks"].as_array().unwrap().len(), 0);
    assert_eq!(peaks["diagnostics"][0]["kind"], "no_peaks");
    Ok(())
}

#[test]
fn config_file_is_overridden_by_flags() -> Result<(), Box<dyn Error>> {
    let input = recording();
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("analysis.toml");
    fs::write(
        &config,
        "[detection]\nsampling_rate_hz = 500\n\n[rate]\nmin_peaks_required = 40\n",
    )?;
    let config = config.to_string_lossy().to_string();

    let hr = run_json(&["heart-rate", "--input", &input, "--config", &config])?;
    assert_eq!(hr["full"]["status"], "unavailable");

    let hr = run_json(&[
        "heart-rate", "--input", &input, "--config", &config, "--min-peaks", "3",
    ])?;
    assert_eq!(hr["full"]["status"], "available");
    Ok(())
}

#[test]
fn invalid_parameters_fail() {
    let input = recording();
    cargo_bin_cmd!("ekg")
        .args(["find-peaks", "--input", &input, "--fs", "0"])
        .assert()
        .failure();
    cargo_bin_cmd!("ekg")
        .args(["find-peaks", "--input", &input, "--start", "5", "--end", "1"])
        .assert()
        .failure();
    cargo_bin_cmd!("ekg")
        .args(["find-peaks", "--input", &input, "--start", "5"])
        .assert()
        .failure();
}

#[test]
fn stats_of_fixture() -> Result<(), Box<dyn Error>> {
    let stats = run_json(&["stats", "--input", &recording()])?;
    assert_eq!(stats["samples"], 5000);
    assert_close(stats["duration_s"].as_f64().unwrap(), 9.998, 1e-9);
    assert_close(stats["estimated_sampling_rate_hz"].as_f64().unwrap(), 500.0, 1e-6);
    Ok(())
}

#[test]
fn max_hr_by_gender() -> Result<(), Box<dyn Error>> {
    let male = run_json(&["max-hr", "--birth-year", "1990", "--gender", "male", "--year", "2025"])?;
    assert_eq!(male["age"], 35);
    assert_eq!(male["max_hr"], 185);
    let female = run_json(&[
        "max-hr", "--birth-year", "1990", "--gender", "Female", "--year", "2025",
    ])?;
    assert_eq!(female["max_hr"], 191);
    let other = run_json(&["max-hr", "--birth-year", "1990", "--gender", "x", "--year", "2025"])?;
    assert_eq!(other["gender"], "other");
    assert_eq!(other["max_hr"], 188);
    Ok(())
}
