use crate::{detectors::rpeak::DetectionParameters, metrics::heart_rate::RateOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Analysis settings, loadable from TOML:
///
/// ```toml
/// [detection]
/// sampling_rate_hz = 500
/// min_interval_s = 0.3
/// max_interval_s = 2.0
///
/// [detection.threshold]
/// mode = "adaptive"
/// factor = 0.6
///
/// [rate]
/// outlier_fraction = 0.3
/// min_peaks_required = 3
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub detection: DetectionParameters,
    pub rate: RateOptions,
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: AnalysisConfig = toml::from_str(text).context("parsing analysis config")?;
        cfg.detection.resolve()?;
        cfg.rate.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::rpeak::Threshold;
    use std::io::Write;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(AnalysisConfig::from_toml_str("").unwrap(), AnalysisConfig::default());
    }

    #[test]
    fn parses_absolute_threshold_and_rate_options() {
        let cfg = AnalysisConfig::from_toml_str(
            r#"
            [detection]
            sampling_rate_hz = 250
            window_half_width = 6

            [detection.threshold]
            mode = "absolute"
            level_mv = 0.45

            [rate]
            min_peaks_required = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.detection.sampling_rate_hz, 250);
        assert_eq!(cfg.detection.window_half_width, Some(6));
        assert_eq!(cfg.detection.threshold, Threshold::Absolute { level_mv: 0.45 });
        assert_eq!(cfg.detection.min_interval_s, 0.3);
        assert_eq!(cfg.rate.min_peaks_required, 5);
        assert_eq!(cfg.rate.outlier_fraction, 0.3);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = AnalysisConfig::from_toml_str("[detection]\nsampling_rate_hz = 0\n");
        assert!(err.is_err());
        let err = AnalysisConfig::from_toml_str("[rate]\noutlier_fraction = -1.0\n");
        assert!(err.is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[detection.threshold]\nmode = \"adaptive\"\nfactor = 0.7").unwrap();
        let cfg = AnalysisConfig::load(file.path()).unwrap();
        assert_eq!(cfg.detection.threshold, Threshold::Adaptive { factor: 0.7 });
    }
}
