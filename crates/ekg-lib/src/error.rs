use thiserror::Error;

/// Contract violations raised by the analysis core.
///
/// Absence of a usable signal is not an error: detection returns an empty
/// [`PeakSet`](crate::detectors::rpeak::PeakSet) and rate estimation returns
/// [`HeartRateEstimate::Unavailable`](crate::metrics::heart_rate::HeartRateEstimate).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EkgError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

pub type Result<T> = std::result::Result<T, EkgError>;
