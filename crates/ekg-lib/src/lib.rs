pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod io;
pub mod metrics;
pub mod plot;
pub mod signal;

pub use detectors::*;
pub use engine::PeakDetectionEngine;
pub use error::EkgError;
pub use metrics::*;
pub use signal::*;

#[cfg(test)]
mod test_support;
