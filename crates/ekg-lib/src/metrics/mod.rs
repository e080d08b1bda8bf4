pub mod heart_rate;
pub mod max_hr;
