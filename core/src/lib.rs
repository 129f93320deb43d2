//! Per-ray covariance-to-moments engine for polarimetric weather radar.
//!
//! Input rays carry covariance fields (lag-0 powers and lagged complex
//! correlations); output rays carry reflectivity, velocity, width,
//! polarimetric moments, KDP and quality flags. A [`scheduler::RayScheduler`]
//! spreads rays over a fixed pool of workers, each owning one
//! [`processing::MomentsEngine`], and returns them in input order.

pub mod config;
pub mod estimators;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod ray_interface;
pub mod scheduler;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use config::{MomentsConfig, PolarizationMode};
pub use prelude::{MomentsError, MomentsResult};
pub use processing::MomentsEngine;
pub use scheduler::{RayScheduler, VolumeOutput};
