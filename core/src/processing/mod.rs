//! Per-ray processing stages and the engine that chains them.
//!
//! A ray flows extraction → noise location → moments → KDP → censoring →
//! output. Every stage works in place on the per-gate records held in the
//! worker's [`RayArena`].

pub mod arena;
pub mod censor;
pub mod covariance;
pub mod engine;
pub mod fields;
pub mod kdp;
pub mod mode;
pub mod moments;
pub mod noise;
pub mod output;

pub use arena::RayArena;
pub use censor::CensoringEngine;
pub use covariance::{Covariance, CovarianceExtractor, FieldBindings};
pub use engine::{Capabilities, MomentsEngine, RayResult};
pub use fields::PerGateFields;
pub use kdp::{DerivedArrays, KdpIntegrator};
pub use mode::ModeStrategy;
pub use moments::MomentDispatcher;
pub use noise::{NoiseAdapter, RayNoise};
pub use output::OutputAssembler;
