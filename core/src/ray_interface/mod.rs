pub mod calibration;
pub mod covariance_ray;
pub mod moments_ray;

pub use calibration::{Calibration, CalibrationSet};
pub use covariance_ray::{CovarianceFieldId, CovarianceRay, RayContext};
pub use moments_ray::{
    CensorField, FoldLimits, MomentsRay, OutputEncoding, OutputField, OutputFieldId,
    CENSOR_FLAG_NAME, MISSING_VALUE,
};
