use crate::config::InterestMapConfig;
use crate::prelude::{MomentsError, MomentsResult};

/// Piecewise-linear interest map, clamped at both ends.
#[derive(Debug, Clone)]
pub struct InterestMap {
    label: String,
    values: Vec<f64>,
    interests: Vec<f64>,
    weight: f64,
}

impl InterestMap {
    pub fn new(label: &str, config: &InterestMapConfig) -> MomentsResult<Self> {
        if config.points.is_empty() {
            return Err(MomentsError::Configuration(format!(
                "interest map '{label}' has no points"
            )));
        }
        let mut prev = f64::NEG_INFINITY;
        for point in &config.points {
            if point.value <= prev {
                return Err(MomentsError::Configuration(format!(
                    "interest map '{label}' values must increase monotonically"
                )));
            }
            prev = point.value;
        }
        Ok(Self {
            label: label.to_string(),
            values: config.points.iter().map(|p| p.value).collect(),
            interests: config.points.iter().map(|p| p.interest).collect(),
            weight: config.weight,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// `None` for a non-finite value.
    pub fn interest(&self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        let last = self.values.len() - 1;
        if value <= self.values[0] {
            return Some(self.interests[0]);
        }
        if value >= self.values[last] {
            return Some(self.interests[last]);
        }
        let upper = self.values.partition_point(|v| *v < value);
        let lower = upper - 1;
        let frac = (value - self.values[lower]) / (self.values[upper] - self.values[lower]);
        Some(self.interests[lower] + frac * (self.interests[upper] - self.interests[lower]))
    }
}
