use serde::{Deserialize, Serialize};

use crate::ray_interface::CovarianceFieldId;

/// Receiver channel: co- or cross-polar, horizontal or vertical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Hc,
    Hx,
    Vc,
    Vx,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Hc, Channel::Hx, Channel::Vc, Channel::Vx];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Hc => "Hc",
            Channel::Hx => "Hx",
            Channel::Vc => "Vc",
            Channel::Vx => "Vx",
        }
    }
}

/// One value per receiver channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelValues<T> {
    pub hc: T,
    pub hx: T,
    pub vc: T,
    pub vx: T,
}

impl<T: Copy> ChannelValues<T> {
    pub fn splat(value: T) -> Self {
        Self {
            hc: value,
            hx: value,
            vc: value,
            vx: value,
        }
    }

    pub fn get(&self, channel: Channel) -> T {
        match channel {
            Channel::Hc => self.hc,
            Channel::Hx => self.hx,
            Channel::Vc => self.vc,
            Channel::Vx => self.vx,
        }
    }

    pub fn set(&mut self, channel: Channel, value: T) {
        match channel {
            Channel::Hc => self.hc = value,
            Channel::Hx => self.hx = value,
            Channel::Vc => self.vc = value,
            Channel::Vx => self.vx = value,
        }
    }
}

/// Common error type for ray processing and engine set-up.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MomentsError {
    #[error("missing input field {id} (name '{name}')")]
    MissingField { id: CovarianceFieldId, name: String },
    #[error("input field {id} has {found} gates, expected {expected}")]
    FieldLength {
        id: CovarianceFieldId,
        expected: usize,
        found: usize,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("worker {0} exited before returning a result")]
    WorkerLost(usize),
}

pub type MomentsResult<T> = Result<T, MomentsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_values_get_and_set_by_channel() {
        let mut values = ChannelValues::splat(0.0);
        values.set(Channel::Vx, -111.5);
        assert_eq!(values.get(Channel::Vx), -111.5);
        assert_eq!(values.get(Channel::Hc), 0.0);
    }

    #[test]
    fn missing_field_error_names_the_field() {
        let err = MomentsError::MissingField {
            id: CovarianceFieldId::Lag1HcPhase,
            name: "LAG1_HC_PHASE".into(),
        };
        assert!(err.to_string().contains("LAG1_HC_PHASE"));
    }
}
