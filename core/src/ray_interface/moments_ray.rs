use serde::{Deserialize, Serialize};

use crate::prelude::ChannelValues;
use crate::ray_interface::RayContext;

/// Value written for missing gates in every output field.
pub const MISSING_VALUE: f32 = -9999.0;

pub const CENSOR_FLAG_NAME: &str = "CENSOR_FLAG";

/// Identifiers of the fields the engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputFieldId {
    Snr,
    Dbm,
    Dbz,
    Dbzhc,
    Dbzvc,
    Dbzhx,
    Dbzvx,
    DbzNoAtmosAtten,
    Vel,
    VelAlt,
    VelHv,
    VelAltFoldInterval,
    VelAltFoldConfidence,
    VelDiff,
    VelUnfoldInterval,
    VelHOnly,
    VelVOnly,
    Width,
    WidthHOnly,
    WidthVOnly,
    Ncp,
    NcpHOnly,
    NcpVOnly,
    NcpHMinusV,
    Zdrm,
    Zdr,
    ZdrBias,
    Ldrhm,
    Ldrh,
    Ldrvm,
    Ldrv,
    LdrDiff,
    LdrMean,
    Rhohv,
    RhohvNnc,
    RhoHcvx,
    RhoVchx,
    RhoVxhx,
    Phidp0,
    Phidp,
    PhidpCond,
    PhidpFilt,
    Kdp,
    Psob,
    Snrhc,
    Snrhx,
    Snrvc,
    Snrvx,
    Dbmhc,
    Dbmhx,
    Dbmvc,
    Dbmvx,
    PhaseForNoise,
    AccumPhaseChange,
    PhaseChangeError,
    DbmSdev,
    NcpMean,
    NoiseFlag,
    SignalFlag,
    NoiseBiasDbHc,
    NoiseBiasDbHx,
    NoiseBiasDbVc,
    NoiseBiasDbVx,
    DbzForKdp,
    ZdrForKdp,
    RhohvForKdp,
    SnrForKdp,
    PhidpSdevForKdp,
    PhidpJitterForKdp,
    ZdrSdevForKdp,
    DbzAttenCorrection,
    ZdrAttenCorrection,
    DbzAttenCorrected,
    ZdrAttenCorrected,
}

impl OutputFieldId {
    /// Fields that carry class values rather than a continuous quantity.
    pub fn is_discrete(self) -> bool {
        matches!(
            self,
            OutputFieldId::NoiseFlag
                | OutputFieldId::SignalFlag
                | OutputFieldId::VelAltFoldInterval
                | OutputFieldId::VelUnfoldInterval
        )
    }
}

/// Storage type requested for an output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputEncoding {
    #[default]
    Float32,
    Int16,
    Int08,
}

/// Interval over which a folded quantity wraps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoldLimits {
    pub lower: f64,
    pub upper: f64,
}

impl FoldLimits {
    pub fn symmetric(limit: f64) -> Self {
        Self {
            lower: -limit,
            upper: limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputField {
    pub id: OutputFieldId,
    pub name: String,
    pub units: String,
    pub long_name: String,
    pub encoding: OutputEncoding,
    pub folds: Option<FoldLimits>,
    pub is_discrete: bool,
    pub missing_value: f32,
    pub data: Vec<f32>,
}

/// Byte-valued mask of gates removed by censoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensorField {
    pub name: String,
    pub long_name: String,
    pub data: Vec<i8>,
}

/// Output ray produced for one input ray.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentsRay {
    pub context: RayContext,
    pub fields: Vec<OutputField>,
    pub censor_flag: Option<CensorField>,
    /// Estimated noise per channel with receiver gain removed, when overridden.
    pub estimated_noise_dbm: ChannelValues<Option<f64>>,
}

impl MomentsRay {
    pub fn field(&self, name: &str) -> Option<&OutputField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_by_id(&self, id: OutputFieldId) -> Option<&OutputField> {
        self.fields.iter().find(|field| field.id == id)
    }
}
