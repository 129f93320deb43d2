use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifiers of the covariance fields an input ray may carry.
///
/// `*Db` fields hold power (lag 0) or magnitude (lag >= 1) in dB, `*Phase`
/// fields hold the matching argument in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CovarianceFieldId {
    Lag0HcDb,
    Lag0HxDb,
    Lag0VcDb,
    Lag0VxDb,
    Lag0HcvxDb,
    Lag0HcvxPhase,
    Lag0VchxDb,
    Lag0VchxPhase,
    Lag1HcDb,
    Lag1HcPhase,
    Lag1VcDb,
    Lag1VcPhase,
    Lag1HcvcDb,
    Lag1HcvcPhase,
    Lag1VchcDb,
    Lag1VchcPhase,
    Lag1VxhxDb,
    Lag1VxhxPhase,
    Lag2HcDb,
    Lag2HcPhase,
    Lag2VcDb,
    Lag2VcPhase,
    Lag3HcDb,
    Lag3HcPhase,
    Lag3VcDb,
    Lag3VcPhase,
    Rvvhh0Db,
    Rvvhh0Phase,
}

impl CovarianceFieldId {
    pub const ALL: [CovarianceFieldId; 28] = [
        CovarianceFieldId::Lag0HcDb,
        CovarianceFieldId::Lag0HxDb,
        CovarianceFieldId::Lag0VcDb,
        CovarianceFieldId::Lag0VxDb,
        CovarianceFieldId::Lag0HcvxDb,
        CovarianceFieldId::Lag0HcvxPhase,
        CovarianceFieldId::Lag0VchxDb,
        CovarianceFieldId::Lag0VchxPhase,
        CovarianceFieldId::Lag1HcDb,
        CovarianceFieldId::Lag1HcPhase,
        CovarianceFieldId::Lag1VcDb,
        CovarianceFieldId::Lag1VcPhase,
        CovarianceFieldId::Lag1HcvcDb,
        CovarianceFieldId::Lag1HcvcPhase,
        CovarianceFieldId::Lag1VchcDb,
        CovarianceFieldId::Lag1VchcPhase,
        CovarianceFieldId::Lag1VxhxDb,
        CovarianceFieldId::Lag1VxhxPhase,
        CovarianceFieldId::Lag2HcDb,
        CovarianceFieldId::Lag2HcPhase,
        CovarianceFieldId::Lag2VcDb,
        CovarianceFieldId::Lag2VcPhase,
        CovarianceFieldId::Lag3HcDb,
        CovarianceFieldId::Lag3HcPhase,
        CovarianceFieldId::Lag3VcDb,
        CovarianceFieldId::Lag3VcPhase,
        CovarianceFieldId::Rvvhh0Db,
        CovarianceFieldId::Rvvhh0Phase,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CovarianceFieldId::Lag0HcDb => "LAG0_HC_DB",
            CovarianceFieldId::Lag0HxDb => "LAG0_HX_DB",
            CovarianceFieldId::Lag0VcDb => "LAG0_VC_DB",
            CovarianceFieldId::Lag0VxDb => "LAG0_VX_DB",
            CovarianceFieldId::Lag0HcvxDb => "LAG0_HCVX_DB",
            CovarianceFieldId::Lag0HcvxPhase => "LAG0_HCVX_PHASE",
            CovarianceFieldId::Lag0VchxDb => "LAG0_VCHX_DB",
            CovarianceFieldId::Lag0VchxPhase => "LAG0_VCHX_PHASE",
            CovarianceFieldId::Lag1HcDb => "LAG1_HC_DB",
            CovarianceFieldId::Lag1HcPhase => "LAG1_HC_PHASE",
            CovarianceFieldId::Lag1VcDb => "LAG1_VC_DB",
            CovarianceFieldId::Lag1VcPhase => "LAG1_VC_PHASE",
            CovarianceFieldId::Lag1HcvcDb => "LAG1_HCVC_DB",
            CovarianceFieldId::Lag1HcvcPhase => "LAG1_HCVC_PHASE",
            CovarianceFieldId::Lag1VchcDb => "LAG1_VCHC_DB",
            CovarianceFieldId::Lag1VchcPhase => "LAG1_VCHC_PHASE",
            CovarianceFieldId::Lag1VxhxDb => "LAG1_VXHX_DB",
            CovarianceFieldId::Lag1VxhxPhase => "LAG1_VXHX_PHASE",
            CovarianceFieldId::Lag2HcDb => "LAG2_HC_DB",
            CovarianceFieldId::Lag2HcPhase => "LAG2_HC_PHASE",
            CovarianceFieldId::Lag2VcDb => "LAG2_VC_DB",
            CovarianceFieldId::Lag2VcPhase => "LAG2_VC_PHASE",
            CovarianceFieldId::Lag3HcDb => "LAG3_HC_DB",
            CovarianceFieldId::Lag3HcPhase => "LAG3_HC_PHASE",
            CovarianceFieldId::Lag3VcDb => "LAG3_VC_DB",
            CovarianceFieldId::Lag3VcPhase => "LAG3_VC_PHASE",
            CovarianceFieldId::Rvvhh0Db => "RVVHH0_DB",
            CovarianceFieldId::Rvvhh0Phase => "RVVHH0_PHASE",
        }
    }
}

impl fmt::Display for CovarianceFieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable per-ray metadata shared by every stage of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayContext {
    pub gate_count: usize,
    pub start_range_km: f64,
    pub gate_spacing_km: f64,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub time_secs: i64,
    pub nano_secs: u32,
    pub nyquist_mps: f64,
    pub prt_sec: f64,
    pub n_samples: usize,
    pub pulse_width_us: f64,
    pub wavelength_m: f64,
    pub radar_height_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meas_xmit_power_dbm_h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meas_xmit_power_dbm_v: Option<f64>,
    #[serde(default)]
    pub sweep_index: usize,
    #[serde(default)]
    pub ray_index: usize,
}

impl RayContext {
    /// Range to the centre of `gate` in km.
    pub fn range_km(&self, gate: usize) -> f64 {
        self.start_range_km + gate as f64 * self.gate_spacing_km
    }
}

/// Input ray: metadata plus covariance fields looked up by name.
#[derive(Debug, Clone)]
pub struct CovarianceRay {
    pub context: RayContext,
    fields: HashMap<String, Vec<f32>>,
}

impl CovarianceRay {
    pub fn new(context: RayContext) -> Self {
        Self {
            context,
            fields: HashMap::new(),
        }
    }

    pub fn add_field(&mut self, name: impl Into<String>, data: Vec<f32>) {
        self.fields.insert(name.into(), data);
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Vec<f32>> {
        self.fields.remove(name)
    }

    pub fn field(&self, name: &str) -> Option<&[f32]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_ids_serialize_to_param_names() {
        for id in CovarianceFieldId::ALL {
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
    }

    #[test]
    fn ray_looks_up_fields_by_name() {
        let context = RayContext {
            gate_count: 2,
            start_range_km: 0.15,
            gate_spacing_km: 0.15,
            azimuth_deg: 10.0,
            elevation_deg: 0.5,
            time_secs: 0,
            nano_secs: 0,
            nyquist_mps: 25.0,
            prt_sec: 0.001,
            n_samples: 64,
            pulse_width_us: 1.0,
            wavelength_m: 0.1068,
            radar_height_km: 1.6,
            meas_xmit_power_dbm_h: None,
            meas_xmit_power_dbm_v: None,
            sweep_index: 0,
            ray_index: 3,
        };
        let mut ray = CovarianceRay::new(context);
        ray.add_field("lag0_hc_db", vec![-70.0, -71.0]);
        assert_eq!(ray.field("lag0_hc_db"), Some(&[-70.0f32, -71.0][..]));
        assert!(ray.field("lag0_vc_db").is_none());
        assert!((ray.context.range_km(1) - 0.30).abs() < 1e-12);
    }
}
