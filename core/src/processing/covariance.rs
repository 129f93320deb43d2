use num_complex::Complex64;

use crate::config::MomentsConfig;
use crate::math::ComplexFieldDecoder;
use crate::prelude::{Channel, ChannelValues, MomentsError, MomentsResult};
use crate::ray_interface::{CovarianceFieldId, CovarianceRay};
use crate::telemetry::LogManager;

/// Lagged or cross-channel correlation slots of a [`Covariance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexTerm {
    Lag0Vchx,
    Lag0Hcvx,
    Lag1Hc,
    Lag1Vc,
    Lag1Vxhx,
    Lag1Vchc,
    Lag1Hcvc,
    Lag2Hc,
    Lag2Vc,
    Lag3Hc,
    Lag3Vc,
    Rvvhh0,
}

/// Covariance estimates for one gate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Covariance {
    pub lag0: ChannelValues<f64>,
    pub lag0_vchx: Complex64,
    pub lag0_hcvx: Complex64,
    pub lag1_hc: Complex64,
    pub lag1_vc: Complex64,
    pub lag1_vxhx: Complex64,
    pub lag1_vchc: Complex64,
    pub lag1_hcvc: Complex64,
    pub lag2_hc: Complex64,
    pub lag2_vc: Complex64,
    pub lag3_hc: Complex64,
    pub lag3_vc: Complex64,
    pub rvvhh0: Complex64,
}

impl Covariance {
    pub fn complex(&self, term: ComplexTerm) -> Complex64 {
        match term {
            ComplexTerm::Lag0Vchx => self.lag0_vchx,
            ComplexTerm::Lag0Hcvx => self.lag0_hcvx,
            ComplexTerm::Lag1Hc => self.lag1_hc,
            ComplexTerm::Lag1Vc => self.lag1_vc,
            ComplexTerm::Lag1Vxhx => self.lag1_vxhx,
            ComplexTerm::Lag1Vchc => self.lag1_vchc,
            ComplexTerm::Lag1Hcvc => self.lag1_hcvc,
            ComplexTerm::Lag2Hc => self.lag2_hc,
            ComplexTerm::Lag2Vc => self.lag2_vc,
            ComplexTerm::Lag3Hc => self.lag3_hc,
            ComplexTerm::Lag3Vc => self.lag3_vc,
            ComplexTerm::Rvvhh0 => self.rvvhh0,
        }
    }

    fn slot_mut(&mut self, term: ComplexTerm) -> &mut Complex64 {
        match term {
            ComplexTerm::Lag0Vchx => &mut self.lag0_vchx,
            ComplexTerm::Lag0Hcvx => &mut self.lag0_hcvx,
            ComplexTerm::Lag1Hc => &mut self.lag1_hc,
            ComplexTerm::Lag1Vc => &mut self.lag1_vc,
            ComplexTerm::Lag1Vxhx => &mut self.lag1_vxhx,
            ComplexTerm::Lag1Vchc => &mut self.lag1_vchc,
            ComplexTerm::Lag1Hcvc => &mut self.lag1_hcvc,
            ComplexTerm::Lag2Hc => &mut self.lag2_hc,
            ComplexTerm::Lag2Vc => &mut self.lag2_vc,
            ComplexTerm::Lag3Hc => &mut self.lag3_hc,
            ComplexTerm::Lag3Vc => &mut self.lag3_vc,
            ComplexTerm::Rvvhh0 => &mut self.rvvhh0,
        }
    }
}

/// A complex term read from a (dB, phase) field pair.
#[derive(Debug, Clone, Copy)]
pub struct ComplexBinding {
    pub term: ComplexTerm,
    pub db: CovarianceFieldId,
    pub phase: CovarianceFieldId,
    /// Substituted by zero when absent.
    pub optional: bool,
}

impl ComplexBinding {
    pub const fn required(
        term: ComplexTerm,
        db: CovarianceFieldId,
        phase: CovarianceFieldId,
    ) -> Self {
        Self {
            term,
            db,
            phase,
            optional: false,
        }
    }

    pub const fn optional(
        term: ComplexTerm,
        db: CovarianceFieldId,
        phase: CovarianceFieldId,
    ) -> Self {
        Self {
            term,
            db,
            phase,
            optional: true,
        }
    }
}

/// Input fields a polarization mode reads.
#[derive(Debug)]
pub struct FieldBindings {
    pub powers: &'static [(Channel, CovarianceFieldId)],
    pub complexes: &'static [ComplexBinding],
}

impl FieldBindings {
    pub fn required_ids(&self) -> Vec<CovarianceFieldId> {
        let mut ids: Vec<CovarianceFieldId> = self.powers.iter().map(|(_, id)| *id).collect();
        for binding in self.complexes.iter().filter(|b| !b.optional) {
            ids.push(binding.db);
            ids.push(binding.phase);
        }
        ids
    }
}

/// Fills one [`Covariance`] per gate from the named fields of a ray.
pub struct CovarianceExtractor;

impl CovarianceExtractor {
    pub fn extract(
        ray: &CovarianceRay,
        config: &MomentsConfig,
        bindings: &FieldBindings,
        covariances: &mut Vec<Covariance>,
        log: &mut LogManager,
    ) -> MomentsResult<()> {
        let n_gates = ray.context.gate_count;

        // resolve every field before touching the buffer, so a failure leaves no partial ray
        let mut powers = Vec::with_capacity(bindings.powers.len());
        for (channel, id) in bindings.powers {
            powers.push((*channel, Self::lookup(ray, config, *id, n_gates)?));
        }
        let mut complexes = Vec::with_capacity(bindings.complexes.len());
        for binding in bindings.complexes {
            let db = Self::lookup(ray, config, binding.db, n_gates);
            let phase = Self::lookup(ray, config, binding.phase, n_gates);
            match (db, phase) {
                (Ok(db), Ok(phase)) => complexes.push((binding.term, Some((db, phase)))),
                (Err(err), _) | (_, Err(err)) => {
                    if !binding.optional {
                        return Err(err);
                    }
                    log.debug(format!(
                        "optional field pair {}/{} absent, using zero covariance",
                        binding.db, binding.phase
                    ));
                    complexes.push((binding.term, None));
                }
            }
        }

        covariances.clear();
        covariances.resize(n_gates, Covariance::default());
        for (gate, covar) in covariances.iter_mut().enumerate() {
            for (channel, data) in &powers {
                covar
                    .lag0
                    .set(*channel, ComplexFieldDecoder::power(f64::from(data[gate])));
            }
            for (term, pair) in &complexes {
                *covar.slot_mut(*term) = match pair {
                    Some((db, phase)) => ComplexFieldDecoder::complex(
                        f64::from(db[gate]),
                        f64::from(phase[gate]),
                    ),
                    None => Complex64::new(0.0, 0.0),
                };
            }
        }
        Ok(())
    }

    fn lookup<'a>(
        ray: &'a CovarianceRay,
        config: &MomentsConfig,
        id: CovarianceFieldId,
        n_gates: usize,
    ) -> MomentsResult<&'a [f32]> {
        let name = config
            .input_name(id)
            .ok_or_else(|| MomentsError::MissingField {
                id,
                name: "unmapped".into(),
            })?;
        let data = ray.field(name).ok_or_else(|| MomentsError::MissingField {
            id,
            name: name.to_string(),
        })?;
        if data.len() != n_gates {
            return Err(MomentsError::FieldLength {
                id,
                expected: n_gates,
                found: data.len(),
            });
        }
        Ok(data)
    }
}
