use num_complex::Complex64;

/// Conversion between (dB, degrees) field pairs and linear values.
pub struct ComplexFieldDecoder;

impl ComplexFieldDecoder {
    /// Zero-lag power from dB.
    pub fn power(db: f64) -> f64 {
        10f64.powf(db / 10.0)
    }

    /// Lagged correlation from magnitude in dB and phase in degrees.
    pub fn complex(db: f64, phase_deg: f64) -> Complex64 {
        let magnitude = 10f64.powf(db / 20.0);
        Complex64::from_polar(magnitude, phase_deg.to_radians())
    }

    pub fn power_to_db(power: f64) -> f64 {
        10.0 * power.log10()
    }

    /// Inverse of [`ComplexFieldDecoder::complex`].
    pub fn complex_to_db_phase(value: Complex64) -> (f64, f64) {
        (20.0 * value.norm().log10(), arg_deg(value))
    }
}

pub fn arg_deg(value: Complex64) -> f64 {
    value.arg().to_degrees()
}

/// `a * conj(b)`.
pub fn conjugate_product(a: Complex64, b: Complex64) -> Complex64 {
    a * b.conj()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn decode_then_encode_recovers_db_and_phase() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..500 {
            let db = rng.gen_range(-130.0..30.0);
            let phase = rng.gen_range(-179.9..179.9);
            let value = ComplexFieldDecoder::complex(db, phase);
            let (db_back, phase_back) = ComplexFieldDecoder::complex_to_db_phase(value);
            assert!((db_back - db).abs() < 1e-9, "db {db}");
            assert!((phase_back - phase).abs() < 1e-9, "phase {phase}");
        }
        let power = ComplexFieldDecoder::power(-72.25);
        assert!((ComplexFieldDecoder::power_to_db(power) + 72.25).abs() < 1e-9);
    }

    #[test]
    fn zero_phase_decodes_to_real_value() {
        let value = ComplexFieldDecoder::complex(20.0, 0.0);
        assert!((value.re - 10.0).abs() < 1e-12);
        assert!(value.im.abs() < 1e-12);
    }

    #[test]
    fn conjugate_product_subtracts_phases() {
        let a = Complex64::from_polar(1.0, 0.5);
        let b = Complex64::from_polar(2.0, 0.2);
        let product = conjugate_product(a, b);
        assert!((product.arg() - 0.3).abs() < 1e-12);
        assert!((product.norm() - 2.0).abs() < 1e-12);
    }
}
