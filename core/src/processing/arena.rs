use super::covariance::Covariance;
use super::PerGateFields;

/// Per-worker gate buffers reused from ray to ray.
///
/// Buffers grow to the largest ray seen; after a ray longer than
/// `max_retained_gates` they are shrunk back on release.
#[derive(Debug, Default)]
pub struct RayArena {
    pub covariances: Vec<Covariance>,
    pub fields: Vec<PerGateFields>,
    pub censor: Vec<bool>,
    max_retained_gates: usize,
}

impl RayArena {
    pub fn with_capacity(max_retained_gates: usize) -> Self {
        Self {
            covariances: Vec::with_capacity(max_retained_gates),
            fields: Vec::with_capacity(max_retained_gates),
            censor: Vec::with_capacity(max_retained_gates),
            max_retained_gates,
        }
    }

    /// Sizes the per-gate records and censor mask to `gate_count`, every
    /// record missing and every gate uncensored.
    pub fn checkout(&mut self, gate_count: usize) {
        self.fields.clear();
        self.fields.resize(gate_count, PerGateFields::default());
        self.censor.clear();
        self.censor.resize(gate_count, false);
    }

    pub fn gate_count(&self) -> usize {
        self.fields.len()
    }

    pub fn release(&mut self) {
        if self.fields.capacity() > self.max_retained_gates {
            self.covariances.clear();
            self.covariances.shrink_to(self.max_retained_gates);
            self.fields.clear();
            self.fields.shrink_to(self.max_retained_gates);
            self.censor.clear();
            self.censor.shrink_to(self.max_retained_gates);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_resets_records_from_previous_ray() {
        let mut arena = RayArena::with_capacity(16);
        arena.checkout(4);
        arena.fields[2].dbz = Some(40.0);
        arena.censor[1] = true;

        arena.checkout(6);
        assert_eq!(arena.gate_count(), 6);
        assert!(arena.fields.iter().all(|f| *f == PerGateFields::default()));
        assert!(arena.censor.iter().all(|c| !c));
    }

    #[test]
    fn release_shrinks_after_oversized_ray() {
        let mut arena = RayArena::with_capacity(8);
        arena.checkout(1000);
        arena.release();
        assert!(arena.fields.capacity() < 1000);

        arena.checkout(5);
        arena.release();
        assert_eq!(arena.gate_count(), 5);
    }
}
