use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::error::{try_alloc, FfmError, Result};
use crate::multithread_helpers::SharedWeights;
use crate::parameters::Parameters;
use crate::problem::LineSource;

/// Dimensions of the dense weight buffer and how to address it
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelShape {
    pub n: u32,
    pub m: u32,
    pub k: u32,
}

impl ModelShape {
    /// Floats owned by one (feature, field) slot: k weights, then k accumulators
    #[inline(always)]
    pub fn slot_len(&self) -> usize {
        2 * self.k as usize
    }

    /// Start of the slot holding the vector of `feature` used against `field`
    #[inline(always)]
    pub fn offset(&self, feature: u32, field: u32) -> usize {
        (feature as usize * self.m as usize + field as usize) * self.slot_len()
    }

    #[inline(always)]
    pub fn contains(&self, feature: u32, field: u32) -> bool {
        feature < self.n && field < self.m
    }

    pub fn buffer_len(&self) -> Option<u128> {
        (self.n as u128)
            .checked_mul(self.m as u128)?
            .checked_mul(self.k as u128)?
            .checked_mul(2)
    }
}

/// Latent factors of a field-aware factorization machine.
/// `weights` is dense over all (feature, field) pairs, see `ModelShape::offset`.
#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    pub n: u32,
    pub m: u32,
    pub k: u32,
    pub normalization: bool,
    pub weights: Vec<f32>,
}

impl Model {
    pub fn shape(&self) -> ModelShape {
        ModelShape { n: self.n, m: self.m, k: self.k }
    }

    /// Allocates a model with every float set to zero
    pub fn new_zeroed(n: u32, m: u32, k: u32, normalization: bool) -> Result<Model> {
        let shape = ModelShape { n, m, k };
        let len = shape.buffer_len().ok_or(FfmError::ResourceExhaustion {
            what: "model weights",
            bytes: u128::MAX,
        })?;
        let mut weights: Vec<f32> = try_alloc(len, "model weights")?;
        weights.resize(len as usize, 0.0);
        Ok(Model { n, m, k, normalization, weights })
    }

    /// Weight vector of `feature` for interactions with `field`
    pub fn factors(&self, feature: u32, field: u32) -> &[f32] {
        let offset = self.shape().offset(feature, field);
        &self.weights[offset..offset + self.k as usize]
    }

    /// AdaGrad accumulators belonging to `factors(feature, field)`
    pub fn accumulators(&self, feature: u32, field: u32) -> &[f32] {
        let offset = self.shape().offset(feature, field) + self.k as usize;
        &self.weights[offset..offset + self.k as usize]
    }

    pub fn factors_mut(&mut self, feature: u32, field: u32) -> &mut [f32] {
        let offset = self.shape().offset(feature, field);
        let k = self.k as usize;
        &mut self.weights[offset..offset + k]
    }

    pub fn shared_weights(&mut self) -> SharedWeights<'_> {
        SharedWeights::new(&mut self.weights)
    }

    /// Checks that every index a source can produce has a slot in this model
    pub fn check_fits<S: LineSource + ?Sized>(&self, source: &S) -> Result<()> {
        let (n, m) = source.dimensions();
        if n > self.n || m > self.m {
            return Err(FfmError::invalid(format!(
                "problem has n = {}, m = {}, model was built for n = {}, m = {}", n, m, self.n, self.m)));
        }
        Ok(())
    }
}

/// Creates a model sized after `source`. Weights are uniform in [0, 1/sqrt(k)),
/// accumulators start at 1 so the first step has the plain learning rate.
pub fn init_model<S: LineSource + ?Sized>(source: &S, params: &Parameters) -> Result<Model> {
    params.validate()?;
    let (n, m) = source.dimensions();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);
    init_model_with_rng(n, m, params, &mut rng)
}

pub fn init_model_with_rng<R: Rng>(n: u32, m: u32, params: &Parameters, rng: &mut R) -> Result<Model> {
    let mut model = Model::new_zeroed(n, m, params.k, params.normalization)?;
    let k = params.k as usize;
    let coef = 1.0 / (params.k as f32).sqrt();
    for slot in model.weights.chunks_exact_mut(2 * k) {
        let (w, acc) = slot.split_at_mut(k);
        for d in 0..k {
            w[d] = coef * rng.gen::<f32>();
        }
        acc.fill(1.0);
    }
    log::debug!("initialized model n = {}, m = {}, k = {}, {} floats", n, m, params.k, model.weights.len());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::convert;
    use crate::problem::tests::sample_lines;

    #[test]
    fn test_layout() {
        let shape = ModelShape { n: 3, m: 2, k: 4 };
        assert_eq!(shape.slot_len(), 8);
        assert_eq!(shape.offset(0, 0), 0);
        assert_eq!(shape.offset(0, 1), 8);
        assert_eq!(shape.offset(1, 0), 16);
        assert_eq!(shape.offset(2, 1), 40);
        assert_eq!(shape.buffer_len(), Some(48));
        assert!(shape.contains(2, 1));
        assert!(!shape.contains(3, 0));
        assert!(!shape.contains(0, 2));
    }

    #[test]
    fn test_init_model() {
        let p = convert(&sample_lines(), true).unwrap();
        let mut params = Parameters::default();
        params.k = 4;
        let model = init_model(&p, &params).unwrap();
        assert_eq!((model.n, model.m, model.k), (5, 3, 4));
        assert!(model.normalization);
        assert_eq!(model.weights.len(), 5 * 3 * 4 * 2);
        for j in 0..5 {
            for f in 0..3 {
                assert!(model.factors(j, f).iter().all(|w| *w >= 0.0 && *w < 0.5));
                assert!(model.accumulators(j, f).iter().all(|a| *a == 1.0));
            }
        }
        // not all the same
        assert!(model.factors(0, 0) != model.factors(4, 2));
    }

    #[test]
    fn test_init_model_is_seeded() {
        let p = convert(&sample_lines(), true).unwrap();
        let mut params = Parameters::default();
        let a = init_model(&p, &params).unwrap();
        let b = init_model(&p, &params).unwrap();
        assert_eq!(a, b);
        params.seed = 7;
        let c = init_model(&p, &params).unwrap();
        assert!(a.weights != c.weights);
    }

    #[test]
    fn test_check_fits() {
        let p = convert(&sample_lines(), true).unwrap();
        let small = Model::new_zeroed(2, 3, 1, true).unwrap();
        assert!(matches!(small.check_fits(&p), Err(FfmError::InvalidInput(_))));
        let big = Model::new_zeroed(10, 3, 1, true).unwrap();
        big.check_fits(&p).unwrap();
    }

    #[test]
    fn test_huge_model_is_resource_exhaustion() {
        let r = Model::new_zeroed(u32::MAX, u32::MAX, 1024, true);
        assert!(matches!(r, Err(FfmError::ResourceExhaustion { .. })));
    }
}
