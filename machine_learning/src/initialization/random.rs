use std::{cell::RefCell, rc::Rc};

use ndarray::ArrayViewMutD;
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use super::{ParamGen, RandErr};

/// Draws every element from a probability distribution.
///
/// The random source is shared, so every tensor initialized by one session consumes a
/// single seeded stream in declaration order.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: Rc<RefCell<R>>,
    distribution: D,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    pub fn new(rng: Rc<RefCell<R>>, distribution: D) -> Self {
        Self { rng, distribution }
    }
}

impl<R: Rng> RandParamGen<R, Uniform<f32>> {
    /// Uniform over `[low, high)`.
    ///
    /// # Returns
    /// An error if `low >= high`.
    pub fn uniform(rng: Rc<RefCell<R>>, low: f32, high: f32) -> Result<Self, RandErr> {
        Ok(Self::new(rng, Uniform::new(low, high)?))
    }

    /// Glorot uniform, over `[-r, r)` with `r = sqrt(6 / (fan_in + fan_out))`.
    ///
    /// # Arguments
    /// * `rng` - The shared random source.
    /// * `fan_in` - The amount of inputs of the layer.
    /// * `fan_out` - The amount of outputs of the layer.
    pub fn xavier_uniform(
        rng: Rc<RefCell<R>>,
        fan_in: usize,
        fan_out: usize,
    ) -> Result<Self, RandErr> {
        let r = (6. / (fan_in + fan_out) as f32).sqrt();
        Self::uniform(rng, -r, r)
    }
}

impl<R: Rng> RandParamGen<R, Normal<f32>> {
    /// # Returns
    /// An error if `std_dev` is negative or not finite.
    pub fn normal(rng: Rc<RefCell<R>>, mean: f32, std_dev: f32) -> Result<Self, RandErr> {
        Ok(Self::new(rng, Normal::new(mean, std_dev)?))
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<R, D> {
    fn fill(&mut self, mut tensor: ArrayViewMutD<'_, f32>) {
        let mut rng = self.rng.borrow_mut();
        tensor.map_inplace(|x| *x = self.distribution.sample(&mut *rng));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};
    use rand::{SeedableRng, rngs::StdRng};

    fn seeded_rng() -> Rc<RefCell<StdRng>> {
        Rc::new(RefCell::new(StdRng::seed_from_u64(42)))
    }

    #[test]
    fn xavier_stays_in_range() {
        let mut tensor = ArrayD::zeros(IxDyn(&[10, 10]));
        RandParamGen::xavier_uniform(seeded_rng(), 4, 2)
            .unwrap()
            .fill(tensor.view_mut());

        assert!(tensor.iter().all(|x| (-1.0..1.0).contains(x)));
        assert!(tensor.iter().any(|&x| x != 0.));
    }

    #[test]
    fn shared_rng_advances_between_tensors() {
        let rng = seeded_rng();
        let mut normal = RandParamGen::normal(Rc::clone(&rng), 0., 1.).unwrap();

        let mut a = ArrayD::zeros(IxDyn(&[3]));
        let mut b = ArrayD::zeros(IxDyn(&[3]));
        normal.fill(a.view_mut());
        normal.fill(b.view_mut());

        assert_ne!(a, b);
    }

    #[test]
    fn invalid_distributions_are_rejected() {
        assert!(RandParamGen::uniform(seeded_rng(), 1., 0.).is_err());
        assert!(RandParamGen::normal(seeded_rng(), 0., f32::NAN).is_err());
    }
}
