/******************* Adagrad **************************/
// Per-parameter learning rate: every weight keeps its own sum of squared gradients
// and steps by eta / sqrt(sum). Accumulators start at 1.0, so the first step is plain SGD
// scaled by 1/sqrt(1 + g^2).

#[derive(Clone, Copy, Debug)]
pub struct OptimizerAdagrad {
    pub learning_rate: f32,
    pub lambda: f32,
}

impl OptimizerAdagrad {
    pub fn new(learning_rate: f32, lambda: f32) -> OptimizerAdagrad {
        OptimizerAdagrad { learning_rate, lambda }
    }

    /// Gradient of the regularized loss for one weight, given the loss gradient
    /// coefficient and the partner weight it interacts with
    #[inline(always)]
    pub fn gradient(&self, kappa_v: f32, weight: f32, other_weight: f32) -> f32 {
        self.lambda * weight + kappa_v * other_weight
    }

    /// Accumulates `gradient`^2 and returns the amount to subtract from the weight
    #[inline(always)]
    pub fn calculate_update(&self, gradient: f32, accumulated_gradient_squared: &mut f32) -> f32 {
        let new_accumulated_gradient_squared = *accumulated_gradient_squared + gradient * gradient;
        *accumulated_gradient_squared = new_accumulated_gradient_squared;
        self.learning_rate / new_accumulated_gradient_squared.sqrt() * gradient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adagrad() {
        let l = OptimizerAdagrad::new(0.2, 0.0);
        let mut acc: f32 = 1.0;
        let p = l.calculate_update(0.5, &mut acc);
        assert_eq!(acc, 1.25);
        assert_eq!(p, 0.2 / 1.25f32.sqrt() * 0.5);

        // the rate keeps shrinking with the history
        let p2 = l.calculate_update(0.5, &mut acc);
        assert_eq!(acc, 1.5);
        assert!(p2 < p);

        // zero gradient leaves everything as it was
        let mut acc: f32 = 1.0;
        assert_eq!(l.calculate_update(0.0, &mut acc), 0.0);
        assert_eq!(acc, 1.0);
    }

    #[test]
    fn test_gradient() {
        let l = OptimizerAdagrad::new(0.2, 0.5);
        assert_eq!(l.gradient(2.0, 1.0, 3.0), 0.5 * 1.0 + 2.0 * 3.0);
        let l = OptimizerAdagrad::new(0.2, 0.0);
        assert_eq!(l.gradient(-1.0, 4.0, 0.25), -0.25);
    }

    #[test]
    fn test_per_parameter_independence() {
        let l = OptimizerAdagrad::new(0.1, 0.0);
        let mut acc_a: f32 = 1.0;
        let mut acc_b: f32 = 1.0;
        for _ in 0..10 {
            l.calculate_update(1.0, &mut acc_a);
        }
        // b has never moved, it still steps at the full rate
        let pb = l.calculate_update(1.0, &mut acc_b);
        let pa = l.calculate_update(1.0, &mut acc_a);
        assert_eq!(pb, 0.1 / 2.0f32.sqrt());
        assert!(pa < pb);
    }
}
