#[inline(always)]
pub fn logistic(t: f32) -> f32 {
    (1.0 + (-t).exp()).recip()
}

/// Probability for a raw score. NaN scores are reported and treated as 0.
#[inline(always)]
pub fn squash(wsum: f32) -> f32 {
    if wsum.is_nan() {
        log::warn!("NAN prediction, forcing 0.0");
        logistic(0.0)
    } else {
        logistic(wsum)
    }
}

/// log(1 + exp(-y * t)), without overflowing for large margins
#[inline(always)]
pub fn logloss(y: f32, t: f32) -> f64 {
    let z = -(y as f64) * (t as f64);
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Derivative of `logloss` with respect to t: -y / (1 + exp(y * t))
#[inline(always)]
pub fn logloss_gradient(y: f32, t: f32) -> f32 {
    -y / (1.0 + (y * t).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_epsilon;

    #[test]
    fn test_logistic() {
        assert_eq!(logistic(0.0), 0.5);
        assert_epsilon!(logistic(2.0), 0.880797);
        assert_epsilon!(logistic(-2.0), 0.119203);
        assert_eq!(squash(f32::NAN), 0.5);
    }

    #[test]
    fn test_logloss() {
        assert_epsilon!(logloss(1.0, 0.0) as f32, std::f32::consts::LN_2);
        assert_epsilon!(logloss(-1.0, 0.0) as f32, std::f32::consts::LN_2);
        // confident and right costs nearly nothing, confident and wrong costs the margin
        assert!(logloss(1.0, 30.0) < 1e-12);
        assert_epsilon!(logloss(1.0, -1000.0) as f32, 1000.0);
        assert!(logloss(-1.0, 1000.0).is_finite());
    }

    #[test]
    fn test_logloss_gradient() {
        assert_eq!(logloss_gradient(1.0, 0.0), -0.5);
        assert_eq!(logloss_gradient(-1.0, 0.0), 0.5);
        assert_eq!(logloss_gradient(1.0, 1000.0), 0.0);
        assert_eq!(logloss_gradient(1.0, -1000.0), -1.0);
        // numeric derivative check
        let (tp, tm) = (0.3f32 + 1e-3, 0.3f32 - 1e-3);
        let numeric = ((logloss(1.0, tp) - logloss(1.0, tm)) / (tp - tm) as f64) as f32;
        assert_epsilon!(logloss_gradient(1.0, 0.3), numeric);
    }
}
