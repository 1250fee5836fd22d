//! Scalar non-linearities used by the conv epilogue and the dense head.

/// Slope applied to non-positive inputs by [`leaky_relu`].
pub const LEAKY_SLOPE: f32 = 0.01;

/// Inputs beyond this magnitude saturate [`sigmoid`] to exactly 0 or 1.
pub const SIGMOID_SATURATION: f32 = 200.0;

/// Logits are clamped to `±SOFTMAX_CLAMP` before exponentiation.
pub const SOFTMAX_CLAMP: f32 = 15.0;

/// `x` for positive inputs, `0.01 * x` otherwise.
#[inline(always)]
pub fn leaky_relu(x: f32) -> f32 {
    if x <= 0.0 {
        x * LEAKY_SLOPE
    } else {
        x
    }
}

#[inline(always)]
pub fn relu(x: f32) -> f32 {
    if x <= 0.0 {
        0.0
    } else {
        x
    }
}

/// Logistic function that never produces NaN or infinity.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    if x > SIGMOID_SATURATION {
        return 1.0;
    }
    if x < -SIGMOID_SATURATION {
        return 0.0;
    }
    1.0 / (1.0 + (-x).exp())
}

/// Softmax over `logits` with each logit clamped to `[-15, 15]`.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let exps: Vec<f32> = logits
        .iter()
        .map(|&v| v.clamp(-SOFTMAX_CLAMP, SOFTMAX_CLAMP).exp())
        .collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaky_relu_scales_non_positive_inputs() {
        assert_eq!(leaky_relu(2.5), 2.5);
        assert_eq!(leaky_relu(0.0), 0.0);
        assert!((leaky_relu(-3.0) + 0.03).abs() < 1e-7);
    }

    #[test]
    fn relu_clamps_at_zero() {
        assert_eq!(relu(-1.0), 0.0);
        assert_eq!(relu(1.5), 1.5);
    }

    #[test]
    fn sigmoid_saturates() {
        assert_eq!(sigmoid(300.0), 1.0);
        assert_eq!(sigmoid(-300.0), 0.0);
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(150.0).is_finite());
    }

    #[test]
    fn softmax_sums_to_one_under_extreme_logits() {
        let probs = softmax(&[1000.0, 0.0, -1000.0]);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
    }
}
