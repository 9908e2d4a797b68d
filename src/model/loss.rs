//! Binary cross-entropy on logits.
//!
//! The network emits a logit; folding the sigmoid into the loss keeps the
//! gradient at `p - y` even when the sigmoid saturates.

/// Numerically stable logistic function
pub fn sigmoid(z: f32) -> f32 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `-(y ln p + (1 - y) ln(1 - p))` with `p = sigmoid(logit)`
pub fn bce_with_logits(logit: f32, label: f32) -> f32 {
    logit.max(0.0) - logit * label + (-logit.abs()).exp().ln_1p()
}

/// Gradient of [`bce_with_logits`] w.r.t. the logit
pub fn bce_grad(logit: f32, label: f32) -> f32 {
    sigmoid(logit) - label
}

/// Whether a probability lands on the same side of 0.5 as the label
pub fn is_correct(probability: f32, label: f32) -> bool {
    (probability > 0.5) == (label > 0.5)
}
