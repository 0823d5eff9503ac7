use super::LossFn;

/// Logistic loss over labels in `{0, 1}`, taking the margin as log-odds.
#[derive(Debug, Default, Clone, Copy)]
pub struct Logistic;

impl Logistic {
    /// Returns a new `Logistic`.
    pub fn new() -> Self {
        Self
    }

    /// The logistic sigmoid of `margin`.
    pub fn sigmoid(margin: f32) -> f32 {
        1.0 / (1.0 + (-margin).exp())
    }
}

impl LossFn for Logistic {
    fn loss(&self, label: f32, margin: f32) -> f32 {
        // ln(1 + e^m) - y * m, without overflowing for large |m|.
        let m = margin as f64;
        let softplus = m.max(0.0) + (-m.abs()).exp().ln_1p();
        (softplus - label as f64 * m) as f32
    }

    fn gradient(&self, label: f32, margin: f32) -> f32 {
        Self::sigmoid(margin) - label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_margin() {
        let ln2 = std::f32::consts::LN_2;
        assert!((Logistic.loss(1.0, 0.0) - ln2).abs() < 1e-6);
        assert!((Logistic.loss(0.0, 0.0) - ln2).abs() < 1e-6);
        assert_eq!(Logistic.gradient(1.0, 0.0), -0.5);
        assert_eq!(Logistic.gradient(0.0, 0.0), 0.5);
    }

    #[test]
    fn stable_for_large_margins() {
        let loss = Logistic.loss(0.0, 1000.0);
        assert!(loss.is_finite());
        assert!((loss - 1000.0).abs() < 1e-3);

        let loss = Logistic.loss(1.0, 1000.0);
        assert!(loss.abs() < 1e-6);
        assert_eq!(Logistic.gradient(1.0, 1000.0), 0.0);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let eps = 1e-3;
        for &(label, margin) in &[(0.0, 0.3), (1.0, -1.2), (1.0, 2.5)] {
            let numeric = (Logistic.loss(label, margin + eps) - Logistic.loss(label, margin - eps))
                / (2.0 * eps);
            assert!((numeric - Logistic.gradient(label, margin)).abs() < 1e-3);
        }
    }
}
