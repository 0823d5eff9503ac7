use super::LossFn;

/// Squared error loss, `0.5 * (margin - label)^2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Squared;

impl Squared {
    /// Returns a new `Squared`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Squared {
    fn loss(&self, label: f32, margin: f32) -> f32 {
        let diff = margin - label;
        0.5 * diff * diff
    }

    fn gradient(&self, label: f32, margin: f32) -> f32 {
        margin - label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_at_label() {
        assert_eq!(Squared.loss(2.0, 2.0), 0.0);
        assert_eq!(Squared.gradient(2.0, 2.0), 0.0);
    }

    #[test]
    fn gradient_is_residual() {
        assert_eq!(Squared.loss(1.0, 3.0), 2.0);
        assert_eq!(Squared.gradient(1.0, 3.0), 2.0);
        assert_eq!(Squared.gradient(3.0, 1.0), -2.0);
    }
}
