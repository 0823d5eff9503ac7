use std::str::FromStr;

use super::{Logistic, LossFn, Squared};

/// The loss functions selectable through configuration.
///
/// The discriminant is what gets stored in the model file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LossType {
    Squared = 0,
    Logistic = 1,
}

impl LossType {
    /// Converts the raw discriminant read from a model file.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Squared),
            1 => Some(Self::Logistic),
            _ => None,
        }
    }

    /// Maps the configured `base_score` prior to a margin.
    ///
    /// For the logistic loss the prior is a probability and must lie in `(0, 1)`.
    pub fn base_margin(self, base_score: f32) -> Option<f32> {
        match self {
            Self::Squared => Some(base_score),
            Self::Logistic if base_score > 0.0 && base_score < 1.0 => {
                Some(-(1.0 / base_score - 1.0).ln())
            }
            Self::Logistic => None,
        }
    }
}

impl FromStr for LossType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "squared" | "linear" => Ok(Self::Squared),
            "1" | "logistic" => Ok(Self::Logistic),
            _ => Err(()),
        }
    }
}

impl LossFn for LossType {
    fn loss(&self, label: f32, margin: f32) -> f32 {
        match self {
            Self::Squared => Squared.loss(label, margin),
            Self::Logistic => Logistic.loss(label, margin),
        }
    }

    fn gradient(&self, label: f32, margin: f32) -> f32 {
        match self {
            Self::Squared => Squared.gradient(label, margin),
            Self::Logistic => Logistic.gradient(label, margin),
        }
    }
}
