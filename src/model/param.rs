use std::str::FromStr;

use bytemuck::{Pod, Zeroable};

use crate::{FmErr, Result, loss::LossType};

/// The hyperparameters and derived sizes of a factorization machine.
///
/// The struct is written to model files and checkpoints as raw bytes, so its layout is fixed
/// (`repr(C)`, no implicit padding) and every field is plain data.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelParam {
    /// The amount of distinct feature indices, one past the largest index.
    pub num_feature: u64,
    /// The total amount of trainable weights, always `num_feature * nfactor`.
    pub num_weight: u64,
    /// The global amount of training rows.
    pub num_size: u64,
    /// The global amount of validation rows.
    pub num_size_val: u64,
    /// The latent factor dimensionality per feature.
    pub nfactor: u32,
    /// The raw `LossType` discriminant.
    pub loss_type: u32,
    /// The configured bias prior.
    pub base_score: f32,
    /// `base_score` mapped to a margin, see `init_base_score`.
    pub base_margin: f32,
    /// The L2 penalty coefficient on the factor weights.
    pub reg_l2_v: f32,
    reserved: [u32; 3],
}

impl Default for ModelParam {
    fn default() -> Self {
        Self {
            num_feature: 0,
            num_weight: 0,
            num_size: 0,
            num_size_val: 0,
            nfactor: 8,
            loss_type: LossType::Logistic as u32,
            base_score: 0.5,
            base_margin: 0.0,
            reg_l2_v: 0.0,
            reserved: [0; 3],
        }
    }
}

impl ModelParam {
    /// Updates a named hyperparameter.
    ///
    /// # Arguments
    /// * `name` - The parameter's name.
    /// * `value` - The parameter's value, as text.
    ///
    /// # Returns
    /// Whether the name belongs to this layer, or an error if its value can't be parsed.
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<bool> {
        match name {
            "num_feature" => self.num_feature = parse(name, value)?,
            "nfactor" => self.nfactor = parse(name, value)?,
            "base_score" => self.base_score = parse(name, value)?,
            "reg_L2_V" => self.reg_l2_v = parse(name, value)?,
            "loss_type" | "objective" => {
                let loss = value.parse::<LossType>().map_err(|_| invalid(name, value))?;
                self.loss_type = loss as u32;
            }
            _ => return Ok(false),
        }

        self.update_num_weight();
        Ok(true)
    }

    /// Recomputes `num_weight` out of `num_feature` and `nfactor`.
    pub fn update_num_weight(&mut self) {
        self.num_weight = self.num_feature * self.nfactor as u64;
    }

    /// Returns the configured loss function.
    pub fn loss(&self) -> Result<LossType> {
        LossType::from_raw(self.loss_type)
            .ok_or_else(|| FmErr::InvalidModelParam(format!("unknown loss_type {}", self.loss_type)))
    }

    /// Derives `base_margin` from `base_score` and the loss function.
    ///
    /// Depends only on configuration, calling it more than once yields the same result.
    pub fn init_base_score(&mut self) -> Result<()> {
        self.base_margin = self
            .loss()?
            .base_margin(self.base_score)
            .ok_or_else(|| invalid("base_score", &self.base_score.to_string()))?;

        Ok(())
    }

    /// Checks the invariants of a struct read from raw bytes.
    pub fn validate(&self) -> Result<()> {
        self.loss()?;

        if self.nfactor == 0 {
            return Err(FmErr::InvalidModelParam("nfactor must be positive".to_string()));
        }

        match self.num_feature.checked_mul(self.nfactor as u64) {
            Some(n) if n == self.num_weight => {}
            _ => {
                return Err(FmErr::InvalidModelParam(format!(
                    "num_weight {} doesn't match num_feature {} * nfactor {}",
                    self.num_weight, self.num_feature, self.nfactor
                )));
            }
        }

        // The weights must fit in a single allocation.
        match self.num_weight.checked_mul(size_of::<f32>() as u64) {
            Some(bytes) if bytes <= isize::MAX as u64 => Ok(()),
            _ => Err(FmErr::InvalidModelParam(format!(
                "num_weight {} is too large",
                self.num_weight
            ))),
        }
    }

    #[inline]
    pub fn num_weight(&self) -> usize {
        self.num_weight as usize
    }

    #[inline]
    pub fn num_feature(&self) -> usize {
        self.num_feature as usize
    }

    #[inline]
    pub fn nfactor(&self) -> usize {
        self.nfactor as usize
    }
}

fn invalid(name: &str, value: &str) -> FmErr {
    FmErr::InvalidParam {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// Parses `value` as the type of the parameter `name`.
pub(crate) fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| invalid(name, value))
}
