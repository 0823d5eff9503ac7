use std::num::NonZeroUsize;

use crate::{FmErr, Result, model::parse};

/// The hyperparameters of the L-BFGS driver.
#[derive(Debug, Clone, PartialEq)]
pub struct LbfgsParam {
    /// The hard limit of iterations.
    pub max_lbfgs_iter: usize,
    /// The amount of iterations to run before the stop tolerance is considered.
    pub min_lbfgs_iter: usize,
    /// The amount of `(s, y)` correction pairs kept.
    pub lbfgs_memory: NonZeroUsize,
    /// The relative objective decrease under which the run stops.
    pub lbfgs_stop_tol: f64,
    /// The sufficient decrease constant of the Armijo condition.
    pub linesearch_c1: f64,
    /// The factor the step is multiplied by after a rejected trial.
    pub linesearch_backoff: f64,
    /// The amount of trial steps before the line search gives up.
    pub max_linesearch_iter: usize,
    /// Every how many iterations the lead writes a checkpoint and a model snapshot, 0 never.
    pub save_period: usize,
}

impl Default for LbfgsParam {
    fn default() -> Self {
        Self {
            max_lbfgs_iter: 500,
            min_lbfgs_iter: 5,
            lbfgs_memory: NonZeroUsize::MIN.saturating_add(9),
            lbfgs_stop_tol: 1e-5,
            linesearch_c1: 1e-4,
            linesearch_backoff: 0.5,
            max_linesearch_iter: 100,
            save_period: 0,
        }
    }
}

impl LbfgsParam {
    /// Updates a named hyperparameter.
    ///
    /// # Returns
    /// Whether the name belongs to this layer, or an error if its value is invalid.
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<bool> {
        let invalid = || FmErr::InvalidParam {
            name: name.to_string(),
            value: value.to_string(),
        };

        match name {
            "max_lbfgs_iter" => self.max_lbfgs_iter = parse(name, value)?,
            "min_lbfgs_iter" => self.min_lbfgs_iter = parse(name, value)?,
            "lbfgs_memory" => self.lbfgs_memory = parse(name, value)?,
            "max_linesearch_iter" => self.max_linesearch_iter = parse(name, value)?,
            "save_period" => self.save_period = parse(name, value)?,
            "lbfgs_stop_tol" => {
                let tol: f64 = parse(name, value)?;
                if !(tol >= 0.0) {
                    return Err(invalid());
                }
                self.lbfgs_stop_tol = tol;
            }
            "linesearch_c1" => {
                let c1: f64 = parse(name, value)?;
                if !(c1 > 0.0 && c1 < 1.0) {
                    return Err(invalid());
                }
                self.linesearch_c1 = c1;
            }
            "linesearch_backoff" => {
                let backoff: f64 = parse(name, value)?;
                if !(backoff > 0.0 && backoff < 1.0) {
                    return Err(invalid());
                }
                self.linesearch_backoff = backoff;
            }
            _ => return Ok(false),
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_param() {
        let mut param = LbfgsParam::default();
        assert!(param.set_param("max_lbfgs_iter", "20").unwrap());
        assert!(param.set_param("lbfgs_memory", "3").unwrap());
        assert!(param.set_param("linesearch_backoff", "0.25").unwrap());
        assert!(param.set_param("save_period", "5").unwrap());
        assert!(!param.set_param("nthread", "2").unwrap());

        assert_eq!(param.max_lbfgs_iter, 20);
        assert_eq!(param.lbfgs_memory.get(), 3);
        assert_eq!(param.linesearch_backoff, 0.25);
        assert_eq!(param.save_period, 5);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut param = LbfgsParam::default();
        assert!(param.set_param("lbfgs_memory", "0").is_err());
        assert!(param.set_param("linesearch_c1", "1.5").is_err());
        assert!(param.set_param("linesearch_backoff", "0").is_err());
        assert!(param.set_param("lbfgs_stop_tol", "nan").is_err());
        assert_eq!(param, LbfgsParam::default());
    }
}
