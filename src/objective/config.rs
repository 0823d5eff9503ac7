use crate::{FmErr, Result, model::parse};

/// Settings of the objective function that are not part of the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjConfig {
    /// Threads per worker, `0` lets the pool pick one per core.
    pub nthread: usize,
    /// The standard deviation of the initial weights.
    pub fm_random: f32,
    /// The seed of the initial weights.
    pub seed: u64,
}

impl Default for ObjConfig {
    fn default() -> Self {
        Self {
            nthread: 1,
            fm_random: 0.01,
            seed: 0,
        }
    }
}

impl ObjConfig {
    /// Updates a named setting.
    ///
    /// # Returns
    /// Whether the name belongs to this layer, or an error if its value is invalid.
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<bool> {
        match name {
            "nthread" => self.nthread = parse(name, value)?,
            "seed" => self.seed = parse(name, value)?,
            "fm_random" => {
                let fm_random: f32 = parse(name, value)?;
                if !fm_random.is_finite() || fm_random < 0.0 {
                    return Err(FmErr::InvalidParam {
                        name: name.to_string(),
                        value: value.to_string(),
                    });
                }
                self.fm_random = fm_random;
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
        let mut config = ObjConfig::default();
        assert!(config.set_param("nthread", "4").unwrap());
        assert!(config.set_param("fm_random", "0.1").unwrap());
        assert!(config.set_param("seed", "7").unwrap());
        assert!(!config.set_param("nfactor", "4").unwrap());

        assert_eq!(
            config,
            ObjConfig {
                nthread: 4,
                fm_random: 0.1,
                seed: 7
            }
        );

        assert!(config.set_param("fm_random", "-1").is_err());
        assert!(config.set_param("nthread", "many").is_err());
    }
}
