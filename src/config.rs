use std::{
    collections::BTreeMap,
    fmt, fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, warn};
use serde::Deserialize;

use crate::{
    FmErr, Result,
    model::{ModelParam, parse},
    objective::ObjConfig,
    optimization::LbfgsParam,
};

/// What a run does with its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Task {
    /// Fits a model on `data` and writes it to `model_out`.
    #[default]
    Train,
    /// Writes the margin of every row of `data` to `name_pred`.
    Pred,
    /// Writes the factors of `model_in` as text to `name_dump`.
    Dump,
}

impl Task {
    pub fn name(self) -> &'static str {
        match self {
            Task::Train => "train",
            Task::Pred => "pred",
            Task::Dump => "dump",
        }
    }
}

impl FromStr for Task {
    type Err = FmErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Task::Train),
            "pred" => Ok(Task::Pred),
            "dump" => Ok(Task::Dump),
            other => Err(FmErr::UnknownTask(other.to_string())),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scalar entry of a JSON config file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ParamValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", *b as u8),
            ParamValue::Number(n) => write!(f, "{n}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

/// Every setting of a run, layered over the model, objective and optimizer settings.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub task: Task,
    pub data: Option<PathBuf>,
    pub val_data: Option<PathBuf>,
    pub model_in: Option<PathBuf>,
    pub model_out: PathBuf,
    pub name_pred: PathBuf,
    pub name_dump: PathBuf,
    pub batch_size: NonZeroUsize,
    pub nworker: NonZeroUsize,
    pub model: ModelParam,
    pub objective: ObjConfig,
    pub lbfgs: LbfgsParam,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            task: Task::default(),
            data: None,
            val_data: None,
            model_in: None,
            model_out: PathBuf::from("final.model"),
            name_pred: PathBuf::from("pred.txt"),
            name_dump: PathBuf::from("dump.txt"),
            batch_size: NonZeroUsize::MIN.saturating_add(1023),
            nworker: NonZeroUsize::MIN,
            model: ModelParam::default(),
            objective: ObjConfig::default(),
            lbfgs: LbfgsParam::default(),
        }
    }
}

impl RunConfig {
    /// Builds a configuration out of `name=value` arguments, applied in order.
    ///
    /// `config=<path>` applies the entries of a JSON file at that point. Arguments without an
    /// `=` are ignored with a warning.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();

        for arg in args {
            let arg = arg.as_ref();
            let Some((name, value)) = arg.split_once('=') else {
                warn!("ignoring argument {arg:?}, expected name=value");
                continue;
            };

            match name {
                "config" => config.apply_file(value)?,
                _ => config.set_param(name, value)?,
            }
        }

        Ok(config)
    }

    /// Applies every entry of a flat JSON object through `set_param`.
    pub fn apply_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let text = fs::read_to_string(path)?;
        self.apply_json(&text)
    }

    pub fn apply_json(&mut self, text: &str) -> Result<()> {
        let entries: BTreeMap<String, ParamValue> =
            serde_json::from_str(text).map_err(|e| FmErr::Parse {
                line: e.line(),
                msg: e.to_string(),
            })?;

        for (name, value) in entries {
            self.set_param(&name, &value.to_string())?;
        }

        Ok(())
    }

    /// Updates a named setting on whichever layer recognizes it.
    ///
    /// # Returns
    /// An error if the value is invalid for the setting, unknown names are logged and ignored.
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        if self.set_own(name, value)? {
            debug!("set {name}={value}");
            return Ok(());
        }

        let mut known = self.model.set_param(name, value)?;
        known |= self.objective.set_param(name, value)?;
        known |= self.lbfgs.set_param(name, value)?;

        match known {
            true => debug!("set {name}={value}"),
            false => warn!("ignoring unknown parameter {name}={value}"),
        }
        Ok(())
    }

    fn set_own(&mut self, name: &str, value: &str) -> Result<bool> {
        let path = || match value {
            "" | "NULL" => None,
            _ => Some(PathBuf::from(value)),
        };

        match name {
            "task" => self.task = value.parse()?,
            "data" => self.data = path(),
            "val_data" => self.val_data = path(),
            "model_in" => self.model_in = path(),
            "model_out" => self.model_out = PathBuf::from(value),
            "name_pred" => self.name_pred = PathBuf::from(value),
            "name_dump" => self.name_dump = PathBuf::from(value),
            "batch_size" => self.batch_size = parse(name, value)?,
            "nworker" => self.nworker = parse(name, value)?,
            _ => return Ok(false),
        }

        Ok(true)
    }
}
