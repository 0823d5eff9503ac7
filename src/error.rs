use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, FmErr>;

/// The crate's error type.
///
/// Every variant is fatal for the run that produced it, nothing in the crate retries.
#[derive(Debug)]
pub enum FmErr {
    Io(io::Error),
    InvalidParam {
        name: String,
        value: String,
    },
    UnknownTask(String),
    MissingModel {
        task: &'static str,
    },
    InvalidModelTag([u8; 4]),
    InvalidModelParam(String),
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    NonFinite {
        what: &'static str,
        value: f64,
    },
    Parse {
        line: usize,
        msg: String,
    },
    InvalidState {
        op: &'static str,
        stage: &'static str,
    },
    ThreadPool(String),
    Init(String),
    EmptyShard {
        what: &'static str,
    },
    WorkerPanicked {
        rank: usize,
    },
    Aborted,
}

impl Display for FmErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FmErr::Io(e) => write!(f, "io error: {e}"),
            FmErr::InvalidParam { name, value } => {
                write!(f, "invalid value {value:?} for parameter {name}")
            }
            FmErr::UnknownTask(task) => write!(f, "unknown task: {task}"),
            FmErr::MissingModel { task } => write!(f, "must set model_in for task={task}"),
            FmErr::InvalidModelTag(tag) => write!(
                f,
                "invalid model file, unrecognized format tag {:?}",
                String::from_utf8_lossy(tag)
            ),
            FmErr::InvalidModelParam(msg) => write!(f, "invalid model parameters: {msg}"),
            FmErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            FmErr::NonFinite { what, value } => write!(f, "{what} is not finite: {value}"),
            FmErr::Parse { line, msg } => write!(f, "parse error at line {line}: {msg}"),
            FmErr::InvalidState { op, stage } => {
                write!(f, "cannot call {op} while the objective is {stage}")
            }
            FmErr::ThreadPool(msg) => write!(f, "failed to build thread pool: {msg}"),
            FmErr::Init(msg) => write!(f, "failed to initialize weights: {msg}"),
            FmErr::EmptyShard { what } => write!(f, "the {what} set has no rows in any shard"),
            FmErr::WorkerPanicked { rank } => write!(f, "worker {rank} panicked"),
            FmErr::Aborted => write!(f, "the collective group was aborted by a failing worker"),
        }
    }
}

impl Error for FmErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FmErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FmErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rayon::ThreadPoolBuildError> for FmErr {
    fn from(value: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool(value.to_string())
    }
}

/// Boundary conversion for callers speaking `io::Result`.
impl From<FmErr> for io::Error {
    fn from(value: FmErr) -> Self {
        match value {
            FmErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
