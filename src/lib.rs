pub mod collective;
pub mod config;
pub mod data;
pub mod error;
pub mod initialization;
pub mod loss;
pub mod model;
pub mod objective;
pub mod optimization;
pub mod runner;
pub mod storage;

pub use error::{FmErr, Result};
