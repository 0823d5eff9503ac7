mod lbfgs;
mod param;

pub use lbfgs::{Lbfgs, checkpoint_path, snapshot_path};
pub use param::LbfgsParam;
