pub mod math;
mod param;
mod store;

pub use math::{accumulate_grad, predict_margin};
pub use param::ModelParam;
pub(crate) use param::parse;
pub use store::{FmModel, MODEL_TAG, read_param, read_weights, save_model, write_param};
