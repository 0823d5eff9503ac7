mod logistic;
mod loss_fn;
mod loss_type;
mod squared;

pub use logistic::Logistic;
pub use loss_fn::LossFn;
pub use loss_type::LossType;
pub use squared::Squared;
