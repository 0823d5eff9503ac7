mod collective;
mod local;
mod solo;

pub use collective::{Collective, WorkerContext};
pub use local::{LocalCollective, local_group};
pub use solo::Solo;
