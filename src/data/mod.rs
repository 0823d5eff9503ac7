mod iter;
pub mod libsvm;
mod row;
mod shard;

pub use iter::{InMemoryShard, RowBlockIter, scan_shard};
pub use libsvm::LibSvmIter;
pub use row::{Row, RowBlock};
pub use shard::{ShardSpec, shard_range};
