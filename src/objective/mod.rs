mod config;
mod fm;
mod obj_function;

pub use config::ObjConfig;
pub use fm::FmObjective;
pub use obj_function::ObjFunction;
