mod arena;

pub use arena::GradArena;
