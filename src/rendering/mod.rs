pub mod buffer;
pub mod context;
pub mod pool;
pub mod transform;
